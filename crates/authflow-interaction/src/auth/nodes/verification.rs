use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use authflow_core::authn::{IdentityInfo, OobChannel, VerifiableClaim};
use authflow_core::error::{AuthflowError, Result};
use authflow_core::event::EventPayload;
use authflow_core::types::OtpKind;

use super::{require, require_input, send_otp};
use crate::auth::{edges, AuthEdge, AuthEffect, AuthGraph, AuthNode, AuthStep, AuthTransition, DynAuthInput};
use crate::engine::{Context, Prepared};

fn claim_channel(claim: &VerifiableClaim) -> OobChannel {
    match claim.name.as_str() {
        "email" => OobChannel::Email,
        _ => OobChannel::Sms,
    }
}

#[derive(Debug)]
pub struct EdgeEnsureVerificationBegin {
    pub identity: IdentityInfo,
    pub requested_by_user: bool,
}

impl AuthTransition for EdgeEnsureVerificationBegin {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            Ok(NodeEnsureVerificationBegin {
                identity: self.identity.clone(),
                requested_by_user: self.requested_by_user,
                state: Prepared::new(),
            }
            .into())
        })
    }
}

#[derive(Debug, Clone)]
struct VerificationState {
    /// Present only when the identity has a claim whose verification is enabled.
    claim: Option<VerifiableClaim>,
    verified: bool,
    required: bool,
}

/// Decides whether the identity's claim needs to be verified.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeEnsureVerificationBegin {
    pub identity: IdentityInfo,
    #[serde(default)]
    pub requested_by_user: bool,
    #[serde(skip)]
    state: Prepared<VerificationState>,
}

impl AuthStep for NodeEnsureVerificationBegin {
    fn prepare<'a>(&'a self, ctx: &'a Context, _graph: &'a AuthGraph) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = VerificationState {
                claim: None,
                verified: false,
                required: false,
            };

            let claim = self.identity.verifiable_claim();
            let config = claim
                .as_ref()
                .and_then(|c| ctx.config.verification.claim(&c.name))
                .filter(|config| config.enabled);

            if let (Some(claim), Some(config)) = (claim, config) {
                let statuses = ctx.services.verification.claim_status(&self.identity).await?;
                state.verified = statuses
                    .iter()
                    .any(|s| s.verified && s.name == claim.name && s.value == claim.value);
                state.required = config.required;
                state.claim = Some(claim);
            }

            self.state.set(state);
            Ok(())
        })
    }

    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        let state = self.state.get("ensure_verification_begin")?;
        match &state.claim {
            Some(claim) if !state.verified && (state.required || self.requested_by_user) => {
                edges([EdgeVerifyIdentity {
                    identity: self.identity.clone(),
                    claim: claim.clone(),
                }])
            }
            _ => edges([EdgeEnsureVerificationEnd {
                identity: self.identity.clone(),
                new_verified_claim: None,
            }]),
        }
    }
}

/// Sends the first verification code.
#[derive(Debug)]
pub struct EdgeVerifyIdentity {
    pub identity: IdentityInfo,
    pub claim: VerifiableClaim,
}

impl AuthTransition for EdgeVerifyIdentity {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let channel = claim_channel(&self.claim);
            send_otp(ctx, channel, &self.claim.value, OtpKind::Verification).await?;
            Ok(NodeVerifyIdentity {
                identity: self.identity.clone(),
                claim: self.claim.clone(),
                channel,
            }
            .into())
        })
    }
}

/// Waiting for the verification code.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeVerifyIdentity {
    pub identity: IdentityInfo,
    pub claim: VerifiableClaim,
    pub channel: OobChannel,
}

impl AuthStep for NodeVerifyIdentity {
    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        Ok(Some(vec![
            EdgeVerifyIdentityResend {
                claim: self.claim.clone(),
                channel: self.channel,
            }
            .into(),
            EdgeVerifyIdentityCheckCode {
                identity: self.identity.clone(),
                claim: self.claim.clone(),
            }
            .into(),
        ]))
    }
}

#[derive(Debug)]
pub struct EdgeVerifyIdentityResend {
    pub claim: VerifiableClaim,
    pub channel: OobChannel,
}

impl AuthTransition for EdgeVerifyIdentityResend {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            if !require_input(input)?.resend() {
                return Err(AuthflowError::IncompatibleInput);
            }
            send_otp(ctx, self.channel, &self.claim.value, OtpKind::Verification).await?;
            Err(AuthflowError::SameNode)
        })
    }
}

#[derive(Debug)]
pub struct EdgeVerifyIdentityCheckCode {
    pub identity: IdentityInfo,
    pub claim: VerifiableClaim,
}

impl AuthTransition for EdgeVerifyIdentityCheckCode {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let code = require(require_input(input)?.verification_code())?;
            ctx.services
                .otp_codes
                .verify(&self.claim.value, OtpKind::Verification, code)
                .await?;
            Ok(NodeEnsureVerificationEnd {
                identity: self.identity.clone(),
                new_verified_claim: Some(self.claim.clone()),
            }
            .into())
        })
    }
}

/// Skips verification.
#[derive(Debug)]
pub struct EdgeEnsureVerificationEnd {
    pub identity: IdentityInfo,
    pub new_verified_claim: Option<VerifiableClaim>,
}

impl AuthTransition for EdgeEnsureVerificationEnd {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            Ok(NodeEnsureVerificationEnd {
                identity: self.identity.clone(),
                new_verified_claim: self.new_verified_claim.clone(),
            }
            .into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeEnsureVerificationEnd {
    pub identity: IdentityInfo,
    #[serde(default)]
    pub new_verified_claim: Option<VerifiableClaim>,
}

impl AuthStep for NodeEnsureVerificationEnd {}

#[derive(Debug)]
pub struct EdgeDoVerifyIdentity {
    pub identity: IdentityInfo,
    pub new_verified_claim: Option<VerifiableClaim>,
}

impl AuthTransition for EdgeDoVerifyIdentity {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            Ok(NodeDoVerifyIdentity {
                identity: self.identity.clone(),
                new_verified_claim: self.new_verified_claim.clone(),
            }
            .into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDoVerifyIdentity {
    pub identity: IdentityInfo,
    #[serde(default)]
    pub new_verified_claim: Option<VerifiableClaim>,
}

impl AuthStep for NodeDoVerifyIdentity {
    fn effects(&self) -> Vec<AuthEffect> {
        let Some(claim) = &self.new_verified_claim else {
            return vec![];
        };
        vec![
            AuthEffect::VerifyClaim {
                user_id: self.identity.user_id.clone(),
                claim: claim.clone(),
            },
            AuthEffect::Dispatch(EventPayload::IdentityVerified {
                user_id: self.identity.user_id.clone(),
                claim: claim.clone(),
            }),
        ]
    }
}
