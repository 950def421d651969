use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use authflow_core::authn::{
    AuthenticationStage, AuthenticatorInfo, AuthenticatorKind, AuthenticatorSpec,
    AuthenticatorType, Credential, IdentityInfo, LoginIdKeyType, OobChannel, SpecPayload,
};
use authflow_core::config::{AuthenticationConfig, AuthenticatorConfig, SecondaryAuthenticationMode};
use authflow_core::error::{AuthflowError, Result};
use authflow_core::new_id;
use authflow_core::types::OtpKind;

use super::{require, require_input, send_otp};
use crate::auth::{
    sorted_edges, AuthEdge, AuthEffect, AuthGraph, AuthNode, AuthStep, AuthTransition,
    DynAuthInput,
};
use crate::engine::{Context, Prepared, Sortable};

fn oob_payload(typ: AuthenticatorType, target: &str) -> Result<SpecPayload> {
    match typ {
        AuthenticatorType::OobEmail => Ok(SpecPayload::OobEmail {
            email: target.to_string(),
        }),
        AuthenticatorType::OobSms => Ok(SpecPayload::OobSms {
            phone: target.to_string(),
        }),
        other => Err(AuthflowError::InvariantViolated(format!(
            "{other} is not an out-of-band authenticator"
        ))),
    }
}

/// Parameters shared by every edge leaving [`NodeCreateAuthenticatorBegin`].
#[derive(Debug, Clone)]
pub struct NewAuthenticator {
    pub id: String,
    pub user_id: String,
    pub stage: AuthenticationStage,
    pub is_default: bool,
}

impl NewAuthenticator {
    async fn build(&self, ctx: &Context, payload: SpecPayload) -> Result<AuthenticatorInfo> {
        let spec = AuthenticatorSpec {
            user_id: self.user_id.clone(),
            kind: self.stage.into(),
            is_default: self.is_default,
            payload,
        };
        ctx.services
            .authenticators
            .new_authenticator(&self.id, &spec)
            .await
    }
}

#[derive(Debug)]
pub struct EdgeCreateAuthenticatorBegin {
    pub stage: AuthenticationStage,
    /// Restricts setup to one type.
    pub authenticator_type: Option<AuthenticatorType>,
}

impl AuthTransition for EdgeCreateAuthenticatorBegin {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            Ok(NodeCreateAuthenticatorBegin {
                new_authenticator_id: new_id(),
                stage: self.stage,
                authenticator_type: self.authenticator_type,
                skip_mfa_setup: input.is_some_and(|i| i.skip_mfa_setup()),
                requested_by_user: input.is_some_and(|i| i.requested_by_user()),
                state: Prepared::new(),
            }
            .into())
        })
    }
}

#[derive(Debug, Clone)]
struct CreateAuthenticatorState {
    user_id: String,
    identity: Option<IdentityInfo>,
    primary: Option<AuthenticatorInfo>,
    existing: Vec<AuthenticatorInfo>,
    authentication: AuthenticationConfig,
    limits: AuthenticatorConfig,
}

impl CreateAuthenticatorState {
    fn of_kind(&self, kind: AuthenticatorKind) -> impl Iterator<Item = &AuthenticatorInfo> {
        self.existing.iter().filter(move |a| a.kind == kind)
    }

    fn below_maximum(&self, typ: AuthenticatorType) -> bool {
        let count = self
            .of_kind(AuthenticatorKind::Secondary)
            .filter(|a| a.authenticator_type() == typ)
            .count();
        let maximum = match typ {
            AuthenticatorType::Password => return true,
            AuthenticatorType::Totp => self.limits.totp.maximum,
            AuthenticatorType::OobEmail => self.limits.oob_otp.email.maximum,
            AuthenticatorType::OobSms => self.limits.oob_otp.sms.maximum,
        };
        count < maximum
    }
}

/// Offers the authenticator types that can be set up at `stage`.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeCreateAuthenticatorBegin {
    pub new_authenticator_id: String,
    pub stage: AuthenticationStage,
    #[serde(default)]
    pub authenticator_type: Option<AuthenticatorType>,
    #[serde(default)]
    pub skip_mfa_setup: bool,
    #[serde(default)]
    pub requested_by_user: bool,
    #[serde(skip)]
    state: Prepared<CreateAuthenticatorState>,
}

impl NodeCreateAuthenticatorBegin {
    fn new_authenticator(&self, state: &CreateAuthenticatorState, is_default: bool) -> NewAuthenticator {
        NewAuthenticator {
            id: self.new_authenticator_id.clone(),
            user_id: state.user_id.clone(),
            stage: self.stage,
            is_default,
        }
    }

    /// A setup edge for `typ`. `primary_target` is the login ID an OOB
    /// primary authenticator is bound to.
    fn setup_edge(
        new: NewAuthenticator,
        typ: AuthenticatorType,
        primary_target: Option<String>,
    ) -> (Sortable, AuthEdge) {
        let sortable = Sortable {
            authenticator_type: typ,
            is_default: new.is_default,
        };
        let edge = match typ {
            AuthenticatorType::Password => EdgeCreateAuthenticatorPassword { new }.into(),
            AuthenticatorType::Totp => EdgeCreateAuthenticatorTotpSetup { new }.into(),
            AuthenticatorType::OobEmail | AuthenticatorType::OobSms => EdgeCreateAuthenticatorOobSetup {
                new,
                authenticator_type: typ,
                target: primary_target,
            }
            .into(),
        };
        (sortable, edge)
    }

    fn derive_primary(&self, state: &CreateAuthenticatorState) -> Result<Vec<AuthEdge>> {
        let types = &state.authentication.primary_authenticators;

        // Adding a specific primary authenticator from settings
        if let Some(wanted) = self.authenticator_type {
            let mut candidates = vec![];
            if wanted == AuthenticatorType::Password && types.contains(&wanted) {
                candidates.push(Self::setup_edge(
                    self.new_authenticator(state, false),
                    wanted,
                    None,
                ));
            }
            return Ok(sorted_edges(types, candidates));
        }

        let Some(identity) = &state.identity else {
            return Ok(vec![]);
        };
        if identity.primary_authenticator_types().is_empty() {
            return Ok(vec![]);
        }
        if types.is_empty() {
            return Err(AuthflowError::Config(
                "identity requires primary authenticator but none is enabled".to_string(),
            ));
        }

        let has_one = state
            .existing
            .iter()
            .any(|a| types.contains(&a.authenticator_type()) && a.is_primary_of_identity(identity));
        if has_one {
            return Ok(vec![]);
        }

        let is_default = state.of_kind(AuthenticatorKind::Primary).next().is_none();
        let login_id = identity.login_id();
        let mut candidates = vec![];
        for &typ in types {
            let target = match (typ, login_id) {
                (AuthenticatorType::Password, _) => None,
                (AuthenticatorType::OobEmail, Some((LoginIdKeyType::Email, login_id)))
                | (AuthenticatorType::OobSms, Some((LoginIdKeyType::Phone, login_id))) => {
                    Some(login_id.to_string())
                }
                _ => continue,
            };
            candidates.push(Self::setup_edge(
                self.new_authenticator(state, is_default),
                typ,
                target,
            ));
        }

        if candidates.is_empty() {
            return Err(AuthflowError::Config(
                "no primary authenticator can be created for identity".to_string(),
            ));
        }
        Ok(sorted_edges(types, candidates))
    }

    fn derive_secondary(&self, state: &CreateAuthenticatorState) -> Vec<AuthEdge> {
        if self.skip_mfa_setup {
            return vec![];
        }
        let mode = state.authentication.secondary_authentication_mode;
        if mode.is_disabled() {
            return vec![];
        }

        let has_secondary = state.of_kind(AuthenticatorKind::Secondary).next().is_some();
        if !self.requested_by_user {
            if !state.primary.as_ref().is_some_and(AuthenticatorInfo::can_have_mfa) {
                return vec![];
            }
            match mode {
                SecondaryAuthenticationMode::IfExists => return vec![],
                SecondaryAuthenticationMode::Required if has_secondary => return vec![],
                _ => {}
            }
        }

        let is_default = !state
            .of_kind(AuthenticatorKind::Secondary)
            .any(|a| a.is_default);
        let types = &state.authentication.secondary_authenticators;
        let candidates = types
            .iter()
            .copied()
            .filter(|&typ| state.below_maximum(typ))
            .filter(|&typ| self.authenticator_type.map_or(true, |wanted| wanted == typ))
            .map(|typ| Self::setup_edge(self.new_authenticator(state, is_default), typ, None))
            .collect();
        sorted_edges(types, candidates)
    }
}

impl AuthStep for NodeCreateAuthenticatorBegin {
    fn prepare<'a>(&'a self, ctx: &'a Context, graph: &'a AuthGraph) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let user_id = graph.user_id()?;
            let existing = ctx.services.authenticators.list(&user_id).await?;
            self.state.set(CreateAuthenticatorState {
                user_id,
                identity: graph.user_last_identity(),
                primary: graph.user_authenticator(AuthenticationStage::Primary),
                existing,
                authentication: ctx.config.authentication.clone(),
                limits: ctx.config.authenticator.clone(),
            });
            Ok(())
        })
    }

    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        let state = self.state.get("create_authenticator_begin")?;
        let mut edges = match self.stage {
            AuthenticationStage::Primary => self.derive_primary(&state)?,
            AuthenticationStage::Secondary => self.derive_secondary(&state),
        };
        if edges.is_empty() {
            debug!(stage = %self.stage, "Nothing to set up");
            edges.push(
                EdgeCreateAuthenticatorEnd {
                    stage: self.stage,
                    authenticators: vec![],
                }
                .into(),
            );
        }
        Ok(Some(edges))
    }
}

#[derive(Debug)]
pub struct EdgeCreateAuthenticatorPassword {
    pub new: NewAuthenticator,
}

impl AuthTransition for EdgeCreateAuthenticatorPassword {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let password = require(require_input(input)?.new_password())?;
            let payload = SpecPayload::Password {
                plain_password: password.to_string(),
            };
            let authenticator = self.new.build(ctx, payload).await?;
            Ok(NodeCreateAuthenticatorEnd {
                stage: self.new.stage,
                authenticators: vec![authenticator],
            }
            .into())
        })
    }
}

#[derive(Debug)]
pub struct EdgeCreateAuthenticatorTotpSetup {
    pub new: NewAuthenticator,
}

impl AuthTransition for EdgeCreateAuthenticatorTotpSetup {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let input = require_input(input)?;
            if !input.setup_totp() {
                return Err(AuthflowError::IncompatibleInput);
            }
            let display_name = input.totp_display_name().unwrap_or("TOTP").to_string();
            let authenticator = self.new.build(ctx, SpecPayload::Totp { display_name }).await?;
            Ok(NodeCreateAuthenticatorTotpSetup {
                stage: self.new.stage,
                authenticator,
            }
            .into())
        })
    }
}

/// The TOTP secret has been shown; waiting for a first code.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeCreateAuthenticatorTotpSetup {
    pub stage: AuthenticationStage,
    pub authenticator: AuthenticatorInfo,
}

impl AuthStep for NodeCreateAuthenticatorTotpSetup {
    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        Ok(Some(vec![EdgeCreateAuthenticatorTotp {
            stage: self.stage,
            authenticator: self.authenticator.clone(),
        }
        .into()]))
    }
}

#[derive(Debug)]
pub struct EdgeCreateAuthenticatorTotp {
    pub stage: AuthenticationStage,
    pub authenticator: AuthenticatorInfo,
}

impl AuthTransition for EdgeCreateAuthenticatorTotp {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let code = require(require_input(input)?.totp_code())?;
            let ok = ctx
                .services
                .authenticators
                .verify(&self.authenticator, &Credential::Totp(code.to_string()))
                .await?;
            if !ok {
                return Err(AuthflowError::InvalidCredentials);
            }
            Ok(NodeCreateAuthenticatorEnd {
                stage: self.stage,
                authenticators: vec![self.authenticator.clone()],
            }
            .into())
        })
    }
}

/// Sends a setup code to a new out-of-band target. A primary target is the
/// identity's login ID; a secondary one comes from the input.
#[derive(Debug)]
pub struct EdgeCreateAuthenticatorOobSetup {
    pub new: NewAuthenticator,
    pub authenticator_type: AuthenticatorType,
    pub target: Option<String>,
}

impl AuthTransition for EdgeCreateAuthenticatorOobSetup {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let input = require_input(input)?;
            if input.oob_authenticator_type() != Some(self.authenticator_type) {
                return Err(AuthflowError::IncompatibleInput);
            }
            let target = match &self.target {
                Some(target) => target.clone(),
                None => require(input.oob_target())?.to_string(),
            };
            let channel = OobChannel::from_authenticator_type(self.authenticator_type).ok_or_else(|| {
                AuthflowError::InvariantViolated("oob setup for a non-oob type".to_string())
            })?;

            let payload = oob_payload(self.authenticator_type, &target)?;
            let authenticator = self.new.build(ctx, payload).await?;
            send_otp(ctx, channel, &target, OtpKind::Setup).await?;

            Ok(NodeCreateAuthenticatorOobSetup {
                stage: self.new.stage,
                authenticator,
                channel,
                target,
            }
            .into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeCreateAuthenticatorOobSetup {
    pub stage: AuthenticationStage,
    pub authenticator: AuthenticatorInfo,
    pub channel: OobChannel,
    pub target: String,
}

impl AuthStep for NodeCreateAuthenticatorOobSetup {
    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        Ok(Some(vec![
            EdgeCreateAuthenticatorOobResend {
                channel: self.channel,
                target: self.target.clone(),
            }
            .into(),
            EdgeCreateAuthenticatorOob {
                stage: self.stage,
                authenticator: self.authenticator.clone(),
                target: self.target.clone(),
            }
            .into(),
        ]))
    }
}

#[derive(Debug)]
pub struct EdgeCreateAuthenticatorOobResend {
    pub channel: OobChannel,
    pub target: String,
}

impl AuthTransition for EdgeCreateAuthenticatorOobResend {
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
            send_otp(ctx, self.channel, &self.target, OtpKind::Setup).await?;
            Err(AuthflowError::SameNode)
        })
    }
}

#[derive(Debug)]
pub struct EdgeCreateAuthenticatorOob {
    pub stage: AuthenticationStage,
    pub authenticator: AuthenticatorInfo,
    pub target: String,
}

impl AuthTransition for EdgeCreateAuthenticatorOob {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let code = require(require_input(input)?.oob_code())?;
            ctx.services
                .otp_codes
                .verify(&self.target, OtpKind::Setup, code)
                .await?;
            Ok(NodeCreateAuthenticatorEnd {
                stage: self.stage,
                authenticators: vec![self.authenticator.clone()],
            }
            .into())
        })
    }
}

#[derive(Debug)]
pub struct EdgeCreateAuthenticatorEnd {
    pub stage: AuthenticationStage,
    pub authenticators: Vec<AuthenticatorInfo>,
}

impl AuthTransition for EdgeCreateAuthenticatorEnd {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            Ok(NodeCreateAuthenticatorEnd {
                stage: self.stage,
                authenticators: self.authenticators.clone(),
            }
            .into())
        })
    }
}

/// Authenticators built for `stage`, not yet persisted. Empty when setup was skipped.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeCreateAuthenticatorEnd {
    pub stage: AuthenticationStage,
    #[serde(default)]
    pub authenticators: Vec<AuthenticatorInfo>,
}

impl AuthStep for NodeCreateAuthenticatorEnd {}

#[derive(Debug)]
pub struct EdgeDoCreateAuthenticator {
    pub stage: AuthenticationStage,
    pub authenticators: Vec<AuthenticatorInfo>,
}

impl AuthTransition for EdgeDoCreateAuthenticator {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            if !self.authenticators.is_empty() {
                let existing = ctx.services.authenticators.list(&graph.user_id()?).await?;
                let duplicated = self
                    .authenticators
                    .iter()
                    .any(|new| existing.iter().any(|old| old.equal(new)));
                if duplicated {
                    return Err(AuthflowError::DuplicatedAuthenticator);
                }
            }
            Ok(NodeDoCreateAuthenticator {
                stage: self.stage,
                authenticators: self.authenticators.clone(),
            }
            .into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDoCreateAuthenticator {
    pub stage: AuthenticationStage,
    #[serde(default)]
    pub authenticators: Vec<AuthenticatorInfo>,
}

impl AuthStep for NodeDoCreateAuthenticator {
    fn effects(&self) -> Vec<AuthEffect> {
        if self.authenticators.is_empty() {
            return vec![];
        }
        vec![AuthEffect::CreateAuthenticators {
            authenticators: self.authenticators.clone(),
        }]
    }

    fn user_authenticator(&self, stage: AuthenticationStage) -> Option<&AuthenticatorInfo> {
        match self.authenticators.as_slice() {
            [only] if stage == self.stage => Some(only),
            _ => None,
        }
    }

    fn user_new_authenticators(&self) -> &[AuthenticatorInfo] {
        &self.authenticators
    }
}

/// Picks one of the user's authenticators for removal.
#[derive(Debug)]
pub struct EdgeRemoveAuthenticator;

impl AuthTransition for EdgeRemoveAuthenticator {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let authenticator_id = require(require_input(input)?.remove_authenticator_id())?;
            let user_id = graph.user_id()?;
            let authenticator = ctx.services.authenticators.get(authenticator_id).await?;
            if authenticator.user_id != user_id {
                return Err(AuthflowError::AuthenticatorNotFound(authenticator_id.to_string()));
            }

            if authenticator.kind == AuthenticatorKind::Primary {
                let identities = ctx.services.identities.list_by_user(&user_id).await?;
                let remaining: Vec<AuthenticatorInfo> = ctx
                    .services
                    .authenticators
                    .list(&user_id)
                    .await?
                    .into_iter()
                    .filter(|a| a.id != authenticator.id)
                    .collect();
                // Every identity that needs a primary authenticator must keep one
                for identity in &identities {
                    let needs_one = !identity.primary_authenticator_types().is_empty();
                    if needs_one && !remaining.iter().any(|a| a.is_primary_of_identity(identity)) {
                        return Err(AuthflowError::MissingAuthenticatorForIdentity);
                    }
                }
            }

            Ok(NodeRemoveAuthenticator { authenticator }.into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeRemoveAuthenticator {
    pub authenticator: AuthenticatorInfo,
}

impl AuthStep for NodeRemoveAuthenticator {}

#[derive(Debug)]
pub struct EdgeDoRemoveAuthenticator {
    pub authenticator: AuthenticatorInfo,
}

impl AuthTransition for EdgeDoRemoveAuthenticator {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let mut invalidate_device_tokens = false;
            if self.authenticator.kind == AuthenticatorKind::Secondary {
                let others = ctx
                    .services
                    .authenticators
                    .list(&self.authenticator.user_id)
                    .await?;
                // Remembered devices are useless once no second factor is left
                invalidate_device_tokens = !others
                    .iter()
                    .any(|a| a.kind == AuthenticatorKind::Secondary && a.id != self.authenticator.id);
            }
            Ok(NodeDoRemoveAuthenticator {
                authenticator: self.authenticator.clone(),
                invalidate_device_tokens,
            }
            .into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDoRemoveAuthenticator {
    pub authenticator: AuthenticatorInfo,
    #[serde(default)]
    pub invalidate_device_tokens: bool,
}

impl AuthStep for NodeDoRemoveAuthenticator {
    fn effects(&self) -> Vec<AuthEffect> {
        vec![AuthEffect::RemoveAuthenticator {
            authenticator: self.authenticator.clone(),
            invalidate_device_tokens: self.invalidate_device_tokens,
        }]
    }
}
