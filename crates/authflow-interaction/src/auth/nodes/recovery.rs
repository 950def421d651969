use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use authflow_core::authn::AuthenticatorKind;
use authflow_core::error::{AuthflowError, Result};

use super::require_input;
use crate::auth::{edges, AuthEdge, AuthEffect, AuthGraph, AuthNode, AuthStep, AuthTransition, DynAuthInput};
use crate::engine::Context;

/// Issues recovery codes once the path has set up a second factor.
#[derive(Debug)]
pub struct EdgeGenerateRecoveryCode;

impl AuthTransition for EdgeGenerateRecoveryCode {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let new_secondary = graph
                .user_new_authenticators()
                .iter()
                .any(|a| a.kind == AuthenticatorKind::Secondary);
            if ctx.config.authentication.recovery_code.disabled || !new_secondary {
                return Ok(NodeGenerateRecoveryCodeEnd {
                    recovery_codes: vec![],
                }
                .into());
            }
            Ok(NodeGenerateRecoveryCodeBegin {
                recovery_codes: ctx.services.mfa.generate_recovery_codes(),
            }
            .into())
        })
    }
}

/// Recovery codes shown to the user until they confirm having saved them.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeGenerateRecoveryCodeBegin {
    pub recovery_codes: Vec<String>,
}

impl AuthStep for NodeGenerateRecoveryCodeBegin {
    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        edges([EdgeViewRecoveryCode {
            recovery_codes: self.recovery_codes.clone(),
        }])
    }
}

#[derive(Debug)]
pub struct EdgeViewRecoveryCode {
    pub recovery_codes: Vec<String>,
}

impl AuthTransition for EdgeViewRecoveryCode {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            if !require_input(input)?.viewed_recovery_codes() {
                return Err(AuthflowError::IncompatibleInput);
            }
            Ok(NodeGenerateRecoveryCodeEnd {
                recovery_codes: self.recovery_codes.clone(),
            }
            .into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeGenerateRecoveryCodeEnd {
    #[serde(default)]
    pub recovery_codes: Vec<String>,
}

impl AuthStep for NodeGenerateRecoveryCodeEnd {}

#[derive(Debug)]
pub struct EdgeDoGenerateRecoveryCode {
    pub recovery_codes: Vec<String>,
}

impl AuthTransition for EdgeDoGenerateRecoveryCode {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            Ok(NodeDoGenerateRecoveryCode {
                user_id: graph.user_id()?,
                recovery_codes: self.recovery_codes.clone(),
            }
            .into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDoGenerateRecoveryCode {
    pub user_id: String,
    #[serde(default)]
    pub recovery_codes: Vec<String>,
}

impl AuthStep for NodeDoGenerateRecoveryCode {
    fn effects(&self) -> Vec<AuthEffect> {
        if self.recovery_codes.is_empty() {
            return vec![];
        }
        vec![AuthEffect::ReplaceRecoveryCodes {
            user_id: self.user_id.clone(),
            codes: self.recovery_codes.clone(),
        }]
    }
}
