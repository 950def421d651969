use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use authflow_core::authn::{
    AuthenticationStage, AuthenticatorInfo, AuthenticatorKind, AuthenticatorType, Credential,
};
use authflow_core::error::{AuthflowError, Result};

use super::{require, require_input};
use crate::auth::{edges, AuthEdge, AuthEffect, AuthGraph, AuthNode, AuthStep, AuthTransition, DynAuthInput};
use crate::engine::{Context, Prepared};

#[derive(Debug)]
pub struct EdgeChangePasswordBegin {
    pub stage: AuthenticationStage,
}

impl AuthTransition for EdgeChangePasswordBegin {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            Ok(NodeChangePasswordBegin {
                stage: self.stage,
                password: Prepared::new(),
            }
            .into())
        })
    }
}

/// Asks for the current and the new password of `stage`.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeChangePasswordBegin {
    pub stage: AuthenticationStage,
    #[serde(skip)]
    password: Prepared<AuthenticatorInfo>,
}

impl AuthStep for NodeChangePasswordBegin {
    fn prepare<'a>(&'a self, ctx: &'a Context, graph: &'a AuthGraph) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let kind = AuthenticatorKind::from(self.stage);
            let password = ctx
                .services
                .authenticators
                .list(&graph.user_id()?)
                .await?
                .into_iter()
                .find(|a| a.kind == kind && a.authenticator_type() == AuthenticatorType::Password)
                .ok_or_else(|| AuthflowError::AuthenticatorNotFound(format!("{} password", self.stage)))?;
            self.password.set(password);
            Ok(())
        })
    }

    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        let password = self.password.get("change_password_begin")?;
        edges([EdgeChangePassword {
            authenticator: AuthenticatorInfo::clone(&password),
        }])
    }
}

#[derive(Debug)]
pub struct EdgeChangePassword {
    pub authenticator: AuthenticatorInfo,
}

impl AuthTransition for EdgeChangePassword {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let input = require_input(input)?;
            let old_password = require(input.old_password())?;
            let new_password = require(input.new_password())?;

            let authenticators = &ctx.services.authenticators;
            let ok = authenticators
                .verify(&self.authenticator, &Credential::Password(old_password.to_string()))
                .await?;
            if !ok {
                return Err(AuthflowError::InvalidCredentials);
            }
            let updated = authenticators
                .with_password(&self.authenticator, new_password)
                .await?;
            Ok(NodeChangePasswordEnd { authenticator: updated }.into())
        })
    }
}

/// The password authenticator carrying the new hash, not yet persisted.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeChangePasswordEnd {
    pub authenticator: AuthenticatorInfo,
}

impl AuthStep for NodeChangePasswordEnd {}

#[derive(Debug)]
pub struct EdgeDoUpdateAuthenticator {
    pub authenticator: AuthenticatorInfo,
}

impl AuthTransition for EdgeDoUpdateAuthenticator {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            Ok(NodeDoUpdateAuthenticator {
                authenticator: self.authenticator.clone(),
            }
            .into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDoUpdateAuthenticator {
    pub authenticator: AuthenticatorInfo,
}

impl AuthStep for NodeDoUpdateAuthenticator {
    fn effects(&self) -> Vec<AuthEffect> {
        vec![AuthEffect::UpdateAuthenticator {
            authenticator: self.authenticator.clone(),
        }]
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NodeForgotPasswordBegin {}

impl AuthStep for NodeForgotPasswordBegin {
    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        edges([EdgeForgotPasswordSendCode])
    }
}

#[derive(Debug)]
pub struct EdgeForgotPasswordSendCode;

impl AuthTransition for EdgeForgotPasswordSendCode {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let login_id = require(require_input(input)?.forgot_password_login_id())?;
            // Unknown login IDs look the same as known ones to the caller
            match ctx.services.forgot_password.send_code(login_id).await {
                Ok(()) => {}
                Err(AuthflowError::UserNotFound) => {
                    debug!("Reset code requested for unknown login ID");
                }
                Err(e) => return Err(e),
            }
            Ok(NodeForgotPasswordEnd {
                login_id: login_id.to_string(),
            }
            .into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeForgotPasswordEnd {
    pub login_id: String,
}

impl AuthStep for NodeForgotPasswordEnd {}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NodeResetPasswordBegin {}

impl AuthStep for NodeResetPasswordBegin {
    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        edges([EdgeResetPassword])
    }
}

#[derive(Debug)]
pub struct EdgeResetPassword;

impl AuthTransition for EdgeResetPassword {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let input = require_input(input)?;
            let code = require(input.reset_code())?;
            let new_password = require(input.new_password())?;
            let user_id = ctx.services.reset_password.verify_code(code).await?;
            Ok(NodeResetPasswordEnd {
                code: code.to_string(),
                new_password: new_password.to_string(),
                user_id,
            }
            .into())
        })
    }
}

/// A verified reset code; the password is replaced on commit.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeResetPasswordEnd {
    pub code: String,
    pub new_password: String,
    pub user_id: String,
}

impl AuthStep for NodeResetPasswordEnd {
    fn effects(&self) -> Vec<AuthEffect> {
        vec![AuthEffect::ResetPassword {
            code: self.code.clone(),
            new_password: self.new_password.clone(),
        }]
    }

    fn user_id(&self) -> Option<&str> {
        Some(&self.user_id)
    }
}
