use futures::future::BoxFuture;
use tracing::debug;

use authflow_core::authn::{AuthenticatorInfo, IdentityInfo, VerifiableClaim};
use authflow_core::error::{AuthflowError, Result};
use authflow_core::event::EventPayload;
use authflow_core::types::{RecoveryCode, Session};

use super::{AuthFlow, AuthGraph};
use crate::engine::{Context, Effect, EffectPhase};

/// Side effects declared by authentication nodes.
///
/// Exploration effects write through collaborators that share the request's
/// database savepoint, so a dry run leaves nothing behind. Commit effects
/// only run once the path is committed.
#[derive(Debug, Clone)]
pub enum AuthEffect {
    CreateUser {
        user_id: String,
    },
    CreateIdentity {
        identity: IdentityInfo,
    },
    RemoveIdentity {
        identity: IdentityInfo,
    },
    VerifyClaim {
        user_id: String,
        claim: VerifiableClaim,
    },
    CreateAuthenticators {
        authenticators: Vec<AuthenticatorInfo>,
    },
    UpdateAuthenticator {
        authenticator: AuthenticatorInfo,
    },
    RemoveAuthenticator {
        authenticator: AuthenticatorInfo,
        invalidate_device_tokens: bool,
    },
    ConsumeRecoveryCode {
        code: RecoveryCode,
    },
    CreateDeviceToken {
        user_id: String,
        token: String,
    },
    ReplaceRecoveryCodes {
        user_id: String,
        codes: Vec<String>,
    },

    /// Emits `user.created` with everything the path created for the user.
    AfterCreateUser {
        user_id: String,
    },
    CreateSession {
        session: Session,
    },
    ReauthenticateSession {
        session_id: String,
        amr: Vec<String>,
    },
    UpdateLoginTime {
        user_id: String,
    },
    ResetPassword {
        code: String,
        new_password: String,
    },
    Dispatch(EventPayload),
}

impl AuthEffect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateUser { .. } => "create_user",
            Self::CreateIdentity { .. } => "create_identity",
            Self::RemoveIdentity { .. } => "remove_identity",
            Self::VerifyClaim { .. } => "verify_claim",
            Self::CreateAuthenticators { .. } => "create_authenticators",
            Self::UpdateAuthenticator { .. } => "update_authenticator",
            Self::RemoveAuthenticator { .. } => "remove_authenticator",
            Self::ConsumeRecoveryCode { .. } => "consume_recovery_code",
            Self::CreateDeviceToken { .. } => "create_device_token",
            Self::ReplaceRecoveryCodes { .. } => "replace_recovery_codes",
            Self::AfterCreateUser { .. } => "after_create_user",
            Self::CreateSession { .. } => "create_session",
            Self::ReauthenticateSession { .. } => "reauthenticate_session",
            Self::UpdateLoginTime { .. } => "update_login_time",
            Self::ResetPassword { .. } => "reset_password",
            Self::Dispatch(_) => "dispatch",
        }
    }

    async fn run(&self, ctx: &Context, graph: &AuthGraph) -> Result<()> {
        let services = &ctx.services;
        match self {
            Self::CreateUser { user_id } => {
                services.users.create(user_id).await?;
            }
            Self::CreateIdentity { identity } => {
                // Another flow may have taken the login ID since the conflict check
                if services.identities.check_duplicated(identity).await?.is_some() {
                    return Err(AuthflowError::DuplicatedIdentity);
                }
                services.identities.create(identity).await?;
            }
            Self::RemoveIdentity { identity } => {
                services.identities.delete(identity).await?;
            }
            Self::VerifyClaim { user_id, claim } => {
                services.verification.mark_claim_verified(user_id, claim).await?;
            }
            Self::CreateAuthenticators { authenticators } => {
                for authenticator in authenticators {
                    services.authenticators.create(authenticator).await?;
                }
            }
            Self::UpdateAuthenticator { authenticator } => {
                services.authenticators.update(authenticator).await?;
            }
            Self::RemoveAuthenticator {
                authenticator,
                invalidate_device_tokens,
            } => {
                services.authenticators.delete(authenticator).await?;
                if *invalidate_device_tokens {
                    services
                        .mfa
                        .invalidate_all_device_tokens(&authenticator.user_id)
                        .await?;
                }
            }
            Self::ConsumeRecoveryCode { code } => {
                services.mfa.consume_recovery_code(code).await?;
            }
            Self::CreateDeviceToken { user_id, token } => {
                services.mfa.create_device_token(user_id, token).await?;
            }
            Self::ReplaceRecoveryCodes { user_id, codes } => {
                services.mfa.replace_recovery_codes(user_id, codes).await?;
            }
            Self::AfterCreateUser { user_id } => {
                let identities = graph.user_new_identities();
                let authenticator_ids = graph
                    .user_new_authenticators()
                    .into_iter()
                    .map(|a| a.id)
                    .collect();
                services
                    .events
                    .dispatch(EventPayload::UserCreated {
                        user_id: user_id.clone(),
                        identities,
                        authenticator_ids,
                    })
                    .await?;
            }
            Self::CreateSession { session } => {
                services.sessions.create(session).await?;
            }
            Self::ReauthenticateSession { session_id, amr } => {
                services.sessions.reauthenticate(session_id, amr).await?;
            }
            Self::UpdateLoginTime { user_id } => {
                let now = services.clock.now();
                services.users.update_login_time(user_id, now).await?;
            }
            Self::ResetPassword { code, new_password } => {
                services.reset_password.reset_password(code, new_password).await?;
            }
            Self::Dispatch(payload) => ctx.dispatch(payload.clone()),
        }
        Ok(())
    }
}

impl Effect<AuthFlow> for AuthEffect {
    fn phase(&self) -> EffectPhase {
        match self {
            Self::AfterCreateUser { .. }
            | Self::CreateSession { .. }
            | Self::ReauthenticateSession { .. }
            | Self::UpdateLoginTime { .. }
            | Self::ResetPassword { .. }
            | Self::Dispatch(_) => EffectPhase::Commit,
            _ => EffectPhase::Explore,
        }
    }

    fn apply<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a AuthGraph,
        index: usize,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            debug!(effect = self.name(), node_index = index, dry_run = ctx.is_dry_run(), "Applying effect");
            self.run(ctx, graph).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases() {
        let explore = AuthEffect::CreateUser {
            user_id: "u1".into(),
        };
        let commit = AuthEffect::UpdateLoginTime {
            user_id: "u1".into(),
        };
        assert_eq!(explore.phase(), EffectPhase::Explore);
        assert_eq!(commit.phase(), EffectPhase::Commit);
        assert_eq!(
            AuthEffect::ResetPassword {
                code: "c".into(),
                new_password: "p".into()
            }
            .phase(),
            EffectPhase::Commit
        );
    }
}
