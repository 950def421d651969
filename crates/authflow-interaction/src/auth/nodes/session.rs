use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use authflow_core::error::{AuthflowError, Result};
use authflow_core::event::EventPayload;
use authflow_core::types::{Cookie, CreateReason, Session, SessionAttrs};

use crate::auth::{AuthEffect, AuthGraph, AuthNode, AuthStep, AuthTransition, DynAuthInput};
use crate::engine::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureSessionMode {
    /// Issue a new IdP session and its cookie.
    Create,
    /// Authenticate without issuing a session (e.g. a third-party client
    /// that keeps its own).
    Noop,
    /// Refresh the authentication time of an existing session.
    Reauthenticate,
}

#[derive(Debug)]
pub struct EdgeDoEnsureSession {
    pub create_reason: CreateReason,
    pub mode: EnsureSessionMode,
    /// Session to refresh in reauthenticate mode.
    pub session_id: Option<String>,
}

impl AuthTransition for EdgeDoEnsureSession {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let user_id = graph.user_id()?;
            let amr = graph.amr();

            let mut node = NodeDoEnsureSession {
                create_reason: self.create_reason,
                mode: self.mode,
                user_id,
                amr,
                session: None,
                session_id: None,
                session_cookie: None,
            };

            match self.mode {
                EnsureSessionMode::Create => {
                    let attrs = SessionAttrs {
                        user_id: node.user_id.clone(),
                        amr: node.amr.clone(),
                        reason: self.create_reason,
                    };
                    let (session, token) = ctx.services.sessions.make_session(&attrs);
                    let cookie = ctx
                        .services
                        .cookies
                        .value_cookie(&ctx.config.session.session_cookie(), &token);
                    node.session_id = Some(session.id.clone());
                    node.session = Some(session);
                    node.session_cookie = Some(cookie);
                }
                EnsureSessionMode::Reauthenticate => {
                    let session_id = self.session_id.clone().ok_or_else(|| {
                        AuthflowError::InvariantViolated("no session to reauthenticate".to_string())
                    })?;
                    node.session_id = Some(session_id);
                }
                EnsureSessionMode::Noop => {}
            }

            debug!(mode = ?self.mode, reason = ?self.create_reason, amr = ?node.amr, "Session ensured");
            Ok(node.into())
        })
    }
}

/// Terminal node of the authenticate and reauthenticate intents.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDoEnsureSession {
    pub create_reason: CreateReason,
    pub mode: EnsureSessionMode,
    pub user_id: String,
    #[serde(default)]
    pub amr: Vec<String>,
    #[serde(default)]
    pub session: Option<Session>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub session_cookie: Option<Cookie>,
}

impl NodeDoEnsureSession {
    fn authenticated_event(&self) -> Option<AuthEffect> {
        let session_id = self.session_id.clone()?;
        match self.create_reason {
            CreateReason::Login | CreateReason::Reauthenticate => {
                Some(AuthEffect::Dispatch(EventPayload::UserAuthenticated {
                    user_id: self.user_id.clone(),
                    session_id,
                    amr: self.amr.clone(),
                    reason: self.create_reason,
                }))
            }
            CreateReason::Signup | CreateReason::Promote => None,
        }
    }
}

impl AuthStep for NodeDoEnsureSession {
    fn effects(&self) -> Vec<AuthEffect> {
        let mut effects = vec![];
        match (self.mode, &self.session, &self.session_id) {
            (EnsureSessionMode::Create, Some(session), _) => {
                effects.push(AuthEffect::CreateSession {
                    session: session.clone(),
                });
            }
            (EnsureSessionMode::Reauthenticate, _, Some(session_id)) => {
                effects.push(AuthEffect::ReauthenticateSession {
                    session_id: session_id.clone(),
                    amr: self.amr.clone(),
                });
            }
            // No session was touched, so the user has not logged in
            _ => return effects,
        }
        effects.push(AuthEffect::UpdateLoginTime {
            user_id: self.user_id.clone(),
        });
        effects.extend(self.authenticated_event());
        effects
    }

    fn user_id(&self) -> Option<&str> {
        Some(&self.user_id)
    }

    fn cookies(&self) -> Vec<Cookie> {
        self.session_cookie.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Effect, EffectPhase};

    fn node(mode: EnsureSessionMode, reason: CreateReason) -> NodeDoEnsureSession {
        NodeDoEnsureSession {
            create_reason: reason,
            mode,
            user_id: "u1".into(),
            amr: vec!["pwd".into()],
            session: None,
            session_id: Some("s1".into()),
            session_cookie: None,
        }
    }

    #[test]
    fn test_effects_are_commit_only() {
        let node = node(EnsureSessionMode::Reauthenticate, CreateReason::Reauthenticate);
        let effects = node.effects();
        let names: Vec<_> = effects.iter().map(AuthEffect::name).collect();
        assert_eq!(names, vec!["reauthenticate_session", "update_login_time", "dispatch"]);
        assert!(effects.iter().all(|e| e.phase() == EffectPhase::Commit));
    }

    #[test]
    fn test_signup_emits_no_authenticated_event() {
        let mut node = node(EnsureSessionMode::Create, CreateReason::Signup);
        node.session = Some(Session {
            id: "s1".into(),
            user_id: "u1".into(),
            amr: vec!["pwd".into()],
            created_at: chrono::Utc::now(),
            authenticated_at: None,
        });
        let names: Vec<_> = node.effects().iter().map(AuthEffect::name).collect();
        assert_eq!(names, vec!["create_session", "update_login_time"]);
    }

    #[test]
    fn test_noop_mode_leaves_login_time_alone() {
        let mut node = node(EnsureSessionMode::Noop, CreateReason::Login);
        node.session_id = None;
        assert!(node.effects().is_empty());
    }
}
