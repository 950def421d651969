//! Intents: the root node and routing table of each authentication flow.
//!
//! Routing only sees nodes that leave the choice of edges to their intent.
//! Reaching a node a flow has no route for means the graph does not belong
//! to the intent, which is a programming error rather than a user error.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use authflow_core::authn::{AuthenticationStage, AuthenticatorType, IdentityType};
use authflow_core::error::{AuthflowError, Result};
use authflow_core::types::CreateReason;

use super::nodes::*;
use super::{AuthEdge, AuthGraph, AuthNode, AuthRoute};
use crate::engine::{Context, Node};

fn unexpected(intent: &str, node: &AuthNode) -> ! {
    panic!("unexpected node {} in {} flow", node.kind(), intent)
}

fn one(edge: impl Into<AuthEdge>) -> Result<Vec<AuthEdge>> {
    Ok(vec![edge.into()])
}

fn finished() -> Result<Vec<AuthEdge>> {
    Ok(vec![])
}

/// Root shared by the intents acting on a signed-in user.
async fn use_user(ctx: &Context, user_id: &str) -> Result<AuthNode> {
    let user = ctx.services.users.get(user_id).await?;
    Ok(NodeDoUseUser { use_user_id: user.id }.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticateKind {
    Login,
    Signup,
    /// Turn an anonymous user into one with a real identity.
    Promote,
}

/// Login, signup and anonymous-user promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAuthenticate {
    pub kind: AuthenticateKind,
    /// Authenticate without issuing an IdP session.
    #[serde(default)]
    pub suppress_idp_session_cookie: bool,
    /// The user the flow is expected to end up with.
    #[serde(default)]
    pub user_id_hint: Option<String>,
}

impl IntentAuthenticate {
    pub fn new(kind: AuthenticateKind) -> Self {
        Self {
            kind,
            suppress_idp_session_cookie: false,
            user_id_hint: None,
        }
    }

    fn use_identity(&self, identity: &authflow_core::authn::IdentityInfo) -> Result<Vec<AuthEdge>> {
        one(EdgeDoUseIdentity {
            identity: identity.clone(),
            user_id_hint: self.user_id_hint.clone(),
        })
    }

    fn ensure_session(&self, graph: &AuthGraph) -> Result<Vec<AuthEdge>> {
        let create_reason = match self.kind {
            AuthenticateKind::Promote => CreateReason::Promote,
            _ if graph.new_user_id().is_some() => CreateReason::Signup,
            _ => CreateReason::Login,
        };
        let mode = if self.suppress_idp_session_cookie {
            EnsureSessionMode::Noop
        } else {
            EnsureSessionMode::Create
        };
        one(EdgeDoEnsureSession {
            create_reason,
            mode,
            session_id: None,
        })
    }

    fn route_selected_identity(&self, node: &NodeSelectIdentityEnd) -> Result<Vec<AuthEdge>> {
        let spec_type = node.identity_spec.identity_type();
        match (self.kind, &node.identity_info) {
            (AuthenticateKind::Login, Some(identity)) => self.use_identity(identity),
            // Logging in with an unknown OAuth or anonymous identity signs up
            (AuthenticateKind::Login, None) => match spec_type {
                IdentityType::OAuth | IdentityType::Anonymous => one(EdgeDoCreateUser),
                _ => Err(AuthflowError::UserNotFound),
            },
            // Signing up with a known OAuth identity logs in
            (AuthenticateKind::Signup, Some(identity)) => match spec_type {
                IdentityType::OAuth => self.use_identity(identity),
                _ => Err(AuthflowError::DuplicatedIdentity),
            },
            (AuthenticateKind::Signup, None) => one(EdgeDoCreateUser),
            // The anonymous identity goes through the same verification gate as a new one
            (AuthenticateKind::Promote, Some(identity))
                if identity.identity_type() == IdentityType::Anonymous =>
            {
                one(EdgeEnsureVerificationBegin {
                    identity: identity.clone(),
                    requested_by_user: false,
                })
            }
            (AuthenticateKind::Promote, _) => Err(AuthflowError::InvariantViolated(
                "promotion must start from an anonymous identity".to_string(),
            )),
        }
    }

    fn route_conflict(&self, node: &NodeCheckIdentityConflict) -> Result<Vec<AuthEdge>> {
        use authflow_core::config::PromotionConflictBehavior;

        let Some(duplicated) = &node.duplicated_identity else {
            return one(EdgeDoCreateIdentity {
                identity: node.new_identity.clone(),
            });
        };
        match (self.kind, node.promotion_conflict) {
            (AuthenticateKind::Promote, PromotionConflictBehavior::Login) => self.use_identity(duplicated),
            _ => Err(AuthflowError::DuplicatedIdentity),
        }
    }

    fn route_used_identity(&self, graph: &AuthGraph, node: &NodeDoUseIdentity) -> Result<Vec<AuthEdge>> {
        if self.kind == AuthenticateKind::Promote {
            if node.identity.identity_type() == IdentityType::Anonymous {
                return one(EdgeCreateIdentityBegin);
            }

            let anonymous = graph
                .select_identity_end()
                .and_then(|selected| selected.identity_info.as_ref())
                .filter(|identity| identity.identity_type() == IdentityType::Anonymous)
                .ok_or_else(|| {
                    AuthflowError::InvariantViolated("promotion without anonymous identity".to_string())
                })?;
            // The new identity now carries the user; drop the anonymous one
            if anonymous.user_id == node.identity.user_id {
                return one(EdgeDoRemoveIdentity {
                    identity: anonymous.clone(),
                });
            }
        }

        // New users have nothing to authenticate with yet
        if graph.new_user_id().is_some() {
            return one(EdgeValidateUser);
        }
        one(EdgeAuthenticationBegin {
            stage: AuthenticationStage::Primary,
        })
    }
}

impl AuthRoute for IntentAuthenticate {
    fn instantiate_root_node<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move { Ok(NodeSelectIdentityBegin::default().into()) })
    }

    fn derive_edges_for_node(&self, graph: &AuthGraph, node: &AuthNode) -> Result<Vec<AuthEdge>> {
        match node {
            AuthNode::SelectIdentityEnd(node) => self.route_selected_identity(node),
            AuthNode::DoCreateUser(_) => {
                let selected = graph.select_identity_end().ok_or_else(|| {
                    AuthflowError::InvariantViolated("user created without a selected identity".to_string())
                })?;
                one(EdgeCreateIdentityEnd {
                    identity_spec: selected.identity_spec.clone(),
                })
            }
            AuthNode::CreateIdentityEnd(node) => one(EdgeCheckIdentityConflict {
                new_identity: node.identity_info.clone(),
            }),
            AuthNode::CheckIdentityConflict(node) => self.route_conflict(node),
            AuthNode::DoCreateIdentity(node) => one(EdgeEnsureVerificationBegin {
                identity: node.identity.clone(),
                requested_by_user: false,
            }),
            AuthNode::EnsureVerificationEnd(node) => one(EdgeDoVerifyIdentity {
                identity: node.identity.clone(),
                new_verified_claim: node.new_verified_claim.clone(),
            }),
            AuthNode::DoVerifyIdentity(node) => self.use_identity(&node.identity),
            AuthNode::DoUseIdentity(node) => self.route_used_identity(graph, node),
            // Only promotion removes an identity, and only the anonymous one
            AuthNode::DoRemoveIdentity(node) if node.identity.identity_type() == IdentityType::Anonymous => {
                one(EdgeValidateUser)
            }
            AuthNode::AuthenticationEnd(node) => one(EdgeDoUseAuthenticator {
                stage: node.stage,
                authenticator: node.verified_authenticator.clone(),
            }),
            AuthNode::DoUseAuthenticator(node) => match node.stage {
                AuthenticationStage::Primary => one(EdgeAuthenticationBegin {
                    stage: AuthenticationStage::Secondary,
                }),
                AuthenticationStage::Secondary => one(EdgeValidateUser),
            },
            AuthNode::ValidateUser(_) => one(EdgeCreateAuthenticatorBegin {
                stage: AuthenticationStage::Primary,
                authenticator_type: None,
            }),
            AuthNode::CreateAuthenticatorEnd(node) => one(EdgeDoCreateAuthenticator {
                stage: node.stage,
                authenticators: node.authenticators.clone(),
            }),
            AuthNode::DoCreateAuthenticator(node) => match node.stage {
                AuthenticationStage::Primary => one(EdgeCreateAuthenticatorBegin {
                    stage: AuthenticationStage::Secondary,
                    authenticator_type: None,
                }),
                AuthenticationStage::Secondary => one(EdgeGenerateRecoveryCode),
            },
            AuthNode::GenerateRecoveryCodeEnd(node) => one(EdgeDoGenerateRecoveryCode {
                recovery_codes: node.recovery_codes.clone(),
            }),
            AuthNode::DoGenerateRecoveryCode(_) => self.ensure_session(graph),
            AuthNode::DoEnsureSession(_) => finished(),
            other => unexpected("authenticate", other),
        }
    }
}

/// Step-up authentication of a signed-in user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentReauthenticate {
    pub user_id: String,
    pub session_id: String,
}

impl AuthRoute for IntentReauthenticate {
    fn instantiate_root_node<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move { use_user(ctx, &self.user_id).await })
    }

    fn derive_edges_for_node(&self, _graph: &AuthGraph, node: &AuthNode) -> Result<Vec<AuthEdge>> {
        match node {
            AuthNode::DoUseUser(_) => one(EdgeAuthenticationBegin {
                stage: AuthenticationStage::Primary,
            }),
            AuthNode::AuthenticationEnd(node) => one(EdgeDoUseAuthenticator {
                stage: node.stage,
                authenticator: node.verified_authenticator.clone(),
            }),
            AuthNode::DoUseAuthenticator(node) => match node.stage {
                AuthenticationStage::Primary => one(EdgeAuthenticationBegin {
                    stage: AuthenticationStage::Secondary,
                }),
                AuthenticationStage::Secondary => one(EdgeDoEnsureSession {
                    create_reason: CreateReason::Reauthenticate,
                    mode: EnsureSessionMode::Reauthenticate,
                    session_id: Some(self.session_id.clone()),
                }),
            },
            AuthNode::DoEnsureSession(_) => finished(),
            other => unexpected("reauthenticate", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentChangePassword {
    pub user_id: String,
    pub stage: AuthenticationStage,
}

impl AuthRoute for IntentChangePassword {
    fn instantiate_root_node<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move { use_user(ctx, &self.user_id).await })
    }

    fn derive_edges_for_node(&self, _graph: &AuthGraph, node: &AuthNode) -> Result<Vec<AuthEdge>> {
        match node {
            AuthNode::DoUseUser(_) => one(EdgeChangePasswordBegin { stage: self.stage }),
            AuthNode::ChangePasswordEnd(node) => one(EdgeDoUpdateAuthenticator {
                authenticator: node.authenticator.clone(),
            }),
            AuthNode::DoUpdateAuthenticator(_) => finished(),
            other => unexpected("change_password", other),
        }
    }
}

/// Set up one more authenticator from account settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAddAuthenticator {
    pub user_id: String,
    pub stage: AuthenticationStage,
    #[serde(default)]
    pub authenticator_type: Option<AuthenticatorType>,
}

impl AuthRoute for IntentAddAuthenticator {
    fn instantiate_root_node<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move { use_user(ctx, &self.user_id).await })
    }

    fn derive_edges_for_node(&self, _graph: &AuthGraph, node: &AuthNode) -> Result<Vec<AuthEdge>> {
        match node {
            AuthNode::DoUseUser(_) => one(EdgeCreateAuthenticatorBegin {
                stage: self.stage,
                authenticator_type: self.authenticator_type,
            }),
            AuthNode::CreateAuthenticatorEnd(node) => one(EdgeDoCreateAuthenticator {
                stage: node.stage,
                authenticators: node.authenticators.clone(),
            }),
            AuthNode::DoCreateAuthenticator(_) => finished(),
            other => unexpected("add_authenticator", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRemoveAuthenticator {
    pub user_id: String,
}

impl AuthRoute for IntentRemoveAuthenticator {
    fn instantiate_root_node<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move { use_user(ctx, &self.user_id).await })
    }

    fn derive_edges_for_node(&self, _graph: &AuthGraph, node: &AuthNode) -> Result<Vec<AuthEdge>> {
        match node {
            AuthNode::DoUseUser(_) => one(EdgeRemoveAuthenticator),
            AuthNode::RemoveAuthenticator(node) => one(EdgeDoRemoveAuthenticator {
                authenticator: node.authenticator.clone(),
            }),
            AuthNode::DoRemoveAuthenticator(_) => finished(),
            other => unexpected("remove_authenticator", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRemoveIdentity {
    pub user_id: String,
}

impl AuthRoute for IntentRemoveIdentity {
    fn instantiate_root_node<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move { use_user(ctx, &self.user_id).await })
    }

    fn derive_edges_for_node(&self, _graph: &AuthGraph, node: &AuthNode) -> Result<Vec<AuthEdge>> {
        match node {
            AuthNode::DoUseUser(_) => one(EdgeRemoveIdentity),
            AuthNode::RemoveIdentity(node) => one(EdgeDoRemoveIdentity {
                identity: node.identity.clone(),
            }),
            AuthNode::DoRemoveIdentity(_) => finished(),
            other => unexpected("remove_identity", other),
        }
    }
}

/// Verify a claim of one of the user's identities on request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentVerifyIdentity {
    pub user_id: String,
    pub identity_id: String,
}

impl AuthRoute for IntentVerifyIdentity {
    fn instantiate_root_node<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let identity = ctx.services.identities.get(&self.identity_id).await?;
            if identity.user_id != self.user_id {
                return Err(AuthflowError::IdentityNotFound(self.identity_id.clone()));
            }
            Ok(NodeDoUseIdentity { identity }.into())
        })
    }

    fn derive_edges_for_node(&self, _graph: &AuthGraph, node: &AuthNode) -> Result<Vec<AuthEdge>> {
        match node {
            AuthNode::DoUseIdentity(node) => one(EdgeEnsureVerificationBegin {
                identity: node.identity.clone(),
                requested_by_user: true,
            }),
            AuthNode::EnsureVerificationEnd(node) => one(EdgeDoVerifyIdentity {
                identity: node.identity.clone(),
                new_verified_claim: node.new_verified_claim.clone(),
            }),
            AuthNode::DoVerifyIdentity(_) => finished(),
            other => unexpected("verify_identity", other),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentForgotPassword {}

impl AuthRoute for IntentForgotPassword {
    fn instantiate_root_node<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move { Ok(NodeForgotPasswordBegin::default().into()) })
    }

    fn derive_edges_for_node(&self, _graph: &AuthGraph, node: &AuthNode) -> Result<Vec<AuthEdge>> {
        match node {
            AuthNode::ForgotPasswordEnd(_) => finished(),
            other => unexpected("forgot_password", other),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentResetPassword {}

impl AuthRoute for IntentResetPassword {
    fn instantiate_root_node<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move { Ok(NodeResetPasswordBegin::default().into()) })
    }

    fn derive_edges_for_node(&self, _graph: &AuthGraph, node: &AuthNode) -> Result<Vec<AuthEdge>> {
        match node {
            AuthNode::ResetPasswordEnd(_) => finished(),
            other => unexpected("reset_password", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authflow_core::authn::{IdentityInfo, IdentityKind, IdentitySpec, LoginIdKeyType};
    use chrono::Utc;

    fn email_spec() -> IdentitySpec {
        IdentitySpec::LoginId {
            key_type: LoginIdKeyType::Email,
            login_id: "a@example.com".into(),
        }
    }

    fn email_identity() -> IdentityInfo {
        IdentityInfo {
            id: "i1".into(),
            user_id: "u1".into(),
            created_at: Utc::now(),
            kind: IdentityKind::LoginId {
                key_type: LoginIdKeyType::Email,
                login_id: "a@example.com".into(),
            },
        }
    }

    fn kinds(edges: Result<Vec<AuthEdge>>) -> Result<Vec<&'static str>> {
        use crate::engine::Edge;
        edges.map(|edges| edges.iter().map(|e| e.kind()).collect())
    }

    #[test]
    fn test_login_unknown_login_id_is_user_not_found() {
        let intent = IntentAuthenticate::new(AuthenticateKind::Login);
        let graph = AuthGraph::new(intent.clone().into());
        let node: AuthNode = NodeSelectIdentityEnd {
            identity_spec: email_spec(),
            identity_info: None,
        }
        .into();
        let err = intent.derive_edges_for_node(&graph, &node).unwrap_err();
        assert!(matches!(err, AuthflowError::UserNotFound));
    }

    #[test]
    fn test_login_with_unknown_oauth_signs_up() {
        let intent = IntentAuthenticate::new(AuthenticateKind::Login);
        let graph = AuthGraph::new(intent.clone().into());
        let node: AuthNode = NodeSelectIdentityEnd {
            identity_spec: IdentitySpec::OAuth {
                provider_alias: "google".into(),
                subject: "s1".into(),
                email: None,
            },
            identity_info: None,
        }
        .into();
        assert_eq!(
            kinds(intent.derive_edges_for_node(&graph, &node)).unwrap(),
            vec!["do_create_user"]
        );
    }

    #[test]
    fn test_signup_with_existing_login_id_is_duplicate() {
        let intent = IntentAuthenticate::new(AuthenticateKind::Signup);
        let graph = AuthGraph::new(intent.clone().into());
        let node: AuthNode = NodeSelectIdentityEnd {
            identity_spec: email_spec(),
            identity_info: Some(email_identity()),
        }
        .into();
        let err = intent.derive_edges_for_node(&graph, &node).unwrap_err();
        assert!(matches!(err, AuthflowError::DuplicatedIdentity));
    }

    #[test]
    fn test_login_after_primary_goes_to_secondary() {
        let intent = IntentAuthenticate::new(AuthenticateKind::Login);
        let graph = AuthGraph::new(intent.clone().into());
        let node: AuthNode = NodeDoUseAuthenticator {
            stage: AuthenticationStage::Primary,
            authenticator: None,
            user_id: "u1".into(),
            device_token: None,
            device_token_cookie: None,
        }
        .into();
        assert_eq!(
            kinds(intent.derive_edges_for_node(&graph, &node)).unwrap(),
            vec!["authentication_begin"]
        );
    }

    #[test]
    #[should_panic(expected = "unexpected node forgot_password_begin in authenticate flow")]
    fn test_unexpected_node_is_fatal() {
        let intent = IntentAuthenticate::new(AuthenticateKind::Login);
        let graph = AuthGraph::new(intent.clone().into());
        let node: AuthNode = NodeForgotPasswordBegin::default().into();
        let _ = intent.derive_edges_for_node(&graph, &node);
    }

    fn anonymous_identity() -> IdentityInfo {
        IdentityInfo {
            id: "i-anon".into(),
            user_id: "u1".into(),
            created_at: Utc::now(),
            kind: IdentityKind::Anonymous { key_id: "k1".into() },
        }
    }

    #[test]
    fn test_promote_sends_anonymous_identity_through_verification() {
        let intent = IntentAuthenticate::new(AuthenticateKind::Promote);
        let graph = AuthGraph::new(intent.clone().into());
        let node: AuthNode = NodeSelectIdentityEnd {
            identity_spec: IdentitySpec::Anonymous { key_id: "k1".into() },
            identity_info: Some(anonymous_identity()),
        }
        .into();
        let edges = intent.derive_edges_for_node(&graph, &node).unwrap();
        match edges.as_slice() {
            [AuthEdge::EnsureVerificationBegin(edge)] => {
                assert_eq!(edge.identity.id, "i-anon");
                assert!(!edge.requested_by_user);
            }
            other => panic!("unexpected edges: {other:?}"),
        }
    }

    #[test]
    fn test_removing_anonymous_identity_validates_user() {
        let intent = IntentAuthenticate::new(AuthenticateKind::Promote);
        let graph = AuthGraph::new(intent.clone().into());
        let node: AuthNode = NodeDoRemoveIdentity {
            identity: anonymous_identity(),
        }
        .into();
        assert_eq!(
            kinds(intent.derive_edges_for_node(&graph, &node)).unwrap(),
            vec!["validate_user"]
        );
    }

    #[test]
    #[should_panic(expected = "unexpected node do_remove_identity in authenticate flow")]
    fn test_removing_login_id_during_authenticate_is_fatal() {
        let intent = IntentAuthenticate::new(AuthenticateKind::Promote);
        let graph = AuthGraph::new(intent.clone().into());
        let node: AuthNode = NodeDoRemoveIdentity {
            identity: email_identity(),
        }
        .into();
        let _ = intent.derive_edges_for_node(&graph, &node);
    }

    #[test]
    fn test_suppressed_session_is_noop() {
        let mut intent = IntentAuthenticate::new(AuthenticateKind::Login);
        intent.suppress_idp_session_cookie = true;
        let graph = AuthGraph::new(intent.clone().into());
        let edges = intent.ensure_session(&graph).unwrap();
        match edges.as_slice() {
            [AuthEdge::DoEnsureSession(edge)] => {
                assert_eq!(edge.mode, EnsureSessionMode::Noop);
                assert_eq!(edge.create_reason, CreateReason::Login);
            }
            other => panic!("unexpected edges: {other:?}"),
        }
    }
}
