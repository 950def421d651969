//! Authentication flows built on the interaction graph engine.
//!
//! Node and edge types live in [`nodes`], grouped by concern. They are closed
//! into the [`AuthNode`] and [`AuthEdge`] enums, whose variants map one to one
//! onto the persisted kind names. Nodes that do not decide their own edges are
//! routed by the [`AuthIntent`] that owns the graph.

pub mod effects;
pub mod facts;
pub mod input;
pub mod intents;
pub mod nodes;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use authflow_core::authn::{AuthenticationStage, AuthenticatorInfo, AuthenticatorType, IdentityInfo};
use authflow_core::error::Result;
use authflow_core::types::Cookie;

use crate::engine::{
    sort_authenticators, Context, Edge, Flow, Graph, GraphCodec, Intent, KindRegistry, Node,
    Service, Sortable,
};

pub use effects::AuthEffect;
pub use input::{AuthInput, FormInput};
pub use intents::*;
pub use nodes::*;

/// The authentication flow family.
#[derive(Debug)]
pub struct AuthFlow;

/// Input as seen by edges.
pub type DynAuthInput = dyn AuthInput;

impl Flow for AuthFlow {
    type Intent = AuthIntent;
    type Node = AuthNode;
    type Edge = AuthEdge;
    type Effect = AuthEffect;
    type Input = DynAuthInput;
}

pub type AuthGraph = Graph<AuthFlow>;
pub type AuthService = Service<AuthFlow>;

/// Behaviour shared by every authentication node.
///
/// The fact accessors (`user_id`, `user_identity`, ...) are how later nodes
/// learn what earlier ones established; see [`facts`].
pub trait AuthStep: Send + Sync {
    fn prepare<'a>(&'a self, _ctx: &'a Context, _graph: &'a AuthGraph) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn effects(&self) -> Vec<AuthEffect> {
        vec![]
    }

    /// Edges decided by the node itself. `None` defers to the intent.
    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        Ok(None)
    }

    fn user_id(&self) -> Option<&str> {
        None
    }

    fn new_user_id(&self) -> Option<&str> {
        None
    }

    fn user_identity(&self) -> Option<&IdentityInfo> {
        None
    }

    fn user_new_identity(&self) -> Option<&IdentityInfo> {
        None
    }

    fn user_authenticator(&self, _stage: AuthenticationStage) -> Option<&AuthenticatorInfo> {
        None
    }

    fn user_new_authenticators(&self) -> &[AuthenticatorInfo] {
        &[]
    }

    fn cookies(&self) -> Vec<Cookie> {
        vec![]
    }
}

/// Behaviour shared by every authentication edge.
pub trait AuthTransition: Send + Sync {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>>;
}

/// Routing and root creation for one intent.
pub trait AuthRoute: Send + Sync {
    fn instantiate_root_node<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a AuthGraph,
    ) -> BoxFuture<'a, Result<AuthNode>>;

    fn derive_edges_for_node(&self, graph: &AuthGraph, node: &AuthNode) -> Result<Vec<AuthEdge>>;
}

macro_rules! auth_nodes {
    ($($variant:ident($ty:ty) => $kind:literal,)+) => {
        /// Every authentication node.
        #[derive(Debug)]
        pub enum AuthNode {
            $($variant($ty),)+
        }

        $(
            impl From<$ty> for AuthNode {
                fn from(node: $ty) -> Self {
                    AuthNode::$variant(node)
                }
            }
        )+

        impl AuthNode {
            pub fn step(&self) -> &dyn AuthStep {
                match self {
                    $(AuthNode::$variant(node) => node,)+
                }
            }

            pub fn registry() -> KindRegistry<AuthNode> {
                KindRegistry::builder("node")
                    $(.register($kind, |data| serde_json::from_value::<$ty>(data).map(AuthNode::$variant)))+
                    .build()
            }
        }

        impl Node<AuthFlow> for AuthNode {
            fn kind(&self) -> &'static str {
                match self {
                    $(AuthNode::$variant(_) => $kind,)+
                }
            }

            fn to_data(&self) -> serde_json::Result<Value> {
                match self {
                    $(AuthNode::$variant(node) => serde_json::to_value(node),)+
                }
            }

            fn prepare<'a>(&'a self, ctx: &'a Context, graph: &'a AuthGraph) -> BoxFuture<'a, Result<()>> {
                self.step().prepare(ctx, graph)
            }

            fn effects(&self) -> Result<Vec<AuthEffect>> {
                Ok(self.step().effects())
            }

            fn derive_edges(&self, graph: &AuthGraph) -> Result<Vec<AuthEdge>> {
                match self.step().derive_edges(graph)? {
                    Some(edges) => Ok(edges),
                    None => graph.intent.derive_edges_for_node(graph, self),
                }
            }
        }
    };
}

macro_rules! auth_edges {
    ($($variant:ident($ty:ty) => $kind:literal,)+) => {
        /// Every authentication edge.
        #[derive(Debug)]
        pub enum AuthEdge {
            $($variant($ty),)+
        }

        $(
            impl From<$ty> for AuthEdge {
                fn from(edge: $ty) -> Self {
                    AuthEdge::$variant(edge)
                }
            }
        )+

        impl AuthEdge {
            pub fn transition(&self) -> &dyn AuthTransition {
                match self {
                    $(AuthEdge::$variant(edge) => edge,)+
                }
            }
        }

        impl Edge<AuthFlow> for AuthEdge {
            fn kind(&self) -> &'static str {
                match self {
                    $(AuthEdge::$variant(_) => $kind,)+
                }
            }

            fn instantiate<'a>(
                &'a self,
                ctx: &'a Context,
                graph: &'a AuthGraph,
                input: Option<&'a DynAuthInput>,
            ) -> BoxFuture<'a, Result<AuthNode>> {
                self.transition().instantiate(ctx, graph, input)
            }
        }
    };
}

macro_rules! auth_intents {
    ($($variant:ident($ty:ty) => $kind:literal,)+) => {
        /// Every authentication intent.
        #[derive(Debug, Clone)]
        pub enum AuthIntent {
            $($variant($ty),)+
        }

        $(
            impl From<$ty> for AuthIntent {
                fn from(intent: $ty) -> Self {
                    AuthIntent::$variant(intent)
                }
            }
        )+

        impl AuthIntent {
            pub fn route(&self) -> &dyn AuthRoute {
                match self {
                    $(AuthIntent::$variant(intent) => intent,)+
                }
            }

            pub fn registry() -> KindRegistry<AuthIntent> {
                KindRegistry::builder("intent")
                    $(.register($kind, |data| serde_json::from_value::<$ty>(data).map(AuthIntent::$variant)))+
                    .build()
            }
        }

        impl Intent<AuthFlow> for AuthIntent {
            fn kind(&self) -> &'static str {
                match self {
                    $(AuthIntent::$variant(_) => $kind,)+
                }
            }

            fn to_data(&self) -> serde_json::Result<Value> {
                match self {
                    $(AuthIntent::$variant(intent) => serde_json::to_value(intent),)+
                }
            }

            fn instantiate_root_node<'a>(
                &'a self,
                ctx: &'a Context,
                graph: &'a AuthGraph,
            ) -> BoxFuture<'a, Result<AuthNode>> {
                self.route().instantiate_root_node(ctx, graph)
            }

            fn derive_edges_for_node(&self, graph: &AuthGraph, node: &AuthNode) -> Result<Vec<AuthEdge>> {
                self.route().derive_edges_for_node(graph, node)
            }
        }
    };
}

auth_nodes! {
    SelectIdentityBegin(NodeSelectIdentityBegin) => "select_identity_begin",
    UseIdentityOAuthProvider(NodeUseIdentityOAuthProvider) => "use_identity_oauth_provider",
    SelectIdentityEnd(NodeSelectIdentityEnd) => "select_identity_end",
    DoCreateUser(NodeDoCreateUser) => "do_create_user",
    CreateIdentityBegin(NodeCreateIdentityBegin) => "create_identity_begin",
    CreateIdentityEnd(NodeCreateIdentityEnd) => "create_identity_end",
    CheckIdentityConflict(NodeCheckIdentityConflict) => "check_identity_conflict",
    DoCreateIdentity(NodeDoCreateIdentity) => "do_create_identity",
    DoUseIdentity(NodeDoUseIdentity) => "do_use_identity",
    RemoveIdentity(NodeRemoveIdentity) => "remove_identity",
    DoRemoveIdentity(NodeDoRemoveIdentity) => "do_remove_identity",
    DoUseUser(NodeDoUseUser) => "do_use_user",
    ValidateUser(NodeValidateUser) => "validate_user",
    EnsureVerificationBegin(NodeEnsureVerificationBegin) => "ensure_verification_begin",
    VerifyIdentity(NodeVerifyIdentity) => "verify_identity",
    EnsureVerificationEnd(NodeEnsureVerificationEnd) => "ensure_verification_end",
    DoVerifyIdentity(NodeDoVerifyIdentity) => "do_verify_identity",
    AuthenticationBegin(NodeAuthenticationBegin) => "authentication_begin",
    AuthenticationOobTrigger(NodeAuthenticationOobTrigger) => "authentication_oob_trigger",
    ConsumeRecoveryCode(NodeConsumeRecoveryCode) => "consume_recovery_code",
    UseDeviceToken(NodeUseDeviceToken) => "use_device_token",
    AuthenticationEnd(NodeAuthenticationEnd) => "authentication_end",
    DoUseAuthenticator(NodeDoUseAuthenticator) => "do_use_authenticator",
    CreateAuthenticatorBegin(NodeCreateAuthenticatorBegin) => "create_authenticator_begin",
    CreateAuthenticatorTotpSetup(NodeCreateAuthenticatorTotpSetup) => "create_authenticator_totp_setup",
    CreateAuthenticatorOobSetup(NodeCreateAuthenticatorOobSetup) => "create_authenticator_oob_setup",
    CreateAuthenticatorEnd(NodeCreateAuthenticatorEnd) => "create_authenticator_end",
    DoCreateAuthenticator(NodeDoCreateAuthenticator) => "do_create_authenticator",
    RemoveAuthenticator(NodeRemoveAuthenticator) => "remove_authenticator",
    DoRemoveAuthenticator(NodeDoRemoveAuthenticator) => "do_remove_authenticator",
    GenerateRecoveryCodeBegin(NodeGenerateRecoveryCodeBegin) => "generate_recovery_code_begin",
    GenerateRecoveryCodeEnd(NodeGenerateRecoveryCodeEnd) => "generate_recovery_code_end",
    DoGenerateRecoveryCode(NodeDoGenerateRecoveryCode) => "do_generate_recovery_code",
    DoEnsureSession(NodeDoEnsureSession) => "do_ensure_session",
    ChangePasswordBegin(NodeChangePasswordBegin) => "change_password_begin",
    ChangePasswordEnd(NodeChangePasswordEnd) => "change_password_end",
    DoUpdateAuthenticator(NodeDoUpdateAuthenticator) => "do_update_authenticator",
    ForgotPasswordBegin(NodeForgotPasswordBegin) => "forgot_password_begin",
    ForgotPasswordEnd(NodeForgotPasswordEnd) => "forgot_password_end",
    ResetPasswordBegin(NodeResetPasswordBegin) => "reset_password_begin",
    ResetPasswordEnd(NodeResetPasswordEnd) => "reset_password_end",
}

auth_edges! {
    SelectIdentityLoginId(EdgeSelectIdentityLoginId) => "select_identity_login_id",
    SelectIdentityOAuthProvider(EdgeSelectIdentityOAuthProvider) => "select_identity_oauth_provider",
    SelectIdentityOAuthUserInfo(EdgeSelectIdentityOAuthUserInfo) => "select_identity_oauth_user_info",
    SelectIdentityAnonymous(EdgeSelectIdentityAnonymous) => "select_identity_anonymous",
    SelectIdentityBiometric(EdgeSelectIdentityBiometric) => "select_identity_biometric",
    DoCreateUser(EdgeDoCreateUser) => "do_create_user",
    CreateIdentityBegin(EdgeCreateIdentityBegin) => "create_identity_begin",
    CreateIdentityLoginId(EdgeCreateIdentityLoginId) => "create_identity_login_id",
    CreateIdentityEnd(EdgeCreateIdentityEnd) => "create_identity_end",
    CheckIdentityConflict(EdgeCheckIdentityConflict) => "check_identity_conflict",
    DoCreateIdentity(EdgeDoCreateIdentity) => "do_create_identity",
    DoUseIdentity(EdgeDoUseIdentity) => "do_use_identity",
    RemoveIdentity(EdgeRemoveIdentity) => "remove_identity",
    DoRemoveIdentity(EdgeDoRemoveIdentity) => "do_remove_identity",
    ValidateUser(EdgeValidateUser) => "validate_user",
    EnsureVerificationBegin(EdgeEnsureVerificationBegin) => "ensure_verification_begin",
    VerifyIdentity(EdgeVerifyIdentity) => "verify_identity",
    VerifyIdentityResend(EdgeVerifyIdentityResend) => "verify_identity_resend",
    VerifyIdentityCheckCode(EdgeVerifyIdentityCheckCode) => "verify_identity_check_code",
    EnsureVerificationEnd(EdgeEnsureVerificationEnd) => "ensure_verification_end",
    DoVerifyIdentity(EdgeDoVerifyIdentity) => "do_verify_identity",
    AuthenticationBegin(EdgeAuthenticationBegin) => "authentication_begin",
    AuthenticationPassword(EdgeAuthenticationPassword) => "authentication_password",
    AuthenticationTotp(EdgeAuthenticationTotp) => "authentication_totp",
    AuthenticationOobTrigger(EdgeAuthenticationOobTrigger) => "authentication_oob_trigger",
    AuthenticationOobResend(EdgeAuthenticationOobResend) => "authentication_oob_resend",
    AuthenticationOob(EdgeAuthenticationOob) => "authentication_oob",
    ConsumeRecoveryCode(EdgeConsumeRecoveryCode) => "consume_recovery_code",
    UseDeviceToken(EdgeUseDeviceToken) => "use_device_token",
    AuthenticationEnd(EdgeAuthenticationEnd) => "authentication_end",
    DoUseAuthenticator(EdgeDoUseAuthenticator) => "do_use_authenticator",
    CreateAuthenticatorBegin(EdgeCreateAuthenticatorBegin) => "create_authenticator_begin",
    CreateAuthenticatorPassword(EdgeCreateAuthenticatorPassword) => "create_authenticator_password",
    CreateAuthenticatorTotpSetup(EdgeCreateAuthenticatorTotpSetup) => "create_authenticator_totp_setup",
    CreateAuthenticatorTotp(EdgeCreateAuthenticatorTotp) => "create_authenticator_totp",
    CreateAuthenticatorOobSetup(EdgeCreateAuthenticatorOobSetup) => "create_authenticator_oob_setup",
    CreateAuthenticatorOobResend(EdgeCreateAuthenticatorOobResend) => "create_authenticator_oob_resend",
    CreateAuthenticatorOob(EdgeCreateAuthenticatorOob) => "create_authenticator_oob",
    CreateAuthenticatorEnd(EdgeCreateAuthenticatorEnd) => "create_authenticator_end",
    DoCreateAuthenticator(EdgeDoCreateAuthenticator) => "do_create_authenticator",
    RemoveAuthenticator(EdgeRemoveAuthenticator) => "remove_authenticator",
    DoRemoveAuthenticator(EdgeDoRemoveAuthenticator) => "do_remove_authenticator",
    GenerateRecoveryCode(EdgeGenerateRecoveryCode) => "generate_recovery_code",
    ViewRecoveryCode(EdgeViewRecoveryCode) => "view_recovery_code",
    DoGenerateRecoveryCode(EdgeDoGenerateRecoveryCode) => "do_generate_recovery_code",
    DoEnsureSession(EdgeDoEnsureSession) => "do_ensure_session",
    ChangePasswordBegin(EdgeChangePasswordBegin) => "change_password_begin",
    ChangePassword(EdgeChangePassword) => "change_password",
    DoUpdateAuthenticator(EdgeDoUpdateAuthenticator) => "do_update_authenticator",
    ForgotPasswordSendCode(EdgeForgotPasswordSendCode) => "forgot_password_send_code",
    ResetPassword(EdgeResetPassword) => "reset_password",
}

auth_intents! {
    Authenticate(IntentAuthenticate) => "authenticate",
    Reauthenticate(IntentReauthenticate) => "reauthenticate",
    ChangePassword(IntentChangePassword) => "change_password",
    AddAuthenticator(IntentAddAuthenticator) => "add_authenticator",
    RemoveAuthenticator(IntentRemoveAuthenticator) => "remove_authenticator",
    RemoveIdentity(IntentRemoveIdentity) => "remove_identity",
    VerifyIdentity(IntentVerifyIdentity) => "verify_identity",
    ForgotPassword(IntentForgotPassword) => "forgot_password",
    ResetPassword(IntentResetPassword) => "reset_password",
}

/// Codec over every registered authentication intent and node.
pub fn codec() -> GraphCodec<AuthFlow> {
    GraphCodec::new(AuthIntent::registry(), AuthNode::registry())
}

/// Shared codec, as the graph store expects it.
pub fn shared_codec() -> Arc<GraphCodec<AuthFlow>> {
    Arc::new(codec())
}

/// Shorthand for node-decided edge lists.
pub(crate) fn edges<E: Into<AuthEdge>>(edges: impl IntoIterator<Item = E>) -> Result<Option<Vec<AuthEdge>>> {
    Ok(Some(edges.into_iter().map(Into::into).collect()))
}

/// Order authenticator edges by `preferred`, defaults first.
pub(crate) fn sorted_edges(
    preferred: &[AuthenticatorType],
    mut candidates: Vec<(Sortable, AuthEdge)>,
) -> Vec<AuthEdge> {
    sort_authenticators(preferred, &mut candidates, |(sortable, _)| *sortable);
    candidates.into_iter().map(|(_, edge)| edge).collect()
}

/// Sort data for an edge standing for `authenticators`: an edge is default
/// when its first (already sorted) authenticator is.
pub(crate) fn sortable_of(typ: AuthenticatorType, authenticators: &[AuthenticatorInfo]) -> Sortable {
    Sortable {
        authenticator_type: typ,
        is_default: authenticators.first().is_some_and(|a| a.is_default),
    }
}
