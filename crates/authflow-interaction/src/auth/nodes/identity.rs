use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::debug;

use authflow_core::authn::{IdentityInfo, IdentitySpec, IdentityType};
use authflow_core::config::{IdentityConfig, PromotionConflictBehavior};
use authflow_core::error::{AuthflowError, Result};
use authflow_core::event::EventPayload;
use authflow_core::new_id;

use super::{require, require_input, require_spec};
use crate::auth::{edges, AuthEdge, AuthEffect, AuthGraph, AuthNode, AuthStep, AuthTransition, DynAuthInput};
use crate::engine::{Context, Prepared};

/// Look up the identity matching what the user presented.
async fn select_identity(ctx: &Context, spec: IdentitySpec) -> Result<AuthNode> {
    let existing = ctx.services.identities.get_by_spec(&spec).await?;
    debug!(identity_type = ?spec.identity_type(), found = existing.is_some(), "Identity selected");
    Ok(NodeSelectIdentityEnd {
        identity_spec: spec,
        identity_info: existing,
    }
    .into())
}

/// Build a new identity for the user of the path.
async fn create_identity_end(ctx: &Context, graph: &AuthGraph, spec: IdentitySpec) -> Result<AuthNode> {
    let user_id = graph.user_id()?;
    let identity = ctx.services.identities.new_identity(&user_id, &spec).await?;
    Ok(NodeCreateIdentityEnd {
        identity_spec: spec,
        identity_info: identity,
    }
    .into())
}

/// Root of the authenticate intent: offers the enabled identity types.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NodeSelectIdentityBegin {
    #[serde(skip)]
    config: Prepared<IdentityConfig>,
}

impl AuthStep for NodeSelectIdentityBegin {
    fn prepare<'a>(&'a self, ctx: &'a Context, _graph: &'a AuthGraph) -> BoxFuture<'a, Result<()>> {
        self.config.set(ctx.config.identity.clone());
        Box::pin(async { Ok(()) })
    }

    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        let config = self.config.get("select_identity_begin")?;
        let mut edges: Vec<AuthEdge> = vec![];
        if config.login_id_enabled {
            edges.push(EdgeSelectIdentityLoginId.into());
        }
        if !config.oauth_providers.is_empty() {
            edges.push(
                EdgeSelectIdentityOAuthProvider {
                    provider_aliases: config.oauth_providers.clone(),
                }
                .into(),
            );
        }
        if config.anonymous_enabled {
            edges.push(EdgeSelectIdentityAnonymous.into());
        }
        if config.biometric_enabled {
            edges.push(EdgeSelectIdentityBiometric.into());
        }
        Ok(Some(edges))
    }
}

#[derive(Debug)]
pub struct EdgeSelectIdentityLoginId;

impl AuthTransition for EdgeSelectIdentityLoginId {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let spec = require_spec(input, IdentityType::LoginId)?;
            select_identity(ctx, spec).await
        })
    }
}

#[derive(Debug)]
pub struct EdgeSelectIdentityAnonymous;

impl AuthTransition for EdgeSelectIdentityAnonymous {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let spec = require_spec(input, IdentityType::Anonymous)?;
            select_identity(ctx, spec).await
        })
    }
}

#[derive(Debug)]
pub struct EdgeSelectIdentityBiometric;

impl AuthTransition for EdgeSelectIdentityBiometric {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let spec = require_spec(input, IdentityType::Biometric)?;
            select_identity(ctx, spec).await
        })
    }
}

/// Starts the OAuth redirect for one of the configured providers.
#[derive(Debug)]
pub struct EdgeSelectIdentityOAuthProvider {
    pub provider_aliases: Vec<String>,
}

impl AuthTransition for EdgeSelectIdentityOAuthProvider {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let alias = require(require_input(input)?.oauth_provider_alias())?;
            if !self.provider_aliases.iter().any(|a| a == alias) {
                return Err(AuthflowError::IncompatibleInput);
            }

            let state = new_id();
            let authorization_url = ctx.services.oauth.authorization_url(alias, &state).await?;
            Ok(NodeUseIdentityOAuthProvider {
                provider_alias: alias.to_string(),
                state,
                authorization_url,
            }
            .into())
        })
    }
}

/// Waiting for the OAuth callback.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeUseIdentityOAuthProvider {
    pub provider_alias: String,
    pub state: String,
    pub authorization_url: String,
}

impl AuthStep for NodeUseIdentityOAuthProvider {
    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        edges([EdgeSelectIdentityOAuthUserInfo {
            provider_alias: self.provider_alias.clone(),
            state: self.state.clone(),
        }])
    }
}

#[derive(Debug)]
pub struct EdgeSelectIdentityOAuthUserInfo {
    pub provider_alias: String,
    pub state: String,
}

impl AuthTransition for EdgeSelectIdentityOAuthUserInfo {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let input = require_input(input)?;
            let code = require(input.oauth_code())?;
            let state = require(input.oauth_state())?;
            if state != self.state {
                return Err(AuthflowError::OAuth("state mismatch".to_string()));
            }

            let profile = ctx
                .services
                .oauth
                .user_profile(&self.provider_alias, code)
                .await?;
            let spec = IdentitySpec::OAuth {
                provider_alias: self.provider_alias.clone(),
                subject: profile.subject,
                email: profile.email,
            };
            select_identity(ctx, spec).await
        })
    }
}

/// The identity the user presented, and the matching stored identity if any.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeSelectIdentityEnd {
    pub identity_spec: IdentitySpec,
    #[serde(default)]
    pub identity_info: Option<IdentityInfo>,
}

impl AuthStep for NodeSelectIdentityEnd {}

#[derive(Debug)]
pub struct EdgeDoCreateUser;

impl AuthTransition for EdgeDoCreateUser {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            Ok(NodeDoCreateUser {
                create_user_id: new_id(),
            }
            .into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDoCreateUser {
    pub create_user_id: String,
}

impl AuthStep for NodeDoCreateUser {
    fn effects(&self) -> Vec<AuthEffect> {
        vec![
            AuthEffect::CreateUser {
                user_id: self.create_user_id.clone(),
            },
            AuthEffect::AfterCreateUser {
                user_id: self.create_user_id.clone(),
            },
        ]
    }

    fn user_id(&self) -> Option<&str> {
        Some(&self.create_user_id)
    }

    fn new_user_id(&self) -> Option<&str> {
        Some(&self.create_user_id)
    }
}

#[derive(Debug)]
pub struct EdgeCreateIdentityBegin;

impl AuthTransition for EdgeCreateIdentityBegin {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move { Ok(NodeCreateIdentityBegin {}.into()) })
    }
}

/// Asks the user for a new identity to attach (promotion of an anonymous user).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NodeCreateIdentityBegin {}

impl AuthStep for NodeCreateIdentityBegin {
    fn derive_edges(&self, _graph: &AuthGraph) -> Result<Option<Vec<AuthEdge>>> {
        edges([EdgeCreateIdentityLoginId])
    }
}

#[derive(Debug)]
pub struct EdgeCreateIdentityLoginId;

impl AuthTransition for EdgeCreateIdentityLoginId {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let spec = require_spec(input, IdentityType::LoginId)?;
            create_identity_end(ctx, graph, spec).await
        })
    }
}

/// Builds the identity selected earlier for a freshly created user.
#[derive(Debug)]
pub struct EdgeCreateIdentityEnd {
    pub identity_spec: IdentitySpec,
}

impl AuthTransition for EdgeCreateIdentityEnd {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move { create_identity_end(ctx, graph, self.identity_spec.clone()).await })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeCreateIdentityEnd {
    pub identity_spec: IdentitySpec,
    pub identity_info: IdentityInfo,
}

impl AuthStep for NodeCreateIdentityEnd {}

#[derive(Debug)]
pub struct EdgeCheckIdentityConflict {
    pub new_identity: IdentityInfo,
}

impl AuthTransition for EdgeCheckIdentityConflict {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let duplicated = ctx
                .services
                .identities
                .check_duplicated(&self.new_identity)
                .await?;
            Ok(NodeCheckIdentityConflict {
                new_identity: self.new_identity.clone(),
                duplicated_identity: duplicated,
                promotion_conflict: ctx.config.identity.on_conflict.promotion,
            }
            .into())
        })
    }
}

/// Result of the duplicate check. The promotion behaviour is captured here so
/// a config change mid-flow does not alter the route.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeCheckIdentityConflict {
    pub new_identity: IdentityInfo,
    #[serde(default)]
    pub duplicated_identity: Option<IdentityInfo>,
    #[serde(default)]
    pub promotion_conflict: PromotionConflictBehavior,
}

impl AuthStep for NodeCheckIdentityConflict {}

#[derive(Debug)]
pub struct EdgeDoCreateIdentity {
    pub identity: IdentityInfo,
}

impl AuthTransition for EdgeDoCreateIdentity {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            Ok(NodeDoCreateIdentity {
                identity: self.identity.clone(),
                is_addition: graph.new_user_id().is_none(),
            }
            .into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDoCreateIdentity {
    pub identity: IdentityInfo,
    /// The identity is added to an existing user rather than created with one.
    #[serde(default)]
    pub is_addition: bool,
}

impl AuthStep for NodeDoCreateIdentity {
    fn effects(&self) -> Vec<AuthEffect> {
        let mut effects = vec![AuthEffect::CreateIdentity {
            identity: self.identity.clone(),
        }];
        if self.is_addition {
            effects.push(AuthEffect::Dispatch(EventPayload::IdentityCreated {
                user_id: self.identity.user_id.clone(),
                identity: self.identity.clone(),
            }));
        }
        effects
    }

    fn user_identity(&self) -> Option<&IdentityInfo> {
        Some(&self.identity)
    }

    fn user_new_identity(&self) -> Option<&IdentityInfo> {
        Some(&self.identity)
    }
}

#[derive(Debug)]
pub struct EdgeDoUseIdentity {
    pub identity: IdentityInfo,
    pub user_id_hint: Option<String>,
}

impl AuthTransition for EdgeDoUseIdentity {
    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            if let Some(hint) = &self.user_id_hint {
                if *hint != self.identity.user_id {
                    return Err(AuthflowError::InvariantViolated(
                        "identity does not belong to the expected user".to_string(),
                    ));
                }
            }
            Ok(NodeDoUseIdentity {
                identity: self.identity.clone(),
            }
            .into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDoUseIdentity {
    pub identity: IdentityInfo,
}

impl AuthStep for NodeDoUseIdentity {
    fn user_id(&self) -> Option<&str> {
        Some(&self.identity.user_id)
    }

    fn user_identity(&self) -> Option<&IdentityInfo> {
        Some(&self.identity)
    }
}

/// Picks one of the user's identities for removal.
#[derive(Debug)]
pub struct EdgeRemoveIdentity;

impl AuthTransition for EdgeRemoveIdentity {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a AuthGraph,
        input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let identity_id = require(require_input(input)?.remove_identity_id())?;
            let user_id = graph.user_id()?;
            let identity = ctx.services.identities.get(identity_id).await?;
            if identity.user_id != user_id {
                return Err(AuthflowError::IdentityNotFound(identity_id.to_string()));
            }
            Ok(NodeRemoveIdentity { identity }.into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeRemoveIdentity {
    pub identity: IdentityInfo,
}

impl AuthStep for NodeRemoveIdentity {}

#[derive(Debug)]
pub struct EdgeDoRemoveIdentity {
    pub identity: IdentityInfo,
}

impl AuthTransition for EdgeDoRemoveIdentity {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            // A promoted anonymous identity goes away even though it may be the only one
            if self.identity.identity_type() != IdentityType::Anonymous {
                let identities = ctx
                    .services
                    .identities
                    .list_by_user(&self.identity.user_id)
                    .await?;
                if identities.len() <= 1 {
                    return Err(AuthflowError::CannotRemoveLastIdentity);
                }
            }
            Ok(NodeDoRemoveIdentity {
                identity: self.identity.clone(),
            }
            .into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDoRemoveIdentity {
    pub identity: IdentityInfo,
}

impl AuthStep for NodeDoRemoveIdentity {
    fn effects(&self) -> Vec<AuthEffect> {
        vec![
            AuthEffect::RemoveIdentity {
                identity: self.identity.clone(),
            },
            AuthEffect::Dispatch(EventPayload::IdentityDeleted {
                user_id: self.identity.user_id.clone(),
                identity: self.identity.clone(),
            }),
        ]
    }
}

/// Root of intents acting on a signed-in user.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeDoUseUser {
    pub use_user_id: String,
}

impl AuthStep for NodeDoUseUser {
    fn user_id(&self) -> Option<&str> {
        Some(&self.use_user_id)
    }
}

#[derive(Debug)]
pub struct EdgeValidateUser;

impl AuthTransition for EdgeValidateUser {
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a AuthGraph,
        _input: Option<&'a DynAuthInput>,
    ) -> BoxFuture<'a, Result<AuthNode>> {
        Box::pin(async move {
            let user = ctx.services.users.get(&graph.user_id()?).await?;
            if user.is_disabled {
                return Err(AuthflowError::UserDisabled);
            }
            Ok(NodeValidateUser {}.into())
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NodeValidateUser {}

impl AuthStep for NodeValidateUser {}
