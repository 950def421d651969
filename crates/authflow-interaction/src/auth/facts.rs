//! Queries over what the nodes of a path have established.
//!
//! Unless noted otherwise a query returns the answer of the newest node that
//! has one.

use authflow_core::authn::{
    AuthenticationStage, AuthenticatorInfo, IdentityInfo, ACR_MFA, amr as amr_values,
};
use authflow_core::error::{AuthflowError, Result};
use authflow_core::types::Cookie;

use super::{AuthGraph, AuthNode, NodeSelectIdentityEnd};

impl AuthGraph {
    /// The user this path acts on. Fails when no node has established one yet.
    pub fn user_id(&self) -> Result<String> {
        self.nodes_rev()
            .find_map(|node| node.step().user_id().map(str::to_string))
            .ok_or_else(|| AuthflowError::InvariantViolated("no user in graph".to_string()))
    }

    /// The id of a user created by this path.
    pub fn new_user_id(&self) -> Option<String> {
        self.nodes_rev()
            .find_map(|node| node.step().new_user_id().map(str::to_string))
    }

    pub fn user_last_identity(&self) -> Option<IdentityInfo> {
        self.nodes_rev()
            .find_map(|node| node.step().user_identity().cloned())
    }

    /// Identities created by this path, oldest first.
    pub fn user_new_identities(&self) -> Vec<IdentityInfo> {
        self.nodes()
            .iter()
            .filter_map(|annotated| annotated.node.step().user_new_identity().cloned())
            .collect()
    }

    pub fn user_authenticator(&self, stage: AuthenticationStage) -> Option<AuthenticatorInfo> {
        self.nodes_rev()
            .find_map(|node| node.step().user_authenticator(stage).cloned())
    }

    /// Authenticators created by this path, oldest first.
    pub fn user_new_authenticators(&self) -> Vec<AuthenticatorInfo> {
        self.nodes()
            .iter()
            .flat_map(|annotated| annotated.node.step().user_new_authenticators().to_vec())
            .collect()
    }

    /// Authentication Method References of the path, deduplicated and sorted.
    pub fn amr(&self) -> Vec<String> {
        let mut amr: Vec<&'static str> = vec![];

        if let Some(identity) = self.user_last_identity() {
            amr.extend(identity.amr());
        }
        if let Some(primary) = self.user_authenticator(AuthenticationStage::Primary) {
            amr.extend(primary.amr());
        }
        if let Some(secondary) = self.user_authenticator(AuthenticationStage::Secondary) {
            amr.push(amr_values::MFA);
            amr.extend(secondary.amr());
        }

        amr.sort_unstable();
        amr.dedup();
        amr.into_iter().map(str::to_string).collect()
    }

    /// `Some("mfa")` when a second factor was used.
    pub fn acr(&self) -> Option<&'static str> {
        self.user_authenticator(AuthenticationStage::Secondary)
            .map(|_| ACR_MFA)
    }

    /// Cookies the caller should set, in path order.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.nodes()
            .iter()
            .flat_map(|annotated| annotated.node.step().cookies())
            .collect()
    }

    pub(crate) fn select_identity_end(&self) -> Option<&NodeSelectIdentityEnd> {
        self.nodes_rev().find_map(|node| match node {
            AuthNode::SelectIdentityEnd(node) => Some(node),
            _ => None,
        })
    }
}
