use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::authn::{IdentityInfo, VerifiableClaim};
use crate::error::Result;
use crate::traits::EventService;
use crate::types::CreateReason;

/// Domain events raised by committed flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    UserCreated {
        user_id: String,
        identities: Vec<IdentityInfo>,
        authenticator_ids: Vec<String>,
    },
    UserAuthenticated {
        user_id: String,
        session_id: String,
        amr: Vec<String>,
        reason: CreateReason,
    },
    IdentityCreated {
        user_id: String,
        identity: IdentityInfo,
    },
    IdentityDeleted {
        user_id: String,
        identity: IdentityInfo,
    },
    IdentityVerified {
        user_id: String,
        claim: VerifiableClaim,
    },
}

impl EventPayload {
    /// Dotted event name used by webhook consumers.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::UserCreated { .. } => "user.created",
            Self::UserAuthenticated { .. } => "user.authenticated",
            Self::IdentityCreated { .. } => "identity.created",
            Self::IdentityDeleted { .. } => "identity.deleted",
            Self::IdentityVerified { .. } => "identity.verified",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::UserCreated { user_id, .. }
            | Self::UserAuthenticated { user_id, .. }
            | Self::IdentityCreated { user_id, .. }
            | Self::IdentityDeleted { user_id, .. }
            | Self::IdentityVerified { user_id, .. } => user_id,
        }
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<EventPayload>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: EventPayload) {
        tracing::debug!(event = event.event_type(), user_id = event.user_id(), "event published");
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EventPayload> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventService for EventBus {
    fn dispatch(&self, payload: EventPayload) -> BoxFuture<'_, Result<()>> {
        self.publish(payload);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_reaches_subscribers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.dispatch(EventPayload::IdentityVerified {
            user_id: "u1".into(),
            claim: VerifiableClaim {
                name: "email".into(),
                value: "a@example.com".into(),
            },
        })
        .await
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "identity.verified");
        assert_eq!(event.user_id(), "u1");
    }

    #[tokio::test]
    async fn test_dispatch_without_subscribers() {
        let bus = EventBus::default();
        let payload = EventPayload::UserAuthenticated {
            user_id: "u1".into(),
            session_id: "s1".into(),
            amr: vec!["pwd".into()],
            reason: CreateReason::Login,
        };
        assert!(bus.dispatch(payload).await.is_ok());
    }

    #[test]
    fn test_payload_serde_tag() {
        let payload = EventPayload::UserAuthenticated {
            user_id: "u1".into(),
            session_id: "s1".into(),
            amr: vec![],
            reason: CreateReason::Signup,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "user_authenticated");
        assert_eq!(value["reason"], "signup");
    }
}
