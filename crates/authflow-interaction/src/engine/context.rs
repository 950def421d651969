use std::sync::{Arc, Mutex};

use authflow_core::config::AppConfig;
use authflow_core::event::EventPayload;
use authflow_core::traits::{Database, Services};

/// Request-scoped values supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextValues {
    pub web_session_id: Option<String>,
    pub oauth_session_id: Option<String>,
}

/// Everything a node, edge, intent or effect may reach while it runs.
#[derive(Clone)]
pub struct Context {
    pub services: Services,
    pub config: Arc<AppConfig>,
    pub database: Arc<dyn Database>,
    pub values: ContextValues,
    dry_run: bool,
    pending_events: Arc<Mutex<Vec<EventPayload>>>,
}

impl Context {
    pub fn new(services: Services, config: Arc<AppConfig>, database: Arc<dyn Database>) -> Self {
        Self {
            services,
            config,
            database,
            values: ContextValues::default(),
            dry_run: false,
            pending_events: Arc::default(),
        }
    }

    pub fn with_values(mut self, values: ContextValues) -> Self {
        self.values = values;
        self
    }

    /// True inside [`super::Service::dry_run`]: every database write will be rolled back.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Queue an event for delivery once the surrounding run has released its savepoint.
    ///
    /// Events queued by a run that rolls back are never delivered.
    pub fn dispatch(&self, payload: EventPayload) {
        let mut pending = self
            .pending_events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pending.push(payload);
    }

    pub fn pending_event_count(&self) -> usize {
        self.pending_events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub(crate) fn take_events(&self) -> Vec<EventPayload> {
        let mut pending = self
            .pending_events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *pending)
    }

    /// A copy for one request, with its own empty event queue.
    pub(crate) fn for_request(&self, values: ContextValues) -> Self {
        Self {
            pending_events: Arc::default(),
            ..self.clone()
        }
        .with_values(values)
    }

    pub(crate) fn into_dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authflow_test_utils::{FakeDatabase, FakeWorld};

    fn context() -> Context {
        let world = Arc::new(FakeWorld::default());
        let db = Arc::new(FakeDatabase::new(world.clone()));
        Context::new(world.services(), Arc::new(AppConfig::default()), db)
    }

    fn verified(user_id: &str) -> EventPayload {
        EventPayload::IdentityVerified {
            user_id: user_id.into(),
            claim: authflow_core::authn::VerifiableClaim {
                name: "email".into(),
                value: "a@example.com".into(),
            },
        }
    }

    #[test]
    fn test_requests_do_not_share_queued_events() {
        let base = context();
        let first = base.for_request(ContextValues::default());
        let second = base.for_request(ContextValues::default());

        first.dispatch(verified("u1"));
        assert_eq!(first.pending_event_count(), 1);
        assert_eq!(second.pending_event_count(), 0);
        assert_eq!(base.pending_event_count(), 0);
    }

    #[test]
    fn test_take_events_drains_in_order() {
        let ctx = context().for_request(ContextValues::default());
        ctx.dispatch(verified("u1"));
        ctx.clone().dispatch(verified("u2"));

        let taken: Vec<String> = ctx.take_events().iter().map(|e| e.user_id().to_string()).collect();
        assert_eq!(taken, vec!["u1", "u2"]);
        assert_eq!(ctx.pending_event_count(), 0);
    }
}
