//! Interaction graph engine.
//!
//! A flow is an append-only path of [`Node`]s. From the current node, the
//! outgoing [`Edge`]s are tried against end-user input; the first edge that
//! accepts produces the next node. Nodes carry [`Effect`]s that are replayed
//! on every traversal (exploration) or only when the path is committed.
//!
//! [`Service`] wraps traversal in database savepoints: exploration happens in
//! a dry run that is always rolled back, and a finished path is committed by
//! [`Service::run`], which also deletes it from the [`GraphStore`] so it can
//! be committed at most once. Events raised while committing are delivered
//! only after the savepoint is released.

pub mod context;
pub mod flow;
pub mod graph;
pub mod prepared;
pub mod registry;
pub mod service;
pub mod sort;
pub mod store;

pub use context::{Context, ContextValues};
pub use flow::{ApplyPhase, Edge, Effect, EffectPhase, Flow, Input, Intent, Node};
pub use graph::{Accepted, AnnotatedNode, Graph, Outcome};
pub use prepared::Prepared;
pub use registry::{Decoder, GraphCodec, KindRegistry, KindRegistryBuilder};
pub use service::{Service, SAVEPOINT};
pub use sort::{sort_authenticators, Sortable};
pub use store::GraphStore;
