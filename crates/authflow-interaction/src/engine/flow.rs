use futures::future::BoxFuture;
use serde_json::Value;

use authflow_core::error::Result;

use super::context::Context;
use super::graph::Graph;

/// A closed family of intents, nodes, edges and effects that make up one
/// kind of interaction.
pub trait Flow: Sized + Send + Sync + 'static {
    type Intent: Intent<Self>;
    type Node: Node<Self>;
    type Edge: Edge<Self>;
    type Effect: Effect<Self>;
    type Input: Input + ?Sized;
}

/// Opaque end-user input handed to edges.
pub trait Input: Send + Sync {
    /// Whether a human produced this input (as opposed to an automatic resubmission).
    fn is_interactive(&self) -> bool {
        false
    }
}

/// A persisted, immutable step of a graph.
pub trait Node<F: Flow>: Send + Sync + 'static {
    /// Stable name used as the persistence discriminator.
    fn kind(&self) -> &'static str;

    fn to_data(&self) -> serde_json::Result<Value>;

    /// Load transient state. Runs every time the graph is replayed, so it must
    /// be idempotent and only write into [`super::Prepared`] cells.
    fn prepare<'a>(&'a self, _ctx: &'a Context, _graph: &'a Graph<F>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn effects(&self) -> Result<Vec<F::Effect>> {
        Ok(vec![])
    }

    /// Outgoing edges in priority order. Empty means the flow is finished.
    fn derive_edges(&self, graph: &Graph<F>) -> Result<Vec<F::Edge>>;
}

/// A transient, possible transition out of a node.
pub trait Edge<F: Flow>: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Produce the next node.
    ///
    /// `IncompatibleInput` means the input is not meant for this edge and the
    /// next candidate should be tried. `SameNode` means the edge performed its
    /// action but the graph stays where it is.
    fn instantiate<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a Graph<F>,
        input: Option<&'a F::Input>,
    ) -> BoxFuture<'a, Result<F::Node>>;
}

/// The goal of a graph. Creates the root node and routes nodes that do not
/// decide their own edges.
pub trait Intent<F: Flow>: Send + Sync + 'static {
    fn kind(&self) -> &'static str;

    fn to_data(&self) -> serde_json::Result<Value>;

    fn instantiate_root_node<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a Graph<F>,
    ) -> BoxFuture<'a, Result<F::Node>>;

    /// Panics when handed a node this intent never routes.
    fn derive_edges_for_node(&self, graph: &Graph<F>, node: &F::Node) -> Result<Vec<F::Edge>>;
}

/// When an effect may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectPhase {
    /// Every traversal, including dry runs. Must be idempotent under rollback.
    Explore,
    /// Only during the committing pass of a run.
    Commit,
}

/// Which pass [`Graph::apply`] is performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyPhase {
    Exploring,
    Committing,
}

impl ApplyPhase {
    pub fn runs(&self, phase: EffectPhase) -> bool {
        matches!(
            (self, phase),
            (ApplyPhase::Exploring, EffectPhase::Explore)
                | (ApplyPhase::Committing, EffectPhase::Commit)
        )
    }
}

/// A side effect attached to a node.
pub trait Effect<F: Flow>: Send + Sync {
    fn phase(&self) -> EffectPhase;

    /// `index` is the position of the owning node in `graph`.
    fn apply<'a>(
        &'a self,
        ctx: &'a Context,
        graph: &'a Graph<F>,
        index: usize,
    ) -> BoxFuture<'a, Result<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_matching() {
        assert!(ApplyPhase::Exploring.runs(EffectPhase::Explore));
        assert!(!ApplyPhase::Exploring.runs(EffectPhase::Commit));
        assert!(ApplyPhase::Committing.runs(EffectPhase::Commit));
        assert!(!ApplyPhase::Committing.runs(EffectPhase::Explore));
    }
}
