use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use authflow_core::error::{AuthflowError, Result};

use super::context::Context;
use super::flow::{ApplyPhase, Edge, Effect, Flow, Input, Intent, Node};

/// A node together with whether it was produced by interactive input.
pub struct AnnotatedNode<F: Flow> {
    pub node: F::Node,
    pub interactive: bool,
}

impl<F: Flow> fmt::Debug for AnnotatedNode<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotatedNode")
            .field("kind", &self.node.kind())
            .field("interactive", &self.interactive)
            .finish()
    }
}

/// An append-only path of nodes pursuing one intent.
///
/// `graph_id` names the flow and is shared by every instance forked from it;
/// `instance_id` names one persisted snapshot of the path.
pub struct Graph<F: Flow> {
    pub graph_id: String,
    pub instance_id: String,
    pub intent: Arc<F::Intent>,
    nodes: Vec<Arc<AnnotatedNode<F>>>,
}

impl<F: Flow> Clone for Graph<F> {
    fn clone(&self) -> Self {
        Self {
            graph_id: self.graph_id.clone(),
            instance_id: self.instance_id.clone(),
            intent: self.intent.clone(),
            nodes: self.nodes.clone(),
        }
    }
}

impl<F: Flow> fmt::Debug for Graph<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("graph_id", &self.graph_id)
            .field("instance_id", &self.instance_id)
            .field("intent", &self.intent.kind())
            .field("nodes", &self.nodes)
            .finish()
    }
}

/// Outcome of [`Graph::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The current node has no outgoing edges.
    Finished,
    /// No candidate edge accepted the input. `same_node` is set when an edge
    /// performed its action without advancing (a resend, for example).
    InputRequired { same_node: bool },
}

/// The graph reached by [`Graph::accept`] and the edges leaving its current node.
pub struct Accepted<F: Flow> {
    pub graph: Graph<F>,
    pub edges: Vec<F::Edge>,
    pub outcome: Outcome,
}

impl<F: Flow> Accepted<F> {
    pub fn is_finished(&self) -> bool {
        self.outcome == Outcome::Finished
    }

    pub fn edge_kinds(&self) -> Vec<&'static str> {
        self.edges.iter().map(|e| e.kind()).collect()
    }

    /// The graph when finished, otherwise `InputRequired` listing the candidate edges.
    pub fn into_result(self) -> Result<Graph<F>> {
        match self.outcome {
            Outcome::Finished => Ok(self.graph),
            Outcome::InputRequired { same_node } => Err(AuthflowError::InputRequired {
                edges: self.edges.iter().map(|e| e.kind().to_string()).collect(),
                same_node,
            }),
        }
    }
}

impl<F: Flow> fmt::Debug for Accepted<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accepted")
            .field("graph", &self.graph)
            .field("edges", &self.edge_kinds())
            .field("outcome", &self.outcome)
            .finish()
    }
}

impl<F: Flow> Graph<F> {
    /// An empty, unpersisted graph.
    pub fn new(intent: F::Intent) -> Self {
        Self {
            graph_id: String::new(),
            instance_id: String::new(),
            intent: Arc::new(intent),
            nodes: vec![],
        }
    }

    /// Same flow, no instance yet, independent node list sharing the existing nodes.
    pub fn fork(&self) -> Self {
        Self {
            graph_id: self.graph_id.clone(),
            instance_id: String::new(),
            intent: self.intent.clone(),
            nodes: self.nodes.clone(),
        }
    }

    /// A fork with `node` appended.
    pub fn appending(&self, node: F::Node, interactive: bool) -> Self {
        let mut graph = self.fork();
        graph
            .nodes
            .push(Arc::new(AnnotatedNode { node, interactive }));
        graph
    }

    pub fn current_node(&self) -> Result<&F::Node> {
        self.nodes
            .last()
            .map(|annotated| &annotated.node)
            .ok_or_else(|| AuthflowError::InvariantViolated("graph has no nodes".to_string()))
    }

    pub fn nodes(&self) -> &[Arc<AnnotatedNode<F>>] {
        &self.nodes
    }

    /// Nodes from newest to oldest.
    pub fn nodes_rev(&self) -> impl Iterator<Item = &F::Node> {
        self.nodes.iter().rev().map(|annotated| &annotated.node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Attach the intent kind to `err` for diagnostics.
    pub fn with_intent(&self, err: AuthflowError) -> AuthflowError {
        err.with_intent(self.intent.kind())
    }

    pub(crate) fn from_parts(
        graph_id: String,
        instance_id: String,
        intent: F::Intent,
        nodes: Vec<AnnotatedNode<F>>,
    ) -> Self {
        Self {
            graph_id,
            instance_id,
            intent: Arc::new(intent),
            nodes: nodes.into_iter().map(Arc::new).collect(),
        }
    }

    /// The first `len` nodes, as seen by the node at `len - 1` when it was appended.
    fn prefix(&self, len: usize) -> Self {
        Self {
            graph_id: self.graph_id.clone(),
            instance_id: self.instance_id.clone(),
            intent: self.intent.clone(),
            nodes: self.nodes[..len].to_vec(),
        }
    }

    /// Replay the path: prepare every node against its own prefix, then run
    /// its effects matching `phase` against the whole graph.
    pub async fn apply(&self, ctx: &Context, phase: ApplyPhase) -> Result<()> {
        for (index, annotated) in self.nodes.iter().enumerate() {
            let prefix = self.prefix(index + 1);
            annotated
                .node
                .prepare(ctx, &prefix)
                .await
                .map_err(|e| self.with_intent(e))?;
            self.apply_node_effects(ctx, index, phase).await?;
        }
        debug!(
            graph_id = %self.graph_id,
            nodes = self.nodes.len(),
            phase = ?phase,
            "Applied graph effects"
        );
        Ok(())
    }

    async fn apply_node_effects(&self, ctx: &Context, index: usize, phase: ApplyPhase) -> Result<()> {
        let node = &self.nodes[index].node;
        let effects = node.effects().map_err(|e| self.with_intent(e))?;
        for effect in effects.iter().filter(|e| phase.runs(e.phase())) {
            effect
                .apply(ctx, self, index)
                .await
                .map_err(|e| self.with_intent(e))?;
        }
        Ok(())
    }

    /// Append `node`, prepare it and run its exploration effects.
    pub(crate) async fn extend(&self, ctx: &Context, node: F::Node, interactive: bool) -> Result<Self> {
        let graph = self.appending(node, interactive);
        let index = graph.len() - 1;
        graph.nodes[index]
            .node
            .prepare(ctx, &graph)
            .await
            .map_err(|e| graph.with_intent(e))?;
        graph
            .apply_node_effects(ctx, index, ApplyPhase::Exploring)
            .await?;
        Ok(graph)
    }

    /// Advance as far as `input` allows.
    ///
    /// From the current node the outgoing edges are tried in order. The first
    /// edge that produces a node wins; the node is appended and the loop
    /// continues from it. Traversal stops when a node has no edges (finished)
    /// or when no edge accepts the input (input required).
    pub async fn accept(&self, ctx: &Context, input: Option<&F::Input>) -> Result<Accepted<F>> {
        let interactive = input.map(|i| i.is_interactive()).unwrap_or(false);
        let mut graph = self.clone();

        loop {
            let edges = graph
                .current_node()?
                .derive_edges(&graph)
                .map_err(|e| graph.with_intent(e))?;

            if edges.is_empty() {
                info!(
                    graph_id = %graph.graph_id,
                    intent = graph.intent.kind(),
                    nodes = graph.len(),
                    "Interaction graph finished"
                );
                return Ok(Accepted {
                    graph,
                    edges,
                    outcome: Outcome::Finished,
                });
            }

            let mut next = None;
            for edge in &edges {
                match edge.instantiate(ctx, &graph, input).await {
                    Ok(node) => {
                        debug!(edge = edge.kind(), node = node.kind(), "Edge accepted input");
                        next = Some(node);
                        break;
                    }
                    Err(AuthflowError::IncompatibleInput) => continue,
                    Err(AuthflowError::SameNode) => {
                        debug!(edge = edge.kind(), "Edge stayed on the same node");
                        return Ok(Accepted {
                            graph: graph.fork(),
                            edges,
                            outcome: Outcome::InputRequired { same_node: true },
                        });
                    }
                    Err(e) => return Err(graph.with_intent(e)),
                }
            }

            match next {
                Some(node) => graph = graph.extend(ctx, node, interactive).await?,
                None => {
                    return Ok(Accepted {
                        graph,
                        edges,
                        outcome: Outcome::InputRequired { same_node: false },
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::future::BoxFuture;
    use serde_json::Value;

    use authflow_core::authn::VerifiableClaim;
    use authflow_core::config::AppConfig;
    use authflow_core::event::EventPayload;
    use authflow_test_utils::{FakeDatabase, FakeWorld};

    use crate::engine::flow::EffectPhase;

    struct Trail;

    impl Flow for Trail {
        type Intent = Walk;
        type Node = Mark;
        type Edge = Choice;
        type Effect = Tick;
        type Input = Pick;
    }

    struct Walk;

    struct Mark {
        label: String,
    }

    enum Choice {
        Never,
        Go(&'static str),
    }

    enum Tick {
        Seen(String),
        Kept(String),
    }

    #[derive(Default)]
    struct Pick {
        accept: Vec<&'static str>,
        fail: bool,
    }

    impl Input for Pick {}

    impl Intent<Trail> for Walk {
        fn kind(&self) -> &'static str {
            "walk"
        }

        fn to_data(&self) -> serde_json::Result<Value> {
            Ok(Value::Null)
        }

        fn instantiate_root_node<'a>(
            &'a self,
            _ctx: &'a Context,
            _graph: &'a Graph<Trail>,
        ) -> BoxFuture<'a, Result<Mark>> {
            Box::pin(async { Ok(mark("start")) })
        }

        fn derive_edges_for_node(&self, _graph: &Graph<Trail>, node: &Mark) -> Result<Vec<Choice>> {
            Ok(match node.label.as_str() {
                "start" => vec![Choice::Never, Choice::Go("left"), Choice::Go("right")],
                "left" | "right" => vec![Choice::Go("end")],
                _ => vec![],
            })
        }
    }

    impl Node<Trail> for Mark {
        fn kind(&self) -> &'static str {
            "mark"
        }

        fn to_data(&self) -> serde_json::Result<Value> {
            Ok(Value::String(self.label.clone()))
        }

        fn effects(&self) -> Result<Vec<Tick>> {
            Ok(vec![Tick::Seen(self.label.clone()), Tick::Kept(self.label.clone())])
        }

        fn derive_edges(&self, graph: &Graph<Trail>) -> Result<Vec<Choice>> {
            graph.intent.derive_edges_for_node(graph, self)
        }
    }

    impl Edge<Trail> for Choice {
        fn kind(&self) -> &'static str {
            match self {
                Choice::Never => "never",
                Choice::Go(target) => *target,
            }
        }

        fn instantiate<'a>(
            &'a self,
            _ctx: &'a Context,
            _graph: &'a Graph<Trail>,
            input: Option<&'a Pick>,
        ) -> BoxFuture<'a, Result<Mark>> {
            Box::pin(async move {
                let Some(input) = input else {
                    return Err(AuthflowError::IncompatibleInput);
                };
                match self {
                    Choice::Never => Err(AuthflowError::IncompatibleInput),
                    Choice::Go(_) if input.fail => Err(AuthflowError::InvalidCredentials),
                    Choice::Go(target) if input.accept.contains(target) => Ok(mark(target)),
                    Choice::Go(_) => Err(AuthflowError::IncompatibleInput),
                }
            })
        }
    }

    impl Effect<Trail> for Tick {
        fn phase(&self) -> EffectPhase {
            match self {
                Tick::Seen(_) => EffectPhase::Explore,
                Tick::Kept(_) => EffectPhase::Commit,
            }
        }

        fn apply<'a>(
            &'a self,
            ctx: &'a Context,
            _graph: &'a Graph<Trail>,
            _index: usize,
        ) -> BoxFuture<'a, Result<()>> {
            let value = match self {
                Tick::Seen(label) => format!("seen:{}", label),
                Tick::Kept(label) => format!("kept:{}", label),
            };
            Box::pin(async move {
                ctx.dispatch(EventPayload::IdentityVerified {
                    user_id: "u1".into(),
                    claim: VerifiableClaim {
                        name: "trail".into(),
                        value,
                    },
                });
                Ok(())
            })
        }
    }

    fn mark(label: &str) -> Mark {
        Mark {
            label: label.to_string(),
        }
    }

    fn context() -> Context {
        let world = Arc::new(FakeWorld::default());
        let db = Arc::new(FakeDatabase::new(world.clone()));
        Context::new(world.services(), Arc::new(AppConfig::default()), db)
    }

    fn labels(graph: &Graph<Trail>) -> Vec<&str> {
        graph.nodes().iter().map(|n| n.node.label.as_str()).collect()
    }

    fn claims(ctx: &Context) -> Vec<String> {
        ctx.take_events()
            .into_iter()
            .filter_map(|event| match event {
                EventPayload::IdentityVerified { claim, .. } => Some(claim.value),
                _ => None,
            })
            .collect()
    }

    fn persisted() -> Graph<Trail> {
        Graph::from_parts(
            "g1".into(),
            "i1".into(),
            Walk,
            vec![AnnotatedNode {
                node: mark("start"),
                interactive: false,
            }],
        )
    }

    #[test]
    fn test_fork_leaves_original_untouched() {
        let original = persisted();
        let fork = original.appending(mark("left"), true);

        assert_eq!(original.len(), 1);
        assert_eq!(original.instance_id, "i1");
        assert_eq!(labels(&original), vec!["start"]);

        assert_eq!(fork.graph_id, "g1");
        assert!(fork.instance_id.is_empty());
        assert_eq!(labels(&fork), vec!["start", "left"]);
        assert!(Arc::ptr_eq(&original.nodes()[0], &fork.nodes()[0]));
        assert!(fork.nodes()[1].interactive);
    }

    #[test]
    fn test_empty_graph_has_no_current_node() {
        let graph = Graph::<Trail>::new(Walk);
        assert!(graph.is_empty());
        assert!(matches!(
            graph.current_node(),
            Err(AuthflowError::InvariantViolated(_))
        ));
    }

    #[tokio::test]
    async fn test_accept_takes_first_accepting_edge() {
        let ctx = context();
        let input = Pick {
            accept: vec!["right", "left"],
            ..Default::default()
        };
        let accepted = persisted().accept(&ctx, Some(&input)).await.unwrap();

        assert_eq!(labels(&accepted.graph), vec!["start", "left"]);
        assert_eq!(accepted.outcome, Outcome::InputRequired { same_node: false });
        assert_eq!(accepted.edge_kinds(), vec!["end"]);
    }

    #[tokio::test]
    async fn test_accept_runs_until_finished() {
        let ctx = context();
        let input = Pick {
            accept: vec!["right", "end"],
            ..Default::default()
        };
        let accepted = persisted().accept(&ctx, Some(&input)).await.unwrap();

        assert!(accepted.is_finished());
        assert_eq!(labels(&accepted.graph), vec!["start", "right", "end"]);
        // Appended nodes run their exploration effects only
        assert_eq!(claims(&ctx), vec!["seen:right", "seen:end"]);
    }

    #[tokio::test]
    async fn test_accept_without_input_stays_put() {
        let ctx = context();
        let original = persisted();
        let accepted = original.accept(&ctx, None).await.unwrap();

        assert_eq!(accepted.graph.len(), 1);
        assert_eq!(accepted.graph.instance_id, "i1");
        assert_eq!(accepted.edge_kinds(), vec!["never", "left", "right"]);
    }

    #[tokio::test]
    async fn test_accept_error_names_the_intent() {
        let ctx = context();
        let input = Pick {
            accept: vec!["left"],
            fail: true,
        };
        let err = persisted().accept(&ctx, Some(&input)).await.unwrap_err();

        assert_eq!(err.intent_kind(), Some("walk"));
        assert!(matches!(err.root(), AuthflowError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_apply_runs_one_phase() {
        let ctx = context();
        let graph = persisted().appending(mark("left"), true);

        graph.apply(&ctx, ApplyPhase::Exploring).await.unwrap();
        assert_eq!(claims(&ctx), vec!["seen:start", "seen:left"]);

        graph.apply(&ctx, ApplyPhase::Committing).await.unwrap();
        assert_eq!(claims(&ctx), vec!["kept:start", "kept:left"]);
    }
}
