use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};

use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use authflow_core::error::Result;
use authflow_core::event::{EventBus, EventPayload};

use super::context::{Context, ContextValues};
use super::flow::{ApplyPhase, Flow, Intent};
use super::graph::{Accepted, Graph};
use super::store::GraphStore;

/// Savepoint wrapping every dry run and run.
pub const SAVEPOINT: &str = "interaction_graph";

/// Entry point for driving graphs: creation, exploratory traversal and commit.
pub struct Service<F: Flow> {
    context: Context,
    store: GraphStore<F>,
    events: EventBus,
}

impl<F: Flow> Service<F> {
    pub fn new(context: Context, store: GraphStore<F>) -> Self {
        Self {
            context,
            store,
            events: EventBus::default(),
        }
    }

    pub fn store(&self) -> &GraphStore<F> {
        &self.store
    }

    /// Receive every event of every committed run, after its savepoint is released.
    pub fn subscribe(&self) -> broadcast::Receiver<EventPayload> {
        self.events.subscribe()
    }

    /// A context for one request.
    pub fn context(&self, values: ContextValues) -> Context {
        self.context.for_request(values)
    }

    pub async fn get_graph(&self, instance_id: &str) -> Result<Graph<F>> {
        self.store.get_graph_instance(instance_id).await
    }

    /// Start a graph: create the root node, prepare it and run its exploration effects.
    pub async fn new_graph(&self, ctx: &Context, intent: F::Intent) -> Result<Graph<F>> {
        let graph = Graph::<F>::new(intent);
        let root = graph
            .intent
            .instantiate_root_node(ctx, &graph)
            .await
            .map_err(|e| graph.with_intent(e))?;
        let graph = graph.extend(ctx, root, false).await?;
        debug!(intent = graph.intent.kind(), "Interaction graph started");
        Ok(graph)
    }

    /// Rebuild the transient state of a loaded graph, then advance it with `input`.
    pub async fn accept(
        &self,
        ctx: &Context,
        graph: &Graph<F>,
        input: Option<&F::Input>,
    ) -> Result<Accepted<F>> {
        graph.apply(ctx, ApplyPhase::Exploring).await?;
        graph.accept(ctx, input).await
    }

    /// Run `builder` inside a savepoint that is always rolled back.
    ///
    /// A graph returned by the builder is persisted (as a new flow or a new
    /// instance of an existing one) and handed back with its fresh ids.
    pub async fn dry_run<B, Fut>(&self, values: ContextValues, builder: B) -> Result<Option<Accepted<F>>>
    where
        B: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<Option<Accepted<F>>>>,
    {
        let ctx = self.context(values).into_dry_run();
        ctx.database.begin_savepoint(SAVEPOINT).await?;
        debug!(savepoint = SAVEPOINT, "Dry run started");

        let outcome = AssertUnwindSafe(builder(ctx.clone())).catch_unwind().await;

        let rollback = ctx.database.rollback_to_savepoint(SAVEPOINT).await;
        debug!(savepoint = SAVEPOINT, "Dry run rolled back");

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                if let Err(e) = rollback {
                    error!(error = %e, "Rollback failed while unwinding");
                }
                error!("Panic during dry run, re-raising");
                resume_unwind(panic);
            }
        };

        let mut accepted = match (result, rollback) {
            (Err(e), Err(rollback_err)) => {
                error!(error = %rollback_err, "Rollback failed after dry run error");
                return Err(e);
            }
            (Err(e), Ok(())) => return Err(e),
            (Ok(_), Err(rollback_err)) => return Err(rollback_err),
            (Ok(accepted), Ok(())) => accepted,
        };

        if let Some(accepted) = accepted.as_mut() {
            self.store.save(&mut accepted.graph).await?;
            debug!(
                graph_id = %accepted.graph.graph_id,
                instance_id = %accepted.graph.instance_id,
                "Dry run graph saved"
            );
        }
        Ok(accepted)
    }

    /// Commit a graph: replay exploration effects, run commit effects, delete
    /// the flow and release the savepoint. Any failure rolls everything back.
    ///
    /// Events raised by commit effects are delivered only after the release,
    /// so a run that loses the delete race delivers nothing.
    pub async fn run(&self, values: ContextValues, graph: &Graph<F>) -> Result<()> {
        let ctx = self.context(values);
        ctx.database.begin_savepoint(SAVEPOINT).await?;
        debug!(savepoint = SAVEPOINT, graph_id = %graph.graph_id, "Run started");

        let outcome = AssertUnwindSafe(self.commit(&ctx, graph)).catch_unwind().await;

        match outcome {
            Ok(Ok(())) => {
                ctx.database.release_savepoint(SAVEPOINT).await?;
                let events = ctx.take_events();
                info!(
                    graph_id = %graph.graph_id,
                    intent = graph.intent.kind(),
                    events = events.len(),
                    "Interaction graph committed"
                );
                self.deliver(&ctx, events).await;
                Ok(())
            }
            Ok(Err(e)) => {
                if let Err(rollback_err) = ctx.database.rollback_to_savepoint(SAVEPOINT).await {
                    error!(error = %rollback_err, "Rollback failed after run error");
                }
                debug!(graph_id = %graph.graph_id, error = %e, "Run rolled back");
                Err(e)
            }
            Err(panic) => {
                if let Err(rollback_err) = ctx.database.rollback_to_savepoint(SAVEPOINT).await {
                    error!(error = %rollback_err, "Rollback failed while unwinding");
                }
                error!(graph_id = %graph.graph_id, "Panic during run, re-raising");
                resume_unwind(panic);
            }
        }
    }

    /// Runs after the release; delivery failures are logged only.
    async fn deliver(&self, ctx: &Context, events: Vec<EventPayload>) {
        for event in events {
            if let Err(e) = ctx.services.events.dispatch(event.clone()).await {
                error!(event = event.event_type(), error = %e, "Event delivery failed");
            }
            self.events.publish(event);
        }
    }

    async fn commit(&self, ctx: &Context, graph: &Graph<F>) -> Result<()> {
        graph.apply(ctx, ApplyPhase::Exploring).await?;
        graph.apply(ctx, ApplyPhase::Committing).await?;
        self.store.delete_graph(graph).await
    }
}
