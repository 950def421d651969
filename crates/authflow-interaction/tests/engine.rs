//! Engine behaviour exercised through a small counting flow.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use authflow_core::config::AppConfig;
use authflow_core::error::{AuthflowError, Result};
use authflow_core::event::EventPayload;
use authflow_interaction::engine::{
    Accepted, Context, ContextValues, Edge, Effect, EffectPhase, Flow, Graph, GraphCodec,
    GraphStore, Input, Intent, KindRegistry, Node, Outcome, Service,
};
use authflow_test_utils::{FakeDatabase, FakeKv, FakeWorld};

struct Counting;

impl Flow for Counting {
    type Intent = CountTo;
    type Node = Step;
    type Edge = Move;
    type Effect = Record;
    type Input = Form;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CountTo {
    target: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct Step {
    n: u32,
}

enum Move {
    Ping,
    Advance { next: u32 },
}

enum Record {
    CreateUser(String),
    Announce(String),
}

#[derive(Default)]
struct Form {
    advance: bool,
    ping: bool,
    interactive: bool,
}

impl Input for Form {
    fn is_interactive(&self) -> bool {
        self.interactive
    }
}

impl Intent<Counting> for CountTo {
    fn kind(&self) -> &'static str {
        "count_to"
    }

    fn to_data(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn instantiate_root_node<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a Graph<Counting>,
    ) -> BoxFuture<'a, Result<Step>> {
        Box::pin(async { Ok(Step { n: 0 }) })
    }

    fn derive_edges_for_node(&self, _graph: &Graph<Counting>, node: &Step) -> Result<Vec<Move>> {
        if node.n >= self.target {
            return Ok(vec![]);
        }
        Ok(vec![Move::Ping, Move::Advance { next: node.n + 1 }])
    }
}

impl Node<Counting> for Step {
    fn kind(&self) -> &'static str {
        "step"
    }

    fn to_data(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn effects(&self) -> Result<Vec<Record>> {
        if self.n == 0 {
            return Ok(vec![]);
        }
        let user_id = format!("user-{}", self.n);
        Ok(vec![Record::CreateUser(user_id.clone()), Record::Announce(user_id)])
    }

    fn derive_edges(&self, graph: &Graph<Counting>) -> Result<Vec<Move>> {
        graph.intent.derive_edges_for_node(graph, self)
    }
}

impl Edge<Counting> for Move {
    fn kind(&self) -> &'static str {
        match self {
            Move::Ping => "ping",
            Move::Advance { .. } => "advance",
        }
    }

    fn instantiate<'a>(
        &'a self,
        _ctx: &'a Context,
        _graph: &'a Graph<Counting>,
        input: Option<&'a Form>,
    ) -> BoxFuture<'a, Result<Step>> {
        Box::pin(async move {
            match self {
                Move::Ping if input.is_some_and(|i| i.ping) => Err(AuthflowError::SameNode),
                Move::Advance { next } if input.is_some_and(|i| i.advance) => Ok(Step { n: *next }),
                _ => Err(AuthflowError::IncompatibleInput),
            }
        })
    }
}

impl Effect<Counting> for Record {
    fn phase(&self) -> EffectPhase {
        match self {
            Record::CreateUser(_) => EffectPhase::Explore,
            Record::Announce(_) => EffectPhase::Commit,
        }
    }

    fn apply<'a>(
        &'a self,
        ctx: &'a Context,
        _graph: &'a Graph<Counting>,
        _index: usize,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match self {
                Record::CreateUser(user_id) => {
                    ctx.services.users.create(user_id).await?;
                }
                Record::Announce(user_id) => ctx.dispatch(EventPayload::UserCreated {
                    user_id: user_id.clone(),
                    identities: vec![],
                    authenticator_ids: vec![],
                }),
            }
            Ok(())
        })
    }
}

fn codec() -> GraphCodec<Counting> {
    GraphCodec::new(
        KindRegistry::builder("intent")
            .register("count_to", |data| serde_json::from_value(data))
            .build(),
        KindRegistry::builder("node")
            .register("step", |data| serde_json::from_value(data))
            .build(),
    )
}

const LIFETIME: Duration = Duration::from_secs(60);

struct Harness {
    world: Arc<FakeWorld>,
    db: Arc<FakeDatabase>,
    service: Service<Counting>,
}

fn harness() -> Harness {
    let world = Arc::new(FakeWorld::default());
    let db = Arc::new(FakeDatabase::new(world.clone()));
    let kv = Arc::new(FakeKv::new(world.clock().clone()));
    let ctx = Context::new(world.services(), Arc::new(AppConfig::default()), db.clone());
    let store = GraphStore::new(kv, Arc::new(codec()), "test", LIFETIME);
    Harness {
        world,
        db,
        service: Service::new(ctx, store),
    }
}

fn advance() -> Form {
    Form {
        advance: true,
        interactive: true,
        ..Default::default()
    }
}

fn ping() -> Form {
    Form {
        ping: true,
        ..Default::default()
    }
}

async fn start(h: &Harness, target: u32, input: Option<&Form>) -> Result<Accepted<Counting>> {
    let accepted = h
        .service
        .dry_run(ContextValues::default(), |ctx| async move {
            let graph = h.service.new_graph(&ctx, CountTo { target }).await?;
            Ok::<_, AuthflowError>(Some(h.service.accept(&ctx, &graph, input).await?))
        })
        .await?;
    accepted.ok_or(AuthflowError::GraphNotFound)
}

async fn resume(h: &Harness, instance_id: &str, input: Option<&Form>) -> Result<Accepted<Counting>> {
    let accepted = h
        .service
        .dry_run(ContextValues::default(), |ctx| async move {
            let graph = h.service.get_graph(instance_id).await?;
            Ok::<_, AuthflowError>(Some(h.service.accept(&ctx, &graph, input).await?))
        })
        .await?;
    accepted.ok_or(AuthflowError::GraphNotFound)
}

#[tokio::test]
async fn test_without_input_stops_at_root() {
    let h = harness();
    let accepted = start(&h, 2, None).await.unwrap();
    assert_eq!(accepted.outcome, Outcome::InputRequired { same_node: false });
    assert_eq!(accepted.edge_kinds(), vec!["ping", "advance"]);
    assert_eq!(accepted.graph.len(), 1);
    assert!(!accepted.graph.graph_id.is_empty());
}

#[tokio::test]
async fn test_one_input_drives_as_far_as_it_can() {
    let h = harness();
    let accepted = start(&h, 3, Some(&advance())).await.unwrap();
    assert!(accepted.is_finished());
    assert!(accepted.edges.is_empty());
    assert_eq!(accepted.graph.len(), 4);

    let interactive: Vec<bool> = accepted.graph.nodes().iter().map(|n| n.interactive).collect();
    assert_eq!(interactive, vec![false, true, true, true]);
}

#[tokio::test]
async fn test_same_node_forks_without_advancing() {
    let h = harness();
    let first = start(&h, 2, None).await.unwrap();

    let pinged = resume(&h, &first.graph.instance_id, Some(&ping())).await.unwrap();
    assert_eq!(pinged.outcome, Outcome::InputRequired { same_node: true });
    assert_eq!(pinged.graph.len(), 1);
    assert_eq!(pinged.graph.graph_id, first.graph.graph_id);
    assert_ne!(pinged.graph.instance_id, first.graph.instance_id);

    // The earlier instance stays usable
    let advanced = resume(&h, &first.graph.instance_id, Some(&advance())).await.unwrap();
    assert!(advanced.is_finished());
}

#[tokio::test]
async fn test_into_result_reports_candidates() {
    let h = harness();
    let err = start(&h, 1, None).await.unwrap().into_result().unwrap_err();
    match err {
        AuthflowError::InputRequired { edges, same_node } => {
            assert_eq!(edges, vec!["ping", "advance"]);
            assert!(!same_node);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_dry_run_rolls_back_exploration_effects() {
    let h = harness();
    let accepted = start(&h, 2, Some(&advance())).await.unwrap();
    assert!(accepted.is_finished());

    assert!(h.world.state().users.is_empty());
    assert!(h.world.events().is_empty());
    assert_eq!(h.db.depth(), 0);
    assert_eq!(h.db.log(), vec!["begin:interaction_graph", "rollback:interaction_graph"]);
}

#[tokio::test]
async fn test_dry_run_error_still_rolls_back() {
    let h = harness();
    let h = &h;
    let result = h
        .service
        .dry_run(ContextValues::default(), |ctx| async move {
            let graph = h.service.new_graph(&ctx, CountTo { target: 1 }).await?;
            h.service.accept(&ctx, &graph, Some(&advance())).await?;
            Err::<Option<Accepted<Counting>>, _>(AuthflowError::InvalidCredentials)
        })
        .await;
    assert!(matches!(result, Err(AuthflowError::InvalidCredentials)));
    assert_eq!(h.db.depth(), 0);
    assert!(h.world.state().users.is_empty());
}

#[tokio::test]
async fn test_run_commits_once() {
    let h = harness();
    let accepted = start(&h, 2, Some(&advance())).await.unwrap();

    h.service
        .run(ContextValues::default(), &accepted.graph)
        .await
        .unwrap();
    let mut users: Vec<String> = h.world.state().users.into_keys().collect();
    users.sort();
    assert_eq!(users, vec!["user-1", "user-2"]);
    assert_eq!(h.world.events().len(), 2);

    let err = h
        .service
        .run(ContextValues::default(), &accepted.graph)
        .await
        .unwrap_err();
    assert!(matches!(err.root(), AuthflowError::GraphNotFound));
    assert_eq!(h.db.log().last().map(String::as_str), Some("rollback:interaction_graph"));
    assert_eq!(h.db.depth(), 0);

    let err = h.service.get_graph(&accepted.graph.instance_id).await.unwrap_err();
    assert!(matches!(err, AuthflowError::GraphNotFound));
}

#[tokio::test]
async fn test_first_accepting_edge_wins() {
    let h = harness();
    let first = start(&h, 2, None).await.unwrap();

    // Both edges would accept; ping comes first
    let both = Form {
        ping: true,
        advance: true,
        interactive: true,
    };
    let accepted = resume(&h, &first.graph.instance_id, Some(&both)).await.unwrap();
    assert_eq!(accepted.outcome, Outcome::InputRequired { same_node: true });
    assert_eq!(accepted.graph.len(), 1);
}

#[tokio::test]
async fn test_resuming_leaves_stored_instance_unchanged() {
    let h = harness();
    let first = start(&h, 3, None).await.unwrap();

    let advanced = resume(&h, &first.graph.instance_id, Some(&advance())).await.unwrap();
    assert_eq!(advanced.graph.len(), 4);

    let reloaded = h.service.get_graph(&first.graph.instance_id).await.unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded.instance_id, first.graph.instance_id);
    assert_eq!(first.graph.len(), 1);
}

#[tokio::test]
async fn test_store_round_trip_keeps_ids() {
    let h = harness();
    let store = h.service.store();

    let mut graph = Graph::<Counting>::new(CountTo { target: 2 }).appending(Step { n: 0 }, false);
    store.create_graph(&mut graph).await.unwrap();
    let loaded = store.get_graph_instance(&graph.instance_id).await.unwrap();
    assert_eq!(loaded.graph_id, graph.graph_id);
    assert_eq!(loaded.instance_id, graph.instance_id);

    let mut next = loaded.appending(Step { n: 1 }, true);
    store.create_graph_instance(&mut next).await.unwrap();
    assert_ne!(next.instance_id, graph.instance_id);

    let loaded = store.get_graph_instance(&next.instance_id).await.unwrap();
    assert_eq!(loaded.graph_id, graph.graph_id);
    assert_eq!(loaded.instance_id, next.instance_id);
    assert_eq!(loaded.len(), 2);
}

#[tokio::test]
async fn test_racing_instances_commit_once() {
    let h = harness();
    let mut committed = h.service.subscribe();
    let first = start(&h, 1, None).await.unwrap();

    let a = resume(&h, &first.graph.instance_id, Some(&advance())).await.unwrap();
    let b = resume(&h, &first.graph.instance_id, Some(&advance())).await.unwrap();
    assert_eq!(a.graph.graph_id, b.graph.graph_id);
    assert_ne!(a.graph.instance_id, b.graph.instance_id);

    h.service.run(ContextValues::default(), &a.graph).await.unwrap();
    let err = h.service.run(ContextValues::default(), &b.graph).await.unwrap_err();
    assert!(matches!(err.root(), AuthflowError::GraphNotFound));

    assert_eq!(h.world.events().len(), 1);
    assert_eq!(h.world.state().users.len(), 1);
    assert!(committed.try_recv().is_ok());
    assert!(committed.try_recv().is_err());
}

#[tokio::test]
async fn test_dry_run_delivers_no_events() {
    let h = harness();
    let mut committed = h.service.subscribe();
    let accepted = start(&h, 2, Some(&advance())).await.unwrap();
    assert!(accepted.is_finished());

    assert!(h.world.events().is_empty());
    assert!(committed.try_recv().is_err());
}

#[tokio::test]
async fn test_graph_expires() {
    let h = harness();
    let accepted = start(&h, 2, None).await.unwrap();
    h.world
        .clock()
        .advance(chrono::Duration::seconds(LIFETIME.as_secs() as i64 + 1));

    let err = h.service.get_graph(&accepted.graph.instance_id).await.unwrap_err();
    assert!(matches!(err, AuthflowError::GraphNotFound));
}

#[tokio::test]
async fn test_saving_into_deleted_graph_fails() {
    let h = harness();
    let accepted = start(&h, 2, None).await.unwrap();
    let store = h.service.store();

    store.delete_graph(&accepted.graph).await.unwrap();
    assert!(matches!(
        store.delete_graph(&accepted.graph).await,
        Err(AuthflowError::GraphNotFound)
    ));

    let mut fork = accepted.graph.fork();
    assert!(matches!(
        store.create_graph_instance(&mut fork).await,
        Err(AuthflowError::GraphNotFound)
    ));
}

#[test]
fn test_codec_round_trip_keeps_interactive_flags() {
    let codec = codec();
    let graph = Graph::<Counting>::new(CountTo { target: 2 })
        .appending(Step { n: 0 }, false)
        .appending(Step { n: 1 }, true);

    let decoded = codec.decode(&codec.encode(&graph).unwrap()).unwrap();
    assert_eq!(decoded.intent.target, 2);
    let nodes: Vec<(u32, bool)> = decoded
        .nodes()
        .iter()
        .map(|n| (n.node.n, n.interactive))
        .collect();
    assert_eq!(nodes, vec![(0, false), (1, true)]);
}

#[test]
fn test_codec_reads_documents_without_interactive_flags() {
    let raw = r#"{
        "graph_id": "g1",
        "instance_id": "i1",
        "intent": {"kind": "count_to", "data": {"target": 3}},
        "nodes": [
            {"kind": "step", "data": {"n": 0}},
            {"kind": "step", "data": {"n": 1}}
        ]
    }"#;
    let graph = codec().decode(raw).unwrap();
    assert_eq!(graph.graph_id, "g1");
    assert_eq!(graph.len(), 2);
    assert!(graph.nodes().iter().all(|n| !n.interactive));
}

#[test]
fn test_codec_rejects_unknown_node_kind() {
    let raw = r#"{
        "graph_id": "g1",
        "intent": {"kind": "count_to", "data": {"target": 3}},
        "annotated_nodes": [{"interactive": false, "node": {"kind": "jump", "data": {}}}]
    }"#;
    let err = codec().decode(raw).unwrap_err();
    assert!(err.is_fatal());
}
