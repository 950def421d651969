use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use authflow_core::error::{AuthflowError, Result};

use super::flow::{Flow, Intent, Node};
use super::graph::{AnnotatedNode, Graph};

/// Rebuilds a value from its persisted payload.
pub type Decoder<T> = fn(Value) -> serde_json::Result<T>;

/// Maps kind names to decoders for one category (intents or nodes).
pub struct KindRegistry<T> {
    category: &'static str,
    decoders: HashMap<&'static str, Decoder<T>>,
}

pub struct KindRegistryBuilder<T> {
    category: &'static str,
    decoders: HashMap<&'static str, Decoder<T>>,
}

impl<T> KindRegistryBuilder<T> {
    /// Panics if `kind` is already registered.
    pub fn register(mut self, kind: &'static str, decoder: Decoder<T>) -> Self {
        if self.decoders.insert(kind, decoder).is_some() {
            panic!("duplicate {} kind registered: {}", self.category, kind);
        }
        self
    }

    pub fn build(self) -> KindRegistry<T> {
        KindRegistry {
            category: self.category,
            decoders: self.decoders,
        }
    }
}

impl<T> KindRegistry<T> {
    pub fn builder(category: &'static str) -> KindRegistryBuilder<T> {
        KindRegistryBuilder {
            category,
            decoders: HashMap::new(),
        }
    }

    pub fn category(&self) -> &'static str {
        self.category
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.decoders.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn decode(&self, kind: &str, data: Value) -> Result<T> {
        let decoder = self.decoders.get(kind).ok_or_else(|| {
            error!(category = self.category, kind, "Unknown kind in persisted graph");
            AuthflowError::UnknownKind {
                category: self.category,
                kind: kind.to_string(),
            }
        })?;
        Ok(decoder(data)?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KindData {
    kind: String,
    data: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnnotatedDoc {
    #[serde(default)]
    interactive: bool,
    node: KindData,
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphDoc {
    graph_id: String,
    #[serde(default)]
    instance_id: String,
    intent: KindData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    annotated_nodes: Option<Vec<AnnotatedDoc>>,
    /// Documents written before nodes carried the interactive flag.
    #[serde(default, skip_serializing)]
    nodes: Option<Vec<KindData>>,
}

/// Serializes graphs to and from their persisted JSON document.
pub struct GraphCodec<F: Flow> {
    intents: KindRegistry<F::Intent>,
    nodes: KindRegistry<F::Node>,
}

impl<F: Flow> GraphCodec<F> {
    pub fn new(intents: KindRegistry<F::Intent>, nodes: KindRegistry<F::Node>) -> Self {
        Self { intents, nodes }
    }

    pub fn intents(&self) -> &KindRegistry<F::Intent> {
        &self.intents
    }

    pub fn nodes(&self) -> &KindRegistry<F::Node> {
        &self.nodes
    }

    pub fn encode(&self, graph: &Graph<F>) -> Result<String> {
        let annotated_nodes = graph
            .nodes()
            .iter()
            .map(|annotated| -> Result<AnnotatedDoc> {
                Ok(AnnotatedDoc {
                    interactive: annotated.interactive,
                    node: KindData {
                        kind: annotated.node.kind().to_string(),
                        data: annotated.node.to_data()?,
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let doc = GraphDoc {
            graph_id: graph.graph_id.clone(),
            instance_id: graph.instance_id.clone(),
            intent: KindData {
                kind: graph.intent.kind().to_string(),
                data: graph.intent.to_data()?,
            },
            annotated_nodes: Some(annotated_nodes),
            nodes: None,
        };
        Ok(serde_json::to_string(&doc)?)
    }

    pub fn decode(&self, raw: &str) -> Result<Graph<F>> {
        let doc: GraphDoc = serde_json::from_str(raw)?;
        let intent = self.intents.decode(&doc.intent.kind, doc.intent.data)?;

        let annotated = match (doc.annotated_nodes, doc.nodes) {
            (Some(annotated), _) => annotated,
            (None, Some(legacy)) => legacy
                .into_iter()
                .map(|node| AnnotatedDoc {
                    interactive: false,
                    node,
                })
                .collect(),
            (None, None) => vec![],
        };

        let nodes = annotated
            .into_iter()
            .map(|doc| -> Result<AnnotatedNode<F>> {
                Ok(AnnotatedNode {
                    node: self.nodes.decode(&doc.node.kind, doc.node.data)?,
                    interactive: doc.interactive,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Graph::from_parts(doc.graph_id, doc.instance_id, intent, nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> KindRegistry<u32> {
        KindRegistry::builder("node")
            .register("number", |data| serde_json::from_value(data))
            .register("double", |data| serde_json::from_value::<u32>(data).map(|n| n * 2))
            .build()
    }

    #[test]
    fn test_decode_by_kind() {
        let registry = registry();
        assert_eq!(registry.decode("number", Value::from(3)).unwrap(), 3);
        assert_eq!(registry.decode("double", Value::from(3)).unwrap(), 6);
        assert_eq!(registry.kinds(), vec!["double", "number"]);
    }

    #[test]
    fn test_unknown_kind_is_fatal() {
        let err = registry().decode("missing", Value::Null).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, AuthflowError::UnknownKind { category: "node", .. }));
    }

    #[test]
    fn test_bad_payload_is_json_error() {
        let err = registry().decode("number", Value::from("x")).unwrap_err();
        assert!(matches!(err, AuthflowError::Json(_)));
    }

    #[test]
    #[should_panic(expected = "duplicate node kind registered: number")]
    fn test_duplicate_registration_panics() {
        let _ = KindRegistry::<u32>::builder("node")
            .register("number", |data| serde_json::from_value(data))
            .register("number", |data| serde_json::from_value(data));
    }
}
