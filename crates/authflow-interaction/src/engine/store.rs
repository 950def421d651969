use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use authflow_core::error::{AuthflowError, Result};
use authflow_core::new_id;
use authflow_core::traits::KvStore;

use super::flow::Flow;
use super::graph::Graph;
use super::registry::GraphCodec;

/// Persists graph instances in an expiring key-value store.
///
/// Each flow owns one existence key (`{prefix}:graph:{graph_id}`) and each
/// saved snapshot one instance key (`{prefix}:instance:{instance_id}`). An
/// instance is only readable while the existence key is live, so deleting
/// the existence key invalidates every instance of the flow at once.
pub struct GraphStore<F: Flow> {
    kv: Arc<dyn KvStore>,
    codec: Arc<GraphCodec<F>>,
    prefix: String,
    lifetime: Duration,
}

impl<F: Flow> GraphStore<F> {
    pub fn new(
        kv: Arc<dyn KvStore>,
        codec: Arc<GraphCodec<F>>,
        prefix: impl Into<String>,
        lifetime: Duration,
    ) -> Self {
        Self {
            kv,
            codec,
            prefix: prefix.into(),
            lifetime,
        }
    }

    pub fn codec(&self) -> &GraphCodec<F> {
        &self.codec
    }

    fn graph_key(&self, graph_id: &str) -> String {
        format!("{}:graph:{}", self.prefix, graph_id)
    }

    fn instance_key(&self, instance_id: &str) -> String {
        format!("{}:instance:{}", self.prefix, instance_id)
    }

    /// Persist a brand-new flow: assigns both ids and writes both keys atomically.
    pub async fn create_graph(&self, graph: &mut Graph<F>) -> Result<()> {
        graph.graph_id = new_id();
        graph.instance_id = new_id();
        let data = self.codec.encode(graph)?;

        let pairs = vec![
            (self.graph_key(&graph.graph_id), graph.graph_id.clone()),
            (self.instance_key(&graph.instance_id), data),
        ];
        if !self.kv.set_nx_multi(&pairs, self.lifetime).await? {
            warn!(graph_id = %graph.graph_id, "Graph id collision");
            return Err(AuthflowError::GraphExists(graph.graph_id.clone()));
        }
        debug!(graph_id = %graph.graph_id, instance_id = %graph.instance_id, "Graph created");
        Ok(())
    }

    /// Persist a new snapshot of an existing flow and refresh the flow's TTL.
    pub async fn create_graph_instance(&self, graph: &mut Graph<F>) -> Result<()> {
        graph.instance_id = new_id();
        let data = self.codec.encode(graph)?;

        let graph_key = self.graph_key(&graph.graph_id);
        if !self.kv.set_xx(&graph_key, &graph.graph_id, self.lifetime).await? {
            debug!(graph_id = %graph.graph_id, "Graph expired or committed before save");
            return Err(AuthflowError::GraphNotFound);
        }
        let instance_key = self.instance_key(&graph.instance_id);
        if !self.kv.set_nx(&instance_key, &data, self.lifetime).await? {
            return Err(AuthflowError::GraphExists(graph.instance_id.clone()));
        }
        debug!(graph_id = %graph.graph_id, instance_id = %graph.instance_id, "Graph instance created");
        Ok(())
    }

    /// Create the flow or a new instance of it, depending on whether it has a graph id.
    pub async fn save(&self, graph: &mut Graph<F>) -> Result<()> {
        if graph.graph_id.is_empty() {
            self.create_graph(graph).await
        } else {
            self.create_graph_instance(graph).await
        }
    }

    /// Load an instance. Fails with `GraphNotFound` when either the instance
    /// or its flow's existence key is gone.
    pub async fn get_graph_instance(&self, instance_id: &str) -> Result<Graph<F>> {
        let data = self
            .kv
            .get(&self.instance_key(instance_id))
            .await?
            .ok_or(AuthflowError::GraphNotFound)?;
        let graph = self.codec.decode(&data)?;

        if self.kv.get(&self.graph_key(&graph.graph_id)).await?.is_none() {
            debug!(graph_id = %graph.graph_id, instance_id, "Instance outlived its graph");
            return Err(AuthflowError::GraphNotFound);
        }
        Ok(graph)
    }

    /// Remove the flow's existence key, invalidating every instance.
    ///
    /// Fails with `GraphNotFound` when the key is already gone, so of two runs
    /// racing on the same flow only the first one succeeds. A graph that was
    /// never persisted has nothing to delete.
    pub async fn delete_graph(&self, graph: &Graph<F>) -> Result<()> {
        if graph.graph_id.is_empty() {
            return Ok(());
        }
        if !self.kv.del(&self.graph_key(&graph.graph_id)).await? {
            return Err(AuthflowError::GraphNotFound);
        }
        debug!(graph_id = %graph.graph_id, "Graph deleted");
        Ok(())
    }
}
