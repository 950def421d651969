use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use authflow_core::error::{AuthflowError, Result};
use authflow_core::traits::Database;

use crate::world::{FakeWorld, WorldState};

/// Savepoint-aware database over a [`FakeWorld`].
///
/// `SAVEPOINT` snapshots the world, `ROLLBACK TO` restores the snapshot and
/// `RELEASE` drops it.
pub struct FakeDatabase {
    world: Arc<FakeWorld>,
    savepoints: Mutex<Vec<(String, WorldState)>>,
    log: Mutex<Vec<String>>,
}

impl FakeDatabase {
    pub fn new(world: Arc<FakeWorld>) -> Self {
        Self {
            world,
            savepoints: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Every savepoint operation so far, as `"begin:name"`, `"release:name"` or `"rollback:name"`.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Number of savepoints currently open.
    pub fn depth(&self) -> usize {
        self.savepoints.lock().unwrap().len()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    /// Position of the innermost savepoint called `name`.
    fn find(&self, stack: &[(String, WorldState)], name: &str) -> Result<usize> {
        stack
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| AuthflowError::Database(format!("no such savepoint: {}", name)))
    }
}

impl Database for FakeDatabase {
    fn begin_savepoint(&self, name: &str) -> BoxFuture<'_, Result<()>> {
        self.savepoints
            .lock()
            .unwrap()
            .push((name.to_string(), self.world.state()));
        self.record(format!("begin:{}", name));
        Box::pin(async { Ok(()) })
    }

    fn release_savepoint(&self, name: &str) -> BoxFuture<'_, Result<()>> {
        let mut stack = self.savepoints.lock().unwrap();
        let result = self.find(&stack, name).map(|idx| stack.truncate(idx));
        drop(stack);
        if result.is_ok() {
            self.record(format!("release:{}", name));
        }
        Box::pin(async move { result })
    }

    fn rollback_to_savepoint(&self, name: &str) -> BoxFuture<'_, Result<()>> {
        let mut stack = self.savepoints.lock().unwrap();
        let result = self.find(&stack, name).map(|idx| {
            let (_, snapshot) = stack[idx].clone();
            stack.truncate(idx);
            self.world.restore(snapshot);
        });
        drop(stack);
        if result.is_ok() {
            self.record(format!("rollback:{}", name));
        }
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rollback_restores_world() {
        let world = Arc::new(FakeWorld::default());
        let db = FakeDatabase::new(world.clone());

        db.begin_savepoint("sp").await.unwrap();
        world.add_user("u1");
        db.rollback_to_savepoint("sp").await.unwrap();

        assert!(world.state().users.is_empty());
        assert_eq!(db.depth(), 0);
        assert_eq!(db.log(), vec!["begin:sp", "rollback:sp"]);
    }

    #[tokio::test]
    async fn test_release_keeps_world() {
        let world = Arc::new(FakeWorld::default());
        let db = FakeDatabase::new(world.clone());

        db.begin_savepoint("sp").await.unwrap();
        world.add_user("u1");
        db.release_savepoint("sp").await.unwrap();

        assert_eq!(world.state().users.len(), 1);
        assert!(db.release_savepoint("sp").await.is_err());
    }
}
