//! Registry of running simulation instances.
//!
//! The manager owns the id space and the lifecycle of every instance. Ids
//! start at 0 and are handed out by a monotonic counter; a deleted id is
//! never reassigned, so a stale client reference can only ever miss, not
//! silently hit a different simulation.
//!
//! Each instance sits behind its own `tokio::sync::Mutex`, so operations on
//! the same id serialize while operations on different ids proceed in
//! parallel. The registry map itself is guarded by an `RwLock` held only for
//! the lookup, never across an instance operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::config::MicroscopeConfig;
use crate::error::{SimResult, SimulationError};
use crate::simulation::SimulationInstance;

/// Shared handle to one registered simulation.
pub type SharedInstance = Arc<Mutex<SimulationInstance>>;

/// Creates, looks up and deletes simulation instances.
pub struct SimulationManager {
    base_seed: u64,
    next_id: AtomicU32,
    instances: RwLock<HashMap<u32, SharedInstance>>,
}

impl SimulationManager {
    pub fn new(base_seed: u64) -> Self {
        Self {
            base_seed,
            next_id: AtomicU32::new(0),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Builds a new instance from `config` and registers it. The instance is
    /// fully constructed before it becomes visible; a construction error
    /// leaves the registry untouched and the reserved id burned.
    pub async fn create(&self, config: MicroscopeConfig) -> SimResult<u32> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let instance = SimulationInstance::new(id, config, self.base_seed)?;
        self.instances
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(instance)));
        info!(id, "registered simulation");
        Ok(id)
    }

    /// Removes an instance from the registry. Its id is never reused.
    pub async fn delete(&self, id: u32) -> SimResult<()> {
        match self.instances.write().await.remove(&id) {
            Some(_) => {
                info!(id, "deleted simulation");
                Ok(())
            }
            None => Err(SimulationError::UnknownSimulationId(id)),
        }
    }

    /// Looks up a registered instance by id.
    pub async fn get(&self, id: u32) -> SimResult<SharedInstance> {
        self.instances
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SimulationError::UnknownSimulationId(id))
    }

    /// Ids of all currently registered instances, in no particular order.
    pub async fn ids(&self) -> Vec<u32> {
        self.instances.read().await.keys().copied().collect()
    }

    /// Number of currently registered instances.
    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_are_sequential_and_never_reused() {
        let manager = SimulationManager::new(42);
        let a = manager.create(MicroscopeConfig::default()).await.expect("create");
        let b = manager.create(MicroscopeConfig::default()).await.expect("create");
        assert_eq!((a, b), (0, 1));

        manager.delete(a).await.expect("delete");
        let c = manager.create(MicroscopeConfig::default()).await.expect("create");
        assert_eq!(c, 2);
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test]
    async fn test_delete_unknown_id() {
        let manager = SimulationManager::new(42);
        assert!(matches!(
            manager.delete(7).await,
            Err(SimulationError::UnknownSimulationId(7))
        ));
    }

    #[tokio::test]
    async fn test_get_after_delete_misses() {
        let manager = SimulationManager::new(42);
        let id = manager.create(MicroscopeConfig::default()).await.expect("create");
        manager.delete(id).await.expect("delete");
        assert!(manager.get(id).await.is_err());
    }

    #[tokio::test]
    async fn test_instances_are_isolated() {
        let manager = SimulationManager::new(42);
        let a = manager.create(MicroscopeConfig::default()).await.expect("create");
        let b = manager.create(MicroscopeConfig::default()).await.expect("create");

        {
            let instance = manager.get(a).await.expect("get");
            let mut sim = instance.lock().await;
            sim.advance_one_frame().expect("advance");
            sim.advance_one_frame().expect("advance");
        }

        let frames_a = manager.get(a).await.expect("get").lock().await.frame_count();
        let frames_b = manager.get(b).await.expect("get").lock().await.frame_count();
        assert_eq!((frames_a, frames_b), (2, 0));
    }

    #[tokio::test]
    async fn test_invalid_config_burns_id_without_registering() {
        let manager = SimulationManager::new(42);
        let mut bad = MicroscopeConfig::default();
        bad.camera.quantum_efficiency = 2.0;
        assert!(manager.create(bad).await.is_err());
        assert!(manager.is_empty().await);

        let id = manager.create(MicroscopeConfig::default()).await.expect("create");
        assert_eq!(id, 1);
    }
}
