//! Bounded concurrent batch acquisition across many simulations.
//!
//! Advancing frames is CPU-bound, so the runner caps in-flight work with a
//! semaphore instead of spawning one unbounded task per instance. Each
//! instance's frames are still generated strictly in order because the
//! per-instance mutex is held for the whole batch of that instance.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::{SimResult, SimulationError};
use crate::manager::SharedInstance;

/// Runs frame batches over a set of instances with bounded parallelism.
pub struct BatchRunner {
    permits: Arc<Semaphore>,
}

impl BatchRunner {
    /// `workers` is the maximum number of instances advanced concurrently.
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Advances every given instance by `frames` frames. Returns the ids
    /// paired with their new frame counts, in completion order.
    pub async fn advance_all(
        &self,
        instances: Vec<(u32, SharedInstance)>,
        frames: usize,
    ) -> SimResult<Vec<(u32, usize)>> {
        let mut tasks = JoinSet::new();
        for (id, instance) in instances {
            let permits = Arc::clone(&self.permits);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| SimulationError::Transport(e.to_string()))?;
                let mut sim = instance.lock().await;
                for _ in 0..frames {
                    sim.advance_one_frame()?;
                }
                debug!(id, frames = sim.frame_count(), "batch advance complete");
                Ok::<_, SimulationError>((id, sim.frame_count()))
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.map_err(|e| SimulationError::Transport(e.to_string()))?;
            results.push(outcome?);
        }
        Ok(results)
    }
}
