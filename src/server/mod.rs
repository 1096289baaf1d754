//! RPC service layer and HTTP server lifecycle.
//!
//! [`RpcService`] is the transport-agnostic surface: one async method per
//! wire operation, holding all shared state (no process-wide globals). The
//! HTTP routes in [`routes`] are thin wrappers that translate between HTTP
//! and these methods; integration tests drive the service directly.
//!
//! [`RpcServer`] owns the listening socket and a graceful shutdown path: a
//! oneshot wired into axum's shutdown future, followed by a join on the
//! serve task so `stop` returns only after in-flight requests drain.

mod routes;

pub use routes::router;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{MicroscopeConfig, ServerConfig};
use crate::error::{SimResult, SimulationError};
use crate::images::encode_frame_tiff;
use crate::manager::SimulationManager;
use crate::simulation::FLUORESCENCE_JSON_NAME;

/// Literal reply of the status probe.
pub const SERVER_STATUS: &str = "SASS RPC server is running.";

/// The operation surface shared by all transports.
pub struct RpcService {
    manager: SimulationManager,
    template: MicroscopeConfig,
}

impl RpcService {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            manager: SimulationManager::new(config.seed),
            template: config.microscope.clone(),
        }
    }

    /// The instance registry, for callers that drive batches directly.
    pub fn manager(&self) -> &SimulationManager {
        &self.manager
    }

    /// Creates a simulation from the given config, or from the server's
    /// template when none is supplied. Returns the new id.
    pub async fn create_simulation(&self, config: Option<MicroscopeConfig>) -> SimResult<u32> {
        let config = config.unwrap_or_else(|| self.template.clone());
        self.manager.create(config).await
    }

    pub async fn delete_simulation(&self, id: u32) -> SimResult<()> {
        self.manager.delete(id).await
    }

    /// Ids of all running simulations, sorted.
    pub async fn list_simulations(&self) -> Vec<u32> {
        let mut ids = self.manager.ids().await;
        ids.sort_unstable();
        ids
    }

    /// Advances the simulation one frame and returns that frame encoded as
    /// a single-page TIFF.
    pub async fn get_next_image(&self, id: u32) -> SimResult<Vec<u8>> {
        let instance = self.manager.get(id).await?;
        let mut sim = instance.lock().await;
        let frame = sim.advance_one_frame()?;
        encode_frame_tiff(&frame, sim.dataset().bit_depth())
    }

    pub async fn get_image_count(&self, id: u32) -> SimResult<usize> {
        Ok(self.manager.get(id).await?.lock().await.frame_count())
    }

    /// Advances the simulation one frame without returning pixels.
    pub async fn increment_time_step(&self, id: u32) -> SimResult<()> {
        let instance = self.manager.get(id).await?;
        instance.lock().await.advance_one_frame()?;
        Ok(())
    }

    pub async fn get_control_signal(&self, id: u32) -> SimResult<f64> {
        Ok(self.manager.get(id).await?.lock().await.control_signal())
    }

    pub async fn set_control_signal(&self, id: u32, value: f64) -> SimResult<()> {
        self.manager
            .get(id)
            .await?
            .lock()
            .await
            .set_control_signal(value);
        Ok(())
    }

    pub async fn get_fov_size(&self, id: u32) -> SimResult<f64> {
        Ok(self.manager.get(id).await?.lock().await.fov_size())
    }

    pub async fn get_object_space_pixel_size(&self, id: u32) -> SimResult<f64> {
        Ok(self
            .manager
            .get(id)
            .await?
            .lock()
            .await
            .object_space_pixel_size())
    }

    pub async fn to_json_fluorescence(&self, id: u32) -> SimResult<String> {
        Ok(self
            .manager
            .get(id)
            .await?
            .lock()
            .await
            .describe_ground_truth())
    }

    pub async fn get_fluorescence_json_name(&self, id: u32) -> SimResult<&'static str> {
        self.manager.get(id).await?;
        Ok(FLUORESCENCE_JSON_NAME)
    }

    pub async fn get_short_true_signal_description(&self, id: u32) -> SimResult<&'static str> {
        Ok(self
            .manager
            .get(id)
            .await?
            .lock()
            .await
            .true_signal_description())
    }

    pub async fn get_true_signal(&self, id: u32, frame: usize) -> SimResult<f64> {
        Ok(self.manager.get(id).await?.lock().await.true_signal(frame))
    }

    pub async fn get_simulation_state(&self, id: u32) -> SimResult<String> {
        Ok(self.manager.get(id).await?.lock().await.state_snapshot())
    }

    /// Liveness probe.
    pub fn server_status(&self) -> &'static str {
        SERVER_STATUS
    }
}

/// A bound, serving HTTP server.
pub struct RpcServer {
    local_addr: SocketAddr,
    serving: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl RpcServer {
    /// Binds the listener and starts serving in a background task.
    pub async fn bind(listen: &str, service: Arc<RpcService>) -> SimResult<Self> {
        let listener = TcpListener::bind(listen).await?;
        let local_addr = listener.local_addr()?;
        let serving = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let app = router(service);
        let serving_flag = Arc::clone(&serving);
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    // Drain when stop() fires or the handle is dropped.
                    let _ = shutdown_rx.await;
                })
                .await;
            serving_flag.store(false, Ordering::SeqCst);
            result
        });

        info!(%local_addr, "server listening");
        Ok(Self {
            local_addr,
            serving,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Address the server actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the serve task is still running.
    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::SeqCst)
    }

    /// Signals shutdown and waits for in-flight requests to drain.
    pub async fn stop(mut self) -> SimResult<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| SimulationError::Transport(e.to_string()))??;
        }
        info!(local_addr = %self.local_addr, "server stopped");
        Ok(())
    }
}
