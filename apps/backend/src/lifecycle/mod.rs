//! Service runtime: startup sequencing, model warm-up and graceful shutdown.
//!
//! Starting -> WaitingForModel -> Ready -> Draining -> Stopped, with Failed
//! reachable from Starting and WaitingForModel. If the HTTP server exits on
//! its own while Ready, the runtime goes straight to Stopped and reports the
//! server error. The port record is removed on every path out of `run`,
//! including errors and panics.

pub mod port;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::errors::ServiceError;
use crate::model::{ModelLoadError, ModelLoader, SharedModel};
use crate::routes::build_router;
use crate::state::{AppState, Phase, ServiceState};

use self::port::{PortPublisher, PublishedPort};

/// Runs the service until `shutdown` resolves.
///
/// Returns `Ok(())` after a clean drain. Any failure before the model is
/// loaded ends the run with the corresponding `ServiceError`.
pub async fn run<L, S>(config: &Config, loader: L, shutdown: S) -> Result<(), ServiceError>
where
    L: ModelLoader,
    S: Future<Output = ()>,
{
    // Starting
    let port = port::allocate(config.host)?;
    let addr = SocketAddr::new(config.host, port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServiceError::ResourceUnavailable { addr, source })?;
    let bound = listener
        .local_addr()
        .map_err(|source| ServiceError::ResourceUnavailable { addr, source })?;
    info!("Listening on {bound}");

    let state = Arc::new(ServiceState::new(bound.port()));
    let app = match build_router(AppState::new(state.clone()), &config.allowed_origins) {
        Ok(app) => app,
        Err(e) => {
            state.transition(Phase::Failed);
            return Err(ServiceError::Config(e));
        }
    };
    let record = match PortPublisher::new(&config.port_file).publish(bound.port()) {
        Ok(record) => record,
        Err(e) => {
            state.transition(Phase::Failed);
            return Err(e);
        }
    };

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server: JoinHandle<io::Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    // WaitingForModel
    state.transition(Phase::WaitingForModel);
    info!("Loading model {}...", loader.model_name());
    let load = spawn_loader(loader);

    tokio::pin!(shutdown);
    let outcome = tokio::select! {
        loaded = load => Some(loaded),
        _ = &mut shutdown => {
            info!("Shutdown requested while the model was loading");
            None
        }
        served = &mut server => {
            return fail(&state, record, server_error(served));
        }
    };

    match outcome {
        Some(Ok(model)) => {
            install(&state, model);
            state.transition(Phase::Ready);
            info!("Service ready on port {}", state.port());

            tokio::select! {
                _ = &mut shutdown => {}
                served = &mut server => {
                    return stop_after_server_exit(&state, record, server_error(served));
                }
            }
        }
        Some(Err(e)) => {
            let _ = stop_tx.send(());
            server.abort();
            return fail(&state, record, ServiceError::ModelLoad(e));
        }
        None => {}
    }

    // Draining
    state.transition(Phase::Draining);
    let _ = stop_tx.send(());
    drain(&mut server, config.shutdown_grace).await;

    // Stopped
    record.release();
    state.transition(Phase::Stopped);
    Ok(())
}

/// Waits up to `grace` for in-flight requests, then aborts the server.
/// Returns `false` when the grace period ran out.
async fn drain(server: &mut JoinHandle<io::Result<()>>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, &mut *server).await {
        Ok(Ok(Ok(()))) => info!("In-flight requests drained"),
        Ok(Ok(Err(e))) => warn!("HTTP server exited with error while draining: {e}"),
        Ok(Err(e)) => warn!("HTTP server task ended abnormally: {e}"),
        Err(_) => {
            warn!(
                "Drain exceeded {}ms grace period; dropping remaining connections",
                grace.as_millis()
            );
            server.abort();
            return false;
        }
    }
    true
}

/// Runs the blocking load on its own thread so a shutdown signal can still be
/// observed while it is in progress.
fn spawn_loader<L: ModelLoader>(
    loader: L,
) -> impl Future<Output = Result<SharedModel, ModelLoadError>> {
    let (tx, rx) = oneshot::channel();
    let name = loader.model_name().to_string();
    let spawned = std::thread::Builder::new()
        .name("model-loader".to_string())
        .spawn(move || {
            let _ = tx.send(loader.load());
        });

    async move {
        if let Err(e) = spawned {
            return Err(ModelLoadError::Corrupt {
                path: name.into(),
                reason: format!("could not start loader thread: {e}"),
            });
        }
        rx.await.unwrap_or_else(|_| {
            Err(ModelLoadError::Corrupt {
                path: name.into(),
                reason: "loader panicked".to_string(),
            })
        })
    }
}

fn install(state: &ServiceState, model: SharedModel) {
    info!(
        "Model {} v{} ready: pipeline {:?}, {} vocabulary strings",
        model.name(),
        model.version(),
        model.pipeline(),
        model.vocab_len()
    );
    if let Err(rejected) = state.install_model(model) {
        error!(
            "Model already installed; discarding second instance of {}",
            rejected.name()
        );
    }
}

fn server_error(served: Result<io::Result<()>, tokio::task::JoinError>) -> ServiceError {
    match served {
        Ok(Ok(())) => ServiceError::Server(io::Error::other("HTTP server stopped unexpectedly")),
        Ok(Err(e)) => ServiceError::Server(e),
        Err(e) => ServiceError::Server(io::Error::other(e)),
    }
}

fn fail(
    state: &ServiceState,
    record: PublishedPort,
    err: ServiceError,
) -> Result<(), ServiceError> {
    error!("Startup aborted in phase {}", state.phase());
    state.transition(Phase::Failed);
    record.release();
    Err(err)
}

/// The server is already gone, so there is nothing to drain.
fn stop_after_server_exit(
    state: &ServiceState,
    record: PublishedPort,
    err: ServiceError,
) -> Result<(), ServiceError> {
    error!("HTTP server exited while {}: {err}", state.phase());
    record.release();
    state.transition(Phase::Stopped);
    Err(err)
}

/// Ctrl+C and SIGTERM listeners. The OS handlers are registered by `install`,
/// so a signal arriving before `recv` is first polled is still observed.
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: signal::unix::Signal,
    #[cfg(unix)]
    terminate: signal::unix::Signal,
    #[cfg(windows)]
    ctrl_c: signal::windows::CtrlC,
}

impl ShutdownSignal {
    #[cfg(unix)]
    pub fn install() -> Result<Self, ServiceError> {
        use signal::unix::SignalKind;

        Ok(Self {
            interrupt: signal::unix::signal(SignalKind::interrupt())
                .map_err(ServiceError::Signal)?,
            terminate: signal::unix::signal(SignalKind::terminate())
                .map_err(ServiceError::Signal)?,
        })
    }

    #[cfg(windows)]
    pub fn install() -> Result<Self, ServiceError> {
        Ok(Self {
            ctrl_c: signal::windows::ctrl_c().map_err(ServiceError::Signal)?,
        })
    }

    #[cfg(unix)]
    pub async fn recv(mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => info!("Received SIGINT (Ctrl+C) signal"),
            _ = self.terminate.recv() => info!("Received SIGTERM signal"),
        }
    }

    #[cfg(windows)]
    pub async fn recv(mut self) {
        self.ctrl_c.recv().await;
        info!("Received Ctrl+C signal");
    }
}
