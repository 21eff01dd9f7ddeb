//! # Process Supervisor
//!
//! Owns the node from startup to shutdown:
//!
//! ```text
//!  bootstrap()              start()                    run_until()
//! ───────────► Starting ───────────► Running ──(signal | stop | fatal)──► Stopping ──► Stopped
//!  load settings/keys       bind one transport          drain in-flight requests,
//!  open store once                                      close the store
//!  build Application
//! ```
//!
//! Exactly one transport is started per process, selected at runtime by
//! [`RunMode`]. The store is opened once in [`Supervisor::bootstrap`] and the
//! same `Arc<KvStore>` is the only handle any transport ever sees.

use std::future::Future;
use std::sync::Arc;

use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::abci::local::{ConsensusEngine, EngineContext, LocalClient};
use crate::abci::net::ListenAddr;
use crate::abci::server::{ServerError, SocketServer};
use crate::abci::{AppError, Application};
use crate::home::{ConfigError, Home, KeyMaterial, Settings};
use crate::storage::{KvStore, StoreError};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("application error: {0}")]
    App(#[from] AppError),

    #[error("transport error: {0}")]
    Server(#[from] ServerError),

    #[error("consensus engine error: {0:#}")]
    Engine(anyhow::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Which transport the node runs. Mutually exclusive by construction.
pub enum RunMode {
    /// Out-of-process: serve the engine over a socket.
    Socket { listen: ListenAddr },
    /// In-process: hand a [`LocalClient`] to an embedded engine.
    Embedded { engine: Box<dyn ConsensusEngine> },
}

impl RunMode {
    pub fn name(&self) -> &'static str {
        match self {
            RunMode::Socket { .. } => "socket",
            RunMode::Embedded { .. } => "embedded",
        }
    }
}

impl std::fmt::Debug for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Socket { listen } => f.debug_struct("Socket").field("listen", listen).finish(),
            RunMode::Embedded { .. } => f.debug_struct("Embedded").finish_non_exhaustive(),
        }
    }
}

#[derive(Debug)]
pub struct SupervisorOptions {
    pub home: Home,
    pub mode: RunMode,
    /// Settings already loaded by the caller. `None` loads them from `home`.
    pub settings: Option<Settings>,
}

/// Cloneable control handle for a node.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    stop: Arc<watch::Sender<bool>>,
    state: watch::Receiver<Lifecycle>,
}

impl NodeHandle {
    /// Ask the node to shut down. Safe to call any number of times, from
    /// anywhere, in any state.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn state(&self) -> Lifecycle {
        *self.state.borrow()
    }

    /// Resolves once the node has fully stopped.
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == Lifecycle::Stopped).await;
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// The transport chosen at bootstrap, with whatever it needs to start.
enum Pending {
    Socket(ListenAddr),
    Embedded {
        engine: Box<dyn ConsensusEngine>,
        keys: KeyMaterial,
    },
}

/// A bootstrapped node in the `Starting` state.
pub struct Supervisor {
    home: Home,
    settings: Settings,
    store: Arc<KvStore>,
    app: Arc<Application>,
    pending: Pending,
    state: watch::Sender<Lifecycle>,
    stop: Arc<watch::Sender<bool>>,
}

impl Supervisor {
    /// Load configuration, open the store and build the application.
    ///
    /// Configuration is fully validated before the store is touched. In
    /// embedded mode the settings document and both key files are required.
    pub fn bootstrap(options: SupervisorOptions) -> Result<Self, SupervisorError> {
        let SupervisorOptions {
            home,
            mode,
            settings,
        } = options;
        let mode_name = mode.name();
        let embedded = matches!(mode, RunMode::Embedded { .. });

        let settings = match settings {
            Some(settings) => {
                settings.validate()?;
                settings
            }
            None => home.load_settings(embedded)?,
        };
        let pending = match mode {
            RunMode::Socket { listen } => Pending::Socket(listen),
            RunMode::Embedded { engine } => Pending::Embedded {
                engine,
                keys: home.load_keys(&settings)?,
            },
        };

        let store = Arc::new(KvStore::open(home.store_dir())?);
        let app = Arc::new(Application::new(Arc::clone(&store))?);
        info!(
            home = %home.root().display(),
            mode = mode_name,
            moniker = %settings.moniker,
            "node bootstrapped"
        );

        Ok(Self {
            home,
            settings,
            store,
            app,
            pending,
            state: watch::channel(Lifecycle::Starting).0,
            stop: Arc::new(watch::channel(false).0),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            stop: Arc::clone(&self.stop),
            state: self.state.subscribe(),
        }
    }

    /// Start the selected transport and enter `Running`.
    ///
    /// On failure the store is closed and the node ends in `Stopped`.
    pub async fn start(self) -> Result<RunningNode, SupervisorError> {
        let Supervisor {
            home,
            settings,
            store,
            app,
            pending,
            state,
            stop,
        } = self;

        let transport = match pending {
            Pending::Socket(listen) => {
                match SocketServer::bind(&listen, Arc::clone(&app)).await {
                    Ok(server) => Transport::Socket(server),
                    Err(err) => {
                        close_store(&store, &state).await;
                        return Err(err.into());
                    }
                }
            }
            Pending::Embedded { mut engine, keys } => {
                let (fatal_tx, fatal) = mpsc::unbounded_channel();
                let client = LocalClient::with_fatal(Arc::clone(&app), fatal_tx);
                let ctx = EngineContext {
                    client: client.clone(),
                    home,
                    settings,
                    keys,
                };
                let started = tokio::task::spawn_blocking(move || engine.start(ctx).map(|()| engine)).await;
                match started {
                    Ok(Ok(engine)) => Transport::Embedded {
                        engine,
                        client,
                        fatal,
                    },
                    Ok(Err(err)) => {
                        close_store(&store, &state).await;
                        return Err(SupervisorError::Engine(err));
                    }
                    Err(join) => {
                        close_store(&store, &state).await;
                        return Err(join.into());
                    }
                }
            }
        };

        state.send_replace(Lifecycle::Running);
        info!(transport = transport.name(), "node running");

        Ok(RunningNode {
            transport,
            store,
            state,
            stop,
        })
    }
}

// ---------------------------------------------------------------------------
// RunningNode
// ---------------------------------------------------------------------------

enum Transport {
    Socket(SocketServer),
    Embedded {
        engine: Box<dyn ConsensusEngine>,
        client: LocalClient,
        fatal: mpsc::UnboundedReceiver<AppError>,
    },
}

impl Transport {
    fn name(&self) -> &'static str {
        match self {
            Transport::Socket(_) => "socket",
            Transport::Embedded { .. } => "embedded",
        }
    }
}

/// A node in the `Running` state.
pub struct RunningNode {
    transport: Transport,
    store: Arc<KvStore>,
    state: watch::Sender<Lifecycle>,
    stop: Arc<watch::Sender<bool>>,
}

impl RunningNode {
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            stop: Arc::clone(&self.stop),
            state: self.state.subscribe(),
        }
    }

    /// The bound socket address, in socket mode.
    pub fn listen_addr(&self) -> Option<&ListenAddr> {
        match &self.transport {
            Transport::Socket(server) => Some(server.local_addr()),
            Transport::Embedded { .. } => None,
        }
    }

    /// Run until `signal` resolves, [`NodeHandle::stop`] is called, or the
    /// transport fails fatally. Then drain, close the store, and return.
    ///
    /// `Ok(())` means a clean shutdown. A fatal transport error is returned
    /// after the store has been closed.
    pub async fn run_until<F>(self, signal: F) -> Result<(), SupervisorError>
    where
        F: Future<Output = ()> + Send,
    {
        let RunningNode {
            transport,
            store,
            state,
            stop,
        } = self;

        let mut stop_rx = stop.subscribe();
        let shutdown = async {
            select! {
                _ = signal => info!("termination signal received"),
                _ = stop_rx.wait_for(|requested| *requested) => info!("stop requested"),
            }
            state.send_replace(Lifecycle::Stopping);
        };

        let outcome = match transport {
            Transport::Socket(server) => server.run_until(shutdown).await.map_err(SupervisorError::from),
            Transport::Embedded {
                mut engine,
                client,
                mut fatal,
            } => {
                let failure = select! {
                    _ = shutdown => None,
                    Some(err) = fatal.recv() => {
                        error!(error = %err, "fatal application error, stopping embedded engine");
                        Some(err)
                    }
                };
                state.send_replace(Lifecycle::Stopping);
                let stopped = tokio::task::spawn_blocking(move || {
                    let stopped = engine.stop();
                    // Waits for a call already inside the application.
                    client.shutdown();
                    stopped
                })
                .await
                .map_err(SupervisorError::from)
                .and_then(|stopped| stopped.map_err(SupervisorError::Engine));
                match failure {
                    Some(err) => {
                        if let Err(stop_err) = stopped {
                            warn!(error = %stop_err, "engine did not stop cleanly");
                        }
                        Err(SupervisorError::App(err))
                    }
                    None => stopped,
                }
            }
        };

        if let Err(err) = &outcome {
            error!(error = %err, "node stopping after failure");
        }
        state.send_replace(Lifecycle::Stopping);
        close_store(&store, &state).await;
        info!("node stopped");
        outcome
    }
}

/// Close the store on the blocking pool and enter `Stopped`.
async fn close_store(store: &Arc<KvStore>, state: &watch::Sender<Lifecycle>) {
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || store.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "failed to close store cleanly"),
        Err(err) => warn!(error = %err, "store close task failed"),
    }
    state.send_replace(Lifecycle::Stopped);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket_options(dir: &std::path::Path) -> SupervisorOptions {
        SupervisorOptions {
            home: Home::new(dir),
            mode: RunMode::Socket {
                listen: "tcp://127.0.0.1:0".parse().unwrap(),
            },
            settings: None,
        }
    }

    #[tokio::test]
    async fn lifecycle_runs_through_every_state() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::bootstrap(socket_options(dir.path())).unwrap();
        let handle = supervisor.handle();
        assert_eq!(handle.state(), Lifecycle::Starting);

        let node = supervisor.start().await.unwrap();
        assert_eq!(handle.state(), Lifecycle::Running);
        assert!(node.listen_addr().is_some());

        let task = tokio::spawn(node.run_until(std::future::pending()));
        handle.stop();
        handle.stop();
        task.await.unwrap().unwrap();
        assert_eq!(handle.state(), Lifecycle::Stopped);

        // Stopping a stopped node is a no-op.
        handle.stop();
        assert_eq!(handle.state(), Lifecycle::Stopped);
    }

    #[tokio::test]
    async fn signal_future_triggers_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let node = Supervisor::bootstrap(socket_options(dir.path()))
            .unwrap()
            .start()
            .await
            .unwrap();
        let handle = node.handle();
        node.run_until(async {}).await.unwrap();
        assert_eq!(handle.state(), Lifecycle::Stopped);
    }

    #[test]
    fn invalid_settings_abort_before_the_store_opens() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = socket_options(dir.path());
        options.settings = Some(Settings {
            abci: "bogus".into(),
            ..Settings::default()
        });

        let err = Supervisor::bootstrap(options).err().expect("bootstrap must fail");
        assert!(matches!(err, SupervisorError::Config(ConfigError::Invalid { .. })));
        assert!(!Home::new(dir.path()).store_dir().exists());
    }
}
