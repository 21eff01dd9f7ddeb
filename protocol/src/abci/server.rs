//! # Socket Server (out-of-process mode)
//!
//! Accepts long-lived connections from the consensus engine. The engine
//! opens one connection per logical channel (consensus, mempool, query, ...);
//! each gets its own task running a strictly sequential loop:
//!
//! ```text
//! read frame ─► dispatch (blocking pool) ─► write response ─► read frame ...
//! ```
//!
//! Responses therefore leave in exactly the order requests arrived, however
//! many requests the engine pipelines ahead. Buffered responses are flushed
//! when the engine sends `Flush` or when no further request is already
//! buffered.
//!
//! A dropped connection is not an error for the server: state lives in the
//! store, and the engine reconnects. A *fatal* application error (failed
//! commit) stops the whole server and is returned to the caller.

use std::future::Future;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::application::{AppError, Application};
use super::codec::{self, CodecError};
use super::net::{Connection, ListenAddr};
use super::types::{Request, Response};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("unix sockets are not supported on this platform")]
    UnixUnsupported,

    #[error("fatal application error: {0}")]
    Fatal(#[source] AppError),

    #[error("connection error: {0}")]
    Codec(#[from] CodecError),

    #[error("dispatch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, std::path::PathBuf),
}

impl Listener {
    async fn accept(&self) -> io::Result<(Connection, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Connection::Tcp(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix(listener, path) => {
                let (stream, _) = listener.accept().await?;
                Ok((Connection::Unix(stream), path.display().to_string()))
            }
        }
    }

    fn cleanup(&self) {
        #[cfg(unix)]
        if let Listener::Unix(_, path) = self {
            if let Err(err) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %err, "failed to remove socket file");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SocketServer
// ---------------------------------------------------------------------------

/// Out-of-process transport bound to one listen address.
pub struct SocketServer {
    listener: Listener,
    app: Arc<Application>,
    local_addr: ListenAddr,
}

impl SocketServer {
    /// Bind the listener. A stale unix socket file left by a previous run is
    /// removed first.
    pub async fn bind(addr: &ListenAddr, app: Arc<Application>) -> Result<Self, ServerError> {
        let bind_err = |source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        };

        let (listener, local_addr) = match addr {
            ListenAddr::Tcp(hostport) => {
                let listener = TcpListener::bind(hostport.as_str()).await.map_err(bind_err)?;
                let local = listener.local_addr().map_err(bind_err)?;
                (Listener::Tcp(listener), ListenAddr::Tcp(local.to_string()))
            }
            #[cfg(unix)]
            ListenAddr::Unix(path) => {
                match std::fs::remove_file(path) {
                    Ok(()) => debug!(path = %path.display(), "removed stale socket file"),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => return Err(bind_err(err)),
                }
                let listener = UnixListener::bind(path).map_err(bind_err)?;
                (
                    Listener::Unix(listener, path.clone()),
                    ListenAddr::Unix(path.clone()),
                )
            }
            #[cfg(not(unix))]
            ListenAddr::Unix(_) => return Err(ServerError::UnixUnsupported),
        };

        Ok(Self {
            listener,
            app,
            local_addr,
        })
    }

    /// The bound address. For `tcp://host:0` this carries the real port.
    pub fn local_addr(&self) -> &ListenAddr {
        &self.local_addr
    }

    /// Serve connections until `shutdown` resolves or a fatal application
    /// error occurs.
    ///
    /// On the way out the server stops accepting, tells every connection to
    /// stop reading, and waits for them. A request already being dispatched
    /// (a commit included) runs to completion and its response is written.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let SocketServer {
            listener,
            app,
            local_addr,
        } = self;
        tokio::pin!(shutdown);

        let (stop_tx, stop_rx) = watch::channel(false);
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<AppError>();
        let mut connections = JoinSet::new();
        let mut next_id: u64 = 0;

        info!(addr = %local_addr, "socket server listening");

        let outcome = loop {
            select! {
                _ = &mut shutdown => {
                    info!("socket server shutting down");
                    break Ok(());
                }
                Some(err) = fatal_rx.recv() => {
                    error!(error = %err, "fatal application error, stopping socket server");
                    break Err(ServerError::Fatal(err));
                }
                accepted = listener.accept() => match accepted {
                    Ok((conn, peer)) => {
                        next_id += 1;
                        info!(conn_id = next_id, peer = %peer, "connection accepted");
                        connections.spawn(handle_connection(
                            conn,
                            next_id,
                            Arc::clone(&app),
                            stop_rx.clone(),
                            fatal_tx.clone(),
                        ));
                    }
                    Err(err) => warn!(error = %err, "failed to accept connection"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = %err, "connection task failed");
                    }
                }
            }
        };

        let _ = stop_tx.send(true);
        while let Some(joined) = connections.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "connection task failed during shutdown");
            }
        }
        listener.cleanup();
        info!(addr = %local_addr, "socket server stopped");

        outcome
    }
}

/// Connection task wrapper: bookkeeping and error logging around
/// [`serve_connection`].
async fn handle_connection(
    conn: Connection,
    conn_id: u64,
    app: Arc<Application>,
    stop: watch::Receiver<bool>,
    fatal: mpsc::UnboundedSender<AppError>,
) {
    let gauge = app.metrics().connections_open.clone();
    gauge.inc();
    match serve_connection(conn, conn_id, app, stop, fatal).await {
        Ok(()) => info!(conn_id, "connection closed"),
        Err(err) => warn!(conn_id, error = %err, "connection closed with error"),
    }
    gauge.dec();
}

/// Sequential request loop for one connection.
async fn serve_connection<S>(
    stream: S,
    conn_id: u64,
    app: Arc<Application>,
    mut stop: watch::Receiver<bool>,
    fatal: mpsc::UnboundedSender<AppError>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(writer);

    loop {
        let request: Request = select! {
            biased;
            _ = stop.changed() => {
                debug!(conn_id, "stop requested, no longer reading");
                break;
            }
            read = codec::read_message(&mut reader) => match read? {
                Some(request) => request,
                None => {
                    debug!(conn_id, "peer hung up");
                    break;
                }
            },
        };

        let method = request.method();
        let explicit_flush = matches!(request, Request::Flush);
        debug!(conn_id, method, "dispatching request");

        // The dispatch is awaited unconditionally: a commit that has started
        // always finishes, whatever happens to the connection.
        let handle = Arc::clone(&app);
        let outcome = tokio::task::spawn_blocking(move || handle.dispatch(request)).await?;

        let response = match outcome {
            Ok(response) => response,
            Err(err) if err.is_fatal() => {
                let _ = codec::write_message(&mut writer, &Response::exception(err.to_string())).await;
                let _ = writer.flush().await;
                let _ = fatal.send(err);
                return Ok(());
            }
            Err(err) => {
                warn!(conn_id, method, error = %err, "request refused");
                Response::exception(err.to_string())
            }
        };

        codec::write_message(&mut writer, &response).await?;
        if explicit_flush || reader.buffer().is_empty() {
            writer.flush().await.map_err(CodecError::from)?;
        }
    }

    writer.flush().await.map_err(CodecError::from)?;
    Ok(())
}
