//! # Embedded Transport
//!
//! In embedded mode the consensus engine runs in this process and calls the
//! application directly. [`LocalClient`] is the in-memory call adapter: no
//! encoding, one global lock so calls from all of the engine's channels are
//! applied one at a time, exactly as if they had arrived on a socket.
//!
//! A fatal error (a failed commit) is escalated to the supervisor over the
//! client's fatal channel, and the engine sees [`AppError::Halted`].
//!
//! The engine itself is an external collaborator behind [`ConsensusEngine`].
//! It owns networking, signing, and its own run loop; this crate only hands
//! it a client, the settings, and the loaded key material.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::home::{Home, KeyMaterial, Settings};

use super::application::{AppError, Application};
use super::types::*;

/// Synchronous in-process client. Cheap to clone; clones share the lock.
#[derive(Clone)]
pub struct LocalClient {
    app: Arc<Application>,
    /// `true` once shut down. Held for the duration of every call.
    gate: Arc<Mutex<bool>>,
    fatal: Option<mpsc::UnboundedSender<AppError>>,
}

impl std::fmt::Debug for LocalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalClient")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl LocalClient {
    pub fn new(app: Arc<Application>) -> Self {
        Self {
            app,
            gate: Arc::new(Mutex::new(false)),
            fatal: None,
        }
    }

    /// A client that reports fatal application errors on `fatal`.
    pub fn with_fatal(app: Arc<Application>, fatal: mpsc::UnboundedSender<AppError>) -> Self {
        Self {
            fatal: Some(fatal),
            ..Self::new(app)
        }
    }

    fn call<T>(&self, f: impl FnOnce(&Application) -> Result<T, AppError>) -> Result<T, AppError> {
        let closed = self.gate.lock();
        if *closed {
            return Err(AppError::Closed);
        }
        match f(&self.app) {
            Err(err) if err.is_fatal() => match &self.fatal {
                Some(fatal) => {
                    // The receiver is gone once the node is already stopping.
                    let _ = fatal.send(err);
                    Err(AppError::Halted)
                }
                None => Err(err),
            },
            result => result,
        }
    }

    /// Untyped entry point, same semantics as one socket round trip.
    pub fn request(&self, request: Request) -> Result<Response, AppError> {
        self.call(|app| app.dispatch(request))
    }

    pub fn echo(&self, req: RequestEcho) -> Result<ResponseEcho, AppError> {
        self.call(|app| Ok(app.echo(req)))
    }

    pub fn info(&self, req: &RequestInfo) -> Result<ResponseInfo, AppError> {
        self.call(|app| app.info(req))
    }

    pub fn init_chain(&self, req: &RequestInitChain) -> Result<ResponseInitChain, AppError> {
        self.call(|app| app.init_chain(req))
    }

    pub fn query(&self, req: &RequestQuery) -> Result<ResponseQuery, AppError> {
        self.call(|app| app.query(req))
    }

    pub fn check_tx(&self, req: &RequestCheckTx) -> Result<ResponseCheckTx, AppError> {
        self.call(|app| app.check_tx(req))
    }

    pub fn begin_block(&self, req: &RequestBeginBlock) -> Result<ResponseBeginBlock, AppError> {
        self.call(|app| app.begin_block(req))
    }

    pub fn deliver_tx(&self, req: &RequestDeliverTx) -> Result<ResponseDeliverTx, AppError> {
        self.call(|app| app.deliver_tx(req))
    }

    pub fn end_block(&self, req: &RequestEndBlock) -> Result<ResponseEndBlock, AppError> {
        self.call(|app| app.end_block(req))
    }

    pub fn commit(&self) -> Result<ResponseCommit, AppError> {
        self.call(|app| app.commit())
    }

    /// Refuse all further calls. Blocks until a call in progress (a commit
    /// included) has returned. Idempotent.
    pub fn shutdown(&self) {
        *self.gate.lock() = true;
    }

    pub fn is_closed(&self) -> bool {
        *self.gate.lock()
    }
}

// ---------------------------------------------------------------------------
// Engine Contract
// ---------------------------------------------------------------------------

/// Everything an embedded engine receives at start.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub client: LocalClient,
    pub home: Home,
    pub settings: Settings,
    pub keys: KeyMaterial,
}

/// An in-process consensus engine.
///
/// `start` must return once the engine is running (its own tasks or threads
/// keep going in the background). `stop` must halt the engine and return
/// after its last call into the client has finished. Both run on the
/// blocking pool, so they may block.
pub trait ConsensusEngine: Send + 'static {
    fn start(&mut self, ctx: EngineContext) -> anyhow::Result<()>;

    fn stop(&mut self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::KvStore;

    fn client() -> LocalClient {
        let store = Arc::new(KvStore::open_temporary().expect("temp store"));
        LocalClient::new(Arc::new(Application::new(store).expect("app")))
    }

    #[test]
    fn drives_a_block_without_encoding() {
        let client = client();
        client
            .begin_block(&RequestBeginBlock {
                height: 1,
                ..Default::default()
            })
            .unwrap();
        assert!(client
            .deliver_tx(&RequestDeliverTx { tx: b"k=v".to_vec() })
            .unwrap()
            .is_ok());
        client.end_block(&RequestEndBlock { height: 1 }).unwrap();
        let commit = client.commit().unwrap();
        assert_eq!(commit.height, 1);

        let res = client
            .query(&RequestQuery {
                data: b"k".to_vec(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(res.value, Some(b"v".to_vec()));
    }

    #[test]
    fn clones_share_the_closed_flag() {
        let client = client();
        let other = client.clone();
        client.shutdown();
        client.shutdown();

        assert!(other.is_closed());
        assert!(matches!(
            other.info(&RequestInfo::default()),
            Err(AppError::Closed)
        ));
        assert!(matches!(other.request(Request::Flush), Err(AppError::Closed)));
    }

    #[test]
    fn fatal_errors_are_escalated() {
        let store = Arc::new(KvStore::open_temporary().expect("temp store"));
        let app = Arc::new(Application::new(Arc::clone(&store)).expect("app"));
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        let client = LocalClient::with_fatal(app, fatal_tx);

        client
            .begin_block(&RequestBeginBlock {
                height: 1,
                ..Default::default()
            })
            .unwrap();
        client
            .deliver_tx(&RequestDeliverTx { tx: b"k=v".to_vec() })
            .unwrap();
        client.end_block(&RequestEndBlock { height: 1 }).unwrap();
        store.close().unwrap();

        let err = client.commit().unwrap_err();
        assert!(matches!(err, AppError::Halted));
        let reported = fatal_rx.try_recv().expect("fatal error reported");
        assert!(matches!(reported, AppError::CommitFailed(_)));

        // Every later call into the halted application is reported too.
        assert!(matches!(
            client.end_block(&RequestEndBlock { height: 1 }),
            Err(AppError::Halted)
        ));
        assert!(matches!(fatal_rx.try_recv(), Ok(AppError::Halted)));
    }

    #[test]
    fn misuse_is_returned_to_the_caller() {
        let store = Arc::new(KvStore::open_temporary().expect("temp store"));
        let app = Arc::new(Application::new(store).expect("app"));
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        let client = LocalClient::with_fatal(app, fatal_tx);

        assert!(matches!(
            client.commit(),
            Err(AppError::NoBlockInProgress("commit"))
        ));
        assert!(fatal_rx.try_recv().is_err());
    }

    #[test]
    fn same_semantics_as_the_socket_path() {
        let client = client();
        let err = client.commit().unwrap_err();
        assert!(matches!(err, AppError::NoBlockInProgress("commit")));
    }
}
