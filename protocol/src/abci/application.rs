//! # Application State Machine
//!
//! The deterministic key-value application driven by the consensus engine.
//!
//! ## Block Phases
//!
//! ```text
//!            BeginBlock            Commit (store ok)
//!   Idle ───────────────► BlockInProgress ──► Committing ──► Idle
//!                          │  DeliverTx*             │
//!                          │  EndBlock               └─(store error)──► Halted
//! ```
//!
//! - Only one write batch exists at a time; it lives inside the phase slot.
//! - `DeliverTx` outcomes depend on the transaction bytes alone, so every
//!   replica stages and rejects identically.
//! - `CheckTx`, `Query` and `Info` never touch the phase slot. They read the
//!   last committed state from the store and may run concurrently with block
//!   execution.
//! - `Halted` is terminal. A failed commit leaves the durable state at the
//!   previous checkpoint, and continuing would fork this replica, so the
//!   error is fatal and is escalated by the transport.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::config::{
    APP_NAME, APP_PROTOCOL_VERSION, APP_VERSION, CODE_DUPLICATE, CODE_ENCODING_ERROR, CODE_OK,
    CODE_UNKNOWN_PATH,
};
use crate::metrics::AppMetrics;
use crate::storage::{KvStore, StoreError, WriteBatch};
use crate::transaction;

use super::types::*;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Reasons the application refuses a request.
///
/// Everything except [`CommitFailed`](AppError::CommitFailed) and
/// [`Halted`](AppError::Halted) is a protocol-misuse report: the request is
/// refused, nothing changes, and the application keeps serving.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0} requires a block in progress (call BeginBlock first)")]
    NoBlockInProgress(&'static str),

    #[error("block {0} is already in progress")]
    BlockInProgress(u64),

    #[error("a commit is in progress")]
    Committing,

    #[error("height {got} does not follow last committed height {last}")]
    HeightMismatch { last: u64, got: u64 },

    #[error("EndBlock for height {got} while executing block {expected}")]
    EndBlockMismatch { expected: u64, got: u64 },

    #[error("InitChain after height {0} was already committed")]
    AlreadyInitialized(u64),

    #[error("application halted after a failed commit")]
    Halted,

    #[error("application client is closed")]
    Closed,

    #[error("commit failed: {0}")]
    CommitFailed(#[source] StoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl AppError {
    /// Fatal errors mean this replica can no longer be trusted to follow the
    /// chain; the process must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::CommitFailed(_) | AppError::Halted)
    }
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// Observable block-execution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    BlockInProgress,
    Committing,
    Halted,
}

/// Writes and bookkeeping for the block being executed.
#[derive(Debug)]
struct BlockState {
    height: u64,
    batch: WriteBatch,
    delivered: u64,
    rejected: u64,
}

#[derive(Debug)]
enum Slot {
    Idle,
    InProgress(BlockState),
    Committing,
    Halted,
}

impl Slot {
    fn phase(&self) -> Phase {
        match self {
            Slot::Idle => Phase::Idle,
            Slot::InProgress(_) => Phase::BlockInProgress,
            Slot::Committing => Phase::Committing,
            Slot::Halted => Phase::Halted,
        }
    }

    /// The error for calling `method` in this phase when it needs a block.
    fn refusal(&self, method: &'static str) -> AppError {
        match self {
            Slot::Idle => AppError::NoBlockInProgress(method),
            Slot::InProgress(state) => AppError::BlockInProgress(state.height),
            Slot::Committing => AppError::Committing,
            Slot::Halted => AppError::Halted,
        }
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// The key-value application.
///
/// Shared by transports through an `Arc`. All methods take `&self`; block
/// execution is serialized by the internal phase slot.
pub struct Application {
    store: Arc<KvStore>,
    slot: Mutex<Slot>,
    metrics: AppMetrics,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("store", &self.store)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Application {
    /// Bind a new application to an opened store.
    pub fn new(store: Arc<KvStore>) -> Result<Self, AppError> {
        let metrics = AppMetrics::new()?;
        if let Some(cp) = store.checkpoint()? {
            metrics.committed_height.set(cp.height as i64);
            info!(height = cp.height, app_hash = %cp.app_hash_hex(), "resuming from checkpoint");
        } else {
            info!("no checkpoint found, starting from genesis");
        }

        Ok(Self {
            store,
            slot: Mutex::new(Slot::Idle),
            metrics,
        })
    }

    pub fn store(&self) -> &Arc<KvStore> {
        &self.store
    }

    pub fn metrics(&self) -> &AppMetrics {
        &self.metrics
    }

    pub fn phase(&self) -> Phase {
        self.slot.lock().phase()
    }

    fn last_height(&self) -> Result<u64, AppError> {
        Ok(self.store.checkpoint()?.map(|cp| cp.height).unwrap_or(0))
    }

    // -- Connection / info methods -------------------------------------------

    pub fn echo(&self, req: RequestEcho) -> ResponseEcho {
        ResponseEcho {
            message: req.message,
        }
    }

    pub fn info(&self, req: &RequestInfo) -> Result<ResponseInfo, AppError> {
        let checkpoint = self.store.checkpoint()?;
        debug!(engine_version = %req.version, "info requested");

        Ok(ResponseInfo {
            data: APP_NAME.to_string(),
            version: APP_VERSION.to_string(),
            app_version: APP_PROTOCOL_VERSION,
            last_block_height: checkpoint.map(|c| c.height).unwrap_or(0),
            last_block_app_hash: checkpoint.map(|c| c.app_hash.to_vec()).unwrap_or_default(),
        })
    }

    pub fn init_chain(&self, req: &RequestInitChain) -> Result<ResponseInitChain, AppError> {
        let slot = self.slot.lock();
        match &*slot {
            Slot::Idle => {}
            other => return Err(other.refusal("init_chain")),
        }

        let last = self.last_height()?;
        if last > 0 {
            return Err(AppError::AlreadyInitialized(last));
        }

        info!(
            chain_id = %req.chain_id,
            initial_height = req.initial_height,
            app_state_bytes = req.app_state_bytes.len(),
            "chain initialized"
        );
        Ok(ResponseInitChain {
            app_hash: Vec::new(),
            validators: Vec::new(),
        })
    }

    // -- Mempool / query methods (committed view only) -----------------------

    /// Admission check. Reads committed state only; never sees the open batch.
    pub fn check_tx(&self, req: &RequestCheckTx) -> Result<ResponseCheckTx, AppError> {
        self.metrics.check_tx_total.inc();

        let pair = match transaction::parse(&req.tx) {
            Ok(pair) => pair,
            Err(e) => {
                self.metrics.txs_rejected_total.inc();
                return Ok(ResponseCheckTx {
                    code: CODE_ENCODING_ERROR,
                    log: e.to_string(),
                });
            }
        };

        if self.store.get(&pair.key)?.as_deref() == Some(pair.value.as_slice()) {
            self.metrics.txs_rejected_total.inc();
            return Ok(ResponseCheckTx {
                code: CODE_DUPLICATE,
                log: "key already holds this value".to_string(),
            });
        }

        Ok(ResponseCheckTx {
            code: CODE_OK,
            log: String::new(),
        })
    }

    /// Committed-state lookup. `data` is the key.
    pub fn query(&self, req: &RequestQuery) -> Result<ResponseQuery, AppError> {
        match req.path.as_str() {
            "" | "/key" | "/store" => {}
            other => {
                return Ok(ResponseQuery {
                    code: CODE_UNKNOWN_PATH,
                    log: format!("unknown query path {other:?}"),
                    key: req.data.clone(),
                    value: None,
                    height: self.last_height()?,
                });
            }
        }

        let (value, height) = self.store.get_with_height(&req.data)?;
        let log = if value.is_some() {
            "exists"
        } else {
            "does not exist"
        };

        Ok(ResponseQuery {
            code: CODE_OK,
            log: log.to_string(),
            key: req.data.clone(),
            value,
            height,
        })
    }

    // -- Consensus methods (serialized by the phase slot) --------------------

    pub fn begin_block(&self, req: &RequestBeginBlock) -> Result<ResponseBeginBlock, AppError> {
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Idle => {}
            Slot::InProgress(state) => return Err(AppError::BlockInProgress(state.height)),
            other => return Err(other.refusal("begin_block")),
        }

        let last = self.last_height()?;
        if req.height != last + 1 {
            return Err(AppError::HeightMismatch {
                last,
                got: req.height,
            });
        }

        debug!(height = req.height, "block started");
        *slot = Slot::InProgress(BlockState {
            height: req.height,
            batch: WriteBatch::new(),
            delivered: 0,
            rejected: 0,
        });
        Ok(ResponseBeginBlock {})
    }

    /// Execute a transaction in the open block. Malformed transactions get
    /// `CODE_ENCODING_ERROR` and stage nothing.
    pub fn deliver_tx(&self, req: &RequestDeliverTx) -> Result<ResponseDeliverTx, AppError> {
        let mut slot = self.slot.lock();
        let state = match &mut *slot {
            Slot::InProgress(state) => state,
            other => return Err(other.refusal("deliver_tx")),
        };

        match transaction::parse(&req.tx) {
            Ok(pair) => {
                debug!(
                    height = state.height,
                    key = %String::from_utf8_lossy(&pair.key),
                    "tx staged"
                );
                state.batch.stage(pair.key, pair.value);
                state.delivered += 1;
                self.metrics.txs_delivered_total.inc();
                Ok(ResponseDeliverTx {
                    code: CODE_OK,
                    log: String::new(),
                })
            }
            Err(e) => {
                state.rejected += 1;
                self.metrics.txs_rejected_total.inc();
                Ok(ResponseDeliverTx {
                    code: CODE_ENCODING_ERROR,
                    log: e.to_string(),
                })
            }
        }
    }

    pub fn end_block(&self, req: &RequestEndBlock) -> Result<ResponseEndBlock, AppError> {
        let slot = self.slot.lock();
        match &*slot {
            Slot::InProgress(state) if state.height == req.height => {
                Ok(ResponseEndBlock::default())
            }
            Slot::InProgress(state) => Err(AppError::EndBlockMismatch {
                expected: state.height,
                got: req.height,
            }),
            other => Err(other.refusal("end_block")),
        }
    }

    /// Persist the open block atomically and return the new height and app
    /// hash. A store failure here halts the application.
    pub fn commit(&self) -> Result<ResponseCommit, AppError> {
        let state = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, Slot::Committing) {
                Slot::InProgress(state) => state,
                other => {
                    let err = other.refusal("commit");
                    *slot = other;
                    return Err(err);
                }
            }
        };

        let timer = self.metrics.commit_duration_seconds.start_timer();
        match self.store.commit_batch(&state.batch, state.height) {
            Ok(checkpoint) => {
                timer.observe_duration();
                *self.slot.lock() = Slot::Idle;

                self.metrics.blocks_committed_total.inc();
                self.metrics.committed_height.set(checkpoint.height as i64);
                info!(
                    height = checkpoint.height,
                    writes = state.batch.len(),
                    delivered = state.delivered,
                    rejected = state.rejected,
                    app_hash = %checkpoint.app_hash_hex(),
                    "block committed"
                );

                Ok(ResponseCommit {
                    height: checkpoint.height,
                    app_hash: checkpoint.app_hash.to_vec(),
                })
            }
            Err(err) => {
                timer.stop_and_discard();
                *self.slot.lock() = Slot::Halted;
                error!(height = state.height, error = %err, "commit failed, halting application");
                Err(AppError::CommitFailed(err))
            }
        }
    }

    // -- Dispatch -------------------------------------------------------------

    /// Route a typed request to its handler.
    pub fn dispatch(&self, request: Request) -> Result<Response, AppError> {
        Ok(match request {
            Request::Echo(req) => Response::Echo(self.echo(req)),
            Request::Flush => Response::Flush,
            Request::Info(req) => Response::Info(self.info(&req)?),
            Request::InitChain(req) => Response::InitChain(self.init_chain(&req)?),
            Request::Query(req) => Response::Query(self.query(&req)?),
            Request::BeginBlock(req) => Response::BeginBlock(self.begin_block(&req)?),
            Request::CheckTx(req) => Response::CheckTx(self.check_tx(&req)?),
            Request::DeliverTx(req) => Response::DeliverTx(self.deliver_tx(&req)?),
            Request::EndBlock(req) => Response::EndBlock(self.end_block(&req)?),
            Request::Commit => Response::Commit(self.commit()?),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
