//! # KvStore: Durable Key-Value Storage
//!
//! The persistence layer for the application, built on sled's embedded
//! key-value store. All on-disk data flows through this module.
//!
//! ## Tree Layout
//!
//! | Tree   | Key          | Value                                   |
//! |--------|--------------|-----------------------------------------|
//! | `kv`   | raw key      | raw value                               |
//! | `meta` | `checkpoint` | `u64_be(height) ‖ app_hash` (40 bytes)  |
//!
//! ## Atomicity
//!
//! A commit writes the block's staged batch into `kv` and the new checkpoint
//! into `meta` inside one multi-tree sled transaction, then flushes. After a
//! crash the store holds either the old (data, checkpoint) pair or the new
//! one. Never a mix.
//!
//! ## Isolation
//!
//! Reads take a shared gate and commits take it exclusively, so a `get`
//! never observes a batch that is halfway applied.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use tracing::{debug, info};

use super::app_hash;
use super::batch::WriteBatch;
use super::checkpoint::Checkpoint;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open store at {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: sled::Error,
    },

    #[error("checkpoint record is corrupt ({0} bytes)")]
    CorruptCheckpoint(usize),

    #[error("commit failed: {0}")]
    Commit(#[source] sled::Error),

    #[error("commit aborted before the checkpoint was written")]
    Aborted,

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("store is closed")]
    Closed,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Well-known key in the `meta` tree for the last checkpoint.
const META_CHECKPOINT: &[u8] = b"checkpoint";

// ---------------------------------------------------------------------------
// KvStore
// ---------------------------------------------------------------------------

/// Durable key-value store with atomic batch commit.
///
/// Owned through an `Arc` by whoever needs it. The application is the only
/// writer; any number of readers may call [`get`](Self::get) concurrently.
pub struct KvStore {
    db: Db,
    kv: Tree,
    meta: Tree,
    /// `true` once [`close`](Self::close) has run.
    gate: RwLock<bool>,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("keys", &self.kv.len())
            .field("closed", &*self.gate.read())
            .finish()
    }
}

impl KvStore {
    /// Open or create a store at the given filesystem path.
    ///
    /// Fails if sled cannot open the directory or if the checkpoint record
    /// on disk does not decode.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_db(db)?;
        let height = store.checkpoint()?.map(|c| c.height).unwrap_or(0);
        info!(path = %path.display(), height, keys = store.len(), "store opened");
        Ok(store)
    }

    /// Create a store that lives in a temporary location and is removed when
    /// dropped. Intended for tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let kv = db.open_tree("kv")?;
        let meta = db.open_tree("meta")?;
        let store = Self {
            db,
            kv,
            meta,
            gate: RwLock::new(false),
        };
        // Surface a damaged checkpoint at open time, not at first use.
        store.read_checkpoint()?;
        Ok(store)
    }

    // -- Reads --------------------------------------------------------------

    /// Committed value for `key`, or `None` if the key has never been written.
    pub fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let closed = self.gate.read();
        if *closed {
            return Err(StoreError::Closed);
        }
        Ok(self.kv.get(key)?.map(|v| v.to_vec()))
    }

    /// Committed value for `key` together with the height it was read at.
    /// Both come from the same committed state.
    pub fn get_with_height(&self, key: &[u8]) -> StoreResult<(Option<Vec<u8>>, u64)> {
        let closed = self.gate.read();
        if *closed {
            return Err(StoreError::Closed);
        }
        let value = self.kv.get(key)?.map(|v| v.to_vec());
        let height = self.read_checkpoint()?.map(|c| c.height).unwrap_or(0);
        Ok((value, height))
    }

    /// The last committed checkpoint, or `None` before the first commit.
    pub fn checkpoint(&self) -> StoreResult<Option<Checkpoint>> {
        let closed = self.gate.read();
        if *closed {
            return Err(StoreError::Closed);
        }
        self.read_checkpoint()
    }

    fn read_checkpoint(&self) -> StoreResult<Option<Checkpoint>> {
        match self.meta.get(META_CHECKPOINT)? {
            Some(bytes) => Checkpoint::from_bytes(&bytes)
                .map(Some)
                .ok_or(StoreError::CorruptCheckpoint(bytes.len())),
            None => Ok(None),
        }
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        self.kv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kv.is_empty()
    }

    // -- Commit -------------------------------------------------------------

    /// Apply `batch` and record the checkpoint for `height` in one atomic,
    /// durable step. Returns the new checkpoint.
    ///
    /// The app hash is derived from the post-commit contents (see
    /// [`app_hash`](super::app_hash)).
    pub fn commit_batch(&self, batch: &WriteBatch, height: u64) -> StoreResult<Checkpoint> {
        self.commit_inner(batch, height, false)
    }

    /// Same as [`commit_batch`](Self::commit_batch) but aborts the sled
    /// transaction after the data batch is applied and before the checkpoint
    /// is written, the way a crash at that point would.
    #[cfg(test)]
    pub(crate) fn commit_batch_interrupted(
        &self,
        batch: &WriteBatch,
        height: u64,
    ) -> StoreResult<Checkpoint> {
        self.commit_inner(batch, height, true)
    }

    fn commit_inner(
        &self,
        batch: &WriteBatch,
        height: u64,
        interrupt_before_checkpoint: bool,
    ) -> StoreResult<Checkpoint> {
        let closed = self.gate.write();
        if *closed {
            return Err(StoreError::Closed);
        }

        let app_hash = app_hash::compute(self.kv.iter(), batch).map_err(StoreError::Commit)?;
        let checkpoint = Checkpoint::new(height, app_hash);
        let record = checkpoint.to_bytes();
        let sled_batch = batch.to_sled();

        (&self.kv, &self.meta)
            .transaction(|(kv, meta)| {
                kv.apply_batch(&sled_batch)?;
                if interrupt_before_checkpoint {
                    return Err(ConflictableTransactionError::Abort(()));
                }
                meta.insert(META_CHECKPOINT, record.to_vec())?;
                Ok(())
            })
            .map_err(|e: TransactionError<()>| match e {
                TransactionError::Storage(err) => StoreError::Commit(err),
                TransactionError::Abort(()) => StoreError::Aborted,
            })?;

        self.db.flush().map_err(StoreError::Commit)?;

        debug!(
            height,
            writes = batch.len(),
            app_hash = %checkpoint.app_hash_hex(),
            "batch committed"
        );
        Ok(checkpoint)
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Flush and stop serving reads and commits. Waits for an in-flight
    /// commit to finish first. Calling it again is a no-op.
    pub fn close(&self) -> StoreResult<()> {
        let mut closed = self.gate.write();
        if *closed {
            return Ok(());
        }
        self.db.flush()?;
        *closed = true;
        info!("store closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        *self.gate.read()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
