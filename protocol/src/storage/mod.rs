//! # Storage Module
//!
//! Durable state for the application.
//!
//! ## Architecture
//!
//! ```text
//! batch.rs      WriteBatch: writes staged while a block executes
//! checkpoint.rs (height, app hash) recovery anchor, fixed encoding
//! app_hash.rs   deterministic digest of the committed key space
//! db.rs         sled persistence with atomic batch + checkpoint commit
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! DeliverTx → WriteBatch ──Commit──► KvStore (kv tree + meta/checkpoint)
//!                                       │
//!                 Query / CheckTx ◄─────┘  (committed view only)
//! ```
//!
//! ## Design Decisions
//!
//! 1. **BLAKE3 for the app hash.** Fast, 256-bit output, and the same
//!    function on every architecture.
//!
//! 2. **Two sled trees, one transaction.** User data and the checkpoint live
//!    in separate trees so that a scan of `kv` is exactly the application
//!    state, but both are written by one multi-tree transaction.
//!
//! 3. **Fixed-width checkpoint encoding.** 40 bytes, no serializer version
//!    to drift between replicas or releases.

pub mod app_hash;
pub mod batch;
pub mod checkpoint;
pub mod db;

pub use batch::WriteBatch;
pub use checkpoint::{Checkpoint, APP_HASH_LEN};
pub use db::{KvStore, StoreError, StoreResult};
