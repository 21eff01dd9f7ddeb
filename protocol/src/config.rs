//! # Protocol Configuration & Constants
//!
//! Every fixed value the application agrees on with its replicas lives here.
//! Anything in the "consensus-critical" sections must be identical on every
//! node of a network; changing it is a hard fork.

// ---------------------------------------------------------------------------
// Application Identity
// ---------------------------------------------------------------------------

/// Application name reported by `Info`.
pub const APP_NAME: &str = "kvchain";

/// Application crate version reported by `Info`.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application protocol version reported by `Info`. Bump when the
/// transaction rule or the app-hash derivation changes.
pub const APP_PROTOCOL_VERSION: u64 = 1;

// ---------------------------------------------------------------------------
// Consensus-Critical: Transaction Rule
// ---------------------------------------------------------------------------

/// The single byte that separates key from value in a transaction.
pub const TX_SEPARATOR: u8 = b'=';

// ---------------------------------------------------------------------------
// Result Codes
// ---------------------------------------------------------------------------

/// Accepted.
pub const CODE_OK: u32 = 0;

/// The transaction does not parse as `key=value`.
pub const CODE_ENCODING_ERROR: u32 = 1;

/// CheckTx only: the key already holds exactly this committed value.
pub const CODE_DUPLICATE: u32 = 2;

/// Query path is not served by this application.
pub const CODE_UNKNOWN_PATH: u32 = 3;

// ---------------------------------------------------------------------------
// Persisted Layout
// ---------------------------------------------------------------------------

/// Directory under the home directory that holds the durable store.
pub const STORE_DIR_NAME: &str = "kvstore";

/// Directory under `$HOME` used when no home directory is given.
pub const DEFAULT_HOME_DIR_NAME: &str = ".cometbft";

/// Settings document, relative to the home directory.
pub const CONFIG_FILE: &str = "config/config.toml";

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Default listen address for out-of-process mode.
pub const DEFAULT_SOCKET_ADDR: &str = "unix://example.sock";

/// Upper bound on a single wire frame. Matches the engine's own limit on
/// ABCI message size (100 MiB).
pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;
