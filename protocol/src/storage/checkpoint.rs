//! The persisted `(height, app hash)` recovery anchor.
//!
//! Encoded as a fixed 40-byte record: the height as big-endian `u64`
//! followed by the 32-byte app hash. Fixed width keeps the on-disk format
//! independent of any serializer version.

/// Length of an app hash in bytes.
pub const APP_HASH_LEN: usize = 32;

const ENCODED_LEN: usize = 8 + APP_HASH_LEN;

/// Last committed height and the app hash of the state at that height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub height: u64,
    pub app_hash: [u8; APP_HASH_LEN],
}

impl Checkpoint {
    pub fn new(height: u64, app_hash: [u8; APP_HASH_LEN]) -> Self {
        Self { height, app_hash }
    }

    pub fn to_bytes(&self) -> [u8; ENCODED_LEN] {
        let mut out = [0u8; ENCODED_LEN];
        out[..8].copy_from_slice(&self.height.to_be_bytes());
        out[8..].copy_from_slice(&self.app_hash);
        out
    }

    /// Decode a stored record. Returns `None` if the length is wrong.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != ENCODED_LEN {
            return None;
        }
        let height = u64::from_be_bytes(bytes[..8].try_into().ok()?);
        let app_hash: [u8; APP_HASH_LEN] = bytes[8..].try_into().ok()?;
        Some(Self { height, app_hash })
    }

    pub fn app_hash_hex(&self) -> String {
        hex::encode(self.app_hash)
    }
}
