//! # Transaction Rule
//!
//! A transaction is an opaque byte string of the form `key=value`:
//!
//! - exactly one [`TX_SEPARATOR`] byte,
//! - a non-empty key before it,
//! - a (possibly empty) value after it.
//!
//! Keys and values are raw bytes; they need not be UTF-8. Both `CheckTx` and
//! `DeliverTx` go through [`parse`], so every replica accepts and rejects
//! exactly the same byte strings.

use crate::config::TX_SEPARATOR;

/// Reasons a transaction fails to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxError {
    #[error("transaction is empty")]
    Empty,

    #[error("transaction has no '=' separator")]
    MissingSeparator,

    #[error("transaction has {0} '=' separators, expected exactly one")]
    TooManySeparators(usize),

    #[error("transaction key is empty")]
    EmptyKey,
}

/// A parsed `key=value` transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Parse raw transaction bytes into a key/value pair.
pub fn parse(tx: &[u8]) -> Result<KvPair, TxError> {
    if tx.is_empty() {
        return Err(TxError::Empty);
    }

    let separators = tx.iter().filter(|b| **b == TX_SEPARATOR).count();
    match separators {
        0 => return Err(TxError::MissingSeparator),
        1 => {}
        n => return Err(TxError::TooManySeparators(n)),
    }

    let idx = tx
        .iter()
        .position(|b| *b == TX_SEPARATOR)
        .ok_or(TxError::MissingSeparator)?;
    if idx == 0 {
        return Err(TxError::EmptyKey);
    }

    Ok(KvPair {
        key: tx[..idx].to_vec(),
        value: tx[idx + 1..].to_vec(),
    })
}
