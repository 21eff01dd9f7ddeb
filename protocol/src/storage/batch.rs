//! In-memory write batch staged between commit boundaries.

use std::collections::BTreeMap;

/// Writes staged for the block currently being executed.
///
/// Entries are kept sorted by key so that applying the batch and hashing the
/// resulting state walk keys in the same order on every replica. A later
/// write to the same key replaces the earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    writes: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `key = value`. Last write wins.
    pub fn stage(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Staged writes in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.writes
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Convert into a sled batch for atomic application.
    pub(crate) fn to_sled(&self) -> sled::Batch {
        let mut batch = sled::Batch::default();
        for (key, value) in &self.writes {
            batch.insert(key.as_slice(), value.as_slice());
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let mut batch = WriteBatch::new();
        batch.stage(b"k".to_vec(), b"first".to_vec());
        batch.stage(b"k".to_vec(), b"second".to_vec());

        assert_eq!(batch.len(), 1);
        let staged: Vec<_> = batch.iter().collect();
        assert_eq!(staged, vec![(&b"k"[..], &b"second"[..])]);
    }

    #[test]
    fn iterates_in_key_order() {
        let mut batch = WriteBatch::new();
        batch.stage(b"zebra".to_vec(), b"1".to_vec());
        batch.stage(b"apple".to_vec(), b"2".to_vec());
        batch.stage(b"mango".to_vec(), b"3".to_vec());

        let keys: Vec<&[u8]> = batch.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![&b"apple"[..], &b"mango"[..], &b"zebra"[..]]);
    }
}
