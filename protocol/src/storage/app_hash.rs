//! # App Hash Derivation
//!
//! The app hash is BLAKE3 over the whole committed key space, walked in
//! ascending key order, with every entry framed as:
//!
//! ```text
//! u64_be(len(key)) || key || u64_be(len(value)) || value
//! ```
//!
//! The length prefixes make the encoding injective, so two different states
//! can only collide by breaking BLAKE3. Height, time and randomness are not
//! inputs; the hash depends on store contents alone.
//!
//! During commit the hash is computed over the *post-commit* view without
//! materializing it: the committed entries (already sorted by sled) are
//! merge-joined with the sorted [`WriteBatch`], staged values shadowing
//! committed ones.

use std::cmp::Ordering;

use super::batch::WriteBatch;
use super::checkpoint::APP_HASH_LEN;

/// App hash of `committed` with `staged` applied on top.
///
/// `committed` must yield entries in strictly ascending key order.
pub fn compute<I, K, V, E>(committed: I, staged: &WriteBatch) -> Result<[u8; APP_HASH_LEN], E>
where
    I: IntoIterator<Item = Result<(K, V), E>>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    enum Step {
        Committed,
        Staged,
        Shadowed,
        Done,
    }

    let mut hasher = blake3::Hasher::new();
    let mut committed = committed.into_iter();
    let mut head = committed.next().transpose()?;
    let mut staged = staged.iter().peekable();

    loop {
        let step = match (&head, staged.peek()) {
            (None, None) => Step::Done,
            (Some(_), None) => Step::Committed,
            (None, Some(_)) => Step::Staged,
            (Some((ck, _)), Some((sk, _))) => match Ord::cmp(AsRef::<[u8]>::as_ref(ck), *sk) {
                Ordering::Less => Step::Committed,
                Ordering::Greater => Step::Staged,
                Ordering::Equal => Step::Shadowed,
            },
        };

        match step {
            Step::Done => break,
            Step::Committed => {
                if let Some((key, value)) = head.take() {
                    absorb(&mut hasher, key.as_ref(), value.as_ref());
                }
                head = committed.next().transpose()?;
            }
            Step::Staged => {
                if let Some((key, value)) = staged.next() {
                    absorb(&mut hasher, key, value);
                }
            }
            Step::Shadowed => {
                if let Some((key, value)) = staged.next() {
                    absorb(&mut hasher, key, value);
                }
                head = committed.next().transpose()?;
            }
        }
    }

    Ok(*hasher.finalize().as_bytes())
}

fn absorb(hasher: &mut blake3::Hasher, key: &[u8], value: &[u8]) {
    hasher.update(&(key.len() as u64).to_be_bytes());
    hasher.update(key);
    hasher.update(&(value.len() as u64).to_be_bytes());
    hasher.update(value);
}
