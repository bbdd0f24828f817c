//! Sequence tokens and the recency comparator.
//!
//! A token is `"<sequencer> <key>"`: the bucket-assigned sequencer followed by
//! the object key it was emitted for. Sequencers grow monotonically per key but
//! vary in width across events, so the shorter one is left-padded with `'0'`
//! before the lexicographic comparison.

use std::cmp::Ordering;
use std::fmt;

/// A parsed `"<sequencer> <key>"` token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceKey {
    token: String,
    /// Byte offset of the first space, or `token.len()` when there is none.
    split: usize,
}

impl SequenceKey {
    /// Build a token from an event's sequencer and key.
    pub fn new(sequencer: &str, key: &str) -> Self {
        Self::from_token(format!("{sequencer} {key}"))
    }

    /// Parse a stored token. A token without a space is all sequence part
    /// with an empty key.
    pub fn from_token(token: impl Into<String>) -> Self {
        let token = token.into();
        let split = token.find(' ').unwrap_or(token.len());
        Self { token, split }
    }

    pub fn sequence(&self) -> &str {
        &self.token[..self.split]
    }

    pub fn key(&self) -> &str {
        self.token.get(self.split + 1..).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Order two sequence parts after zero-padding to equal width. Keys are
    /// not considered.
    pub fn sequence_cmp(&self, other: &Self) -> Ordering {
        padded_cmp(self.sequence(), other.sequence())
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

impl From<&str> for SequenceKey {
    fn from(token: &str) -> Self {
        Self::from_token(token)
    }
}

impl From<String> for SequenceKey {
    fn from(token: String) -> Self {
        Self::from_token(token)
    }
}

/// What [`compare`] answers when the two tokens carry different keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMismatch {
    /// Accept the new token. Update paths use this: a rename lands on the
    /// same record under a different key.
    Tolerate,
    /// Reject the new token. Delete paths use this: a removal must never
    /// touch state produced for a different key.
    Reject,
}

/// True iff `new` is acceptable as the next state given `old`.
///
/// Equal sequencers compare as acceptable, so an exact replay is never
/// classified as stale.
pub fn compare(old: &SequenceKey, new: &SequenceKey, on_mismatch: KeyMismatch) -> bool {
    if old.key() != new.key() {
        return on_mismatch == KeyMismatch::Tolerate;
    }
    old.sequence_cmp(new) != Ordering::Greater
}

fn padded_cmp(a: &str, b: &str) -> Ordering {
    let width = a.len().max(b.len());
    let a = a.as_bytes();
    let b = b.as_bytes();
    let pad_a = width - a.len();
    let pad_b = width - b.len();

    let byte_at = |bytes: &[u8], pad: usize, i: usize| if i < pad { b'0' } else { bytes[i - pad] };

    (0..width)
        .map(|i| byte_at(a, pad_a, i).cmp(&byte_at(b, pad_b, i)))
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}
