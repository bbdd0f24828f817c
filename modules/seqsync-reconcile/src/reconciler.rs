//! Conditional read-compare-write cycles against the attribute store.
//!
//! Every write is guarded on the stored `S3_Sequencer`: "absent" for the first
//! write to a record, "equals what we just read" afterwards. A lost race shows
//! up as a failed precondition and the cycle restarts from the read. Adapter
//! failures are retried the same way and share the attempt budget.

use std::fmt;

use tracing::{debug, info, warn};

use seqsync_common::{
    Attribute, AttributeMap, AttributeSelector, Expectation, Precondition, WriteOutcome, KEY_ATTR,
    SEQUENCER_ATTR,
};

use crate::retry::RetryPolicy;
use crate::sequencer::{compare, KeyMismatch, SequenceKey};
use crate::traits::{AttributeStore, DisplacedKeyHandler, NoopDisplacedKey};

/// Terminal result of one reconciler operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// First write to a record that did not exist.
    Created,
    /// Newer state committed over an existing record.
    Updated,
    /// The stored sequencer already equals the incoming one; nothing written.
    AlreadyCurrent,
    /// Record removed.
    Deleted,
    /// Auxiliary attribute cleared.
    Cleared,
    /// Nothing stored for the target; delete and clear are no-ops.
    Absent,
    /// Incoming sequencer ranks below the stored one (or, for deletes and
    /// clears, belongs to a different key). Dropped.
    Stale,
    /// Every attempt lost a race or hit an adapter failure.
    Exhausted { attempts: u32 },
}

impl ReconcileOutcome {
    /// Boolean contract of the reconciler: true unless the event was stale or
    /// the retry budget ran out.
    pub fn succeeded(&self) -> bool {
        !matches!(self, Self::Stale | Self::Exhausted { .. })
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::AlreadyCurrent => write!(f, "already_current"),
            Self::Deleted => write!(f, "deleted"),
            Self::Cleared => write!(f, "cleared"),
            Self::Absent => write!(f, "absent"),
            Self::Stale => write!(f, "stale"),
            Self::Exhausted { attempts } => write!(f, "exhausted after {attempts} attempts"),
        }
    }
}

/// Result of a single read-compare-write cycle.
enum Attempt {
    Committed(ReconcileOutcome),
    Stale,
    ConditionFailed,
    AdapterError(anyhow::Error),
}

#[derive(Clone, Copy)]
enum Operation {
    Update,
    Delete,
    Clear,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Clear => write!(f, "clear"),
        }
    }
}

/// Applies sequenced updates and deletes to records in an [`AttributeStore`].
pub struct Reconciler<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: AttributeStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply `attributes` to `target_id` unless a newer sequencer is stored.
    /// A displaced key is ignored.
    pub async fn apply_update(
        &self,
        seq: &SequenceKey,
        target_id: &str,
        attributes: &[Attribute],
    ) -> ReconcileOutcome {
        self.apply_update_with(seq, target_id, attributes, &NoopDisplacedKey)
            .await
    }

    /// Apply `attributes` to `target_id` unless a newer sequencer is stored.
    ///
    /// `S3_Sequencer` and `S3_Key` are always written from `seq`, overriding
    /// any caller-supplied values. When the record last reflected another
    /// object key, `on_displaced` is told about it once before the commit.
    pub async fn apply_update_with(
        &self,
        seq: &SequenceKey,
        target_id: &str,
        attributes: &[Attribute],
        on_displaced: &dyn DisplacedKeyHandler,
    ) -> ReconcileOutcome {
        let write_set = stamped(seq, attributes);
        let mut notified: Option<String> = None;

        for attempt in 0..self.retry.max_attempts() {
            let result = self
                .update_attempt(seq, target_id, &write_set, on_displaced, &mut notified)
                .await;
            if let Some(outcome) = self.settle(Operation::Update, target_id, seq, attempt, result) {
                return outcome;
            }
            self.pause(attempt).await;
        }

        self.exhausted(Operation::Update, target_id, seq)
    }

    /// Remove `target_id` if its stored sequencer is not newer than `seq` and
    /// belongs to the same key.
    pub async fn apply_delete(&self, target_id: &str, seq: &SequenceKey) -> ReconcileOutcome {
        for attempt in 0..self.retry.max_attempts() {
            let result = self.delete_attempt(target_id, seq).await;
            if let Some(outcome) = self.settle(Operation::Delete, target_id, seq, attempt, result) {
                return outcome;
            }
            self.pause(attempt).await;
        }

        self.exhausted(Operation::Delete, target_id, seq)
    }

    /// Remove the empty-valued sentinel entries of `attribute` from
    /// `target_id`, provided the record still carries exactly `applied` as its
    /// sequencer. Non-empty values of `attribute` and the record itself are
    /// left alone.
    pub async fn clear_auxiliary(
        &self,
        target_id: &str,
        applied: &SequenceKey,
        attribute: &str,
    ) -> ReconcileOutcome {
        for attempt in 0..self.retry.max_attempts() {
            let result = self.clear_attempt(target_id, applied, attribute).await;
            if let Some(outcome) = self.settle(Operation::Clear, target_id, applied, attempt, result)
            {
                return outcome;
            }
            self.pause(attempt).await;
        }

        self.exhausted(Operation::Clear, target_id, applied)
    }

    // -----------------------------------------------------------------------
    // Single attempts
    // -----------------------------------------------------------------------

    async fn update_attempt(
        &self,
        seq: &SequenceKey,
        target_id: &str,
        write_set: &[Attribute],
        on_displaced: &dyn DisplacedKeyHandler,
        notified: &mut Option<String>,
    ) -> Attempt {
        let stored = match self
            .store
            .get_attributes(target_id, &[SEQUENCER_ATTR, KEY_ATTR])
            .await
        {
            Ok(stored) => stored,
            Err(e) => return Attempt::AdapterError(e),
        };

        let expected = match single(&stored, SEQUENCER_ATTR) {
            None => Precondition::absent(SEQUENCER_ATTR),
            Some(old_token) => {
                if old_token == seq.as_str() {
                    return Attempt::Committed(ReconcileOutcome::AlreadyCurrent);
                }
                let old = SequenceKey::from_token(old_token);
                if !compare(&old, seq, KeyMismatch::Tolerate) {
                    return Attempt::Stale;
                }

                if let Some(old_key) = single(&stored, KEY_ATTR) {
                    if old_key != seq.key() && notified.as_deref() != Some(old_key) {
                        *notified = Some(old_key.to_string());
                        if let Err(e) = on_displaced.on_displaced(old_key).await {
                            warn!(
                                target_id,
                                old_key,
                                new_key = seq.key(),
                                error = %e,
                                "Displaced-key handler failed, committing anyway"
                            );
                        }
                    }
                }

                Precondition::equals(SEQUENCER_ATTR, old_token)
            }
        };

        let creating = expected.expectation == Expectation::Absent;
        match self
            .store
            .put_attributes(target_id, write_set, &expected)
            .await
        {
            Ok(WriteOutcome::Committed) if creating => {
                Attempt::Committed(ReconcileOutcome::Created)
            }
            Ok(WriteOutcome::Committed) => Attempt::Committed(ReconcileOutcome::Updated),
            Ok(WriteOutcome::ConditionFailed) => Attempt::ConditionFailed,
            Err(e) => Attempt::AdapterError(e),
        }
    }

    async fn delete_attempt(&self, target_id: &str, seq: &SequenceKey) -> Attempt {
        let stored = match self.store.get_attributes(target_id, &[SEQUENCER_ATTR]).await {
            Ok(stored) => stored,
            Err(e) => return Attempt::AdapterError(e),
        };

        let Some(old_token) = single(&stored, SEQUENCER_ATTR) else {
            return Attempt::Committed(ReconcileOutcome::Absent);
        };
        if !compare(&SequenceKey::from_token(old_token), seq, KeyMismatch::Reject) {
            return Attempt::Stale;
        }

        let expected = Precondition::equals(SEQUENCER_ATTR, old_token);
        match self.store.delete_attributes(target_id, &[], &expected).await {
            Ok(WriteOutcome::Committed) => Attempt::Committed(ReconcileOutcome::Deleted),
            Ok(WriteOutcome::ConditionFailed) => Attempt::ConditionFailed,
            Err(e) => Attempt::AdapterError(e),
        }
    }

    async fn clear_attempt(&self, target_id: &str, applied: &SequenceKey, attribute: &str) -> Attempt {
        let stored = match self.store.get_attributes(target_id, &[SEQUENCER_ATTR]).await {
            Ok(stored) => stored,
            Err(e) => return Attempt::AdapterError(e),
        };

        match single(&stored, SEQUENCER_ATTR) {
            None => return Attempt::Committed(ReconcileOutcome::Absent),
            Some(current) if current != applied.as_str() => return Attempt::Stale,
            Some(_) => {}
        }

        let expected = Precondition::equals(SEQUENCER_ATTR, applied.as_str());
        let selectors = [AttributeSelector::value(attribute, "")];
        match self
            .store
            .delete_attributes(target_id, &selectors, &expected)
            .await
        {
            Ok(WriteOutcome::Committed) => Attempt::Committed(ReconcileOutcome::Cleared),
            Ok(WriteOutcome::ConditionFailed) => Attempt::ConditionFailed,
            Err(e) => Attempt::AdapterError(e),
        }
    }

    // -----------------------------------------------------------------------
    // Loop bookkeeping
    // -----------------------------------------------------------------------

    /// Log an attempt's result. `Some` ends the loop.
    fn settle(
        &self,
        op: Operation,
        target_id: &str,
        seq: &SequenceKey,
        attempt: u32,
        result: Attempt,
    ) -> Option<ReconcileOutcome> {
        match result {
            Attempt::Committed(outcome) => {
                debug!(%op, target_id, seq = %seq, attempts = attempt + 1, %outcome, "Reconciled");
                Some(outcome)
            }
            Attempt::Stale if matches!(op, Operation::Clear) => {
                debug!(target_id, seq = %seq, "Record superseded, skipping sentinel clear");
                Some(ReconcileOutcome::Stale)
            }
            Attempt::Stale => {
                info!(%op, target_id, seq = %seq, "Stale event, dropping");
                Some(ReconcileOutcome::Stale)
            }
            Attempt::ConditionFailed => {
                debug!(
                    %op,
                    target_id,
                    seq = %seq,
                    attempt = attempt + 1,
                    "Sequencer changed underneath us, re-reading"
                );
                None
            }
            Attempt::AdapterError(e) => {
                warn!(
                    %op,
                    target_id,
                    seq = %seq,
                    attempt = attempt + 1,
                    error = %e,
                    "Attribute store call failed, retrying"
                );
                None
            }
        }
    }

    async fn pause(&self, attempt: u32) {
        if attempt + 1 < self.retry.max_attempts() {
            self.retry.backoff(attempt).await;
        }
    }

    fn exhausted(&self, op: Operation, target_id: &str, seq: &SequenceKey) -> ReconcileOutcome {
        let attempts = self.retry.max_attempts();
        warn!(%op, target_id, seq = %seq, attempts, "Retry budget exhausted, abandoning");
        ReconcileOutcome::Exhausted { attempts }
    }
}

/// The caller's attributes with the reserved sequencing attributes set from
/// `seq`.
fn stamped(seq: &SequenceKey, attributes: &[Attribute]) -> Vec<Attribute> {
    let mut write_set: Vec<Attribute> = attributes
        .iter()
        .filter(|a| a.name != SEQUENCER_ATTR && a.name != KEY_ATTR)
        .cloned()
        .collect();
    write_set.push(Attribute::replacing(KEY_ATTR, seq.key()));
    write_set.push(Attribute::replacing(SEQUENCER_ATTR, seq.as_str()));
    write_set
}

/// The stored value of a single-valued attribute.
fn single<'a>(stored: &'a AttributeMap, name: &str) -> Option<&'a str> {
    stored
        .get(name)
        .and_then(|values| values.first())
        .map(String::as_str)
}
