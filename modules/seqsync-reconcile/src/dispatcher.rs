//! Per-event orchestration: turn a normalized bucket event into reconciler
//! calls.

use std::fmt;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use seqsync_common::{
    Attribute, EventKind, ObjectEvent, ObjectMetadata, CONTENT_TYPE_ATTR, DEFAULT_ID_ATTR,
    KEY_ATTR, SEQUENCER_ATTR, TAGS_ATTR, TAG_SENTINEL_ATTR,
};

use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::sequencer::SequenceKey;
use crate::traits::{AttributeStore, DeleteDisplacedObject, ObjectStore};

/// What dispatching one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Create-type event applied (or dropped) against one record.
    Updated {
        target_id: String,
        outcome: ReconcileOutcome,
    },
    /// Remove-type event fanned out to every record holding the key.
    Removed(Vec<(String, ReconcileOutcome)>),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Event name is neither a create nor a remove.
    UnhandledEvent,
    /// Object metadata has no identifier attribute, so there is no record to target.
    MissingIdentifier,
}

/// Counters for a dispatched batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    pub events: u64,
    pub created: u64,
    pub updated: u64,
    pub already_current: u64,
    pub deleted: u64,
    pub absent: u64,
    pub stale: u64,
    pub exhausted: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl DispatchStats {
    fn record(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Created => self.created += 1,
            ReconcileOutcome::Updated => self.updated += 1,
            ReconcileOutcome::AlreadyCurrent => self.already_current += 1,
            ReconcileOutcome::Deleted => self.deleted += 1,
            ReconcileOutcome::Absent => self.absent += 1,
            ReconcileOutcome::Stale => self.stale += 1,
            ReconcileOutcome::Exhausted { .. } => self.exhausted += 1,
            ReconcileOutcome::Cleared => {}
        }
    }

    fn tally(&mut self, dispatched: &Dispatched) {
        match dispatched {
            Dispatched::Updated { outcome, .. } => self.record(*outcome),
            Dispatched::Removed(outcomes) => {
                for (_, outcome) in outcomes {
                    self.record(*outcome);
                }
            }
            Dispatched::Skipped(_) => self.skipped += 1,
        }
    }
}

impl fmt::Display for DispatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events={} created={} updated={} already_current={} deleted={} absent={} stale={} exhausted={} skipped={} failed={}",
            self.events, self.created, self.updated, self.already_current, self.deleted,
            self.absent, self.stale, self.exhausted, self.skipped, self.failed,
        )
    }
}

/// Routes bucket events to the [`Reconciler`].
pub struct Dispatcher<S, O> {
    reconciler: Reconciler<S>,
    objects: O,
    id_attribute: String,
}

impl<S: AttributeStore, O: ObjectStore> Dispatcher<S, O> {
    pub fn new(reconciler: Reconciler<S>, objects: O) -> Self {
        Self {
            reconciler,
            objects,
            id_attribute: DEFAULT_ID_ATTR.to_string(),
        }
    }

    /// Metadata attribute whose value names the target record.
    pub fn with_id_attribute(mut self, name: impl Into<String>) -> Self {
        self.id_attribute = name.into();
        self
    }

    /// Dispatch events in order. A failing event is logged and counted; it
    /// never stops the rest of the batch.
    pub async fn dispatch_batch(&self, events: &[ObjectEvent]) -> DispatchStats {
        let mut stats = DispatchStats::default();

        for event in events {
            stats.events += 1;
            match self.dispatch(event).await {
                Ok(dispatched) => stats.tally(&dispatched),
                Err(e) => {
                    warn!(
                        bucket = event.bucket.as_str(),
                        key = event.key.as_str(),
                        event_name = event.event_name.as_str(),
                        error = %e,
                        "Failed to dispatch event, skipping"
                    );
                    stats.failed += 1;
                }
            }
        }

        stats
    }

    /// Dispatch a single event. Errors come only from adapter calls made
    /// outside the reconciler's retry loop (metadata fetch, key lookup).
    pub async fn dispatch(&self, event: &ObjectEvent) -> Result<Dispatched> {
        info!(
            bucket = event.bucket.as_str(),
            key = event.key.as_str(),
            event_name = event.event_name.as_str(),
            sequencer = event.sequencer.as_str(),
            "Dispatching event"
        );

        match event.kind {
            Some(EventKind::Created) => self.handle_created(event).await,
            Some(EventKind::Removed) => self.handle_removed(event).await,
            None => {
                debug!(event_name = event.event_name.as_str(), "Unhandled event type");
                Ok(Dispatched::Skipped(SkipReason::UnhandledEvent))
            }
        }
    }

    async fn handle_created(&self, event: &ObjectEvent) -> Result<Dispatched> {
        let seq = SequenceKey::new(&event.sequencer, &event.key);
        let metadata = self
            .objects
            .metadata(&event.bucket, &event.key)
            .await
            .with_context(|| format!("fetching metadata for {}/{}", event.bucket, event.key))?;

        let Some(target_id) = metadata.user_metadata.get(&self.id_attribute).cloned() else {
            info!(
                key = event.key.as_str(),
                id_attribute = self.id_attribute.as_str(),
                "Object has no identifier attribute, skipping"
            );
            return Ok(Dispatched::Skipped(SkipReason::MissingIdentifier));
        };

        let attributes = build_attributes(&metadata, &seq);
        let on_displaced = DeleteDisplacedObject::new(&self.objects, &event.bucket);
        let outcome = self
            .reconciler
            .apply_update_with(&seq, &target_id, &attributes, &on_displaced)
            .await;

        if outcome.succeeded() {
            let cleared = self
                .reconciler
                .clear_auxiliary(&target_id, &seq, TAG_SENTINEL_ATTR)
                .await;
            debug!(target_id = target_id.as_str(), %cleared, "Sentinel clear finished");
        }

        Ok(Dispatched::Updated { target_id, outcome })
    }

    async fn handle_removed(&self, event: &ObjectEvent) -> Result<Dispatched> {
        let seq = SequenceKey::new(&event.sequencer, &event.key);
        let targets = self
            .reconciler
            .store()
            .select_items(KEY_ATTR, &event.key)
            .await
            .with_context(|| format!("selecting records for {}", event.key))?;

        if targets.is_empty() {
            debug!(key = event.key.as_str(), "No records reference removed key");
        }

        let mut outcomes = Vec::with_capacity(targets.len());
        for target_id in targets {
            let outcome = self.reconciler.apply_delete(&target_id, &seq).await;
            outcomes.push((target_id, outcome));
        }

        Ok(Dispatched::Removed(outcomes))
    }
}

/// Attribute set for a create-type event: user metadata copied verbatim,
/// `tags` expanded to one entry per tag, plus the reserved attributes.
pub fn build_attributes(metadata: &ObjectMetadata, seq: &SequenceKey) -> Vec<Attribute> {
    let mut attributes = Vec::with_capacity(metadata.user_metadata.len() + 3);

    for (name, value) in &metadata.user_metadata {
        if name == TAGS_ATTR {
            attributes.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(|tag| Attribute::replacing(TAGS_ATTR, tag)),
            );
        } else {
            attributes.push(Attribute::replacing(name.as_str(), value.as_str()));
        }
    }

    if let Some(content_type) = &metadata.content_type {
        attributes.push(Attribute::replacing(CONTENT_TYPE_ATTR, content_type.as_str()));
    }
    attributes.push(Attribute::replacing(KEY_ATTR, seq.key()));
    attributes.push(Attribute::replacing(SEQUENCER_ATTR, seq.as_str()));

    attributes
}
