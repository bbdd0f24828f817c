use tracing::warn;

use seqsync_common::{Notification, ObjectEvent, Result};

/// Events decoded from one notification payload.
#[derive(Debug, Default)]
pub struct EventBatch {
    pub events: Vec<ObjectEvent>,
    /// Records that could not be turned into an event (no sequencer, empty key).
    pub malformed: usize,
}

/// Decode a `{"Records": [...]}` payload. Malformed records are logged and
/// counted; an unparseable envelope is an error.
pub fn read_events(bytes: &[u8]) -> Result<EventBatch> {
    let notification = Notification::from_slice(bytes)?;

    let mut batch = EventBatch::default();
    for record in &notification.records {
        match record.to_event() {
            Ok(event) => batch.events.push(event),
            Err(e) => {
                warn!(error = %e, event_name = record.event_name.as_str(), "Skipping malformed record");
                batch.malformed += 1;
            }
        }
    }
    Ok(batch)
}
