//! Decoding of S3-style bucket notification envelopes into [`ObjectEvent`]s.

use serde::Deserialize;
use url::form_urlencoded;

use crate::error::{Result, SyncError};
use crate::types::{EventKind, ObjectEvent};

/// `{"Records": [...]}` envelope as delivered by the bucket.
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    #[serde(rename = "Records", default)]
    pub records: Vec<NotificationRecord>,
}

impl Notification {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub event_name: String,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketEntity,
    pub object: ObjectEntity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketEntity {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEntity {
    pub key: String,
    #[serde(default)]
    pub sequencer: Option<String>,
}

impl NotificationRecord {
    /// Normalize into an [`ObjectEvent`]. The key is percent-decoded with `+`
    /// read as a space. Records without a sequencer cannot be ordered and are
    /// rejected.
    pub fn to_event(&self) -> Result<ObjectEvent> {
        let key = decode_object_key(&self.s3.object.key);
        let sequencer = self
            .s3
            .object
            .sequencer
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                SyncError::MalformedEvent(format!(
                    "{} on {}/{} has no sequencer",
                    self.event_name, self.s3.bucket.name, key
                ))
            })?;

        if key.is_empty() {
            return Err(SyncError::MalformedEvent(format!(
                "{} on bucket {} has an empty key",
                self.event_name, self.s3.bucket.name
            )));
        }

        Ok(ObjectEvent {
            bucket: self.s3.bucket.name.clone(),
            key,
            kind: EventKind::from_event_name(&self.event_name),
            event_name: self.event_name.clone(),
            sequencer,
        })
    }
}

/// Decode an object key as it appears in a notification (`+` is a space,
/// `%XX` escapes are UTF-8 bytes).
pub fn decode_object_key(raw: &str) -> String {
    // Literal separators would otherwise be read as pair boundaries.
    let escaped = raw.replace('&', "%26").replace('=', "%3D");
    form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
        .unwrap_or_default()
}
