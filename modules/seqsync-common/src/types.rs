use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Reserved attribute names
// ---------------------------------------------------------------------------

/// Last-applied sequence token on a record. The optimistic-concurrency guard.
pub const SEQUENCER_ATTR: &str = "S3_Sequencer";
/// Object key the record currently reflects.
pub const KEY_ATTR: &str = "S3_Key";
/// Content type reported by the object store.
pub const CONTENT_TYPE_ATTR: &str = "S3_ContentType";
/// Comma-delimited metadata attribute expanded into one entry per tag.
pub const TAGS_ATTR: &str = "tags";
/// Sentinel attribute cleared after every successful update.
pub const TAG_SENTINEL_ATTR: &str = "tag";
/// Default metadata attribute holding the target record id.
pub const DEFAULT_ID_ATTR: &str = "uuid";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Removed,
}

impl EventKind {
    /// Classify an S3 event name (`ObjectCreated:Put`, `ObjectRemoved:Delete`, ...).
    pub fn from_event_name(name: &str) -> Option<Self> {
        if name.starts_with("ObjectCreated:") {
            Some(Self::Created)
        } else if name.starts_with("ObjectRemoved:") {
            Some(Self::Removed)
        } else {
            None
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// A normalized object lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEvent {
    pub bucket: String,
    /// Percent-decoded object key.
    pub key: String,
    /// `None` for event names this system does not handle.
    pub kind: Option<EventKind>,
    /// Raw event name as delivered, kept for logging.
    pub event_name: String,
    /// Opaque sequencer assigned by the bucket at emission time.
    pub sequencer: String,
}

impl ObjectEvent {
    pub fn created(bucket: &str, key: &str, sequencer: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            kind: Some(EventKind::Created),
            event_name: "ObjectCreated:Put".to_string(),
            sequencer: sequencer.to_string(),
        }
    }

    pub fn removed(bucket: &str, key: &str, sequencer: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            kind: Some(EventKind::Removed),
            event_name: "ObjectRemoved:Delete".to_string(),
            sequencer: sequencer.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute store primitives
// ---------------------------------------------------------------------------

/// Attribute values read back from a record, keyed by name.
pub type AttributeMap = BTreeMap<String, Vec<String>>;

/// A single name/value pair to write.
///
/// With `replace` set, every stored value of `name` is replaced by the values
/// written in the same call. Several entries sharing a name all survive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    pub replace: bool,
}

impl Attribute {
    pub fn replacing(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            replace: true,
        }
    }
}

/// Selects what a conditional delete removes. `value: None` removes every
/// value of `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSelector {
    pub name: String,
    pub value: Option<String>,
}

impl AttributeSelector {
    pub fn all(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn matches(&self, name: &str, value: &str) -> bool {
        self.name == name && self.value.as_deref().map_or(true, |v| v == value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    Absent,
    Equals(String),
}

/// Guard on a single attribute that must hold for a conditional write to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub name: String,
    pub expectation: Expectation,
}

impl Precondition {
    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expectation: Expectation::Absent,
        }
    }

    pub fn equals(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expectation: Expectation::Equals(value.into()),
        }
    }

    /// Check the guard against the currently stored values of `self.name`.
    pub fn holds(&self, stored: Option<&[String]>) -> bool {
        let stored = stored.filter(|values| !values.is_empty());
        match (&self.expectation, stored) {
            (Expectation::Absent, None) => true,
            (Expectation::Absent, Some(_)) => false,
            (Expectation::Equals(_), None) => false,
            (Expectation::Equals(expected), Some(values)) => {
                values.len() == 1 && &values[0] == expected
            }
        }
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expectation {
            Expectation::Absent => write!(f, "{} absent", self.name),
            Expectation::Equals(v) => write!(f, "{} = {v:?}", self.name),
        }
    }
}

/// Result of a conditional write or delete. Infrastructure failures are
/// reported as `Err` by the adapter instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Committed,
    ConditionFailed,
}

// ---------------------------------------------------------------------------
// Object store primitives
// ---------------------------------------------------------------------------

/// Metadata of a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    /// User metadata (`x-amz-meta-*`), with the prefix stripped.
    pub user_metadata: BTreeMap<String, String>,
}
