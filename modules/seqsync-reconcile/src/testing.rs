// Test doubles for the reconciler's adapter traits.
//
// - MemoryAttributeStore (AttributeStore): in-memory records with
//   SimpleDB-style conditional semantics, plus failure and interleaving hooks
// - MockObjectStore (ObjectStore): HashMap-based (bucket, key) → metadata,
//   records deletes for assertions

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use seqsync_common::{
    Attribute, AttributeMap, AttributeSelector, ObjectMetadata, Precondition, WriteOutcome,
};

use crate::traits::{AttributeStore, ObjectStore};

// ---------------------------------------------------------------------------
// MemoryAttributeStore
// ---------------------------------------------------------------------------

/// In-memory attribute store. Each item is an ordered list of name/value
/// pairs; a name may repeat with distinct values.
pub struct MemoryAttributeStore {
    items: Mutex<BTreeMap<String, Vec<(String, String)>>>,
    failures_pending: AtomicU32,
    condition_failures: AtomicU32,
    writes: AtomicU32,
    yield_after_read: bool,
}

impl Default for MemoryAttributeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAttributeStore {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            failures_pending: AtomicU32::new(0),
            condition_failures: AtomicU32::new(0),
            writes: AtomicU32::new(0),
            yield_after_read: false,
        }
    }

    /// Yield to the scheduler after every read, so concurrent reconcilers
    /// polled on one task interleave between read and conditional write.
    pub fn with_yield_after_read(mut self) -> Self {
        self.yield_after_read = true;
        self
    }

    /// Pre-populate an item, bypassing preconditions.
    pub fn seed(&self, item: &str, pairs: &[(&str, &str)]) {
        let pairs = pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        self.items.lock().unwrap().insert(item.to_string(), pairs);
    }

    /// Make the next `n` adapter calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    /// Conditional writes/deletes rejected because the precondition did not hold.
    pub fn condition_failures(&self) -> u32 {
        self.condition_failures.load(Ordering::SeqCst)
    }

    /// Committed conditional writes and deletes.
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, item: &str) -> bool {
        self.items.lock().unwrap().contains_key(item)
    }

    /// All values of `name` on `item`, in write order.
    pub fn values(&self, item: &str, name: &str) -> Vec<String> {
        self.items
            .lock()
            .unwrap()
            .get(item)
            .map(|pairs| {
                pairs
                    .iter()
                    .filter(|(n, _)| n == name)
                    .map(|(_, v)| v.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The single value of `name` on `item`, if any.
    pub fn value(&self, item: &str, name: &str) -> Option<String> {
        self.values(item, name).into_iter().next()
    }

    fn take_failure(&self) -> Result<()> {
        let injected = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            bail!("MemoryAttributeStore: injected transient failure");
        }
        Ok(())
    }

    fn check(&self, pairs: Option<&Vec<(String, String)>>, expected: &Precondition) -> bool {
        let stored: Vec<String> = pairs
            .map(|pairs| {
                pairs
                    .iter()
                    .filter(|(n, _)| *n == expected.name)
                    .map(|(_, v)| v.clone())
                    .collect()
            })
            .unwrap_or_default();
        let holds = expected.holds(Some(&stored));
        if !holds {
            self.condition_failures.fetch_add(1, Ordering::SeqCst);
        }
        holds
    }
}

#[async_trait]
impl AttributeStore for MemoryAttributeStore {
    async fn get_attributes(&self, item: &str, names: &[&str]) -> Result<AttributeMap> {
        self.take_failure()?;

        let snapshot: AttributeMap = {
            let items = self.items.lock().unwrap();
            let mut map = AttributeMap::new();
            if let Some(pairs) = items.get(item) {
                for (name, value) in pairs {
                    if names.contains(&name.as_str()) {
                        map.entry(name.clone()).or_default().push(value.clone());
                    }
                }
            }
            map
        };

        if self.yield_after_read {
            tokio::task::yield_now().await;
        }
        Ok(snapshot)
    }

    async fn put_attributes(
        &self,
        item: &str,
        attributes: &[Attribute],
        expected: &Precondition,
    ) -> Result<WriteOutcome> {
        self.take_failure()?;

        let mut items = self.items.lock().unwrap();
        if !self.check(items.get(item), expected) {
            return Ok(WriteOutcome::ConditionFailed);
        }

        let pairs = items.entry(item.to_string()).or_default();
        let replaced: Vec<&str> = attributes
            .iter()
            .filter(|a| a.replace)
            .map(|a| a.name.as_str())
            .collect();
        pairs.retain(|(n, _)| !replaced.contains(&n.as_str()));
        for attribute in attributes {
            let pair = (attribute.name.clone(), attribute.value.clone());
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteOutcome::Committed)
    }

    async fn delete_attributes(
        &self,
        item: &str,
        selectors: &[AttributeSelector],
        expected: &Precondition,
    ) -> Result<WriteOutcome> {
        self.take_failure()?;

        let mut items = self.items.lock().unwrap();
        if !self.check(items.get(item), expected) {
            return Ok(WriteOutcome::ConditionFailed);
        }

        if selectors.is_empty() {
            items.remove(item);
        } else if let Some(pairs) = items.get_mut(item) {
            pairs.retain(|(n, v)| !selectors.iter().any(|s| s.matches(n, v)));
            if pairs.is_empty() {
                items.remove(item);
            }
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteOutcome::Committed)
    }

    async fn select_items(&self, name: &str, value: &str) -> Result<Vec<String>> {
        self.take_failure()?;

        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .filter(|(_, pairs)| pairs.iter().any(|(n, v)| n == name && v == value))
            .map(|(item, _)| item.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockObjectStore
// ---------------------------------------------------------------------------

/// HashMap-based object store. Returns `Err` for unregistered objects.
/// Builder pattern: `.on_object()`.
pub struct MockObjectStore {
    objects: HashMap<(String, String), ObjectMetadata>,
    deleted: Mutex<Vec<(String, String)>>,
    fail_deletes: bool,
}

impl Default for MockObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            deleted: Mutex::new(Vec::new()),
            fail_deletes: false,
        }
    }

    pub fn on_object(mut self, bucket: &str, key: &str, metadata: ObjectMetadata) -> Self {
        self.objects
            .insert((bucket.to_string(), key.to_string()), metadata);
        self
    }

    /// Make every delete fail.
    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    /// `(bucket, key)` of every delete call, in order.
    pub fn deleted(&self) -> Vec<(String, String)> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("MockObjectStore: no object registered for {bucket}/{key}"))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.deleted
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string()));
        if self.fail_deletes {
            bail!("MockObjectStore: delete of {bucket}/{key} failed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Object metadata from user-metadata pairs and an optional content type.
pub fn object_metadata(pairs: &[(&str, &str)], content_type: Option<&str>) -> ObjectMetadata {
    ObjectMetadata {
        content_type: content_type.map(str::to_string),
        user_metadata: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}
