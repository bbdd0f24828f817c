// Trait boundaries for the reconciler's external collaborators.
//
// AttributeStore is the record store with its optimistic-concurrency
// primitives. ObjectStore is the bucket. Both are injected at construction so
// tests run against the in-memory doubles in `testing` with no network.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use seqsync_common::{
    Attribute, AttributeMap, AttributeSelector, ObjectMetadata, Precondition, WriteOutcome,
};

// ---------------------------------------------------------------------------
// AttributeStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// Strongly-consistent read of the named attributes of `item`. Missing
    /// attributes (or a missing item) are simply absent from the map.
    async fn get_attributes(&self, item: &str, names: &[&str]) -> Result<AttributeMap>;

    /// Write `attributes` to `item` if `expected` holds, creating the item when
    /// it does not exist.
    async fn put_attributes(
        &self,
        item: &str,
        attributes: &[Attribute],
        expected: &Precondition,
    ) -> Result<WriteOutcome>;

    /// Remove the selected attribute values from `item` if `expected` holds.
    /// An empty `selectors` slice removes the whole item.
    async fn delete_attributes(
        &self,
        item: &str,
        selectors: &[AttributeSelector],
        expected: &Precondition,
    ) -> Result<WriteOutcome>;

    /// Strongly-consistent lookup of every item with `name = value`.
    async fn select_items(&self, name: &str, value: &str) -> Result<Vec<String>>;
}

#[async_trait]
impl<S: AttributeStore + ?Sized> AttributeStore for Arc<S> {
    async fn get_attributes(&self, item: &str, names: &[&str]) -> Result<AttributeMap> {
        (**self).get_attributes(item, names).await
    }

    async fn put_attributes(
        &self,
        item: &str,
        attributes: &[Attribute],
        expected: &Precondition,
    ) -> Result<WriteOutcome> {
        (**self).put_attributes(item, attributes, expected).await
    }

    async fn delete_attributes(
        &self,
        item: &str,
        selectors: &[AttributeSelector],
        expected: &Precondition,
    ) -> Result<WriteOutcome> {
        (**self).delete_attributes(item, selectors, expected).await
    }

    async fn select_items(&self, name: &str, value: &str) -> Result<Vec<String>> {
        (**self).select_items(name, value).await
    }
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Content type and user metadata of an object.
    async fn metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}

#[async_trait]
impl<O: ObjectStore + ?Sized> ObjectStore for Arc<O> {
    async fn metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        (**self).metadata(bucket, key).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        (**self).delete(bucket, key).await
    }
}

// ---------------------------------------------------------------------------
// DisplacedKeyHandler
// ---------------------------------------------------------------------------

/// Invoked by an update when the record previously reflected a different
/// object key, i.e. the object was moved or renamed.
#[async_trait]
pub trait DisplacedKeyHandler: Send + Sync {
    async fn on_displaced(&self, old_key: &str) -> Result<()>;
}

/// Default handler: leave the old object alone.
pub struct NoopDisplacedKey;

#[async_trait]
impl DisplacedKeyHandler for NoopDisplacedKey {
    async fn on_displaced(&self, _old_key: &str) -> Result<()> {
        Ok(())
    }
}

/// Deletes the superseded object at the old key in the event's bucket.
pub struct DeleteDisplacedObject<'a, O: ObjectStore + ?Sized> {
    objects: &'a O,
    bucket: &'a str,
}

impl<'a, O: ObjectStore + ?Sized> DeleteDisplacedObject<'a, O> {
    pub fn new(objects: &'a O, bucket: &'a str) -> Self {
        Self { objects, bucket }
    }
}

#[async_trait]
impl<'a, O: ObjectStore + ?Sized> DisplacedKeyHandler for DeleteDisplacedObject<'a, O> {
    async fn on_displaced(&self, old_key: &str) -> Result<()> {
        info!(bucket = self.bucket, old_key, "Deleting object superseded by move");
        self.objects.delete(self.bucket, old_key).await
    }
}
