use anyhow::Result;
use async_trait::async_trait;

use object_client::{ObjectClient, ObjectClientError, ObjectHead};
use seqsync_common::{ObjectMetadata, SyncError};
use seqsync_reconcile::ObjectStore;

/// Wrapper to make the HTTP object client implement the reconciler's
/// ObjectStore trait.
pub struct BucketObjects {
    client: ObjectClient,
}

impl BucketObjects {
    pub fn new(client: ObjectClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for BucketObjects {
    async fn metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata> {
        let head = self.client.head(bucket, key).await.map_err(object_error)?;
        Ok(to_metadata(head))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.client.delete(bucket, key).await.map_err(object_error)
    }
}

fn object_error(err: ObjectClientError) -> anyhow::Error {
    SyncError::Object(err.to_string()).into()
}

fn to_metadata(head: ObjectHead) -> ObjectMetadata {
    ObjectMetadata {
        content_type: head.content_type,
        user_metadata: head.metadata,
    }
}
