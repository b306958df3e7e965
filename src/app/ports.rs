//! Capability traits the pipeline depends on.
//!
//! Ingestion and derivation only ever see these traits; the S3, Postgres and
//! SQS adapters in `infra` implement them for production and the test suite
//! swaps in in-memory versions.

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::domain::image::{AcceptedImageEvent, ImageDescriptor};
use crate::error::PipelineResult;

/// Binary blobs keyed by an opaque object name. Writing an existing name
/// overwrites it.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` under `name` and returns the object's URL.
    async fn put(&self, name: &str, bytes: Bytes, content_type: &str) -> PipelineResult<String>;

    async fn get(&self, name: &str) -> PipelineResult<Bytes>;

    async fn delete(&self, name: &str) -> PipelineResult<()>;

    fn url_for(&self, name: &str) -> String;
}

#[async_trait]
pub trait DescriptorStore: Send + Sync {
    /// Creates the row if absent. An existing row keeps its `name`,
    /// `original_url` and `created_at`; only `variant_urls` entries are merged.
    async fn upsert(&self, descriptor: &ImageDescriptor) -> PipelineResult<()>;

    /// Sets one variant entry, leaving the other entries untouched.
    async fn set_variant_url(&self, id: Uuid, tag: &str, url: &str) -> PipelineResult<()>;

    async fn get_by_id(&self, id: Uuid) -> PipelineResult<ImageDescriptor>;

    async fn ping(&self) -> PipelineResult<()> {
        Ok(())
    }
}

/// Producer side of the event channel. Returns only once the broker has
/// accepted the message.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &AcceptedImageEvent) -> PipelineResult<()>;
}

/// One message handed to a consumer lane.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub body: String,
    pub receipt: String,
    /// How many times the broker has handed out this message, this one included.
    pub delivery_count: u32,
}

/// Consumer side of the event channel. A delivery that is never acked is
/// handed out again once the broker's visibility timeout lapses.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn receive(&self, wait_seconds: i32) -> PipelineResult<Vec<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> PipelineResult<()>;

    /// Parks a message that will never succeed. Does not ack it.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> PipelineResult<()>;
}
