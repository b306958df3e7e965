use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::app::ports::{BlobStore, DescriptorStore, EventPublisher};
use crate::domain::image::{
    original_object_name, safe_file_name, AcceptedImageEvent, ImageDescriptor, ImageKind,
};
use crate::error::{PipelineError, PipelineResult};

/// Entry point the transport layer calls to accept uploads and look them up.
#[derive(Clone)]
pub struct ImageService {
    blobs: Arc<dyn BlobStore>,
    descriptors: Arc<dyn DescriptorStore>,
    events: Arc<dyn EventPublisher>,
    max_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub id: Uuid,
    pub name: String,
    pub original_url: String,
}

impl ImageService {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        descriptors: Arc<dyn DescriptorStore>,
        events: Arc<dyn EventPublisher>,
        max_bytes: usize,
    ) -> Self {
        Self {
            blobs,
            descriptors,
            events,
            max_bytes,
        }
    }

    /// Stores the original, records its descriptor and announces it, strictly
    /// in that order. A failed step stops the sequence, so an event is never
    /// published for a descriptor that was not persisted.
    pub async fn ingest(&self, bytes: Bytes, filename: &str) -> PipelineResult<IngestReceipt> {
        if bytes.is_empty() {
            return Err(PipelineError::validation("image payload is empty"));
        }
        if bytes.len() > self.max_bytes {
            return Err(PipelineError::validation("image exceeds max size"));
        }
        let name = filename.trim();
        if name.is_empty() {
            return Err(PipelineError::validation("filename is required"));
        }
        let safe_name = safe_file_name(name)?;
        let kind = ImageKind::from_file_name(&safe_name)
            .ok_or_else(|| PipelineError::validation("unsupported image type"))?;

        let id = Uuid::new_v4();
        let object_name = original_object_name(id, &safe_name);
        let original_url = self
            .blobs
            .put(&object_name, bytes, kind.content_type())
            .await
            .map_err(|err| {
                warn!(error = %err, image_id = %id, "failed to store original");
                err
            })?;

        let descriptor = ImageDescriptor::new(id, name, original_url);
        if let Err(err) = self.descriptors.upsert(&descriptor).await {
            // The stored original is left for the orphan sweep.
            error!(
                error = %err,
                image_id = %id,
                object_name = %object_name,
                "failed to persist descriptor, original orphaned"
            );
            return Err(err);
        }

        let event = AcceptedImageEvent::from(&descriptor);
        if let Err(err) = self.events.publish(&event).await {
            error!(
                error = %err,
                image_id = %id,
                "descriptor persisted but accepted event not published, image stuck pending"
            );
            return Err(err);
        }

        info!(image_id = %id, name = %descriptor.name, "image accepted");
        Ok(IngestReceipt {
            id,
            name: descriptor.name,
            original_url: descriptor.original_url,
        })
    }

    pub async fn get_image(&self, id: Uuid) -> PipelineResult<ImageDescriptor> {
        self.descriptors.get_by_id(id).await
    }

    /// Publishes the accepted event again for an existing descriptor. Used to
    /// recover images stuck pending after a failed publish; derivation is
    /// idempotent so a spurious republish only repeats work.
    pub async fn republish(&self, id: Uuid) -> PipelineResult<AcceptedImageEvent> {
        let descriptor = self.descriptors.get_by_id(id).await?;
        let event = AcceptedImageEvent::from(&descriptor);
        self.events.publish(&event).await?;
        info!(image_id = %id, "accepted event republished");
        Ok(event)
    }

    pub async fn ready(&self) -> bool {
        self.descriptors.ping().await.is_ok()
    }
}
