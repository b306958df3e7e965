use futures::future::join_all;
use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::ports::{BlobStore, DescriptorStore};
use crate::domain::image::{
    original_object_name, safe_file_name, variant_object_name, variant_tag, AcceptedImageEvent,
    ImageDescriptor, ImageKind,
};
use crate::error::{PipelineError, PipelineResult};
use crate::jobs::resize;

/// Turns an accepted original into its resized variants.
#[derive(Clone)]
pub struct DerivationEngine {
    blobs: Arc<dyn BlobStore>,
    descriptors: Arc<dyn DescriptorStore>,
    widths: Arc<[u32]>,
}

#[derive(Debug)]
pub struct VariantOutcome {
    pub width: u32,
    pub result: PipelineResult<String>,
}

#[derive(Debug)]
pub struct DerivationReport {
    /// Descriptor as read back after every branch finished.
    pub descriptor: ImageDescriptor,
    pub outcomes: Vec<VariantOutcome>,
}

impl DerivationReport {
    pub fn failures(&self) -> impl Iterator<Item = (u32, &PipelineError)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().err().map(|err| (outcome.width, err)))
    }

    pub fn has_retryable_failure(&self) -> bool {
        self.failures().any(|(_, err)| err.is_retryable())
    }

    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }
}

impl DerivationEngine {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        descriptors: Arc<dyn DescriptorStore>,
        widths: Vec<u32>,
    ) -> Self {
        Self {
            blobs,
            descriptors,
            widths: widths.into(),
        }
    }

    pub fn widths(&self) -> &[u32] {
        &self.widths
    }

    /// Fetches and decodes the original, then renders, stores and records
    /// every configured width independently. A failure before the per-width
    /// stage fails the whole call; a failed width only shows up in the report.
    ///
    /// Running it again for the same event rewrites the same object names and
    /// descriptor keys.
    pub async fn derive(&self, event: &AcceptedImageEvent) -> PipelineResult<DerivationReport> {
        self.descriptors.get_by_id(event.id).await?;

        let safe_name = safe_file_name(&event.name)?;
        let kind = ImageKind::from_file_name(&safe_name).ok_or_else(|| {
            PipelineError::decode(format!("unsupported image type for {}", event.name))
        })?;

        let original = self
            .blobs
            .get(&original_object_name(event.id, &safe_name))
            .await?;
        debug!(image_id = %event.id, bytes = original.len(), "original fetched");

        let source = Arc::new(resize::decode_async(original, kind).await?);

        let branches = self.widths.iter().map(|&width| {
            self.derive_variant(event.id, &safe_name, kind, Arc::clone(&source), width)
        });
        let outcomes = join_all(branches).await;

        for outcome in &outcomes {
            if let Err(err) = &outcome.result {
                warn!(
                    image_id = %event.id,
                    size = outcome.width,
                    error = %err,
                    retryable = err.is_retryable(),
                    "variant not produced"
                );
            }
        }

        let descriptor = self.descriptors.get_by_id(event.id).await?;
        let report = DerivationReport {
            descriptor,
            outcomes,
        };
        info!(
            image_id = %event.id,
            produced = report.outcomes.len() - report.failures().count(),
            failed = report.failures().count(),
            "derivation finished"
        );
        Ok(report)
    }

    async fn derive_variant(
        &self,
        id: Uuid,
        safe_name: &str,
        kind: ImageKind,
        source: Arc<DynamicImage>,
        width: u32,
    ) -> VariantOutcome {
        let result = async {
            let encoded = resize::render_async(source, kind, width).await?;
            let object_name = variant_object_name(id, safe_name, width);
            let url = self
                .blobs
                .put(&object_name, encoded, kind.content_type())
                .await?;
            self.descriptors
                .set_variant_url(id, &variant_tag(width), &url)
                .await?;
            Ok::<_, PipelineError>(url)
        }
        .await;

        VariantOutcome { width, result }
    }
}
