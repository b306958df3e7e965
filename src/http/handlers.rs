use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::images::IngestReceipt;
use crate::domain::image::{AcceptedImageEvent, ImageDescriptor};
use crate::http::AppError;
use crate::AppState;

const IMAGE_FIELD: &str = "image";

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
pub struct ImageResponse {
    pub id: Uuid,
    pub name: String,
    pub original_url: String,
    pub variant_urls: BTreeMap<String, String>,
    pub complete: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ImageResponse {
    fn from_descriptor(descriptor: ImageDescriptor, widths: &[u32]) -> Self {
        let complete = descriptor.is_complete(widths);
        Self {
            id: descriptor.id,
            name: descriptor.name,
            original_url: descriptor.original_url,
            variant_urls: descriptor.variant_urls,
            complete,
            created_at: descriptor.created_at,
        }
    }
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.images.ready().await {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse { status })
}

pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<IngestReceipt>), AppError> {
    let mut upload: Option<(String, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        tracing::warn!(error = %err, "failed to read multipart body");
        AppError::bad_request("failed to read uploaded file")
    })? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|err| {
            tracing::warn!(error = %err, "failed to read image part");
            AppError::bad_request("failed to read uploaded file")
        })?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) =
        upload.ok_or_else(|| AppError::bad_request("image file part is required"))?;

    let receipt = state.images.ingest(bytes, &filename).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

pub async fn get_image(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ImageResponse>, AppError> {
    let descriptor = state.images.get_image(id).await?;
    Ok(Json(ImageResponse::from_descriptor(
        descriptor,
        &state.variant_widths,
    )))
}

pub async fn republish_image(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<AcceptedImageEvent>), AppError> {
    let event = state.images.republish(id).await?;
    Ok((StatusCode::ACCEPTED, Json(event)))
}
