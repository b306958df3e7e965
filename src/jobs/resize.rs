//! Decode, resample and re-encode. CPU bound, so the async wrappers move the
//! work onto the blocking pool.

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use std::sync::Arc;

use crate::domain::image::ImageKind;
use crate::error::{PipelineError, PipelineResult};

fn image_format(kind: ImageKind) -> ImageFormat {
    match kind {
        ImageKind::Jpeg => ImageFormat::Jpeg,
        ImageKind::Png => ImageFormat::Png,
        ImageKind::Gif => ImageFormat::Gif,
    }
}

/// Scales to `target` width keeping the aspect ratio. Images already no
/// wider than the target keep their size.
pub fn target_dimensions(width: u32, height: u32, target: u32) -> (u32, u32) {
    if width <= target {
        return (width, height);
    }
    let scaled = (u64::from(height) * u64::from(target) + u64::from(width) / 2) / u64::from(width);
    (target, scaled.clamp(1, u64::from(u32::MAX)) as u32)
}

pub fn decode(bytes: &[u8], kind: ImageKind) -> PipelineResult<DynamicImage> {
    image::load_from_memory_with_format(bytes, image_format(kind))
        .map_err(|err| PipelineError::decode(format!("failed to decode image: {}", err)))
}

pub fn render(source: &DynamicImage, kind: ImageKind, target: u32) -> PipelineResult<Bytes> {
    let (width, height) = source.dimensions();
    let (new_width, new_height) = target_dimensions(width, height, target);

    if (new_width, new_height) == (width, height) {
        return encode(source, kind);
    }
    let resized = source.resize_exact(new_width, new_height, FilterType::Lanczos3);
    encode(&resized, kind)
}

pub fn encode(image: &DynamicImage, kind: ImageKind) -> PipelineResult<Bytes> {
    let mut buffer = Cursor::new(Vec::new());
    let written = match kind {
        // jpeg has no alpha channel
        ImageKind::Jpeg => {
            DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut buffer, ImageFormat::Jpeg)
        }
        ImageKind::Png => image.write_to(&mut buffer, ImageFormat::Png),
        ImageKind::Gif => {
            DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut buffer, ImageFormat::Gif)
        }
    };
    written.map_err(|err| PipelineError::decode(format!("failed to encode image: {}", err)))?;
    Ok(Bytes::from(buffer.into_inner()))
}

pub async fn decode_async(bytes: Bytes, kind: ImageKind) -> PipelineResult<DynamicImage> {
    tokio::task::spawn_blocking(move || decode(&bytes, kind))
        .await
        .map_err(PipelineError::transient)?
}

pub async fn render_async(
    source: Arc<DynamicImage>,
    kind: ImageKind,
    target: u32,
) -> PipelineResult<Bytes> {
    tokio::task::spawn_blocking(move || render(&source, kind, target))
        .await
        .map_err(PipelineError::transient)?
}
