use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};

/// Durable record for one uploaded image and its derived variants.
///
/// `original_url` is fixed at creation. Each entry in `variant_urls` is keyed
/// by the target width rendered as a string and is absent until that variant
/// has been stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub id: Uuid,
    pub name: String,
    pub original_url: String,
    pub variant_urls: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ImageDescriptor {
    pub fn new(id: Uuid, name: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            original_url: original_url.into(),
            variant_urls: BTreeMap::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn variant_url(&self, width: u32) -> Option<&str> {
        self.variant_urls.get(&variant_tag(width)).map(String::as_str)
    }

    pub fn missing_variants(&self, widths: &[u32]) -> Vec<u32> {
        widths
            .iter()
            .copied()
            .filter(|width| self.variant_url(*width).is_none())
            .collect()
    }

    pub fn is_complete(&self, widths: &[u32]) -> bool {
        self.missing_variants(widths).is_empty()
    }
}

/// Message published once a descriptor has been persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedImageEvent {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "originalURL", alias = "originUrl", alias = "original_url")]
    pub original_url: String,
}

impl AcceptedImageEvent {
    pub fn to_json(&self) -> PipelineResult<String> {
        serde_json::to_string(self).map_err(PipelineError::transient)
    }

    pub fn from_json(body: &str) -> PipelineResult<Self> {
        serde_json::from_str(body)
            .map_err(|err| PipelineError::validation(format!("malformed event: {}", err)))
    }
}

impl From<&ImageDescriptor> for AcceptedImageEvent {
    fn from(descriptor: &ImageDescriptor) -> Self {
        Self {
            id: descriptor.id,
            name: descriptor.name.clone(),
            original_url: descriptor.original_url.clone(),
        }
    }
}

/// Raster formats accepted for ingestion and derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
}

impl ImageKind {
    /// Infers the format from the extension only; content is never sniffed.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
        }
    }
}

pub fn variant_tag(width: u32) -> String {
    width.to_string()
}

/// Reduces an untrusted filename to a single safe path component.
pub fn safe_file_name(name: &str) -> PipelineResult<String> {
    let last = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return Err(PipelineError::validation("filename is required"));
    }
    Ok(cleaned)
}

pub fn original_object_name(id: Uuid, safe_name: &str) -> String {
    format!("originals/{}/{}", id, safe_name)
}

pub fn variant_object_name(id: Uuid, safe_name: &str, width: u32) -> String {
    format!("variants/{}/{}-{}", id, safe_name, width)
}
