pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod infra;
pub mod jobs;

use std::sync::Arc;

use crate::app::images::ImageService;

#[derive(Clone)]
pub struct AppState {
    pub images: ImageService,
    pub variant_widths: Arc<[u32]>,
    pub upload_max_bytes: usize,
}
