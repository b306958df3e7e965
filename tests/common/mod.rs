#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use uuid::Uuid;

use anyhow::anyhow;
use prism::app::images::ImageService;
use prism::app::ports::{BlobStore, DescriptorStore, Delivery, EventPublisher, EventSource};
use prism::domain::image::{AcceptedImageEvent, ImageDescriptor};
use prism::error::{PipelineError, PipelineResult};
use prism::jobs::derivation::DerivationEngine;

pub const WIDTHS: [u32; 3] = [512, 256, 16];
pub const MAX_BYTES: usize = 5 * 1024 * 1024;
pub const BLOB_BASE: &str = "http://blobs.test/images";

// ---------------------------------------------------------------------------
// Blob store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Bytes>>,
    puts: Mutex<Vec<String>>,
    fail_all_puts: Mutex<bool>,
    fail_put_suffix: Mutex<Option<String>>,
    fail_gets: Mutex<bool>,
    gets_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MemoryBlobStore {
    pub fn fail_all_puts(&self) {
        *self.fail_all_puts.lock().unwrap() = true;
    }

    /// Puts whose object name ends with `suffix` fail.
    pub fn fail_puts_ending_with(&self, suffix: &str) {
        *self.fail_put_suffix.lock().unwrap() = Some(suffix.to_string());
    }

    pub fn heal(&self) {
        *self.fail_all_puts.lock().unwrap() = false;
        *self.fail_put_suffix.lock().unwrap() = None;
        *self.fail_gets.lock().unwrap() = false;
    }

    pub fn fail_gets(&self) {
        *self.fail_gets.lock().unwrap() = true;
    }

    /// Gets block until a permit is added to the returned semaphore.
    pub fn hold_gets(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gets_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn object(&self, name: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    pub fn insert(&self, name: &str, bytes: Bytes) {
        self.objects.lock().unwrap().insert(name.to_string(), bytes);
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }

    pub fn name_for_url(url: &str) -> &str {
        url.strip_prefix(BLOB_BASE)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(url)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, name: &str, bytes: Bytes, _content_type: &str) -> PipelineResult<String> {
        if *self.fail_all_puts.lock().unwrap() {
            return Err(PipelineError::transient(anyhow!("object store unavailable")));
        }
        if let Some(suffix) = self.fail_put_suffix.lock().unwrap().as_deref() {
            if name.ends_with(suffix) {
                return Err(PipelineError::transient(anyhow!("put {} rejected", name)));
            }
        }
        self.puts.lock().unwrap().push(name.to_string());
        self.objects.lock().unwrap().insert(name.to_string(), bytes);
        Ok(self.url_for(name))
    }

    async fn get(&self, name: &str) -> PipelineResult<Bytes> {
        let gate = self.gets_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if *self.fail_gets.lock().unwrap() {
            return Err(PipelineError::transient(anyhow!("object store unavailable")));
        }
        self.object(name)
            .ok_or_else(|| PipelineError::transient(anyhow!("no such key {}", name)))
    }

    async fn delete(&self, name: &str) -> PipelineResult<()> {
        self.objects.lock().unwrap().remove(name);
        Ok(())
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{}", BLOB_BASE, name)
    }
}

// ---------------------------------------------------------------------------
// Descriptor store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryDescriptorStore {
    rows: Mutex<HashMap<Uuid, ImageDescriptor>>,
    fail_upserts: Mutex<bool>,
}

impl MemoryDescriptorStore {
    pub fn fail_upserts(&self) {
        *self.fail_upserts.lock().unwrap() = true;
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.rows.lock().unwrap().contains_key(&id)
    }
}

#[async_trait]
impl DescriptorStore for MemoryDescriptorStore {
    async fn upsert(&self, descriptor: &ImageDescriptor) -> PipelineResult<()> {
        if *self.fail_upserts.lock().unwrap() {
            return Err(PipelineError::transient(anyhow!("database unavailable")));
        }
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&descriptor.id) {
            Some(existing) => {
                existing
                    .variant_urls
                    .extend(descriptor.variant_urls.clone());
            }
            None => {
                rows.insert(descriptor.id, descriptor.clone());
            }
        }
        Ok(())
    }

    async fn set_variant_url(&self, id: Uuid, tag: &str, url: &str) -> PipelineResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(PipelineError::NotFound(id))?;
        row.variant_urls.insert(tag.to_string(), url.to_string());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> PipelineResult<ImageDescriptor> {
        self.rows
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(PipelineError::NotFound(id))
    }
}

// ---------------------------------------------------------------------------
// Event channel
// ---------------------------------------------------------------------------

/// Records every published event along with whether its descriptor was
/// readable at the moment of publishing.
pub struct RecordingPublisher {
    descriptors: Arc<MemoryDescriptorStore>,
    published: Mutex<Vec<(AcceptedImageEvent, bool)>>,
    fail: Mutex<bool>,
}

impl RecordingPublisher {
    pub fn new(descriptors: Arc<MemoryDescriptorStore>) -> Self {
        Self {
            descriptors,
            published: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
        }
    }

    pub fn fail(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn events(&self) -> Vec<AcceptedImageEvent> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(event, _)| event.clone())
            .collect()
    }

    pub fn all_persisted_before_publish(&self) -> bool {
        self.published
            .lock()
            .unwrap()
            .iter()
            .all(|(_, persisted)| *persisted)
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &AcceptedImageEvent) -> PipelineResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(PipelineError::transient(anyhow!("broker unavailable")));
        }
        let persisted = self.descriptors.get_by_id(event.id).await.is_ok();
        self.published
            .lock()
            .unwrap()
            .push((event.clone(), persisted));
        Ok(())
    }
}

/// Queue that redelivers anything not acked, bumping the delivery count.
#[derive(Default)]
pub struct MemoryEventSource {
    pending: Mutex<VecDeque<Delivery>>,
    in_flight: Mutex<Vec<Delivery>>,
    acked: Mutex<Vec<String>>,
    dead_lettered: Mutex<Vec<(String, String)>>,
    receives: Mutex<usize>,
    next_receipt: Mutex<u64>,
}

impl MemoryEventSource {
    pub fn push_body(&self, body: impl Into<String>) {
        let mut next = self.next_receipt.lock().unwrap();
        *next += 1;
        self.pending.lock().unwrap().push_back(Delivery {
            body: body.into(),
            receipt: format!("receipt-{}", *next),
            delivery_count: 1,
        });
    }

    pub fn push_event(&self, event: &AcceptedImageEvent) {
        self.push_body(event.to_json().unwrap());
    }

    /// Puts unacked in-flight deliveries back, as a visibility timeout would.
    pub fn expire_visibility(&self) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let mut pending = self.pending.lock().unwrap();
        for mut delivery in in_flight.drain(..) {
            delivery.delivery_count += 1;
            pending.push_back(delivery);
        }
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn dead_lettered(&self) -> Vec<(String, String)> {
        self.dead_lettered.lock().unwrap().clone()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn receive_count(&self) -> usize {
        *self.receives.lock().unwrap()
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn receive(&self, _wait_seconds: i32) -> PipelineResult<Vec<Delivery>> {
        *self.receives.lock().unwrap() += 1;
        let next = self.pending.lock().unwrap().pop_front();
        match next {
            Some(delivery) => {
                self.in_flight.lock().unwrap().push(delivery.clone());
                Ok(vec![delivery])
            }
            None => {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> PipelineResult<()> {
        self.in_flight
            .lock()
            .unwrap()
            .retain(|d| d.receipt != delivery.receipt);
        self.acked.lock().unwrap().push(delivery.receipt.clone());
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> PipelineResult<()> {
        self.dead_lettered
            .lock()
            .unwrap()
            .push((delivery.body.clone(), reason.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Pipeline {
    pub blobs: Arc<MemoryBlobStore>,
    pub descriptors: Arc<MemoryDescriptorStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub images: ImageService,
    pub engine: DerivationEngine,
}

impl Pipeline {
    pub fn new() -> Self {
        let blobs = Arc::new(MemoryBlobStore::default());
        let descriptors = Arc::new(MemoryDescriptorStore::default());
        let publisher = Arc::new(RecordingPublisher::new(Arc::clone(&descriptors)));

        let images = ImageService::new(
            blobs.clone(),
            descriptors.clone(),
            publisher.clone(),
            MAX_BYTES,
        );
        let engine = DerivationEngine::new(blobs.clone(), descriptors.clone(), WIDTHS.to_vec());

        Self {
            blobs,
            descriptors,
            publisher,
            images,
            engine,
        }
    }

    /// Ingests and returns the event that was published for it.
    pub async fn accept(&self, bytes: Bytes, filename: &str) -> AcceptedImageEvent {
        let receipt = self
            .images
            .ingest(bytes, filename)
            .await
            .expect("ingest failed");
        self.publisher
            .events()
            .into_iter()
            .find(|event| event.id == receipt.id)
            .expect("no event published")
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn encode(image: DynamicImage, format: ImageFormat) -> Bytes {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).expect("encode fixture");
    Bytes::from(buffer.into_inner())
}

pub fn jpeg_bytes(width: u32, height: u32) -> Bytes {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    encode(DynamicImage::ImageRgb8(image), ImageFormat::Jpeg)
}

pub fn png_bytes(width: u32, height: u32) -> Bytes {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 200, 255])
    });
    encode(DynamicImage::ImageRgba8(image), ImageFormat::Png)
}

pub fn gif_bytes(width: u32, height: u32) -> Bytes {
    let image = RgbaImage::from_fn(width, height, |x, _| {
        if x % 2 == 0 {
            Rgba([255, 0, 0, 255])
        } else {
            Rgba([0, 0, 255, 255])
        }
    });
    encode(DynamicImage::ImageRgba8(image), ImageFormat::Gif)
}
