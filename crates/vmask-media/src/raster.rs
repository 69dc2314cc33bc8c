//! Mask rasters and pixel hit-testing.
//!
//! Masks come back from the segmentation service as a color overlay, not as
//! a binary channel: alpha is uniformly opaque, and the selected region is
//! painted green. Hit-testing therefore classifies pixels by color.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::RgbaImage;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use vmask_models::Resolution;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// A decoded mask raster (still image, or the first frame of a video mask).
#[derive(Debug, Clone)]
pub struct MaskRaster {
    image: RgbaImage,
}

impl MaskRaster {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Decode an encoded image (PNG, JPEG, WebP...).
    pub fn from_bytes(bytes: &[u8]) -> MediaResult<Self> {
        Ok(Self::new(image::load_from_memory(bytes)?.to_rgba8()))
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.image.width(), self.image.height())
    }

    /// RGBA value at an integer pixel, `None` outside the raster.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.image.width() || y >= self.image.height() {
            return None;
        }
        Some(self.image.get_pixel(x, y).0)
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

/// Whether an RGB triple belongs to the highlighted mask region.
///
/// Mask-positive iff `G > R`, `G > B` and either `G > 80` or G leads both
/// other channels by more than 30.
pub fn is_mask_rgb(r: u8, g: u8, b: u8) -> bool {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    g > r && g > b && (g > 80 || (g - r > 30 && g - b > 30))
}

/// Classify the raster pixel at `(x, y)`. Out-of-bounds coordinates are never part of the mask.
pub fn hit_test(raster: &MaskRaster, x: f64, y: f64) -> bool {
    if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
        return false;
    }
    match raster.pixel(x.floor() as u32, y.floor() as u32) {
        Some([r, g, b, _]) => is_mask_rgb(r, g, b),
        None => false,
    }
}

/// Source of decoded mask rasters.
#[async_trait]
pub trait RasterLoader: Send + Sync {
    /// Decode the raster behind `reference`; for video masks, the first frame.
    async fn load(&self, reference: &str, is_video: bool) -> MediaResult<MaskRaster>;
}

/// Loads rasters from data URLs, local files, or anything FFmpeg can open.
pub struct FfmpegRasterLoader {
    work_dir: PathBuf,
    timeout: Duration,
}

impl FfmpegRasterLoader {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn first_frame(&self, input: &str) -> MediaResult<MaskRaster> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        // removed on drop, whether or not the decode succeeds
        let output = tempfile::Builder::new()
            .prefix("raster_")
            .suffix(".png")
            .tempfile_in(&self.work_dir)?;

        let cmd = FfmpegCommand::new(input, output.path()).single_frame();
        FfmpegRunner::new().with_timeout(self.timeout).run(&cmd).await?;

        let bytes = tokio::fs::read(output.path()).await?;
        MaskRaster::from_bytes(&bytes)
    }
}

#[async_trait]
impl RasterLoader for FfmpegRasterLoader {
    async fn load(&self, reference: &str, is_video: bool) -> MediaResult<MaskRaster> {
        if let Some(bytes) = decode_data_url(reference)? {
            if !is_video {
                return MaskRaster::from_bytes(&bytes);
            }
            tokio::fs::create_dir_all(&self.work_dir).await?;
            let file = tempfile::Builder::new()
                .prefix("mask_")
                .suffix(".mp4")
                .tempfile_in(&self.work_dir)?;
            tokio::fs::write(file.path(), &bytes).await?;
            return self.first_frame(&file.path().to_string_lossy()).await;
        }

        if !is_video && std::path::Path::new(reference).is_file() {
            let bytes = tokio::fs::read(reference).await?;
            return MaskRaster::from_bytes(&bytes);
        }

        self.first_frame(reference).await
    }
}

/// Decode a base64 `data:` URL. Returns `None` for anything that is not a data URL.
pub(crate) fn decode_data_url(reference: &str) -> MediaResult<Option<Vec<u8>>> {
    let Some(rest) = reference.strip_prefix("data:") else {
        return Ok(None);
    };
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| MediaError::InvalidDataUrl("missing ',' separator".to_string()))?;
    if !meta.ends_with(";base64") {
        return Err(MediaError::InvalidDataUrl(
            "only base64 data URLs are supported".to_string(),
        ));
    }
    STANDARD
        .decode(payload.trim())
        .map(Some)
        .map_err(|e| MediaError::InvalidDataUrl(e.to_string()))
}

type Slot = Arc<OnceCell<Arc<MaskRaster>>>;

struct CacheEntries {
    slots: HashMap<String, Slot>,
    order: VecDeque<String>,
}

/// Decode-once cache of mask rasters keyed by reference.
///
/// The map lock is only held to find or create a slot. Decoding happens on
/// the slot itself, so a slow reference never blocks lookups of other ones,
/// and concurrent callers for the same reference share one decode.
pub struct RasterCache {
    loader: Arc<dyn RasterLoader>,
    capacity: usize,
    entries: Mutex<CacheEntries>,
}

impl RasterCache {
    pub fn new(loader: Arc<dyn RasterLoader>, capacity: usize) -> Self {
        Self {
            loader,
            capacity: capacity.max(1),
            entries: Mutex::new(CacheEntries {
                slots: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Get the raster for `reference`, decoding it on first use.
    pub async fn get(&self, reference: &str, is_video: bool) -> MediaResult<Arc<MaskRaster>> {
        let slot = self.slot(reference).await;
        let result = slot
            .get_or_try_init(|| async {
                debug!(reference = %truncate(reference), is_video, "Decoding mask raster");
                self.loader.load(reference, is_video).await.map(Arc::new)
            })
            .await
            .cloned();

        if result.is_err() {
            // let the next lookup try again
            let mut entries = self.entries.lock().await;
            if entries.slots.get(reference).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                entries.slots.remove(reference);
                entries.order.retain(|r| r != reference);
            }
        }
        result
    }

    async fn slot(&self, reference: &str) -> Slot {
        let mut entries = self.entries.lock().await;
        if let Some(slot) = entries.slots.get(reference) {
            return slot.clone();
        }

        if entries.order.len() >= self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.slots.remove(&oldest);
            }
        }
        let slot: Slot = Arc::new(OnceCell::new());
        entries.order.push_back(reference.to_string());
        entries.slots.insert(reference.to_string(), slot.clone());
        slot
    }

    /// Drop every cached raster.
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.slots.clear();
        entries.order.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.slots.len()
    }
}

fn truncate(reference: &str) -> &str {
    match reference.char_indices().nth(64) {
        Some((idx, _)) => &reference[..idx],
        None => reference,
    }
}
