//! `src/cache/thumbnail_cache.rs`
//! ============================================================================
//! # Thumbnail cache
//!
//! Scaled previews keyed by absolute path, held in a bounded `moka` cache and
//! produced by one long-lived decode thread fed through a `flume` queue.
//!
//! - a request for a cached path answers immediately
//! - otherwise the job is queued and the caller gets a one-shot receiver
//! - the decoded image is inserted before the caller is notified
//! - concurrent requests for one path decode once (`try_get_with`)
//! - [`ThumbnailCache::cancel_all`] skips every job queued before the call;
//!   a decode already running is allowed to finish

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use compact_str::CompactString;
use image::{DynamicImage, ImageReader, RgbaImage, imageops::FilterType};
use moka::sync::Cache;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::ThumbnailConfig,
    error::{CoreError, CoreResult},
};

const THUMBNAIL_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "tiff", "bmp", "webp"];

/// Whether a file with this name gets an image preview.
#[must_use]
pub fn is_thumbnail_candidate(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext: &str| {
            THUMBNAIL_EXTENSIONS
                .iter()
                .any(|known: &&str| known.eq_ignore_ascii_case(ext))
        })
}

// ============================================================================
// Decoding
// ============================================================================

/// A decoded preview. Cloning shares the pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct Thumbnail {
    image: Arc<RgbaImage>,
}

impl Thumbnail {
    #[must_use]
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thumbnail({}x{})", self.width(), self.height())
    }
}

/// How hard to shrink while decoding, chosen from the file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePlan {
    /// Decode everything, then scale to the requested box.
    Full,
    /// Keep one pixel in `n` along each axis.
    Subsample(u32),
}

impl DecodePlan {
    #[must_use]
    pub fn for_file_size(len: u64, config: &ThumbnailConfig) -> Self {
        if len < config.low_threshold_bytes {
            Self::Full
        } else if len > config.high_threshold_bytes {
            Self::Subsample(config.aggressive_sample_factor.max(1))
        } else {
            Self::Subsample(config.medium_sample_factor.max(1))
        }
    }
}

pub trait ImageDecoder: Send + Sync + 'static {
    fn decode(&self, path: &Path, plan: DecodePlan, width: u32, height: u32) -> CoreResult<RgbaImage>;
}

/// Decoder backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, path: &Path, plan: DecodePlan, width: u32, height: u32) -> CoreResult<RgbaImage> {
        let image: DynamicImage = ImageReader::open(path)
            .map_err(|e| CoreError::io_at(path, e))?
            .with_guessed_format()
            .map_err(|e| CoreError::io_at(path, e))?
            .decode()
            .map_err(|e| CoreError::decode(path, e))?;

        let scaled: DynamicImage = match plan {
            DecodePlan::Full => image.resize_exact(width.max(1), height.max(1), FilterType::Triangle),
            DecodePlan::Subsample(factor) => {
                image.thumbnail((image.width() / factor).max(1), (image.height() / factor).max(1))
            }
        };

        Ok(scaled.to_rgba8())
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
struct ThumbnailStats {
    hits: AtomicU64,
    misses: AtomicU64,
    decodes: AtomicU64,
    decode_failures: AtomicU64,
    skipped: AtomicU64,
    total_decode_time_ns: AtomicU64,
}

impl ThumbnailStats {
    #[expect(clippy::cast_possible_truncation, reason = "Nanoseconds fit in u64 for any real decode")]
    fn record_decode(&self, duration: Duration, success: bool) {
        self.decodes.fetch_add(1, Ordering::Relaxed);
        self.total_decode_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);

        if !success {
            self.decode_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> ThumbnailStatsSnapshot {
        let decodes: u64 = self.decodes.load(Ordering::Relaxed);
        let total_ns: u64 = self.total_decode_time_ns.load(Ordering::Relaxed);

        ThumbnailStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            decodes,
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            average_decode_time: if decodes > 0 {
                Duration::from_nanos(total_ns / decodes)
            } else {
                Duration::ZERO
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub decodes: u64,
    pub decode_failures: u64,

    /// Jobs dropped by `cancel_all` before they were decoded.
    pub skipped: u64,
    pub average_decode_time: Duration,
}

impl ThumbnailStatsSnapshot {
    #[expect(clippy::cast_precision_loss, reason = "Expected precision loss")]
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total: u64 = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Answer to [`ThumbnailCache::request_thumbnail`].
#[derive(Debug)]
pub enum ThumbnailRequest {
    Ready(Thumbnail),
    Pending(PendingThumbnail),
}

/// A queued decode. Resolves to `None` if the decode failed or the job was
/// cancelled.
#[derive(Debug)]
pub struct PendingThumbnail {
    rx: oneshot::Receiver<Thumbnail>,
}

impl PendingThumbnail {
    pub async fn wait(self) -> Option<Thumbnail> {
        self.rx.await.ok()
    }

    /// Blocking variant for callers outside an async runtime.
    #[must_use]
    pub fn blocking_wait(self) -> Option<Thumbnail> {
        self.rx.blocking_recv().ok()
    }
}

struct DecodeJob {
    path: PathBuf,
    width: u32,
    height: u32,
    epoch: u64,
    reply: oneshot::Sender<Thumbnail>,
}

struct Shared {
    cache: Cache<PathBuf, Thumbnail>,
    config: ThumbnailConfig,
    decoder: Arc<dyn ImageDecoder>,
    stats: ThumbnailStats,
    epoch: AtomicU64,
}

// ============================================================================
// ThumbnailCache
// ============================================================================

pub struct ThumbnailCache {
    shared: Arc<Shared>,
    jobs: Option<flume::Sender<DecodeJob>>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for ThumbnailCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThumbnailCache")
            .field("entries", &self.shared.cache.entry_count())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl ThumbnailCache {
    /// Cache decoding with the `image` crate.
    pub fn new(config: ThumbnailConfig) -> CoreResult<Self> {
        Self::with_decoder(config, Arc::new(ImageCrateDecoder))
    }

    pub fn with_decoder(config: ThumbnailConfig, decoder: Arc<dyn ImageDecoder>) -> CoreResult<Self> {
        let mut builder = Cache::builder().max_capacity(config.max_entries);

        if let Some(tti) = config.time_to_idle {
            builder = builder.time_to_idle(tti);
        }

        let shared = Arc::new(Shared {
            cache: builder.build(),
            config,
            decoder,
            stats: ThumbnailStats::default(),
            epoch: AtomicU64::new(0),
        });

        let (jobs, queue) = flume::unbounded::<DecodeJob>();
        let worker_shared: Arc<Shared> = Arc::clone(&shared);

        let worker: JoinHandle<()> = thread::Builder::new()
            .name("manager-thumbnails".into())
            .spawn(move || decode_loop(&worker_shared, &queue))
            .map_err(|e| CoreError::Other(CompactString::from(format!("thumbnail worker spawn failed: {e}"))))?;

        info!(
            marker = "THUMBNAIL_CACHE_READY",
            operation_type = "thumbnail_init",
            max_entries = shared.config.max_entries,
            "Thumbnail cache started"
        );

        Ok(Self {
            shared,
            jobs: Some(jobs),
            worker: Some(worker),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ThumbnailConfig {
        &self.shared.config
    }

    /// Cached preview for `path`, if any.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Thumbnail> {
        let found: Option<Thumbnail> = self.shared.cache.get(path);

        if found.is_some() {
            self.shared.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.shared.stats.misses.fetch_add(1, Ordering::Relaxed);
        }

        found
    }

    /// Cached preview, or a pending decode scaled towards `width` x `height`.
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), width = width, height = height))]
    pub fn request_thumbnail(&self, path: &Path, width: u32, height: u32) -> ThumbnailRequest {
        if let Some(thumbnail) = self.get(path) {
            return ThumbnailRequest::Ready(thumbnail);
        }

        let (reply, rx) = oneshot::channel();
        let job = DecodeJob {
            path: path.to_path_buf(),
            width,
            height,
            epoch: self.shared.epoch.load(Ordering::Acquire),
            reply,
        };

        match &self.jobs {
            Some(jobs) if jobs.send(job).is_ok() => {}
            _ => warn!("Thumbnail worker is gone, request dropped"),
        }

        ThumbnailRequest::Pending(PendingThumbnail { rx })
    }

    /// Skip every job queued so far. A decode in progress still completes and
    /// is cached.
    pub fn cancel_all(&self) {
        let epoch: u64 = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(epoch, "Thumbnail queue cancelled");
    }

    pub fn invalidate(&self, path: &Path) {
        self.shared.cache.invalidate(path);
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.shared.cache.run_pending_tasks();
        self.shared.cache.entry_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> ThumbnailStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for ThumbnailCache {
    fn drop(&mut self) {
        self.cancel_all();

        // Closing the queue ends the worker loop.
        drop(self.jobs.take());

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Thumbnail worker panicked");
            }
        }
    }
}

fn decode_loop(shared: &Shared, queue: &flume::Receiver<DecodeJob>) {
    while let Ok(job) = queue.recv() {
        if job.epoch < shared.epoch.load(Ordering::Acquire) {
            shared.stats.skipped.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        if job.reply.is_closed() {
            continue;
        }

        if let Some(thumbnail) = load(shared, &job.path, job.width, job.height) {
            let _ = job.reply.send(thumbnail);
        }
    }

    debug!("Thumbnail worker stopped");
}

fn load(shared: &Shared, path: &Path, width: u32, height: u32) -> Option<Thumbnail> {
    let result: Result<Thumbnail, Arc<CoreError>> =
        shared.cache.try_get_with(path.to_path_buf(), || -> CoreResult<Thumbnail> {
            let start: Instant = Instant::now();
            let len: u64 = std::fs::metadata(path)
                .map_err(|e| CoreError::io_at(path, e))?
                .len();
            let plan: DecodePlan = DecodePlan::for_file_size(len, &shared.config);

            let decoded: CoreResult<RgbaImage> = shared.decoder.decode(path, plan, width, height);
            shared.stats.record_decode(start.elapsed(), decoded.is_ok());

            debug!(
                marker = "THUMBNAIL_DECODED",
                operation_type = "thumbnail_decode",
                path = %path.display(),
                ?plan,
                success = decoded.is_ok(),
                "Thumbnail decode finished"
            );

            decoded.map(Thumbnail::new)
        });

    match result {
        Ok(thumbnail) => Some(thumbnail),
        Err(e) => {
            let _ = CoreError::from(e).trace();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingDecoder {
        calls: AtomicUsize,
        started: Option<flume::Sender<()>>,
        gate: Option<flume::Receiver<()>>,
    }

    impl ImageDecoder for CountingDecoder {
        fn decode(&self, _path: &Path, _plan: DecodePlan, width: u32, height: u32) -> CoreResult<RgbaImage> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(started) = &self.started {
                let _ = started.send(());
            }
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }

            Ok(RgbaImage::new(width, height))
        }
    }

    fn images(count: usize) -> (TempDir, Vec<PathBuf>) {
        let temp_dir = TempDir::new().unwrap();
        let paths = (0..count)
            .map(|i| {
                let path = temp_dir.path().join(format!("img{i}.png"));
                std::fs::write(&path, b"not really a png").unwrap();
                path
            })
            .collect();
        (temp_dir, paths)
    }

    async fn resolve(request: ThumbnailRequest) -> Option<Thumbnail> {
        match request {
            ThumbnailRequest::Ready(thumbnail) => Some(thumbnail),
            ThumbnailRequest::Pending(pending) => pending.wait().await,
        }
    }

    #[test]
    fn decode_plan_is_a_step_function_of_size() {
        let config = ThumbnailConfig::default();

        assert_eq!(DecodePlan::for_file_size(0, &config), DecodePlan::Full);
        assert_eq!(
            DecodePlan::for_file_size(config.low_threshold_bytes, &config),
            DecodePlan::Subsample(config.medium_sample_factor)
        );
        assert_eq!(
            DecodePlan::for_file_size(config.high_threshold_bytes + 1, &config),
            DecodePlan::Subsample(32)
        );
    }

    #[test]
    fn candidates_by_extension() {
        assert!(is_thumbnail_candidate(Path::new("/sdcard/DCIM/a.JPG")));
        assert!(is_thumbnail_candidate(Path::new("b.tiff")));
        assert!(!is_thumbnail_candidate(Path::new("song.mp3")));
        assert!(!is_thumbnail_candidate(Path::new("noext")));
    }

    #[tokio::test]
    async fn duplicate_requests_decode_once() {
        let (_temp_dir, paths) = images(1);
        let decoder = Arc::new(CountingDecoder::default());
        let cache = ThumbnailCache::with_decoder(ThumbnailConfig::default(), decoder.clone()).unwrap();

        let first = cache.request_thumbnail(&paths[0], 8, 8);
        let second = cache.request_thumbnail(&paths[0], 8, 8);

        let a = resolve(first).await.unwrap();
        let b = resolve(second).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);

        assert!(matches!(
            cache.request_thumbnail(&paths[0], 8, 8),
            ThumbnailRequest::Ready(_)
        ));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().decodes, 1);
    }

    #[tokio::test]
    async fn cancel_all_skips_queued_but_not_in_flight() {
        let (_temp_dir, paths) = images(3);
        let (started_tx, started_rx) = flume::unbounded();
        let (gate_tx, gate_rx) = flume::unbounded();
        let decoder = Arc::new(CountingDecoder {
            started: Some(started_tx),
            gate: Some(gate_rx),
            ..CountingDecoder::default()
        });
        let cache = ThumbnailCache::with_decoder(ThumbnailConfig::default(), decoder.clone()).unwrap();

        let in_flight = cache.request_thumbnail(&paths[0], 4, 4);
        started_rx.recv_async().await.unwrap();

        let queued: Vec<ThumbnailRequest> = paths[1..]
            .iter()
            .map(|path| cache.request_thumbnail(path, 4, 4))
            .collect();

        cache.cancel_all();
        gate_tx.send(()).unwrap();

        assert!(resolve(in_flight).await.is_some());
        for request in queued {
            assert!(resolve(request).await.is_none());
        }

        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().skipped, 2);
        assert!(cache.get(&paths[0]).is_some());

        // Requests made after the cancel run normally.
        gate_tx.send(()).unwrap();
        assert!(resolve(cache.request_thumbnail(&paths[1], 4, 4)).await.is_some());
    }

    #[tokio::test]
    async fn failed_decode_is_not_cached() {
        let temp_dir = TempDir::new().unwrap();
        let bogus = temp_dir.path().join("broken.png");
        std::fs::write(&bogus, b"garbage").unwrap();

        let cache = ThumbnailCache::new(ThumbnailConfig::default()).unwrap();
        assert!(resolve(cache.request_thumbnail(&bogus, 8, 8)).await.is_none());
        assert!(cache.get(&bogus).is_none());
        assert_eq!(cache.stats().decode_failures, 1);
    }

    #[tokio::test]
    async fn small_image_is_scaled_to_requested_box() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("small.png");
        RgbaImage::from_pixel(64, 48, image::Rgba([200, 10, 10, 255]))
            .save(&path)
            .unwrap();

        let cache = ThumbnailCache::new(ThumbnailConfig::default()).unwrap();
        let thumbnail = resolve(cache.request_thumbnail(&path, 16, 16)).await.unwrap();

        assert_eq!((thumbnail.width(), thumbnail.height()), (16, 16));
    }
}
