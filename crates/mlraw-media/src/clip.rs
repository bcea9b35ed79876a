//! The clip handle used by players and exporters.

use crate::cache::FrameCache;
use crate::config::ClipOptions;
use crate::container::{open_container, ContainerFormat, ContainerKind, OpenContext};
use crate::metadata::MetadataStore;
use crate::preloader::{load_frame, FramePreloader};
use crate::probe::{detect_kind, ClipInfo};
use mlraw_core::{FrameRate, RawError, Result, SharedFrame};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// An open clip.
///
/// Call [`preload_frame`](Self::preload_frame) for the frames you will need
/// soon and [`frame`](Self::frame) for the one you need now. `frame` blocks
/// until that exact frame is available; frames that cannot be read come back
/// black rather than as errors.
pub struct RawClip {
    path: PathBuf,
    options: ClipOptions,
    container: Arc<dyn ContainerFormat>,
    metadata: Arc<MetadataStore>,
    cache: Mutex<FrameCache>,
    preloader: FramePreloader,
    closed: AtomicBool,
}

impl RawClip {
    /// Open a clip with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ClipOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: ClipOptions) -> Result<Self> {
        let path = path.as_ref();
        options.validate()?;
        let kind = detect_kind(path)?;

        let metadata = Arc::new(if options.sidecar {
            MetadataStore::open(path)
        } else {
            MetadataStore::in_memory()
        });
        let ctx = OpenContext {
            options: &options,
            metadata: options.sidecar.then(|| Arc::clone(&metadata)),
        };
        let container: Arc<dyn ContainerFormat> = Arc::from(open_container(path, kind, &ctx)?);
        let preloader =
            FramePreloader::start(Arc::clone(&container), options.preload_queue_depth)?;

        info!(
            path = %path.display(),
            kind = %kind,
            frames = container.frame_count(),
            "Clip opened"
        );
        Ok(Self {
            path: path.to_path_buf(),
            cache: Mutex::new(FrameCache::new(options.cache_capacity)),
            options,
            container,
            metadata,
            preloader,
            closed: AtomicBool::new(false),
        })
    }

    /// Stop background work and release files. Idempotent; also run on drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.preloader.shutdown();
        self.container.close();
        self.cache.lock().clear();
        debug!(path = %self.path.display(), "Clip closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ContainerKind {
        self.container.kind()
    }

    pub fn options(&self) -> &ClipOptions {
        &self.options
    }

    pub fn frames(&self) -> usize {
        self.container.frame_count()
    }

    pub fn width(&self) -> u32 {
        self.container.width()
    }

    pub fn height(&self) -> u32 {
        self.container.height()
    }

    pub fn fps(&self) -> FrameRate {
        self.container.fps()
    }

    /// Fraction of the clip indexed, 1.0 once every frame can be located.
    pub fn indexing_status(&self) -> f32 {
        self.container.indexing_status()
    }

    /// Wait for background indexing to finish. Returns whether it did
    /// within `timeout`.
    pub fn wait_indexed(&self, timeout: Duration) -> bool {
        self.container.wait_indexed(timeout)
    }

    /// Full container metadata.
    pub fn format(&self) -> &dyn ContainerFormat {
        self.container.as_ref()
    }

    pub fn info(&self) -> ClipInfo {
        ClipInfo::from_container(self.container.as_ref(), self.metadata.path())
    }

    /// Ask for `index` to be loaded in the background. Does nothing for
    /// frames already cached, queued, out of range, or after close.
    pub fn preload_frame(&self, index: usize) {
        if self.is_closed() || index >= self.frames() || self.cache.lock().contains(index) {
            return;
        }
        self.preloader.request(index);
    }

    /// The frame at `index`, waiting for it to load if needed.
    pub fn frame(&self, index: usize) -> Result<SharedFrame> {
        let count = self.frames();
        if index >= count {
            return Err(RawError::OutOfRange { index, count });
        }
        if self.is_closed() {
            return Err(RawError::InvalidParameter("clip is closed".into()));
        }
        {
            let mut cache = self.cache.lock();
            cache.set_cursor(index);
            if let Some(frame) = cache.get(index) {
                return Ok(frame);
            }
        }

        let poll = Duration::from_millis(self.options.frame_wait_poll_ms.max(1));
        loop {
            if let Some(frame) = self.cache.lock().get(index) {
                return Ok(frame);
            }
            if !self.preloader.is_pending(index) {
                self.preloader.request_urgent(index);
            }
            match self.preloader.recv_timeout(poll) {
                Ok(Some((done, frame))) => {
                    self.cache.lock().insert(Arc::clone(&frame));
                    if done == index {
                        return Ok(frame);
                    }
                }
                _ if self.preloader.is_shut_down() => {
                    return Err(RawError::InvalidParameter("clip is closed".into()));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(frame = index, error = %e, "Loading frame on the calling thread");
                    let frame = load_frame(self.container.as_ref(), index);
                    self.cache.lock().insert(Arc::clone(&frame));
                    return Ok(frame);
                }
            }
        }
    }

    /// Move finished background frames into the cache without blocking.
    /// Returns how many arrived.
    pub fn poll(&self) -> usize {
        let mut arrived = 0;
        while let Some((_, frame)) = self.preloader.try_result() {
            self.cache.lock().insert(frame);
            arrived += 1;
        }
        arrived
    }

    /// Cached frame, if present.
    pub fn cached_frame(&self, index: usize) -> Option<SharedFrame> {
        self.cache.lock().get(index)
    }

    pub fn cached_indices(&self) -> Vec<usize> {
        self.cache.lock().indices()
    }

    pub fn get_meta(&self, key: &str) -> Option<Value> {
        self.metadata.get_meta(key)
    }

    /// Store a value in the sidecar. Returns whether anything changed.
    pub fn set_meta<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<bool> {
        self.metadata.set_meta(key, value)
    }

    pub fn set_meta_values<I>(&self, entries: I) -> Result<bool>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.metadata.set_meta_values(entries)
    }

    pub fn remove_meta(&self, key: &str) -> Result<bool> {
        self.metadata.remove_meta(key)
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }
}

impl Drop for RawClip {
    fn drop(&mut self) {
        self.close();
    }
}
