//! Background frame loading.
//!
//! One worker thread per clip pops requested indices off a small queue,
//! reads and unpacks the frame, and posts the result on a channel. The
//! queue is bounded: when playback runs ahead faster than frames decode,
//! the oldest request that has not started yet is dropped. A frame whose
//! reader fails or panics is delivered black.

use crate::container::ContainerFormat;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use mlraw_core::{RawError, Result, SharedFrame};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<usize>,
    in_flight: Option<usize>,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<QueueState>,
    wake: Condvar,
}

/// Frame preloading worker for one clip.
pub struct FramePreloader {
    shared: Arc<Shared>,
    results: Receiver<(usize, SharedFrame)>,
    worker: Mutex<Option<JoinHandle<()>>>,
    depth: usize,
}

impl FramePreloader {
    pub fn start(container: Arc<dyn ContainerFormat>, depth: usize) -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let (tx, rx) = unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("mlraw-preload".into())
            .spawn(move || run_worker(container, worker_shared, tx))?;
        Ok(Self {
            shared,
            results: rx,
            worker: Mutex::new(Some(worker)),
            depth: depth.max(1),
        })
    }

    /// Queue `index` behind earlier requests. Returns false when it was
    /// already queued or being loaded.
    pub fn request(&self, index: usize) -> bool {
        let mut state = self.shared.state.lock();
        if state.shutdown || state.in_flight == Some(index) || state.pending.contains(&index) {
            return false;
        }
        state.pending.push_back(index);
        while state.pending.len() > self.depth {
            if let Some(dropped) = state.pending.pop_front() {
                trace!(dropped, "Preload queue full, dropping oldest request");
            }
        }
        self.shared.wake.notify_one();
        true
    }

    /// Queue `index` ahead of everything else. On a full queue the oldest
    /// of the other requests is dropped.
    pub fn request_urgent(&self, index: usize) {
        let mut state = self.shared.state.lock();
        if state.shutdown || state.in_flight == Some(index) {
            return;
        }
        state.pending.retain(|&i| i != index);
        state.pending.push_front(index);
        while state.pending.len() > self.depth {
            if let Some(dropped) = state.pending.remove(1) {
                trace!(dropped, urgent = index, "Preload queue full, dropping oldest request");
            }
        }
        self.shared.wake.notify_one();
    }

    /// Whether `index` is queued or being loaded.
    pub fn is_pending(&self, index: usize) -> bool {
        let state = self.shared.state.lock();
        state.in_flight == Some(index) || state.pending.contains(&index)
    }

    pub fn queued(&self) -> Vec<usize> {
        self.shared.state.lock().pending.iter().copied().collect()
    }

    /// A finished frame, if one is waiting.
    pub fn try_result(&self) -> Option<(usize, SharedFrame)> {
        self.results.try_recv().ok()
    }

    /// Wait up to `timeout` for the next finished frame. `Ok(None)` on
    /// timeout, an error once the worker is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<(usize, SharedFrame)>> {
        match self.results.recv_timeout(timeout) {
            Ok(result) => Ok(Some(result)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(RawError::Internal("preload worker has exited".into()))
            }
        }
    }

    /// Stop the worker and wait for it. Pending requests are discarded.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.pending.clear();
            self.shared.wake.notify_all();
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("Preload worker panicked");
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().shutdown
    }
}

impl Drop for FramePreloader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    container: Arc<dyn ContainerFormat>,
    shared: Arc<Shared>,
    results: Sender<(usize, SharedFrame)>,
) {
    debug!(kind = %container.kind(), "Preload worker started");
    loop {
        let index = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    debug!("Preload worker stopped");
                    return;
                }
                if let Some(index) = state.pending.pop_front() {
                    state.in_flight = Some(index);
                    break index;
                }
                shared.wake.wait(&mut state);
            }
        };

        let frame = load_frame(container.as_ref(), index);
        let sent = results.send((index, frame)).is_ok();
        shared.state.lock().in_flight = None;
        if !sent {
            return;
        }
    }
}

/// Read and unpack one frame. Failures, panics included, produce a black
/// frame.
pub(crate) fn load_frame(container: &dyn ContainerFormat, index: usize) -> SharedFrame {
    let started = Instant::now();
    let loaded = panic::catch_unwind(AssertUnwindSafe(|| {
        container.read_frame(index).map(|frame| {
            frame.convert();
            frame
        })
    }))
    .unwrap_or_else(|payload| {
        Err(RawError::Internal(format!(
            "frame reader panicked: {}",
            panic_message(payload.as_ref())
        )))
    });
    let frame = match loaded {
        Ok(frame) => frame,
        Err(e) => {
            match &e {
                // already reported once by the indexer
                RawError::NotFound(_) => {}
                e if e.is_recoverable() => debug!(frame = index, error = %e, "Using black frame"),
                e => warn!(frame = index, error = %e, "Frame load failed, using black frame"),
            }
            let black = container.black_frame(index);
            black.convert();
            black
        }
    };
    trace!(
        frame = index,
        elapsed_us = started.elapsed().as_micros() as u64,
        "Frame loaded"
    );
    Arc::new(frame)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerKind;
    use mlraw_core::{ColorMatrix, Frame, FrameRate, Result, SensorGeometry, SensorLevels};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Synthetic {
        geometry: SensorGeometry,
        frames: usize,
        reads: AtomicUsize,
        delay: Duration,
        panic_on: Option<usize>,
    }

    impl Synthetic {
        fn new(frames: usize, delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                geometry: SensorGeometry::new(8, 2, 16),
                frames,
                reads: AtomicUsize::new(0),
                delay: Duration::from_millis(delay_ms),
                panic_on: None,
            })
        }

        fn panicking(frames: usize, index: usize) -> Arc<Self> {
            Arc::new(Self {
                geometry: SensorGeometry::new(8, 2, 16),
                frames,
                reads: AtomicUsize::new(0),
                delay: Duration::ZERO,
                panic_on: Some(index),
            })
        }
    }

    impl ContainerFormat for Synthetic {
        fn kind(&self) -> ContainerKind {
            ContainerKind::BitmapDirectory
        }
        fn source(&self) -> &Path {
            Path::new("synthetic")
        }
        fn geometry(&self) -> &SensorGeometry {
            &self.geometry
        }
        fn levels(&self) -> SensorLevels {
            SensorLevels::for_bits(16)
        }
        fn color_matrix(&self) -> ColorMatrix {
            ColorMatrix::IDENTITY
        }
        fn fps(&self) -> FrameRate {
            FrameRate::FPS_24
        }
        fn frame_count(&self) -> usize {
            self.frames
        }
        fn read_frame(&self, index: usize) -> Result<Frame> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            if self.panic_on == Some(index) {
                panic!("strip table points past the end of frame {index}");
            }
            if index >= self.frames {
                return Err(RawError::OutOfRange {
                    index,
                    count: self.frames,
                });
            }
            Ok(Frame::new(
                index,
                self.geometry,
                self.levels(),
                mlraw_core::FrameData::Samples16(vec![index as u16; 16]),
            ))
        }
    }

    fn collect(p: &FramePreloader, n: usize) -> Vec<(usize, SharedFrame)> {
        (0..n)
            .filter_map(|_| p.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect()
    }

    #[test]
    fn test_frames_delivered_in_request_order() {
        let source = Synthetic::new(10, 0);
        let p = FramePreloader::start(source, 10).unwrap();
        for i in 0..4 {
            assert!(p.request(i));
        }
        let got: Vec<usize> = collect(&p, 4).into_iter().map(|(i, _)| i).collect();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_duplicate_requests_ignored() {
        let source = Synthetic::new(10, 50);
        let p = FramePreloader::start(Arc::clone(&source) as Arc<dyn ContainerFormat>, 10).unwrap();
        assert!(p.request(1));
        assert!(p.request(2));
        assert!(!p.request(2));
        collect(&p, 2);
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let source = Synthetic::new(100, 100);
        let p = FramePreloader::start(source, 3).unwrap();
        p.request(0);
        // let the worker pick up 0
        let deadline = Instant::now() + Duration::from_secs(5);
        while p.queued().contains(&0) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        for i in 1..=5 {
            p.request(i);
        }
        assert_eq!(p.queued(), vec![3, 4, 5]);
        assert!(p.is_pending(0));
        p.request_urgent(9);
        assert_eq!(p.queued(), vec![9, 4, 5]);
        p.request_urgent(4);
        assert_eq!(p.queued(), vec![4, 9, 5]);
    }

    #[test]
    fn test_failure_becomes_black_frame() {
        let source = Synthetic::new(2, 0);
        let p = FramePreloader::start(source, 4).unwrap();
        p.request(7);
        let (index, frame) = p.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(index, 7);
        assert!(frame.is_black());
        assert_eq!(frame.raw_image().map(|r| r.len()), Some(16));
    }

    #[test]
    fn test_panicking_reader_becomes_black_frame() {
        let source = Synthetic::panicking(4, 1);
        let p = FramePreloader::start(source, 4).unwrap();
        for i in 0..3 {
            p.request(i);
        }
        let got = collect(&p, 3);
        assert_eq!(got.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(!got[0].1.is_black());
        assert!(got[1].1.is_black());
        // worker survives the panic
        assert!(!got[2].1.is_black());
        assert!(!p.is_shut_down());
    }

    #[test]
    fn test_recv_after_shutdown_is_error() {
        let source = Synthetic::new(2, 0);
        let p = FramePreloader::start(source, 4).unwrap();
        assert!(p.recv_timeout(Duration::from_millis(5)).unwrap().is_none());
        p.shutdown();
        assert!(matches!(
            p.recv_timeout(Duration::from_secs(5)),
            Err(RawError::Internal(_))
        ));
    }

    #[test]
    fn test_shutdown_joins_worker() {
        let source = Synthetic::new(2, 0);
        let p = FramePreloader::start(source, 4).unwrap();
        p.shutdown();
        assert!(p.is_shut_down());
        assert!(!p.request(0));
        p.shutdown();
    }
}
