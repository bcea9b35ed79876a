//! Background frame indexing for block containers.
//!
//! A block container only reveals where frame N lives by walking the block
//! chain up to it. The [`Indexer`] runs one actor thread that owns every
//! file cursor and walks the series in order, a few blocks at a time, while
//! playback asks for frames. A lookup for a frame that has not been reached
//! yet is sent to the actor, which serves it between quanta by scanning
//! forward until the frame turns up. Frames already located are answered
//! straight from the shared map without involving the actor.
//!
//! Only the actor writes the frame map and the record list; readers take the
//! read side of the lock.

use crate::audio::AudioSideFile;
use crate::block::{AudioFrameRef, Block, BlockStream, FileHeader, RawInfo, WavInfo};
use crate::metadata::{MetadataStore, FRAME_INDEX_KEY, SIDE_RECORDS_KEY};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use mlraw_core::{FrameSideData, MetadataSnapshot, RawError, Result, SideRecord};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where one video frame's samples are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLocation {
    pub file_index: usize,
    /// File offset of the first sample byte.
    pub offset: u64,
    pub size: u64,
    pub snapshot: MetadataSnapshot,
}

/// Frame index as stored in the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedIndex {
    /// Series size when the index was built; a different size means the
    /// files changed and the index is stale.
    pub total_bytes: u64,
    pub frame_count: u32,
    pub frames: BTreeMap<u32, FrameLocation>,
}

impl PersistedIndex {
    /// Whether this index locates every frame of a series of the given size.
    pub fn covers(&self, total_bytes: u64, frame_count: u32) -> bool {
        self.total_bytes == total_bytes
            && frame_count > 0
            && self.frame_count == frame_count
            && (0..frame_count).all(|i| self.frames.contains_key(&i))
    }
}

#[derive(Debug, Default)]
struct IndexState {
    frames: HashMap<u32, FrameLocation>,
    records: Vec<SideRecord>,
}

#[derive(Debug)]
struct IndexShared {
    state: RwLock<IndexState>,
    parsed_bytes: AtomicU64,
    total_bytes: u64,
    complete: AtomicBool,
    stop: AtomicBool,
    done_lock: Mutex<bool>,
    done: Condvar,
}

impl IndexShared {
    fn new(total_bytes: u64) -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            parsed_bytes: AtomicU64::new(0),
            total_bytes,
            complete: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            done_lock: Mutex::new(false),
            done: Condvar::new(),
        }
    }

    fn lookup(&self, frame: u32) -> Option<FrameLocation> {
        self.state.read().frames.get(&frame).copied()
    }

    fn mark_complete(&self) {
        self.parsed_bytes.store(self.total_bytes, Ordering::Release);
        self.complete.store(true, Ordering::Release);
        let mut done = self.done_lock.lock();
        *done = true;
        self.done.notify_all();
    }
}

/// Audio extraction state while scanning.
#[derive(Default)]
struct AudioSink {
    decided: bool,
    path: Option<PathBuf>,
    format: Option<WavInfo>,
    file: Option<AudioSideFile>,
    queued: Vec<(usize, AudioFrameRef)>,
    failed: bool,
}

impl AudioSink {
    fn disabled(&self) -> bool {
        self.failed || (self.decided && self.path.is_none())
    }
}

/// Sequential cursor over every file of a block container series.
///
/// Used directly while a container reads its headers, then handed to the
/// indexer actor.
pub(crate) struct Scanner {
    streams: Vec<BlockStream<File>>,
    current: usize,
    shared: Arc<IndexShared>,
    records: Vec<SideRecord>,
    finished_bytes: u64,
    frame_limit: Option<u32>,
    header: Option<FileHeader>,
    raw_info: Option<RawInfo>,
    audio: AudioSink,
    metadata: Option<Arc<MetadataStore>>,
    started: Instant,
}

impl Scanner {
    /// Open every file of the series. The first file must start with a file
    /// header block.
    pub(crate) fn open(paths: &[PathBuf]) -> Result<Self> {
        let mut streams = Vec::with_capacity(paths.len());
        for (i, path) in paths.iter().enumerate() {
            let mut file = File::open(path)?;
            if i == 0 {
                check_magic(&mut file, path)?;
            }
            streams.push(BlockStream::new(file)?);
        }
        let total_bytes = streams.iter().map(BlockStream::size).sum();
        Ok(Self {
            streams,
            current: 0,
            shared: Arc::new(IndexShared::new(total_bytes)),
            records: Vec::new(),
            finished_bytes: 0,
            frame_limit: None,
            header: None,
            raw_info: None,
            audio: AudioSink::default(),
            metadata: None,
            started: Instant::now(),
        })
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.shared.total_bytes
    }

    pub(crate) fn file_count(&self) -> usize {
        self.streams.len()
    }

    /// Parse until both the file header and the raw image description of
    /// the first file are known.
    pub(crate) fn scan_header(&mut self) -> Result<(FileHeader, RawInfo)> {
        while self.header.is_none() || self.raw_info.is_none() {
            if self.current > 0 || self.step().is_none() {
                break;
            }
        }
        match (self.header.clone(), self.raw_info.clone()) {
            (Some(h), Some(r)) => Ok((h, r)),
            (None, _) => Err(RawError::corrupt("no file header block")),
            (_, None) => Err(RawError::corrupt("no raw image description block")),
        }
    }

    /// Video and audio frame counts summed over the `MLVI` header of every
    /// file. A file without a readable header adds nothing.
    pub(crate) fn series_frame_counts(&mut self) -> (u32, u32) {
        let mut video = 0u32;
        let mut audio = 0u32;
        for (file, stream) in self.streams.iter_mut().enumerate() {
            match stream.file_header() {
                Some(h) => {
                    video = video.saturating_add(h.video_frame_count);
                    audio = audio.saturating_add(h.audio_frame_count);
                }
                None => warn!(file, "No file header block, frame count not reported"),
            }
        }
        (video, audio)
    }

    pub(crate) fn wav_info(&self) -> Option<WavInfo> {
        self.audio.format
    }

    /// Frames numbered at or past `limit` are ignored.
    pub(crate) fn set_frame_limit(&mut self, limit: Option<u32>) {
        self.frame_limit = limit;
    }

    pub(crate) fn set_metadata(&mut self, metadata: Option<Arc<MetadataStore>>) {
        self.metadata = metadata;
    }

    /// Enable audio extraction into `path`, or disable it with `None`.
    pub(crate) fn set_audio_output(&mut self, path: Option<PathBuf>) {
        self.audio.decided = true;
        self.audio.path = path;
        if self.audio.path.is_none() {
            self.audio.queued.clear();
        }
        self.flush_audio();
    }

    fn is_done(&self) -> bool {
        self.current >= self.streams.len()
    }

    /// Parse the next block of the series, moving to the next file when the
    /// current one ends. `None` once every file is exhausted.
    fn step(&mut self) -> Option<Block> {
        while let Some(stream) = self.streams.get_mut(self.current) {
            if let Some(block) = stream.next_block(&mut self.records) {
                let file_index = self.current;
                self.absorb(file_index, &block);
                self.publish_progress();
                return Some(block);
            }
            let snapshot = stream.snapshot();
            debug!(
                file = self.current,
                blocks = stream.blocks_read(),
                "File indexed"
            );
            self.finished_bytes += stream.size();
            self.current += 1;
            if let Some(next) = self.streams.get_mut(self.current) {
                next.set_snapshot(snapshot);
            }
            self.publish_progress();
        }
        None
    }

    fn publish_progress(&self) {
        let current = self
            .streams
            .get(self.current)
            .map_or(0, BlockStream::parsed_bytes);
        self.shared
            .parsed_bytes
            .fetch_max(self.finished_bytes + current, Ordering::AcqRel);
    }

    fn absorb(&mut self, file_index: usize, block: &Block) {
        match block {
            Block::FileHeader(h) => {
                if self.header.is_none() {
                    self.header = Some(h.clone());
                }
            }
            Block::RawInfo(r) => {
                if self.raw_info.is_none() {
                    self.raw_info = Some(r.clone());
                }
            }
            Block::WavInfo(w) => {
                if self.audio.format.is_none() {
                    self.audio.format = Some(*w);
                    self.flush_audio();
                }
            }
            Block::VideoFrame(v) => {
                if self.frame_limit.is_some_and(|limit| v.frame_number >= limit) {
                    debug!(frame = v.frame_number, "Frame beyond reported count, ignored");
                    return;
                }
                let location = FrameLocation {
                    file_index,
                    offset: v.data_offset,
                    size: v.data_size,
                    snapshot: v.snapshot,
                };
                self.shared
                    .state
                    .write()
                    .frames
                    .entry(v.frame_number)
                    .or_insert(location);
            }
            Block::AudioFrame(a) => self.audio_frame(file_index, *a),
            Block::Side { index } => {
                if let Some(record) = self.records.get(*index as usize) {
                    self.shared.state.write().records.push(record.clone());
                }
            }
            Block::Skipped(_) => {}
        }
    }

    fn audio_frame(&mut self, file_index: usize, frame: AudioFrameRef) {
        if self.audio.disabled() {
            return;
        }
        if self.audio.file.is_none() {
            self.audio.queued.push((file_index, frame));
            return;
        }
        self.write_audio(file_index, frame);
    }

    fn write_audio(&mut self, file_index: usize, frame: AudioFrameRef) {
        let Some(stream) = self.streams.get_mut(file_index) else {
            return;
        };
        let result = stream
            .read_bytes(frame.data_offset, frame.data_size as usize)
            .and_then(|pcm| match self.audio.file.as_mut() {
                Some(file) => file.append(&pcm),
                None => Ok(()),
            });
        if let Err(e) = result {
            warn!(frame = frame.frame_number, error = %e, "Audio extraction stopped");
            self.audio.failed = true;
            self.audio.file = None;
        }
    }

    fn flush_audio(&mut self) {
        if self.audio.file.is_none() && !self.audio.disabled() {
            let (Some(path), Some(format)) = (self.audio.path.clone(), self.audio.format) else {
                return;
            };
            match AudioSideFile::create(&path, &format) {
                Ok(file) => self.audio.file = Some(file),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Audio extraction disabled");
                    self.audio.failed = true;
                    self.audio.queued.clear();
                    return;
                }
            }
        }
        if self.audio.file.is_some() {
            for (file_index, frame) in std::mem::take(&mut self.audio.queued) {
                self.write_audio(file_index, frame);
            }
        }
    }

    /// Parse up to `blocks` blocks. Returns false once the series is done.
    fn advance(&mut self, blocks: usize) -> bool {
        for _ in 0..blocks.max(1) {
            if self.step().is_none() {
                self.complete();
                return false;
            }
        }
        true
    }

    /// Scan forward until `frame` is located or the series ends.
    fn locate(&mut self, frame: u32, quantum: usize) -> Option<FrameLocation> {
        loop {
            if let Some(location) = self.shared.lookup(frame) {
                return Some(location);
            }
            if self.is_done() || self.shared.stop.load(Ordering::Acquire) {
                return None;
            }
            self.advance(quantum);
        }
    }

    fn complete(&mut self) {
        if self.shared.complete.load(Ordering::Acquire) {
            return;
        }
        if let Some(file) = self.audio.file.as_mut() {
            if let Err(e) = file.finalize() {
                warn!(error = %e, "Failed to finalize audio side-file");
            }
        }

        let (frame_count, record_count) = {
            let state = self.shared.state.read();
            (state.frames.len(), state.records.len())
        };
        if let Some(store) = &self.metadata {
            if let Err(e) = self.persist(store) {
                warn!(error = %e, "Failed to persist frame index");
            }
        }
        self.shared.mark_complete();
        info!(
            frames = frame_count,
            records = record_count,
            bytes = self.shared.total_bytes,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Indexing complete"
        );
    }

    fn persist(&self, store: &MetadataStore) -> Result<()> {
        let state = self.shared.state.read();
        let index = PersistedIndex {
            total_bytes: self.shared.total_bytes,
            frame_count: self
                .frame_limit
                .unwrap_or(state.frames.len() as u32),
            frames: state.frames.iter().map(|(k, v)| (*k, *v)).collect(),
        };
        let encode =
            |v: serde_json::Result<serde_json::Value>| v.map_err(|e| RawError::Serialization(e.to_string()));
        let index = encode(serde_json::to_value(&index))?;
        let records = encode(serde_json::to_value(&state.records))?;
        drop(state);
        store.set_meta_values([
            (FRAME_INDEX_KEY.to_string(), index),
            (SIDE_RECORDS_KEY.to_string(), records),
        ])?;
        Ok(())
    }
}

fn check_magic(file: &mut File, path: &Path) -> Result<()> {
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).map_err(|_| {
        RawError::corrupt(format!("{}: too short for a block container", path.display()))
    })?;
    if &magic != b"MLVI" {
        return Err(RawError::corrupt(format!(
            "{}: missing MLVI file header",
            path.display()
        )));
    }
    Ok(())
}

enum Request {
    Locate {
        frame: u32,
        reply: Sender<Option<FrameLocation>>,
    },
    Stop,
}

/// Frame locator for one block container clip.
pub struct Indexer {
    shared: Arc<IndexShared>,
    requests: Option<Sender<Request>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    missing: Mutex<HashSet<u32>>,
}

impl Indexer {
    /// Start the actor thread, continuing from wherever `scanner` stopped.
    pub(crate) fn spawn(scanner: Scanner, quantum: usize) -> Result<Self> {
        let shared = Arc::clone(&scanner.shared);
        let (tx, rx) = unbounded();
        let worker = thread::Builder::new()
            .name("mlraw-indexer".into())
            .spawn(move || run_actor(scanner, rx, quantum))?;
        info!(bytes = shared.total_bytes, quantum, "Indexer started");
        Ok(Self {
            shared,
            requests: Some(tx),
            worker: Mutex::new(Some(worker)),
            missing: Mutex::new(HashSet::new()),
        })
    }

    /// An indexer that is already complete, from a persisted index.
    pub fn completed(index: PersistedIndex, records: Vec<SideRecord>) -> Self {
        let shared = IndexShared::new(index.total_bytes);
        {
            let mut state = shared.state.write();
            state.frames = index.frames.into_iter().collect();
            state.records = records;
        }
        shared.mark_complete();
        Self {
            shared: Arc::new(shared),
            requests: None,
            worker: Mutex::new(None),
            missing: Mutex::new(HashSet::new()),
        }
    }

    /// Location of `frame` if it has been found already. Never blocks on the
    /// actor.
    pub fn lookup(&self, frame: u32) -> Option<FrameLocation> {
        self.shared.lookup(frame)
    }

    /// Location of `frame`, scanning forward synchronously if needed.
    pub fn locate(&self, frame: u32) -> Result<FrameLocation> {
        if let Some(location) = self.lookup(frame) {
            return Ok(location);
        }
        if !self.is_complete() {
            if let Some(tx) = &self.requests {
                let (reply_tx, reply_rx) = bounded(1);
                if tx
                    .send(Request::Locate {
                        frame,
                        reply: reply_tx,
                    })
                    .is_ok()
                {
                    if let Ok(Some(location)) = reply_rx.recv() {
                        return Ok(location);
                    }
                }
            }
            // Actor gone or finished while we waited.
            if let Some(location) = self.lookup(frame) {
                return Ok(location);
            }
        }
        if self.missing.lock().insert(frame) {
            warn!(frame, "Frame not present in container");
        }
        Err(RawError::NotFound(format!("frame {frame} not present in container")))
    }

    /// Camera state records for a frame snapshot.
    pub fn side_data(&self, snapshot: &MetadataSnapshot) -> FrameSideData {
        snapshot.resolve(&self.shared.state.read().records)
    }

    /// Fraction of the series parsed so far, 1.0 only once complete.
    pub fn status(&self) -> f32 {
        if self.is_complete() {
            return 1.0;
        }
        let total = self.shared.total_bytes.max(1) as f64;
        let parsed = self.shared.parsed_bytes.load(Ordering::Acquire) as f64;
        (parsed / total).min(0.999) as f32
    }

    pub fn is_complete(&self) -> bool {
        self.shared.complete.load(Ordering::Acquire)
    }

    /// Number of frames located so far.
    pub fn indexed_frames(&self) -> usize {
        self.shared.state.read().frames.len()
    }

    /// Block until indexing completes or `timeout` passes. Returns whether
    /// indexing is complete.
    pub fn wait_complete(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.shared.done_lock.lock();
        while !*done {
            if self.shared.done.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        *done
    }

    /// Stop the actor and wait for it to exit. Idempotent.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(tx) = &self.requests {
            let _ = tx.send(Request::Stop);
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("Indexer thread panicked");
            }
            debug!("Indexer stopped");
        }
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_actor(mut scanner: Scanner, requests: Receiver<Request>, quantum: usize) {
    loop {
        if scanner.shared.stop.load(Ordering::Acquire) {
            break;
        }
        if scanner.is_done() {
            scanner.complete();
            match requests.recv() {
                Ok(Request::Locate { frame, reply }) => {
                    let _ = reply.send(scanner.shared.lookup(frame));
                }
                Ok(Request::Stop) | Err(_) => break,
            }
            continue;
        }

        loop {
            match requests.try_recv() {
                Ok(Request::Locate { frame, reply }) => {
                    let location = scanner.locate(frame, quantum);
                    let _ = reply.send(location);
                }
                Ok(Request::Stop) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => break,
            }
        }
        scanner.advance(quantum);
    }
}
