//! Small decoded-frame cache tuned for forward playback.

use mlraw_core::SharedFrame;
use std::collections::BTreeMap;
use tracing::trace;

/// Bounded `frame index -> frame` map.
///
/// The entry at the cursor (the frame on screen) is never evicted. When the
/// cache is over capacity the frame farthest behind the cursor goes first;
/// only when nothing lies behind does the frame farthest ahead go.
#[derive(Debug)]
pub struct FrameCache {
    frames: BTreeMap<usize, SharedFrame>,
    capacity: usize,
    cursor: usize,
}

impl FrameCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: BTreeMap::new(),
            capacity: capacity.max(1),
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, index: usize) {
        self.cursor = index;
    }

    pub fn contains(&self, index: usize) -> bool {
        self.frames.contains_key(&index)
    }

    pub fn get(&self, index: usize) -> Option<SharedFrame> {
        self.frames.get(&index).cloned()
    }

    /// Insert a frame, evicting as needed.
    pub fn insert(&mut self, frame: SharedFrame) {
        self.frames.insert(frame.index(), frame);
        while self.frames.len() > self.capacity {
            let Some(victim) = self.victim() else {
                break;
            };
            self.frames.remove(&victim);
            trace!(evicted = victim, cursor = self.cursor, "Frame cache eviction");
        }
    }

    pub fn indices(&self) -> Vec<usize> {
        self.frames.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    fn victim(&self) -> Option<usize> {
        let cursor = self.cursor;
        if let Some(&first) = self.frames.keys().find(|&&k| k != cursor) {
            if first < cursor {
                return Some(first);
            }
        }
        self.frames.keys().rev().find(|&&k| k != cursor).copied()
    }
}
