//! MlRaw Media - container access and playback plumbing
//!
//! This crate handles:
//! - File series spanning and block container parsing
//! - Background frame indexing with synchronous fallback
//! - Frame preloading and caching
//! - Sidecar metadata and the audio side-file
//! - The [`RawClip`] handle tying it together

pub mod audio;
pub mod block;
pub mod cache;
pub mod clip;
pub mod config;
pub mod container;
pub mod indexer;
pub mod metadata;
pub mod preloader;
pub mod probe;
pub mod sensor;
pub mod series;
pub mod span;
pub mod tiff;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::FrameCache;
pub use clip::RawClip;
pub use config::ClipOptions;
pub use container::{ContainerFormat, ContainerKind};
pub use indexer::{FrameLocation, Indexer};
pub use metadata::MetadataStore;
pub use preloader::FramePreloader;
pub use probe::{detect_kind, ClipInfo};
pub use span::SpanningByteStore;
