//! Integration test crate for MlRaw.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! Fixtures are written to temporary directories with the synthetic
//! container writers from `mlraw_media::testing`.

#[cfg(test)]
mod playback;

#[cfg(test)]
mod sidecar;

#[cfg(test)]
mod damaged;
