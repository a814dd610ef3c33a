//! # Core Models Module
//!
//! Data structures describing one prediction run's per-model outputs.
//!
//! - [`result`] - `ModelResult`, the confidence metrics extracted from one result bundle
//! - [`artifacts`] - `ModelArtifacts`, a result bundle paired with its structure file

pub mod artifacts;
pub mod result;
