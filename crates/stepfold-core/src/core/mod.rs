//! # Core Module
//!
//! The foundation layer: immutable per-model data, the decoders that produce it, the
//! ranking function and the renderers that consume it.
//!
//! ## Architecture
//!
//! - **Data Models** ([`models`]) - `ModelResult` and the paired `ModelArtifacts` inputs
//! - **File I/O** ([`io`]) - Pickle/numpy and JSON result bundles, gzip, the ranking manifest
//! - **Ranking** ([`ranking`]) - The deterministic rank-order policy
//! - **Diagnostics** ([`plots`]) - Predicted aligned error heatmaps and pLDDT bar charts
//!
//! Nothing in this layer touches the output directory except the explicit writers in
//! [`io::manifest`] and [`plots`]; sequencing lives in [`crate::workflows`].

pub mod io;
pub mod models;
pub mod plots;
pub mod ranking;
