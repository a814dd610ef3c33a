//! # Workflows Module
//!
//! High-level entry points built on the [`crate::core`] and [`crate::engine`] layers.
//!
//! - **Ranking Workflow** ([`rank`]) - Loads the result bundle of every predicted model,
//!   orders the models by confidence, writes the ranked structure copies, the
//!   `ranking_debug.json` manifest and the per-model diagnostic plots.
//! - **Prediction Pipeline** ([`pipeline`]) - Runs homolog search, inference and relaxation
//!   through external commands and finishes with the ranking workflow.

pub mod pipeline;
pub mod rank;
