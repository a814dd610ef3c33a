//! # stepfold Core Library
//!
//! Ranking, reporting and step orchestration for AlphaFold2 and AlphaFold-Multimer
//! predictions. The prediction framework itself (homolog search, template featurization,
//! inference, relaxation) runs as external commands; this library owns the glue between
//! those steps and the final ranking/report stage.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Immutable data models (`ModelResult`, `ModelArtifacts`),
//!   the result-bundle decoders (pickle with numpy arrays, JSON, gzip), the ranking
//!   manifest, the pure rank-order function and the diagnostic plot renderers.
//!
//! - **[`engine`]: The Plumbing.** Configuration objects and their validation, error types,
//!   progress reporting and external tool resolution.
//!
//! - **[`workflows`]: The Public API.** Complete procedures built from the layers below:
//!   the model ranker/reporter and the step 1-4 prediction pipeline.

pub mod core;
pub mod engine;
pub mod workflows;

#[cfg(test)]
pub(crate) mod testing;
