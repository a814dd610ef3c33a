//! # Engine Module
//!
//! The plumbing shared by the ranking and pipeline workflows.
//!
//! ## Overview
//!
//! Nothing in this layer touches result bundles or plots directly. It defines how a run is
//! configured, how it reports progress, how it fails, and where the external search tools
//! and databases live.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Ranking options, per-mode stage commands, tool and
//!   database locations, and the builder that assembles a [`config::PipelineConfig`]
//! - **Error Handling** ([`error`]) - `RankError`, `PipelineError` and the aggregated
//!   `ConfigurationError`
//! - **Progress Monitoring** ([`progress`]) - Callback-based progress events for front ends
//! - **Tool Resolution** ([`tools`]) - `PATH` lookup, HH-suite prefix handling and the flags
//!   that forward resolved resources to the search stage

pub mod config;
pub mod error;
pub mod progress;
pub mod tools;
