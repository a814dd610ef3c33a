//! Provides input/output functionality for the files exchanged with the prediction framework.
//!
//! Result bundles arrive as Python pickles (usually holding numpy arrays, often gzip
//! compressed) or as JSON documents. Both are decoded into the same [`value::Value`] tree,
//! from which [`bundle`] extracts a `ModelResult`. The ranking log written at the end of a
//! run lives in [`manifest`].

pub mod bundle;
pub mod json;
pub mod manifest;
pub mod numpy;
pub mod pickle;
pub mod traits;
pub mod value;
