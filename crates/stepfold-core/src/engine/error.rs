use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::io::bundle::BundleError;
use crate::core::io::manifest::ManifestError;

#[derive(Debug, Error)]
pub enum RankError {
    #[error("No models were given to rank")]
    NoModels,

    #[error(
        "Got {bundles} result bundles but {structures} structure files; the lists must have the same length"
    )]
    LengthMismatch { bundles: usize, structures: usize },

    #[error("Output directory does not exist or is not a directory: {path:?}")]
    OutputDirectory { path: PathBuf },

    #[error("Input structure {path:?} would be overwritten by a ranked copy")]
    OverlappingArtifact { path: PathBuf },

    #[error("Result bundle {path:?} has no '{field}' entry")]
    MissingField { path: PathBuf, field: &'static str },

    #[error("Result bundle {path:?} has an invalid '{field}' entry: {reason}")]
    InvalidField {
        path: PathBuf,
        field: &'static str,
        reason: String,
    },

    #[error("Failed to read result bundle {path:?}: {source}")]
    Bundle {
        path: PathBuf,
        #[source]
        source: BundleError,
    },

    #[error("Failed to copy {from:?} to {to:?}: {source}")]
    ArtifactCopy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write ranking manifest {path:?}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },

    #[error("Failed to render plot {path:?}: {message}")]
    PlotRender { path: PathBuf, message: String },
}

/// Every problem found while validating a pipeline configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid configuration:\n  - {}", problems.join("\n  - "))]
pub struct ConfigurationError {
    pub problems: Vec<String>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Invalid model selection '{entry}': {reason}")]
    InvalidModel { entry: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Stage '{stage}' has no command configured")]
    MissingCommand { stage: &'static str },

    #[error("Failed to start '{program}' for stage '{stage}': {source}")]
    Spawn {
        stage: &'static str,
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Stage '{stage}' failed: {}", describe_exit(.code))]
    StageFailed {
        stage: &'static str,
        code: Option<i32>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Ranking failed: {0}")]
    Rank(#[from] RankError),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by a signal".to_string(),
    }
}
