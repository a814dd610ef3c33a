//! Diagnostic figures for ranked models.
//!
//! Figures are written as SVG, which needs no system fonts or image codecs.

pub mod colormap;
pub mod heatmap;
pub mod plddt;

use plotters::drawing::DrawingAreaErrorKind;
use thiserror::Error;

pub const PAE_SUFFIX: &str = "_predicted_aligned_error.svg";
pub const PLDDT_SUFFIX: &str = "_plddt.svg";

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("Drawing failed: {0}")]
    Drawing(String),
    #[error("Nothing to plot: {0}")]
    EmptyData(&'static str),
}

impl<E: std::error::Error + Send + Sync> From<DrawingAreaErrorKind<E>> for PlotError {
    fn from(err: DrawingAreaErrorKind<E>) -> Self {
        PlotError::Drawing(err.to_string())
    }
}

/// Title shared by both figures of a model, e.g. `model_2_multimer rank=1`.
pub fn plot_title(model_id: &str, rank: usize) -> String {
    format!("{} rank={}", model_id, rank)
}

pub fn pae_file_name(model_id: &str) -> String {
    format!("{}{}", model_id, PAE_SUFFIX)
}

pub fn plddt_file_name(model_id: &str) -> String {
    format!("{}{}", model_id, PLDDT_SUFFIX)
}
