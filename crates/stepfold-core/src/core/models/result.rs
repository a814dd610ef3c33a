use nalgebra::DMatrix;
use std::path::PathBuf;

/// Confidence metrics of one predicted model, as read from its result bundle.
///
/// A `ModelResult` is never modified after loading; ranking only reorders references to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResult {
    pub model_id: String,
    /// Sole sort key of the ranking.
    pub ranking_confidence: f64,
    pub ptm: Option<f64>,
    pub iptm: Option<f64>,
    /// Per-residue local confidence, one value per residue.
    pub plddt: Vec<f64>,
    /// Residue-by-residue expected position error. Square, `plddt.len()` wide.
    pub predicted_aligned_error: Option<DMatrix<f64>>,
    /// Structure file predicted by this model.
    pub structure: PathBuf,
}

impl ModelResult {
    pub fn residue_count(&self) -> usize {
        self.plddt.len()
    }

    pub fn is_multimer(&self) -> bool {
        self.iptm.is_some()
    }

    pub fn mean_plddt(&self) -> Option<f64> {
        if self.plddt.is_empty() {
            None
        } else {
            Some(self.plddt.iter().sum::<f64>() / self.plddt.len() as f64)
        }
    }
}
