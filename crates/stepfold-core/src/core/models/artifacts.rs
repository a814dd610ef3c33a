use crate::engine::error::RankError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const RESULT_PREFIX: &str = "result_";
const BUNDLE_EXTENSIONS: [&str; 3] = ["pkl", "pickle", "json"];
const DEFAULT_STRUCTURE_EXTENSION: &str = "pdb";

/// A result bundle and the structure file predicted by the same model.
///
/// Pairing the two paths in one record removes the need to keep two independently
/// supplied lists in the same order downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifacts {
    pub bundle: PathBuf,
    pub structure: PathBuf,
}

impl ModelArtifacts {
    pub fn new(bundle: impl Into<PathBuf>, structure: impl Into<PathBuf>) -> Self {
        Self {
            bundle: bundle.into(),
            structure: structure.into(),
        }
    }

    /// Pairs two positional lists element by element.
    ///
    /// # Errors
    ///
    /// Returns [`RankError::LengthMismatch`] when the lists have different lengths.
    pub fn pair(bundles: Vec<PathBuf>, structures: Vec<PathBuf>) -> Result<Vec<Self>, RankError> {
        if bundles.len() != structures.len() {
            return Err(RankError::LengthMismatch {
                bundles: bundles.len(),
                structures: structures.len(),
            });
        }
        Ok(bundles
            .into_iter()
            .zip(structures)
            .map(|(bundle, structure)| Self { bundle, structure })
            .collect())
    }

    /// Derives the model identifier from the bundle file name.
    ///
    /// `result_model_3.pkl.gz` becomes `model_3` and `result_model_2_multimer.pkl` becomes
    /// `model_2_multimer`. Names without a `result_` prefix are kept as they are.
    pub fn model_id(&self) -> String {
        model_id_from_path(&self.bundle)
    }

    /// File name of the ranked copy of this model's structure, e.g. `ranked_1.pdb`.
    pub fn ranked_file_name(&self, rank: usize) -> String {
        ranked_file_name(rank, structure_extension(&self.structure))
    }
}

/// Derives one identifier per model, in input order.
///
/// Identifiers come from the bundle file names. A name already taken by an earlier model
/// gets the 1-based input position appended, so `run1/result_model_1.pkl` and
/// `run2/result_model_1.pkl` become `model_1` and `model_1_2`.
pub fn unique_model_ids(models: &[ModelArtifacts]) -> Vec<String> {
    let mut taken = HashSet::with_capacity(models.len());
    models
        .iter()
        .enumerate()
        .map(|(index, model)| {
            let base = model.model_id();
            let mut id = base.clone();
            let mut attempt = 0;
            while !taken.insert(id.clone()) {
                attempt += 1;
                id = match attempt {
                    1 => format!("{}_{}", base, index + 1),
                    n => format!("{}_{}_{}", base, index + 1, n),
                };
            }
            id
        })
        .collect()
}

pub fn ranked_file_name(rank: usize, extension: &str) -> String {
    format!("ranked_{}.{}", rank, extension)
}

pub fn structure_extension(path: &Path) -> &str {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or(DEFAULT_STRUCTURE_EXTENSION)
}

fn model_id_from_path(path: &Path) -> String {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some(stripped) = name.strip_suffix(".gz") {
        name = stripped.to_string();
    }
    for ext in BUNDLE_EXTENSIONS {
        if let Some(stripped) = name.strip_suffix(&format!(".{}", ext)) {
            name = stripped.to_string();
            break;
        }
    }
    match name.strip_prefix(RESULT_PREFIX) {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_matches_lists_by_position() {
        let pairs = ModelArtifacts::pair(
            vec!["a.pkl".into(), "b.pkl".into()],
            vec!["a.pdb".into(), "b.pdb".into()],
        )
        .unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1], ModelArtifacts::new("b.pkl", "b.pdb"));
    }

    #[test]
    fn pair_rejects_lists_of_different_length() {
        let err = ModelArtifacts::pair(
            vec!["a.pkl".into(), "b.pkl".into(), "c.pkl".into()],
            vec!["a.pdb".into(), "b.pdb".into()],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RankError::LengthMismatch {
                bundles: 3,
                structures: 2
            }
        ));
    }

    #[test]
    fn model_id_strips_prefix_and_extensions() {
        let cases = [
            ("/out/result_model_3.pkl.gz", "model_3"),
            ("result_model_2_multimer.pkl", "model_2_multimer"),
            ("result_model_1_ptm.json", "model_1_ptm"),
            ("custom.pickle", "custom"),
            ("result_.pkl", "result_"),
        ];
        for (path, expected) in cases {
            assert_eq!(ModelArtifacts::new(path, "x.pdb").model_id(), expected);
        }
    }

    #[test]
    fn repeated_bundle_names_get_positional_suffixes() {
        let models = vec![
            ModelArtifacts::new("run1/result_model_1.pkl.gz", "run1/relaxed_model_1.pdb"),
            ModelArtifacts::new("run2/result_model_1.pkl.gz", "run2/relaxed_model_1.pdb"),
            ModelArtifacts::new("run1/result_model_2.pkl.gz", "run1/relaxed_model_2.pdb"),
            ModelArtifacts::new("run3/result_model_1.pkl", "run3/relaxed_model_1.pdb"),
        ];
        assert_eq!(
            unique_model_ids(&models),
            vec!["model_1", "model_1_2", "model_2", "model_1_4"]
        );
    }

    #[test]
    fn suffixed_id_never_collides_with_a_real_name() {
        let models = vec![
            ModelArtifacts::new("result_model_1_3.pkl", "a.pdb"),
            ModelArtifacts::new("a/result_model_1.pkl", "b.pdb"),
            ModelArtifacts::new("b/result_model_1.pkl", "c.pdb"),
            ModelArtifacts::new("c/result_model_1_3.pkl", "d.pdb"),
        ];
        assert_eq!(
            unique_model_ids(&models),
            vec!["model_1_3", "model_1", "model_1_3_2", "model_1_3_4"]
        );
    }

    #[test]
    fn ranked_file_name_keeps_structure_extension() {
        let cif = ModelArtifacts::new("result_model_1.pkl", "relaxed_model_1.cif");
        assert_eq!(cif.ranked_file_name(2), "ranked_2.cif");

        let bare = ModelArtifacts::new("result_model_1.pkl", "relaxed_model_1");
        assert_eq!(bare.ranked_file_name(1), "ranked_1.pdb");
    }
}
