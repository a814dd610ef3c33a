use super::json::{JsonError, JsonFile};
use super::pickle::{PickleError, PickleFile};
use super::traits::BundleDecoder;
use super::value::Value;
use crate::core::models::artifacts::ModelArtifacts;
use crate::core::models::result::ModelResult;
use crate::engine::error::RankError;
use flate2::read::MultiGzDecoder;
use nalgebra::DMatrix;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, trace};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const PICKLE_PROTO: u8 = 0x80;

pub const FIELD_RANKING_CONFIDENCE: &str = "ranking_confidence";
pub const FIELD_PTM: &str = "ptm";
pub const FIELD_IPTM: &str = "iptm";
pub const FIELD_PLDDT: &str = "plddt";
pub const FIELD_PAE: &str = "predicted_aligned_error";

/// Every bundle entry the ranker reads.
pub const RESULT_FIELDS: [&str; 5] = [
    FIELD_RANKING_CONFIDENCE,
    FIELD_PTM,
    FIELD_IPTM,
    FIELD_PLDDT,
    FIELD_PAE,
];

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Pickle decoding failed: {0}")]
    Pickle(#[from] PickleError),
    #[error("JSON decoding failed: {0}")]
    Json(#[from] JsonError),
    #[error("Bundle does not contain a mapping (found {found})")]
    NotAMapping { found: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    Pickle,
    Json,
}

/// Reads a result bundle, transparently decompressing gzip content, and decodes the
/// top-level entries named in `fields`.
///
/// Entries outside `fields` are skipped, and the serialized bytes are released as soon as
/// decoding finishes.
pub fn read_bundle(path: &Path, fields: &[&str]) -> Result<Value, BundleError> {
    let bytes = read_decompressed(path)?;
    let value = match detect_format(&bytes, path) {
        BundleFormat::Pickle => PickleFile::decode_fields(&bytes, fields)?,
        BundleFormat::Json => JsonFile::decode_fields(&bytes, fields)?,
    };
    drop(bytes);

    if !value.is_mapping() {
        return Err(BundleError::NotAMapping {
            found: value.type_name(),
        });
    }
    Ok(value)
}

fn read_decompressed(path: &Path) -> io::Result<Vec<u8>> {
    let mut reader = BufReader::new(File::open(path)?);
    let gzipped = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    let mut bytes = Vec::new();
    if gzipped {
        trace!(path = %path.display(), "Decompressing gzip bundle.");
        MultiGzDecoder::new(reader).read_to_end(&mut bytes)?;
    } else {
        reader.read_to_end(&mut bytes)?;
    }
    Ok(bytes)
}

/// Chooses the decoder from the leading bytes, falling back to the file name for
/// protocol 0/1 pickles, which carry no header.
pub fn detect_format(bytes: &[u8], path: &Path) -> BundleFormat {
    if bytes.first() == Some(&PICKLE_PROTO) {
        return BundleFormat::Pickle;
    }
    if bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'{')
    {
        return BundleFormat::Json;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if name.ends_with(".json") || name.ends_with(".json.gz") {
        BundleFormat::Json
    } else {
        BundleFormat::Pickle
    }
}

/// Loads the confidence metrics of one model under the identifier `model_id`.
///
/// Only the ranking fields are decoded, and each one is moved out of the decoded bundle.
pub fn load_model_result(
    artifacts: &ModelArtifacts,
    model_id: String,
    require_pae: bool,
) -> Result<ModelResult, RankError> {
    let path = artifacts.bundle.as_path();
    debug!(path = %path.display(), model = %model_id, "Loading result bundle.");
    let bundle = read_bundle(path, &RESULT_FIELDS).map_err(|source| RankError::Bundle {
        path: path.to_path_buf(),
        source,
    })?;
    let mut fields = FieldReader { bundle, path };

    let ranking_confidence = fields.scalar(FIELD_RANKING_CONFIDENCE)?;
    let ptm = fields.optional_scalar(FIELD_PTM)?;
    let iptm = fields.optional_scalar(FIELD_IPTM)?;
    let plddt = fields.vector(FIELD_PLDDT)?;
    let predicted_aligned_error = match fields.optional_matrix(FIELD_PAE)? {
        Some(matrix) => {
            if matrix.nrows() != plddt.len() {
                return Err(fields.invalid(
                    FIELD_PAE,
                    format!(
                        "matrix is {n}x{n} but plddt has {} residues",
                        plddt.len(),
                        n = matrix.nrows()
                    ),
                ));
            }
            Some(matrix)
        }
        None if require_pae => return Err(fields.missing(FIELD_PAE)),
        None => None,
    };

    Ok(ModelResult {
        model_id,
        ranking_confidence,
        ptm,
        iptm,
        plddt,
        predicted_aligned_error,
        structure: artifacts.structure.clone(),
    })
}

struct FieldReader<'a> {
    bundle: Value,
    path: &'a Path,
}

impl FieldReader<'_> {
    /// A field holding `None` counts as absent.
    fn take(&mut self, field: &'static str) -> Option<Value> {
        self.bundle
            .remove(field)
            .filter(|v| !matches!(v, Value::None))
    }

    fn scalar(&mut self, field: &'static str) -> Result<f64, RankError> {
        self.optional_scalar(field)?
            .ok_or_else(|| self.missing(field))
    }

    fn optional_scalar(&mut self, field: &'static str) -> Result<Option<f64>, RankError> {
        let Some(value) = self.take(field) else {
            return Ok(None);
        };
        value.as_f64().map(Some).ok_or_else(|| {
            self.invalid(field, format!("expected a number, found {}", value.type_name()))
        })
    }

    fn vector(&mut self, field: &'static str) -> Result<Vec<f64>, RankError> {
        let value = self.take(field).ok_or_else(|| self.missing(field))?;
        let found = describe(&value);
        value.into_vector().ok_or_else(|| {
            self.invalid(
                field,
                format!("expected a one-dimensional numeric array, found {found}"),
            )
        })
    }

    fn optional_matrix(&mut self, field: &'static str) -> Result<Option<DMatrix<f64>>, RankError> {
        let Some(value) = self.take(field) else {
            return Ok(None);
        };
        let found = describe(&value);
        let (rows, cols, data) = value.into_matrix().ok_or_else(|| {
            self.invalid(
                field,
                format!("expected a two-dimensional numeric array, found {found}"),
            )
        })?;
        if rows != cols {
            return Err(self.invalid(field, format!("matrix is {rows}x{cols}, expected square")));
        }
        // Row-major data read as column-major is the transpose.
        let mut matrix = DMatrix::from_vec(rows, cols, data);
        matrix.transpose_mut();
        Ok(Some(matrix))
    }

    fn missing(&self, field: &'static str) -> RankError {
        RankError::MissingField {
            path: self.path.to_path_buf(),
            field,
        }
    }

    fn invalid(&self, field: &'static str, reason: String) -> RankError {
        RankError::InvalidField {
            path: self.path.to_path_buf(),
            field,
            reason,
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Array(a) => format!("an array of shape {:?}", a.shape()),
        other => other.type_name().to_string(),
    }
}
