use crate::core::models::result::ModelResult;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::ser::PrettyFormatter;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

pub const MANIFEST_FILE_NAME: &str = "ranking_debug.json";

const LABEL_MULTIMER: &str = "iptm+ptm";
const LABEL_MONOMER: &str = "plddts";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The ranking log: every model's confidence in input order plus the final order.
///
/// Serializes as
/// `{"<label>": {"<model_id>": <confidence>, ...}, "order": ["<model_id>", ...]}`, where the
/// label is `iptm+ptm` when any model carries an interface score and `plddts` otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct RankingManifest {
    pub label: &'static str,
    pub confidences: Vec<(String, f64)>,
    pub order: Vec<String>,
}

impl RankingManifest {
    pub fn new(results: &[ModelResult], order: &[usize]) -> Self {
        let label = if results.iter().any(ModelResult::is_multimer) {
            LABEL_MULTIMER
        } else {
            LABEL_MONOMER
        };
        Self {
            label,
            confidences: results
                .iter()
                .map(|r| (r.model_id.clone(), r.ranking_confidence))
                .collect(),
            order: order.iter().map(|&i| results[i].model_id.clone()).collect(),
        }
    }

    pub fn to_json_string(&self) -> Result<String, ManifestError> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Writes the manifest with four-space indentation, replacing any previous file.
    pub fn write(&self, path: &Path) -> Result<(), ManifestError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    fn write_to<W: Write>(&self, writer: W) -> Result<(), ManifestError> {
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(writer, formatter);
        self.serialize(&mut serializer)?;
        Ok(())
    }
}

struct Confidences<'a>(&'a [(String, f64)]);

impl Serialize for Confidences<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, confidence) in self.0 {
            // JSON has no NaN or infinity.
            let value = confidence.is_finite().then_some(*confidence);
            map.serialize_entry(id, &value)?;
        }
        map.end()
    }
}

impl Serialize for RankingManifest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(self.label, &Confidences(&self.confidences))?;
        map.serialize_entry("order", &self.order)?;
        map.end()
    }
}
