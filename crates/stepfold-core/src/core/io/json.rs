use super::traits::BundleDecoder;
use super::value::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JsonError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Decoder for result bundles stored as JSON documents.
///
/// Numbers become [`Value::Int`] when they are integral and fit in `i64`, otherwise
/// [`Value::Float`].
pub struct JsonFile;

impl BundleDecoder for JsonFile {
    type Error = JsonError;

    fn decode(bytes: &[u8]) -> Result<Value, Self::Error> {
        let document: serde_json::Value = serde_json::from_slice(bytes)?;
        Ok(convert(document))
    }
}

fn convert(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(convert).collect()),
        serde_json::Value::Object(map) => Value::Dict(
            map.into_iter()
                .map(|(k, v)| (Value::String(k), convert(v)))
                .collect(),
        ),
    }
}
