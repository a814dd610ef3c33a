/// A decoded result-bundle value.
///
/// Pickles and JSON documents both decode into this tree. Python objects the decoder has no
/// special knowledge of are kept as [`Value::Object`] so that unrelated entries in a bundle
/// never prevent the confidence metrics from being read.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Set(Vec<Value>),
    /// Entries in insertion order.
    Dict(Vec<(Value, Value)>),
    Global { module: String, name: String },
    Object(Box<Object>),
    Array(NdArray),
}

/// A Python object built by calling `callable(*args)`, optionally followed by `__setstate__`
/// and item/element insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub callable: Value,
    pub args: Value,
    pub state: Option<Value>,
    pub list_items: Vec<Value>,
    pub dict_items: Vec<(Value, Value)>,
}

/// A dense numeric array in C (row-major) order, widened to `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl NdArray {
    /// Returns `None` when `data` does not hold exactly `shape.iter().product()` elements.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Option<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return None;
        }
        Some(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Value {
    /// Looks up a string key in a mapping.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let entries = match self {
            Value::Dict(entries) => entries,
            Value::Object(obj) => &obj.dict_items,
            _ => return None,
        };
        entries
            .iter()
            .find(|(k, _)| key_matches(k, key))
            .map(|(_, v)| v)
    }

    /// Removes the entry for `key` from a mapping and returns its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let entries = match self {
            Value::Dict(entries) => entries,
            Value::Object(obj) => &mut obj.dict_items,
            _ => return None,
        };
        let index = entries.iter().position(|(k, _)| key_matches(k, key))?;
        Some(entries.remove(index).1)
    }

    /// Keeps only the entries of a mapping whose keys appear in `fields`, turning a
    /// mapping-like object into a plain dict. Anything else is returned unchanged.
    pub fn retain_fields(self, fields: &[&str]) -> Value {
        let entries = match self {
            Value::Dict(entries) => entries,
            Value::Object(obj) if !obj.dict_items.is_empty() => obj.dict_items,
            other => return other,
        };
        Value::Dict(
            entries
                .into_iter()
                .filter(|(k, _)| fields.iter().any(|f| key_matches(k, f)))
                .collect(),
        )
    }

    /// A dict, or an object that received dict items (e.g. an `OrderedDict`).
    pub fn is_mapping(&self) -> bool {
        match self {
            Value::Dict(_) => true,
            Value::Object(obj) => !obj.dict_items.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Interprets the value as one number: a Python scalar, a numpy scalar or a one-element
    /// array of any shape.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Array(a) if a.len() == 1 => Some(a.data()[0]),
            Value::List(items) | Value::Tuple(items) if items.len() == 1 => items[0].as_f64(),
            _ => None,
        }
    }

    /// Converts the value into a flat vector: a one-dimensional array or a list of numbers.
    pub fn into_vector(self) -> Option<Vec<f64>> {
        match self {
            Value::Array(a) if a.ndim() == 1 => Some(a.into_data()),
            Value::List(items) | Value::Tuple(items) => {
                items.iter().map(Value::as_scalar_f64).collect()
            }
            _ => None,
        }
    }

    /// Converts the value into a matrix, returning `(rows, cols, row-major data)`.
    pub fn into_matrix(self) -> Option<(usize, usize, Vec<f64>)> {
        match self {
            Value::Array(a) if a.ndim() == 2 => {
                let (rows, cols) = (a.shape()[0], a.shape()[1]);
                Some((rows, cols, a.into_data()))
            }
            Value::List(rows) | Value::Tuple(rows) => {
                let count = rows.len();
                let mut data = Vec::new();
                let mut cols = None;
                for row in rows {
                    let row = row.into_vector()?;
                    match cols {
                        None => cols = Some(row.len()),
                        Some(c) if c != row.len() => return None,
                        Some(_) => {}
                    }
                    data.extend(row);
                }
                Some((count, cols.unwrap_or(0), data))
            }
            _ => None,
        }
    }

    /// Returns `true` for a global reference to `name` in any of `modules`.
    pub fn is_global(&self, modules: &[&str], name: &str) -> bool {
        matches!(self, Value::Global { module, name: n } if n == name && modules.contains(&module.as_str()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Set(_) => "set",
            Value::Dict(_) => "dict",
            Value::Global { .. } => "global",
            Value::Object(_) => "object",
            Value::Array(_) => "ndarray",
        }
    }

    fn as_scalar_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Array(a) if a.ndim() == 0 => Some(a.data()[0]),
            _ => None,
        }
    }
}

fn key_matches(key: &Value, name: &str) -> bool {
    match key {
        Value::String(s) => s == name,
        Value::Bytes(b) => b.as_slice() == name.as_bytes(),
        _ => false,
    }
}
