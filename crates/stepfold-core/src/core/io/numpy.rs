//! Reconstruction of numpy arrays and scalars from their pickled form.
//!
//! numpy pickles an `ndarray` as a call to `multiarray._reconstruct` followed by a
//! `__setstate__` tuple `(version, shape, dtype, is_fortran, raw_bytes)`; protocol 5 in-band
//! pickles use `numeric._frombuffer(buffer, dtype, shape, order)` instead. Scalars such as
//! `np.float32(0.9)` become `multiarray.scalar(dtype, raw_bytes)`. All numeric element types
//! are widened to `f64`.

use super::value::{NdArray, Object, Value};
use phf::phf_map;

const MULTIARRAY_MODULES: [&str; 3] = [
    "numpy.core.multiarray",
    "numpy._core.multiarray",
    "numpy.core._multiarray_umath",
];
const NUMERIC_MODULES: [&str; 2] = ["numpy.core.numeric", "numpy._core.numeric"];
const DTYPE_MODULES: [&str; 1] = ["numpy"];
const CODECS_MODULES: [&str; 1] = ["_codecs"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    F32,
    F64,
}

static DTYPE_CODES: phf::Map<&'static str, ElementKind> = phf_map! {
    "?" => ElementKind::Bool,
    "b1" => ElementKind::Bool,
    "i1" => ElementKind::I8,
    "i2" => ElementKind::I16,
    "i4" => ElementKind::I32,
    "i8" => ElementKind::I64,
    "u1" => ElementKind::U8,
    "u2" => ElementKind::U16,
    "u4" => ElementKind::U32,
    "u8" => ElementKind::U64,
    "f2" => ElementKind::F16,
    "f4" => ElementKind::F32,
    "f8" => ElementKind::F64,
};

impl ElementKind {
    pub fn from_code(code: &str) -> Option<Self> {
        DTYPE_CODES.get(code).copied()
    }

    pub fn size(self) -> usize {
        match self {
            ElementKind::Bool | ElementKind::I8 | ElementKind::U8 => 1,
            ElementKind::I16 | ElementKind::U16 | ElementKind::F16 => 2,
            ElementKind::I32 | ElementKind::U32 | ElementKind::F32 => 4,
            ElementKind::I64 | ElementKind::U64 | ElementKind::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ElementKind::F16 | ElementKind::F32 | ElementKind::F64)
    }

    fn decode(self, chunk: &[u8], little_endian: bool) -> f64 {
        macro_rules! read {
            ($t:ty) => {{
                let bytes = chunk.try_into().unwrap_or_default();
                if little_endian {
                    <$t>::from_le_bytes(bytes)
                } else {
                    <$t>::from_be_bytes(bytes)
                }
            }};
        }
        match self {
            ElementKind::Bool => (chunk[0] != 0) as u8 as f64,
            ElementKind::I8 => chunk[0] as i8 as f64,
            ElementKind::U8 => chunk[0] as f64,
            ElementKind::I16 => read!(i16) as f64,
            ElementKind::U16 => read!(u16) as f64,
            ElementKind::F16 => f16_to_f64(read!(u16)),
            ElementKind::I32 => read!(i32) as f64,
            ElementKind::U32 => read!(u32) as f64,
            ElementKind::F32 => read!(f32) as f64,
            ElementKind::I64 => read!(i64) as f64,
            ElementKind::U64 => read!(u64) as f64,
            ElementKind::F64 => read!(f64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dtype {
    pub kind: ElementKind,
    pub little_endian: bool,
}

impl Dtype {
    /// Parses a dtype code such as `f8`, `<f4` or `>i4`.
    pub fn parse(code: &str) -> Option<Self> {
        let (order, rest) = match code.chars().next()? {
            c @ ('<' | '>' | '=' | '|') => (Some(c), &code[1..]),
            _ => (None, code),
        };
        let kind = ElementKind::from_code(rest)?;
        Some(Self {
            kind,
            little_endian: order.map_or(cfg!(target_endian = "little"), is_little_endian),
        })
    }

    fn decode_all(&self, raw: &[u8]) -> Option<Vec<f64>> {
        let size = self.kind.size();
        if raw.len() % size != 0 {
            return None;
        }
        Some(
            raw.chunks_exact(size)
                .map(|chunk| self.kind.decode(chunk, self.little_endian))
                .collect(),
        )
    }
}

fn is_little_endian(order: char) -> bool {
    match order {
        '<' => true,
        '>' => false,
        _ => cfg!(target_endian = "little"),
    }
}

/// Converts a resolved pickled object into the value it stands for, if it is one of the
/// numpy (or codec) constructs this module understands.
pub fn reconstruct(obj: &Object) -> Option<Value> {
    let callable = &obj.callable;
    if callable.is_global(&MULTIARRAY_MODULES, "_reconstruct") {
        return obj.state.as_ref().and_then(ndarray_from_state).map(Value::Array);
    }
    if callable.is_global(&MULTIARRAY_MODULES, "scalar") {
        return scalar_from_args(&obj.args);
    }
    if callable.is_global(&NUMERIC_MODULES, "_frombuffer") {
        return ndarray_from_buffer(&obj.args).map(Value::Array);
    }
    if callable.is_global(&CODECS_MODULES, "encode") {
        return encode_string(&obj.args).map(Value::Bytes);
    }
    None
}

/// Extracts a [`Dtype`] from a pickled `numpy.dtype(code, align, copy)` object.
pub fn dtype_from_value(value: &Value) -> Option<Dtype> {
    let Value::Object(obj) = value else {
        return None;
    };
    if !is_dtype_callable(&obj.callable) {
        return None;
    }
    let code = tuple_items(&obj.args)?.first()?.as_str()?;
    let mut dtype = Dtype::parse(code)?;

    // The byte order lives in the __setstate__ tuple: (version, order, ...).
    if let Some(order) = obj
        .state
        .as_ref()
        .and_then(tuple_items)
        .and_then(|items| items.get(1))
        .and_then(Value::as_str)
        .and_then(|s| s.chars().next())
    {
        dtype.little_endian = is_little_endian(order);
    }
    Some(dtype)
}

fn is_dtype_callable(callable: &Value) -> bool {
    match callable {
        Value::Global { module, name } => {
            name == "dtype" && (DTYPE_MODULES.contains(&module.as_str()) || module.starts_with("numpy."))
        }
        _ => false,
    }
}

fn ndarray_from_state(state: &Value) -> Option<NdArray> {
    let items = tuple_items(state)?;
    // Older numpy omits the leading version number.
    let (shape, dtype, fortran, raw) = match items.len() {
        5 => (&items[1], &items[2], &items[3], &items[4]),
        4 => (&items[0], &items[1], &items[2], &items[3]),
        _ => return None,
    };
    let shape = shape_from_value(shape)?;
    let dtype = dtype_from_value(dtype)?;
    let fortran = fortran.as_bool()?;
    build_array(shape, dtype, raw_bytes(raw)?, fortran)
}

fn ndarray_from_buffer(args: &Value) -> Option<NdArray> {
    let items = tuple_items(args)?;
    if items.len() != 4 {
        return None;
    }
    let dtype = dtype_from_value(&items[1])?;
    let shape = shape_from_value(&items[2])?;
    let fortran = items[3].as_str()? == "F";
    build_array(shape, dtype, raw_bytes(&items[0])?, fortran)
}

fn build_array(shape: Vec<usize>, dtype: Dtype, raw: &[u8], fortran: bool) -> Option<NdArray> {
    let data = dtype.decode_all(raw)?;
    let data = if fortran && shape.len() > 1 {
        fortran_to_c_order(&data, &shape)?
    } else {
        data
    };
    NdArray::new(shape, data)
}

fn scalar_from_args(args: &Value) -> Option<Value> {
    let items = tuple_items(args)?;
    let dtype = dtype_from_value(items.first()?)?;
    let raw = raw_bytes(items.get(1)?)?;
    if raw.len() != dtype.kind.size() {
        return None;
    }
    let value = dtype.kind.decode(raw, dtype.little_endian);
    Some(match dtype.kind {
        ElementKind::Bool => Value::Bool(value != 0.0),
        kind if kind.is_float() => Value::Float(value),
        _ => Value::Int(value as i64),
    })
}

fn encode_string(args: &Value) -> Option<Vec<u8>> {
    let items = tuple_items(args)?;
    let text = items.first()?.as_str()?;
    let encoding = items.get(1).and_then(Value::as_str).unwrap_or("utf-8");
    match encoding.to_ascii_lowercase().as_str() {
        "latin1" | "latin-1" | "iso-8859-1" => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).ok())
            .collect(),
        "utf-8" | "utf8" | "ascii" => Some(text.as_bytes().to_vec()),
        _ => None,
    }
}

fn tuple_items(value: &Value) -> Option<&[Value]> {
    match value {
        Value::Tuple(items) | Value::List(items) => Some(items),
        _ => None,
    }
}

fn shape_from_value(value: &Value) -> Option<Vec<usize>> {
    tuple_items(value)?
        .iter()
        .map(|dim| dim.as_i64().and_then(|d| usize::try_from(d).ok()))
        .collect()
}

fn raw_bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::Bytes(b) => Some(b),
        Value::String(s) => Some(s.as_bytes()),
        _ => None,
    }
}

fn fortran_to_c_order(data: &[f64], shape: &[usize]) -> Option<Vec<f64>> {
    if shape.iter().product::<usize>() != data.len() {
        return None;
    }
    let mut out = Vec::with_capacity(data.len());
    let mut index = vec![0usize; shape.len()];
    for _ in 0..data.len() {
        let mut offset = 0;
        let mut stride = 1;
        for (axis, &i) in index.iter().enumerate() {
            offset += i * stride;
            stride *= shape[axis];
        }
        out.push(data[offset]);

        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    Some(out)
}

fn f16_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from((bits >> 10) & 0x1f);
    let fraction = f64::from(bits & 0x3ff);
    match exponent {
        0 => sign * fraction * 2f64.powi(-24),
        31 if fraction == 0.0 => sign * f64::INFINITY,
        31 => f64::NAN,
        _ => sign * (1.0 + fraction / 1024.0) * 2f64.powi(exponent - 15),
    }
}
