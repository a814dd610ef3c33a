//! Test fixtures: a small pickle writer and result-bundle builders.

use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Emits pickle opcodes the way CPython's pickler does for the handful of types the
/// result bundles contain.
pub struct PickleWriter {
    protocol: u8,
    out: Vec<u8>,
}

impl PickleWriter {
    pub fn new(protocol: u8) -> Self {
        Self {
            protocol,
            out: vec![0x80, protocol],
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.out.push(b'.');
        self.out
    }

    pub fn mark(&mut self) {
        self.out.push(b'(');
    }

    pub fn none(&mut self) {
        self.out.push(b'N');
    }

    pub fn bool(&mut self, value: bool) {
        self.out.push(if value { 0x88 } else { 0x89 });
    }

    pub fn int(&mut self, value: i64) {
        if (0..=0xff).contains(&value) {
            self.out.extend([b'K', value as u8]);
        } else if (0..=0xffff).contains(&value) {
            self.out.push(b'M');
            self.out.extend((value as u16).to_le_bytes());
        } else if let Ok(v) = i32::try_from(value) {
            self.out.push(b'J');
            self.out.extend(v.to_le_bytes());
        } else {
            self.out.extend([0x8a, 8]);
            self.out.extend(value.to_le_bytes());
        }
    }

    pub fn float(&mut self, value: f64) {
        self.out.push(b'G');
        self.out.extend(value.to_be_bytes());
    }

    pub fn string(&mut self, value: &str) {
        let bytes = value.as_bytes();
        if self.protocol >= 4 && bytes.len() < 256 {
            self.out.extend([0x8c, bytes.len() as u8]);
        } else {
            self.out.push(b'X');
            self.out.extend((bytes.len() as u32).to_le_bytes());
        }
        self.out.extend(bytes);
    }

    /// Protocols below 3 have no bytes type; CPython writes `_codecs.encode(text, 'latin1')`.
    pub fn bytes(&mut self, value: &[u8]) {
        if self.protocol >= 3 {
            self.out.push(b'B');
            self.out.extend((value.len() as u32).to_le_bytes());
            self.out.extend(value);
        } else {
            let latin1: String = value.iter().map(|&b| char::from(b)).collect();
            self.global("_codecs", "encode");
            self.string(&latin1);
            self.string("latin1");
            self.out.push(0x86);
            self.reduce();
        }
    }

    pub fn empty_list(&mut self) {
        self.out.push(b']');
    }

    pub fn empty_dict(&mut self) {
        self.out.push(b'}');
    }

    pub fn empty_tuple(&mut self) {
        self.out.push(b')');
    }

    /// Builds a tuple from everything pushed since the last [`mark`](Self::mark).
    pub fn tuple(&mut self) {
        self.out.push(b't');
    }

    pub fn tuple_n(&mut self, n: u8) {
        assert!((1..=3).contains(&n));
        self.out.push(0x84 + n);
    }

    pub fn append(&mut self) {
        self.out.push(b'a');
    }

    pub fn appends(&mut self) {
        self.out.push(b'e');
    }

    pub fn setitem(&mut self) {
        self.out.push(b's');
    }

    pub fn setitems(&mut self) {
        self.out.push(b'u');
    }

    pub fn global(&mut self, module: &str, name: &str) {
        if self.protocol >= 4 {
            self.string(module);
            self.string(name);
            self.out.push(0x93);
        } else {
            self.out.push(b'c');
            self.out.extend(module.as_bytes());
            self.out.push(b'\n');
            self.out.extend(name.as_bytes());
            self.out.push(b'\n');
        }
    }

    pub fn reduce(&mut self) {
        self.out.push(b'R');
    }

    pub fn build(&mut self) {
        self.out.push(b'b');
    }

    pub fn pop(&mut self) {
        self.out.push(b'0');
    }

    pub fn put(&mut self, index: u8) {
        self.out.extend([b'q', index]);
    }

    pub fn get(&mut self, index: u8) {
        self.out.extend([b'h', index]);
    }

    /// Pushes a list whose flattened size doubles per level: each level holds two memo
    /// references to the level below. Uses memo slots `0..=levels`.
    pub fn doubling_lists(&mut self, levels: u8) {
        self.empty_list();
        self.put(0);
        for level in 1..=levels {
            self.pop();
            self.empty_list();
            self.mark();
            self.get(level - 1);
            self.get(level - 1);
            self.appends();
            self.put(level);
        }
    }

    pub fn float_list(&mut self, values: &[f64]) {
        self.empty_list();
        if values.is_empty() {
            return;
        }
        self.mark();
        for &v in values {
            self.float(v);
        }
        self.appends();
    }

    fn multiarray_module(&self) -> &'static str {
        if self.protocol >= 4 {
            "numpy._core.multiarray"
        } else {
            "numpy.core.multiarray"
        }
    }

    /// `numpy.dtype(code, False, True)` with its `__setstate__` tuple.
    pub fn dtype(&mut self, code: &str) {
        self.global("numpy", "dtype");
        self.string(code);
        self.bool(false);
        self.bool(true);
        self.tuple_n(3);
        self.reduce();
        self.mark();
        self.int(3);
        self.string("<");
        self.none();
        self.none();
        self.none();
        self.int(-1);
        self.int(-1);
        self.int(0);
        self.tuple();
        self.build();
    }

    /// Writes an `ndarray`. `data` is given in storage order: column-major when `fortran`.
    pub fn ndarray(&mut self, shape: &[usize], code: &str, data: &[f64], fortran: bool) {
        let module = self.multiarray_module();
        self.global(module, "_reconstruct");
        self.global("numpy", "ndarray");
        self.int(0);
        self.tuple_n(1);
        self.bytes(b"b");
        self.tuple_n(3);
        self.reduce();

        self.mark();
        self.int(1);
        self.mark();
        for &dim in shape {
            self.int(dim as i64);
        }
        self.tuple();
        self.dtype(code);
        self.bool(fortran);
        self.bytes(&encode_elements(code, data));
        self.tuple();
        self.build();
    }

    pub fn numpy_scalar(&mut self, code: &str, value: f64) {
        let module = self.multiarray_module();
        self.global(module, "scalar");
        self.dtype(code);
        self.bytes(&encode_elements(code, &[value]));
        self.tuple_n(2);
        self.reduce();
    }
}

fn encode_elements(code: &str, data: &[f64]) -> Vec<u8> {
    data.iter()
        .flat_map(|&v| match code {
            "f4" => (v as f32).to_le_bytes().to_vec(),
            "f8" => v.to_le_bytes().to_vec(),
            "i4" => (v as i32).to_le_bytes().to_vec(),
            "i8" => (v as i64).to_le_bytes().to_vec(),
            other => panic!("unsupported test dtype {other}"),
        })
        .collect()
}

/// The confidence metrics of one fake model.
#[derive(Debug, Clone)]
pub struct TestBundle {
    pub ranking_confidence: f64,
    pub ptm: Option<f64>,
    pub iptm: Option<f64>,
    pub plddt: Option<Vec<f64>>,
    /// Row-major `n x n`.
    pub pae: Option<Vec<f64>>,
}

impl TestBundle {
    pub fn new(ranking_confidence: f64, residues: usize) -> Self {
        let plddt = (0..residues).map(|i| 50.0 + i as f64).collect();
        let pae = (0..residues * residues)
            .map(|k| ((k / residues) as f64 - (k % residues) as f64).abs())
            .collect();
        Self {
            ranking_confidence,
            ptm: None,
            iptm: None,
            plddt: Some(plddt),
            pae: Some(pae),
        }
    }

    pub fn multimer(ranking_confidence: f64, residues: usize) -> Self {
        Self {
            ptm: Some(0.7),
            iptm: Some(0.6),
            ..Self::new(ranking_confidence, residues)
        }
    }

    fn residues(&self) -> usize {
        self.plddt.as_ref().map_or(0, Vec::len)
    }

    /// Encodes the bundle the way AlphaFold's `result_model_*.pkl` looks: numpy scalars and
    /// arrays plus unrelated entries.
    pub fn to_pickle(&self, protocol: u8) -> Vec<u8> {
        let mut w = PickleWriter::new(protocol);
        w.empty_dict();
        w.mark();
        w.string("ranking_confidence");
        w.numpy_scalar("f8", self.ranking_confidence);
        if let Some(ptm) = self.ptm {
            w.string("ptm");
            w.numpy_scalar("f8", ptm);
        }
        if let Some(iptm) = self.iptm {
            w.string("iptm");
            w.numpy_scalar("f8", iptm);
        }
        if let Some(plddt) = &self.plddt {
            w.string("plddt");
            w.ndarray(&[plddt.len()], "f8", plddt, false);
        }
        if let Some(pae) = &self.pae {
            let n = self.residues();
            w.string("predicted_aligned_error");
            w.ndarray(&[n, n], "f8", pae, false);
            w.string("max_predicted_aligned_error");
            w.numpy_scalar("f4", 31.75);
        }
        w.string("structure_module");
        w.empty_dict();
        w.string("final_atom_mask");
        w.ndarray(&[2], "i4", &[1.0, 0.0], false);
        w.setitem();
        w.setitems();
        w.finish()
    }

    pub fn to_json(&self) -> String {
        let mut map = serde_json::Map::new();
        map.insert(
            "ranking_confidence".into(),
            serde_json::json!(self.ranking_confidence),
        );
        if let Some(ptm) = self.ptm {
            map.insert("ptm".into(), serde_json::json!(ptm));
        }
        if let Some(iptm) = self.iptm {
            map.insert("iptm".into(), serde_json::json!(iptm));
        }
        if let Some(plddt) = &self.plddt {
            map.insert("plddt".into(), serde_json::json!(plddt));
        }
        if let Some(pae) = &self.pae {
            let n = self.residues().max(1);
            let rows: Vec<&[f64]> = pae.chunks(n).collect();
            map.insert("predicted_aligned_error".into(), serde_json::json!(rows));
        }
        serde_json::Value::Object(map).to_string()
    }

    pub fn write_pickle_gz(&self, path: &Path) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&self.to_pickle(4)).unwrap();
        fs::write(path, encoder.finish().unwrap()).unwrap();
    }

    pub fn write_pickle(&self, path: &Path, protocol: u8) {
        fs::write(path, self.to_pickle(protocol)).unwrap();
    }

    pub fn write_json(&self, path: &Path) {
        fs::write(path, self.to_json()).unwrap();
    }
}
