//! Opaque per-batch results and the helpers that move them between devices.

use crate::Result;
use candle::{DType, Device, Tensor};
use indexmap::IndexMap;
use std::fmt;

/// A processed result as stored in a metric's accumulator.
///
/// The variant set is closed: anything a metric wants to keep between
/// `process` and `compute_metrics` is expressed with these shapes.
#[derive(Clone, Debug)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tensor(Tensor),
    Sample(DataSample),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Looks up `key` in a map or in a sample's fields.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key),
            Value::Sample(s) => s.get(key),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Tensor> for Value {
    fn from(v: Tensor) -> Self {
        Value::Tensor(v)
    }
}

impl From<DataSample> for Value {
    fn from(v: DataSample) -> Self {
        Value::Sample(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tensor(a), Value::Tensor(b)) => tensors_equal(a, b),
            (Value::Sample(a), Value::Sample(b)) => a == b,
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

// Tensors compare by dtype, shape and contents; a failed read compares unequal.
fn tensors_equal(a: &Tensor, b: &Tensor) -> bool {
    if a.dtype() != b.dtype() || a.dims() != b.dims() {
        return false;
    }
    let read = |t: &Tensor| -> candle::Result<Vec<f64>> {
        t.to_device(&Device::Cpu)?
            .flatten_all()?
            .to_dtype(DType::F64)?
            .to_vec1::<f64>()
    };
    match (read(a), read(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:.4}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Tensor(t) => write!(f, "Tensor[{:?}; {}]", t.dims(), t.dtype().as_str()),
            Value::Sample(s) => write!(f, "DataSample({} fields)", s.fields().len()),
            Value::List(items) => write_seq(f, "[", items, "]"),
            Value::Tuple(items) => write_seq(f, "(", items, ")"),
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, items: &[Value], close: &str) -> fmt::Result {
    write!(f, "{open}")?;
    for (i, v) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{v}")?;
    }
    write!(f, "{close}")
}

/// A structured prediction: meta information plus named data fields.
///
/// Meta information describes the sample (image id, original shape, ...) and
/// is never moved between devices. Fields carry the actual predictions and
/// may hold tensors at any nesting depth.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataSample {
    metainfo: IndexMap<String, Value>,
    fields: IndexMap<String, Value>,
}

impl DataSample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metainfo(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metainfo.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn metainfo(&self) -> &IndexMap<String, Value> {
        &self.metainfo
    }

    pub fn fields(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    /// Returns a copy whose tensor fields live on `device`.
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        let fields = self
            .fields
            .iter()
            .map(|(k, v)| Ok((k.clone(), to_device(v, device)?)))
            .collect::<Result<IndexMap<_, _>>>()?;
        Ok(Self {
            metainfo: self.metainfo.clone(),
            fields,
        })
    }
}

/// Recursively copies every tensor inside `value` to `device`.
///
/// Lists, tuples and maps are rebuilt with the same variant, order and keys.
/// Other leaves are cloned unchanged. The input is left untouched.
pub fn to_device(value: &Value, device: &Device) -> Result<Value> {
    Ok(match value {
        Value::Tensor(t) => Value::Tensor(t.to_device(device)?),
        Value::Sample(s) => Value::Sample(s.to_device(device)?),
        Value::List(items) => Value::List(to_device_all(items, device)?),
        Value::Tuple(items) => Value::Tuple(to_device_all(items, device)?),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), to_device(v, device)?)))
                .collect::<Result<_>>()?,
        ),
        other => other.clone(),
    })
}

pub fn to_device_all(values: &[Value], device: &Device) -> Result<Vec<Value>> {
    values.iter().map(|v| to_device(v, device)).collect()
}

/// Host-memory copy of `value`, see [`to_device`].
pub fn to_cpu(value: &Value) -> Result<Value> {
    to_device(value, &Device::Cpu)
}

pub fn to_cpu_all(values: &[Value]) -> Result<Vec<Value>> {
    to_device_all(values, &Device::Cpu)
}
