//! Dumping results to pickle files and reading them back.
//!
//! Files hold plain data only, so any pickle reader can consume them: maps
//! become dicts, tensors become `{"dtype", "shape", "data"}` dicts with
//! row-major values, and samples become `{"metainfo", "fields"}` dicts.
//! Dicts are written in insertion order.

use crate::{EvalError, Result, Value};
use candle::{DType, Device, Tensor};
use indexmap::IndexMap;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, Serialize, SerializeMap, SerializeTuple, Serializer};
use serde_pickle::{DeOptions, SerOptions};
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Pickle,
}

impl FileFormat {
    /// Matches on the trailing suffix, so a bare `.pkl` is accepted too.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.to_str() {
            Some(p) if p.ends_with(".pkl") || p.ends_with(".pickle") => Ok(FileFormat::Pickle),
            _ => Err(EvalError::UnsupportedExtension {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Writes `values` as one list to `path`, creating parent directories.
pub fn dump(values: &[Value], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    match FileFormat::from_path(path)? {
        FileFormat::Pickle => {
            let list: Vec<Pickled<'_>> = values.iter().map(Pickled).collect();
            let bytes = serde_pickle::to_vec(&list, SerOptions::new())?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, bytes)?;
        }
    }
    Ok(())
}

/// Reads a list written by [`dump`] back as plain values.
///
/// Dicts keep their file order. Tuples come back as [`Value::List`].
pub fn load(path: impl AsRef<Path>) -> Result<Vec<Value>> {
    let path = path.as_ref();
    match FileFormat::from_path(path)? {
        FileFormat::Pickle => {
            let bytes = fs::read(path)?;
            let Unpickled(value) =
                serde_pickle::from_slice::<Unpickled>(&bytes, DeOptions::new())?;
            match value {
                Value::List(items) => Ok(items),
                other => Err(EvalError::InvalidPickle(format!(
                    "expected a list at the top level, got {other}"
                ))),
            }
        }
    }
}

struct Pickled<'a>(&'a Value);

struct PickledMap<'a>(&'a IndexMap<String, Value>);

impl Serialize for Pickled<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.0 {
            Value::None => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Tensor(t) => TensorRecord::new(t)
                .map_err(<S::Error as ser::Error>::custom)?
                .serialize(serializer),
            Value::Sample(s) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("metainfo", &PickledMap(s.metainfo()))?;
                map.serialize_entry("fields", &PickledMap(s.fields()))?;
                map.end()
            }
            Value::List(items) => serializer.collect_seq(items.iter().map(Pickled)),
            Value::Tuple(items) => {
                let mut tuple = serializer.serialize_tuple(items.len())?;
                for item in items {
                    tuple.serialize_element(&Pickled(item))?;
                }
                tuple.end()
            }
            Value::Map(map) => PickledMap(map).serialize(serializer),
        }
    }
}

impl Serialize for PickledMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, Pickled(v))))
    }
}

/// Host copy of a tensor, written as a `dtype`, `shape`, `data` dict.
#[derive(serde::Serialize)]
struct TensorRecord {
    dtype: &'static str,
    shape: Dims,
    data: TensorData,
}

struct Dims(Vec<usize>);

#[derive(serde::Serialize)]
#[serde(untagged)]
enum TensorData {
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl TensorRecord {
    fn new(tensor: &Tensor) -> Result<Self> {
        let dtype = tensor.dtype();
        let flat = tensor.to_device(&Device::Cpu)?.flatten_all()?;
        let data = if dtype.is_int() {
            TensorData::Int(flat.to_dtype(DType::I64)?.to_vec1()?)
        } else {
            TensorData::Float(flat.to_dtype(DType::F64)?.to_vec1()?)
        };
        Ok(Self {
            dtype: dtype.as_str(),
            shape: Dims(tensor.dims().to_vec()),
            data,
        })
    }
}

impl Serialize for Dims {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(self.0.len())?;
        for dim in &self.0 {
            tuple.serialize_element(dim)?;
        }
        tuple.end()
    }
}

struct Unpickled(Value);

impl<'de> Deserialize<'de> for Unpickled {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(UnpickledVisitor).map(Unpickled)
    }
}

struct UnpickledVisitor;

impl<'de> Visitor<'de> for UnpickledVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("None, a bool, a number, a string, a list, a tuple or a string-keyed dict")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::None)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::None)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Value, E> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| E::custom(format!("integer {v} does not fit in i64")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Value, E> {
        Ok(Value::Str(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Value, E> {
        Ok(Value::Str(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(Unpickled(item)) = seq.next_element::<Unpickled>()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Value, A::Error> {
        let mut map = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, Unpickled(value))) = access.next_entry::<String, Unpickled>()? {
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }
}
