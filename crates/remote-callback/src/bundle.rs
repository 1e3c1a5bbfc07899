//! Structured key/value record carried by `send_result`.
//!
//! Parcel form:
//!
//! ```text
//! [i32 payload len][i32 'BNDL'][i32 entry count]
//!   repeated: [string key][i32 type tag][value]
//! ```
//!
//! The payload length counts every byte after the magic, which lets a reader
//! verify it consumed exactly one bundle. Type tags follow the binder value
//! numbering so the same payloads can be produced by other implementations.

use crate::config::ParcelConfig;
use crate::parcel::{Parcel, Parcelable};
use crate::{CallbackError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `'B' 'N' 'D' 'L'` read as a little-endian i32.
pub const BUNDLE_MAGIC: i32 = 0x4C44_4E42;

const VAL_NULL: i32 = -1;
const VAL_STRING: i32 = 0;
const VAL_INTEGER: i32 = 1;
const VAL_BUNDLE: i32 = 3;
const VAL_LONG: i32 = 6;
const VAL_DOUBLE: i32 = 8;
const VAL_BOOLEAN: i32 = 9;
const VAL_BYTEARRAY: i32 = 13;
const VAL_STRINGARRAY: i32 = 14;

/// A single typed value stored in a [`Bundle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BundleValue {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    StringArray(Vec<String>),
    ByteArray(Vec<u8>),
    Bundle(Bundle),
}

impl BundleValue {
    fn type_tag(&self) -> i32 {
        match self {
            BundleValue::Null => VAL_NULL,
            BundleValue::Bool(_) => VAL_BOOLEAN,
            BundleValue::Int(_) => VAL_INTEGER,
            BundleValue::Long(_) => VAL_LONG,
            BundleValue::Double(_) => VAL_DOUBLE,
            BundleValue::String(_) => VAL_STRING,
            BundleValue::StringArray(_) => VAL_STRINGARRAY,
            BundleValue::ByteArray(_) => VAL_BYTEARRAY,
            BundleValue::Bundle(_) => VAL_BUNDLE,
        }
    }

    fn write_to_parcel(&self, parcel: &mut Parcel, depth: usize) -> Result<()> {
        parcel.write_i32(self.type_tag());
        match self {
            BundleValue::Null => {}
            BundleValue::Bool(v) => parcel.write_bool(*v),
            BundleValue::Int(v) => parcel.write_i32(*v),
            BundleValue::Long(v) => parcel.write_i64(*v),
            BundleValue::Double(v) => parcel.write_f64(*v),
            BundleValue::String(v) => parcel.write_string(Some(v)),
            BundleValue::StringArray(items) => {
                parcel.write_i32(items.len() as i32);
                for item in items {
                    parcel.write_string(Some(item));
                }
            }
            BundleValue::ByteArray(v) => parcel.write_byte_array(Some(v)),
            BundleValue::Bundle(nested) => return nested.write_nested(parcel, depth + 1),
        }
        Ok(())
    }

    fn read_from_parcel(parcel: &mut Parcel, depth: usize) -> Result<Self> {
        let value = match parcel.read_i32()? {
            VAL_NULL => BundleValue::Null,
            VAL_BOOLEAN => BundleValue::Bool(parcel.read_bool()?),
            VAL_INTEGER => BundleValue::Int(parcel.read_i32()?),
            VAL_LONG => BundleValue::Long(parcel.read_i64()?),
            VAL_DOUBLE => BundleValue::Double(parcel.read_f64()?),
            VAL_STRING => BundleValue::String(
                parcel
                    .read_string()?
                    .ok_or_else(|| CallbackError::decode("bundle value", "null string"))?,
            ),
            VAL_STRINGARRAY => {
                let count = parcel.read_i32()?;
                if count < 0 || count as usize > parcel.data_avail() / 4 {
                    return Err(CallbackError::decode(
                        "bundle value",
                        format!("invalid string array length {}", count),
                    ));
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(parcel.read_string()?.unwrap_or_default());
                }
                BundleValue::StringArray(items)
            }
            VAL_BYTEARRAY => BundleValue::ByteArray(parcel.read_byte_array()?.unwrap_or_default()),
            VAL_BUNDLE => BundleValue::Bundle(Bundle::read_nested(parcel, depth + 1)?),
            tag => {
                return Err(CallbackError::decode(
                    "bundle value",
                    format!("unknown type tag {}", tag),
                ))
            }
        };
        Ok(value)
    }
}

impl From<bool> for BundleValue {
    fn from(v: bool) -> Self {
        BundleValue::Bool(v)
    }
}

impl From<i32> for BundleValue {
    fn from(v: i32) -> Self {
        BundleValue::Int(v)
    }
}

impl From<i64> for BundleValue {
    fn from(v: i64) -> Self {
        BundleValue::Long(v)
    }
}

impl From<f64> for BundleValue {
    fn from(v: f64) -> Self {
        BundleValue::Double(v)
    }
}

impl From<String> for BundleValue {
    fn from(v: String) -> Self {
        BundleValue::String(v)
    }
}

impl From<&str> for BundleValue {
    fn from(v: &str) -> Self {
        BundleValue::String(v.to_string())
    }
}

impl From<Vec<String>> for BundleValue {
    fn from(v: Vec<String>) -> Self {
        BundleValue::StringArray(v)
    }
}

impl From<Vec<u8>> for BundleValue {
    fn from(v: Vec<u8>) -> Self {
        BundleValue::ByteArray(v)
    }
}

impl From<Bundle> for BundleValue {
    fn from(v: Bundle) -> Self {
        BundleValue::Bundle(v)
    }
}

/// Ordered map of string keys to typed values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bundle {
    entries: BTreeMap<String, BundleValue>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one stored under `key`.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<BundleValue>,
    ) -> Option<BundleValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<BundleValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&BundleValue> {
        self.entries.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(BundleValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        match self.entries.get(key) {
            Some(BundleValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(BundleValue::Long(v)) => Some(*v),
            Some(BundleValue::Int(v)) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key) {
            Some(BundleValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bundle(&self, key: &str) -> Option<&Bundle> {
        match self.entries.get(key) {
            Some(BundleValue::Bundle(b)) => Some(b),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<BundleValue> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BundleValue)> {
        self.entries.iter()
    }

    /// Marshal at nesting level `depth`, refusing anything a reader would
    /// reject as too deep.
    fn write_nested(&self, parcel: &mut Parcel, depth: usize) -> Result<()> {
        if depth > ParcelConfig::MAX_BUNDLE_DEPTH {
            return Err(CallbackError::encode(
                "bundle",
                format!("nesting deeper than {}", ParcelConfig::MAX_BUNDLE_DEPTH),
            ));
        }

        let len_pos = parcel.data_size();
        parcel.write_i32(0);
        parcel.write_i32(BUNDLE_MAGIC);
        let start = parcel.data_size();

        parcel.write_i32(self.entries.len() as i32);
        for (key, value) in &self.entries {
            parcel.write_string(Some(key));
            value.write_to_parcel(parcel, depth)?;
        }

        let len = parcel.data_size() - start;
        parcel.write_i32_at(len_pos, len as i32);
        Ok(())
    }

    fn read_nested(parcel: &mut Parcel, depth: usize) -> Result<Self> {
        if depth > ParcelConfig::MAX_BUNDLE_DEPTH {
            return Err(CallbackError::decode(
                "bundle",
                format!("nesting deeper than {}", ParcelConfig::MAX_BUNDLE_DEPTH),
            ));
        }

        let len = parcel.read_i32()?;
        if len < 0 {
            return Err(CallbackError::decode(
                "bundle",
                format!("negative length {}", len),
            ));
        }
        let magic = parcel.read_i32()?;
        if magic != BUNDLE_MAGIC {
            return Err(CallbackError::decode(
                "bundle",
                format!("bad magic {:#x}", magic),
            ));
        }

        let start = parcel.data_position();
        let count = parcel.read_i32()?;
        if count < 0 {
            return Err(CallbackError::decode(
                "bundle",
                format!("negative entry count {}", count),
            ));
        }

        let mut bundle = Bundle::new();
        for _ in 0..count {
            let key = parcel
                .read_string()?
                .ok_or_else(|| CallbackError::decode("bundle", "null key"))?;
            let value = BundleValue::read_from_parcel(parcel, depth)?;
            bundle.entries.insert(key, value);
        }

        let consumed = parcel.data_position() - start;
        if consumed != len as usize {
            return Err(CallbackError::decode(
                "bundle",
                format!("declared {} bytes but read {}", len, consumed),
            ));
        }
        Ok(bundle)
    }

    /// Convert to plain JSON for logging and the command line.
    ///
    /// Integers and longs both become JSON numbers, byte arrays become arrays
    /// of numbers. Use serde on the bundle itself for a lossless typed form.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect();
        serde_json::Value::Object(map)
    }

    /// Build a bundle from a JSON object.
    ///
    /// Numbers that fit in `i32` become ints, other integers longs, the rest
    /// doubles. Arrays must contain only strings.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(CallbackError::Config {
                message: format!("bundle JSON must be an object, got {}", value),
            });
        };
        let mut bundle = Bundle::new();
        for (key, value) in map {
            bundle.insert(key.clone(), value_from_json(key, value)?);
        }
        Ok(bundle)
    }
}

impl Parcelable for Bundle {
    fn write_to_parcel(&self, parcel: &mut Parcel) -> Result<()> {
        self.write_nested(parcel, 0)
    }

    fn create_from_parcel(parcel: &mut Parcel) -> Result<Self> {
        Bundle::read_nested(parcel, 0)
    }
}

fn value_to_json(value: &BundleValue) -> serde_json::Value {
    use serde_json::Value;
    match value {
        BundleValue::Null => Value::Null,
        BundleValue::Bool(v) => Value::Bool(*v),
        BundleValue::Int(v) => Value::from(*v),
        BundleValue::Long(v) => Value::from(*v),
        BundleValue::Double(v) => Value::from(*v),
        BundleValue::String(v) => Value::String(v.clone()),
        BundleValue::StringArray(items) => {
            Value::Array(items.iter().cloned().map(Value::String).collect())
        }
        BundleValue::ByteArray(bytes) => {
            Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
        }
        BundleValue::Bundle(nested) => nested.to_json(),
    }
}

fn value_from_json(key: &str, value: &serde_json::Value) -> Result<BundleValue> {
    use serde_json::Value;
    let converted = match value {
        Value::Null => BundleValue::Null,
        Value::Bool(v) => BundleValue::Bool(*v),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                match i32::try_from(i) {
                    Ok(small) => BundleValue::Int(small),
                    Err(_) => BundleValue::Long(i),
                }
            } else {
                BundleValue::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => BundleValue::String(s.clone()),
        Value::Array(items) => {
            let strings = items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| CallbackError::Config {
                    message: format!("array under '{}' must contain only strings", key),
                })?;
            BundleValue::StringArray(strings)
        }
        Value::Object(_) => BundleValue::Bundle(Bundle::from_json(value)?),
    };
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Bundle {
        Bundle::new()
            .with("path", "/storage/emulated/0/Download")
            .with("success", true)
            .with("count", 42)
            .with("size", 5_000_000_000_i64)
            .with("ratio", 0.75)
            .with("names", vec!["a.txt".to_string(), "b.txt".to_string()])
            .with("digest", vec![0xde_u8, 0xad, 0xbe])
            .with("error", BundleValue::Null)
            .with("extra", Bundle::new().with("nested", "yes"))
    }

    #[test]
    fn test_parcel_roundtrip_all_value_types() {
        let bundle = sample();
        let mut parcel = Parcel::new();
        bundle.write_to_parcel(&mut parcel).unwrap();

        let decoded = Bundle::create_from_parcel(&mut parcel).unwrap();
        assert_eq!(decoded, bundle);
        assert_eq!(parcel.data_avail(), 0);
    }

    #[test]
    fn test_empty_bundle_layout() {
        let mut parcel = Parcel::new();
        Bundle::new().write_to_parcel(&mut parcel).unwrap();

        // len=4 (just the count), magic, count=0
        assert_eq!(parcel.read_i32().unwrap(), 4);
        assert_eq!(parcel.read_i32().unwrap(), BUNDLE_MAGIC);
        assert_eq!(parcel.read_i32().unwrap(), 0);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut parcel = Parcel::new();
        parcel.write_i32(4);
        parcel.write_i32(0x1234);
        parcel.write_i32(0);
        assert!(matches!(
            Bundle::create_from_parcel(&mut parcel),
            Err(CallbackError::Decode { .. })
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut parcel = Parcel::new();
        Bundle::new()
            .with("k", 1)
            .write_to_parcel(&mut parcel)
            .unwrap();
        // Corrupt the declared length.
        parcel.write_i32_at(0, 4);
        assert!(Bundle::create_from_parcel(&mut parcel).is_err());
    }

    #[test]
    fn test_unknown_type_tag_rejected() {
        let mut parcel = Parcel::new();
        parcel.write_i32(0);
        parcel.write_i32(BUNDLE_MAGIC);
        parcel.write_i32(1);
        parcel.write_string(Some("k"));
        parcel.write_i32(99);
        assert!(Bundle::create_from_parcel(&mut parcel).is_err());
    }

    /// A chain of `levels` bundles below the top-level one.
    fn nested(levels: usize) -> Bundle {
        let mut bundle = Bundle::new().with("leaf", 1);
        for _ in 0..levels {
            bundle = Bundle::new().with("inner", bundle);
        }
        bundle
    }

    #[test]
    fn test_deepest_allowed_nesting_roundtrips() {
        let bundle = nested(ParcelConfig::MAX_BUNDLE_DEPTH);
        let mut parcel = Parcel::new();
        bundle.write_to_parcel(&mut parcel).unwrap();
        assert_eq!(Bundle::create_from_parcel(&mut parcel).unwrap(), bundle);
    }

    #[test]
    fn test_too_deep_rejected_when_writing() {
        let mut parcel = Parcel::new();
        match nested(ParcelConfig::MAX_BUNDLE_DEPTH + 1).write_to_parcel(&mut parcel) {
            Err(CallbackError::Encode { field, .. }) => assert_eq!(field, "bundle"),
            other => panic!("Expected Encode, got: {:?}", other),
        }
    }

    #[test]
    fn test_too_deep_rejected_when_reading() {
        // Hand-built: one bundle nested inside another past the limit.
        let mut parcel = Parcel::new();
        for _ in 0..=ParcelConfig::MAX_BUNDLE_DEPTH + 1 {
            parcel.write_i32(0);
            parcel.write_i32(BUNDLE_MAGIC);
            parcel.write_i32(1);
            parcel.write_string(Some("inner"));
            parcel.write_i32(VAL_BUNDLE);
        }
        assert!(matches!(
            Bundle::create_from_parcel(&mut parcel),
            Err(CallbackError::Decode { .. })
        ));
    }

    #[test]
    fn test_typed_getters() {
        let bundle = sample();
        assert_eq!(
            bundle.get_string("path"),
            Some("/storage/emulated/0/Download")
        );
        assert_eq!(bundle.get_int("count"), Some(42));
        assert_eq!(bundle.get_long("count"), Some(42));
        assert_eq!(bundle.get_long("size"), Some(5_000_000_000));
        assert_eq!(bundle.get_bool("success"), Some(true));
        assert_eq!(bundle.get_int("path"), None);
        assert_eq!(
            bundle.get_bundle("extra").and_then(|b| b.get_string("nested")),
            Some("yes")
        );
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({
            "path": "/sdcard",
            "count": 3,
            "size": 5_000_000_000_i64,
            "ratio": 0.5,
            "names": ["x", "y"],
            "meta": {"ok": true},
            "none": null
        });
        let bundle = Bundle::from_json(&json).unwrap();

        assert_eq!(bundle.get_int("count"), Some(3));
        assert_eq!(bundle.get("size"), Some(&BundleValue::Long(5_000_000_000)));
        assert_eq!(bundle.get("ratio"), Some(&BundleValue::Double(0.5)));
        assert_eq!(bundle.get("none"), Some(&BundleValue::Null));
        assert_eq!(bundle.to_json(), json);
    }

    #[test]
    fn test_json_rejects_non_object_and_mixed_arrays() {
        assert!(Bundle::from_json(&serde_json::json!([1, 2])).is_err());
        assert!(Bundle::from_json(&serde_json::json!({"a": ["x", 1]})).is_err());
    }

    #[test]
    fn test_serde_typed_form() {
        let bundle = Bundle::new().with("count", 1).with("big", 1_i64);
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["count"], serde_json::json!({"type": "int", "value": 1}));
        assert_eq!(json["big"], serde_json::json!({"type": "long", "value": 1}));

        let parsed: Bundle = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, bundle);
    }
}
