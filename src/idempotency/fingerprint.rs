use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A primitive value that may take part in a fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i128),
    Float(f64),
    Bool(bool),
}

/// Largest magnitude below which every integer is exactly representable as f64.
const EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

impl FieldValue {
    /// Type tag and canonical text. Integral floats encode as integers, so
    /// JSON `100` and `100.0` (and `0.0` and `-0.0`) fingerprint alike.
    fn encode(&self, field: &str) -> Result<(&'static str, String)> {
        match self {
            FieldValue::Str(s) => Ok(("s", s.clone())),
            FieldValue::Int(i) => Ok(("i", i.to_string())),
            FieldValue::Float(f) if !f.is_finite() => Err(AppError::UnsupportedFieldType {
                field: field.to_string(),
                kind: "non-finite float",
            }),
            FieldValue::Float(f) if f.fract() == 0.0 && f.abs() < EXACT_FLOAT_INT => {
                Ok(("i", (*f as i128).to_string()))
            }
            FieldValue::Float(f) => Ok(("f", f.to_string())),
            FieldValue::Bool(b) => Ok(("b", b.to_string())),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        FieldValue::Str(value.clone())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value as i128)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value as i128)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Int(value as i128)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(value as i128)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// Identifying fields of a request, kept sorted by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FingerprintFields {
    fields: BTreeMap<String, FieldValue>,
}

impl FingerprintFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Builds fields from a JSON object. Null, array and object values are
    /// rejected rather than stringified.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| AppError::Validation("Fingerprint fields must be a JSON object".to_string()))?;

        let mut fields = Self::new();
        for (name, value) in object {
            let field = match value {
                serde_json::Value::String(s) => FieldValue::Str(s.clone()),
                serde_json::Value::Bool(b) => FieldValue::Bool(*b),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        FieldValue::Int(i as i128)
                    } else if let Some(u) = n.as_u64() {
                        FieldValue::Int(u as i128)
                    } else if let Some(f) = n.as_f64() {
                        FieldValue::Float(f)
                    } else {
                        return Err(unsupported(name, "number"));
                    }
                }
                serde_json::Value::Null => return Err(unsupported(name, "null")),
                serde_json::Value::Array(_) => return Err(unsupported(name, "array")),
                serde_json::Value::Object(_) => return Err(unsupported(name, "object")),
            };
            fields.fields.insert(name.clone(), field);
        }

        Ok(fields)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Length-prefixed canonical form: `<len>:<name>=<tag>:<len>:<value>;` per
    /// field, in name order.
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for (name, value) in &self.fields {
            let (tag, canonical) = value.encode(name)?;
            out.extend_from_slice(
                format!("{}:{}={}:{}:{};", name.len(), name, tag, canonical.len(), canonical).as_bytes(),
            );
        }
        Ok(out)
    }
}

impl<K, V> FromIterator<(K, V)> for FingerprintFields
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (name, value) in iter {
            fields.insert(name, value);
        }
        fields
    }
}

fn unsupported(field: &str, kind: &'static str) -> AppError {
    AppError::UnsupportedFieldType {
        field: field.to_string(),
        kind,
    }
}

/// Lowercase hex SHA-256 of the canonical field encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestFingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Hashes the identifying fields of a request into a stable key.
///
/// Field order does not matter. An empty field set is rejected, since every
/// request would collapse onto the same key.
pub fn create_request_fingerprint(fields: &FingerprintFields) -> Result<RequestFingerprint> {
    if fields.is_empty() {
        return Err(AppError::Validation(
            "At least one identifying field is required for a fingerprint".to_string(),
        ));
    }

    let mut hasher = Sha256::new();
    hasher.update(fields.canonical_bytes()?);
    Ok(RequestFingerprint(hex::encode(hasher.finalize())))
}
