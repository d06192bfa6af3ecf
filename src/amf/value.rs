//! AMF value types

use std::collections::HashMap;

use crate::error::AmfError;

/// AMF0 value representation
///
/// Covers the types that appear in RTMP command and data traffic. Long
/// strings share the `String` variant; the codec picks the wire marker by
/// length.
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    /// Null value (0x05)
    Null,

    /// Undefined value (0x06)
    Undefined,

    /// Boolean value (0x01)
    Boolean(bool),

    /// IEEE 754 double-precision floating point (0x00)
    Number(f64),

    /// UTF-8 string (0x02, or 0x0C beyond 65535 bytes)
    String(String),

    /// Dense array (0x0A)
    Array(Vec<AmfValue>),

    /// Key-value object (0x03); keys are always strings in AMF
    Object(HashMap<String, AmfValue>),

    /// Associative array with a length hint (0x08)
    EcmaArray(HashMap<String, AmfValue>),

    /// Date as milliseconds since the Unix epoch (0x0B)
    Date(f64),
}

impl AmfValue {
    /// Name of this value's kind, used in mismatch errors
    pub fn kind(&self) -> &'static str {
        match self {
            AmfValue::Null => "null",
            AmfValue::Undefined => "undefined",
            AmfValue::Boolean(_) => "boolean",
            AmfValue::Number(_) => "number",
            AmfValue::String(_) => "string",
            AmfValue::Array(_) => "array",
            AmfValue::Object(_) => "object",
            AmfValue::EcmaArray(_) => "ecma array",
            AmfValue::Date(_) => "date",
        }
    }

    /// Get this value as a string reference
    pub fn as_str(&self) -> Result<&str, AmfError> {
        match self {
            AmfValue::String(s) => Ok(s),
            other => Err(AmfError::TypeMismatch {
                expected: "string",
                actual: other.kind(),
            }),
        }
    }

    /// Get this value as a number
    pub fn as_number(&self) -> Result<f64, AmfError> {
        match self {
            AmfValue::Number(n) => Ok(*n),
            other => Err(AmfError::TypeMismatch {
                expected: "number",
                actual: other.kind(),
            }),
        }
    }

    /// Get this value as a boolean
    pub fn as_bool(&self) -> Result<bool, AmfError> {
        match self {
            AmfValue::Boolean(b) => Ok(*b),
            other => Err(AmfError::TypeMismatch {
                expected: "boolean",
                actual: other.kind(),
            }),
        }
    }

    /// Get this value as an object reference. EcmaArrays qualify, servers
    /// use the two interchangeably in status info objects.
    pub fn as_object(&self) -> Result<&HashMap<String, AmfValue>, AmfError> {
        match self {
            AmfValue::Object(m) => Ok(m),
            AmfValue::EcmaArray(m) => Ok(m),
            other => Err(AmfError::TypeMismatch {
                expected: "object",
                actual: other.kind(),
            }),
        }
    }

    /// Get this value as an array reference
    pub fn as_array(&self) -> Result<&Vec<AmfValue>, AmfError> {
        match self {
            AmfValue::Array(a) => Ok(a),
            other => Err(AmfError::TypeMismatch {
                expected: "array",
                actual: other.kind(),
            }),
        }
    }

    /// Check if this value is null or undefined
    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    /// Get a property from an object value, if present
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object().ok()?.get(key)
    }

    /// Get a required string property from an object value
    pub fn get_str(&self, key: &str) -> Result<&str, AmfError> {
        self.get(key)
            .ok_or_else(|| AmfError::MissingProperty(key.to_string()))?
            .as_str()
    }

    /// Get a required number property from an object value
    pub fn get_number(&self, key: &str) -> Result<f64, AmfError> {
        self.get(key)
            .ok_or_else(|| AmfError::MissingProperty(key.to_string()))?
            .as_number()
    }
}

impl Default for AmfValue {
    fn default() -> Self {
        AmfValue::Null
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<i32> for AmfValue {
    fn from(v: i32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl<V: Into<AmfValue>> From<Vec<V>> for AmfValue {
    fn from(v: Vec<V>) -> Self {
        AmfValue::Array(v.into_iter().map(|x| x.into()).collect())
    }
}

impl<V: Into<AmfValue>> From<HashMap<String, V>> for AmfValue {
    fn from(v: HashMap<String, V>) -> Self {
        AmfValue::Object(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}
