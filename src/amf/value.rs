//! AMF value types
//!
//! Only the AMF0 subset an RTMP publisher exchanges with a server is modelled:
//! command arguments, `onStatus` info objects and `onMetaData` properties.

use std::collections::HashMap;

/// AMF0 value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AmfValue {
    /// Null (0x05)
    #[default]
    Null,

    /// Undefined (0x06)
    Undefined,

    /// Boolean (0x01)
    Boolean(bool),

    /// IEEE 754 double (0x00)
    Number(f64),

    /// UTF-8 string (0x02, or 0x0C when longer than 65535 bytes)
    String(String),

    /// Key-value object (0x03)
    Object(HashMap<String, AmfValue>),

    /// Associative array (0x08), used by `onMetaData`
    EcmaArray(HashMap<String, AmfValue>),

    /// Dense array (0x0A)
    Array(Vec<AmfValue>),

    /// Milliseconds since Unix epoch (0x0B)
    Date(f64),
}

impl AmfValue {
    /// Build an object from key/value pairs
    pub fn object<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<AmfValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        AmfValue::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build an ECMA array from key/value pairs
    pub fn ecma_array<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<AmfValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        AmfValue::EcmaArray(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Object or ECMA array properties
    pub fn as_object(&self) -> Option<&HashMap<String, AmfValue>> {
        match self {
            AmfValue::Object(m) | AmfValue::EcmaArray(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    /// Property lookup on an object value
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_builder_and_lookup() {
        let obj = AmfValue::object([
            ("code", AmfValue::from("NetStream.Publish.Start")),
            ("level", AmfValue::from("status")),
            ("clientid", AmfValue::from(1.0)),
        ]);

        assert_eq!(obj.get_string("code"), Some("NetStream.Publish.Start"));
        assert_eq!(obj.get_number("clientid"), Some(1.0));
        assert_eq!(obj.get("missing"), None);
    }

    #[test]
    fn test_ecma_array_is_object_like() {
        let meta = AmfValue::ecma_array([("width", 720u32), ("height", 1280u32)]);
        assert_eq!(meta.get_number("height"), Some(1280.0));
    }

    #[test]
    fn test_accessors_on_wrong_type() {
        let n = AmfValue::Number(3.0);
        assert_eq!(n.as_str(), None);
        assert_eq!(n.as_bool(), None);
        assert!(n.as_object().is_none());
        assert!(AmfValue::Undefined.is_null_or_undefined());
        assert!(!n.is_null_or_undefined());
    }
}
