//! Domain types shared by the client and the server.
//!
//! UDF arguments and return values travel as JSON-encoded bytes, so both
//! sides of the wire speak `serde_json::Value`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies a single record: (namespace, set, user key).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub namespace: String,
    pub set: String,
    pub key: String,
}

impl RecordKey {
    pub fn new(
        namespace: impl Into<String>,
        set: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            set: set.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.set, self.key)
    }
}

/// A UDF argument as given on the command line.
///
/// Arguments are loosely typed: the textual form is run through a JSON parse
/// first, and anything that does not parse is kept as the literal text. The
/// two cases are kept apart so callers can tell `"42"` (a number) from
/// `"abc"` (raw text that becomes a string on the wire).
#[derive(Clone, Debug, PartialEq)]
pub enum UdfArg {
    /// The text parsed as a JSON value (number, bool, array, object, ...).
    Value(Value),
    /// The text did not parse; it is passed through as a string.
    Text(String),
}

impl UdfArg {
    /// Parse one argument, falling back to the raw text.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(v) => Self::Value(v),
            Err(_) => Self::Text(raw.to_string()),
        }
    }

    /// The value this argument contributes to the call.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Text(s) => Value::String(s.clone()),
        }
    }
}

/// A UDF invocation: module, function, ordered arguments.
#[derive(Clone, Debug)]
pub struct UdfCall {
    pub module: String,
    pub function: String,
    pub args: Vec<UdfArg>,
}

impl UdfCall {
    pub fn new(module: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            args: Vec::new(),
        }
    }

    /// Build a call from raw argument strings, parsing each one.
    pub fn with_raw_args<I, S>(mut self, raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args = raw.into_iter().map(|s| UdfArg::parse(s.as_ref())).collect();
        self
    }

    /// Encode the arguments for the wire, one JSON document per argument.
    pub fn encode_args(&self) -> Result<Vec<Vec<u8>>, serde_json::Error> {
        self.args
            .iter()
            .map(|a| serde_json::to_vec(&a.to_value()))
            .collect()
    }
}

/// A stored record: named bins holding JSON values.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Record {
    pub bins: serde_json::Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bin(&self, name: &str) -> Option<&Value> {
        self.bins.get(name)
    }

    pub fn set_bin(&mut self, name: impl Into<String>, value: Value) {
        self.bins.insert(name.into(), value);
    }
}

/// Render a value as indented JSON, four spaces per level.
pub fn render_pretty(value: &Value) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    // serde_json only emits UTF-8
    Ok(String::from_utf8(buf).expect("pretty JSON is UTF-8"))
}

// Conversion helpers between our types and protobuf types
impl From<&RecordKey> for crate::pb::RecordKey {
    fn from(key: &RecordKey) -> Self {
        Self {
            namespace: key.namespace.clone(),
            set: key.set.clone(),
            key: key.key.clone(),
        }
    }
}

impl From<&crate::pb::RecordKey> for RecordKey {
    fn from(pb: &crate::pb::RecordKey) -> Self {
        Self {
            namespace: pb.namespace.clone(),
            set: pb.set.clone(),
            key: pb.key.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arg_parses_number() {
        assert_eq!(UdfArg::parse("42"), UdfArg::Value(json!(42)));
        assert_eq!(UdfArg::parse("-3.5"), UdfArg::Value(json!(-3.5)));
    }

    #[test]
    fn arg_parses_bool_and_structures() {
        assert_eq!(UdfArg::parse("true"), UdfArg::Value(json!(true)));
        assert_eq!(UdfArg::parse("[1,2]"), UdfArg::Value(json!([1, 2])));
        assert_eq!(UdfArg::parse(r#"{"a":1}"#), UdfArg::Value(json!({"a": 1})));
    }

    #[test]
    fn arg_falls_back_to_text() {
        assert_eq!(UdfArg::parse("abc"), UdfArg::Text("abc".to_string()));
        // trailing garbage fails the parse, so the whole token stays text
        assert_eq!(UdfArg::parse("42abc"), UdfArg::Text("42abc".to_string()));
        assert_eq!(UdfArg::parse("abc").to_value(), json!("abc"));
    }

    #[test]
    fn call_encodes_typed_args() {
        let call = UdfCall::new("m", "f").with_raw_args(["42", "abc"]);
        let encoded = call.encode_args().unwrap();
        assert_eq!(encoded[0], b"42");
        assert_eq!(encoded[1], b"\"abc\"");
    }

    #[test]
    fn pretty_uses_four_space_indent() {
        let rendered = render_pretty(&json!({"a": 1})).unwrap();
        assert_eq!(rendered, "{\n    \"a\": 1\n}");
    }

    #[test]
    fn key_roundtrips_through_pb() {
        let key = RecordKey::new("test", "demo", "k1");
        let pb: crate::pb::RecordKey = (&key).into();
        assert_eq!(RecordKey::from(&pb), key);
    }
}
