//! Lenient JSON handling for device responses
//!
//! Devices occasionally answer with a byte-order mark, surrounding whitespace or
//! trailing bytes after the document. The first complete JSON value wins.

use serde_json::{Map, Value};

use crate::errors::{RestError, Result};

pub const CONTENT_FIELD: &str = "content";

pub fn parse_lenient(body: &[u8]) -> Result<Value> {
    let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
    let trimmed = trim_ascii(body);
    if trimmed.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let mut stream = serde_json::Deserializer::from_slice(trimmed).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(RestError::Serialization(e.to_string())),
        None => Ok(Value::Object(Map::new())),
    }
}

/// Wrap a text body as `{"content": text}`
pub fn wrap_text(text: impl Into<String>) -> Value {
    let mut map = Map::new();
    map.insert(CONTENT_FIELD.to_string(), Value::String(text.into()));
    Value::Object(map)
}

/// `items` array of a collection response; missing means empty
pub fn items(document: &Value) -> &[Value] {
    document
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn str_field<'a>(document: &'a Value, field: &str) -> Option<&'a str> {
    document.get(field).and_then(Value::as_str)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &bytes[start..end.max(start)]
}
