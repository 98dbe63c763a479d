//! Response types, response serializers and JSON validation.

use std::path::PathBuf;

use bytes::Bytes;
use http::HeaderMap;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde_json::Value;

use crate::error::RequestError;

/// A response as reported by the transport.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Final URL after redirects, when known.
    pub url: Option<url::Url>,
    /// The response body. Empty for download tasks.
    pub body: Bytes,
}

impl TransportResponse {
    /// Create a response with the given status and body.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            url: None,
            body: body.into(),
        }
    }

    /// Check if the response indicates success (2xx status).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get the Content-Type header value.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// How the response body is decoded into a [`ResponseObject`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResponseSerializerType {
    /// Raw bytes.
    Http,
    /// JSON value.
    #[default]
    Json,
    /// Well-formed XML document.
    Xml,
}

/// A parsed XML response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlDocument {
    root: String,
    source: String,
}

impl XmlDocument {
    /// Parse and check well-formedness of an XML document.
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut reader = Reader::from_str(source);
        let mut root = None;
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                    if root.is_none() {
                        root = Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(format!(
                        "XML error at position {}: {e}",
                        reader.buffer_position()
                    ));
                }
            }
        }
        let root = root.ok_or_else(|| "XML document has no root element".to_string())?;
        Ok(Self {
            root,
            source: source.to_string(),
        })
    }

    /// Name of the root element.
    pub fn root_name(&self) -> &str {
        &self.root
    }

    /// The document source text.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// The decoded response, shaped by the response serializer.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseObject {
    /// Raw bytes ([`ResponseSerializerType::Http`]).
    Bytes(Bytes),
    /// JSON value ([`ResponseSerializerType::Json`]).
    Json(Value),
    /// XML document ([`ResponseSerializerType::Xml`]).
    Xml(XmlDocument),
    /// Downloaded file location (resumable downloads).
    File(PathBuf),
}

impl ResponseObject {
    /// The JSON value, if this is a JSON response.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl ResponseSerializerType {
    /// Decode a response body.
    ///
    /// Empty JSON bodies decode to `null`.
    pub fn decode(self, body: &Bytes) -> Result<ResponseObject, RequestError> {
        match self {
            Self::Http => Ok(ResponseObject::Bytes(body.clone())),
            Self::Json => {
                if body.is_empty() {
                    return Ok(ResponseObject::Json(Value::Null));
                }
                serde_json::from_slice(body)
                    .map(ResponseObject::Json)
                    .map_err(|e| RequestError::Serialization(e.to_string()))
            }
            Self::Xml => {
                let text = std::str::from_utf8(body)
                    .map_err(|e| RequestError::Serialization(e.to_string()))?;
                XmlDocument::parse(text)
                    .map(ResponseObject::Xml)
                    .map_err(RequestError::Serialization)
            }
        }
    }
}

/// Structural validator for JSON responses.
///
/// Object shapes require every listed key to be present; scalar shapes also
/// accept `null`. An array shape validates every element against its item
/// shape.
///
/// ```
/// use horizon_request::JsonShape;
/// use serde_json::json;
///
/// let shape = JsonShape::object([
///     ("userId", JsonShape::String),
///     ("tags", JsonShape::array(JsonShape::String)),
/// ]);
/// assert!(shape.validate(&json!({"userId": "1", "tags": ["a"]})));
/// assert!(!shape.validate(&json!({"userId": 1, "tags": []})));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JsonShape {
    /// Any value.
    Any,
    /// A boolean.
    Bool,
    /// A number.
    Number,
    /// A string.
    String,
    /// An array whose elements match the inner shape.
    Array(Box<JsonShape>),
    /// An object containing at least the listed keys.
    Object(Vec<(String, JsonShape)>),
}

impl JsonShape {
    /// Build an object shape.
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, JsonShape)>) -> Self {
        Self::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build an array shape.
    pub fn array(item: JsonShape) -> Self {
        Self::Array(Box::new(item))
    }

    /// Check `value` against this shape.
    pub fn validate(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Any, _) => true,
            (Self::Object(fields), Value::Object(map)) => fields.iter().all(|(key, shape)| {
                map.get(key)
                    .is_some_and(|nested| shape.validate_field(nested))
            }),
            (Self::Array(item), Value::Array(items)) => {
                items.iter().all(|nested| item.validate_field(nested))
            }
            (Self::Bool, Value::Bool(_))
            | (Self::Number, Value::Number(_))
            | (Self::String, Value::String(_)) => true,
            _ => false,
        }
    }

    fn validate_field(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Bool | Self::Number | Self::String, Value::Null) => true,
            _ => self.validate(value),
        }
    }
}

/// Progress information for downloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferProgress {
    /// Number of bytes transferred so far.
    pub bytes_transferred: u64,
    /// Total number of bytes, if known.
    pub total_bytes: Option<u64>,
}

impl TransferProgress {
    /// Get the progress as a fraction (0.0 to 1.0), if total is known.
    pub fn fraction(&self) -> Option<f64> {
        self.total_bytes.map(|total| {
            if total == 0 {
                1.0
            } else {
                self.bytes_transferred as f64 / total as f64
            }
        })
    }

    /// Get the progress as a percentage (0 to 100), if total is known.
    pub fn percent(&self) -> Option<u8> {
        self.fraction().map(|f| (f * 100.0).min(100.0) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_decode_and_empty_body() {
        let object = ResponseSerializerType::Json
            .decode(&Bytes::from_static(br#"{"ok":true}"#))
            .unwrap();
        assert_eq!(object.as_json(), Some(&json!({"ok": true})));

        let empty = ResponseSerializerType::Json.decode(&Bytes::new()).unwrap();
        assert_eq!(empty, ResponseObject::Json(Value::Null));
    }

    #[test]
    fn test_json_decode_failure_is_serialization_error() {
        let err = ResponseSerializerType::Json
            .decode(&Bytes::from_static(b"{not json"))
            .unwrap_err();
        assert!(matches!(err, RequestError::Serialization(_)));
    }

    #[test]
    fn test_xml_decode() {
        let object = ResponseSerializerType::Xml
            .decode(&Bytes::from_static(b"<?xml version=\"1.0\"?><feed><item/></feed>"))
            .unwrap();
        match object {
            ResponseObject::Xml(doc) => assert_eq!(doc.root_name(), "feed"),
            other => panic!("expected xml, got {other:?}"),
        }

        assert!(ResponseSerializerType::Xml
            .decode(&Bytes::from_static(b"<feed><item></feed>"))
            .is_err());
    }

    #[test]
    fn test_shape_nested_objects_and_nulls() {
        let shape = JsonShape::object([
            ("id", JsonShape::Number),
            (
                "profile",
                JsonShape::object([("nick", JsonShape::String)]),
            ),
        ]);
        assert!(shape.validate(&json!({"id": 1, "profile": {"nick": null}})));
        assert!(!shape.validate(&json!({"id": 1})));
        assert!(!shape.validate(&json!({"id": 1, "profile": null})));
        assert!(!shape.validate(&json!([1])));
    }

    #[test]
    fn test_shape_arrays() {
        let shape = JsonShape::array(JsonShape::object([("n", JsonShape::Number)]));
        assert!(shape.validate(&json!([])));
        assert!(shape.validate(&json!([{"n": 1}, {"n": 2}])));
        assert!(!shape.validate(&json!([{"n": "x"}])));
    }

    #[test]
    fn test_transfer_progress() {
        let progress = TransferProgress {
            bytes_transferred: 50,
            total_bytes: Some(200),
        };
        assert_eq!(progress.percent(), Some(25));
        let unknown = TransferProgress {
            bytes_transferred: 50,
            total_bytes: None,
        };
        assert_eq!(unknown.fraction(), None);
    }
}
