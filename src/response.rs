use serde::Serialize;

use crate::Headers;

/// Response body after content-type driven decoding.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Body {
    /// No body, or a body discarded for a bodyless status.
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Bytes(bytes) => bytes.is_empty(),
            Body::Text(text) => text.is_empty(),
            Body::Json(_) => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Bytes(bytes) => Some(bytes),
            Body::Text(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Normalized outcome of a call that ended with a status below 400.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Body,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Body, Response};

    #[test]
    fn body_accessors() {
        assert!(Body::Empty.is_empty());
        assert!(Body::Bytes(Vec::new()).is_empty());
        assert_eq!(Body::Text("abc".to_owned()).as_str(), Some("abc"));
        assert_eq!(Body::Text("abc".to_owned()).as_bytes(), Some(&b"abc"[..]));
        assert_eq!(Body::Json(json!({"a": 1})).as_json(), Some(&json!({"a": 1})));
        assert_eq!(Body::Bytes(vec![1]).as_str(), None);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let response = Response {
            status: 200,
            headers: [("content-type".to_owned(), "text/plain".to_owned())].into(),
            body: Body::Empty,
        };
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(response.header("content-location"), None);
    }
}
