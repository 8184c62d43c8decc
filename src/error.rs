use std::{error::Error as StdError, fmt};

use serde_json::json;

use crate::{transport::TransportError, Body, Headers, Method, Response};

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum PreqError {
    /// The call could not be turned into a request (e.g. no URI).
    #[error("invalid request options: {0}")]
    Options(String),
    /// HTTP error response, or a synthetic 502/504 for transport failures.
    #[error(transparent)]
    Http(#[from] HttpError),
    /// Body declared as JSON by its content type failed to parse. The
    /// undecoded payload is kept as text.
    #[error("invalid JSON response body (status {status}): {source}")]
    Decode {
        status: u16,
        headers: Headers,
        body: Body,
        #[source]
        source: serde_json::Error,
    },
}

impl PreqError {
    /// Status of the failure; `None` only for construction errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            PreqError::Options(_) => None,
            PreqError::Http(err) => Some(err.status),
            PreqError::Decode { status, .. } => Some(*status),
        }
    }

    /// Body of the failure; `None` only for construction errors.
    pub fn body(&self) -> Option<&Body> {
        match self {
            PreqError::Options(_) => None,
            PreqError::Http(err) => Some(&err.body),
            PreqError::Decode { body, .. } => Some(body),
        }
    }

    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            PreqError::Http(err) => Some(err),
            _ => None,
        }
    }
}

/// Machine-readable `type` of synthetic errors.
pub const EMPTY_RESPONSE: &str = "empty_response";
pub const INTERNAL_HTTP_ERROR: &str = "internal_http_error";

/// Error carrying the shape of a response: status, headers and body.
///
/// Genuine HTTP errors keep the server's headers and decoded body. Failures
/// that never produced a response use a sentinel status (502 for an empty
/// response, 504 for transport errors) and a JSON body whose `type` field
/// tells them apart.
#[derive(Debug)]
pub struct HttpError {
    pub status: u16,
    pub headers: Headers,
    pub body: Body,
    pub cause: Option<TransportError>,
}

impl HttpError {
    pub(crate) fn from_response(response: Response) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            cause: None,
        }
    }

    pub(crate) fn empty_response() -> Self {
        Self {
            status: 502,
            headers: Headers::new(),
            body: Body::Json(json!({ "type": EMPTY_RESPONSE })),
            cause: None,
        }
    }

    pub(crate) fn internal(err: TransportError, uri: &str, method: Method) -> Self {
        let body = json!({
            "type": INTERNAL_HTTP_ERROR,
            "description": err.to_string(),
            "error": {
                "kind": err.kind().as_str(),
                "code": err.code(),
            },
            "stack": source_chain(&err),
            "uri": uri,
            "method": method.as_str(),
        });
        Self {
            status: 504,
            headers: Headers::new(),
            body: Body::Json(body),
            cause: Some(err),
        }
    }

    /// The `type` field of a structured body, if any.
    pub fn error_type(&self) -> Option<&str> {
        self.body
            .as_json()
            .and_then(|body| body.get("type"))
            .and_then(serde_json::Value::as_str)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if let Some(kind) = self.error_type() {
            write!(f, ": {kind}")?;
        }
        Ok(())
    }
}

impl StdError for HttpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|err| err as &(dyn StdError + 'static))
    }
}

fn source_chain(err: &dyn StdError) -> String {
    let mut chain = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        chain.push_str("\ncaused by: ");
        chain.push_str(&cause.to_string());
        current = cause.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{HttpError, PreqError, EMPTY_RESPONSE, INTERNAL_HTTP_ERROR};
    use crate::{
        transport::{TransportError, TransportErrorKind},
        Body, Headers, Method, Response,
    };

    #[test]
    fn empty_response_uses_502_sentinel() {
        let err = HttpError::empty_response();
        assert_eq!(err.status, 502);
        assert_eq!(err.error_type(), Some(EMPTY_RESPONSE));
        assert_eq!(err.to_string(), "502: empty_response");
    }

    #[test]
    fn internal_error_embeds_diagnostics() {
        let cause = TransportError::new(TransportErrorKind::ConnectTimeout, "connect timed out");
        let err = HttpError::internal(cause, "http://localhost:12345/", Method::Get);

        assert_eq!(err.status, 504);
        assert_eq!(err.error_type(), Some(INTERNAL_HTTP_ERROR));
        let body = err.body.as_json().unwrap();
        assert_eq!(body["error"]["code"], "ETIMEDOUT");
        assert_eq!(body["uri"], "http://localhost:12345/");
        assert_eq!(body["method"], "get");
        assert!(body["description"].as_str().unwrap().contains("connect timed out"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn response_errors_keep_status_and_body() {
        let err = HttpError::from_response(Response {
            status: 404,
            headers: Headers::new(),
            body: Body::Json(json!({"type": "not_found", "title": "Not found"})),
        });
        assert_eq!(err.to_string(), "404: not_found");

        let err = PreqError::from(HttpError::from_response(Response {
            status: 500,
            headers: Headers::new(),
            body: Body::Text("boom".to_owned()),
        }));
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.to_string(), "500");
        assert_eq!(err.body(), Some(&Body::Text("boom".to_owned())));
        assert_eq!(PreqError::Options("x".to_owned()).status(), None);
        assert!(PreqError::Options("x".to_owned()).body().is_none());
    }

    #[test]
    fn decode_errors_keep_the_raw_body() {
        let source = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err = PreqError::Decode {
            status: 200,
            headers: Headers::new(),
            body: Body::Text("{oops".to_owned()),
            source,
        };
        assert_eq!(err.status(), Some(200));
        assert_eq!(err.body().and_then(Body::as_str), Some("{oops"));
        assert!(err.to_string().starts_with("invalid JSON response body (status 200)"));
    }
}
