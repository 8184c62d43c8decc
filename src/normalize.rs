//! Option normalization: turns a loosely specified call into a
//! [`RequestDescriptor`] that the executor can run as-is.

use std::{collections::BTreeMap, fmt, time::Duration};

use crate::{Encoding, Method, PreqError, RequestBody, RequestOptions, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Header map with lowercase keys.
pub type Headers = BTreeMap<String, String>;

/// What a call is aimed at: a bare URI or a descriptor-like option set.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Uri(String),
    Options(RequestOptions),
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Self::Uri(value.to_owned())
    }
}

impl From<String> for Target {
    fn from(value: String) -> Self {
        Self::Uri(value)
    }
}

impl From<&String> for Target {
    fn from(value: &String) -> Self {
        Self::Uri(value.clone())
    }
}

impl From<url::Url> for Target {
    fn from(value: url::Url) -> Self {
        Self::Uri(value.into())
    }
}

impl From<RequestOptions> for Target {
    fn from(value: RequestOptions) -> Self {
        Self::Options(value)
    }
}

/// Arguments of one call: a target plus optional explicit options.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub target: Target,
    pub options: Option<RequestOptions>,
}

impl Call {
    pub fn new(target: impl Into<Target>, options: RequestOptions) -> Self {
        Self {
            target: target.into(),
            options: Some(options),
        }
    }

    /// Method named by the options, then by a descriptor-like target.
    pub(crate) fn requested_method(&self) -> Option<&str> {
        self.options
            .as_ref()
            .and_then(|options| options.method.as_deref())
            .or(match &self.target {
                Target::Options(options) => options.method.as_deref(),
                Target::Uri(_) => None,
            })
    }
}

impl From<Target> for Call {
    fn from(target: Target) -> Self {
        Self {
            target,
            options: None,
        }
    }
}

macro_rules! call_from_target {
    ($($source:ty),*) => {
        $(
            impl From<$source> for Call {
                fn from(value: $source) -> Self {
                    Target::from(value).into()
                }
            }
        )*
    };
}

call_from_target!(&str, String, &String, url::Url, RequestOptions);

impl<S: Into<String>> From<(S, RequestOptions)> for Call {
    fn from((uri, options): (S, RequestOptions)) -> Self {
        Self::new(Target::Uri(uri.into()), options)
    }
}

/// Request payload as handed to the transport.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Text(String),
    /// `application/x-www-form-urlencoded` fields.
    Form(Vec<(String, String)>),
}

/// Fully specified description of one HTTP call.
#[derive(Clone, PartialEq)]
pub struct RequestDescriptor {
    pub uri: String,
    pub method: Method,
    pub headers: Headers,
    pub body: Option<Payload>,
    pub query: Option<Vec<(String, String)>>,
    pub timeout: Duration,
    /// Extra attempts after the first one.
    pub retries: u32,
    pub gzip: bool,
    pub encoding: Encoding,
    /// Whether the caller chose [`RequestDescriptor::encoding`] explicitly.
    pub encoding_provided: bool,
    pub connect_timeout: Option<Duration>,
}

impl RequestDescriptor {
    /// Total number of attempts the executor may make.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: BTreeMap<&str, &str> = self
            .headers
            .iter()
            .map(|(name, value)| {
                if name == "authorization" {
                    (name.as_str(), "<redacted>")
                } else {
                    (name.as_str(), value.as_str())
                }
            })
            .collect();
        f.debug_struct("RequestDescriptor")
            .field("uri", &self.uri)
            .field("method", &self.method)
            .field("headers", &headers)
            .field("body", &self.body)
            .field("query", &self.query)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("gzip", &self.gzip)
            .field("encoding", &self.encoding)
            .field("encoding_provided", &self.encoding_provided)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Normalizes a call into a [`RequestDescriptor`].
///
/// Without explicit `options` the target itself is the option set (a bare
/// URI becomes `{ uri }`). With `options`, the target supplies their URI.
/// Fails with [`PreqError::Options`] when no URI can be determined.
pub fn normalize(
    target: Target,
    options: Option<RequestOptions>,
    method: Method,
) -> Result<RequestDescriptor> {
    let mut options = match (target, options) {
        (Target::Uri(uri), None) => RequestOptions::new().uri(uri),
        (Target::Options(options), None) => options,
        (Target::Uri(uri), Some(mut options)) => {
            options.uri = Some(uri);
            options
        }
        (Target::Options(target), Some(mut options)) => {
            options.uri = target.uri.or(target.url);
            options
        }
    };

    let uri = [options.uri.take(), options.url.take()]
        .into_iter()
        .flatten()
        .find(|uri| !uri.trim().is_empty())
        .ok_or_else(|| PreqError::Options("request URI missing".to_owned()))?;

    let headers = lowercase_headers(options.headers);

    let body = match options.body {
        None => None,
        Some(RequestBody::Bytes(bytes)) => Some(Payload::Bytes(bytes)),
        Some(RequestBody::Text(text)) => Some(Payload::Text(text)),
        Some(RequestBody::Structured(value)) => Some(structured_payload(value, &headers, method)?),
    };

    let retries = options
        .retries
        .unwrap_or(if method.is_idempotent() { 1 } else { 0 });

    let timeout = match options.timeout_ms {
        Some(ms) if ms > 0 => Duration::from_millis(ms),
        _ => DEFAULT_TIMEOUT,
    };

    let gzip = headers
        .get("accept-encoding")
        .is_some_and(|value| mentions_gzip(value))
        || options.gzip.unwrap_or(method == Method::Get);

    let (encoding, encoding_provided) = match options.encoding {
        Some(encoding) => (encoding, true),
        None => (Encoding::Binary, false),
    };

    Ok(RequestDescriptor {
        uri,
        method,
        headers,
        body,
        query: options.query,
        timeout,
        retries,
        gzip,
        encoding,
        encoding_provided,
        connect_timeout: options.connect_timeout_ms.map(Duration::from_millis),
    })
}

fn lowercase_headers(headers: Vec<(String, String)>) -> Headers {
    headers
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .collect()
}

fn structured_payload(
    value: serde_json::Value,
    headers: &Headers,
    method: Method,
) -> Result<Payload> {
    let is_json = headers
        .get("content-type")
        .is_some_and(|value| value.trim_start().starts_with("application/json"));

    match value {
        serde_json::Value::Object(fields) if !is_json && method == Method::Post => Ok(
            Payload::Form(
                fields
                    .into_iter()
                    .map(|(name, value)| (name, form_value(value)))
                    .collect(),
            ),
        ),
        value => serde_json::to_string(&value)
            .map(Payload::Text)
            .map_err(|err| PreqError::Options(format!("request body is not serializable: {err}"))),
    }
}

fn form_value(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Whole-word match of `gzip` in a header value.
fn mentions_gzip(value: &str) -> bool {
    value
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .any(|token| token.eq_ignore_ascii_case("gzip"))
}
