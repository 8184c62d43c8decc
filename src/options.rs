use std::env;

/// Configures the HTTP transport and the retry state machine.
///
/// Passed explicitly to [`crate::Preq::with_options`]; there is no
/// process-wide default connection manager.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Time allowed to establish a connection, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Maximum number of simultaneous requests to one host.
    pub max_sockets_per_host: usize,
    /// First backoff delay between attempts, in milliseconds.
    pub initial_backoff_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            // Very high caps make idle pools grow without bound under sustained load.
            max_sockets_per_host: 250,
            initial_backoff_ms: 100,
        }
    }
}

impl ClientOptions {
    /// Builds options from defaults overridden by environment variables.
    ///
    /// Reads (all optional):
    /// - `PREQ_CONNECT_TIMEOUT_MS`
    /// - `PREQ_MAX_SOCKETS_PER_HOST`
    /// - `PREQ_INITIAL_BACKOFF_MS`
    ///
    /// Returns an error if a variable is set but is not a valid number.
    pub fn from_env() -> std::result::Result<Self, String> {
        let mut options = Self::default();
        if let Some(value) = env_number("PREQ_CONNECT_TIMEOUT_MS")? {
            options.connect_timeout_ms = value;
        }
        if let Some(value) = env_number("PREQ_MAX_SOCKETS_PER_HOST")? {
            options.max_sockets_per_host = usize::try_from(value)
                .map_err(|_| "PREQ_MAX_SOCKETS_PER_HOST is out of range".to_owned())?;
        }
        if let Some(value) = env_number("PREQ_INITIAL_BACKOFF_MS")? {
            options.initial_backoff_ms = value;
        }
        Ok(options)
    }
}

fn env_number(name: &str) -> std::result::Result<Option<u64>, String> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| format!("{name} must be a non-negative integer, got '{raw}'")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(format!("{name} is not valid unicode")),
    }
}

/// Body supplied by the caller.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    Bytes(Vec<u8>),
    Text(String),
    /// Structured payload, sent as JSON or as a form depending on the request.
    Structured(serde_json::Value),
}

impl From<Vec<u8>> for RequestBody {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for RequestBody {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        Self::Structured(value)
    }
}

/// Response body encoding requested explicitly by the caller.
///
/// Leaving it unset lets the response content type decide how the body is
/// decoded. Setting it, even to [`Encoding::Binary`], disables that decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Binary,
    Utf8,
}

/// Loosely specified request options, the input of normalization.
///
/// Every field is optional; [`crate::normalize`] fills in defaults.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestOptions {
    pub uri: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    /// Headers in insertion order; keys are lowercased during normalization.
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub query: Option<Vec<(String, String)>>,
    /// Extra attempts after the first one.
    pub retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub gzip: Option<bool>,
    pub encoding: Option<Encoding>,
    pub connect_timeout_ms: Option<u64>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a structured body; pair with a JSON `content-type` to send JSON.
    pub fn json(self, value: serde_json::Value) -> Self {
        self.body(RequestBody::Structured(value))
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query
            .get_or_insert_with(Vec::new)
            .push((name.into(), value.into()));
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn gzip(mut self, gzip: bool) -> Self {
        self.gzip = Some(gzip);
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn connect_timeout_ms(mut self, connect_timeout_ms: u64) -> Self {
        self.connect_timeout_ms = Some(connect_timeout_ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientOptions, RequestBody, RequestOptions};

    #[test]
    fn client_defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.connect_timeout_ms, 5_000);
        assert_eq!(options.max_sockets_per_host, 250);
        assert_eq!(options.initial_backoff_ms, 100);
    }

    #[test]
    fn builder_accumulates_headers_and_query() {
        let options = RequestOptions::new()
            .uri("http://example.org")
            .header("X-A", "1")
            .header("x-a", "2")
            .query("q", "foo")
            .query("page", "2")
            .body("payload");

        assert_eq!(options.headers.len(), 2);
        assert_eq!(
            options.query,
            Some(vec![
                ("q".to_owned(), "foo".to_owned()),
                ("page".to_owned(), "2".to_owned())
            ])
        );
        assert_eq!(options.body, Some(RequestBody::Text("payload".to_owned())));
    }
}
