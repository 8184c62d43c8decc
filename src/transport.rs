//! Transport collaborator: performs the socket I/O of a single attempt.
//!
//! The executor only relies on the [`Transport`] trait. [`HttpTransport`] is
//! the `reqwest` backed implementation used by [`crate::Preq::new`].

use std::{
    collections::HashMap,
    future::Future,
    io,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use reqwest::header::HeaderMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

use crate::{ClientOptions, Headers, Payload, RequestDescriptor};

/// Response as reported by the transport, before any decoding.
#[derive(Clone, Debug, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Headers,
    /// Payload, already decompressed when gzip was negotiated.
    pub body: Vec<u8>,
    /// URI of the last request after following redirects.
    pub final_uri: String,
}

/// Failure class of a transport error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Could not connect (refused, DNS failure, TLS handshake, ...).
    Connect,
    /// The connect phase exceeded its own bound.
    ConnectTimeout,
    /// The overall request timeout expired.
    Timeout,
    /// The connection failed while reading the body.
    Body,
    /// Anything else, including requests that could not be built.
    Request,
}

impl TransportErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::ConnectTimeout => "connect_timeout",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Body => "body",
            TransportErrorKind::Request => "request",
        }
    }

    /// Stable error code, `ETIMEDOUT` being reserved for connect timeouts.
    pub fn code(self) -> &'static str {
        match self {
            TransportErrorKind::Connect => "ECONNECT",
            TransportErrorKind::ConnectTimeout => "ETIMEDOUT",
            TransportErrorKind::Timeout => "ESOCKETTIMEDOUT",
            TransportErrorKind::Body => "EBODY",
            TransportErrorKind::Request => "EREQUEST",
        }
    }
}

/// Failure to obtain a response at all. Always retryable.
#[derive(Debug, thiserror::Error)]
#[error("{} error: {message}", .kind.as_str())]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: TransportErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        Self::with_source(classify(&err), err.to_string(), err)
    }
}

fn classify(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_connect() && err.is_timeout() {
        TransportErrorKind::ConnectTimeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else if connection_dropped(err) {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Request
    }
}

/// Whether an I/O error in the source chain reports a refused, reset or
/// otherwise dropped connection.
fn connection_dropped(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(cause) = current {
        if let Some(io) = cause.downcast_ref::<io::Error>() {
            if matches!(
                io.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
            ) {
                return true;
            }
        }
        current = cause.source();
    }
    false
}

/// Performs one HTTP attempt for a descriptor.
///
/// `Ok(None)` reports an empty response. Implementations own connection
/// reuse and per-host concurrency limits.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &RequestDescriptor,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<RawResponse>, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(
        &self,
        request: &RequestDescriptor,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<RawResponse>, TransportError>> + Send {
        (**self).send(request, timeout)
    }
}

/// Upper bound on cached clients; further connect-timeout variants get a
/// one-off client.
const MAX_CACHED_CLIENTS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ClientKey {
    gzip: bool,
    connect_timeout: Option<Duration>,
}

/// `reqwest` transport with a connect-phase timeout and a per-host cap on
/// concurrent requests.
///
/// Cloning is cheap; clones share connection pools and host limits.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    options: ClientOptions,
    clients: Arc<Mutex<HashMap<ClientKey, reqwest::Client>>>,
    hosts: Arc<HostLimiter>,
}

impl HttpTransport {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            hosts: Arc::new(HostLimiter::new(options.max_sockets_per_host)),
            clients: Arc::default(),
            options,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn client(&self, key: ClientKey) -> Result<reqwest::Client, TransportError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(self.options.max_sockets_per_host)
            .gzip(key.gzip);
        if let Some(connect_timeout) = key.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        let client = builder.build().map_err(|err| {
            TransportError::with_source(
                TransportErrorKind::Request,
                format!("failed to build HTTP client: {err}"),
                err,
            )
        })?;
        if clients.len() < MAX_CACHED_CLIENTS {
            clients.insert(key, client.clone());
        }
        Ok(client)
    }

    /// Connect bound for a request; zero disables it.
    fn connect_timeout(&self, request: &RequestDescriptor) -> Option<Duration> {
        let timeout = request
            .connect_timeout
            .unwrap_or(Duration::from_millis(self.options.connect_timeout_ms));
        (!timeout.is_zero()).then_some(timeout)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        timeout: Duration,
    ) -> Result<Option<RawResponse>, TransportError> {
        let url = Url::parse(&request.uri).map_err(|err| {
            TransportError::with_source(
                TransportErrorKind::Request,
                format!("invalid URI '{}'", request.uri),
                err,
            )
        })?;

        let method = reqwest::Method::try_from(request.method).map_err(|err| {
            TransportError::with_source(TransportErrorKind::Request, err.to_string(), err)
        })?;
        let client = self.client(ClientKey {
            gzip: request.gzip,
            connect_timeout: self.connect_timeout(request),
        })?;

        // Held until the body has been read.
        let _permit = self.hosts.acquire(&url).await;

        let mut builder = client
            .request(method, url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(query) = &request.query {
            builder = builder.query(query);
        }
        builder = match &request.body {
            None => builder,
            Some(Payload::Bytes(bytes)) => builder.body(bytes.clone()),
            Some(Payload::Text(text)) => builder.body(text.clone()),
            Some(Payload::Form(fields)) => builder.form(fields),
        };

        let response = builder.send().await.map_err(TransportError::from_reqwest)?;
        let status = response.status().as_u16();
        let final_uri = response.url().to_string();
        let headers = collect_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(TransportError::from_reqwest)?
            .to_vec();

        Ok(Some(RawResponse {
            status,
            headers,
            body,
            final_uri,
        }))
    }
}

/// Flattens a header map; repeated headers are joined with `", "`.
fn collect_headers(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        let value = String::from_utf8_lossy(value.as_bytes());
        headers
            .entry(name.as_str().to_owned())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    headers
}

/// Caps concurrent requests per `host:port`.
#[derive(Debug)]
struct HostLimiter {
    max_per_host: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HostLimiter {
    fn new(max_per_host: usize) -> Self {
        Self {
            max_per_host: max_per_host.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    fn host_key(url: &Url) -> String {
        format!(
            "{}:{}",
            url.host_str().unwrap_or_default(),
            url.port_or_known_default().unwrap_or_default()
        )
    }

    async fn acquire(&self, url: &Url) -> Option<OwnedSemaphorePermit> {
        let semaphore = {
            let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
            // Permits and waiters hold clones; a lone reference is an idle host.
            hosts.retain(|_, semaphore| Arc::strong_count(semaphore) > 1);
            hosts
                .entry(Self::host_key(url))
                .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_host)))
                .clone()
        };
        semaphore.acquire_owned().await.ok()
    }

    #[cfg(test)]
    fn tracked_hosts(&self) -> usize {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
