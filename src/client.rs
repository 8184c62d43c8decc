use std::{fmt, time::Duration};

use crate::{
    executor::Executor,
    normalize::{normalize, Call},
    transport::{HttpTransport, Transport},
    ClientOptions, Method, Response, Result,
};

/// HTTP request helper: normalizes a call, runs it, retries transient
/// failures.
///
/// Every call gets its own retry state; nothing is shared between
/// concurrent calls except the transport.
///
/// # Example
///
/// ```no_run
/// use preq::{Preq, RequestOptions};
///
/// # async fn run() -> preq::Result<()> {
/// let preq = Preq::new();
///
/// let page = preq.get("https://en.wikipedia.org/wiki/Main_Page").await?;
/// println!("{} {:?}", page.status, page.body.as_str());
///
/// let created = preq
///     .post((
///         "https://example.org/items",
///         RequestOptions::new()
///             .header("content-type", "application/json")
///             .json(serde_json::json!({ "name": "Kit" })),
///     ))
///     .await?;
/// println!("{}", created.status);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Preq<T = HttpTransport> {
    transport: T,
    initial_backoff: Duration,
}

impl<T> fmt::Debug for Preq<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preq")
            .field("initial_backoff", &self.initial_backoff)
            .finish_non_exhaustive()
    }
}

impl Preq<HttpTransport> {
    /// Creates a helper with default [`ClientOptions`].
    pub fn new() -> Self {
        Self::with_options(ClientOptions::default())
    }

    /// Creates a helper whose HTTP transport is configured by `options`.
    pub fn with_options(options: ClientOptions) -> Self {
        let initial_backoff = Duration::from_millis(options.initial_backoff_ms);
        Self {
            transport: HttpTransport::new(options),
            initial_backoff,
        }
    }

    /// Creates a helper from `PREQ_*` environment variables.
    ///
    /// See [`ClientOptions::from_env`].
    pub fn from_env() -> std::result::Result<Self, String> {
        ClientOptions::from_env().map(Self::with_options)
    }
}

impl Default for Preq<HttpTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> Preq<T> {
    /// Uses a custom transport with the default initial backoff.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            initial_backoff: Duration::from_millis(ClientOptions::default().initial_backoff_ms),
        }
    }

    /// Overrides the first backoff delay.
    pub fn initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends a request whose method comes from the options (GET if unset).
    pub async fn request(&self, call: impl Into<Call>) -> Result<Response> {
        let call = call.into();
        let method = match call.requested_method() {
            Some(method) => method.parse()?,
            None => Method::Get,
        };
        self.send(method, call).await
    }

    /// Sends a request with an explicit method, overriding any in the options.
    pub async fn send(&self, method: Method, call: impl Into<Call>) -> Result<Response> {
        let Call { target, options } = call.into();
        let descriptor = normalize(target, options, method)?;
        Executor::new(&self.transport, descriptor, self.initial_backoff)
            .run()
            .await
    }

    pub async fn get(&self, call: impl Into<Call>) -> Result<Response> {
        self.send(Method::Get, call).await
    }

    pub async fn head(&self, call: impl Into<Call>) -> Result<Response> {
        self.send(Method::Head, call).await
    }

    pub async fn put(&self, call: impl Into<Call>) -> Result<Response> {
        self.send(Method::Put, call).await
    }

    pub async fn post(&self, call: impl Into<Call>) -> Result<Response> {
        self.send(Method::Post, call).await
    }

    pub async fn delete(&self, call: impl Into<Call>) -> Result<Response> {
        self.send(Method::Delete, call).await
    }

    pub async fn trace(&self, call: impl Into<Call>) -> Result<Response> {
        self.send(Method::Trace, call).await
    }

    pub async fn options(&self, call: impl Into<Call>) -> Result<Response> {
        self.send(Method::Options, call).await
    }

    pub async fn mkcol(&self, call: impl Into<Call>) -> Result<Response> {
        self.send(Method::Mkcol, call).await
    }

    pub async fn patch(&self, call: impl Into<Call>) -> Result<Response> {
        self.send(Method::Patch, call).await
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use super::Preq;
    use crate::{
        transport::{RawResponse, Transport, TransportError},
        Method, PreqError, RequestDescriptor, RequestOptions,
    };

    #[derive(Default)]
    struct Recorder {
        hits: AtomicUsize,
        methods: Mutex<Vec<Method>>,
    }

    impl Transport for Recorder {
        async fn send(
            &self,
            request: &RequestDescriptor,
            _timeout: Duration,
        ) -> Result<Option<RawResponse>, TransportError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.methods.lock().unwrap().push(request.method);
            Ok(Some(RawResponse {
                status: 200,
                headers: Default::default(),
                body: Vec::new(),
                final_uri: request.uri.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn missing_uri_fails_before_dispatch() {
        let preq = Preq::with_transport(Recorder::default());

        let err = preq.get("").await.expect_err("empty URI must fail");
        assert!(matches!(err, PreqError::Options(_)));

        let err = preq
            .request(RequestOptions::new().method("get"))
            .await
            .expect_err("options without URI must fail");
        assert!(matches!(err, PreqError::Options(_)));

        assert_eq!(preq.transport().hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn request_takes_method_from_options() {
        let preq = Preq::with_transport(Recorder::default());
        let uri = "http://localhost/wiki/Main_Page";

        preq.request(uri).await.unwrap();
        preq.request(RequestOptions::new().uri(uri).method("DELETE"))
            .await
            .unwrap();
        preq.request((uri, RequestOptions::new().method("mkcol")))
            .await
            .unwrap();

        assert_eq!(
            *preq.transport().methods.lock().unwrap(),
            vec![Method::Get, Method::Delete, Method::Mkcol]
        );
    }

    #[tokio::test]
    async fn named_entries_fix_the_method() {
        let preq = Preq::with_transport(Recorder::default());
        let uri = "http://localhost/";
        let with_post = || (uri, RequestOptions::new().method("post"));

        preq.get(with_post()).await.unwrap();
        preq.head(with_post()).await.unwrap();
        preq.put(with_post()).await.unwrap();
        preq.delete(with_post()).await.unwrap();
        preq.trace(with_post()).await.unwrap();
        preq.options(with_post()).await.unwrap();
        preq.mkcol(with_post()).await.unwrap();
        preq.patch(with_post()).await.unwrap();
        preq.post(uri).await.unwrap();

        assert_eq!(
            *preq.transport().methods.lock().unwrap(),
            vec![
                Method::Get,
                Method::Head,
                Method::Put,
                Method::Delete,
                Method::Trace,
                Method::Options,
                Method::Mkcol,
                Method::Patch,
                Method::Post,
            ]
        );
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let preq = Preq::with_transport(Recorder::default());
        let err = preq
            .request(("http://localhost/", RequestOptions::new().method("CONNECT")))
            .await
            .expect_err("must reject unsupported method");
        assert!(matches!(err, PreqError::Options(_)));
        assert_eq!(preq.transport().hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn debug_output_is_compact() {
        let preq = Preq::new();
        assert!(format!("{preq:?}").starts_with("Preq"));
    }
}
