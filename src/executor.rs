//! Request executor: runs one descriptor through the transport, retrying
//! transient failures with randomized exponential backoff.

use std::time::Duration;

use tokio::time::sleep;
use url::Url;

use crate::{
    transport::{RawResponse, Transport},
    Body, Encoding, Headers, HttpError, PreqError, RequestDescriptor, Response, Result,
};

/// Statuses that never carry a body.
const BODYLESS_STATUSES: [u16; 3] = [204, 205, 304];

/// Gateway statuses handled like the transport failures they stand for.
const GATEWAY_STATUSES: [u16; 2] = [502, 504];

/// Retry bookkeeping owned by a single in-flight request.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RetryState {
    remaining: u32,
    delay: Duration,
    timeout: Duration,
    base_timeout: Duration,
    /// Server-directed delay replacing the next computed backoff.
    forced_delay: Option<Duration>,
}

impl RetryState {
    pub(crate) fn new(descriptor: &RequestDescriptor, initial_backoff: Duration) -> Self {
        Self {
            remaining: descriptor.retries,
            delay: initial_backoff,
            timeout: descriptor.timeout,
            base_timeout: descriptor.timeout,
            forced_delay: None,
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    fn force_delay(&mut self, delay: Duration) {
        self.forced_delay = Some(delay);
    }

    /// Consumes one retry and returns the delay to wait before it, or
    /// `None` when the budget is exhausted.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.delay = match self.forced_delay.take() {
            Some(delay) => delay,
            None => self.delay * 2 + self.delay.mul_f64(rand::random::<f64>()),
        };
        self.timeout += self.base_timeout + self.base_timeout.mul_f64(rand::random::<f64>());
        Some(self.delay)
    }
}

enum Attempt {
    Success(Response),
    Retryable(HttpError),
    Fatal(PreqError),
}

/// Drives a single request to completion.
pub(crate) struct Executor<'a, T> {
    transport: &'a T,
    descriptor: RequestDescriptor,
    state: RetryState,
}

impl<'a, T: Transport> Executor<'a, T> {
    pub(crate) fn new(
        transport: &'a T,
        descriptor: RequestDescriptor,
        initial_backoff: Duration,
    ) -> Self {
        let state = RetryState::new(&descriptor, initial_backoff);
        Self {
            transport,
            descriptor,
            state,
        }
    }

    /// Runs attempts until success, a fatal error, or an exhausted budget.
    pub(crate) async fn run(mut self) -> Result<Response> {
        let mut attempt = 1u32;
        loop {
            let failure = match self.attempt(attempt).await {
                Attempt::Success(response) => return Ok(response),
                Attempt::Fatal(err) => return Err(err),
                Attempt::Retryable(err) => err,
            };

            let Some(delay) = self.state.next_delay() else {
                return Err(failure.into());
            };

            #[cfg(feature = "tracing")]
            tracing::warn!(
                method = %self.descriptor.method,
                uri = %self.descriptor.uri,
                status = failure.status,
                error = %failure,
                delay_ms = delay.as_millis() as u64,
                remaining = self.state.remaining,
                "retrying request"
            );

            sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(&mut self, attempt: u32) -> Attempt {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %self.descriptor.method,
            uri = %self.descriptor.uri,
            attempt,
            timeout_ms = self.state.timeout().as_millis() as u64,
            "sending request"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = attempt;

        let raw = match self
            .transport
            .send(&self.descriptor, self.state.timeout())
            .await
        {
            Ok(Some(raw)) => raw,
            Ok(None) => return Attempt::Retryable(HttpError::empty_response()),
            Err(err) => {
                return Attempt::Retryable(HttpError::internal(
                    err,
                    &self.descriptor.uri,
                    self.descriptor.method,
                ))
            }
        };

        let response = match process_response(&self.descriptor, raw) {
            Ok(response) => response,
            Err(err) => return Attempt::Fatal(err),
        };

        if response.status < 400 {
            return Attempt::Success(response);
        }

        if response.status == 503 {
            if let Some(delay) = retry_after(&response.headers, self.descriptor.timeout) {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    uri = %self.descriptor.uri,
                    delay_ms = delay.as_millis() as u64,
                    "honouring retry-after"
                );
                self.state.force_delay(delay);
                return Attempt::Retryable(HttpError::from_response(response));
            }
        } else if GATEWAY_STATUSES.contains(&response.status) {
            return Attempt::Retryable(HttpError::from_response(response));
        }

        Attempt::Fatal(HttpError::from_response(response).into())
    }
}

/// Numeric `retry-after` below the request timeout.
fn retry_after(headers: &Headers, timeout: Duration) -> Option<Duration> {
    let value = headers.get("retry-after")?.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let delay = Duration::from_secs(value.parse().ok()?);
    (delay < timeout).then_some(delay)
}

/// Normalizes a raw transport response into a [`Response`].
pub(crate) fn process_response(
    descriptor: &RequestDescriptor,
    raw: RawResponse,
) -> Result<Response> {
    let RawResponse {
        status,
        mut headers,
        body,
        final_uri,
    } = raw;

    if descriptor.gzip {
        headers.remove("content-encoding");
        headers.remove("content-length");
    }

    let body = if BODYLESS_STATUSES.contains(&status) {
        Body::Empty
    } else {
        decode_body(descriptor, status, &mut headers, body)?
    };

    if is_redirected(descriptor, &final_uri) {
        let location = match headers.get("content-location") {
            None => final_uri,
            Some(location) => Url::parse(&final_uri)
                .and_then(|base| base.join(location))
                .map(String::from)
                .unwrap_or_else(|_| location.clone()),
        };
        #[cfg(feature = "tracing")]
        tracing::debug!(uri = %descriptor.uri, %location, "request was redirected");
        headers.insert("content-location".to_owned(), location);
    }

    Ok(Response {
        status,
        headers,
        body,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ContentKind {
    Json,
    Text,
    Binary,
}

fn content_kind(content_type: Option<&str>) -> ContentKind {
    let Some(content_type) = content_type else {
        return ContentKind::Binary;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.split_once('/') {
        Some(("application", subtype)) if subtype == "json" || subtype.ends_with("+json") => {
            ContentKind::Json
        }
        Some(("text", _)) => ContentKind::Text,
        _ => ContentKind::Binary,
    }
}

fn decode_body(
    descriptor: &RequestDescriptor,
    status: u16,
    headers: &mut Headers,
    body: Vec<u8>,
) -> Result<Body> {
    if body.is_empty() {
        return Ok(Body::Empty);
    }

    if descriptor.encoding_provided {
        return Ok(match descriptor.encoding {
            Encoding::Binary => Body::Bytes(body),
            Encoding::Utf8 => Body::Text(String::from_utf8_lossy(&body).into_owned()),
        });
    }

    let kind = content_kind(headers.get("content-type").map(String::as_str));
    if kind == ContentKind::Binary {
        return Ok(Body::Bytes(body));
    }

    headers.remove("content-length");
    let text = String::from_utf8_lossy(&body).into_owned();
    if kind == ContentKind::Text {
        return Ok(Body::Text(text));
    }

    if text.trim().is_empty() {
        return Ok(Body::Empty);
    }
    serde_json::from_str(&text)
        .map(Body::Json)
        .map_err(|source| PreqError::Decode {
            status,
            headers: headers.clone(),
            body: Body::Text(text),
            source,
        })
}

/// The URI that was requested, with the query string attached. Fragments
/// never reach the server and are dropped.
fn requested_url(descriptor: &RequestDescriptor) -> Option<Url> {
    let mut url = Url::parse(&descriptor.uri).ok()?;
    url.set_fragment(None);
    if let Some(query) = descriptor.query.as_ref().filter(|query| !query.is_empty()) {
        url.query_pairs_mut().extend_pairs(query);
    }
    Some(url)
}

fn is_redirected(descriptor: &RequestDescriptor, final_uri: &str) -> bool {
    match (requested_url(descriptor), Url::parse(final_uri)) {
        (Some(requested), Ok(last)) => requested != last,
        _ => without_fragment(&descriptor.uri) != without_fragment(final_uri),
    }
}

fn without_fragment(uri: &str) -> &str {
    uri.split_once('#').map_or(uri, |(head, _)| head)
}
