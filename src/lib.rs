//! `preq` is an async HTTP request helper with built-in retries.
//!
//! A call goes through two stages:
//! - [`normalize`] turns a URI or a loose [`RequestOptions`] set into a
//!   [`RequestDescriptor`] with defaults applied (method, timeout, retry
//!   budget, gzip, body encoding).
//! - The executor sends it through a [`Transport`], decodes the response
//!   by content type and retries transient failures with randomized
//!   exponential backoff.
//!
//! Entry points live on [`Preq`]: [`Preq::request`] and one method per
//! HTTP verb ([`Preq::get`], [`Preq::post`], ...).

mod client;
mod error;
mod executor;
mod method;
mod normalize;
mod options;
mod response;
pub mod transport;

pub use client::Preq;
pub use error::{HttpError, PreqError, EMPTY_RESPONSE, INTERNAL_HTTP_ERROR};
pub use method::Method;
pub use normalize::{normalize, Call, Headers, Payload, RequestDescriptor, Target};
pub use options::{ClientOptions, Encoding, RequestBody, RequestOptions};
pub use response::{Body, Response};
pub use transport::{HttpTransport, Transport};

pub type Result<T> = std::result::Result<T, PreqError>;
