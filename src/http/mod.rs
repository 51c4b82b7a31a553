//! The transport seam.
//!
//! Two levels of abstraction are offered. [`CallFactory`] and [`RawCall`]
//! are the full contract the call engine drives: create a call for a
//! request, run it, enqueue it, cancel it. Most transports only need to
//! implement the smaller [`HttpClient`] trait and wrap it in a
//! [`ClientCallFactory`], which supplies cancellation and background
//! execution.

mod client;
#[cfg(feature = "http-client-reqwest-0_13")]
mod reqwest_0_13;

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderMap, Request as HttpRequest, StatusCode};

use crate::{error::BoxedError, request::Request, response::RawResponse};

pub use client::{ClientCallError, ClientCallFactory};

/// Defines the common interface for HTTP requests.
pub trait HttpClient: Send + Sync {
    /// The error type returned by the client for a failed request.
    type Error: crate::Error;

    /// The associated response type returned by this HTTP client.
    type Response: HttpResponse;

    /// Executes an HTTP request and returns an owned response.
    ///
    /// The request body is fully materialized, and its media type has been
    /// copied into the `Content-Type` header.
    fn execute(
        &self,
        request: HttpRequest<Bytes>,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send;
}

/// Defines the common interface for HTTP responses.
pub trait HttpResponse: Send + Sync {
    /// The error type when getting the response body.
    type Error: crate::Error;

    /// Returns the HTTP status code of the response.
    fn status(&self) -> StatusCode;

    /// Returns the response's HTTP headers.
    fn headers(&self) -> HeaderMap;

    /// Consumes the response and asynchronously returns its body.
    fn body(self) -> impl Future<Output = Result<Bytes, Self::Error>> + Send;
}

/// Receives the outcome of [`RawCall::enqueue`].
///
/// The returned future is driven to completion by the transport, which lets
/// the listener convert the response body before delivering it onward.
pub type RawCallback =
    Box<dyn FnOnce(Result<RawResponse, BoxedError>) -> BoxFuture<'static, ()> + Send>;

/// Creates transport calls.
pub trait CallFactory: Send + Sync {
    /// Prepares a call for `request` without starting it.
    fn new_call(&self, request: Request) -> Arc<dyn RawCall>;
}

/// One transport-level exchange.
pub trait RawCall: Send + Sync {
    /// The request this call sends.
    fn request(&self) -> &Request;

    /// Sends the request and waits for the response headers.
    ///
    /// A call can be started only once.
    fn execute(&self) -> BoxFuture<'static, Result<RawResponse, BoxedError>>;

    /// Sends the request in the background and hands the outcome to
    /// `listener` exactly once.
    fn enqueue(&self, listener: RawCallback);

    /// Cancels the call. In-flight exchanges fail with a cancellation error.
    fn cancel(&self);

    /// Whether [`cancel`](Self::cancel) was called.
    fn is_canceled(&self) -> bool;
}
