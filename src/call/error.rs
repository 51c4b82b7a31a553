use std::{fmt, sync::Arc};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use mime::Mime;
use snafu::prelude::*;

use crate::{error::BoxedError, request::RequestError, response::Response};

/// A call failed.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CallError {
    /// The call was executed or enqueued before.
    #[snafu(display("Already executed."))]
    AlreadyExecuted,
    /// The call was canceled.
    #[snafu(display("Canceled"))]
    Canceled,
    /// The request could not be built. Every later attempt reports the same
    /// failure.
    #[snafu(display("Unable to create request"))]
    Request {
        /// The request-building failure.
        source: Arc<RequestError>,
    },
    /// The transport failed to send the request or read the response.
    #[snafu(display("HTTP transport failed"))]
    Transport {
        /// The transport's error.
        source: BoxedError,
    },
    /// The response body converter failed.
    #[snafu(display("Unable to convert response body"))]
    Conversion {
        /// The converter's error.
        source: BoxedError,
    },
    /// The server answered with a non-2xx status.
    #[snafu(display("{source}"))]
    Http {
        /// The unsuccessful response.
        source: HttpError,
    },
    /// A successful response had no body for a non-`()` result.
    #[snafu(display("Response from the server was successful but had no body"))]
    MissingBody,
}

impl crate::Error for CallError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { source } => crate::Error::is_retryable(source),
            Self::Http { source } => {
                source.status.is_server_error() || source.status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// An unsuccessful HTTP response surfaced as an error.
pub struct HttpError {
    status: StatusCode,
    headers: HeaderMap,
    content_type: Option<Mime>,
    body: Bytes,
}

impl HttpError {
    pub(crate) fn from_response<T>(response: &Response<T>) -> Self {
        let error_body = response.error_body();
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            content_type: error_body.and_then(|body| body.content_type().cloned()),
            body: error_body
                .and_then(|body| body.buffered_content().cloned())
                .unwrap_or_default(),
        }
    }

    /// The HTTP status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The media type of the error body.
    #[must_use]
    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    /// The buffered error body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

impl fmt::Debug for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpError")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HTTP {} {}",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or_default()
        )
    }
}

impl std::error::Error for HttpError {}

impl crate::Error for HttpError {
    fn is_retryable(&self) -> bool {
        self.status.is_server_error()
    }
}
