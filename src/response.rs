//! HTTP responses as seen by service callers and converters.

use std::{
    any::{Any, type_name},
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::{Bytes, BytesMut};
use futures::{
    StreamExt as _, TryStreamExt as _,
    stream::{self, BoxStream},
};
use http::{HeaderMap, StatusCode, header::CONTENT_TYPE};
use mime::Mime;
use snafu::prelude::*;

use crate::error::BoxedError;

/// A type-erased converted body.
pub type AnyBody = Box<dyn Any + Send>;

/// The response as delivered by the transport, before conversion.
pub type RawResponse = http::Response<ResponseBody>;

enum Source {
    Buffered(Bytes),
    Stream(BoxStream<'static, Result<Bytes, BoxedError>>),
    Stripped,
}

/// The body of an HTTP response.
///
/// A body is read at most once. Bodies attached to a [`Response`] after
/// conversion have been stripped of their content and only report their
/// media type and length.
pub struct ResponseBody {
    content_type: Option<Mime>,
    content_length: Option<u64>,
    source: Source,
}

/// Reading a body failed.
#[derive(Debug, Snafu)]
pub enum ResponseBodyError {
    /// The content was already handed to a converter.
    #[snafu(display("Cannot read raw response body of a converted body."))]
    Stripped,
    /// The body is not valid UTF-8.
    #[snafu(display("Response body is not valid UTF-8"))]
    Utf8 {
        /// The underlying decode error.
        source: std::string::FromUtf8Error,
    },
    /// The transport failed mid-read while a converter consumed the body.
    #[snafu(display("Response body read was interrupted"))]
    Interrupted {
        /// The transport failure, shared with the call that issued the read.
        source: SharedReadError,
    },
}

impl crate::Error for ResponseBodyError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Interrupted { source } => source.is_retryable(),
            Self::Stripped | Self::Utf8 { .. } => false,
        }
    }
}

/// A transport failure seen by more than one owner.
///
/// Displays as, and retries like, the wrapped error.
#[derive(Debug, Clone, Snafu)]
#[snafu(transparent)]
pub struct SharedReadError {
    source: Arc<BoxedError>,
}

impl crate::Error for SharedReadError {
    fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

impl ResponseBody {
    /// A fully buffered body.
    pub fn from_bytes(content_type: Option<Mime>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            content_type,
            content_length: Some(content.len() as u64),
            source: Source::Buffered(content),
        }
    }

    /// A body read incrementally from `stream`.
    pub fn from_stream(
        content_type: Option<Mime>,
        content_length: Option<u64>,
        stream: BoxStream<'static, Result<Bytes, BoxedError>>,
    ) -> Self {
        Self {
            content_type,
            content_length,
            source: Source::Stream(stream),
        }
    }

    /// A body read from `headers`' media type and a single pending read.
    pub(crate) fn from_future<F>(headers: &HeaderMap, read: F) -> Self
    where
        F: Future<Output = Result<Bytes, BoxedError>> + Send + 'static,
    {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let content_length = headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        Self::from_stream(content_type, content_length, stream::once(read).boxed())
    }

    /// The media type, if known.
    #[must_use]
    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    /// The length in bytes, if known.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Whether the content is held in memory.
    #[must_use]
    pub fn is_buffered(&self) -> bool {
        matches!(self.source, Source::Buffered(_))
    }

    /// Reads the whole body.
    ///
    /// # Errors
    ///
    /// Fails when the transport fails mid-read, or when this body was
    /// stripped after conversion.
    pub async fn bytes(self) -> Result<Bytes, BoxedError> {
        match self.source {
            Source::Buffered(content) => Ok(content),
            Source::Stream(stream) => {
                let chunks: Vec<Bytes> = stream.try_collect().await?;
                let mut content = BytesMut::new();
                for chunk in chunks {
                    content.extend_from_slice(&chunk);
                }
                Ok(content.freeze())
            }
            Source::Stripped => Err(BoxedError::from_err(ResponseBodyError::Stripped)),
        }
    }

    /// Reads the whole body as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Fails like [`bytes`](Self::bytes), or when the content is not UTF-8.
    pub async fn text(self) -> Result<String, BoxedError> {
        let content = self.bytes().await?;
        String::from_utf8(content.to_vec())
            .context(Utf8Snafu)
            .map_err(BoxedError::from_err)
    }

    /// The body as a stream of chunks.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes, BoxedError>> {
        match self.source {
            Source::Buffered(content) => stream::once(async move { Ok(content) }).boxed(),
            Source::Stream(stream) => stream,
            Source::Stripped => {
                stream::once(async { Err(BoxedError::from_err(ResponseBodyError::Stripped)) })
                    .boxed()
            }
        }
    }

    /// Reads the content into memory.
    pub(crate) async fn buffer(self) -> Result<Self, BoxedError> {
        let content_type = self.content_type.clone();
        let content = self.bytes().await?;
        Ok(Self::from_bytes(content_type, content))
    }

    /// The content, if it is held in memory.
    pub(crate) fn buffered_content(&self) -> Option<&Bytes> {
        match &self.source {
            Source::Buffered(content) => Some(content),
            _ => None,
        }
    }

    /// A contentless copy that keeps the media type and length.
    pub(crate) fn stripped(&self) -> Self {
        Self {
            content_type: self.content_type.clone(),
            content_length: self.content_length,
            source: Source::Stripped,
        }
    }

    /// Wraps the body so a transport failure during reading is recorded in
    /// the returned slot instead of only reaching the reader.
    pub(crate) fn catching(self) -> (Self, CaughtReadError) {
        let caught = CaughtReadError::default();
        let source = match self.source {
            Source::Stream(stream) => {
                let slot = caught.clone();
                Source::Stream(
                    stream
                        .map_err(move |err| {
                            let shared = SharedReadError {
                                source: Arc::new(err),
                            };
                            slot.set(shared.clone());
                            BoxedError::from_err(ResponseBodyError::Interrupted { source: shared })
                        })
                        .boxed(),
                )
            }
            other => other,
        };
        (
            Self {
                content_type: self.content_type,
                content_length: self.content_length,
                source,
            },
            caught,
        )
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source {
            Source::Buffered(_) => "buffered",
            Source::Stream(_) => "stream",
            Source::Stripped => "stripped",
        };
        f.debug_struct("ResponseBody")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("source", &source)
            .finish()
    }
}

/// The transport error recorded by [`ResponseBody::catching`].
#[derive(Clone, Default)]
pub(crate) struct CaughtReadError(Arc<Mutex<Option<SharedReadError>>>);

impl CaughtReadError {
    fn set(&self, err: SharedReadError) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert(err);
    }

    pub(crate) fn take(&self) -> Option<BoxedError> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(BoxedError::from_err)
    }
}

/// A [`Response`] could not be constructed from the given status.
#[derive(Debug, Snafu)]
#[snafu(display("{status} is not a valid status for this response"))]
pub struct ResponseStatusError {
    status: StatusCode,
}

impl crate::Error for ResponseStatusError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// The outcome of an HTTP call.
///
/// Successful (2xx) responses carry the converted body, or none for 204 and
/// 205. Unsuccessful responses carry the raw, fully buffered
/// [`error_body`](Self::error_body) instead.
pub struct Response<T> {
    raw: RawResponse,
    body: Option<T>,
    error_body: Option<ResponseBody>,
}

impl<T> Response<T> {
    /// A synthetic `200 OK` response.
    pub fn success(body: T) -> Self {
        Self {
            raw: http::Response::new(ResponseBody::from_bytes(None, Bytes::new()).stripped()),
            body: Some(body),
            error_body: None,
        }
    }

    /// A synthetic unsuccessful response.
    ///
    /// # Errors
    ///
    /// `status` must be 400 or above.
    pub fn error(status: StatusCode, body: ResponseBody) -> Result<Self, ResponseStatusError> {
        ensure!(status.as_u16() >= 400, ResponseStatusSnafu { status });
        let mut raw = http::Response::new(body.stripped());
        *raw.status_mut() = status;
        Ok(Self {
            raw,
            body: None,
            error_body: Some(body),
        })
    }

    pub(crate) fn from_success(raw: RawResponse, body: Option<T>) -> Self {
        Self {
            raw,
            body,
            error_body: None,
        }
    }

    pub(crate) fn from_error(raw: RawResponse, error_body: ResponseBody) -> Self {
        Self {
            raw,
            body: None,
            error_body: Some(error_body),
        }
    }

    /// The underlying response, with a stripped body.
    #[must_use]
    pub fn raw(&self) -> &RawResponse {
        &self.raw
    }

    /// The HTTP status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.raw.status()
    }

    /// The status reason phrase, when the status has a canonical one.
    #[must_use]
    pub fn message(&self) -> &'static str {
        self.raw.status().canonical_reason().unwrap_or_default()
    }

    /// The response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.raw.headers()
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.raw.status().is_success()
    }

    /// The converted body of a successful response.
    #[must_use]
    pub fn body(&self) -> Option<&T> {
        self.body.as_ref()
    }

    /// Takes the converted body of a successful response.
    #[must_use]
    pub fn into_body(self) -> Option<T> {
        self.body
    }

    /// The raw body of an unsuccessful response.
    #[must_use]
    pub fn error_body(&self) -> Option<&ResponseBody> {
        self.error_body.as_ref()
    }

    /// Takes the raw body of an unsuccessful response.
    pub fn take_error_body(&mut self) -> Option<ResponseBody> {
        self.error_body.take()
    }

    /// Replaces the body with the result of `f`.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            raw: self.raw,
            body: self.body.map(f),
            error_body: self.error_body,
        }
    }

    /// Replaces the body with the result of a fallible conversion.
    pub(crate) fn try_map_body<U, E>(
        self,
        f: impl FnOnce(Option<T>) -> Result<Option<U>, E>,
    ) -> Result<Response<U>, E> {
        Ok(Response {
            raw: self.raw,
            body: f(self.body)?,
            error_body: self.error_body,
        })
    }

    /// Splits into the body and a bodiless response.
    pub(crate) fn split_body(self) -> (Option<T>, Response<()>) {
        (
            self.body,
            Response {
                raw: self.raw,
                body: None,
                error_body: self.error_body,
            },
        )
    }
}

/// The converted body has a different type than the caller asked for.
#[derive(Debug, Snafu)]
#[snafu(display("Converted response body is not a {expected}"))]
pub struct BodyTypeError {
    expected: &'static str,
}

impl BodyTypeError {
    pub(crate) fn of<T>() -> Self {
        Self {
            expected: type_name::<T>(),
        }
    }
}

impl crate::Error for BodyTypeError {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl<T: fmt::Debug> fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.raw.status())
            .field("headers", self.raw.headers())
            .field("body", &self.body)
            .field("error_body", &self.error_body)
            .finish()
    }
}
