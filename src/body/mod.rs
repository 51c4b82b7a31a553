//! Request bodies.
//!
//! [`RequestBody`] is a fully materialized payload with an optional media
//! type. [`FormBody`] and [`MultipartBody`] accumulate fields and parts while
//! a request is being built and then produce a [`RequestBody`].

mod form;
mod multipart;

use bytes::{BufMut, Bytes};
use mime::Mime;

pub use form::FormBody;
pub(crate) use multipart::form_data_disposition;
pub use multipart::{MultipartBody, Part, ReservedPartHeaderError};

/// The payload of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    content_type: Option<Mime>,
    content: Bytes,
}

impl RequestBody {
    /// A body with the given media type.
    pub fn new(content_type: Option<Mime>, content: impl Into<Bytes>) -> Self {
        Self {
            content_type,
            content: content.into(),
        }
    }

    /// A zero-length body without a media type.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(None, Bytes::new())
    }

    /// A `text/plain; charset=utf-8` body.
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(Some(mime::TEXT_PLAIN_UTF_8), content.into())
    }

    /// The media type, if any.
    #[must_use]
    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    /// The number of bytes [`write_to`](Self::write_to) produces.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        self.content.len() as u64
    }

    /// The payload.
    #[must_use]
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Consumes the body and returns the payload.
    #[must_use]
    pub fn into_content(self) -> Bytes {
        self.content
    }

    /// Writes the payload to `sink`.
    pub fn write_to(&self, sink: &mut impl BufMut) {
        sink.put_slice(&self.content);
    }

    /// The same payload with its media type replaced.
    #[must_use]
    pub fn with_content_type(self, content_type: Mime) -> Self {
        Self {
            content_type: Some(content_type),
            ..self
        }
    }
}
