use bytes::{BufMut as _, BytesMut};
use http::{
    HeaderMap, HeaderName, HeaderValue,
    header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
};
use mime::Mime;
use rand::Rng as _;
use snafu::prelude::*;

use super::RequestBody;

const HEX: [u8; 16] = *b"0123456789abcdef";

/// Generates a random multipart boundary of 32 lowercase hex digits.
#[must_use]
fn random_boundary() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);

    let mut s = String::with_capacity(32);
    for b in bytes {
        s.push(char::from(HEX[(b >> 4) as usize]));
        s.push(char::from(HEX[(b & 0x0F) as usize]));
    }
    s
}

/// Quotes a `Content-Disposition` parameter value.
fn quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("%22"),
            c if c.is_ascii_control() => out.push_str(&format!("%{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Builds `form-data; name="<name>"[; filename="<filename>"]`.
pub(crate) fn form_data_disposition(name: &str, filename: Option<&str>) -> HeaderValue {
    let mut value = format!("form-data; name={}", quoted(name));
    if let Some(filename) = filename {
        value.push_str("; filename=");
        value.push_str(&quoted(filename));
    }
    // Quoting leaves no control characters, so the bytes are always valid.
    HeaderValue::from_bytes(value.as_bytes())
        .unwrap_or_else(|_| HeaderValue::from_static("form-data"))
}

/// A part header that the part body itself determines.
#[derive(Debug, Snafu)]
#[snafu(display("Unexpected header: {name}"))]
pub struct ReservedPartHeaderError {
    name: HeaderName,
}

impl crate::Error for ReservedPartHeaderError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// One part of a multipart body.
#[derive(Debug, Clone)]
pub struct Part {
    headers: HeaderMap,
    body: RequestBody,
}

impl Part {
    /// A part with explicit headers.
    ///
    /// # Errors
    ///
    /// `Content-Type` and `Content-Length` are derived from `body` and may
    /// not be supplied.
    pub fn new(headers: HeaderMap, body: RequestBody) -> Result<Self, ReservedPartHeaderError> {
        for reserved in [CONTENT_TYPE, CONTENT_LENGTH] {
            ensure!(
                !headers.contains_key(&reserved),
                ReservedPartHeaderSnafu { name: reserved }
            );
        }
        Ok(Self { headers, body })
    }

    /// A form-data part holding a plain value.
    pub fn form_data(name: &str, value: impl Into<String>) -> Self {
        Self::form_data_with_body(name, None, RequestBody::new(None, value.into()))
    }

    /// A form-data part holding `body`, optionally as a named file.
    #[must_use]
    pub fn form_data_with_body(name: &str, filename: Option<&str>, body: RequestBody) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_DISPOSITION, form_data_disposition(name, filename));
        Self { headers, body }
    }

    /// The part's headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The part's body.
    #[must_use]
    pub fn body(&self) -> &RequestBody {
        &self.body
    }
}

/// Accumulates the parts of a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for MultipartBody {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartBody {
    /// An empty body with a random boundary.
    #[must_use]
    pub fn new() -> Self {
        Self::with_boundary(random_boundary())
    }

    /// An empty body with a fixed boundary.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    /// The boundary separating parts.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Appends a part.
    pub fn add(&mut self, part: Part) {
        self.parts.push(part);
    }

    /// Appends a part built from headers the caller already validated.
    pub(crate) fn add_with_headers(&mut self, headers: HeaderMap, body: RequestBody) {
        self.parts.push(Part { headers, body });
    }

    /// The parts added so far.
    #[must_use]
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// The `multipart/form-data; boundary=...` media type.
    #[must_use]
    pub fn content_type(&self) -> Mime {
        format!("multipart/form-data; boundary={}", self.boundary)
            .parse()
            .unwrap_or(mime::MULTIPART_FORM_DATA)
    }

    /// Produces the encoded body.
    #[must_use]
    pub fn build(self) -> RequestBody {
        let content_type = self.content_type();
        let mut buf = BytesMut::new();
        for part in &self.parts {
            buf.put_slice(b"--");
            buf.put_slice(self.boundary.as_bytes());
            buf.put_slice(b"\r\n");
            for (name, value) in &part.headers {
                buf.put_slice(name.as_str().as_bytes());
                buf.put_slice(b": ");
                buf.put_slice(value.as_bytes());
                buf.put_slice(b"\r\n");
            }
            if let Some(content_type) = part.body.content_type() {
                buf.put_slice(b"Content-Type: ");
                buf.put_slice(content_type.as_ref().as_bytes());
                buf.put_slice(b"\r\n");
            }
            buf.put_slice(format!("Content-Length: {}\r\n\r\n", part.body.content_length()).as_bytes());
            part.body.write_to(&mut buf);
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"--");
        buf.put_slice(self.boundary.as_bytes());
        buf.put_slice(b"--\r\n");
        RequestBody::new(Some(content_type), buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_parts_between_boundaries() {
        let mut body = MultipartBody::with_boundary("XyZ");
        body.add(Part::form_data("ping", "pong"));
        body.add(Part::form_data_with_body(
            "kit",
            Some("kat.txt"),
            RequestBody::text("kat"),
        ));
        let body = body.build();

        assert_eq!(
            body.content_type().map(ToString::to_string).as_deref(),
            Some("multipart/form-data; boundary=XyZ")
        );
        assert_eq!(
            String::from_utf8_lossy(body.content()),
            "--XyZ\r\n\
             content-disposition: form-data; name=\"ping\"\r\n\
             Content-Length: 4\r\n\
             \r\n\
             pong\r\n\
             --XyZ\r\n\
             content-disposition: form-data; name=\"kit\"; filename=\"kat.txt\"\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             Content-Length: 3\r\n\
             \r\n\
             kat\r\n\
             --XyZ--\r\n"
        );
    }

    #[test]
    fn random_boundaries_differ() {
        let a = MultipartBody::new();
        let b = MultipartBody::new();
        assert_eq!(a.boundary().len(), 32);
        assert_ne!(a.boundary(), b.boundary());
    }

    #[test]
    fn part_rejects_reserved_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let err = Part::new(headers, RequestBody::empty()).unwrap_err();
        assert_eq!(err.to_string(), "Unexpected header: content-type");
    }

    #[test]
    fn disposition_escapes_quotes_and_line_breaks() {
        let value = form_data_disposition("a\"b\nc", None);
        assert_eq!(value.to_str().unwrap(), "form-data; name=\"a%22b%0Ac\"");
    }
}
