use http::header::{InvalidHeaderName, InvalidHeaderValue};
use snafu::prelude::*;

use crate::error::BoxedError;

/// A request could not be built from an invocation's arguments.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RequestError {
    /// The number of arguments differs from the number of parameters.
    #[snafu(display("Argument count ({actual}) doesn't match expected count ({expected})"))]
    ArgumentCount {
        /// Arguments supplied.
        actual: usize,
        /// Parameters declared.
        expected: usize,
    },
    /// An argument does not have the declared shape or type.
    #[snafu(display("Argument #{index} must be {expected}"))]
    ArgumentType {
        /// 1-based argument position.
        index: usize,
        /// What the parameter declares.
        expected: &'static str,
    },
    /// A `Path` argument was null.
    #[snafu(display("Path parameter \"{name}\" value must not be null."))]
    NullPath {
        /// The placeholder name.
        name: String,
    },
    /// The `Url` argument was null.
    #[snafu(display("@Url parameter is null."))]
    NullUrl,
    /// The `Body` argument was null.
    #[snafu(display("Body parameter value must not be null."))]
    NullBody,
    /// A required map argument was null.
    #[snafu(display("{kind} was null."))]
    NullMap {
        /// Which map, e.g. `Part map`.
        kind: &'static str,
    },
    /// A map argument contained an entry without a key.
    #[snafu(display("{kind} contained null key."))]
    NullMapKey {
        /// Which map, e.g. `Query map`.
        kind: &'static str,
    },
    /// Every part of a multipart request was null.
    #[snafu(display("Multipart body must have at least one part."))]
    EmptyMultipart,
    /// A path value would escape its segment.
    #[snafu(display("@Path parameters shouldn't perform path traversal ('.' or '..'): {value}"))]
    PathTraversal {
        /// The offending value.
        value: String,
    },
    /// A path value arrived after the URL was resolved for query parameters.
    #[snafu(display("Path parameters must be applied before query parameters."))]
    PathAfterQuery,
    /// The URL could not be resolved against the base URL.
    #[snafu(display("Malformed URL. Base: {base}, Relative: {relative}"))]
    MalformedUrl {
        /// The base URL.
        base: String,
        /// The relative URL.
        relative: String,
    },
    /// A header name is not valid.
    #[snafu(display("Invalid header name: {name}"))]
    HeaderName {
        /// The rejected name.
        name: String,
        /// The underlying error.
        source: InvalidHeaderName,
    },
    /// A header value is not valid.
    #[snafu(display("Invalid value for header {name}"))]
    HeaderValue {
        /// The header name.
        name: String,
        /// The underlying error.
        source: InvalidHeaderValue,
    },
    /// A `Content-Type` value is not a media type.
    #[snafu(display("Malformed content type: {value}"))]
    MalformedContentType {
        /// The rejected value.
        value: String,
        /// The underlying error.
        source: mime::FromStrError,
    },
    /// A converter rejected an argument.
    #[snafu(display("Unable to convert argument #{index} to {target}"))]
    Convert {
        /// 1-based argument position.
        index: usize,
        /// The conversion target.
        target: &'static str,
        /// The converter's error.
        source: BoxedError,
    },
}

impl crate::Error for RequestError {
    fn is_retryable(&self) -> bool {
        false
    }
}
