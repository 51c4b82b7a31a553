//! Error types and the [`Error`] trait.
//!
//! Every error surfaced by this library implements [`Error`], which extends
//! [`std::error::Error`] with retry semantics. [`BoxedError`] is the
//! type-erased form used at plugin seams (transports and converters), and
//! [`CompileError`] reports invalid service method declarations.

use std::{convert::Infallible, fmt, string::FromUtf8Error};

use snafu::{AsErrorSource, Snafu};

use crate::descriptor::MethodKey;

/// Errors that may occur in the library.
pub trait Error: std::error::Error + AsErrorSource + Send + Sync + 'static {
    /// If true, this indicates that a failed request may succeed if retried.
    fn is_retryable(&self) -> bool;
}

impl Error for Infallible {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl Error for std::io::Error {
    fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted
        )
    }
}

impl Error for serde_json::Error {
    fn is_retryable(&self) -> bool {
        self.is_io()
    }
}

impl Error for FromUtf8Error {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl Error for mime::FromStrError {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl Error for http::header::InvalidHeaderName {
    fn is_retryable(&self) -> bool {
        false
    }
}

impl Error for http::header::InvalidHeaderValue {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// A boxed error that can be used without type parameters.
#[derive(Debug, Snafu)]
#[snafu(transparent)]
pub struct BoxedError {
    source: Box<dyn Error>,
}

impl BoxedError {
    /// Create a new boxed error from a generic `Error`.
    pub fn from_err<E: Error + 'static>(err: E) -> Self {
        Self {
            source: Box::new(err),
        }
    }

    /// Create a boxed error carrying only a message.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::from_err(MessageError {
            message: message.into(),
        })
    }

    /// Attempts to view the wrapped error as a concrete type.
    #[must_use]
    pub fn downcast_ref<E: Error>(&self) -> Option<&E> {
        let source: &(dyn std::error::Error + 'static) = self.source.as_ref();
        source.downcast_ref::<E>()
    }
}

impl Error for BoxedError {
    fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

/// An error that carries nothing but a message.
#[derive(Debug, Snafu)]
#[snafu(display("{message}"))]
pub struct MessageError {
    message: String,
}

impl Error for MessageError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// A service method declaration could not be compiled.
///
/// The rendered message always names the method that failed, and the
/// (1-based) parameter when the problem is scoped to a single parameter:
///
/// ```text
/// @Path parameter name must match \{([a-zA-Z][a-zA-Z0-9_-]*)\}. Found: 1bad (parameter #1)
///     for method GitHub.contributors
/// ```
#[derive(Debug)]
pub struct CompileError {
    message: String,
    method: MethodKey,
    parameter: Option<usize>,
    cause: Option<BoxedError>,
}

impl CompileError {
    pub(crate) fn method(method: &MethodKey, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            method: method.clone(),
            parameter: None,
            cause: None,
        }
    }

    /// `index` is the 0-based position of the parameter in the declaration.
    pub(crate) fn parameter(method: &MethodKey, index: usize, message: impl Into<String>) -> Self {
        Self {
            parameter: Some(index + 1),
            ..Self::method(method, message)
        }
    }

    pub(crate) fn with_cause(mut self, cause: impl Error) -> Self {
        self.cause = Some(BoxedError::from_err(cause));
        self
    }

    /// The failure message without the method suffix.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The method whose declaration was rejected.
    #[must_use]
    pub fn method_key(&self) -> &MethodKey {
        &self.method
    }

    /// The 1-based index of the offending parameter, if any.
    #[must_use]
    pub fn parameter_index(&self) -> Option<usize> {
        self.parameter
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(index) = self.parameter {
            write!(f, " (parameter #{index})")?;
        }
        write!(f, "\n    for method {}", self.method)
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl Error for CompileError {
    fn is_retryable(&self) -> bool {
        false
    }
}
