//! Converters between Rust values and HTTP bodies or strings.
//!
//! Converters are produced by [`ConverterFactory`] implementations that the
//! [`Courier`] consults in registration order. A factory that does not handle
//! a type returns `None` and the next factory is asked. Built-in factories
//! are consulted first, so they cannot be overridden:
//!
//! * a [`ResponseBody`] response is handed over unconverted, buffered unless
//!   the method carries the [`Streaming`](crate::types::Streaming)
//!   annotation
//! * a `()` response discards the body
//! * a [`RequestBody`] argument is sent as is

mod builtin;
mod json;
mod scalars;

use std::{any::Any, fmt, sync::Arc};

use bytes::Bytes;
use futures::future::BoxFuture;
use snafu::prelude::*;

use crate::{
    Courier,
    body::RequestBody,
    error::BoxedError,
    response::{AnyBody, ResponseBody},
    types::{Annotations, DeclaredType},
};

pub use builtin::NotDisplayableError;
pub(crate) use builtin::{BuiltInConverters, DisplayConverter};
pub use json::JsonConverterFactory;
pub use scalars::ScalarsConverterFactory;

/// Converts a value to a string for URL, header and form positions.
pub trait StringConverter: Send + Sync {
    /// Converts `value`, which has the type the converter was created for.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has another type or cannot be rendered.
    fn convert(&self, value: &dyn Any) -> Result<String, BoxedError>;
}

impl<F> StringConverter for F
where
    F: Fn(&dyn Any) -> Result<String, BoxedError> + Send + Sync,
{
    fn convert(&self, value: &dyn Any) -> Result<String, BoxedError> {
        self(value)
    }
}

/// Converts a value to a request body.
pub trait RequestBodyConverter: Send + Sync {
    /// Converts `value`, which has the type the converter was created for.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has another type or cannot be encoded.
    fn convert(&self, value: &dyn Any) -> Result<RequestBody, BoxedError>;
}

impl<F> RequestBodyConverter for F
where
    F: Fn(&dyn Any) -> Result<RequestBody, BoxedError> + Send + Sync,
{
    fn convert(&self, value: &dyn Any) -> Result<RequestBody, BoxedError> {
        self(value)
    }
}

/// Converts a response body to a value.
///
/// The returned value must have the type the converter was created for.
pub trait ResponseBodyConverter: Send + Sync {
    /// Consumes `body` and decodes it.
    fn convert(&self, body: ResponseBody) -> BoxFuture<'static, Result<AnyBody, BoxedError>>;
}

impl<F> ResponseBodyConverter for F
where
    F: Fn(ResponseBody) -> BoxFuture<'static, Result<AnyBody, BoxedError>> + Send + Sync,
{
    fn convert(&self, body: ResponseBody) -> BoxFuture<'static, Result<AnyBody, BoxedError>> {
        self(body)
    }
}

/// Produces converters for the types it understands.
///
/// Every method defaults to `None`, meaning "not handled here". A factory
/// may delegate to the factories registered after it with
/// [`Courier::next_response_body_converter`] and
/// [`Courier::next_request_body_converter`].
pub trait ConverterFactory: Send + Sync + 'static {
    /// A converter from a response body to `ty`.
    fn response_body_converter(
        &self,
        ty: &DeclaredType,
        annotations: &Annotations,
        courier: &Courier,
    ) -> Option<Arc<dyn ResponseBodyConverter>> {
        let _ = (ty, annotations, courier);
        None
    }

    /// A converter from `ty` to a request body.
    fn request_body_converter(
        &self,
        ty: &DeclaredType,
        parameter_annotations: &Annotations,
        method_annotations: &Annotations,
        courier: &Courier,
    ) -> Option<Arc<dyn RequestBodyConverter>> {
        let _ = (ty, parameter_annotations, method_annotations, courier);
        None
    }

    /// A converter from `ty` to a string.
    fn string_converter(
        &self,
        ty: &DeclaredType,
        annotations: &Annotations,
        courier: &Courier,
    ) -> Option<Arc<dyn StringConverter>> {
        let _ = (ty, annotations, courier);
        None
    }

    /// The name shown in lookup failures.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A value handed to a converter did not have the expected type.
#[derive(Debug, Snafu)]
#[snafu(display("Expected a value of type {expected}"))]
pub struct ValueTypeError {
    expected: &'static str,
}

impl ValueTypeError {
    pub(crate) fn of<T: Any>() -> Self {
        Self {
            expected: std::any::type_name::<T>(),
        }
    }
}

impl crate::Error for ValueTypeError {
    fn is_retryable(&self) -> bool {
        false
    }
}

fn downcast<T: Any>(value: &dyn Any) -> Result<&T, BoxedError> {
    value
        .downcast_ref::<T>()
        .ok_or_else(|| BoxedError::from_err(ValueTypeError::of::<T>()))
}

/// A [`StringConverter`] for values of type `T`.
pub fn string_converter<T, F>(convert: F) -> Arc<dyn StringConverter>
where
    T: Any,
    F: Fn(&T) -> String + Send + Sync + 'static,
{
    Arc::new(move |value: &dyn Any| -> Result<String, BoxedError> {
        Ok(convert(downcast::<T>(value)?))
    })
}

/// A [`RequestBodyConverter`] for values of type `T`.
pub fn request_body_converter<T, E, F>(convert: F) -> Arc<dyn RequestBodyConverter>
where
    T: Any,
    E: crate::Error,
    F: Fn(&T) -> Result<RequestBody, E> + Send + Sync + 'static,
{
    Arc::new(move |value: &dyn Any| -> Result<RequestBody, BoxedError> {
        convert(downcast::<T>(value)?).map_err(BoxedError::from_err)
    })
}

/// A [`ResponseBodyConverter`] that buffers the body and decodes it into `T`.
pub fn response_body_converter<T, E, F>(convert: F) -> Arc<dyn ResponseBodyConverter>
where
    T: Send + 'static,
    E: crate::Error,
    F: Fn(Bytes) -> Result<T, E> + Send + Sync + 'static,
{
    let convert = Arc::new(convert);
    Arc::new(
        move |body: ResponseBody| -> BoxFuture<'static, Result<AnyBody, BoxedError>> {
            let convert = Arc::clone(&convert);
            Box::pin(async move {
                let bytes = body.bytes().await?;
                convert(bytes)
                    .map(|value| Box::new(value) as AnyBody)
                    .map_err(BoxedError::from_err)
            })
        },
    )
}

/// No registered factory produced a converter.
#[derive(Debug, Snafu)]
#[snafu(display("Could not locate {kind} for {type_name}.\n{}", describe(skipped.as_deref(), tried)))]
pub struct LookupError {
    kind: &'static str,
    type_name: &'static str,
    skipped: Option<Vec<&'static str>>,
    tried: Vec<&'static str>,
}

impl LookupError {
    pub(crate) fn new(
        kind: &'static str,
        type_name: &'static str,
        skipped: Option<Vec<&'static str>>,
        tried: Vec<&'static str>,
    ) -> Self {
        Self {
            kind,
            type_name,
            skipped,
            tried,
        }
    }
}

fn describe(skipped: Option<&[&'static str]>, tried: &[&'static str]) -> String {
    struct Listing<'a>(&'a str, &'a [&'static str]);

    impl fmt::Display for Listing<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "  {}:", self.0)?;
            for name in self.1 {
                write!(f, "\n   * {name}")?;
            }
            Ok(())
        }
    }

    match skipped {
        Some(skipped) => format!("{}\n{}", Listing("Skipped", skipped), Listing("Tried", tried)),
        None => Listing("Tried", tried).to_string(),
    }
}

impl crate::Error for LookupError {
    fn is_retryable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_error_lists_factories() {
        let err = LookupError::new(
            "ResponseBody converter",
            "alloc::string::String",
            Some(vec!["First"]),
            vec!["Second", "Third"],
        );
        assert_eq!(
            err.to_string(),
            "Could not locate ResponseBody converter for alloc::string::String.\n  \
             Skipped:\n   * First\n  Tried:\n   * Second\n   * Third"
        );

        let err = LookupError::new("RequestBody converter", "u8", None, vec!["Only"]);
        assert_eq!(
            err.to_string(),
            "Could not locate RequestBody converter for u8.\n  Tried:\n   * Only"
        );
    }

    #[test]
    fn typed_string_converter_rejects_other_types() {
        let converter = string_converter(|v: &u16| format!("#{v}"));
        assert_eq!(converter.convert(&7_u16).unwrap(), "#7");
        assert!(converter.convert(&"seven").is_err());
    }

    #[tokio::test]
    async fn typed_response_converter_buffers_body() {
        let converter = response_body_converter(|bytes: Bytes| {
            String::from_utf8(bytes.to_vec())
        });
        let value = converter
            .convert(ResponseBody::from_bytes(None, "hi"))
            .await
            .unwrap();
        assert_eq!(value.downcast_ref::<String>().unwrap(), "hi");
    }
}
