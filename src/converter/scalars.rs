use std::{any::type_name, convert::Infallible, fmt, str::FromStr, sync::Arc};

use bytes::Bytes;
use snafu::prelude::*;

use super::{
    ConverterFactory, RequestBodyConverter, ResponseBodyConverter, request_body_converter,
    response_body_converter,
};
use crate::{
    Courier,
    body::RequestBody,
    types::{Annotations, DeclaredType},
};

/// Converts `String`, `bool`, `char` and the primitive numeric types to and
/// from `text/plain` bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarsConverterFactory;

/// A response body is not a valid scalar of the requested type.
#[derive(Debug, Snafu)]
pub enum ScalarParseError {
    /// The body is not UTF-8.
    #[snafu(display("Response body is not valid UTF-8"))]
    Utf8 {
        /// The decode error.
        source: std::string::FromUtf8Error,
    },
    /// The text does not parse as the target type.
    #[snafu(display("Cannot parse {text:?} as {target}: {message}"))]
    Parse {
        /// The body text.
        text: String,
        /// The target type.
        target: &'static str,
        /// The parser's message.
        message: String,
    },
}

impl crate::Error for ScalarParseError {
    fn is_retryable(&self) -> bool {
        false
    }
}

fn text_body<T: fmt::Display + 'static>() -> Arc<dyn RequestBodyConverter> {
    request_body_converter(|value: &T| Ok::<_, Infallible>(RequestBody::text(value.to_string())))
}

fn parsed<T>() -> Arc<dyn ResponseBodyConverter>
where
    T: FromStr + Send + 'static,
    T::Err: fmt::Display,
{
    response_body_converter(|bytes: Bytes| -> Result<T, ScalarParseError> {
        let text = String::from_utf8(bytes.to_vec()).context(Utf8Snafu)?;
        text.parse::<T>().map_err(|err| ScalarParseError::Parse {
            message: err.to_string(),
            target: type_name::<T>(),
            text,
        })
    })
}

macro_rules! scalar_types {
    ($ty:ident, $make:ident) => {
        scalar_types!(@each $ty, $make, String, bool, char, i8, i16, i32, i64, i128, isize,
            u8, u16, u32, u64, u128, usize, f32, f64)
    };
    (@each $ty:ident, $make:ident, $($t:ty),*) => {
        $(
            if $ty.is::<$t>() {
                return Some($make::<$t>());
            }
        )*
    };
}

impl ConverterFactory for ScalarsConverterFactory {
    fn response_body_converter(
        &self,
        ty: &DeclaredType,
        _annotations: &Annotations,
        _courier: &Courier,
    ) -> Option<Arc<dyn ResponseBodyConverter>> {
        scalar_types!(ty, parsed);
        None
    }

    fn request_body_converter(
        &self,
        ty: &DeclaredType,
        _parameter_annotations: &Annotations,
        _method_annotations: &Annotations,
        _courier: &Courier,
    ) -> Option<Arc<dyn RequestBodyConverter>> {
        scalar_types!(ty, text_body);
        None
    }

    fn name(&self) -> &'static str {
        "ScalarsConverterFactory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        response::ResponseBody,
        test_support::{MockTransport, courier},
    };

    #[tokio::test]
    async fn parses_numbers_and_rejects_garbage() {
        let courier = courier(&MockTransport::new());
        let converter = ScalarsConverterFactory
            .response_body_converter(&DeclaredType::of::<i64>(), &Annotations::new(), &courier)
            .unwrap();

        let value = converter
            .convert(ResponseBody::from_bytes(None, "-12"))
            .await
            .unwrap();
        assert_eq!(value.downcast_ref::<i64>(), Some(&-12));

        let err = converter
            .convert(ResponseBody::from_bytes(None, "twelve"))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Cannot parse \"twelve\" as i64"));
    }

    #[test]
    fn encodes_scalars_as_plain_text() {
        let courier = courier(&MockTransport::new());
        let converter = ScalarsConverterFactory
            .request_body_converter(
                &DeclaredType::of::<bool>(),
                &Annotations::new(),
                &Annotations::new(),
                &courier,
            )
            .unwrap();
        let body = converter.convert(&true).unwrap();
        assert_eq!(body.content().as_ref(), b"true");
        assert_eq!(body.content_type(), Some(&mime::TEXT_PLAIN_UTF_8));
    }

    #[test]
    fn other_types_are_declined() {
        let courier = courier(&MockTransport::new());
        assert!(
            ScalarsConverterFactory
                .response_body_converter(&DeclaredType::of::<Vec<u8>>(), &Annotations::new(), &courier)
                .is_none()
        );
    }
}
