use std::{any::Any, sync::Arc};

use futures::future::BoxFuture;
use snafu::prelude::*;

use super::{ConverterFactory, RequestBodyConverter, ResponseBodyConverter, StringConverter, downcast};
use crate::{
    Courier,
    body::RequestBody,
    error::BoxedError,
    response::{AnyBody, ResponseBody},
    types::{Annotations, DeclaredType, Streaming},
};

/// Converters that are always registered ahead of user factories.
pub(crate) struct BuiltInConverters;

impl ConverterFactory for BuiltInConverters {
    fn response_body_converter(
        &self,
        ty: &DeclaredType,
        annotations: &Annotations,
        _courier: &Courier,
    ) -> Option<Arc<dyn ResponseBodyConverter>> {
        if ty.is::<ResponseBody>() {
            return Some(if annotations.contains::<Streaming>() {
                Arc::new(StreamingBody)
            } else {
                Arc::new(BufferingBody)
            });
        }
        if ty.is::<()>() {
            return Some(Arc::new(DiscardBody));
        }
        None
    }

    fn request_body_converter(
        &self,
        ty: &DeclaredType,
        _parameter_annotations: &Annotations,
        _method_annotations: &Annotations,
        _courier: &Courier,
    ) -> Option<Arc<dyn RequestBodyConverter>> {
        ty.is::<RequestBody>()
            .then(|| Arc::new(PassthroughBody) as Arc<dyn RequestBodyConverter>)
    }

    fn name(&self) -> &'static str {
        "BuiltInConverters"
    }
}

struct BufferingBody;

impl ResponseBodyConverter for BufferingBody {
    fn convert(&self, body: ResponseBody) -> BoxFuture<'static, Result<AnyBody, BoxedError>> {
        Box::pin(async move { Ok(Box::new(body.buffer().await?) as AnyBody) })
    }
}

struct StreamingBody;

impl ResponseBodyConverter for StreamingBody {
    fn convert(&self, body: ResponseBody) -> BoxFuture<'static, Result<AnyBody, BoxedError>> {
        Box::pin(async move { Ok(Box::new(body) as AnyBody) })
    }
}

struct DiscardBody;

impl ResponseBodyConverter for DiscardBody {
    fn convert(&self, body: ResponseBody) -> BoxFuture<'static, Result<AnyBody, BoxedError>> {
        drop(body);
        Box::pin(async { Ok(Box::new(()) as AnyBody) })
    }
}

struct PassthroughBody;

impl RequestBodyConverter for PassthroughBody {
    fn convert(&self, value: &dyn Any) -> Result<RequestBody, BoxedError> {
        downcast::<RequestBody>(value).cloned()
    }
}

/// A value has no string form.
#[derive(Debug, Snafu)]
#[snafu(display(
    "No string converter for {type_name}. Declare the parameter with a displayable type or register a converter."
))]
pub struct NotDisplayableError {
    type_name: &'static str,
}

impl crate::Error for NotDisplayableError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// The string converter used when no factory provides one.
///
/// Renders through the declared type's `Display` implementation.
pub(crate) struct DisplayConverter {
    ty: DeclaredType,
}

impl DisplayConverter {
    pub(crate) fn new(ty: DeclaredType) -> Self {
        Self { ty }
    }

    /// Whether values of `ty` have a string form without a converter factory.
    pub(crate) fn supports(ty: &DeclaredType) -> bool {
        ty.is_displayable() || ty.is::<String>() || ty.is::<&'static str>()
    }
}

impl StringConverter for DisplayConverter {
    fn convert(&self, value: &dyn Any) -> Result<String, BoxedError> {
        if let Some(rendered) = self.ty.render(value) {
            return Ok(rendered);
        }
        if let Some(s) = value.downcast_ref::<String>() {
            return Ok(s.clone());
        }
        if let Some(s) = value.downcast_ref::<&'static str>() {
            return Ok((*s).to_owned());
        }
        Err(BoxedError::from_err(NotDisplayableError {
            type_name: self.ty.name(),
        }))
    }
}
