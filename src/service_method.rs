use std::{any::Any, sync::Arc};

use bytes::Bytes;
use http::Method;

use crate::{
    Courier,
    adapter::CallAdapter,
    arg::Arg,
    call::{Call, HttpCall},
    converter::ResponseBodyConverter,
    descriptor::MethodDescriptor,
    error::CompileError,
    http::CallFactory,
    request::RequestFactory,
    response::RawResponse,
};

/// A compiled service method: everything needed to turn arguments into an
/// adapted call.
pub(crate) struct ServiceMethod {
    request_factory: Arc<RequestFactory>,
    call_factory: Arc<dyn CallFactory>,
    response_converter: Arc<dyn ResponseBodyConverter>,
    call_adapter: Arc<dyn CallAdapter>,
}

impl ServiceMethod {
    pub(crate) fn parse(
        courier: &Courier,
        descriptor: &MethodDescriptor,
    ) -> Result<Self, CompileError> {
        let key = descriptor.key();
        let request_factory = RequestFactory::parse(courier, descriptor)?;

        let return_type = descriptor.return_type();
        if return_type.is::<()>() {
            return Err(CompileError::method(key, "Service methods cannot return ()."));
        }

        let call_adapter = courier
            .call_adapter(return_type, descriptor.annotations())
            .map_err(|err| {
                CompileError::method(key, format!("Unable to create call adapter for {return_type}"))
                    .with_cause(err)
            })?;

        let response_type = call_adapter.response_type();
        if response_type.is::<RawResponse>() || response_type.is::<http::Response<Bytes>>() {
            return Err(CompileError::method(
                key,
                format!(
                    "'{response_type}' is not a valid response body type. Did you mean ResponseBody?"
                ),
            ));
        }
        if *request_factory.http_method() == Method::HEAD && !response_type.is::<()>() {
            return Err(CompileError::method(
                key,
                "HEAD method must use () as response type.",
            ));
        }

        let response_converter = courier
            .response_body_converter(response_type, descriptor.annotations())
            .map_err(|err| {
                CompileError::method(key, format!("Unable to create converter for {response_type}"))
                    .with_cause(err)
            })?;

        tracing::debug!(
            method = %key,
            http_method = %request_factory.http_method(),
            response_type = %response_type,
            "compiled service method"
        );

        Ok(Self {
            request_factory: Arc::new(request_factory),
            call_factory: Arc::clone(courier.call_factory()),
            response_converter,
            call_adapter,
        })
    }

    /// A fresh call for `arguments`, adapted to the method's return type.
    pub(crate) fn invoke(&self, arguments: Vec<Arg>) -> Box<dyn Any + Send> {
        let call = HttpCall::new(
            Arc::clone(&self.request_factory),
            Arc::clone(&self.call_factory),
            Arc::clone(&self.response_converter),
            Arc::from(arguments),
        );
        self.call_adapter.adapt(Call::erased(Arc::new(call)))
    }
}
