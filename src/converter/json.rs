use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::{Arc, LazyLock},
};

use bytes::Bytes;
use mime::Mime;
use serde::{Serialize, de::DeserializeOwned};

use super::{
    ConverterFactory, RequestBodyConverter, ResponseBodyConverter, request_body_converter,
    response_body_converter,
};
use crate::{
    Courier,
    body::RequestBody,
    types::{Annotations, DeclaredType},
};

static APPLICATION_JSON_UTF_8: LazyLock<Mime> = LazyLock::new(|| {
    "application/json; charset=utf-8"
        .parse()
        .unwrap_or(mime::APPLICATION_JSON)
});

/// JSON bodies via `serde_json` for the types registered with it.
///
/// ```
/// use courier::converter::JsonConverterFactory;
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Repo {
///     name: String,
/// }
///
/// let json = JsonConverterFactory::new().register::<Repo>().decode::<Vec<Repo>>();
/// ```
#[derive(Clone, Default)]
pub struct JsonConverterFactory {
    decoders: HashMap<TypeId, Arc<dyn ResponseBodyConverter>>,
    encoders: HashMap<TypeId, Arc<dyn RequestBodyConverter>>,
}

impl JsonConverterFactory {
    /// A factory with no registered types.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes response bodies of type `T`.
    #[must_use]
    pub fn decode<T: DeserializeOwned + Send + 'static>(mut self) -> Self {
        self.decoders.insert(
            TypeId::of::<T>(),
            response_body_converter(|bytes: Bytes| serde_json::from_slice::<T>(&bytes)),
        );
        self
    }

    /// Encodes request bodies of type `T`.
    #[must_use]
    pub fn encode<T: Serialize + Any>(mut self) -> Self {
        self.encoders.insert(
            TypeId::of::<T>(),
            request_body_converter(|value: &T| {
                serde_json::to_vec(value)
                    .map(|json| RequestBody::new(Some(APPLICATION_JSON_UTF_8.clone()), json))
            }),
        );
        self
    }

    /// Decodes and encodes `T`.
    #[must_use]
    pub fn register<T: Serialize + DeserializeOwned + Send + 'static>(self) -> Self {
        self.decode::<T>().encode::<T>()
    }
}

impl fmt::Debug for JsonConverterFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonConverterFactory")
            .field("decoders", &self.decoders.len())
            .field("encoders", &self.encoders.len())
            .finish()
    }
}

impl ConverterFactory for JsonConverterFactory {
    fn response_body_converter(
        &self,
        ty: &DeclaredType,
        _annotations: &Annotations,
        _courier: &Courier,
    ) -> Option<Arc<dyn ResponseBodyConverter>> {
        self.decoders.get(&ty.id()).cloned()
    }

    fn request_body_converter(
        &self,
        ty: &DeclaredType,
        _parameter_annotations: &Annotations,
        _method_annotations: &Annotations,
        _courier: &Courier,
    ) -> Option<Arc<dyn RequestBodyConverter>> {
        self.encoders.get(&ty.id()).cloned()
    }

    fn name(&self) -> &'static str {
        "JsonConverterFactory"
    }
}
