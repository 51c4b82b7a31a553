//! The [`Courier`]: configuration, converter and adapter registries, and the
//! per-method compilation cache.

use std::{
    collections::HashMap,
    ptr,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use bon::bon;

use crate::{
    adapter::{CallAdapter, CallAdapterFactory, DefaultCallAdapterFactory, FutureCallAdapterFactory, ReturnType},
    arg::Arg,
    base_url::{BaseUrl, BaseUrlError, IntoBaseUrl},
    call::Executor,
    converter::{
        BuiltInConverters, ConverterFactory, DisplayConverter, LookupError, RequestBodyConverter,
        ResponseBodyConverter, StringConverter,
    },
    descriptor::{MethodDescriptor, MethodKey},
    error::CompileError,
    http::CallFactory,
    service_method::ServiceMethod,
    types::{Annotations, DeclaredType},
};

/// A hand-written service client backed by a [`Courier`].
///
/// Implementations hold on to the courier and forward each method to
/// [`Courier::invoke`] with the method's descriptor:
///
/// ```
/// use std::sync::{Arc, LazyLock};
///
/// use courier::{
///     Courier, CompileError, Service,
///     arg::Arg,
///     call::Call,
///     converter::{ConverterFactory, ScalarsConverterFactory},
///     descriptor::{MethodDescriptor, Param},
///     http::{CallFactory, ClientCallFactory, HttpClient},
/// };
///
/// static CONTRIBUTORS: LazyLock<MethodDescriptor> = LazyLock::new(|| {
///     MethodDescriptor::builder("GitHub", "contributors")
///         .get("repos/{owner}/{repo}/contributors")
///         .param(Param::scalar::<String>().path("owner"))
///         .param(Param::scalar::<String>().path("repo"))
///         .returns::<Call<String>>()
///         .build()
/// });
///
/// struct GitHub {
///     courier: Courier,
/// }
///
/// impl Service for GitHub {
///     fn methods() -> Vec<&'static MethodDescriptor> {
///         vec![&*CONTRIBUTORS]
///     }
///
///     fn from_courier(courier: Courier) -> Self {
///         Self { courier }
///     }
/// }
///
/// impl GitHub {
///     fn contributors(&self, owner: &str, repo: &str) -> Result<Call<String>, CompileError> {
///         self.courier.invoke(
///             &CONTRIBUTORS,
///             vec![Arg::value(owner.to_owned()), Arg::value(repo.to_owned())],
///         )
///     }
/// }
///
/// fn github<C>(client: C) -> Result<GitHub, Box<dyn std::error::Error>>
/// where
///     C: HttpClient + 'static,
///     C::Response: 'static,
/// {
///     let courier = Courier::builder()
///         .base_url("https://api.github.com/")
///         .call_factory(Arc::new(ClientCallFactory::new(client)) as Arc<dyn CallFactory>)
///         .converter_factories(vec![Arc::new(ScalarsConverterFactory) as Arc<dyn ConverterFactory>])
///         .validate_eagerly(true)
///         .build()?;
///     Ok(courier.create::<GitHub>()?)
/// }
/// ```
pub trait Service: Sized {
    /// Every method of the service.
    fn methods() -> Vec<&'static MethodDescriptor>;

    /// Wraps a courier.
    fn from_courier(courier: Courier) -> Self;
}

struct Inner {
    base_url: BaseUrl,
    call_factory: Arc<dyn CallFactory>,
    converter_factories: Vec<Arc<dyn ConverterFactory>>,
    call_adapter_factories: Vec<Arc<dyn CallAdapterFactory>>,
    callback_executor: Option<Arc<dyn Executor>>,
    validate_eagerly: bool,
    service_methods: RwLock<HashMap<MethodKey, Arc<ServiceMethod>>>,
    compiling: Mutex<()>,
}

/// Turns method descriptors into calls.
///
/// A courier is cheap to clone; clones share configuration and the cache of
/// compiled methods. Each method is compiled at most once, on first use or
/// when its service is created with `validate_eagerly`.
#[derive(Clone)]
pub struct Courier {
    inner: Arc<Inner>,
}

#[bon]
impl Courier {
    /// Configures a courier.
    ///
    /// Built-in converters are consulted before `converter_factories`. The
    /// future adapter and the default [`Call`](crate::call::Call) adapter
    /// are consulted after `call_adapter_factories`.
    ///
    /// # Errors
    ///
    /// Fails when `base_url` is not an absolute URL ending in `/`.
    #[builder]
    pub fn new<U: IntoBaseUrl>(
        base_url: U,
        call_factory: Arc<dyn CallFactory>,
        #[builder(default)] converter_factories: Vec<Arc<dyn ConverterFactory>>,
        #[builder(default)] call_adapter_factories: Vec<Arc<dyn CallAdapterFactory>>,
        callback_executor: Option<Arc<dyn Executor>>,
        #[builder(default)] validate_eagerly: bool,
    ) -> Result<Self, BaseUrlError> {
        let base_url = base_url.into_base_url()?;

        let mut converters: Vec<Arc<dyn ConverterFactory>> = vec![Arc::new(BuiltInConverters)];
        converters.extend(converter_factories);

        let mut adapters = call_adapter_factories;
        adapters.push(Arc::new(FutureCallAdapterFactory));
        adapters.push(Arc::new(DefaultCallAdapterFactory::new(
            callback_executor.clone(),
        )));

        Ok(Self {
            inner: Arc::new(Inner {
                base_url,
                call_factory,
                converter_factories: converters,
                call_adapter_factories: adapters,
                callback_executor,
                validate_eagerly,
                service_methods: RwLock::default(),
                compiling: Mutex::default(),
            }),
        })
    }
}

impl Courier {
    /// The URL relative method paths resolve against.
    #[must_use]
    pub fn base_url(&self) -> &BaseUrl {
        &self.inner.base_url
    }

    /// The transport.
    #[must_use]
    pub fn call_factory(&self) -> &Arc<dyn CallFactory> {
        &self.inner.call_factory
    }

    /// The converter factories in lookup order, built-ins included.
    #[must_use]
    pub fn converter_factories(&self) -> &[Arc<dyn ConverterFactory>] {
        &self.inner.converter_factories
    }

    /// The call adapter factories in lookup order, defaults included.
    #[must_use]
    pub fn call_adapter_factories(&self) -> &[Arc<dyn CallAdapterFactory>] {
        &self.inner.call_adapter_factories
    }

    /// The executor enqueued callbacks are delivered on, if any.
    #[must_use]
    pub fn callback_executor(&self) -> Option<&Arc<dyn Executor>> {
        self.inner.callback_executor.as_ref()
    }

    /// Whether services are compiled in full when they are created.
    #[must_use]
    pub fn validates_eagerly(&self) -> bool {
        self.inner.validate_eagerly
    }

    /// Creates a service client.
    ///
    /// # Errors
    ///
    /// With `validate_eagerly`, fails with the first method that does not
    /// compile.
    pub fn create<S: Service>(&self) -> Result<S, CompileError> {
        if self.inner.validate_eagerly {
            for method in S::methods() {
                self.service_method(method)?;
            }
        }
        Ok(S::from_courier(self.clone()))
    }

    /// Invokes a service method, compiling it first if needed.
    ///
    /// Arguments are checked when the request is built, so a wrong argument
    /// count or type surfaces from the returned call, not from here.
    ///
    /// # Errors
    ///
    /// Fails when the method does not compile or `R` is not the declared
    /// return type.
    pub fn invoke<R: ReturnType>(
        &self,
        method: &MethodDescriptor,
        arguments: Vec<Arg>,
    ) -> Result<R, CompileError> {
        let requested = R::declared_type();
        if requested.id() != method.return_type().id() {
            return Err(CompileError::method(
                method.key(),
                format!(
                    "Method returns {} but was invoked for {requested}.",
                    method.return_type()
                ),
            ));
        }

        let service_method = self.service_method(method)?;
        R::from_adapted(service_method.invoke(arguments)).map_err(|_| {
            CompileError::method(
                method.key(),
                format!("Call adapter did not produce a {requested}."),
            )
        })
    }

    /// The compiled form of `method`, from the cache when possible.
    pub(crate) fn service_method(
        &self,
        method: &MethodDescriptor,
    ) -> Result<Arc<ServiceMethod>, CompileError> {
        if let Some(compiled) = self.cached(method.key()) {
            return Ok(compiled);
        }

        let _compiling = self
            .inner
            .compiling
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(compiled) = self.cached(method.key()) {
            return Ok(compiled);
        }
        let compiled = Arc::new(ServiceMethod::parse(self, method)?);
        self.inner
            .service_methods
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.key().clone(), Arc::clone(&compiled));
        Ok(compiled)
    }

    fn cached(&self, key: &MethodKey) -> Option<Arc<ServiceMethod>> {
        self.inner
            .service_methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// The string converter for `ty`.
    ///
    /// When no factory offers one, values are rendered through the type's
    /// [`Display`](std::fmt::Display) implementation, captured by
    /// [`DeclaredType::displayable`]. Returns `None` when `ty` has neither.
    #[must_use]
    pub fn string_converter(
        &self,
        ty: &DeclaredType,
        annotations: &Annotations,
    ) -> Option<Arc<dyn StringConverter>> {
        self.inner
            .converter_factories
            .iter()
            .find_map(|factory| factory.string_converter(ty, annotations, self))
            .or_else(|| {
                DisplayConverter::supports(ty)
                    .then(|| Arc::new(DisplayConverter::new(ty.clone())) as Arc<dyn StringConverter>)
            })
    }

    /// The request body converter for `ty`.
    ///
    /// # Errors
    ///
    /// Fails when no factory handles `ty`, listing the factories tried.
    pub fn request_body_converter(
        &self,
        ty: &DeclaredType,
        parameter_annotations: &Annotations,
        method_annotations: &Annotations,
    ) -> Result<Arc<dyn RequestBodyConverter>, LookupError> {
        self.next_request_body_converter(None, ty, parameter_annotations, method_annotations)
    }

    /// The request body converter for `ty` from the factories after
    /// `skip_past`.
    ///
    /// # Errors
    ///
    /// Fails when no later factory handles `ty`.
    pub fn next_request_body_converter(
        &self,
        skip_past: Option<&dyn ConverterFactory>,
        ty: &DeclaredType,
        parameter_annotations: &Annotations,
        method_annotations: &Annotations,
    ) -> Result<Arc<dyn RequestBodyConverter>, LookupError> {
        let factories = &self.inner.converter_factories;
        let start = skip_past.map_or(0, |skip| start_after(factories, skip));
        factories[start..]
            .iter()
            .find_map(|factory| {
                factory.request_body_converter(ty, parameter_annotations, method_annotations, self)
            })
            .ok_or_else(|| {
                lookup_error("RequestBody converter", ty, skip_past, factories, start, |f| f.name())
            })
    }

    /// The response body converter for `ty`.
    ///
    /// # Errors
    ///
    /// Fails when no factory handles `ty`, listing the factories tried.
    pub fn response_body_converter(
        &self,
        ty: &DeclaredType,
        annotations: &Annotations,
    ) -> Result<Arc<dyn ResponseBodyConverter>, LookupError> {
        self.next_response_body_converter(None, ty, annotations)
    }

    /// The response body converter for `ty` from the factories after
    /// `skip_past`.
    ///
    /// # Errors
    ///
    /// Fails when no later factory handles `ty`.
    pub fn next_response_body_converter(
        &self,
        skip_past: Option<&dyn ConverterFactory>,
        ty: &DeclaredType,
        annotations: &Annotations,
    ) -> Result<Arc<dyn ResponseBodyConverter>, LookupError> {
        let factories = &self.inner.converter_factories;
        let start = skip_past.map_or(0, |skip| start_after(factories, skip));
        factories[start..]
            .iter()
            .find_map(|factory| factory.response_body_converter(ty, annotations, self))
            .ok_or_else(|| {
                lookup_error("ResponseBody converter", ty, skip_past, factories, start, |f| f.name())
            })
    }

    /// The call adapter for `return_type`.
    ///
    /// # Errors
    ///
    /// Fails when no factory handles `return_type`, listing the factories
    /// tried.
    pub fn call_adapter(
        &self,
        return_type: &DeclaredType,
        annotations: &Annotations,
    ) -> Result<Arc<dyn CallAdapter>, LookupError> {
        self.next_call_adapter(None, return_type, annotations)
    }

    /// The call adapter for `return_type` from the factories after
    /// `skip_past`.
    ///
    /// # Errors
    ///
    /// Fails when no later factory handles `return_type`.
    pub fn next_call_adapter(
        &self,
        skip_past: Option<&dyn CallAdapterFactory>,
        return_type: &DeclaredType,
        annotations: &Annotations,
    ) -> Result<Arc<dyn CallAdapter>, LookupError> {
        let factories = &self.inner.call_adapter_factories;
        let start = skip_past.map_or(0, |skip| start_after(factories, skip));
        factories[start..]
            .iter()
            .find_map(|factory| factory.get(return_type, annotations, self))
            .ok_or_else(|| {
                lookup_error("call adapter", return_type, skip_past, factories, start, |f| f.name())
            })
    }
}

/// The index after `skip` in `factories`, or 0 if it is not registered.
fn start_after<F: ?Sized>(factories: &[Arc<F>], skip: &F) -> usize {
    factories
        .iter()
        .position(|factory| ptr::addr_eq(Arc::as_ptr(factory), ptr::from_ref(skip)))
        .map_or(0, |index| index + 1)
}

fn lookup_error<F: ?Sized, S: ?Sized>(
    kind: &'static str,
    ty: &DeclaredType,
    skip_past: Option<&S>,
    factories: &[Arc<F>],
    start: usize,
    name: impl Fn(&F) -> &'static str,
) -> LookupError {
    let names = |factories: &[Arc<F>]| factories.iter().map(|f| name(&**f)).collect::<Vec<_>>();
    LookupError::new(
        kind,
        ty.name(),
        skip_past.map(|_| names(&factories[..start])),
        names(&factories[start..]),
    )
}

impl std::fmt::Debug for Courier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let converters: Vec<_> = self.converter_factories().iter().map(|f| f.name()).collect();
        let adapters: Vec<_> = self.call_adapter_factories().iter().map(|f| f.name()).collect();
        f.debug_struct("Courier")
            .field("base_url", &self.inner.base_url)
            .field("converter_factories", &converters)
            .field("call_adapter_factories", &adapters)
            .field("validate_eagerly", &self.inner.validate_eagerly)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        convert::Infallible,
        sync::{
            LazyLock,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use bytes::Bytes;

    use super::*;
    use crate::{
        adapter::CallFuture,
        call::Call,
        converter::response_body_converter,
        descriptor::Param,
        response::{RawResponse, ResponseBody},
        test_support::{MockResponse, MockTransport, courier},
    };

    /// Converts every `String` response to a fixed value.
    struct Fixed(&'static str);

    impl ConverterFactory for Fixed {
        fn response_body_converter(
            &self,
            ty: &DeclaredType,
            _annotations: &Annotations,
            _courier: &Courier,
        ) -> Option<Arc<dyn ResponseBodyConverter>> {
            let value = self.0;
            ty.is::<String>().then(|| {
                response_body_converter(move |_: Bytes| Ok::<_, Infallible>(value.to_owned()))
            })
        }

        fn name(&self) -> &'static str {
            self.0
        }
    }

    fn with_converters(factories: Vec<Arc<dyn ConverterFactory>>) -> Courier {
        Courier::builder()
            .base_url("http://example.com/")
            .call_factory(MockTransport::new() as Arc<dyn CallFactory>)
            .converter_factories(factories)
            .build()
            .unwrap()
    }

    async fn convert(converter: &Arc<dyn ResponseBodyConverter>) -> String {
        let value = converter
            .convert(ResponseBody::from_bytes(None, "ignored"))
            .await
            .unwrap();
        *value.downcast::<String>().unwrap()
    }

    #[test]
    fn base_url_must_end_in_slash() {
        let err = Courier::builder()
            .base_url("http://example.com/api")
            .call_factory(MockTransport::new() as Arc<dyn CallFactory>)
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "baseUrl must end in /: http://example.com/api");
    }

    #[test]
    fn defaults_wrap_user_factories() {
        let courier = with_converters(vec![Arc::new(Fixed("first"))]);
        let converters: Vec<_> = courier.converter_factories().iter().map(|f| f.name()).collect();
        assert_eq!(converters, ["BuiltInConverters", "first"]);
        let adapters: Vec<_> = courier.call_adapter_factories().iter().map(|f| f.name()).collect();
        assert_eq!(adapters, ["FutureCallAdapterFactory", "DefaultCallAdapterFactory"]);
    }

    #[tokio::test]
    async fn lookups_can_skip_past_a_factory() {
        let first: Arc<dyn ConverterFactory> = Arc::new(Fixed("first"));
        let second: Arc<dyn ConverterFactory> = Arc::new(Fixed("second"));
        let courier = with_converters(vec![Arc::clone(&first), Arc::clone(&second)]);
        let ty = DeclaredType::of::<String>();
        let annotations = Annotations::new();

        let converter = courier.response_body_converter(&ty, &annotations).unwrap();
        assert_eq!(convert(&converter).await, "first");

        let converter = courier
            .next_response_body_converter(Some(first.as_ref()), &ty, &annotations)
            .unwrap();
        assert_eq!(convert(&converter).await, "second");

        let err = courier
            .next_response_body_converter(Some(second.as_ref()), &ty, &annotations)
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "Could not locate ResponseBody converter for alloc::string::String.\n  \
             Skipped:\n   * BuiltInConverters\n   * first\n   * second\n  Tried:"
        );
    }

    #[test]
    fn missing_converters_list_the_factories_tried() {
        let courier = with_converters(vec![Arc::new(Fixed("first"))]);
        let err = courier
            .request_body_converter(&DeclaredType::of::<u8>(), &Annotations::new(), &Annotations::new())
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "Could not locate RequestBody converter for u8.\n  Tried:\n   * BuiltInConverters\n   * first"
        );
    }

    #[test]
    fn string_conversion_falls_back_to_display() {
        let courier = with_converters(Vec::new());
        let converter = courier
            .string_converter(&DeclaredType::displayable::<u32>(), &Annotations::new())
            .unwrap();
        assert_eq!(converter.convert(&42_u32).unwrap(), "42");
        assert!(courier.string_converter(&DeclaredType::of::<Vec<u8>>(), &Annotations::new()).is_none());
    }

    #[test]
    fn user_adapters_come_first() {
        struct Everything;

        impl CallAdapterFactory for Everything {
            fn get(
                &self,
                return_type: &DeclaredType,
                annotations: &Annotations,
                courier: &Courier,
            ) -> Option<Arc<dyn CallAdapter>> {
                courier.next_call_adapter(Some(self), return_type, annotations).ok()
            }
        }

        let courier = Courier::builder()
            .base_url("http://example.com/")
            .call_factory(MockTransport::new() as Arc<dyn CallFactory>)
            .call_adapter_factories(vec![Arc::new(Everything) as Arc<dyn CallAdapterFactory>])
            .build()
            .unwrap();
        let adapter = courier
            .call_adapter(&<CallFuture<u8> as ReturnType>::declared_type(), &Annotations::new())
            .unwrap();
        assert!(adapter.response_type().is::<u8>());

        let err = courier
            .call_adapter(&DeclaredType::of::<String>(), &Annotations::new())
            .err()
            .unwrap();
        assert!(err.to_string().starts_with("Could not locate call adapter for alloc::string::String."));
    }

    static CONTRIBUTORS: LazyLock<MethodDescriptor> = LazyLock::new(|| {
        MethodDescriptor::builder("GitHub", "contributors")
            .get("repos/{owner}/{repo}/contributors")
            .param(Param::scalar::<String>().path("owner"))
            .param(Param::scalar::<String>().path("repo"))
            .param(Param::scalar::<u32>().query("per_page"))
            .returns::<Call<String>>()
            .build()
    });

    static BROKEN: LazyLock<MethodDescriptor> = LazyLock::new(|| {
        MethodDescriptor::builder("GitHub", "broken")
            .get("repos/{owner}")
            .returns::<Call<String>>()
            .build()
    });

    struct GitHub;

    impl Service for GitHub {
        fn methods() -> Vec<&'static MethodDescriptor> {
            vec![&*CONTRIBUTORS, &*BROKEN]
        }

        fn from_courier(_courier: Courier) -> Self {
            Self
        }
    }

    #[tokio::test]
    async fn invoked_methods_build_and_run_requests() {
        let transport = MockTransport::new();
        transport.push(MockResponse::text(200, "[]"));
        let courier = courier(&transport);

        let call: Call<String> = courier
            .invoke(
                &CONTRIBUTORS,
                vec![
                    Arg::value(String::from("square")),
                    Arg::value(String::from("retrofit")),
                    Arg::value(5_u32),
                ],
            )
            .unwrap();
        let response = call.execute().await.unwrap();
        assert_eq!(response.into_body().as_deref(), Some("[]"));
        assert_eq!(
            transport.take_request().unwrap().uri(),
            "http://example.com/repos/square/retrofit/contributors?per_page=5"
        );
    }

    #[test]
    fn invoking_with_another_return_type_fails() {
        let courier = courier(&MockTransport::new());
        let err = courier
            .invoke::<Call<u32>>(&CONTRIBUTORS, Vec::new())
            .unwrap_err();
        assert!(err.message().starts_with("Method returns"));
    }

    #[test]
    fn eager_validation_reports_the_first_broken_method() {
        let transport = MockTransport::new();
        let lazy = courier(&transport);
        assert!(lazy.create::<GitHub>().is_ok());

        let eager = Courier::builder()
            .base_url("http://example.com/")
            .call_factory(transport as Arc<dyn CallFactory>)
            .converter_factories(vec![
                Arc::new(crate::converter::ScalarsConverterFactory) as Arc<dyn ConverterFactory>,
            ])
            .validate_eagerly(true)
            .build()
            .unwrap();
        let err = eager.create::<GitHub>().err().unwrap();
        assert_eq!(err.method_key().method(), "broken");
        assert_eq!(
            err.message(),
            "URL \"repos/{owner}\" contains \"{owner}\" but no @Path parameter binds it."
        );
    }

    #[test]
    fn methods_compile_once_under_contention() {
        struct Counting(Arc<AtomicUsize>);

        impl ConverterFactory for Counting {
            fn response_body_converter(
                &self,
                ty: &DeclaredType,
                _annotations: &Annotations,
                _courier: &Courier,
            ) -> Option<Arc<dyn ResponseBodyConverter>> {
                self.0.fetch_add(1, Ordering::SeqCst);
                ty.is::<String>().then(|| {
                    response_body_converter(|bytes: Bytes| String::from_utf8(bytes.to_vec()))
                })
            }
        }

        let lookups = Arc::new(AtomicUsize::new(0));
        let courier = with_converters(vec![Arc::new(Counting(Arc::clone(&lookups)))]);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let call: Call<String> = courier
                        .invoke(
                            &CONTRIBUTORS,
                            vec![Arg::Null, Arg::Null, Arg::Null],
                        )
                        .unwrap();
                    assert!(!call.is_executed());
                });
            }
        });
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_compilations_are_not_cached() {
        let courier = courier(&MockTransport::new());
        assert!(courier.invoke::<Call<String>>(&BROKEN, Vec::new()).is_err());
        assert!(courier.invoke::<Call<String>>(&BROKEN, Vec::new()).is_err());
    }

    #[test]
    fn raw_transport_responses_are_not_bodies() {
        let descriptor = MethodDescriptor::builder("Example", "raw")
            .get("raw")
            .returns::<Call<RawResponse>>()
            .build();
        let err = courier(&MockTransport::new())
            .invoke::<Call<RawResponse>>(&descriptor, Vec::new())
            .unwrap_err();
        assert!(
            err.message()
                .ends_with("is not a valid response body type. Did you mean ResponseBody?")
        );
    }
}
