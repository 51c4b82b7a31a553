use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use futures::future::BoxFuture;
use http::StatusCode;
use snafu::prelude::*;

use super::{
    CallError, Callback, ServiceCall, deliver,
    error::{AlreadyExecutedSnafu, CanceledSnafu, TransportSnafu},
};
use crate::{
    arg::Arg,
    converter::ResponseBodyConverter,
    error::BoxedError,
    http::{CallFactory, RawCall},
    request::{Request, RequestError, RequestFactory, clone_request},
    response::{AnyBody, RawResponse, Response},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Executing,
    Executed,
}

#[derive(Default)]
struct State {
    phase: Phase,
    raw_call: Option<Arc<dyn RawCall>>,
    creation_failure: Option<Arc<RequestError>>,
}

/// Marks the call executed once the exchange is over or abandoned.
struct PhaseGuard(Arc<Mutex<State>>);

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).phase = Phase::Executed;
    }
}

/// A call that builds its request from a compiled [`RequestFactory`] and
/// sends it through a [`CallFactory`].
pub(crate) struct HttpCall {
    request_factory: Arc<RequestFactory>,
    call_factory: Arc<dyn CallFactory>,
    response_converter: Arc<dyn ResponseBodyConverter>,
    arguments: Arc<[Arg]>,
    state: Arc<Mutex<State>>,
    canceled: Arc<AtomicBool>,
}

impl HttpCall {
    pub(crate) fn new(
        request_factory: Arc<RequestFactory>,
        call_factory: Arc<dyn CallFactory>,
        response_converter: Arc<dyn ResponseBodyConverter>,
        arguments: Arc<[Arg]>,
    ) -> Self {
        Self {
            request_factory,
            call_factory,
            response_converter,
            arguments,
            state: Arc::default(),
            canceled: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The transport call, created on first use. A request that failed to
    /// build fails the same way on every later attempt.
    fn raw_call(&self, state: &mut State) -> Result<Arc<dyn RawCall>, CallError> {
        if let Some(call) = &state.raw_call {
            return Ok(Arc::clone(call));
        }
        if let Some(failure) = &state.creation_failure {
            return Err(CallError::Request {
                source: Arc::clone(failure),
            });
        }

        match self.request_factory.create(&self.arguments) {
            Ok(request) => {
                let call = self.call_factory.new_call(request);
                if self.canceled.load(Ordering::SeqCst) {
                    call.cancel();
                }
                state.raw_call = Some(Arc::clone(&call));
                Ok(call)
            }
            Err(err) => {
                let failure = Arc::new(err);
                state.creation_failure = Some(Arc::clone(&failure));
                Err(CallError::Request { source: failure })
            }
        }
    }

    /// Leaves the idle state and returns the transport call to run.
    fn begin(&self) -> Result<Arc<dyn RawCall>, CallError> {
        let mut state = self.lock();
        ensure!(state.phase == Phase::Idle, AlreadyExecutedSnafu);
        state.phase = Phase::Executing;

        let started = if self.canceled.load(Ordering::SeqCst) {
            CanceledSnafu.fail()
        } else {
            self.raw_call(&mut state)
        };
        if started.is_err() {
            state.phase = Phase::Executed;
        }
        started
    }
}

impl ServiceCall for HttpCall {
    fn request(&self) -> Result<Request, CallError> {
        let mut state = self.lock();
        let call = self.raw_call(&mut state)?;
        Ok(clone_request(call.request()))
    }

    fn execute(&self) -> BoxFuture<'static, Result<Response<AnyBody>, CallError>> {
        let exchange = self.begin().map(|call| call.execute());
        let guard = exchange
            .is_ok()
            .then(|| PhaseGuard(Arc::clone(&self.state)));
        let converter = Arc::clone(&self.response_converter);
        let canceled = Arc::clone(&self.canceled);

        Box::pin(async move {
            let _guard = guard;
            let outcome = match exchange?.await {
                Ok(raw) => parse_response(raw, converter.as_ref()).await,
                Err(source) => Err(CallError::Transport { source }),
            };
            settle(outcome, &canceled)
        })
    }

    fn enqueue(&self, callback: Callback<AnyBody>) -> Result<(), CallError> {
        let call = match self.begin() {
            Ok(call) => call,
            Err(err @ CallError::AlreadyExecuted) => return Err(err),
            Err(err) => {
                deliver(callback, Err(err));
                return Ok(());
            }
        };

        let guard = PhaseGuard(Arc::clone(&self.state));
        let converter = Arc::clone(&self.response_converter);
        let canceled = Arc::clone(&self.canceled);
        let listener = move |result: Result<RawResponse, BoxedError>| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                let outcome = match result {
                    Ok(raw) => parse_response(raw, converter.as_ref()).await,
                    Err(source) => Err(CallError::Transport { source }),
                };
                drop(guard);
                deliver(callback, settle(outcome, &canceled));
            })
        };
        call.enqueue(Box::new(listener));
        Ok(())
    }

    fn is_executed(&self) -> bool {
        self.lock().phase != Phase::Idle
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        let call = self.lock().raw_call.clone();
        if let Some(call) = call {
            call.cancel();
        }
        tracing::debug!(method = %self.request_factory.method_key(), "call canceled");
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn duplicate(&self) -> Arc<dyn ServiceCall> {
        Arc::new(Self::new(
            Arc::clone(&self.request_factory),
            Arc::clone(&self.call_factory),
            Arc::clone(&self.response_converter),
            Arc::clone(&self.arguments),
        ))
    }
}

/// A canceled call never reports success, and its transport failures are
/// reported as the cancellation.
fn settle(
    outcome: Result<Response<AnyBody>, CallError>,
    canceled: &AtomicBool,
) -> Result<Response<AnyBody>, CallError> {
    if canceled.load(Ordering::SeqCst) && matches!(outcome, Ok(_) | Err(CallError::Transport { .. }))
    {
        return CanceledSnafu.fail();
    }
    outcome
}

/// Splits a raw response into status and headers plus a converted body.
///
/// Unsuccessful responses keep their body, fully buffered, and skip the
/// converter. So do 204 and 205, which have no body at all.
async fn parse_response(
    raw: RawResponse,
    converter: &dyn ResponseBodyConverter,
) -> Result<Response<AnyBody>, CallError> {
    let (parts, body) = raw.into_parts();
    let raw = http::Response::from_parts(parts, body.stripped());
    let status = raw.status();

    if !status.is_success() {
        let body = body.buffer().await.context(TransportSnafu)?;
        return Ok(Response::from_error(raw, body));
    }
    if status == StatusCode::NO_CONTENT || status == StatusCode::RESET_CONTENT {
        return Ok(Response::from_success(raw, None));
    }

    let (body, caught) = body.catching();
    match converter.convert(body).await {
        Ok(value) => Ok(Response::from_success(raw, Some(value))),
        Err(err) => Err(match caught.take() {
            Some(source) => CallError::Transport { source },
            None => CallError::Conversion { source: err },
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{
        call::Call,
        descriptor::{MethodDescriptor, Param},
        response::ResponseBody,
        test_support::{MockResponse, MockTransport, courier, text_converter},
    };

    fn ping() -> MethodDescriptor {
        MethodDescriptor::builder("Example", "ping")
            .get("items/{id}")
            .param(Param::scalar::<String>().path("id"))
            .returns::<Call<String>>()
            .build()
    }

    fn http_call(
        transport: &Arc<MockTransport>,
        converter: Arc<dyn ResponseBodyConverter>,
        id: Arg,
    ) -> HttpCall {
        let courier = courier(transport);
        let factory = RequestFactory::parse(&courier, &ping()).unwrap();
        HttpCall::new(
            Arc::new(factory),
            Arc::clone(transport) as Arc<dyn CallFactory>,
            converter,
            Arc::from(vec![id]),
        )
    }

    fn id(value: &str) -> Arg {
        Arg::value(value.to_owned())
    }

    fn text(response: Response<AnyBody>) -> String {
        *response.into_body().unwrap().downcast::<String>().unwrap()
    }

    #[tokio::test]
    async fn executes_at_most_once() {
        let transport = MockTransport::new();
        transport.push(MockResponse::text(200, "pong"));
        let call = http_call(&transport, text_converter(), id("1"));

        assert!(!call.is_executed());
        let response = call.execute().await.unwrap();
        assert!(call.is_executed());
        assert_eq!(text(response), "pong");
        assert_eq!(
            transport.take_request().unwrap().uri(),
            "http://example.com/items/1"
        );

        let err = call.execute().await.unwrap_err();
        assert!(matches!(err, CallError::AlreadyExecuted));
        let err = call
            .enqueue(Box::new(|_: Result<Response<AnyBody>, CallError>| {}))
            .unwrap_err();
        assert!(matches!(err, CallError::AlreadyExecuted));
        assert_eq!(transport.new_calls(), 1);
    }

    #[tokio::test]
    async fn execution_starts_without_polling() {
        let transport = MockTransport::new();
        let call = http_call(&transport, text_converter(), id("1"));
        drop(call.execute());
        assert!(call.is_executed());
        assert!(matches!(
            call.execute().await.unwrap_err(),
            CallError::AlreadyExecuted
        ));
    }

    #[tokio::test]
    async fn bodiless_statuses_skip_the_converter() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let converter =
            move |body: ResponseBody| -> BoxFuture<'static, Result<AnyBody, BoxedError>> {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { Ok(Box::new(body.text().await?) as AnyBody) })
            };
        let converter: Arc<dyn ResponseBodyConverter> = Arc::new(converter);

        for status in [204, 205] {
            let transport = MockTransport::new();
            transport.push(MockResponse::text(status, "ignored"));
            let call = http_call(&transport, Arc::clone(&converter), id("1"));
            let response = call.execute().await.unwrap();
            assert_eq!(response.status().as_u16(), status);
            assert!(response.is_successful());
            assert!(response.body().is_none());
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsuccessful_responses_keep_the_error_body() {
        let transport = MockTransport::new();
        transport.push(MockResponse::text(404, "missing"));
        let call = http_call(&transport, text_converter(), id("1"));

        let mut response = call.execute().await.unwrap();
        assert!(!response.is_successful());
        assert!(response.body().is_none());
        let error_body = response.take_error_body().unwrap();
        assert!(error_body.is_buffered());
        assert_eq!(error_body.text().await.unwrap(), "missing");

        let err = response.raw().body().stripped().bytes().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot read raw response body of a converted body."
        );
    }

    #[tokio::test]
    async fn canceling_before_execution_never_reaches_the_transport() {
        let transport = MockTransport::new();
        let call = http_call(&transport, text_converter(), id("1"));
        call.cancel();
        assert!(call.is_canceled());

        let err = call.execute().await.unwrap_err();
        assert!(matches!(err, CallError::Canceled));
        assert_eq!(transport.new_calls(), 0);

        let call = http_call(&transport, text_converter(), id("1"));
        call.cancel();
        let (tx, rx) = futures::channel::oneshot::channel();
        call.enqueue(Box::new(move |outcome: Result<Response<AnyBody>, CallError>| {
            let _ = tx.send(matches!(outcome, Err(CallError::Canceled)));
        }))
        .unwrap();
        assert!(rx.await.unwrap());
        assert_eq!(transport.new_calls(), 0);
    }

    #[tokio::test]
    async fn canceling_in_flight_reports_cancellation() {
        let transport = MockTransport::new();
        transport.push(MockResponse::Hang);
        let call = http_call(&transport, text_converter(), id("1"));

        let pending = call.execute();
        call.cancel();
        let err = pending.await.unwrap_err();
        assert!(matches!(err, CallError::Canceled));
    }

    #[tokio::test]
    async fn duplicates_start_fresh() {
        let transport = MockTransport::new();
        transport.push(MockResponse::text(200, "first"));
        transport.push(MockResponse::text(200, "second"));
        let call = http_call(&transport, text_converter(), id("1"));
        assert_eq!(text(call.execute().await.unwrap()), "first");

        let again = call.duplicate();
        assert!(!again.is_executed());
        assert_eq!(text(again.execute().await.unwrap()), "second");
        assert_eq!(transport.new_calls(), 2);
    }

    #[tokio::test]
    async fn request_failures_are_replayed() {
        let transport = MockTransport::new();
        let call = http_call(&transport, text_converter(), Arg::Null);

        let CallError::Request { source: first } = call.request().unwrap_err() else {
            panic!("expected a request failure");
        };
        let CallError::Request { source: second } = call.request().unwrap_err() else {
            panic!("expected a request failure");
        };
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            first.to_string(),
            "Path parameter \"id\" value must not be null."
        );

        let err = call.execute().await.unwrap_err();
        assert!(matches!(err, CallError::Request { .. }));
        assert_eq!(transport.new_calls(), 0);
    }

    #[tokio::test]
    async fn read_failures_are_transport_errors() {
        let transport = MockTransport::new();
        transport.push(MockResponse::BrokenBody { status: 200 });
        let call = http_call(&transport, text_converter(), id("1"));
        let err = call.execute().await.unwrap_err();
        assert!(matches!(err, CallError::Transport { .. }));
        assert!(crate::Error::is_retryable(&err));
    }

    #[tokio::test]
    async fn converter_failures_are_conversion_errors() {
        let transport = MockTransport::new();
        transport.push(MockResponse::text(200, "garbage"));
        let converter = |_: ResponseBody| -> BoxFuture<'static, Result<AnyBody, BoxedError>> {
            Box::pin(async { Err(BoxedError::from_message("unexpected token")) })
        };
        let call = http_call(&transport, Arc::new(converter), id("1"));
        let err = call.execute().await.unwrap_err();
        let CallError::Conversion { source } = err else {
            panic!("expected a conversion failure");
        };
        assert_eq!(source.to_string(), "unexpected token");
    }

    #[tokio::test]
    async fn enqueue_delivers_exactly_once() {
        let transport = MockTransport::new();
        transport.push(MockResponse::text(200, "pong"));
        let call = http_call(&transport, text_converter(), id("1"));

        let (tx, rx) = futures::channel::oneshot::channel();
        call.enqueue(Box::new(move |outcome: Result<Response<AnyBody>, CallError>| {
            let _ = tx.send(outcome.map(text));
        }))
        .unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), "pong");
        assert!(call.is_executed());
    }

    #[tokio::test]
    async fn enqueue_reports_transport_failures() {
        let transport = MockTransport::new();
        transport.push(MockResponse::Fail);
        let call = http_call(&transport, text_converter(), id("1"));

        let (tx, rx) = futures::channel::oneshot::channel();
        call.enqueue(Box::new(move |outcome: Result<Response<AnyBody>, CallError>| {
            let _ = tx.send(matches!(outcome, Err(CallError::Transport { .. })));
        }))
        .unwrap();
        assert!(rx.await.unwrap());
    }
}
