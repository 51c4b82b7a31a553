//! Scripted in-memory transport used by unit tests.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderValue, Request as HttpRequest, StatusCode, header::CONTENT_TYPE};
use snafu::Snafu;

use crate::{
    Courier,
    arg::Arg,
    call::{Call, HttpCall, ServiceCall},
    converter::{ConverterFactory, ResponseBodyConverter},
    descriptor::MethodDescriptor,
    error::BoxedError,
    http::{CallFactory, ClientCallFactory, HttpClient, HttpResponse, RawCall},
    request::{Request, RequestFactory},
    response::{AnyBody, ResponseBody},
};

#[derive(Debug, Snafu)]
#[snafu(display("mock transport failure"))]
pub(crate) struct MockError;

impl crate::Error for MockError {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// What the next exchange does.
#[derive(Debug, Clone)]
pub(crate) enum MockResponse {
    Respond {
        status: u16,
        content_type: Option<&'static str>,
        body: Bytes,
    },
    /// The body read fails after the headers arrived.
    BrokenBody { status: u16 },
    /// The exchange fails before any response.
    Fail,
    /// The exchange never completes.
    Hang,
}

impl MockResponse {
    pub(crate) fn text(status: u16, body: &'static str) -> Self {
        Self::Respond {
            status,
            content_type: Some("text/plain; charset=utf-8"),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    pub(crate) fn json(status: u16, body: &'static str) -> Self {
        Self::Respond {
            status,
            content_type: Some("application/json"),
            body: Bytes::from_static(body.as_bytes()),
        }
    }
}

#[derive(Default)]
struct MockState {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<VecDeque<HttpRequest<Bytes>>>,
}

/// An [`HttpClient`] that replays queued responses and records requests.
#[derive(Clone, Default)]
pub(crate) struct MockClient {
    state: Arc<MockState>,
}

impl MockClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, response: MockResponse) {
        self.state.responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn take_request(&self) -> Option<HttpRequest<Bytes>> {
        self.state.requests.lock().unwrap().pop_front()
    }
}

pub(crate) struct MockHttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl HttpResponse for MockHttpResponse {
    type Error = MockError;

    fn status(&self) -> StatusCode {
        self.status
    }

    fn headers(&self) -> HeaderMap {
        self.headers.clone()
    }

    fn body(self) -> impl Future<Output = Result<Bytes, Self::Error>> + Send {
        async move { self.body.ok_or(MockError) }
    }
}

fn response(status: u16, content_type: Option<&'static str>, body: Option<Bytes>) -> MockHttpResponse {
    let mut headers = HeaderMap::new();
    if let Some(content_type) = content_type {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
    MockHttpResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers,
        body,
    }
}

impl HttpClient for MockClient {
    type Error = MockError;
    type Response = MockHttpResponse;

    fn execute(
        &self,
        request: HttpRequest<Bytes>,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            state.requests.lock().unwrap().push_back(request);
            let next = state
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(MockResponse::Respond {
                    status: 200,
                    content_type: None,
                    body: Bytes::new(),
                });
            match next {
                MockResponse::Respond {
                    status,
                    content_type,
                    body,
                } => Ok(response(status, content_type, Some(body))),
                MockResponse::BrokenBody { status } => {
                    Ok(response(status, Some("text/plain"), None))
                }
                MockResponse::Fail => Err(MockError),
                MockResponse::Hang => futures::future::pending().await,
            }
        }
    }
}

/// A [`CallFactory`] over [`MockClient`] that counts created calls.
pub(crate) struct MockTransport {
    client: MockClient,
    factory: ClientCallFactory<MockClient>,
    new_calls: AtomicUsize,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        let client = MockClient::new();
        Arc::new(Self {
            factory: ClientCallFactory::new(client.clone()),
            client,
            new_calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn push(&self, response: MockResponse) {
        self.client.push(response);
    }

    pub(crate) fn take_request(&self) -> Option<HttpRequest<Bytes>> {
        self.client.take_request()
    }

    pub(crate) fn new_calls(&self) -> usize {
        self.new_calls.load(Ordering::SeqCst)
    }
}

impl CallFactory for MockTransport {
    fn new_call(&self, request: Request) -> Arc<dyn RawCall> {
        self.new_calls.fetch_add(1, Ordering::SeqCst);
        self.factory.new_call(request)
    }
}

/// A [`Courier`] over `transport` with the scalar converters installed.
pub(crate) fn courier(transport: &Arc<MockTransport>) -> Courier {
    Courier::builder()
        .base_url("http://example.com/")
        .call_factory(Arc::clone(transport) as Arc<dyn CallFactory>)
        .converter_factories(vec![
            Arc::new(crate::converter::ScalarsConverterFactory) as Arc<dyn ConverterFactory>,
        ])
        .build()
        .unwrap()
}

/// A response converter that reads the body as text.
pub(crate) fn text_converter() -> Arc<dyn ResponseBodyConverter> {
    let converter = |body: ResponseBody| -> BoxFuture<'static, Result<AnyBody, BoxedError>> {
        Box::pin(async move { Ok(Box::new(body.text().await?) as AnyBody) })
    };
    Arc::new(converter)
}

/// An unstarted `GET ping` call over `transport` that reads the body as text.
pub(crate) fn ping_call(transport: &Arc<MockTransport>) -> Arc<dyn ServiceCall> {
    let descriptor = MethodDescriptor::builder("Example", "ping")
        .get("ping")
        .returns::<Call<String>>()
        .build();
    let factory = RequestFactory::parse(&courier(transport), &descriptor).unwrap();
    Arc::new(HttpCall::new(
        Arc::new(factory),
        Arc::clone(transport) as Arc<dyn CallFactory>,
        text_converter(),
        Arc::from(Vec::<Arg>::new()),
    ))
}
