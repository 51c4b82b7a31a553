use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures::future::{AbortHandle, AbortRegistration, Abortable, Aborted, BoxFuture};
use http::{HeaderValue, Request as HttpRequest, header::CONTENT_TYPE};
use snafu::prelude::*;
use tokio::runtime::Handle;

use super::{CallFactory, HttpClient, HttpResponse, RawCall, RawCallback};
use crate::{
    error::BoxedError,
    request::Request,
    response::{RawResponse, ResponseBody},
};

/// Errors raised by calls created by a [`ClientCallFactory`].
#[derive(Debug, Snafu)]
pub enum ClientCallError {
    /// The call was started before.
    #[snafu(display("Already Executed"))]
    AlreadyStarted,
    /// The call was canceled before the response arrived.
    #[snafu(display("Canceled"))]
    Canceled,
    /// The call was enqueued outside of a Tokio runtime and the factory has
    /// no runtime handle.
    #[snafu(display("No Tokio runtime is available to run the call"))]
    RuntimeUnavailable,
}

impl crate::Error for ClientCallError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// A [`CallFactory`] backed by an [`HttpClient`].
///
/// Cancellation aborts the pending exchange. Enqueued calls run on the Tokio
/// runtime the factory was created in, or on the one given to
/// [`with_runtime`](Self::with_runtime).
pub struct ClientCallFactory<C> {
    client: Arc<C>,
    runtime: Option<Handle>,
}

impl<C> ClientCallFactory<C> {
    /// Wraps `client`, capturing the current Tokio runtime if there is one.
    pub fn new(client: C) -> Self {
        Self {
            client: Arc::new(client),
            runtime: Handle::try_current().ok(),
        }
    }

    /// Runs enqueued calls on `runtime`.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// The wrapped client.
    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C> CallFactory for ClientCallFactory<C>
where
    C: HttpClient + 'static,
    C::Response: 'static,
{
    fn new_call(&self, request: Request) -> Arc<dyn RawCall> {
        let (abort, registration) = AbortHandle::new_pair();
        Arc::new(ClientCall {
            client: Arc::clone(&self.client),
            runtime: self.runtime.clone(),
            request,
            abort,
            registration: Mutex::new(Some(registration)),
        })
    }
}

struct ClientCall<C> {
    client: Arc<C>,
    runtime: Option<Handle>,
    request: Request,
    abort: AbortHandle,
    registration: Mutex<Option<AbortRegistration>>,
}

impl<C> RawCall for ClientCall<C>
where
    C: HttpClient + 'static,
    C::Response: 'static,
{
    fn request(&self) -> &Request {
        &self.request
    }

    fn execute(&self) -> BoxFuture<'static, Result<RawResponse, BoxedError>> {
        let registration = self
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let client = Arc::clone(&self.client);
        let request = to_http_request(&self.request);

        Box::pin(async move {
            let registration = registration
                .context(AlreadyStartedSnafu)
                .map_err(BoxedError::from_err)?;
            match Abortable::new(send(client, request), registration).await {
                Ok(result) => result,
                Err(Aborted) => Err(BoxedError::from_err(ClientCallError::Canceled)),
            }
        })
    }

    fn enqueue(&self, listener: RawCallback) {
        let execution = self.execute();
        match self.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => {
                runtime.spawn(async move {
                    listener(execution.await).await;
                });
            }
            None => {
                tracing::warn!(uri = %self.request.uri(), "no Tokio runtime available for enqueued call");
                futures::executor::block_on(listener(Err(BoxedError::from_err(
                    ClientCallError::RuntimeUnavailable,
                ))));
            }
        }
    }

    fn cancel(&self) {
        self.abort.abort();
    }

    fn is_canceled(&self) -> bool {
        self.abort.is_aborted()
    }
}

async fn send<C>(client: Arc<C>, request: HttpRequest<Bytes>) -> Result<RawResponse, BoxedError>
where
    C: HttpClient,
    C::Response: 'static,
{
    let response = client
        .execute(request)
        .await
        .map_err(BoxedError::from_err)?;

    let mut raw = http::Response::new(());
    *raw.status_mut() = response.status();
    *raw.headers_mut() = response.headers();
    let body = ResponseBody::from_future(raw.headers(), async move {
        response.body().await.map_err(BoxedError::from_err)
    });
    Ok(raw.map(|()| body))
}

/// Materializes the body and exposes its media type as a header.
fn to_http_request(request: &Request) -> HttpRequest<Bytes> {
    let content = request
        .body()
        .as_ref()
        .map(|body| body.content().clone())
        .unwrap_or_default();

    let mut out = HttpRequest::new(content);
    *out.method_mut() = request.method().clone();
    *out.uri_mut() = request.uri().clone();
    *out.version_mut() = request.version();
    *out.headers_mut() = request.headers().clone();
    *out.extensions_mut() = request.extensions().clone();

    if let Some(content_type) = request.body().as_ref().and_then(|b| b.content_type())
        && !out.headers().contains_key(CONTENT_TYPE)
        && let Ok(value) = HeaderValue::from_str(content_type.as_ref())
    {
        out.headers_mut().insert(CONTENT_TYPE, value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        body::RequestBody,
        test_support::{MockClient, MockResponse},
    };

    fn request(body: Option<RequestBody>) -> Request {
        let mut request = http::Request::new(body);
        *request.uri_mut() = "http://example.com/foo".parse().unwrap();
        request
    }

    #[tokio::test]
    async fn forwards_body_media_type() {
        let client = MockClient::new();
        client.push(MockResponse::text(200, "ok"));
        let factory = ClientCallFactory::new(client.clone());

        let call = factory.new_call(request(Some(RequestBody::text("hi"))));
        let response = call.execute().await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.into_body().text().await.unwrap(), "ok");

        let sent = client.take_request().unwrap();
        assert_eq!(sent.body().as_ref(), b"hi");
        assert_eq!(
            sent.headers().get(CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn cancel_aborts_pending_exchange() {
        let client = MockClient::new();
        client.push(MockResponse::Hang);
        let factory = ClientCallFactory::new(client);

        let call = factory.new_call(request(None));
        let pending = call.execute();
        call.cancel();
        assert!(call.is_canceled());
        let err = pending.await.unwrap_err();
        assert!(err.downcast_ref::<ClientCallError>().is_some());
    }

    #[tokio::test]
    async fn second_execution_is_rejected() {
        let client = MockClient::new();
        client.push(MockResponse::text(200, "ok"));
        let factory = ClientCallFactory::new(client);

        let call = factory.new_call(request(None));
        call.execute().await.unwrap();
        let err = call.execute().await.unwrap_err();
        assert_eq!(err.to_string(), "Already Executed");
    }

    #[tokio::test]
    async fn enqueue_delivers_to_listener() {
        let client = MockClient::new();
        client.push(MockResponse::text(201, ""));
        let factory = ClientCallFactory::new(client);

        let (tx, rx) = futures::channel::oneshot::channel();
        let listener = move |result: Result<RawResponse, BoxedError>| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                let _ = tx.send(result.map(|r| r.status()));
            })
        };
        factory.new_call(request(None)).enqueue(Box::new(listener));
        assert_eq!(rx.await.unwrap().unwrap(), 201);
    }

    #[test]
    fn enqueue_without_runtime_fails_fast() {
        let client = MockClient::new();
        let factory = ClientCallFactory::new(client);

        let (tx, mut rx) = futures::channel::oneshot::channel();
        let listener = move |result: Result<RawResponse, BoxedError>| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                let _ = tx.send(result.is_err());
            })
        };
        factory.new_call(request(None)).enqueue(Box::new(listener));
        assert_eq!(rx.try_recv().unwrap(), Some(true));
    }
}
