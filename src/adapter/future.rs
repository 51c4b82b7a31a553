use std::{
    any::Any,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};

use futures::channel::oneshot;

use super::{CallAdapter, CallAdapterFactory, ReturnType};
use crate::{
    Courier,
    call::{Call, CallError, Cast, HttpError, ServiceCall, cast_response, downcast_body},
    response::{AnyBody, Response},
    types::{Annotations, DeclaredType},
};

/// Adapts calls into [`CallFuture<T>`] and [`ResponseFuture<T>`].
///
/// The call is enqueued as soon as the method is invoked. Dropping the
/// future before it completes cancels the call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FutureCallAdapterFactory;

impl CallAdapterFactory for FutureCallAdapterFactory {
    fn get(
        &self,
        return_type: &DeclaredType,
        _annotations: &Annotations,
        _courier: &Courier,
    ) -> Option<Arc<dyn CallAdapter>> {
        let shape = if return_type.raw_is::<CallFuture<()>>() {
            Shape::Body
        } else if return_type.raw_is::<ResponseFuture<()>>() {
            Shape::Response
        } else {
            return None;
        };
        Some(Arc::new(FutureAdapter {
            response_type: return_type.argument(0)?.clone(),
            shape,
        }))
    }

    fn name(&self) -> &'static str {
        "FutureCallAdapterFactory"
    }
}

#[derive(Clone, Copy)]
enum Shape {
    Body,
    Response,
}

struct FutureAdapter {
    response_type: DeclaredType,
    shape: Shape,
}

impl CallAdapter for FutureAdapter {
    fn response_type(&self) -> &DeclaredType {
        &self.response_type
    }

    fn adapt(&self, call: Call<AnyBody>) -> Box<dyn Any + Send> {
        let future = ResponseFuture::start(&call);
        match self.shape {
            Shape::Body => Box::new(CallFuture { inner: future }),
            Shape::Response => Box::new(future),
        }
    }
}

/// Cancels the call unless disarmed first.
struct CancelOnDrop {
    call: Arc<dyn ServiceCall>,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.call.cancel();
        }
    }
}

/// The pending [`Response`] of an enqueued call.
///
/// Unsuccessful responses resolve successfully; check
/// [`Response::is_successful`].
#[must_use = "dropping the future cancels the call"]
pub struct ResponseFuture<T> {
    receiver: oneshot::Receiver<Result<Response<AnyBody>, CallError>>,
    rejected: Option<CallError>,
    guard: CancelOnDrop,
    cast: Cast<T>,
}

impl ResponseFuture<AnyBody> {
    fn start(call: &Call<AnyBody>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let rejected = call
            .enqueue(move |outcome| {
                let _ = sender.send(outcome);
            })
            .err();
        Self {
            receiver,
            rejected,
            guard: CancelOnDrop {
                call: Arc::clone(call.inner()),
                armed: true,
            },
            cast: call.cast(),
        }
    }

    fn typed<T: Any>(self) -> ResponseFuture<T> {
        ResponseFuture {
            receiver: self.receiver,
            rejected: self.rejected,
            guard: self.guard,
            cast: downcast_body::<T>,
        }
    }
}

impl<T> ResponseFuture<T> {
    /// Cancels the underlying call.
    pub fn cancel(&self) {
        self.guard.call.cancel();
    }

    /// Whether the underlying call was canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.guard.call.is_canceled()
    }
}

impl<T: 'static> Future for ResponseFuture<T> {
    type Output = Result<Response<T>, CallError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(err) = this.rejected.take() {
            this.guard.armed = false;
            return Poll::Ready(Err(err));
        }
        let outcome = ready!(Pin::new(&mut this.receiver).poll(cx));
        this.guard.armed = false;
        Poll::Ready(match outcome {
            Ok(outcome) => outcome.and_then(|response| cast_response(response, this.cast)),
            // The call dropped its callback without answering.
            Err(oneshot::Canceled) => Err(CallError::Canceled),
        })
    }
}

impl<T: Send + 'static> ReturnType for ResponseFuture<T> {
    fn declared_type() -> DeclaredType {
        DeclaredType::parameterized::<Self, ResponseFuture<()>>([DeclaredType::of::<T>()])
    }

    fn from_adapted(adapted: Box<dyn Any + Send>) -> Result<Self, Box<dyn Any + Send>> {
        let adapted = match adapted.downcast::<Self>() {
            Ok(future) => return Ok(*future),
            Err(adapted) => adapted,
        };
        adapted
            .downcast::<ResponseFuture<AnyBody>>()
            .map(|future| (*future).typed::<T>())
    }
}

/// The pending body of an enqueued call.
///
/// A non-2xx response fails with [`CallError::Http`]. A successful response
/// without a body fails with [`CallError::MissingBody`] unless `T` is `()`.
#[must_use = "dropping the future cancels the call"]
pub struct CallFuture<T> {
    inner: ResponseFuture<T>,
}

impl<T> CallFuture<T> {
    /// Cancels the underlying call.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Whether the underlying call was canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.is_canceled()
    }
}

impl<T: 'static> Future for CallFuture<T> {
    type Output = Result<T, CallError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let response = match ready!(Pin::new(&mut this.inner).poll(cx)) {
            Ok(response) => response,
            Err(err) => return Poll::Ready(Err(err)),
        };
        if !response.is_successful() {
            return Poll::Ready(Err(CallError::Http {
                source: HttpError::from_response(&response),
            }));
        }
        let cast = this.inner.cast;
        Poll::Ready(match response.into_body() {
            Some(body) => Ok(body),
            None => cast(Box::new(())).map_err(|_| CallError::MissingBody),
        })
    }
}

impl<T: Send + 'static> ReturnType for CallFuture<T> {
    fn declared_type() -> DeclaredType {
        DeclaredType::parameterized::<Self, CallFuture<()>>([DeclaredType::of::<T>()])
    }

    fn from_adapted(adapted: Box<dyn Any + Send>) -> Result<Self, Box<dyn Any + Send>> {
        let adapted = match adapted.downcast::<Self>() {
            Ok(future) => return Ok(*future),
            Err(adapted) => adapted,
        };
        adapted.downcast::<CallFuture<AnyBody>>().map(|future| CallFuture {
            inner: future.inner.typed::<T>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockResponse, MockTransport, courier, ping_call};

    fn adapt<R: ReturnType>(transport: &Arc<MockTransport>) -> (R, Arc<dyn ServiceCall>) {
        let courier = courier(transport);
        let adapter = FutureCallAdapterFactory
            .get(&R::declared_type(), &Annotations::new(), &courier)
            .unwrap();
        let call = ping_call(transport);
        let adapted = adapter.adapt(Call::erased(Arc::clone(&call)));
        (R::from_adapted(adapted).ok().unwrap(), call)
    }

    #[tokio::test]
    async fn body_futures_yield_the_body() {
        let transport = MockTransport::new();
        transport.push(MockResponse::text(200, "pong"));
        let (future, call) = adapt::<CallFuture<String>>(&transport);
        assert!(call.is_executed());
        assert_eq!(future.await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn body_futures_fail_on_unsuccessful_status() {
        let transport = MockTransport::new();
        transport.push(MockResponse::text(503, "try later"));
        let (future, _) = adapt::<CallFuture<String>>(&transport);

        let err = future.await.unwrap_err();
        let CallError::Http { source } = &err else {
            panic!("expected an HTTP error, got {err:?}");
        };
        assert_eq!(source.status(), 503);
        assert_eq!(source.body().as_ref(), b"try later");
        assert_eq!(err.to_string(), "HTTP 503 Service Unavailable");
        assert!(crate::Error::is_retryable(&err));
    }

    #[tokio::test]
    async fn empty_success_needs_a_unit_body() {
        let transport = MockTransport::new();
        transport.push(MockResponse::text(204, ""));
        let (future, _) = adapt::<CallFuture<String>>(&transport);
        assert!(matches!(future.await, Err(CallError::MissingBody)));
    }

    #[tokio::test]
    async fn response_futures_keep_unsuccessful_responses() {
        let transport = MockTransport::new();
        transport.push(MockResponse::text(404, "missing"));
        let (future, _) = adapt::<ResponseFuture<String>>(&transport);
        let response = future.await.unwrap();
        assert_eq!(response.status(), 404);
        assert!(response.body().is_none());
    }

    #[tokio::test]
    async fn dropping_the_future_cancels_the_call() {
        let transport = MockTransport::new();
        transport.push(MockResponse::Hang);
        let (future, call) = adapt::<CallFuture<String>>(&transport);
        assert!(!call.is_canceled());
        drop(future);
        assert!(call.is_canceled());
    }

    #[tokio::test]
    async fn canceling_the_future_fails_it() {
        let transport = MockTransport::new();
        transport.push(MockResponse::Hang);
        let (future, call) = adapt::<ResponseFuture<String>>(&transport);
        future.cancel();
        assert!(future.is_canceled());
        assert!(call.is_canceled());
        assert!(matches!(future.await, Err(CallError::Canceled)));
    }

    #[tokio::test]
    async fn completed_futures_do_not_cancel() {
        let transport = MockTransport::new();
        transport.push(MockResponse::text(200, "pong"));
        let (future, call) = adapt::<ResponseFuture<String>>(&transport);
        future.await.unwrap();
        assert!(!call.is_canceled());
    }
}
