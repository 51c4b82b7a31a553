//! Executing service method invocations.
//!
//! A [`Call`] is bound to one invocation's arguments. It runs at most once,
//! either awaited with [`Call::execute`] or in the background with
//! [`Call::enqueue`]; [`Clone`] produces a fresh call with the same
//! arguments. Non-2xx responses are not errors at this level: they arrive as
//! unsuccessful [`Response`]s carrying the buffered error body.

mod error;
mod executor;
mod http_call;

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use futures::future::BoxFuture;

use crate::{
    error::BoxedError,
    request::Request,
    response::{AnyBody, BodyTypeError, Response},
};

pub use error::{CallError, HttpError};
pub(crate) use executor::ExecutorCall;
pub use executor::{Executor, Task};
pub(crate) use http_call::HttpCall;

/// Receives the outcome of an enqueued call.
pub type Callback<T> = Box<dyn FnOnce(Result<Response<T>, CallError>) + Send>;

/// The type-erased call engine behind [`Call`].
pub(crate) trait ServiceCall: Send + Sync {
    /// The request this call sends, built on first access.
    fn request(&self) -> Result<Request, CallError>;

    /// Starts the call. The state transition happens before this returns;
    /// failures are reported when the future is awaited.
    fn execute(&self) -> BoxFuture<'static, Result<Response<AnyBody>, CallError>>;

    /// Starts the call in the background.
    ///
    /// Only [`CallError::AlreadyExecuted`] is returned; every other outcome
    /// goes to `callback`, exactly once.
    fn enqueue(&self, callback: Callback<AnyBody>) -> Result<(), CallError>;

    fn is_executed(&self) -> bool;

    fn cancel(&self);

    fn is_canceled(&self) -> bool;

    /// A new, unstarted call with the same request plan and arguments.
    fn duplicate(&self) -> Arc<dyn ServiceCall>;
}

/// Runs `callback`, containing any panic it raises.
pub(crate) fn deliver<T>(callback: Callback<T>, outcome: Result<Response<T>, CallError>) {
    if panic::catch_unwind(AssertUnwindSafe(move || callback(outcome))).is_err() {
        tracing::error!("call callback panicked; the panic was contained");
    }
}

/// Recovers the concrete body type of a converted response.
pub(crate) type Cast<T> = fn(AnyBody) -> Result<T, AnyBody>;

pub(crate) fn downcast_body<T: Any>(body: AnyBody) -> Result<T, AnyBody> {
    body.downcast::<T>().map(|body| *body)
}

/// One invocation of a service method, yielding a `Response<T>`.
pub struct Call<T> {
    inner: Arc<dyn ServiceCall>,
    cast: Cast<T>,
}

impl Call<AnyBody> {
    pub(crate) fn erased(inner: Arc<dyn ServiceCall>) -> Self {
        Self { inner, cast: Ok }
    }

    /// Views the call as producing bodies of type `T`.
    ///
    /// The type is checked when a body arrives; a mismatch fails the call
    /// with [`CallError::Conversion`].
    #[must_use]
    pub fn typed<T: Any>(self) -> Call<T> {
        Call {
            inner: self.inner,
            cast: downcast_body::<T>,
        }
    }
}

impl<T: Send + 'static> Call<T> {
    /// Sends the request and converts the response.
    ///
    /// The call is marked executed immediately, even if the returned future
    /// is never polled.
    pub fn execute(&self) -> impl Future<Output = Result<Response<T>, CallError>> + Send + 'static {
        let execution = self.inner.execute();
        let cast = self.cast;
        async move { cast_response(execution.await?, cast) }
    }

    /// Sends the request in the background and passes the outcome to
    /// `callback`.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::AlreadyExecuted`] if the call was started
    /// before. Every other failure is passed to `callback`.
    pub fn enqueue<F>(&self, callback: F) -> Result<(), CallError>
    where
        F: FnOnce(Result<Response<T>, CallError>) + Send + 'static,
    {
        let cast = self.cast;
        self.inner
            .enqueue(Box::new(move |outcome: Result<Response<AnyBody>, CallError>| {
                callback(outcome.and_then(|response| cast_response(response, cast)));
            }))
    }
}

impl<T> Call<T> {
    /// Whether the call was executed or enqueued.
    #[must_use]
    pub fn is_executed(&self) -> bool {
        self.inner.is_executed()
    }

    /// Cancels the call. A call that has not started yet never will.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Whether [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.is_canceled()
    }

    /// The request this call sends.
    ///
    /// # Errors
    ///
    /// Fails with [`CallError::Request`] when the arguments do not form a
    /// valid request. The same failure is returned on every access.
    pub fn request(&self) -> Result<Request, CallError> {
        self.inner.request()
    }

    pub(crate) fn inner(&self) -> &Arc<dyn ServiceCall> {
        &self.inner
    }

    pub(crate) fn cast(&self) -> Cast<T> {
        self.cast
    }
}

pub(crate) fn cast_response<T: 'static>(
    response: Response<AnyBody>,
    cast: Cast<T>,
) -> Result<Response<T>, CallError> {
    response.try_map_body(|body| {
        body.map(cast)
            .transpose()
            .map_err(|_| CallError::Conversion {
                source: BoxedError::from_err(BodyTypeError::of::<T>()),
            })
    })
}

impl<T> Clone for Call<T> {
    /// A fresh call with the same arguments, regardless of whether this one
    /// has run.
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.duplicate(),
            cast: self.cast,
        }
    }
}

impl<T> fmt::Debug for Call<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("executed", &self.inner.is_executed())
            .field("canceled", &self.inner.is_canceled())
            .finish_non_exhaustive()
    }
}
