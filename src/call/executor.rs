use std::sync::Arc;

use tokio::runtime::Handle;

use super::{CallError, Callback, ServiceCall, deliver};
use crate::{
    request::Request,
    response::{AnyBody, Response},
};

/// A unit of work handed to an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs callbacks of enqueued calls.
///
/// Closures taking a [`Task`] are executors, and so is a Tokio runtime
/// [`Handle`], which runs each task on its blocking pool.
pub trait Executor: Send + Sync {
    /// Runs `task`, now or later.
    fn execute(&self, task: Task);
}

impl<F> Executor for F
where
    F: Fn(Task) + Send + Sync,
{
    fn execute(&self, task: Task) {
        self(task);
    }
}

impl Executor for Handle {
    fn execute(&self, task: Task) {
        drop(self.spawn_blocking(task));
    }
}

/// Delivers the delegate's callbacks through an [`Executor`].
pub(crate) struct ExecutorCall {
    executor: Arc<dyn Executor>,
    delegate: Arc<dyn ServiceCall>,
}

impl ExecutorCall {
    pub(crate) fn new(executor: Arc<dyn Executor>, delegate: Arc<dyn ServiceCall>) -> Self {
        Self { executor, delegate }
    }
}

impl ServiceCall for ExecutorCall {
    fn request(&self) -> Result<Request, CallError> {
        self.delegate.request()
    }

    fn execute(&self) -> futures::future::BoxFuture<'static, Result<Response<AnyBody>, CallError>> {
        self.delegate.execute()
    }

    fn enqueue(&self, callback: Callback<AnyBody>) -> Result<(), CallError> {
        let executor = Arc::clone(&self.executor);
        let delegate = Arc::clone(&self.delegate);
        self.delegate.enqueue(Box::new(move |outcome: Result<Response<AnyBody>, CallError>| {
            executor.execute(Box::new(move || {
                // A cancel that raced the response still reports cancellation.
                let outcome = if delegate.is_canceled() {
                    Err(CallError::Canceled)
                } else {
                    outcome
                };
                deliver(callback, outcome);
            }));
        }))
    }

    fn is_executed(&self) -> bool {
        self.delegate.is_executed()
    }

    fn cancel(&self) {
        self.delegate.cancel();
    }

    fn is_canceled(&self) -> bool {
        self.delegate.is_canceled()
    }

    fn duplicate(&self) -> Arc<dyn ServiceCall> {
        Arc::new(Self {
            executor: Arc::clone(&self.executor),
            delegate: self.delegate.duplicate(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::test_support::{MockResponse, MockTransport, ping_call};

    #[tokio::test]
    async fn callbacks_run_on_the_executor() {
        let transport = MockTransport::new();
        transport.push(MockResponse::text(200, "pong"));

        let tasks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&tasks);
        let executor: Arc<dyn Executor> = Arc::new(move |task: Task| {
            counter.fetch_add(1, Ordering::SeqCst);
            task();
        });
        let call = ExecutorCall::new(executor, ping_call(&transport));

        let (tx, rx) = futures::channel::oneshot::channel();
        call.enqueue(Box::new(move |outcome: Result<Response<AnyBody>, CallError>| {
            let _ = tx.send(outcome.map(|response| response.status()));
        }))
        .unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), 200);
        assert_eq!(tasks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicates_keep_the_executor() {
        let transport = MockTransport::new();
        let tasks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&tasks);
        let executor: Arc<dyn Executor> = Arc::new(move |task: Task| {
            counter.fetch_add(1, Ordering::SeqCst);
            task();
        });
        let call = ExecutorCall::new(executor, ping_call(&transport));
        call.cancel();

        let again = call.duplicate();
        assert!(!again.is_canceled());
        let (tx, rx) = futures::channel::oneshot::channel();
        again
            .enqueue(Box::new(move |outcome: Result<Response<AnyBody>, CallError>| {
                let _ = tx.send(outcome.is_ok());
            }))
            .unwrap();
        assert!(rx.await.unwrap());
        assert_eq!(tasks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runtime_handles_are_executors() {
        let handle: Arc<dyn Executor> = Arc::new(Handle::current());
        let (tx, rx) = futures::channel::oneshot::channel();
        handle.execute(Box::new(move || {
            let _ = tx.send(std::thread::current().name().map(ToOwned::to_owned));
        }));
        assert!(rx.await.is_ok());
    }
}
