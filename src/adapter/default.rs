use std::{any::Any, sync::Arc};

use super::{CallAdapter, CallAdapterFactory};
use crate::{
    Courier,
    call::{Call, Executor, ExecutorCall},
    response::AnyBody,
    types::{Annotations, DeclaredType, SkipCallbackExecutor},
};

/// Returns [`Call<T>`] as is.
///
/// With a callback executor, enqueued calls deliver their outcome through
/// it, unless the method carries [`SkipCallbackExecutor`].
#[derive(Default)]
pub struct DefaultCallAdapterFactory {
    callback_executor: Option<Arc<dyn Executor>>,
}

impl DefaultCallAdapterFactory {
    /// A factory delivering callbacks through `callback_executor`, if any.
    #[must_use]
    pub fn new(callback_executor: Option<Arc<dyn Executor>>) -> Self {
        Self { callback_executor }
    }
}

impl CallAdapterFactory for DefaultCallAdapterFactory {
    fn get(
        &self,
        return_type: &DeclaredType,
        annotations: &Annotations,
        _courier: &Courier,
    ) -> Option<Arc<dyn CallAdapter>> {
        if !return_type.raw_is::<Call<()>>() {
            return None;
        }
        let executor = if annotations.contains::<SkipCallbackExecutor>() {
            None
        } else {
            self.callback_executor.clone()
        };
        Some(Arc::new(CallPassthrough {
            response_type: return_type.argument(0)?.clone(),
            executor,
        }))
    }

    fn name(&self) -> &'static str {
        "DefaultCallAdapterFactory"
    }
}

struct CallPassthrough {
    response_type: DeclaredType,
    executor: Option<Arc<dyn Executor>>,
}

impl CallAdapter for CallPassthrough {
    fn response_type(&self) -> &DeclaredType {
        &self.response_type
    }

    fn adapt(&self, call: Call<AnyBody>) -> Box<dyn Any + Send> {
        match &self.executor {
            Some(executor) => Box::new(Call::erased(Arc::new(ExecutorCall::new(
                Arc::clone(executor),
                Arc::clone(call.inner()),
            )))),
            None => Box::new(call),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        adapter::ReturnType,
        call::{CallError, Task},
        response::Response,
        test_support::{MockResponse, MockTransport, courier, ping_call},
    };

    fn counting_executor() -> (Arc<dyn Executor>, Arc<AtomicUsize>) {
        let tasks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&tasks);
        let executor: Arc<dyn Executor> = Arc::new(move |task: Task| {
            counter.fetch_add(1, Ordering::SeqCst);
            task();
        });
        (executor, tasks)
    }

    async fn run(call: Call<String>) -> String {
        let (tx, rx) = futures::channel::oneshot::channel();
        call.enqueue(move |outcome: Result<Response<String>, CallError>| {
            let _ = tx.send(outcome.map(|response| response.into_body()));
        })
        .unwrap();
        rx.await.unwrap().unwrap().unwrap()
    }

    #[test]
    fn only_calls_are_handled() {
        let courier = courier(&MockTransport::new());
        let factory = DefaultCallAdapterFactory::default();
        let adapter = factory
            .get(&Call::<u32>::declared_type(), &Annotations::new(), &courier)
            .unwrap();
        assert!(adapter.response_type().is::<u32>());
        assert!(
            factory
                .get(&DeclaredType::of::<String>(), &Annotations::new(), &courier)
                .is_none()
        );
    }

    #[tokio::test]
    async fn callbacks_use_the_executor() {
        let transport = MockTransport::new();
        transport.push(MockResponse::text(200, "pong"));
        let courier = courier(&transport);
        let (executor, tasks) = counting_executor();

        let adapter = DefaultCallAdapterFactory::new(Some(executor))
            .get(&Call::<String>::declared_type(), &Annotations::new(), &courier)
            .unwrap();
        let adapted = adapter.adapt(Call::erased(ping_call(&transport)));
        let call = Call::<String>::from_adapted(adapted).unwrap();
        assert_eq!(run(call).await, "pong");
        assert_eq!(tasks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn methods_can_skip_the_executor() {
        let transport = MockTransport::new();
        transport.push(MockResponse::text(200, "pong"));
        let courier = courier(&transport);
        let (executor, tasks) = counting_executor();
        let mut annotations = Annotations::new();
        annotations.push(SkipCallbackExecutor);

        let adapter = DefaultCallAdapterFactory::new(Some(executor))
            .get(&Call::<String>::declared_type(), &annotations, &courier)
            .unwrap();
        let adapted = adapter.adapt(Call::erased(ping_call(&transport)));
        let call = Call::<String>::from_adapted(adapted).unwrap();
        assert_eq!(run(call).await, "pong");
        assert_eq!(tasks.load(Ordering::SeqCst), 0);
    }
}
