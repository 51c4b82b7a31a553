//! Call adapters: turning a [`Call`] into a service method's return type.
//!
//! The [`Courier`] asks its [`CallAdapterFactory`]s, in order, for an
//! adapter for each method's declared return type. User factories come
//! first, followed by [`FutureCallAdapterFactory`] and finally
//! [`DefaultCallAdapterFactory`], which handles [`Call<T>`] itself.

mod default;
mod future;

use std::{
    any::{Any, type_name},
    sync::Arc,
};

use crate::{
    Courier,
    call::Call,
    response::AnyBody,
    types::{Annotations, DeclaredType},
};

pub use default::DefaultCallAdapterFactory;
pub use future::{CallFuture, FutureCallAdapterFactory, ResponseFuture};

/// Adapts a call into a value of the method's return type.
pub trait CallAdapter: Send + Sync {
    /// The type the response body is converted to before adaptation.
    ///
    /// For a `Call<Repo>` return type this is `Repo`.
    fn response_type(&self) -> &DeclaredType;

    /// Wraps `call`, whose bodies are of the response type.
    fn adapt(&self, call: Call<AnyBody>) -> Box<dyn Any + Send>;
}

/// Produces call adapters for the return types it understands.
pub trait CallAdapterFactory: Send + Sync + 'static {
    /// An adapter for `return_type`, or `None` if it is not handled here.
    ///
    /// `annotations` are the method's. Factories that decorate another
    /// adapter may look it up with [`Courier::next_call_adapter`].
    fn get(
        &self,
        return_type: &DeclaredType,
        annotations: &Annotations,
        courier: &Courier,
    ) -> Option<Arc<dyn CallAdapter>>;

    /// The name shown in lookup failures.
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// A type a service method may return.
///
/// `declared_type` describes the type to the adapter factories, and
/// `from_adapted` recovers it from what the chosen adapter produced.
pub trait ReturnType: Sized + Send + 'static {
    /// The description adapter factories match on.
    fn declared_type() -> DeclaredType;

    /// Recovers the value from an adapter's output.
    ///
    /// # Errors
    ///
    /// Hands the value back when it is not of this type.
    fn from_adapted(adapted: Box<dyn Any + Send>) -> Result<Self, Box<dyn Any + Send>> {
        adapted.downcast::<Self>().map(|value| *value)
    }
}

impl<T: Send + 'static> ReturnType for Call<T> {
    fn declared_type() -> DeclaredType {
        DeclaredType::parameterized::<Self, Call<()>>([DeclaredType::of::<T>()])
    }

    fn from_adapted(adapted: Box<dyn Any + Send>) -> Result<Self, Box<dyn Any + Send>> {
        let adapted = match adapted.downcast::<Self>() {
            Ok(call) => return Ok(*call),
            Err(adapted) => adapted,
        };
        adapted
            .downcast::<Call<AnyBody>>()
            .map(|call| (*call).typed::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_return_types_expose_their_body_type() {
        let ty = <Call<String> as ReturnType>::declared_type();
        assert!(ty.raw_is::<Call<()>>());
        assert!(ty.is::<Call<String>>());
        assert!(ty.argument(0).is_some_and(DeclaredType::is::<String>));
    }

    #[test]
    fn other_values_are_handed_back() {
        let adapted: Box<dyn Any + Send> = Box::new(5_u8);
        let rejected = <Call<String> as ReturnType>::from_adapted(adapted).unwrap_err();
        assert_eq!(rejected.downcast_ref::<u8>(), Some(&5));
    }
}
