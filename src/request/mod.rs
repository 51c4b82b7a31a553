//! Building requests from compiled service methods.
//!
//! [`RequestFactory`] is the compiled, immutable plan for one service
//! method. Each invocation runs the plan's parameter actions against the
//! invocation's arguments on a fresh [`RequestBuilder`], which produces one
//! [`Request`].

mod action;
mod builder;
mod error;
mod factory;

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use crate::{arg::Arg, body::RequestBody, descriptor::MethodKey};

pub(crate) use builder::RequestBuilder;
pub use error::RequestError;
pub(crate) use factory::RequestFactory;

/// A request ready for the transport.
///
/// The media type of the body travels with the body; a `Content-Type`
/// header is only present when the request has no body.
pub type Request = http::Request<Option<RequestBody>>;

/// Values attached to a request by `Tag` parameters, keyed by the
/// parameter's declared type.
///
/// Found in the request's extensions.
#[derive(Clone, Default)]
pub struct Tags(HashMap<TypeId, Arc<dyn Any + Send + Sync>>);

impl Tags {
    /// The tag of type `T`, if one was attached.
    #[must_use]
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0
            .get(&TypeId::of::<T>())
            .and_then(|value| value.as_ref().downcast_ref::<T>())
    }

    /// Number of tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no tags are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn insert(&mut self, type_id: TypeId, value: Arc<dyn Any + Send + Sync>) {
        self.0.insert(type_id, value);
    }

    pub(crate) fn remove(&mut self, type_id: TypeId) {
        self.0.remove(&type_id);
    }
}

impl fmt::Debug for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tags").field("len", &self.0.len()).finish()
    }
}

/// The service method and arguments a request was built from.
///
/// Every request carries one in its extensions.
#[derive(Debug, Clone)]
pub struct Invocation {
    method: MethodKey,
    arguments: Arc<[Arg]>,
}

impl Invocation {
    pub(crate) fn new(method: MethodKey, arguments: Arc<[Arg]>) -> Self {
        Self { method, arguments }
    }

    /// The invoked method.
    #[must_use]
    pub fn method(&self) -> &MethodKey {
        &self.method
    }

    /// The invocation's arguments.
    #[must_use]
    pub fn arguments(&self) -> &[Arg] {
        &self.arguments
    }
}

/// Copies a request, including its extensions.
#[must_use]
pub fn clone_request(request: &Request) -> Request {
    let mut copy = http::Request::new(request.body().clone());
    *copy.method_mut() = request.method().clone();
    *copy.uri_mut() = request.uri().clone();
    *copy.version_mut() = request.version();
    *copy.headers_mut() = request.headers().clone();
    *copy.extensions_mut() = request.extensions().clone();
    copy
}
