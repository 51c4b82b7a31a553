//! Declarative HTTP service clients.
//!
//! A service method is described once by a [`MethodDescriptor`]: its verb,
//! URL template, headers, body encoding, the role of each parameter and the
//! return type. A [`Courier`] compiles each descriptor the first time it is
//! used, resolving converters and a call adapter up front, and then turns
//! every invocation into a request sent through a pluggable transport.
//!
//! [`MethodDescriptor`]: descriptor::MethodDescriptor

#![forbid(unsafe_code)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod adapter;
pub mod arg;
mod base_url;
pub mod body;
pub mod call;
pub mod converter;
mod courier;
pub mod descriptor;
mod error;
pub mod http;
pub mod prelude;
pub mod request;
pub mod response;
mod service_method;
pub mod types;
mod url_template;

#[cfg(test)]
mod test_support;

pub use base_url::{BaseUrl, BaseUrlError, IntoBaseUrl};
pub use courier::{Courier, Service};
pub use error::{BoxedError, CompileError, Error, MessageError};

/// Documentation
pub mod _documentation {
    #[doc = include_str!("../README.md")]
    mod readme {}
}

pub use bytes::Bytes;
