//! Imports for syntax extensions.

pub use crate::IntoBaseUrl as _;
pub use crate::adapter::ReturnType as _;
