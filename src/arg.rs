//! Argument values passed to a service method invocation.

use std::{any::Any, fmt, sync::Arc};

/// One argument of a service method invocation.
///
/// The shape mirrors the declared [`ParamShape`](crate::descriptor::ParamShape):
/// scalars are [`Arg::Value`], iterables and arrays are [`Arg::List`] and maps
/// are [`Arg::Map`]. [`Arg::Null`] is an absent value; whether that is
/// permitted depends on the parameter's tag.
#[derive(Clone)]
pub enum Arg {
    /// No value.
    Null,
    /// A single value.
    Value(Arc<dyn Any + Send + Sync>),
    /// A sequence of values.
    List(Vec<Arg>),
    /// Key/value pairs, in iteration order. Keys may be absent.
    Map(Vec<(Option<String>, Arg)>),
}

impl Arg {
    /// A single value.
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Self::Value(Arc::new(value))
    }

    /// A single value, or [`Arg::Null`] for `None`.
    pub fn optional<T: Any + Send + Sync>(value: Option<T>) -> Self {
        value.map_or(Self::Null, Self::value)
    }

    /// A sequence of values.
    pub fn list<T: Any + Send + Sync>(items: impl IntoIterator<Item = T>) -> Self {
        Self::List(items.into_iter().map(Self::value).collect())
    }

    /// A sequence of values, some of which may be absent.
    pub fn optional_list<T: Any + Send + Sync>(items: impl IntoIterator<Item = Option<T>>) -> Self {
        Self::List(items.into_iter().map(Self::optional).collect())
    }

    /// Key/value pairs.
    pub fn map<K: Into<String>, V: Any + Send + Sync>(
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Some(k.into()), Self::value(v)))
                .collect(),
        )
    }

    /// Key/value pairs where keys or values may be absent.
    pub fn optional_map<V: Any + Send + Sync>(
        entries: impl IntoIterator<Item = (Option<String>, Option<V>)>,
    ) -> Self {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k, Self::optional(v)))
                .collect(),
        )
    }

    /// Whether this is [`Arg::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the value when this is an [`Arg::Value`] of type `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Value(value) => value.as_ref().downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Value(_) => f.write_str("Value(..)"),
            Self::List(items) => f.debug_list().entries(items).finish(),
            Self::Map(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(k, v)| (k, v)))
                .finish(),
        }
    }
}
