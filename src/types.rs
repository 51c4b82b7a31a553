//! Runtime descriptions of declared parameter and return types.
//!
//! Service methods are described with plain values instead of reflection, so
//! the types they mention are captured as [`DeclaredType`]s: a [`TypeId`], a
//! readable name, and for parameterized wrappers such as [`Call<T>`] the raw
//! family plus the type arguments. Converter and call adapter factories match
//! on these descriptions.
//!
//! [`Call<T>`]: crate::call::Call

use std::{
    any::{Any, TypeId, type_name},
    fmt,
    sync::Arc,
};

/// Identity and name of a single Rust type.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    id: TypeId,
    name: &'static str,
}

impl TypeInfo {
    /// Describes `T`.
    #[must_use]
    pub fn of<T: ?Sized + Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// The type's [`TypeId`].
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The type's name as reported by [`std::any::type_name`].
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this describes `T`.
    #[must_use]
    pub fn is<T: ?Sized + Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Renders a value of the described type as a string, if the value is of
/// that type.
pub type Render = fn(&dyn Any) -> Option<String>;

fn render_display<T: Any + fmt::Display>(value: &dyn Any) -> Option<String> {
    value.downcast_ref::<T>().map(ToString::to_string)
}

/// A type as it appears in a service method declaration.
///
/// Parameterized wrapper types are described twice: by their full type
/// (`Call<Repo>`) and by their raw family, which by convention is the
/// wrapper instantiated with `()` (`Call<()>`). The wrapped types are the
/// [`arguments`](Self::arguments).
#[derive(Clone)]
pub struct DeclaredType {
    info: TypeInfo,
    raw: TypeInfo,
    arguments: Arc<[DeclaredType]>,
    render: Option<Render>,
}

impl DeclaredType {
    /// Describes a non-parameterized type.
    #[must_use]
    pub fn of<T: Any>() -> Self {
        Self {
            info: TypeInfo::of::<T>(),
            raw: TypeInfo::of::<T>(),
            arguments: Arc::new([]),
            render: None,
        }
    }

    /// Describes a type whose values render through [`fmt::Display`].
    ///
    /// The captured rendering is what string-valued parameters fall back to
    /// when no converter factory offers a string converter.
    #[must_use]
    pub fn displayable<T: Any + fmt::Display>() -> Self {
        Self {
            render: Some(render_display::<T>),
            ..Self::of::<T>()
        }
    }

    /// Describes the parameterized type `T`, whose raw family is `Raw`.
    #[must_use]
    pub fn parameterized<T: Any, Raw: Any>(arguments: impl IntoIterator<Item = DeclaredType>) -> Self {
        Self {
            info: TypeInfo::of::<T>(),
            raw: TypeInfo::of::<Raw>(),
            arguments: arguments.into_iter().collect(),
            render: None,
        }
    }

    /// The full type.
    #[must_use]
    pub fn info(&self) -> TypeInfo {
        self.info
    }

    /// The full type's [`TypeId`].
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.info.id
    }

    /// The full type's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.info.name
    }

    /// The raw family of a parameterized type, or the type itself.
    #[must_use]
    pub fn raw(&self) -> TypeInfo {
        self.raw
    }

    /// Whether this describes `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.info.is::<T>()
    }

    /// Whether the raw family is `Raw`.
    #[must_use]
    pub fn raw_is<Raw: Any>(&self) -> bool {
        self.raw.is::<Raw>()
    }

    /// The type arguments of a parameterized type.
    #[must_use]
    pub fn arguments(&self) -> &[DeclaredType] {
        &self.arguments
    }

    /// The type argument at `index`.
    #[must_use]
    pub fn argument(&self, index: usize) -> Option<&DeclaredType> {
        self.arguments.get(index)
    }

    /// Whether a [`fmt::Display`] implementation was captured for this type.
    #[must_use]
    pub fn is_displayable(&self) -> bool {
        self.render.is_some()
    }

    /// Renders `value` with the captured [`fmt::Display`] implementation.
    ///
    /// Returns `None` when the type was not declared displayable or `value`
    /// is of another type.
    #[must_use]
    pub fn render(&self, value: &dyn Any) -> Option<String> {
        self.render.and_then(|render| render(value))
    }
}

impl PartialEq for DeclaredType {
    fn eq(&self, other: &Self) -> bool {
        self.info == other.info && self.raw == other.raw && self.arguments == other.arguments
    }
}

impl fmt::Debug for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.info.name)
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.info.name)
    }
}

/// Typed markers attached to a method or parameter.
///
/// Annotations carry information that the built-in tags do not, such as
/// [`Streaming`] or a custom qualifier a converter factory looks for.
#[derive(Clone, Default)]
pub struct Annotations(Vec<Arc<dyn Any + Send + Sync>>);

impl Annotations {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a marker.
    pub fn push<A: Any + Send + Sync>(&mut self, annotation: A) {
        self.0.push(Arc::new(annotation));
    }

    /// Returns the first marker of type `A`.
    #[must_use]
    pub fn get<A: Any>(&self) -> Option<&A> {
        self.0.iter().find_map(|a| a.as_ref().downcast_ref::<A>())
    }

    /// Whether a marker of type `A` is present.
    #[must_use]
    pub fn contains<A: Any>(&self) -> bool {
        self.get::<A>().is_some()
    }

    /// Number of markers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no markers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Annotations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Annotations")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Method marker: deliver [`ResponseBody`](crate::response::ResponseBody)
/// results without buffering them first.
#[derive(Debug, Clone, Copy, Default)]
pub struct Streaming;

/// Method marker: run callbacks directly instead of on the configured
/// callback executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipCallbackExecutor;

/// The trailing continuation parameter of a suspending method.
///
/// A parameter of this type in last position carries no request data and is
/// ignored while building requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct Continuation;

#[cfg(test)]
mod tests {
    use super::*;

    struct Wrapper<T>(T);

    #[test]
    fn parameterized_types_keep_family_and_arguments() {
        let ty = DeclaredType::parameterized::<Wrapper<String>, Wrapper<()>>([
            DeclaredType::of::<String>(),
        ]);
        assert!(ty.is::<Wrapper<String>>());
        assert!(ty.raw_is::<Wrapper<()>>());
        assert!(ty.argument(0).is_some_and(DeclaredType::is::<String>));
        assert!(ty.argument(1).is_none());
    }

    #[test]
    fn displayable_types_render_their_values() {
        let ty = DeclaredType::displayable::<u32>();
        assert_eq!(ty.render(&42_u32).as_deref(), Some("42"));
        assert_eq!(ty.render(&"42"), None);
        assert_eq!(DeclaredType::of::<u32>().render(&42_u32), None);
    }

    #[test]
    fn annotations_are_found_by_type() {
        #[derive(Debug, PartialEq)]
        struct Qualifier(&'static str);

        let mut annotations = Annotations::new();
        annotations.push(Streaming);
        annotations.push(Qualifier("trimmed"));
        assert!(annotations.contains::<Streaming>());
        assert_eq!(annotations.get::<Qualifier>(), Some(&Qualifier("trimmed")));
        assert!(!annotations.contains::<SkipCallbackExecutor>());
    }
}
