//! Declarative descriptions of service methods.
//!
//! A [`MethodDescriptor`] says everything the request compiler needs to know
//! about one endpoint: its HTTP verb and path template, static headers, body
//! encoding, each parameter's shape and tag, and the declared return type.
//! Descriptors are usually built once and kept in a `static`:
//!
//! ```
//! use std::sync::LazyLock;
//! use courier::{call::Call, descriptor::{MethodDescriptor, Param}};
//!
//! static CONTRIBUTORS: LazyLock<MethodDescriptor> = LazyLock::new(|| {
//!     MethodDescriptor::builder("GitHub", "contributors")
//!         .get("repos/{owner}/{repo}/contributors")
//!         .param(Param::scalar::<String>().path("owner"))
//!         .param(Param::scalar::<String>().path("repo"))
//!         .param(Param::scalar::<u32>().query("per_page"))
//!         .returns::<Call<String>>()
//!         .build()
//! });
//! ```

use std::{any::Any, borrow::Cow, fmt};

use http::Method;

use crate::{
    adapter::ReturnType,
    types::{Annotations, Continuation, DeclaredType},
};

/// Identifies a service method: the declaring service and the method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    service: Cow<'static, str>,
    method: Cow<'static, str>,
}

impl MethodKey {
    /// Creates a key from a service and method name.
    pub fn new(
        service: impl Into<Cow<'static, str>>,
        method: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    /// The declaring service.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.method)
    }
}

/// A method-level tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodTag {
    /// The HTTP verb and the relative URL template.
    Http {
        /// The verb.
        method: Method,
        /// The relative URL template, possibly empty.
        path: Cow<'static, str>,
        /// Whether requests with this verb carry a body.
        has_body: bool,
    },
    /// Static headers, each in the form `Name: Value`.
    Headers(Vec<Cow<'static, str>>),
    /// The request body is `multipart/form-data`.
    Multipart,
    /// The request body is `application/x-www-form-urlencoded`.
    FormUrlEncoded,
}

/// The default `Content-Transfer-Encoding` of multipart parts.
pub const DEFAULT_PART_ENCODING: &str = "binary";

/// A parameter-level tag: how an argument contributes to the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamTag {
    /// The argument is the request URL, absolute or relative to the base.
    Url,
    /// The argument replaces `{name}` in the URL template.
    Path {
        /// The placeholder name.
        name: Cow<'static, str>,
        /// Whether the value is already percent-encoded.
        encoded: bool,
    },
    /// The argument is appended as a `name=value` query parameter.
    Query {
        /// The query parameter name.
        name: Cow<'static, str>,
        /// Whether the value is already percent-encoded.
        encoded: bool,
    },
    /// The argument is appended as a valueless query parameter.
    QueryName {
        /// Whether the name is already percent-encoded.
        encoded: bool,
    },
    /// Each map entry is appended as a query parameter.
    QueryMap {
        /// Whether names and values are already percent-encoded.
        encoded: bool,
    },
    /// The argument is sent as a header.
    Header {
        /// The header name.
        name: Cow<'static, str>,
    },
    /// Each map entry, or each entry of an [`http::HeaderMap`], is sent as a
    /// header.
    HeaderMap,
    /// The argument is a form field.
    Field {
        /// The field name.
        name: Cow<'static, str>,
        /// Whether the value is already percent-encoded.
        encoded: bool,
    },
    /// Each map entry is a form field.
    FieldMap {
        /// Whether names and values are already percent-encoded.
        encoded: bool,
    },
    /// The argument is a multipart part.
    ///
    /// An empty name means the argument is a complete
    /// [`Part`](crate::body::Part).
    Part {
        /// The form-data name of the part.
        name: Cow<'static, str>,
        /// The `Content-Transfer-Encoding` of the part.
        encoding: Cow<'static, str>,
    },
    /// Each map entry is a multipart part named by its key.
    PartMap {
        /// The `Content-Transfer-Encoding` of the parts.
        encoding: Cow<'static, str>,
    },
    /// The argument is the request body.
    Body,
    /// The argument is attached to the request, keyed by its type.
    Tag,
}

impl ParamTag {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Url => "@Url",
            Self::Path { .. } => "@Path",
            Self::Query { .. } => "@Query",
            Self::QueryName { .. } => "@QueryName",
            Self::QueryMap { .. } => "@QueryMap",
            Self::Header { .. } => "@Header",
            Self::HeaderMap => "@HeaderMap",
            Self::Field { .. } => "@Field",
            Self::FieldMap { .. } => "@FieldMap",
            Self::Part { .. } => "@Part",
            Self::PartMap { .. } => "@PartMap",
            Self::Body => "@Body",
            Self::Tag => "@Tag",
        }
    }
}

/// How many values a parameter carries.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamShape {
    /// One value of the given type.
    Scalar(DeclaredType),
    /// An iterable collection of the element type.
    Iterable(DeclaredType),
    /// An array of the element type.
    Array(DeclaredType),
    /// A map from key type to value type.
    Map {
        /// The key type.
        key: DeclaredType,
        /// The value type.
        value: DeclaredType,
    },
}

impl ParamShape {
    /// The element type: the scalar, the collection element or the map value.
    #[must_use]
    pub fn element(&self) -> &DeclaredType {
        match self {
            Self::Scalar(ty) | Self::Iterable(ty) | Self::Array(ty) => ty,
            Self::Map { value, .. } => value,
        }
    }
}

/// One parameter of a service method.
#[derive(Debug, Clone)]
pub struct Param {
    shape: ParamShape,
    tags: Vec<ParamTag>,
    annotations: Annotations,
}

impl Param {
    /// A parameter of the given shape, with no tags yet.
    #[must_use]
    pub fn new(shape: ParamShape) -> Self {
        Self {
            shape,
            tags: Vec::new(),
            annotations: Annotations::new(),
        }
    }

    /// A single displayable value.
    #[must_use]
    pub fn scalar<T: Any + fmt::Display>() -> Self {
        Self::new(ParamShape::Scalar(DeclaredType::displayable::<T>()))
    }

    /// A single value of any type, such as a body or a tag.
    #[must_use]
    pub fn of<T: Any>() -> Self {
        Self::new(ParamShape::Scalar(DeclaredType::of::<T>()))
    }

    /// A single value of an explicitly described type.
    #[must_use]
    pub fn declared(ty: DeclaredType) -> Self {
        Self::new(ParamShape::Scalar(ty))
    }

    /// An iterable of displayable values.
    #[must_use]
    pub fn list<T: Any + fmt::Display>() -> Self {
        Self::new(ParamShape::Iterable(DeclaredType::displayable::<T>()))
    }

    /// An iterable of values of any type, such as multipart parts.
    #[must_use]
    pub fn list_of<T: Any>() -> Self {
        Self::new(ParamShape::Iterable(DeclaredType::of::<T>()))
    }

    /// An array of displayable values.
    #[must_use]
    pub fn array<T: Any + fmt::Display>() -> Self {
        Self::new(ParamShape::Array(DeclaredType::displayable::<T>()))
    }

    /// A map with displayable values.
    #[must_use]
    pub fn map<K: Any, V: Any + fmt::Display>() -> Self {
        Self::new(ParamShape::Map {
            key: DeclaredType::of::<K>(),
            value: DeclaredType::displayable::<V>(),
        })
    }

    /// A map with values of any type.
    #[must_use]
    pub fn map_of<K: Any, V: Any>() -> Self {
        Self::new(ParamShape::Map {
            key: DeclaredType::of::<K>(),
            value: DeclaredType::of::<V>(),
        })
    }

    /// The trailing continuation of a suspending method.
    #[must_use]
    pub fn continuation() -> Self {
        Self::of::<Continuation>()
    }

    /// Adds a tag.
    #[must_use]
    pub fn tag_with(mut self, tag: ParamTag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Adds a marker annotation.
    #[must_use]
    pub fn annotation<A: Any + Send + Sync>(mut self, annotation: A) -> Self {
        self.annotations.push(annotation);
        self
    }

    /// Tags the parameter as the request URL.
    #[must_use]
    pub fn url(self) -> Self {
        self.tag_with(ParamTag::Url)
    }

    /// Tags the parameter as the `{name}` path placeholder.
    #[must_use]
    pub fn path(self, name: impl Into<Cow<'static, str>>) -> Self {
        self.tag_with(ParamTag::Path {
            name: name.into(),
            encoded: false,
        })
    }

    /// Tags the parameter as a query parameter.
    #[must_use]
    pub fn query(self, name: impl Into<Cow<'static, str>>) -> Self {
        self.tag_with(ParamTag::Query {
            name: name.into(),
            encoded: false,
        })
    }

    /// Tags the parameter as a valueless query parameter.
    #[must_use]
    pub fn query_name(self) -> Self {
        self.tag_with(ParamTag::QueryName { encoded: false })
    }

    /// Tags the parameter as a map of query parameters.
    #[must_use]
    pub fn query_map(self) -> Self {
        self.tag_with(ParamTag::QueryMap { encoded: false })
    }

    /// Tags the parameter as a header.
    #[must_use]
    pub fn header(self, name: impl Into<Cow<'static, str>>) -> Self {
        self.tag_with(ParamTag::Header { name: name.into() })
    }

    /// Tags the parameter as a set of headers.
    #[must_use]
    pub fn header_map(self) -> Self {
        self.tag_with(ParamTag::HeaderMap)
    }

    /// Tags the parameter as a form field.
    #[must_use]
    pub fn field(self, name: impl Into<Cow<'static, str>>) -> Self {
        self.tag_with(ParamTag::Field {
            name: name.into(),
            encoded: false,
        })
    }

    /// Tags the parameter as a map of form fields.
    #[must_use]
    pub fn field_map(self) -> Self {
        self.tag_with(ParamTag::FieldMap { encoded: false })
    }

    /// Tags the parameter as a named multipart part.
    #[must_use]
    pub fn part(self, name: impl Into<Cow<'static, str>>) -> Self {
        self.tag_with(ParamTag::Part {
            name: name.into(),
            encoding: Cow::Borrowed(DEFAULT_PART_ENCODING),
        })
    }

    /// Tags the parameter as one or more complete [`Part`](crate::body::Part)s.
    #[must_use]
    pub fn raw_part(self) -> Self {
        self.part("")
    }

    /// Tags the parameter as a map of multipart parts.
    #[must_use]
    pub fn part_map(self) -> Self {
        self.tag_with(ParamTag::PartMap {
            encoding: Cow::Borrowed(DEFAULT_PART_ENCODING),
        })
    }

    /// Tags the parameter as the request body.
    #[must_use]
    pub fn body(self) -> Self {
        self.tag_with(ParamTag::Body)
    }

    /// Tags the parameter as a request tag.
    #[must_use]
    pub fn tag(self) -> Self {
        self.tag_with(ParamTag::Tag)
    }

    /// Marks the values of the most recent tag as already percent-encoded.
    #[must_use]
    pub fn encoded(mut self) -> Self {
        if let Some(
            ParamTag::Path { encoded, .. }
            | ParamTag::Query { encoded, .. }
            | ParamTag::QueryName { encoded }
            | ParamTag::QueryMap { encoded }
            | ParamTag::Field { encoded, .. }
            | ParamTag::FieldMap { encoded },
        ) = self.tags.last_mut()
        {
            *encoded = true;
        }
        self
    }

    /// Sets the `Content-Transfer-Encoding` of the most recent part tag.
    #[must_use]
    pub fn encoding(mut self, value: impl Into<Cow<'static, str>>) -> Self {
        if let Some(ParamTag::Part { encoding, .. } | ParamTag::PartMap { encoding }) =
            self.tags.last_mut()
        {
            *encoding = value.into();
        }
        self
    }

    /// The parameter's shape.
    #[must_use]
    pub fn shape(&self) -> &ParamShape {
        &self.shape
    }

    /// The parameter's tags.
    #[must_use]
    pub fn tags(&self) -> &[ParamTag] {
        &self.tags
    }

    /// The parameter's marker annotations.
    #[must_use]
    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }
}

/// The complete declaration of one service method.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    key: MethodKey,
    tags: Vec<MethodTag>,
    annotations: Annotations,
    params: Vec<Param>,
    return_type: DeclaredType,
}

impl MethodDescriptor {
    /// Starts describing `service.method`.
    pub fn builder(
        service: impl Into<Cow<'static, str>>,
        method: impl Into<Cow<'static, str>>,
    ) -> MethodDescriptorBuilder {
        MethodDescriptorBuilder {
            descriptor: Self {
                key: MethodKey::new(service, method),
                tags: Vec::new(),
                annotations: Annotations::new(),
                params: Vec::new(),
                return_type: DeclaredType::of::<()>(),
            },
        }
    }

    /// The method's identity.
    #[must_use]
    pub fn key(&self) -> &MethodKey {
        &self.key
    }

    /// The method-level tags, in declaration order.
    #[must_use]
    pub fn tags(&self) -> &[MethodTag] {
        &self.tags
    }

    /// The method-level marker annotations.
    #[must_use]
    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    /// The parameters, in declaration order.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// The declared return type.
    #[must_use]
    pub fn return_type(&self) -> &DeclaredType {
        &self.return_type
    }
}

/// Builds a [`MethodDescriptor`]. Nothing is validated until the method is
/// compiled.
#[derive(Debug)]
#[must_use]
pub struct MethodDescriptorBuilder {
    descriptor: MethodDescriptor,
}

impl MethodDescriptorBuilder {
    /// Adds an HTTP verb tag with an explicit body flag.
    pub fn http(self, method: Method, path: impl Into<Cow<'static, str>>, has_body: bool) -> Self {
        self.tag(MethodTag::Http {
            method,
            path: path.into(),
            has_body,
        })
    }

    /// `GET path`.
    pub fn get(self, path: impl Into<Cow<'static, str>>) -> Self {
        self.http(Method::GET, path, false)
    }

    /// `POST path`.
    pub fn post(self, path: impl Into<Cow<'static, str>>) -> Self {
        self.http(Method::POST, path, true)
    }

    /// `PUT path`.
    pub fn put(self, path: impl Into<Cow<'static, str>>) -> Self {
        self.http(Method::PUT, path, true)
    }

    /// `PATCH path`.
    pub fn patch(self, path: impl Into<Cow<'static, str>>) -> Self {
        self.http(Method::PATCH, path, true)
    }

    /// `DELETE path`.
    pub fn delete(self, path: impl Into<Cow<'static, str>>) -> Self {
        self.http(Method::DELETE, path, false)
    }

    /// `HEAD path`.
    pub fn head(self, path: impl Into<Cow<'static, str>>) -> Self {
        self.http(Method::HEAD, path, false)
    }

    /// `OPTIONS path`.
    pub fn options(self, path: impl Into<Cow<'static, str>>) -> Self {
        self.http(Method::OPTIONS, path, false)
    }

    /// Adds static headers, each in the form `Name: Value`.
    pub fn headers<I, S>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        self.tag(MethodTag::Headers(
            headers.into_iter().map(Into::into).collect(),
        ))
    }

    /// Declares a `multipart/form-data` body.
    pub fn multipart(self) -> Self {
        self.tag(MethodTag::Multipart)
    }

    /// Declares an `application/x-www-form-urlencoded` body.
    pub fn form_url_encoded(self) -> Self {
        self.tag(MethodTag::FormUrlEncoded)
    }

    /// Adds a method-level tag.
    pub fn tag(mut self, tag: MethodTag) -> Self {
        self.descriptor.tags.push(tag);
        self
    }

    /// Adds a method-level marker annotation.
    pub fn annotation<A: Any + Send + Sync>(mut self, annotation: A) -> Self {
        self.descriptor.annotations.push(annotation);
        self
    }

    /// Appends a parameter.
    pub fn param(mut self, param: Param) -> Self {
        self.descriptor.params.push(param);
        self
    }

    /// Declares the return type.
    pub fn returns<R: ReturnType>(self) -> Self {
        self.returns_type(R::declared_type())
    }

    /// Declares the return type from an explicit description.
    pub fn returns_type(mut self, return_type: DeclaredType) -> Self {
        self.descriptor.return_type = return_type;
        self
    }

    /// Finishes the descriptor.
    #[must_use]
    pub fn build(self) -> MethodDescriptor {
        self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifiers_apply_to_the_latest_tag() {
        let param = Param::scalar::<String>()
            .path("id")
            .encoded()
            .part("file")
            .encoding("8-bit");
        assert_eq!(
            param.tags(),
            &[
                ParamTag::Path {
                    name: "id".into(),
                    encoded: true
                },
                ParamTag::Part {
                    name: "file".into(),
                    encoding: "8-bit".into()
                },
            ]
        );
    }

    #[test]
    fn verb_shortcuts_set_body_flag() {
        let descriptor = MethodDescriptor::builder("Service", "method")
            .delete("items/{id}")
            .put("items/{id}")
            .build();
        assert_eq!(
            descriptor.tags(),
            &[
                MethodTag::Http {
                    method: Method::DELETE,
                    path: "items/{id}".into(),
                    has_body: false
                },
                MethodTag::Http {
                    method: Method::PUT,
                    path: "items/{id}".into(),
                    has_body: true
                },
            ]
        );
        assert_eq!(descriptor.key().to_string(), "Service.method");
    }
}
