use std::{any::TypeId, sync::Arc};

use http::{HeaderMap, HeaderName, HeaderValue, Method, header::CONTENT_TYPE};
use mime::Mime;
use snafu::prelude::*;
use url::Url;

use super::{
    Invocation, Request,
    action::{CONTENT_TRANSFER_ENCODING, Cardinality, ParameterAction, ParameterHandler},
    builder::{BodyEncoding, RequestBuilder},
    error::{ArgumentCountSnafu, RequestError},
};
use crate::{
    Courier,
    arg::Arg,
    body::{Part, form_data_disposition},
    converter::StringConverter,
    descriptor::{MethodDescriptor, MethodKey, MethodTag, Param, ParamShape, ParamTag},
    error::CompileError,
    types::{Continuation, DeclaredType},
    url_template::{PARAM_PATTERN, is_valid_param_name, parse_path_params, placeholder_in_query},
};

/// The compiled request plan of one service method.
pub(crate) struct RequestFactory {
    method: MethodKey,
    base_url: Url,
    http_method: Method,
    relative_url: Option<String>,
    headers: HeaderMap,
    content_type: Option<Mime>,
    has_body: bool,
    encoding: BodyEncoding,
    handlers: Vec<ParameterHandler>,
}

impl RequestFactory {
    /// Validates `descriptor` and resolves every parameter's converter.
    pub(crate) fn parse(courier: &Courier, descriptor: &MethodDescriptor) -> Result<Self, CompileError> {
        Parser::new(courier, descriptor).parse()
    }

    pub(crate) fn method_key(&self) -> &MethodKey {
        &self.method
    }

    pub(crate) fn http_method(&self) -> &Method {
        &self.http_method
    }

    /// Builds the request for one invocation.
    pub(crate) fn create(&self, arguments: &Arc<[Arg]>) -> Result<Request, RequestError> {
        ensure!(
            arguments.len() == self.handlers.len(),
            ArgumentCountSnafu {
                actual: arguments.len(),
                expected: self.handlers.len(),
            }
        );

        let mut builder = RequestBuilder::new(
            self.http_method.clone(),
            &self.base_url,
            self.relative_url.as_deref(),
            self.headers.clone(),
            self.content_type.clone(),
            self.has_body,
            self.encoding,
        );
        for (handler, argument) in self.handlers.iter().zip(arguments.iter()) {
            handler.apply(&mut builder, argument)?;
        }

        let mut request = builder.build()?;
        request
            .extensions_mut()
            .insert(Invocation::new(self.method.clone(), Arc::clone(arguments)));
        Ok(request)
    }
}

struct Parser<'a> {
    courier: &'a Courier,
    descriptor: &'a MethodDescriptor,
    http_method: Option<Method>,
    has_body: bool,
    is_form_encoded: bool,
    is_multipart: bool,
    relative_url: Option<String>,
    relative_url_params: Vec<String>,
    headers: HeaderMap,
    content_type: Option<Mime>,
    got_field: bool,
    got_part: bool,
    got_body: bool,
    got_path: bool,
    got_query: bool,
    got_query_name: bool,
    got_query_map: bool,
    got_url: bool,
    /// Placeholder names already bound, with their 1-based parameter index.
    bound_paths: Vec<(String, usize)>,
    /// Tag types already used, with their 1-based parameter index.
    tag_types: Vec<(TypeId, usize)>,
}

impl<'a> Parser<'a> {
    fn new(courier: &'a Courier, descriptor: &'a MethodDescriptor) -> Self {
        Self {
            courier,
            descriptor,
            http_method: None,
            has_body: false,
            is_form_encoded: false,
            is_multipart: false,
            relative_url: None,
            relative_url_params: Vec::new(),
            headers: HeaderMap::new(),
            content_type: None,
            got_field: false,
            got_part: false,
            got_body: false,
            got_path: false,
            got_query: false,
            got_query_name: false,
            got_query_map: false,
            got_url: false,
            bound_paths: Vec::new(),
            tag_types: Vec::new(),
        }
    }

    fn method_error(&self, message: impl Into<String>) -> CompileError {
        CompileError::method(self.descriptor.key(), message)
    }

    fn param_error(&self, index: usize, message: impl Into<String>) -> CompileError {
        CompileError::parameter(self.descriptor.key(), index, message)
    }

    fn parse(mut self) -> Result<RequestFactory, CompileError> {
        for tag in self.descriptor.tags() {
            self.parse_method_tag(tag)?;
        }

        let Some(http_method) = self.http_method.clone() else {
            return Err(self.method_error(
                "HTTP method annotation is required (e.g., @GET, @POST, etc.).",
            ));
        };

        if !self.has_body {
            if self.is_multipart {
                return Err(self.method_error(
                    "Multipart can only be specified on HTTP methods with request body (e.g., @POST).",
                ));
            }
            if self.is_form_encoded {
                return Err(self.method_error(
                    "FormUrlEncoded can only be specified on HTTP methods with request body (e.g., @POST).",
                ));
            }
        }

        let params = self.descriptor.params();
        let mut handlers = Vec::with_capacity(params.len());
        for (index, param) in params.iter().enumerate() {
            handlers.push(self.parse_parameter(index, param, index + 1 == params.len())?);
        }

        if self.relative_url.is_none() && !self.got_url {
            return Err(self.method_error(format!(
                "Missing either @{http_method} URL or @Url parameter."
            )));
        }
        if !self.is_form_encoded && !self.is_multipart && !self.has_body && self.got_body {
            return Err(self.method_error(
                "Non-body HTTP method cannot contain @Body.",
            ));
        }
        if self.is_form_encoded && !self.got_field {
            return Err(self.method_error("Form-encoded method must contain at least one @Field."));
        }
        if self.is_multipart && !self.got_part {
            return Err(self.method_error("Multipart method must contain at least one @Part."));
        }
        if let Some(unbound) = self
            .relative_url_params
            .iter()
            .find(|name| !self.bound_paths.iter().any(|(bound, _)| bound == *name))
        {
            return Err(self.method_error(format!(
                "URL \"{}\" contains \"{{{unbound}}}\" but no @Path parameter binds it.",
                self.relative_url.as_deref().unwrap_or_default()
            )));
        }

        let encoding = if self.is_form_encoded {
            BodyEncoding::Form
        } else if self.is_multipart {
            BodyEncoding::Multipart
        } else {
            BodyEncoding::Plain
        };

        Ok(RequestFactory {
            method: self.descriptor.key().clone(),
            base_url: self.courier.base_url().as_url().clone(),
            http_method,
            relative_url: self.relative_url,
            headers: self.headers,
            content_type: self.content_type,
            has_body: self.has_body,
            encoding,
            handlers,
        })
    }

    fn parse_method_tag(&mut self, tag: &MethodTag) -> Result<(), CompileError> {
        match tag {
            MethodTag::Http {
                method,
                path,
                has_body,
            } => self.parse_http_method(method, path, *has_body),
            MethodTag::Headers(headers) => {
                if headers.is_empty() {
                    return Err(self.method_error("@Headers annotation is empty."));
                }
                headers.iter().try_for_each(|header| self.parse_header(header))
            }
            MethodTag::Multipart => {
                if self.is_form_encoded {
                    return Err(self.method_error("Only one encoding annotation is allowed."));
                }
                self.is_multipart = true;
                Ok(())
            }
            MethodTag::FormUrlEncoded => {
                if self.is_multipart {
                    return Err(self.method_error("Only one encoding annotation is allowed."));
                }
                self.is_form_encoded = true;
                Ok(())
            }
        }
    }

    fn parse_http_method(&mut self, method: &Method, path: &str, has_body: bool) -> Result<(), CompileError> {
        if let Some(existing) = &self.http_method {
            return Err(self.method_error(format!(
                "Only one HTTP method is allowed. Found: {existing} and {method}."
            )));
        }
        self.http_method = Some(method.clone());
        self.has_body = has_body;

        if path.is_empty() {
            return Ok(());
        }
        if let Some(query) = placeholder_in_query(path) {
            return Err(self.method_error(format!(
                "URL query string \"{query}\" must not have replace block. For dynamic query parameters use @Query."
            )));
        }
        self.relative_url = Some(path.to_owned());
        self.relative_url_params = parse_path_params(path);
        Ok(())
    }

    fn parse_header(&mut self, header: &str) -> Result<(), CompileError> {
        let malformed =
            format!("@Headers value must be in the form \"Name: Value\". Found: \"{header}\"");
        let Some((name, value)) = header
            .split_once(':')
            .filter(|(name, value)| !name.is_empty() && !value.is_empty())
        else {
            return Err(self.method_error(malformed));
        };
        let value = value.trim();

        if name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
            let content_type = value.parse::<Mime>().map_err(|err| {
                self.method_error(format!("Malformed content type: {value}"))
                    .with_cause(err)
            })?;
            self.content_type = Some(content_type);
            return Ok(());
        }

        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| self.method_error(malformed.clone()).with_cause(err))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| self.method_error(malformed.clone()).with_cause(err))?;
        self.headers.append(name, value);
        Ok(())
    }

    fn parse_parameter(
        &mut self,
        index: usize,
        param: &Param,
        is_last: bool,
    ) -> Result<ParameterHandler, CompileError> {
        match param.tags() {
            [] if is_last && matches!(param.shape(), ParamShape::Scalar(ty) if ty.is::<Continuation>()) => {
                Ok(ParameterHandler::new(index, Cardinality::Scalar, ParameterAction::Ignored))
            }
            [] => Err(self.param_error(index, "No HTTP parameter tag found.")),
            [tag] => self.parse_tag(index, param, tag),
            _ => Err(self.param_error(
                index,
                "Multiple HTTP parameter tags found, only one allowed.",
            )),
        }
    }

    /// The element type of a parameter that may be a list but not a map.
    fn element<'p>(
        &self,
        index: usize,
        param: &'p Param,
        tag: &ParamTag,
    ) -> Result<(Cardinality, &'p DeclaredType), CompileError> {
        match param.shape() {
            ParamShape::Scalar(ty) => Ok((Cardinality::Scalar, ty)),
            ParamShape::Iterable(ty) | ParamShape::Array(ty) => Ok((Cardinality::Many, ty)),
            ParamShape::Map { .. } => Err(self.param_error(
                index,
                format!("{} parameter type must not be a map.", tag.label()),
            )),
        }
    }

    /// The type of a parameter that must carry exactly one value.
    fn scalar<'p>(&self, index: usize, param: &'p Param, tag: &ParamTag) -> Result<&'p DeclaredType, CompileError> {
        match param.shape() {
            ParamShape::Scalar(ty) => Ok(ty),
            _ => Err(self.param_error(
                index,
                format!("{} parameter must be a single value.", tag.label()),
            )),
        }
    }

    /// The value type of a map parameter with string keys.
    fn map_value<'p>(&self, index: usize, param: &'p Param, tag: &ParamTag) -> Result<&'p DeclaredType, CompileError> {
        let ParamShape::Map { key, value } = param.shape() else {
            return Err(self.param_error(
                index,
                format!("{} parameter type must be Map.", tag.label()),
            ));
        };
        if !(key.is::<String>() || key.is::<&'static str>()) {
            return Err(self.param_error(
                index,
                format!("{} keys must be of type String: {key}", tag.label()),
            ));
        }
        Ok(value)
    }

    fn ensure_before_queries(&self, index: usize, what: &str) -> Result<(), CompileError> {
        for (got, label) in [
            (self.got_query, "@Query"),
            (self.got_query_name, "@QueryName"),
            (self.got_query_map, "@QueryMap"),
        ] {
            if got {
                return Err(self.param_error(
                    index,
                    format!("A {what} parameter must not come after a {label}."),
                ));
            }
        }
        Ok(())
    }

    fn ensure_url_usable(&self, index: usize, tag: &ParamTag) -> Result<(), CompileError> {
        if self.got_url {
            return Err(self.param_error(
                index,
                format!("{} parameters may not be used with @Url.", tag.label()),
            ));
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn parse_tag(&mut self, index: usize, param: &Param, tag: &ParamTag) -> Result<ParameterHandler, CompileError> {
        let handler = |cardinality, action| Ok(ParameterHandler::new(index, cardinality, action));
        match tag {
            ParamTag::Url => {
                let ty = self.scalar(index, param, tag)?;
                if self.got_url {
                    return Err(self.param_error(index, "Multiple @Url method annotations found."));
                }
                if self.got_path {
                    return Err(self.param_error(index, "@Path parameters may not be used with @Url."));
                }
                self.ensure_before_queries(index, "@Url")?;
                if self.relative_url.is_some() {
                    let method = self.http_method.as_ref().map(Method::as_str).unwrap_or_default();
                    return Err(self.param_error(index, format!("@Url cannot be used with @{method} URL")));
                }
                if !(ty.is::<String>() || ty.is::<&'static str>() || ty.is::<Url>() || ty.is::<http::Uri>()) {
                    return Err(self.param_error(
                        index,
                        "@Url must be String, url::Url, or http::Uri type.",
                    ));
                }
                self.got_url = true;
                handler(Cardinality::Scalar, ParameterAction::RelativeUrl)
            }
            ParamTag::Path { name, encoded } => {
                let ty = self.scalar(index, param, tag)?;
                self.ensure_before_queries(index, "@Path")?;
                self.ensure_url_usable(index, tag)?;
                let Some(relative_url) = &self.relative_url else {
                    let method = self.http_method.as_ref().map(Method::as_str).unwrap_or_default();
                    return Err(self.param_error(
                        index,
                        format!("@Path can only be used with relative url on @{method}"),
                    ));
                };
                if !is_valid_param_name(name) {
                    return Err(self.param_error(
                        index,
                        format!("@Path parameter name must match {PARAM_PATTERN}. Found: {name}"),
                    ));
                }
                if !self.relative_url_params.iter().any(|p| p == name) {
                    return Err(self.param_error(
                        index,
                        format!("URL \"{relative_url}\" does not contain \"{{{name}}}\"."),
                    ));
                }
                if let Some((_, previous)) = self.bound_paths.iter().find(|(bound, _)| bound == name) {
                    return Err(self.param_error(
                        index,
                        format!(
                            "@Path parameter \"{name}\" is duplicate of parameter #{previous} and would never be substituted."
                        ),
                    ));
                }
                self.got_path = true;
                self.bound_paths.push((name.to_string(), index + 1));
                handler(
                    Cardinality::Scalar,
                    ParameterAction::Path {
                        name: name.to_string(),
                        encoded: *encoded,
                        converter: self.string_converter(index, ty, param, tag)?,
                    },
                )
            }
            ParamTag::Query { name, encoded } => {
                let (cardinality, ty) = self.element(index, param, tag)?;
                self.got_query = true;
                handler(
                    cardinality,
                    ParameterAction::Query {
                        name: name.to_string(),
                        encoded: *encoded,
                        converter: self.string_converter(index, ty, param, tag)?,
                    },
                )
            }
            ParamTag::QueryName { encoded } => {
                let (cardinality, ty) = self.element(index, param, tag)?;
                self.got_query_name = true;
                handler(
                    cardinality,
                    ParameterAction::QueryName {
                        encoded: *encoded,
                        converter: self.string_converter(index, ty, param, tag)?,
                    },
                )
            }
            ParamTag::QueryMap { encoded } => {
                let ty = self.map_value(index, param, tag)?;
                self.got_query_map = true;
                handler(
                    Cardinality::Scalar,
                    ParameterAction::QueryMap {
                        encoded: *encoded,
                        converter: self.string_converter(index, ty, param, tag)?,
                    },
                )
            }
            ParamTag::Header { name } => {
                let (cardinality, ty) = self.element(index, param, tag)?;
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                    self.param_error(index, format!("@Header name is not a valid header name: {name}"))
                        .with_cause(err)
                })?;
                handler(
                    cardinality,
                    ParameterAction::Header {
                        name,
                        converter: self.string_converter(index, ty, param, tag)?,
                    },
                )
            }
            ParamTag::HeaderMap => {
                if let ParamShape::Scalar(ty) = param.shape()
                    && ty.is::<HeaderMap>()
                {
                    return handler(Cardinality::Scalar, ParameterAction::Headers);
                }
                if !matches!(param.shape(), ParamShape::Map { .. }) {
                    return Err(self.param_error(
                        index,
                        "@HeaderMap parameter type must be Map or http::HeaderMap.",
                    ));
                }
                let ty = self.map_value(index, param, tag)?;
                handler(
                    Cardinality::Scalar,
                    ParameterAction::HeaderMap {
                        converter: self.string_converter(index, ty, param, tag)?,
                    },
                )
            }
            ParamTag::Field { name, encoded } => {
                if !self.is_form_encoded {
                    return Err(self.param_error(
                        index,
                        "@Field parameters can only be used with form encoding.",
                    ));
                }
                let (cardinality, ty) = self.element(index, param, tag)?;
                self.got_field = true;
                handler(
                    cardinality,
                    ParameterAction::Field {
                        name: name.to_string(),
                        encoded: *encoded,
                        converter: self.string_converter(index, ty, param, tag)?,
                    },
                )
            }
            ParamTag::FieldMap { encoded } => {
                if !self.is_form_encoded {
                    return Err(self.param_error(
                        index,
                        "@FieldMap parameters can only be used with form encoding.",
                    ));
                }
                let ty = self.map_value(index, param, tag)?;
                self.got_field = true;
                handler(
                    Cardinality::Scalar,
                    ParameterAction::FieldMap {
                        encoded: *encoded,
                        converter: self.string_converter(index, ty, param, tag)?,
                    },
                )
            }
            ParamTag::Part { name, encoding } => {
                if !self.is_multipart {
                    return Err(self.param_error(
                        index,
                        "@Part parameters can only be used with multipart encoding.",
                    ));
                }
                let (cardinality, ty) = self.element(index, param, tag)?;
                self.got_part = true;

                if name.is_empty() {
                    if !ty.is::<Part>() {
                        return Err(self.param_error(
                            index,
                            "@Part annotation must supply a name or use body::Part parameter type.",
                        ));
                    }
                    return handler(cardinality, ParameterAction::RawPart);
                }
                if ty.is::<Part>() {
                    return Err(self.param_error(
                        index,
                        "@Part parameters using the body::Part must not include a part name in the annotation.",
                    ));
                }

                let encoding = self.part_encoding(index, encoding)?;
                let mut headers = HeaderMap::with_capacity(2);
                headers.insert(
                    http::header::CONTENT_DISPOSITION,
                    form_data_disposition(name, None),
                );
                headers.insert(CONTENT_TRANSFER_ENCODING, encoding);
                let converter = self.body_converter(index, ty, param, "@Part")?;
                handler(cardinality, ParameterAction::Part { headers, converter })
            }
            ParamTag::PartMap { encoding } => {
                if !self.is_multipart {
                    return Err(self.param_error(
                        index,
                        "@PartMap parameters can only be used with multipart encoding.",
                    ));
                }
                let ty = self.map_value(index, param, tag)?;
                if ty.is::<Part>() {
                    return Err(self.param_error(
                        index,
                        "@PartMap values cannot be body::Part. Use @Part List<Part> or a different value type instead.",
                    ));
                }
                self.got_part = true;
                let encoding = self.part_encoding(index, encoding)?;
                let converter = self.body_converter(index, ty, param, "@PartMap")?;
                handler(
                    Cardinality::Scalar,
                    ParameterAction::PartMap {
                        encoding,
                        converter,
                    },
                )
            }
            ParamTag::Body => {
                if self.is_form_encoded || self.is_multipart {
                    return Err(self.param_error(
                        index,
                        "@Body parameters cannot be used with form or multi-part encoding.",
                    ));
                }
                if self.got_body {
                    return Err(self.param_error(index, "Multiple @Body method annotations found."));
                }
                let ty = self.scalar(index, param, tag)?;
                let converter = self.body_converter(index, ty, param, "@Body")?;
                self.got_body = true;
                handler(Cardinality::Scalar, ParameterAction::Body { converter })
            }
            ParamTag::Tag => {
                let ty = self.scalar(index, param, tag)?;
                if let Some((_, previous)) = self.tag_types.iter().find(|(id, _)| *id == ty.id()) {
                    return Err(self.param_error(
                        index,
                        format!(
                            "@Tag type {ty} is duplicate of parameter #{previous} and would always overwrite its value."
                        ),
                    ));
                }
                self.tag_types.push((ty.id(), index + 1));
                handler(Cardinality::Scalar, ParameterAction::Tag { type_id: ty.id() })
            }
        }
    }

    fn part_encoding(&self, index: usize, encoding: &str) -> Result<HeaderValue, CompileError> {
        HeaderValue::from_str(encoding).map_err(|err| {
            self.param_error(index, format!("Invalid part encoding: {encoding}"))
                .with_cause(err)
        })
    }

    fn string_converter(
        &self,
        index: usize,
        ty: &DeclaredType,
        param: &Param,
        tag: &ParamTag,
    ) -> Result<Arc<dyn StringConverter>, CompileError> {
        self.courier.string_converter(ty, param.annotations()).ok_or_else(|| {
            self.param_error(
                index,
                format!(
                    "Unable to convert {ty} to a string for {}. Declare a displayable type or register a converter.",
                    tag.label()
                ),
            )
        })
    }

    fn body_converter(
        &self,
        index: usize,
        ty: &DeclaredType,
        param: &Param,
        label: &str,
    ) -> Result<Arc<dyn crate::converter::RequestBodyConverter>, CompileError> {
        self.courier
            .request_body_converter(ty, param.annotations(), self.descriptor.annotations())
            .map_err(|err| {
                self.param_error(index, format!("Unable to create {label} converter for {ty}"))
                    .with_cause(err)
            })
    }
}
