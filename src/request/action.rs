use std::{
    any::{Any, TypeId},
    sync::Arc,
};

use http::{HeaderMap, HeaderName, HeaderValue, header::CONTENT_DISPOSITION};
use snafu::prelude::*;

use super::{
    RequestBuilder,
    error::{
        ArgumentTypeSnafu, ConvertSnafu, NullBodySnafu, NullMapKeySnafu, NullMapSnafu,
        NullPathSnafu, NullUrlSnafu, RequestError,
    },
};
use crate::{
    arg::Arg,
    body::{Part, RequestBody, form_data_disposition},
    converter::{RequestBodyConverter, StringConverter},
};

pub(crate) const CONTENT_TRANSFER_ENCODING: HeaderName = HeaderName::from_static("content-transfer-encoding");

/// Whether a parameter carries one value or a list of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cardinality {
    Scalar,
    /// Iterables and arrays. Each non-null element is applied on its own.
    Many,
}

/// What a parameter does to the request.
pub(crate) enum ParameterAction {
    RelativeUrl,
    Path {
        name: String,
        encoded: bool,
        converter: Arc<dyn StringConverter>,
    },
    Query {
        name: String,
        encoded: bool,
        converter: Arc<dyn StringConverter>,
    },
    QueryName {
        encoded: bool,
        converter: Arc<dyn StringConverter>,
    },
    QueryMap {
        encoded: bool,
        converter: Arc<dyn StringConverter>,
    },
    Header {
        name: HeaderName,
        converter: Arc<dyn StringConverter>,
    },
    /// An [`http::HeaderMap`] argument.
    Headers,
    HeaderMap {
        converter: Arc<dyn StringConverter>,
    },
    Field {
        name: String,
        encoded: bool,
        converter: Arc<dyn StringConverter>,
    },
    FieldMap {
        encoded: bool,
        converter: Arc<dyn StringConverter>,
    },
    Part {
        headers: HeaderMap,
        converter: Arc<dyn RequestBodyConverter>,
    },
    RawPart,
    PartMap {
        encoding: HeaderValue,
        converter: Arc<dyn RequestBodyConverter>,
    },
    Body {
        converter: Arc<dyn RequestBodyConverter>,
    },
    Tag {
        type_id: TypeId,
    },
    Ignored,
}

/// Applies one argument to a [`RequestBuilder`].
pub(crate) struct ParameterHandler {
    /// 0-based parameter position.
    index: usize,
    cardinality: Cardinality,
    action: ParameterAction,
}

type Entries = [(Option<String>, Arg)];

impl ParameterHandler {
    pub(crate) fn new(index: usize, cardinality: Cardinality, action: ParameterAction) -> Self {
        Self {
            index,
            cardinality,
            action,
        }
    }

    pub(crate) fn apply(&self, builder: &mut RequestBuilder<'_>, arg: &Arg) -> Result<(), RequestError> {
        match (self.cardinality, arg) {
            (Cardinality::Scalar, arg) => self.apply_one(builder, arg),
            (Cardinality::Many, Arg::Null) => Ok(()),
            (Cardinality::Many, Arg::List(items)) => items
                .iter()
                .try_for_each(|item| self.apply_one(builder, item)),
            (Cardinality::Many, _) => self.mismatch("a list"),
        }
    }

    fn mismatch<T>(&self, expected: &'static str) -> Result<T, RequestError> {
        ArgumentTypeSnafu {
            index: self.index + 1,
            expected,
        }
        .fail()
    }

    fn single<'a>(&self, arg: &'a Arg) -> Result<Option<&'a dyn Any>, RequestError> {
        match arg {
            Arg::Null => Ok(None),
            Arg::Value(value) => Ok(Some(value.as_ref() as &dyn Any)),
            _ => self.mismatch("a single value"),
        }
    }

    fn entries<'a>(&self, arg: &'a Arg, kind: &'static str) -> Result<&'a Entries, RequestError> {
        match arg {
            Arg::Null => NullMapSnafu { kind }.fail(),
            Arg::Map(entries) => Ok(entries),
            _ => self.mismatch("a map"),
        }
    }

    fn stringify(&self, converter: &dyn StringConverter, value: &dyn Any) -> Result<String, RequestError> {
        converter.convert(value).context(ConvertSnafu {
            index: self.index + 1,
            target: "String",
        })
    }

    fn encode(
        &self,
        converter: &dyn RequestBodyConverter,
        value: &dyn Any,
    ) -> Result<RequestBody, RequestError> {
        converter.convert(value).context(ConvertSnafu {
            index: self.index + 1,
            target: "RequestBody",
        })
    }

    /// Calls `apply` for each entry with a value. Keys are required.
    fn for_each_entry(
        &self,
        arg: &Arg,
        kind: &'static str,
        mut apply: impl FnMut(&str, &dyn Any) -> Result<(), RequestError>,
    ) -> Result<(), RequestError> {
        for (key, value) in self.entries(arg, kind)? {
            let key = key.as_deref().context(NullMapKeySnafu { kind })?;
            if let Some(value) = self.single(value)? {
                apply(key, value)?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn apply_one(&self, builder: &mut RequestBuilder<'_>, arg: &Arg) -> Result<(), RequestError> {
        match &self.action {
            ParameterAction::Ignored => Ok(()),
            ParameterAction::RelativeUrl => {
                let value = self.single(arg)?.context(NullUrlSnafu)?;
                let url = if let Some(s) = value.downcast_ref::<String>() {
                    s.clone()
                } else if let Some(s) = value.downcast_ref::<&'static str>() {
                    (*s).to_owned()
                } else if let Some(url) = value.downcast_ref::<url::Url>() {
                    url.to_string()
                } else if let Some(uri) = value.downcast_ref::<http::Uri>() {
                    uri.to_string()
                } else {
                    return self.mismatch("a String, url::Url or http::Uri");
                };
                builder.set_relative_url(url);
                Ok(())
            }
            ParameterAction::Path {
                name,
                encoded,
                converter,
            } => {
                let value = self.single(arg)?.context(NullPathSnafu { name })?;
                let value = self.stringify(converter.as_ref(), value)?;
                builder.add_path_param(name, &value, *encoded)
            }
            ParameterAction::Query {
                name,
                encoded,
                converter,
            } => match self.single(arg)? {
                Some(value) => {
                    let value = self.stringify(converter.as_ref(), value)?;
                    builder.add_query_param(name, Some(&value), *encoded)
                }
                None => Ok(()),
            },
            ParameterAction::QueryName { encoded, converter } => match self.single(arg)? {
                Some(value) => {
                    let name = self.stringify(converter.as_ref(), value)?;
                    builder.add_query_param(&name, None, *encoded)
                }
                None => Ok(()),
            },
            ParameterAction::QueryMap { encoded, converter } => {
                self.for_each_entry(arg, "Query map", |key, value| {
                    let value = self.stringify(converter.as_ref(), value)?;
                    builder.add_query_param(key, Some(&value), *encoded)
                })
            }
            ParameterAction::Header { name, converter } => match self.single(arg)? {
                Some(value) => {
                    let value = self.stringify(converter.as_ref(), value)?;
                    builder.add_header(name, &value)
                }
                None => Ok(()),
            },
            ParameterAction::Headers => {
                let value = self
                    .single(arg)?
                    .context(NullMapSnafu { kind: "Headers" })?;
                match value.downcast_ref::<HeaderMap>() {
                    Some(headers) => {
                        builder.add_headers(headers);
                        Ok(())
                    }
                    None => self.mismatch("an http::HeaderMap"),
                }
            }
            ParameterAction::HeaderMap { converter } => {
                self.for_each_entry(arg, "Header map", |key, value| {
                    let value = self.stringify(converter.as_ref(), value)?;
                    builder.add_named_header(key, &value)
                })
            }
            ParameterAction::Field {
                name,
                encoded,
                converter,
            } => {
                if let Some(value) = self.single(arg)? {
                    let value = self.stringify(converter.as_ref(), value)?;
                    builder.add_form_field(name, &value, *encoded);
                }
                Ok(())
            }
            ParameterAction::FieldMap { encoded, converter } => {
                self.for_each_entry(arg, "Field map", |key, value| {
                    let value = self.stringify(converter.as_ref(), value)?;
                    builder.add_form_field(key, &value, *encoded);
                    Ok(())
                })
            }
            ParameterAction::Part { headers, converter } => {
                if let Some(value) = self.single(arg)? {
                    let body = self.encode(converter.as_ref(), value)?;
                    builder.add_part(headers.clone(), body);
                }
                Ok(())
            }
            ParameterAction::RawPart => match self.single(arg)? {
                Some(value) => match value.downcast_ref::<Part>() {
                    Some(part) => {
                        builder.add_raw_part(part.clone());
                        Ok(())
                    }
                    None => self.mismatch("a body::Part"),
                },
                None => Ok(()),
            },
            ParameterAction::PartMap {
                encoding,
                converter,
            } => self.for_each_entry(arg, "Part map", |key, value| {
                let body = self.encode(converter.as_ref(), value)?;
                let mut headers = HeaderMap::with_capacity(2);
                headers.insert(CONTENT_DISPOSITION, form_data_disposition(key, None));
                headers.insert(CONTENT_TRANSFER_ENCODING, encoding.clone());
                builder.add_part(headers, body);
                Ok(())
            }),
            ParameterAction::Body { converter } => {
                let value = self.single(arg)?.context(NullBodySnafu)?;
                let body = self.encode(converter.as_ref(), value)?;
                builder.set_body(body);
                Ok(())
            }
            ParameterAction::Tag { type_id } => {
                match arg {
                    Arg::Null => builder.set_tag(*type_id, None),
                    Arg::Value(value) => builder.set_tag(*type_id, Some(Arc::clone(value))),
                    _ => return self.mismatch("a single value"),
                }
                Ok(())
            }
        }
    }
}
