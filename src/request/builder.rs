use std::{any::TypeId, sync::Arc};

use http::{HeaderMap, HeaderName, HeaderValue, Method, header::CONTENT_TYPE};
use mime::Mime;
use snafu::prelude::*;
use url::Url;

use super::{
    Request, Tags,
    error::{
        EmptyMultipartSnafu, HeaderNameSnafu, HeaderValueSnafu, MalformedContentTypeSnafu,
        MalformedUrlSnafu, PathAfterQuerySnafu, PathTraversalSnafu, RequestError,
    },
};
use crate::{
    body::{FormBody, MultipartBody, Part, RequestBody},
    url_template::{QUERY_COMPONENT, canonicalize, canonicalize_for_path, is_path_traversal},
};

/// How the request body is assembled from parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyEncoding {
    /// A `Body` parameter, or nothing.
    Plain,
    /// `Field` parameters.
    Form,
    /// `Part` parameters.
    Multipart,
}

enum PendingBody {
    None,
    Form(FormBody),
    Multipart(MultipartBody),
    Explicit(RequestBody),
}

/// Mutable state for building one request.
pub(crate) struct RequestBuilder<'a> {
    method: Method,
    base_url: &'a Url,
    relative_url: Option<String>,
    /// Set once the first query parameter forces the URL to be resolved.
    url: Option<Url>,
    headers: HeaderMap,
    content_type: Option<Mime>,
    has_body: bool,
    body: PendingBody,
    tags: Tags,
}

fn resolve(base: &Url, relative: &str) -> Result<Url, RequestError> {
    base.join(relative).ok().context(MalformedUrlSnafu {
        base: base.as_str(),
        relative,
    })
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(
        method: Method,
        base_url: &'a Url,
        relative_url: Option<&str>,
        headers: HeaderMap,
        content_type: Option<Mime>,
        has_body: bool,
        encoding: BodyEncoding,
    ) -> Self {
        let body = match encoding {
            BodyEncoding::Plain => PendingBody::None,
            BodyEncoding::Form => PendingBody::Form(FormBody::new()),
            BodyEncoding::Multipart => PendingBody::Multipart(MultipartBody::new()),
        };
        Self {
            method,
            base_url,
            relative_url: relative_url.map(str::to_owned),
            url: None,
            headers,
            content_type,
            has_body,
            body,
            tags: Tags::default(),
        }
    }

    pub(crate) fn set_relative_url(&mut self, relative_url: String) {
        self.relative_url = Some(relative_url);
    }

    /// Adds a header. `Content-Type` is held back and applied to the body.
    pub(crate) fn add_header(&mut self, name: &HeaderName, value: &str) -> Result<(), RequestError> {
        if name == CONTENT_TYPE {
            let content_type = value
                .parse::<Mime>()
                .context(MalformedContentTypeSnafu { value })?;
            self.content_type = Some(content_type);
            return Ok(());
        }
        let value = HeaderValue::from_str(value).context(HeaderValueSnafu {
            name: name.as_str(),
        })?;
        self.headers.append(name.clone(), value);
        Ok(())
    }

    pub(crate) fn add_named_header(&mut self, name: &str, value: &str) -> Result<(), RequestError> {
        let name = HeaderName::from_bytes(name.as_bytes()).context(HeaderNameSnafu { name })?;
        self.add_header(&name, value)
    }

    pub(crate) fn add_headers(&mut self, headers: &HeaderMap) {
        for (name, value) in headers {
            self.headers.append(name.clone(), value.clone());
        }
    }

    /// Replaces every `{name}` in the relative URL.
    pub(crate) fn add_path_param(&mut self, name: &str, value: &str, encoded: bool) -> Result<(), RequestError> {
        let relative = self.relative_url.as_mut().context(PathAfterQuerySnafu)?;
        let replaced = relative.replace(
            &format!("{{{name}}}"),
            &canonicalize_for_path(value, encoded),
        );
        ensure!(!is_path_traversal(&replaced), PathTraversalSnafu { value });
        *relative = replaced;
        Ok(())
    }

    /// Appends `name[=value]` to the query, resolving the URL on first use.
    pub(crate) fn add_query_param(
        &mut self,
        name: &str,
        value: Option<&str>,
        encoded: bool,
    ) -> Result<(), RequestError> {
        if let Some(relative) = self.relative_url.take() {
            self.url = Some(resolve(self.base_url, &relative)?);
        }
        let url = self.url.as_mut().context(MalformedUrlSnafu {
            base: self.base_url.as_str(),
            relative: "",
        })?;

        let mut query = url.query().unwrap_or_default().to_owned();
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&canonicalize(name, &QUERY_COMPONENT, encoded));
        if let Some(value) = value {
            query.push('=');
            query.push_str(&canonicalize(value, &QUERY_COMPONENT, encoded));
        }
        url.set_query(Some(&query));
        Ok(())
    }

    pub(crate) fn add_form_field(&mut self, name: &str, value: &str, encoded: bool) {
        if let PendingBody::Form(form) = &mut self.body {
            if encoded {
                form.add_encoded(name, value);
            } else {
                form.add(name, value);
            }
        }
    }

    pub(crate) fn add_part(&mut self, headers: HeaderMap, body: RequestBody) {
        if let PendingBody::Multipart(multipart) = &mut self.body {
            multipart.add_with_headers(headers, body);
        }
    }

    pub(crate) fn add_raw_part(&mut self, part: Part) {
        if let PendingBody::Multipart(multipart) = &mut self.body {
            multipart.add(part);
        }
    }

    pub(crate) fn set_body(&mut self, body: RequestBody) {
        self.body = PendingBody::Explicit(body);
    }

    pub(crate) fn set_tag(&mut self, type_id: TypeId, value: Option<Arc<dyn std::any::Any + Send + Sync>>) {
        match value {
            Some(value) => self.tags.insert(type_id, value),
            None => self.tags.remove(type_id),
        }
    }

    pub(crate) fn build(self) -> Result<Request, RequestError> {
        let url = match (self.url, self.relative_url) {
            (Some(url), _) => url,
            (None, Some(relative)) => resolve(self.base_url, &relative)?,
            (None, None) => {
                return MalformedUrlSnafu {
                    base: self.base_url.as_str(),
                    relative: "",
                }
                .fail();
            }
        };

        let body = match self.body {
            PendingBody::Explicit(body) => Some(body),
            PendingBody::Form(form) => Some(form.build()),
            PendingBody::Multipart(multipart) => {
                ensure!(!multipart.parts().is_empty(), EmptyMultipartSnafu);
                Some(multipart.build())
            }
            PendingBody::None => self.has_body.then(RequestBody::empty),
        };

        let mut headers = self.headers;
        let body = match (body, self.content_type) {
            (Some(body), Some(content_type)) => Some(body.with_content_type(content_type)),
            (None, Some(content_type)) => {
                let value = HeaderValue::from_str(content_type.as_ref()).context(HeaderValueSnafu {
                    name: CONTENT_TYPE.as_str(),
                })?;
                headers.insert(CONTENT_TYPE, value);
                None
            }
            (body, None) => body,
        };

        let uri = url.as_str().parse::<http::Uri>().ok().context(MalformedUrlSnafu {
            base: self.base_url.as_str(),
            relative: url.as_str(),
        })?;

        let mut request = http::Request::new(body);
        *request.method_mut() = self.method;
        *request.uri_mut() = uri;
        *request.headers_mut() = headers;
        request.extensions_mut().insert(self.tags);
        Ok(request)
    }
}
