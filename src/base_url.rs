//! The validated base URL every relative service path resolves against.
//!
//! [`BaseUrl`] is a newtype over [`Url`] that guarantees the URL parsed and
//! that its path ends in `/`, so relative templates such as `users/{id}`
//! resolve underneath it instead of replacing its last segment.

use http::Uri;
use snafu::prelude::*;
use url::Url;

/// A validated base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseUrl(Url);

impl BaseUrl {
    /// Returns the inner [`Url`].
    #[must_use]
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// Consumes the [`BaseUrl`] and returns the inner [`Url`].
    #[must_use]
    pub fn into_url(self) -> Url {
        self.0
    }

    fn validate(url: Url) -> Result<Self, BaseUrlError> {
        ensure!(
            url.path().ends_with('/'),
            MissingTrailingSlashSnafu {
                url: url.to_string()
            }
        );
        Ok(Self(url))
    }
}

impl std::fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Errors produced while validating a base URL.
#[derive(Debug, Snafu)]
pub enum BaseUrlError {
    /// The value could not be parsed as an absolute URL.
    #[snafu(display("Illegal URL: {url}"))]
    Parse {
        /// The rejected input.
        url: String,
        /// The underlying parse error.
        source: url::ParseError,
    },
    /// The URL path does not end in `/`.
    #[snafu(display("baseUrl must end in /: {url}"))]
    MissingTrailingSlash {
        /// The rejected URL.
        url: String,
    },
}

impl crate::Error for BaseUrlError {
    fn is_retryable(&self) -> bool {
        false
    }
}

/// Conversion trait for types that can be turned into a [`BaseUrl`].
pub trait IntoBaseUrl {
    /// Attempts to convert this value into a [`BaseUrl`].
    ///
    /// # Errors
    ///
    /// Fails when the value is not an absolute URL or its path does not end
    /// in `/`.
    fn into_base_url(self) -> Result<BaseUrl, BaseUrlError>;
}

impl IntoBaseUrl for BaseUrl {
    fn into_base_url(self) -> Result<BaseUrl, BaseUrlError> {
        Ok(self)
    }
}

impl IntoBaseUrl for Url {
    fn into_base_url(self) -> Result<BaseUrl, BaseUrlError> {
        BaseUrl::validate(self)
    }
}

impl IntoBaseUrl for &str {
    fn into_base_url(self) -> Result<BaseUrl, BaseUrlError> {
        let url = Url::parse(self).context(ParseSnafu { url: self })?;
        BaseUrl::validate(url)
    }
}

impl IntoBaseUrl for String {
    fn into_base_url(self) -> Result<BaseUrl, BaseUrlError> {
        self.as_str().into_base_url()
    }
}

impl IntoBaseUrl for Uri {
    fn into_base_url(self) -> Result<BaseUrl, BaseUrlError> {
        self.to_string().into_base_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_trailing_slash() {
        let url = "https://api.example.com/v1/".into_base_url().unwrap();
        assert_eq!(url.as_url().path(), "/v1/");
    }

    #[test]
    fn host_only_url_gets_root_path() {
        let url = "https://api.example.com".into_base_url().unwrap();
        assert_eq!(url.to_string(), "https://api.example.com/");
    }

    #[test]
    fn rejects_missing_trailing_slash() {
        let err = "https://api.example.com/v1".into_base_url().unwrap_err();
        assert_eq!(
            err.to_string(),
            "baseUrl must end in /: https://api.example.com/v1"
        );
    }

    #[test]
    fn rejects_relative_input() {
        let err = "v1/".into_base_url().unwrap_err();
        assert!(matches!(err, BaseUrlError::Parse { .. }));
    }
}
