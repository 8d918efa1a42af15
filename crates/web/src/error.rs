//! Error types of the web layer.
//!
//! - [`WebError`]: raised by middleware and handlers, resolved by the owning
//!   router's error handlers or rendered as a JSON error body
//! - [`SettingsError`]: invalid configuration values
//! - [`ServerError`]: failures starting or running the server

use std::error::Error as StdError;
use std::io;

use ferrule_http::protocol::{ParseError, SendError};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::router::PatternError;

type BoxError = Box<dyn StdError + Send + Sync>;

/// An error carrying the HTTP status it maps to.
#[derive(Debug, Error)]
#[error("{title}: {detail}")]
pub struct WebError {
    status: StatusCode,
    title: String,
    detail: String,
    #[source]
    source: Option<BoxError>,
}

/// The JSON body sent for an unrecovered error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub status: u16,
    pub title: String,
    pub detail: String,
}

impl WebError {
    /// Creates an error whose title is the canonical reason of `status`.
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        let title = status.canonical_reason().unwrap_or("Unknown Error").to_string();
        Self { status, title, detail: detail.into(), source: None }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }

    /// Wraps an arbitrary error as a `500 Internal Server Error`.
    pub fn from_error<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        let source = error.into();
        Self::internal(source.to_string()).with_source(source)
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        self.source = Some(source.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody { status: self.status.as_u16(), title: self.title.clone(), detail: self.detail.clone() }
    }
}

impl From<SendError> for WebError {
    fn from(e: SendError) -> Self {
        Self::internal(e.to_string()).with_source(e)
    }
}

impl From<ParseError> for WebError {
    fn from(e: ParseError) -> Self {
        Self::bad_request(e.to_string()).with_source(e)
    }
}

impl From<io::Error> for WebError {
    fn from(e: io::Error) -> Self {
        Self::internal(e.to_string()).with_source(e)
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("can't read settings file: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("can't parse settings: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    #[error("setting '{key}' has invalid value '{value}', expected {expected}")]
    InvalidValue { key: String, value: String, expected: &'static str },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("router must be set")]
    MissingRouter,

    #[error("can't bind {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error("invalid settings: {source}")]
    Settings {
        #[from]
        source: SettingsError,
    },

    #[error("can't build router: {source}")]
    Route {
        #[from]
        source: PatternError,
    },
}
