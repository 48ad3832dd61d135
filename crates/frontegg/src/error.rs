use std::{
    fmt,
    sync::{Arc, RwLock},
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    #[error("Token cannot be used as a header value. Must be ASCII.")]
    InvalidHeaderValue,
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Authentication with client credentials failed: {0}")]
    AuthenticationFailed(ApiError),
    #[error("Vendor API rejected the request: {0}")]
    Api(ApiError),
    #[error("Failed to parse response: {0}")]
    ParseError(String),
    #[error("Failed to build request: {0}")]
    RequestBuild(String),
    #[error("Request failed: {0}")]
    ReqwestFailed(#[from] Arc<reqwest::Error>),
}

impl Error {
    /// The API error carried by this error, if the vendor API answered with a failure status.
    #[must_use]
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::AuthenticationFailed(e) | Error::Api(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn parse(error: &serde_json::Error) -> Self {
        Error::ParseError(error.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::ReqwestFailed(Arc::new(value))
    }
}

impl From<http::Error> for Error {
    fn from(value: http::Error) -> Self {
        Error::RequestBuild(value.to_string())
    }
}

impl From<figment::Error> for Error {
    fn from(value: figment::Error) -> Self {
        Error::Config(value.to_string())
    }
}

/// Failure status returned by the vendor API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

impl ApiError {
    /// Builds an error from a response status and raw body.
    ///
    /// The vendor reports failures as `{"errors": ["..."]}` or `{"message": "..."}`.
    /// Anything else is kept verbatim.
    pub(crate) fn from_response(status: http::StatusCode, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|value| {
                if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
                    let joined = errors
                        .iter()
                        .filter_map(|e| e.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    (!joined.is_empty()).then_some(joined)
                } else {
                    value
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(ToString::to_string)
                }
            })
            .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());

        Self {
            status: status.as_u16(),
            message,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status {}: {}", self.status, self.message)
    }
}

/// Last [`ApiError`] seen by a client, shared between its clones.
#[derive(Debug, Clone, Default)]
pub(crate) struct LastApiError(Arc<RwLock<Option<ApiError>>>);

impl LastApiError {
    pub(crate) fn get(&self) -> Option<ApiError> {
        // Unwrap RWLock to propagate poison (writer panicked)
        self.0.read().expect("Non-poisoned lock").clone()
    }

    pub(crate) fn set(&self, error: Option<ApiError>) {
        *self.0.write().expect("Non-poisoned lock") = error;
    }

    /// Remember the API error of `result`, or forget the previous one.
    pub(crate) fn record<T>(&self, result: &Result<T>) {
        self.set(result.as_ref().err().and_then(Error::api_error).cloned());
    }
}
