use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Generic message for failures the server did not explain
pub const GENERIC_FAILURE_MESSAGE: &str = "Request failed, please try again later";
const NOT_FOUND_MESSAGE: &str = "API endpoint not found";
const SERVER_FAILURE_MESSAGE: &str = "Internal server error";
const LOGIN_REQUIRED_MESSAGE: &str = "Please log in first";

/// Status and body of a failed response.
/// `message` is the server's own explanation when the body carried one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub status: u16,
    pub message: Option<String>,
    pub body: String,
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} ({})", message, self.status),
            None if self.body.is_empty() => write!(f, "status {}", self.status),
            None => write!(f, "status {}: {}", self.status, self.body),
        }
    }
}

/// Why a call ended with the user having to sign in again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthRequiredReason {
    #[error("no valid refresh token")]
    MissingRefreshToken,

    #[error("still unauthorized after refreshing the session")]
    RetryExhausted,

    #[error("session refresh failed: {0}")]
    RefreshFailed(Box<ApiError>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(ErrorDetail),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Authentication required: {0}")]
    AuthRequired(AuthRequiredReason),

    #[error("Resource not found: {0}")]
    NotFound(ErrorDetail),

    #[error("Rate limited - please wait before retrying")]
    RateLimited(ErrorDetail),

    #[error("Server error: {0}")]
    ServerError(ErrorDetail),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request failed: {0}")]
    Rejected(ErrorDetail),

    #[error("Request interrupted before the session refresh settled")]
    Interrupted,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// The `message` field of a JSON error body, if there is one.
    fn server_message(body: &str) -> Option<String> {
        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message)
            .filter(|m| !m.trim().is_empty())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = ErrorDetail {
            status: status.as_u16(),
            message: Self::server_message(body),
            body: Self::truncate_body(body),
        };
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(detail),
            404 => ApiError::NotFound(detail),
            429 => ApiError::RateLimited(detail),
            500..=599 => ApiError::ServerError(detail),
            _ => ApiError::Rejected(detail),
        }
    }

    pub fn is_auth_required(&self) -> bool {
        matches!(self, ApiError::AuthRequired(_))
    }

    fn detail(&self) -> Option<&ErrorDetail> {
        match self {
            ApiError::AccessDenied(d)
            | ApiError::NotFound(d)
            | ApiError::RateLimited(d)
            | ApiError::ServerError(d)
            | ApiError::Rejected(d) => Some(d),
            _ => None,
        }
    }

    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        if let Some(message) = self.detail().and_then(|d| d.message.clone()) {
            return message;
        }
        match self {
            ApiError::AuthRequired(_) | ApiError::Unauthorized => LOGIN_REQUIRED_MESSAGE,
            ApiError::NotFound(_) => NOT_FOUND_MESSAGE,
            ApiError::ServerError(_) => SERVER_FAILURE_MESSAGE,
            _ => GENERIC_FAILURE_MESSAGE,
        }
        .to_string()
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Network(e.to_string())
    }
}
