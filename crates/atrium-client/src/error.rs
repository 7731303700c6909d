use atrium_session::RefreshError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("api_base_url_missing")]
    BaseUrlMissing,
    #[error("api_invalid_path")]
    InvalidPath,
    /// The call failed before reaching the server.
    #[error("api_request_failed:{message}")]
    Request { message: String },
    #[error("api_read_failed:{message}")]
    Read { message: String },
    #[error("api_json_decode_failed:{message}")]
    Decode { message: String },
    /// Non-auth HTTP failure, surfaced to the caller as-is.
    #[error("api_http_{status}:{body}")]
    Http { status: u16, body: String },
    /// Refresh rejected, or a second 401 after the single retry. The
    /// session has been cleared; the caller must route to login.
    #[error("api_auth_fatal:{reason}")]
    AuthFatal { reason: String },
}

impl ApiError {
    #[must_use]
    pub fn is_auth_fatal(&self) -> bool {
        matches!(self, Self::AuthFatal { .. })
    }

    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Request { .. })
    }
}

impl From<RefreshError> for ApiError {
    fn from(error: RefreshError) -> Self {
        Self::AuthFatal {
            reason: error.to_string(),
        }
    }
}

pub(crate) fn http_error(status: u16, body: &[u8]) -> ApiError {
    let body = String::from_utf8_lossy(body).trim().to_string();
    let body = if body.is_empty() {
        "<empty>".to_string()
    } else {
        body
    };
    ApiError::Http { status, body }
}
