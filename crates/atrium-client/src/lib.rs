//! Authenticated HTTP middleware.
//!
//! Every outgoing request is intercepted to attach the current access token.
//! On a 401 for a non-exempt path the client rotates the token through the
//! shared [`atrium_session::RefreshCoordinator`] and retries exactly once; a
//! second 401 is surfaced as [`ApiError::AuthFatal`] and never retried
//! again. One client instance (and so one coordinator, one dispatcher) is
//! shared by every caller in the process.

pub mod auth_api;
pub mod client;
pub mod error;
pub mod testing;

pub use auth_api::{
    HttpAuthTransport, LOGIN_PATH, LOGOUT_PATH, LoginRequest, LoginResponse, REFRESH_PATH,
    RefreshRequest, RefreshResponse, SIGNUP_PATH, USER_SNAPSHOT_PATH,
};
pub use client::{
    ApiClient, ApiClientConfig, AUTH_EXEMPT_PATHS, DEFAULT_TIMEOUT_MS, DispatchRequest,
    DispatchResponse, Dispatcher, HttpDispatcher, Method, is_auth_exempt,
};
pub use error::ApiError;
