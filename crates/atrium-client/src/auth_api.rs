//! Wire types and transport for the auth endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use atrium_session::{AuthTransport, TokenPair, TransportError, UserSnapshot};
use serde::{Deserialize, Serialize};

use crate::client::{DispatchRequest, Dispatcher, Method, request_id};

pub const LOGIN_PATH: &str = "/auth/login";
pub const SIGNUP_PATH: &str = "/auth/signup";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const REFRESH_PATH: &str = "/auth/token/refresh";
pub const USER_SNAPSHOT_PATH: &str = "/auth/me";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    pub user: UserSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    /// Absent when the server does not rotate the refresh token; the old
    /// one stays valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

/// [`AuthTransport`] over the shared dispatcher. A 4xx from the refresh
/// endpoint maps to [`TransportError::Rejected`], the sole forced-logout
/// trigger; everything else is a network failure.
pub struct HttpAuthTransport {
    base_url: String,
    dispatcher: Arc<dyn Dispatcher>,
    user_snapshot_path: String,
}

impl HttpAuthTransport {
    #[must_use]
    pub fn new(
        base_url: String,
        dispatcher: Arc<dyn Dispatcher>,
        user_snapshot_path: String,
    ) -> Self {
        Self {
            base_url,
            dispatcher,
            user_snapshot_path,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl AuthTransport for HttpAuthTransport {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TransportError> {
        let body = serde_json::to_value(RefreshRequest {
            refresh: refresh_token.to_string(),
        })
        .map_err(|error| TransportError::Network {
            message: error.to_string(),
        })?;

        let request = DispatchRequest {
            method: Method::Post,
            url: self.url(REFRESH_PATH),
            bearer: None,
            body: Some(body),
            request_id: request_id(),
        };
        let response = self
            .dispatcher
            .dispatch(request)
            .await
            .map_err(|error| TransportError::Network {
                message: error.to_string(),
            })?;

        if (400..500).contains(&response.status) {
            return Err(TransportError::Rejected {
                status: response.status,
            });
        }
        if !response.is_success() {
            return Err(TransportError::Network {
                message: format!("refresh_http_{}", response.status),
            });
        }

        let decoded: RefreshResponse =
            serde_json::from_slice(&response.body).map_err(|error| TransportError::Network {
                message: error.to_string(),
            })?;
        let rotated_refresh = decoded
            .refresh
            .unwrap_or_else(|| refresh_token.to_string());
        Ok(TokenPair::new(decoded.access, rotated_refresh))
    }

    async fn fetch_user(&self, access_token: &str) -> Result<UserSnapshot, TransportError> {
        let request = DispatchRequest {
            method: Method::Get,
            url: self.url(&self.user_snapshot_path),
            bearer: Some(access_token.to_string()),
            body: None,
            request_id: request_id(),
        };
        let response = self
            .dispatcher
            .dispatch(request)
            .await
            .map_err(|error| TransportError::Network {
                message: error.to_string(),
            })?;

        if !response.is_success() {
            return Err(TransportError::Network {
                message: format!("user_snapshot_http_{}", response.status),
            });
        }
        serde_json::from_slice(&response.body).map_err(|error| TransportError::Network {
            message: error.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDispatcher, json_response, status_response};
    use serde_json::json;

    fn transport(dispatcher: Arc<FakeDispatcher>) -> HttpAuthTransport {
        HttpAuthTransport::new(
            "https://api.example.com".to_string(),
            dispatcher,
            USER_SNAPSHOT_PATH.to_string(),
        )
    }

    #[tokio::test]
    async fn refresh_keeps_old_token_when_rotation_is_partial() {
        let dispatcher = Arc::new(FakeDispatcher::default());
        dispatcher.push(json_response(200, &json!({"access": "a2"})));

        let pair = transport(dispatcher.clone())
            .refresh("r1")
            .await
            .expect("pair");
        assert_eq!(pair.access, "a2");
        assert_eq!(pair.refresh, "r1");
        assert_eq!(dispatcher.log()[0].bearer, None);
    }

    #[tokio::test]
    async fn refresh_adopts_rotated_refresh_token() {
        let dispatcher = Arc::new(FakeDispatcher::default());
        dispatcher.push(json_response(200, &json!({"access": "a2", "refresh": "r2"})));

        let pair = transport(dispatcher).refresh("r1").await.expect("pair");
        assert_eq!(pair.refresh, "r2");
    }

    #[tokio::test]
    async fn refresh_rejection_maps_any_client_error() {
        for status in [400, 401, 403] {
            let dispatcher = Arc::new(FakeDispatcher::default());
            dispatcher.push(status_response(status));
            let outcome = transport(dispatcher).refresh("r1").await;
            assert_eq!(outcome, Err(TransportError::Rejected { status }));
        }
    }

    #[tokio::test]
    async fn refresh_server_error_is_network_not_rejection() {
        let dispatcher = Arc::new(FakeDispatcher::default());
        dispatcher.push(status_response(503));
        let outcome = transport(dispatcher).refresh("r1").await;
        assert!(matches!(outcome, Err(TransportError::Network { .. })));
    }

    #[tokio::test]
    async fn fetch_user_sends_bearer_and_decodes_snapshot() {
        let dispatcher = Arc::new(FakeDispatcher::default());
        dispatcher.push(json_response(
            200,
            &json!({"id": "u1", "email": "u1@example.com", "name": "U One"}),
        ));

        let user = transport(dispatcher.clone())
            .fetch_user("a1")
            .await
            .expect("user");
        assert_eq!(user.id, "u1");
        assert_eq!(user.name.as_deref(), Some("U One"));
        assert_eq!(dispatcher.log()[0].bearer.as_deref(), Some("a1"));
    }
}
