use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atrium_session::{RefreshCoordinator, SessionStore, UserSnapshot};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::auth_api::{
    self, HttpAuthTransport, LOGIN_PATH, LOGOUT_PATH, LoginRequest, LoginResponse, REFRESH_PATH,
    SIGNUP_PATH,
};
use crate::error::{ApiError, http_error};

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Paths exempt from the 401 refresh-and-retry path. Retrying these would
/// recurse into the refresh flow.
pub const AUTH_EXEMPT_PATHS: &[&str] = &[LOGIN_PATH, SIGNUP_PATH, REFRESH_PATH];

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub user_snapshot_path: String,
}

impl ApiClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            user_snapshot_path: auth_api::USER_SNAPSHOT_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: Option<serde_json::Value>,
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl DispatchResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

/// Wire seam under the middleware. Production uses [`HttpDispatcher`];
/// tests script responses without a network.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, ApiError>;
}

pub struct HttpDispatcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpDispatcher {
    #[must_use]
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout: Duration::from_millis(timeout_ms.max(250)),
        }
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, ApiError> {
        let mut builder = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url),
            Method::Put => self.http.put(&request.url),
            Method::Delete => self.http.delete(&request.url),
        };
        builder = builder
            .header("x-request-id", &request.request_id)
            .timeout(self.timeout);
        if let Some(bearer) = &request.bearer {
            builder = builder.bearer_auth(bearer);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|error| ApiError::Request {
            message: error.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|error| ApiError::Read {
                message: error.to_string(),
            })?
            .to_vec();
        Ok(DispatchResponse { status, body })
    }
}

/// Authenticated HTTP client. Attaches the current access token to every
/// request, and on a 401 rotates the token through the shared coordinator
/// and retries exactly once. Auth endpoints themselves are exempt.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    session: SessionStore,
    coordinator: RefreshCoordinator,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig, session: SessionStore) -> Result<Self, ApiError> {
        let dispatcher = Arc::new(HttpDispatcher::new(config.timeout_ms));
        Self::with_dispatcher(config, session, dispatcher)
    }

    /// Wires the client over a caller-supplied dispatcher. The refresh
    /// coordinator shares that dispatcher, so there is exactly one wire
    /// seam per client.
    pub fn with_dispatcher(
        config: ApiClientConfig,
        session: SessionStore,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(&config.base_url)?;
        let transport = HttpAuthTransport::new(
            base_url.clone(),
            dispatcher.clone(),
            config.user_snapshot_path,
        );
        let coordinator = RefreshCoordinator::new(session.clone(), Arc::new(transport));
        Ok(Self {
            base_url,
            session,
            coordinator,
            dispatcher,
        })
    }

    #[must_use]
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    #[must_use]
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    pub async fn get_json<T>(&self, path: &str) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let response = self.send_with_auth(Method::Get, path, None).await?;
        decode_json(&response)
    }

    pub async fn post_json<Req, Res>(&self, path: &str, payload: &Req) -> Result<Res, ApiError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let body = encode_body(payload)?;
        let response = self.send_with_auth(Method::Post, path, Some(body)).await?;
        decode_json(&response)
    }

    pub async fn put_json<Req, Res>(&self, path: &str, payload: &Req) -> Result<Res, ApiError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let body = encode_body(payload)?;
        let response = self.send_with_auth(Method::Put, path, Some(body)).await?;
        decode_json(&response)
    }

    pub async fn delete_json<T>(&self, path: &str) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let response = self.send_with_auth(Method::Delete, path, None).await?;
        decode_json(&response)
    }

    /// Posts credentials and seeds the session store in one step: tokens
    /// plus the user snapshot from the login response.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserSnapshot, ApiError> {
        self.session.mark_authenticating();
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        match self.post_json::<_, LoginResponse>(LOGIN_PATH, &request).await {
            Ok(login) => {
                self.session.set_tokens(&login.access, &login.refresh);
                self.session.set_user(login.user.clone());
                Ok(login.user)
            }
            Err(error) => {
                // A failed attempt is scoped to itself: an existing valid
                // session (tokens included) must survive a bad password or
                // a network blip. Only AuthFatal clears session state.
                self.session.reset_authenticating();
                Err(error)
            }
        }
    }

    /// Clears the session unconditionally; the server-side call is
    /// best-effort and bypasses the retry path.
    pub async fn logout(&self) {
        if let (Some(token), Some(url)) = (self.session.access_token(), self.endpoint(LOGOUT_PATH))
        {
            let request = DispatchRequest {
                method: Method::Post,
                url,
                bearer: Some(token),
                body: None,
                request_id: request_id(),
            };
            if let Err(error) = self.dispatcher.dispatch(request).await {
                tracing::debug!(%error, "logout call failed");
            }
        }
        self.session.clear();
    }

    /// The middleware path: attach token, dispatch, and on a 401 for a
    /// non-exempt path rotate and retry exactly once. A second 401 on the
    /// retried request is terminal.
    pub async fn send_with_auth(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<DispatchResponse, ApiError> {
        let url = self.endpoint(path).ok_or(ApiError::InvalidPath)?;
        let exempt = is_auth_exempt(path);
        let bearer = if exempt {
            None
        } else {
            self.session.access_token()
        };

        let request = DispatchRequest {
            method,
            url: url.clone(),
            bearer,
            body: body.clone(),
            request_id: request_id(),
        };
        let response = self.dispatcher.dispatch(request).await?;
        if !response.is_unauthorized() || exempt {
            return Ok(response);
        }

        tracing::debug!(path, "authorization failure, rotating token before single retry");
        let token = self.coordinator.ensure_fresh().await?;

        let retry = DispatchRequest {
            method,
            url,
            bearer: Some(token),
            body,
            request_id: request_id(),
        };
        let retried = self.dispatcher.dispatch(retry).await?;
        if retried.is_unauthorized() {
            tracing::warn!(path, "retried request rejected after rotation");
            self.session.clear();
            return Err(ApiError::AuthFatal {
                reason: "retried request rejected after rotation".to_string(),
            });
        }
        Ok(retried)
    }
}

#[must_use]
pub fn is_auth_exempt(path: &str) -> bool {
    let trimmed = path.trim();
    let normalized = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    AUTH_EXEMPT_PATHS
        .iter()
        .any(|exempt| normalized.starts_with(exempt))
}

pub(crate) fn request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn normalize_base_url(base_url: &str) -> Result<String, ApiError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn encode_body<Req>(payload: &Req) -> Result<serde_json::Value, ApiError>
where
    Req: Serialize + ?Sized,
{
    serde_json::to_value(payload).map_err(|error| ApiError::Decode {
        message: error.to_string(),
    })
}

fn decode_json<T>(response: &DispatchResponse) -> Result<T, ApiError>
where
    T: DeserializeOwned,
{
    if !response.is_success() {
        return Err(http_error(response.status, &response.body));
    }
    serde_json::from_slice(&response.body).map_err(|error| ApiError::Decode {
        message: error.to_string(),
    })
}
