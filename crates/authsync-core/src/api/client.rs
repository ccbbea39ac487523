//! API client for the authentication service and the protected API behind it.
//!
//! Every request carries the current access token. A 401 tagged
//! `token.expired` suspends the request behind one shared renewal and
//! replays it with the new token; any other 401 ends the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use reqwest::header;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::auth::context::sign_out_locally;
use crate::auth::{sign_out, CredentialStore, ExecutionContext, RequestContext};
use crate::config::AuthConfig;
use crate::models::{Credentials, RefreshRequest, SessionResponse, TokenPair, User};

use super::renewal::RenewalCoordinator;
use super::transport::{ApiRequest, ApiResponse, Transport};
use super::ApiError;

struct ClientInner {
    transport: Arc<dyn Transport>,
    credentials: CredentialStore,
    config: AuthConfig,
    context: ExecutionContext,
    /// Default `Authorization` token for requests that carry none.
    default_token: RwLock<Option<String>>,
    renewal: RenewalCoordinator,
    /// Bumped on every sign-out this client performs or is asked to perform.
    sign_out_epoch: AtomicU64,
}

/// Clone is cheap - clones share the transport, token, and renewal state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Create a client, capturing the stored access token as the default header.
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: CredentialStore,
        config: AuthConfig,
        context: ExecutionContext,
    ) -> Self {
        let token = credentials.access_token().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read stored access token");
            None
        });

        Self {
            inner: Arc::new(ClientInner {
                transport,
                credentials,
                config,
                context,
                default_token: RwLock::new(token),
                renewal: RenewalCoordinator::new(),
                sign_out_epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Client bound to one server-rendered request's cookies.
    pub fn for_server(
        config: &AuthConfig,
        request: &RequestContext,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::new(
            transport,
            request.credentials(config),
            config.clone(),
            ExecutionContext::Server,
        )
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.inner.context
    }

    pub fn default_token(&self) -> Option<String> {
        self.inner
            .default_token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_default_token(&self, token: &str) {
        *self
            .inner
            .default_token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token.to_string());
    }

    /// Changes whenever the session ends, so state derived from an earlier
    /// session can tell it is stale.
    pub fn sign_out_epoch(&self) -> u64 {
        self.inner.sign_out_epoch.load(Ordering::SeqCst)
    }

    /// Destroy both tokens and, with a UI, broadcast and navigate away.
    pub fn sign_out(&self) {
        self.inner.sign_out_epoch.fetch_add(1, Ordering::SeqCst);
        sign_out(&self.inner.credentials, &self.inner.context, &self.inner.config);
    }

    /// Sign-out effects for a session that ended in another tab.
    pub(crate) fn sign_out_locally(&self) {
        self.inner.sign_out_epoch.fetch_add(1, Ordering::SeqCst);
        sign_out_locally(&self.inner.credentials, &self.inner.context, &self.inner.config);
    }

    fn authorize(&self, mut request: ApiRequest) -> Result<ApiRequest, ApiError> {
        if !request.headers.contains_key(header::AUTHORIZATION) {
            if let Some(token) = self.default_token() {
                request.set_bearer(&token)?;
            }
        }
        Ok(request)
    }

    /// Send without the renewal interceptor; non-2xx becomes an `ApiError`.
    async fn send_direct(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let response = self.inner.transport.send(request).await?;
        if response.status.is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.body))
        }
    }

    /// Send through the renewal interceptor.
    ///
    /// Resolves exactly once: with the first response, with the replayed
    /// response after a renewal, or with an error.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut outgoing = self.authorize(request)?;
        let mut renewed = false;

        loop {
            let error = match self.send_direct(&outgoing).await {
                Ok(response) => return Ok(response),
                Err(error) if !error.is_unauthorized() => return Err(error),
                Err(error) => error,
            };

            if !error.is_token_expired() {
                return Err(self.reject_session(error));
            }

            if renewed {
                warn!(path = %outgoing.path, "Token still expired after renewal");
                return Err(error);
            }

            debug!(path = %outgoing.path, "Access token expired, waiting on renewal");
            let token = self.renew_token().await?;
            outgoing.set_bearer(&token)?;
            renewed = true;
        }
    }

    /// A 401 that renewal cannot fix.
    fn reject_session(&self, error: ApiError) -> ApiError {
        match &self.inner.context {
            ExecutionContext::Interactive { .. } => {
                self.sign_out();
                error
            }
            ExecutionContext::Server => ApiError::InvalidAuthToken(error.to_string()),
        }
    }

    async fn renew_token(&self) -> Result<String, ApiError> {
        let client = self.clone();
        self.inner
            .renewal
            .renew(move || async move { client.perform_renewal().await })
            .await
    }

    /// The one renewal call. On failure, the returned error is what every
    /// queued request receives.
    async fn perform_renewal(self) -> Result<String, ApiError> {
        match self.exchange_refresh_token().await {
            Ok(tokens) => {
                self.set_default_token(&tokens.access_token);
                Ok(tokens.access_token)
            }
            Err(error) => Err(match &self.inner.context {
                ExecutionContext::Interactive { .. } => {
                    self.sign_out();
                    ApiError::RenewalFailed(Box::new(error))
                }
                ExecutionContext::Server => ApiError::InvalidAuthToken(error.to_string()),
            }),
        }
    }

    async fn exchange_refresh_token(&self) -> Result<TokenPair, ApiError> {
        let refresh_token = self
            .inner
            .credentials
            .refresh_token()
            .map_err(|e| ApiError::Storage(e.to_string()))?
            .ok_or_else(|| ApiError::Storage("No refresh token stored".to_string()))?;

        let body = serde_json::to_value(RefreshRequest {
            refresh_token: &refresh_token,
        })
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        let request = self.authorize(ApiRequest::post("/refresh", body))?;

        let tokens: TokenPair = self.send_direct(&request).await?.json()?;
        self.inner
            .credentials
            .save_tokens(&tokens)
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        Ok(tokens)
    }

    // ===== Typed requests =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode body: {}", e)))?;
        self.send(ApiRequest::post(path, body)).await?.json()
    }

    // ===== Authentication service =====

    /// `POST /sessions`. Bypasses the interceptor: a rejected login is not a
    /// reason to end anyone's session.
    pub async fn create_session(&self, credentials: &Credentials) -> Result<SessionResponse, ApiError> {
        let body = serde_json::to_value(credentials)
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        let response = self.send_direct(&ApiRequest::post("/sessions", body)).await?;
        info!("Session created");
        response.json()
    }

    /// `GET /me`
    pub async fn me(&self) -> Result<User, ApiError> {
        self.get("/me").await
    }
}
