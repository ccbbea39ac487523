//! The HTTP pipeline the client sits on.
//!
//! A `Transport` delivers one request and hands back whatever the server
//! answered; status classification and token renewal live in `ApiClient`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::AuthConfig;

use super::ApiError;

/// A request as the client issues (and replays) it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set `Authorization: Bearer <token>`, replacing any previous value.
    pub fn set_bearer(&mut self, token: &str) -> Result<(), ApiError> {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ApiError::InvalidResponse(format!("Invalid token header: {}", e)))?;
        self.headers.insert(header::AUTHORIZATION, value);
        Ok(())
    }

    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response: {}", e)))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Non-2xx answers are `Ok`; only delivery failures are `Err`.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// `Transport` over a pooled `reqwest::Client`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    config: AuthConfig,
}

impl ReqwestTransport {
    pub fn new(config: &AuthConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self.config.url(&request.path);
        debug!(method = %request.method, url = %url, "Sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone())
            .header(header::ACCEPT, "application/json");
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_bearer_replaces_header() {
        let mut request = ApiRequest::get("/me");
        assert_eq!(request.bearer(), None);

        request.set_bearer("T1").unwrap();
        request.set_bearer("T2").unwrap();
        assert_eq!(request.bearer(), Some("T2"));
        assert_eq!(request.headers.get_all(header::AUTHORIZATION).iter().count(), 1);
    }

    #[test]
    fn test_set_bearer_rejects_control_characters() {
        let mut request = ApiRequest::get("/me");
        assert!(request.set_bearer("bad\ntoken").is_err());
    }

    #[test]
    fn test_response_json() {
        let response = ApiResponse::new(StatusCode::OK, r#"{"token":"T","refreshToken":"R"}"#);
        let tokens: crate::models::TokenPair = response.json().unwrap();
        assert_eq!(tokens.access_token, "T");

        let broken = ApiResponse::new(StatusCode::OK, "<html>");
        assert!(matches!(
            broken.json::<crate::models::TokenPair>(),
            Err(ApiError::InvalidResponse(_))
        ));
    }
}
