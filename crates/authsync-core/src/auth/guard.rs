//! Authentication guard for server-rendered requests.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::config::AuthConfig;

use super::cookies::MemoryCookieStore;
use super::credentials::CredentialStore;

/// Cookies of one server-rendered request. Clone shares the same cookies.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cookies: MemoryCookieStore,
}

impl RequestContext {
    pub fn new(cookies: MemoryCookieStore) -> Self {
        Self { cookies }
    }

    pub fn from_cookie_header(header: &str) -> Self {
        Self::new(MemoryCookieStore::from_cookie_header(header))
    }

    pub fn cookies(&self) -> &MemoryCookieStore {
        &self.cookies
    }

    pub fn credentials(&self, config: &AuthConfig) -> CredentialStore {
        CredentialStore::new(Arc::new(self.cookies.clone()), config)
    }

    /// `Set-Cookie` values to attach to the response.
    pub fn take_set_cookie_headers(&self) -> Vec<String> {
        self.cookies.take_set_cookie_headers()
    }
}

/// What a server-rendering handler produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerSideResult<P> {
    Props(P),
    Redirect { destination: String, permanent: bool },
}

impl<P> ServerSideResult<P> {
    pub fn redirect(destination: impl Into<String>) -> Self {
        ServerSideResult::Redirect {
            destination: destination.into(),
            permanent: false,
        }
    }
}

fn is_invalid_auth_token(error: &anyhow::Error) -> bool {
    error
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<ApiError>(), Some(e) if e.is_invalid_auth_token()))
}

/// Run `handler` only for requests that carry an access token.
///
/// Without a token the request is redirected to the public route and the
/// handler never runs. An invalid-token error from the handler clears both
/// tokens and redirects; any other error is returned unchanged.
pub async fn with_ssr_auth<P, F, Fut>(
    config: &AuthConfig,
    request: &RequestContext,
    handler: F,
) -> Result<ServerSideResult<P>>
where
    F: FnOnce(RequestContext) -> Fut,
    Fut: Future<Output = Result<ServerSideResult<P>>>,
{
    let credentials = request.credentials(config);

    if credentials.access_token()?.is_none() {
        debug!("No access token on request, redirecting");
        return Ok(ServerSideResult::redirect(&config.public_route));
    }

    match handler(request.clone()).await {
        Ok(result) => Ok(result),
        Err(error) if is_invalid_auth_token(&error) => {
            warn!(error = %error, "Invalid authentication token, clearing session");
            credentials.clear()?;
            Ok(ServerSideResult::redirect(&config.public_route))
        }
        Err(error) => Err(error),
    }
}
