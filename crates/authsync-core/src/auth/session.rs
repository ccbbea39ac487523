use std::ops::ControlFlow;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::models::{Credentials, User};

use super::channel::AuthEvent;
use super::context::ExecutionContext;
use super::permissions::validate_user_permissions;

/// Authentication state for one tab.
///
/// Owns the current `User`; `is_authenticated` is derived from it. The user is
/// tagged with the client's sign-out epoch, so a sign-out started by the
/// interceptor hides it too.
pub struct Session {
    client: ApiClient,
    user: RwLock<Option<(u64, User)>>,
}

impl Session {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            user: RwLock::new(None),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn user(&self) -> Option<User> {
        self.with_user(|user| user.cloned())
    }

    fn with_user<T>(&self, f: impl FnOnce(Option<&User>) -> T) -> T {
        let epoch = self.client.sign_out_epoch();
        let user = self.user.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(user
            .as_ref()
            .filter(|(set_at, _)| *set_at == epoch)
            .map(|(_, user)| user))
    }

    fn set_user(&self, user: Option<User>) {
        let epoch = self.client.sign_out_epoch();
        *self
            .user
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = user.map(|user| (epoch, user));
    }

    pub fn is_authenticated(&self) -> bool {
        self.with_user(|user| user.is_some())
    }

    /// Permission check against the current user.
    pub fn can(&self, permissions: &[&str], roles: &[&str]) -> bool {
        self.with_user(|user| validate_user_permissions(user, permissions, roles))
    }

    /// Sign in with email and password.
    ///
    /// Failures are logged and absorbed; check `is_authenticated()` afterwards.
    pub async fn sign_in(&self, email: &str, password: &str) {
        if let Err(e) = self.try_sign_in(email, password).await {
            warn!(error = %e, "Sign-in failed");
        }
    }

    async fn try_sign_in(&self, email: &str, password: &str) -> Result<()> {
        let response = self
            .client
            .create_session(&Credentials::new(email, password))
            .await
            .context("Session request rejected")?;
        let (tokens, user) = response.into_user(email);

        self.client
            .credentials()
            .save_tokens(&tokens)
            .context("Failed to store tokens")?;
        self.client.set_default_token(&tokens.access_token);
        self.set_user(Some(user));
        info!("Signed in");

        if let ExecutionContext::Interactive {
            navigator,
            notifier,
        } = self.client.context()
        {
            navigator.push(&self.client.config().authenticated_route);
            notifier.publish(AuthEvent::SignIn);
        }
        Ok(())
    }

    pub fn sign_out(&self) {
        self.set_user(None);
        self.client.sign_out();
    }

    /// Restore the user from a stored access token, signing out if the
    /// service no longer accepts it.
    pub async fn restore(&self) {
        match self.client.credentials().access_token() {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!("No stored access token, nothing to restore");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read stored access token");
                return;
            }
        }

        match self.client.me().await {
            Ok(user) => {
                debug!("Session restored");
                self.set_user(Some(user));
            }
            Err(e) => {
                debug!(error = %e, "Stored session rejected");
                // A rejected token has already been cleared by the interceptor
                if matches!(self.client.credentials().access_token(), Ok(Some(_))) {
                    self.sign_out();
                } else {
                    self.set_user(None);
                }
            }
        }
    }

    /// React to an event from another tab. `Break` means stop listening.
    pub fn handle_event(&self, event: AuthEvent) -> ControlFlow<()> {
        match event {
            AuthEvent::SignOut => {
                info!("Signed out in another tab");
                self.set_user(None);
                self.client.sign_out_locally();
                ControlFlow::Break(())
            }
            AuthEvent::SignIn => {
                if let ExecutionContext::Interactive { navigator, .. } = self.client.context() {
                    navigator.reload();
                }
                ControlFlow::Continue(())
            }
        }
    }

    /// Spawn this tab's cross-tab listener. `None` without an interactive UI.
    pub fn listen(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let ExecutionContext::Interactive { notifier, .. } = self.client.context() else {
            return None;
        };

        let mut events = notifier.events();
        let session = Arc::clone(self);
        Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if session.handle_event(event).is_break() {
                    break;
                }
            }
            debug!("Cross-tab listener stopped");
        }))
    }
}
