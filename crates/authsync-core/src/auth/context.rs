use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AuthConfig;

use super::channel::{AuthEvent, AuthNotifier};
use super::credentials::CredentialStore;

/// UI routing seam: where the application sends the user.
pub trait Navigator: Send + Sync {
    fn push(&self, route: &str);

    /// Re-derive all state from storage (a full page reload in a browser).
    fn reload(&self);
}

/// Where the client runs: with a navigable UI, or inside one server request.
#[derive(Clone)]
pub enum ExecutionContext {
    Interactive {
        navigator: Arc<dyn Navigator>,
        notifier: AuthNotifier,
    },
    Server,
}

impl ExecutionContext {
    pub fn interactive(navigator: Arc<dyn Navigator>, notifier: AuthNotifier) -> Self {
        ExecutionContext::Interactive {
            navigator,
            notifier,
        }
    }

    pub fn has_interactive_ui(&self) -> bool {
        matches!(self, ExecutionContext::Interactive { .. })
    }
}

/// End the session: destroy both tokens, tell the other tabs, go to the
/// public route. Safe to call with no session. Only clears tokens in a
/// server context.
pub fn sign_out(credentials: &CredentialStore, context: &ExecutionContext, config: &AuthConfig) {
    end_session(credentials, context, config, true);
}

/// Local sign-out effects without re-broadcasting (reaction to another tab).
pub(crate) fn sign_out_locally(
    credentials: &CredentialStore,
    context: &ExecutionContext,
    config: &AuthConfig,
) {
    end_session(credentials, context, config, false);
}

fn end_session(
    credentials: &CredentialStore,
    context: &ExecutionContext,
    config: &AuthConfig,
    broadcast: bool,
) {
    if let Err(e) = credentials.clear() {
        warn!(error = %e, "Failed to clear stored tokens");
    }

    if let ExecutionContext::Interactive {
        navigator,
        notifier,
    } = context
    {
        info!(broadcast, "Signing out");
        if broadcast {
            notifier.publish(AuthEvent::SignOut);
        }
        navigator.push(&config.public_route);
    }
}
