use std::sync::Arc;

use anyhow::Result;

use crate::config::AuthConfig;
use crate::models::TokenPair;

use super::cookies::{CookieOptions, CookieStore};

/// Access/refresh token persistence on top of a `CookieStore`.
///
/// Clone is cheap; clones share the same backend.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn CookieStore>,
    access_key: String,
    refresh_key: String,
    options: CookieOptions,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn CookieStore>, config: &AuthConfig) -> Self {
        Self {
            store,
            access_key: config.access_cookie.clone(),
            refresh_key: config.refresh_cookie.clone(),
            options: CookieOptions {
                max_age_secs: config.cookie_max_age_secs,
                path: config.cookie_path.clone(),
            },
        }
    }

    pub fn access_token(&self) -> Result<Option<String>> {
        self.store.get(&self.access_key)
    }

    pub fn refresh_token(&self) -> Result<Option<String>> {
        self.store.get(&self.refresh_key)
    }

    /// Write both tokens with the configured lifetime and path.
    pub fn save_tokens(&self, tokens: &TokenPair) -> Result<()> {
        self.store
            .set(&self.access_key, &tokens.access_token, &self.options)?;
        self.store
            .set(&self.refresh_key, &tokens.refresh_token, &self.options)?;
        Ok(())
    }

    /// Destroy both tokens. Attempts both even if the first fails.
    pub fn clear(&self) -> Result<()> {
        let access = self.store.destroy(&self.access_key);
        let refresh = self.store.destroy(&self.refresh_key);
        access.and(refresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCookieStore;

    fn tokens(access: &str, refresh: &str) -> TokenPair {
        TokenPair {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        }
    }

    #[test]
    fn test_save_and_clear_tokens() {
        let backend = MemoryCookieStore::new();
        let creds = CredentialStore::new(Arc::new(backend.clone()), &AuthConfig::default());

        assert_eq!(creds.access_token().unwrap(), None);

        creds.save_tokens(&tokens("T1", "R1")).unwrap();
        assert_eq!(creds.access_token().unwrap().as_deref(), Some("T1"));
        assert_eq!(creds.refresh_token().unwrap().as_deref(), Some("R1"));
        assert_eq!(
            backend.take_set_cookie_headers(),
            vec![
                "ignite-next-auth.token=T1; Max-Age=2592000; Path=/".to_string(),
                "ignite-next-auth.refreshToken=R1; Max-Age=2592000; Path=/".to_string(),
            ]
        );

        creds.clear().unwrap();
        assert_eq!(creds.access_token().unwrap(), None);
        assert_eq!(creds.refresh_token().unwrap(), None);
    }

    #[test]
    fn test_clear_without_tokens_is_ok() {
        let creds = CredentialStore::new(Arc::new(MemoryCookieStore::new()), &AuthConfig::default());
        creds.clear().unwrap();
        creds.clear().unwrap();
    }
}
