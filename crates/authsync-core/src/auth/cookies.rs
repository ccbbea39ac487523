//! Persistent, path-scoped, expiring key/value storage for tokens.
//!
//! `CookieStore` is the storage seam; three backends are provided:
//! an in-memory store (server request contexts, tests), a JSON cookie jar
//! on disk, and the OS keychain.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Keychain service name for `KeyringCookieStore`
const SERVICE_NAME: &str = "authsync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub max_age_secs: i64,
    pub path: String,
}

pub trait CookieStore: Send + Sync {
    /// Returns the value, or `None` when absent or expired.
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str, options: &CookieOptions) -> Result<()>;

    /// Removing an absent key is not an error.
    fn destroy(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCookie {
    value: String,
    path: String,
    /// `None` for cookies received from a request header, whose expiry is unknown.
    expires_at: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn new(value: &str, options: &CookieOptions) -> Self {
        Self {
            value: value.to_string(),
            path: options.path.clone(),
            expires_at: Some(Utc::now() + Duration::seconds(options.max_age_secs)),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Utc::now() >= at).unwrap_or(false)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// In-memory store
// ============================================================================

/// Cookie store scoped to one process or one server request.
///
/// Every `set`/`destroy` is also recorded as a `Set-Cookie` directive so a
/// server handler can forward the changes on its response.
#[derive(Debug, Clone, Default)]
pub struct MemoryCookieStore {
    cookies: Arc<Mutex<HashMap<String, StoredCookie>>>,
    set_cookie: Arc<Mutex<Vec<String>>>,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from an incoming `Cookie:` header (`a=1; b=2`).
    pub fn from_cookie_header(header: &str) -> Self {
        let store = Self::new();
        {
            let mut cookies = lock(&store.cookies);
            for pair in header.split(';') {
                let Some((name, value)) = pair.split_once('=') else {
                    continue;
                };
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                cookies.insert(
                    name.to_string(),
                    StoredCookie {
                        value: value.trim().to_string(),
                        path: "/".to_string(),
                        expires_at: None,
                    },
                );
            }
        }
        store
    }

    /// Drain the `Set-Cookie` directives recorded since the last call.
    pub fn take_set_cookie_headers(&self) -> Vec<String> {
        std::mem::take(&mut *lock(&self.set_cookie))
    }
}

impl CookieStore for MemoryCookieStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let cookies = lock(&self.cookies);
        Ok(cookies
            .get(key)
            .filter(|c| !c.is_expired())
            .map(|c| c.value.clone()))
    }

    fn set(&self, key: &str, value: &str, options: &CookieOptions) -> Result<()> {
        let mut cookies = lock(&self.cookies);
        cookies.retain(|_, c| !c.is_expired());
        cookies.insert(key.to_string(), StoredCookie::new(value, options));
        drop(cookies);
        lock(&self.set_cookie).push(format!(
            "{}={}; Max-Age={}; Path={}",
            key, value, options.max_age_secs, options.path
        ));
        Ok(())
    }

    fn destroy(&self, key: &str) -> Result<()> {
        let removed = {
            let mut cookies = lock(&self.cookies);
            cookies.retain(|_, c| !c.is_expired());
            cookies.remove(key)
        };
        // The directive must carry the cookie's own path to replace it
        let path = removed.map(|c| c.path).unwrap_or_else(|| "/".to_string());
        lock(&self.set_cookie).push(format!("{}=; Max-Age=-1; Path={}", key, path));
        Ok(())
    }
}

// ============================================================================
// File-backed cookie jar
// ============================================================================

/// JSON cookie jar on disk; survives process restarts.
pub struct FileCookieStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCookieStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<HashMap<String, StoredCookie>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read cookie jar {}", self.path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse cookie jar")
    }

    fn save(&self, cookies: &HashMap<String, StoredCookie>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(cookies)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write cookie jar {}", self.path.display()))?;
        Ok(())
    }
}

impl CookieStore for FileCookieStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = lock(&self.write_lock);
        Ok(self
            .load()?
            .remove(key)
            .filter(|c| !c.is_expired())
            .map(|c| c.value))
    }

    fn set(&self, key: &str, value: &str, options: &CookieOptions) -> Result<()> {
        let _guard = lock(&self.write_lock);
        let mut cookies = self.load()?;
        cookies.retain(|_, c| !c.is_expired());
        cookies.insert(key.to_string(), StoredCookie::new(value, options));
        self.save(&cookies)
    }

    fn destroy(&self, key: &str) -> Result<()> {
        let _guard = lock(&self.write_lock);
        let mut cookies = self.load()?;
        if cookies.remove(key).is_some() {
            self.save(&cookies)?;
        }
        Ok(())
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// Stores each cookie as a keychain entry holding the value and its expiry.
pub struct KeyringCookieStore;

impl KeyringCookieStore {
    fn entry(key: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, key).context("Failed to create keyring entry")
    }
}

impl CookieStore for KeyringCookieStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match Self::entry(key)?.get_password() {
            Ok(raw) => {
                let cookie: StoredCookie =
                    serde_json::from_str(&raw).context("Failed to parse keychain cookie")?;
                if cookie.is_expired() {
                    debug!(key, "Keychain cookie expired");
                    return Ok(None);
                }
                Ok(Some(cookie.value))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read cookie from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str, options: &CookieOptions) -> Result<()> {
        let raw = serde_json::to_string(&StoredCookie::new(value, options))?;
        Self::entry(key)?
            .set_password(&raw)
            .context("Failed to store cookie in keychain")
    }

    fn destroy(&self, key: &str) -> Result<()> {
        match Self::entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete cookie from keychain"),
        }
    }
}
