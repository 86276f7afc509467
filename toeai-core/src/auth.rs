//! Local identity placeholder
//!
//! There is no real authentication: any name is accepted and logging in
//! always succeeds. The chosen name is remembered in key-value storage
//! so it survives restarts.

use crate::storage::KeyValueStore;
use std::sync::Arc;
use tracing::info;

/// Storage key holding the logged-in username
pub const USER_KEY: &str = "currentUser";

/// Name used when logging in without one
pub const DEFAULT_USERNAME: &str = "demo";

/// The locally remembered login
pub struct Identity {
    storage: Arc<dyn KeyValueStore>,
    username: Option<String>,
}

impl Identity {
    /// Restore the remembered login, if any
    pub fn load(storage: Arc<dyn KeyValueStore>) -> crate::Result<Self> {
        let username = storage
            .get(USER_KEY)?
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        Ok(Self { storage, username })
    }

    /// Log in as `name`, or as [`DEFAULT_USERNAME`] when it is missing or blank
    pub fn login(&mut self, name: Option<&str>) -> crate::Result<&str> {
        let username = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_USERNAME)
            .to_string();
        self.storage.set(USER_KEY, &username)?;
        info!("Logged in as {}", username);
        Ok(self.username.insert(username).as_str())
    }

    /// Same as [`Identity::login`]; registration needs nothing more
    pub fn register(&mut self, name: Option<&str>) -> crate::Result<&str> {
        self.login(name)
    }

    /// Forget the login
    pub fn logout(&mut self) -> crate::Result<()> {
        self.storage.remove(USER_KEY)?;
        if let Some(name) = self.username.take() {
            info!("Logged out {}", name);
        }
        Ok(())
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.username.is_some()
    }
}
