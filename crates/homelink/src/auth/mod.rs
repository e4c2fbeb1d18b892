//! Hub credential verification.
//!
//! Hubs authenticate with the username and password of the user that owns
//! them. Checking those credentials is delegated to a [`CredentialVerifier`].

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Checks hub credentials.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Returns the owning user id when the credentials are valid.
    async fn verify(&self, username: &str, password: &str) -> Option<String>;
}

/// A user allowed to authenticate hubs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubUser {
    pub username: String,
    /// Id recorded as the owner of hubs this user authenticates.
    pub user_id: String,
    /// Password hash (bcrypt).
    pub password_hash: String,
}

impl HubUser {
    /// Verify a password against this user's hash.
    pub fn verify_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub users: Vec<HubUser>,
}

/// Verifier backed by the users listed in the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredCredentials {
    users: Vec<HubUser>,
}

impl ConfiguredCredentials {
    pub fn new(config: &AuthConfig) -> Self {
        if config.users.is_empty() {
            warn!("No hub users configured; every hub authentication will fail");
        }
        Self {
            users: config.users.clone(),
        }
    }
}

#[async_trait]
impl CredentialVerifier for ConfiguredCredentials {
    async fn verify(&self, username: &str, password: &str) -> Option<String> {
        let Some(user) = self.users.iter().find(|u| u.username == username).cloned() else {
            debug!("Unknown hub user {}", username);
            return None;
        };

        // bcrypt verification is CPU bound.
        let password = password.to_string();
        let verified = tokio::task::spawn_blocking(move || {
            user.verify_password(&password).then_some(user.user_id)
        })
        .await;

        match verified {
            Ok(user_id) => user_id,
            Err(e) => {
                warn!("Password verification task failed: {}", e);
                None
            }
        }
    }
}
