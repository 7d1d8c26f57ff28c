//! Authentication configuration.

use serde::{Deserialize, Serialize};

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret shared with the identity service. Supports the
    /// `env:VAR_NAME` syntax to read the secret from the environment.
    /// Without it, JWT validation fails and only anonymous session
    /// chatters can use the service.
    pub jwt_secret: Option<String>,

    /// Origins allowed by CORS. Empty means any origin, without
    /// credentials.
    pub allowed_origins: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl AuthConfig {
    /// Resolve `env:VAR_NAME` syntax in the JWT secret.
    pub fn resolve_jwt_secret(&self) -> Option<String> {
        let secret = self.jwt_secret.as_ref()?;
        match secret.strip_prefix("env:") {
            Some(var) => std::env::var(var).ok(),
            None => Some(secret.clone()),
        }
    }
}
