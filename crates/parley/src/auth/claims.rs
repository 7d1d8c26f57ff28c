//! JWT claims and user roles.

use serde::{Deserialize, Serialize};

use super::error::AuthError;

/// User role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular user.
    #[default]
    User,
    /// Administrator (support staff).
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id at the identity service.
    pub sub: String,

    /// Expiration time (as Unix timestamp).
    pub exp: i64,

    /// Issued at (as Unix timestamp).
    #[serde(default)]
    pub iat: Option<i64>,

    /// User's email.
    #[serde(default)]
    pub email: Option<String>,

    /// User's name.
    #[serde(default)]
    pub name: Option<String>,

    /// User's roles.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Custom role claim (alternative to the roles array).
    #[serde(default)]
    pub role: Option<String>,
}

impl Claims {
    /// The numeric user id carried in `sub`.
    pub fn user_id(&self) -> Result<i64, AuthError> {
        self.sub
            .parse()
            .map_err(|_| AuthError::InvalidToken(format!("non-numeric subject: {}", self.sub)))
    }

    /// Get the effective role for the user.
    pub fn effective_role(&self) -> Role {
        if let Some(ref role) = self.role {
            if role.eq_ignore_ascii_case("admin") {
                return Role::Admin;
            }
        }

        for role in &self.roles {
            if role.eq_ignore_ascii_case("admin") {
                return Role::Admin;
            }
        }

        Role::User
    }

    /// Check if the user has the admin role.
    pub fn is_admin(&self) -> bool {
        self.effective_role() == Role::Admin
    }
}
