//! Chatter authentication middleware.
//!
//! Every request on the chatter surface resolves to a stable chatter id.
//! Registered users present a JWT (header, or query parameter for
//! WebSocket upgrades); visitors without an account are tracked through an
//! anonymous session cookie whose chatter row is created lazily.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{
        HeaderValue,
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
        request::Parts,
    },
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation, decode, encode};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::AppState;

use super::claims::{Claims, Role};
use super::config::AuthConfig;
use super::error::AuthError;

/// Cookie carrying the anonymous chat session.
const SESSION_COOKIE: &str = "chat_session";

/// Length of a generated session string.
const SESSION_LENGTH: usize = 64;

/// Anonymous session lifetime (5 days).
const SESSION_MAX_AGE_SECS: i64 = 5 * 24 * 60 * 60;

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if token.is_empty() || parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

fn cookie_value<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim())
        } else {
            None
        }
    })
}

/// Authentication state shared across handlers.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    secret: Option<String>,
    decoding_key: Option<DecodingKey>,
}

impl AuthState {
    /// Create new auth state from config, resolving `env:` secrets.
    pub fn new(config: AuthConfig) -> Self {
        let secret = config.resolve_jwt_secret();
        let decoding_key = secret
            .as_ref()
            .map(|s| DecodingKey::from_secret(s.as_bytes()));

        Self {
            config: Arc::new(config),
            secret,
            decoding_key,
        }
    }

    /// Get allowed CORS origins from config.
    pub fn allowed_origins(&self) -> &[String] {
        &self.config.allowed_origins
    }

    /// Validate a JWT and return its claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let decoding_key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.required_spec_claims.clear();

        let token_data = decode::<Claims>(token, decoding_key, &validation).map_err(|err| {
            warn!("JWT validation failed: {:?}", err);
            match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(err.to_string()),
            }
        })?;

        Ok(token_data.claims)
    }

    /// Generate a JWT for a user. Used by tests and operator tooling;
    /// production tokens come from the identity service.
    pub fn generate_token(
        &self,
        user_id: i64,
        email: &str,
        name: &str,
        role: Role,
    ) -> Result<String, AuthError> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let claims = Claims {
            sub: user_id.to_string(),
            exp: Utc::now().timestamp() + 3600 * 24,
            iat: Some(Utc::now().timestamp()),
            email: Some(email.to_string()),
            name: Some(name.to_string()),
            roles: vec![role.to_string()],
            role: Some(role.to_string()),
        };

        encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|err| AuthError::Internal(err.to_string()))
    }
}

/// The chatter identity resolved for the current request.
#[derive(Debug, Clone)]
pub struct CurrentChatter {
    pub chatter_id: i64,
    pub role: Role,
}

impl CurrentChatter {
    /// Check if this chatter is backed by an admin user.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl<S> FromRequestParts<S> for CurrentChatter
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentChatter>()
            .cloned()
            .ok_or(AuthError::MissingCredentials)
    }
}

/// Require the admin role.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub CurrentChatter);

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let chatter = parts
            .extensions
            .get::<CurrentChatter>()
            .cloned()
            .ok_or(AuthError::MissingCredentials)?;

        if !chatter.is_admin() {
            return Err(AuthError::InsufficientPermissions(
                "admin role required".to_string(),
            ));
        }

        Ok(RequireAdmin(chatter))
    }
}

/// Chatter authentication middleware.
///
/// Credential sources in priority order:
/// 1. `Authorization: Bearer <token>` header
/// 2. `token` query parameter (browsers cannot set headers on WebSocket
///    upgrades)
/// 3. `chat_session` cookie, an anonymous chatter created on first
///    contact and renewed via `Set-Cookie`
///
/// A request with no credential at all becomes a fresh anonymous chatter.
pub async fn chatter_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let query_token = req.uri().query().and_then(|q| {
        q.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            if key == "token" {
                urlencoding::decode(value).ok().map(|v| v.into_owned())
            } else {
                None
            }
        })
    });

    let session = req
        .headers()
        .get(COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|header| cookie_value(header, SESSION_COOKIE))
        .map(str::to_string);

    let claims = if let Some(header) = auth_header {
        Some(state.auth.validate_token(bearer_token_from_header(header)?)?)
    } else if let Some(ref token) = query_token {
        Some(state.auth.validate_token(token)?)
    } else {
        None
    };

    // The session cookie is (re)issued only when the chatter stays
    // anonymous.
    let mut issued_session: Option<String> = None;

    let (chatter_id, role) = match claims {
        Some(claims) => {
            let user_id = claims.user_id()?;
            let chatter_id = resolve_user_chatter(&state, user_id, session.as_deref()).await?;
            (chatter_id, claims.effective_role())
        }
        None => {
            let (chatter_id, session) = resolve_session_chatter(&state, session).await?;
            issued_session = Some(session);
            (chatter_id, Role::User)
        }
    };

    req.extensions_mut().insert(CurrentChatter { chatter_id, role });

    let mut response = next.run(req).await;

    if let Some(session) = issued_session {
        let cookie = format!(
            "{SESSION_COOKIE}={session}; Path=/; Max-Age={SESSION_MAX_AGE_SECS}; HttpOnly"
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }

    Ok(response)
}

/// Find the chatter row for a registered user, creating one if needed.
///
/// When the request also carries an anonymous session that has not been
/// claimed by any user yet, that chatter is promoted instead so the
/// visitor keeps their history after signing in.
async fn resolve_user_chatter(
    state: &AppState,
    user_id: i64,
    session: Option<&str>,
) -> Result<i64, AuthError> {
    let internal = |err: anyhow::Error| AuthError::Internal(err.to_string());

    if let Some(chatter) = state
        .chatters
        .find_by_user_id(user_id)
        .await
        .map_err(internal)?
    {
        return Ok(chatter.id);
    }

    if let Some(session) = session {
        if let Some(chatter) = state
            .chatters
            .find_by_session(session)
            .await
            .map_err(internal)?
        {
            if chatter.is_anonymous() {
                state
                    .chatters
                    .promote_session(session, user_id)
                    .await
                    .map_err(internal)?;
                debug!(chatter_id = chatter.id, user_id, "promoted session chatter");
                return Ok(chatter.id);
            }
        }
    }

    state
        .chatters
        .create_for_user(user_id)
        .await
        .map_err(internal)
}

/// Find the chatter for an anonymous session, creating both the session
/// and the chatter on first contact. Returns the session to (re)issue.
async fn resolve_session_chatter(
    state: &AppState,
    session: Option<String>,
) -> Result<(i64, String), AuthError> {
    let internal = |err: anyhow::Error| AuthError::Internal(err.to_string());

    if let Some(session) = session {
        if let Some(chatter) = state
            .chatters
            .find_by_session(&session)
            .await
            .map_err(internal)?
        {
            return Ok((chatter.id, session));
        }
    }

    let session = nanoid::nanoid!(SESSION_LENGTH);
    let chatter_id = state
        .chatters
        .create_for_session(&session)
        .await
        .map_err(internal)?;

    Ok((chatter_id, session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_from_header_valid() {
        assert_eq!(
            bearer_token_from_header("Bearer abc.def.ghi").unwrap(),
            "abc.def.ghi"
        );
        assert_eq!(
            bearer_token_from_header("bearer   token123").unwrap(),
            "token123"
        );
    }

    #[test]
    fn test_bearer_token_from_header_invalid() {
        let cases = ["", "Bearer", "Bearer ", "Token something", "Bearer a b"];

        for case in cases {
            assert!(
                bearer_token_from_header(case).is_err(),
                "{case} should fail"
            );
        }
    }

    #[test]
    fn test_cookie_value() {
        let header = "theme=dark; chat_session=abc123; other=1";
        assert_eq!(cookie_value(header, "chat_session"), Some("abc123"));
        assert_eq!(cookie_value(header, "missing"), None);
    }

    fn test_auth_state() -> AuthState {
        AuthState::new(AuthConfig {
            jwt_secret: Some("test-secret-for-unit-tests-minimum-32-chars".to_string()),
            ..AuthConfig::default()
        })
    }

    #[test]
    fn test_generate_and_validate_token() {
        let state = test_auth_state();
        let token = state
            .generate_token(7, "user@example.com", "Test User", Role::Admin)
            .unwrap();

        let claims = state.validate_token(&token).unwrap();
        assert_eq!(claims.user_id().unwrap(), 7);
        assert!(claims.is_admin());
    }

    #[test]
    fn test_validate_rejects_garbage() {
        let state = test_auth_state();
        assert!(matches!(
            state.validate_token("not.a.jwt"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_validate_rejects_expired_token() {
        let state = test_auth_state();

        let claims = Claims {
            sub: "7".to_string(),
            exp: Utc::now().timestamp() - 3600,
            iat: None,
            email: None,
            name: None,
            roles: vec![],
            role: None,
        };
        let token = encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &EncodingKey::from_secret("test-secret-for-unit-tests-minimum-32-chars".as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            state.validate_token(&token),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_validate_without_secret_fails() {
        let state = AuthState::new(AuthConfig {
            jwt_secret: None,
            ..AuthConfig::default()
        });
        assert!(matches!(
            state.validate_token("anything"),
            Err(AuthError::Internal(_))
        ));
    }
}
