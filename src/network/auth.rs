//! Join-Token Authentication
//!
//! Validates the short-lived signed tokens that authorize a matchmaking
//! attempt. The server does NOT issue tokens - the external credential
//! service mints them (HS256, claims `{sub, exp}`) and this module only
//! verifies signature, subject, and expiry at the moment of use.

use std::collections::BTreeMap;
use std::sync::RwLock;

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::protocol::PublicProfile;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// HS256 secret shared with the token-issuing service.
    pub secret: Option<String>,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            secret: std::env::var("AUTH_SECRET").ok(),
        }
    }

    /// Check if authentication is configured.
    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }
}

/// Claims carried by a join token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the username the token was minted for.
    pub sub: String,
    /// Absolute expiration instant (Unix seconds).
    pub exp: i64,
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No authentication configured on server.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Required claim is missing or empty.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Subject does not resolve to a known identity.
    #[error("unknown subject: {0}")]
    UnknownSubject(String),
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Validate a join token and extract its claims.
///
/// Expiry is compared against wall-clock time now, with zero leeway: a
/// token that expired a moment ago is rejected even if it was valid when
/// the client obtained it.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let secret = config.secret.as_ref().ok_or(AuthError::NotConfigured)?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["sub", "exp"]);

    let key = DecodingKey::from_secret(secret.as_bytes());
    let token_data: TokenData<TokenClaims> =
        decode(token, &key, &validation).map_err(map_jwt_error)?;
    let claims = token_data.claims;

    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // Wall-clock check at the moment of use, independent of decode-time
    // validation, so expiry is never satisfied by a cached decision.
    if chrono::Utc::now().timestamp() > claims.exp {
        return Err(AuthError::Expired);
    }

    Ok(claims)
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) => {
            AuthError::InvalidFormat
        }
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// IDENTITY DIRECTORY
// =============================================================================

/// Verified-identity lookup contract.
///
/// The external identity store owns registration and credentials; the core
/// only ever asks it to resolve a token subject into a public profile.
pub trait IdentityDirectory: Send + Sync {
    /// Resolve a username into its public profile, if the user exists.
    fn lookup(&self, username: &str) -> Option<PublicProfile>;
}

/// In-memory directory, for tests and standalone deployments.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<BTreeMap<String, PublicProfile>>,
}

impl InMemoryDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a profile.
    pub fn insert(&self, profile: PublicProfile) {
        if let Ok(mut users) = self.users.write() {
            users.insert(profile.username.clone(), profile);
        }
    }
}

impl IdentityDirectory for InMemoryDirectory {
    fn lookup(&self, username: &str) -> Option<PublicProfile> {
        self.users.read().ok()?.get(username).cloned()
    }
}

/// Directory that admits every authenticated subject with a bare profile.
///
/// Matches deployments where the token issuer is the only gatekeeper and
/// any subject it signed for is a valid player.
pub struct OpenDirectory;

impl IdentityDirectory for OpenDirectory {
    fn lookup(&self, username: &str) -> Option<PublicProfile> {
        Some(PublicProfile::new(username))
    }
}

/// Validate a token and resolve its subject through the directory.
pub fn authenticate(
    token: &str,
    config: &AuthConfig,
    directory: &dyn IdentityDirectory,
) -> Result<PublicProfile, AuthError> {
    let claims = validate_token(token, config)?;
    directory
        .lookup(&claims.sub)
        .ok_or_else(|| AuthError::UnknownSubject(claims.sub))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-key-256-bits-long!!";

    fn mint_token(sub: &str, exp: i64, secret: &str) -> String {
        let claims = TokenClaims {
            sub: sub.into(),
            exp,
        };
        let key = EncodingKey::from_secret(secret.as_bytes());
        encode(&Header::new(Algorithm::HS256), &claims, &key).unwrap()
    }

    fn test_config() -> AuthConfig {
        AuthConfig {
            secret: Some(SECRET.into()),
        }
    }

    fn expires_in(seconds: i64) -> i64 {
        (Utc::now() + Duration::seconds(seconds)).timestamp()
    }

    #[test]
    fn test_valid_token_accepted() {
        let token = mint_token("alice", expires_in(3600), SECRET);
        let claims = validate_token(&token, &test_config()).unwrap();
        assert_eq!(claims.sub, "alice");
    }

    #[test]
    fn test_token_accepted_just_before_expiry() {
        // T - epsilon: still valid.
        let token = mint_token("alice", expires_in(2), SECRET);
        assert!(validate_token(&token, &test_config()).is_ok());
    }

    #[test]
    fn test_token_rejected_just_after_expiry() {
        // T + epsilon: rejected with zero leeway even though the token was
        // valid when minted.
        let token = mint_token("alice", expires_in(-1), SECRET);
        let result = validate_token(&token, &test_config());
        assert!(matches!(result, Err(AuthError::Expired)));
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let token = mint_token("alice", expires_in(3600), "a-different-secret-entirely!");
        let result = validate_token(&token, &test_config());
        assert!(matches!(result, Err(AuthError::InvalidSignature)));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let result = validate_token("not.a.jwt", &test_config());
        assert!(matches!(
            result,
            Err(AuthError::InvalidFormat) | Err(AuthError::DecodeError(_))
        ));
    }

    #[test]
    fn test_empty_subject_rejected() {
        let token = mint_token("", expires_in(3600), SECRET);
        let result = validate_token(&token, &test_config());
        assert!(matches!(result, Err(AuthError::MissingClaim(_))));
    }

    #[test]
    fn test_not_configured_error() {
        let result = validate_token("some.jwt.token", &AuthConfig::default());
        assert!(matches!(result, Err(AuthError::NotConfigured)));
    }

    #[test]
    fn test_in_memory_directory_lookup() {
        let directory = InMemoryDirectory::new();
        directory.insert(PublicProfile {
            username: "alice".into(),
            display_name: Some("Alice".into()),
        });

        let profile = directory.lookup("alice").unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Alice"));
        assert!(directory.lookup("nobody").is_none());
    }

    #[test]
    fn test_open_directory_echoes_subject() {
        let profile = OpenDirectory.lookup("whoever").unwrap();
        assert_eq!(profile.username, "whoever");
        assert!(profile.display_name.is_none());
    }

    #[test]
    fn test_authenticate_unknown_subject() {
        let directory = InMemoryDirectory::new();
        let token = mint_token("ghost", expires_in(60), SECRET);

        let result = authenticate(&token, &test_config(), &directory);
        assert!(matches!(result, Err(AuthError::UnknownSubject(_))));
    }

    #[test]
    fn test_authenticate_resolves_profile() {
        let directory = InMemoryDirectory::new();
        directory.insert(PublicProfile::new("alice"));
        let token = mint_token("alice", expires_in(60), SECRET);

        let profile = authenticate(&token, &test_config(), &directory).unwrap();
        assert_eq!(profile.username, "alice");
    }
}
