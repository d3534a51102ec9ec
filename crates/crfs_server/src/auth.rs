//! Caller identity verification.
//!
//! By default the server trusts the user id a replica claims
//! ([`ClaimedIdentity`]). When a secret is configured, callers must also
//! present a token issued for their (user, filesystem) pair
//! ([`TokenVerifier`]).
//!
//! ## Token Format
//!
//! Tokens are composed of:
//! - 16 bytes: user id
//! - 16 bytes: filesystem id
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature
//!
//! Total: 72 bytes, hex-encoded for transport.

use crate::error::{ServerError, ServerResult};
use crfs_protocol::{FileSystemId, UserId};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const CLAIMS_LEN: usize = 40;
const TOKEN_LEN: usize = CLAIMS_LEN + 32;

/// Who is making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Claimed user id.
    pub user: UserId,
    /// Raw token bytes, if the caller sent one.
    pub token: Option<Vec<u8>>,
}

impl Caller {
    /// Creates a caller without a token.
    pub fn new(user: UserId) -> Self {
        Self { user, token: None }
    }

    /// Attaches a token.
    pub fn with_token(mut self, token: Vec<u8>) -> Self {
        self.token = Some(token);
        self
    }

    /// Builds a caller from a user id and an optional hex token.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::MalformedInput`] if the token is not hex.
    pub fn from_hex_token(user: UserId, token: Option<&str>) -> ServerResult<Self> {
        let caller = Self::new(user);
        match token {
            Some(hex_token) => {
                let bytes = hex::decode(hex_token)
                    .map_err(|e| ServerError::MalformedInput(format!("token: {e}")))?;
                Ok(caller.with_token(bytes))
            }
            None => Ok(caller),
        }
    }
}

/// Decides whether a caller may act as its claimed user on a filesystem.
///
/// Runs before the ownership comparison.
pub trait IdentityVerifier: Send + Sync {
    /// Verifies the caller for `fs`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AuthenticationFailed`] if the caller cannot
    /// be trusted.
    fn verify(&self, caller: &Caller, fs: &FileSystemId) -> ServerResult<()>;
}

/// Accepts every caller as the user it claims to be.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimedIdentity;

impl IdentityVerifier for ClaimedIdentity {
    fn verify(&self, _caller: &Caller, _fs: &FileSystemId) -> ServerResult<()> {
        Ok(())
    }
}

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Verifies HMAC tokens bound to a (user, filesystem) pair.
#[derive(Clone)]
pub struct TokenVerifier {
    config: AuthConfig,
}

impl TokenVerifier {
    /// Creates a new token verifier.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for `user` on `fs`, valid from now.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAC cannot be keyed.
    pub fn create_token(&self, user: UserId, fs: FileSystemId) -> ServerResult<Vec<u8>> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(user.as_bytes());
        token.extend_from_slice(fs.as_bytes());
        token.extend_from_slice(&now_millis().to_be_bytes());

        let signature = self.mac(&token)?.finalize().into_bytes();
        token.extend_from_slice(&signature);
        Ok(token)
    }

    /// Validates a token for `user` on `fs`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AuthenticationFailed`] if the token is the
    /// wrong size, names another user or filesystem, carries a bad
    /// signature, or has expired.
    pub fn validate_token(&self, token: &[u8], user: &UserId, fs: &FileSystemId) -> ServerResult<()> {
        if token.len() != TOKEN_LEN {
            return Err(ServerError::AuthenticationFailed("invalid token length".into()));
        }

        let (claims, signature) = token.split_at(CLAIMS_LEN);
        let (ids, issued_at) = claims.split_at(32);

        if &ids[..16] != user.as_bytes().as_slice() {
            return Err(ServerError::AuthenticationFailed("user mismatch".into()));
        }
        if &ids[16..] != fs.as_bytes().as_slice() {
            return Err(ServerError::AuthenticationFailed("filesystem mismatch".into()));
        }

        self.mac(claims)?
            .verify_slice(signature)
            .map_err(|_| ServerError::AuthenticationFailed("invalid signature".into()))?;

        let issued_at: [u8; 8] = issued_at
            .try_into()
            .map_err(|_| ServerError::AuthenticationFailed("invalid token".into()))?;
        let issued_at = u64::from_be_bytes(issued_at);
        let expiry_millis = self.config.token_expiry.as_millis() as u64;
        if now_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(ServerError::AuthenticationFailed("token expired".into()));
        }

        Ok(())
    }

    /// Returns a MAC already fed with `data`.
    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

impl IdentityVerifier for TokenVerifier {
    fn verify(&self, caller: &Caller, fs: &FileSystemId) -> ServerResult<()> {
        let token = caller
            .token
            .as_deref()
            .ok_or_else(|| ServerError::AuthenticationFailed("missing token".into()))?;
        self.validate_token(token, &caller.user, fs).inspect_err(|e| {
            tracing::warn!(user = %caller.user, fs = %fs, error = %e, "rejected token");
        })
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> TokenVerifier {
        TokenVerifier::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn create_and_validate_token() {
        let verifier = verifier();
        let user = UserId::new();
        let fs = FileSystemId::new();

        let token = verifier.create_token(user, fs).unwrap();
        assert_eq!(token.len(), 72);
        assert!(verifier.validate_token(&token, &user, &fs).is_ok());

        let caller = Caller::new(user).with_token(token);
        assert!(verifier.verify(&caller, &fs).is_ok());
    }

    #[test]
    fn reject_wrong_user() {
        let verifier = verifier();
        let fs = FileSystemId::new();
        let token = verifier.create_token(UserId::new(), fs).unwrap();
        assert!(verifier.validate_token(&token, &UserId::new(), &fs).is_err());
    }

    #[test]
    fn reject_wrong_filesystem() {
        let verifier = verifier();
        let user = UserId::new();
        let token = verifier.create_token(user, FileSystemId::new()).unwrap();
        assert!(verifier
            .validate_token(&token, &user, &FileSystemId::new())
            .is_err());
    }

    #[test]
    fn reject_tampered_token() {
        let verifier = verifier();
        let user = UserId::new();
        let fs = FileSystemId::new();

        let mut token = verifier.create_token(user, fs).unwrap();
        token[50] ^= 0xFF;

        assert!(verifier.validate_token(&token, &user, &fs).is_err());
    }

    #[test]
    fn reject_expired_token() {
        let verifier = TokenVerifier::new(
            AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec())
                .with_expiry(Duration::from_secs(0)),
        );
        let user = UserId::new();
        let fs = FileSystemId::new();

        let token = verifier.create_token(user, fs).unwrap();
        std::thread::sleep(Duration::from_millis(10));

        assert!(verifier.validate_token(&token, &user, &fs).is_err());
    }

    #[test]
    fn missing_token_fails() {
        let err = verifier()
            .verify(&Caller::new(UserId::new()), &FileSystemId::new())
            .unwrap_err();
        assert!(matches!(err, ServerError::AuthenticationFailed(_)));
    }

    #[test]
    fn claimed_identity_accepts_anyone() {
        assert!(ClaimedIdentity
            .verify(&Caller::new(UserId::new()), &FileSystemId::new())
            .is_ok());
    }

    #[test]
    fn hex_tokens() {
        let user = UserId::new();
        let caller = Caller::from_hex_token(user, Some("00ff")).unwrap();
        assert_eq!(caller.token, Some(vec![0x00, 0xFF]));
        assert!(Caller::from_hex_token(user, Some("zz")).is_err());
        assert!(Caller::from_hex_token(user, None).unwrap().token.is_none());
    }
}
