//! Room password hashing and room token generation.
//!
//! `CredentialStore` wraps bcrypt. Hash and verify are CPU-bound and are
//! called from `spawn_blocking` by the session registry.
//!
//! Room tokens come from a pluggable `TokenGenerator`. The default draws
//! independent random tokens from the system CSPRNG; the derived generator
//! reproduces the legacy digest-based handles for existing clients.

use crate::config::TokenStrategy;
use crate::errors::SignalError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use common::secret::{ExposeSecret, SecretString};
use common::types::{ConnectTarget, RoomHandle};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use tracing::instrument;

/// Lowest cost the bcrypt library accepts.
pub const MIN_BCRYPT_COST: u32 = 4;

/// Highest cost the bcrypt library accepts.
pub const MAX_BCRYPT_COST: u32 = 31;

/// Random bytes per generated room token.
pub const TOKEN_BYTES: usize = 32;

/// Verified against when a join names an unknown room, so both failure
/// classes cost one bcrypt verification.
const DUMMY_PASSWORD: &str = "signal-service-unknown-room";

/// Hashes and verifies room passwords.
#[derive(Clone)]
pub struct CredentialStore {
    cost: u32,
    dummy_hash: Arc<str>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("cost", &self.cost)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Create a credential store with the given bcrypt cost.
    ///
    /// Accepts the full bcrypt range; configuration applies the tighter
    /// production bounds.
    pub fn new(cost: u32) -> Result<Self, SignalError> {
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&cost) {
            return Err(SignalError::Crypto(format!(
                "Invalid bcrypt cost: {} (must be {}-{})",
                cost, MIN_BCRYPT_COST, MAX_BCRYPT_COST
            )));
        }

        let dummy_hash = bcrypt::hash(DUMMY_PASSWORD, cost)
            .map_err(|e| SignalError::Crypto(format!("Password hashing failed: {}", e)))?;

        Ok(Self {
            cost,
            dummy_hash: Arc::from(dummy_hash),
        })
    }

    /// The configured bcrypt cost.
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a room password.
    #[instrument(skip_all)]
    pub fn hash_password(&self, password: &SecretString) -> Result<String, SignalError> {
        bcrypt::hash(password.expose_secret(), self.cost)
            .map_err(|e| SignalError::Crypto(format!("Password hashing failed: {}", e)))
    }

    /// Verify a room password against a stored hash.
    #[instrument(skip_all)]
    pub fn verify_password(
        &self,
        password: &SecretString,
        hash: &str,
    ) -> Result<bool, SignalError> {
        bcrypt::verify(password.expose_secret(), hash)
            .map_err(|e| SignalError::Crypto(format!("Password verification failed: {}", e)))
    }

    /// Spend one verification against the dummy hash. The result is discarded.
    pub fn verify_against_dummy(&self, password: &SecretString) {
        let _ = bcrypt::verify(password.expose_secret(), &self.dummy_hash);
    }
}

/// Tokens produced for a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    pub room_handle: RoomHandle,
    pub connect_target: ConnectTarget,
}

/// Produces the discovery handle and connect target for a new session.
pub trait TokenGenerator: Send + Sync {
    fn issue(
        &self,
        host: &str,
        title: &str,
        password: &SecretString,
    ) -> Result<IssuedTokens, SignalError>;
}

/// Independent random tokens, base64url without padding.
pub struct RandomTokenGenerator {
    rng: SystemRandom,
}

impl RandomTokenGenerator {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    fn token(&self) -> Result<String, SignalError> {
        let mut bytes = [0u8; TOKEN_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|e| SignalError::Crypto(format!("Random bytes generation failed: {}", e)))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }
}

impl Default for RandomTokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenGenerator for RandomTokenGenerator {
    fn issue(
        &self,
        _host: &str,
        _title: &str,
        _password: &SecretString,
    ) -> Result<IssuedTokens, SignalError> {
        Ok(IssuedTokens {
            room_handle: RoomHandle::new(self.token()?),
            connect_target: ConnectTarget::new(self.token()?),
        })
    }
}

/// Legacy deterministic tokens: hex SHA-1 of `host+title` and `host+password`.
///
/// Identical inputs produce identical tokens; the store rejects the second
/// session with a conflict.
#[derive(Debug, Default)]
pub struct DerivedTokenGenerator;

impl DerivedTokenGenerator {
    fn digest_hex(parts: &[&[u8]]) -> String {
        let mut ctx = digest::Context::new(&digest::SHA1_FOR_LEGACY_USE_ONLY);
        for part in parts {
            ctx.update(part);
        }
        hex::encode(ctx.finish().as_ref())
    }
}

impl TokenGenerator for DerivedTokenGenerator {
    fn issue(
        &self,
        host: &str,
        title: &str,
        password: &SecretString,
    ) -> Result<IssuedTokens, SignalError> {
        Ok(IssuedTokens {
            room_handle: RoomHandle::new(Self::digest_hex(&[
                host.as_bytes(),
                title.as_bytes(),
            ])),
            connect_target: ConnectTarget::new(Self::digest_hex(&[
                host.as_bytes(),
                password.expose_secret().as_bytes(),
            ])),
        })
    }
}

/// Build the token generator for a configured strategy.
pub fn token_generator(strategy: TokenStrategy) -> Arc<dyn TokenGenerator> {
    match strategy {
        TokenStrategy::Random => Arc::new(RandomTokenGenerator::new()),
        TokenStrategy::Derived => Arc::new(DerivedTokenGenerator),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value)
    }

    #[test]
    fn test_hash_and_verify() {
        let store = CredentialStore::new(MIN_BCRYPT_COST).unwrap();
        let hash = store.hash_password(&secret("p1")).unwrap();

        assert!(hash.starts_with("$2"));
        assert!(!hash.contains("p1"));
        assert!(store.verify_password(&secret("p1"), &hash).unwrap());
        assert!(!store.verify_password(&secret("wrong"), &hash).unwrap());
    }

    #[test]
    fn test_hash_is_salted() {
        let store = CredentialStore::new(MIN_BCRYPT_COST).unwrap();
        let a = store.hash_password(&secret("same")).unwrap();
        let b = store.hash_password(&secret("same")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_embeds_cost() {
        let store = CredentialStore::new(5).unwrap();
        let hash = store.hash_password(&secret("pw")).unwrap();
        let cost: u32 = hash.get(4..6).unwrap().parse().unwrap();
        assert_eq!(cost, 5);
        assert_eq!(store.cost(), 5);
    }

    #[test]
    fn test_invalid_cost_rejected() {
        let low = CredentialStore::new(3);
        assert!(matches!(low, Err(SignalError::Crypto(msg)) if msg.contains("Invalid bcrypt cost")));

        let high = CredentialStore::new(32);
        assert!(matches!(high, Err(SignalError::Crypto(_))));
    }

    #[test]
    fn test_verify_against_malformed_hash_errors() {
        let store = CredentialStore::new(MIN_BCRYPT_COST).unwrap();
        let result = store.verify_password(&secret("p1"), "not-a-bcrypt-hash");
        assert!(matches!(result, Err(SignalError::Crypto(_))));
    }

    #[test]
    fn test_debug_omits_dummy_hash() {
        let store = CredentialStore::new(MIN_BCRYPT_COST).unwrap();
        let debug = format!("{store:?}");
        assert!(debug.contains("cost"));
        assert!(!debug.contains("$2"));
    }

    #[test]
    fn test_random_tokens_are_distinct_and_url_safe() {
        let generator = RandomTokenGenerator::new();
        let first = generator.issue("h1", "Standup", &secret("p1")).unwrap();
        let second = generator.issue("h1", "Standup", &secret("p1")).unwrap();

        assert_ne!(first.room_handle, second.room_handle);
        assert_ne!(first.connect_target, second.connect_target);
        assert_ne!(first.room_handle.as_str(), first.connect_target.as_str());

        // 32 bytes -> 43 base64url chars without padding
        assert_eq!(first.room_handle.as_str().len(), 43);
        assert!(first
            .connect_target
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_derived_tokens_match_legacy_digests() {
        let generator = DerivedTokenGenerator;
        let tokens = generator.issue("h1", "Standup", &secret("p1")).unwrap();

        let expected_handle = hex::encode(
            digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, b"h1Standup").as_ref(),
        );
        let expected_target =
            hex::encode(digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, b"h1p1").as_ref());

        assert_eq!(tokens.room_handle.as_str(), expected_handle);
        assert_eq!(tokens.connect_target.as_str(), expected_target);
        assert_eq!(tokens.room_handle.as_str().len(), 40);
    }

    #[test]
    fn test_derived_tokens_are_deterministic() {
        let generator = DerivedTokenGenerator;
        let a = generator.issue("h1", "Standup", &secret("p1")).unwrap();
        let b = generator.issue("h1", "Standup", &secret("p1")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_token_generator_for_strategy() {
        let random = token_generator(TokenStrategy::Random);
        let a = random.issue("h", "t", &secret("p")).unwrap();
        let b = random.issue("h", "t", &secret("p")).unwrap();
        assert_ne!(a, b);

        let derived = token_generator(TokenStrategy::Derived);
        let c = derived.issue("h", "t", &secret("p")).unwrap();
        let d = derived.issue("h", "t", &secret("p")).unwrap();
        assert_eq!(c, d);
    }
}
