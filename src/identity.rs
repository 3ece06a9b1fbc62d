//! Caller identity: opaque bearer tokens checked against one argon2id hash.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::store::BoxFuture;

const HASH_MEMORY_KIB: u32 = 65_536;
const HASH_ITERATIONS: u32 = 3;
const HASH_PARALLELISM: u32 = 1;

#[derive(Debug)]
pub enum TokenHashError {
    EmptyToken,
    Params(argon2::Error),
    Hash(argon2::password_hash::Error),
}

impl std::fmt::Display for TokenHashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyToken => write!(f, "token is empty"),
            Self::Params(e) => write!(f, "argon2 params: {e}"),
            Self::Hash(e) => write!(f, "argon2 hash: {e}"),
        }
    }
}

impl std::error::Error for TokenHashError {}

/// An argon2id PHC string, e.g. `$argon2id$v=19$m=65536,t=3,p=1$<salt>$<hash>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHash(String);

impl TokenHash {
    /// `None` unless `raw` is a well-formed argon2id PHC string that carries
    /// a hash output.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let phc = PasswordHash::new(raw).ok()?;
        let usable = phc.algorithm.as_str() == "argon2id" && phc.hash.is_some();
        usable.then(|| Self(raw.to_string()))
    }

    pub fn generate(token: &str) -> Result<Self, TokenHashError> {
        if token.trim().is_empty() {
            return Err(TokenHashError::EmptyToken);
        }
        let params = Params::new(HASH_MEMORY_KIB, HASH_ITERATIONS, HASH_PARALLELISM, None)
            .map_err(TokenHashError::Params)?;
        let salt = SaltString::generate(&mut OsRng);
        let phc = Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password(token.as_bytes(), &salt)
            .map_err(TokenHashError::Hash)?;
        Ok(Self(phc.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Cost parameters come from the PHC string, not from the constants above.
    pub fn matches(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        PasswordHash::new(&self.0).is_ok_and(|phc| {
            Argon2::default()
                .verify_password(token.as_bytes(), &phc)
                .is_ok()
        })
    }
}

/// Maps an opaque caller token to valid / invalid.
pub trait IdentityGateway: Send + Sync + 'static {
    fn validate_token<'a>(&'a self, token: &'a str) -> BoxFuture<'a, bool>;
}

/// Accepts exactly the token whose hash was configured.
///
/// With no hash configured every token is rejected.
#[derive(Debug, Clone)]
pub struct HashedTokenIdentity {
    expected: Option<TokenHash>,
}

impl HashedTokenIdentity {
    pub fn new(expected: Option<TokenHash>) -> Self {
        Self { expected }
    }
}

impl IdentityGateway for HashedTokenIdentity {
    fn validate_token<'a>(&'a self, token: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let Some(expected) = self.expected.clone() else {
                return false;
            };
            if token.is_empty() {
                return false;
            }
            // argon2 verification blocks for tens of milliseconds.
            let token = token.to_string();
            tokio::task::spawn_blocking(move || expected.matches(&token))
                .await
                .unwrap_or(false)
        })
    }
}
