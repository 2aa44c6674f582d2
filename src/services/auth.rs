//! Registration, login and token validation.
//!
//! Tokens are deterministic signed identifiers:
//! `base64("<id>:<hex-sha256(id|secret)>")`. Validation recomputes the
//! signature and compares in constant time, so no token state is stored.

use std::sync::Arc;

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::store::{StoreError, UserStore};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("login already in use")]
    LoginTaken,
    #[error("invalid token")]
    InvalidToken,
    #[error("hash password: {0}")]
    Hash(argon2::password_hash::Error),
    #[error(transparent)]
    Store(StoreError),
}

pub struct AuthManager {
    users: Arc<dyn UserStore>,
    secret: String,
    hasher: Argon2<'static>,
}

impl AuthManager {
    /// `time_cost` is the Argon2 time-cost parameter; raising it makes
    /// password hashing proportionally more expensive.
    pub fn new(users: Arc<dyn UserStore>, secret: String, time_cost: u32) -> anyhow::Result<Self> {
        let params = Params::new(Params::DEFAULT_M_COST, time_cost, Params::DEFAULT_P_COST, None)
            .map_err(|err| anyhow::anyhow!("argon2 params: {err}"))?;
        Ok(Self {
            users,
            secret,
            hasher: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub async fn register(&self, login: &str, password: &str) -> Result<String, AuthError> {
        if login.trim().is_empty() || password.trim().is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .hasher
            .hash_password(password.as_bytes(), &salt)
            .map_err(AuthError::Hash)?
            .to_string();

        let user = match self.users.create_user(login, &hash).await {
            Ok(user) => user,
            Err(StoreError::LoginTaken) => return Err(AuthError::LoginTaken),
            Err(err) => return Err(AuthError::Store(err)),
        };

        Ok(self.token_for(user.id))
    }

    pub async fn login(&self, login: &str, password: &str) -> Result<String, AuthError> {
        if login.trim().is_empty() || password.trim().is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let user = match self.users.get_by_login(login).await {
            Ok(user) => user,
            Err(StoreError::UserNotFound) => return Err(AuthError::InvalidCredentials),
            Err(err) => return Err(AuthError::Store(err)),
        };

        let parsed =
            PasswordHash::new(&user.password_hash).map_err(|_| AuthError::InvalidCredentials)?;
        self.hasher
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| AuthError::InvalidCredentials)?;

        Ok(self.token_for(user.id))
    }

    /// Decodes a token and recomputes its signature; returns the embedded
    /// user id on a match.
    pub fn validate_token(&self, token: &str) -> Result<i64, AuthError> {
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        let decoded = BASE64.decode(token).map_err(|_| AuthError::InvalidToken)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidToken)?;
        let (id, signature) = decoded.split_once(':').ok_or(AuthError::InvalidToken)?;
        let id: i64 = id.parse().map_err(|_| AuthError::InvalidToken)?;

        let expected = self.signature_for(id);
        if !constant_time_eq(signature.as_bytes(), expected.as_bytes()) {
            return Err(AuthError::InvalidToken);
        }
        Ok(id)
    }

    fn token_for(&self, id: i64) -> String {
        BASE64.encode(format!("{id}:{}", self.signature_for(id)))
    }

    fn signature_for(&self, id: i64) -> String {
        hex::encode(Sha256::digest(format!("{id}|{}", self.secret)))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
