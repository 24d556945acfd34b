//! Registration, login and bearer-token verification.
//!
//! Passwords are stored as argon2 PHC strings. Tokens are HS256 JWTs whose
//! subject is the user's UUID.

use std::time::Duration;

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::TimeDelta;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::ports::{SharedClock, UserStoreRef};
use crate::domain::user::{Credentials, User, UserId};
use crate::error::{LoyaltyError, Result};

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret used to sign and verify tokens.
    pub secret: String,
    pub token_ttl: Duration,
}

/// Claims carried by an issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct AuthService {
    users: UserStoreRef,
    clock: SharedClock,
    encoding: EncodingKey,
    decoding: DecodingKey,
    token_ttl: TimeDelta,
}

impl AuthService {
    pub fn new(users: UserStoreRef, clock: SharedClock, config: AuthConfig) -> Result<Self> {
        let token_ttl = TimeDelta::from_std(config.token_ttl)
            .map_err(|e| LoyaltyError::ConfigError(format!("token ttl out of range: {e}")))?;
        Ok(Self {
            users,
            clock,
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            token_ttl,
        })
    }

    /// Creates a user and returns a token for it.
    ///
    /// # Errors
    ///
    /// * `ValidationError` for an empty login or password.
    /// * `ConflictError` if the login is already taken.
    pub async fn register(&self, credentials: Credentials) -> Result<String> {
        let Credentials { login, password } = credentials;
        let user = User {
            id: UserId::new(),
            login,
            password_hash: hash_password(&password)?,
            created_at: self.clock.utc(),
        };

        if !self.users.create_user(user.clone()).await? {
            return Err(LoyaltyError::ConflictError(format!(
                "Login {:?} is already taken",
                user.login
            )));
        }
        info!(user = %user.id, login = %user.login, "User registered");
        self.issue_token(user.id)
    }

    /// Verifies a login/password pair and returns a fresh token.
    ///
    /// Unknown logins and wrong passwords fail the same way.
    pub async fn authenticate(&self, credentials: Credentials) -> Result<String> {
        let invalid = || LoyaltyError::AuthenticationError("Invalid login or password".to_string());

        let user = self
            .users
            .user_by_login(&credentials.login)
            .await?
            .ok_or_else(invalid)?;
        if !verify_password(&credentials.password, &user.password_hash) {
            debug!(login = %credentials.login, "Password mismatch");
            return Err(invalid());
        }
        self.issue_token(user.id)
    }

    /// Resolves a bearer token to the user it was issued for.
    ///
    /// The user must still exist in the store.
    pub async fn current_user(&self, token: &str) -> Result<UserId> {
        let data = decode::<Claims>(
            token.trim(),
            &self.decoding,
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| LoyaltyError::AuthenticationError(format!("Invalid token: {e}")))?;

        let id: UserId = data.claims.sub.parse()?;
        match self.users.user_by_id(id).await? {
            Some(user) => Ok(user.id),
            None => Err(LoyaltyError::AuthenticationError(
                "Token refers to an unknown user".to_string(),
            )),
        }
    }

    fn issue_token(&self, user: UserId) -> Result<String> {
        let now = self.clock.utc();
        let claims = Claims {
            sub: user.to_string(),
            iat: now.timestamp(),
            exp: (now + self.token_ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| LoyaltyError::storage(format!("token signing failed: {e}")))
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| LoyaltyError::storage(format!("password hashing failed: {e}")))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
