//! JWT token generation and validation
//! Implements the access token + refresh token pattern

use crate::{config::SecurityConfig, error::AppError};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ACCESS_TOKEN: &str = "access";
pub const REFRESH_TOKEN: &str = "refresh";

/// JWT claims shared by both token kinds
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    pub username: String,

    /// "access" or "refresh"
    pub token_type: String,

    /// Empty on refresh tokens
    pub roles: Vec<String>,

    /// Issued at
    pub iat: i64,

    /// Expiration
    pub exp: i64,

    /// Unique token identifier, keeps two tokens minted in the same second distinct
    pub jti: String,
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Seconds until the access token expires
    pub expires_in: u64,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_exp_secs: u64,
    refresh_token_exp_secs: u64,
}

impl JwtService {
    pub fn from_config(config: &SecurityConfig) -> Result<Self, AppError> {
        let secret = config.jwt_secret.expose_secret();

        // HS256 wants at least 256 bits of key material
        if secret.len() < 32 {
            return Err(AppError::Config("JWT secret too short (min 32 chars)".to_string()));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_exp_secs: config.access_token_exp_secs,
            refresh_token_exp_secs: config.refresh_token_exp_secs,
        })
    }

    pub fn refresh_token_exp_secs(&self) -> u64 {
        self.refresh_token_exp_secs
    }

    fn sign(
        &self,
        user_id: &Uuid,
        username: &str,
        token_type: &str,
        roles: Vec<String>,
        lifetime_secs: u64,
    ) -> Result<String, AppError> {
        let now = Utc::now();
        let expiration = now + Duration::seconds(lifetime_secs as i64);

        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            token_type: token_type.to_string(),
            roles,
            iat: now.timestamp(),
            exp: expiration.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode {} token: {:?}", token_type, e);
            AppError::Internal(format!("Failed to encode {} token: {}", token_type, e))
        })
    }

    pub fn generate_access_token(
        &self,
        user_id: &Uuid,
        username: &str,
        roles: Vec<String>,
    ) -> Result<String, AppError> {
        self.sign(user_id, username, ACCESS_TOKEN, roles, self.access_token_exp_secs)
    }

    pub fn generate_refresh_token(&self, user_id: &Uuid, username: &str) -> Result<String, AppError> {
        self.sign(user_id, username, REFRESH_TOKEN, vec![], self.refresh_token_exp_secs)
    }

    pub fn generate_token_pair(
        &self,
        user_id: &Uuid,
        username: &str,
        roles: Vec<String>,
    ) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access_token: self.generate_access_token(user_id, username, roles)?,
            refresh_token: self.generate_refresh_token(user_id, username)?,
            token_type: "Bearer",
            expires_in: self.access_token_exp_secs,
        })
    }

    /// Signature and expiry check, any failure is `Unauthorized`
    pub fn validate_token(&self, token: &str) -> Result<Claims, AppError> {
        Ok(decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map_err(|e| {
                tracing::debug!("Token validation failed: {:?}", e);
                AppError::Unauthorized
            })?
            .claims)
    }

    pub fn validate_access_token(&self, token: &str) -> Result<Claims, AppError> {
        self.validate_typed(token, ACCESS_TOKEN)
    }

    pub fn validate_refresh_token(&self, token: &str) -> Result<Claims, AppError> {
        self.validate_typed(token, REFRESH_TOKEN)
    }

    fn validate_typed(&self, token: &str, expected: &str) -> Result<Claims, AppError> {
        let claims = self.validate_token(token)?;

        if claims.token_type != expected {
            tracing::debug!(
                "Token type mismatch: expected '{}', got '{}'",
                expected,
                claims.token_type
            );
            return Err(AppError::Unauthorized);
        }

        Ok(claims)
    }
}
