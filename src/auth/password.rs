//! Password hashing and verification using Argon2id

use crate::{config::SecurityConfig, error::AppError};
use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use once_cell::sync::Lazy;

/// Verified against when the account does not exist, so the response time matches
static DUMMY_HASH: Lazy<Option<String>> =
    Lazy::new(|| PasswordHasher::new().hash("no-such-account-placeholder").ok());

/// Password hasher with configurable parameters
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl PasswordHasher {
    /// Hasher with the OWASP recommended parameters (m=64MiB, t=3, p=4)
    pub fn new() -> Self {
        Self::with_params(Params::new(65536, 3, 4, None).unwrap_or_default())
    }

    pub fn with_params(params: Params) -> Self {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        Self { argon2 }
    }

    pub fn hash(&self, password: &str) -> Result<String, AppError> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| {
                tracing::error!("Failed to hash password: {:?}", e);
                AppError::Internal(format!("Failed to hash password: {}", e))
            })?
            .to_string();

        Ok(password_hash)
    }

    /// Verify a password against a PHC string; a mismatch is `Unauthorized`
    pub fn verify(&self, password: &str, hash: &str) -> Result<(), AppError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|e| {
            tracing::debug!("Failed to parse password hash: {:?}", e);
            AppError::Internal(format!("Failed to parse password hash: {}", e))
        })?;

        self.argon2
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| AppError::Unauthorized)
    }

    /// Hashing is CPU bound, keep it off the async workers
    pub async fn hash_blocking(password: String) -> Result<String, AppError> {
        tokio::task::spawn_blocking(move || PasswordHasher::new().hash(&password))
            .await
            .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
    }

    pub async fn verify_blocking(password: String, hash: String) -> Result<(), AppError> {
        tokio::task::spawn_blocking(move || PasswordHasher::new().verify(&password, &hash))
            .await
            .map_err(|e| AppError::Internal(format!("Password verification task failed: {}", e)))?
    }

    /// Burn one verification's worth of work for an unknown account
    pub async fn verify_dummy_blocking(password: String) {
        let _ = tokio::task::spawn_blocking(move || {
            if let Some(hash) = DUMMY_HASH.as_deref() {
                let _ = PasswordHasher::new().verify(&password, hash);
            }
        })
        .await;
    }

    /// Validate password against policy
    pub fn validate_password_policy(password: &str, policy: &SecurityConfig) -> Result<(), AppError> {
        if password.chars().count() < policy.password_min_length {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                policy.password_min_length
            )));
        }

        // Argon2 accepts longer input, but there is no reason to hash megabytes.
        if password.len() > 1024 {
            return Err(AppError::Validation(
                "Password must be at most 1024 bytes".to_string(),
            ));
        }

        if policy.password_require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            return Err(AppError::Validation(
                "Password must contain at least one uppercase letter".to_string(),
            ));
        }

        if policy.password_require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(AppError::Validation(
                "Password must contain at least one digit".to_string(),
            ));
        }

        if policy.password_require_special && !password.chars().any(|c| !c.is_alphanumeric()) {
            return Err(AppError::Validation(
                "Password must contain at least one special character".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn policy() -> SecurityConfig {
        SecurityConfig {
            jwt_secret: Secret::new("test_secret_key_32_characters_long!".to_string()),
            access_token_exp_secs: 900,
            refresh_token_exp_secs: 604800,
            password_min_length: 8,
            password_require_uppercase: true,
            password_require_digit: true,
            password_require_special: false,
            max_login_attempts: 5,
            login_lockout_duration_secs: 900,
            trust_proxy: true,
        }
    }

    #[test]
    fn test_hash_and_verify() {
        let hasher = PasswordHasher::new();
        let password = "TestPassword123!";

        let hash = hasher.hash(password).unwrap();
        assert!(hash.starts_with("$argon2id$"));
        hasher.verify(password, &hash).unwrap();
    }

    #[test]
    fn test_verify_fails_with_wrong_password() {
        let hasher = PasswordHasher::new();

        let hash = hasher.hash("TestPassword123!").unwrap();
        assert!(matches!(
            hasher.verify("WrongPassword", &hash),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn test_verify_rejects_garbage_hash() {
        let hasher = PasswordHasher::new();
        assert!(matches!(
            hasher.verify("whatever", "not-a-phc-string"),
            Err(AppError::Internal(_))
        ));
    }

    #[test]
    fn test_hash_is_different_each_time() {
        let hasher = PasswordHasher::new();
        let password = "TestPassword123!";

        let hash1 = hasher.hash(password).unwrap();
        let hash2 = hasher.hash(password).unwrap();

        assert_ne!(hash1, hash2);
        hasher.verify(password, &hash1).unwrap();
        hasher.verify(password, &hash2).unwrap();
    }

    #[tokio::test]
    async fn test_dummy_hash_is_a_real_argon2_hash() {
        let hash = DUMMY_HASH.as_deref().unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(PasswordHasher::new().verify("TestPassword123!", hash).is_err());

        PasswordHasher::verify_dummy_blocking("TestPassword123!".to_string()).await;
    }

    #[tokio::test]
    async fn test_blocking_helpers() {
        let hash = PasswordHasher::hash_blocking("TestPassword123!".to_string())
            .await
            .unwrap();
        PasswordHasher::verify_blocking("TestPassword123!".to_string(), hash.clone())
            .await
            .unwrap();
        assert!(PasswordHasher::verify_blocking("nope".to_string(), hash)
            .await
            .is_err());
    }

    #[test]
    fn test_password_policy_validation() {
        let policy = policy();

        assert!(PasswordHasher::validate_password_policy("Test1234", &policy).is_ok());
        // Too short
        assert!(PasswordHasher::validate_password_policy("Test1", &policy).is_err());
        // No uppercase
        assert!(PasswordHasher::validate_password_policy("test1234", &policy).is_err());
        // No digit
        assert!(PasswordHasher::validate_password_policy("Testtest", &policy).is_err());
        // Absurdly long
        let long = format!("A1{}", "a".repeat(2000));
        assert!(PasswordHasher::validate_password_policy(&long, &policy).is_err());
    }

    #[test]
    fn test_password_policy_special_character() {
        let mut policy = policy();
        policy.password_require_special = true;

        assert!(PasswordHasher::validate_password_policy("Test1234", &policy).is_err());
        assert!(PasswordHasher::validate_password_policy("Test123!", &policy).is_ok());
    }
}
