use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("token expired")]
    TokenExpired,
    #[error("invalid token")]
    InvalidToken,
    #[error("wrong token type")]
    WrongTokenType,
    #[error("internal error: {0}")]
    Internal(String),
}

/// The two token classes. A pre-2FA token proves password correctness only
/// and must never satisfy a full-session check, or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Full,
    Pre2fa,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Full => "full",
            TokenKind::Pre2fa => "pre2fa",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub typ: String,
    pub iat: usize,
    pub exp: usize,
}

pub fn hash_password(
    password: &str,
    memory_kib: u32,
    iterations: u32,
) -> Result<String, AuthError> {
    let params = Params::new(memory_kib, iterations, 1, None)
        .map_err(|e| AuthError::Internal(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Internal(e.to_string()))
}

/// The PHC string carries its own cost parameters, so verification does not
/// need the configured cost.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash).map_err(|e| AuthError::Internal(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub fn create_full_token(
    account_id: i64,
    role: &str,
    secret: &str,
    ttl_seconds: u64,
) -> Result<String, AuthError> {
    create_token(account_id, Some(role), TokenKind::Full, secret, ttl_seconds)
}

pub fn create_pre2fa_token(
    account_id: i64,
    secret: &str,
    ttl_seconds: u64,
) -> Result<String, AuthError> {
    create_token(account_id, None, TokenKind::Pre2fa, secret, ttl_seconds)
}

fn create_token(
    account_id: i64,
    role: Option<&str>,
    kind: TokenKind,
    secret: &str,
    ttl_seconds: u64,
) -> Result<String, AuthError> {
    let now = chrono::Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: account_id,
        role: role.map(str::to_string),
        typ: kind.as_str().to_string(),
        iat: now,
        exp: now + ttl_seconds as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Internal(e.to_string()))
}

pub fn validate_token(
    token: &str,
    secret: &str,
    expected: TokenKind,
) -> Result<Claims, AuthError> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::InvalidToken,
    })?;

    if claims.typ != expected.as_str() {
        return Err(AuthError::WrongTokenType);
    }
    Ok(claims)
}
