use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found")]
    NotFound,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("conflict: {0}")]
    Conflict(String),
    /// Unified answer for unknown email and wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is not active")]
    AccountNotActive,
    /// Covers OTP and TOTP mismatches alike.
    #[error("invalid code")]
    InvalidCode,
    #[error("database error: {0}")]
    Database(#[from] carelink_db::DbError),
    #[error("internal error: {0}")]
    Internal(String),
}
