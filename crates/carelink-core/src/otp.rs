use crate::error::CoreError;
use carelink_db::{accounts, DbPool};
use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a uniform 6-digit code, zero-padded ("000000".."999999").
fn generate_code() -> String {
    let value: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{value:06}")
}

pub(crate) fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

pub(crate) fn constant_time_equal(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    let mut diff = 0u8;
    for i in 0..a_bytes.len() {
        diff |= a_bytes[i] ^ b_bytes[i];
    }
    diff == 0
}

/// Issue a fresh code for the account, superseding any unconsumed one.
/// Only the hash is stored; the plaintext goes back to the caller for
/// delivery and is never persisted or logged.
pub async fn issue(pool: &DbPool, account_id: i64, ttl_seconds: u64) -> Result<String, CoreError> {
    let code = generate_code();
    let now = Utc::now().timestamp();
    accounts::set_otp(
        pool,
        account_id,
        &sha256_hex(&code),
        now + ttl_seconds as i64,
        now,
    )
    .await
    .map_err(|e| match e {
        carelink_db::DbError::NotFound => CoreError::NotFound,
        other => CoreError::Database(other),
    })?;
    Ok(code)
}

/// Fail-closed check: false on missing record, expiry, or mismatch.
/// A successful check consumes the stored record (single use).
pub async fn verify(
    pool: &DbPool,
    account_id: i64,
    submitted: &str,
) -> Result<bool, CoreError> {
    let Some(account) = accounts::get_account_by_id(pool, account_id).await? else {
        return Ok(false);
    };
    let (Some(stored_hash), Some(expires_at)) = (account.otp_hash, account.otp_expires_at) else {
        return Ok(false);
    };

    let now = Utc::now().timestamp();
    if now > expires_at {
        return Ok(false);
    }
    if !constant_time_equal(&sha256_hex(submitted), &stored_hash) {
        return Ok(false);
    }

    // Compare-and-clear so a concurrent duplicate submit cannot double-spend
    // the code.
    Ok(accounts::consume_otp(pool, account_id, &stored_hash, now).await?)
}
