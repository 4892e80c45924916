use crate::error::CoreError;
use carelink_db::{accounts, DbPool};
use chrono::Utc;
use totp_rs::{Algorithm, Secret, TOTP};

pub struct TotpSetup {
    pub secret: String,
    pub provisioning_uri: String,
}

/// Standard parameters: HMAC-SHA1 over 30-second steps, 6 digits, ±1 step
/// of clock-drift tolerance.
fn build_totp(secret_b32: &str, issuer: &str, label: &str) -> Result<TOTP, CoreError> {
    let bytes = Secret::Encoded(secret_b32.to_string())
        .to_bytes()
        .map_err(|e| CoreError::Internal(format!("invalid totp secret: {e:?}")))?;
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        bytes,
        Some(issuer.to_string()),
        label.to_string(),
    )
    .map_err(|e| CoreError::Internal(format!("totp construction failed: {e}")))
}

fn check_code(secret_b32: &str, issuer: &str, label: &str, code: &str) -> Result<bool, CoreError> {
    let totp = build_totp(secret_b32, issuer, label)?;
    Ok(totp.check_current(code).unwrap_or(false))
}

/// Generate a new secret and park it as the account's pending secret. 2FA is
/// not enabled until the owner proves possession via `confirm_setup`.
pub async fn begin_setup(
    pool: &DbPool,
    account_id: i64,
    issuer: &str,
) -> Result<TotpSetup, CoreError> {
    let account = accounts::get_account_by_id(pool, account_id)
        .await?
        .ok_or(CoreError::NotFound)?;

    let secret = Secret::generate_secret();
    let encoded = secret.to_encoded().to_string();
    let totp = build_totp(&encoded, issuer, &account.email)?;
    accounts::set_pending_totp_secret(pool, account_id, &encoded, Utc::now().timestamp())
        .await
        .map_err(|e| match e {
            carelink_db::DbError::NotFound => CoreError::NotFound,
            other => CoreError::Database(other),
        })?;

    Ok(TotpSetup {
        secret: encoded,
        provisioning_uri: totp.get_url(),
    })
}

/// Validate a code against the pending secret and, on match, promote it to
/// the confirmed secret. A failed code leaves the pending secret in place so
/// the owner can retry.
pub async fn confirm_setup(
    pool: &DbPool,
    account_id: i64,
    issuer: &str,
    submitted: &str,
) -> Result<(), CoreError> {
    let account = accounts::get_account_by_id(pool, account_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    let pending = account
        .totp_pending_secret
        .ok_or_else(|| CoreError::InvalidInput("no second-factor setup in progress".into()))?;

    if !check_code(&pending, issuer, &account.email, submitted)? {
        return Err(CoreError::InvalidCode);
    }
    if !accounts::promote_pending_totp(pool, account_id, &pending, Utc::now().timestamp()).await? {
        // Pending secret changed under us (a newer begin_setup won).
        return Err(CoreError::InvalidCode);
    }
    Ok(())
}

/// False when 2FA is not enabled for the account.
pub async fn verify_login(
    pool: &DbPool,
    account_id: i64,
    issuer: &str,
    submitted: &str,
) -> Result<bool, CoreError> {
    let Some(account) = accounts::get_account_by_id(pool, account_id).await? else {
        return Ok(false);
    };
    if !account.totp_enabled {
        return Ok(false);
    }
    let Some(secret) = account.totp_secret else {
        return Ok(false);
    };
    check_code(&secret, issuer, &account.email, submitted)
}

/// Clear the secret, not merely the flag, so a later re-enable cannot replay
/// stale material.
pub async fn disable(pool: &DbPool, account_id: i64) -> Result<(), CoreError> {
    accounts::disable_totp(pool, account_id, Utc::now().timestamp()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_db::{create_pool, run_migrations};

    const ISSUER: &str = "CareLink";

    async fn pool_with_account() -> DbPool {
        let pool = create_pool("sqlite::memory:", 1).await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        accounts::create_account(
            &pool,
            1,
            "alice@example.com",
            "hash",
            "Alice",
            "patient",
            None,
            Utc::now().timestamp(),
        )
        .await
        .expect("account");
        pool
    }

    fn current_code(secret_b32: &str) -> String {
        build_totp(secret_b32, ISSUER, "alice@example.com")
            .expect("totp")
            .generate_current()
            .expect("code")
    }

    #[tokio::test]
    async fn setup_confirm_round_trip_enables_2fa() {
        let pool = pool_with_account().await;
        let setup = begin_setup(&pool, 1, ISSUER).await.expect("begin");
        assert!(setup.provisioning_uri.starts_with("otpauth://totp/"));
        assert!(setup.provisioning_uri.contains("CareLink"));

        // Not enabled until confirmed.
        let row = accounts::get_account_by_id(&pool, 1).await.expect("get").expect("row");
        assert!(!row.totp_enabled);

        let code = current_code(&setup.secret);
        confirm_setup(&pool, 1, ISSUER, &code).await.expect("confirm");

        let row = accounts::get_account_by_id(&pool, 1).await.expect("get").expect("row");
        assert!(row.totp_enabled);
        assert_eq!(row.totp_secret.as_deref(), Some(setup.secret.as_str()));

        assert!(verify_login(&pool, 1, ISSUER, &current_code(&setup.secret))
            .await
            .expect("login code"));
        assert!(!verify_login(&pool, 1, ISSUER, "000000").await.expect("bad code"));
    }

    #[tokio::test]
    async fn wrong_confirm_code_leaves_the_pending_secret_retryable() {
        let pool = pool_with_account().await;
        let setup = begin_setup(&pool, 1, ISSUER).await.expect("begin");

        let err = confirm_setup(&pool, 1, ISSUER, "000000").await.expect_err("bad code");
        assert!(matches!(err, CoreError::InvalidCode));

        let row = accounts::get_account_by_id(&pool, 1).await.expect("get").expect("row");
        assert!(!row.totp_enabled);
        assert_eq!(row.totp_pending_secret.as_deref(), Some(setup.secret.as_str()));

        // Retry with the right code still succeeds.
        confirm_setup(&pool, 1, ISSUER, &current_code(&setup.secret))
            .await
            .expect("retry confirm");
    }

    #[tokio::test]
    async fn verify_login_is_false_without_enabled_2fa() {
        let pool = pool_with_account().await;
        assert!(!verify_login(&pool, 1, ISSUER, "123456").await.expect("disabled"));
    }

    #[tokio::test]
    async fn disable_clears_all_secret_material() {
        let pool = pool_with_account().await;
        let setup = begin_setup(&pool, 1, ISSUER).await.expect("begin");
        confirm_setup(&pool, 1, ISSUER, &current_code(&setup.secret))
            .await
            .expect("confirm");

        disable(&pool, 1).await.expect("disable");
        let row = accounts::get_account_by_id(&pool, 1).await.expect("get").expect("row");
        assert!(!row.totp_enabled);
        assert!(row.totp_secret.is_none());
        assert!(row.totp_pending_secret.is_none());
    }

    #[tokio::test]
    async fn confirm_without_setup_reports_invalid_input() {
        let pool = pool_with_account().await;
        let err = confirm_setup(&pool, 1, ISSUER, "123456").await.expect_err("no setup");
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
