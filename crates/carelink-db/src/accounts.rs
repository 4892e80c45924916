use crate::{bool_from_any_row, DbError, DbPool};
use sqlx::any::AnyRow;
use sqlx::{FromRow, Row};

// `totp_enabled` is projected through a CASE expression because sqlx's Any
// driver cannot decode SQLite's declared BOOLEAN type; the 0/1 it produces
// is portable across backends and is converted back to bool by
// `bool_from_any_row`.
const ACCOUNT_COLUMNS: &str = "id, email, password_hash, display_name, phone, role, status, \
     otp_hash, otp_expires_at, totp_secret, totp_pending_secret, \
     CASE WHEN totp_enabled THEN 1 ELSE 0 END AS totp_enabled, \
     created_at, updated_at, last_login_at";

/// One account row. Timestamps are Unix seconds; `role` and `status` are the
/// raw stored strings (interpreted by the core layer).
#[derive(Debug, Clone)]
pub struct AccountRow {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub status: String,
    pub otp_hash: Option<String>,
    pub otp_expires_at: Option<i64>,
    pub totp_secret: Option<String>,
    pub totp_pending_secret: Option<String>,
    pub totp_enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_login_at: Option<i64>,
}

impl FromRow<'_, AnyRow> for AccountRow {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            display_name: row.try_get("display_name")?,
            phone: row.try_get("phone")?,
            role: row.try_get("role")?,
            status: row.try_get("status")?,
            otp_hash: row.try_get("otp_hash")?,
            otp_expires_at: row.try_get("otp_expires_at")?,
            totp_secret: row.try_get("totp_secret")?,
            totp_pending_secret: row.try_get("totp_pending_secret")?,
            totp_enabled: bool_from_any_row(row, "totp_enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_login_at: row.try_get("last_login_at")?,
        })
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn create_account(
    pool: &DbPool,
    id: i64,
    email: &str,
    password_hash: &str,
    display_name: &str,
    role: &str,
    phone: Option<&str>,
    now: i64,
) -> Result<AccountRow, DbError> {
    let sql = format!(
        "INSERT INTO accounts (id, email, password_hash, display_name, phone, role, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'inactive', ?7, ?7)
         RETURNING {ACCOUNT_COLUMNS}"
    );
    let row = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(id)
        .bind(email)
        .bind(password_hash)
        .bind(display_name)
        .bind(phone)
        .bind(role)
        .bind(now)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn get_account_by_id(pool: &DbPool, id: i64) -> Result<Option<AccountRow>, DbError> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1");
    let row = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_account_by_email(
    pool: &DbPool,
    email: &str,
) -> Result<Option<AccountRow>, DbError> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?1");
    let row = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn count_accounts(pool: &DbPool) -> Result<i64, DbError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM accounts")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

pub async fn list_accounts_paginated(
    pool: &DbPool,
    offset: i64,
    limit: i64,
) -> Result<Vec<AccountRow>, DbError> {
    let sql = format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts
         ORDER BY created_at ASC
         LIMIT ?1 OFFSET ?2"
    );
    let rows = sqlx::query_as::<_, AccountRow>(&sql)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn set_status(
    pool: &DbPool,
    id: i64,
    status: &str,
    now: i64,
) -> Result<AccountRow, DbError> {
    let sql = format!(
        "UPDATE accounts SET status = ?2, updated_at = ?3
         WHERE id = ?1
         RETURNING {ACCOUNT_COLUMNS}"
    );
    sqlx::query_as::<_, AccountRow>(&sql)
        .bind(id)
        .bind(status)
        .bind(now)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

pub async fn set_role(pool: &DbPool, id: i64, role: &str, now: i64) -> Result<AccountRow, DbError> {
    let sql = format!(
        "UPDATE accounts SET role = ?2, updated_at = ?3
         WHERE id = ?1
         RETURNING {ACCOUNT_COLUMNS}"
    );
    sqlx::query_as::<_, AccountRow>(&sql)
        .bind(id)
        .bind(role)
        .bind(now)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

pub async fn update_last_login(pool: &DbPool, id: i64, now: i64) -> Result<(), DbError> {
    sqlx::query("UPDATE accounts SET last_login_at = ?2, updated_at = ?2 WHERE id = ?1")
        .bind(id)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(())
}

/// Store a fresh OTP hash + expiry, superseding any unconsumed code.
pub async fn set_otp(
    pool: &DbPool,
    id: i64,
    otp_hash: &str,
    expires_at: i64,
    now: i64,
) -> Result<(), DbError> {
    let result =
        sqlx::query("UPDATE accounts SET otp_hash = ?2, otp_expires_at = ?3, updated_at = ?4 WHERE id = ?1")
            .bind(id)
            .bind(otp_hash)
            .bind(expires_at)
            .bind(now)
            .execute(pool)
            .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Clear the OTP record iff it still holds `expected_hash`. Returns whether a
/// row was updated; a false return means the code was already consumed or
/// superseded by a newer issuance.
pub async fn consume_otp(
    pool: &DbPool,
    id: i64,
    expected_hash: &str,
    now: i64,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE accounts SET otp_hash = NULL, otp_expires_at = NULL, updated_at = ?3
         WHERE id = ?1 AND otp_hash = ?2",
    )
    .bind(id)
    .bind(expected_hash)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn set_pending_totp_secret(
    pool: &DbPool,
    id: i64,
    secret: &str,
    now: i64,
) -> Result<(), DbError> {
    let result =
        sqlx::query("UPDATE accounts SET totp_pending_secret = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(secret)
            .bind(now)
            .execute(pool)
            .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Promote the pending secret to the confirmed one iff it still equals
/// `expected_pending`. Returns whether the promotion happened.
pub async fn promote_pending_totp(
    pool: &DbPool,
    id: i64,
    expected_pending: &str,
    now: i64,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE accounts
         SET totp_secret = totp_pending_secret, totp_pending_secret = NULL,
             totp_enabled = TRUE, updated_at = ?3
         WHERE id = ?1 AND totp_pending_secret = ?2",
    )
    .bind(id)
    .bind(expected_pending)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Clear both secrets and the enabled flag. No partial state is retained.
pub async fn disable_totp(pool: &DbPool, id: i64, now: i64) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE accounts
         SET totp_secret = NULL, totp_pending_secret = NULL,
             totp_enabled = FALSE, updated_at = ?2
         WHERE id = ?1",
    )
    .bind(id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};

    async fn test_pool() -> DbPool {
        let pool = create_pool("sqlite::memory:", 1).await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn creates_accounts_inactive_and_enforces_unique_email() {
        let pool = test_pool().await;
        let row = create_account(
            &pool,
            1,
            "alice@example.com",
            "$argon2id$stub",
            "Alice",
            "patient",
            None,
            1_700_000_000,
        )
        .await
        .expect("create");
        assert_eq!(row.status, "inactive");
        assert!(!row.totp_enabled);
        assert!(row.otp_hash.is_none());

        let dup = create_account(
            &pool,
            2,
            "alice@example.com",
            "$argon2id$stub",
            "Alice Again",
            "patient",
            None,
            1_700_000_001,
        )
        .await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn otp_consume_is_single_use() {
        let pool = test_pool().await;
        create_account(
            &pool,
            1,
            "bob@example.com",
            "hash",
            "Bob",
            "doctor",
            None,
            1_700_000_000,
        )
        .await
        .expect("create");

        set_otp(&pool, 1, "abc123", 1_700_000_600, 1_700_000_000)
            .await
            .expect("set otp");
        assert!(consume_otp(&pool, 1, "abc123", 1_700_000_100)
            .await
            .expect("first consume"));
        assert!(!consume_otp(&pool, 1, "abc123", 1_700_000_101)
            .await
            .expect("second consume"));
    }

    #[tokio::test]
    async fn reissuing_an_otp_supersedes_the_previous_code() {
        let pool = test_pool().await;
        create_account(
            &pool,
            1,
            "carol@example.com",
            "hash",
            "Carol",
            "staff",
            None,
            1_700_000_000,
        )
        .await
        .expect("create");

        set_otp(&pool, 1, "first", 1_700_000_600, 1_700_000_000)
            .await
            .expect("set otp");
        set_otp(&pool, 1, "second", 1_700_000_700, 1_700_000_050)
            .await
            .expect("reissue");
        assert!(!consume_otp(&pool, 1, "first", 1_700_000_100)
            .await
            .expect("stale code"));
        assert!(consume_otp(&pool, 1, "second", 1_700_000_100)
            .await
            .expect("live code"));
    }

    #[tokio::test]
    async fn totp_promotion_requires_the_expected_pending_secret() {
        let pool = test_pool().await;
        create_account(
            &pool,
            1,
            "dave@example.com",
            "hash",
            "Dave",
            "admin",
            None,
            1_700_000_000,
        )
        .await
        .expect("create");

        set_pending_totp_secret(&pool, 1, "SECRETA", 1_700_000_000)
            .await
            .expect("pending");
        assert!(!promote_pending_totp(&pool, 1, "WRONG", 1_700_000_010)
            .await
            .expect("mismatch"));
        assert!(promote_pending_totp(&pool, 1, "SECRETA", 1_700_000_020)
            .await
            .expect("match"));

        let row = get_account_by_id(&pool, 1)
            .await
            .expect("get")
            .expect("exists");
        assert!(row.totp_enabled);
        assert_eq!(row.totp_secret.as_deref(), Some("SECRETA"));
        assert!(row.totp_pending_secret.is_none());

        disable_totp(&pool, 1, 1_700_000_030).await.expect("disable");
        let row = get_account_by_id(&pool, 1)
            .await
            .expect("get")
            .expect("exists");
        assert!(!row.totp_enabled);
        assert!(row.totp_secret.is_none());
    }

    #[tokio::test]
    async fn role_and_status_mutators_return_the_updated_row() {
        let pool = test_pool().await;
        create_account(
            &pool,
            7,
            "erin@example.com",
            "hash",
            "Erin",
            "patient",
            Some("+45 11 22 33 44"),
            1_700_000_000,
        )
        .await
        .expect("create");

        let row = set_status(&pool, 7, "active", 1_700_000_100)
            .await
            .expect("activate");
        assert_eq!(row.status, "active");

        let row = set_role(&pool, 7, "staff", 1_700_000_200).await.expect("role");
        assert_eq!(row.role, "staff");

        assert!(matches!(
            set_status(&pool, 99, "active", 1_700_000_300).await,
            Err(DbError::NotFound)
        ));
    }
}
