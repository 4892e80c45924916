use crate::{DbError, DbPool};
use sqlx::any::AnyRow;
use sqlx::{FromRow, Row};

/// Throttle state for one guard key ("ip:<addr>" or "acct:<email>").
#[derive(Debug, Clone)]
pub struct AuthGuardRow {
    pub guard_key: String,
    pub failures: i64,
    pub locked_until: Option<i64>,
    pub updated_at: i64,
}

impl FromRow<'_, AnyRow> for AuthGuardRow {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            guard_key: row.try_get("guard_key")?,
            failures: row.try_get("failures")?,
            locked_until: row.try_get("locked_until")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

pub async fn get_guard_states(
    pool: &DbPool,
    keys: &[String],
) -> Result<Vec<AuthGuardRow>, DbError> {
    let mut rows = Vec::with_capacity(keys.len());
    for key in keys {
        let row = sqlx::query_as::<_, AuthGuardRow>(
            "SELECT guard_key, failures, locked_until, updated_at
             FROM auth_guard WHERE guard_key = ?1",
        )
        .bind(key)
        .fetch_optional(pool)
        .await?;
        if let Some(row) = row {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Bump the failure counter for a key, returning the new count.
pub async fn record_failure(pool: &DbPool, key: &str, now: i64) -> Result<i64, DbError> {
    let (failures,): (i64,) = sqlx::query_as(
        "INSERT INTO auth_guard (guard_key, failures, updated_at)
         VALUES (?1, 1, ?2)
         ON CONFLICT (guard_key) DO UPDATE SET
            failures = auth_guard.failures + 1,
            updated_at = ?2
         RETURNING failures",
    )
    .bind(key)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(failures)
}

pub async fn lock_key(pool: &DbPool, key: &str, until: i64, now: i64) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO auth_guard (guard_key, failures, locked_until, updated_at)
         VALUES (?1, 0, ?2, ?3)
         ON CONFLICT (guard_key) DO UPDATE SET
            locked_until = ?2,
            updated_at = ?3",
    )
    .bind(key)
    .bind(until)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn clear_keys(pool: &DbPool, keys: &[String]) -> Result<(), DbError> {
    for key in keys {
        sqlx::query("DELETE FROM auth_guard WHERE guard_key = ?1")
            .bind(key)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Drop stale guard rows in bounded batches (lazy cleanup; no sweeper task).
pub async fn purge_older_than(pool: &DbPool, cutoff: i64, limit: i64) -> Result<u64, DbError> {
    let result = sqlx::query(
        "DELETE FROM auth_guard WHERE guard_key IN (
             SELECT guard_key FROM auth_guard WHERE updated_at < ?1 LIMIT ?2
         )",
    )
    .bind(cutoff)
    .bind(limit)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
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
    async fn failures_accumulate_per_key() {
        let pool = test_pool().await;
        assert_eq!(
            record_failure(&pool, "acct:alice@example.com", 100)
                .await
                .expect("first"),
            1
        );
        assert_eq!(
            record_failure(&pool, "acct:alice@example.com", 101)
                .await
                .expect("second"),
            2
        );
        assert_eq!(
            record_failure(&pool, "ip:203.0.113.4", 102).await.expect("other key"),
            1
        );
    }

    #[tokio::test]
    async fn locking_and_clearing_round_trip() {
        let pool = test_pool().await;
        record_failure(&pool, "ip:203.0.113.4", 100).await.expect("fail");
        lock_key(&pool, "ip:203.0.113.4", 1_000, 100).await.expect("lock");

        let keys = vec!["ip:203.0.113.4".to_string(), "acct:none".to_string()];
        let states = get_guard_states(&pool, &keys).await.expect("states");
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].locked_until, Some(1_000));

        clear_keys(&pool, &keys).await.expect("clear");
        assert!(get_guard_states(&pool, &keys).await.expect("states").is_empty());
    }

    #[tokio::test]
    async fn purge_removes_only_stale_rows() {
        let pool = test_pool().await;
        record_failure(&pool, "ip:old", 10).await.expect("old");
        record_failure(&pool, "ip:new", 500).await.expect("new");

        let purged = purge_older_than(&pool, 100, 64).await.expect("purge");
        assert_eq!(purged, 1);
        let remaining = get_guard_states(&pool, &["ip:new".to_string()])
            .await
            .expect("states");
        assert_eq!(remaining.len(), 1);
    }
}
