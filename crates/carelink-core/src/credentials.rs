use crate::error::CoreError;
use crate::notify::NotificationSink;
use crate::{auth, otp, AccountStatus, AppConfig, Role};
use carelink_db::accounts::{self, AccountRow};
use carelink_db::DbPool;
use carelink_util::{snowflake, validation};
use chrono::Utc;

/// Argon2id PHC string verified against when the email lookup misses, so the
/// unified invalid-credentials answer costs the same either way.
const DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$VE0e3g7DalWHgDwou3nuRA$uC6TER156UQpk0lNQ5+jHM0l5poVjPA1he8TZbuA+aE";

pub struct NewAccount<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub display_name: &'a str,
    pub role: Role,
    pub phone: Option<&'a str>,
}

pub fn normalize_email(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// Create an inactive account and dispatch its activation code. Registration
/// is not complete until the OTP has gone out through the sink.
pub async fn register(
    pool: &DbPool,
    sink: &dyn NotificationSink,
    config: &AppConfig,
    new: NewAccount<'_>,
) -> Result<AccountRow, CoreError> {
    let email = normalize_email(new.email);
    validation::validate_email(&email)
        .map_err(|e| CoreError::InvalidInput(format!("email: {e}")))?;
    validation::validate_password(new.password)
        .map_err(|e| CoreError::InvalidInput(format!("password: {e}")))?;
    let display_name = new.display_name.trim();
    validation::validate_display_name(display_name)
        .map_err(|e| CoreError::InvalidInput(format!("display name: {e}")))?;
    if let Some(phone) = new.phone {
        validation::validate_phone(phone)
            .map_err(|e| CoreError::InvalidInput(format!("phone: {e}")))?;
    }
    // Admin accounts are created by promotion, never by self-registration.
    if new.role == Role::Admin {
        return Err(CoreError::InvalidInput(
            "role cannot be self-assigned".into(),
        ));
    }

    if accounts::get_account_by_email(pool, &email).await?.is_some() {
        return Err(CoreError::Conflict(
            "an account with this email already exists".into(),
        ));
    }

    let password_hash = auth::hash_password(
        new.password,
        config.argon2_memory_kib,
        config.argon2_iterations,
    )
    .map_err(|e| CoreError::Internal(e.to_string()))?;

    let id = snowflake::generate(1);
    let account = accounts::create_account(
        pool,
        id,
        &email,
        &password_hash,
        display_name,
        new.role.as_str(),
        new.phone,
        Utc::now().timestamp(),
    )
    .await?;

    dispatch_otp(pool, sink, config, &account).await?;
    Ok(account)
}

/// Issue a fresh activation code and hand it to the notification sink.
pub async fn dispatch_otp(
    pool: &DbPool,
    sink: &dyn NotificationSink,
    config: &AppConfig,
    account: &AccountRow,
) -> Result<(), CoreError> {
    let code = otp::issue(pool, account.id, config.otp_ttl_seconds).await?;
    let minutes = config.otp_ttl_seconds / 60;
    sink.send(
        &account.email,
        "Verify your CareLink account",
        &format!(
            "Your CareLink verification code is {code}. It expires in {minutes} minutes."
        ),
    )?;
    Ok(())
}

/// Password check. Unknown email and wrong password share one error; a
/// non-active account is reported distinctly only after the password
/// verified. Updates the last-login timestamp on success.
pub async fn authenticate(
    pool: &DbPool,
    email: &str,
    password: &str,
) -> Result<AccountRow, CoreError> {
    let email = normalize_email(email);
    let account = match accounts::get_account_by_email(pool, &email).await? {
        Some(account) => account,
        None => {
            // Burn a verification anyway to level response timing.
            let _ = auth::verify_password(password, DUMMY_HASH);
            return Err(CoreError::InvalidCredentials);
        }
    };

    let valid = auth::verify_password(password, &account.password_hash)
        .map_err(|e| CoreError::Internal(e.to_string()))?;
    if !valid {
        return Err(CoreError::InvalidCredentials);
    }

    if AccountStatus::parse(&account.status) != Some(AccountStatus::Active) {
        return Err(CoreError::AccountNotActive);
    }

    accounts::update_last_login(pool, account.id, Utc::now().timestamp()).await?;
    Ok(account)
}

/// `inactive -> active`. Idempotent when already active.
pub async fn activate(pool: &DbPool, account_id: i64) -> Result<AccountRow, CoreError> {
    let account = accounts::get_account_by_id(pool, account_id)
        .await?
        .ok_or(CoreError::NotFound)?;
    if AccountStatus::parse(&account.status) == Some(AccountStatus::Active) {
        return Ok(account);
    }
    let updated = accounts::set_status(
        pool,
        account_id,
        AccountStatus::Active.as_str(),
        Utc::now().timestamp(),
    )
    .await
    .map_err(|e| match e {
        carelink_db::DbError::NotFound => CoreError::NotFound,
        other => CoreError::Database(other),
    })?;
    Ok(updated)
}

pub async fn set_role(pool: &DbPool, account_id: i64, role: Role) -> Result<AccountRow, CoreError> {
    accounts::set_role(pool, account_id, role.as_str(), Utc::now().timestamp())
        .await
        .map_err(|e| match e {
            carelink_db::DbError::NotFound => CoreError::NotFound,
            other => CoreError::Database(other),
        })
}

pub async fn set_status(
    pool: &DbPool,
    account_id: i64,
    status: AccountStatus,
) -> Result<AccountRow, CoreError> {
    accounts::set_status(pool, account_id, status.as_str(), Utc::now().timestamp())
        .await
        .map_err(|e| match e {
            carelink_db::DbError::NotFound => CoreError::NotFound,
            other => CoreError::Database(other),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemorySink;
    use carelink_db::{create_pool, run_migrations};

    fn test_config() -> AppConfig {
        AppConfig {
            jwt_secret: "0123456789abcdef0123456789abcdef".into(),
            session_ttl_seconds: 604_800,
            pre2fa_ttl_seconds: 300,
            otp_ttl_seconds: 600,
            totp_issuer: "CareLink".into(),
            public_url: None,
            argon2_memory_kib: 1024,
            argon2_iterations: 1,
        }
    }

    async fn test_pool() -> DbPool {
        let pool = create_pool("sqlite::memory:", 1).await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        pool
    }

    fn extract_code(body: &str) -> String {
        body.chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take(6)
            .collect()
    }

    #[tokio::test]
    async fn registration_creates_inactive_account_and_dispatches_otp() {
        let pool = test_pool().await;
        let sink = MemorySink::new();
        let config = test_config();

        let account = register(
            &pool,
            &sink,
            &config,
            NewAccount {
                email: "  Alice@Example.COM ",
                password: "secret1",
                display_name: "Alice",
                role: Role::Patient,
                phone: None,
            },
        )
        .await
        .expect("register");

        assert_eq!(account.email, "alice@example.com");
        assert_eq!(account.status, "inactive");
        assert_ne!(account.password_hash, "secret1");

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].destination, "alice@example.com");
        let code = extract_code(&messages[0].body);
        assert_eq!(code.len(), 6);

        // Login is refused until the code is verified.
        let err = authenticate(&pool, "alice@example.com", "secret1")
            .await
            .expect_err("inactive");
        assert!(matches!(err, CoreError::AccountNotActive));

        assert!(otp::verify(&pool, account.id, &code).await.expect("verify"));
        activate(&pool, account.id).await.expect("activate");

        let logged_in = authenticate(&pool, "alice@example.com", "secret1")
            .await
            .expect("login");
        assert!(logged_in.last_login_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let pool = test_pool().await;
        let sink = MemorySink::new();
        let config = test_config();
        let new = |email| NewAccount {
            email,
            password: "secret1",
            display_name: "Someone",
            role: Role::Patient,
            phone: None,
        };

        register(&pool, &sink, &config, new("dup@example.com"))
            .await
            .expect("first");
        let err = register(&pool, &sink, &config, new("DUP@example.com"))
            .await
            .expect_err("second");
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_write() {
        let pool = test_pool().await;
        let sink = MemorySink::new();
        let config = test_config();

        for (email, password) in [
            ("not-an-email", "secret1"),
            ("ok@example.com", "short"),
        ] {
            let err = register(
                &pool,
                &sink,
                &config,
                NewAccount {
                    email,
                    password,
                    display_name: "Someone",
                    role: Role::Doctor,
                    phone: None,
                },
            )
            .await
            .expect_err("invalid");
            assert!(matches!(err, CoreError::InvalidInput(_)));
        }
        assert!(sink.messages().is_empty());
    }

    #[tokio::test]
    async fn admin_role_cannot_be_self_registered() {
        let pool = test_pool().await;
        let sink = MemorySink::new();
        let config = test_config();

        let err = register(
            &pool,
            &sink,
            &config,
            NewAccount {
                email: "boss@example.com",
                password: "secret1",
                display_name: "Boss",
                role: Role::Admin,
                phone: None,
            },
        )
        .await
        .expect_err("admin");
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_share_one_error() {
        let pool = test_pool().await;
        let sink = MemorySink::new();
        let config = test_config();

        let account = register(
            &pool,
            &sink,
            &config,
            NewAccount {
                email: "bob@example.com",
                password: "secret1",
                display_name: "Bob",
                role: Role::Doctor,
                phone: None,
            },
        )
        .await
        .expect("register");
        activate(&pool, account.id).await.expect("activate");

        let unknown = authenticate(&pool, "ghost@example.com", "secret1")
            .await
            .expect_err("unknown email");
        let wrong = authenticate(&pool, "bob@example.com", "not-it")
            .await
            .expect_err("wrong password");
        assert!(matches!(unknown, CoreError::InvalidCredentials));
        assert!(matches!(wrong, CoreError::InvalidCredentials));
    }

    #[tokio::test]
    async fn same_password_registers_with_distinct_hashes() {
        let pool = test_pool().await;
        let sink = MemorySink::new();
        let config = test_config();

        let a = register(
            &pool,
            &sink,
            &config,
            NewAccount {
                email: "a@example.com",
                password: "same-password",
                display_name: "A",
                role: Role::Patient,
                phone: None,
            },
        )
        .await
        .expect("a");
        let b = register(
            &pool,
            &sink,
            &config,
            NewAccount {
                email: "b@example.com",
                password: "same-password",
                display_name: "B",
                role: Role::Patient,
                phone: None,
            },
        )
        .await
        .expect("b");
        assert_ne!(a.password_hash, b.password_hash);
    }

    #[tokio::test]
    async fn activation_is_idempotent_and_suspension_blocks_login() {
        let pool = test_pool().await;
        let sink = MemorySink::new();
        let config = test_config();

        let account = register(
            &pool,
            &sink,
            &config,
            NewAccount {
                email: "carol@example.com",
                password: "secret1",
                display_name: "Carol",
                role: Role::Staff,
                phone: None,
            },
        )
        .await
        .expect("register");

        activate(&pool, account.id).await.expect("activate");
        let again = activate(&pool, account.id).await.expect("idempotent");
        assert_eq!(again.status, "active");

        set_status(&pool, account.id, AccountStatus::Suspended)
            .await
            .expect("suspend");
        let err = authenticate(&pool, "carol@example.com", "secret1")
            .await
            .expect_err("suspended");
        assert!(matches!(err, CoreError::AccountNotActive));
    }
}
