use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;

fn harden_secret_file_permissions(path: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Public URL of this server (e.g., https://care.example.com).
    /// Drives the session cookie Secure attribute.
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".into(),
            public_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_engine")]
    pub engine: DatabaseEngine,
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    Sqlite,
    Postgres,
}

impl Default for DatabaseEngine {
    fn default() -> Self {
        Self::Sqlite
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: default_database_engine(),
            url: "sqlite://./data/carelink.db?mode=rwc".into(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    #[serde(default = "default_pre2fa_ttl")]
    pub pre2fa_ttl_seconds: u64,
    #[serde(default = "default_otp_ttl")]
    pub otp_ttl_seconds: u64,
    #[serde(default = "default_totp_issuer")]
    pub totp_issuer: String,
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: generate_random_hex(64),
            session_ttl_seconds: default_session_ttl(),
            pre2fa_ttl_seconds: default_pre2fa_ttl(),
            otp_ttl_seconds: default_otp_ttl(),
            totp_issuer: default_totp_issuer(),
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Generate a cryptographically random hex string of the given length.
fn generate_random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..16u8);
            char::from(if idx < 10 {
                b'0' + idx
            } else {
                b'a' + idx - 10
            })
        })
        .collect()
}

fn default_database_engine() -> DatabaseEngine {
    DatabaseEngine::Sqlite
}
fn default_max_connections() -> u32 {
    20
}
fn default_session_ttl() -> u64 {
    604_800 // 7 days
}
fn default_pre2fa_ttl() -> u64 {
    300 // 5 minutes
}
fn default_otp_ttl() -> u64 {
    600 // 10 minutes
}
fn default_totp_issuer() -> String {
    "CareLink".into()
}
fn default_argon2_memory_kib() -> u32 {
    19_456
}
fn default_argon2_iterations() -> u32 {
    2
}

fn looks_like_placeholder_secret(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return true;
    }
    normalized.contains("change_me")
        || normalized.contains("replace_me")
        || normalized.contains("replace_with")
        || normalized.starts_with("example")
        || normalized == "devkey"
        || normalized == "devsecret"
        || normalized == "secret"
}

fn validate_secret_configuration(config: &Config) -> Result<()> {
    let jwt_secret = config.auth.jwt_secret.trim();
    if jwt_secret.len() < 32 || looks_like_placeholder_secret(jwt_secret) {
        anyhow::bail!(
            "Invalid auth.jwt_secret: use a strong random secret (at least 32 characters) and never leave placeholder values"
        );
    }

    if config.auth.pre2fa_ttl_seconds == 0 || config.auth.otp_ttl_seconds == 0 {
        anyhow::bail!("Invalid auth TTLs: pre2fa_ttl_seconds and otp_ttl_seconds must be non-zero");
    }

    Ok(())
}

/// Generate a commented config file template with the given values filled in.
fn generate_config_template(config: &Config) -> String {
    format!(
        r#"# CareLink Server Configuration
# Generated automatically on first run. Edit as needed.

[server]
bind_address = "{bind_address}"
# Set explicitly for internet-facing deployments:
# public_url = "https://care.example.com"

[database]
engine = "{db_engine}"
url = "{db_url}"
max_connections = {max_connections}

[auth]
jwt_secret = "{jwt_secret}"
# Full session token TTL (default 7 days).
session_ttl_seconds = {session_ttl}
# Pre-2FA token TTL (default 5 minutes).
pre2fa_ttl_seconds = {pre2fa_ttl}
# Email verification code TTL (default 10 minutes).
otp_ttl_seconds = {otp_ttl}
# Issuer shown in authenticator apps.
totp_issuer = "{totp_issuer}"
# Password hashing cost. Tune so hashing takes tens of milliseconds.
argon2_memory_kib = {argon2_memory_kib}
argon2_iterations = {argon2_iterations}
"#,
        bind_address = config.server.bind_address,
        db_engine = match config.database.engine {
            DatabaseEngine::Sqlite => "sqlite",
            DatabaseEngine::Postgres => "postgres",
        },
        db_url = config.database.url,
        max_connections = config.database.max_connections,
        jwt_secret = config.auth.jwt_secret,
        session_ttl = config.auth.session_ttl_seconds,
        pre2fa_ttl = config.auth.pre2fa_ttl_seconds,
        otp_ttl = config.auth.otp_ttl_seconds,
        totp_issuer = config.auth.totp_issuer,
        argon2_memory_kib = config.auth.argon2_memory_kib,
        argon2_iterations = config.auth.argon2_iterations,
    )
}

// ── Config Loading ───────────────────────────────────────────────────────────

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!(
                "Config file not found at '{}', generating defaults...",
                path
            );
            let config = Config::default();

            // Ensure parent directory exists
            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }

            let template = generate_config_template(&config);
            fs::write(path, &template)?;
            let _ = harden_secret_file_permissions(path);
            tracing::info!("Generated default config at '{}'", path);
            config
        };
        let _ = harden_secret_file_permissions(path);

        // Environment variable overrides
        if let Ok(value) = std::env::var("CARELINK_BIND_ADDRESS") {
            config.server.bind_address = value;
        }
        if let Ok(value) = std::env::var("CARELINK_PUBLIC_URL") {
            config.server.public_url = Some(value);
        }
        if let Ok(value) = std::env::var("CARELINK_DATABASE_URL") {
            config.database.url = value;
        }
        if let Ok(value) = std::env::var("CARELINK_DATABASE_ENGINE") {
            let normalized = value.trim().to_ascii_lowercase();
            match normalized.as_str() {
                "sqlite" => config.database.engine = DatabaseEngine::Sqlite,
                "postgres" | "postgresql" => config.database.engine = DatabaseEngine::Postgres,
                _ => {
                    tracing::warn!(
                        "Ignoring invalid CARELINK_DATABASE_ENGINE value '{}'; expected sqlite or postgres",
                        value
                    );
                }
            }
        }
        if let Ok(value) = std::env::var("CARELINK_DATABASE_MAX_CONNECTIONS") {
            if let Ok(parsed) = value.parse::<u32>() {
                config.database.max_connections = parsed;
            }
        }
        if let Ok(value) = std::env::var("CARELINK_JWT_SECRET") {
            config.auth.jwt_secret = value;
        }
        if let Ok(value) = std::env::var("CARELINK_SESSION_TTL_SECONDS") {
            if let Ok(parsed) = value.parse::<u64>() {
                config.auth.session_ttl_seconds = parsed;
            }
        }
        if let Ok(value) = std::env::var("CARELINK_PRE2FA_TTL_SECONDS") {
            if let Ok(parsed) = value.parse::<u64>() {
                config.auth.pre2fa_ttl_seconds = parsed;
            }
        }
        if let Ok(value) = std::env::var("CARELINK_OTP_TTL_SECONDS") {
            if let Ok(parsed) = value.parse::<u64>() {
                config.auth.otp_ttl_seconds = parsed;
            }
        }
        if let Ok(value) = std::env::var("CARELINK_TOTP_ISSUER") {
            if !value.trim().is_empty() {
                config.auth.totp_issuer = value;
            }
        }
        if let Ok(value) = std::env::var("CARELINK_ARGON2_MEMORY_KIB") {
            if let Ok(parsed) = value.parse::<u32>() {
                config.auth.argon2_memory_kib = parsed;
            }
        }
        if let Ok(value) = std::env::var("CARELINK_ARGON2_ITERATIONS") {
            if let Ok(parsed) = value.parse::<u32>() {
                config.auth.argon2_iterations = parsed;
            }
        }

        validate_secret_configuration(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, DatabaseConfig, DatabaseEngine};
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn database_defaults_to_sqlite_engine() {
        let db = DatabaseConfig::default();
        assert_eq!(db.engine, DatabaseEngine::Sqlite);
    }

    #[test]
    fn generated_defaults_pass_secret_validation() {
        let _guard = env_lock().lock().expect("env lock");
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("carelink-test.toml");
        let config =
            Config::load(config_path.to_str().expect("config path utf8")).expect("load config");
        assert!(config.auth.jwt_secret.len() >= 32);
        assert!(config_path.exists());

        // A second load reads the generated file back.
        let reloaded =
            Config::load(config_path.to_str().expect("config path utf8")).expect("reload config");
        assert_eq!(reloaded.auth.jwt_secret, config.auth.jwt_secret);
    }

    #[test]
    fn env_override_accepts_postgres_engine() {
        let _guard = env_lock().lock().expect("env lock");
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("carelink-test.toml");
        std::env::set_var("CARELINK_JWT_SECRET", "0123456789abcdef0123456789abcdef");
        std::env::set_var("CARELINK_DATABASE_ENGINE", "postgres");
        let config =
            Config::load(config_path.to_str().expect("config path utf8")).expect("load config");
        std::env::remove_var("CARELINK_DATABASE_ENGINE");
        std::env::remove_var("CARELINK_JWT_SECRET");
        assert_eq!(config.database.engine, DatabaseEngine::Postgres);
    }

    #[test]
    fn placeholder_jwt_secrets_are_rejected() {
        let _guard = env_lock().lock().expect("env lock");
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("carelink-test.toml");
        std::env::set_var("CARELINK_JWT_SECRET", "change_me_change_me_change_me_yes");
        let result = Config::load(config_path.to_str().expect("config path utf8"));
        std::env::remove_var("CARELINK_JWT_SECRET");
        assert!(result.is_err());
    }
}
