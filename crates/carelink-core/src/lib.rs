pub mod auth;
pub mod credentials;
pub mod error;
pub mod notify;
pub mod otp;
pub mod totp;

use carelink_db::DbPool;
use std::sync::Arc;

/// Fixed role enumeration. Unknown role strings never authorize anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Patient,
    Doctor,
    HcProvider,
    HcManager,
    Staff,
    Admin,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Patient,
        Role::Doctor,
        Role::HcProvider,
        Role::HcManager,
        Role::Staff,
        Role::Admin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::HcProvider => "hcprovider",
            Role::HcManager => "hcmanager",
            Role::Staff => "staff",
            Role::Admin => "admin",
        }
    }

    /// Case-sensitive exact match against the stored role string.
    pub fn parse(value: &str) -> Option<Role> {
        Role::ALL.iter().copied().find(|role| role.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Inactive,
    Active,
    Suspended,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Inactive => "inactive",
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
        }
    }

    pub fn parse(value: &str) -> Option<AccountStatus> {
        match value {
            "inactive" => Some(AccountStatus::Inactive),
            "active" => Some(AccountStatus::Active),
            "suspended" => Some(AccountStatus::Suspended),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub notifier: Arc<dyn notify::NotificationSink>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub jwt_secret: String,
    /// Full session token TTL.
    pub session_ttl_seconds: u64,
    /// Pre-2FA token TTL.
    pub pre2fa_ttl_seconds: u64,
    /// One-time passcode TTL.
    pub otp_ttl_seconds: u64,
    /// Issuer embedded in authenticator provisioning URIs.
    pub totp_issuer: String,
    /// Public URL of this server (e.g. https://care.example.com).
    /// Drives the cookie Secure attribute.
    pub public_url: Option<String>,
    /// Argon2 memory cost in KiB.
    pub argon2_memory_kib: u32,
    /// Argon2 iteration count.
    pub argon2_iterations: u32,
}
