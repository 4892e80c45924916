use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, StatusCode},
    response::{AppendHeaders, IntoResponse},
    Json,
};
use carelink_core::{credentials, otp, totp, AppState, Role};
use carelink_db::accounts::{self, AccountRow};
use carelink_db::auth_guard;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ApiError;
use crate::middleware::{AuthAccount, Pre2faAccount, SESSION_COOKIE_NAME};

const SESSION_COOKIE_PATH: &str = "/";
const AUTH_GUARD_MAX_FAILURES: i64 = 10;
const AUTH_GUARD_LOCKOUT_SECONDS: i64 = 900;
const AUTH_GUARD_TTL_SECONDS: i64 = 3600;
const AUTH_GUARD_CLEANUP_LIMIT: i64 = 512;

static AUTH_GUARD_OP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn guard_keys(peer_ip: &str, account_hint: Option<&str>) -> Vec<String> {
    let mut keys = vec![format!("ip:{peer_ip}")];
    if let Some(hint) = account_hint.map(str::trim).filter(|v| !v.is_empty()) {
        keys.push(format!("acct:{}", hint.to_ascii_lowercase()));
    }
    keys
}

async fn guard_maybe_cleanup(state: &AppState, now: i64) {
    let op = AUTH_GUARD_OP_COUNTER
        .fetch_add(1, Ordering::Relaxed)
        .saturating_add(1);
    if !op.is_multiple_of(64) {
        return;
    }
    let cutoff = now.saturating_sub(AUTH_GUARD_TTL_SECONDS);
    if let Err(err) =
        auth_guard::purge_older_than(&state.db, cutoff, AUTH_GUARD_CLEANUP_LIMIT).await
    {
        tracing::warn!("auth-guard cleanup failed: {}", err);
    }
}

async fn guard_enforce(state: &AppState, keys: &[String]) -> Result<(), ApiError> {
    let now = Utc::now().timestamp();
    let rows = auth_guard::get_guard_states(&state.db, keys)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e.to_string())))?;
    let locked = rows
        .iter()
        .any(|row| row.locked_until.is_some_and(|until| until > now));
    if locked {
        return Err(ApiError::RateLimited);
    }

    guard_maybe_cleanup(state, now).await;
    Ok(())
}

async fn guard_record_failure(state: &AppState, keys: &[String]) {
    let now = Utc::now().timestamp();
    for key in keys {
        match auth_guard::record_failure(&state.db, key, now).await {
            Ok(failures) if failures >= AUTH_GUARD_MAX_FAILURES => {
                if let Err(err) =
                    auth_guard::lock_key(&state.db, key, now + AUTH_GUARD_LOCKOUT_SECONDS, now)
                        .await
                {
                    tracing::warn!("auth-guard lock failed for '{}': {}", key, err);
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!("auth-guard failure update failed for '{}': {}", key, err);
            }
        }
    }
    guard_maybe_cleanup(state, now).await;
}

async fn guard_record_success(state: &AppState, keys: &[String]) {
    if let Err(err) = auth_guard::clear_keys(&state.db, keys).await {
        tracing::warn!("auth-guard success clear failed: {}", err);
    }
}

fn should_use_secure_cookie_with_public_url(public_url: Option<&str>) -> bool {
    if let Ok(raw) = std::env::var("CARELINK_COOKIE_SECURE") {
        let lower = raw.trim().to_ascii_lowercase();
        if lower == "1" || lower == "true" {
            return true;
        }
        if lower == "0" || lower == "false" {
            return false;
        }
    }
    public_url
        .map(|url| url.starts_with("https://"))
        .unwrap_or(false)
}

fn should_use_secure_cookie(state: &AppState) -> bool {
    should_use_secure_cookie_with_public_url(state.config.public_url.as_deref())
}

fn build_session_cookie(token: &str, ttl_seconds: u64, secure: bool) -> String {
    let secure_attr = if secure { "; Secure" } else { "" };
    format!(
        "{name}={value}; HttpOnly; Path={path}; SameSite=Lax; Max-Age={max_age}{secure}",
        name = SESSION_COOKIE_NAME,
        value = token,
        path = SESSION_COOKIE_PATH,
        max_age = ttl_seconds,
        secure = secure_attr,
    )
}

fn build_session_cookie_clear(secure: bool) -> String {
    let secure_attr = if secure { "; Secure" } else { "" };
    format!(
        "{name}=; HttpOnly; Path={path}; SameSite=Lax; Max-Age=0{secure}",
        name = SESSION_COOKIE_NAME,
        path = SESSION_COOKIE_PATH,
        secure = secure_attr,
    )
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("invalid header value: {}", e)))
}

/// Public account view. Never includes the password hash or any OTP/TOTP
/// secret material.
pub(crate) fn account_json(account: &AccountRow) -> Value {
    json!({
        "id": account.id.to_string(),
        "email": account.email,
        "display_name": account.display_name,
        "phone": account.phone,
        "role": account.role,
        "status": account.status,
        "totp_enabled": account.totp_enabled,
        "created_at": account.created_at,
        "last_login_at": account.last_login_at,
    })
}

fn parse_account_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ApiError::BadRequest("invalid account id".into()))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub role: String,
    pub phone: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct OtpRequest {
    pub account_id: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct ResendOtpRequest {
    pub account_id: String,
}

#[derive(Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub account: Value,
}

fn full_session_response(
    state: &AppState,
    account: &AccountRow,
) -> Result<(String, String), ApiError> {
    let token = carelink_core::auth::create_full_token(
        account.id,
        &account.role,
        &state.config.jwt_secret,
        state.config.session_ttl_seconds,
    )?;
    let secure = should_use_secure_cookie(state);
    let cookie = build_session_cookie(&token, state.config.session_ttl_seconds, secure);
    Ok((token, cookie))
}

pub async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let peer_ip = addr.ip().to_string();
    let email_hint = credentials::normalize_email(&body.email);
    let keys = guard_keys(&peer_ip, Some(&email_hint));
    guard_enforce(&state, &keys).await?;

    let role = Role::parse(&body.role)
        .ok_or_else(|| ApiError::BadRequest("unknown role".into()))?;

    let result = credentials::register(
        &state.db,
        state.notifier.as_ref(),
        &state.config,
        credentials::NewAccount {
            email: &body.email,
            password: &body.password,
            display_name: &body.display_name,
            role,
            phone: body.phone.as_deref(),
        },
    )
    .await;

    let account = match result {
        Ok(account) => account,
        Err(err @ carelink_core::error::CoreError::Conflict(_)) => {
            // Duplicate probes count against the guard to slow enumeration.
            guard_record_failure(&state, &keys).await;
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };

    guard_record_success(&state, &keys).await;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "account_id": account.id.to_string() })),
    ))
}

pub async fn verify_otp(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<OtpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let peer_ip = addr.ip().to_string();
    let account_id = parse_account_id(&body.account_id)?;
    let keys = guard_keys(&peer_ip, Some(&body.account_id));
    guard_enforce(&state, &keys).await?;

    // Missing account, expired code, and mismatch all collapse into one
    // answer; nothing here may confirm that an account exists.
    let verified = otp::verify(&state.db, account_id, &body.code).await?;
    if !verified {
        guard_record_failure(&state, &keys).await;
        return Err(ApiError::BadRequest("invalid code".into()));
    }

    let account = credentials::activate(&state.db, account_id).await?;
    let (token, cookie) = full_session_response(&state, &account)?;
    guard_record_success(&state, &keys).await;

    Ok((
        StatusCode::OK,
        AppendHeaders([(header::SET_COOKIE, header_value(&cookie)?)]),
        Json(AuthResponse {
            token,
            account: account_json(&account),
        }),
    ))
}

pub async fn resend_otp(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<ResendOtpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let peer_ip = addr.ip().to_string();
    let account_id = parse_account_id(&body.account_id)?;
    let keys = guard_keys(&peer_ip, Some(&body.account_id));
    guard_enforce(&state, &keys).await?;

    let account = accounts::get_account_by_id(&state.db, account_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    // Issuing a new code supersedes any prior unconsumed one.
    credentials::dispatch_otp(&state.db, state.notifier.as_ref(), &state.config, &account).await?;
    Ok((StatusCode::OK, Json(json!({ "sent": true }))))
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<LoginRequest>,
) -> Result<axum::response::Response, ApiError> {
    let peer_ip = addr.ip().to_string();
    let email_hint = credentials::normalize_email(&body.email);
    let keys = guard_keys(&peer_ip, Some(&email_hint));
    guard_enforce(&state, &keys).await?;

    let account = match credentials::authenticate(&state.db, &body.email, &body.password).await {
        Ok(account) => account,
        Err(err @ carelink_core::error::CoreError::InvalidCredentials) => {
            guard_record_failure(&state, &keys).await;
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };
    guard_record_success(&state, &keys).await;

    if account.totp_enabled {
        // Password proven; the session is withheld until the second factor
        // arrives at /auth/verify-2fa.
        let temp_token = carelink_core::auth::create_pre2fa_token(
            account.id,
            &state.config.jwt_secret,
            state.config.pre2fa_ttl_seconds,
        )?;
        return Ok((
            StatusCode::OK,
            Json(json!({ "two_factor": true, "temp_token": temp_token })),
        )
            .into_response());
    }

    let (token, cookie) = full_session_response(&state, &account)?;
    Ok((
        StatusCode::OK,
        AppendHeaders([(header::SET_COOKIE, header_value(&cookie)?)]),
        Json(AuthResponse {
            token,
            account: account_json(&account),
        }),
    )
        .into_response())
}

pub async fn verify_2fa(
    State(state): State<AppState>,
    auth: Pre2faAccount,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<CodeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let peer_ip = addr.ip().to_string();
    let account_id_hint = auth.account.id.to_string();
    let keys = guard_keys(&peer_ip, Some(&account_id_hint));
    guard_enforce(&state, &keys).await?;

    let valid = totp::verify_login(
        &state.db,
        auth.account.id,
        &state.config.totp_issuer,
        &body.code,
    )
    .await?;
    if !valid {
        guard_record_failure(&state, &keys).await;
        return Err(ApiError::Unauthorized);
    }

    let (token, cookie) = full_session_response(&state, &auth.account)?;
    guard_record_success(&state, &keys).await;

    Ok((
        StatusCode::OK,
        AppendHeaders([(header::SET_COOKIE, header_value(&cookie)?)]),
        Json(AuthResponse {
            token,
            account: account_json(&auth.account),
        }),
    ))
}

pub async fn me(auth: AuthAccount) -> Json<Value> {
    Json(account_json(&auth.account))
}

/// Tokens are stateless; logout clears the cookie so browser clients drop
/// the session. Header-based clients simply discard theirs.
pub async fn logout(
    State(state): State<AppState>,
    _auth: AuthAccount,
) -> Result<impl IntoResponse, ApiError> {
    let secure = should_use_secure_cookie(&state);
    let clear_cookie = build_session_cookie_clear(secure);
    Ok((
        StatusCode::NO_CONTENT,
        AppendHeaders([(header::SET_COOKIE, header_value(&clear_cookie)?)]),
    ))
}
