use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use carelink_core::auth::TokenKind;
use carelink_core::{AccountStatus, AppState, Role};
use carelink_db::accounts::AccountRow;

use crate::error::ApiError;

pub(crate) const SESSION_COOKIE_NAME: &str = "carelink_session";

pub(crate) fn get_cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in raw.split(';') {
        let trimmed = part.trim();
        let Some((name, value)) = trimmed.split_once('=') else {
            continue;
        };
        if name == cookie_name {
            return Some(value.to_string());
        }
    }
    None
}

/// Bearer token transport: the session cookie takes precedence over the
/// `Authorization: Bearer` header when both are present.
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = get_cookie_value(headers, SESSION_COOKIE_NAME) {
        if !token.is_empty() {
            return Some(token);
        }
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn resolve_account(
    parts: &Parts,
    state: &AppState,
    kind: TokenKind,
) -> Result<AccountRow, ApiError> {
    let token = extract_bearer_token(&parts.headers).ok_or(ApiError::Unauthorized)?;
    let claims = carelink_core::auth::validate_token(&token, &state.config.jwt_secret, kind)
        .map_err(|_| ApiError::Unauthorized)?;

    // Re-fetch so role/status changes take effect immediately instead of
    // trusting stale token claims.
    let account = carelink_db::accounts::get_account_by_id(&state.db, claims.sub)
        .await
        .map_err(|_| ApiError::Internal(anyhow::anyhow!("database error")))?
        .ok_or(ApiError::Unauthorized)?;

    if AccountStatus::parse(&account.status) != Some(AccountStatus::Active) {
        return Err(ApiError::Unauthorized);
    }
    Ok(account)
}

/// Extractor for routes requiring a full session.
pub struct AuthAccount {
    pub account: AccountRow,
}

impl FromRequestParts<AppState> for AuthAccount {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let account = resolve_account(parts, state, TokenKind::Full).await?;
        Ok(AuthAccount { account })
    }
}

/// Extractor for the single route that accepts a pre-2FA token. Possession of
/// such a token grants nothing else.
pub struct Pre2faAccount {
    pub account: AccountRow,
}

impl FromRequestParts<AppState> for Pre2faAccount {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let account = resolve_account(parts, state, TokenKind::Pre2fa).await?;
        Ok(Pre2faAccount { account })
    }
}

/// Extractor that requires the authenticated account to hold the admin role.
pub struct AdminAccount {
    pub account: AccountRow,
}

impl FromRequestParts<AppState> for AdminAccount {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let account = resolve_account(parts, state, TokenKind::Full).await?;
        require_role(&account, &[Role::Admin])?;
        Ok(AdminAccount { account })
    }
}

/// Exact-match role gate. Unknown role strings are always rejected.
pub fn require_role(account: &AccountRow, allowed: &[Role]) -> Result<Role, ApiError> {
    let role = Role::parse(&account.role).ok_or(ApiError::Forbidden)?;
    if allowed.contains(&role) {
        Ok(role)
    } else {
        Err(ApiError::Forbidden)
    }
}
