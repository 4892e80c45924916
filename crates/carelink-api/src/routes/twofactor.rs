use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use carelink_core::{totp, AppState};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;
use crate::middleware::AuthAccount;

#[derive(Deserialize)]
pub struct ConfirmRequest {
    pub code: String,
}

/// Phase one of setup: generate a secret and hand back the provisioning URI.
/// 2FA stays off until the owner confirms a code derived from it.
pub async fn enable(
    State(state): State<AppState>,
    auth: AuthAccount,
) -> Result<impl IntoResponse, ApiError> {
    let setup = totp::begin_setup(&state.db, auth.account.id, &state.config.totp_issuer).await?;
    Ok((
        StatusCode::OK,
        Json(json!({
            "secret": setup.secret,
            "provisioning_uri": setup.provisioning_uri,
        })),
    ))
}

/// Phase two: prove possession of the secret. A wrong code leaves the
/// pending secret in place for another attempt.
pub async fn verify_enable(
    State(state): State<AppState>,
    auth: AuthAccount,
    Json(body): Json<ConfirmRequest>,
) -> Result<impl IntoResponse, ApiError> {
    totp::confirm_setup(
        &state.db,
        auth.account.id,
        &state.config.totp_issuer,
        &body.code,
    )
    .await?;
    Ok((StatusCode::OK, Json(json!({ "enabled": true }))))
}

pub async fn disable(
    State(state): State<AppState>,
    auth: AuthAccount,
) -> Result<impl IntoResponse, ApiError> {
    totp::disable(&state.db, auth.account.id).await?;
    Ok((StatusCode::OK, Json(json!({ "enabled": false }))))
}
