use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use carelink_core::{credentials, AccountStatus, AppState, Role};
use carelink_db::accounts;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AdminAccount;
use crate::routes::auth::account_json;

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_accounts(
    State(state): State<AppState>,
    _admin: AdminAccount,
    Query(page): Query<PageQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = page.limit.clamp(1, 200);
    let offset = page.offset.max(0);
    let rows = accounts::list_accounts_paginated(&state.db, offset, limit).await?;
    let total = accounts::count_accounts(&state.db).await?;

    let mapped: Vec<Value> = rows.iter().map(account_json).collect();
    Ok(Json(json!({ "total": total, "accounts": mapped })))
}

#[derive(Deserialize)]
pub struct SetRoleRequest {
    pub role: String,
}

/// Administrative promotion/demotion. This is the only path that can mint an
/// admin role.
pub async fn set_role(
    State(state): State<AppState>,
    _admin: AdminAccount,
    Path(account_id): Path<i64>,
    Json(body): Json<SetRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let role = Role::parse(&body.role)
        .ok_or_else(|| ApiError::BadRequest("unknown role".into()))?;
    let account = credentials::set_role(&state.db, account_id, role).await?;
    Ok(Json(account_json(&account)))
}

#[derive(Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
}

pub async fn set_status(
    State(state): State<AppState>,
    _admin: AdminAccount,
    Path(account_id): Path<i64>,
    Json(body): Json<SetStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let status = AccountStatus::parse(&body.status)
        .ok_or_else(|| ApiError::BadRequest("unknown status".into()))?;
    let account = credentials::set_status(&state.db, account_id, status).await?;
    Ok(Json(account_json(&account)))
}
