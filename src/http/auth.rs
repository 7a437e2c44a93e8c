use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::{required, ApiJson, AppState};
use crate::{
    audit,
    auth::{verify_password, CurrentUser, SessionSigner},
    db::team,
    error::{ApiError, ApiResult},
};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let username = required("username", &body.username)?;
    if body.password.is_empty() {
        return Err(ApiError::validation("password is required"));
    }

    let member = team::find_by_username(&state.pool, &username).await?;
    let Some(member) = member.filter(|m| m.active) else {
        tracing::info!(%username, "login rejected: unknown or inactive member");
        return Err(ApiError::Unauthenticated);
    };

    let hash = member.password_hash.clone();
    let password = body.password;
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !valid {
        tracing::info!(%username, "login rejected: bad password");
        return Err(ApiError::Unauthenticated);
    }

    let mut tx = state.pool.begin().await?;
    team::touch_login(&mut *tx, member.id).await?;
    audit::log_action(
        &mut tx,
        Some(member.id),
        "auth.login",
        "team_member",
        Some(member.id),
        json!({ "username": member.username }),
    )
    .await?;
    tx.commit().await?;

    let claims = state.signer.claims_for(&member);
    let token = state.signer.sign(&claims)?;
    let cookie = state
        .signer
        .session_cookie(&token, state.config.cookie_secure);

    let body = json!({
        "user": member,
        "permissions": claims.permissions,
        "token": token,
        "expires_at": claims.exp,
    });
    Ok(([(header::SET_COOKIE, cookie)], Json(body)))
}

pub async fn logout(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<impl IntoResponse> {
    let mut conn = state.pool.acquire().await?;
    audit::log_action(
        &mut conn,
        Some(user.id),
        "auth.logout",
        "team_member",
        Some(user.id),
        json!({}),
    )
    .await?;

    let cookie = SessionSigner::clear_cookie(state.config.cookie_secure);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "logged_out": true })),
    ))
}

pub async fn me(State(state): State<AppState>, user: CurrentUser) -> ApiResult<impl IntoResponse> {
    let member = team::find(&state.pool, user.id)
        .await?
        .filter(|m| m.active)
        .ok_or(ApiError::Unauthenticated)?;

    Ok(Json(json!({
        "user": member,
        "session_role": user.role,
        "permissions": user.permissions,
    })))
}
