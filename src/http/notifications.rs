use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{ApiQuery, AppState};
use crate::{
    audit,
    auth::CurrentUser,
    db::notifications,
    error::{ApiError, ApiResult},
    models::Notification,
};

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    #[serde(default)]
    pub unread: bool,
    pub limit: Option<i64>,
}

// Inbox routes need a session only; every query is scoped to the caller.

pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<InboxQuery>,
) -> ApiResult<Json<Vec<Notification>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    Ok(Json(
        notifications::list_for(&state.pool, user.id, query.unread, limit).await?,
    ))
}

pub async fn unread_count(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Value>> {
    let unread = notifications::unread_count(&state.pool, user.id).await?;
    Ok(Json(json!({ "unread": unread })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Notification>> {
    let mut tx = state.pool.begin().await?;
    let notification = notifications::mark_read(&mut tx, user.id, id)
        .await?
        .ok_or(ApiError::NotFound("notification"))?;
    audit::log_action(
        &mut tx,
        Some(user.id),
        "notification.read",
        "notification",
        Some(id),
        json!({}),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(notification))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: CurrentUser,
) -> ApiResult<Json<Value>> {
    let mut tx = state.pool.begin().await?;
    let updated = notifications::mark_all_read(&mut tx, user.id).await?;
    audit::log_action(
        &mut tx,
        Some(user.id),
        "notification.read_all",
        "notification",
        None,
        json!({ "updated": updated }),
    )
    .await?;
    tx.commit().await?;

    tracing::debug!(user = %user.username, updated, "inbox cleared");
    Ok(Json(json!({ "updated": updated })))
}
