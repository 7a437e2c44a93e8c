use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{check_email, optional, required, ApiJson, ApiQuery, AppState};
use crate::{
    audit,
    auth::{hash_password, validate_password, CurrentUser},
    db::team::{self, MemberChanges, NewMember},
    error::{ApiError, ApiResult},
    models::{Role, TeamMember},
    permissions::{validate_grants, Permission},
};

#[derive(Debug, Deserialize)]
pub struct TeamQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateMember {
    pub username: String,
    pub full_name: String,
    pub email: Option<String>,
    pub role: Role,
    pub password: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMember {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub permissions: Option<Vec<String>>,
    pub password: Option<String>,
    pub active: Option<bool>,
}

pub(crate) fn check_username(value: &str) -> ApiResult<String> {
    let username = required("username", value)?;
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid_chars || username.len() > 64 {
        return Err(ApiError::validation(
            "username may only contain letters, digits, '.', '_' or '-' (max 64)",
        ));
    }
    Ok(username)
}

async fn hash_off_thread(password: String) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
}

pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(query): ApiQuery<TeamQuery>,
) -> ApiResult<Json<Vec<TeamMember>>> {
    user.require(Permission::TeamView)?;
    Ok(Json(team::list(&state.pool, query.include_inactive).await?))
}

pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(body): ApiJson<CreateMember>,
) -> ApiResult<impl IntoResponse> {
    user.require(Permission::TeamManage)?;

    let username = check_username(&body.username)?;
    let full_name = required("full_name", &body.full_name)?;
    check_email("email", body.email.as_deref())?;
    let email = optional(body.email.as_deref());
    validate_password(&body.password)?;
    validate_grants(&body.permissions)?;

    let password_hash = hash_off_thread(body.password).await?;

    let mut tx = state.pool.begin().await?;
    if team::find_by_username(&mut *tx, &username).await?.is_some() {
        return Err(ApiError::Conflict(format!("username {username} is already taken")));
    }

    let member = team::insert(
        &mut tx,
        NewMember {
            username: &username,
            full_name: &full_name,
            email: email.as_deref(),
            role: body.role,
            permissions: &body.permissions,
            password_hash: &password_hash,
        },
    )
    .await?;

    audit::log_action(
        &mut tx,
        Some(user.id),
        "team.created",
        "team_member",
        Some(member.id),
        json!({ "username": member.username, "role": member.role }),
    )
    .await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn detail(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TeamMember>> {
    user.require(Permission::TeamView)?;
    let member = team::find(&state.pool, id)
        .await?
        .ok_or(ApiError::NotFound("team member"))?;
    Ok(Json(member))
}

pub async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    ApiJson(body): ApiJson<UpdateMember>,
) -> ApiResult<Json<TeamMember>> {
    user.require(Permission::TeamManage)?;

    if id == user.id && body.active == Some(false) {
        return Err(ApiError::validation("you cannot deactivate your own account"));
    }

    let full_name = body
        .full_name
        .as_deref()
        .map(|name| required("full_name", name))
        .transpose()?;
    check_email("email", body.email.as_deref())?;
    if let Some(permissions) = &body.permissions {
        validate_grants(permissions)?;
    }
    if let Some(password) = &body.password {
        validate_password(password)?;
    }

    let password_hash = match body.password {
        Some(password) => Some(hash_off_thread(password).await?),
        None => None,
    };

    let changes = MemberChanges {
        full_name,
        email: optional(body.email.as_deref()),
        role: body.role,
        permissions: body.permissions,
        password_hash,
        active: body.active,
    };

    let mut tx = state.pool.begin().await?;
    let member = team::update(&mut tx, id, &changes)
        .await?
        .ok_or(ApiError::NotFound("team member"))?;

    audit::log_action(
        &mut tx,
        Some(user.id),
        "team.updated",
        "team_member",
        Some(id),
        json!({
            "role": member.role,
            "active": member.active,
            "password_changed": changes.password_hash.is_some(),
        }),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(member))
}

pub async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.require(Permission::TeamManage)?;
    if id == user.id {
        return Err(ApiError::validation("you cannot delete your own account"));
    }

    let changes = MemberChanges {
        active: Some(false),
        ..MemberChanges::default()
    };

    let mut tx = state.pool.begin().await?;
    let member = team::update(&mut tx, id, &changes)
        .await?
        .ok_or(ApiError::NotFound("team member"))?;
    audit::log_action(
        &mut tx,
        Some(user.id),
        "team.deactivated",
        "team_member",
        Some(id),
        json!({ "username": member.username }),
    )
    .await?;
    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_restricted() {
        assert_eq!(check_username("  omar.k ").unwrap(), "omar.k");
        assert!(check_username("").is_err());
        assert!(check_username("has space").is_err());
        assert!(check_username(&"x".repeat(65)).is_err());
    }
}
