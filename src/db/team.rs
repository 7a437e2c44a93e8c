use sqlx::{postgres::PgRow, PgConnection, PgExecutor, PgPool, Row};
use uuid::Uuid;

use super::parse_column;
use crate::models::{Role, TeamMember};

const COLUMNS: &str = "id, username, full_name, email, role, permissions, password_hash, \
                       active, last_login_at, created_at, updated_at";

fn from_row(row: &PgRow) -> Result<TeamMember, sqlx::Error> {
    Ok(TeamMember {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        role: parse_column(row, "role")?,
        permissions: row.try_get("permissions")?,
        password_hash: row.try_get("password_hash")?,
        active: row.try_get("active")?,
        last_login_at: row.try_get("last_login_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub struct NewMember<'a> {
    pub username: &'a str,
    pub full_name: &'a str,
    pub email: Option<&'a str>,
    pub role: Role,
    pub permissions: &'a [String],
    pub password_hash: &'a str,
}

#[derive(Debug, Default)]
pub struct MemberChanges {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub permissions: Option<Vec<String>>,
    pub password_hash: Option<String>,
    pub active: Option<bool>,
}

pub async fn list(pool: &PgPool, include_inactive: bool) -> Result<Vec<TeamMember>, sqlx::Error> {
    let sql = format!(
        "SELECT {COLUMNS} FROM team_members WHERE ($1 OR active) ORDER BY full_name"
    );
    let rows = sqlx::query(&sql).bind(include_inactive).fetch_all(pool).await?;
    rows.iter().map(from_row).collect()
}

pub async fn find<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
) -> Result<Option<TeamMember>, sqlx::Error> {
    let sql = format!("SELECT {COLUMNS} FROM team_members WHERE id = $1");
    sqlx::query(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .as_ref()
        .map(from_row)
        .transpose()
}

pub async fn find_by_username<'e, E: PgExecutor<'e>>(
    executor: E,
    username: &str,
) -> Result<Option<TeamMember>, sqlx::Error> {
    let sql = format!("SELECT {COLUMNS} FROM team_members WHERE LOWER(username) = LOWER($1)");
    sqlx::query(&sql)
        .bind(username)
        .fetch_optional(executor)
        .await?
        .as_ref()
        .map(from_row)
        .transpose()
}

/// Whether `id` names an active member, used to validate assignees.
pub async fn is_active<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT active FROM team_members WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(match row {
        Some(row) => row.try_get("active")?,
        None => false,
    })
}

pub async fn insert(conn: &mut PgConnection, member: NewMember<'_>) -> Result<TeamMember, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO team_members (id, username, full_name, email, role, permissions, password_hash)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(member.username)
        .bind(member.full_name)
        .bind(member.email)
        .bind(member.role.as_str())
        .bind(member.permissions)
        .bind(member.password_hash)
        .fetch_one(&mut *conn)
        .await?;
    from_row(&row)
}

pub async fn update(
    conn: &mut PgConnection,
    id: Uuid,
    changes: &MemberChanges,
) -> Result<Option<TeamMember>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE team_members SET
            full_name = COALESCE($2, full_name),
            email = COALESCE($3, email),
            role = COALESCE($4, role),
            permissions = COALESCE($5, permissions),
            password_hash = COALESCE($6, password_hash),
            active = COALESCE($7, active),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(&changes.full_name)
        .bind(&changes.email)
        .bind(changes.role.map(|role| role.as_str()))
        .bind(&changes.permissions)
        .bind(&changes.password_hash)
        .bind(changes.active)
        .fetch_optional(&mut *conn)
        .await?
        .as_ref()
        .map(from_row)
        .transpose()
}

pub async fn touch_login<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE team_members SET last_login_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}
