use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::LogEntry;

#[derive(Debug, Default)]
pub struct LogFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub limit: Option<i64>,
}

pub async fn list(pool: &PgPool, filter: &LogFilter) -> Result<Vec<LogEntry>, sqlx::Error> {
    let limit = filter.limit.unwrap_or(50).clamp(1, 500);
    let rows = sqlx::query(
        r#"
        SELECT l.id, l.actor_id, m.full_name AS actor_name, l.action, l.entity_type,
               l.entity_id, l.details, l.created_at
        FROM logs l
        LEFT JOIN team_members m ON m.id = l.actor_id
        WHERE ($1::TEXT IS NULL OR l.entity_type = $1)
          AND ($2::UUID IS NULL OR l.entity_id = $2)
          AND ($3::UUID IS NULL OR l.actor_id = $3)
        ORDER BY l.created_at DESC
        LIMIT $4
        "#,
    )
    .bind(filter.entity_type.as_deref())
    .bind(filter.entity_id)
    .bind(filter.actor_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(LogEntry {
                id: row.try_get("id")?,
                actor_id: row.try_get("actor_id")?,
                actor_name: row.try_get("actor_name")?,
                action: row.try_get("action")?,
                entity_type: row.try_get("entity_type")?,
                entity_id: row.try_get("entity_id")?,
                details: row.try_get("details")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}
