use sqlx::{postgres::PgRow, PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::models::Attachment;

fn from_row(row: &PgRow) -> Result<Attachment, sqlx::Error> {
    Ok(Attachment {
        id: row.try_get("id")?,
        complaint_id: row.try_get("complaint_id")?,
        original_name: row.try_get("original_name")?,
        stored_name: row.try_get("stored_name")?,
        content_type: row.try_get("content_type")?,
        size_bytes: row.try_get("size_bytes")?,
        uploaded_by: row.try_get("uploaded_by")?,
        created_at: row.try_get("created_at")?,
    })
}

pub struct NewAttachment<'a> {
    pub id: Uuid,
    pub complaint_id: Option<Uuid>,
    pub original_name: &'a str,
    pub stored_name: &'a str,
    pub content_type: &'a str,
    pub size_bytes: i64,
    pub uploaded_by: Uuid,
}

pub async fn insert(
    conn: &mut PgConnection,
    new: NewAttachment<'_>,
) -> Result<Attachment, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO attachments
        (id, complaint_id, original_name, stored_name, content_type, size_bytes, uploaded_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(new.id)
    .bind(new.complaint_id)
    .bind(new.original_name)
    .bind(new.stored_name)
    .bind(new.content_type)
    .bind(new.size_bytes)
    .bind(new.uploaded_by)
    .fetch_one(&mut *conn)
    .await?;
    from_row(&row)
}

pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<Attachment>, sqlx::Error> {
    sqlx::query("SELECT * FROM attachments WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .as_ref()
        .map(from_row)
        .transpose()
}

pub async fn for_complaint(pool: &PgPool, complaint_id: Uuid) -> Result<Vec<Attachment>, sqlx::Error> {
    let rows = sqlx::query("SELECT * FROM attachments WHERE complaint_id = $1 ORDER BY created_at")
        .bind(complaint_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(from_row).collect()
}
