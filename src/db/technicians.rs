use chrono::NaiveDate;
use sqlx::{postgres::PgRow, PgConnection, PgExecutor, PgPool, Row};
use uuid::Uuid;

use crate::models::FieldTechnician;

const COLUMNS: &str =
    "id, full_name, phone, email, region, specialty, active, hired_on, created_at, updated_at";

fn from_row(row: &PgRow) -> Result<FieldTechnician, sqlx::Error> {
    Ok(FieldTechnician {
        id: row.try_get("id")?,
        full_name: row.try_get("full_name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        region: row.try_get("region")?,
        specialty: row.try_get("specialty")?,
        active: row.try_get("active")?,
        hired_on: row.try_get("hired_on")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Debug, Default)]
pub struct TechnicianFields {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub region: Option<String>,
    pub specialty: Option<String>,
    pub active: Option<bool>,
    pub hired_on: Option<NaiveDate>,
}

pub async fn list(
    pool: &PgPool,
    active: Option<bool>,
    region: Option<&str>,
) -> Result<Vec<FieldTechnician>, sqlx::Error> {
    let sql = format!(
        "SELECT {COLUMNS} FROM field_technicians \
         WHERE ($1::BOOLEAN IS NULL OR active = $1) \
         AND ($2::TEXT IS NULL OR region ILIKE $2) \
         ORDER BY full_name"
    );
    let rows = sqlx::query(&sql)
        .bind(active)
        .bind(region)
        .fetch_all(pool)
        .await?;
    rows.iter().map(from_row).collect()
}

pub async fn find<'e, E: PgExecutor<'e>>(
    executor: E,
    id: Uuid,
) -> Result<Option<FieldTechnician>, sqlx::Error> {
    let sql = format!("SELECT {COLUMNS} FROM field_technicians WHERE id = $1");
    sqlx::query(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?
        .as_ref()
        .map(from_row)
        .transpose()
}

pub async fn exists<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM field_technicians WHERE id = $1) AS found")
        .bind(id)
        .fetch_one(executor)
        .await?;
    row.try_get("found")
}

pub async fn insert(
    conn: &mut PgConnection,
    full_name: &str,
    fields: &TechnicianFields,
) -> Result<FieldTechnician, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO field_technicians (id, full_name, phone, email, region, specialty, active, hired_on)
        VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, TRUE), $8)
        RETURNING {COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(full_name)
        .bind(&fields.phone)
        .bind(&fields.email)
        .bind(&fields.region)
        .bind(&fields.specialty)
        .bind(fields.active)
        .bind(fields.hired_on)
        .fetch_one(&mut *conn)
        .await?;
    from_row(&row)
}

pub async fn update(
    conn: &mut PgConnection,
    id: Uuid,
    fields: &TechnicianFields,
) -> Result<Option<FieldTechnician>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE field_technicians SET
            full_name = COALESCE($2, full_name),
            phone = COALESCE($3, phone),
            email = COALESCE($4, email),
            region = COALESCE($5, region),
            specialty = COALESCE($6, specialty),
            active = COALESCE($7, active),
            hired_on = COALESCE($8, hired_on),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {COLUMNS}
        "#
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(&fields.full_name)
        .bind(&fields.phone)
        .bind(&fields.email)
        .bind(&fields.region)
        .bind(&fields.specialty)
        .bind(fields.active)
        .bind(fields.hired_on)
        .fetch_optional(&mut *conn)
        .await?
        .as_ref()
        .map(from_row)
        .transpose()
}

/// Technicians stay referenced by complaints and evaluations, so removal only deactivates.
pub async fn deactivate(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE field_technicians SET active = FALSE, updated_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}
