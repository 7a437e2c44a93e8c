use std::str::FromStr;

use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::{
    audit,
    auth::hash_password,
    models::{ComplaintSource, ComplaintStatus, ParseEnumError, Severity},
};

pub mod attachments;
pub mod complaints;
pub mod evaluations;
pub mod logs;
pub mod notifications;
pub mod service_requests;
pub mod team;
pub mod technicians;

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Reads a text column into one of the text-backed enums.
pub(crate) fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|e: ParseEnumError| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

pub(crate) fn parse_optional_column<T>(row: &PgRow, column: &str) -> Result<Option<T>, sqlx::Error>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        value.parse().map_err(|e: ParseEnumError| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
    })
    .transpose()
}

/// Highest page a list endpoint will serve.
pub(crate) const MAX_PAGE: i64 = 1_000_000;

pub(crate) fn page_bounds(page: Option<i64>, per_page: Option<i64>) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).clamp(1, MAX_PAGE);
    let per_page = per_page.unwrap_or(20).clamp(1, 100);
    (page, per_page, (page - 1) * per_page)
}

const SEED_PASSWORD: &str = "changeme123";

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let members = vec![
        (
            Uuid::parse_str("7b0c2f4e-5d2a-4b7e-9f41-0d5c8e3a1b01")?,
            "admin",
            "Rana Haddad",
            "rana.haddad@example.com",
            "admin",
        ),
        (
            Uuid::parse_str("7b0c2f4e-5d2a-4b7e-9f41-0d5c8e3a1b02")?,
            "omar.k",
            "Omar Khalil",
            "omar.khalil@example.com",
            "manager",
        ),
        (
            Uuid::parse_str("7b0c2f4e-5d2a-4b7e-9f41-0d5c8e3a1b03")?,
            "lina.s",
            "Lina Saleh",
            "lina.saleh@example.com",
            "agent",
        ),
        (
            Uuid::parse_str("7b0c2f4e-5d2a-4b7e-9f41-0d5c8e3a1b04")?,
            "yousef.m",
            "Yousef Mansour",
            "yousef.mansour@example.com",
            "evaluator",
        ),
    ];

    let password_hash = hash_password(SEED_PASSWORD).map_err(|e| anyhow::anyhow!("{e}"))?;
    for (id, username, full_name, email, role) in &members {
        sqlx::query(
            r#"
            INSERT INTO team_members (id, username, full_name, email, role, password_hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (username) DO UPDATE
            SET full_name = EXCLUDED.full_name, email = EXCLUDED.email, role = EXCLUDED.role
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(full_name)
        .bind(email)
        .bind(role)
        .bind(&password_hash)
        .execute(pool)
        .await?;
    }

    let technicians = vec![
        (
            Uuid::parse_str("2e9a61c3-8f10-4c55-a3d7-6b2f90e4c101")?,
            "Sami Nasser",
            "North",
            "Fiber installation",
        ),
        (
            Uuid::parse_str("2e9a61c3-8f10-4c55-a3d7-6b2f90e4c102")?,
            "Huda Aziz",
            "Central",
            "Router repair",
        ),
        (
            Uuid::parse_str("2e9a61c3-8f10-4c55-a3d7-6b2f90e4c103")?,
            "Karim Fares",
            "South",
            "Line maintenance",
        ),
    ];

    for (id, name, region, specialty) in &technicians {
        sqlx::query(
            r#"
            INSERT INTO field_technicians (id, full_name, region, specialty, hired_on)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET full_name = EXCLUDED.full_name, region = EXCLUDED.region, specialty = EXCLUDED.specialty
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(region)
        .bind(specialty)
        .bind(NaiveDate::from_ymd_opt(2024, 5, 1).context("invalid date")?)
        .execute(pool)
        .await?;
    }

    let admin_id = members[0].0;
    let agent_id = members[2].0;
    let complaints = vec![
        (
            "seed-001",
            "No internet since storm",
            "Customer reports full outage after the storm on Tuesday.",
            "Maya Ibrahim",
            Severity::High,
            ComplaintSource::Phone,
        ),
        (
            "seed-002",
            "Technician arrived late",
            "Visit window was 9-11, technician arrived at 13:30.",
            "George Tannous",
            Severity::Medium,
            ComplaintSource::Web,
        ),
        (
            "seed-003",
            "Billing charged twice",
            "Two identical charges on the March invoice.",
            "Nadia Youssef",
            Severity::Low,
            ComplaintSource::Email,
        ),
    ];

    for (source_key, title, description, customer, severity, source) in complaints {
        let mut tx = pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO complaints
            (id, title, description, customer_name, severity, source, assigned_to, created_by, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (source_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(title)
        .bind(description)
        .bind(customer)
        .bind(severity.as_str())
        .bind(source.as_str())
        .bind(agent_id)
        .bind(admin_id)
        .bind(source_key)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = inserted {
            let id: Uuid = row.get("id");
            audit::record_status_change(&mut tx, id, None, ComplaintStatus::New, admin_id, None)
                .await?;
        }
        tx.commit().await?;
    }

    let technician_id = technicians[0].0;
    let evaluator_id = members[3].0;
    let existing: i64 = sqlx::query("SELECT COUNT(*) AS n FROM evaluations WHERE technician_id = $1")
        .bind(technician_id)
        .fetch_one(pool)
        .await?
        .get("n");

    if existing == 0 {
        for (days_ago, rating) in [(3, 5), (20, 4), (45, 3)] {
            sqlx::query(
                r#"
                INSERT INTO evaluations (id, technician_id, evaluator_id, rating, comment, evaluated_on)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(technician_id)
            .bind(evaluator_id)
            .bind(rating)
            .bind("Seeded evaluation")
            .bind(Utc::now().date_naive() - Duration::days(days_ago))
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

#[derive(Debug, serde::Deserialize)]
pub struct ComplaintCsvRow {
    pub title: String,
    pub description: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub category: Option<String>,
    pub severity: String,
    pub source: String,
    pub source_key: Option<String>,
}

impl ComplaintCsvRow {
    fn typed(&self) -> anyhow::Result<(Severity, ComplaintSource)> {
        if self.title.trim().is_empty() || self.customer_name.trim().is_empty() {
            anyhow::bail!("title and customer_name are required");
        }
        Ok((self.severity.trim().parse()?, self.source.trim().parse()?))
    }
}

pub fn read_complaint_csv(csv_path: &std::path::Path) -> anyhow::Result<Vec<ComplaintCsvRow>> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut rows = Vec::new();
    for (line, result) in reader.deserialize::<ComplaintCsvRow>().enumerate() {
        let row = result.with_context(|| format!("bad CSV record {}", line + 1))?;
        row.typed()
            .with_context(|| format!("invalid CSV record {}", line + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Imports complaints, skipping rows whose `source_key` was already imported.
pub async fn import_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
    imported_by: &str,
) -> anyhow::Result<usize> {
    let rows = read_complaint_csv(csv_path)?;
    let actor = team::find_by_username(pool, imported_by)
        .await?
        .with_context(|| format!("no team member named {imported_by}"))?;

    let mut inserted = 0usize;
    for row in rows {
        let (severity, source) = row.typed()?;
        let source_key = row
            .source_key
            .clone()
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let mut tx = pool.begin().await?;
        let created = sqlx::query(
            r#"
            INSERT INTO complaints
            (id, title, description, customer_name, customer_phone, customer_email,
             category, severity, source, created_by, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (source_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(row.title.trim())
        .bind(&row.description)
        .bind(row.customer_name.trim())
        .bind(&row.customer_phone)
        .bind(&row.customer_email)
        .bind(&row.category)
        .bind(severity.as_str())
        .bind(source.as_str())
        .bind(actor.id)
        .bind(&source_key)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(created) = created {
            let id: Uuid = created.get("id");
            audit::record_status_change(&mut tx, id, None, ComplaintStatus::New, actor.id, None)
                .await?;
            audit::log_action(
                &mut tx,
                Some(actor.id),
                "complaint.imported",
                "complaint",
                Some(id),
                serde_json::json!({ "source_key": source_key }),
            )
            .await?;
            inserted += 1;
        }
        tx.commit().await?;
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_bounds_clamp_inputs() {
        assert_eq!(page_bounds(None, None), (1, 20, 0));
        assert_eq!(page_bounds(Some(3), Some(10)), (3, 10, 20));
        assert_eq!(page_bounds(Some(0), Some(1000)), (1, 100, 0));
        assert_eq!(page_bounds(Some(-4), Some(0)), (1, 1, 0));
    }

    #[test]
    fn status_history_outlives_complaint_deletion() {
        let schema = include_str!("../../migrations/20260101000000_init.sql");
        assert!(schema.contains(
            "complaint_id UUID NOT NULL REFERENCES complaints(id) ON DELETE RESTRICT"
        ));
        assert!(schema.contains("deleted_at TIMESTAMPTZ"));
    }

    #[test]
    fn huge_pages_do_not_overflow_the_offset() {
        let (page, per_page, offset) = page_bounds(Some(i64::MAX), Some(100));
        assert_eq!(page, MAX_PAGE);
        assert_eq!(per_page, 100);
        assert_eq!(offset, (MAX_PAGE - 1) * 100);
    }

    #[test]
    fn reads_valid_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("complaints.csv");
        std::fs::write(
            &path,
            "title,description,customer_name,customer_phone,customer_email,category,severity,source,source_key\n\
             Slow line,Speeds drop every evening,Rami Aoun,555-0101,,speed,medium,phone,crm-1\n\
             Wrong bill,Charged for cancelled plan,Sara Daher,,sara@example.com,billing,low,email,\n",
        )
        .unwrap();

        let rows = read_complaint_csv(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].source_key.as_deref(), Some("crm-1"));
        assert_eq!(rows[1].customer_phone, None);
        assert_eq!(rows[1].source_key, None);
    }

    #[test]
    fn rejects_unknown_severity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(
            &path,
            "title,description,customer_name,customer_phone,customer_email,category,severity,source,source_key\n\
             Slow line,Evening drops,Rami Aoun,,,,apocalyptic,phone,\n",
        )
        .unwrap();

        let err = read_complaint_csv(&path).unwrap_err();
        assert!(format!("{err:#}").contains("severity"));
    }
}
