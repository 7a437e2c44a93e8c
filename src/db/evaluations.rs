use chrono::NaiveDate;
use sqlx::{postgres::PgRow, PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::models::{CriteriaScores, DetailedEvaluation, Evaluation, RatingRecord};

fn from_row(row: &PgRow) -> Result<Evaluation, sqlx::Error> {
    Ok(Evaluation {
        id: row.try_get("id")?,
        technician_id: row.try_get("technician_id")?,
        evaluator_id: row.try_get("evaluator_id")?,
        rating: row.try_get("rating")?,
        comment: row.try_get("comment")?,
        evaluated_on: row.try_get("evaluated_on")?,
        created_at: row.try_get("created_at")?,
    })
}

fn detailed_from_row(row: &PgRow) -> Result<DetailedEvaluation, sqlx::Error> {
    Ok(DetailedEvaluation {
        id: row.try_get("id")?,
        technician_id: row.try_get("technician_id")?,
        evaluator_id: row.try_get("evaluator_id")?,
        service_request_id: row.try_get("service_request_id")?,
        visit_date: row.try_get("visit_date")?,
        punctuality: row.try_get("punctuality")?,
        quality: row.try_get("quality")?,
        behavior: row.try_get("behavior")?,
        cleanliness: row.try_get("cleanliness")?,
        communication: row.try_get("communication")?,
        comments: row.try_get("comments")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn list(pool: &PgPool, technician_id: Option<Uuid>) -> Result<Vec<Evaluation>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM evaluations
        WHERE ($1::UUID IS NULL OR technician_id = $1)
        ORDER BY evaluated_on DESC, created_at DESC
        "#,
    )
    .bind(technician_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<Evaluation>, sqlx::Error> {
    sqlx::query("SELECT * FROM evaluations WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .as_ref()
        .map(from_row)
        .transpose()
}

pub async fn insert(
    conn: &mut PgConnection,
    technician_id: Uuid,
    evaluator_id: Uuid,
    rating: i32,
    comment: Option<&str>,
    evaluated_on: NaiveDate,
) -> Result<Evaluation, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO evaluations (id, technician_id, evaluator_id, rating, comment, evaluated_on)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(technician_id)
    .bind(evaluator_id)
    .bind(rating)
    .bind(comment)
    .bind(evaluated_on)
    .fetch_one(&mut *conn)
    .await?;
    from_row(&row)
}

pub async fn delete(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM evaluations WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_detailed(
    pool: &PgPool,
    technician_id: Option<Uuid>,
) -> Result<Vec<DetailedEvaluation>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM detailed_evaluations
        WHERE ($1::UUID IS NULL OR technician_id = $1)
        ORDER BY visit_date DESC, created_at DESC
        "#,
    )
    .bind(technician_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(detailed_from_row).collect()
}

pub struct NewDetailed<'a> {
    pub technician_id: Uuid,
    pub evaluator_id: Uuid,
    pub service_request_id: Option<Uuid>,
    pub visit_date: NaiveDate,
    pub scores: [i32; 5],
    pub comments: Option<&'a str>,
}

pub async fn insert_detailed(
    conn: &mut PgConnection,
    new: NewDetailed<'_>,
) -> Result<DetailedEvaluation, sqlx::Error> {
    let [punctuality, quality, behavior, cleanliness, communication] = new.scores;
    let row = sqlx::query(
        r#"
        INSERT INTO detailed_evaluations
        (id, technician_id, evaluator_id, service_request_id, visit_date,
         punctuality, quality, behavior, cleanliness, communication, comments)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.technician_id)
    .bind(new.evaluator_id)
    .bind(new.service_request_id)
    .bind(new.visit_date)
    .bind(punctuality)
    .bind(quality)
    .bind(behavior)
    .bind(cleanliness)
    .bind(communication)
    .bind(new.comments)
    .fetch_one(&mut *conn)
    .await?;
    detailed_from_row(&row)
}

/// Simple and detailed ratings since `since`, flattened for scoring.
pub async fn fetch_ratings(
    pool: &PgPool,
    since: NaiveDate,
    technician_id: Option<Uuid>,
) -> Result<Vec<RatingRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT e.technician_id, t.full_name, e.evaluated_on AS rated_on,
               e.rating::FLOAT8 AS rating,
               NULL::FLOAT8 AS punctuality, NULL::FLOAT8 AS quality, NULL::FLOAT8 AS behavior,
               NULL::FLOAT8 AS cleanliness, NULL::FLOAT8 AS communication
        FROM evaluations e
        JOIN field_technicians t ON t.id = e.technician_id
        WHERE e.evaluated_on >= $1 AND ($2::UUID IS NULL OR e.technician_id = $2)
        UNION ALL
        SELECT d.technician_id, t.full_name, d.visit_date AS rated_on,
               (d.punctuality + d.quality + d.behavior + d.cleanliness + d.communication)::FLOAT8 / 5.0 AS rating,
               d.punctuality::FLOAT8, d.quality::FLOAT8, d.behavior::FLOAT8,
               d.cleanliness::FLOAT8, d.communication::FLOAT8
        FROM detailed_evaluations d
        JOIN field_technicians t ON t.id = d.technician_id
        WHERE d.visit_date >= $1 AND ($2::UUID IS NULL OR d.technician_id = $2)
        "#,
    )
    .bind(since)
    .bind(technician_id)
    .fetch_all(pool)
    .await?;

    let mut ratings = Vec::with_capacity(rows.len());
    for row in rows {
        let punctuality: Option<f64> = row.try_get("punctuality")?;
        let criteria = match punctuality {
            Some(punctuality) => Some(CriteriaScores {
                punctuality,
                quality: row.try_get("quality")?,
                behavior: row.try_get("behavior")?,
                cleanliness: row.try_get("cleanliness")?,
                communication: row.try_get("communication")?,
            }),
            None => None,
        };

        ratings.push(RatingRecord {
            technician_id: row.try_get("technician_id")?,
            technician_name: row.try_get("full_name")?,
            rated_on: row.try_get("rated_on")?,
            rating: row.try_get("rating")?,
            criteria,
        });
    }

    Ok(ratings)
}
