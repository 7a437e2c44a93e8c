use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod audit;
mod auth;
mod config;
mod db;
mod error;
mod http;
mod models;
mod notify;
mod permissions;
mod report;
mod scoring;
mod workflow;

use crate::{
    db::{complaints::Dimension, team::NewMember},
    models::Role,
};

#[derive(Parser)]
#[command(name = "complaint-desk")]
#[command(about = "Complaint desk and field service tracker", long_about = None)]
struct Cli {
    /// Postgres connection string (not used by `serve`, which reads its own config)
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo team members, technicians, complaints and evaluations
    Seed,
    /// Create a team member
    AddMember {
        #[arg(long)]
        username: String,
        #[arg(long)]
        full_name: String,
        #[arg(long, default_value = "agent")]
        role: Role,
        #[arg(long, env = "MEMBER_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Import complaints from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
        /// Username recorded as the creator of imported complaints
        #[arg(long, default_value = "admin")]
        imported_by: String,
    },
    /// Rank technicians by recency-weighted rating
    Score {
        #[arg(long, default_value_t = 30)]
        since_days: i64,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value_t = 30)]
        since_days: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Run the HTTP and WebSocket server
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Commands::Serve = cli.command {
        let config = config::Config::load()?;
        return http::serve(config).await;
    }

    let database_url = cli
        .database_url
        .context("DATABASE_URL must be set to a Postgres instance")?;
    let pool = db::connect(&database_url, 5).await?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::AddMember {
            username,
            full_name,
            role,
            password,
            email,
        } => {
            auth::validate_password(&password)?;
            let password_hash = auth::hash_password(&password)?;

            let mut tx = pool.begin().await?;
            let member = db::team::insert(
                &mut tx,
                NewMember {
                    username: username.trim(),
                    full_name: full_name.trim(),
                    email: email.as_deref(),
                    role,
                    permissions: &[],
                    password_hash: &password_hash,
                },
            )
            .await
            .with_context(|| format!("failed to create member {username}"))?;
            audit::log_action(
                &mut tx,
                None,
                "team.created",
                "team_member",
                Some(member.id),
                json!({ "username": member.username, "role": member.role, "via": "cli" }),
            )
            .await?;
            tx.commit().await?;

            println!("Created {} ({}) as {}.", member.full_name, member.username, member.role);
        }
        Commands::Import { csv, imported_by } => {
            let inserted = db::import_csv(&pool, &csv, &imported_by).await?;
            println!("Inserted {inserted} complaints from {}.", csv.display());
        }
        Commands::Score { since_days, limit } => {
            let since_date = scoring::cutoff_date(since_days);
            let ratings = db::evaluations::fetch_ratings(&pool, since_date, None).await?;
            let scores = scoring::score_ratings(&ratings, since_days);

            if scores.is_empty() {
                println!("No evaluations found for this window.");
                return Ok(());
            }

            println!("Top technicians by score:");
            for score in scores.iter().take(limit) {
                println!(
                    "- {} score {:.2} (avg {:.2}) across {} evaluations",
                    score.technician_name,
                    score.score,
                    score.average_rating,
                    score.evaluation_count
                );
            }
        }
        Commands::Report { since_days, out } => {
            let since_date = scoring::cutoff_date(since_days);
            let by_status = db::complaints::count_by(&pool, Dimension::Status).await?;
            let by_severity = db::complaints::count_by(&pool, Dimension::Severity).await?;
            let (open, unassigned) = db::complaints::open_counts(&pool).await?;
            let recent = db::complaints::recent(&pool, since_date, 10).await?;
            let ratings = db::evaluations::fetch_ratings(&pool, since_date, None).await?;
            let technicians = scoring::score_ratings(&ratings, since_days);

            let report = report::build_report(&report::ReportInput {
                since_days,
                cutoff: since_date,
                by_status: &by_status,
                by_severity: &by_severity,
                open,
                unassigned,
                recent: &recent,
                technicians: &technicians,
            });
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        // Handled before connecting.
        Commands::Serve => {}
    }

    Ok(())
}
