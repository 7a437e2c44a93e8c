use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use anyhow::{bail, Context};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_secret: String,
    pub session_ttl_hours: i64,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub db_max_connections: u32,
    pub cookie_secure: bool,
    pub cors_origin: Option<String>,
}

impl Config {
    /// Loads the server configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a Postgres instance")?;

        Ok(Self {
            database_url,
            bind_addr: try_load("BIND_ADDR", "0.0.0.0:8080")?,
            session_secret: read_secret("SESSION_SECRET")?,
            session_ttl_hours: try_load("SESSION_TTL_HOURS", "12")?,
            upload_dir: try_load("UPLOAD_DIR", "uploads")?,
            max_upload_bytes: try_load("MAX_UPLOAD_BYTES", "10485760")?,
            db_max_connections: try_load("DB_MAX_CONNECTIONS", "5")?,
            cookie_secure: try_load("COOKIE_SECURE", "false")?,
            cors_origin: env::var("CORS_ORIGIN").ok().filter(|value| !value.is_empty()),
        })
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e| anyhow::anyhow!("invalid {key} value {raw:?}: {e}"))
}

/// Reads `NAME` from the environment, falling back to the file named by `NAME_FILE`.
fn read_secret(name: &str) -> anyhow::Result<String> {
    let secret = match env::var(name) {
        Ok(value) => value,
        Err(_) => {
            let file_key = format!("{name}_FILE");
            let path = env::var(&file_key)
                .with_context(|| format!("{name} or {file_key} must be set"))?;
            std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {name} from {path}"))?
                .trim()
                .to_string()
        }
    };

    if secret.len() < 32 {
        warn!("{name} is shorter than 32 bytes");
    }
    if secret.is_empty() {
        bail!("{name} must not be empty");
    }

    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_load_parses_defaults() {
        let ttl: i64 = try_load("COMPLAINT_DESK_TEST_UNSET_TTL", "12").unwrap();
        assert_eq!(ttl, 12);
        let secure: bool = try_load("COMPLAINT_DESK_TEST_UNSET_SECURE", "false").unwrap();
        assert!(!secure);
    }

    #[test]
    fn try_load_rejects_garbage() {
        let result: anyhow::Result<u32> = try_load("COMPLAINT_DESK_TEST_UNSET_CONN", "many");
        assert!(result.is_err());
    }

    #[test]
    fn secret_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        std::fs::write(&path, "  file-backed-secret-value-that-is-long  \n").unwrap();
        env::set_var("COMPLAINT_DESK_TEST_SECRET_FILE", &path);

        let secret = read_secret("COMPLAINT_DESK_TEST_SECRET").unwrap();
        assert_eq!(secret, "file-backed-secret-value-that-is-long");
    }
}
