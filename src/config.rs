use std::env;
use std::time::Duration;

/// Process configuration, loaded once from the environment variables listed
/// in the external-interfaces contract and shared by both binaries.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub server_read_timeout: Duration,
    pub server_write_timeout: Duration,
    pub server_idle_timeout: Duration,

    pub database_url: String,

    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,
    pub redis_db: u8,

    pub log_level: String,
    pub jwt_secret: String,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Ok(Self {
            server_port: env_parse("SERVER_PORT", 8080)?,
            server_read_timeout: Duration::from_secs(env_parse("SERVER_READ_TIMEOUT", 15)?),
            server_write_timeout: Duration::from_secs(env_parse("SERVER_WRITE_TIMEOUT", 15)?),
            server_idle_timeout: Duration::from_secs(env_parse("SERVER_IDLE_TIMEOUT", 60)?),

            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| database_url_from_parts()),

            redis_host: env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".into()),
            redis_port: env_parse("REDIS_PORT", 6379)?,
            redis_password: env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty()),
            redis_db: env_parse("REDIS_DB", 0)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into()),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.server_port)
    }

    pub fn redis_url(&self) -> String {
        let auth = self
            .redis_password
            .as_ref()
            .map_or_else(String::new, |p| format!(":{p}@"));
        format!(
            "redis://{auth}{}:{}/{}",
            self.redis_host, self.redis_port, self.redis_db
        )
    }

    /// `RUST_LOG` wins when set (the usual `tracing_subscriber` convention);
    /// otherwise falls back to `log_level` (`LOG_LEVEL`), then `"info"`.
    pub fn tracing_filter(&self) -> String {
        env::var("RUST_LOG").unwrap_or_else(|_| self.log_level.clone())
    }
}

fn database_url_from_parts() -> String {
    let host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".into());
    let port = env::var("DB_PORT").unwrap_or_else(|_| "5432".into());
    let user = env::var("DB_USER").unwrap_or_else(|_| "deployknot".into());
    let password = env::var("DB_PASSWORD").unwrap_or_else(|_| "dev".into());
    let name = env::var("DB_NAME").unwrap_or_else(|_| "deployknot_dev".into());
    let sslmode = env::var("DB_SSLMODE").unwrap_or_else(|_| "disable".into());
    let schema = env::var("DB_SCHEMA").unwrap_or_else(|_| "public".into());
    format!(
        "postgres://{user}:{password}@{host}:{port}/{name}?sslmode={sslmode}&options=-csearch_path%3D{schema}"
    )
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}
