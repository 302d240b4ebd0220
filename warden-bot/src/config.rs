use std::env;
use std::time::Duration;

use anyhow::Context;

use warden_utils::parse::parse_duration_seconds;

const DEFAULT_TASK_POLL_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_GUILD_API_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct Config {
    pub discord_token: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_enabled: bool,
    pub redis_url: Option<String>,
    pub redis_key_prefix: String,
    pub auto_run_migrations: bool,
    pub task_poll_interval: Duration,
    pub sweep_interval: Duration,
    pub guild_api_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let discord_token = env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?;
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;

        Ok(Self {
            discord_token,
            database_url,
            database_max_connections: u32::try_from(env_u64("DATABASE_MAX_CONNECTIONS", 5))
                .context("DATABASE_MAX_CONNECTIONS out of range")?,
            redis_enabled: env_bool("REDIS_ENABLED", false),
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),
            redis_key_prefix: env::var("REDIS_KEY_PREFIX")
                .unwrap_or_else(|_| "warden:prod".to_string()),
            auto_run_migrations: env_bool("AUTO_RUN_MIGRATIONS", true),
            task_poll_interval: env_duration("TASK_POLL_INTERVAL", DEFAULT_TASK_POLL_INTERVAL),
            sweep_interval: env_duration("SWEEP_INTERVAL", DEFAULT_SWEEP_INTERVAL),
            guild_api_timeout: env_duration("GUILD_API_TIMEOUT", DEFAULT_GUILD_API_TIMEOUT),
        })
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => parse_bool(&value),
        Err(_) => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(value) => value.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_duration(key: &str, default: Duration) -> Duration {
    parse_interval(env::var(key).ok().as_deref(), default)
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_interval(raw: Option<&str>, default: Duration) -> Duration {
    raw.and_then(parse_duration_seconds)
        .map(Duration::from_secs)
        .unwrap_or(default)
}
