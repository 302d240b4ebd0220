mod config;

use std::sync::Arc;

use serenity::all::Http;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use rustls::crypto::ring::default_provider;
use sqlx::postgres::PgPoolOptions;

use warden_database::{CacheService, Database, MIGRATOR};
use warden_moderation::{
    CaseEvent, CaseHook, ModerationEngine, RunnerConfig, SerenityGuildApi, Sweeper, TaskRunner,
};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(filter_fn(|metadata| {
        let target = metadata.target();

        let within_info_level = *metadata.level() <= tracing::Level::INFO;
        within_info_level || !target.starts_with("serenity::http::ratelimiting")
    }));
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls ring provider"))?;

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    info!("PostgreSQL connection established.");

    let cache = build_cache(&config);
    if cache.is_redis_enabled() {
        if let Err(err) = cache.ping().await {
            warn!(
                ?err,
                "Redis ping failed; locks and settings cache will retry on each use."
            );
        } else {
            info!("Redis cache health check passed.");
        }
    }

    let db = Arc::new(Database::with_cache(db_pool, cache.clone()));

    if config.auto_run_migrations {
        MIGRATOR.run(db.pool()).await?;
        info!("Database migrations applied.");
    } else {
        info!("Auto migrations disabled (set AUTO_RUN_MIGRATIONS=true to run at startup).");
    }

    let http = Arc::new(Http::new(&config.discord_token));
    let guild_api = Arc::new(SerenityGuildApi::new(http));
    let hook = CaseHook::default();

    let engine = ModerationEngine::new(
        guild_api.clone(),
        db.clone(),
        db.clone(),
        cache,
        hook.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = TaskRunner::new(
        engine.executor().clone(),
        db.clone(),
        RunnerConfig {
            poll_interval: config.task_poll_interval,
            guild_api_timeout: config.guild_api_timeout,
            ..RunnerConfig::default()
        },
    );
    let sweeper = Sweeper::new(
        guild_api,
        db.clone(),
        db,
        hook,
        config.sweep_interval,
    );

    let handles = [
        tokio::spawn(runner.run(shutdown_rx.clone())),
        tokio::spawn(sweeper.run(shutdown_rx.clone())),
        tokio::spawn(log_case_events(engine.subscribe(), shutdown_rx)),
    ];
    info!("Warden is on duty.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested.");
    shutdown_tx.send(true).ok();

    for handle in handles {
        if let Err(err) = handle.await {
            error!(?err, "background task panicked");
        }
    }

    Ok(())
}

fn build_cache(config: &Config) -> CacheService {
    let key_prefix = config.redis_key_prefix.clone();

    if !config.redis_enabled {
        info!("Redis disabled (set REDIS_ENABLED=true to enable); using in-process locks.");
        return CacheService::in_memory(key_prefix);
    }

    match config.redis_url.as_deref() {
        Some(redis_url) => match CacheService::redis(redis_url, key_prefix.clone()) {
            Ok(cache) => {
                info!(key_prefix = %key_prefix, "Redis cache enabled.");
                cache
            }
            Err(err) => {
                warn!(?err, key_prefix = %key_prefix, "Failed to initialize Redis cache; continuing with in-process locks.");
                CacheService::in_memory(key_prefix)
            }
        },
        None => {
            warn!(key_prefix = %key_prefix, "REDIS_ENABLED=true but REDIS_URL is missing; continuing with in-process locks.");
            CacheService::in_memory(key_prefix)
        }
    }
}

async fn log_case_events(
    mut events: broadcast::Receiver<CaseEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(payload) => info!(target: "warden::cases", %payload, "case event"),
                    Err(err) => warn!(?err, "failed to encode case event"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "case event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
