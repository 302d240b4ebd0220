use anyhow::Context as _;

use crate::cache::{CONFIG_CACHE_TTL, guild_settings_key, invalidate_guild_settings};
use crate::database::Database;
use crate::impls::{from_db_all, to_db, to_db_all};
use crate::model::settings::GuildSettings;

#[derive(sqlx::FromRow)]
struct GuildSettingsRow {
    auto_pardon_warns_after_days: Option<i32>,
    automod_cooldown_seconds: Option<i64>,
    mod_role_ids: Vec<i64>,
}

/// Cached read; guilds without a row get [`GuildSettings::unconfigured`].
pub async fn get_guild_settings(db: &Database, guild_id: u64) -> anyhow::Result<GuildSettings> {
    let cache_key = guild_settings_key(db.cache(), guild_id);
    db.cache()
        .get_or_load_json(&cache_key, CONFIG_CACHE_TTL, || {
            load_guild_settings(db, guild_id)
        })
        .await
}

async fn load_guild_settings(db: &Database, guild_id: u64) -> anyhow::Result<GuildSettings> {
    let row: Option<GuildSettingsRow> = sqlx::query_as(
        "SELECT auto_pardon_warns_after_days, automod_cooldown_seconds, mod_role_ids
         FROM guild_settings
         WHERE guild_id = $1",
    )
    .bind(to_db(guild_id, "guild_id")?)
    .fetch_optional(db.pool())
    .await?;

    let Some(row) = row else {
        return Ok(GuildSettings::unconfigured(guild_id));
    };

    Ok(GuildSettings {
        guild_id,
        auto_pardon_warns_after_days: row
            .auto_pardon_warns_after_days
            .map(u32::try_from)
            .transpose()
            .context("auto_pardon_warns_after_days out of u32 range")?,
        automod_cooldown_seconds: row
            .automod_cooldown_seconds
            .map(u64::try_from)
            .transpose()
            .context("automod_cooldown_seconds out of u64 range")?,
        mod_role_ids: from_db_all(row.mod_role_ids, "mod_role_ids")?,
    })
}

pub async fn upsert_guild_settings(db: &Database, settings: &GuildSettings) -> anyhow::Result<()> {
    let auto_pardon_days = settings
        .auto_pardon_warns_after_days
        .map(i32::try_from)
        .transpose()
        .context("auto_pardon_warns_after_days out of i32 range")?;
    let cooldown_seconds = settings
        .automod_cooldown_seconds
        .map(|value| to_db(value, "automod_cooldown_seconds"))
        .transpose()?;

    sqlx::query(
        "INSERT INTO guild_settings (guild_id, auto_pardon_warns_after_days, automod_cooldown_seconds, mod_role_ids)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (guild_id) DO UPDATE SET
            auto_pardon_warns_after_days = EXCLUDED.auto_pardon_warns_after_days,
            automod_cooldown_seconds = EXCLUDED.automod_cooldown_seconds,
            mod_role_ids = EXCLUDED.mod_role_ids",
    )
    .bind(to_db(settings.guild_id, "guild_id")?)
    .bind(auto_pardon_days)
    .bind(cooldown_seconds)
    .bind(to_db_all(&settings.mod_role_ids, "mod_role_ids")?)
    .execute(db.pool())
    .await?;

    invalidate_guild_settings(db.cache(), settings.guild_id).await?;

    Ok(())
}
