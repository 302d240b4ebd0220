use crate::{
    database::Database,
    impls::{from_db, to_db},
    model::automod::TriggerCounter,
};

#[derive(sqlx::FromRow)]
struct TriggerRow {
    guild_id: i64,
    user_id: i64,
    count: i32,
    updated_at: i64,
}

/// Bump the member's violation counter and return the new count.
pub async fn record_trigger(
    db: &Database,
    guild_id: u64,
    user_id: u64,
    now: u64,
) -> anyhow::Result<i32> {
    let count: i32 = sqlx::query_scalar(
        "INSERT INTO automod_triggers (guild_id, user_id, count, updated_at)
         VALUES ($1, $2, 1, $3)
         ON CONFLICT (guild_id, user_id)
         DO UPDATE SET count = automod_triggers.count + 1, updated_at = EXCLUDED.updated_at
         RETURNING count",
    )
    .bind(to_db(guild_id, "guild_id")?)
    .bind(to_db(user_id, "user_id")?)
    .bind(to_db(now, "now")?)
    .fetch_one(db.pool())
    .await?;

    Ok(count)
}

pub async fn list_triggers(db: &Database) -> anyhow::Result<Vec<TriggerCounter>> {
    let rows: Vec<TriggerRow> = sqlx::query_as(
        "SELECT guild_id, user_id, count, updated_at
         FROM automod_triggers
         ORDER BY guild_id ASC, user_id ASC",
    )
    .fetch_all(db.pool())
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(TriggerCounter {
            guild_id: from_db(row.guild_id, "guild_id")?,
            user_id: from_db(row.user_id, "user_id")?,
            count: row.count,
            updated_at: from_db(row.updated_at, "updated_at")?,
        });
    }

    Ok(out)
}

/// Decrement one step, but only if nobody touched the row since it was read.
pub async fn decay_trigger(
    db: &Database,
    counter: &TriggerCounter,
    now: u64,
) -> anyhow::Result<bool> {
    let updated = sqlx::query(
        "UPDATE automod_triggers
         SET count = count - 1, updated_at = $1
         WHERE guild_id = $2 AND user_id = $3 AND updated_at = $4",
    )
    .bind(to_db(now, "now")?)
    .bind(to_db(counter.guild_id, "guild_id")?)
    .bind(to_db(counter.user_id, "user_id")?)
    .bind(to_db(counter.updated_at, "updated_at")?)
    .execute(db.pool())
    .await?
    .rows_affected();

    Ok(updated > 0)
}

/// Delete the counter, guarded the same way as [`decay_trigger`].
pub async fn delete_trigger(db: &Database, counter: &TriggerCounter) -> anyhow::Result<bool> {
    let deleted = sqlx::query(
        "DELETE FROM automod_triggers
         WHERE guild_id = $1 AND user_id = $2 AND updated_at = $3",
    )
    .bind(to_db(counter.guild_id, "guild_id")?)
    .bind(to_db(counter.user_id, "user_id")?)
    .bind(to_db(counter.updated_at, "updated_at")?)
    .execute(db.pool())
    .await?
    .rows_affected();

    Ok(deleted > 0)
}
