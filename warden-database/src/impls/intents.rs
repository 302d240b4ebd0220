use sqlx::PgConnection;

use crate::{
    database::Database,
    impls::{from_db, from_db_all, to_db, to_db_all},
    model::{cases::CaseId, intents::PendingRoleAction},
};

#[derive(sqlx::FromRow)]
struct PendingRoleActionRow {
    case_id: i64,
    guild_id: i64,
    target_id: i64,
    role_id: i64,
    clean: bool,
    prior_roles: Vec<i64>,
    created_at: i64,
}

pub async fn insert_intent(db: &Database, intent: &PendingRoleAction) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO pending_role_actions (
            case_id,
            guild_id,
            target_id,
            role_id,
            clean,
            prior_roles,
            created_at
         ) VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(to_db(intent.case_id, "case_id")?)
    .bind(to_db(intent.guild_id, "guild_id")?)
    .bind(to_db(intent.target_id, "target_id")?)
    .bind(to_db(intent.role_id, "role_id")?)
    .bind(intent.clean)
    .bind(to_db_all(&intent.prior_roles, "prior_roles")?)
    .bind(to_db(intent.created_at, "created_at")?)
    .execute(db.pool())
    .await?;

    Ok(())
}

pub async fn delete_intent(conn: &mut PgConnection, case_id: CaseId) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM pending_role_actions WHERE case_id = $1")
        .bind(to_db(case_id, "case_id")?)
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn discard_intent(db: &Database, case_id: CaseId) -> anyhow::Result<()> {
    let mut conn = db.pool().acquire().await?;
    delete_intent(&mut conn, case_id).await
}

/// Intents created at or before `cutoff`, oldest first.
pub async fn stale_intents(db: &Database, cutoff: u64) -> anyhow::Result<Vec<PendingRoleAction>> {
    let rows: Vec<PendingRoleActionRow> = sqlx::query_as(
        "SELECT case_id, guild_id, target_id, role_id, clean, prior_roles, created_at
         FROM pending_role_actions
         WHERE created_at <= $1
         ORDER BY created_at ASC",
    )
    .bind(to_db(cutoff, "cutoff")?)
    .fetch_all(db.pool())
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(PendingRoleAction {
            case_id: from_db(row.case_id, "case_id")?,
            guild_id: from_db(row.guild_id, "guild_id")?,
            target_id: from_db(row.target_id, "target_id")?,
            role_id: from_db(row.role_id, "role_id")?,
            clean: row.clean,
            prior_roles: from_db_all(row.prior_roles, "prior_roles")?,
            created_at: from_db(row.created_at, "created_at")?,
        });
    }

    Ok(out)
}
