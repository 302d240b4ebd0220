use sqlx::PgConnection;

use crate::{
    database::Database,
    impls::{from_db, to_db},
    model::{
        cases::CaseId,
        tasks::{NewTask, Task, TaskId, TaskPayload},
    },
};

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    task_type: String,
    guild_id: i64,
    run_at: i64,
    data: serde_json::Value,
    attempts: i32,
}

pub async fn insert_task(conn: &mut PgConnection, task: &NewTask) -> anyhow::Result<TaskId> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO scheduled_tasks (task_type, guild_id, run_at, data, attempts)
         VALUES ($1, $2, $3, $4, 0)
         RETURNING id",
    )
    .bind(task.payload.task_type())
    .bind(to_db(task.guild_id, "guild_id")?)
    .bind(to_db(task.run_at, "run_at")?)
    .bind(task.payload.data())
    .fetch_one(conn)
    .await?;

    from_db(id, "task id")
}

/// Delete every task whose payload references `case_id`.
pub async fn delete_tasks_for_case(conn: &mut PgConnection, case_id: CaseId) -> anyhow::Result<u64> {
    let deleted = sqlx::query(
        "DELETE FROM scheduled_tasks WHERE data @> jsonb_build_object('caseId', $1::BIGINT)",
    )
    .bind(to_db(case_id, "case_id")?)
    .execute(conn)
    .await?
    .rows_affected();

    Ok(deleted)
}

/// Claim up to `limit` due tasks, oldest first. Claimed rows have `run_at`
/// pushed to `now + lease_seconds` so concurrent runners skip them, and a
/// runner that dies mid-task lets the lease lapse back into the due set.
pub async fn claim_due_tasks(
    db: &Database,
    now: u64,
    lease_seconds: u64,
    limit: u32,
) -> anyhow::Result<Vec<Task>> {
    let now_i64 = to_db(now, "now")?;
    let lease_until = to_db(now.saturating_add(lease_seconds), "lease_until")?;

    let mut rows: Vec<TaskRow> = sqlx::query_as(
        "WITH due AS (
            SELECT id, run_at AS due_at
            FROM scheduled_tasks
            WHERE run_at <= $1
            ORDER BY run_at ASC, id ASC
            LIMIT $3
            FOR UPDATE SKIP LOCKED
         )
         UPDATE scheduled_tasks t
         SET run_at = $2
         FROM due
         WHERE t.id = due.id
         RETURNING t.id, t.task_type, t.guild_id, due.due_at AS run_at, t.data, t.attempts",
    )
    .bind(now_i64)
    .bind(lease_until)
    .bind(i64::from(limit.max(1)))
    .fetch_all(db.pool())
    .await?;

    // UPDATE ... RETURNING does not preserve the CTE order.
    rows.sort_by_key(|row| (row.run_at, row.id));

    rows.into_iter().map(to_task).collect()
}

pub async fn delete_task(db: &Database, task_id: TaskId) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM scheduled_tasks WHERE id = $1")
        .bind(to_db(task_id, "task_id")?)
        .execute(db.pool())
        .await?;

    Ok(())
}

pub async fn reschedule_task(
    db: &Database,
    task_id: TaskId,
    attempts: u32,
    run_at: u64,
) -> anyhow::Result<()> {
    let attempts_i32 = i32::try_from(attempts).map_err(|_| anyhow::anyhow!("attempts out of i32 range"))?;

    sqlx::query("UPDATE scheduled_tasks SET attempts = $1, run_at = $2 WHERE id = $3")
        .bind(attempts_i32)
        .bind(to_db(run_at, "run_at")?)
        .bind(to_db(task_id, "task_id")?)
        .execute(db.pool())
        .await?;

    Ok(())
}

fn to_task(row: TaskRow) -> anyhow::Result<Task> {
    let payload = TaskPayload::from_parts(&row.task_type, row.data).ok();

    Ok(Task {
        id: from_db(row.id, "id")?,
        guild_id: from_db(row.guild_id, "guild_id")?,
        run_at: from_db(row.run_at, "run_at")?,
        attempts: u32::try_from(row.attempts)
            .map_err(|_| anyhow::anyhow!("attempts row out of u32 range"))?,
        task_type: row.task_type,
        payload,
    })
}
