use sqlx::PgConnection;

use crate::{
    database::Database,
    impls::{
        from_db, from_db_opt, intents::delete_intent, tasks::delete_tasks_for_case,
        tasks::insert_task, to_db,
    },
    model::{
        cases::{ActionType, Actor, Case, CaseId, Expiry, NewCase, RoleCase, RoleCaseData},
        tasks::{NewTask, TaskPayload},
    },
};

/// Everything written when a role punishment has been applied to the member.
pub struct RoleCaseRecord {
    pub case_id: CaseId,
    pub case: NewCase,
    pub role_id: u64,
    pub clean: bool,
    /// Roles stripped from the member, restored on reversal.
    pub undo_roles: Vec<u64>,
}

#[derive(sqlx::FromRow)]
struct CaseRow {
    id: i64,
    guild_id: i64,
    target_id: i64,
    mod_id: i64,
    action: String,
    reason: Option<String>,
    created_at: i64,
    duration_seconds: Option<i64>,
    expires_at: Option<i64>,
    pardoned_by: Option<i64>,
    reverses_case_id: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct RoleCaseRow {
    #[sqlx(flatten)]
    case: CaseRow,
    role_id: i64,
    clean: bool,
}

/// Draw the next case id up front so it can key locks and intents before the
/// case row exists.
pub async fn reserve_case_id(db: &Database) -> anyhow::Result<CaseId> {
    let id: i64 = sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence('mod_cases', 'id'))")
        .fetch_one(db.pool())
        .await?;

    from_db(id, "case id")
}

pub async fn record_case(db: &Database, new_case: NewCase) -> anyhow::Result<Case> {
    let mut conn = db.pool().acquire().await?;
    insert_case(&mut conn, None, &new_case).await
}

/// Write the case, its role detail, the expiry task and the undo roles in one
/// transaction, clearing the apply intent for the same case id.
pub async fn record_role_case(db: &Database, record: RoleCaseRecord) -> anyhow::Result<RoleCase> {
    db.with_transaction(move |tx| {
        Box::pin(async move {
            let case = insert_case(&mut **tx, Some(record.case_id), &record.case).await?;

            sqlx::query("INSERT INTO role_case_data (case_id, role_id, clean) VALUES ($1, $2, $3)")
                .bind(to_db(case.id, "case_id")?)
                .bind(to_db(record.role_id, "role_id")?)
                .bind(record.clean)
                .execute(&mut **tx)
                .await?;

            if let Some(expires_at) = case.expiry.expires_at() {
                insert_task(
                    &mut **tx,
                    &NewTask {
                        guild_id: case.guild_id,
                        run_at: expires_at,
                        payload: TaskPayload::UndoRoleCase { case_id: case.id },
                    },
                )
                .await?;
            }

            for role_id in &record.undo_roles {
                sqlx::query(
                    "INSERT INTO undo_roles (case_id, role_id) VALUES ($1, $2)
                     ON CONFLICT DO NOTHING",
                )
                .bind(to_db(case.id, "case_id")?)
                .bind(to_db(*role_id, "role_id")?)
                .execute(&mut **tx)
                .await?;
            }

            delete_intent(&mut **tx, case.id).await?;

            let data = RoleCaseData {
                case_id: case.id,
                role_id: record.role_id,
                clean: record.clean,
            };

            Ok(RoleCase { case, data })
        })
    })
    .await
}

/// Record the audit case for a lifted action and drop any task still pending
/// for the original case. Returns `None` when the original already has a
/// reversal on record.
pub async fn record_reversal(
    db: &Database,
    original_case_id: CaseId,
    new_case: NewCase,
) -> anyhow::Result<Option<Case>> {
    db.with_transaction(move |tx| {
        Box::pin(async move {
            delete_tasks_for_case(&mut **tx, original_case_id).await?;
            try_insert_case(&mut **tx, None, &new_case).await
        })
    })
    .await
}

/// The audit case that lifted `case_id`, if any.
pub async fn reversal_of(db: &Database, case_id: CaseId) -> anyhow::Result<Option<Case>> {
    let row: Option<CaseRow> = sqlx::query_as(
        "SELECT id, guild_id, target_id, mod_id, action, reason, created_at, duration_seconds, expires_at, pardoned_by, reverses_case_id
         FROM mod_cases
         WHERE reverses_case_id = $1",
    )
    .bind(to_db(case_id, "case_id")?)
    .fetch_optional(db.pool())
    .await?;

    row.map(to_case).transpose()
}

pub async fn get_case(db: &Database, case_id: CaseId) -> anyhow::Result<Option<Case>> {
    let row: Option<CaseRow> = sqlx::query_as(
        "SELECT id, guild_id, target_id, mod_id, action, reason, created_at, duration_seconds, expires_at, pardoned_by, reverses_case_id
         FROM mod_cases
         WHERE id = $1",
    )
    .bind(to_db(case_id, "case_id")?)
    .fetch_optional(db.pool())
    .await?;

    row.map(to_case).transpose()
}

pub async fn get_role_case(db: &Database, case_id: CaseId) -> anyhow::Result<Option<RoleCase>> {
    let row: Option<RoleCaseRow> = sqlx::query_as(
        "SELECT c.id, c.guild_id, c.target_id, c.mod_id, c.action, c.reason, c.created_at, c.duration_seconds, c.expires_at, c.pardoned_by, c.reverses_case_id, r.role_id, r.clean
         FROM mod_cases c
         JOIN role_case_data r ON r.case_id = c.id
         WHERE c.id = $1",
    )
    .bind(to_db(case_id, "case_id")?)
    .fetch_optional(db.pool())
    .await?;

    row.map(to_role_case).transpose()
}

pub async fn undo_roles_for_case(db: &Database, case_id: CaseId) -> anyhow::Result<Vec<u64>> {
    let role_ids: Vec<i64> =
        sqlx::query_scalar("SELECT role_id FROM undo_roles WHERE case_id = $1 ORDER BY role_id")
            .bind(to_db(case_id, "case_id")?)
            .fetch_all(db.pool())
            .await?;

    role_ids
        .into_iter()
        .map(|role_id| from_db(role_id, "role_id"))
        .collect()
}

/// Set `pardoned_by` unless the case is already pardoned. Returns the updated
/// case, or `None` when nothing changed.
pub async fn pardon_case(
    db: &Database,
    guild_id: u64,
    case_id: CaseId,
    actor: Actor,
) -> anyhow::Result<Option<Case>> {
    let row: Option<CaseRow> = sqlx::query_as(
        "UPDATE mod_cases
         SET pardoned_by = $1
         WHERE id = $2 AND guild_id = $3 AND pardoned_by IS NULL
         RETURNING id, guild_id, target_id, mod_id, action, reason, created_at, duration_seconds, expires_at, pardoned_by, reverses_case_id",
    )
    .bind(to_db(actor.to_column(), "pardoned_by")?)
    .bind(to_db(case_id, "case_id")?)
    .bind(to_db(guild_id, "guild_id")?)
    .fetch_optional(db.pool())
    .await?;

    row.map(to_case).transpose()
}

/// Un-pardoned warn cases in guilds that configured an auto-pardon window.
pub async fn unpardoned_warns(db: &Database) -> anyhow::Result<Vec<Case>> {
    let rows: Vec<CaseRow> = sqlx::query_as(
        "SELECT id, guild_id, target_id, mod_id, action, reason, created_at, duration_seconds, expires_at, pardoned_by, reverses_case_id
         FROM mod_cases
         WHERE action = 'warn'
           AND pardoned_by IS NULL
           AND guild_id IN (
               SELECT guild_id FROM guild_settings WHERE auto_pardon_warns_after_days IS NOT NULL
           )
         ORDER BY created_at ASC, id ASC",
    )
    .fetch_all(db.pool())
    .await?;

    rows.into_iter().map(to_case).collect()
}

pub async fn case_exists(db: &Database, case_id: CaseId) -> anyhow::Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM mod_cases WHERE id = $1)")
        .bind(to_db(case_id, "case_id")?)
        .fetch_one(db.pool())
        .await?;

    Ok(exists)
}

async fn insert_case(
    conn: &mut PgConnection,
    id: Option<CaseId>,
    new_case: &NewCase,
) -> anyhow::Result<Case> {
    try_insert_case(conn, id, new_case)
        .await?
        .ok_or_else(|| anyhow::anyhow!("case insert skipped on conflict"))
}

/// Insert a case, yielding `None` when it would be a second reversal of the
/// same original.
async fn try_insert_case(
    conn: &mut PgConnection,
    id: Option<CaseId>,
    new_case: &NewCase,
) -> anyhow::Result<Option<Case>> {
    let id = id.map(|id| to_db(id, "case_id")).transpose()?;
    let duration_seconds = new_case
        .expiry
        .duration_seconds()
        .map(|value| to_db(value, "duration_seconds"))
        .transpose()?;
    let expires_at = new_case
        .expiry
        .expires_at()
        .map(|value| to_db(value, "expires_at"))
        .transpose()?;
    let reverses_case_id = new_case
        .reverses_case_id
        .map(|value| to_db(value, "reverses_case_id"))
        .transpose()?;

    let row: Option<CaseRow> = sqlx::query_as(
        "INSERT INTO mod_cases (
            id,
            guild_id,
            target_id,
            mod_id,
            action,
            reason,
            created_at,
            duration_seconds,
            expires_at,
            reverses_case_id
         ) VALUES (
            COALESCE($1, nextval(pg_get_serial_sequence('mod_cases', 'id'))),
            $2, $3, $4, $5, $6, $7, $8, $9, $10
         )
         ON CONFLICT (reverses_case_id) WHERE reverses_case_id IS NOT NULL DO NOTHING
         RETURNING id, guild_id, target_id, mod_id, action, reason, created_at, duration_seconds, expires_at, pardoned_by, reverses_case_id",
    )
    .bind(id)
    .bind(to_db(new_case.guild_id, "guild_id")?)
    .bind(to_db(new_case.target_id, "target_id")?)
    .bind(to_db(new_case.mod_id, "mod_id")?)
    .bind(new_case.action.as_str())
    .bind(new_case.reason.as_deref())
    .bind(to_db(new_case.created_at, "created_at")?)
    .bind(duration_seconds)
    .bind(expires_at)
    .bind(reverses_case_id)
    .fetch_optional(conn)
    .await?;

    row.map(to_case).transpose()
}

fn to_case(row: CaseRow) -> anyhow::Result<Case> {
    let action = ActionType::parse(&row.action)
        .ok_or_else(|| anyhow::anyhow!("unknown case action `{}`", row.action))?;

    Ok(Case {
        id: from_db(row.id, "id")?,
        guild_id: from_db(row.guild_id, "guild_id")?,
        target_id: from_db(row.target_id, "target_id")?,
        mod_id: from_db(row.mod_id, "mod_id")?,
        reason: row.reason,
        action,
        created_at: from_db(row.created_at, "created_at")?,
        expiry: Expiry::from_columns(
            from_db_opt(row.duration_seconds, "duration_seconds")?,
            from_db_opt(row.expires_at, "expires_at")?,
        )?,
        pardoned_by: from_db_opt(row.pardoned_by, "pardoned_by")?.map(Actor::from_column),
        reverses_case_id: from_db_opt(row.reverses_case_id, "reverses_case_id")?,
    })
}

fn to_role_case(row: RoleCaseRow) -> anyhow::Result<RoleCase> {
    let case = to_case(row.case)?;
    let data = RoleCaseData {
        case_id: case.id,
        role_id: from_db(row.role_id, "role_id")?,
        clean: row.clean,
    };

    Ok(RoleCase { case, data })
}
