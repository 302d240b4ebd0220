//! Persistence seams consumed by the engine, implemented over [`Database`].

use async_trait::async_trait;

use warden_database::Database;
use warden_database::impls::{automod, cases, intents, settings, tasks};
use warden_database::impls::cases::RoleCaseRecord;
use warden_database::model::automod::TriggerCounter;
use warden_database::model::cases::{Actor, Case, CaseId, NewCase, RoleCase};
use warden_database::model::intents::PendingRoleAction;
use warden_database::model::settings::GuildSettings;
use warden_database::model::tasks::{Task, TaskId};

#[async_trait]
pub trait ModerationStore: Send + Sync {
    async fn reserve_case_id(&self) -> anyhow::Result<CaseId>;

    async fn record_case(&self, new_case: NewCase) -> anyhow::Result<Case>;

    /// Case, role detail, expiry task and undo roles, atomically. Clears the
    /// apply intent for the same case id.
    async fn record_role_case(&self, record: RoleCaseRecord) -> anyhow::Result<RoleCase>;

    /// Audit case for a lift, atomically with deleting tasks for the original.
    /// `None` when the original was already reversed.
    async fn record_reversal(
        &self,
        original_case_id: CaseId,
        new_case: NewCase,
    ) -> anyhow::Result<Option<Case>>;

    async fn reversal_of(&self, case_id: CaseId) -> anyhow::Result<Option<Case>>;

    async fn role_case(&self, case_id: CaseId) -> anyhow::Result<Option<RoleCase>>;

    async fn case_exists(&self, case_id: CaseId) -> anyhow::Result<bool>;

    async fn undo_roles(&self, case_id: CaseId) -> anyhow::Result<Vec<u64>>;

    /// `None` when the case is missing, belongs to another guild, or is already pardoned.
    async fn pardon_case(
        &self,
        guild_id: u64,
        case_id: CaseId,
        actor: Actor,
    ) -> anyhow::Result<Option<Case>>;

    async fn unpardoned_warns(&self) -> anyhow::Result<Vec<Case>>;

    async fn insert_intent(&self, intent: &PendingRoleAction) -> anyhow::Result<()>;

    async fn discard_intent(&self, case_id: CaseId) -> anyhow::Result<()>;

    async fn stale_intents(&self, cutoff: u64) -> anyhow::Result<Vec<PendingRoleAction>>;

    async fn claim_due_tasks(
        &self,
        now: u64,
        lease_seconds: u64,
        limit: u32,
    ) -> anyhow::Result<Vec<Task>>;

    async fn delete_task(&self, task_id: TaskId) -> anyhow::Result<()>;

    async fn reschedule_task(&self, task_id: TaskId, attempts: u32, run_at: u64)
    -> anyhow::Result<()>;

    async fn record_trigger(&self, guild_id: u64, user_id: u64, now: u64) -> anyhow::Result<i32>;

    async fn list_triggers(&self) -> anyhow::Result<Vec<TriggerCounter>>;

    /// Guarded on `counter.updated_at`; `false` when the row moved on.
    async fn decay_trigger(&self, counter: &TriggerCounter, now: u64) -> anyhow::Result<bool>;

    async fn delete_trigger(&self, counter: &TriggerCounter) -> anyhow::Result<bool>;
}

/// Per-guild settings lookup.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn guild_settings(&self, guild_id: u64) -> anyhow::Result<GuildSettings>;
}

#[async_trait]
impl ModerationStore for Database {
    async fn reserve_case_id(&self) -> anyhow::Result<CaseId> {
        cases::reserve_case_id(self).await
    }

    async fn record_case(&self, new_case: NewCase) -> anyhow::Result<Case> {
        cases::record_case(self, new_case).await
    }

    async fn record_role_case(&self, record: RoleCaseRecord) -> anyhow::Result<RoleCase> {
        cases::record_role_case(self, record).await
    }

    async fn record_reversal(
        &self,
        original_case_id: CaseId,
        new_case: NewCase,
    ) -> anyhow::Result<Option<Case>> {
        cases::record_reversal(self, original_case_id, new_case).await
    }

    async fn reversal_of(&self, case_id: CaseId) -> anyhow::Result<Option<Case>> {
        cases::reversal_of(self, case_id).await
    }

    async fn role_case(&self, case_id: CaseId) -> anyhow::Result<Option<RoleCase>> {
        cases::get_role_case(self, case_id).await
    }

    async fn case_exists(&self, case_id: CaseId) -> anyhow::Result<bool> {
        cases::case_exists(self, case_id).await
    }

    async fn undo_roles(&self, case_id: CaseId) -> anyhow::Result<Vec<u64>> {
        cases::undo_roles_for_case(self, case_id).await
    }

    async fn pardon_case(
        &self,
        guild_id: u64,
        case_id: CaseId,
        actor: Actor,
    ) -> anyhow::Result<Option<Case>> {
        cases::pardon_case(self, guild_id, case_id, actor).await
    }

    async fn unpardoned_warns(&self) -> anyhow::Result<Vec<Case>> {
        cases::unpardoned_warns(self).await
    }

    async fn insert_intent(&self, intent: &PendingRoleAction) -> anyhow::Result<()> {
        intents::insert_intent(self, intent).await
    }

    async fn discard_intent(&self, case_id: CaseId) -> anyhow::Result<()> {
        intents::discard_intent(self, case_id).await
    }

    async fn stale_intents(&self, cutoff: u64) -> anyhow::Result<Vec<PendingRoleAction>> {
        intents::stale_intents(self, cutoff).await
    }

    async fn claim_due_tasks(
        &self,
        now: u64,
        lease_seconds: u64,
        limit: u32,
    ) -> anyhow::Result<Vec<Task>> {
        tasks::claim_due_tasks(self, now, lease_seconds, limit).await
    }

    async fn delete_task(&self, task_id: TaskId) -> anyhow::Result<()> {
        tasks::delete_task(self, task_id).await
    }

    async fn reschedule_task(
        &self,
        task_id: TaskId,
        attempts: u32,
        run_at: u64,
    ) -> anyhow::Result<()> {
        tasks::reschedule_task(self, task_id, attempts, run_at).await
    }

    async fn record_trigger(&self, guild_id: u64, user_id: u64, now: u64) -> anyhow::Result<i32> {
        automod::record_trigger(self, guild_id, user_id, now).await
    }

    async fn list_triggers(&self) -> anyhow::Result<Vec<TriggerCounter>> {
        automod::list_triggers(self).await
    }

    async fn decay_trigger(&self, counter: &TriggerCounter, now: u64) -> anyhow::Result<bool> {
        automod::decay_trigger(self, counter, now).await
    }

    async fn delete_trigger(&self, counter: &TriggerCounter) -> anyhow::Result<bool> {
        automod::delete_trigger(self, counter).await
    }
}

#[async_trait]
impl SettingsSource for Database {
    async fn guild_settings(&self, guild_id: u64) -> anyhow::Result<GuildSettings> {
        settings::get_guild_settings(self, guild_id).await
    }
}
