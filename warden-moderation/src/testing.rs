//! In-memory stand-ins for the guild API, the store and guild settings.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use warden_database::impls::cases::RoleCaseRecord;
use warden_database::model::automod::TriggerCounter;
use warden_database::model::cases::{
    ActionType, Actor, Case, CaseId, Expiry, NewCase, RoleCase, RoleCaseData,
};
use warden_database::model::intents::PendingRoleAction;
use warden_database::model::settings::GuildSettings;
use warden_database::model::tasks::{Task, TaskId, TaskPayload};

use crate::error::{ModerationError, ModerationResult};
use crate::guild::{GuildApi, GuildInfo, MemberSnapshot, RoleInfo};
use crate::store::{ModerationStore, SettingsSource};

#[derive(Default)]
struct GuildState {
    roles: Vec<RoleInfo>,
    members: HashMap<u64, Vec<u64>>,
    fetches: usize,
    edits: usize,
    fail_reads: bool,
    failing_edits: usize,
    edit_delay: Option<Duration>,
}

/// A single scriptable guild.
pub(crate) struct FakeGuild {
    guild_id: u64,
    owner_id: u64,
    state: Mutex<GuildState>,
}

impl FakeGuild {
    pub(crate) fn new(guild_id: u64, owner_id: u64) -> Self {
        Self {
            guild_id,
            owner_id,
            state: Mutex::new(GuildState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, GuildState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn add_role(&self, id: u64, position: i64, managed: bool) {
        self.state().roles.push(RoleInfo {
            id,
            position,
            managed,
        });
    }

    pub(crate) fn remove_role(&self, id: u64) {
        self.state().roles.retain(|role| role.id != id);
    }

    pub(crate) fn add_member(&self, user_id: u64, roles: &[u64]) {
        self.state().members.insert(user_id, roles.to_vec());
    }

    pub(crate) fn remove_member(&self, user_id: u64) {
        self.state().members.remove(&user_id);
    }

    pub(crate) fn roles_of(&self, user_id: u64) -> Option<Vec<u64>> {
        self.state().members.get(&user_id).cloned()
    }

    /// Reads served so far (guild, role list and member lookups).
    pub(crate) fn fetch_count(&self) -> usize {
        self.state().fetches
    }

    pub(crate) fn edit_count(&self) -> usize {
        self.state().edits
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }

    pub(crate) fn fail_next_edits(&self, count: usize) {
        self.state().failing_edits = count;
    }

    pub(crate) fn delay_edits(&self, delay: Duration) {
        self.state().edit_delay = Some(delay);
    }

    fn read(&self, guild_id: u64) -> ModerationResult<std::sync::MutexGuard<'_, GuildState>> {
        let mut state = self.state();
        if state.fail_reads {
            return Err(ModerationError::ExternalApi("503 Service Unavailable".to_owned()));
        }
        if guild_id != self.guild_id {
            return Err(ModerationError::ExternalApi("404 Unknown Guild".to_owned()));
        }
        state.fetches += 1;
        Ok(state)
    }
}

#[async_trait]
impl GuildApi for FakeGuild {
    async fn get_guild(&self, guild_id: u64) -> ModerationResult<GuildInfo> {
        self.read(guild_id)?;
        Ok(GuildInfo {
            id: self.guild_id,
            owner_id: self.owner_id,
        })
    }

    async fn get_roles(&self, guild_id: u64) -> ModerationResult<Vec<RoleInfo>> {
        Ok(self.read(guild_id)?.roles.clone())
    }

    async fn get_member(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> ModerationResult<Option<MemberSnapshot>> {
        let state = self.read(guild_id)?;
        Ok(state.members.get(&user_id).map(|roles| MemberSnapshot {
            user_id,
            roles: roles.clone(),
        }))
    }

    async fn edit_member_roles(
        &self,
        guild_id: u64,
        user_id: u64,
        roles: Vec<u64>,
    ) -> ModerationResult<()> {
        let delay = self.state().edit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.failing_edits > 0 {
            state.failing_edits -= 1;
            return Err(ModerationError::ExternalApi("500 Internal Server Error".to_owned()));
        }
        if guild_id != self.guild_id || !state.members.contains_key(&user_id) {
            return Err(ModerationError::ExternalApi("404 Unknown Member".to_owned()));
        }

        state.edits += 1;
        state.members.insert(user_id, roles);
        Ok(())
    }
}

#[derive(Default)]
struct StoreState {
    last_case_id: CaseId,
    last_task_id: TaskId,
    cases: BTreeMap<CaseId, Case>,
    role_data: HashMap<CaseId, RoleCaseData>,
    undo_roles: HashMap<CaseId, Vec<u64>>,
    tasks: BTreeMap<TaskId, Task>,
    intents: BTreeMap<CaseId, PendingRoleAction>,
    triggers: BTreeMap<(u64, u64), TriggerCounter>,
    fail_commits: bool,
    failing_tasks: Vec<TaskId>,
}

impl StoreState {
    fn next_case_id(&mut self) -> CaseId {
        self.last_case_id += 1;
        self.last_case_id
    }

    fn insert_case(&mut self, id: CaseId, new_case: NewCase) -> Case {
        let case = Case {
            id,
            guild_id: new_case.guild_id,
            target_id: new_case.target_id,
            mod_id: new_case.mod_id,
            reason: new_case.reason,
            action: new_case.action,
            created_at: new_case.created_at,
            expiry: new_case.expiry,
            pardoned_by: None,
            reverses_case_id: new_case.reverses_case_id,
        };
        self.cases.insert(id, case.clone());
        case
    }

    fn reversal_of(&self, case_id: CaseId) -> Option<Case> {
        self.cases
            .values()
            .find(|case| case.reverses_case_id == Some(case_id))
            .cloned()
    }

    fn insert_task(&mut self, guild_id: u64, run_at: u64, attempts: u32, task_type: &str, payload: Option<TaskPayload>) -> TaskId {
        self.last_task_id += 1;
        let id = self.last_task_id;
        self.tasks.insert(
            id,
            Task {
                id,
                task_type: task_type.to_owned(),
                guild_id,
                run_at,
                attempts,
                payload,
            },
        );
        id
    }

    fn check_commit(&self) -> anyhow::Result<()> {
        if self.fail_commits {
            anyhow::bail!("connection reset by peer");
        }
        Ok(())
    }
}

fn state_for_task(
    store: &MemoryStore,
    task_id: TaskId,
) -> anyhow::Result<std::sync::MutexGuard<'_, StoreState>> {
    let state = store.state();
    if state.failing_tasks.contains(&task_id) {
        anyhow::bail!("connection reset by peer");
    }
    Ok(state)
}

/// [`ModerationStore`] kept in process memory.
#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    /// Make case writes fail like a dropped connection. Intents, tasks and
    /// counters are unaffected.
    pub(crate) fn fail_commits(&self, fail: bool) {
        self.state().fail_commits = fail;
    }

    /// Deleting or rescheduling `task_id` fails.
    pub(crate) fn fail_task_writes(&self, task_id: TaskId) {
        self.state().failing_tasks.push(task_id);
    }

    pub(crate) fn case(&self, case_id: CaseId) -> Option<Case> {
        self.state().cases.get(&case_id).cloned()
    }

    pub(crate) fn cases(&self) -> Vec<Case> {
        self.state().cases.values().cloned().collect()
    }

    pub(crate) fn tasks(&self) -> Vec<Task> {
        self.state().tasks.values().cloned().collect()
    }

    pub(crate) fn intents(&self) -> Vec<PendingRoleAction> {
        self.state().intents.values().cloned().collect()
    }

    pub(crate) fn trigger(&self, guild_id: u64, user_id: u64) -> Option<TriggerCounter> {
        self.state().triggers.get(&(guild_id, user_id)).cloned()
    }

    pub(crate) fn put_trigger(&self, counter: TriggerCounter) {
        self.state()
            .triggers
            .insert((counter.guild_id, counter.user_id), counter);
    }

    pub(crate) fn push_task(
        &self,
        guild_id: u64,
        run_at: u64,
        attempts: u32,
        task_type: &str,
        payload: Option<TaskPayload>,
    ) -> TaskId {
        self.state()
            .insert_task(guild_id, run_at, attempts, task_type, payload)
    }

    /// Insert a warn case created at `created_at`.
    pub(crate) fn push_warn(&self, guild_id: u64, target_id: u64, created_at: u64) -> CaseId {
        let mut state = self.state();
        let id = state.next_case_id();
        state.insert_case(
            id,
            NewCase {
                guild_id,
                target_id,
                mod_id: 1,
                action: ActionType::Warn,
                reason: None,
                created_at,
                expiry: Expiry::Permanent,
                reverses_case_id: None,
            },
        );
        id
    }
}

#[async_trait]
impl ModerationStore for MemoryStore {
    async fn reserve_case_id(&self) -> anyhow::Result<CaseId> {
        Ok(self.state().next_case_id())
    }

    async fn record_case(&self, new_case: NewCase) -> anyhow::Result<Case> {
        let mut state = self.state();
        state.check_commit()?;
        let id = state.next_case_id();
        Ok(state.insert_case(id, new_case))
    }

    async fn record_role_case(&self, record: RoleCaseRecord) -> anyhow::Result<RoleCase> {
        let mut state = self.state();
        state.check_commit()?;

        let case = state.insert_case(record.case_id, record.case);
        let data = RoleCaseData {
            case_id: case.id,
            role_id: record.role_id,
            clean: record.clean,
        };
        state.role_data.insert(case.id, data);
        if let Some(expires_at) = case.expiry.expires_at() {
            let payload = TaskPayload::UndoRoleCase { case_id: case.id };
            let task_type = payload.task_type();
            state.insert_task(case.guild_id, expires_at, 0, task_type, Some(payload));
        }
        state.undo_roles.insert(case.id, record.undo_roles);
        state.intents.remove(&case.id);

        Ok(RoleCase { case, data })
    }

    async fn record_reversal(
        &self,
        original_case_id: CaseId,
        new_case: NewCase,
    ) -> anyhow::Result<Option<Case>> {
        let mut state = self.state();
        state.check_commit()?;
        state.tasks.retain(|_, task| {
            task.payload != Some(TaskPayload::UndoRoleCase {
                case_id: original_case_id,
            })
        });
        if state.reversal_of(original_case_id).is_some() {
            return Ok(None);
        }
        let id = state.next_case_id();
        Ok(Some(state.insert_case(id, new_case)))
    }

    async fn reversal_of(&self, case_id: CaseId) -> anyhow::Result<Option<Case>> {
        Ok(self.state().reversal_of(case_id))
    }

    async fn role_case(&self, case_id: CaseId) -> anyhow::Result<Option<RoleCase>> {
        let state = self.state();
        let role_case = state.cases.get(&case_id).and_then(|case| {
            state.role_data.get(&case_id).map(|data| RoleCase {
                case: case.clone(),
                data: *data,
            })
        });
        Ok(role_case)
    }

    async fn case_exists(&self, case_id: CaseId) -> anyhow::Result<bool> {
        Ok(self.state().cases.contains_key(&case_id))
    }

    async fn undo_roles(&self, case_id: CaseId) -> anyhow::Result<Vec<u64>> {
        Ok(self
            .state()
            .undo_roles
            .get(&case_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn pardon_case(
        &self,
        guild_id: u64,
        case_id: CaseId,
        actor: Actor,
    ) -> anyhow::Result<Option<Case>> {
        let mut state = self.state();
        state.check_commit()?;
        let Some(case) = state.cases.get_mut(&case_id) else {
            return Ok(None);
        };
        if case.guild_id != guild_id || case.pardoned_by.is_some() {
            return Ok(None);
        }
        case.pardoned_by = Some(actor);
        Ok(Some(case.clone()))
    }

    async fn unpardoned_warns(&self) -> anyhow::Result<Vec<Case>> {
        Ok(self
            .state()
            .cases
            .values()
            .filter(|case| case.action == ActionType::Warn && case.pardoned_by.is_none())
            .cloned()
            .collect())
    }

    async fn insert_intent(&self, intent: &PendingRoleAction) -> anyhow::Result<()> {
        self.state().intents.insert(intent.case_id, intent.clone());
        Ok(())
    }

    async fn discard_intent(&self, case_id: CaseId) -> anyhow::Result<()> {
        self.state().intents.remove(&case_id);
        Ok(())
    }

    async fn stale_intents(&self, cutoff: u64) -> anyhow::Result<Vec<PendingRoleAction>> {
        Ok(self
            .state()
            .intents
            .values()
            .filter(|intent| intent.created_at <= cutoff)
            .cloned()
            .collect())
    }

    async fn claim_due_tasks(
        &self,
        now: u64,
        lease_seconds: u64,
        limit: u32,
    ) -> anyhow::Result<Vec<Task>> {
        let mut state = self.state();
        let mut due: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| task.run_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|task| (task.run_at, task.id));
        due.truncate(limit as usize);

        for task in &due {
            if let Some(stored) = state.tasks.get_mut(&task.id) {
                stored.run_at = now.saturating_add(lease_seconds);
            }
        }
        Ok(due)
    }

    async fn delete_task(&self, task_id: TaskId) -> anyhow::Result<()> {
        let mut state = state_for_task(self, task_id)?;
        state.tasks.remove(&task_id);
        Ok(())
    }

    async fn reschedule_task(
        &self,
        task_id: TaskId,
        attempts: u32,
        run_at: u64,
    ) -> anyhow::Result<()> {
        if let Some(task) = state_for_task(self, task_id)?.tasks.get_mut(&task_id) {
            task.attempts = attempts;
            task.run_at = run_at;
        }
        Ok(())
    }

    async fn record_trigger(&self, guild_id: u64, user_id: u64, now: u64) -> anyhow::Result<i32> {
        let mut state = self.state();
        let counter = state
            .triggers
            .entry((guild_id, user_id))
            .or_insert(TriggerCounter {
                guild_id,
                user_id,
                count: 0,
                updated_at: now,
            });
        counter.count += 1;
        counter.updated_at = now;
        Ok(counter.count)
    }

    async fn list_triggers(&self) -> anyhow::Result<Vec<TriggerCounter>> {
        Ok(self.state().triggers.values().cloned().collect())
    }

    async fn decay_trigger(&self, counter: &TriggerCounter, now: u64) -> anyhow::Result<bool> {
        let mut state = self.state();
        match state.triggers.get_mut(&(counter.guild_id, counter.user_id)) {
            Some(stored) if stored.updated_at == counter.updated_at => {
                stored.count -= 1;
                stored.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_trigger(&self, counter: &TriggerCounter) -> anyhow::Result<bool> {
        let mut state = self.state();
        let key = (counter.guild_id, counter.user_id);
        match state.triggers.get(&key) {
            Some(stored) if stored.updated_at == counter.updated_at => {
                state.triggers.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Fixed settings per guild; unknown guilds are unconfigured.
#[derive(Default)]
pub(crate) struct StaticSettings {
    guilds: HashMap<u64, GuildSettings>,
    broken: Vec<u64>,
}

impl StaticSettings {
    pub(crate) fn with(mut self, settings: GuildSettings) -> Self {
        self.guilds.insert(settings.guild_id, settings);
        self
    }

    /// Loading settings for `guild_id` fails like an unreachable database.
    pub(crate) fn broken(mut self, guild_id: u64) -> Self {
        self.broken.push(guild_id);
        self
    }
}

#[async_trait]
impl SettingsSource for StaticSettings {
    async fn guild_settings(&self, guild_id: u64) -> anyhow::Result<GuildSettings> {
        if self.broken.contains(&guild_id) {
            anyhow::bail!("settings for guild {guild_id} unavailable");
        }
        Ok(self
            .guilds
            .get(&guild_id)
            .cloned()
            .unwrap_or_else(|| GuildSettings::unconfigured(guild_id)))
    }
}
