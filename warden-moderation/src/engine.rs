use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use warden_database::CacheService;
use warden_database::model::cases::{Actor, Case, CaseId, NewCase, RoleCase};
use warden_utils::time::now_unix_secs;

use crate::error::{ModerationError, ModerationResult};
use crate::executor::{ActionExecutor, ApplyRequest};
use crate::guild::GuildApi;
use crate::hook::{CaseEvent, CaseHook};
use crate::lock::LockManager;
use crate::store::{ModerationStore, SettingsSource};
use crate::validator::{Rejection, ValidationSession, Verdict};

/// Entry point for callers that turn moderator input into actions.
#[derive(Clone)]
pub struct ModerationEngine {
    guild: Arc<dyn GuildApi>,
    store: Arc<dyn ModerationStore>,
    settings: Arc<dyn SettingsSource>,
    locks: LockManager,
    executor: ActionExecutor,
    hook: CaseHook,
}

impl ModerationEngine {
    pub fn new(
        guild: Arc<dyn GuildApi>,
        store: Arc<dyn ModerationStore>,
        settings: Arc<dyn SettingsSource>,
        cache: CacheService,
        hook: CaseHook,
    ) -> Self {
        let executor = ActionExecutor::new(guild.clone(), store.clone(), hook.clone());
        Self {
            guild,
            store,
            settings,
            locks: LockManager::new(cache),
            executor,
            hook,
        }
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaseEvent> {
        self.hook.subscribe()
    }

    /// Whether `moderator_id` may act on `target_id` in the guild.
    pub async fn check(
        &self,
        guild_id: u64,
        moderator_id: u64,
        target_id: u64,
    ) -> ModerationResult<Verdict> {
        let settings = self.settings.guild_settings(guild_id).await?;
        let session = ValidationSession::new(self.guild.as_ref(), guild_id, settings.mod_role_ids);

        let Some(moderator) = session.member(moderator_id).await? else {
            return Ok(Verdict::NotActionable(Rejection::ModeratorNotMember));
        };
        session.target_is_actionable(&moderator, target_id).await
    }

    /// Validate, claim the member and apply a role punishment.
    pub async fn punish(&self, request: ApplyRequest) -> ModerationResult<RoleCase> {
        let (guild_id, target_id) = (request.guild_id, request.target_id);

        self.check(guild_id, request.mod_id, target_id)
            .await?
            .into_result()?;

        if let Some(case_id) = self.locks.get_lock(target_id, guild_id).await? {
            warn!(guild_id, target_id, case_id, "action already in flight for member");
            return Err(ModerationError::LockContention { case_id });
        }

        let case_id = self.store.reserve_case_id().await?;
        if !self.locks.try_acquire(case_id, target_id, guild_id).await? {
            let holder = self
                .locks
                .get_lock(target_id, guild_id)
                .await?
                .unwrap_or(case_id);
            warn!(guild_id, target_id, case_id = holder, "lost race for member lock");
            return Err(ModerationError::LockContention { case_id: holder });
        }

        let result = self.executor.apply_reserved(case_id, request).await;
        if result.is_err() {
            if let Err(source) = self.locks.release_if_held(case_id, target_id, guild_id).await {
                warn!(case_id, ?source, "failed to release member lock");
            }
        }
        result
    }

    /// Lift a role punishment before it expires.
    pub async fn lift(
        &self,
        guild_id: u64,
        case_id: CaseId,
        moderator_id: u64,
        reason: Option<String>,
    ) -> ModerationResult<Case> {
        let role_case = self
            .store
            .role_case(case_id)
            .await?
            .filter(|role_case| role_case.case.guild_id == guild_id)
            .ok_or(ModerationError::CaseNotFound(case_id))?;

        self.check(guild_id, moderator_id, role_case.case.target_id)
            .await?
            .into_result()?;

        self.executor
            .reverse(&role_case, Actor::User(moderator_id), reason)
            .await
    }

    /// Record a case that changes no roles (warnings, kicks, bans, notes).
    pub async fn record_case(&self, new_case: NewCase) -> ModerationResult<Case> {
        if new_case.action.is_role_action() {
            return Err(ModerationError::UnsupportedAction(new_case.action));
        }

        let case = self.store.record_case(new_case).await?;
        info!(
            case_id = case.id,
            guild_id = case.guild_id,
            action = case.action.as_str(),
            "case recorded"
        );
        self.hook.emit(CaseEvent::Created {
            case: case.clone(),
            role: None,
        });
        Ok(case)
    }

    /// Returns `false` when the case is unknown to the guild or already pardoned.
    pub async fn pardon(&self, guild_id: u64, case_id: CaseId, actor: Actor) -> ModerationResult<bool> {
        let Some(case) = self.store.pardon_case(guild_id, case_id, actor).await? else {
            return Ok(false);
        };

        info!(case_id, guild_id, "case pardoned");
        self.hook.emit(CaseEvent::Pardoned { case });
        Ok(true)
    }

    /// Count one automod violation; returns the member's current count.
    pub async fn record_trigger(&self, guild_id: u64, user_id: u64) -> ModerationResult<i32> {
        let count = self
            .store
            .record_trigger(guild_id, user_id, now_unix_secs())
            .await?;
        Ok(count)
    }
}
