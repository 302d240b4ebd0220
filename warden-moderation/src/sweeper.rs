//! Periodic maintenance over stored moderation state.
//!
//! Each sweep runs three independent passes: auto-pardon of old warnings,
//! leaky-bucket decay of automod trigger counters, and reconciliation of apply
//! intents whose case never got recorded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use warden_database::model::automod::TriggerCounter;
use warden_database::model::cases::{ActionType, Actor, Case};
use warden_database::model::intents::PendingRoleAction;
use warden_database::model::settings::GuildSettings;
use warden_utils::time::{SECONDS_PER_DAY, elapsed_secs, now_unix_secs};

use crate::error::ModerationResult;
use crate::guild::GuildApi;
use crate::hook::{CaseEvent, CaseHook};
use crate::roles::{RoleSplit, plan_compensation, restorable, same_roles};
use crate::store::{ModerationStore, SettingsSource};

/// Apply intents older than this are treated as abandoned.
pub const INTENT_STALE_AFTER: Duration = Duration::from_secs(10 * 60);

pub fn should_auto_pardon(case: &Case, settings: &GuildSettings, now: u64) -> bool {
    if case.action != ActionType::Warn || case.pardoned_by.is_some() {
        return false;
    }

    match settings.auto_pardon_warns_after_days {
        Some(days) if days > 0 => {
            elapsed_secs(case.created_at, now) >= u64::from(days) * SECONDS_PER_DAY
        }
        _ => false,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecayStep {
    Keep,
    Decrement,
    Delete,
}

pub fn decay_step(counter: &TriggerCounter, cooldown_seconds: Option<u64>, now: u64) -> DecayStep {
    let Some(cooldown_seconds) = cooldown_seconds else {
        return DecayStep::Delete;
    };

    if counter.count <= 0 {
        return DecayStep::Delete;
    }
    if elapsed_secs(counter.updated_at, now) < cooldown_seconds {
        return DecayStep::Keep;
    }
    if counter.count - 1 <= 0 {
        DecayStep::Delete
    } else {
        DecayStep::Decrement
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pardoned: usize,
    pub decayed: usize,
    pub deleted_triggers: usize,
    pub reconciled_intents: usize,
}

pub struct Sweeper {
    guild: Arc<dyn GuildApi>,
    store: Arc<dyn ModerationStore>,
    settings: Arc<dyn SettingsSource>,
    hook: CaseHook,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        guild: Arc<dyn GuildApi>,
        store: Arc<dyn ModerationStore>,
        settings: Arc<dyn SettingsSource>,
        hook: CaseHook,
        interval: Duration,
    ) -> Self {
        Self {
            guild,
            store,
            settings,
            hook,
            interval,
        }
    }

    /// Run every pass once. A failing pass is logged and does not stop the others.
    pub async fn sweep_once(&self, now: u64) -> SweepReport {
        let mut report = SweepReport::default();

        match self.auto_pardon(now).await {
            Ok(pardoned) => report.pardoned = pardoned,
            Err(source) => error!(?source, "auto-pardon pass failed"),
        }

        match self.decay_triggers(now).await {
            Ok((decayed, deleted)) => {
                report.decayed = decayed;
                report.deleted_triggers = deleted;
            }
            Err(source) => error!(?source, "trigger decay pass failed"),
        }

        match self.reconcile_intents(now).await {
            Ok(reconciled) => report.reconciled_intents = reconciled,
            Err(source) => error!(?source, "intent reconciliation pass failed"),
        }

        debug!(?report, "sweep finished");
        report
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "sweeper started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep_once(now_unix_secs()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("sweeper stopped");
    }

    async fn auto_pardon(&self, now: u64) -> ModerationResult<usize> {
        let mut settings_by_guild = HashMap::new();
        let mut pardoned = 0;

        for case in self.store.unpardoned_warns().await? {
            let eligible = self
                .settings_for(&mut settings_by_guild, case.guild_id)
                .await
                .is_some_and(|settings| should_auto_pardon(&case, &settings, now));
            if !eligible {
                continue;
            }

            if let Some(case) = self
                .store
                .pardon_case(case.guild_id, case.id, Actor::System)
                .await?
            {
                info!(case_id = case.id, guild_id = case.guild_id, "warning auto-pardoned");
                self.hook.emit(CaseEvent::Pardoned { case });
                pardoned += 1;
            }
        }

        Ok(pardoned)
    }

    async fn decay_triggers(&self, now: u64) -> ModerationResult<(usize, usize)> {
        let mut settings_by_guild = HashMap::new();
        let (mut decayed, mut deleted) = (0, 0);

        for counter in self.store.list_triggers().await? {
            let Some(settings) = self
                .settings_for(&mut settings_by_guild, counter.guild_id)
                .await
            else {
                continue;
            };

            match decay_step(&counter, settings.automod_cooldown_seconds, now) {
                DecayStep::Keep => {}
                DecayStep::Decrement => {
                    if self.store.decay_trigger(&counter, now).await? {
                        decayed += 1;
                    }
                }
                DecayStep::Delete => {
                    if self.store.delete_trigger(&counter).await? {
                        deleted += 1;
                    }
                }
            }
        }

        Ok((decayed, deleted))
    }

    /// Settings for one guild, loaded once per pass. `None` when loading
    /// failed; that guild is skipped until the next sweep.
    async fn settings_for(
        &self,
        loaded: &mut HashMap<u64, Option<GuildSettings>>,
        guild_id: u64,
    ) -> Option<GuildSettings> {
        if let Some(settings) = loaded.get(&guild_id) {
            return settings.clone();
        }

        let settings = match self.settings.guild_settings(guild_id).await {
            Ok(settings) => Some(settings),
            Err(source) => {
                warn!(guild_id, ?source, "failed to load guild settings; skipping guild this sweep");
                None
            }
        };
        loaded.insert(guild_id, settings.clone());
        settings
    }

    async fn reconcile_intents(&self, now: u64) -> ModerationResult<usize> {
        let cutoff = now.saturating_sub(INTENT_STALE_AFTER.as_secs());
        let mut reconciled = 0;

        for intent in self.store.stale_intents(cutoff).await? {
            if self.store.case_exists(intent.case_id).await? {
                self.store.discard_intent(intent.case_id).await?;
                continue;
            }

            match self.compensate(&intent).await {
                Ok(()) => {
                    warn!(
                        case_id = intent.case_id,
                        guild_id = intent.guild_id,
                        target_id = intent.target_id,
                        "rolled back role punishment that was never recorded"
                    );
                    self.store.discard_intent(intent.case_id).await?;
                    reconciled += 1;
                }
                Err(error) => {
                    warn!(
                        case_id = intent.case_id,
                        guild_id = intent.guild_id,
                        target_id = intent.target_id,
                        %error,
                        "could not roll back unrecorded role punishment; will retry"
                    );
                }
            }
        }

        Ok(reconciled)
    }

    async fn compensate(&self, intent: &PendingRoleAction) -> ModerationResult<()> {
        let Some(member) = self
            .guild
            .get_member(intent.guild_id, intent.target_id)
            .await?
        else {
            return Ok(());
        };

        let guild_roles = self.guild.get_roles(intent.guild_id).await?;
        let prior = restorable(&intent.prior_roles, &guild_roles);
        let split = RoleSplit::of(&member.roles, &guild_roles);
        let new_roles = plan_compensation(&split, &prior, intent.role_id);
        if !same_roles(&new_roles, &member.roles) {
            self.guild
                .edit_member_roles(intent.guild_id, intent.target_id, new_roles)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use warden_database::model::automod::TriggerCounter;
    use warden_database::model::cases::{Actor, Case, ActionType, Expiry};
    use warden_database::model::settings::GuildSettings;
    use warden_utils::time::SECONDS_PER_DAY;

    use super::{DecayStep, INTENT_STALE_AFTER, Sweeper, decay_step, should_auto_pardon};
    use crate::executor::{ActionExecutor, ApplyRequest};
    use crate::hook::{CaseEvent, CaseHook};
    use crate::roles::same_roles;
    use crate::testing::{FakeGuild, MemoryStore, StaticSettings};

    const GUILD: u64 = 1;
    const OTHER_GUILD: u64 = 2;
    const NOW: u64 = 100 * SECONDS_PER_DAY;

    fn settings() -> GuildSettings {
        GuildSettings {
            guild_id: GUILD,
            auto_pardon_warns_after_days: Some(7),
            automod_cooldown_seconds: Some(600),
            mod_role_ids: Vec::new(),
        }
    }

    fn warn_case(created_at: u64) -> Case {
        Case {
            id: 1,
            guild_id: GUILD,
            target_id: 30,
            mod_id: 20,
            reason: None,
            action: ActionType::Warn,
            created_at,
            expiry: Expiry::Permanent,
            pardoned_by: None,
            reverses_case_id: None,
        }
    }

    fn counter(count: i32, updated_at: u64) -> TriggerCounter {
        TriggerCounter {
            guild_id: GUILD,
            user_id: 30,
            count,
            updated_at,
        }
    }

    fn sweeper(guild: Arc<FakeGuild>, store: &Arc<MemoryStore>, hook: CaseHook) -> Sweeper {
        let settings = StaticSettings::default().with(settings());
        Sweeper::new(
            guild,
            store.clone(),
            Arc::new(settings),
            hook,
            Duration::from_secs(300),
        )
    }

    #[test]
    fn pardon_window_is_inclusive() {
        let settings = settings();
        let window = 7 * SECONDS_PER_DAY;
        assert!(should_auto_pardon(&warn_case(NOW - window), &settings, NOW));
        assert!(!should_auto_pardon(&warn_case(NOW - window + 1), &settings, NOW));

        let mut pardoned = warn_case(0);
        pardoned.pardoned_by = Some(Actor::User(20));
        assert!(!should_auto_pardon(&pardoned, &settings, NOW));

        let mut mute = warn_case(0);
        mute.action = ActionType::Mute;
        assert!(!should_auto_pardon(&mute, &settings, NOW));

        let unconfigured = GuildSettings::unconfigured(GUILD);
        assert!(!should_auto_pardon(&warn_case(0), &unconfigured, NOW));
    }

    #[test]
    fn decay_steps() {
        assert_eq!(decay_step(&counter(3, NOW - 599), Some(600), NOW), DecayStep::Keep);
        assert_eq!(decay_step(&counter(3, NOW - 600), Some(600), NOW), DecayStep::Decrement);
        assert_eq!(decay_step(&counter(1, NOW - 600), Some(600), NOW), DecayStep::Delete);
        assert_eq!(decay_step(&counter(5, NOW), None, NOW), DecayStep::Delete);
    }

    #[tokio::test]
    async fn old_warnings_are_pardoned_by_the_system() {
        let store = Arc::new(MemoryStore::default());
        let old = store.push_warn(GUILD, 30, NOW - 8 * SECONDS_PER_DAY);
        let young = store.push_warn(GUILD, 30, NOW - 2 * SECONDS_PER_DAY);
        let unconfigured = store.push_warn(OTHER_GUILD, 30, 0);
        let hook = CaseHook::default();
        let mut events = hook.subscribe();

        let report = sweeper(Arc::new(FakeGuild::new(GUILD, 10)), &store, hook)
            .sweep_once(NOW)
            .await;

        assert_eq!(report.pardoned, 1);
        assert_eq!(store.case(old).unwrap().pardoned_by, Some(Actor::System));
        assert_eq!(store.case(young).unwrap().pardoned_by, None);
        assert_eq!(store.case(unconfigured).unwrap().pardoned_by, None);
        assert!(matches!(
            events.recv().await.unwrap(),
            CaseEvent::Pardoned { case } if case.id == old
        ));
    }

    #[tokio::test]
    async fn unreadable_settings_skip_only_that_guild() {
        let store = Arc::new(MemoryStore::default());
        let stuck = store.push_warn(GUILD, 30, 0);
        let old = store.push_warn(OTHER_GUILD, 30, NOW - 8 * SECONDS_PER_DAY);
        store.put_trigger(counter(2, NOW - 600));
        store.put_trigger(TriggerCounter {
            guild_id: OTHER_GUILD,
            ..counter(2, NOW - 600)
        });
        let settings = StaticSettings::default()
            .with(GuildSettings {
                guild_id: OTHER_GUILD,
                ..settings()
            })
            .broken(GUILD);
        let sweeper = Sweeper::new(
            Arc::new(FakeGuild::new(GUILD, 10)),
            store.clone(),
            Arc::new(settings),
            CaseHook::default(),
            Duration::from_secs(300),
        );

        let report = sweeper.sweep_once(NOW).await;

        assert_eq!(report.pardoned, 1);
        assert_eq!(report.decayed, 1);
        assert_eq!(store.case(stuck).unwrap().pardoned_by, None);
        assert_eq!(store.case(old).unwrap().pardoned_by, Some(Actor::System));
        assert_eq!(store.trigger(GUILD, 30), Some(counter(2, NOW - 600)));
        assert_eq!(store.trigger(OTHER_GUILD, 30).map(|c| c.count), Some(1));
    }

    #[tokio::test]
    async fn trigger_counters_leak_one_step_per_cooldown() {
        let store = Arc::new(MemoryStore::default());
        store.put_trigger(counter(2, NOW - 600));
        store.put_trigger(TriggerCounter {
            guild_id: OTHER_GUILD,
            ..counter(4, NOW)
        });
        let sweeper = sweeper(Arc::new(FakeGuild::new(GUILD, 10)), &store, CaseHook::default());

        let report = sweeper.sweep_once(NOW).await;
        assert_eq!((report.decayed, report.deleted_triggers), (1, 1));
        assert_eq!(store.trigger(GUILD, 30), Some(counter(1, NOW)));
        assert_eq!(store.trigger(OTHER_GUILD, 30), None);

        // The decrement restarted the cooldown.
        assert_eq!(sweeper.sweep_once(NOW + 599).await.deleted_triggers, 0);
        assert_eq!(sweeper.sweep_once(NOW + 600).await.deleted_triggers, 1);
        assert_eq!(store.trigger(GUILD, 30), None);
    }

    #[tokio::test]
    async fn unrecorded_apply_is_rolled_back_once_stale() {
        let guild = FakeGuild::new(GUILD, 10);
        guild.add_role(101, 5, false);
        guild.add_role(102, 4, true);
        guild.add_role(900, 1, false);
        guild.add_member(30, &[101, 102]);
        let guild = Arc::new(guild);
        let store = Arc::new(MemoryStore::default());

        store.fail_commits(true);
        let executor = ActionExecutor::new(guild.clone(), store.clone(), CaseHook::default());
        let result = executor
            .apply(ApplyRequest {
                guild_id: GUILD,
                target_id: 30,
                mod_id: 20,
                action: ActionType::Mute,
                role_id: 900,
                reason: None,
                clean: true,
                duration_seconds: None,
            })
            .await;
        assert!(result.is_err());
        assert_eq!(guild.roles_of(30), Some(vec![102, 900]));

        let created_at = store.intents()[0].created_at;
        let sweeper = sweeper(guild.clone(), &store, CaseHook::default());

        let fresh = sweeper.sweep_once(created_at + 1).await;
        assert_eq!(fresh.reconciled_intents, 0);

        let stale = sweeper
            .sweep_once(created_at + INTENT_STALE_AFTER.as_secs())
            .await;
        assert_eq!(stale.reconciled_intents, 1);
        assert!(same_roles(&guild.roles_of(30).unwrap(), &[101, 102]));
        assert!(store.intents().is_empty());
    }

    #[tokio::test]
    async fn failed_rollback_keeps_the_intent() {
        let guild = FakeGuild::new(GUILD, 10);
        guild.add_role(900, 1, false);
        guild.add_member(30, &[]);
        let guild = Arc::new(guild);
        let store = Arc::new(MemoryStore::default());

        store.fail_commits(true);
        let executor = ActionExecutor::new(guild.clone(), store.clone(), CaseHook::default());
        let request = ApplyRequest {
            guild_id: GUILD,
            target_id: 30,
            mod_id: 20,
            action: ActionType::Restrict,
            role_id: 900,
            reason: None,
            clean: false,
            duration_seconds: Some(60),
        };
        assert!(executor.apply(request).await.is_err());

        guild.fail_next_edits(1);
        let created_at = store.intents()[0].created_at;
        let report = sweeper(guild.clone(), &store, CaseHook::default())
            .sweep_once(created_at + INTENT_STALE_AFTER.as_secs())
            .await;

        assert_eq!(report.reconciled_intents, 0);
        assert_eq!(store.intents().len(), 1);
        assert_eq!(guild.roles_of(30), Some(vec![900]));
    }
}
