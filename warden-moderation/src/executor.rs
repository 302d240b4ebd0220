//! Applies role punishments to members and lifts them again.
//!
//! Apply is a two-phase sequence: the member's roles are edited on the guild,
//! then the case and its bookkeeping are committed locally. A
//! [`PendingRoleAction`] intent is written before the edit and removed by the
//! commit, so a failure between the phases leaves a durable marker that the
//! sweeper compensates.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use warden_database::impls::cases::RoleCaseRecord;
use warden_database::model::cases::{
    ActionType, Actor, Case, CaseId, Expiry, NewCase, RoleCase,
};
use warden_database::model::intents::PendingRoleAction;
use warden_utils::time::now_unix_secs;

use crate::error::{ModerationError, ModerationResult};
use crate::guild::GuildApi;
use crate::hook::{CaseEvent, CaseHook};
use crate::roles::{RoleSplit, plan_apply, plan_reverse, restorable, same_roles};
use crate::store::ModerationStore;

/// A role punishment to apply. `action` must be a role action.
#[derive(Clone, Debug)]
pub struct ApplyRequest {
    pub guild_id: u64,
    pub target_id: u64,
    pub mod_id: u64,
    pub action: ActionType,
    pub role_id: u64,
    pub reason: Option<String>,
    /// Replace the member's unmanaged roles instead of adding to them.
    pub clean: bool,
    /// `None` for a permanent punishment.
    pub duration_seconds: Option<u64>,
}

#[derive(Clone)]
pub struct ActionExecutor {
    guild: Arc<dyn GuildApi>,
    store: Arc<dyn ModerationStore>,
    hook: CaseHook,
}

impl ActionExecutor {
    pub fn new(guild: Arc<dyn GuildApi>, store: Arc<dyn ModerationStore>, hook: CaseHook) -> Self {
        Self { guild, store, hook }
    }

    pub async fn apply(&self, request: ApplyRequest) -> ModerationResult<RoleCase> {
        let case_id = self.store.reserve_case_id().await?;
        self.apply_reserved(case_id, request).await
    }

    /// Apply under a case id drawn earlier with `reserve_case_id`.
    pub async fn apply_reserved(
        &self,
        case_id: CaseId,
        request: ApplyRequest,
    ) -> ModerationResult<RoleCase> {
        if !request.action.is_role_action() {
            return Err(ModerationError::UnsupportedAction(request.action));
        }

        let ApplyRequest {
            guild_id,
            target_id,
            mod_id,
            action,
            role_id,
            reason,
            clean,
            duration_seconds,
        } = request;

        let member = self
            .guild
            .get_member(guild_id, target_id)
            .await?
            .ok_or(ModerationError::MemberNotFound {
                guild_id,
                user_id: target_id,
            })?;
        let guild_roles = self.guild.get_roles(guild_id).await?;
        let plan = plan_apply(&RoleSplit::of(&member.roles, &guild_roles), role_id, clean);
        let now = now_unix_secs();

        self.store
            .insert_intent(&PendingRoleAction {
                case_id,
                guild_id,
                target_id,
                role_id,
                clean,
                prior_roles: member.roles,
                created_at: now,
            })
            .await?;

        if let Err(source) = self
            .guild
            .edit_member_roles(guild_id, target_id, plan.new_roles)
            .await
        {
            if let Err(discard_error) = self.store.discard_intent(case_id).await {
                warn!(case_id, ?discard_error, "failed to discard apply intent");
            }
            return Err(source);
        }

        let record = RoleCaseRecord {
            case_id,
            case: NewCase {
                guild_id,
                target_id,
                mod_id,
                action,
                reason,
                created_at: now,
                expiry: Expiry::starting_at(now, duration_seconds),
                reverses_case_id: None,
            },
            role_id,
            clean,
            undo_roles: plan.undo_roles,
        };

        let role_case = match self.store.record_role_case(record).await {
            Ok(role_case) => role_case,
            Err(source) => {
                error!(
                    case_id,
                    guild_id,
                    target_id,
                    ?source,
                    "member roles changed but the case was not recorded; intent left for reconciliation"
                );
                return Err(ModerationError::InconsistentState { case_id, source });
            }
        };

        info!(
            case_id,
            guild_id,
            target_id,
            action = action.as_str(),
            clean,
            expires_at = role_case.case.expiry.expires_at(),
            "role punishment applied"
        );
        self.hook.emit(CaseEvent::Created {
            case: role_case.case.clone(),
            role: Some(role_case.data),
        });

        Ok(role_case)
    }

    /// Lift a role punishment and record the audit case. Safe to repeat: once
    /// a reversal is on record, later calls return it and change nothing.
    pub async fn reverse(
        &self,
        role_case: &RoleCase,
        actor: Actor,
        reason: Option<String>,
    ) -> ModerationResult<Case> {
        let case = &role_case.case;
        let data = role_case.data;
        let reversal = case
            .action
            .reversal()
            .filter(|_| case.action.is_role_action())
            .ok_or(ModerationError::UnsupportedAction(case.action))?;

        if let Some(audit) = self.store.reversal_of(case.id).await? {
            debug!(case_id = case.id, audit_case_id = audit.id, "case already reversed");
            return Ok(audit);
        }

        match self.guild.get_member(case.guild_id, case.target_id).await? {
            Some(member) => {
                let guild_roles = self.guild.get_roles(case.guild_id).await?;
                let undo_roles = if data.clean {
                    restorable(&self.store.undo_roles(case.id).await?, &guild_roles)
                } else {
                    Vec::new()
                };

                let split = RoleSplit::of(&member.roles, &guild_roles);
                let new_roles = plan_reverse(&split, &undo_roles, data.role_id, data.clean);
                if same_roles(&new_roles, &member.roles) {
                    debug!(case_id = case.id, "roles already lifted");
                } else {
                    self.guild
                        .edit_member_roles(case.guild_id, case.target_id, new_roles)
                        .await?;
                }
            }
            None => {
                info!(
                    case_id = case.id,
                    target_id = case.target_id,
                    "member left the guild; recording reversal without a role edit"
                );
            }
        }

        let recorded = self
            .store
            .record_reversal(
                case.id,
                NewCase {
                    guild_id: case.guild_id,
                    target_id: case.target_id,
                    mod_id: actor.to_column(),
                    action: reversal,
                    reason,
                    created_at: now_unix_secs(),
                    expiry: Expiry::Permanent,
                    reverses_case_id: Some(case.id),
                },
            )
            .await?;
        let Some(audit) = recorded else {
            debug!(case_id = case.id, "reversal recorded concurrently");
            return self
                .store
                .reversal_of(case.id)
                .await?
                .ok_or(ModerationError::CaseNotFound(case.id));
        };

        info!(
            case_id = audit.id,
            original_case_id = case.id,
            guild_id = case.guild_id,
            action = reversal.as_str(),
            "role punishment lifted"
        );
        self.hook.emit(CaseEvent::Reversed {
            original_case_id: case.id,
            case: audit.clone(),
        });

        Ok(audit)
    }
}
