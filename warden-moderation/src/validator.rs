//! Role-hierarchy checks deciding whether a moderator may act on a target.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use tokio::sync::OnceCell;

use crate::error::ModerationResult;
use crate::guild::{GuildApi, GuildInfo, MemberSnapshot, RoleInfo};
use crate::roles::highest_position;

/// Why an action was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    TargetIsModerator,
    TargetIsOwner,
    SelfTarget,
    InsufficientRank,
    ModeratorNotMember,
}

impl Rejection {
    pub fn reason(self) -> &'static str {
        match self {
            Self::TargetIsModerator => "target is a moderator",
            Self::TargetIsOwner => "target is the owner",
            Self::SelfTarget => "cannot act on yourself",
            Self::InsufficientRank => "target has equal or higher role",
            Self::ModeratorNotMember => "moderator is not a member of this guild",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Actionable,
    NotActionable(Rejection),
}

impl Verdict {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Actionable)
    }

    pub fn into_result(self) -> Result<(), Rejection> {
        match self {
            Self::Actionable => Ok(()),
            Self::NotActionable(rejection) => Err(rejection),
        }
    }
}

/// One validation pass over a guild. Guild, role list and resolved members are
/// fetched at most once per session.
pub struct ValidationSession<'a> {
    api: &'a dyn GuildApi,
    guild_id: u64,
    mod_role_ids: Vec<u64>,
    guild: OnceCell<GuildInfo>,
    roles: OnceCell<Vec<RoleInfo>>,
    members: Mutex<HashMap<u64, Option<MemberSnapshot>>>,
}

impl<'a> ValidationSession<'a> {
    pub fn new(api: &'a dyn GuildApi, guild_id: u64, mod_role_ids: Vec<u64>) -> Self {
        Self {
            api,
            guild_id,
            mod_role_ids,
            guild: OnceCell::new(),
            roles: OnceCell::new(),
            members: Mutex::new(HashMap::new()),
        }
    }

    pub async fn guild(&self) -> ModerationResult<&GuildInfo> {
        self.guild
            .get_or_try_init(|| self.api.get_guild(self.guild_id))
            .await
    }

    pub async fn roles(&self) -> ModerationResult<&[RoleInfo]> {
        let roles = self
            .roles
            .get_or_try_init(|| self.api.get_roles(self.guild_id))
            .await?;
        Ok(roles.as_slice())
    }

    /// Resolve a user to a guild member; `None` when gone or not a member.
    pub async fn member(&self, user_id: u64) -> ModerationResult<Option<MemberSnapshot>> {
        if let Some(cached) = self.cached_member(user_id) {
            return Ok(cached);
        }

        let member = self.api.get_member(self.guild_id, user_id).await?;
        if let Ok(mut members) = self.members.lock() {
            members.insert(user_id, member.clone());
        }
        Ok(member)
    }

    pub async fn target_is_actionable(
        &self,
        moderator: &MemberSnapshot,
        target_id: u64,
    ) -> ModerationResult<Verdict> {
        let Some(target) = self.member(target_id).await? else {
            return Ok(Verdict::Actionable);
        };

        let guild = self.guild().await?;
        if moderator.user_id == guild.owner_id {
            return Ok(Verdict::Actionable);
        }

        if target
            .roles
            .iter()
            .any(|role_id| self.mod_role_ids.contains(role_id))
        {
            return Ok(Verdict::NotActionable(Rejection::TargetIsModerator));
        }

        if target.user_id == guild.owner_id {
            return Ok(Verdict::NotActionable(Rejection::TargetIsOwner));
        }

        if moderator.user_id == target.user_id {
            return Ok(Verdict::NotActionable(Rejection::SelfTarget));
        }

        let roles = self.roles().await?;
        if highest_position(&moderator.roles, roles) > highest_position(&target.roles, roles) {
            Ok(Verdict::Actionable)
        } else {
            Ok(Verdict::NotActionable(Rejection::InsufficientRank))
        }
    }

    fn cached_member(&self, user_id: u64) -> Option<Option<MemberSnapshot>> {
        self.members
            .lock()
            .ok()
            .and_then(|members| members.get(&user_id).cloned())
    }
}
