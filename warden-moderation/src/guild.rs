//! The slice of guild state the engine reads and writes on the chat network.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{EditMember, GuildId, Http, RoleId, UserId};

use crate::error::ModerationResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuildInfo {
    pub id: u64,
    pub owner_id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleInfo {
    pub id: u64,
    pub position: i64,
    /// Assigned by an integration; can't be added or removed by hand.
    pub managed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub user_id: u64,
    pub roles: Vec<u64>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GuildApi: Send + Sync {
    async fn get_guild(&self, guild_id: u64) -> ModerationResult<GuildInfo>;

    async fn get_roles(&self, guild_id: u64) -> ModerationResult<Vec<RoleInfo>>;

    /// `None` when the user no longer exists or is not in the guild.
    async fn get_member(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> ModerationResult<Option<MemberSnapshot>>;

    /// Replace the member's role set.
    async fn edit_member_roles(
        &self,
        guild_id: u64,
        user_id: u64,
        roles: Vec<u64>,
    ) -> ModerationResult<()>;
}

/// [`GuildApi`] over the Discord REST API.
#[derive(Clone)]
pub struct SerenityGuildApi {
    http: Arc<Http>,
}

impl SerenityGuildApi {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl GuildApi for SerenityGuildApi {
    async fn get_guild(&self, guild_id: u64) -> ModerationResult<GuildInfo> {
        let guild = GuildId::new(guild_id)
            .to_partial_guild(&*self.http)
            .await?;

        Ok(GuildInfo {
            id: guild.id.get(),
            owner_id: guild.owner_id.get(),
        })
    }

    async fn get_roles(&self, guild_id: u64) -> ModerationResult<Vec<RoleInfo>> {
        let roles = GuildId::new(guild_id).roles(&*self.http).await?;

        Ok(roles
            .values()
            .map(|role| RoleInfo {
                id: role.id.get(),
                position: i64::from(role.position),
                managed: role.managed,
            })
            .collect())
    }

    async fn get_member(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> ModerationResult<Option<MemberSnapshot>> {
        match GuildId::new(guild_id)
            .member(&*self.http, UserId::new(user_id))
            .await
        {
            Ok(member) => Ok(Some(MemberSnapshot {
                user_id,
                roles: member.roles.iter().map(|role_id| role_id.get()).collect(),
            })),
            Err(source) if is_unknown_member(&source) => Ok(None),
            Err(source) => Err(source.into()),
        }
    }

    async fn edit_member_roles(
        &self,
        guild_id: u64,
        user_id: u64,
        roles: Vec<u64>,
    ) -> ModerationResult<()> {
        let edit = EditMember::new().roles(roles.into_iter().map(RoleId::new));
        GuildId::new(guild_id)
            .edit_member(&*self.http, UserId::new(user_id), edit)
            .await?;

        Ok(())
    }
}

fn is_unknown_member(source: &serenity::Error) -> bool {
    matches!(
        source,
        serenity::Error::Http(serenity::all::HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 404
                || response.error.code == 10007
                || response.error.code == 10013
    )
}
