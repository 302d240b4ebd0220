use serde::{Deserialize, Serialize};

/// Per-guild moderation settings. Unset fields disable the matching sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: u64,
    pub auto_pardon_warns_after_days: Option<u32>,
    pub automod_cooldown_seconds: Option<u64>,
    pub mod_role_ids: Vec<u64>,
}

impl GuildSettings {
    pub fn unconfigured(guild_id: u64) -> Self {
        Self {
            guild_id,
            ..Self::default()
        }
    }
}
