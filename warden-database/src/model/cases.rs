use serde::{Deserialize, Serialize};

pub type CaseId = u64;

/// Stored in `pardoned_by` when the sweeper, not a moderator, pardoned a case.
pub const SYSTEM_ACTOR_ID: u64 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Warn,
    Mute,
    Unmute,
    Restrict,
    Unrestrict,
    Kick,
    Ban,
    Unban,
    Note,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Mute => "mute",
            Self::Unmute => "unmute",
            Self::Restrict => "restrict",
            Self::Unrestrict => "unrestrict",
            Self::Kick => "kick",
            Self::Ban => "ban",
            Self::Unban => "unban",
            Self::Note => "note",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let action = match raw {
            "warn" => Self::Warn,
            "mute" => Self::Mute,
            "unmute" => Self::Unmute,
            "restrict" => Self::Restrict,
            "unrestrict" => Self::Unrestrict,
            "kick" => Self::Kick,
            "ban" => Self::Ban,
            "unban" => Self::Unban,
            "note" => Self::Note,
            _ => return None,
        };
        Some(action)
    }

    /// Actions applied by mutating the target's role set.
    pub fn is_role_action(self) -> bool {
        matches!(self, Self::Mute | Self::Restrict)
    }

    /// The audit action recorded when this action is lifted.
    pub fn reversal(self) -> Option<Self> {
        match self {
            Self::Mute => Some(Self::Unmute),
            Self::Restrict => Some(Self::Unrestrict),
            Self::Ban => Some(Self::Unban),
            _ => None,
        }
    }
}

/// Whether an action lapses on its own. A timed action always carries both its
/// duration and the absolute expiry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expiry {
    Permanent,
    Timed {
        duration_seconds: u64,
        expires_at: u64,
    },
}

impl Expiry {
    pub fn starting_at(created_at: u64, duration_seconds: Option<u64>) -> Self {
        match duration_seconds {
            Some(duration_seconds) => Self::Timed {
                duration_seconds,
                expires_at: created_at.saturating_add(duration_seconds),
            },
            None => Self::Permanent,
        }
    }

    /// Rebuild from the paired nullable columns, rejecting a half-populated pair.
    pub fn from_columns(
        duration_seconds: Option<u64>,
        expires_at: Option<u64>,
    ) -> anyhow::Result<Self> {
        match (duration_seconds, expires_at) {
            (Some(duration_seconds), Some(expires_at)) => Ok(Self::Timed {
                duration_seconds,
                expires_at,
            }),
            (None, None) => Ok(Self::Permanent),
            _ => anyhow::bail!("duration_seconds and expires_at must both be set or both be null"),
        }
    }

    pub fn duration_seconds(&self) -> Option<u64> {
        match self {
            Self::Timed {
                duration_seconds, ..
            } => Some(*duration_seconds),
            Self::Permanent => None,
        }
    }

    pub fn expires_at(&self) -> Option<u64> {
        match self {
            Self::Timed { expires_at, .. } => Some(*expires_at),
            Self::Permanent => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    System,
    User(u64),
}

impl Actor {
    pub fn from_column(id: u64) -> Self {
        if id == SYSTEM_ACTOR_ID {
            Self::System
        } else {
            Self::User(id)
        }
    }

    pub fn to_column(self) -> u64 {
        match self {
            Self::System => SYSTEM_ACTOR_ID,
            Self::User(id) => id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub guild_id: u64,
    pub target_id: u64,
    pub mod_id: u64,
    pub reason: Option<String>,
    pub action: ActionType,
    pub created_at: u64,
    pub expiry: Expiry,
    pub pardoned_by: Option<Actor>,
    /// Set on audit cases that lift an earlier case.
    pub reverses_case_id: Option<CaseId>,
}

#[derive(Clone, Debug)]
pub struct NewCase {
    pub guild_id: u64,
    pub target_id: u64,
    pub mod_id: u64,
    pub action: ActionType,
    pub reason: Option<String>,
    pub created_at: u64,
    pub expiry: Expiry,
    pub reverses_case_id: Option<CaseId>,
}

/// Role-mutation detail for mute and restrict cases.
///
/// `clean` means the target's non-managed roles were replaced by `role_id`;
/// otherwise `role_id` was appended to the existing set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCaseData {
    pub case_id: CaseId,
    pub role_id: u64,
    pub clean: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCase {
    pub case: Case,
    pub data: RoleCaseData,
}
