use std::time::Duration;

use thiserror::Error;

use warden_database::model::cases::{ActionType, CaseId};

use crate::validator::Rejection;

/// Failures surfaced by the moderation engine.
#[derive(Debug, Error)]
pub enum ModerationError {
    /// The actor may not act on the target. Shown to the actor, never retried.
    #[error("{0}")]
    Validation(Rejection),

    #[error("guild API request failed: {0}")]
    ExternalApi(String),

    #[error("guild API request timed out after {0:?}")]
    ExternalApiTimeout(Duration),

    #[error("persistence failure: {0:#}")]
    Persistence(#[from] anyhow::Error),

    /// Persisting the case failed after the member's roles were already changed.
    #[error("roles changed for case {case_id} but the case could not be recorded: {source:#}")]
    InconsistentState {
        case_id: CaseId,
        source: anyhow::Error,
    },

    #[error("an action against this member is already in flight (case {case_id})")]
    LockContention { case_id: CaseId },

    #[error("task {task_id} abandoned after {attempts} failed attempts")]
    TaskExhausted { task_id: u64, attempts: u32 },

    #[error("case {0} not found")]
    CaseNotFound(CaseId),

    #[error("member {user_id} is not in guild {guild_id}")]
    MemberNotFound { guild_id: u64, user_id: u64 },

    #[error("`{}` is not a role action", .0.as_str())]
    UnsupportedAction(ActionType),

    #[error("unknown task type `{0}`")]
    UnknownTask(String),
}

impl ModerationError {
    /// Failures worth retrying on the scheduled reversal path.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Validation(_)
                | Self::LockContention { .. }
                | Self::TaskExhausted { .. }
                | Self::CaseNotFound(_)
                | Self::UnsupportedAction(_)
                | Self::UnknownTask(_)
        )
    }
}

impl From<serenity::Error> for ModerationError {
    fn from(error: serenity::Error) -> Self {
        Self::ExternalApi(error.to_string())
    }
}

impl From<Rejection> for ModerationError {
    fn from(rejection: Rejection) -> Self {
        Self::Validation(rejection)
    }
}

pub type ModerationResult<T> = Result<T, ModerationError>;
