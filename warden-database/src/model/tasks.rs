use serde::Deserialize;

use crate::model::cases::CaseId;

pub type TaskId = u64;

pub const UNDO_ROLE_CASE_TASK: &str = "undoRoleCase";

/// Deferred work with its typed payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskPayload {
    /// Lift a timed mute or restriction once it expires.
    UndoRoleCase { case_id: CaseId },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UndoRoleCaseData {
    case_id: CaseId,
}

impl TaskPayload {
    pub fn task_type(&self) -> &'static str {
        match self {
            Self::UndoRoleCase { .. } => UNDO_ROLE_CASE_TASK,
        }
    }

    pub fn data(&self) -> serde_json::Value {
        match self {
            Self::UndoRoleCase { case_id } => serde_json::json!({ "caseId": case_id }),
        }
    }

    pub fn from_parts(task_type: &str, data: serde_json::Value) -> anyhow::Result<Self> {
        match task_type {
            UNDO_ROLE_CASE_TASK => {
                let data: UndoRoleCaseData = serde_json::from_value(data)
                    .map_err(|e| anyhow::anyhow!("malformed `{task_type}` payload: {e}"))?;
                Ok(Self::UndoRoleCase {
                    case_id: data.case_id,
                })
            }
            other => anyhow::bail!("unknown task type `{other}`"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub guild_id: u64,
    pub run_at: u64,
    pub attempts: u32,
    /// `None` when the stored type or data could not be decoded.
    pub payload: Option<TaskPayload>,
}

#[derive(Clone, Debug)]
pub struct NewTask {
    pub guild_id: u64,
    pub run_at: u64,
    pub payload: TaskPayload,
}

#[cfg(test)]
mod tests {
    use super::{TaskPayload, UNDO_ROLE_CASE_TASK};

    #[test]
    fn undo_payload_embeds_case_id() {
        let payload = TaskPayload::UndoRoleCase { case_id: 17 };
        assert_eq!(payload.task_type(), UNDO_ROLE_CASE_TASK);
        assert_eq!(payload.data(), serde_json::json!({ "caseId": 17 }));
        assert_eq!(
            TaskPayload::from_parts(UNDO_ROLE_CASE_TASK, payload.data()).ok(),
            Some(payload)
        );
    }

    #[test]
    fn unknown_or_malformed_tasks_fail_to_decode() {
        assert!(TaskPayload::from_parts("sendReminder", serde_json::json!({})).is_err());
        assert!(
            TaskPayload::from_parts(UNDO_ROLE_CASE_TASK, serde_json::json!({ "case": 1 }))
                .is_err()
        );
    }
}
