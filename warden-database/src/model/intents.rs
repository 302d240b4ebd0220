use crate::model::cases::CaseId;

/// Written before a role punishment touches the member, deleted by the
/// transaction that records the case. A surviving row marks an apply whose
/// bookkeeping never landed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRoleAction {
    pub case_id: CaseId,
    pub guild_id: u64,
    pub target_id: u64,
    pub role_id: u64,
    pub clean: bool,
    pub prior_roles: Vec<u64>,
    pub created_at: u64,
}
