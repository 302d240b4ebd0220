//! Role-set diffing for role punishments. Managed roles are carried through
//! untouched by every plan.

use crate::guild::RoleInfo;

/// A member's roles split by whether the platform manages them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleSplit {
    pub managed: Vec<u64>,
    pub unmanaged: Vec<u64>,
}

impl RoleSplit {
    pub fn of(current: &[u64], guild_roles: &[RoleInfo]) -> Self {
        let mut split = Self::default();
        for role_id in dedup(current.iter().copied()) {
            if is_managed(role_id, guild_roles) {
                split.managed.push(role_id);
            } else {
                split.unmanaged.push(role_id);
            }
        }
        split
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyPlan {
    pub new_roles: Vec<u64>,
    /// Stripped now, restored on reversal. Empty for additive actions.
    pub undo_roles: Vec<u64>,
}

pub fn plan_apply(split: &RoleSplit, role_id: u64, clean: bool) -> ApplyPlan {
    if clean {
        ApplyPlan {
            new_roles: dedup(split.managed.iter().copied().chain([role_id])),
            undo_roles: split.unmanaged.clone(),
        }
    } else {
        ApplyPlan {
            new_roles: dedup(
                split
                    .managed
                    .iter()
                    .chain(&split.unmanaged)
                    .copied()
                    .chain([role_id]),
            ),
            undo_roles: Vec::new(),
        }
    }
}

/// Roles to set when lifting the punishment: drop `role_id`, and for clean
/// actions give back the recorded undo roles.
pub fn plan_reverse(split: &RoleSplit, undo_roles: &[u64], role_id: u64, clean: bool) -> Vec<u64> {
    let restored: &[u64] = if clean { undo_roles } else { &[] };
    let unmanaged = split
        .unmanaged
        .iter()
        .chain(restored)
        .copied()
        .filter(|id| *id != role_id);

    dedup(split.managed.iter().copied().chain(unmanaged))
}

/// Roles that undo an apply whose case was never recorded: the prior
/// unmanaged roles come back and `role_id` goes away unless the member held it
/// before.
pub fn plan_compensation(split: &RoleSplit, prior_roles: &[u64], role_id: u64) -> Vec<u64> {
    let mut roles = plan_reverse(split, prior_roles, role_id, true);
    if prior_roles.contains(&role_id) && !roles.contains(&role_id) {
        roles.push(role_id);
    }
    roles
}

/// Undo roles that can still be assigned: present in the guild and not managed.
pub fn restorable(undo_roles: &[u64], guild_roles: &[RoleInfo]) -> Vec<u64> {
    undo_roles
        .iter()
        .copied()
        .filter(|role_id| {
            guild_roles
                .iter()
                .any(|role| role.id == *role_id && !role.managed)
        })
        .collect()
}

/// Highest position among the held roles; `None` sorts below every position.
pub fn highest_position(held: &[u64], guild_roles: &[RoleInfo]) -> Option<i64> {
    guild_roles
        .iter()
        .filter(|role| held.contains(&role.id))
        .map(|role| role.position)
        .max()
}

/// Order-insensitive comparison of two role sets.
pub fn same_roles(left: &[u64], right: &[u64]) -> bool {
    let mut left = dedup(left.iter().copied());
    let mut right = dedup(right.iter().copied());
    left.sort_unstable();
    right.sort_unstable();
    left == right
}

fn is_managed(role_id: u64, guild_roles: &[RoleInfo]) -> bool {
    guild_roles
        .iter()
        .any(|role| role.id == role_id && role.managed)
}

fn dedup(ids: impl IntoIterator<Item = u64>) -> Vec<u64> {
    let mut out: Vec<u64> = Vec::new();
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}
