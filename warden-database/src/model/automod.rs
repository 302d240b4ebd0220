/// Leaky-bucket count of automod violations for one member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerCounter {
    pub guild_id: u64,
    pub user_id: u64,
    pub count: i32,
    pub updated_at: u64,
}
