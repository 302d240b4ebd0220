//! Advisory per-member action locks in the shared key-value store.
//!
//! A lock maps `(target, guild)` to the case id being applied and lapses after
//! [`LOCK_TTL`]. It flags concurrent actions against the same member; it is
//! not a fencing primitive.

use std::time::Duration;

use tracing::warn;

use warden_database::CacheService;
use warden_database::cache::action_lock_key;
use warden_database::model::cases::CaseId;

use crate::error::ModerationResult;

pub const LOCK_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug)]
pub struct LockManager {
    cache: CacheService,
    ttl: Duration,
}

impl LockManager {
    pub fn new(cache: CacheService) -> Self {
        Self {
            cache,
            ttl: LOCK_TTL,
        }
    }

    /// Claim the member for `case_id`, overwriting any existing claim.
    pub async fn acquire(&self, case_id: CaseId, target_id: u64, guild_id: u64) -> ModerationResult<()> {
        let key = action_lock_key(&self.cache, target_id, guild_id);
        self.cache
            .set_string(&key, &case_id.to_string(), self.ttl)
            .await?;
        Ok(())
    }

    /// Claim the member only if no live claim exists. Returns whether the
    /// claim was taken.
    pub async fn try_acquire(
        &self,
        case_id: CaseId,
        target_id: u64,
        guild_id: u64,
    ) -> ModerationResult<bool> {
        let key = action_lock_key(&self.cache, target_id, guild_id);
        let claimed = self
            .cache
            .set_string_if_absent(&key, &case_id.to_string(), self.ttl)
            .await?;
        Ok(claimed)
    }

    pub async fn get_lock(&self, target_id: u64, guild_id: u64) -> ModerationResult<Option<CaseId>> {
        let key = action_lock_key(&self.cache, target_id, guild_id);
        let Some(value) = self.cache.get_string(&key).await? else {
            return Ok(None);
        };

        match value.parse::<CaseId>() {
            Ok(case_id) => Ok(Some(case_id)),
            Err(_) => {
                warn!(lock_key = %key, value = %value, "ignoring unparseable action lock");
                Ok(None)
            }
        }
    }

    /// Drop the claim if it still belongs to `case_id`.
    pub async fn release_if_held(
        &self,
        case_id: CaseId,
        target_id: u64,
        guild_id: u64,
    ) -> ModerationResult<bool> {
        if self.get_lock(target_id, guild_id).await? != Some(case_id) {
            return Ok(false);
        }

        let key = action_lock_key(&self.cache, target_id, guild_id);
        self.cache.del(&key).await?;
        Ok(true)
    }
}
