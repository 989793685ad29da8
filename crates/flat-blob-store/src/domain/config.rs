//! Engine configuration.
//!
//! Constructed by the host process and handed into the engine's
//! constructors. The engine never reads environment variables or files
//! directly — that parsing, if any, is the host's job — but it does own
//! input validation.

use crate::domain::errors::EngineError;
use std::time::Duration;

/// Which placement/growth discipline the `OldCurrentNew` policy uses.
///
/// - `Immutable` spreads writes across multiple "new" blocks, for
///   content-addressable data that is never overwritten in place.
/// - `Mutable` keeps exactly one "new" block at a time and lets "current"
///   grow, so an update to an existing key lands in the same block and can
///   atomically supersede the old record. Suited to an action-result cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthPolicy {
    Immutable,
    Mutable,
}

impl GrowthPolicy {
    pub fn should_grow_new(&self, current_count: usize, new_count: usize, desired_current: usize, desired_new: usize) -> bool {
        match self {
            GrowthPolicy::Immutable => current_count + new_count < desired_current + desired_new,
            GrowthPolicy::Mutable => new_count < 1,
        }
    }

    pub fn should_grow_current(&self, current_count: usize, desired_current: usize) -> bool {
        match self {
            GrowthPolicy::Immutable => false,
            GrowthPolicy::Mutable => current_count < desired_current,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Size in bytes of every block allocated by the `BlockAllocator`.
    pub block_size_bytes: u64,
    /// Desired number of "old" blocks.
    pub desired_old_count: usize,
    /// Desired number of "current" blocks.
    pub desired_current_count: usize,
    /// Desired number of "new" blocks.
    pub desired_new_count: usize,
    /// Placement/growth discipline.
    pub growth_policy: GrowthPolicy,
    /// Number of slots `R` in the key-location hash table. Must be prime.
    pub hash_table_slots: u64,
    /// Maximum probe count for `Get`.
    pub max_get_attempts: u32,
    /// Maximum probe count for `Put` (normally somewhat larger than Get's).
    pub max_put_attempts: u32,
    /// Sector size in bytes used for raw-device block alignment.
    pub sector_size_bytes: u64,
    /// Minimum interval between successive block-put syncs, used to batch.
    pub min_epoch_interval: Duration,
    /// Back-off interval before retrying a failed persistent-state write.
    pub error_retry_interval: Duration,
}

impl StorageConfig {
    /// A reasonable config for the immutable (CAS) cache use case.
    pub fn immutable_cache_defaults() -> Self {
        StorageConfig {
            block_size_bytes: 64 * 1024 * 1024,
            desired_old_count: 2,
            desired_current_count: 4,
            desired_new_count: 4,
            growth_policy: GrowthPolicy::Immutable,
            hash_table_slots: 1_000_003, // prime
            max_get_attempts: 16,
            max_put_attempts: 64,
            sector_size_bytes: 4096,
            min_epoch_interval: Duration::from_secs(1),
            error_retry_interval: Duration::from_secs(10),
        }
    }

    /// A reasonable config for the mutable (action-result cache) use case.
    pub fn mutable_cache_defaults() -> Self {
        StorageConfig {
            growth_policy: GrowthPolicy::Mutable,
            ..Self::immutable_cache_defaults()
        }
    }

    /// Validate internal consistency, mirroring the teacher's
    /// construct-time invariant checks (e.g. `verify_block_hash_nonzero`).
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.block_size_bytes == 0 {
            return Err(EngineError::InvalidArgument(
                "block_size_bytes must be non-zero".to_string(),
            ));
        }
        if self.desired_old_count + self.desired_current_count + self.desired_new_count == 0 {
            return Err(EngineError::InvalidArgument(
                "at least one of old/current/new span must be non-zero".to_string(),
            ));
        }
        if self.desired_new_count == 0 {
            return Err(EngineError::InvalidArgument(
                "desired_new_count must be at least 1 so writes have somewhere to land"
                    .to_string(),
            ));
        }
        if !is_prime(self.hash_table_slots) {
            return Err(EngineError::InvalidArgument(format!(
                "hash_table_slots ({}) must be prime",
                self.hash_table_slots
            )));
        }
        if self.max_get_attempts == 0 || self.max_put_attempts == 0 {
            return Err(EngineError::InvalidArgument(
                "probe attempt limits must be non-zero".to_string(),
            ));
        }
        if self.max_put_attempts < self.max_get_attempts {
            return Err(EngineError::InvalidArgument(
                "max_put_attempts should be at least max_get_attempts".to_string(),
            ));
        }
        if self.sector_size_bytes == 0 || self.block_size_bytes % self.sector_size_bytes != 0 {
            return Err(EngineError::InvalidArgument(
                "block_size_bytes must be a multiple of sector_size_bytes".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut i = 3u64;
    while i.saturating_mul(i) <= n {
        if n % i == 0 {
            return false;
        }
        i += 2;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(StorageConfig::immutable_cache_defaults().validate().is_ok());
        assert!(StorageConfig::mutable_cache_defaults().validate().is_ok());
    }

    #[test]
    fn rejects_non_prime_slot_count() {
        let mut cfg = StorageConfig::immutable_cache_defaults();
        cfg.hash_table_slots = 100;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_new_span() {
        let mut cfg = StorageConfig::immutable_cache_defaults();
        cfg.desired_new_count = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn growth_policy_immutable_spreads_across_new() {
        let p = GrowthPolicy::Immutable;
        assert!(p.should_grow_new(0, 0, 4, 4));
        assert!(!p.should_grow_new(4, 4, 4, 4));
        assert!(!p.should_grow_current(0, 4));
    }

    #[test]
    fn growth_policy_mutable_keeps_one_new() {
        let p = GrowthPolicy::Mutable;
        assert!(p.should_grow_new(0, 0, 4, 4));
        assert!(!p.should_grow_new(0, 1, 4, 4));
        assert!(p.should_grow_current(1, 4));
        assert!(!p.should_grow_current(4, 4));
    }

    #[test]
    fn is_prime_basic_cases() {
        assert!(is_prime(2));
        assert!(is_prime(3));
        assert!(!is_prime(4));
        assert!(is_prime(1_000_003));
        assert!(!is_prime(1_000_000));
    }
}
