//! Per-kind TTL table and the staleness predicate.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::entry::Entry;
use super::key::DataKind;
use crate::core::config::CacheConfig;

/// `now - cached_at > ttl`. Pure and total; the TTL boundary is still fresh.
#[must_use]
pub fn is_stale(entry: &Entry, ttl: Duration, now: DateTime<Utc>) -> bool {
    entry.age(now) > ttl
}

/// TTL lookup per [`DataKind`], with a fallback for kinds not listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalenessPolicy {
    ttls: HashMap<DataKind, Duration>,
    default_ttl: Duration,
}

impl StalenessPolicy {
    /// Policy with one TTL for every kind.
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            ttls: HashMap::new(),
            default_ttl,
        }
    }

    /// Builder-style override for one kind.
    #[must_use]
    pub fn with_ttl(mut self, kind: DataKind, ttl: Duration) -> Self {
        self.ttls.insert(kind, ttl);
        self
    }

    /// Build from validated configuration. Unknown kind names were rejected
    /// at load time, so unparseable keys are skipped here.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        let mut policy = Self::new(Duration::from_secs(config.default_ttl_secs));
        for (name, secs) in &config.ttl_secs {
            if let Ok(kind) = name.parse::<DataKind>() {
                policy.ttls.insert(kind, Duration::from_secs(*secs));
            }
        }
        policy
    }

    /// TTL that applies to `kind`.
    #[must_use]
    pub fn ttl_for(&self, kind: DataKind) -> Duration {
        self.ttls.get(&kind).copied().unwrap_or(self.default_ttl)
    }

    /// Whether `entry` is older than its kind's TTL at `now`.
    #[must_use]
    pub fn is_stale(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        is_stale(entry, self.ttl_for(entry.key.kind), now)
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::Payload;
    use crate::cache::key::CacheKey;
    use chrono::TimeZone;

    fn entry_at(kind: DataKind, at: DateTime<Utc>) -> Entry {
        Entry::new(
            CacheKey::new("dev1", kind),
            Payload::new(serde_json::Value::Null),
            at,
        )
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn fresh_within_ttl_and_at_boundary() {
        let e = entry_at(DataKind::Inputs, t0());
        let ttl = Duration::from_secs(60);
        assert!(!is_stale(&e, ttl, t0()));
        assert!(!is_stale(&e, ttl, t0() + chrono::Duration::seconds(60)));
        assert!(is_stale(&e, ttl, t0() + chrono::Duration::seconds(61)));
    }

    #[test]
    fn twice_ttl_is_stale() {
        let ttl = Duration::from_secs(10);
        let now = t0();
        let e = entry_at(DataKind::Energy, now - chrono::Duration::seconds(20));
        assert!(is_stale(&e, ttl, now));
    }

    #[test]
    fn per_kind_ttl_overrides_default() {
        let policy = StalenessPolicy::new(Duration::from_secs(300))
            .with_ttl(DataKind::Energy, Duration::from_secs(5));
        assert_eq!(policy.ttl_for(DataKind::Energy), Duration::from_secs(5));
        assert_eq!(policy.ttl_for(DataKind::Config), Duration::from_secs(300));

        let e = entry_at(DataKind::Energy, t0());
        assert!(policy.is_stale(&e, t0() + chrono::Duration::seconds(6)));
        let c = entry_at(DataKind::Config, t0());
        assert!(!policy.is_stale(&c, t0() + chrono::Duration::seconds(6)));
    }

    #[test]
    fn default_policy_gives_energy_a_shorter_ttl_than_config() {
        let policy = StalenessPolicy::default();
        assert!(policy.ttl_for(DataKind::Energy) < policy.ttl_for(DataKind::Config));
    }
}
