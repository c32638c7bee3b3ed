//! Per-type freshness tracking and the refresh lock.
//!
//! The tracker answers "is this type stale?", remembers the last successful
//! sync and the last failure, and hands out at most one [`RefreshGuard`] per
//! entity type at a time.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use kbsync_shared::{EntityType, SyncSettings};
use serde::Serialize;
use tracing::debug;

/// Observable sync state of one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Fresh,
    Stale,
    Syncing,
    SyncingFailed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::Syncing => "syncing",
            Self::SyncingFailed => "syncing_failed",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Default)]
struct TypeState {
    last_sync: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    syncing: bool,
}

type States = Arc<Mutex<HashMap<EntityType, TypeState>>>;

fn lock_states(states: &States) -> MutexGuard<'_, HashMap<EntityType, TypeState>> {
    // Poison is ignored: every update is a single assignment.
    states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `now - then > limit`; a `then` in the future never exceeds.
fn elapsed_exceeds(now: DateTime<Utc>, then: DateTime<Utc>, limit: Duration) -> bool {
    (now - then).to_std().is_ok_and(|elapsed| elapsed > limit)
}

/// Freshness state for every entity type.
pub struct FreshnessTracker {
    settings: SyncSettings,
    states: States,
    locks: HashMap<EntityType, Arc<tokio::sync::Mutex<()>>>,
}

impl FreshnessTracker {
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            settings,
            states: Arc::new(Mutex::new(HashMap::new())),
            locks: EntityType::ALL
                .into_iter()
                .map(|ty| (ty, Arc::new(tokio::sync::Mutex::new(()))))
                .collect(),
        }
    }

    /// Seed last-sync timestamps, e.g. from the store at startup.
    pub fn seed(&self, synced: &BTreeMap<EntityType, DateTime<Utc>>) {
        for (entity_type, at) in synced {
            self.mark_refreshed(*entity_type, *at);
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// No successful sync yet, or the last one is older than the type's TTL.
    pub fn is_stale(&self, entity_type: EntityType, now: DateTime<Utc>) -> bool {
        let ttl = self.settings.ttl_for(entity_type);
        match self.last_synced(entity_type) {
            Some(last) => elapsed_exceeds(now, last, ttl),
            None => true,
        }
    }

    pub fn last_synced(&self, entity_type: EntityType) -> Option<DateTime<Utc>> {
        lock_states(&self.states)
            .get(&entity_type)
            .and_then(|s| s.last_sync)
    }

    /// Record a successful sync. Never moves the timestamp backwards.
    pub fn mark_refreshed(&self, entity_type: EntityType, at: DateTime<Utc>) {
        let mut states = lock_states(&self.states);
        let state = states.entry(entity_type).or_default();
        state.last_sync = Some(state.last_sync.map_or(at, |prev| prev.max(at)));
        state.last_failure = None;
    }

    /// Record a failed sync; starts the cooldown.
    pub fn record_failure(&self, entity_type: EntityType, at: DateTime<Utc>) {
        let mut states = lock_states(&self.states);
        states.entry(entity_type).or_default().last_failure = Some(at);
    }

    /// Whether a recent failure still blocks automatic retries.
    pub fn in_cooldown(&self, entity_type: EntityType, now: DateTime<Utc>) -> bool {
        let cooldown = self.settings.failure_cooldown;
        lock_states(&self.states)
            .get(&entity_type)
            .and_then(|s| s.last_failure)
            .is_some_and(|failed| !elapsed_exceeds(now, failed, cooldown))
    }

    pub fn state(&self, entity_type: EntityType, now: DateTime<Utc>) -> SyncState {
        let (syncing, failed) = {
            let states = lock_states(&self.states);
            let state = states.get(&entity_type);
            (
                state.is_some_and(|s| s.syncing),
                state.is_some_and(|s| s.last_failure.is_some()),
            )
        };

        if syncing {
            SyncState::Syncing
        } else if !self.is_stale(entity_type, now) {
            SyncState::Fresh
        } else if failed {
            SyncState::SyncingFailed
        } else {
            SyncState::Stale
        }
    }

    /// Take the refresh lock for `entity_type` without waiting.
    pub fn try_acquire_refresh_lock(&self, entity_type: EntityType) -> Option<RefreshGuard> {
        let lock = self.locks.get(&entity_type)?.clone();
        let guard = lock.try_lock_owned().ok()?;

        lock_states(&self.states).entry(entity_type).or_default().syncing = true;
        debug!(%entity_type, "refresh lock acquired");

        Some(RefreshGuard {
            entity_type,
            states: Arc::clone(&self.states),
            _guard: guard,
        })
    }

    /// Wait up to `budget` for an in-flight refresh to release the lock.
    /// Returns `false` when the budget ran out first.
    pub async fn wait_for_refresh(&self, entity_type: EntityType, budget: Duration) -> bool {
        let Some(lock) = self.locks.get(&entity_type).cloned() else {
            return true;
        };
        match tokio::time::timeout(budget, lock.lock_owned()).await {
            Ok(_released) => true,
            Err(_) => {
                debug!(%entity_type, ?budget, "gave up waiting for in-flight refresh");
                false
            }
        }
    }
}

/// Exclusive right to refresh one entity type. Released on drop.
pub struct RefreshGuard {
    entity_type: EntityType,
    states: States,
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

impl RefreshGuard {
    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        lock_states(&self.states)
            .entry(self.entity_type)
            .or_default()
            .syncing = false;
        debug!(entity_type = %self.entity_type, "refresh lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn tracker() -> FreshnessTracker {
        let mut settings = SyncSettings::default();
        settings.ttl = Duration::from_secs(3600);
        settings.ttl_overrides.insert(EntityType::Plaza, Duration::from_secs(60));
        settings.failure_cooldown = Duration::from_secs(30);
        FreshnessTracker::new(settings)
    }

    #[test]
    fn stale_until_first_sync() {
        let t = tracker();
        let now = Utc::now();
        assert!(t.is_stale(EntityType::Province, now));
        assert_eq!(t.state(EntityType::Province, now), SyncState::Stale);

        t.mark_refreshed(EntityType::Province, now);
        assert!(!t.is_stale(EntityType::Province, now + ChronoDuration::minutes(59)));
        assert!(t.is_stale(EntityType::Province, now + ChronoDuration::minutes(61)));
    }

    #[test]
    fn ttl_overrides_apply_per_type() {
        let t = tracker();
        let now = Utc::now();
        t.mark_refreshed(EntityType::Plaza, now);
        t.mark_refreshed(EntityType::Province, now);

        let later = now + ChronoDuration::minutes(2);
        assert!(t.is_stale(EntityType::Plaza, later));
        assert!(!t.is_stale(EntityType::Province, later));
    }

    #[test]
    fn mark_refreshed_is_monotonic() {
        let t = tracker();
        let now = Utc::now();
        t.mark_refreshed(EntityType::Province, now);
        t.mark_refreshed(EntityType::Province, now - ChronoDuration::hours(2));
        assert_eq!(t.last_synced(EntityType::Province), Some(now));
    }

    #[test]
    fn seeding_from_store() {
        let t = tracker();
        let at = Utc::now() - ChronoDuration::minutes(5);
        t.seed(&BTreeMap::from([(EntityType::NationalPark, at)]));
        assert_eq!(t.last_synced(EntityType::NationalPark), Some(at));
        assert!(!t.is_stale(EntityType::NationalPark, Utc::now()));
    }

    #[test]
    fn cooldown_after_failure() {
        let t = tracker();
        let now = Utc::now();
        t.record_failure(EntityType::HeritageSite, now);

        assert!(t.in_cooldown(EntityType::HeritageSite, now + ChronoDuration::seconds(10)));
        assert!(!t.in_cooldown(EntityType::HeritageSite, now + ChronoDuration::seconds(31)));
        assert_eq!(t.state(EntityType::HeritageSite, now), SyncState::SyncingFailed);

        t.mark_refreshed(EntityType::HeritageSite, now);
        assert!(!t.in_cooldown(EntityType::HeritageSite, now));
        assert_eq!(t.state(EntityType::HeritageSite, now), SyncState::Fresh);
    }

    #[test]
    fn refresh_lock_is_exclusive_per_type() {
        let t = tracker();
        let guard = t.try_acquire_refresh_lock(EntityType::Province).expect("first");
        assert_eq!(guard.entity_type(), EntityType::Province);
        assert!(t.try_acquire_refresh_lock(EntityType::Province).is_none());
        assert!(t.try_acquire_refresh_lock(EntityType::Plaza).is_some());
        assert_eq!(t.state(EntityType::Province, Utc::now()), SyncState::Syncing);

        drop(guard);
        assert!(t.try_acquire_refresh_lock(EntityType::Province).is_some());
        assert_eq!(t.state(EntityType::Province, Utc::now()), SyncState::Stale);
    }

    #[tokio::test]
    async fn waiters_are_released_when_guard_drops() {
        let t = Arc::new(tracker());
        let guard = t.try_acquire_refresh_lock(EntityType::Province).unwrap();

        let waiter = {
            let t = Arc::clone(&t);
            tokio::spawn(async move {
                t.wait_for_refresh(EntityType::Province, Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn wait_gives_up_after_budget() {
        let t = tracker();
        let _guard = t.try_acquire_refresh_lock(EntityType::Province).unwrap();
        let released = t
            .wait_for_refresh(EntityType::Province, Duration::from_millis(50))
            .await;
        assert!(!released);
    }
}
