//! Fingerprint-keyed plan cache with in-flight de-duplication.
//!
//! Each fingerprint maps to one slot: either a finished plan or an
//! in-flight synthesis. The first caller to find no usable slot becomes the
//! leader and runs the synthesis; later callers subscribe to the leader's
//! watch channel and receive its outcome. Shard locks are held only while
//! inspecting or swapping a slot, never across an await.
//!
//! If the leader goes away without an outcome (its future is dropped or it
//! reports `Cancelled`), the guard removes the in-flight slot and drops the
//! sender. Waiters see the channel close and contend for leadership again.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::PipelineError;
use crate::metrics::MetricSet;
use crate::plan::ImprovementPlan;
use crate::risk::RiskLevel;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Keep finished plans. In-flight de-duplication applies either way.
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3_600,
            max_entries: 1_024,
        }
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Deterministic key derived from a metric set and its risk level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// SHA-256 over the sorted `(name, value bits)` pairs and the level.
    pub fn compute(metrics: &MetricSet, level: RiskLevel) -> Self {
        let mut hasher = Sha256::new();
        for (name, value) in metrics.iter() {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.to_bits().to_be_bytes());
        }
        hasher.update(level.as_str().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// How a plan was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// This request ran the synthesis.
    Miss,
    /// A stored plan was returned.
    Hit,
    /// Another request's in-flight synthesis was shared.
    Joined,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Miss => "miss",
            Self::Hit => "hit",
            Self::Joined => "joined",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finished plan and the synthesis attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPlan {
    pub plan: ImprovementPlan,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
enum Flight {
    Pending,
    Done(Arc<CachedPlan>),
    Failed(PipelineError),
}

enum Slot {
    Ready {
        plan: Arc<CachedPlan>,
        stored_at: Instant,
    },
    InFlight {
        id: u64,
        rx: watch::Receiver<Flight>,
    },
}

enum Claim<'a> {
    Hit(Arc<CachedPlan>),
    Wait(watch::Receiver<Flight>),
    Lead(FlightGuard<'a>),
}

pub struct PlanCache {
    slots: DashMap<Fingerprint, Slot>,
    config: CacheConfig,
    next_flight: AtomicU64,
}

impl fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanCache")
            .field("slots", &self.slots.len())
            .field("config", &self.config)
            .finish()
    }
}

impl PlanCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            slots: DashMap::new(),
            config,
            next_flight: AtomicU64::new(0),
        }
    }

    /// Return the stored plan for `fingerprint`, join the synthesis already
    /// running for it, or run `synthesize` as the leader.
    ///
    /// A leader failure is shared with every waiter. At most one
    /// `synthesize` call runs per fingerprint at a time.
    pub async fn get_or_synthesize<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        synthesize: F,
    ) -> Result<(Arc<CachedPlan>, CacheStatus), PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedPlan, PipelineError>>,
    {
        let guard = loop {
            match self.claim(fingerprint) {
                Claim::Hit(plan) => {
                    debug!(%fingerprint, "plan cache hit");
                    return Ok((plan, CacheStatus::Hit));
                }
                Claim::Wait(mut rx) => {
                    debug!(%fingerprint, "joining in-flight synthesis");
                    let outcome = match rx.wait_for(|f| !matches!(f, Flight::Pending)).await {
                        Ok(flight) => Some(flight.clone()),
                        Err(_) => None,
                    };
                    match outcome {
                        Some(Flight::Done(plan)) => return Ok((plan, CacheStatus::Joined)),
                        Some(Flight::Failed(err)) => return Err(err),
                        // Leader abandoned the flight; contend again.
                        Some(Flight::Pending) | None => continue,
                    }
                }
                Claim::Lead(guard) => break guard,
            }
        };

        match synthesize().await {
            Ok(cached) => {
                let plan = Arc::new(cached);
                guard.finish(Flight::Done(Arc::clone(&plan)));
                Ok((plan, CacheStatus::Miss))
            }
            Err(err @ PipelineError::Cancelled { .. }) => Err(err),
            Err(err) => {
                guard.finish(Flight::Failed(err.clone()));
                Err(err)
            }
        }
    }

    fn claim(&self, fingerprint: &Fingerprint) -> Claim<'_> {
        if let Some(plan) = self.fresh(fingerprint) {
            return Claim::Hit(plan);
        }
        match self.slots.entry(fingerprint.clone()) {
            Entry::Occupied(mut entry) => {
                let reusable = match entry.get() {
                    Slot::Ready { plan, stored_at } if stored_at.elapsed() < self.config.ttl() => {
                        Some(Claim::Hit(Arc::clone(plan)))
                    }
                    Slot::InFlight { rx, .. } => Some(Claim::Wait(rx.clone())),
                    Slot::Ready { .. } => None,
                };
                match reusable {
                    Some(claim) => claim,
                    None => {
                        let (slot, guard) = self.start_flight(fingerprint);
                        entry.insert(slot);
                        Claim::Lead(guard)
                    }
                }
            }
            Entry::Vacant(entry) => {
                let (slot, guard) = self.start_flight(fingerprint);
                entry.insert(slot);
                Claim::Lead(guard)
            }
        }
    }

    /// Read-locked lookup of an unexpired plan.
    fn fresh(&self, fingerprint: &Fingerprint) -> Option<Arc<CachedPlan>> {
        let slot = self.slots.get(fingerprint)?;
        match slot.value() {
            Slot::Ready { plan, stored_at } if stored_at.elapsed() < self.config.ttl() => {
                Some(Arc::clone(plan))
            }
            _ => None,
        }
    }

    fn start_flight(&self, fingerprint: &Fingerprint) -> (Slot, FlightGuard<'_>) {
        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(Flight::Pending);
        let guard = FlightGuard {
            cache: self,
            fingerprint: fingerprint.clone(),
            id,
            tx,
            finished: false,
        };
        (Slot::InFlight { id, rx }, guard)
    }

    fn store(&self, fingerprint: &Fingerprint, plan: Arc<CachedPlan>) {
        self.slots.insert(
            fingerprint.clone(),
            Slot::Ready {
                plan,
                stored_at: Instant::now(),
            },
        );
        self.evict();
    }

    fn release(&self, fingerprint: &Fingerprint, id: u64) {
        self.slots.remove_if(fingerprint, |_, slot| {
            matches!(slot, Slot::InFlight { id: flight, .. } if *flight == id)
        });
    }

    /// Drop expired plans, then the oldest ones until within `max_entries`.
    /// In-flight slots are never evicted.
    fn evict(&self) {
        if self.ready_len() <= self.config.max_entries {
            return;
        }
        let ttl = self.config.ttl();
        self.slots
            .retain(|_, slot| !matches!(slot, Slot::Ready { stored_at, .. } if stored_at.elapsed() >= ttl));

        while self.ready_len() > self.config.max_entries {
            let oldest = self
                .slots
                .iter()
                .filter_map(|entry| match entry.value() {
                    Slot::Ready { stored_at, .. } => Some((entry.key().clone(), *stored_at)),
                    Slot::InFlight { .. } => None,
                })
                .min_by_key(|(_, stored_at)| *stored_at)
                .map(|(key, _)| key);
            let Some(key) = oldest else { break };
            self.slots
                .remove_if(&key, |_, slot| matches!(slot, Slot::Ready { .. }));
        }
    }

    /// Number of slots, finished or in flight.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ready_len(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Ready { .. }))
            .count()
    }

    pub fn in_flight_len(&self) -> usize {
        self.slots.len() - self.ready_len()
    }

    pub fn is_in_flight(&self, fingerprint: &Fingerprint) -> bool {
        self.slots
            .get(fingerprint)
            .is_some_and(|slot| matches!(*slot, Slot::InFlight { .. }))
    }

    pub fn clear(&self) {
        self.slots.retain(|_, slot| matches!(slot, Slot::InFlight { .. }));
    }
}

/// Leadership of one in-flight synthesis.
///
/// Dropping the guard without calling `finish` releases the slot, which
/// closes the channel and wakes waiters.
struct FlightGuard<'a> {
    cache: &'a PlanCache,
    fingerprint: Fingerprint,
    id: u64,
    tx: watch::Sender<Flight>,
    finished: bool,
}

impl FlightGuard<'_> {
    fn finish(mut self, outcome: Flight) {
        self.finished = true;
        match &outcome {
            Flight::Done(plan) if self.cache.config.enabled => {
                self.cache.store(&self.fingerprint, Arc::clone(plan));
            }
            _ => self.cache.release(&self.fingerprint, self.id),
        }
        self.tx.send_replace(outcome);
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(fingerprint = %self.fingerprint, "in-flight synthesis abandoned");
            self.cache.release(&self.fingerprint, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{IndicatorSpec, MetricValidator, RawMetrics};
    use crate::plan::PlanDay;
    use std::sync::atomic::AtomicUsize;

    fn metrics(attendance: f64) -> MetricSet {
        MetricValidator::new(vec![
            IndicatorSpec::new("attendance", "Attendance", 0.0, 100.0),
            IndicatorSpec::new("avg_score", "Average score", 0.0, 100.0),
        ])
        .validate(&RawMetrics::new().with("attendance", attendance).with("avg_score", 50))
        .unwrap()
    }

    fn cached(level: RiskLevel) -> CachedPlan {
        CachedPlan {
            plan: ImprovementPlan::new(
                level,
                vec![PlanDay {
                    day: 1,
                    focus: None,
                    recommendations: vec!["Attend class".to_string()],
                }],
            ),
            attempts: 1,
        }
    }

    #[test]
    fn fingerprint_is_deterministic_and_sensitive() {
        let a = Fingerprint::compute(&metrics(40.0), RiskLevel::High);
        let b = Fingerprint::compute(&metrics(40.0), RiskLevel::High);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(a, Fingerprint::compute(&metrics(41.0), RiskLevel::High));
        assert_ne!(a, Fingerprint::compute(&metrics(40.0), RiskLevel::Critical));
    }

    #[tokio::test]
    async fn second_call_hits() {
        let cache = PlanCache::new(CacheConfig::default());
        let fp = Fingerprint::compute(&metrics(40.0), RiskLevel::High);

        let (_, status) = cache
            .get_or_synthesize(&fp, || async { Ok(cached(RiskLevel::High)) })
            .await
            .unwrap();
        assert_eq!(status, CacheStatus::Miss);

        let (plan, status) = cache
            .get_or_synthesize(&fp, || async {
                Err(PipelineError::GenerationUnavailable {
                    reason: "must not be called".to_string(),
                })
            })
            .await
            .unwrap();
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(plan.plan.risk_level(), RiskLevel::High);
    }

    #[tokio::test]
    async fn hits_share_the_shard_with_readers() {
        let cache = PlanCache::new(CacheConfig::default());
        let fp = Fingerprint::compute(&metrics(40.0), RiskLevel::High);
        let stored = Arc::new(cached(RiskLevel::High));
        cache.store(&fp, Arc::clone(&stored));

        // A write-locking lookup would block on the reader held here.
        let reader = cache.slots.get(&fp).unwrap();
        for _ in 0..3 {
            match cache.claim(&fp) {
                Claim::Hit(plan) => assert!(Arc::ptr_eq(&plan, &stored)),
                _ => panic!("fresh entry must be a hit"),
            }
        }
        drop(reader);

        assert_eq!(cache.ready_len(), 1);
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn failures_are_not_stored() {
        let cache = PlanCache::new(CacheConfig::default());
        let fp = Fingerprint::compute(&metrics(40.0), RiskLevel::High);
        let err = cache
            .get_or_synthesize(&fp, || async {
                Err(PipelineError::GenerationTimeout {
                    timeout: Duration::from_secs(1),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::GenerationTimeout { .. }));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn disabled_cache_does_not_retain() {
        let cache = PlanCache::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        let fp = Fingerprint::compute(&metrics(40.0), RiskLevel::High);
        for _ in 0..2 {
            let (_, status) = cache
                .get_or_synthesize(&fp, || async { Ok(cached(RiskLevel::High)) })
                .await
                .unwrap();
            assert_eq!(status, CacheStatus::Miss);
        }
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = PlanCache::new(CacheConfig {
            ttl_secs: 10,
            ..CacheConfig::default()
        });
        let fp = Fingerprint::compute(&metrics(40.0), RiskLevel::High);
        cache
            .get_or_synthesize(&fp, || async { Ok(cached(RiskLevel::High)) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        let (_, status) = cache
            .get_or_synthesize(&fp, || async { Ok(cached(RiskLevel::High)) })
            .await
            .unwrap();
        assert_eq!(status, CacheStatus::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_oldest_beyond_capacity() {
        let cache = PlanCache::new(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });
        let fps: Vec<Fingerprint> = (0..3)
            .map(|i| Fingerprint::compute(&metrics(f64::from(i)), RiskLevel::Low))
            .collect();
        for fp in &fps {
            cache
                .get_or_synthesize(fp, || async { Ok(cached(RiskLevel::Low)) })
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert_eq!(cache.ready_len(), 2);

        let (_, status) = cache
            .get_or_synthesize(&fps[0], || async { Ok(cached(RiskLevel::Low)) })
            .await
            .unwrap();
        assert_eq!(status, CacheStatus::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_synthesis() {
        let cache = PlanCache::new(CacheConfig::default());
        let fp = Fingerprint::compute(&metrics(40.0), RiskLevel::High);
        let calls = AtomicUsize::new(0);

        let run = || {
            cache.get_or_synthesize(&fp, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(cached(RiskLevel::High))
            })
        };
        let (a, b) = tokio::join!(run(), run());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let statuses = [a.unwrap().1, b.unwrap().1];
        assert!(statuses.contains(&CacheStatus::Miss));
        assert!(statuses.contains(&CacheStatus::Joined));
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_receive_leader_failure() {
        let cache = PlanCache::new(CacheConfig::default());
        let fp = Fingerprint::compute(&metrics(40.0), RiskLevel::High);
        let calls = AtomicUsize::new(0);

        let run = || {
            cache.get_or_synthesize(&fp, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
                Err(PipelineError::GenerationUnavailable {
                    reason: "down".to_string(),
                })
            })
        };
        let (a, b) = tokio::join!(run(), run());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(a, Err(PipelineError::GenerationUnavailable { .. })));
        assert!(matches!(b, Err(PipelineError::GenerationUnavailable { .. })));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_leader_releases_in_flight_marker() {
        let cache = PlanCache::new(CacheConfig::default());
        let fp = Fingerprint::compute(&metrics(40.0), RiskLevel::High);

        let leader = cache.get_or_synthesize(&fp, || async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(cached(RiskLevel::High))
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), leader).await;
        assert!(timed_out.is_err());
        assert!(!cache.is_in_flight(&fp));
        assert!(cache.is_empty());

        let (_, status) = cache
            .get_or_synthesize(&fp, || async { Ok(cached(RiskLevel::High)) })
            .await
            .unwrap();
        assert_eq!(status, CacheStatus::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_takes_over_when_leader_is_dropped() {
        let cache = PlanCache::new(CacheConfig::default());
        let fp = Fingerprint::compute(&metrics(40.0), RiskLevel::High);
        let calls = AtomicUsize::new(0);

        let leader = async {
            let _ = tokio::time::timeout(
                Duration::from_millis(100),
                cache.get_or_synthesize(&fp, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(cached(RiskLevel::High))
                }),
            )
            .await;
        };
        let waiter = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache
                .get_or_synthesize(&fp, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(cached(RiskLevel::High))
                })
                .await
        };
        let ((), result) = tokio::join!(leader, waiter);

        let (_, status) = result.unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
