use async_trait::async_trait;
use charter_core::repository::CatalogProvider;
use charter_core::vessel::{AddOn, PricingRule, ScheduleRule, Vessel};
use charter_core::{CoreError, CoreResult};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    /// Entries younger than this are served without touching upstream.
    pub ttl: Duration,
    /// How long past `ttl` an entry may still be served when upstream fails.
    pub stale_for: Duration,
    /// Bound on every upstream call.
    pub timeout: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            stale_for: Duration::from_secs(300),
            timeout: Duration::from_secs(2),
        }
    }
}

struct Entry<V> {
    value: V,
    fetched_at: Instant,
}

struct TtlMap<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash, V: Clone> TtlMap<K, V> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn get_within(&self, key: &K, max_age: Duration) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.fetched_at.elapsed() <= max_age)
            .map(|e| e.value.clone())
    }

    async fn put(&self, key: K, value: V) {
        self.entries.write().await.insert(
            key,
            Entry {
                value,
                fetched_at: Instant::now(),
            },
        );
    }

    async fn remove(&self, key: &K) {
        self.entries.write().await.remove(key);
    }
}

/// Read-through cache in front of a slower catalog provider.
///
/// Vessel-scoped data is keyed by vessel id. Fresh entries are served for
/// `ttl`; on upstream error or timeout an entry up to `ttl + stale_for` old is
/// served instead, otherwise the caller gets a retryable `Upstream` error.
/// Absent results are cached too.
pub struct CachedCatalog {
    inner: Arc<dyn CatalogProvider>,
    policy: CachePolicy,
    codes: TtlMap<String, Option<Uuid>>,
    vessels: TtlMap<Uuid, Option<Vessel>>,
    schedules: TtlMap<Uuid, Option<ScheduleRule>>,
    pricing: TtlMap<Uuid, Option<PricingRule>>,
    add_ons: TtlMap<String, Option<AddOn>>,
}

impl CachedCatalog {
    pub fn new(inner: Arc<dyn CatalogProvider>, policy: CachePolicy) -> Self {
        Self {
            inner,
            policy,
            codes: TtlMap::new(),
            vessels: TtlMap::new(),
            schedules: TtlMap::new(),
            pricing: TtlMap::new(),
            add_ons: TtlMap::new(),
        }
    }

    /// Drop everything cached for one vessel (called after a catalog sync).
    pub async fn invalidate_vessel(&self, vessel_id: Uuid) {
        self.vessels.remove(&vessel_id).await;
        self.schedules.remove(&vessel_id).await;
        self.pricing.remove(&vessel_id).await;
    }

    async fn read_through<K, V, F, Fut>(
        &self,
        map: &TtlMap<K, V>,
        key: K,
        what: &'static str,
        load: F,
    ) -> CoreResult<V>
    where
        K: Eq + Hash + Clone + Display,
        V: Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<V>>,
    {
        if let Some(hit) = map.get_within(&key, self.policy.ttl).await {
            return Ok(hit);
        }

        let failure = match tokio::time::timeout(self.policy.timeout, load()).await {
            Ok(Ok(value)) => {
                map.put(key, value.clone()).await;
                return Ok(value);
            }
            Ok(Err(e)) if !e.is_retryable() => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => CoreError::Upstream(format!("catalog {what} lookup timed out")),
        };

        let max_age = self.policy.ttl + self.policy.stale_for;
        match map.get_within(&key, max_age).await {
            Some(stale) => {
                warn!(%key, what, error = %failure, "Catalog unavailable, serving stale entry");
                Ok(stale)
            }
            None => Err(failure),
        }
    }
}

#[async_trait]
impl CatalogProvider for CachedCatalog {
    async fn vessel_by_code(&self, code: &str) -> CoreResult<Option<Vessel>> {
        let id = self
            .read_through(&self.codes, code.to_string(), "vessel code", move || async move {
                let vessel = self.inner.vessel_by_code(code).await?;
                if let Some(v) = &vessel {
                    self.vessels.put(v.id, Some(v.clone())).await;
                }
                Ok(vessel.map(|v| v.id))
            })
            .await?;

        match id {
            Some(id) => self.vessel_by_id(id).await,
            None => Ok(None),
        }
    }

    async fn vessel_by_id(&self, id: Uuid) -> CoreResult<Option<Vessel>> {
        self.read_through(&self.vessels, id, "vessel", move || self.inner.vessel_by_id(id))
            .await
    }

    async fn schedule_rule(&self, vessel_id: Uuid) -> CoreResult<Option<ScheduleRule>> {
        self.read_through(&self.schedules, vessel_id, "schedule", move || {
            self.inner.schedule_rule(vessel_id)
        })
        .await
    }

    async fn pricing_rule(&self, vessel_id: Uuid) -> CoreResult<Option<PricingRule>> {
        self.read_through(&self.pricing, vessel_id, "pricing", move || {
            self.inner.pricing_rule(vessel_id)
        })
        .await
    }

    async fn add_on_by_code(&self, code: &str) -> CoreResult<Option<AddOn>> {
        debug!(code, "Add-on lookup");
        self.read_through(&self.add_ons, code.to_string(), "add-on", move || {
            self.inner.add_on_by_code(code)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{vessel, StubCatalog};

    fn seeded() -> (Arc<StubCatalog>, Vessel) {
        let v = vessel("37-AXO", &[4, 8]);
        let mut stub = StubCatalog::default();
        stub.vessels.insert(v.code.clone(), v.clone());
        (Arc::new(stub), v)
    }

    #[tokio::test]
    async fn test_fresh_entries_skip_upstream() {
        let (stub, v) = seeded();
        let cache = CachedCatalog::new(stub.clone(), CachePolicy::default());

        let first = cache.vessel_by_code("37-AXO").await.unwrap();
        let calls = stub.calls();
        let second = cache.vessel_by_code("37-AXO").await.unwrap();

        assert_eq!(first.map(|x| x.id), Some(v.id));
        assert_eq!(second.map(|x| x.id), Some(v.id));
        assert_eq!(stub.calls(), calls);
    }

    #[tokio::test]
    async fn test_serves_stale_when_upstream_fails() {
        let (stub, v) = seeded();
        let policy = CachePolicy {
            ttl: Duration::ZERO,
            stale_for: Duration::from_secs(600),
            timeout: Duration::from_secs(1),
        };
        let cache = CachedCatalog::new(stub.clone(), policy);

        cache.vessel_by_id(v.id).await.unwrap();
        stub.set_failing(true);

        let served = cache.vessel_by_id(v.id).await.unwrap();
        assert_eq!(served.map(|x| x.code), Some("37-AXO".to_string()));
    }

    #[tokio::test]
    async fn test_cold_miss_surfaces_retryable_error() {
        let (stub, v) = seeded();
        stub.set_failing(true);
        let cache = CachedCatalog::new(stub.clone(), CachePolicy::default());

        let err = cache.vessel_by_id(v.id).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let (stub, v) = seeded();
        let cache = CachedCatalog::new(stub.clone(), CachePolicy::default());

        cache.vessel_by_id(v.id).await.unwrap();
        let calls = stub.calls();
        cache.invalidate_vessel(v.id).await;
        cache.vessel_by_id(v.id).await.unwrap();

        assert_eq!(stub.calls(), calls + 1);
    }
}
