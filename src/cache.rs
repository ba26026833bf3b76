//! Read-through page cache.
//!
//! Listing handlers ask for "the first page" of a dataset under a fixed key.
//! [`PageCache`] serves it from memory while the entry is fresh, otherwise it
//! asks the [`Gateway`] for the first [`ROW_LIMIT`] rows, stores them for
//! [`CACHE_TTL`] and returns them. Store failures pass through untouched and
//! are never cached; an empty page is a valid result and is cached.
//!
//! Entries are keyed by `(DatasetKind, key)`, so reusing a key string for two
//! kinds can never hand back rows of the wrong type.
//!
//! Concurrent misses on the same key are not coalesced: each one queries the
//! store and the last insert wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{
    Car, CarClass, Client, DatasetKind, Maintenance, Page, Record, RentalAgreement,
    RentalHistory,
};

/// Maximum number of rows in any page.
pub const ROW_LIMIT: u32 = 20;

/// Lifetime of a cached page, measured from the moment it is stored.
pub const CACHE_TTL: Duration = Duration::from_secs(262);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache key must not be empty")]
    EmptyKey,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Direction of a bounded query over a dataset's identity column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Executes bounded, ordered queries against the backing store.
///
/// Implementations return at most `limit` rows and may return none; an
/// unreachable store or a failing query is a [`StoreError`].
pub trait Gateway: Send + Sync {
    fn first_n<R: Record>(&self, limit: u32, order: SortOrder) -> Result<Vec<R>, StoreError>;
}

/// Time source for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to (for tests and benchmarks).
#[doc(hidden)]
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.base + offset
    }
}

struct CacheEntry {
    page: Page,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries physically held, including expired ones not yet purged.
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Process-wide page cache in front of a [`Gateway`].
///
/// Built once at startup and shared (behind an `Arc`) by every request
/// handler for the lifetime of the process. Lookups and inserts go through a
/// sharded concurrent map and never wait on the store.
pub struct PageCache<G> {
    gateway: G,
    entries: DashMap<(DatasetKind, String), CacheEntry>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<G: Gateway> PageCache<G> {
    pub fn new(gateway: G) -> Self {
        Self::with_clock(gateway, Arc::new(SystemClock))
    }

    pub fn with_clock(gateway: G, clock: Arc<dyn Clock>) -> Self {
        Self {
            gateway,
            entries: DashMap::new(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// First [`ROW_LIMIT`] rows of `R`'s dataset, cached under `key`.
    ///
    /// A fresh entry is returned as-is (the same `Arc`) without touching the
    /// store. Otherwise exactly one store query is issued; on success the
    /// result, empty or not, is cached for [`CACHE_TTL`].
    pub fn get_page<R: Record>(&self, key: &str) -> Result<Arc<[R]>, CacheError> {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }
        let entry_key = (R::KIND, key.to_string());

        if let Some(rows) = self.lookup::<R>(&entry_key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(kind = %R::KIND, key, rows = rows.len(), "served from cache");
            return Ok(rows);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut rows = self.gateway.first_n::<R>(ROW_LIMIT, SortOrder::Ascending)?;
        rows.truncate(ROW_LIMIT as usize);
        let rows: Arc<[R]> = Arc::from(rows);

        let entry = CacheEntry {
            page: R::into_page(Arc::clone(&rows)),
            expires_at: self.clock.now() + CACHE_TTL,
        };
        self.entries.insert(entry_key, entry);
        info!(
            kind = %R::KIND,
            key,
            rows = rows.len(),
            ttl_secs = CACHE_TTL.as_secs(),
            "loaded from store and cached"
        );
        Ok(rows)
    }

    /// Latest [`ROW_LIMIT`] rows of `R`'s dataset, newest identity first.
    ///
    /// Always queries the store; the cache is neither read nor written.
    pub fn get_fresh_reverse_page<R: Record>(&self) -> Result<Vec<R>, CacheError> {
        let mut rows = self
            .gateway
            .first_n::<R>(ROW_LIMIT, SortOrder::Descending)?;
        rows.truncate(ROW_LIMIT as usize);
        info!(kind = %R::KIND, rows = rows.len(), "loaded latest rows from store");
        Ok(rows)
    }

    /// [`get_page`](Self::get_page) for a kind chosen at runtime.
    pub fn page(&self, kind: DatasetKind, key: &str) -> Result<Page, CacheError> {
        match kind {
            DatasetKind::Client => self.get_page::<Client>(key).map(Client::into_page),
            DatasetKind::Car => self.get_page::<Car>(key).map(Car::into_page),
            DatasetKind::CarClass => self.get_page::<CarClass>(key).map(CarClass::into_page),
            DatasetKind::RentalAgreement => self
                .get_page::<RentalAgreement>(key)
                .map(RentalAgreement::into_page),
            DatasetKind::RentalHistory => self
                .get_page::<RentalHistory>(key)
                .map(RentalHistory::into_page),
            DatasetKind::Maintenance => {
                self.get_page::<Maintenance>(key).map(Maintenance::into_page)
            }
        }
    }

    /// [`get_fresh_reverse_page`](Self::get_fresh_reverse_page) for a kind chosen at runtime.
    pub fn fresh_reverse_page(&self, kind: DatasetKind) -> Result<Page, CacheError> {
        fn wrap<R: Record>(rows: Vec<R>) -> Page {
            R::into_page(Arc::from(rows))
        }
        match kind {
            DatasetKind::Client => self.get_fresh_reverse_page::<Client>().map(wrap),
            DatasetKind::Car => self.get_fresh_reverse_page::<Car>().map(wrap),
            DatasetKind::CarClass => self.get_fresh_reverse_page::<CarClass>().map(wrap),
            DatasetKind::RentalAgreement => {
                self.get_fresh_reverse_page::<RentalAgreement>().map(wrap)
            }
            DatasetKind::RentalHistory => {
                self.get_fresh_reverse_page::<RentalHistory>().map(wrap)
            }
            DatasetKind::Maintenance => self.get_fresh_reverse_page::<Maintenance>().map(wrap),
        }
    }

    /// `true` if a page is cached under `(kind, key)` and has not expired.
    pub fn is_fresh(&self, kind: DatasetKind, key: &str) -> bool {
        let now = self.clock.now();
        self.entries
            .get(&(kind, key.to_string()))
            .is_some_and(|entry| now < entry.expires_at)
    }

    /// Drop entries whose expiry has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "purged expired pages");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Fresh cached rows for `entry_key`, if any. The map guard is released on return.
    fn lookup<R: Record>(&self, entry_key: &(DatasetKind, String)) -> Option<Arc<[R]>> {
        let now = self.clock.now();
        let entry = self.entries.get(entry_key)?;
        if now >= entry.expires_at {
            return None;
        }
        let rows = R::from_page(&entry.page);
        if rows.is_none() {
            warn!(kind = %R::KIND, key = %entry_key.1, "cached page holds another kind, reloading");
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Barrier;

    use rust_decimal::Decimal;

    use super::*;

    #[derive(Default)]
    struct FakeGateway {
        pages: HashMap<DatasetKind, Page>,
        queries: AtomicUsize,
        failing: AtomicBool,
        /// When set, every query waits here before answering.
        barrier: Option<Barrier>,
        /// Return every row regardless of the requested limit.
        ignore_limit: bool,
    }

    impl FakeGateway {
        fn with<R: Record>(mut self, rows: Vec<R>) -> Self {
            self.pages.insert(R::KIND, R::into_page(Arc::from(rows)));
            self
        }

        fn queries(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    impl Gateway for FakeGateway {
        fn first_n<R: Record>(&self, limit: u32, order: SortOrder) -> Result<Vec<R>, StoreError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if let Some(barrier) = &self.barrier {
                barrier.wait();
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            let mut rows: Vec<R> = self
                .pages
                .get(&R::KIND)
                .and_then(R::from_page)
                .map(|rows| rows.to_vec())
                .unwrap_or_default();
            rows.sort_by_key(R::id);
            if order == SortOrder::Descending {
                rows.reverse();
            }
            if !self.ignore_limit {
                rows.truncate(limit as usize);
            }
            Ok(rows)
        }
    }

    fn car(id: i64) -> Car {
        Car {
            car_id: id,
            class_id: 1,
            brand: "Lada".into(),
            model: format!("Vesta {id}"),
            license_plate: format!("A{id:03}AA"),
            year: 2020,
            rental_cost_per_day: Decimal::new(4500, 2),
            status: "available".into(),
        }
    }

    fn client(id: i64) -> Client {
        Client {
            client_id: id,
            full_name: format!("Client {id}"),
            license_number: format!("LIC{id}"),
            phone_number: "555-0100".into(),
        }
    }

    fn cache_with(gateway: FakeGateway) -> (PageCache<FakeGateway>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = PageCache::with_clock(gateway, clock.clone());
        (cache, clock)
    }

    #[test]
    fn first_call_queries_store_second_call_hits_cache() {
        let (cache, _) = cache_with(FakeGateway::default().with((1..=5).map(car).collect()));

        let first = cache.get_page::<Car>("Cars20").unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(cache.gateway().queries(), 1);
        assert_eq!(cache.stats().entries, 1);

        let second = cache.get_page::<Car>("Cars20").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.gateway().queries(), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn hit_within_ttl_and_reload_after_expiry() {
        let (cache, clock) = cache_with(FakeGateway::default().with((1..=5).map(car).collect()));

        let first = cache.get_page::<Car>("Cars20").unwrap();
        clock.advance(CACHE_TTL - Duration::from_secs(1));
        let within = cache.get_page::<Car>("Cars20").unwrap();
        assert!(Arc::ptr_eq(&first, &within));
        assert_eq!(cache.gateway().queries(), 1);

        clock.advance(Duration::from_secs(1));
        assert!(!cache.is_fresh(DatasetKind::Car, "Cars20"));
        let after = cache.get_page::<Car>("Cars20").unwrap();
        assert_eq!(cache.gateway().queries(), 2);
        assert!(!Arc::ptr_eq(&first, &after));
        assert_eq!(after.len(), 5);
        // The expired entry is overwritten, not duplicated.
        assert_eq!(cache.stats().entries, 1);
        assert!(cache.is_fresh(DatasetKind::Car, "Cars20"));
    }

    #[test]
    fn page_is_capped_at_row_limit() {
        let (cache, _) = cache_with(FakeGateway::default().with((1..=45).map(car).collect()));

        let page = cache.get_page::<Car>("Cars20").unwrap();
        assert_eq!(page.len(), ROW_LIMIT as usize);
        assert_eq!(page[0].car_id, 1);
        assert_eq!(page[19].car_id, 20);
    }

    #[test]
    fn oversized_store_result_is_capped() {
        let gateway = FakeGateway {
            ignore_limit: true,
            ..FakeGateway::default()
        }
        .with((1..=45).map(car).collect());
        let (cache, _) = cache_with(gateway);

        let page = cache.get_page::<Car>("Cars20").unwrap();
        assert_eq!(page.len(), ROW_LIMIT as usize);
        assert_eq!(page[19].car_id, 20);

        let latest = cache.get_fresh_reverse_page::<Car>().unwrap();
        assert_eq!(latest.len(), ROW_LIMIT as usize);
        assert_eq!(latest[0].car_id, 45);
        assert_eq!(latest[19].car_id, 26);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn take(&self) -> String {
            String::from_utf8(std::mem::take(&mut *self.0.lock().unwrap())).unwrap()
        }
    }

    #[test]
    fn hit_and_miss_log_different_events() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let (cache, _) = cache_with(FakeGateway::default().with((1..=3).map(car).collect()));

        tracing::subscriber::with_default(subscriber, || {
            cache.get_page::<Car>("Cars20").unwrap();
            let miss = logs.take();
            assert!(miss.contains("loaded from store and cached"));
            assert!(miss.contains("ttl_secs=262"));
            assert!(!miss.contains("served from cache"));

            cache.get_page::<Car>("Cars20").unwrap();
            let hit = logs.take();
            assert!(hit.contains("served from cache"));
            assert!(!hit.contains("loaded from store"));
        });
    }

    #[test]
    fn empty_result_is_cached() {
        let (cache, _) = cache_with(FakeGateway::default());

        let first = cache.get_page::<Client>("Clients20").unwrap();
        assert!(first.is_empty());
        assert!(cache.is_fresh(DatasetKind::Client, "Clients20"));

        let second = cache.get_page::<Client>("Clients20").unwrap();
        assert!(second.is_empty());
        assert_eq!(cache.gateway().queries(), 1);
    }

    #[test]
    fn store_failure_propagates_and_caches_nothing() {
        let (cache, _) = cache_with(FakeGateway::default().with(vec![client(1)]));
        cache.gateway().set_failing(true);

        let err = cache.get_page::<Client>("Clients20").unwrap_err();
        assert!(matches!(err, CacheError::Store(StoreError::Unavailable(_))));
        assert!(!cache.is_fresh(DatasetKind::Client, "Clients20"));
        assert_eq!(cache.stats().entries, 0);

        cache.gateway().set_failing(false);
        let page = cache.get_page::<Client>("Clients20").unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(cache.gateway().queries(), 2);
    }

    #[test]
    fn empty_key_is_rejected_without_store_access() {
        let (cache, _) = cache_with(FakeGateway::default());
        assert!(matches!(
            cache.get_page::<Car>(""),
            Err(CacheError::EmptyKey)
        ));
        assert_eq!(cache.gateway().queries(), 0);
    }

    #[test]
    fn same_key_for_two_kinds_is_kept_apart() {
        let (cache, _) = cache_with(
            FakeGateway::default()
                .with((1..=3).map(car).collect())
                .with((1..=2).map(client).collect()),
        );

        let cars = cache.get_page::<Car>("shared").unwrap();
        let clients = cache.get_page::<Client>("shared").unwrap();
        assert_eq!(cars.len(), 3);
        assert_eq!(clients.len(), 2);
        assert_eq!(cache.gateway().queries(), 2);
        assert_eq!(cache.stats().entries, 2);
    }

    #[test]
    fn fresh_reverse_page_is_descending_and_bypasses_cache() {
        let (cache, _) = cache_with(FakeGateway::default().with((1..=30).map(client).collect()));

        let latest = cache.get_fresh_reverse_page::<Client>().unwrap();
        assert_eq!(latest.len(), ROW_LIMIT as usize);
        assert_eq!(latest[0].client_id, 30);
        assert!(latest.windows(2).all(|w| w[0].client_id > w[1].client_id));
        assert_eq!(cache.stats().entries, 0);

        cache.get_fresh_reverse_page::<Client>().unwrap();
        assert_eq!(cache.gateway().queries(), 2);
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().hits + cache.stats().misses, 0);
    }

    #[test]
    fn fresh_reverse_page_ignores_a_cached_page() {
        let (cache, _) = cache_with(FakeGateway::default().with((1..=3).map(car).collect()));
        cache.get_page::<Car>("Cars20").unwrap();

        let latest = cache.get_fresh_reverse_page::<Car>().unwrap();
        assert_eq!(latest[0].car_id, 3);
        assert_eq!(cache.gateway().queries(), 2);
    }

    #[test]
    fn runtime_dispatch_matches_generic_path() {
        let (cache, _) = cache_with(FakeGateway::default().with((1..=4).map(car).collect()));

        let page = cache.page(DatasetKind::Car, "Cars20").unwrap();
        assert_eq!(page.kind(), DatasetKind::Car);
        assert_eq!(page.len(), 4);
        // Same entry as the typed accessor.
        cache.get_page::<Car>("Cars20").unwrap();
        assert_eq!(cache.gateway().queries(), 1);

        let latest = cache.fresh_reverse_page(DatasetKind::Maintenance).unwrap();
        assert_eq!(latest.kind(), DatasetKind::Maintenance);
        assert!(latest.is_empty());
    }

    #[test]
    fn purge_removes_only_expired_entries() {
        let (cache, clock) = cache_with(FakeGateway::default().with((1..=2).map(car).collect()));
        cache.get_page::<Car>("old").unwrap();
        clock.advance(Duration::from_secs(200));
        cache.get_page::<Car>("new").unwrap();
        clock.advance(Duration::from_secs(100));

        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_fresh(DatasetKind::Car, "new"));
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn concurrent_misses_each_query_and_one_entry_survives() {
        let gateway = FakeGateway {
            barrier: Some(Barrier::new(2)),
            ..FakeGateway::default()
        }
        .with((1..=5).map(car).collect());
        let (cache, _) = cache_with(gateway);

        let (a, b) = std::thread::scope(|s| {
            let a = s.spawn(|| cache.get_page::<Car>("Cars20").unwrap());
            let b = s.spawn(|| cache.get_page::<Car>("Cars20").unwrap());
            (a.join().unwrap(), b.join().unwrap())
        });

        assert_eq!(cache.gateway().queries(), 2);
        assert_eq!(a[..], b[..]);
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn concurrent_reads_across_kinds() {
        let (cache, _) = cache_with(
            FakeGateway::default()
                .with((1..=25).map(car).collect())
                .with((1..=7).map(client).collect()),
        );

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        assert_eq!(cache.get_page::<Car>("Cars20").unwrap().len(), 20);
                        assert_eq!(cache.get_page::<Client>("Clients20").unwrap().len(), 7);
                    }
                });
            }
        });

        assert_eq!(cache.stats().entries, 2);
        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, 8 * 50 * 2);
    }
}
