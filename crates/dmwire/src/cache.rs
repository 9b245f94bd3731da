//! Connection-scoped cache of query results.
//!
//! Entries are keyed by database guid, schema, SQL text and parameter
//! count. Each entry remembers the tables it was read from together with
//! their modification timestamps; when a refresh interval is configured,
//! a hit older than the interval has to be revalidated against fresh
//! timestamps before it is served. The cache holds at most `capacity`
//! bytes of row payload and evicts the least-recently-used entry first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dmwire_core::Row;

use crate::types::Column;

/// Identity of a cached result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub guid: String,
    pub schema: String,
    pub sql: String,
    pub param_count: usize,
}

impl CacheKey {
    pub fn new(guid: &str, schema: &str, sql: &str, param_count: usize) -> Self {
        Self {
            guid: guid.to_string(),
            schema: schema.to_string(),
            sql: sql.to_string(),
            param_count,
        }
    }
}

/// Rows of one cached execution.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub columns: Arc<[Column]>,
    pub rows: Vec<Row>,
    pub table_ids: Vec<i32>,
    pub timestamps: Vec<i64>,
    size: usize,
    last_checked: Instant,
    last_used: u64,
}

impl CachedResult {
    /// Payload bytes this entry counts against the budget.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum Lookup {
    Miss,
    Hit(CachedResult),
    /// Stale by age; probe these tables and call [`ResultCache::confirm`]
    Probe(Vec<i32>),
}

#[derive(Debug)]
pub struct ResultCache {
    entries: HashMap<CacheKey, CachedResult>,
    capacity: usize,
    used: usize,
    refresh: Duration,
    tick: u64,
}

impl ResultCache {
    /// A cache holding up to `capacity` payload bytes. A zero `refresh`
    /// trusts every hit without revalidation.
    pub fn new(capacity: usize, refresh: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            used: 0,
            refresh,
            tick: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Payload bytes currently held.
    pub fn used_bytes(&self) -> usize {
        self.used
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn lookup(&mut self, key: &CacheKey, now: Instant) -> Lookup {
        let tick = self.touch();
        let refresh = self.refresh;
        let Some(entry) = self.entries.get_mut(key) else {
            return Lookup::Miss;
        };
        entry.last_used = tick;
        if refresh.is_zero() || now.saturating_duration_since(entry.last_checked) < refresh {
            return Lookup::Hit(entry.clone());
        }
        Lookup::Probe(entry.table_ids.clone())
    }

    /// Settle a probe. Matching timestamps renew the entry and return it;
    /// anything else evicts it.
    pub fn confirm(&mut self, key: &CacheKey, timestamps: &[i64], now: Instant) -> Option<CachedResult> {
        let fresh = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.timestamps == timestamps);
        if !fresh {
            self.evict(key);
            tracing::debug!(sql = %key.sql, "cached result refreshed on the server");
            return None;
        }
        let entry = self.entries.get_mut(key)?;
        entry.last_checked = now;
        Some(entry.clone())
    }

    /// Store a result. Results without table metadata or larger than the
    /// whole budget are not cached.
    pub fn insert(
        &mut self,
        key: CacheKey,
        columns: Arc<[Column]>,
        rows: Vec<Row>,
        table_ids: Vec<i32>,
        timestamps: Vec<i64>,
        now: Instant,
    ) -> bool {
        if table_ids.is_empty() || !self.is_enabled() {
            return false;
        }
        let size: usize = rows.iter().map(Row::payload_len).sum();
        if size > self.capacity {
            return false;
        }
        self.evict(&key);
        while self.used + size > self.capacity && !self.entries.is_empty() {
            self.evict_lru();
        }
        let last_used = self.touch();
        self.used += size;
        self.entries.insert(
            key,
            CachedResult {
                columns,
                rows,
                table_ids,
                timestamps,
                size,
                last_checked: now,
                last_used,
            },
        );
        true
    }

    pub fn evict(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.remove(key) {
            self.used -= entry.size;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.used = 0;
    }

    fn evict_lru(&mut self) {
        let lru = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = lru {
            self.evict(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmwire_core::Value;

    fn key(sql: &str) -> CacheKey {
        CacheKey::new("guid-1", "SYSDBA", sql, 0)
    }

    fn rows(text: &str, n: usize) -> Vec<Row> {
        (0..n)
            .map(|_| Row::new(vec!["C".to_string()], vec![Value::Text(text.to_string())]))
            .collect()
    }

    fn columns() -> Arc<[Column]> {
        Arc::from(vec![Column {
            name: "C".to_string(),
            ..Column::default()
        }])
    }

    fn put(cache: &mut ResultCache, sql: &str, text: &str, now: Instant) -> bool {
        cache.insert(key(sql), columns(), rows(text, 2), vec![1001], vec![7], now)
    }

    #[test]
    fn test_zero_refresh_trusts_hits() {
        let mut cache = ResultCache::new(1024, Duration::ZERO);
        let start = Instant::now();
        assert!(put(&mut cache, "SELECT C FROM T", "abc", start));
        let later = start + Duration::from_secs(3600);
        match cache.lookup(&key("SELECT C FROM T"), later) {
            Lookup::Hit(entry) => assert_eq!(entry.rows.len(), 2),
            other => panic!("expected a hit, got {other:?}"),
        }
    }

    #[test]
    fn test_stale_entry_needs_probe() {
        let mut cache = ResultCache::new(1024, Duration::from_secs(10));
        let start = Instant::now();
        put(&mut cache, "Q", "abc", start);

        assert!(matches!(
            cache.lookup(&key("Q"), start + Duration::from_secs(1)),
            Lookup::Hit(_)
        ));
        let later = start + Duration::from_secs(11);
        match cache.lookup(&key("Q"), later) {
            Lookup::Probe(ids) => assert_eq!(ids, vec![1001]),
            other => panic!("expected a probe, got {other:?}"),
        }
        assert!(cache.confirm(&key("Q"), &[7], later).is_some());
        assert!(matches!(cache.lookup(&key("Q"), later), Lookup::Hit(_)));
    }

    #[test]
    fn test_changed_timestamp_evicts() {
        let mut cache = ResultCache::new(1024, Duration::from_secs(10));
        let start = Instant::now();
        put(&mut cache, "Q", "abc", start);
        let used = cache.used_bytes();
        assert!(used > 0);

        assert!(cache.confirm(&key("Q"), &[8], start).is_none());
        assert!(!cache.contains(&key("Q")));
        assert_eq!(cache.used_bytes(), 0);
        // a missing table also counts as a change
        put(&mut cache, "Q", "abc", start);
        assert!(cache.confirm(&key("Q"), &[], start).is_none());
    }

    #[test]
    fn test_byte_budget_evicts_lru() {
        let start = Instant::now();
        let entry_size: usize = rows("0123456789", 2).iter().map(Row::payload_len).sum();
        let mut cache = ResultCache::new(entry_size * 2, Duration::ZERO);
        put(&mut cache, "A", "0123456789", start);
        put(&mut cache, "B", "0123456789", start);
        // A becomes most recently used
        assert!(matches!(cache.lookup(&key("A"), start), Lookup::Hit(_)));
        put(&mut cache, "C", "0123456789", start);

        assert!(cache.contains(&key("A")));
        assert!(!cache.contains(&key("B")));
        assert!(cache.contains(&key("C")));
        assert!(cache.used_bytes() <= entry_size * 2);
    }

    #[test]
    fn test_rejects_uncacheable_results() {
        let start = Instant::now();
        let mut cache = ResultCache::new(8, Duration::ZERO);
        assert!(!cache.insert(key("Q"), columns(), rows("x", 1), Vec::new(), Vec::new(), start));
        assert!(!put(&mut cache, "Q", &"x".repeat(64), start));
        assert!(cache.is_empty());

        let mut disabled = ResultCache::new(0, Duration::ZERO);
        assert!(!disabled.is_enabled());
        assert!(!put(&mut disabled, "Q", "x", start));
    }

    #[test]
    fn test_key_separates_schema_and_params() {
        let a = CacheKey::new("g", "S1", "Q", 0);
        let b = CacheKey::new("g", "S2", "Q", 0);
        let c = CacheKey::new("g", "S1", "Q", 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
