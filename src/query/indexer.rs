use crate::errors::{AppError, AppResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Maps metric names and tag keys to the integer ids the metrics backend stores.
pub trait MetricIndexer: Send + Sync {
    /// `Ok(None)` means the string has never been indexed for this organization.
    fn resolve(&self, organization_id: u64, value: &str) -> AppResult<Option<u64>>;
}

/// Indexer backed by a process-local table. Unknown strings either stay
/// unresolved or get the next free id, depending on `auto_assign`.
#[derive(Debug, Default)]
pub struct InMemoryIndexer {
    entries: Mutex<HashMap<String, u64>>,
    next_id: AtomicU64,
    auto_assign: bool,
    lookups: AtomicU64,
}

impl InMemoryIndexer {
    pub fn new(auto_assign: bool) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            auto_assign,
            lookups: AtomicU64::new(0),
        }
    }

    pub fn with_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let entries: HashMap<String, u64> = entries.into_iter().map(|(key, id)| (key.into(), id)).collect();
        let next_id = entries.values().copied().max().unwrap_or(0) + 1;
        Self {
            entries: Mutex::new(entries),
            next_id: AtomicU64::new(next_id),
            auto_assign: false,
            lookups: AtomicU64::new(0),
        }
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}

impl MetricIndexer for InMemoryIndexer {
    fn resolve(&self, _organization_id: u64, value: &str) -> AppResult<Option<u64>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AppError::Internal("indexer mutex poisoned".to_string()))?;
        if let Some(id) = entries.get(value) {
            return Ok(Some(*id));
        }
        if !self.auto_assign {
            return Ok(None);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.insert(value.to_string(), id);
        Ok(Some(id))
    }
}

/// Memoizes another indexer so each distinct `(organization, value)` pair is
/// looked up at most once, including lookups that came back empty.
#[derive(Debug)]
pub struct CachingIndexer<I> {
    inner: I,
    cache: Mutex<HashMap<(u64, String), Option<u64>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<I: MetricIndexer> CachingIndexer<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl<I: MetricIndexer> MetricIndexer for CachingIndexer<I> {
    fn resolve(&self, organization_id: u64, value: &str) -> AppResult<Option<u64>> {
        let key = (organization_id, value.to_string());
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| AppError::Internal("indexer cache mutex poisoned".to_string()))?;
        if let Some(cached) = cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(*cached);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(organization_id, value, "metric indexer cache miss");
        let resolved = self.inner.resolve(organization_id, value)?;
        cache.insert(key, resolved);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::{CachingIndexer, InMemoryIndexer, MetricIndexer};

    #[test]
    fn caching_indexer_hits_inner_once_per_value() {
        let indexer = CachingIndexer::new(InMemoryIndexer::with_entries([("transaction", 7u64)]));

        assert_eq!(indexer.resolve(1, "transaction").expect("resolve"), Some(7));
        assert_eq!(indexer.resolve(1, "transaction").expect("resolve"), Some(7));
        assert_eq!(indexer.resolve(1, "missing").expect("resolve"), None);
        assert_eq!(indexer.resolve(1, "missing").expect("resolve"), None);

        assert_eq!(indexer.inner().lookups(), 2);
        assert_eq!(indexer.hits(), 2);
        assert_eq!(indexer.misses(), 2);
    }

    #[test]
    fn caching_indexer_keys_by_organization() {
        let indexer = CachingIndexer::new(InMemoryIndexer::with_entries([("span.op", 3u64)]));
        indexer.resolve(1, "span.op").expect("org 1");
        indexer.resolve(2, "span.op").expect("org 2");
        assert_eq!(indexer.inner().lookups(), 2);
    }

    #[test]
    fn auto_assign_hands_out_stable_ids() {
        let indexer = InMemoryIndexer::new(true);
        let first = indexer.resolve(1, "a").expect("a");
        let second = indexer.resolve(1, "b").expect("b");
        assert_ne!(first, second);
        assert_eq!(indexer.resolve(1, "a").expect("a again"), first);
    }

    #[test]
    fn seeded_indexer_leaves_unknown_values_unresolved() {
        let indexer = InMemoryIndexer::with_entries([("a", 41u64)]);
        assert_eq!(indexer.resolve(1, "b").expect("b"), None);
    }
}
