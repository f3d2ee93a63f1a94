//! The collector registry: a process-wide store mapping metric names to
//! metrics.
//!
//! Steady-state traffic never goes through the registry; application threads
//! keep the `Arc<Metric>` handle returned at registration and mutate it
//! directly. The registry's own map is only written at registration time and
//! at teardown.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::error::{Result, VitalsError};
use crate::lock::LockDiscipline;
use crate::metric::{Metric, MetricSnapshot};

static DEFAULT_REGISTRY: OnceLock<Arc<Registry>> = OnceLock::new();

pub struct Registry {
    /// Name → metric. BTreeMap keeps serialization order deterministic.
    metrics: RwLock<BTreeMap<String, Arc<Metric>>>,
    /// Lock discipline handed to metrics created through this registry.
    discipline: LockDiscipline,
    closed: AtomicBool,
}

impl Registry {
    pub fn new(discipline: LockDiscipline) -> Self {
        Self {
            metrics: RwLock::new(BTreeMap::new()),
            discipline,
            closed: AtomicBool::new(false),
        }
    }

    /// The lazily-created process-wide default registry.
    ///
    /// Convenience for application wiring; the exposition transports take an
    /// explicit registry instead of consulting global state.
    pub fn default_instance() -> Arc<Registry> {
        DEFAULT_REGISTRY
            .get_or_init(|| Arc::new(Registry::new(LockDiscipline::default())))
            .clone()
    }

    pub fn discipline(&self) -> LockDiscipline {
        self.discipline
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Insert a metric, handing back the handle used for updates.
    pub fn register(&self, metric: Metric) -> Result<Arc<Metric>> {
        let mut metrics = self
            .metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return Err(VitalsError::RegistryClosed);
        }
        if metrics.contains_key(metric.name()) {
            return Err(VitalsError::DuplicateName(metric.name().to_string()));
        }
        let handle = Arc::new(metric);
        metrics.insert(handle.name().to_string(), handle.clone());
        debug!(
            name = handle.name(),
            kind = handle.kind().as_str(),
            "Registered metric"
        );
        Ok(handle)
    }

    /// Create and register a counter using this registry's discipline.
    pub fn counter(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
    ) -> Result<Arc<Metric>> {
        self.register(Metric::counter(name, help, self.discipline))
    }

    /// Create and register a gauge using this registry's discipline.
    pub fn gauge(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
    ) -> Result<Arc<Metric>> {
        self.register(Metric::gauge(name, help, self.discipline))
    }

    /// Create and register a histogram using this registry's discipline.
    pub fn histogram(
        &self,
        name: impl Into<String>,
        help: impl Into<String>,
        bounds: Vec<f64>,
    ) -> Result<Arc<Metric>> {
        self.register(Metric::histogram(name, help, bounds, self.discipline)?)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Metric>> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy every metric's state, each under its own lock.
    ///
    /// Per-metric reads are atomic; there is no snapshot isolation across
    /// metrics, which Prometheus-style exposition does not require. A metric
    /// whose state fails its structural invariants is skipped and reported
    /// rather than failing the whole snapshot.
    pub fn snapshot(&self) -> Result<Vec<MetricSnapshot>> {
        if self.is_closed() {
            return Err(VitalsError::RegistryClosed);
        }
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        let mut snapshots = Vec::with_capacity(metrics.len());
        for metric in metrics.values() {
            match metric.snapshot() {
                Ok(snapshot) if snapshot.is_consistent() => snapshots.push(snapshot),
                Ok(snapshot) => {
                    warn!(name = %snapshot.name, "Skipping inconsistent metric state");
                }
                Err(e) => {
                    warn!(name = metric.name(), error = %e, "Skipping unreadable metric");
                }
            }
        }
        Ok(snapshots)
    }

    /// Tear the registry down: retire every metric and drop the map.
    ///
    /// Callers must stop the pull server and any push daemons first.
    /// Outstanding metric handles stay valid memory but every subsequent
    /// update through them fails with `RegistryClosed`.
    pub fn destroy(&self) {
        self.closed.store(true, Ordering::Release);
        let mut metrics = self
            .metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for metric in metrics.values() {
            metric.retire();
        }
        let count = metrics.len();
        metrics.clear();
        info!(metrics = count, "Registry destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_duplicate_name_rejected_and_first_untouched() {
        let registry = Registry::new(LockDiscipline::Mutex);
        let first = registry.counter("requests_total", "Requests").unwrap();
        first.add(3.0).unwrap();

        let err = registry
            .register(Metric::counter(
                "requests_total",
                "Other",
                LockDiscipline::Mutex,
            ))
            .unwrap_err();
        assert!(matches!(err, VitalsError::DuplicateName(_)));

        // The original registration is still in place and unchanged.
        assert_eq!(registry.len(), 1);
        assert_eq!(first.value().unwrap(), 3.0);
        assert_eq!(registry.get("requests_total").unwrap().help(), "Requests");
    }

    #[test]
    fn test_lookup_after_registration() {
        let registry = Registry::new(LockDiscipline::Rwlock);
        registry.gauge("queue_depth", "Depth").unwrap();
        let handle = registry.get("queue_depth").unwrap();
        handle.set(7.0).unwrap();
        assert_eq!(handle.value().unwrap(), 7.0);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_concurrent_registration_admits_exactly_one() {
        let registry = Arc::new(Registry::new(LockDiscipline::Mutex));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.counter("contended", "c").is_ok())
            })
            .collect();
        let admitted = workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_order_is_deterministic() {
        let registry = Registry::new(LockDiscipline::Mutex);
        registry.counter("zz_last", "z").unwrap();
        registry.counter("aa_first", "a").unwrap();
        let names: Vec<_> = registry
            .snapshot()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["aa_first", "zz_last"]);
    }

    #[test]
    fn test_default_instance_is_idempotent() {
        let a = Registry::default_instance();
        let b = Registry::default_instance();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_destroy_rejects_later_use() {
        let registry = Registry::new(LockDiscipline::Spinlock);
        let counter = registry.counter("c", "c").unwrap();
        counter.inc().unwrap();

        registry.destroy();

        assert!(registry.is_closed());
        assert!(registry.is_empty());
        assert!(matches!(counter.inc(), Err(VitalsError::RegistryClosed)));
        assert!(matches!(
            registry.counter("other", "o"),
            Err(VitalsError::RegistryClosed)
        ));
        assert!(matches!(
            registry.snapshot(),
            Err(VitalsError::RegistryClosed)
        ));
        assert!(registry.get("c").is_none());
    }
}
