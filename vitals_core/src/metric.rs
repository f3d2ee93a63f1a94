//! Named, concurrently-mutable measurements.
//!
//! A [`Metric`] is one of counter, gauge, or histogram. The name, help text,
//! kind, and histogram bucket bounds are immutable after construction; all
//! numeric state lives behind a single [`Guarded`] cell so every update and
//! every snapshot read is atomic with respect to the metric.
//!
//! Histogram buckets are cumulative in the Prometheus sense: a bucket with
//! upper bound `b` counts every observation `<= b`, and a `+Inf` bucket is
//! always implicitly present, so bucket counts are monotonically
//! non-decreasing by bound and the last bucket always equals the total
//! observation count.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::error::{Result, VitalsError};
use crate::lock::{Guarded, LockDiscipline};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

/// Mutable numeric state, guarded by the metric's lock.
enum MetricState {
    Scalar(f64),
    Histogram {
        /// Cumulative counts, one per bound plus the trailing `+Inf` bucket.
        counts: Vec<u64>,
        sum: f64,
        count: u64,
    },
}

pub struct Metric {
    name: String,
    help: String,
    kind: MetricKind,
    /// Histogram upper bounds, strictly increasing; empty for scalars.
    bounds: Vec<f64>,
    /// Set when the owning registry is destroyed; updates are then rejected.
    retired: AtomicBool,
    state: Guarded<MetricState>,
}

impl Metric {
    pub fn counter(
        name: impl Into<String>,
        help: impl Into<String>,
        discipline: LockDiscipline,
    ) -> Self {
        Self::scalar(name, help, MetricKind::Counter, discipline)
    }

    pub fn gauge(
        name: impl Into<String>,
        help: impl Into<String>,
        discipline: LockDiscipline,
    ) -> Self {
        Self::scalar(name, help, MetricKind::Gauge, discipline)
    }

    fn scalar(
        name: impl Into<String>,
        help: impl Into<String>,
        kind: MetricKind,
        discipline: LockDiscipline,
    ) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
            bounds: Vec::new(),
            retired: AtomicBool::new(false),
            state: Guarded::new(discipline, MetricState::Scalar(0.0)),
        }
    }

    /// Build a histogram with the given bucket upper bounds.
    ///
    /// Bounds must be finite and strictly increasing; the `+Inf` bucket is
    /// added internally and must not be listed.
    pub fn histogram(
        name: impl Into<String>,
        help: impl Into<String>,
        bounds: Vec<f64>,
        discipline: LockDiscipline,
    ) -> Result<Self> {
        for pair in bounds.windows(2) {
            if pair[1] <= pair[0] {
                return Err(VitalsError::InvalidArgument(format!(
                    "Histogram bounds must be strictly increasing, got {} after {}",
                    pair[1], pair[0]
                )));
            }
        }
        if bounds.iter().any(|b| !b.is_finite()) {
            return Err(VitalsError::InvalidArgument(
                "Histogram bounds must be finite".to_string(),
            ));
        }
        let counts = vec![0u64; bounds.len() + 1];
        Ok(Self {
            name: name.into(),
            help: help.into(),
            kind: MetricKind::Histogram,
            bounds,
            retired: AtomicBool::new(false),
            state: Guarded::new(
                discipline,
                MetricState::Histogram {
                    counts,
                    sum: 0.0,
                    count: 0,
                },
            ),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn bucket_bounds(&self) -> &[f64] {
        &self.bounds
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_retired() {
            return Err(VitalsError::RegistryClosed);
        }
        Ok(())
    }

    fn ensure_kind(&self, expected: MetricKind, op: &str) -> Result<()> {
        if self.kind != expected {
            return Err(VitalsError::InvalidArgument(format!(
                "Cannot {} {} '{}'",
                op,
                self.kind.as_str(),
                self.name
            )));
        }
        Ok(())
    }

    /// Increment a counter by one.
    pub fn inc(&self) -> Result<()> {
        self.add(1.0)
    }

    /// Add to a counter (non-negative amounts only) or a gauge (any sign).
    pub fn add(&self, amount: f64) -> Result<()> {
        self.ensure_live()?;
        match self.kind {
            MetricKind::Counter => {
                if amount < 0.0 {
                    return Err(VitalsError::InvalidArgument(format!(
                        "Cannot add negative amount {} to counter '{}'",
                        amount, self.name
                    )));
                }
            }
            MetricKind::Gauge => {}
            MetricKind::Histogram => return self.ensure_kind(MetricKind::Counter, "add to"),
        }
        self.state.with_write(|state| {
            if let MetricState::Scalar(v) = state {
                *v += amount;
            }
        });
        Ok(())
    }

    /// Set a gauge to an absolute value.
    pub fn set(&self, value: f64) -> Result<()> {
        self.ensure_live()?;
        self.ensure_kind(MetricKind::Gauge, "set")?;
        self.state.with_write(|state| {
            if let MetricState::Scalar(v) = state {
                *v = value;
            }
        });
        Ok(())
    }

    /// Record an observation into a histogram.
    ///
    /// Every bucket whose bound is `>= value` is incremented, plus the
    /// `+Inf` bucket; the running sum and total count advance with it, all
    /// under one lock acquisition.
    pub fn observe(&self, value: f64) -> Result<()> {
        self.ensure_live()?;
        self.ensure_kind(MetricKind::Histogram, "observe into")?;
        self.state.with_write(|state| {
            if let MetricState::Histogram { counts, sum, count } = state {
                for (i, bound) in self.bounds.iter().enumerate() {
                    if value <= *bound {
                        counts[i] += 1;
                    }
                }
                // The +Inf bucket matches every observation.
                let last = counts.len() - 1;
                counts[last] += 1;
                *sum += value;
                *count += 1;
            }
        });
        Ok(())
    }

    /// Current value of a counter or gauge.
    pub fn value(&self) -> Result<f64> {
        self.ensure_live()?;
        if self.kind == MetricKind::Histogram {
            self.ensure_kind(MetricKind::Counter, "read the scalar value of")?;
        }
        Ok(self.state.with_read(|state| match state {
            MetricState::Scalar(v) => *v,
            MetricState::Histogram { .. } => 0.0,
        }))
    }

    /// Copy the metric's current state under its lock.
    ///
    /// The copy is atomic per metric: a concurrent `observe` is either fully
    /// reflected or not at all, never torn.
    pub fn snapshot(&self) -> Result<MetricSnapshot> {
        self.ensure_live()?;
        let value = self.state.with_read(|state| match state {
            MetricState::Scalar(v) => SnapshotValue::Scalar { value: *v },
            MetricState::Histogram { counts, sum, count } => SnapshotValue::Histogram {
                bounds: self.bounds.clone(),
                counts: counts.clone(),
                sum: *sum,
                count: *count,
            },
        });
        Ok(MetricSnapshot {
            name: self.name.clone(),
            help: self.help.clone(),
            kind: self.kind,
            value,
        })
    }
}

impl std::fmt::Debug for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The guarded state is deliberately omitted: formatting must not
        // take the metric's lock.
        f.debug_struct("Metric")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("bounds", &self.bounds)
            .field("retired", &self.is_retired())
            .finish_non_exhaustive()
    }
}

/// One metric's state, copied out under its lock.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSnapshot {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    #[serde(flatten)]
    pub value: SnapshotValue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SnapshotValue {
    Scalar {
        value: f64,
    },
    Histogram {
        bounds: Vec<f64>,
        counts: Vec<u64>,
        sum: f64,
        count: u64,
    },
}

impl MetricSnapshot {
    /// Structural invariants every histogram snapshot must satisfy.
    pub fn is_consistent(&self) -> bool {
        match &self.value {
            SnapshotValue::Scalar { .. } => true,
            SnapshotValue::Histogram {
                bounds,
                counts,
                count,
                ..
            } => {
                counts.len() == bounds.len() + 1
                    && counts.windows(2).all(|pair| pair[0] <= pair[1])
                    && counts.last() == Some(count)
            }
        }
    }
}

/// Bucket bound generators matching the common Prometheus client helpers.
pub mod buckets {
    use crate::error::{Result, VitalsError};

    /// `count` bounds starting at `start`, each `width` apart.
    pub fn linear(start: f64, width: f64, count: usize) -> Result<Vec<f64>> {
        if count == 0 {
            return Err(VitalsError::InvalidArgument(
                "Bucket count must be positive".to_string(),
            ));
        }
        if width <= 0.0 {
            return Err(VitalsError::InvalidArgument(format!(
                "Linear bucket width must be positive, got {width}"
            )));
        }
        Ok((0..count).map(|i| start + width * i as f64).collect())
    }

    /// `count` bounds starting at `start`, each `factor` times the previous.
    pub fn exponential(start: f64, factor: f64, count: usize) -> Result<Vec<f64>> {
        if count == 0 {
            return Err(VitalsError::InvalidArgument(
                "Bucket count must be positive".to_string(),
            ));
        }
        if start <= 0.0 {
            return Err(VitalsError::InvalidArgument(format!(
                "Exponential bucket start must be positive, got {start}"
            )));
        }
        if factor <= 1.0 {
            return Err(VitalsError::InvalidArgument(format!(
                "Exponential bucket factor must be greater than one, got {factor}"
            )));
        }
        let mut bounds = Vec::with_capacity(count);
        let mut bound = start;
        for _ in 0..count {
            bounds.push(bound);
            bound *= factor;
        }
        Ok(bounds)
    }
}
