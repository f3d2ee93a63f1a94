pub mod bridge;
pub mod config;
pub mod error;
pub mod lock;
pub mod metric;
pub mod registry;

pub use config::{AcceptPolicy, ExpositionConfig};
pub use error::{Result, VitalsError};
pub use lock::{Guarded, LockDiscipline};
pub use metric::{buckets, Metric, MetricKind, MetricSnapshot, SnapshotValue};
pub use registry::Registry;
