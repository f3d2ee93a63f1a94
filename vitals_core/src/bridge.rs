//! Snapshot serialization for transport ("the bridge").
//!
//! Converts a registry's current state into a buffer the exposition
//! transports can hand to external systems: the Prometheus text format for
//! scrapes and pushes, JSON as an alternative export.

use std::fmt::Write as _;

use crate::error::Result;
use crate::metric::{MetricSnapshot, SnapshotValue};
use crate::registry::Registry;

/// Render the registry in the Prometheus text exposition format.
pub fn render_text(registry: &Registry) -> Result<String> {
    let snapshots = registry.snapshot()?;
    let mut out = String::new();
    for snapshot in &snapshots {
        render_metric(&mut out, snapshot);
    }
    Ok(out)
}

fn render_metric(out: &mut String, snapshot: &MetricSnapshot) {
    // Writing into a String cannot fail.
    let _ = writeln!(out, "# HELP {} {}", snapshot.name, snapshot.help);
    let _ = writeln!(out, "# TYPE {} {}", snapshot.name, snapshot.kind.as_str());
    match &snapshot.value {
        SnapshotValue::Scalar { value } => {
            let _ = writeln!(out, "{} {}", snapshot.name, value);
        }
        SnapshotValue::Histogram {
            bounds,
            counts,
            sum,
            count,
        } => {
            for (i, bucket_count) in counts.iter().enumerate() {
                match bounds.get(i) {
                    Some(bound) => {
                        let _ = writeln!(
                            out,
                            "{}_bucket{{le=\"{}\"}} {}",
                            snapshot.name, bound, bucket_count
                        );
                    }
                    None => {
                        let _ = writeln!(
                            out,
                            "{}_bucket{{le=\"+Inf\"}} {}",
                            snapshot.name, bucket_count
                        );
                    }
                }
            }
            let _ = writeln!(out, "{}_sum {}", snapshot.name, sum);
            let _ = writeln!(out, "{}_count {}", snapshot.name, count);
        }
    }
}

/// Render the registry as pretty-printed JSON.
pub fn render_json(registry: &Registry) -> Result<String> {
    let snapshots = registry.snapshot()?;
    Ok(serde_json::to_string_pretty(&snapshots)?)
}
