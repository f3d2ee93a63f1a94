//! HTTP exposition transports for a vitals registry.
//!
//! Two ways out of the process: the pull server answers scrapes on demand,
//! the push daemon delivers snapshots to a remote collector on a timer.
//! Both take the registry as an explicit dependency and stop cleanly via a
//! watch-channel shutdown signal.

pub mod pull;
pub mod push;

pub use pull::PullServer;
pub use push::PushDaemon;

/// Content type for the Prometheus text exposition format.
pub(crate) const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";
