use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VitalsError};
use crate::lock::LockDiscipline;

/// Connection filter applied by the pull server before serving a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptPolicy {
    #[default]
    AllowAll,
    LoopbackOnly,
}

impl AcceptPolicy {
    pub fn permits(&self, peer: &SocketAddr) -> bool {
        match self {
            AcceptPolicy::AllowAll => true,
            AcceptPolicy::LoopbackOnly => peer.ip().is_loopback(),
        }
    }
}

/// Exposition configuration, usually loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpositionConfig {
    /// HTTP listen port for the pull server.
    pub port: u16,
    pub accept_policy: AcceptPolicy,
    /// Remote collector endpoint; push is disabled when unset.
    pub push_url: Option<String>,
    /// Minimum time between push attempts.
    #[serde(with = "humantime_serde")]
    pub push_interval: Duration,
    /// Process-wide lock strategy for metric state.
    pub lock_discipline: LockDiscipline,
}

impl Default for ExpositionConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            accept_policy: AcceptPolicy::default(),
            push_url: None,
            push_interval: Duration::from_secs(15),
            lock_discipline: LockDiscipline::default(),
        }
    }
}

impl ExpositionConfig {
    pub fn from_yaml(input: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(input)
            .map_err(|e| VitalsError::InvalidArgument(format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.push_url.is_some() && self.push_interval.is_zero() {
            return Err(VitalsError::InvalidArgument(
                "Push interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExpositionConfig::default();
        assert_eq!(config.port, 9090);
        assert_eq!(config.accept_policy, AcceptPolicy::AllowAll);
        assert!(config.push_url.is_none());
        assert_eq!(config.push_interval, Duration::from_secs(15));
        assert_eq!(config.lock_discipline, LockDiscipline::Mutex);
    }

    #[test]
    fn test_full_yaml() {
        let config = ExpositionConfig::from_yaml(
            r#"
port: 9464
accept_policy: loopback_only
push_url: "http://collector:9091/metrics/job/sample"
push_interval: 250ms
lock_discipline: rwlock
"#,
        )
        .unwrap();
        assert_eq!(config.port, 9464);
        assert_eq!(config.accept_policy, AcceptPolicy::LoopbackOnly);
        assert_eq!(
            config.push_url.as_deref(),
            Some("http://collector:9091/metrics/job/sample")
        );
        assert_eq!(config.push_interval, Duration::from_millis(250));
        assert_eq!(config.lock_discipline, LockDiscipline::Rwlock);
    }

    #[test]
    fn test_zero_push_interval_rejected() {
        let err = ExpositionConfig::from_yaml(
            r#"
push_url: "http://collector:9091/metrics"
push_interval: 0s
"#,
        )
        .unwrap_err();
        assert!(matches!(err, VitalsError::InvalidArgument(_)));
    }

    #[test]
    fn test_accept_policy_filters_peers() {
        let local: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let remote: SocketAddr = "10.1.2.3:9000".parse().unwrap();
        assert!(AcceptPolicy::AllowAll.permits(&remote));
        assert!(AcceptPolicy::LoopbackOnly.permits(&local));
        assert!(!AcceptPolicy::LoopbackOnly.permits(&remote));
    }
}
