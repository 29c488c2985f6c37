//! Operator configuration from flags and environment

use std::time::Duration;

use clap::Parser;

use crate::adapters::helm_repository::MirrorSettings;
use crate::{Error, Result};

/// App Operator settings
#[derive(Parser, Clone, Debug)]
#[command(name = "app-operator", version, about)]
pub struct OperatorConfig {
    /// Namespace to watch for Apps and Catalogs; all namespaces when unset
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Namespace holding Charts in every target cluster
    #[arg(long, env = "CHART_NAMESPACE", default_value = "giantswarm")]
    pub chart_namespace: String,

    /// Catalog namespace for Apps that do not set spec.catalogNamespace
    #[arg(long, env = "CATALOG_NAMESPACE", default_value = "default")]
    pub catalog_namespace: String,

    /// Seconds between full resyncs of every App and Catalog
    #[arg(long, env = "RESYNC_PERIOD_SECS", default_value_t = 300)]
    pub resync_period_secs: u64,

    /// Seconds a remote cluster client is reused
    #[arg(long, env = "CLIENT_CACHE_TTL_SECS", default_value_t = 8 * 60 * 60)]
    pub client_cache_ttl_secs: u64,

    /// Seconds between scans for clusters that need a status watcher
    #[arg(long, env = "WATCHER_DISCOVERY_INTERVAL_SECS", default_value_t = 60)]
    pub watcher_discovery_interval_secs: u64,

    /// Poll interval set on HelmRepository mirrors
    #[arg(long, env = "HELM_REPOSITORY_INTERVAL", default_value = "10m")]
    pub helm_repository_interval: String,

    /// Index download timeout set on HelmRepository mirrors
    #[arg(long, env = "HELM_REPOSITORY_TIMEOUT", default_value = "60s")]
    pub helm_repository_timeout: String,

    /// Port for /metrics, /healthz and /readyz
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,
}

impl OperatorConfig {
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("chart namespace", &self.chart_namespace),
            ("catalog namespace", &self.catalog_namespace),
            ("HelmRepository interval", &self.helm_repository_interval),
            ("HelmRepository timeout", &self.helm_repository_timeout),
        ];
        if let Some((what, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(Error::ConfigError(format!("{} must not be empty", what)));
        }
        if matches!(&self.watch_namespace, Some(ns) if ns.trim().is_empty()) {
            return Err(Error::ConfigError("watch namespace must not be empty when set".to_string()));
        }

        let periods = [
            ("resync period", self.resync_period_secs),
            ("client cache TTL", self.client_cache_ttl_secs),
            ("watcher discovery interval", self.watcher_discovery_interval_secs),
        ];
        if let Some((what, _)) = periods.iter().find(|(_, v)| *v == 0) {
            return Err(Error::ConfigError(format!("{} must be greater than zero", what)));
        }
        if self.metrics_port == 0 {
            return Err(Error::ConfigError("metrics port must not be zero".to_string()));
        }
        Ok(())
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    pub fn client_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.client_cache_ttl_secs)
    }

    pub fn watcher_discovery_interval(&self) -> Duration {
        Duration::from_secs(self.watcher_discovery_interval_secs)
    }

    pub fn mirror_settings(&self) -> MirrorSettings {
        MirrorSettings {
            interval: self.helm_repository_interval.clone(),
            timeout: self.helm_repository_timeout.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> OperatorConfig {
        OperatorConfig::parse_from(std::iter::once("app-operator").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_are_valid() {
        let config = parse(&[]);
        config.validate().unwrap();
        assert_eq!(config.chart_namespace, "giantswarm");
        assert_eq!(config.client_cache_ttl(), Duration::from_secs(8 * 60 * 60));
        assert_eq!(config.mirror_settings(), MirrorSettings::default());
    }

    #[test]
    fn rejects_empty_chart_namespace() {
        let config = parse(&["--chart-namespace", ""]);
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn rejects_zero_periods() {
        let config = parse(&["--resync-period-secs", "0"]);
        assert!(config.validate().is_err());
    }
}
