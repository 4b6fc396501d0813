//! Deployment Metrics
//!
//! Phase timings, phase failures and operator installs of one run, kept in
//! a private prometheus registry and written once at the end of the run in
//! the text exposition format (node-exporter textfile collector layout).

use crate::error::{Error, Result};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const METRICS_FILE: &str = "deploy_metrics.prom";

/// Phases take minutes, not milliseconds
const PHASE_BUCKETS: &[f64] = &[5.0, 30.0, 60.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0, 7200.0];

fn internal(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

// =============================================================================
// Deploy Metrics
// =============================================================================

pub struct DeployMetrics {
    registry: Registry,
    phase_duration: HistogramVec,
    phase_failures: IntCounterVec,
    operator_installs: IntCounterVec,
}

impl DeployMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("ocs_deployer".into()), None).map_err(internal)?;

        let phase_duration = HistogramVec::new(
            HistogramOpts::new("phase_duration_seconds", "Wall time of each deployment phase")
                .buckets(PHASE_BUCKETS.to_vec()),
            &["phase"],
        )
        .map_err(internal)?;
        let phase_failures = IntCounterVec::new(
            Opts::new("phase_failures_total", "Deployment phases that ended in an error"),
            &["phase"],
        )
        .map_err(internal)?;
        let operator_installs = IntCounterVec::new(
            Opts::new("operator_installs_total", "Operators installed through OLM"),
            &["package", "cluster"],
        )
        .map_err(internal)?;

        registry.register(Box::new(phase_duration.clone())).map_err(internal)?;
        registry.register(Box::new(phase_failures.clone())).map_err(internal)?;
        registry.register(Box::new(operator_installs.clone())).map_err(internal)?;

        Ok(Self {
            registry,
            phase_duration,
            phase_failures,
            operator_installs,
        })
    }

    /// Record one finished phase
    pub fn observe_phase(&self, phase: &str, elapsed: Duration, ok: bool) {
        self.phase_duration
            .with_label_values(&[phase])
            .observe(elapsed.as_secs_f64());
        if !ok {
            self.phase_failures.with_label_values(&[phase]).inc();
        }
    }

    pub fn record_install(&self, package: &str, cluster: &str) {
        self.operator_installs.with_label_values(&[package, cluster]).inc();
    }

    pub fn phase_failures(&self, phase: &str) -> u64 {
        self.phase_failures.with_label_values(&[phase]).get()
    }

    /// Text exposition of everything recorded so far
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer).map_err(internal)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics: {}", e)))
    }

    /// Write [`METRICS_FILE`] into `dir`
    pub fn write_textfile(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(METRICS_FILE);
        std::fs::write(&path, self.render()?)?;
        info!("Deployment metrics written to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_observations_rendered() {
        let metrics = DeployMetrics::new().unwrap();
        metrics.observe_phase("ocp", Duration::from_secs(1800), true);
        metrics.observe_phase("storage", Duration::from_secs(42), false);
        metrics.record_install("odf-operator", "c1");
        metrics.record_install("odf-operator", "c1");

        let text = metrics.render().unwrap();
        assert!(text.contains("ocs_deployer_phase_duration_seconds_count{phase=\"ocp\"} 1"), "{}", text);
        assert!(text.contains("ocs_deployer_phase_duration_seconds_sum{phase=\"storage\"} 42"));
        assert!(text.contains("ocs_deployer_phase_failures_total{phase=\"storage\"} 1"));
        assert!(!text.contains("ocs_deployer_phase_failures_total{phase=\"ocp\"}"));
        let installs = text
            .lines()
            .find(|l| l.starts_with("ocs_deployer_operator_installs_total{"))
            .unwrap();
        assert!(installs.contains("package=\"odf-operator\"") && installs.contains("cluster=\"c1\""));
        assert!(installs.ends_with(" 2"));
        assert_eq!(metrics.phase_failures("storage"), 1);
    }

    #[test]
    fn test_textfile_written_into_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = DeployMetrics::new().unwrap();
        metrics.observe_phase("dr", Duration::from_secs(3), true);

        let path = metrics.write_textfile(&dir.path().join("run")).unwrap();

        assert_eq!(path, dir.path().join("run").join(METRICS_FILE));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("# TYPE ocs_deployer_phase_duration_seconds histogram"));
    }

    #[test]
    fn test_registries_are_independent() {
        let first = DeployMetrics::new().unwrap();
        let second = DeployMetrics::new().unwrap();
        first.observe_phase("ocp", Duration::from_secs(1), false);
        assert_eq!(second.phase_failures("ocp"), 0);
    }
}
