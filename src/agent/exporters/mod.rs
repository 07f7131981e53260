//! Metric exporters.
//!
//! An exporter is anything that turns host state into labelled samples.
//! Concrete sensor integrations (`ipmitool`, `nvidia-smi`, NVMe SMART,
//! PSU readings) plug in behind the same trait; the stock build ships the
//! sysinfo-backed [`system::SystemExporter`].
//!
//! One failing exporter never prevents the others from shipping: the
//! runtime goes through [`safe_collect`], which logs and returns empty.

pub mod system;

use tracing::{debug, error};

use crate::Sample;

/// Contract for pluggable collectors.
pub trait MetricExporter: Send + Sync {
    fn name(&self) -> &str;

    /// Checked once at startup; unavailable exporters are skipped.
    fn available(&self) -> bool {
        true
    }

    /// Produce the current samples. Collection is a synchronous snapshot;
    /// anything slow or blocking belongs in the exporter's own process
    /// handling, not here.
    fn collect(&mut self, now: i64) -> anyhow::Result<Vec<Sample>>;
}

/// Collect with per-exporter error isolation.
pub fn safe_collect(exporter: &mut dyn MetricExporter, now: i64) -> Vec<Sample> {
    match exporter.collect(now) {
        Ok(samples) => {
            debug!("{}: collected {} samples", exporter.name(), samples.len());
            samples
        }
        Err(e) => {
            error!("{} collection failed: {e:#}", exporter.name());
            Vec::new()
        }
    }
}

/// Convenience constructor used by samples built inside exporters.
pub fn sample(metric_name: &str, value: f64, now: i64) -> Sample {
    Sample {
        metric_name: metric_name.to_string(),
        labels: Default::default(),
        value,
        timestamp: now,
        value_kind_hint: None,
    }
}

/// Labelled variant of [`sample`].
pub fn labelled_sample(
    metric_name: &str,
    value: f64,
    now: i64,
    labels: &[(&str, &str)],
) -> Sample {
    Sample {
        metric_name: metric_name.to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        value,
        timestamp: now,
        value_kind_hint: None,
    }
}

/// Integer-hinted variant for counters and byte totals.
pub fn counter_sample(
    metric_name: &str,
    value: u64,
    now: i64,
    labels: &[(&str, &str)],
) -> Sample {
    let mut s = labelled_sample(metric_name, value as f64, now, labels);
    s.value_kind_hint = Some("int".to_string());
    s
}
