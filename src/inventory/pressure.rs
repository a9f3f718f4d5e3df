//! Pressure time-series sampling.
//!
//! Every node and guest is sampled twice over the hourly timeframe: once
//! with AVERAGE consolidation feeding the smoothed `*_avg` fields and once
//! with MAX consolidation feeding the `*_spike` fields, where the spike is
//! the maximum of the last six samples. A failed fetch defaults all fields
//! to 0.0 and never aborts inventory.

use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::api::{ClusterApi, Consolidation, PressureSample};
use crate::model::{GuestKind, PressureSet, ResourceKind};

/// Pause between consecutive pressure queries to avoid hammering the API.
pub const SAMPLE_YIELD: Duration = Duration::from_millis(100);

/// Samples considered for the spike value.
const SPIKE_WINDOW: usize = 6;

/// Fold two consolidation series into per-resource quadruples.
pub fn build_pressure(average: &[PressureSample], max: &[PressureSample]) -> PressureSet {
    let mut set = PressureSet::default();
    for kind in ResourceKind::ALL {
        let quad = set.get_mut(kind);
        quad.some_avg = latest(average, |s| s.some(kind));
        quad.full_avg = latest(average, |s| s.full(kind));
        quad.some_spike = window_max(max, |s| s.some(kind));
        quad.full_spike = window_max(max, |s| s.full(kind));
    }
    set
}

fn latest(series: &[PressureSample], field: impl Fn(&PressureSample) -> Option<f64>) -> f64 {
    series.iter().rev().find_map(field).unwrap_or(0.0)
}

fn window_max(series: &[PressureSample], field: impl Fn(&PressureSample) -> Option<f64>) -> f64 {
    series
        .iter()
        .rev()
        .take(SPIKE_WINDOW)
        .filter_map(field)
        .fold(0.0, f64::max)
}

/// Sample a node's pressure series. Errors degrade to zeroed quadruples.
pub async fn fetch_node(api: &dyn ClusterApi, node: &str) -> PressureSet {
    let average = match api.node_pressure(node, Consolidation::Average).await {
        Ok(series) => series,
        Err(e) => {
            warn!("Pressure data for node {} unavailable: {}", node, e);
            Vec::new()
        }
    };
    sleep(SAMPLE_YIELD).await;
    let max = match api.node_pressure(node, Consolidation::Max).await {
        Ok(series) => series,
        Err(e) => {
            warn!("Pressure spikes for node {} unavailable: {}", node, e);
            Vec::new()
        }
    };
    sleep(SAMPLE_YIELD).await;
    build_pressure(&average, &max)
}

/// Sample a guest's pressure series. Errors degrade to zeroed quadruples.
pub async fn fetch_guest(
    api: &dyn ClusterApi,
    node: &str,
    kind: GuestKind,
    vmid: u64,
) -> PressureSet {
    let average = match api.guest_pressure(node, kind, vmid, Consolidation::Average).await {
        Ok(series) => series,
        Err(e) => {
            warn!("Pressure data for guest {} unavailable: {}", vmid, e);
            Vec::new()
        }
    };
    sleep(SAMPLE_YIELD).await;
    let max = match api.guest_pressure(node, kind, vmid, Consolidation::Max).await {
        Ok(series) => series,
        Err(e) => {
            warn!("Pressure spikes for guest {} unavailable: {}", vmid, e);
            Vec::new()
        }
    };
    sleep(SAMPLE_YIELD).await;
    build_pressure(&average, &max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu_some: Option<f64>, cpu_full: Option<f64>) -> PressureSample {
        PressureSample {
            pressurecpusome: cpu_some,
            pressurecpufull: cpu_full,
            ..Default::default()
        }
    }

    #[test]
    fn test_latest_skips_trailing_nulls() {
        let series = vec![
            sample(Some(1.0), Some(2.0)),
            sample(Some(3.0), None),
            sample(None, None),
        ];
        let set = build_pressure(&series, &[]);
        assert_eq!(set.cpu.some_avg, 3.0);
        assert_eq!(set.cpu.full_avg, 2.0);
    }

    #[test]
    fn test_spike_is_max_of_last_six() {
        // Seven samples; the first (90.0) falls outside the window.
        let mut series = vec![sample(Some(90.0), Some(90.0))];
        for v in [1.0, 2.0, 3.0, 50.0, 4.0, 5.0] {
            series.push(sample(Some(v), Some(v)));
        }
        let set = build_pressure(&[], &series);
        assert_eq!(set.cpu.some_spike, 50.0);
        assert_eq!(set.cpu.full_spike, 50.0);
    }

    #[test]
    fn test_empty_series_defaults_to_zero() {
        let set = build_pressure(&[], &[]);
        assert_eq!(set.cpu.some_avg, 0.0);
        assert_eq!(set.memory.full_spike, 0.0);
        assert!(!set.any_hot());
    }
}
