//! Resource-degradation monitor.
//!
//! A background loop samples host CPU/memory/disk utilization, logs a summary
//! with queue depths and success rate, and on threshold breach runs the
//! degradation handler: an intentionally blunt, global remediation that
//! trades cache warmth for memory headroom.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Disks, System};

use crate::config::MonitorConfig;
use crate::engine::EngineCore;

pub(crate) fn over_threshold(cpu_pct: f32, memory_pct: f32, config: &MonitorConfig) -> bool {
    cpu_pct > config.cpu_threshold || memory_pct > config.memory_threshold
}

fn memory_percent(system: &System) -> f32 {
    let total = system.total_memory();
    if total == 0 {
        return 0.0;
    }
    (system.used_memory() as f32 / total as f32) * 100.0
}

fn disk_percent() -> f32 {
    let disks = Disks::new_with_refreshed_list();
    let (total, available) = disks.iter().fold((0u64, 0u64), |(t, a), disk| {
        (t + disk.total_space(), a + disk.available_space())
    });
    if total == 0 {
        return 0.0;
    }
    ((total - available) as f32 / total as f32) * 100.0
}

/// Clear every cache and call out queues near capacity.
fn handle_degradation(core: &EngineCore, cpu_pct: f32, memory_pct: f32) {
    tracing::warn!(
        cpu_pct,
        memory_pct,
        "Resource threshold exceeded, clearing caches"
    );
    core.model_cache.clear();
    core.prediction_cache.clear();

    for queue in core.queues.iter() {
        let depth = queue.len();
        let occupancy = depth as f64 / queue.capacity() as f64;
        if occupancy > core.config.monitor.queue_alert_ratio {
            tracing::warn!(
                level = %queue.level(),
                depth,
                capacity = queue.capacity(),
                "Queue near capacity"
            );
        }
    }
}

/// The sampling loop. Selects the stop signal against the sample sleep so
/// shutdown is observed promptly rather than after a full interval.
pub(crate) async fn monitor_loop(core: Arc<EngineCore>) {
    let interval = Duration::from_secs(core.config.monitor.sample_interval_secs);
    let mut stop = core.stop.subscribe();
    let mut system = System::new();
    tracing::debug!(interval_secs = interval.as_secs(), "Resource monitor started");

    while core.running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if !core.running.load(Ordering::SeqCst) {
            break;
        }

        system.refresh_cpu_usage();
        system.refresh_memory();
        let cpu_pct = system.global_cpu_usage();
        let memory_pct = memory_percent(&system);
        let disk_pct = disk_percent();

        tracing::info!(
            cpu_pct,
            memory_pct,
            disk_pct,
            queued = core.queues.total_pending(),
            success_rate = core.metrics.success_rate(),
            "Resource sample"
        );

        if over_threshold(cpu_pct, memory_pct, &core.config.monitor) {
            handle_degradation(&core, cpu_pct, memory_pct);
        }
    }

    tracing::debug!("Resource monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_check() {
        let config = MonitorConfig::default();
        assert!(!over_threshold(50.0, 50.0, &config));
        assert!(over_threshold(95.0, 50.0, &config));
        assert!(over_threshold(50.0, 95.0, &config));
        // Exactly at the threshold does not trigger.
        assert!(!over_threshold(90.0, 90.0, &config));
    }
}
