//! Local CPU/RAM sampling, shared by the agent's `/system` endpoint and the
//! orchestrator's own entry in `/status`.

use sysinfo::System;

use crate::SystemInfo;

/// Sample CPU usage and memory for this host.
///
/// CPU percent needs two refreshes with a short gap between them, so this
/// blocks the caller for roughly [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`].
pub async fn sample() -> SystemInfo {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    SystemInfo {
        cpu_percent: f64::from(sys.global_cpu_usage()),
        ram_used_mb: sys.used_memory() / 1024 / 1024,
        ram_total_mb: sys.total_memory() / 1024 / 1024,
        instances: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sample_reports_some_memory() {
        let info = sample().await;
        assert!(info.ram_total_mb > 0);
        assert!(info.ram_used_mb <= info.ram_total_mb);
    }
}
