//! Least-loaded node selection for new instances.

use std::cmp::Ordering;

use ember_types::{NodeReport, NodeState};

/// Pick the node a new instance should run on.
///
/// Only `Online` nodes with a non-zero CPU reading are eligible (a zero
/// reading means no live sample was available yet). Candidates are ordered
/// by ascending CPU, ties broken by larger free RAM.
pub fn least_loaded(reports: &[NodeReport]) -> Option<&NodeReport> {
    reports
        .iter()
        .filter(|r| r.state == NodeState::Online && r.cpu_percent != 0.0)
        .min_by(|a, b| {
            a.cpu_percent
                .partial_cmp(&b.cpu_percent)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.free_ram_mb().cmp(&a.free_ram_mb()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, state: NodeState, cpu: f64, used_mb: u64, total_mb: u64) -> NodeReport {
        NodeReport {
            state,
            domain: format!("{name}:8000"),
            name: name.to_string(),
            cpu_percent: cpu,
            ram_used_mb: used_mb,
            ram_total_mb: total_mb,
            instances: Vec::new(),
        }
    }

    #[test]
    fn empty_fleet_has_no_capacity() {
        assert!(least_loaded(&[]).is_none());
    }

    #[test]
    fn offline_and_warning_nodes_are_ineligible() {
        let reports = vec![
            node("n1", NodeState::Offline, 10.0, 0, 8000),
            node("n2", NodeState::Warning, 10.0, 0, 8000),
        ];
        assert!(least_loaded(&reports).is_none());
    }

    #[test]
    fn zero_cpu_reading_means_no_live_sample() {
        let reports = vec![node("n1", NodeState::Online, 0.0, 0, 8000)];
        assert!(least_loaded(&reports).is_none());
    }

    #[test]
    fn lowest_cpu_wins() {
        let reports = vec![
            node("busy", NodeState::Online, 80.0, 2000, 8000),
            node("idle", NodeState::Online, 5.0, 2000, 8000),
            node("mid", NodeState::Online, 40.0, 2000, 8000),
        ];
        assert_eq!(least_loaded(&reports).unwrap().name, "idle");
    }

    #[test]
    fn cpu_tie_breaks_toward_larger_free_ram() {
        let reports = vec![
            node("n1", NodeState::Online, 20.0, 8000, 16000), // 8000 MB free
            node("n2", NodeState::Online, 20.0, 4000, 16000), // 12000 MB free
        ];
        assert_eq!(least_loaded(&reports).unwrap().name, "n2");
    }
}
