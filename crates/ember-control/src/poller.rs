//! Fleet polling: periodic fan-out to every registered node.
//!
//! Each node is asked for `/system` in parallel with a short per-node
//! timeout, and tagged `Online`/`Warning`/`Offline` from the outcome. The
//! composite summary additionally folds in the proxy's status and this
//! host's own load, then merges proxy-side player counts and TPS into the
//! node observations by instance name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ember_proxy::ProxyClient;
use ember_types::{FleetSummary, NodeReport, NodeState, ProxyServerInfo, SystemInfo};

use crate::registry::{NodeEntry, Registry};

pub const NODE_POLL_TIMEOUT: Duration = Duration::from_secs(2);

pub struct FleetPoller {
    registry: Arc<Registry>,
    proxy: ProxyClient,
    http: reqwest::Client,
}

impl FleetPoller {
    pub fn new(registry: Arc<Registry>, proxy: ProxyClient) -> Self {
        Self {
            registry,
            proxy,
            http: reqwest::Client::new(),
        }
    }

    /// Observe every registered node in parallel.
    pub async fn poll_nodes(&self) -> Vec<NodeReport> {
        let entries = self.registry.list();
        futures::future::join_all(entries.into_iter().map(|entry| self.observe(entry))).await
    }

    async fn observe(&self, entry: NodeEntry) -> NodeReport {
        let url = format!("http://{}/system", entry.domain);
        let resp = match self.http.get(&url).timeout(NODE_POLL_TIMEOUT).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(domain = %entry.domain, error = %e, "node is offline");
                return NodeReport::unreachable(entry.domain, entry.name, NodeState::Offline);
            }
        };

        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(domain = %entry.domain, error = %e, "failed to read /system body");
                return NodeReport::unreachable(entry.domain, entry.name, NodeState::Warning);
            }
        };

        match serde_json::from_slice::<SystemInfo>(&body) {
            Ok(sys) => NodeReport {
                state: NodeState::Online,
                domain: entry.domain,
                name: entry.name,
                cpu_percent: sys.cpu_percent,
                ram_used_mb: sys.ram_used_mb,
                ram_total_mb: sys.ram_total_mb,
                instances: sys.instances,
            },
            Err(e) => {
                tracing::warn!(domain = %entry.domain, error = %e, "failed to decode /system JSON");
                NodeReport::unreachable(entry.domain, entry.name, NodeState::Warning)
            }
        }
    }

    /// Proxy status + local load + node fan-out, with per-instance player
    /// figures merged in from the proxy.
    pub async fn summary(&self) -> FleetSummary {
        let (proxy, system, mut managers) = tokio::join!(
            self.proxy.status(),
            ember_types::system::sample(),
            self.poll_nodes(),
        );
        merge_proxy_stats(&mut managers, &proxy.servers);
        FleetSummary {
            proxy,
            system,
            managers,
        }
    }
}

/// Copy `player_count` and `tps` from the proxy's per-server figures onto
/// matching node instances.
pub fn merge_proxy_stats(managers: &mut [NodeReport], servers: &[ProxyServerInfo]) {
    let by_name: HashMap<&str, &ProxyServerInfo> =
        servers.iter().map(|s| (s.name.as_str(), s)).collect();
    for manager in managers {
        for instance in &mut manager.instances {
            if let Some(info) = by_name.get(instance.name.as_str()) {
                instance.player_count = info.players.max(0.0) as u32;
                instance.tps = info.tps as f32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_types::{Instance, InstanceStatus};

    fn report_with(instances: Vec<Instance>) -> NodeReport {
        NodeReport {
            state: NodeState::Online,
            domain: "n1:8000".into(),
            name: "m1".into(),
            cpu_percent: 10.0,
            ram_used_mb: 1024,
            ram_total_mb: 8192,
            instances,
        }
    }

    fn instance(name: &str) -> Instance {
        Instance {
            name: name.into(),
            players: Vec::new(),
            player_count: 0,
            tps: 0.0,
            port: 3000,
            status: InstanceStatus::Running,
        }
    }

    #[test]
    fn merge_fills_matching_instances_only() {
        let mut managers = vec![report_with(vec![instance("lobby"), instance("alpha")])];
        let servers = vec![ProxyServerInfo {
            name: "lobby".into(),
            players: 7.0,
            tps: 19.6,
        }];

        merge_proxy_stats(&mut managers, &servers);

        let lobby = &managers[0].instances[0];
        assert_eq!(lobby.player_count, 7);
        assert!((lobby.tps - 19.6).abs() < 0.01);

        let alpha = &managers[0].instances[1];
        assert_eq!(alpha.player_count, 0);
        assert_eq!(alpha.tps, 0.0);
    }

    #[test]
    fn merge_clamps_negative_player_counts() {
        let mut managers = vec![report_with(vec![instance("lobby")])];
        let servers = vec![ProxyServerInfo {
            name: "lobby".into(),
            players: -1.0,
            tps: 20.0,
        }];
        merge_proxy_stats(&mut managers, &servers);
        assert_eq!(managers[0].instances[0].player_count, 0);
    }
}
