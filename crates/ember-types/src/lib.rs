//! Wire types shared between the orchestrator and the per-node agents.
//!
//! Everything here crosses an HTTP boundary as JSON, so the deserialize side
//! is deliberately tolerant: missing lists default to empty, and unknown
//! instance statuses collapse into [`InstanceStatus::Unknown`] rather than
//! failing the whole node report.

pub mod system;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a named instance as reported by its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    /// Emitted by older nodes; equivalent to `Running` for routing purposes.
    Started,
    Restarting,
    Stopped,
    #[serde(other)]
    Unknown,
}

impl InstanceStatus {
    /// Whether the instance has a live, ready child behind it.
    pub fn is_active(self) -> bool {
        matches!(self, InstanceStatus::Running | InstanceStatus::Started)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Started => "started",
            InstanceStatus::Restarting => "restarting",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A named game world living on exactly one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    #[serde(default)]
    pub players: Vec<String>,
    #[serde(default)]
    pub player_count: u32,
    #[serde(default)]
    pub tps: f32,
    pub port: u16,
    pub status: InstanceStatus,
}

/// Observed reachability of a node during a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    Online,
    Warning,
    Offline,
}

/// CPU/RAM/instance snapshot returned by an agent's `/system` endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemInfo {
    pub cpu_percent: f64,
    pub ram_used_mb: u64,
    pub ram_total_mb: u64,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

/// One registered node plus whatever the last poll observed about it.
///
/// Only `domain` and `name` are persisted; the rest is refreshed each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub state: NodeState,
    pub domain: String,
    pub name: String,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub ram_used_mb: u64,
    #[serde(default)]
    pub ram_total_mb: u64,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

impl NodeReport {
    pub fn unreachable(domain: String, name: String, state: NodeState) -> Self {
        Self {
            state,
            domain,
            name,
            cpu_percent: 0.0,
            ram_used_mb: 0,
            ram_total_mb: 0,
            instances: Vec::new(),
        }
    }

    pub fn free_ram_mb(&self) -> u64 {
        self.ram_total_mb.saturating_sub(self.ram_used_mb)
    }
}

/// Per-server figures reported by the routing proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyServerInfo {
    pub name: String,
    #[serde(default)]
    pub players: f64,
    #[serde(default)]
    pub tps: f64,
}

/// The proxy's own `/status` body. `error` is filled in locally when the
/// proxy could not be reached, so `/status` stays serveable without it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyStatus {
    #[serde(default)]
    pub players_total: i64,
    #[serde(default)]
    pub proxy_latency: i64,
    #[serde(default)]
    pub servers: Vec<ProxyServerInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Composite fleet view served by the orchestrator's `/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSummary {
    pub proxy: ProxyStatus,
    pub system: SystemInfo,
    #[serde(default)]
    pub managers: Vec<NodeReport>,
}

/// Strip a `:port` suffix from a node domain, leaving the reachable host.
///
/// Falls back to the full domain when no numeric port suffix is present
/// (e.g. `node1.example.com`).
pub fn host_of(domain: &str) -> &str {
    match domain.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => host,
        _ => domain,
    }
}
