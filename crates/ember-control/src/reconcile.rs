//! Idempotent "ensure this instance exists" reconciliation.
//!
//! The happy path is a no-op: the proxy already routes the name. Otherwise
//! the latest fleet observation decides whether to register an existing
//! child, wait out a restart, or place a brand-new instance on the
//! least-loaded node. Two concurrent calls for the same name may both reach
//! placement; the node rejects the second start with "already running", so
//! no duplicate child can exist.

use std::sync::Arc;
use std::time::Duration;

use ember_proxy::ProxyClient;
use ember_types::{Instance, InstanceStatus, NodeReport, host_of};
use regex::Regex;

use crate::error::ControlError;
use crate::placement;
use crate::poller::FleetPoller;

pub const REMOTE_START_TIMEOUT: Duration = Duration::from_secs(90);
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_POLL_ATTEMPTS: u32 = 12;
const LOBBY_WARMUP: Duration = Duration::from_secs(10);
const LOBBY_INTERVAL: Duration = Duration::from_secs(15);

pub struct Reconciler {
    poller: Arc<FleetPoller>,
    proxy: ProxyClient,
    http: reqwest::Client,
}

impl Reconciler {
    pub fn new(poller: Arc<FleetPoller>, proxy: ProxyClient) -> Self {
        Self {
            poller,
            proxy,
            http: reqwest::Client::new(),
        }
    }

    /// Make sure `name` exists somewhere and is routed by the proxy.
    pub async fn ensure_instance(&self, name: &str) -> Result<(), ControlError> {
        if self.proxy.has_server(name).await? {
            return Ok(());
        }

        let reports = self.poller.poll_nodes().await;
        if let Some((node, instance)) = find_instance(&reports, name) {
            return match instance.status {
                status if status.is_active() => {
                    tracing::info!(
                        instance = name,
                        domain = %node.domain,
                        "found existing instance; registering with proxy"
                    );
                    self.register(name, &node.domain, instance.port).await
                }
                InstanceStatus::Restarting => self.wait_for_ready(name).await,
                // Anything else is a state we must not paper over by placing
                // a second copy elsewhere.
                other => Err(ControlError::UnexpectedStatus {
                    name: name.to_string(),
                    status: other.to_string(),
                }),
            };
        }

        let node = placement::least_loaded(&reports)
            .cloned()
            .ok_or(ControlError::NoCapacity)?;
        tracing::info!(
            node = %node.name,
            domain = %node.domain,
            cpu = node.cpu_percent,
            ram_used_mb = node.ram_used_mb,
            "placing instance on least-loaded node"
        );

        let url = format!("http://{}/start-server?name={name}", node.domain);
        let resp = self
            .http
            .get(&url)
            .timeout(REMOTE_START_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                ControlError::NodeGateway(format!("start-server on {} failed: {e}", node.domain))
            })?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ControlError::NodeGateway(format!(
                "start-server on {} returned status {status}: {body}",
                node.domain
            )));
        }

        let port = parse_port_from_response(&body)?.ok_or_else(|| {
            ControlError::NodeGateway(format!("no port found in start-server response: {body}"))
        })?;
        tracing::info!(instance = name, domain = %node.domain, port, "instance started");

        self.register(name, &node.domain, port).await
    }

    async fn register(&self, name: &str, domain: &str, port: u16) -> Result<(), ControlError> {
        let host = host_of(domain);
        self.proxy.add_server(name, host, port).await?;
        tracing::info!(instance = name, host, port, "registered with proxy");
        Ok(())
    }

    /// Poll the fleet until a restarting instance comes back up, then
    /// register it. Disappearance or an unexpected status aborts.
    async fn wait_for_ready(&self, name: &str) -> Result<(), ControlError> {
        tracing::info!(instance = name, "waiting for instance to finish restarting");
        for _ in 0..WAIT_POLL_ATTEMPTS {
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;

            let reports = self.poller.poll_nodes().await;
            let Some((node, instance)) = find_instance(&reports, name) else {
                return Err(ControlError::ReconcileLost(format!(
                    "Instance '{name}' disappeared during restart"
                )));
            };

            match instance.status {
                status if status.is_active() => {
                    tracing::info!(instance = name, "instance is running again; registering");
                    return self.register(name, &node.domain, instance.port).await;
                }
                InstanceStatus::Restarting => {
                    tracing::debug!(instance = name, "still restarting");
                }
                other => {
                    return Err(ControlError::ReconcileLost(format!(
                        "Instance '{name}' changed to unexpected status '{other}' while waiting"
                    )));
                }
            }
        }
        Err(ControlError::ReconcileLost(format!(
            "Timed out waiting for instance '{name}' to restart"
        )))
    }

    /// Keep the fallback instance alive: warm-up, then a fixed cadence.
    pub fn spawn_lobby_loop(self: &Arc<Self>, fallback: String) {
        let reconciler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(LOBBY_WARMUP).await;
            let mut ticker = tokio::time::interval(LOBBY_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = reconciler.ensure_instance(&fallback).await {
                    tracing::warn!(instance = %fallback, error = %e, "lobby reconcile failed");
                }
            }
        });
    }
}

/// Locate `name` in the latest fleet observation.
pub fn find_instance<'a>(
    reports: &'a [NodeReport],
    name: &str,
) -> Option<(&'a NodeReport, &'a Instance)> {
    reports.iter().find_map(|report| {
        report
            .instances
            .iter()
            .find(|i| i.name == name)
            .map(|i| (report, i))
    })
}

/// Extract the allocated port from a node's start-server response: JSON
/// `{"port": N}` (number or numeric string) is preferred, otherwise the
/// first 2–6 digit integer in the body that fits a port.
pub fn parse_port_from_response(body: &str) -> anyhow::Result<Option<u16>> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body)
        && let Some(port) = value.get("port")
    {
        if let Some(n) = port.as_u64()
            && let Ok(port) = u16::try_from(n)
        {
            return Ok(Some(port));
        }
        if let Some(s) = port.as_str()
            && let Ok(port) = s.parse()
        {
            return Ok(Some(port));
        }
    }

    let pattern = Regex::new(r"\b([0-9]{2,6})\b")?;
    Ok(pattern
        .captures_iter(body)
        .find_map(|caps| caps.get(1)?.as_str().parse::<u16>().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_types::NodeState;

    #[test]
    fn parses_json_port_number() {
        assert_eq!(
            parse_port_from_response(r#"{"port":3000}"#).unwrap(),
            Some(3000)
        );
    }

    #[test]
    fn parses_json_port_string() {
        assert_eq!(
            parse_port_from_response(r#"{"port":"3001"}"#).unwrap(),
            Some(3001)
        );
    }

    #[test]
    fn parses_port_from_plain_text() {
        assert_eq!(
            parse_port_from_response("Server 'lobby' started on port 3000").unwrap(),
            Some(3000)
        );
    }

    #[test]
    fn skips_integers_that_do_not_fit_a_port() {
        assert_eq!(
            parse_port_from_response("build 999999 done on 3005").unwrap(),
            Some(3005)
        );
    }

    #[test]
    fn no_port_yields_none() {
        assert_eq!(parse_port_from_response("it broke").unwrap(), None);
        assert_eq!(parse_port_from_response(r#"{"ok":true}"#).unwrap(), None);
    }

    fn report(name: &str, instances: Vec<Instance>) -> NodeReport {
        NodeReport {
            state: NodeState::Online,
            domain: format!("{name}:8000"),
            name: name.to_string(),
            cpu_percent: 10.0,
            ram_used_mb: 0,
            ram_total_mb: 8000,
            instances,
        }
    }

    fn instance(name: &str, status: InstanceStatus) -> Instance {
        Instance {
            name: name.to_string(),
            players: Vec::new(),
            player_count: 0,
            tps: 0.0,
            port: 3000,
            status,
        }
    }

    #[test]
    fn find_instance_scans_every_node() {
        let reports = vec![
            report("m1", vec![instance("lobby", InstanceStatus::Running)]),
            report("m2", vec![instance("alpha", InstanceStatus::Restarting)]),
        ];

        let (node, inst) = find_instance(&reports, "alpha").unwrap();
        assert_eq!(node.name, "m2");
        assert_eq!(inst.status, InstanceStatus::Restarting);
        assert!(find_instance(&reports, "beta").is_none());
    }
}
