//! Periodic sweep that stops and unregisters empty instances.
//!
//! The fallback instance is never collected. A failed stop skips the proxy
//! removal for that instance; a failed proxy removal leaves a dangling
//! routing entry that the next sweep retries.

use std::sync::Arc;
use std::time::Duration;

use ember_proxy::ProxyClient;
use ember_types::Instance;

use crate::poller::FleetPoller;

const WARMUP: Duration = Duration::from_secs(7);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Grace period between stopping a child and removing its proxy route.
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);
const NODE_STOP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Reaper {
    poller: Arc<FleetPoller>,
    proxy: ProxyClient,
    /// Instance name that is never reaped.
    protected: String,
    http: reqwest::Client,
}

impl Reaper {
    pub fn new(poller: Arc<FleetPoller>, proxy: ProxyClient, protected: String) -> Self {
        Self {
            poller,
            proxy,
            protected,
            http: reqwest::Client::new(),
        }
    }

    pub fn spawn(self) {
        tokio::spawn(async move {
            tokio::time::sleep(WARMUP).await;
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        });
    }

    /// One pass over the fleet. Per-instance failures are logged and
    /// skipped; the next sweep retries whatever is still eligible.
    pub async fn sweep(&self) {
        let summary = self.poller.summary().await;
        for node in &summary.managers {
            for instance in &node.instances {
                if !is_reapable(instance, &self.protected) {
                    continue;
                }
                tracing::info!(
                    instance = %instance.name,
                    domain = %node.domain,
                    port = instance.port,
                    "reaping empty instance"
                );

                if let Err(e) = self.stop_on_node(&node.domain, &instance.name).await {
                    tracing::warn!(
                        instance = %instance.name,
                        domain = %node.domain,
                        error = %e,
                        "failed to stop empty instance"
                    );
                    continue;
                }

                // Give the node time to tear the child down before the proxy
                // route disappears.
                tokio::time::sleep(TEARDOWN_GRACE).await;

                if let Err(e) = self.proxy.remove_server(&instance.name).await {
                    tracing::warn!(
                        instance = %instance.name,
                        error = %e,
                        "failed to unregister reaped instance; will retry next sweep"
                    );
                    continue;
                }
                tracing::info!(instance = %instance.name, "stopped and unregistered");
            }
        }
    }

    async fn stop_on_node(&self, domain: &str, name: &str) -> anyhow::Result<()> {
        let url = format!("http://{domain}/stop-server?name={name}");
        let resp = self
            .http
            .get(&url)
            .timeout(NODE_STOP_TIMEOUT)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("stop-server returned status {status}: {body}");
        }
        Ok(())
    }
}

/// An instance is eligible for collection when it is empty, live, and not
/// the protected fallback.
pub fn is_reapable(instance: &Instance, protected: &str) -> bool {
    instance.name != protected && instance.player_count == 0 && instance.status.is_active()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_types::InstanceStatus;

    fn instance(name: &str, players: u32, status: InstanceStatus) -> Instance {
        Instance {
            name: name.to_string(),
            players: Vec::new(),
            player_count: players,
            tps: 20.0,
            port: 3000,
            status,
        }
    }

    #[test]
    fn empty_running_instance_is_reapable() {
        assert!(is_reapable(&instance("gamma", 0, InstanceStatus::Running), "lobby"));
        assert!(is_reapable(&instance("gamma", 0, InstanceStatus::Started), "lobby"));
    }

    #[test]
    fn the_fallback_is_never_reaped() {
        assert!(!is_reapable(&instance("lobby", 0, InstanceStatus::Running), "lobby"));
    }

    #[test]
    fn instances_with_players_are_kept() {
        assert!(!is_reapable(&instance("gamma", 3, InstanceStatus::Running), "lobby"));
    }

    #[test]
    fn transitional_instances_are_kept() {
        assert!(!is_reapable(&instance("gamma", 0, InstanceStatus::Restarting), "lobby"));
        assert!(!is_reapable(&instance("gamma", 0, InstanceStatus::Stopped), "lobby"));
        assert!(!is_reapable(&instance("gamma", 0, InstanceStatus::Unknown), "lobby"));
    }
}
