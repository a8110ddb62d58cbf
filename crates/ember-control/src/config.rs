//! Orchestrator configuration, read once from the environment at startup.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub listen_port: u16,
    pub proxy_url: String,
    /// Flat registry file holding the `{domain, name}` node list.
    pub registry_path: PathBuf,
    /// Reserved instance the reaper never collects and the lobby reconciler
    /// keeps alive.
    pub fallback_instance: String,
}

impl ControlConfig {
    pub fn from_env() -> Self {
        Self {
            listen_port: env_u16("EMBER_LISTEN_PORT", 8080),
            proxy_url: env_str("EMBER_PROXY_URL", "http://localhost:8081"),
            registry_path: PathBuf::from(env_str("EMBER_REGISTRY_PATH", "nodes.json")),
            fallback_instance: env_str("EMBER_FALLBACK_INSTANCE", "lobby"),
        }
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_str(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_u16(name: &str, default: u16) -> u16 {
    env_opt(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
