//! Agent configuration, read once from the environment at startup.

use std::path::PathBuf;

/// Operator entries seeded into every provisioned instance. Override with
/// `EMBER_OPS_JSON` to grant in-game operator rights to real accounts.
const DEFAULT_OPS_JSON: &str = r#"[
    {
        "uuid": "8f4c8f2e-1b9d-4c4e-9a71-2f3fb0c95d4a",
        "name": "fleet-admin",
        "level": 4,
        "bypassesPlayerLimit": false
    }
]
"#;

/// Credentials and location of the versioned blob store world snapshots are
/// published to.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_url: String,
    pub token: String,
    pub branch: String,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub listen_port: u16,
    /// First port handed out by the pool; freed ports are reused below this.
    pub base_port: u16,
    pub data_root: PathBuf,
    pub proxy_url: String,
    pub proxy_secret: String,
    /// Players are evacuated here during save/restart cycles.
    pub fallback_instance: String,
    /// Base URL the initial world archive is fetched from, as `{name}.zip`.
    pub world_source_url: String,
    pub store: Option<StoreConfig>,
    pub java_heap: String,
    pub server_jar: PathBuf,
    pub plugins_dir: PathBuf,
    pub plugin_jar: PathBuf,
    pub ops_json: String,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let store = match (env_opt("EMBER_STORE_URL"), env_opt("EMBER_STORE_TOKEN")) {
            (Some(base_url), Some(token)) => Some(StoreConfig {
                base_url,
                token,
                branch: env_str("EMBER_STORE_BRANCH", "main"),
            }),
            _ => None,
        };

        Self {
            listen_port: env_u16("EMBER_LISTEN_PORT", 8000),
            base_port: env_u16("EMBER_BASE_PORT", 3000),
            data_root: PathBuf::from(env_str("EMBER_DATA_ROOT", ".")),
            proxy_url: env_str("EMBER_PROXY_URL", "http://localhost:8081"),
            proxy_secret: env_str("EMBER_PROXY_SECRET", "ember-dev-secret"),
            fallback_instance: env_str("EMBER_FALLBACK_INSTANCE", "lobby"),
            world_source_url: env_str("EMBER_WORLD_SOURCE_URL", "http://localhost:8082/worlds"),
            store,
            java_heap: env_str("EMBER_JAVA_HEAP", "2G"),
            server_jar: PathBuf::from(env_str("EMBER_SERVER_JAR", "paper.jar")),
            plugins_dir: PathBuf::from(env_str("EMBER_PLUGINS_DIR", "plugins")),
            plugin_jar: PathBuf::from(env_str("EMBER_PLUGIN_JAR", "EmberLink.jar")),
            ops_json: env_str("EMBER_OPS_JSON", DEFAULT_OPS_JSON),
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
