//! Client for the routing proxy's admin API.
//!
//! The proxy owns player sessions and the per-server routing table; this
//! crate wraps the handful of endpoints the control plane consumes:
//! `/status`, `/list_servers`, `/add_server`, `/remove_server`, `/move_to`,
//! `/move_from_to` and `/move_list_to`. Responses from deployed proxies have
//! drifted over time, so the routing-table check accepts several shapes.

use std::time::Duration;

use ember_types::ProxyStatus;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("proxy request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("proxy returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid proxy response: {0}")]
    Decode(String),
    #[error("proxy reported failure: {0}")]
    Rejected(String),
}

/// Result of asking the proxy to move every player off a server.
#[derive(Debug, Clone, Deserialize)]
pub struct MoveFromTo {
    pub ok: bool,
    #[serde(default)]
    pub origin_server: String,
    #[serde(default)]
    pub dest_server: String,
    #[serde(default)]
    pub moved_players: Vec<String>,
}

#[derive(Clone)]
pub struct ProxyClient {
    base: String,
    http: reqwest::Client,
}

impl ProxyClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn get_ok(&self, url: &str) -> Result<String, ProxyError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProxyError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// Fetch `/status`. Unreachable or malformed proxies yield a default
    /// status with `error` set, so fleet summaries never fail on the proxy.
    pub async fn status(&self) -> ProxyStatus {
        let url = self.url("/status");
        let resp = match self
            .http
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ProxyStatus {
                    error: Some(e.to_string()),
                    ..ProxyStatus::default()
                };
            }
        };
        match resp.json::<ProxyStatus>().await {
            Ok(s) => s,
            Err(e) => ProxyStatus {
                error: Some(format!("invalid JSON from proxy: {e}")),
                ..ProxyStatus::default()
            },
        }
    }

    /// Whether the proxy already routes `name`.
    ///
    /// Tries `/status` then `/list_servers`; an endpoint that errors is
    /// skipped rather than failing the whole check.
    pub async fn has_server(&self, name: &str) -> Result<bool, ProxyError> {
        for path in ["/status", "/list_servers"] {
            let body = match self.get_ok(&self.url(path)).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::debug!(endpoint = path, error = %e, "proxy routing check failed");
                    continue;
                }
            };
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) else {
                continue;
            };
            if body_lists_server(&value, name) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn add_server(&self, name: &str, host: &str, port: u16) -> Result<(), ProxyError> {
        let url = format!(
            "{}/add_server?name={}&host={}&port={port}",
            self.base,
            urlencode(name),
            urlencode(host),
        );
        self.get_ok(&url).await.map(drop)
    }

    pub async fn remove_server(&self, name: &str) -> Result<(), ProxyError> {
        let url = format!("{}/remove_server?name={}", self.base, urlencode(name));
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(15))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProxyError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    pub async fn move_to(&self, player: &str, server: &str) -> Result<String, ProxyError> {
        let url = format!(
            "{}/move_to?player={}&server={}",
            self.base,
            urlencode(player),
            urlencode(server),
        );
        self.get_ok(&url).await
    }

    /// Evacuate every player from `origin`, optionally toward `destination`.
    pub async fn move_from_to(
        &self,
        origin: &str,
        destination: Option<&str>,
        reason: Option<&str>,
    ) -> Result<MoveFromTo, ProxyError> {
        let mut url = format!("{}/move_from_to?origin={}", self.base, urlencode(origin));
        if let Some(dest) = destination {
            url.push_str(&format!("&destination={}", urlencode(dest)));
        }
        if let Some(reason) = reason {
            url.push_str(&format!("&reason={}", urlencode(reason)));
        }

        let body = self.get_ok(&url).await?;
        let resp: MoveFromTo =
            serde_json::from_str(&body).map_err(|e| ProxyError::Decode(format!("{e} (body: {body})")))?;
        if !resp.ok {
            return Err(ProxyError::Rejected(body));
        }
        Ok(resp)
    }

    /// Move a specific list of players onto `server`.
    pub async fn move_list_to(&self, players: &[String], server: &str) -> Result<(), ProxyError> {
        let url = format!(
            "{}/move_list_to?players={}&server={}",
            self.base,
            urlencode(&players.join(",")),
            urlencode(server),
        );
        self.get_ok(&url).await.map(drop)
    }
}

/// Look for a `{"name": <name>}` object in any of the routing-table shapes
/// deployed proxies have produced: `{proxy:{servers:[..]}}`, `{servers:[..]}`
/// or a bare array.
fn body_lists_server(value: &serde_json::Value, name: &str) -> bool {
    let lists = [
        value.pointer("/proxy/servers"),
        value.get("servers"),
        value.is_array().then_some(value),
    ];
    lists.into_iter().flatten().any(|list| {
        list.as_array().is_some_and(|entries| {
            entries
                .iter()
                .any(|e| e.get("name").and_then(|n| n.as_str()) == Some(name))
        })
    })
}

/// Percent-encode a query value. Instance and player names are short ASCII
/// identifiers, so only the reserved characters need escaping.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b',' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
