//! Client for the versioned content store that holds world snapshots.
//!
//! The store exposes a contents-style API: `GET {base}/{path}` returns the
//! current object's version id (`sha`), and `PUT {base}/{path}` writes new
//! base64 content together with a commit message. Updates must echo the
//! observed version id, which guards against concurrent writers; the store
//! rejects a PUT carrying a stale id.

use std::time::Duration;

use anyhow::Context;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;

use crate::config::StoreConfig;

#[derive(Debug, Deserialize)]
struct ObjectInfo {
    sha: String,
}

pub struct WorldStore {
    base_url: String,
    token: String,
    branch: String,
    http: reqwest::Client,
}

impl WorldStore {
    pub fn new(cfg: &StoreConfig) -> Self {
        Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
            branch: cfg.branch.clone(),
            http: reqwest::Client::builder()
                .user_agent("ember-agent")
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// Version id of the current object, or `None` when it does not exist yet.
    async fn current_version(&self, path: &str) -> anyhow::Result<Option<String>> {
        let resp = self
            .http
            .get(self.object_url(path))
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .context("query existing snapshot")?;

        match resp.status().as_u16() {
            200 => {
                let info: ObjectInfo = resp.json().await.context("parse existing snapshot info")?;
                if info.sha.is_empty() {
                    anyhow::bail!("existing snapshot returned no version id");
                }
                Ok(Some(info.sha))
            }
            404 => Ok(None),
            status => {
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("content store GET returned status {status}: {body}")
            }
        }
    }

    /// Create or update the object at `path` with `bytes`.
    pub async fn publish(&self, path: &str, bytes: &[u8], message: &str) -> anyhow::Result<()> {
        let version = self.current_version(path).await?;

        let mut body = serde_json::json!({
            "message": message,
            "content": BASE64.encode(bytes),
            "branch": self.branch,
        });
        if let Some(sha) = version {
            body["sha"] = serde_json::Value::String(sha);
        }

        let resp = self
            .http
            .put(self.object_url(path))
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await
            .context("upload snapshot")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("content store PUT returned status {status}: {body}");
        }
        Ok(())
    }
}
