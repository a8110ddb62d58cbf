//! Persisted catalog of instance-manager nodes.
//!
//! Only `{domain, name}` is stored; everything else about a node is observed
//! fresh each poll cycle. Mutations happen under one mutex and rewrite the
//! file before the lock is dropped, so the file always reflects the
//! in-memory list.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub domain: String,
    pub name: String,
}

pub struct Registry {
    path: PathBuf,
    nodes: Mutex<Vec<NodeEntry>>,
}

impl Registry {
    /// Load the registry file. A missing file yields an empty registry; a
    /// file that exists but fails to parse is fatal.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let nodes = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("parse node registry {}", path.display()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).context(format!("read node registry {}", path.display()));
            }
        };
        Ok(Self {
            path,
            nodes: Mutex::new(nodes),
        })
    }

    pub fn list(&self) -> Vec<NodeEntry> {
        self.lock().clone()
    }

    pub fn add(&self, entry: NodeEntry) -> anyhow::Result<()> {
        let mut nodes = self.lock();
        nodes.push(entry);
        self.persist(&nodes)
    }

    /// Remove the entry matching both domain and name. Returns whether an
    /// entry was removed.
    pub fn remove(&self, domain: &str, name: &str) -> anyhow::Result<bool> {
        let mut nodes = self.lock();
        let before = nodes.len();
        nodes.retain(|n| !(n.domain == domain && n.name == name));
        if nodes.len() == before {
            return Ok(false);
        }
        self.persist(&nodes)?;
        Ok(true)
    }

    fn persist(&self, nodes: &[NodeEntry]) -> anyhow::Result<()> {
        let data = serde_json::to_vec_pretty(nodes).context("serialize node registry")?;
        std::fs::write(&self.path, data)
            .with_context(|| format!("write node registry {}", self.path.display()))
    }

    fn lock(&self) -> MutexGuard<'_, Vec<NodeEntry>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(domain: &str, name: &str) -> NodeEntry {
        NodeEntry {
            domain: domain.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn missing_file_means_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(dir.path().join("nodes.json")).unwrap();
        assert!(registry.list().is_empty());
    }

    #[test]
    fn corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(Registry::load(path).is_err());
    }

    #[test]
    fn mutations_are_persisted_and_reloadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");

        let registry = Registry::load(&path).unwrap();
        registry.add(entry("n1:8000", "m1")).unwrap();
        registry.add(entry("n2:8000", "m2")).unwrap();

        let reloaded = Registry::load(&path).unwrap();
        assert_eq!(reloaded.list(), vec![entry("n1:8000", "m1"), entry("n2:8000", "m2")]);
    }

    #[test]
    fn remove_matches_domain_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(dir.path().join("nodes.json")).unwrap();
        registry.add(entry("n1:8000", "m1")).unwrap();

        assert!(!registry.remove("n1:8000", "other").unwrap());
        assert!(!registry.remove("other:8000", "m1").unwrap());
        assert!(registry.remove("n1:8000", "m1").unwrap());
        assert!(registry.list().is_empty());
    }
}
