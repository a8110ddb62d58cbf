//! Child-process supervision.
//!
//! One record per named instance, kept in a map behind a mutex that is never
//! held across I/O. Readiness is detected from the child's merged console
//! output: the first line containing both `Done` and `For help` fires a
//! single-shot latch; the readers keep draining afterwards so the pipe never
//! backs up into the child. If every stream ends without the token the latch
//! closes, and the waiter fails through the timeout branch instead of
//! blocking forever.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Context;
use ember_types::{Instance, InstanceStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::port_pool::PortPool;
use crate::provision;

pub const READY_TIMEOUT: Duration = Duration::from_secs(60);
pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct ChildRecord {
    port: u16,
    workdir: PathBuf,
    status: InstanceStatus,
    child: Option<Child>,
    pid: Option<u32>,
}

#[derive(Clone)]
pub struct Supervisor {
    children: Arc<Mutex<HashMap<String, ChildRecord>>>,
    ports: Arc<StdMutex<PortPool>>,
    config: Arc<AgentConfig>,
    /// Client for world archive downloads; generous timeout, archives can be
    /// large.
    http: reqwest::Client,
}

impl Supervisor {
    pub fn new(config: Arc<AgentConfig>) -> Self {
        Self {
            children: Arc::new(Mutex::new(HashMap::new())),
            ports: Arc::new(StdMutex::new(PortPool::new(config.base_port))),
            config,
            http: reqwest::Client::builder()
                .user_agent("ember-agent")
                .timeout(Duration::from_secs(15 * 60))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Snapshot of the live instance map for `/system`.
    pub async fn instances(&self) -> Vec<Instance> {
        self.children
            .lock()
            .await
            .iter()
            .map(|(name, rec)| Instance {
                name: name.clone(),
                players: Vec::new(),
                player_count: 0,
                tps: 0.0,
                port: rec.port,
                status: rec.status,
            })
            .collect()
    }

    /// Provision and start a new instance, returning its allocated port once
    /// the child has emitted the readiness token.
    pub async fn start(&self, name: &str) -> Result<u16, AgentError> {
        // Claim the name and a port up front; until the child is ready the
        // record reports `restarting` so concurrent reconcilers wait instead
        // of placing a duplicate.
        let port = {
            let mut children = self.children.lock().await;
            if children.contains_key(name) {
                return Err(AgentError::AlreadyExists(name.to_string()));
            }
            let port = self.lock_ports().allocate();
            children.insert(
                name.to_string(),
                ChildRecord {
                    port,
                    workdir: self.workdir_for(port),
                    status: InstanceStatus::Restarting,
                    child: None,
                    pid: None,
                },
            );
            port
        };
        let workdir = self.workdir_for(port);

        tracing::info!(instance = name, port, workdir = %workdir.display(), "starting instance");
        if let Err(e) =
            provision::provision_workdir(&self.http, &self.config, &workdir, port, name).await
        {
            self.discard(name).await;
            return Err(AgentError::Provisioning(e));
        }

        match self.spawn_and_await_ready(name, &workdir).await {
            Ok((child, pid)) => {
                self.commit_running(name, child, pid).await;
                tracing::info!(instance = name, port, "instance fully started");
                Ok(port)
            }
            Err(e) => {
                self.discard(name).await;
                Err(e)
            }
        }
    }

    /// Stop an instance and release its port. Idempotent: stopping a name
    /// that is not running succeeds without doing anything.
    pub async fn stop(&self, name: &str) -> Result<(), AgentError> {
        let Some(rec) = self.children.lock().await.remove(name) else {
            tracing::debug!(instance = name, "stop requested for absent instance");
            return Ok(());
        };

        let result = match rec.child {
            Some(child) => shutdown_child(name, child, rec.pid).await,
            None => Ok(()),
        };
        // The port goes back to the pool no matter how the shutdown went.
        self.lock_ports().release(rec.port);
        tracing::info!(instance = name, port = rec.port, "instance stopped");
        result
    }

    /// Mark an instance as restarting and hand back its port and workdir.
    /// The port stays bound to the workdir for the whole cycle.
    pub async fn begin_restart(&self, name: &str) -> Result<(u16, PathBuf), AgentError> {
        let mut children = self.children.lock().await;
        let rec = children
            .get_mut(name)
            .ok_or_else(|| AgentError::NotFound(name.to_string()))?;
        if rec.status == InstanceStatus::Restarting {
            return Err(AgentError::BadRequest(format!(
                "Server '{name}' is already restarting"
            )));
        }
        rec.status = InstanceStatus::Restarting;
        tracing::info!(instance = name, "status set to restarting");
        Ok((rec.port, rec.workdir.clone()))
    }

    /// Undo `begin_restart` when the cycle aborts before the child was
    /// touched.
    pub async fn cancel_restart(&self, name: &str) {
        let mut children = self.children.lock().await;
        if let Some(rec) = children.get_mut(name)
            && rec.child.is_some()
        {
            rec.status = InstanceStatus::Running;
        }
    }

    /// Stop semantics for a restart cycle: the child goes away but the record
    /// keeps its port and workdir.
    pub async fn stop_held(&self, name: &str) -> Result<(), AgentError> {
        let (child, pid) = {
            let mut children = self.children.lock().await;
            let rec = children
                .get_mut(name)
                .ok_or_else(|| AgentError::NotFound(name.to_string()))?;
            (rec.child.take(), rec.pid.take())
        };
        match child {
            Some(child) => shutdown_child(name, child, pid).await,
            // Process already gone; nothing to tear down.
            None => Ok(()),
        }
    }

    /// Re-launch a held instance on its existing port and workdir, without
    /// reprovisioning. The plugin payload is refreshed first. On failure the
    /// record is removed and the port released.
    pub async fn restart_held(&self, name: &str) -> Result<u16, AgentError> {
        let (port, workdir) = {
            let children = self.children.lock().await;
            let rec = children
                .get(name)
                .ok_or_else(|| AgentError::NotFound(name.to_string()))?;
            (rec.port, rec.workdir.clone())
        };

        if let Err(e) = provision::refresh_plugin(&self.config, &workdir) {
            self.discard(name).await;
            return Err(AgentError::Provisioning(e));
        }

        match self.spawn_and_await_ready(name, &workdir).await {
            Ok((child, pid)) => {
                self.commit_running(name, child, pid).await;
                tracing::info!(instance = name, port, "instance restarted");
                Ok(port)
            }
            Err(e) => {
                self.discard(name).await;
                Err(e)
            }
        }
    }

    /// Drop a record whose cycle failed midway and return its port.
    pub async fn abandon(&self, name: &str) {
        self.discard(name).await;
    }

    fn workdir_for(&self, port: u16) -> PathBuf {
        self.config.data_root.join(format!("paper_server_{port}"))
    }

    fn lock_ports(&self) -> std::sync::MutexGuard<'_, PortPool> {
        self.ports.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn discard(&self, name: &str) {
        if let Some(rec) = self.children.lock().await.remove(name) {
            self.lock_ports().release(rec.port);
        }
    }

    async fn commit_running(&self, name: &str, child: Child, pid: Option<u32>) {
        let mut children = self.children.lock().await;
        if let Some(rec) = children.get_mut(name) {
            rec.status = InstanceStatus::Running;
            rec.child = Some(child);
            rec.pid = pid;
        }
    }

    /// Spawn the server process in `workdir` and wait for the readiness
    /// token on its console output.
    async fn spawn_and_await_ready(
        &self,
        name: &str,
        workdir: &Path,
    ) -> Result<(Child, Option<u32>), AgentError> {
        let heap = &self.config.java_heap;
        let mut cmd = Command::new("java");
        cmd.arg(format!("-Xmx{heap}"))
            .arg(format!("-Xms{heap}"))
            .args(["-jar", "paper.jar", "--nogui"])
            .current_dir(workdir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn server process (cwd {})", workdir.display()))?;
        let pid = child.id();

        let (latch, ready) = ReadyLatch::new(2);
        match child.stdout.take() {
            Some(out) => spawn_line_scanner(out, name.to_string(), latch.clone()),
            None => latch.stream_closed(),
        }
        match child.stderr.take() {
            Some(err) => spawn_line_scanner(err, name.to_string(), latch.clone()),
            None => latch.stream_closed(),
        }

        match tokio::time::timeout(READY_TIMEOUT, ready).await {
            Ok(Ok(())) => Ok((child, pid)),
            // Timed out, or every stream closed without the token.
            _ => {
                tracing::warn!(instance = name, "start timed out; killing child");
                let _ = child.kill().await;
                Err(AgentError::StartTimeout(name.to_string()))
            }
        }
    }
}

/// Graceful-then-forceful shutdown: interrupt, wait up to [`STOP_TIMEOUT`],
/// then kill and reap.
async fn shutdown_child(name: &str, mut child: Child, pid: Option<u32>) -> Result<(), AgentError> {
    signal_interrupt(pid);
    match tokio::time::timeout(STOP_TIMEOUT, child.wait()).await {
        Ok(Ok(_status)) => Ok(()),
        Ok(Err(e)) => Err(AgentError::StopFailure {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => {
            tracing::warn!(instance = name, "did not stop in {STOP_TIMEOUT:?}, killing");
            child.kill().await.map_err(|e| AgentError::StopFailure {
                name: name.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

#[cfg(unix)]
fn signal_interrupt(pid: Option<u32>) {
    if let Some(pid) = pid {
        let rc = unsafe { libc::kill(pid as i32, libc::SIGINT) };
        if rc == -1 {
            tracing::warn!(pid, "failed to deliver SIGINT; will escalate to kill");
        }
    }
}

#[cfg(not(unix))]
fn signal_interrupt(_pid: Option<u32>) {}

/// Single-shot readiness signal shared by the console readers.
///
/// The first `fire` wins; later matches observe the latch already taken and
/// drop silently. When the last open stream ends without a match, the sender
/// is dropped so waiters unblock with a closed-channel error.
struct ReadyLatch {
    tx: StdMutex<Option<oneshot::Sender<()>>>,
    open_streams: AtomicUsize,
}

impl ReadyLatch {
    fn new(streams: usize) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: StdMutex::new(Some(tx)),
                open_streams: AtomicUsize::new(streams),
            }),
            rx,
        )
    }

    fn fire(&self) {
        if let Some(tx) = self.take() {
            let _ = tx.send(());
        }
    }

    fn stream_closed(&self) {
        if self.open_streams.fetch_sub(1, Ordering::SeqCst) == 1 {
            drop(self.take());
        }
    }

    fn take(&self) -> Option<oneshot::Sender<()>> {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

fn spawn_line_scanner<R>(stream: R, name: String, latch: Arc<ReadyLatch>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::info!(target: "ember_agent::console", instance = %name, "{line}");
            if is_ready_line(&line) {
                latch.fire();
                // Keep draining so the child never blocks on a full pipe.
            }
        }
        latch.stream_closed();
    });
}

fn is_ready_line(line: &str) -> bool {
    line.contains("Done") && line.contains("For help")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn ready_line_needs_both_markers() {
        assert!(is_ready_line(
            r#"[12:00:01 INFO]: Done (3.201s)! For help, type "help""#
        ));
        assert!(!is_ready_line("[12:00:00 INFO]: Done loading plugins"));
        assert!(!is_ready_line("For help, see the wiki"));
        assert!(!is_ready_line("[12:00:00 INFO]: Preparing spawn area"));
    }

    #[tokio::test]
    async fn latch_fires_at_most_once() {
        let (latch, rx) = ReadyLatch::new(1);
        latch.fire();
        latch.fire();
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn latch_closes_when_all_streams_end() {
        let (latch, rx) = ReadyLatch::new(2);
        latch.stream_closed();
        latch.stream_closed();
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn scanner_fires_on_ready_line() {
        let console = Cursor::new(
            b"[INFO]: Starting minecraft server\n\
              [INFO]: Done (3.2s)! For help, type \"help\"\n\
              [INFO]: trailing output\n"
                .to_vec(),
        );
        let (latch, rx) = ReadyLatch::new(1);
        spawn_line_scanner(console, "test".to_string(), latch);

        let signalled = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("scanner should resolve quickly");
        assert!(signalled.is_ok());
    }

    #[tokio::test]
    async fn scanner_closes_latch_on_eof_without_token() {
        let console = Cursor::new(b"[INFO]: lines\n[INFO]: but never ready\n".to_vec());
        let (latch, rx) = ReadyLatch::new(1);
        spawn_line_scanner(console, "test".to_string(), latch);

        let signalled = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("scanner should resolve quickly");
        assert!(signalled.is_err(), "EOF without token must close the latch");
    }

    #[tokio::test]
    async fn stop_of_absent_instance_is_idempotent() {
        let supervisor = Supervisor::new(Arc::new(AgentConfig::from_env()));
        assert!(supervisor.stop("ghost").await.is_ok());
        assert!(supervisor.stop("ghost").await.is_ok());
    }

    #[tokio::test]
    async fn begin_restart_requires_a_record() {
        let supervisor = Supervisor::new(Arc::new(AgentConfig::from_env()));
        let err = supervisor.begin_restart("ghost").await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn begin_restart_rejects_an_already_restarting_instance() {
        let supervisor = Supervisor::new(Arc::new(AgentConfig::from_env()));
        supervisor.children.lock().await.insert(
            "alpha".to_string(),
            ChildRecord {
                port: 3000,
                workdir: PathBuf::from("paper_server_3000"),
                status: InstanceStatus::Running,
                child: None,
                pid: None,
            },
        );

        let (port, _) = supervisor.begin_restart("alpha").await.unwrap();
        assert_eq!(port, 3000);

        let err = supervisor.begin_restart("alpha").await.unwrap_err();
        assert!(matches!(err, AgentError::BadRequest(_)));
        assert!(err.to_string().contains("already restarting"));
    }
}
