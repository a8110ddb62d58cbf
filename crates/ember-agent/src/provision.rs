//! Working-directory provisioning.
//!
//! A fresh instance directory carries everything the child needs to boot with
//! a specific identity: EULA acceptance, server properties bound to the
//! allocated port, the proxy integration config, the operator list, a copy of
//! the server binary and plugin tree, the plugin config naming the instance,
//! and the downloaded world. Re-running over an existing directory overwrites.

use std::path::Path;

use anyhow::Context;

use crate::config::AgentConfig;
use crate::world_download;

pub async fn provision_workdir(
    http: &reqwest::Client,
    cfg: &AgentConfig,
    dir: &Path,
    port: u16,
    name: &str,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create instance directory {}", dir.display()))?;

    std::fs::write(dir.join("eula.txt"), "eula=true\n").context("write eula.txt")?;
    std::fs::write(dir.join("server.properties"), render_server_properties(port))
        .context("write server.properties")?;

    let config_dir = dir.join("config");
    std::fs::create_dir_all(&config_dir).context("create config directory")?;
    std::fs::write(
        config_dir.join("paper-global.yml"),
        render_proxy_config(&cfg.proxy_secret),
    )
    .context("write paper-global.yml")?;

    std::fs::write(dir.join("ops.json"), &cfg.ops_json).context("write ops.json")?;

    copy_file(&cfg.server_jar, &dir.join("paper.jar")).context("copy server jar")?;
    copy_dir(&cfg.plugins_dir, &dir.join("plugins")).context("copy plugin tree")?;
    write_plugin_config(cfg, dir, name)?;

    world_download::install_world(http, &cfg.world_source_url, dir, name)
        .await
        .context("install world")?;

    Ok(())
}

/// Write the plugin's own config, which tells it which logical instance it is.
fn write_plugin_config(cfg: &AgentConfig, dir: &Path, name: &str) -> anyhow::Result<()> {
    let plugin_name = cfg
        .plugin_jar
        .file_stem()
        .ok_or_else(|| anyhow::anyhow!("plugin jar path has no file name"))?;
    let plugin_cfg_dir = dir.join("plugins").join(plugin_name);
    std::fs::create_dir_all(&plugin_cfg_dir).context("create plugin config directory")?;
    std::fs::write(
        plugin_cfg_dir.join("config.yml"),
        format!("type: \"{name}\"\n"),
    )
    .context("write plugin config")
}

/// Refresh the plugin jar in an existing workdir before a restart, so a
/// restarted instance always comes back with the current payload.
pub fn refresh_plugin(cfg: &AgentConfig, dir: &Path) -> anyhow::Result<()> {
    let file_name = cfg
        .plugin_jar
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("plugin jar path has no file name"))?;
    let dst_dir = dir.join("plugins");
    std::fs::create_dir_all(&dst_dir).context("create plugins directory")?;
    copy_file(&cfg.plugin_jar, &dst_dir.join(file_name)).context("copy plugin jar")
}

fn render_server_properties(port: u16) -> String {
    format!(
        "server-port={port}\n\
         motd=Ember instance {port}\n\
         enable-command-block=true\n\
         online-mode=false\n"
    )
}

fn render_proxy_config(secret: &str) -> String {
    format!(
        r#"proxies:
  bungee-cord:
    online-mode: true
  proxy-protocol: false
  velocity:
    enabled: true
    online-mode: true
    secret: {secret}
"#
    )
}

fn copy_file(src: &Path, dst: &Path) -> anyhow::Result<()> {
    std::fs::copy(src, dst)
        .map(drop)
        .with_context(|| format!("copy {} -> {}", src.display(), dst.display()))
}

fn copy_dir(src: &Path, dst: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dst).with_context(|| format!("mkdir {}", dst.display()))?;
    for entry in std::fs::read_dir(src).with_context(|| format!("read dir {}", src.display()))? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&src_path, &dst_path)?;
        } else {
            copy_file(&src_path, &dst_path)?;
        }
    }
    Ok(())
}
