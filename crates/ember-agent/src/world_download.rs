//! World archive download and extraction.
//!
//! Worlds are hosted as `{name}.zip` under a static base URL. The download
//! streams to disk with periodic progress logging, retries transient
//! failures, and the extraction refuses entries that would escape the
//! destination directory.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;

const DOWNLOAD_ATTEMPTS: u32 = 3;
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Fetch and unpack the world archive for `name` into `<workdir>/world`.
/// Any pre-existing world directory is removed first.
pub async fn install_world(
    http: &reqwest::Client,
    base_url: &str,
    workdir: &Path,
    name: &str,
) -> anyhow::Result<()> {
    let url = format!("{}/{name}.zip", base_url.trim_end_matches('/'));
    let zip_path = workdir.join("world.zip");

    tracing::info!(instance = name, url, "downloading world archive");
    let mut last_err: Option<anyhow::Error> = None;
    let mut downloaded = false;
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        match download_with_progress(http, &url, &zip_path).await {
            Ok(()) => {
                downloaded = true;
                break;
            }
            Err(e) => {
                tracing::warn!(instance = name, attempt, error = %e, "world download failed");
                last_err = Some(e);
                if attempt < DOWNLOAD_ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(
                        200_u64.saturating_mul(2_u64.pow(attempt - 1)),
                    ))
                    .await;
                }
            }
        }
    }
    if !downloaded {
        return Err(last_err.unwrap_or_else(|| anyhow::anyhow!("world download failed")));
    }

    let world_dir = workdir.join("world");
    if world_dir.exists() {
        tracing::info!(instance = name, "removing old world directory");
        std::fs::remove_dir_all(&world_dir).context("remove old world directory")?;
    }

    tracing::info!(instance = name, "extracting world archive");
    extract_zip_safely(&zip_path, &world_dir).context("extract world archive")?;
    tracing::info!(instance = name, "world installed");
    Ok(())
}

async fn download_with_progress(
    http: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> anyhow::Result<()> {
    let resp = http
        .get(url)
        .send()
        .await
        .context("fetch world archive")?
        .error_for_status()
        .context("fetch world archive (status)")?;

    let total = resp.content_length();
    let mut out = std::fs::File::create(dest).context("create world.zip")?;
    let mut stream = resp.bytes_stream();

    let started = tokio::time::Instant::now();
    let mut last_report = started;
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("read world archive body")?;
        out.write_all(&chunk).context("write world.zip")?;
        downloaded += chunk.len() as u64;

        if last_report.elapsed() >= PROGRESS_INTERVAL {
            let secs = started.elapsed().as_secs_f64().max(0.001);
            let mb_per_sec = downloaded as f64 / secs / 1024.0 / 1024.0;
            match total {
                Some(total) if total > 0 => {
                    let percent = downloaded as f64 / total as f64 * 100.0;
                    tracing::info!("world download: {percent:.1}% ({mb_per_sec:.2} MB/s)");
                }
                _ => tracing::info!(
                    "world download: {downloaded} bytes ({mb_per_sec:.2} MB/s)"
                ),
            }
            last_report = tokio::time::Instant::now();
        }
    }

    out.flush().context("flush world.zip")?;
    Ok(())
}

/// Turn an archive entry name into a relative path, rejecting anything that
/// could escape the extraction root.
fn normalize_rel_path(name: &str) -> anyhow::Result<PathBuf> {
    let mut out = PathBuf::new();
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => anyhow::bail!("path escapes archive root"),
            part => out.push(part),
        }
    }
    Ok(out)
}

pub(crate) fn extract_zip_safely(zip_path: &Path, out_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(out_dir)?;
    let f = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(f)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().to_string();
        let trimmed = name.trim_end_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        let rel = normalize_rel_path(trimmed)
            .map_err(|e| anyhow::anyhow!("invalid zip path {trimmed:?}: {e}"))?;
        if rel.as_os_str().is_empty() {
            continue;
        }

        let out_path = out_dir.join(&rel);
        if name.ends_with('/') {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&out_path)?;
        std::io::copy(&mut file, &mut out)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, Option<&[u8]>)]) -> tempfile::NamedTempFile {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut writer = zip::ZipWriter::new(tmp.reopen().unwrap());
        let opts = SimpleFileOptions::default();
        for (name, content) in entries {
            match content {
                Some(bytes) => {
                    writer.start_file(*name, opts).unwrap();
                    writer.write_all(bytes).unwrap();
                }
                None => {
                    writer.add_directory(*name, opts).unwrap();
                }
            }
        }
        writer.finish().unwrap();
        tmp
    }

    #[test]
    fn normalize_rejects_parent_components() {
        assert!(normalize_rel_path("../etc/passwd").is_err());
        assert!(normalize_rel_path("region/../../x").is_err());
    }

    #[test]
    fn normalize_strips_leading_separators() {
        assert_eq!(
            normalize_rel_path("/region/r.0.0.mca").unwrap(),
            PathBuf::from("region/r.0.0.mca")
        );
    }

    #[test]
    fn extracts_files_and_directories() {
        let zip = build_zip(&[
            ("region", None),
            ("region/r.0.0.mca", Some(b"chunkdata")),
            ("level.dat", Some(b"level")),
        ]);
        let out = tempfile::tempdir().unwrap();
        extract_zip_safely(zip.path(), out.path()).unwrap();

        assert_eq!(
            std::fs::read(out.path().join("region/r.0.0.mca")).unwrap(),
            b"chunkdata"
        );
        assert_eq!(std::fs::read(out.path().join("level.dat")).unwrap(), b"level");
    }

    #[test]
    fn refuses_zip_slip_entries() {
        let zip = build_zip(&[("../escape.txt", Some(b"nope"))]);
        let out = tempfile::tempdir().unwrap();
        assert!(extract_zip_safely(zip.path(), out.path()).is_err());
    }
}
