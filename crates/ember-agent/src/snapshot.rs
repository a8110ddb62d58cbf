//! World snapshotting.
//!
//! Produces a deflated zip of the live world directory, rooted at the world
//! subtree, and pushes it to the content store as `{name}.zip`. Per-player
//! subtrees are excluded so a restored world never clobbers live player
//! state.

use std::path::Path;

use anyhow::Context;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::world_store::WorldStore;

/// World subtrees that never make it into a snapshot.
pub const EXCLUDED_SUBTREES: [&str; 3] = ["advancements", "playerdata", "stats"];

/// Zip `world_dir` into `dest`, skipping any path with an excluded segment.
/// Directories are represented with a trailing slash; files are deflated.
pub fn archive_world(world_dir: &Path, dest: &Path) -> anyhow::Result<()> {
    let out = std::fs::File::create(dest)
        .with_context(|| format!("create archive {}", dest.display()))?;
    let mut zip = zip::ZipWriter::new(out);
    let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    add_dir(&mut zip, world_dir, "", opts)?;
    zip.finish().context("finalize archive")?;
    Ok(())
}

fn add_dir(
    zip: &mut zip::ZipWriter<std::fs::File>,
    dir: &Path,
    prefix: &str,
    opts: SimpleFileOptions,
) -> anyhow::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("read dir {}", dir.display()))?
        .collect::<Result<_, _>>()
        .with_context(|| format!("read dir {}", dir.display()))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if EXCLUDED_SUBTREES.contains(&name.as_ref()) {
            continue;
        }

        let rel = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        };
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            zip.add_directory(format!("{rel}/"), opts)
                .with_context(|| format!("add directory entry {rel}"))?;
            add_dir(zip, &path, &rel, opts)?;
        } else if file_type.is_file() {
            zip.start_file(&rel, opts)
                .with_context(|| format!("add file entry {rel}"))?;
            let mut f = std::fs::File::open(&path)
                .with_context(|| format!("open {}", path.display()))?;
            std::io::copy(&mut f, zip).with_context(|| format!("compress {rel}"))?;
        }
        // Symlinks and other special files are not part of a world.
    }
    Ok(())
}

/// Archive the world under `workdir` and publish it as `{name}.zip`.
pub async fn snapshot_and_publish(
    store: &WorldStore,
    name: &str,
    workdir: &Path,
) -> anyhow::Result<()> {
    let world_dir = workdir.join("world");

    let staged = tempfile::Builder::new()
        .prefix(&format!("{name}-"))
        .suffix(".zip")
        .tempfile()
        .context("create temp archive")?;

    tracing::info!(instance = name, "archiving world");
    archive_world(&world_dir, staged.path())?;
    let bytes = std::fs::read(staged.path()).context("read staged archive")?;

    let message = format!(
        "Save world {name} at {}",
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );
    tracing::info!(instance = name, bytes = bytes.len(), "uploading world snapshot");
    store.publish(&format!("{name}.zip"), &bytes, &message).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn populate_world(root: &Path) {
        fs::create_dir_all(root.join("region")).unwrap();
        fs::write(root.join("region/r.0.0.mca"), b"chunkdata").unwrap();
        fs::write(root.join("level.dat"), b"level").unwrap();
        fs::create_dir_all(root.join("playerdata")).unwrap();
        fs::write(root.join("playerdata/p1.dat"), b"player").unwrap();
        fs::create_dir_all(root.join("stats")).unwrap();
        fs::write(root.join("stats/p1.json"), b"{}").unwrap();
        fs::create_dir_all(root.join("advancements")).unwrap();
        fs::write(root.join("advancements/p1.json"), b"{}").unwrap();
        // an allowed directory that shares a prefix with an excluded one
        fs::create_dir_all(root.join("datapacks/stats_pack")).unwrap();
        fs::write(root.join("datapacks/stats_pack/pack.mcmeta"), b"{}").unwrap();
    }

    fn entry_names(archive_path: &Path) -> Vec<String> {
        let f = fs::File::open(archive_path).unwrap();
        let mut archive = zip::ZipArchive::new(f).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn excluded_subtrees_never_appear() {
        let world = tempfile::tempdir().unwrap();
        populate_world(world.path());
        let dest = tempfile::NamedTempFile::new().unwrap();

        archive_world(world.path(), dest.path()).unwrap();

        for name in entry_names(dest.path()) {
            for segment in name.trim_end_matches('/').split('/') {
                assert!(
                    !EXCLUDED_SUBTREES.contains(&segment),
                    "entry {name} leaks excluded segment {segment}"
                );
            }
        }
    }

    #[test]
    fn archive_keeps_relative_paths_and_dir_entries() {
        let world = tempfile::tempdir().unwrap();
        populate_world(world.path());
        let dest = tempfile::NamedTempFile::new().unwrap();

        archive_world(world.path(), dest.path()).unwrap();
        let names = entry_names(dest.path());

        assert!(names.contains(&"level.dat".to_string()));
        assert!(names.contains(&"region/".to_string()));
        assert!(names.contains(&"region/r.0.0.mca".to_string()));
        assert!(names.contains(&"datapacks/stats_pack/pack.mcmeta".to_string()));
    }

    #[test]
    fn archived_files_round_trip() {
        let world = tempfile::tempdir().unwrap();
        populate_world(world.path());
        let dest = tempfile::NamedTempFile::new().unwrap();

        archive_world(world.path(), dest.path()).unwrap();

        let f = fs::File::open(dest.path()).unwrap();
        let mut archive = zip::ZipArchive::new(f).unwrap();
        let mut entry = archive.by_name("region/r.0.0.mca").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Deflated);
        let mut data = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut data).unwrap();
        assert_eq!(data, b"chunkdata");
    }
}
