//! Walks the source tree and collects the documents to classify.

use crate::config::ScanConfig;
use crate::models::FileTask;
use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Default)]
pub struct Discovery {
    /// Sorted by path so that partitioning is deterministic.
    pub files: Vec<FileTask>,
    /// Entries the walker could not read.
    pub unreadable: usize,
}

/// Collects files under `root` whose extension is one of
/// `scan.extensions`. Hidden entries, `scan.exclude` globs and anything
/// inside `skip_dirs` (the destination tree, for instance) are left out.
///
/// Blocking; call from `spawn_blocking` in async code.
pub fn discover(root: &Path, scan: &ScanConfig, skip_dirs: &[PathBuf]) -> anyhow::Result<Discovery> {
    let root = root
        .canonicalize()
        .with_context(|| format!("source directory {} is not accessible", root.display()))?;
    if !root.is_dir() {
        anyhow::bail!("source path {} is not a directory", root.display());
    }
    let excludes = build_globset(&scan.exclude)?;
    let extensions: HashSet<String> = scan
        .extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect();
    let skip: Vec<PathBuf> = skip_dirs.iter().filter_map(|d| d.canonicalize().ok()).collect();

    let mut discovery = Discovery::default();
    let walker = WalkDir::new(&root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || should_descend(e.path(), &excludes, &skip));
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable entry: {e}");
                discovery.unreadable += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(task) = FileTask::from_path(entry.path()) {
            if extensions.contains(&task.ext) {
                discovery.files.push(task);
            }
        }
    }
    discovery.files.sort();
    debug!(root = %root.display(), found = discovery.files.len(), "scan finished");
    Ok(discovery)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid exclude pattern {pat:?}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn should_descend(path: &Path, excludes: &GlobSet, skip: &[PathBuf]) -> bool {
    !is_hidden(path) && !excludes.is_match(path) && !skip.iter().any(|d| path.starts_with(d))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// blake3 of the whole file, hex encoded.
pub fn full_hash(path: &Path) -> io::Result<String> {
    use std::io::Read;
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
