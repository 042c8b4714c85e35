//! Places classified documents into their category folders.

use crate::rules::RuleSet;
use crate::scanner::full_hash;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use storage::models::UNCLASSIFIED;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Copied(PathBuf),
    /// Identical content was already at this path, e.g. from an earlier run
    /// that stopped before its checkpoint.
    AlreadyPresent(PathBuf),
}

impl Placement {
    pub fn path(&self) -> &Path {
        match self {
            Placement::Copied(p) | Placement::AlreadyPresent(p) => p,
        }
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("{0} has no file name")]
    NoFileName(PathBuf),
    #[error("failed to copy into {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl WriteError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> WriteError + '_ {
        move |source| WriteError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Creates `dest` with one folder per category plus the unclassified folder.
pub fn create_category_folders(dest: &Path, rules: &RuleSet) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for name in rules.names().chain([UNCLASSIFIED]) {
        fs::create_dir_all(dest.join(name))?;
    }
    Ok(())
}

/// Fails unless a file can actually be created inside `dir`.
pub fn probe_writable(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    NamedTempFile::new_in(dir)?;
    Ok(())
}

/// Copies `source` into `dir`, starting from the name for `slot`: the plain
/// file name for slot 0, `stem_<slot>.ext` otherwise.
///
/// The copy goes to a temporary file in `dir` first and is then renamed
/// without replacing anything. A name already holding the same bytes counts
/// as done, which makes reprocessing after a resume a no-op. A name holding
/// different bytes moves on to the next number, so concurrent writers and
/// repeated runs never overwrite each other. Sources sharing a file name get
/// distinct slots when planned, so each one ends up with its own copy.
pub fn place(source: &Path, dir: &Path, slot: u32) -> Result<Placement, WriteError> {
    let name = source
        .file_name()
        .ok_or_else(|| WriteError::NoFileName(source.to_path_buf()))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(WriteError::io(dir))?;
    let mut input = fs::File::open(source).map_err(WriteError::io(source))?;
    io::copy(&mut input, tmp.as_file_mut()).map_err(WriteError::io(dir))?;
    tmp.as_file().sync_all().map_err(WriteError::io(dir))?;
    let hash = full_hash(tmp.path()).map_err(WriteError::io(dir))?;

    let mut counter = slot;
    loop {
        let candidate = dir.join(candidate_name(name, counter));
        if candidate.exists() {
            if full_hash(&candidate).ok().as_deref() == Some(hash.as_str()) {
                return Ok(Placement::AlreadyPresent(candidate));
            }
            counter += 1;
            continue;
        }
        match tmp.persist_noclobber(&candidate) {
            Ok(_) => return Ok(Placement::Copied(candidate)),
            // Lost a race for this name; compare against the winner next time round.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => tmp = e.file,
            Err(e) => return Err(WriteError::io(&candidate)(e.error)),
        }
    }
}

fn candidate_name(name: &OsStr, counter: u32) -> PathBuf {
    if counter == 0 {
        return PathBuf::from(name);
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    match path.extension() {
        Some(ext) => PathBuf::from(format!("{}_{}.{}", stem, counter, ext.to_string_lossy())),
        None => PathBuf::from(format!("{}_{}", stem, counter)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::CategoryRule;

    #[test]
    fn identical_content_is_not_copied_twice() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("report.doc");
        fs::write(&source, b"quarterly").unwrap();
        let target = dir.path().join("Reports");
        fs::create_dir(&target).unwrap();

        let first = place(&source, &target, 0).unwrap();
        assert_eq!(first, Placement::Copied(target.join("report.doc")));
        let second = place(&source, &target, 0).unwrap();
        assert_eq!(second, Placement::AlreadyPresent(target.join("report.doc")));
        assert_eq!(fs::read_dir(&target).unwrap().count(), 1);
    }

    #[test]
    fn different_content_gets_a_numbered_name() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("Reports");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("report.doc"), b"old").unwrap();
        fs::write(target.join("report_1.doc"), b"older").unwrap();

        let source = dir.path().join("report.doc");
        fs::write(&source, b"new").unwrap();
        let placed = place(&source, &target, 0).unwrap();
        assert_eq!(placed, Placement::Copied(target.join("report_2.doc")));
        assert_eq!(fs::read(placed.path()).unwrap(), b"new");
        assert_eq!(fs::read(target.join("report.doc")).unwrap(), b"old");
    }

    #[test]
    fn same_bytes_from_another_source_keep_their_own_copy() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("Policy");
        fs::create_dir(&target).unwrap();
        for sub in ["a", "b"] {
            fs::create_dir(dir.path().join(sub)).unwrap();
            fs::write(dir.path().join(sub).join("policy.txt"), b"same bytes").unwrap();
        }

        let first = place(&dir.path().join("a/policy.txt"), &target, 0).unwrap();
        let second = place(&dir.path().join("b/policy.txt"), &target, 1).unwrap();
        assert_eq!(first, Placement::Copied(target.join("policy.txt")));
        assert_eq!(second, Placement::Copied(target.join("policy_1.txt")));

        // a resumed run revisiting the second source finds its own copy
        let again = place(&dir.path().join("b/policy.txt"), &target, 1).unwrap();
        assert_eq!(again, Placement::AlreadyPresent(target.join("policy_1.txt")));
        assert_eq!(fs::read_dir(&target).unwrap().count(), 2);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.doc");
        fs::write(&source, b"x").unwrap();
        let err = place(&source, &dir.path().join("absent"), 0).unwrap_err();
        assert!(matches!(err, WriteError::Io { .. }), "{err}");
    }

    #[test]
    fn creates_folders_for_every_category() {
        let dir = tempfile::tempdir().unwrap();
        let rules = RuleSet::new(vec![
            CategoryRule::new("Policy 01", ["policy"], Vec::<String>::new()),
            CategoryRule::new("Others", Vec::<String>::new(), Vec::<String>::new()),
        ])
        .unwrap();
        let dest = dir.path().join("sorted");
        create_category_folders(&dest, &rules).unwrap();
        for name in ["Policy 01", "Others", UNCLASSIFIED] {
            assert!(dest.join(name).is_dir(), "{name}");
        }
        probe_writable(&dest).unwrap();
    }

    #[test]
    fn numbered_names_keep_the_extension() {
        assert_eq!(candidate_name(OsStr::new("a.b.doc"), 3), PathBuf::from("a.b_3.doc"));
        assert_eq!(candidate_name(OsStr::new("README"), 1), PathBuf::from("README_1"));
    }
}
