use std::path::{Path, PathBuf};

pub use storage::models::{
    ErrorRecord, FileOutcome, RunProgress, Verdict, ERROR_CATEGORY, UNCLASSIFIED,
};

/// A discovered document waiting to be processed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileTask {
    pub path: PathBuf,
    /// Lower-case extension without the dot; selects the extraction strategies.
    pub ext: String,
    /// Position among discovered files sharing this file name, in path order.
    /// Slot 0 copies under the plain name, slot `n` as `stem_n.ext`.
    pub copy_slot: u32,
}

impl FileTask {
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let ext = path.extension()?.to_str()?.to_lowercase();
        Some(Self {
            path,
            ext,
            copy_slot: 0,
        })
    }

    /// Identity of the file in the progress done-set.
    pub fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        let task = FileTask::from_path("/docs/Report.DOCX").unwrap();
        assert_eq!(task.ext, "docx");
        assert_eq!(task.key(), "/docs/Report.DOCX");
        assert!(FileTask::from_path("/docs/README").is_none());
    }
}
