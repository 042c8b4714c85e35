//! Splits pending files into contiguous, balanced shards, one per worker.

use crate::models::FileTask;
use std::collections::{BTreeSet, HashMap};
use std::ffi::OsString;

#[derive(Debug, Default)]
pub struct Plan {
    pub shards: Vec<Vec<FileTask>>,
    /// Already-done keys plus pending files.
    pub total: u64,
    pub pending: usize,
    /// Discovered files that were skipped because they are already done.
    pub skipped: usize,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

/// Drops files whose key is in `done` and splits the rest, in path order,
/// into at most `workers` shards. Shard sizes differ by at most one and no
/// shard is empty.
///
/// Copy slots are numbered over every discovered file, done or not, so a
/// resumed run gives each source the same destination name as before.
pub fn plan(mut files: Vec<FileTask>, done: &BTreeSet<String>, workers: usize) -> Plan {
    files.sort();
    files.dedup_by(|a, b| a.path == b.path);
    assign_copy_slots(&mut files);
    let discovered = files.len();
    files.retain(|task| !done.contains(&task.key()));
    let pending = files.len();

    Plan {
        total: (done.len() + pending) as u64,
        pending,
        skipped: discovered - pending,
        shards: split(files, workers),
    }
}

fn assign_copy_slots(files: &mut [FileTask]) {
    let mut seen: HashMap<OsString, u32> = HashMap::new();
    for task in files {
        let Some(name) = task.path.file_name() else {
            continue;
        };
        let next = seen.entry(name.to_os_string()).or_insert(0);
        task.copy_slot = *next;
        *next += 1;
    }
}

fn split(files: Vec<FileTask>, workers: usize) -> Vec<Vec<FileTask>> {
    let n = workers.min(files.len());
    if n == 0 {
        return Vec::new();
    }
    let (base, extra) = (files.len() / n, files.len() % n);
    let mut rest = files.into_iter();
    (0..n)
        .map(|i| {
            let size = base + usize::from(i < extra);
            rest.by_ref().take(size).collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks(n: usize) -> Vec<FileTask> {
        (0..n)
            .map(|i| FileTask::from_path(format!("/src/f{i:02}.doc")).unwrap())
            .collect()
    }

    #[test]
    fn shards_are_balanced_and_contiguous() {
        let plan = plan(tasks(10), &BTreeSet::new(), 3);
        let sizes: Vec<_> = plan.shards.iter().map(Vec::len).collect();
        assert_eq!(sizes, [4, 3, 3]);

        let flattened: Vec<_> = plan.shards.concat();
        assert_eq!(flattened, tasks(10));
        assert_eq!((plan.total, plan.pending, plan.skipped), (10, 10, 0));
    }

    #[test]
    fn never_more_shards_than_files() {
        let plan = plan(tasks(2), &BTreeSet::new(), 8);
        assert_eq!(plan.shards.len(), 2);
        assert!(plan.shards.iter().all(|s| s.len() == 1));
    }

    #[test]
    fn done_files_are_excluded_but_counted() {
        let files = tasks(10);
        let done: BTreeSet<String> = files[..4].iter().map(FileTask::key).collect();
        let plan = plan(files.clone(), &done, 4);
        assert_eq!((plan.total, plan.pending, plan.skipped), (10, 6, 4));
        assert!(plan.shards.concat().iter().all(|t| !done.contains(&t.key())));
    }

    #[test]
    fn done_keys_no_longer_on_disk_still_count_toward_total() {
        let done: BTreeSet<String> = ["/src/gone.doc".to_string()].into();
        let plan = plan(tasks(3), &done, 2);
        assert_eq!((plan.total, plan.pending, plan.skipped), (4, 3, 0));
    }

    #[test]
    fn empty_or_fully_done_yields_no_shards() {
        assert!(plan(Vec::new(), &BTreeSet::new(), 4).is_empty());
        let files = tasks(3);
        let done = files.iter().map(FileTask::key).collect();
        assert!(plan(files, &done, 4).is_empty());
    }

    #[test]
    fn same_named_files_get_distinct_copy_slots() {
        let files: Vec<_> = ["/src/b/policy.doc", "/src/a/policy.doc", "/src/a/other.doc"]
            .into_iter()
            .map(|p| FileTask::from_path(p).unwrap())
            .collect();
        let done: BTreeSet<String> = ["/src/a/policy.doc".to_string()].into();
        let plan = plan(files, &done, 2);
        let slots: Vec<_> = plan
            .shards
            .concat()
            .into_iter()
            .map(|t| (t.key(), t.copy_slot))
            .collect();
        assert_eq!(
            slots,
            [("/src/a/other.doc".to_string(), 0), ("/src/b/policy.doc".to_string(), 1)]
        );
    }

    #[test]
    fn input_order_does_not_matter() {
        let mut shuffled = tasks(7);
        shuffled.reverse();
        shuffled.swap(1, 5);
        let a = plan(shuffled, &BTreeSet::new(), 3);
        let b = plan(tasks(7), &BTreeSet::new(), 3);
        assert_eq!(a.shards, b.shards);
    }
}
