use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Per-ref history within one target repository.
///
/// `commits` and `marks` are parallel arrays: `marks[i]` is the fast-import
/// mark produced at SVN revision `commits[i]`, or 0 for a deletion
/// tombstone. A tombstoned ref stays in the registry so a later revision can
/// re-create it.
#[derive(Default)]
pub(crate) struct Branch {
    /// SVN revision at which the ref was established; 0 means declared but
    /// never populated.
    pub(crate) created: u32,
    pub(crate) commits: Vec<u32>,
    pub(crate) marks: Vec<u32>,
    pub(crate) note: String,
}

impl Branch {
    /// Mark of the live tip, if the last recorded entry is not a tombstone.
    pub(crate) fn tip_mark(&self) -> Option<u32> {
        self.marks.last().copied().filter(|&mark| mark != 0)
    }

    pub(crate) fn record(&mut self, revnum: u32, mark: u32) {
        self.commits.push(revnum);
        self.marks.push(mark);
    }
}

pub(crate) type BranchMap = BTreeMap<String, Branch>;

/// Resolves the mark of the latest commit on `source` with revision no
/// greater than `revnum`.
///
/// Returns `None` when the source is unknown or has no commits at all
/// (branching from nothing), and `Some(0)` when the source exists but had
/// no commit by `revnum`. When `desc` is non-empty on entry it is annotated
/// with ` at rN` and, if the closest commit differs from the requested
/// revision, ` => rM`.
pub(crate) fn mark_from(
    branches: &BranchMap,
    source: &str,
    revnum: u32,
    desc: &mut String,
) -> Option<u32> {
    assert!(source.starts_with("refs/"));

    let branch = branches.get(source)?;
    if branch.created == 0 || branch.commits.is_empty() {
        return None;
    }

    let idx = branch.commits.partition_point(|&commit| commit <= revnum);
    if idx == 0 {
        return Some(0);
    }

    let closest = branch.commits[idx - 1];
    if !desc.is_empty() {
        let _ = write!(desc, " at r{revnum}");
        if closest != revnum {
            let _ = write!(desc, " => r{closest}");
        }
    }

    Some(branch.marks[idx - 1])
}
