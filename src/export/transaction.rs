use std::cell::RefCell;
use std::fmt::Write as _;
use std::io::Write as _;
use std::rc::Rc;

use super::branch::mark_from;
use super::marks::NOTE_MARK;
use super::repository::{format_metadata_message, RepoInner};
use super::ExportError;

/// Staging buffer for the commits of one branch within one SVN revision.
///
/// File additions, deletions, merge parents and commit metadata accumulate
/// here; [`Self::commit`] emits the whole block to the `fast-import` stream
/// in one go. Dropping a transaction without committing discards it.
pub struct Transaction {
    repo: Rc<RefCell<RepoInner>>,
    branch: String,
    svnprefix: String,
    revnum: u32,
    author: Vec<u8>,
    datetime: u64,
    log: String,
    deleted_files: Vec<Vec<u8>>,
    modified_files: Vec<u8>,
    merges: Vec<u32>,
}

impl Transaction {
    pub(crate) fn new(
        repo: Rc<RefCell<RepoInner>>,
        branch: String,
        svnprefix: String,
        revnum: u32,
    ) -> Self {
        Self {
            repo,
            branch,
            svnprefix,
            revnum,
            author: Vec::new(),
            datetime: 0,
            log: String::new(),
            deleted_files: Vec::new(),
            modified_files: Vec::new(),
            merges: Vec::new(),
        }
    }

    /// `author` is the full `name <email>` identity line fragment.
    pub fn set_author(&mut self, author: &[u8]) {
        self.author = author.to_vec();
    }

    /// Seconds since the Unix epoch; emitted with a `+0000` offset.
    pub fn set_date_time(&mut self, datetime: u64) {
        self.datetime = datetime;
    }

    pub fn set_log(&mut self, log: &str) {
        self.log = log.to_owned();
    }

    /// Stages a file deletion. The empty path deletes everything in the
    /// branch.
    pub fn delete_file(&mut self, path: &[u8]) {
        let mut full_path = self.repo.borrow().prefix.clone();
        full_path.extend_from_slice(path);
        if full_path.last() == Some(&b'/') {
            full_path.pop();
        }
        self.deleted_files.push(full_path);
    }

    /// Stages a file addition or modification with the given blob content.
    /// The blob is streamed to the child immediately (commit marks ascend,
    /// blob marks descend, so the commit referencing it can be emitted
    /// later); in dry-run mode only the file-op line is recorded.
    pub fn add_file(&mut self, path: &[u8], mode: u32, data: &[u8]) -> Result<(), ExportError> {
        let (mark, full_path, dry_run) = {
            let mut repo = self.repo.borrow_mut();
            let mark = repo.marks.alloc_blob_mark();
            let mut full_path = repo.prefix.clone();
            full_path.extend_from_slice(path);
            assert!(!full_path.is_empty());
            (mark, full_path, repo.options.dry_run)
        };

        if self.modified_files.capacity() == 0 {
            self.modified_files.reserve(2048);
        }
        let _ = write!(self.modified_files, "M {mode:o} :{mark} ");
        self.modified_files.extend_from_slice(&full_path);
        self.modified_files.push(b'\n');

        if !dry_run {
            RepoInner::start_fast_import(&self.repo)?;
            let mut repo = self.repo.borrow_mut();
            repo.write_stream_no_log(
                format!("blob\nmark :{mark}\ndata {}\n", data.len()).as_bytes(),
            )?;
            repo.write_stream_no_log(data)?;
        }

        Ok(())
    }

    /// Resolves `source`@`source_rev` to a commit mark and stages it as an
    /// extra parent of this commit. Unresolvable sources and self-merges
    /// only warn; duplicates are ignored.
    pub fn note_copy_from_branch(&mut self, source: &str, source_rev: u32) {
        assert!(source.starts_with("refs/"));

        let repo = self.repo.borrow();

        if self.branch == source {
            tracing::warn!(
                "cannot merge inside a branch in repository \"{}\"",
                repo.name,
            );
            return;
        }

        let mut dummy = String::new();
        match mark_from(&repo.branches, source, source_rev, &mut dummy) {
            None => {
                tracing::warn!(
                    "{} is copying from branch {source} but the latter doesn't exist, \
                     continuing, assuming the files exist in repository \"{}\"",
                    self.branch,
                    repo.name,
                );
            }
            Some(0) => {
                tracing::warn!(
                    "unknown revision r{source_rev}, continuing, assuming the files exist \
                     in repository \"{}\"",
                    repo.name,
                );
            }
            Some(mark) => {
                tracing::debug!(
                    "repository \"{}\" branch {} has some files copied from {source}@{source_rev}",
                    repo.name,
                    self.branch,
                );
                if !self.merges.contains(&mark) {
                    self.merges.push(mark);
                    tracing::debug!(
                        "adding {source}@{source_rev} : {mark} as a merge point \
                         in repository \"{}\"",
                        repo.name,
                    );
                } else {
                    tracing::debug!(
                        "merge point already recorded in repository \"{}\"",
                        repo.name,
                    );
                }
            }
        }
        debug_assert!(dummy.is_empty());
    }

    /// Emits a commit on `refs/notes/commits` attaching `text` as a note on
    /// `commit` (defaulting to this transaction's branch). With `append`
    /// set and a defaulted target, any note already carried by the branch
    /// is prepended and the combined text stored back on the branch record.
    pub fn commit_note(
        &mut self,
        note_text: &str,
        append: bool,
        commit: Option<&str>,
    ) -> Result<(), ExportError> {
        assert!(self.branch.starts_with("refs/"));
        RepoInner::start_fast_import(&self.repo)?;

        let commit_ref = commit.unwrap_or(&self.branch).to_owned();
        let mut message = format!("Adding Git note for current {commit_ref}\n");
        let mut text = note_text.to_owned();

        let mut repo = self.repo.borrow_mut();

        if append && commit.is_none() {
            if let Some(prior) = repo
                .branches
                .get(&self.branch)
                .map(|br| br.note.as_str())
                .filter(|note| !note.is_empty())
            {
                text = format!("{prior}{note_text}");
                message = format!("Appending Git note for current {commit_ref}\n");
            }
        }

        let mut block = Vec::new();
        block.extend_from_slice(b"commit refs/notes/commits\n");
        let _ = write!(block, "mark :{NOTE_MARK}\n");
        block.extend_from_slice(b"committer ");
        block.extend_from_slice(&self.author);
        let _ = write!(block, " {} +0000\ndata {}\n", self.datetime, message.len());
        block.extend_from_slice(message.as_bytes());
        block.push(b'\n');
        let _ = write!(block, "N inline {commit_ref}\ndata {}\n", text.len());
        block.extend_from_slice(text.as_bytes());
        block.push(b'\n');

        repo.write_stream(&block)?;

        if commit.is_none() {
            if let Some(br) = repo.branches.get_mut(&self.branch) {
                br.note = text;
            }
        }

        Ok(())
    }

    /// Builds and emits the commit command block, then blocks until the
    /// child has drained it.
    pub fn commit(mut self) -> Result<(), ExportError> {
        assert!(self.branch.starts_with("refs/"));
        RepoInner::start_fast_import(&self.repo)?;

        let (mark, parent_mark, message, add_metadata_notes) = {
            let mut repo = self.repo.borrow_mut();

            // A single SVN revision can touch multiple branches and thus
            // produce multiple commits in the same repository, so the SVN
            // revision number cannot serve as the commit mark.
            let mark = repo.marks.alloc_commit_mark();

            let mut message = self.log.clone();
            if !message.ends_with('\n') {
                message.push('\n');
            }
            if repo.options.add_metadata {
                message.push('\n');
                message.push_str(&format_metadata_message(&self.svnprefix, self.revnum, None));
            }

            let name = repo.name.clone();
            let incremental = repo.options.incremental;
            let add_metadata_notes = repo.options.add_metadata_notes;

            let br = repo.branches.entry(self.branch.clone()).or_default();
            let parent_mark = match br.tip_mark() {
                Some(tip) if br.created != 0 => tip,
                _ => {
                    if incremental {
                        tracing::warn!(
                            "branch {} in repository \"{name}\" doesn't exist at revision {} \
                             -- did you resume from the wrong revision?",
                            self.branch,
                            self.revnum,
                        );
                    }
                    br.created = self.revnum;
                    0
                }
            };
            br.record(self.revnum, mark);

            (mark, parent_mark, message, add_metadata_notes)
        };

        let mut block = Vec::new();
        let _ = write!(block, "commit {}\nmark :{mark}\n", self.branch);
        block.extend_from_slice(b"committer ");
        block.extend_from_slice(&self.author);
        let _ = write!(block, " {} +0000\ndata {}\n", self.datetime, message.len());
        block.extend_from_slice(message.as_bytes());
        block.push(b'\n');

        let merge_desc = self.emit_merges(&mut block, parent_mark);

        // file deletions go first so a delete-then-re-add works
        if self.deleted_files.iter().any(|path| path.is_empty()) {
            block.extend_from_slice(b"deleteall\n");
        } else {
            for path in self.deleted_files.iter() {
                block.extend_from_slice(b"D ");
                block.extend_from_slice(path);
                block.push(b'\n');
            }
        }
        block.extend_from_slice(&self.modified_files);

        let _ = write!(
            block,
            "\nprogress SVN r{} branch {} = :{mark}",
            self.revnum, self.branch,
        );
        if !merge_desc.is_empty() {
            block.extend_from_slice(b" # merge from");
            block.extend_from_slice(merge_desc.as_bytes());
        }
        block.extend_from_slice(b"\n\n");

        {
            let mut repo = self.repo.borrow_mut();
            repo.write_stream(&block)?;

            tracing::trace!(
                "{} modifications from SVN {} to \"{}\"/{}",
                self.deleted_files.len()
                    + self
                        .modified_files
                        .iter()
                        .filter(|&&b| b == b'\n')
                        .count(),
                self.svnprefix,
                repo.name,
                self.branch,
            );
        }

        if add_metadata_notes {
            self.commit_note(
                &format_metadata_message(&self.svnprefix, self.revnum, None),
                false,
                None,
            )?;
        }

        self.repo.borrow_mut().drain_stream()
    }

    /// Writes the `merge` lines for the staged extra parents and returns
    /// the description appended to the progress line.
    fn emit_merges(&mut self, block: &mut Vec<u8>, parent_mark: u32) -> String {
        let mut desc = String::new();

        if self.log.contains("This commit was manufactured by cvs2svn") && self.merges.len() > 1 {
            // cvs2svn fabricates branch/tag commits with a merge per source
            // revision; keeping only the highest one is what its users
            // expect.
            self.merges.sort_unstable();
            let top = self.merges.pop().unwrap();
            let _ = write!(block, "merge :{top}\n");
            tracing::debug!(
                "discarding all but the highest merge point of a cvs2svn-manufactured commit",
            );
            return desc;
        }

        // count the natural parent towards the parent limit
        let mut parents = u32::from(parent_mark != 0);
        for &merge in self.merges.iter() {
            if merge == parent_mark {
                tracing::debug!(
                    "skipping marking {merge} as a merge point as it matches the parent",
                );
                continue;
            }

            parents += 1;
            if parents > 16 {
                // fast-import refuses commits with more than 16 parents;
                // additional merge points are dropped
                tracing::warn!("too many merge parents");
                break;
            }

            let _ = write!(desc, " :{merge}");
            let _ = write!(block, "merge :{merge}\n");
        }

        desc
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let mut repo = self.repo.borrow_mut();
        repo.outstanding_transactions -= 1;
        if repo.outstanding_transactions == 0 {
            // blob marks are never referenced once their commit flushed
            repo.marks.recycle_blob_marks();
        }
    }
}
