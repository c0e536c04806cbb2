use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::BufRead as _;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use super::branch::{mark_from, BranchMap};
use super::marks::{self, MarkAllocator, NOTE_MARK};
use super::process::{FastImport, ProcessCache};
use super::transaction::Transaction;
use super::ExportError;
use crate::options::Options;
use crate::rules::{qualify_ref, RepoRule};

/// Owns every target repository of one conversion run and the process cache
/// shared between them.
pub struct Exporter {
    root: PathBuf,
    options: Rc<Options>,
    cache: Rc<RefCell<ProcessCache>>,
    repos: BTreeMap<String, Repository>,
    /// Children whose submodule parent has not been registered yet, keyed
    /// by the parent's name.
    pending_submodules: BTreeMap<String, Vec<(String, String)>>,
}

impl Exporter {
    pub fn new(root: impl Into<PathBuf>, options: Options) -> Self {
        Self {
            root: root.into(),
            options: Rc::new(options),
            cache: Rc::new(RefCell::new(ProcessCache::new())),
            repos: BTreeMap::new(),
            pending_submodules: BTreeMap::new(),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn add_repository(&mut self, rule: &RepoRule) -> Result<Repository, ExportError> {
        if self.repos.contains_key(&rule.name) {
            return Err(ExportError::DuplicateRepository {
                name: rule.name.clone(),
            });
        }
        if rule.submodule_in_repo.as_deref() == Some(rule.name.as_str()) {
            return Err(ExportError::SubmoduleSelfReference {
                repo: rule.name.clone(),
            });
        }

        let mut branches = BranchMap::new();
        for branch in rule.branches.iter() {
            branches.entry(qualify_ref(branch)).or_default();
        }
        // the default branch always exists from revision 1
        branches
            .entry("refs/heads/master".into())
            .or_default()
            .created = 1;

        let repo_dir = self.root.join(&rule.name);
        if !self.options.dry_run && !repo_dir.exists() {
            tracing::trace!("creating new repository {}", rule.name);
            init_bare_repo(&repo_dir, &rule.name, &self.options)?;
        }

        // resolved last: pending entries must only ever name repositories
        // that were actually registered
        let submodule_in = match rule.submodule_in_repo.as_deref() {
            None | Some("") => None,
            Some(parent_name) => match self.repos.get(parent_name) {
                Some(parent) => Some((
                    Rc::downgrade(&parent.inner),
                    rule.submodule_path.clone().unwrap_or_default(),
                )),
                None => {
                    // the parent may be declared later in the rules; the
                    // link is wired when it is registered
                    tracing::debug!(
                        "deferring submodule link of \"{}\" until \"{parent_name}\" is declared",
                        rule.name,
                    );
                    self.pending_submodules
                        .entry(parent_name.to_owned())
                        .or_default()
                        .push((
                            rule.name.clone(),
                            rule.submodule_path.clone().unwrap_or_default(),
                        ));
                    None
                }
            },
        };

        let inner = RepoInner {
            name: rule.name.clone(),
            prefix: rule
                .prefix
                .as_deref()
                .map(|prefix| prefix.as_bytes().to_vec())
                .unwrap_or_default(),
            root: self.root.clone(),
            options: self.options.clone(),
            cache: self.cache.clone(),
            submodule_in,
            branches,
            annotated_tags: BTreeMap::new(),
            reset_branches: BTreeMap::new(),
            deleted_branches: BTreeMap::new(),
            marks: MarkAllocator::new(),
            fast_import: None,
            commit_count: 0,
            outstanding_transactions: 0,
        };

        let repo = Repository {
            inner: Rc::new(RefCell::new(inner)),
        };
        self.repos.insert(rule.name.clone(), repo.clone());

        // wire children that declared this repository as their parent
        // before it existed
        if let Some(children) = self.pending_submodules.remove(&rule.name) {
            for (child_name, path) in children {
                tracing::debug!(
                    "repository \"{child_name}\" is a submodule of \"{}\" at \"{path}\"",
                    rule.name,
                );
                let child = &self.repos[&child_name];
                child.inner.borrow_mut().submodule_in =
                    Some((Rc::downgrade(&repo.inner), path));
            }
        }

        Ok(repo)
    }

    /// Verifies that every declared `submodule-in-repo` parent has been
    /// registered; call once all repositories from the rules are added.
    /// A parent that never appears is a configuration error.
    pub fn resolve_submodules(&self) -> Result<(), ExportError> {
        if let Some((parent, children)) = self.pending_submodules.iter().next() {
            return Err(ExportError::SubmoduleParentMissing {
                repo: children[0].0.clone(),
                parent: parent.clone(),
            });
        }
        Ok(())
    }

    pub fn repository(&self, name: &str) -> Option<Repository> {
        self.repos.get(name).cloned()
    }

    pub fn repositories(&self) -> impl Iterator<Item = &Repository> + '_ {
        self.repos.values()
    }
}

fn init_bare_repo(repo_dir: &Path, name: &str, options: &Options) -> Result<(), ExportError> {
    std::fs::create_dir_all(repo_dir).map_err(|e| ExportError::CreateDir {
        path: repo_dir.to_path_buf(),
        error: e,
    })?;

    let status = std::process::Command::new(&options.git_executable)
        .arg("--bare")
        .arg("init")
        .current_dir(repo_dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::inherit())
        .status()
        .map_err(|e| ExportError::SpawnProcess {
            arg0: options.git_executable.clone().into(),
            error: e,
        })?;
    if !status.success() {
        return Err(ExportError::GitInit {
            path: repo_dir.to_path_buf(),
            status,
        });
    }

    let marks_path = repo_dir.join(marks_file_name(name));
    std::fs::File::create(&marks_path).map_err(|e| ExportError::CreateFile {
        path: marks_path,
        error: e,
    })?;

    Ok(())
}

fn marks_file_name(name: &str) -> String {
    format!("marks-{}", name.replace('/', "_"))
}

fn log_file_name(name: &str) -> String {
    format!("log-{}", name.replace('/', "_"))
}

/// Handle to one target repository. Cheap to clone; transactions keep the
/// underlying state alive until they are committed or dropped.
#[derive(Clone)]
pub struct Repository {
    pub(crate) inner: Rc<RefCell<RepoInner>>,
}

impl Repository {
    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        self.inner.borrow().branches.contains_key(branch)
    }

    pub fn branch_note(&self, branch: &str) -> Option<String> {
        let inner = self.inner.borrow();
        let note = &inner.branches.get(branch)?.note;
        (!note.is_empty()).then(|| note.clone())
    }

    /// Creates `branch` at `revnum`, branching off `source` as of
    /// `source_rev`. Branching from a ref the registry has never seen is a
    /// topology impossibility and fails; branching from a ref without
    /// commits produces an empty branch and a warning.
    pub fn create_branch(
        &self,
        branch: &str,
        revnum: u32,
        source: &str,
        source_rev: u32,
    ) -> Result<(), ExportError> {
        let mut repo = self.inner.borrow_mut();

        assert!(branch.starts_with("refs/"));
        assert!(source.starts_with("refs/"));

        let mut desc = format!("from branch {source}");
        let Some(mark) = mark_from(&repo.branches, source, source_rev, &mut desc) else {
            return Err(ExportError::BranchFromMissing {
                repo: repo.name.clone(),
                branch: branch.into(),
                source: source.into(),
            });
        };

        let reset_to = if mark == 0 {
            tracing::warn!(
                "{branch} in repository \"{}\" is branching but no exported commits exist \
                 in repository, creating an empty branch",
                repo.name,
            );
            desc.push_str(", deleted/unknown");
            source.to_owned()
        } else {
            format!(":{mark}")
        };

        tracing::debug!(
            "creating branch {branch} from {source} (r{source_rev} {desc}) in repository \"{}\"",
            repo.name,
        );

        // the new branch inherits the source branch note
        let note = repo
            .branches
            .get(source)
            .map(|br| br.note.clone())
            .unwrap_or_default();
        repo.branches.entry(branch.into()).or_default().note = note;

        repo.reset_branch(branch, revnum, mark, &reset_to, &desc);
        Ok(())
    }

    /// Tombstones `branch` at `revnum`. Deleting the default branch is a
    /// no-op.
    pub fn delete_branch(&self, branch: &str, revnum: u32) {
        assert!(branch.starts_with("refs/"));

        if branch == "refs/heads/master" {
            return;
        }

        let null_sha = gix_hash::ObjectId::null(gix_hash::Kind::Sha1).to_string();
        self.inner
            .borrow_mut()
            .reset_branch(branch, revnum, 0, &null_sha, "delete");
    }

    /// Flushes the pending branch deletions and resets staged during the
    /// current revision, deletions first.
    pub fn commit(&self) -> Result<(), ExportError> {
        {
            let repo = self.inner.borrow();
            if repo.deleted_branches.is_empty() && repo.reset_branches.is_empty() {
                return Ok(());
            }
        }

        RepoInner::start_fast_import(&self.inner)?;

        let mut repo = self.inner.borrow_mut();
        let mut cmds = String::new();
        for cmd in repo.deleted_branches.values() {
            cmds.push_str(cmd);
        }
        for cmd in repo.reset_branches.values() {
            cmds.push_str(cmd);
        }
        repo.deleted_branches.clear();
        repo.reset_branches.clear();
        repo.write_stream(cmds.as_bytes())
    }

    /// Opens a commit transaction on `branch` for SVN revision `revnum`.
    /// `svnprefix` is the SVN source path recorded for provenance.
    pub fn open_transaction(
        &self,
        branch: &str,
        svnprefix: &str,
        revnum: u32,
    ) -> Result<Transaction, ExportError> {
        let needs_checkpoint = {
            let mut repo = self.inner.borrow_mut();

            assert!(branch.starts_with("refs/"));
            if !repo.branches.contains_key(branch) {
                tracing::debug!("creating branch {branch} in repository \"{}\"", repo.name);
            }

            repo.commit_count += 1;
            repo.outstanding_transactions += 1;
            repo.options.commit_interval != 0
                && repo.commit_count % repo.options.commit_interval == 0
        };

        if needs_checkpoint {
            RepoInner::start_fast_import(&self.inner)?;
            let mut repo = self.inner.borrow_mut();
            tracing::debug!(
                "checkpointing repository \"{}\" after {} transactions",
                repo.name,
                repo.commit_count,
            );
            repo.checkpoint_stream()?;
        }

        Ok(Transaction::new(
            self.inner.clone(),
            branch.to_owned(),
            svnprefix.to_owned(),
            revnum,
        ))
    }

    /// Buffers an annotated tag; emission happens in [`Self::finalize_tags`].
    /// Re-declaring a tag name within a run overwrites the buffered record.
    pub fn create_annotated_tag(
        &self,
        tag_ref: &str,
        svnprefix: &str,
        revnum: u32,
        author: &[u8],
        datetime: u64,
        log: &str,
    ) {
        let mut repo = self.inner.borrow_mut();

        assert!(tag_ref.starts_with("refs/"));
        let tag_name = tag_ref.strip_prefix("refs/tags/").unwrap_or(tag_ref);

        if repo.annotated_tags.contains_key(tag_name) {
            tracing::debug!(
                "re-creating annotated tag {tag_name} in repository \"{}\"",
                repo.name,
            );
        } else {
            tracing::debug!(
                "creating annotated tag {tag_name} ({tag_ref}) in repository \"{}\"",
                repo.name,
            );
        }

        repo.annotated_tags.insert(
            tag_name.to_owned(),
            AnnotatedTag {
                supporting_ref: tag_ref.to_owned(),
                svnprefix: svnprefix.to_owned(),
                revnum,
                author: author.to_vec(),
                datetime,
                log: log.to_owned(),
            },
        );
    }

    /// Emits every buffered annotated tag. With metadata notes enabled, the
    /// provenance footer is additionally attached as a note on the tip of
    /// each supporting ref, since fast-import cannot note a tag object.
    pub fn finalize_tags(&self) -> Result<(), ExportError> {
        let tags: Vec<(String, AnnotatedTag)> = {
            let repo = self.inner.borrow();
            if repo.annotated_tags.is_empty() {
                return Ok(());
            }
            tracing::debug!("finalizing tags for \"{}\"", repo.name);
            repo.annotated_tags
                .iter()
                .map(|(name, tag)| (name.clone(), tag.clone()))
                .collect()
        };

        RepoInner::start_fast_import(&self.inner)?;

        let add_metadata = self.inner.borrow().options.add_metadata;
        let add_metadata_notes = self.inner.borrow().options.add_metadata_notes;

        for (tag_name, tag) in tags {
            assert!(tag.supporting_ref.starts_with("refs/"));

            let mut message = tag.log.clone();
            if !message.ends_with('\n') {
                message.push('\n');
            }
            if add_metadata {
                message.push('\n');
                message.push_str(&format_metadata_message(
                    &tag.svnprefix,
                    tag.revnum,
                    Some(&tag_name),
                ));
            }

            let mut block = Vec::new();
            block.extend_from_slice(
                format!(
                    "progress Creating annotated tag {tag_name} from ref {}\n\
                     tag {tag_name}\nfrom {}\n",
                    tag.supporting_ref, tag.supporting_ref,
                )
                .as_bytes(),
            );
            block.extend_from_slice(b"tagger ");
            block.extend_from_slice(&tag.author);
            block.extend_from_slice(
                format!(" {} +0000\ndata {}\n", tag.datetime, message.len()).as_bytes(),
            );
            block.extend_from_slice(message.as_bytes());
            block.push(b'\n');

            {
                let mut repo = self.inner.borrow_mut();
                repo.write_stream(&block)?;
                repo.drain_stream()?;
            }

            // Append the metadata as a note on the tip commit of the
            // supporting ref; fast-import has no way to attach a note to
            // the tag itself.
            if add_metadata_notes {
                let mut txn =
                    self.open_transaction(&tag.supporting_ref, &tag.svnprefix, tag.revnum)?;
                txn.set_author(&tag.author);
                txn.set_date_time(tag.datetime);
                txn.commit_note(
                    &format_metadata_message(&tag.svnprefix, tag.revnum, Some(&tag_name)),
                    true,
                    None,
                )?;
                drop(txn);

                self.inner.borrow_mut().drain_stream()?;
            }
        }

        self.inner.borrow_mut().drain_stream()
    }

    /// Reconciles the persisted marks file and progress log, rebuilding the
    /// in-memory branch timeline up to the highest safe replay point.
    ///
    /// `cutoff` is the revision the caller intends to resume at; it is
    /// lowered when the log runs ahead of the marks file (interrupted run).
    /// The log is truncated to the replayed prefix, with the original
    /// preserved as `<log>.old`. Returns the revision to resume from.
    pub fn setup_incremental(&self, cutoff: &mut u32) -> Result<u32, ExportError> {
        self.inner.borrow_mut().setup_incremental(cutoff)
    }

    /// Undoes the truncation done by [`Self::setup_incremental`] by putting
    /// the `.old` backup back in place, if present. Used when the caller
    /// aborts before making further progress.
    pub fn restore_log(&self) {
        let repo = self.inner.borrow();
        let log_path = repo.log_path();
        let backup = backup_path(&log_path);
        if !backup.exists() {
            return;
        }
        let _ = std::fs::remove_file(&log_path);
        if let Err(e) = std::fs::rename(&backup, &log_path) {
            tracing::warn!("failed to restore log {log_path:?} from {backup:?}: {e}");
        }
    }

    /// Checkpoints and closes the `fast-import` child, if running. The next
    /// child-using operation starts a fresh one.
    pub fn close_fast_import(&self) {
        self.inner.borrow().cache.borrow_mut().remove(&self.inner);
        self.inner.borrow_mut().close_fast_import();
    }
}

#[derive(Clone)]
struct AnnotatedTag {
    supporting_ref: String,
    svnprefix: String,
    revnum: u32,
    author: Vec<u8>,
    datetime: u64,
    log: String,
}

pub(crate) struct RepoInner {
    pub(crate) name: String,
    pub(crate) prefix: Vec<u8>,
    root: PathBuf,
    pub(crate) options: Rc<Options>,
    cache: Rc<RefCell<ProcessCache>>,
    submodule_in: Option<(Weak<RefCell<RepoInner>>, String)>,
    pub(crate) branches: BranchMap,
    annotated_tags: BTreeMap<String, AnnotatedTag>,
    reset_branches: BTreeMap<String, String>,
    deleted_branches: BTreeMap<String, String>,
    pub(crate) marks: MarkAllocator,
    fast_import: Option<FastImport>,
    commit_count: u64,
    pub(crate) outstanding_transactions: u32,
}

impl RepoInner {
    fn repo_dir(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    fn marks_path(&self) -> PathBuf {
        self.repo_dir().join(marks_file_name(&self.name))
    }

    fn log_path(&self) -> PathBuf {
        self.root.join(log_file_name(&self.name))
    }

    /// Ensures the `fast-import` child is running, spawning it lazily and
    /// refreshing the process cache. Restarting after the child crashed is
    /// fatal: everything since its last checkpoint would be lost.
    pub(crate) fn start_fast_import(inner: &Rc<RefCell<Self>>) -> Result<(), ExportError> {
        let cache = inner.borrow().cache.clone();
        cache.borrow_mut().touch(inner);

        let mut repo = inner.borrow_mut();
        if let Some(fast_import) = &mut repo.fast_import {
            if fast_import.has_crashed() {
                let name = repo.name.clone();
                tracing::error!(
                    "git fast-import for repository \"{name}\" has been started once and crashed",
                );
                return Err(ExportError::ChildRestart { repo: name });
            }
            return Ok(());
        }

        let handle = FastImport::spawn(
            &repo.name,
            &repo.repo_dir(),
            &repo.log_path(),
            &marks_file_name(&repo.name),
            &repo.options,
        )?;
        repo.fast_import = Some(handle);
        repo.reload_branches()
    }

    /// Tells a freshly started child where every known branch tip is.
    fn reload_branches(&mut self) -> Result<(), ExportError> {
        let mut reset_notes = false;
        let mut cmds = String::new();

        for (branch, br) in self.branches.iter() {
            assert!(branch.starts_with("refs/"));
            let Some(tip) = br.tip_mark() else {
                continue;
            };
            reset_notes = true;

            let _ = write!(
                cmds,
                "reset {branch}\nfrom :{tip}\n\nprogress Branch {branch} reloaded\n",
            );
        }

        if reset_notes && self.options.add_metadata_notes {
            let _ = write!(cmds, "reset refs/notes/commits\nfrom :{NOTE_MARK}\n");
        }

        if cmds.is_empty() {
            return Ok(());
        }
        self.write_stream(cmds.as_bytes())
    }

    pub(crate) fn close_fast_import(&mut self) {
        if let Some(mut fast_import) = self.fast_import.take() {
            fast_import.close();
        }
    }

    pub(crate) fn stream(&mut self) -> &mut FastImport {
        self.fast_import
            .as_mut()
            .expect("git fast-import has not been started")
    }

    pub(crate) fn write_stream(&mut self, bytes: &[u8]) -> Result<(), ExportError> {
        let name = self.name.clone();
        self.stream().write(bytes).map_err(|e| {
            tracing::error!("failed to write to git fast-import for repository \"{name}\": {e}");
            ExportError::StreamWrite {
                repo: name,
                error: e,
            }
        })
    }

    pub(crate) fn write_stream_no_log(&mut self, bytes: &[u8]) -> Result<(), ExportError> {
        let name = self.name.clone();
        self.stream().write_no_log(bytes).map_err(|e| {
            tracing::error!("failed to write to git fast-import for repository \"{name}\": {e}");
            ExportError::StreamWrite {
                repo: name,
                error: e,
            }
        })
    }

    pub(crate) fn drain_stream(&mut self) -> Result<(), ExportError> {
        let name = self.name.clone();
        self.stream().drain().map_err(|e| {
            tracing::error!("failed to flush git fast-import for repository \"{name}\": {e}");
            ExportError::StreamWrite {
                repo: name,
                error: e,
            }
        })
    }

    pub(crate) fn checkpoint_stream(&mut self) -> Result<(), ExportError> {
        let name = self.name.clone();
        self.stream().checkpoint().map_err(|e| {
            tracing::error!("failed to write to git fast-import for repository \"{name}\": {e}");
            ExportError::StreamWrite {
                repo: name,
                error: e,
            }
        })
    }

    /// Stages a reset of `branch` to `reset_to` at `revnum`. A live branch
    /// being moved to a different revision is backed up first. Within one
    /// revision a created-then-deleted ref collapses to nothing and a
    /// deleted-then-recreated ref keeps only the re-creation.
    pub(crate) fn reset_branch(
        &mut self,
        branch: &str,
        revnum: u32,
        mark: u32,
        reset_to: &str,
        comment: &str,
    ) {
        if let Some((parent, _)) = &self.submodule_in {
            if let Some(parent) = parent.upgrade() {
                parent.borrow_mut().submodule_changed(&self.name, branch);
            }
        }

        assert!(branch.starts_with("refs/"));
        let name = self.name.clone();
        let br = self.branches.entry(branch.to_owned()).or_default();

        let mut cmd = String::new();
        if br.created != 0
            && br.created != revnum
            && br.marks.last().is_some_and(|&last| last != 0)
        {
            let backup_branch = if comment == "delete" && branch.starts_with("refs/heads/") {
                format!("refs/tags/backups/{}@{revnum}", &branch[11..])
            } else {
                format!("refs/backups/r{revnum}{}", &branch[4..])
            };
            tracing::debug!(
                "backing up branch {branch} to {backup_branch} in repository \"{name}\"",
            );
            let _ = write!(cmd, "reset {backup_branch}\nfrom {branch}\n\n");
        }

        br.created = revnum;
        br.record(revnum, mark);

        let _ = write!(
            cmd,
            "reset {branch}\nfrom {reset_to}\n\n\
             progress SVN r{revnum} branch {branch} = :{mark} # {comment}\n\n",
        );

        if comment == "delete" {
            // In a single revision, a branch can be created after deleting
            // it, but not vice-versa. A creation followed by a deletion in
            // the same revision cancels out entirely.
            if self.reset_branches.remove(branch).is_none() {
                self.deleted_branches
                    .entry(branch.to_owned())
                    .or_default()
                    .push_str(&cmd);
            }
        } else {
            self.deleted_branches.remove(branch);
            self.reset_branches
                .entry(branch.to_owned())
                .or_default()
                .push_str(&cmd);
        }
    }

    /// Notification hook: a repository embedded in this one as a submodule
    /// moved one of its branches. The default only records the event in the
    /// log; higher-level rewriting layers hang off this.
    fn submodule_changed(&mut self, submodule: &str, branch: &str) {
        tracing::debug!(
            "submodule \"{submodule}\" changed branch {branch} in repository \"{}\"",
            self.name,
        );
    }

    fn setup_incremental(&mut self, cutoff: &mut u32) -> Result<u32, ExportError> {
        let log_path = self.log_path();
        let log_file = match std::fs::OpenOptions::new().read(true).open(&log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(1),
            Err(e) => {
                return Err(ExportError::OpenLog {
                    path: log_path,
                    error: e,
                });
            }
        };

        let last_valid_mark = marks::last_valid_mark(&self.marks_path())?;

        let progress_re =
            regex::bytes::Regex::new(r"^progress SVN r(\d+) branch (.*) = :(\d+)$").unwrap();

        let mut reader = std::io::BufReader::new(log_file);
        let mut pos = 0u64;
        let mut last_revnum = 0u32;
        let mut truncate_at = None;
        let mut line = Vec::new();

        loop {
            line.clear();
            let line_start = pos;
            let n = reader
                .read_until(b'\n', &mut line)
                .map_err(|e| ExportError::ReadLog {
                    path: log_path.clone(),
                    error: e,
                })?;
            if n == 0 {
                break;
            }
            pos += n as u64;

            let mut rest: &[u8] = &line;
            if let Some(hash) = rest.iter().position(|&b| b == b'#') {
                rest = &rest[..hash];
            }
            let rest = rest.trim_ascii();
            if rest.is_empty() {
                continue;
            }
            let Some(caps) = progress_re.captures(rest) else {
                continue;
            };

            let Some(revnum) = parse_u32(&caps[1]) else {
                continue;
            };
            let branch = String::from_utf8_lossy(&caps[2]).into_owned();
            let Some(mark) = parse_u32(&caps[3]) else {
                continue;
            };

            if revnum >= *cutoff {
                truncate_at = Some(line_start);
                break;
            }

            if revnum < last_revnum {
                tracing::warn!(
                    "\"{}\" revision numbers are not monotonic: got {last_revnum} and then {revnum}",
                    self.name,
                );
            }

            if mark > last_valid_mark {
                tracing::warn!(
                    "\"{}\" unknown commit mark found: rewinding -- did you hit Ctrl-C?",
                    self.name,
                );
                *cutoff = revnum;
                truncate_at = Some(line_start);
                break;
            }

            last_revnum = revnum;
            self.marks.raise_commit_mark(mark);

            let br = self.branches.entry(branch).or_default();
            if br.created == 0 || mark == 0 || br.marks.last().is_none_or(|&last| last == 0) {
                br.created = revnum;
            }
            br.record(revnum, mark);
        }

        let backup = backup_path(&log_path);

        match truncate_at {
            None => {
                let resume_from = last_revnum + 1;
                if resume_from == *cutoff {
                    // A stale backup from an earlier run would confuse
                    // restore_log later.
                    let _ = std::fs::remove_file(&backup);
                }
                Ok(resume_from)
            }
            Some(truncate_at) => {
                let _ = std::fs::remove_file(&backup);
                std::fs::copy(&log_path, &backup).map_err(|e| ExportError::BackupLog {
                    path: log_path.clone(),
                    backup: backup.clone(),
                    error: e,
                })?;

                tracing::debug!(
                    "\"{}\" truncating history to revision {cutoff}",
                    self.name,
                );
                let log_file = std::fs::OpenOptions::new()
                    .write(true)
                    .open(&log_path)
                    .map_err(|e| ExportError::OpenLog {
                        path: log_path.clone(),
                        error: e,
                    })?;
                log_file
                    .set_len(truncate_at)
                    .map_err(|e| ExportError::TruncateLog {
                        path: log_path,
                        error: e,
                    })?;

                Ok(*cutoff)
            }
        }
    }
}

impl Drop for RepoInner {
    fn drop(&mut self) {
        assert_eq!(
            self.outstanding_transactions, 0,
            "repository \"{}\" dropped with outstanding transactions",
            self.name,
        );
        self.close_fast_import();
    }
}

pub(crate) fn format_metadata_message(svnprefix: &str, revnum: u32, tag: Option<&str>) -> String {
    let mut msg = format!("svn path={svnprefix}; revision={revnum}");
    if let Some(tag) = tag {
        let _ = write!(msg, "; tag={tag}");
    }
    msg.push('\n');
    msg
}

fn backup_path(log_path: &Path) -> PathBuf {
    let mut path = log_path.to_path_buf().into_os_string();
    path.push(".old");
    PathBuf::from(path)
}

fn parse_u32(digits: &[u8]) -> Option<u32> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}
