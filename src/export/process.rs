use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Write as _;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use super::repository::RepoInner;
use super::ExportError;
use crate::options::Options;

pub(crate) const MAX_SIMULTANEOUS_PROCESSES: usize = 100;

const CLOSE_WAIT: Duration = Duration::from_secs(30);
const KILL_WAIT: Duration = Duration::from_millis(200);

/// One `git fast-import` child for one target repository.
///
/// The child runs inside the target directory with its combined
/// stdout/stderr appended to the per-repository log file, which is how
/// `progress` lines become the durable resume record. In dry-run mode no
/// child exists and all writes are discarded.
pub(crate) struct FastImport {
    repo_name: String,
    sink: Sink,
    child: Option<Child>,
    input_log: Option<std::fs::File>,
}

enum Sink {
    Child(std::io::BufWriter<ChildStdin>),
    Null,
    Closed,
}

impl FastImport {
    pub(crate) fn spawn(
        repo_name: &str,
        repo_dir: &Path,
        log_path: &Path,
        marks_file: &str,
        options: &Options,
    ) -> Result<Self, ExportError> {
        let input_log = if options.debug_rules && !options.dry_run {
            Some(open_append(log_path)?)
        } else {
            None
        };

        if options.dry_run {
            return Ok(Self {
                repo_name: repo_name.into(),
                sink: Sink::Null,
                child: None,
                input_log,
            });
        }

        let stdout = open_append(log_path)?;
        let stderr = stdout.try_clone().map_err(|e| ExportError::OpenLog {
            path: log_path.to_path_buf(),
            error: e,
        })?;

        let mut child = Command::new(&options.git_executable)
            .arg("fast-import")
            .arg(format!("--import-marks={marks_file}"))
            .arg(format!("--export-marks={marks_file}"))
            .arg("--force")
            .current_dir(repo_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| ExportError::SpawnProcess {
                arg0: options.git_executable.clone().into(),
                error: e,
            })?;

        let stdin = child.stdin.take().unwrap();

        Ok(Self {
            repo_name: repo_name.into(),
            sink: Sink::Child(std::io::BufWriter::new(stdin)),
            child: Some(child),
            input_log,
        })
    }

    pub(crate) fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(log) = &mut self.input_log {
            log.write_all(bytes)?;
        }
        self.write_no_log(bytes)
    }

    /// Same as [`Self::write`] but never copied to the input log, so blob
    /// payloads do not pollute it.
    pub(crate) fn write_no_log(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match &mut self.sink {
            Sink::Child(stdin) => stdin.write_all(bytes),
            Sink::Null => Ok(()),
            Sink::Closed => Err(std::io::Error::other("fast-import stream already closed")),
        }
    }

    /// Blocks until the child has accepted every buffered byte.
    pub(crate) fn drain(&mut self) -> std::io::Result<()> {
        match &mut self.sink {
            Sink::Child(stdin) => stdin.flush(),
            Sink::Null => Ok(()),
            Sink::Closed => Err(std::io::Error::other("fast-import stream already closed")),
        }
    }

    pub(crate) fn checkpoint(&mut self) -> std::io::Result<()> {
        self.write(b"checkpoint\n")?;
        self.drain()
    }

    /// Whether the child exited on its own; restarting after a crash would
    /// silently lose everything since the last checkpoint.
    pub(crate) fn has_crashed(&mut self) -> bool {
        match &mut self.child {
            Some(child) => matches!(child.try_wait(), Ok(Some(_))),
            None => false,
        }
    }

    /// Checkpoints, closes stdin and reaps the child. Idempotent; after a
    /// grace period the child is killed and a warning logged.
    pub(crate) fn close(&mut self) {
        let sink = std::mem::replace(&mut self.sink, Sink::Closed);

        if let Sink::Child(mut stdin) = sink {
            if let Err(e) = stdin.write_all(b"checkpoint\n").and_then(|()| stdin.flush()) {
                tracing::warn!(
                    "failed to checkpoint git fast-import for repository \"{}\": {e}",
                    self.repo_name,
                );
            }
            // dropping stdin closes the write channel
        }

        let Some(mut child) = self.child.take() else {
            return;
        };

        if wait_timeout(&mut child, CLOSE_WAIT) {
            return;
        }
        if let Err(e) = child.kill() {
            tracing::warn!(
                "failed to kill git fast-import for repository \"{}\": {e}",
                self.repo_name,
            );
        }
        if !wait_timeout(&mut child, KILL_WAIT) {
            tracing::warn!(
                "git fast-import for repository \"{}\" did not die",
                self.repo_name,
            );
        }
    }
}

impl Drop for FastImport {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_append(path: &Path) -> Result<std::fs::File, ExportError> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ExportError::OpenLog {
            path: path.to_path_buf(),
            error: e,
        })
}

fn wait_timeout(child: &mut Child, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("failed to wait for git fast-import: {e}");
                return true;
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Bounded LRU over live `fast-import` children across all target
/// repositories. Touching a repository promotes it to most-recently-used
/// and closes the least-recently-used children until the bound holds.
pub(crate) struct ProcessCache {
    entries: VecDeque<Weak<RefCell<RepoInner>>>,
}

impl ProcessCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn touch(&mut self, repo: &Rc<RefCell<RepoInner>>) {
        self.remove(repo);

        // if the cache is too big, remove from the front
        while self.entries.len() >= MAX_SIMULTANEOUS_PROCESSES {
            let victim = self.entries.pop_front().unwrap();
            if let Some(victim) = victim.upgrade() {
                victim.borrow_mut().close_fast_import();
            }
        }

        self.entries.push_back(Rc::downgrade(repo));
    }

    pub(crate) fn remove(&mut self, repo: &Rc<RefCell<RepoInner>>) {
        let target = Rc::downgrade(repo);
        self.entries
            .retain(|entry| entry.strong_count() != 0 && !Weak::ptr_eq(entry, &target));
    }
}
