use std::ffi::OsString;
use std::path::PathBuf;

mod branch;
mod marks;
mod process;
mod repository;
mod transaction;

pub use repository::{Exporter, Repository};
pub use transaction::Transaction;

#[derive(Debug)]
pub enum ExportError {
    CreateDir {
        path: PathBuf,
        error: std::io::Error,
    },
    CreateFile {
        path: PathBuf,
        error: std::io::Error,
    },
    SpawnProcess {
        arg0: OsString,
        error: std::io::Error,
    },
    GitInit {
        path: PathBuf,
        status: std::process::ExitStatus,
    },
    DuplicateRepository {
        name: String,
    },
    ChildRestart {
        repo: String,
    },
    StreamWrite {
        repo: String,
        error: std::io::Error,
    },
    BranchFromMissing {
        repo: String,
        branch: String,
        source: String,
    },
    SubmoduleParentMissing {
        repo: String,
        parent: String,
    },
    SubmoduleSelfReference {
        repo: String,
    },
    OpenMarks {
        path: PathBuf,
        error: std::io::Error,
    },
    ReadMarks {
        path: PathBuf,
        error: std::io::Error,
    },
    MarksMalformed {
        path: PathBuf,
        line: u64,
    },
    MarksDuplicate {
        path: PathBuf,
        line: u64,
        mark: u32,
    },
    MarksUnsorted {
        path: PathBuf,
        line: u64,
        mark: u32,
        prev: u32,
    },
    OpenLog {
        path: PathBuf,
        error: std::io::Error,
    },
    ReadLog {
        path: PathBuf,
        error: std::io::Error,
    },
    BackupLog {
        path: PathBuf,
        backup: PathBuf,
        error: std::io::Error,
    },
    TruncateLog {
        path: PathBuf,
        error: std::io::Error,
    },
}

impl std::error::Error for ExportError {}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateDir { path, error } => {
                write!(f, "failed to create directory {path:?}: {error}")
            }
            Self::CreateFile { path, error } => {
                write!(f, "failed to create file {path:?}: {error}")
            }
            Self::SpawnProcess { arg0, error } => {
                write!(f, "failed to spawn process {arg0:?}: {error}")
            }
            Self::GitInit { path, status } => {
                write!(f, "git --bare init in {path:?} exited with {status}")
            }
            Self::DuplicateRepository { name } => {
                write!(f, "repository \"{name}\" declared more than once")
            }
            Self::ChildRestart { repo } => {
                write!(
                    f,
                    "git fast-import for repository \"{repo}\" has been started once and crashed",
                )
            }
            Self::StreamWrite { repo, error } => {
                write!(
                    f,
                    "failed to write to git fast-import for repository \"{repo}\": {error}",
                )
            }
            Self::BranchFromMissing {
                repo,
                branch,
                source,
            } => {
                write!(
                    f,
                    "{branch} in repository \"{repo}\" is branching from branch {source} \
                     but the latter doesn't exist, can't continue",
                )
            }
            Self::SubmoduleParentMissing { repo, parent } => {
                write!(
                    f,
                    "repository \"{repo}\" is declared as a submodule of \"{parent}\" \
                     but the latter doesn't exist, can't continue",
                )
            }
            Self::SubmoduleSelfReference { repo } => {
                write!(
                    f,
                    "repository \"{repo}\" declares itself as its submodule parent",
                )
            }
            Self::OpenMarks { path, error } => {
                write!(f, "failed to open marks file {path:?}: {error}")
            }
            Self::ReadMarks { path, error } => {
                write!(f, "failed to read marks file {path:?}: {error}")
            }
            Self::MarksMalformed { path, line } => {
                write!(f, "marks file {path:?} line {line}: corrupt entry")
            }
            Self::MarksDuplicate { path, line, mark } => {
                write!(f, "marks file {path:?} line {line}: duplicate mark {mark}")
            }
            Self::MarksUnsorted {
                path,
                line,
                mark,
                prev,
            } => {
                write!(
                    f,
                    "marks file {path:?} line {line}: mark {mark} after {prev}, file not sorted",
                )
            }
            Self::OpenLog { path, error } => {
                write!(f, "failed to open log file {path:?}: {error}")
            }
            Self::ReadLog { path, error } => {
                write!(f, "failed to read log file {path:?}: {error}")
            }
            Self::BackupLog {
                path,
                backup,
                error,
            } => {
                write!(f, "failed to back up log {path:?} to {backup:?}: {error}")
            }
            Self::TruncateLog { path, error } => {
                write!(f, "failed to truncate log file {path:?}: {error}")
            }
        }
    }
}
