#![allow(dead_code)]

use std::path::{Path, PathBuf};

use svn_fast_export::{Options, RepoRule};

/// Writes a stand-in `git` executable that ignores its arguments and copies
/// stdin to stdout. `git --bare init` becomes a no-op and `git fast-import`
/// echoes the whole command stream into the per-repository log file, which
/// the tests then assert on.
pub fn fake_git(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt as _;

    let path = dir.join("fake-git");
    std::fs::write(&path, "#!/bin/sh\nexec cat\n").unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

pub fn options(git: &Path) -> Options {
    Options {
        git_executable: git.to_str().unwrap().to_owned(),
        ..Options::default()
    }
}

pub fn rule(name: &str, branches: &[&str]) -> RepoRule {
    RepoRule {
        name: name.into(),
        branches: branches.iter().map(|&branch| branch.into()).collect(),
        prefix: None,
        submodule_in_repo: None,
        submodule_path: None,
    }
}

pub fn read_log(root: &Path, name: &str) -> String {
    let path = root.join(format!("log-{}", name.replace('/', "_")));
    String::from_utf8(std::fs::read(path).unwrap()).unwrap()
}
