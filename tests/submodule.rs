//! Submodule backlink wiring: a child repository notifies its parent on
//! every branch topology change, regardless of the order the two were
//! declared in. The notification lands in the log, captured here through a
//! scoped subscriber.

mod common;

use std::sync::{Arc, Mutex};

use svn_fast_export::{ExportError, Exporter, RepoRule, Repository};

#[derive(Clone, Default)]
struct CaptureLog {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureLog {
    fn contents(&self) -> String {
        String::from_utf8(self.buf.lock().unwrap().clone()).unwrap()
    }
}

impl std::io::Write for CaptureLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CaptureLog {
    type Writer = CaptureLog;

    fn make_writer(&'a self) -> CaptureLog {
        self.clone()
    }
}

fn submodule_rule(name: &str, parent: &str, path: &str) -> RepoRule {
    RepoRule {
        name: name.into(),
        branches: Vec::new(),
        prefix: None,
        submodule_in_repo: Some(parent.into()),
        submodule_path: Some(path.into()),
    }
}

/// Commits once on the child's master and then creates a branch, capturing
/// the log output of the branch creation (which is what notifies the
/// parent).
fn reset_child_branch(child: &Repository) -> String {
    let mut txn = child.open_transaction("refs/heads/master", "/trunk", 1).unwrap();
    txn.set_author(b"a <a@x>");
    txn.set_date_time(1000);
    txn.set_log("init\n");
    txn.commit().unwrap();

    let capture = CaptureLog::default();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(capture.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        child
            .create_branch("refs/heads/topic", 2, "refs/heads/master", 1)
            .unwrap();
    });

    capture.contents()
}

#[test]
fn child_declared_before_parent_still_notifies_it() {
    let tmp = tempfile::tempdir().unwrap();
    let git = common::fake_git(tmp.path());

    let mut exporter = Exporter::new(tmp.path(), common::options(&git));

    // the child comes first in the rules; the parent link is wired once
    // the parent is registered
    let child = exporter
        .add_repository(&submodule_rule("plugin", "project", "plugins/plugin"))
        .unwrap();
    exporter
        .add_repository(&common::rule("project", &["refs/heads/master"]))
        .unwrap();
    exporter.resolve_submodules().unwrap();

    let captured = reset_child_branch(&child);
    assert!(captured.contains(
        "submodule \"plugin\" changed branch refs/heads/topic in repository \"project\"",
    ));
}

#[test]
fn parent_declared_first_is_wired_immediately() {
    let tmp = tempfile::tempdir().unwrap();
    let git = common::fake_git(tmp.path());

    let mut exporter = Exporter::new(tmp.path(), common::options(&git));

    exporter
        .add_repository(&common::rule("project", &["refs/heads/master"]))
        .unwrap();
    let child = exporter
        .add_repository(&submodule_rule("plugin", "project", "plugins/plugin"))
        .unwrap();
    exporter.resolve_submodules().unwrap();

    let captured = reset_child_branch(&child);
    assert!(captured.contains(
        "submodule \"plugin\" changed branch refs/heads/topic in repository \"project\"",
    ));
}

#[test]
fn unresolved_submodule_parent_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let git = common::fake_git(tmp.path());

    let mut exporter = Exporter::new(tmp.path(), common::options(&git));
    exporter
        .add_repository(&submodule_rule("plugin", "missing", "plugins/plugin"))
        .unwrap();

    assert!(matches!(
        exporter.resolve_submodules(),
        Err(ExportError::SubmoduleParentMissing { .. }),
    ));
}

#[test]
fn self_submodule_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let git = common::fake_git(tmp.path());

    let mut exporter = Exporter::new(tmp.path(), common::options(&git));

    assert!(matches!(
        exporter.add_repository(&submodule_rule("plugin", "plugin", "plugins/plugin")),
        Err(ExportError::SubmoduleSelfReference { .. }),
    ));
}
