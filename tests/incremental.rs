//! Resume scenarios: reconciling the marks file with the progress log,
//! rewinding past interrupted runs, and restoring a truncated log.

mod common;

use svn_fast_export::Exporter;

fn write_marks(root: &std::path::Path, name: &str, marks: impl IntoIterator<Item = u32>) {
    let mut content = String::new();
    for mark in marks {
        content.push_str(&format!(":{mark} {mark:040x}\n"));
    }
    std::fs::write(root.join(name).join(format!("marks-{name}")), content).unwrap();
}

#[test]
fn no_log_means_start_from_scratch() {
    let tmp = tempfile::tempdir().unwrap();
    let git = common::fake_git(tmp.path());

    let mut exporter = Exporter::new(tmp.path(), common::options(&git));
    let repo = exporter.add_repository(&common::rule("R", &[])).unwrap();

    let mut cutoff = 100;
    assert_eq!(repo.setup_incremental(&mut cutoff).unwrap(), 1);
    assert_eq!(cutoff, 100);
}

#[test]
fn rewind_when_log_is_ahead_of_marks() {
    let tmp = tempfile::tempdir().unwrap();
    let git = common::fake_git(tmp.path());

    let mut exporter = Exporter::new(tmp.path(), common::options(&git));
    let repo = exporter.add_repository(&common::rule("R", &[])).unwrap();

    write_marks(tmp.path(), "R", 1..=7);
    let log_path = tmp.path().join("log-R");
    let original = concat!(
        "progress SVN r3 branch refs/heads/master = :5\n",
        "progress SVN r4 branch refs/heads/master = :9\n",
    );
    std::fs::write(&log_path, original).unwrap();

    let mut cutoff = 100;
    let resume_from = repo.setup_incremental(&mut cutoff).unwrap();

    assert_eq!(resume_from, 4);
    assert_eq!(cutoff, 4);
    assert_eq!(
        std::fs::read_to_string(&log_path).unwrap(),
        "progress SVN r3 branch refs/heads/master = :5\n",
    );
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("log-R.old")).unwrap(),
        original,
    );

    // aborting before further progress puts the log back byte for byte
    repo.restore_log();
    assert_eq!(std::fs::read_to_string(&log_path).unwrap(), original);
    assert!(!tmp.path().join("log-R.old").exists());
}

#[test]
fn clean_resume_rebuilds_branch_state() {
    let tmp = tempfile::tempdir().unwrap();
    let git = common::fake_git(tmp.path());

    let mut exporter = Exporter::new(tmp.path(), common::options(&git));
    let repo = exporter.add_repository(&common::rule("R", &[])).unwrap();

    write_marks(tmp.path(), "R", 1..=3);
    let log_path = tmp.path().join("log-R");
    std::fs::write(
        &log_path,
        concat!(
            "progress SVN r1 branch refs/heads/master = :1\n",
            "progress SVN r2 branch refs/heads/master = :2\n",
            "# trailing comments are ignored\n",
            "progress SVN r3 branch refs/heads/master = :3\n",
        ),
    )
    .unwrap();
    // a leftover backup from an older interrupted run must not survive a
    // clean resume
    let stale_backup = tmp.path().join("log-R.old");
    std::fs::write(&stale_backup, "stale").unwrap();

    let mut cutoff = 4;
    assert_eq!(repo.setup_incremental(&mut cutoff).unwrap(), 4);
    assert_eq!(cutoff, 4);
    assert!(!stale_backup.exists());

    // the rebuilt timeline resolves branch points exactly as an
    // uninterrupted run would
    repo.create_branch("refs/heads/topic", 5, "refs/heads/master", 2)
        .unwrap();
    repo.commit().unwrap();

    let mut txn = repo.open_transaction("refs/heads/master", "/trunk", 5).unwrap();
    txn.set_author(b"a <a@x>");
    txn.set_date_time(1000);
    txn.set_log("more\n");
    txn.commit().unwrap();

    repo.close_fast_import();
    let log = std::fs::read_to_string(&log_path).unwrap();

    // the freshly started child is told where the reloaded tip is
    assert!(log.contains(concat!(
        "reset refs/heads/master\n",
        "from :3\n",
        "\n",
        "progress Branch refs/heads/master reloaded\n",
    )));
    assert!(log.contains(concat!(
        "reset refs/heads/topic\n",
        "from :2\n",
        "\n",
        "progress SVN r5 branch refs/heads/topic = :2 # from branch refs/heads/master at r2\n",
        "\n",
    )));
    // commit marks continue after the recovered maximum
    assert!(log.contains("commit refs/heads/master\nmark :4\n"));
}

#[test]
fn tombstones_are_replayed() {
    let tmp = tempfile::tempdir().unwrap();
    let git = common::fake_git(tmp.path());

    let mut exporter = Exporter::new(tmp.path(), common::options(&git));
    let repo = exporter.add_repository(&common::rule("R", &[])).unwrap();

    write_marks(tmp.path(), "R", 1..=2);
    std::fs::write(
        tmp.path().join("log-R"),
        concat!(
            "progress SVN r1 branch refs/heads/x = :1\n",
            "progress SVN r2 branch refs/heads/x = :0 # delete\n",
            "progress SVN r3 branch refs/heads/x = :2\n",
        ),
    )
    .unwrap();

    let mut cutoff = 10;
    assert_eq!(repo.setup_incremental(&mut cutoff).unwrap(), 4);

    // at r2 the branch was a tombstone, so branching from there yields an
    // empty branch; at r3 it was reborn with mark 2
    repo.create_branch("refs/heads/y", 5, "refs/heads/x", 3).unwrap();
    repo.commit().unwrap();

    repo.close_fast_import();
    let log = std::fs::read_to_string(tmp.path().join("log-R")).unwrap();

    assert!(log.contains(concat!(
        "reset refs/heads/y\n",
        "from :2\n",
        "\n",
        "progress SVN r5 branch refs/heads/y = :2 # from branch refs/heads/x at r3\n",
        "\n",
    )));
}

#[test]
fn non_monotonic_log_warns_but_continues() {
    let tmp = tempfile::tempdir().unwrap();
    let git = common::fake_git(tmp.path());

    let mut exporter = Exporter::new(tmp.path(), common::options(&git));
    let repo = exporter.add_repository(&common::rule("R", &[])).unwrap();

    write_marks(tmp.path(), "R", 1..=2);
    std::fs::write(
        tmp.path().join("log-R"),
        concat!(
            "progress SVN r3 branch refs/heads/master = :1\n",
            "progress SVN r2 branch refs/heads/other = :2\n",
        ),
    )
    .unwrap();

    let mut cutoff = 10;
    assert_eq!(repo.setup_incremental(&mut cutoff).unwrap(), 3);
}

#[test]
fn corrupt_marks_file_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let git = common::fake_git(tmp.path());

    let mut exporter = Exporter::new(tmp.path(), common::options(&git));
    let repo = exporter.add_repository(&common::rule("R", &[])).unwrap();

    std::fs::write(
        tmp.path().join("R/marks-R"),
        format!(":2 {:040x}\n:1 {:040x}\n", 2, 1),
    )
    .unwrap();
    std::fs::write(
        tmp.path().join("log-R"),
        "progress SVN r1 branch refs/heads/master = :1\n",
    )
    .unwrap();

    let mut cutoff = 10;
    assert!(repo.setup_incremental(&mut cutoff).is_err());
}
