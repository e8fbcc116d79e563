//! The archive writer lays down one file per host per day under
//! `log_dir/YYYY/MM/DD/<host>.log`, and `close_all` flushes and drops every
//! open handle (what SIGHUP triggers in the running daemon).

use chrono::Datelike;

use syslogd_core::ArchiveWriter;

#[tokio::test]
async fn writes_land_under_the_expected_dated_path_and_survive_close_all() {
    let dir = tempfile::tempdir().unwrap();
    let archive = ArchiveWriter::new(Some(dir.path().to_owned()));
    let (supervisory_tx, _rx) = syslogd_core::error::channel();

    archive.write("host-a", b"<13>Jan  1 00:00:00 host-a sshd[1]: hello\n", &supervisory_tx);
    archive.write("host-b", b"<13>Jan  1 00:00:00 host-b sshd[1]: world\n", &supervisory_tx);
    assert_eq!(archive.open_file_count(), 2);

    archive.close_all();
    assert_eq!(archive.open_file_count(), 0);

    let today = chrono::Local::now();
    let dated = dir
        .path()
        .join(format!("{:04}", today.year()))
        .join(format!("{:02}", today.month()))
        .join(format!("{:02}", today.day()));

    let host_a = std::fs::read_to_string(dated.join("host-a.log")).unwrap();
    assert!(host_a.contains("hello"));
    let host_b = std::fs::read_to_string(dated.join("host-b.log")).unwrap();
    assert!(host_b.contains("world"));
}

#[tokio::test]
async fn archiving_is_a_noop_when_no_log_dir_is_configured() {
    let archive = ArchiveWriter::new(None);
    let (supervisory_tx, _rx) = syslogd_core::error::channel();
    archive.write("host-a", b"irrelevant\n", &supervisory_tx);
    assert_eq!(archive.open_file_count(), 0);
}

#[tokio::test]
async fn syncer_task_flushes_without_intervention() {
    let dir = tempfile::tempdir().unwrap();
    let archive = ArchiveWriter::new(Some(dir.path().to_owned()));
    let (supervisory_tx, _rx) = syslogd_core::error::channel();
    let syncer = archive.spawn_syncer();

    archive.write("host-a", b"<13>Jan  1 00:00:00 host-a sshd[1]: buffered\n", &supervisory_tx);

    tokio::time::sleep(std::time::Duration::from_secs(3)).await;

    let today = chrono::Local::now();
    let dated = dir
        .path()
        .join(format!("{:04}", today.year()))
        .join(format!("{:02}", today.month()))
        .join(format!("{:02}", today.day()));
    let contents = std::fs::read_to_string(dated.join("host-a.log")).unwrap();
    assert!(contents.contains("buffered"));

    syncer.abort();
    archive.close_all();
}
