//! Integration tests for sessions over a durable identity store.

use reposync_engine::{
    DiskFileSystem, MemoryRepository, RetryConfig, SyncConfig, SyncSession,
};
use reposync_store::{FileStore, MetadataStore};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn config(root: &Path) -> SyncConfig {
    SyncConfig::new(root)
        .with_retry(RetryConfig::no_retry())
        .with_swallow_handler_errors(false)
        .with_self_write_window(Duration::ZERO)
}

fn session(root: &Path, remote: &Arc<MemoryRepository>, journal: &Path) -> SyncSession {
    session_with(config(root), remote, journal)
}

fn session_with(config: SyncConfig, remote: &Arc<MemoryRepository>, journal: &Path) -> SyncSession {
    let store = Arc::new(FileStore::open(journal).unwrap());
    SyncSession::new(
        config,
        remote.clone(),
        store,
        Arc::new(DiskFileSystem::with_sidecar()),
    )
}

#[test]
fn restart_resumes_incremental_polling() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("tree");
    let journal = dir.path().join("state/identity.journal");
    let remote = Arc::new(MemoryRepository::new());
    remote.put_file("/a.txt", b"one").unwrap();
    remote.put_file("/docs/b.txt", b"two").unwrap();

    {
        let first = session(&root, &remote, &journal);
        let report = first.sync_once(false).unwrap();
        assert!(report.full_crawl);
        assert_eq!(report.invocations_of("download-new"), 3);
    }

    remote.put_file("/a.txt", b"three").unwrap();
    let second = session(&root, &remote, &journal);
    let report = second.sync_once(false).unwrap();
    assert!(!report.full_crawl);
    assert_eq!(report.total_invocations(), 1);
    assert_eq!(report.invocations_of("download-changed"), 1);
    assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"three");

    let idle = second.sync_once(false).unwrap();
    assert_eq!(idle.total_invocations(), 0);
}

#[test]
fn records_survive_restart() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("tree");
    let journal = dir.path().join("identity.journal");
    let remote = Arc::new(MemoryRepository::new());
    remote.put_file("/Cat/kitten.txt", b"meow").unwrap();

    drop(session(&root, &remote, &journal).sync_once(false).unwrap());

    let store = FileStore::open(&journal).unwrap();
    assert!(store.last_validation().is_clean());
    assert_eq!(store.len().unwrap(), 2);
    let file = store
        .get_by_local_path(Path::new("Cat/kitten.txt"))
        .unwrap()
        .unwrap();
    assert_eq!(file.remote_id, remote.find("/Cat/kitten.txt").unwrap().id);
    assert_eq!(
        store.change_log_token().unwrap(),
        Some(remote.current_token())
    );
}

#[test]
fn remote_root_limits_the_synchronized_subtree() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("tree");
    let journal = dir.path().join("identity.journal");
    let remote = Arc::new(MemoryRepository::new());
    remote.put_file("/Shared/in.txt", b"in").unwrap();
    remote.put_file("/Other/out.txt", b"out").unwrap();

    let session = session_with(
        config(&root).with_remote_root("/Shared"),
        &remote,
        &journal,
    );
    let report = session.sync_once(false).unwrap();
    assert_eq!(report.invocations_of("download-new"), 1);
    assert_eq!(fs::read(root.join("in.txt")).unwrap(), b"in");
    assert!(!root.join("Other").exists());

    remote.put_file("/Other/out.txt", b"changed").unwrap();
    remote.put_file("/Shared/new.txt", b"new").unwrap();
    let report = session.sync_once(false).unwrap();
    assert_eq!(report.total_invocations(), 1);
    assert!(root.join("new.txt").exists());
    assert!(!root.join("out.txt").exists());
}

#[test]
fn slow_repository_times_out_without_losing_the_token() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("tree");
    let journal = dir.path().join("identity.journal");
    let remote = Arc::new(MemoryRepository::new());
    remote.put_file("/a.txt", b"one").unwrap();

    let session = session_with(
        config(&root).with_request_timeout(Duration::from_millis(200)),
        &remote,
        &journal,
    );
    session.sync_once(false).unwrap();
    let token = remote.current_token();

    remote.put_file("/a.txt", b"two").unwrap();
    remote.set_latency(Duration::from_secs(1));
    let report = session.sync_once(false).unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(!report.token_advanced);
    assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"one");
    assert_eq!(
        session.context().store().change_log_token().unwrap(),
        Some(token)
    );

    remote.set_latency(Duration::from_millis(50));
    let report = session.sync_once(false).unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(report.invocations_of("download-changed"), 1);
    assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"two");
}
