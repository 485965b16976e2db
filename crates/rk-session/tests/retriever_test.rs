mod support;

use std::collections::HashMap;
use std::sync::Arc;

use rk_session::{FileRetriever, SessionError, SessionPool, TransferStage};
use support::{target, FakeConnector, SessionPlan};

fn retriever_with_file(path: &str, bytes: &[u8]) -> FileRetriever {
    let connector = Arc::new(FakeConnector::with_default(SessionPlan {
        files: HashMap::from([(path.to_string(), bytes.to_vec())]),
        ..SessionPlan::default()
    }));
    FileRetriever::new(Arc::new(SessionPool::new(connector)))
}

fn stage_of(err: &SessionError) -> Option<TransferStage> {
    match err {
        SessionError::Transfer { stage, .. } => Some(*stage),
        _ => None,
    }
}

#[tokio::test]
async fn downloads_into_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("r1").join("nested").join("core.backup");
    let retriever = retriever_with_file("core.backup", b"backup-bytes");

    let copied = retriever
        .download(&target(), "core.backup", &local)
        .await
        .unwrap();

    assert_eq!(copied, 12);
    assert_eq!(std::fs::read(&local).unwrap(), b"backup-bytes");
}

#[tokio::test]
async fn missing_remote_file_fails_at_remote_open() {
    let dir = tempfile::tempdir().unwrap();
    let retriever = retriever_with_file("core.backup", b"x");

    let err = retriever
        .download(&target(), "other.backup", &dir.path().join("out"))
        .await
        .unwrap_err();
    assert_eq!(stage_of(&err), Some(TransferStage::RemoteOpen));
    assert!(err.to_string().contains("other.backup"));
}

#[tokio::test]
async fn subsystem_failure_has_its_own_stage() {
    let dir = tempfile::tempdir().unwrap();
    let connector = Arc::new(FakeConnector::with_default(SessionPlan {
        sftp_ok: false,
        ..SessionPlan::default()
    }));
    let retriever = FileRetriever::new(Arc::new(SessionPool::new(connector)));

    let err = retriever
        .download(&target(), "core.backup", &dir.path().join("out"))
        .await
        .unwrap_err();
    assert_eq!(stage_of(&err), Some(TransferStage::Subsystem));
}

#[tokio::test]
async fn parent_that_is_a_file_fails_at_local_dir() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    let retriever = retriever_with_file("core.backup", b"x");

    let err = retriever
        .download(&target(), "core.backup", &blocker.join("sub").join("out"))
        .await
        .unwrap_err();
    assert_eq!(stage_of(&err), Some(TransferStage::LocalDir));
}

#[tokio::test]
async fn destination_that_is_a_directory_fails_at_local_create() {
    let dir = tempfile::tempdir().unwrap();
    let retriever = retriever_with_file("core.backup", b"x");

    let err = retriever
        .download(&target(), "core.backup", dir.path())
        .await
        .unwrap_err();
    assert_eq!(stage_of(&err), Some(TransferStage::LocalCreate));
}

#[tokio::test]
async fn dial_failure_surfaces_as_transport() {
    let dir = tempfile::tempdir().unwrap();
    let connector = Arc::new(FakeConnector::new());
    connector
        .refuse
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let retriever = FileRetriever::new(Arc::new(SessionPool::new(connector)));

    let err = retriever
        .download(&target(), "core.backup", &dir.path().join("out"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Transport(_)));
}
