/*!
 * Integration tests for resumable multipart uploads
 *
 * These drive uploads of real files through the public client API against
 * the in-memory service, persisting breakpoints on disk between clients.
 */

use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use upyun::logging::init_test_logging;
use upyun::protocol::upyun::mock::{Fault, FaultTarget};
use upyun::protocol::upyun::{
    BreakpointStore, FileBreakpointStore, MockExecutor, PutConfig, SharedSource, UpyunClient,
    UpyunConfig, UpyunConfigBuilder, UpyunError,
};

const MB: usize = 1024 * 1024;

fn write_source(dir: &TempDir, name: &str, len: usize) -> (std::path::PathBuf, Vec<u8>) {
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    let path = dir.path().join(name);
    fs::write(&path, &data).unwrap();
    (path, data)
}

fn client_on(mock: &Arc<MockExecutor>, config: UpyunConfig, state_dir: &TempDir) -> UpyunClient {
    UpyunClient::new(config, mock.clone())
        .unwrap()
        .with_breakpoint_store(Arc::new(FileBreakpointStore::new(state_dir.path())))
}

/// An interrupted upload is picked up by a fresh client reading the same
/// breakpoint directory
#[tokio::test]
async fn test_file_upload_resumes_after_restart() {
    init_test_logging();
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let (path, data) = write_source(&work, "archive.tar", 11 * MB + 17);

    let mock = Arc::new(MockExecutor::new());
    let config = UpyunConfigBuilder::new("backups".to_string())
        .max_resume_put_tries(2)
        .use_md5(true)
        .build()
        .unwrap();

    mock.inject(FaultTarget::Part(6), Fault::Network, 2);
    let first = client_on(&mock, config.clone(), &state);
    let err = first
        .put_file(
            "/nightly/archive.tar",
            SharedSource::open(&path).unwrap(),
            &PutConfig::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UpyunError::RetriesExhausted { attempts: 2, .. }));

    let upload_id = mock.last_upload_id().unwrap();
    let store = FileBreakpointStore::new(state.path());
    assert!(store.path_for(&upload_id).exists());
    drop(first);

    let second = client_on(&mock, config, &state);
    let saved = second.breakpoints().get(&upload_id).await.unwrap().unwrap();
    assert_eq!(saved.next_part_id, 6);
    assert_eq!(saved.max_part_id, 11);

    mock.clear_requests();
    second
        .resume_put(
            "/nightly/archive.tar",
            SharedSource::open(&path).unwrap(),
            &upload_id,
            &PutConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(mock.part_requests(), (6..=11).collect::<Vec<_>>());
    assert_eq!(
        mock.object("/nightly/archive.tar").unwrap().as_ref(),
        data.as_slice()
    );
    assert!(!store.path_for(&upload_id).exists());
}

/// Rewriting the file between attempts is detected before any part is sent
#[tokio::test]
async fn test_resume_detects_rewritten_file() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let (path, mut data) = write_source(&work, "db.dump", 12 * MB);

    let mock = Arc::new(MockExecutor::new());
    let config = UpyunConfigBuilder::new("backups".to_string())
        .max_resume_put_tries(1)
        .use_md5(true)
        .build()
        .unwrap();
    let client = client_on(&mock, config, &state);

    mock.inject(FaultTarget::Part(3), Fault::Network, 1);
    client
        .put_file("/db.dump", SharedSource::open(&path).unwrap(), &PutConfig::default())
        .await
        .unwrap_err();
    let upload_id = mock.last_upload_id().unwrap();

    data[3 * MB + 10] ^= 0xff;
    fs::write(&path, &data).unwrap();

    mock.clear_requests();
    let err = client
        .resume_put(
            "/db.dump",
            SharedSource::open(&path).unwrap(),
            &upload_id,
            &PutConfig::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), UpyunError::ResumeState(_)));
    assert!(mock.requests().is_empty());
    assert!(mock.object("/db.dump").is_none());
}

/// A truncated file can no longer satisfy the recorded session
#[tokio::test]
async fn test_resume_rejects_truncated_file() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let (path, data) = write_source(&work, "logs.tgz", 12 * MB);

    let mock = Arc::new(MockExecutor::new());
    let config = UpyunConfigBuilder::new("backups".to_string())
        .max_resume_put_tries(1)
        .build()
        .unwrap();
    let client = client_on(&mock, config, &state);

    mock.inject(FaultTarget::Part(8), Fault::Network, 1);
    client
        .put_file("/logs.tgz", SharedSource::open(&path).unwrap(), &PutConfig::default())
        .await
        .unwrap_err();
    let upload_id = mock.last_upload_id().unwrap();

    fs::write(&path, &data[..5 * MB]).unwrap();
    let err = client
        .resume_put(
            "/logs.tgz",
            SharedSource::open(&path).unwrap(),
            &upload_id,
            &PutConfig::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), UpyunError::ResumeState(_)));
    assert!(client.breakpoints().get(&upload_id).await.unwrap().is_some());
}

/// Files under the threshold go out in one PUT and never touch the store
#[tokio::test]
async fn test_small_file_skips_multipart() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let (path, data) = write_source(&work, "notes.txt", 4096);

    let mock = Arc::new(MockExecutor::new());
    let client = client_on(&mock, UpyunConfig::new("docs".to_string()), &state);

    client
        .put_file(
            "/notes.txt",
            SharedSource::open(&path).unwrap(),
            &PutConfig::default().with_content_type("text/plain"),
        )
        .await
        .unwrap();

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header_str("Content-Type"), Some("text/plain"));
    assert!(mock.last_upload_id().is_none());
    assert_eq!(mock.object("/notes.txt").unwrap().as_ref(), data.as_slice());
    assert_eq!(fs::read_dir(state.path()).unwrap().count(), 0);
}

/// Larger parts from the per-call config shrink the session
#[tokio::test]
async fn test_part_size_override() {
    let work = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let (path, data) = write_source(&work, "image.iso", 10 * MB);

    let mock = Arc::new(MockExecutor::new());
    let client = client_on(&mock, UpyunConfig::new("isos".to_string()), &state);

    client
        .put_file(
            "/image.iso",
            SharedSource::open(&path).unwrap(),
            &PutConfig::default().with_part_size(4 * MB as u64),
        )
        .await
        .unwrap();

    assert_eq!(mock.part_requests(), vec![0, 1, 2]);
    assert_eq!(mock.object("/image.iso").unwrap().as_ref(), data.as_slice());
}
