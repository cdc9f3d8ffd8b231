//! Protocol tests against the in-memory service
//!
//! These cover the multi-request behaviour of the client: suspending and
//! resuming multipart uploads, and the recursive listing's ordering, limits
//! and cancellation.

use super::mock::{Fault, FaultTarget, MockExecutor};
use super::*;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const MB: usize = 1024 * 1024;

fn client_with(config: UpyunConfig) -> (UpyunClient, Arc<MockExecutor>) {
    let mock = Arc::new(MockExecutor::new());
    let client = UpyunClient::new(config, mock.clone()).expect("valid config");
    (client, mock)
}

fn client() -> (UpyunClient, Arc<MockExecutor>) {
    client_with(UpyunConfig::new("demo".to_string()))
}

fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

async fn collect(
    client: &UpyunClient,
    path: &str,
    config: ListConfig,
) -> (UpyunResult<()>, Vec<ObjectMetadata>) {
    let (tx, mut rx) = mpsc::channel(4);
    let token = CancellationToken::new();
    let producer = client.list(path, config, tx, token);
    let consumer = async {
        let mut out = Vec::new();
        while let Some(entry) = rx.recv().await {
            out.push(entry);
        }
        out
    };
    tokio::join!(producer, consumer)
}

fn names(entries: &[ObjectMetadata]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}

/// /a.txt, /docs/{x.md, y.md}, /docs/deep/z.md, /empty/, /pics/p.png
fn sample_tree(mock: &MockExecutor) {
    mock.insert_file("/a.txt", b"a".to_vec());
    mock.insert_file("/docs/x.md", b"x".to_vec());
    mock.insert_file("/docs/y.md", b"yy".to_vec());
    mock.insert_file("/docs/deep/z.md", b"zzz".to_vec());
    mock.insert_dir("/empty");
    mock.insert_file("/pics/p.png", b"png".to_vec());
}

#[tokio::test]
async fn test_suspend_and_resume_at_failed_part() {
    let config = UpyunConfigBuilder::new("demo".to_string())
        .max_resume_put_tries(3)
        .use_md5(true)
        .build()
        .unwrap();
    let (client, mock) = client_with(config);

    let data = payload(25 * MB, 7);
    mock.inject(FaultTarget::Part(13), Fault::Network, 3);

    let source = SharedSource::new(Cursor::new(data.clone())).unwrap();
    let err = client
        .put_file("/video.bin", source.clone(), &PutConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, UpyunError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(mock.part_attempts(13), 3);

    let upload_id = mock.last_upload_id().unwrap();
    let breakpoint = client.breakpoints().get(&upload_id).await.unwrap().unwrap();
    assert_eq!(breakpoint.next_part_id, 13);
    assert_eq!(breakpoint.max_part_id, 24);
    assert_eq!(breakpoint.part_size, MB as u64);
    assert!(breakpoint.checksum_enabled);
    assert_eq!(
        breakpoint.pending_fragment_checksum,
        fragment::md5_hex(&data[13 * MB..14 * MB])
    );
    assert_eq!(mock.stored_parts(&upload_id), (0..13).collect::<Vec<_>>());
    assert!(mock.object("/video.bin").is_none());

    mock.clear_requests();
    client
        .resume_put("/video.bin", source, &upload_id, &PutConfig::default())
        .await
        .unwrap();

    assert_eq!(mock.part_requests(), (13..=24).collect::<Vec<_>>());
    assert!(mock
        .requests()
        .iter()
        .all(|r| r.header_str("X-Upyun-Multi-Stage") != Some("initiate")));
    assert_eq!(mock.object("/video.bin").unwrap(), bytes::Bytes::from(data));
    assert!(client.breakpoints().get(&upload_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_resume_matches_uninterrupted_upload() {
    let (client, mock) = client();
    let data = payload(12 * MB + 321, 3);
    let config = PutConfig::default().with_max_tries(2);

    client
        .put_file(
            "/clean.bin",
            SharedSource::new(Cursor::new(data.clone())).unwrap(),
            &config,
        )
        .await
        .unwrap();

    mock.inject(FaultTarget::Part(4), Fault::Network, 2);
    let source = SharedSource::new(Cursor::new(data.clone())).unwrap();
    client
        .put_file("/resumed.bin", source.clone(), &config)
        .await
        .unwrap_err();
    let upload_id = mock.last_upload_id().unwrap();
    client
        .resume_put("/resumed.bin", source, &upload_id, &config)
        .await
        .unwrap();

    assert_eq!(mock.object("/resumed.bin"), mock.object("/clean.bin"));
}

#[tokio::test]
async fn test_resume_rejects_modified_fragment() {
    let (client, mock) = client();
    let mut data = payload(11 * MB, 1);
    let config = PutConfig::default().with_max_tries(1).with_md5(true);

    mock.inject(FaultTarget::Part(5), Fault::Network, 1);
    client
        .put_file(
            "/edited.bin",
            SharedSource::new(Cursor::new(data.clone())).unwrap(),
            &config,
        )
        .await
        .unwrap_err();
    let upload_id = mock.last_upload_id().unwrap();

    data[5 * MB + 10] ^= 0xff;
    mock.clear_requests();
    let err = client
        .resume_put(
            "/edited.bin",
            SharedSource::new(Cursor::new(data)).unwrap(),
            &upload_id,
            &config,
        )
        .await
        .unwrap_err();

    assert!(
        matches!(err, UpyunError::ResumeState(ref m) if m == "source has changed since last attempt")
    );
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_file_breakpoint_store_survives_client_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let mock = Arc::new(MockExecutor::new());
    let store = Arc::new(FileBreakpointStore::new(dir.path()));
    let data = payload(10 * MB + 1, 9);
    let config = PutConfig::default().with_max_tries(1);

    let first = UpyunClient::new(UpyunConfig::new("demo".to_string()), mock.clone())
        .unwrap()
        .with_breakpoint_store(store.clone());
    mock.inject(FaultTarget::Part(10), Fault::Network, 1);
    first
        .put_file(
            "/tail.bin",
            SharedSource::new(Cursor::new(data.clone())).unwrap(),
            &config,
        )
        .await
        .unwrap_err();
    let upload_id = mock.last_upload_id().unwrap();
    assert!(store.path_for(&upload_id).exists());

    let second = UpyunClient::new(UpyunConfig::new("demo".to_string()), mock.clone())
        .unwrap()
        .with_breakpoint_store(store.clone());
    second
        .resume_put(
            "/tail.bin",
            SharedSource::new(Cursor::new(data.clone())).unwrap(),
            &upload_id,
            &config,
        )
        .await
        .unwrap();

    assert_eq!(mock.object("/tail.bin").unwrap(), bytes::Bytes::from(data));
    assert!(!store.path_for(&upload_id).exists());
}

#[tokio::test]
async fn test_root_only_listing() {
    let (client, mock) = client();
    sample_tree(&mock);

    let (result, entries) = collect(&client, "/", ListConfig::default()).await;
    result.unwrap();

    assert_eq!(names(&entries), vec!["a.txt", "docs", "empty", "pics"]);
    assert!(entries.iter().all(|e| !e.empty_dir));
}

#[tokio::test]
async fn test_unlimited_depth_emits_children_first() {
    let (client, mock) = client();
    sample_tree(&mock);

    let config = ListConfig::default().with_max_depth(-1);
    let (result, entries) = collect(&client, "/", config).await;
    result.unwrap();

    assert_eq!(
        names(&entries),
        vec![
            "a.txt",
            "docs/deep/z.md",
            "docs/deep",
            "docs/x.md",
            "docs/y.md",
            "docs",
            "empty",
            "pics/p.png",
            "pics",
        ]
    );

    let empty: Vec<&str> = entries
        .iter()
        .filter(|e| e.empty_dir)
        .map(|e| e.name.as_str())
        .collect();
    assert_eq!(empty, vec!["empty"]);
}

#[tokio::test]
async fn test_two_levels() {
    let (client, mock) = client();
    sample_tree(&mock);

    let config = ListConfig::default().with_max_depth(2);
    let (result, entries) = collect(&client, "/docs", config).await;
    result.unwrap();

    assert_eq!(
        names(&entries),
        vec!["deep/z.md", "deep", "x.md", "y.md"]
    );
}

#[tokio::test]
async fn test_pagination_is_transparent() {
    let (client, mock) = client();
    sample_tree(&mock);

    let (_, single) = collect(&client, "/", ListConfig::default().with_max_depth(-1)).await;
    mock.clear_requests();
    let (result, paged) = collect(
        &client,
        "/",
        ListConfig::default().with_max_depth(-1).with_page_size(1),
    )
    .await;
    result.unwrap();

    assert_eq!(single, paged);
    assert!(mock.requests().len() > 6);
}

#[tokio::test]
async fn test_max_objects_truncates_in_order() {
    let (client, mock) = client();
    sample_tree(&mock);

    let (_, all) = collect(&client, "/", ListConfig::default().with_max_depth(-1)).await;
    for n in [1u64, 2, 4, 7] {
        let config = ListConfig::default()
            .with_max_depth(-1)
            .with_max_objects(n)
            .with_page_size(2);
        let (result, entries) = collect(&client, "/", config).await;
        result.unwrap();
        assert_eq!(entries, all[..n as usize].to_vec(), "max_objects = {}", n);
    }
}

#[tokio::test]
async fn test_transient_failure_on_second_page() {
    let (client, mock) = client();
    for i in 0..6 {
        mock.insert_file(&format!("/logs/{:02}.log", i), b"l".to_vec());
    }
    mock.inject(FaultTarget::ListingPage(2), Fault::Network, 2);

    let config = ListConfig::default().with_page_size(2);
    let (result, entries) = collect(&client, "/logs", config).await;
    result.unwrap();

    assert_eq!(
        names(&entries),
        vec!["00.log", "01.log", "02.log", "03.log", "04.log", "05.log"]
    );

    let log = mock.request_log();
    assert_eq!(log.len(), 5);
    for pair in log[1..4].windows(2) {
        assert!(pair[1].at.duration_since(pair[0].at) >= LIST_RETRY_DELAY);
    }
}

#[tokio::test]
async fn test_retry_budget_is_shared_across_traversal() {
    let config = UpyunConfigBuilder::new("demo".to_string())
        .max_list_tries(3)
        .build()
        .unwrap();
    let (client, mock) = client_with(config);
    sample_tree(&mock);
    mock.inject(FaultTarget::Path("/docs".to_string()), Fault::Network, 2);
    mock.inject(FaultTarget::Path("/pics".to_string()), Fault::Network, 1);

    let (result, entries) = collect(&client, "/", ListConfig::default().with_max_depth(-1)).await;

    let err = result.unwrap_err();
    assert!(matches!(err, UpyunError::RetriesExhausted { attempts: 3, .. }));
    assert!(names(&entries).contains(&"docs"));
    assert!(!names(&entries).contains(&"pics"));
}

#[tokio::test]
async fn test_permanent_listing_error_aborts() {
    let (client, mock) = client();
    sample_tree(&mock);
    mock.inject(FaultTarget::Path("/pics".to_string()), Fault::Status(403), 1);

    let (result, entries) = collect(&client, "/", ListConfig::default().with_max_depth(-1)).await;

    let err = result.unwrap_err();
    assert!(matches!(err.root_cause(), UpyunError::Remote { status: 403, .. }));
    assert_eq!(mock.requests().len(), 5);
    assert_eq!(names(&entries).last(), Some(&"empty"));
}

#[tokio::test]
async fn test_cancellation_closes_queue_without_error() {
    let (client, mock) = client();
    for i in 0..100 {
        mock.insert_file(&format!("/many/{:03}", i), b"m".to_vec());
    }

    // The whole directory fits in one page, so stopping early proves the
    // check runs per entry rather than per page
    const CAPACITY: usize = 1;
    const CANCEL_AFTER: usize = 5;
    let (tx, mut rx) = mpsc::channel(CAPACITY);
    let token = CancellationToken::new();
    let walker = {
        let client = client.clone();
        let token = token.clone();
        tokio::spawn(async move {
            client
                .list("/many", ListConfig::default().with_page_size(200), tx, token)
                .await
        })
    };

    let mut received = Vec::new();
    while let Some(entry) = rx.recv().await {
        received.push(entry);
        if received.len() == CANCEL_AFTER {
            token.cancel();
        }
    }

    walker.await.unwrap().unwrap();
    assert!(received.len() >= CANCEL_AFTER);
    assert!(
        received.len() <= CANCEL_AFTER + CAPACITY + 1,
        "{} entries arrived after cancelling at {}",
        received.len(),
        CANCEL_AFTER
    );
    assert!(rx.recv().await.is_none());

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].header_str("x-list-iter").is_none());
}

#[tokio::test]
async fn test_dropped_receiver_stops_walk() {
    let (client, mock) = client();
    sample_tree(&mock);

    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    client
        .list("/", ListConfig::default(), tx, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(mock.requests().len(), 1);
}

#[tokio::test]
async fn test_paged_listing() {
    let (client, mock) = client();
    for i in 0..5 {
        mock.insert_file(&format!("/p/{}", i), b"x".to_vec());
    }

    let first = client
        .list_objects("/p", &PagedListConfig::default().with_limit(3))
        .await
        .unwrap();
    assert_eq!(first.entries.len(), 3);
    let cursor = first.next_cursor.clone().unwrap();

    let second = client
        .list_objects(
            "/p",
            &PagedListConfig::default().with_limit(3).with_cursor(cursor),
        )
        .await
        .unwrap();
    assert_eq!(names(&second.entries), vec!["3", "4"]);
    assert!(!second.has_more());

    let request = mock.requests().pop().unwrap();
    assert_eq!(request.header_str("X-List-Limit"), Some("3"));
    assert_eq!(request.header_str("Accept"), Some("application/json"));
}

#[tokio::test]
async fn test_traversal_clamps_oversized_page() {
    let (client, mock) = client();
    sample_tree(&mock);

    let config = ListConfig::default()
        .with_max_depth(-1)
        .with_page_size(100_000);
    let (result, entries) = collect(&client, "/", config).await;
    result.unwrap();

    assert_eq!(entries.len(), 9);
    assert!(mock
        .requests()
        .iter()
        .all(|r| r.header_str("X-List-Limit") == Some("256")));
}

#[tokio::test]
async fn test_paged_listing_clamps_limit_and_order() {
    let (client, mock) = client();
    mock.insert_file("/q/a", b"x".to_vec());
    mock.insert_file("/q/b", b"x".to_vec());

    let page = client
        .list_objects(
            "/q",
            &PagedListConfig::default()
                .with_limit(100_000)
                .with_descending(true),
        )
        .await
        .unwrap();

    assert_eq!(names(&page.entries), vec!["b", "a"]);
    let request = mock.requests().pop().unwrap();
    assert_eq!(request.header_str("X-List-Limit"), Some("256"));
    assert_eq!(request.header_str("X-List-Order"), Some("desc"));
}

#[tokio::test]
async fn test_paged_listing_retries_per_call() {
    let (client, mock) = client();
    mock.insert_file("/r/a", b"x".to_vec());
    mock.inject(FaultTarget::Path("/r".to_string()), Fault::Network, 4);

    let page = client
        .list_objects("/r", &PagedListConfig::default())
        .await
        .unwrap();
    assert_eq!(page.entries.len(), 1);

    mock.inject(FaultTarget::Path("/r".to_string()), Fault::Network, 5);
    let err = client
        .list_objects("/r", &PagedListConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, UpyunError::RetriesExhausted { attempts: 5, .. }));
}
