/*!
 * Integration tests for streamed and paged listings
 *
 * These consume listings the way an application would: a spawned walker
 * feeding a bounded queue, and caller-driven pagination with cursors.
 */

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use upyun::logging::init_test_logging;
use upyun::protocol::upyun::{
    JsonListingDecoder, ListConfig, ListingDecoder, ListingPage, MockExecutor, ObjectMetadata,
    PagedListConfig, UpyunClient, UpyunConfig, UpyunConfigBuilder, UpyunResult,
};

fn photo_library(mock: &MockExecutor) {
    for year in ["2022", "2023", "2024"] {
        for n in 0..4 {
            mock.insert_file(&format!("/photos/{}/img_{}.jpg", year, n), vec![0u8; n + 1]);
        }
    }
    mock.insert_file("/photos/index.html", b"<html/>".to_vec());
    mock.insert_dir("/photos/trash");
}

fn client(config: UpyunConfig) -> (UpyunClient, Arc<MockExecutor>) {
    let mock = Arc::new(MockExecutor::new());
    let client = UpyunClient::new(config, mock.clone()).unwrap();
    (client, mock)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spawned_walk_streams_whole_tree() {
    init_test_logging();
    let config = UpyunConfigBuilder::new("gallery".to_string())
        .queue_capacity(2)
        .list_page_size(3)
        .build()
        .unwrap();
    let (client, mock) = client(config);
    photo_library(&mock);

    let (mut rx, walker) = client.spawn_list(
        "/photos",
        ListConfig::default().with_max_depth(-1),
        CancellationToken::new(),
    );

    let mut entries: Vec<ObjectMetadata> = Vec::new();
    while let Some(entry) = rx.recv().await {
        entries.push(entry);
    }
    walker.await.unwrap().unwrap();

    let files: Vec<&ObjectMetadata> = entries.iter().filter(|e| !e.is_dir).collect();
    assert_eq!(files.len(), 13);
    assert!(entries.iter().any(|e| e.name == "2023/img_2.jpg" && e.size == 3));

    for year in ["2022", "2023", "2024"] {
        let dir = entries.iter().position(|e| e.name == year).unwrap();
        let last_child = entries
            .iter()
            .rposition(|e| e.name.starts_with(&format!("{}/", year)))
            .unwrap();
        assert!(last_child < dir, "{} emitted before its children", year);
        assert!(!entries[dir].empty_dir);
    }
    let trash = entries.iter().find(|e| e.name == "trash").unwrap();
    assert!(trash.is_dir && trash.empty_dir);

    assert!(mock
        .requests()
        .iter()
        .all(|r| r.header_str("X-List-Limit") == Some("3")));
}

#[tokio::test]
async fn test_spawned_walk_honours_object_cap() {
    let (client, mock) = client(UpyunConfig::new("gallery".to_string()));
    photo_library(&mock);

    let (mut rx, walker) = client.spawn_list(
        "/photos",
        ListConfig::default().with_max_depth(-1).with_max_objects(6),
        CancellationToken::new(),
    );

    let mut count = 0;
    while rx.recv().await.is_some() {
        count += 1;
    }
    walker.await.unwrap().unwrap();
    assert_eq!(count, 6);
}

#[tokio::test]
async fn test_cancel_before_start_sends_nothing() {
    let (client, mock) = client(UpyunConfig::new("gallery".to_string()));
    photo_library(&mock);

    let token = CancellationToken::new();
    token.cancel();
    let (mut rx, walker) = client.spawn_list("/photos", ListConfig::default(), token);

    assert!(rx.recv().await.is_none());
    walker.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_paging_through_directory() {
    let config = UpyunConfigBuilder::new("gallery".to_string())
        .paged_list_limit(3)
        .build()
        .unwrap();
    let (client, mock) = client(config);
    for n in 0..8 {
        mock.insert_file(&format!("/inbox/{:02}.eml", n), b"mail".to_vec());
    }

    let mut names = Vec::new();
    let mut pages = 0;
    let mut paging = PagedListConfig::default();
    loop {
        let page = client.list_objects("/inbox", &paging).await.unwrap();
        pages += 1;
        assert!(page.entries.len() <= 3);
        names.extend(page.entries.into_iter().map(|e| e.name));
        match page.next_cursor {
            Some(cursor) => paging = paging.with_cursor(cursor),
            None => break,
        }
    }

    assert_eq!(pages, 3);
    let expected: Vec<String> = (0..8).map(|n| format!("{:02}.eml", n)).collect();
    assert_eq!(names, expected);
}

/// Wraps the JSON decoder and counts decoded pages
struct CountingDecoder {
    pages: AtomicUsize,
}

impl ListingDecoder for CountingDecoder {
    fn decode(&self, body: &[u8]) -> UpyunResult<ListingPage> {
        self.pages.fetch_add(1, Ordering::SeqCst);
        JsonListingDecoder.decode(body)
    }
}

#[tokio::test]
async fn test_custom_decoder_sees_every_page() {
    let (client, mock) = client(UpyunConfig::new("gallery".to_string()));
    photo_library(&mock);

    let decoder = Arc::new(CountingDecoder {
        pages: AtomicUsize::new(0),
    });
    let client = client.with_decoder(decoder.clone());

    let (mut rx, walker) = client.spawn_list(
        "/photos",
        ListConfig::default().with_max_depth(2).with_page_size(2),
        CancellationToken::new(),
    );
    let mut count = 0;
    while rx.recv().await.is_some() {
        count += 1;
    }
    walker.await.unwrap().unwrap();

    // 5 root entries plus 12 images; trash is listed but empty
    assert_eq!(count, 17);
    assert_eq!(decoder.pages.load(Ordering::SeqCst), mock.requests().len());
}
