// tests/ingest_pipeline.rs
mod common;

use std::sync::Arc;

use common::{
    fixture, pipeline, rss, source, CancellingStore, FixtureTransport, FlakyStore, Reply,
};
use cybersec_feeds::error::FetchError;
use cybersec_feeds::ingest::{Normalizer, PhaseBoard, SourcePhase};
use cybersec_feeds::storage::{AssetArea, ItemFilter, ItemStore, MarkdownExporter, MemoryStore, Page};
use cybersec_feeds::{AssetStatus, RawDocument};
use tokio_util::sync::CancellationToken;

const FEED: &str = "https://feeds.test/rss";

#[tokio::test]
async fn storage_failure_on_one_item_does_not_abort_the_batch() {
    let transport = FixtureTransport::new();
    let flaky = Arc::new(FlakyStore::failing_on(3));
    let p = pipeline(transport.clone(), flaky.clone());
    transport.ok(
        FEED,
        rss(&[
            ("one", "https://s.test/1"),
            ("two", "https://s.test/2"),
            ("three", "https://s.test/3"),
            ("four", "https://s.test/4"),
            ("five", "https://s.test/5"),
        ]),
    );

    let out = p
        .run_cycle(&source("s", FEED, 60), &PhaseBoard::default(), &CancellationToken::new())
        .await;
    assert!(out.is_ok(), "item failures are not cycle failures");
    assert_eq!(out.items_seen, 5);
    assert_eq!(out.items_new, 4);
    assert_eq!(out.item_failures, 1);

    let titles: Vec<String> = flaky
        .inner
        .list_items(&ItemFilter::default(), Page::default())
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.item.title)
        .collect();
    assert_eq!(titles.len(), 4);
    assert!(!titles.contains(&"three".to_string()));
    assert!(titles.contains(&"five".to_string()));
}

#[tokio::test]
async fn failed_asset_leaves_item_stored_and_marks_asset() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FixtureTransport::new();
    let store = MemoryStore::new();
    let p = pipeline(transport.clone(), Arc::new(store.clone()))
        .with_assets(AssetArea::new(dir.path()));

    transport.ok(FEED, fixture("thn_rss.xml"));
    // the enclosure of the first item is gone; the inline image of the second works
    transport.route(
        "https://blogger.googleusercontent.com/img/openssh.png",
        Reply::Body(404, Vec::new()),
    );
    transport.ok(
        "https://blogger.googleusercontent.com/img/recap.jpg",
        b"\xFF\xD8jpeg".to_vec(),
    );

    let out = p
        .run_cycle(&source("thn", FEED, 60), &PhaseBoard::default(), &CancellationToken::new())
        .await;
    assert!(out.is_ok());
    assert_eq!(out.items_new, 3);
    assert_eq!(out.assets_failed, 1);

    let items = store.list_items(&ItemFilter::default(), Page::default()).await.unwrap();
    let assets: Vec<_> = items.iter().flat_map(|s| s.item.assets.clone()).collect();
    assert_eq!(assets.len(), 2);

    let failed = assets.iter().find(|a| a.url.ends_with("openssh.png")).unwrap();
    assert_eq!(failed.status, AssetStatus::Failed);

    let ok = assets.iter().find(|a| a.url.ends_with("recap.jpg")).unwrap();
    assert_eq!(ok.status, AssetStatus::Retrieved);
    let area = AssetArea::new(dir.path());
    assert_eq!(
        area.read_asset(&ok.local_path).await.unwrap().as_deref(),
        Some(&b"\xFF\xD8jpeg"[..])
    );
}

#[tokio::test]
async fn assets_are_only_fetched_for_new_items() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FixtureTransport::new();
    let p = pipeline(transport.clone(), Arc::new(MemoryStore::new()))
        .with_assets(AssetArea::new(dir.path()));
    transport.ok(FEED, fixture("thn_rss.xml"));
    transport.ok("https://blogger.googleusercontent.com/img/openssh.png", b"png".to_vec());
    transport.ok("https://blogger.googleusercontent.com/img/recap.jpg", b"jpg".to_vec());

    let src = source("thn", FEED, 60);
    let board = PhaseBoard::default();
    let cancel = CancellationToken::new();
    p.run_cycle(&src, &board, &cancel).await;
    p.run_cycle(&src, &board, &cancel).await;

    assert_eq!(transport.calls(FEED), 2);
    assert_eq!(transport.calls("https://blogger.googleusercontent.com/img/openssh.png"), 1);
    assert_eq!(transport.calls("https://blogger.googleusercontent.com/img/recap.jpg"), 1);
}

#[tokio::test]
async fn new_items_are_exported_as_markdown() {
    let dir = tempfile::tempdir().unwrap();
    let posts = dir.path().join("posts");
    let assets = dir.path().join("assets");
    let transport = FixtureTransport::new();
    let p = pipeline(transport.clone(), Arc::new(MemoryStore::new()))
        .with_assets(AssetArea::new(&assets))
        .with_markdown(MarkdownExporter::new(&posts, &assets));
    transport.ok(FEED, fixture("thn_rss.xml"));
    transport.ok("https://blogger.googleusercontent.com/img/recap.jpg", b"jpg".to_vec());

    p.run_cycle(&source("thn", FEED, 60), &PhaseBoard::default(), &CancellationToken::new())
        .await;

    let mut names: Vec<String> = std::fs::read_dir(&posts)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "2024-06-30-older-advisory-roundup.md",
            "2024-07-01-critical-openssh-flaw-exposes-linux-servers-to-remote-code-execution.md",
            "2024-07-02-weekly-recap-r-d-labs-breached-ransomware-more.md",
        ]
    );
    let recap = std::fs::read_to_string(
        posts.join("2024-07-02-weekly-recap-r-d-labs-breached-ransomware-more.md"),
    )
    .unwrap();
    assert!(recap.contains("original_feed: \"The Hacker News\""));
    assert!(recap.contains("](../assets/thn/"));
}

#[tokio::test]
async fn fetch_and_parse_errors_end_the_cycle_as_errored() {
    let transport = FixtureTransport::new();
    let p = pipeline(transport.clone(), Arc::new(MemoryStore::new()));
    let board = PhaseBoard::new(["down", "junk"]);
    let cancel = CancellationToken::new();

    transport.route(
        "https://down.test/rss",
        Reply::Fail(FetchError::Connect {
            url: "https://down.test/rss".into(),
            message: "refused".into(),
        }),
    );
    let down = p
        .run_cycle(&source("down", "https://down.test/rss", 60), &board, &cancel)
        .await;
    assert!(down.error.as_deref().unwrap().contains("refused"));
    assert_eq!(board.get("down"), Some(SourcePhase::Errored));

    transport.ok("https://junk.test/rss", b"<html><body>maintenance</body></html>".to_vec());
    let junk = p
        .run_cycle(&source("junk", "https://junk.test/rss", 60), &board, &cancel)
        .await;
    assert!(junk.error.as_deref().unwrap().contains("unrecognized"));
    assert_eq!(junk.items_seen, 0);

    // next tick recovers
    transport.ok("https://down.test/rss", rss(&[("back", "https://down.test/1")]));
    let back = p
        .run_cycle(&source("down", "https://down.test/rss", 60), &board, &cancel)
        .await;
    assert!(back.is_ok());
    assert_eq!(board.get("down"), Some(SourcePhase::Idle));
}

#[tokio::test]
async fn cancelled_before_persisting_stores_nothing() {
    let transport = FixtureTransport::new();
    let store = MemoryStore::new();
    let p = pipeline(transport.clone(), Arc::new(store.clone()));
    transport.ok(FEED, rss(&[("a", "https://s.test/a")]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let out = p
        .run_cycle(&source("s", FEED, 60), &PhaseBoard::default(), &cancel)
        .await;
    assert!(out.error.as_deref().unwrap().contains("cancelled"));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn shutdown_mid_batch_is_reported_as_interrupted() {
    let transport = FixtureTransport::new();
    let cancel = CancellationToken::new();
    let store = Arc::new(CancellingStore::new(cancel.clone()));
    let p = pipeline(transport.clone(), store.clone());
    transport.ok(
        FEED,
        rss(&[
            ("one", "https://s.test/1"),
            ("two", "https://s.test/2"),
            ("three", "https://s.test/3"),
        ]),
    );
    let board = PhaseBoard::default();

    let out = p.run_cycle(&source("s", FEED, 60), &board, &cancel).await;

    assert!(out.interrupted);
    assert_eq!(out.items_seen, 3);
    assert_eq!(out.items_new, 1);
    let err = out.error.as_deref().unwrap();
    assert!(err.contains("interrupted by shutdown after 1 of 3"), "{err}");
    assert_eq!(board.get("s"), Some(SourcePhase::Errored));
    assert_eq!(store.inner.count_items(&ItemFilter::default()).await.unwrap(), 1);
}

#[tokio::test]
async fn completed_cycle_is_not_marked_interrupted() {
    let transport = FixtureTransport::new();
    let p = pipeline(transport.clone(), Arc::new(MemoryStore::new()));
    transport.ok(FEED, rss(&[("a", "https://s.test/a"), ("b", "https://s.test/b")]));

    let out = p
        .run_cycle(&source("s", FEED, 60), &PhaseBoard::default(), &CancellationToken::new())
        .await;
    assert!(!out.interrupted);
    assert!(out.error.is_none());
    assert_eq!(out.items_new, 2);
}

#[test]
fn items_keep_document_order_regardless_of_timestamps() {
    let doc = RawDocument {
        source_id: "thn".into(),
        fetched_at: chrono::Utc::now(),
        body: fixture("thn_rss.xml"),
        content_type: None,
        status: 200,
    };
    let feed = Normalizer::default()
        .parse(&doc, &source("thn", FEED, 60))
        .unwrap();
    let days: Vec<_> = feed
        .items
        .iter()
        .map(|i| i.published_at.format("%d").to_string())
        .collect();
    assert_eq!(days, vec!["01", "02", "30"]);
}
