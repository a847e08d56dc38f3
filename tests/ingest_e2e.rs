// tests/ingest_e2e.rs
mod common;

use std::sync::Arc;

use common::{fixture, pipeline, rss, source, FixtureTransport};
use cybersec_feeds::ingest::fingerprint;
use cybersec_feeds::ingest::PhaseBoard;
use cybersec_feeds::storage::{ItemFilter, ItemStore, MemoryStore, Page};
use tokio_util::sync::CancellationToken;

const FEED: &str = "https://feeds.test/thn";

#[tokio::test]
async fn repeat_link_from_prior_cycle_is_refreshed_not_duplicated() {
    let transport = FixtureTransport::new();
    let store = MemoryStore::new();
    let p = pipeline(transport.clone(), Arc::new(store.clone()));
    let src = source("thn", FEED, 60);
    let board = PhaseBoard::new(["thn"]);
    let cancel = CancellationToken::new();

    // cycle 1: a single entry
    transport.ok(FEED, rss(&[("Alpha", "https://thn.test/a")]));
    let first = p.run_cycle(&src, &board, &cancel).await;
    assert!(first.is_ok(), "{:?}", first.error);
    assert_eq!((first.items_seen, first.items_new), (1, 1));

    // cycle 2: same link (retitled) plus two new ones
    transport.ok(
        FEED,
        rss(&[
            ("Alpha, updated headline", "https://thn.test/a"),
            ("Bravo", "https://thn.test/b"),
            ("Charlie", "https://thn.test/c"),
        ]),
    );
    let second = p.run_cycle(&src, &board, &cancel).await;
    assert!(second.is_ok());
    assert_eq!(second.items_seen, 3);
    assert_eq!(second.items_new, 2);
    assert_eq!(second.items_refreshed, 1);
    assert_eq!(second.item_failures, 0);

    assert_eq!(store.count_items(&ItemFilter::default()).await.unwrap(), 3);
    let alpha = fingerprint::derive("thn", Some("https://thn.test/a"), "", None);
    let stored = store.get_item(&alpha).await.unwrap().unwrap();
    // the stored record keeps its original title
    assert_eq!(stored.item.title, "Alpha");
    assert!(stored.last_seen_at >= stored.first_seen_at);
}

#[tokio::test]
async fn ingesting_the_same_document_twice_is_idempotent() {
    let transport = FixtureTransport::new();
    let store = MemoryStore::new();
    let p = pipeline(transport.clone(), Arc::new(store.clone()));
    let src = source("thn", FEED, 60);
    let board = PhaseBoard::new(["thn"]);
    let cancel = CancellationToken::new();
    transport.ok(FEED, fixture("thn_rss.xml"));

    let first = p.run_cycle(&src, &board, &cancel).await;
    let before = store
        .list_items(&ItemFilter::default(), Page::new(0, 100))
        .await
        .unwrap();

    let second = p.run_cycle(&src, &board, &cancel).await;
    let after = store
        .list_items(&ItemFilter::default(), Page::new(0, 100))
        .await
        .unwrap();

    assert_eq!(first.items_new, 3);
    assert_eq!(second.items_new, 0);
    assert_eq!(second.items_refreshed, 3);
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(after.iter()) {
        assert_eq!(b.item, a.item);
        assert_eq!(b.first_seen_at, a.first_seen_at);
    }
}

#[tokio::test]
async fn same_link_in_two_sources_is_two_items() {
    let transport = FixtureTransport::new();
    let store = MemoryStore::new();
    let p = pipeline(transport.clone(), Arc::new(store.clone()));
    let board = PhaseBoard::new(["a", "b"]);
    let cancel = CancellationToken::new();
    let doc = rss(&[("Shared story", "https://wire.test/story")]);
    transport.ok("https://a.test/rss", doc.clone());
    transport.ok("https://b.test/rss", doc);

    let a = p
        .run_cycle(&source("a", "https://a.test/rss", 60), &board, &cancel)
        .await;
    let b = p
        .run_cycle(&source("b", "https://b.test/rss", 60), &board, &cancel)
        .await;
    assert_eq!((a.items_new, b.items_new), (1, 1));
    assert_eq!(store.count_items(&ItemFilter::source("a")).await.unwrap(), 1);
    assert_eq!(store.count_items(&ItemFilter::source("b")).await.unwrap(), 1);
}

#[tokio::test]
async fn realistic_feed_is_normalized_end_to_end() {
    let transport = FixtureTransport::new();
    let store = MemoryStore::new();
    let p = pipeline(transport.clone(), Arc::new(store.clone()));
    let board = PhaseBoard::new(["thn"]);
    transport.ok(FEED, fixture("thn_rss.xml"));

    let out = p
        .run_cycle(&source("thn", FEED, 60), &board, &CancellationToken::new())
        .await;
    assert_eq!(out.items_new, 3);

    let items = store
        .list_items(&ItemFilter::source("thn"), Page::default())
        .await
        .unwrap();
    let titles: Vec<_> = items.iter().map(|s| s.item.title.as_str()).collect();
    // newest first on the read path
    assert_eq!(
        titles,
        vec![
            "Weekly Recap: R&D Labs Breached, Ransomware & More",
            "Critical OpenSSH Flaw Exposes Linux Servers to Remote Code Execution",
            "Older Advisory Roundup",
        ]
    );

    let recap = &items[0].item;
    assert_eq!(
        recap.link.as_deref(),
        Some("https://thehackernews.com/2024/07/weekly-recap.html")
    );
    assert_eq!(recap.summary, "This week's recap covers ransomware.");
    assert_eq!(recap.assets.len(), 1);

    let openssh = &items[1].item;
    assert_eq!(openssh.guid.as_deref(), Some("thn-openssh-2024"));
    assert!(openssh.summary.contains("race condition in sshd's default"));

    let older = &items[2].item;
    assert_eq!(
        older.link.as_deref(),
        Some("https://feeds.test/2024/06/advisory-roundup.html")
    );
    assert_eq!(older.summary, "Roundup of vendor advisories.");
}
