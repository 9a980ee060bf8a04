//! Item list engine integration tests
//!
//! Drive a full engine against the in-memory library with a fake downloader.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{article, keys, pdf, Harness, LIBRARY};
use imbib_items::{CollectionScope, FileLocation, ItemsSortType, MemoryLibrary, SortField};
use imbib_livelist::{
    AttachmentBadge, AttachmentFileDeleted, CellAccessory, DownloadBatchData, DownloadKind, EngineConfig,
    ItemsSnapshot, LoadState, MemoryPreferences, Preferences, TomlPreferences,
};
use tempfile::TempDir;
use tokio::time::{sleep, Instant};

fn loaded(snapshot: &ItemsSnapshot, generation: u64, rows: usize) -> bool {
    snapshot.query_generation == generation
        && snapshot.load_state == LoadState::Content
        && snapshot.cells.len() == rows
}

fn badge(snapshot: &ItemsSnapshot, key: &str) -> Option<CellAccessory> {
    snapshot.cell(key).and_then(|c| c.accessory.clone())
}

const READY: Option<CellAccessory> = Some(CellAccessory::Attachment(AttachmentBadge::Ready));
const NOT_DOWNLOADED: Option<CellAccessory> = Some(CellAccessory::Attachment(AttachmentBadge::NotDownloaded));

// === Result set ===

#[tokio::test]
async fn initial_query_follows_sort_and_store_changes() {
    let store = MemoryLibrary::new();
    store
        .insert_all([article("B", "Beta", 1), article("A", "Alpha", 2), article("C", "Gamma", 3)])
        .unwrap();
    let h = Harness::start(store);

    let snapshot = h.wait_for(|s| loaded(s, 1, 3)).await;
    assert_eq!(keys(&snapshot), ["A", "B", "C"]);

    h.store.insert(article("D", "Delta", 4)).unwrap();
    let snapshot = h.wait_for(|s| s.cells.len() == 4).await;
    assert_eq!(keys(&snapshot), ["A", "B", "D", "C"]);

    h.store.delete("B").unwrap();
    let snapshot = h.wait_for(|s| s.cells.len() == 3).await;
    assert_eq!(keys(&snapshot), ["A", "D", "C"]);

    h.store.update("C", |r| r.title = "Aardvark".into()).unwrap();
    let snapshot = h
        .wait_for(|s| s.cells.first().map(|c| c.key.as_str()) == Some("C"))
        .await;
    assert_eq!(keys(&snapshot), ["C", "A", "D"]);
    assert_eq!(snapshot.cell("C").unwrap().title, "Aardvark");
    assert_eq!(snapshot.query_generation, 1);
}

#[tokio::test]
async fn requery_keeps_a_single_subscription() {
    let store = MemoryLibrary::new();
    store
        .insert_all([article("A", "Alpha", 1), pdf("A1", "A", true), article("B", "Beta", 2)])
        .unwrap();
    let h = Harness::start(store);
    h.wait_for(|s| loaded(s, 1, 2)).await;
    assert_eq!(h.store.child_listener_parents(), ["A", "B"]);

    for term in ["alp", "bet", ""] {
        h.engine.filter(Some(term.to_string()), Vec::new()).unwrap();
    }
    let snapshot = h.wait_for(|s| loaded(s, 4, 2)).await;

    assert_eq!(keys(&snapshot), ["A", "B"]);
    assert_eq!(h.engine.generation(), 4);
    assert_eq!(h.store.live_query_count(), 1);
    assert_eq!(h.store.child_listener_parents(), ["A", "B"]);
}

#[tokio::test]
async fn requery_during_reconciliation_discards_old_rows() {
    let store = MemoryLibrary::new();
    store
        .insert_all([
            article("A", "Alpha", 1),
            article("B", "Beta", 2),
            article("C", "Gamma", 3),
            article("D", "Delta", 4),
            article("E", "Epsilon", 5),
            article("F", "Zeta", 6),
        ])
        .unwrap();
    let config = EngineConfig {
        update_threshold: 2,
        ..EngineConfig::default()
    };
    let h = Harness::start_with(store, config, Arc::new(MemoryPreferences::default()), None);

    let fired = Arc::new(AtomicBool::new(false));
    let hook_fired = Arc::clone(&fired);
    h.observer.set_hook(
        &h.engine,
        Box::new(move |engine, snapshot| {
            if snapshot.query_generation == 1
                && snapshot.cells.len() == 2
                && !hook_fired.swap(true, Ordering::SeqCst)
            {
                engine.filter(Some("beta".into()), Vec::new()).unwrap();
            }
        }),
    );

    let snapshot = h.wait_for(|s| loaded(s, 2, 1)).await;
    assert!(fired.load(Ordering::SeqCst));
    assert_eq!(keys(&snapshot), ["B"]);

    let published = h.observer.snapshots();
    let requeried_at = published
        .iter()
        .position(|s| s.query_generation == 1 && s.cells.len() == 2)
        .unwrap();
    assert!(published[requeried_at + 1..].iter().all(|s| s.query_generation == 2));
    assert!(published.iter().all(|s| s.query_generation != 1 || s.cells.len() < 6));

    // the cancelled pass never attached child listeners
    assert_eq!(h.store.child_listener_parents(), ["B"]);
    assert_eq!(h.store.live_query_count(), 1);
}

#[tokio::test]
async fn store_error_publishes_failure_until_requery() {
    let store = MemoryLibrary::new();
    store.insert(article("A", "Alpha", 1)).unwrap();
    let h = Harness::start(store);
    h.wait_for(|s| loaded(s, 1, 1)).await;

    h.store.fail_live_queries("disk gone").unwrap();
    let snapshot = h
        .wait_for(|s| matches!(s.load_state, LoadState::Failed(_)))
        .await;
    assert_eq!(snapshot.query_generation, 1);
    assert_eq!(h.observer.errors.lock().unwrap().len(), 1);
    assert_eq!(h.store.live_query_count(), 0);

    h.engine.filter(None, Vec::new()).unwrap();
    let snapshot = h.wait_for(|s| loaded(s, 2, 1)).await;
    assert_eq!(keys(&snapshot), ["A"]);
    assert_eq!(h.store.live_query_count(), 1);
}

#[tokio::test]
async fn clear_releases_every_listener() {
    let store = MemoryLibrary::new();
    store
        .insert_all([article("A", "Alpha", 1), pdf("A1", "A", true)])
        .unwrap();
    let h = Harness::start(store);
    h.wait_for(|s| loaded(s, 1, 1)).await;
    assert_eq!(h.store.live_query_count(), 1);

    h.engine.clear();
    assert_eq!(h.store.live_query_count(), 0);
    assert!(h.store.child_listener_parents().is_empty());
}

// === Child listeners ===

#[tokio::test]
async fn child_change_rebuilds_only_its_row() {
    let store = MemoryLibrary::new();
    store
        .insert_all([article("P", "Paper", 1), article("Q", "Quasar", 2)])
        .unwrap();
    let h = Harness::start(store);
    let before = h.wait_for(|s| loaded(s, 1, 2)).await;
    assert_eq!(badge(&before, "P"), None);

    h.store.insert(pdf("P1", "P", true)).unwrap();
    let after = h.wait_for(|s| badge(s, "P") == READY).await;

    assert_eq!(after.cell("Q"), before.cell("Q"));
    assert_eq!(after.query_generation, 1);
    assert_eq!(keys(&after), ["P", "Q"]);
    assert_eq!(h.store.live_query_count(), 1);

    h.store.delete("P1").unwrap();
    let after = h.wait_for(|s| badge(s, "P").is_none()).await;
    assert_eq!(after.cell("Q"), before.cell("Q"));
}

// === Search ===

#[tokio::test(start_paused = true)]
async fn search_waits_for_typing_to_settle() {
    let store = MemoryLibrary::new();
    store
        .insert_all([article("A", "abc notes", 1), article("B", "abd notes", 2)])
        .unwrap();
    let h = Harness::start(store);
    h.wait_for(|s| loaded(s, 1, 2)).await;

    let start = Instant::now();
    h.engine.on_search("a");
    sleep(Duration::from_millis(50)).await;
    h.engine.on_search("ab");
    sleep(Duration::from_millis(50)).await;
    h.engine.on_search("abc");

    sleep(Duration::from_millis(140)).await;
    assert_eq!(h.engine.generation(), 1);

    let snapshot = h.wait_for(|s| loaded(s, 2, 1)).await;
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(250) && elapsed < Duration::from_millis(260),
        "settled after {elapsed:?}"
    );
    assert_eq!(keys(&snapshot), ["A"]);

    sleep(Duration::from_millis(500)).await;
    assert_eq!(h.engine.generation(), 2);
}

#[tokio::test(start_paused = true)]
async fn initial_search_term_is_not_requeried() {
    let store = MemoryLibrary::new();
    store
        .insert_all([article("A", "Alpha", 1), article("B", "Beta", 2)])
        .unwrap();
    let h = Harness::start_with(
        store,
        EngineConfig::default(),
        Arc::new(MemoryPreferences::default()),
        Some("alpha"),
    );
    let snapshot = h.wait_for(|s| loaded(s, 1, 1)).await;
    assert_eq!(keys(&snapshot), ["A"]);

    h.engine.on_search("alpha");
    sleep(Duration::from_millis(300)).await;
    assert_eq!(h.engine.generation(), 1);

    h.engine.on_search("");
    sleep(Duration::from_millis(300)).await;
    assert_eq!(h.engine.generation(), 2);
    h.wait_for(|s| loaded(s, 2, 2)).await;
}

#[tokio::test(start_paused = true)]
async fn search_after_filter_reset_requeries() {
    let store = MemoryLibrary::new();
    store
        .insert_all([article("A", "Alpha", 1), article("B", "Beta", 2)])
        .unwrap();
    let h = Harness::start(store);
    h.wait_for(|s| loaded(s, 1, 2)).await;

    h.engine.on_search("alpha");
    h.wait_for(|s| loaded(s, 2, 1)).await;

    h.engine.filter(None, Vec::new()).unwrap();
    h.wait_for(|s| loaded(s, 3, 2)).await;

    h.engine.on_search("alpha");
    let snapshot = h.wait_for(|s| loaded(s, 4, 1)).await;
    assert_eq!(keys(&snapshot), ["A"]);
}

// === Sorting ===

#[tokio::test]
async fn sort_changes_are_persisted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("imbib").join("preferences.toml");
    let preferences = Arc::new(TomlPreferences::open(&path).unwrap());

    let store = MemoryLibrary::new();
    store
        .insert_all([article("A", "Alpha", 3), article("B", "Beta", 1), article("C", "Gamma", 2)])
        .unwrap();
    let h = Harness::start_with(store, EngineConfig::default(), preferences, None);
    let snapshot = h.wait_for(|s| loaded(s, 1, 3)).await;
    assert_eq!(keys(&snapshot), ["A", "B", "C"]);

    h.engine.set_sort_field(SortField::DateAdded).unwrap();
    let snapshot = h.wait_for(|s| loaded(s, 2, 3)).await;
    assert_eq!(keys(&snapshot), ["A", "C", "B"]);
    assert_eq!(
        TomlPreferences::open(&path).unwrap().items_sort_type(),
        ItemsSortType::for_field(SortField::DateAdded)
    );

    h.engine.set_sort_direction(true).unwrap();
    let snapshot = h.wait_for(|s| loaded(s, 3, 3)).await;
    assert_eq!(keys(&snapshot), ["B", "C", "A"]);
    assert!(h.engine.sort_type().ascending);
    assert!(TomlPreferences::open(&path).unwrap().items_sort_type().ascending);
}

// === Downloads ===

#[tokio::test]
async fn download_events_touch_only_their_row() {
    let store = MemoryLibrary::new();
    store
        .insert_all([
            article("P", "Paper", 1),
            pdf("P1", "P", false),
            article("Q", "Quasar", 2),
            pdf("Q1", "Q", false),
        ])
        .unwrap();
    let h = Harness::start(store);
    let before = h.wait_for(|s| loaded(s, 1, 2)).await;
    assert_eq!(badge(&before, "P"), NOT_DOWNLOADED);

    let batch = DownloadBatchData {
        progress: 40,
        remaining: 1,
        total: 1,
    };
    h.downloader.set_batch(Some(batch));
    h.downloader.emit("P1", Some("P"), DownloadKind::Progress(40));
    let snapshot = h
        .wait_for(|s| {
            s.downloading.get("P") == Some(&CellAccessory::Attachment(AttachmentBadge::InProgress(40)))
        })
        .await;
    assert!(!snapshot.downloading.contains_key("Q"));
    assert_eq!(snapshot.batch, Some(batch));
    assert_eq!(snapshot.cell("Q"), before.cell("Q"));

    h.downloader.set_batch(None);
    h.downloader.emit("P1", Some("P"), DownloadKind::Ready);
    let snapshot = h
        .wait_for(|s| s.downloading.is_empty() && badge(s, "P") == READY)
        .await;
    assert_eq!(snapshot.cell("Q"), before.cell("Q"));
    assert_eq!(snapshot.batch, None);

    let attachment = h.engine.attachment("P1", Some("P")).await.unwrap().unwrap();
    assert_eq!(attachment.location(), Some(FileLocation::Local));

    // a second ready changes nothing
    h.downloader.emit("P1", Some("P"), DownloadKind::Ready);
    let revision = snapshot.revision;
    let snapshot = h.wait_for(|s| s.revision > revision).await;
    assert_eq!(badge(&snapshot, "P"), READY);
    assert_eq!(snapshot.cells, h.engine.snapshot().cells);
    let attachment = h.engine.attachment("P1", Some("P")).await.unwrap().unwrap();
    assert_eq!(attachment.location(), Some(FileLocation::Local));
}

#[tokio::test]
async fn failed_download_shows_on_the_row() {
    let store = MemoryLibrary::new();
    store
        .insert_all([article("P", "Paper", 1), pdf("P1", "P", false)])
        .unwrap();
    let h = Harness::start(store);
    h.wait_for(|s| loaded(s, 1, 1)).await;

    h.downloader.emit("P1", Some("P"), DownloadKind::Progress(10));
    h.downloader.emit("P1", Some("P"), DownloadKind::Failed("offline".into()));
    let snapshot = h
        .wait_for(|s| s.downloading.is_empty() && s.revision > 2)
        .await;
    assert_eq!(
        badge(&snapshot, "P"),
        Some(CellAccessory::Attachment(AttachmentBadge::Failed("offline".into())))
    );
}

#[tokio::test]
async fn download_attachments_skips_running_and_missing() {
    let store = MemoryLibrary::new();
    store
        .insert_all([
            article("P", "Paper", 1),
            pdf("P1", "P", false),
            article("Q", "Quasar", 2),
            article("R", "Review", 3),
            pdf("R1", "R", false),
        ])
        .unwrap();
    let h = Harness::start(store);
    h.wait_for(|s| loaded(s, 1, 3)).await;
    h.downloader.set_progress("R1", 20);

    h.engine
        .download_attachments(&["R".to_string(), "Q".to_string(), "P".to_string()])
        .await
        .unwrap();
    assert_eq!(h.downloader.requested(), [("P1".to_string(), Some("P".to_string()))]);
}

#[tokio::test]
async fn remove_downloads_uses_current_collection() {
    let h = Harness::start(MemoryLibrary::new());
    h.wait_for(|s| loaded(s, 1, 0)).await;

    h.engine.remove_downloads(&["P".to_string()]);
    let calls = h.cleanup.calls.lock().unwrap().clone();
    assert_eq!(calls, [(vec!["P".to_string()], CollectionScope::All, LIBRARY)]);
}

#[tokio::test]
async fn opening_waits_for_download_then_shows() {
    let store = MemoryLibrary::new();
    store
        .insert_all([article("P", "Paper", 1), pdf("P1", "P", false)])
        .unwrap();
    let h = Harness::start(store);
    h.wait_for(|s| loaded(s, 1, 1)).await;

    let attachment = h.engine.attachment("P1", Some("P")).await.unwrap().expect("cached");
    h.engine.open(&attachment, Some("P"));
    assert_eq!(h.downloader.requested(), [("P1".to_string(), Some("P".to_string()))]);

    h.downloader.emit("P1", Some("P"), DownloadKind::Progress(10));
    h.downloader.emit("P1", Some("P"), DownloadKind::Ready);
    h.wait_for(|s| badge(s, "P") == READY).await;
    // queued behind the ready event
    h.engine.attachment("P1", Some("P")).await.unwrap();

    let opened = h.observer.opened.lock().unwrap().clone();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].key, "P1");
    assert_eq!(opened[0].location(), Some(FileLocation::Local));
}

#[tokio::test]
async fn opening_a_running_download_cancels_it() {
    let store = MemoryLibrary::new();
    store
        .insert_all([article("P", "Paper", 1), pdf("P1", "P", false)])
        .unwrap();
    let h = Harness::start(store);
    h.wait_for(|s| loaded(s, 1, 1)).await;
    let attachment = h.engine.attachment("P1", Some("P")).await.unwrap().expect("cached");

    h.downloader.set_progress("P1", 30);
    h.engine.open(&attachment, Some("P"));
    assert_eq!(h.downloader.cancelled(), ["P1"]);
    assert!(h.downloader.requested().is_empty());

    h.downloader.emit("P1", Some("P"), DownloadKind::Ready);
    h.wait_for(|s| badge(s, "P") == READY).await;
    h.engine.attachment("P1", Some("P")).await.unwrap();
    assert!(h.observer.opened.lock().unwrap().is_empty());
}

#[tokio::test]
async fn deleted_files_flip_rows_to_remote() {
    let store = MemoryLibrary::new();
    store
        .insert_all([article("P", "Paper", 1), pdf("P1", "P", true)])
        .unwrap();
    let h = Harness::start(store);
    let snapshot = h.wait_for(|s| loaded(s, 1, 1)).await;
    assert_eq!(badge(&snapshot, "P"), READY);

    h.engine.attachment_files_deleted(AttachmentFileDeleted::AllForItems {
        keys: vec!["P".to_string()],
        collection: CollectionScope::Collection("OTHER".into()),
    });
    sleep(Duration::from_millis(200)).await;
    h.engine.attachment("P1", Some("P")).await.unwrap();
    assert_eq!(badge(&h.engine.snapshot(), "P"), READY);

    h.engine.attachment_files_deleted(AttachmentFileDeleted::Individual {
        key: "P1".to_string(),
        parent_key: Some("P".to_string()),
    });
    h.wait_for(|s| badge(s, "P") == NOT_DOWNLOADED).await;
    let attachment = h.engine.attachment("P1", Some("P")).await.unwrap().unwrap();
    assert_eq!(attachment.location(), Some(FileLocation::Remote));
}
