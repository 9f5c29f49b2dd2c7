mod common;

use common::{drain, executed, indexed_uris, paths, start, FakeFetcher};
use everywhere_indexer::{IndexEvent, Intent, IntentOutcome, WorkspaceIndex};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn entry_lines(index: &WorkspaceIndex) -> Vec<String> {
    let mut lines: Vec<String> = index
        .get_data()
        .map(|entries| entries.iter().map(|entry| format!("{entry:?}")).collect())
        .unwrap_or_default();
    lines.sort();
    lines
}

fn generation(index: &WorkspaceIndex) -> u64 {
    index.reader().snapshot().generation()
}

#[tokio::test]
async fn rebuild_installs_entries_and_reports_progress() {
    let fetcher = FakeFetcher::with_files(&[("/w/a.ts", &["alpha"]), ("/w/b.ts", &[])]);
    let mut h = start(fetcher, &["/w"]);
    assert!(h.index.get_data().is_none());

    h.index.index("test").await.unwrap();

    assert_eq!(h.index.get_data().unwrap().len(), 3);
    let events = drain(&mut h.events);
    let stats = events
        .iter()
        .find_map(|event| match event {
            IndexEvent::Rebuilt(stats) => Some(stats.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!((stats.files, stats.symbols), (2, 1));
    assert_eq!(stats.reason, "test");

    let percents: Vec<u32> = events
        .iter()
        .filter_map(|event| match event {
            IndexEvent::Progress(update) => Some(update.percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![50, 100]);
}

#[tokio::test]
async fn readers_keep_the_previous_snapshot_while_a_rebuild_runs() {
    let fetcher = FakeFetcher::with_files(&[("/w/a.ts", &["alpha"])]);
    let h = start(fetcher.clone(), &["/w"]);
    h.index.index("initial").await.unwrap();
    let before = h.index.get_data().unwrap();

    let observed = Arc::new(Mutex::new(Vec::new()));
    let mut reader = h.index.reader();
    let sink = Arc::clone(&observed);
    tokio::spawn(async move {
        while reader.changed().await {
            sink.lock().unwrap().push(reader.snapshot().len());
        }
    });

    let gate = fetcher.gate_full_scans();
    fetcher.put("/w/b.ts", &[]);
    let ticket = h.index.request_index("second").unwrap();
    gate.entered.notified().await;
    assert_eq!(h.index.get_data().unwrap(), before);

    gate.release.add_permits(1);
    ticket.completed().await.unwrap();
    tokio::task::yield_now().await;

    assert_eq!(indexed_uris(&h.index), paths(&["/w/a.ts", "/w/b.ts"]));
    assert!(observed.lock().unwrap().iter().all(|len| *len > 0));
}

#[tokio::test]
async fn cancelled_rebuild_leaves_the_previous_snapshot() {
    let fetcher = FakeFetcher::with_files(&[("/w/a.ts", &[])]);
    let mut h = start(fetcher.clone(), &["/w"]);
    h.index.index("initial").await.unwrap();
    let before = h.index.get_data().unwrap();
    assert!(!h.index.cancel_rebuild());

    let gate = fetcher.gate_full_scans();
    fetcher.delete("/w/a.ts");
    let ticket = h.index.request_index("doomed").unwrap();
    gate.entered.notified().await;
    assert!(h.index.cancel_rebuild());

    assert_eq!(
        ticket.outcome().await.unwrap(),
        IntentOutcome::Failed("Indexing cancelled".to_string())
    );
    assert_eq!(h.index.get_data().unwrap(), before);
    assert!(!h.index.cancel_rebuild());
    assert_eq!(h.index.health().consecutive_failures, 1);
    assert!(drain(&mut h.events)
        .iter()
        .any(|event| matches!(event, IndexEvent::Diagnostic { origin, .. } if origin == "doomed")));
}

#[tokio::test]
async fn repeated_update_of_a_file_is_idempotent() {
    let fetcher = FakeFetcher::with_files(&[("/w/a.ts", &["alpha"]), ("/w/b.ts", &["beta"])]);
    let h = start(fetcher.clone(), &["/w"]);
    h.index.index("initial").await.unwrap();

    fetcher.put("/w/a.ts", &["alpha", "gamma"]);
    h.index
        .enqueue(Intent::update("/w/a.ts", "test"))
        .unwrap()
        .completed()
        .await
        .unwrap();
    let once = entry_lines(&h.index);
    h.index
        .enqueue(Intent::update("/w/a.ts", "test"))
        .unwrap()
        .completed()
        .await
        .unwrap();

    assert_eq!(entry_lines(&h.index), once);
    let gammas = h
        .index
        .get_data()
        .unwrap()
        .iter()
        .filter(|entry| entry.label == "gamma")
        .count();
    assert_eq!(gammas, 1);
    assert_eq!(h.index.get_data().unwrap().len(), 5);
}

#[tokio::test]
async fn directory_rename_is_reconciled_from_remove_then_update() {
    let fetcher = FakeFetcher::with_files(&[
        ("/w/src/old/x.ts", &["x"]),
        ("/w/src/old/y.ts", &[]),
        ("/w/keep.ts", &[]),
    ]);
    let h = start(fetcher.clone(), &["/w"]);
    h.index.index("initial").await.unwrap();

    fetcher.rename_dir("/w/src/old", "/w/src/new");
    let remove = h.index.enqueue(Intent::remove("/w/src/old", "fs deleted")).unwrap();
    let update = h.index.enqueue(Intent::update("/w/src/new", "fs created")).unwrap();
    remove.completed().await.unwrap();
    update.completed().await.unwrap();

    assert_eq!(
        indexed_uris(&h.index),
        paths(&["/w/keep.ts", "/w/src/new/x.ts", "/w/src/new/y.ts"])
    );
    assert_eq!(
        fetcher.targeted_fetches(),
        vec![paths(&["/w/src/new/x.ts", "/w/src/new/y.ts"])]
    );
    assert_eq!(fetcher.full_scans(), 1);
}

#[tokio::test]
async fn update_of_an_untracked_directory_merges_what_it_contains() {
    let fetcher = FakeFetcher::with_files(&[("/w/a.ts", &[])]);
    let h = start(fetcher.clone(), &["/w"]);
    h.index.index("initial").await.unwrap();

    fetcher.put("/w/fresh/z.ts", &["zed"]);
    h.index
        .enqueue(Intent::update("/w/fresh", "fs created"))
        .unwrap()
        .completed()
        .await
        .unwrap();

    assert_eq!(indexed_uris(&h.index), paths(&["/w/a.ts", "/w/fresh/z.ts"]));
    assert_eq!(fetcher.targeted_fetches(), vec![paths(&["/w/fresh"])]);
}

#[tokio::test]
async fn remove_of_an_unknown_path_changes_nothing() {
    let fetcher = FakeFetcher::with_files(&[("/w/a.ts", &["alpha"])]);
    let mut h = start(fetcher, &["/w"]);
    h.index.index("initial").await.unwrap();
    let before = generation(&h.index);

    drain(&mut h.events);
    for uri in ["/w/ghost.ts", "/elsewhere"] {
        h.index
            .enqueue(Intent::remove(uri, "fs deleted"))
            .unwrap()
            .completed()
            .await
            .unwrap();
    }

    assert_eq!(generation(&h.index), before);
    assert_eq!(indexed_uris(&h.index), paths(&["/w/a.ts"]));
    assert_eq!(
        executed(&drain(&mut h.events)),
        vec!["remove /w/ghost.ts", "remove /elsewhere"]
    );
}

#[tokio::test]
async fn failed_update_schedules_exactly_one_rebuild_and_merges_nothing() {
    let fetcher = FakeFetcher::with_files(&[("/w/a.ts", &["alpha"]), ("/w/b.ts", &[])]);
    let mut h = start(fetcher.clone(), &["/w"]);
    h.index.index("initial").await.unwrap();
    let before = generation(&h.index);
    drain(&mut h.events);

    fetcher.put("/w/a.ts", &["changed"]);
    fetcher.fail_on("/w/a.ts");
    let ticket = h.index.enqueue(Intent::update("/w/a.ts", "document change")).unwrap();
    assert!(matches!(
        ticket.outcome().await.unwrap(),
        IntentOutcome::Failed(_)
    ));
    // FIFO: this completes only after the recovery rebuild ran.
    h.index
        .enqueue(Intent::remove("/nowhere", "sync"))
        .unwrap()
        .completed()
        .await
        .unwrap();

    let events = drain(&mut h.events);
    assert_eq!(
        executed(&events),
        vec!["update /w/a.ts", "rebuild (on error catch)", "remove /nowhere"]
    );
    let diagnostics = events
        .iter()
        .filter(|event| matches!(event, IndexEvent::Diagnostic { .. }))
        .count();
    assert_eq!(diagnostics, 1);
    // Only the rebuild published a snapshot.
    assert_eq!(generation(&h.index), before + 1);
    assert!(h
        .index
        .get_data()
        .unwrap()
        .iter()
        .any(|entry| entry.label == "changed"));
}

#[tokio::test]
async fn failed_rebuild_keeps_the_last_good_snapshot_without_retrying() {
    let fetcher = FakeFetcher::with_files(&[("/w/a.ts", &["alpha"])]);
    let mut h = start(fetcher.clone(), &["/w"]);
    h.index.index("initial").await.unwrap();
    let before = h.index.get_data().unwrap();
    drain(&mut h.events);

    fetcher.put("/w/b.ts", &[]);
    fetcher.fail_full_scans();
    assert!(h.index.index("broken").await.is_err());
    h.index
        .enqueue(Intent::remove("/nowhere", "sync"))
        .unwrap()
        .completed()
        .await
        .unwrap();

    assert_eq!(h.index.get_data().unwrap(), before);
    let events = drain(&mut h.events);
    assert_eq!(executed(&events), vec!["rebuild (broken)", "remove /nowhere"]);
    let diagnostics: Vec<&str> = events
        .iter()
        .filter_map(|event| match event {
            IndexEvent::Diagnostic { origin, .. } => Some(origin.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(diagnostics, vec!["broken"]);
    assert_eq!(fetcher.full_scans(), 2);

    fetcher.heal();
    h.index.index("retry").await.unwrap();
    assert_eq!(indexed_uris(&h.index), paths(&["/w/a.ts", "/w/b.ts"]));
}

#[tokio::test]
async fn new_file_after_a_directory_delete_is_indexed() {
    let fetcher = FakeFetcher::with_files(&[("/w/old/x.ts", &[]), ("/w/keep.ts", &[])]);
    let mut h = start(fetcher.clone(), &["/w"]);
    h.index.index("initial").await.unwrap();
    drain(&mut h.events);

    fetcher.delete("/w/old/x.ts");
    fetcher.put("/w/fresh.ts", &["fresh"]);
    h.index.enqueue(Intent::remove("/w/old", "fs deleted")).unwrap();
    h.index
        .enqueue(Intent::update("/w/fresh.ts", "fs created"))
        .unwrap()
        .completed()
        .await
        .unwrap();

    assert_eq!(indexed_uris(&h.index), paths(&["/w/fresh.ts", "/w/keep.ts"]));
    assert_eq!(
        fetcher.targeted_fetches(),
        vec![paths(&["/w/fresh.ts/x.ts"]), paths(&["/w/fresh.ts"])]
    );
    assert!(!executed(&drain(&mut h.events))
        .iter()
        .any(|intent| intent.starts_with("rebuild")));
}

#[tokio::test]
async fn overlapping_directory_renames_both_land() {
    let fetcher = FakeFetcher::with_files(&[("/w/a/x.ts", &[]), ("/w/b/y.ts", &[])]);
    let h = start(fetcher.clone(), &["/w"]);
    h.index.index("initial").await.unwrap();

    fetcher.rename_dir("/w/a", "/w/a2");
    fetcher.rename_dir("/w/b", "/w/b2");
    h.index.enqueue(Intent::remove("/w/a", "fs deleted")).unwrap();
    h.index.enqueue(Intent::remove("/w/b", "fs deleted")).unwrap();
    h.index.enqueue(Intent::update("/w/a2", "fs created")).unwrap();
    h.index
        .enqueue(Intent::update("/w/b2", "fs created"))
        .unwrap()
        .completed()
        .await
        .unwrap();

    assert_eq!(indexed_uris(&h.index), paths(&["/w/a2/x.ts", "/w/b2/y.ts"]));
}

#[tokio::test]
async fn failed_rename_update_clears_the_context_and_recovers_by_rebuild() {
    let fetcher = FakeFetcher::with_files(&[("/w/old/x.ts", &[]), ("/w/old/y.ts", &[])]);
    let mut h = start(fetcher.clone(), &["/w"]);
    h.index.index("initial").await.unwrap();
    let before = generation(&h.index);
    drain(&mut h.events);

    fetcher.rename_dir("/w/old", "/w/new");
    fetcher.fail_on("/w/new/y.ts");
    h.index.enqueue(Intent::remove("/w/old", "fs deleted")).unwrap();
    let update = h.index.enqueue(Intent::update("/w/new", "fs created")).unwrap();
    assert!(matches!(
        update.outcome().await.unwrap(),
        IntentOutcome::Failed(_)
    ));
    h.index
        .enqueue(Intent::remove("/nowhere", "sync"))
        .unwrap()
        .completed()
        .await
        .unwrap();

    let rebuilds = executed(&drain(&mut h.events))
        .into_iter()
        .filter(|intent| intent.starts_with("rebuild"))
        .count();
    assert_eq!(rebuilds, 1);
    // Prefix removal and the rebuild; the failed update merged nothing.
    assert_eq!(generation(&h.index), before + 2);
    assert_eq!(indexed_uris(&h.index), paths(&["/w/new/x.ts", "/w/new/y.ts"]));
}

#[tokio::test]
async fn sibling_sharing_the_directory_prefix_is_swept_into_the_rename() {
    let fetcher = FakeFetcher::with_files(&[("/w/old/x.ts", &[]), ("/w/old2/y.ts", &[])]);
    let h = start(fetcher.clone(), &["/w"]);
    h.index.index("initial").await.unwrap();

    fetcher.rename_dir("/w/old", "/w/new");
    h.index.enqueue(Intent::remove("/w/old", "fs deleted")).unwrap();
    h.index
        .enqueue(Intent::update("/w/new", "fs created"))
        .unwrap()
        .completed()
        .await
        .unwrap();

    // `/w/old2/y.ts` matched the raw prefix and was re-rooted to `/w/new2/y.ts`.
    assert_eq!(
        fetcher.targeted_fetches(),
        vec![paths(&["/w/new/x.ts", "/w/new2/y.ts"])]
    );
    assert_eq!(indexed_uris(&h.index), paths(&["/w/new/x.ts"]));

    h.index.index("resync").await.unwrap();
    assert_eq!(indexed_uris(&h.index), paths(&["/w/new/x.ts", "/w/old2/y.ts"]));
}

#[tokio::test(start_paused = true)]
async fn stale_rename_context_is_not_applied() {
    let fetcher = FakeFetcher::with_files(&[("/w/old/x.ts", &[])]);
    let h = start(fetcher.clone(), &["/w"]);
    h.index.index("initial").await.unwrap();

    fetcher.rename_dir("/w/old", "/w/new");
    h.index
        .enqueue(Intent::remove("/w/old", "fs deleted"))
        .unwrap()
        .completed()
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    h.index
        .enqueue(Intent::update("/w/new", "fs created"))
        .unwrap()
        .completed()
        .await
        .unwrap();

    assert_eq!(fetcher.targeted_fetches(), vec![paths(&["/w/new"])]);
    assert_eq!(indexed_uris(&h.index), paths(&["/w/new/x.ts"]));
}

#[tokio::test]
async fn evicted_intents_never_run() {
    let fetcher = FakeFetcher::with_files(&[("/w/a.ts", &[])]);
    let h = start(fetcher.clone(), &["/w"]);
    h.index.index("initial").await.unwrap();

    let gate = fetcher.gate_full_scans();
    let running = h.index.request_index("running").unwrap();
    gate.entered.notified().await;
    let queued = h.index.enqueue(Intent::update("/w/a.ts", "queued")).unwrap();
    h.index.evict_pending();
    gate.release.add_permits(1);

    running.completed().await.unwrap();
    assert_eq!(queued.outcome().await.unwrap(), IntentOutcome::Evicted);
    assert!(fetcher.targeted_fetches().is_empty());
}

#[tokio::test]
async fn shutdown_closes_the_queue() {
    let fetcher = FakeFetcher::with_files(&[("/w/a.ts", &[])]);
    let h = start(fetcher, &["/w"]);
    h.index.shutdown();
    assert!(h.index.is_shut_down());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let result = match h.index.request_index("late") {
        Ok(ticket) => ticket.completed().await,
        Err(err) => Err(err),
    };
    assert!(result.is_err());
}
