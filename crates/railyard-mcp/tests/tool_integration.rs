//! End-to-end overlay/search scenarios.
//!
//! These exercise the real Postgres + pgvector store and are therefore
//! `#[ignore]`d by default — a live Postgres is an external dependency this
//! test suite does not assume (`SPEC_FULL.md` §8). Run with:
//!
//! ```text
//! COCOINDEX_DATABASE_URL=postgres://... cargo test -- --ignored
//! ```
//!
//! The merge-logic itself (overlay-wins, dispatcher dedup) is covered
//! without a database in `railyard_core::search`'s unit tests; these tests
//! cover the six scenarios end to end through the real store.

use std::process::Command;

use deadpool_postgres::{Config as PoolConfig, ManagerConfig, RecyclingMethod, Runtime};
use tempfile::TempDir;

use railyard_core::embedder::{Embedder, EmbeddingConfig};
use railyard_core::indexer::overlay::BuildOutcome;
use railyard_core::indexer::{MainIndexer, OverlayIndexer};
use railyard_core::fingerprint::FingerprintStore;
use railyard_core::types::{EngineId, Track};
use railyard_core::{RailyardConfig, SearchEngine, Store};

fn init_repo(dir: &std::path::Path) {
    let run = |args: &[&str]| {
        let status = Command::new("git").args(args).current_dir(dir).status().expect("git available");
        assert!(status.success(), "git {args:?} failed");
    };
    run(&["init", "-q", "-b", "main"]);
    run(&["config", "user.email", "test@example.com"]);
    run(&["config", "user.name", "test"]);
    std::fs::write(dir.join("handler.go"), "package main\nfunc Handler() {}\n").unwrap();
    std::fs::write(dir.join("util.go"), "package main\nfunc Util() {}\n").unwrap();
    run(&["add", "."]);
    run(&["commit", "-q", "-m", "init"]);
}

async fn test_store() -> Store {
    let database_url =
        std::env::var("COCOINDEX_DATABASE_URL").expect("COCOINDEX_DATABASE_URL must be set for ignored DB tests");
    let mut cfg = PoolConfig::new();
    cfg.url = Some(database_url);
    cfg.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });
    let pool = cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls).expect("create pool");
    Store::new(pool)
}

fn test_embedder() -> Embedder {
    std::env::set_var("RAILYARD_SKIP_MODEL_DOWNLOAD", "1");
    Embedder::new(&EmbeddingConfig::default()).expect("construct embedder")
}

#[tokio::test]
#[ignore]
async fn overlay_build_with_mixed_changes_then_search_merges() {
    let store = test_store().await;
    let embedder = test_embedder();
    let dir = TempDir::new().expect("tempdir");
    init_repo(dir.path());

    let track = Track { name: "backend".into(), language: None, file_patterns: vec!["*.go".into()] };
    let config = RailyardConfig::default();
    let fingerprints = FingerprintStore::open_in_memory().expect("fingerprints");

    let main_indexer = MainIndexer::new(&store, &embedder, &fingerprints);
    main_indexer.build_track(dir.path(), &track, &config, true).await.expect("main build");

    let status = Command::new("git")
        .args(["checkout", "-q", "-b", "feature/x"])
        .current_dir(dir.path())
        .status()
        .unwrap();
    assert!(status.success());
    std::fs::write(dir.path().join("handler.go"), "package main\nfunc Handler() { /* changed */ }\n").unwrap();
    std::fs::remove_file(dir.path().join("util.go")).unwrap();
    Command::new("git").args(["add", "."]).current_dir(dir.path()).status().unwrap();
    Command::new("git").args(["commit", "-q", "-m", "work"]).current_dir(dir.path()).status().unwrap();

    let engine_id = EngineId::parse("feature-x").unwrap();
    let overlay_indexer = OverlayIndexer::new(&store, &embedder);
    let outcome = overlay_indexer.build(dir.path(), &engine_id, &track, &config).await.expect("overlay build");
    match outcome {
        BuildOutcome::Built { files_indexed, deleted_files, .. } => {
            assert_eq!(files_indexed, 1);
            assert_eq!(deleted_files, vec!["util.go".to_string()]);
        }
        BuildOutcome::NoChanges => panic!("expected changes to be detected"),
    }

    let main_table = config.main_table_name(&track.name);
    let overlay_table = engine_id.overlay_table_name(&config.overlay_table_prefix);
    let search = SearchEngine::new(&store, &embedder);
    let results = search
        .search_engine(&main_table, &overlay_table, engine_id.as_str(), "Handler", 10, 0.0)
        .await
        .expect("merged search");

    assert!(!results.iter().any(|r| r.filename == "util.go"), "deleted file must not appear in merged results");

    overlay_indexer.cleanup(&engine_id, &config).await.expect("cleanup");
}

#[tokio::test]
#[ignore]
async fn overlay_build_deletion_only_track() {
    let store = test_store().await;
    let embedder = test_embedder();
    let dir = TempDir::new().expect("tempdir");
    init_repo(dir.path());

    let track = Track { name: "backend-del".into(), language: None, file_patterns: vec!["*.go".into()] };
    let config = RailyardConfig::default();

    Command::new("git").args(["checkout", "-q", "-b", "feature/del"]).current_dir(dir.path()).status().unwrap();
    std::fs::remove_file(dir.path().join("util.go")).unwrap();
    Command::new("git").args(["add", "."]).current_dir(dir.path()).status().unwrap();
    Command::new("git").args(["commit", "-q", "-m", "delete"]).current_dir(dir.path()).status().unwrap();

    let engine_id = EngineId::parse("feature-del").unwrap();
    let overlay_indexer = OverlayIndexer::new(&store, &embedder);
    let outcome = overlay_indexer.build(dir.path(), &engine_id, &track, &config).await.expect("overlay build");
    match outcome {
        BuildOutcome::Built { files_indexed, chunks_indexed, deleted_files } => {
            assert_eq!(files_indexed, 0);
            assert_eq!(chunks_indexed, 0);
            assert_eq!(deleted_files, vec!["util.go".to_string()]);
        }
        BuildOutcome::NoChanges => panic!("a deletion is a change"),
    }
    overlay_indexer.cleanup(&engine_id, &config).await.expect("cleanup");
}

#[tokio::test]
#[ignore]
async fn overlay_build_with_no_divergence_is_a_no_op() {
    let store = test_store().await;
    let embedder = test_embedder();
    let dir = TempDir::new().expect("tempdir");
    init_repo(dir.path());

    let track = Track { name: "backend-noop".into(), language: None, file_patterns: vec!["*.go".into()] };
    let config = RailyardConfig::default();
    let engine_id = EngineId::parse("feature-noop").unwrap();

    let overlay_indexer = OverlayIndexer::new(&store, &embedder);
    let outcome = overlay_indexer.build(dir.path(), &engine_id, &track, &config).await.expect("overlay build");
    assert!(matches!(outcome, BuildOutcome::NoChanges));
}

#[tokio::test]
#[ignore]
async fn overlay_rebuild_is_idempotent() {
    let store = test_store().await;
    let embedder = test_embedder();
    let dir = TempDir::new().expect("tempdir");
    init_repo(dir.path());

    let track = Track { name: "backend-idem".into(), language: None, file_patterns: vec!["*.go".into()] };
    let config = RailyardConfig::default();
    let engine_id = EngineId::parse("feature-idem").unwrap();

    Command::new("git").args(["checkout", "-q", "-b", "feature/idem"]).current_dir(dir.path()).status().unwrap();
    std::fs::write(dir.path().join("handler.go"), "package main\nfunc Handler() { /* v2 */ }\n").unwrap();
    Command::new("git").args(["add", "."]).current_dir(dir.path()).status().unwrap();
    Command::new("git").args(["commit", "-q", "-m", "work"]).current_dir(dir.path()).status().unwrap();

    let overlay_indexer = OverlayIndexer::new(&store, &embedder);
    let first = overlay_indexer.build(dir.path(), &engine_id, &track, &config).await.expect("first build");
    let second = overlay_indexer.build(dir.path(), &engine_id, &track, &config).await.expect("second build");

    match (first, second) {
        (BuildOutcome::Built { chunks_indexed: c1, .. }, BuildOutcome::Built { chunks_indexed: c2, .. }) => {
            assert_eq!(c1, c2, "rebuilding from the same diff must produce the same row count");
        }
        _ => panic!("expected both builds to detect the same change"),
    }
    overlay_indexer.cleanup(&engine_id, &config).await.expect("cleanup");
}

#[tokio::test]
#[ignore]
async fn dispatcher_search_dedupes_across_tracks() {
    let store = test_store().await;
    let embedder = test_embedder();
    let dir = TempDir::new().expect("tempdir");
    init_repo(dir.path());

    let config = RailyardConfig::default();
    let fingerprints = FingerprintStore::open_in_memory().expect("fingerprints");
    let track = Track { name: "dispatcher-test".into(), language: None, file_patterns: vec!["*.go".into()] };

    let main_indexer = MainIndexer::new(&store, &embedder, &fingerprints);
    main_indexer.build_track(dir.path(), &track, &config, true).await.expect("main build");

    let table = config.main_table_name(&track.name);
    let search = SearchEngine::new(&store, &embedder);
    let results = search
        .search_dispatcher(&[table.clone(), "main_nonexistent_track_embeddings".to_string()], "Handler", 10, 0.0)
        .await
        .expect("dispatcher search should swallow the missing table");
    assert!(!results.is_empty());
}
