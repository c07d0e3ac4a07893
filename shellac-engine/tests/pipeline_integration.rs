//! End-to-end pipeline tests over real generated audio

mod helpers;

use helpers::audio_generator::{tagged_wav, write_sine_wav};
use helpers::{count_files, file_names, test_config};
use shellac_common::events::EventBus;
use shellac_engine::db;
use shellac_engine::db::files::FileStatus;
use shellac_engine::services::workflow_orchestrator::RunOutcome;
use shellac_engine::CleanupOrchestrator;
use tokio_util::sync::CancellationToken;

async fn run_pipeline(config: shellac_common::config::CleanupConfig) -> (RunOutcome, sqlx::SqlitePool) {
    let pool = db::init_store(&config.store_path()).await.unwrap();
    let mut orchestrator = CleanupOrchestrator::new(
        pool.clone(),
        config,
        EventBus::new(64),
        CancellationToken::new(),
    )
    .unwrap();
    let outcome = orchestrator.run().await.unwrap();
    (outcome, pool)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicates_grouped_primary_organized_rest_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    // Identical bytes: tag first, then copy
    let a = root.join("in").join("a.wav");
    tagged_wav(&a, 2.0, 440.0, 0.5, "Artist", "Track One", 2011, "rock");
    let b = root.join("in").join("b.wav");
    std::fs::copy(&a, &b).unwrap();

    let mut config = test_config(root);
    // Exercise the full path including the grade stamp on the copy
    config.write_quality_tags = true;
    let (outcome, pool) = run_pipeline(config.clone()).await;
    assert_eq!(outcome, RunOutcome::Clean);

    // Primary placed under its category/decade
    let organized_dir = root.join("organized").join("Rock").join("2010s");
    let organized = file_names(&organized_dir);
    assert_eq!(organized.len(), 1, "organized tree: {:?}", organized);
    assert!(organized[0].starts_with("2011 - Artist - Track One [QS"));
    assert!(organized[0].ends_with(".wav"));

    // Non-primary rejected with its rank
    let rejected = file_names(&root.join("rejected").join("duplicates"));
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].contains("_duplicate_2"), "got {:?}", rejected);

    // Sources untouched in copy mode
    assert!(a.exists());
    assert!(b.exists());

    // One audit entry, pointing at the primary
    assert_eq!(db::rejections::count(&pool).await.unwrap(), 1);
    let entries = db::rejections::load_all(&pool).await.unwrap();
    assert!(entries[0].chosen_file_id.is_some());
    assert!(entries[0].reason_text.contains("chosen file"));

    // Manifest sidecars exported
    assert!(root.join("rejected").join("rejected_manifest.json").exists());
    assert!(root.join("rejected").join("rejection_analysis.csv").exists());

    // Organized row points at its destination now
    let organized_path = organized_dir.join(&organized[0]);
    let row = db::files::load_by_path(&pool, &organized_path.to_string_lossy())
        .await
        .unwrap()
        .expect("organized row keyed by destination path");
    assert_eq!(row.status, FileStatus::Organized);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_run_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    let a = root.join("in").join("a.wav");
    tagged_wav(&a, 2.0, 440.0, 0.5, "Artist", "Track One", 2011, "rock");
    let b = root.join("in").join("b.wav");
    std::fs::copy(&a, &b).unwrap();

    let config = test_config(root);
    run_pipeline(config.clone()).await;

    let organized_before = file_names(&root.join("organized"));
    let rejected_before = file_names(&root.join("rejected"));

    // Same tree, same store: nothing new to do
    let (outcome, pool) = run_pipeline(config).await;
    assert!(matches!(
        outcome,
        RunOutcome::Clean | RunOutcome::NoWork
    ));

    assert_eq!(file_names(&root.join("organized")), organized_before);
    assert_eq!(file_names(&root.join("rejected")), rejected_before);
    assert_eq!(db::rejections::count(&pool).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_protected_root_completely_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    tagged_wav(
        &root.join("in").join("ok.wav"),
        2.0,
        440.0,
        0.5,
        "Artist",
        "Keep",
        1999,
        "techno",
    );
    let vault = root.join("in").join("vault");
    tagged_wav(
        &vault.join("precious.wav"),
        2.0,
        440.0,
        0.5,
        "Artist",
        "Precious",
        1999,
        "techno",
    );

    let mut config = test_config(root);
    config.protected_roots = vec![vault.clone()];
    let (_, pool) = run_pipeline(config).await;

    // Never discovered, never referenced by any operation
    let row = db::files::load_by_path(&pool, &vault.join("precious.wav").to_string_lossy())
        .await
        .unwrap();
    assert!(row.is_none());

    let op_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM file_operations WHERE source_path LIKE '%precious%'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(op_count, 0);

    assert!(vault.join("precious.wav").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_corrupted_file_quarantined_before_grouping() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    tagged_wav(
        &root.join("in").join("fine.wav"),
        2.0,
        440.0,
        0.5,
        "Artist",
        "Fine",
        2005,
        "house",
    );
    // Valid size, garbage content: fails the probe
    let junk = root.join("in").join("broken.wav");
    std::fs::create_dir_all(junk.parent().unwrap()).unwrap();
    std::fs::write(&junk, vec![0x5Au8; 4096]).unwrap();

    let config = test_config(root);
    let (_, pool) = run_pipeline(config).await;

    let quarantined = file_names(&root.join("rejected").join("corrupted"));
    assert_eq!(quarantined, vec!["broken.wav".to_string()]);

    let entries = db::rejections::load_all(&pool).await.unwrap();
    let corrupted: Vec<_> = entries
        .iter()
        .filter(|e| e.category == db::rejections::RejectionCategory::Corrupted)
        .collect();
    assert_eq!(corrupted.len(), 1);

    // Never a member of any duplicate group
    let member_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM duplicate_members dm
         JOIN files f ON f.id = dm.file_id
         WHERE f.absolute_path LIKE '%broken%'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(member_count, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_genre_routes_to_review_not_unknown_folder() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    // Parseable filename but no tags at all: no year, no genre
    write_sine_wav(
        &root.join("in").join("Somebody - Something.wav"),
        2.0,
        330.0,
        0.5,
        22050,
    );

    let config = test_config(root);
    let (_, pool) = run_pipeline(config).await;

    // Nothing organized, no "Unknown" folder anywhere
    assert_eq!(count_files(&root.join("organized")), 0);

    let queue = db::targets::review_queue(&pool).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert!(queue[0].1.contains("missing"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_same_metadata_below_threshold_gets_dup_rename() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    // Same tags, very different audio (amplitudes), so no acoustic group
    tagged_wav(
        &root.join("in").join("x.wav"),
        2.0,
        440.0,
        0.6,
        "Artist",
        "Same Name",
        2015,
        "house",
    );
    tagged_wav(
        &root.join("in").join("y.wav"),
        2.0,
        440.0,
        0.15,
        "Artist",
        "Same Name",
        2015,
        "house",
    );

    let config = test_config(root);
    let (_, pool) = run_pipeline(config).await;

    let group_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM duplicate_groups")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(group_count, 0, "similarity below threshold must not group");

    let organized = file_names(&root.join("organized").join("House").join("2010s"));
    assert_eq!(organized.len(), 2, "both organized: {:?}", organized);
    assert!(
        organized.iter().any(|n| n.contains("_dup2")),
        "second file takes the _dup2 name: {:?}",
        organized
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dry_run_plans_but_performs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    let a = root.join("in").join("a.wav");
    tagged_wav(&a, 2.0, 440.0, 0.5, "Artist", "Track One", 2011, "rock");

    let mut config = test_config(root);
    config.dry_run = true;
    let (_, pool) = run_pipeline(config).await;

    assert_eq!(count_files(&root.join("organized")), 0);
    assert_eq!(count_files(&root.join("rejected")), 0);

    // The plan is inspectable: staged rows stayed pending
    let pending: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM file_operations WHERE status = 'pending'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(pending > 0, "dry run must leave pending operations");
}
