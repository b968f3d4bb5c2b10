use snapkeeper_core::category::FileCategory;
use snapkeeper_core::config::{CpuProfile, HashLevel};
use snapkeeper_core::state::PipelineState;
use snapkeeper_core::storage::models::{Candidate, RootType};
use snapkeeper_core::storage::Store;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::tempdir;

fn make_candidate(root_id: i64, rel: &str, size: i64, modified: Option<&str>) -> Candidate {
    let name = rel.rsplit('/').next().unwrap_or(rel).to_string();
    let ext = name.rsplit('.').next().unwrap_or("").to_lowercase();
    Candidate {
        scan_root_id: root_id,
        relative_path: rel.to_string(),
        file_name: name,
        category: FileCategory::from_extension(&ext),
        extension: ext,
        size_bytes: size,
        modified_utc: modified.map(|s| s.to_string()),
    }
}

/// Seed a root with instances, hashes, a trivial plan and pending copy jobs
/// so job-level tests have something to claim.
fn seed_pending_jobs(store: &Store, job_count: usize) -> i64 {
    let root_id = store.add_root("/src", None, RootType::Fixed).unwrap();
    let candidates: Vec<Candidate> = (0..job_count)
        .map(|i| {
            make_candidate(
                root_id,
                &format!("f{}.jpg", i),
                100 + i as i64,
                Some("2022-06-01T10:00:00+00:00"),
            )
        })
        .collect();
    store.batch_insert_candidates(&candidates).unwrap();

    let items = store.hash_work_items().unwrap();
    for item in &items {
        let hex = format!("{:064x}", item.instance_id);
        let hash_id = store
            .get_or_create_hash("SHA256", hex.as_bytes(), &hex, item.size_bytes, None)
            .unwrap();
        store.set_hash(item.instance_id, hash_id).unwrap();
    }
    snapkeeper_core::planner::build_plan(store).unwrap();
    let (created, _bytes) = store.create_jobs_from_plan("/dest").unwrap();
    assert_eq!(created, job_count);
    root_id
}

#[test]
fn test_open_is_idempotent() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("Project.db");

    let store = Store::open(&db_path).unwrap();
    store
        .init_project("p", HashLevel::Sha256, CpuProfile::Balanced, &[FileCategory::Image])
        .unwrap();
    drop(store);

    // Second open applies the schema again without complaint and keeps data.
    let store = Store::open(&db_path).unwrap();
    let settings = store.load_settings().unwrap().unwrap();
    assert_eq!(settings.project_name, "p");
    assert_eq!(settings.hash_level, "SHA256");
}

#[test]
fn test_open_unreachable_path_fails() {
    let err = Store::open(std::path::Path::new("/nonexistent-dir-xyz/sub/Project.db")).unwrap_err();
    assert!(matches!(err, snapkeeper_core::Error::StorageOpen { .. }));
}

#[test]
fn test_hash_level_is_immutable_after_creation() {
    let store = Store::open_in_memory().unwrap();
    store
        .init_project("p", HashLevel::Sha256, CpuProfile::Eco, &[FileCategory::Image])
        .unwrap();
    // A second init (reopening flow) must not change the algorithm.
    store
        .init_project("p2", HashLevel::Sha1, CpuProfile::Max, &[FileCategory::Movie])
        .unwrap();
    let settings = store.load_settings().unwrap().unwrap();
    assert_eq!(settings.project_name, "p");
    assert_eq!(settings.hash_level, "SHA256");
}

#[test]
fn test_state_round_trip() {
    let store = Store::open_in_memory().unwrap();
    store
        .init_project("p", HashLevel::Sha256, CpuProfile::Eco, &[])
        .unwrap();
    store.save_state(PipelineState::ReadyToCopy).unwrap();
    let settings = store.load_settings().unwrap().unwrap();
    assert_eq!(settings.current_state, "ReadyToCopy");
}

#[test]
fn test_batch_insert_ignores_duplicate_relative_paths() {
    let store = Store::open_in_memory().unwrap();
    let root_id = store.add_root("/src", None, RootType::Fixed).unwrap();

    let first = vec![
        make_candidate(root_id, "a/x.jpg", 10, None),
        make_candidate(root_id, "a/y.jpg", 20, None),
    ];
    assert_eq!(store.batch_insert_candidates(&first).unwrap(), 2);

    // Rescan emits the same paths again; inserts are silently ignored.
    let second = vec![
        make_candidate(root_id, "a/x.jpg", 10, None),
        make_candidate(root_id, "a/z.jpg", 30, None),
    ];
    assert_eq!(store.batch_insert_candidates(&second).unwrap(), 1);

    let items = store.hash_work_items().unwrap();
    assert_eq!(items.len(), 3);
}

#[test]
fn test_hash_work_items_ordered_largest_first() {
    let store = Store::open_in_memory().unwrap();
    let root_id = store.add_root("/src", None, RootType::Fixed).unwrap();
    store
        .batch_insert_candidates(&[
            make_candidate(root_id, "small.jpg", 5, None),
            make_candidate(root_id, "large.jpg", 5000, None),
            make_candidate(root_id, "mid.jpg", 500, None),
        ])
        .unwrap();
    let sizes: Vec<i64> = store
        .hash_work_items()
        .unwrap()
        .iter()
        .map(|i| i.size_bytes)
        .collect();
    assert_eq!(sizes, vec![5000, 500, 5]);
}

#[test]
fn test_get_or_create_hash_coalesces() {
    let store = Store::open_in_memory().unwrap();
    let a = store
        .get_or_create_hash("SHA256", b"digest-1", "aa", 10, None)
        .unwrap();
    let b = store
        .get_or_create_hash("SHA256", b"digest-1", "aa", 10, None)
        .unwrap();
    let c = store
        .get_or_create_hash("SHA256", b"digest-2", "bb", 10, Some("chunk_mb=4"))
        .unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(store.hash_count().unwrap(), 2);
}

#[test]
fn test_claim_pending_jobs_marks_in_progress_and_counts_attempt() {
    let store = Store::open_in_memory().unwrap();
    seed_pending_jobs(&store, 3);

    let batch = store.claim_pending_jobs(2).unwrap();
    assert_eq!(batch.len(), 2);
    for job in &batch {
        assert_eq!(job.attempt_count, 1);
    }
    assert_eq!(store.pending_job_count().unwrap(), 1);

    // Largest first within the batch.
    assert!(batch[0].size_bytes >= batch[1].size_bytes);
}

#[test]
fn test_concurrent_claims_are_disjoint() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    seed_pending_jobs(&store, 40);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        handles.push(std::thread::spawn(move || {
            let mut seen = Vec::new();
            loop {
                let batch = store.claim_pending_jobs(5).unwrap();
                if batch.is_empty() {
                    break;
                }
                seen.extend(batch.into_iter().map(|j| j.job_id));
            }
            seen
        }));
    }

    let mut all: Vec<i64> = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }
    let unique: HashSet<i64> = all.iter().copied().collect();
    assert_eq!(all.len(), 40, "every job claimed exactly once");
    assert_eq!(unique.len(), 40, "no job observed by two claimers");
}

#[test]
fn test_reset_in_progress_refunds_one_attempt() {
    let store = Store::open_in_memory().unwrap();
    seed_pending_jobs(&store, 2);

    let batch = store.claim_pending_jobs(10).unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(store.pending_job_count().unwrap(), 0);

    let reset = store.reset_in_progress_to_pending().unwrap();
    assert_eq!(reset, 2);
    assert_eq!(store.pending_job_count().unwrap(), 2);

    // Re-claiming counts the attempt again from the refunded base.
    let batch = store.claim_pending_jobs(10).unwrap();
    for job in batch {
        assert_eq!(job.attempt_count, 1);
    }
}

#[test]
fn test_recover_on_open_resets_in_progress_jobs() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("Project.db");

    {
        let store = Store::open(&db_path).unwrap();
        seed_pending_jobs(&store, 2);
        let _claimed = store.claim_pending_jobs(10).unwrap();
        // Simulated crash: store dropped with jobs InProgress.
    }

    let store = Store::open(&db_path).unwrap();
    assert_eq!(store.pending_job_count().unwrap(), 2);
    let batch = store.claim_pending_jobs(10).unwrap();
    for job in &batch {
        // Refunded to 0 by recovery, incremented to 1 by this claim.
        assert_eq!(job.attempt_count, 1);
    }
}

#[test]
fn test_clear_root_reattaches_hashes_for_unchanged_files() {
    let store = Store::open_in_memory().unwrap();
    let root_id = store.add_root("/src", None, RootType::Fixed).unwrap();
    let modified = Some("2021-03-05T00:00:00+00:00");
    store
        .batch_insert_candidates(&[
            make_candidate(root_id, "keep.jpg", 100, modified),
            make_candidate(root_id, "gone.jpg", 200, modified),
        ])
        .unwrap();

    for item in store.hash_work_items().unwrap() {
        let hex = format!("{:064x}", item.size_bytes);
        let id = store
            .get_or_create_hash("SHA256", hex.as_bytes(), &hex, item.size_bytes, None)
            .unwrap();
        store.set_hash(item.instance_id, id).unwrap();
    }
    assert_eq!(store.hash_count().unwrap(), 2);

    // Rescan: one file unchanged, one vanished, one grew.
    store.clear_root(root_id).unwrap();
    store
        .batch_insert_candidates(&[
            make_candidate(root_id, "keep.jpg", 100, modified),
            make_candidate(root_id, "new.jpg", 300, modified),
        ])
        .unwrap();
    let reattached = store.reattach_hashes(root_id).unwrap();
    assert_eq!(reattached, 1);
    store.prune_orphan_hashes().unwrap();

    // gone.jpg's hash row lost its last reference and was pruned.
    assert_eq!(store.hash_count().unwrap(), 1);
    // Only new.jpg still needs hashing.
    let pending = store.hash_work_items().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].file_name, "new.jpg");
}

#[test]
fn test_failed_jobs_report() {
    let store = Store::open_in_memory().unwrap();
    seed_pending_jobs(&store, 2);
    let batch = store.claim_pending_jobs(10).unwrap();

    store
        .mark_job_error(batch[0].job_id, "disk on fire")
        .unwrap();
    store
        .mark_job_copied(batch[1].job_id, &batch[1].destination_full_path, true)
        .unwrap();

    let failed = store.failed_jobs().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].job_id, batch[0].job_id);
    assert_eq!(failed[0].last_error.as_deref(), Some("disk on fire"));
}

#[test]
fn test_mark_job_copied_stores_actual_destination() {
    let store = Store::open_in_memory().unwrap();
    seed_pending_jobs(&store, 1);
    let batch = store.claim_pending_jobs(1).unwrap();
    let job = &batch[0];

    let renamed = format!("{}_deadbeef.jpg", job.destination_full_path.trim_end_matches(".jpg"));
    store.mark_job_copied(job.job_id, &renamed, false).unwrap();

    let verify_set = store.jobs_to_verify().unwrap();
    assert_eq!(verify_set.len(), 1);
    assert_eq!(verify_set[0].destination_full_path, renamed);
}
