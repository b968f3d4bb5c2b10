use filetime::FileTime;
use snapkeeper_core::category::FileCategory;
use snapkeeper_core::config::{CpuProfile, EngineConfig, HashLevel, ScanFilter};
use snapkeeper_core::state::PipelineState;
use snapkeeper_core::storage::Store;
use snapkeeper_core::{Error, NoopSleepInhibit, PipelineEngine, SilentReporter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;

const JUNE_2022: i64 = 1654041600;

fn write_media(path: &Path, contents: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
    filetime::set_file_mtime(path, FileTime::from_unix_time(JUNE_2022, 0)).unwrap();
}

/// Layout with known duplicates:
///   root/
///     cam/IMG_001.jpg        ("sunset")
///     cam/IMG_002.jpg        ("beach")
///     backup/IMG_001.jpg     ("sunset")   ← duplicate
///     backup/old/IMG_002.jpg ("beach")    ← duplicate
///     notes.txt              (filtered: not a media extension)
fn create_test_tree(root: &Path) {
    write_media(&root.join("cam/IMG_001.jpg"), b"sunset");
    write_media(&root.join("cam/IMG_002.jpg"), b"beach");
    write_media(&root.join("backup/IMG_001.jpg"), b"sunset");
    write_media(&root.join("backup/old/IMG_002.jpg"), b"beach");
    write_media(&root.join("notes.txt"), b"not media");
}

fn test_config() -> EngineConfig {
    EngineConfig {
        hash_level: HashLevel::Sha256,
        cpu_profile: CpuProfile::Eco,
        verify_after_copy: true,
        filter: ScanFilter {
            enabled_categories: vec![FileCategory::Image, FileCategory::Movie],
            ..ScanFilter::default()
        },
        ..EngineConfig::default()
    }
}

fn open_engine(project: &Path, target: &Path, roots: &[&Path]) -> PipelineEngine {
    let engine = PipelineEngine::open(
        project,
        test_config(),
        Arc::new(SilentReporter),
        Box::new(NoopSleepInhibit),
    )
    .unwrap();
    engine
        .store()
        .init_project(
            "e2e",
            HashLevel::Sha256,
            CpuProfile::Eco,
            &[FileCategory::Image, FileCategory::Movie],
        )
        .unwrap();
    engine
        .store()
        .set_target_path(&target.to_string_lossy())
        .unwrap();
    for root in roots {
        engine.add_root(root, None).unwrap();
    }
    engine
}

fn collect_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = fs::read_dir(&current) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

#[test]
fn test_full_pipeline_dedups_and_verifies() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    let target = tmp.path().join("target");
    create_test_tree(&root);

    let engine = open_engine(&tmp.path().join("project"), &target, &[&root]);

    let plan = engine.run_to_plan().unwrap();
    assert_eq!(engine.state(), PipelineState::ReadyToCopy);
    assert_eq!(plan.unique_files, 2, "two distinct contents");
    assert_eq!(plan.duplicate_instances, 2);

    let outcome = engine.copy().unwrap();
    assert_eq!(outcome.verified, 2);
    assert_eq!(outcome.failed, 0);
    assert_eq!(engine.state(), PipelineState::Completed);

    // Number of destination files equals number of distinct hashes.
    let copied = collect_files(&target);
    assert_eq!(copied.len(), 2);
    assert_eq!(copied[0], target.join("2022/2022-06/IMG_001.jpg"));
    assert_eq!(copied[1], target.join("2022/2022-06/IMG_002.jpg"));

    // The txt file never entered the pipeline.
    let summary = engine.summary().unwrap();
    assert_eq!(summary.total_instances, 4);

    let report = engine.verify().unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.matched, 2);
    assert_eq!(report.mismatched, 0);
}

#[test]
fn test_rescan_is_idempotent() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    create_test_tree(&root);

    let engine = open_engine(
        &tmp.path().join("project"),
        &tmp.path().join("target"),
        &[&root],
    );

    let first = engine.scan().unwrap();
    let roots = engine.roots().unwrap();
    let paths_before: Vec<String> = instance_paths(engine.store(), roots[0].id);

    let second = engine.scan().unwrap();
    let paths_after: Vec<String> = instance_paths(engine.store(), roots[0].id);

    assert_eq!(first.emitted, second.emitted);
    assert_eq!(paths_before, paths_after);
}

fn instance_paths(store: &Arc<Store>, root_id: i64) -> Vec<String> {
    let conn = store.reader().unwrap();
    snapkeeper_core::storage::queries::instances_for_root(&conn, root_id)
        .unwrap()
        .into_iter()
        .map(|i| i.relative_path)
        .collect()
}

#[test]
fn test_rescan_after_delete_prunes_orphan_hash() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    let target = tmp.path().join("target");
    create_test_tree(&root);

    let engine = open_engine(&tmp.path().join("project"), &target, &[&root]);
    engine.scan().unwrap();
    engine.hash().unwrap();
    assert_eq!(engine.store().hash_count().unwrap(), 2);

    // Remove every instance of "beach".
    fs::remove_file(root.join("cam/IMG_002.jpg")).unwrap();
    fs::remove_file(root.join("backup/old/IMG_002.jpg")).unwrap();

    engine.scan().unwrap();
    let roots = engine.roots().unwrap();
    let paths = instance_paths(engine.store(), roots[0].id);
    assert!(!paths.iter().any(|p| p.contains("IMG_002")));
    assert_eq!(
        engine.store().hash_count().unwrap(),
        1,
        "hash referenced only by the deleted file is pruned"
    );

    // Unchanged files kept their hashes; nothing left to hash.
    engine.hash().unwrap();
    let summary = engine.summary().unwrap();
    assert_eq!(summary.hashed, 2);
    assert_eq!(summary.discovered, 0);
}

#[cfg(unix)]
#[test]
fn test_self_referencing_symlink_is_skipped() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir_all(root.join("sub")).unwrap();
    write_media(&root.join("sub/real.jpg"), b"real");
    // A link cycle back to the root: descending it would never terminate.
    std::os::unix::fs::symlink(&root, root.join("sub/loop")).unwrap();

    let engine = open_engine(
        &tmp.path().join("project"),
        &tmp.path().join("target"),
        &[&root],
    );
    let outcome = engine.scan().unwrap();
    assert_eq!(outcome.emitted, 1, "only the real file is discovered");
    assert!(outcome.reparse_points_skipped >= 1);
}

#[test]
fn test_verification_flags_corrupted_destination() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    let target = tmp.path().join("target");
    write_media(&root.join("good.jpg"), b"good content");
    write_media(&root.join("bad.jpg"), b"bad content!");

    let engine = open_engine(&tmp.path().join("project"), &target, &[&root]);
    engine.run_to_plan().unwrap();
    engine.copy().unwrap();

    // Flip bits in one destination file after the copy completed.
    let victim = target.join("2022/2022-06/bad.jpg");
    let mut bytes = fs::read(&victim).unwrap();
    bytes[0] ^= 0xFF;
    fs::write(&victim, &bytes).unwrap();

    let report = engine.verify().unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.matched, 1);
    assert_eq!(report.mismatched, 1);

    let conn = engine.store().reader().unwrap();
    let (outcome, was_renamed, src_hex, dst_hex): (String, bool, Option<String>, Option<String>) =
        conn.query_row(
            "SELECT vr.Outcome, vr.WasRenamed, vr.SourceHashHex, vr.DestinationHashHex
             FROM VerificationResults vr
             JOIN CopyJobs cj ON cj.Id = vr.CopyJobId
             WHERE cj.DestinationFullPath LIKE '%bad.jpg'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!(outcome, "HashMismatch");
    assert!(!was_renamed);
    let src_hex = src_hex.unwrap();
    let dst_hex = dst_hex.unwrap();
    assert_ne!(src_hex, dst_hex, "both digests are recorded");
}

#[test]
fn test_faulted_state_rejects_stage_starts() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    create_test_tree(&root);
    let project = tmp.path().join("project");

    {
        let engine = open_engine(&project, &tmp.path().join("target"), &[&root]);
        engine.store().save_state(PipelineState::Faulted).unwrap();
    }

    let engine = open_engine(&project, &tmp.path().join("target"), &[&root]);
    assert_eq!(engine.state(), PipelineState::Faulted);

    let err = engine.plan().unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(engine.state(), PipelineState::Faulted, "no state change on rejection");

    engine.return_to_idle().unwrap();
    assert_eq!(engine.state(), PipelineState::Idle);
    engine.scan().unwrap();
}

#[test]
fn test_pause_blocks_hash_stage_until_resume() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    create_test_tree(&root);

    let engine = Arc::new(open_engine(
        &tmp.path().join("project"),
        &tmp.path().join("target"),
        &[&root],
    ));
    engine.scan().unwrap();

    engine.pause();
    let worker = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || engine.hash().unwrap())
    };
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert!(!worker.is_finished(), "hash stage holds at the pause gate");

    engine.resume();
    let outcome = worker.join().unwrap();
    assert_eq!(outcome.hashed, 4);
    assert_eq!(engine.summary().unwrap().hashed, 4);
}

#[test]
fn test_plan_is_deterministic_across_runs() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("root");
    create_test_tree(&root);

    let engine = open_engine(
        &tmp.path().join("project"),
        &tmp.path().join("target"),
        &[&root],
    );
    let first = engine.run_to_plan().unwrap();
    let first_tree: Vec<_> = engine
        .store()
        .folder_tree()
        .unwrap()
        .into_iter()
        .map(|n| (n.proposed_relative_path, n.unique_count, n.total_size_bytes))
        .collect();

    engine.return_to_idle().unwrap();
    let second = engine.run_to_plan().unwrap();
    let second_tree: Vec<_> = engine
        .store()
        .folder_tree()
        .unwrap()
        .into_iter()
        .map(|n| (n.proposed_relative_path, n.unique_count, n.total_size_bytes))
        .collect();

    assert_eq!(first.unique_files, second.unique_files);
    assert_eq!(first_tree, second_tree);
}
