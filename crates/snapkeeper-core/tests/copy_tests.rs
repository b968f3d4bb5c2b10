use filetime::FileTime;
use snapkeeper_core::category::FileCategory;
use snapkeeper_core::config::{CpuProfile, EngineConfig, HashLevel, ScanFilter};
use snapkeeper_core::control::{CancelToken, PauseGate};
use snapkeeper_core::hasher;
use snapkeeper_core::state::PipelineState;
use snapkeeper_core::{NoopSleepInhibit, PipelineEngine, SilentReporter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;

/// March 5th 2021, midnight UTC. Pins every fixture into 2021/2021-03.
const MARCH_2021: i64 = 1614902400;

fn write_fixture(path: &Path, contents: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
    let stamp = FileTime::from_unix_time(MARCH_2021, 0);
    filetime::set_file_mtime(path, stamp).unwrap();
}

/// Single-worker profile so claim and collision order are deterministic.
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
            "test",
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
        fs::create_dir_all(root).unwrap();
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

fn sha256_of(path: &Path) -> String {
    let size = fs::metadata(path).unwrap().len();
    hasher::hash_file(
        path,
        HashLevel::Sha256,
        "",
        size,
        FileCategory::Other,
        None,
        &PauseGate::new(),
        &CancelToken::new(),
    )
    .unwrap()
    .hex
}

#[test]
fn test_dedup_copies_exactly_one_instance() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("source");
    let target = tmp.path().join("backup");
    write_fixture(&root.join("A/photo.jpg"), b"pixels-P");
    write_fixture(&root.join("B/deep/photo_copy.jpg"), b"pixels-P");

    let engine = open_engine(&tmp.path().join("project"), &target, &[&root]);
    let plan = engine.run_to_plan().unwrap();
    assert_eq!(plan.unique_files, 1);
    assert_eq!(plan.duplicate_instances, 1);

    let outcome = engine.copy().unwrap();
    assert_eq!(outcome.verified, 1);
    assert_eq!(outcome.failed, 0);

    let copied = collect_files(&target);
    assert_eq!(copied.len(), 1, "one distinct hash, one destination file");
    // Representative has the shorter relative path, so its name wins.
    assert_eq!(copied[0], target.join("2021/2021-03/photo.jpg"));
    assert_eq!(fs::read(&copied[0]).unwrap(), b"pixels-P");
    assert_eq!(engine.state(), PipelineState::Completed);
}

#[test]
fn test_name_collision_gets_hash_suffix() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("source");
    let target = tmp.path().join("backup");
    // Same name, same month, different content; the larger file is claimed
    // first and keeps the plain name.
    write_fixture(&root.join("x/IMG.jpg"), b"content-one-but-longer");
    write_fixture(&root.join("y/IMG.jpg"), b"content-two");

    let engine = open_engine(&tmp.path().join("project"), &target, &[&root]);
    engine.run_to_plan().unwrap();
    let outcome = engine.copy().unwrap();
    assert_eq!(outcome.verified, 2);

    let month_dir = target.join("2021/2021-03");
    let plain = month_dir.join("IMG.jpg");
    assert!(plain.exists());
    assert_eq!(fs::read(&plain).unwrap(), b"content-one-but-longer");

    let small_hash = sha256_of(&root.join("y/IMG.jpg"));
    let suffixed = month_dir.join(format!("IMG_{}.jpg", &small_hash[..8]));
    assert!(suffixed.exists(), "loser of the name race carries the hash suffix");
    assert_eq!(fs::read(&suffixed).unwrap(), b"content-two");
}

#[test]
fn test_second_copy_rewrites_nothing() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("source");
    let target = tmp.path().join("backup");
    write_fixture(&root.join("a.jpg"), b"alpha");
    write_fixture(&root.join("b.jpg"), b"beta");

    let engine = open_engine(&tmp.path().join("project"), &target, &[&root]);
    engine.run_to_plan().unwrap();
    engine.copy().unwrap();
    let first_run = collect_files(&target);
    assert_eq!(first_run.len(), 2);
    let first_mtime = fs::metadata(&first_run[0]).unwrap().modified().unwrap();

    // Replan and copy again without touching the sources.
    engine.return_to_idle().unwrap();
    engine.plan().unwrap();
    let outcome = engine.copy().unwrap();
    assert_eq!(outcome.failed, 0);

    let second_run = collect_files(&target);
    assert_eq!(first_run, second_run, "no new destination files");
    assert_eq!(
        fs::metadata(&second_run[0]).unwrap().modified().unwrap(),
        first_mtime,
        "existing file was not rewritten"
    );
}

#[test]
fn test_missing_source_is_skipped() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("source");
    let target = tmp.path().join("backup");
    write_fixture(&root.join("stays.jpg"), b"stays");
    write_fixture(&root.join("vanishes.jpg"), b"vanishes");

    let engine = open_engine(&tmp.path().join("project"), &target, &[&root]);
    engine.run_to_plan().unwrap();

    fs::remove_file(root.join("vanishes.jpg")).unwrap();
    let outcome = engine.copy().unwrap();
    assert_eq!(outcome.verified, 1);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.failed, 0);

    let copied = collect_files(&target);
    assert_eq!(copied.len(), 1);
    assert!(copied[0].ends_with("stays.jpg"));
}

#[test]
fn test_sources_survive_the_whole_pipeline() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("source");
    let target = tmp.path().join("backup");
    let originals = [
        (root.join("one.jpg"), b"first".to_vec()),
        (root.join("sub/two.jpg"), b"second".to_vec()),
        (root.join("sub/two_copy.jpg"), b"second".to_vec()),
    ];
    for (path, contents) in &originals {
        write_fixture(path, contents);
    }
    let before: Vec<String> = originals.iter().map(|(p, _)| sha256_of(p)).collect();

    let engine = open_engine(&tmp.path().join("project"), &target, &[&root]);
    engine.run_to_plan().unwrap();
    engine.copy().unwrap();
    engine.verify().unwrap();

    for ((path, contents), before_hex) in originals.iter().zip(&before) {
        assert!(path.exists(), "source {} must survive", path.display());
        assert_eq!(&fs::read(path).unwrap(), contents);
        assert_eq!(&sha256_of(path), before_hex);
    }
}

#[test]
fn test_cancel_leaves_no_temp_files_and_resume_completes() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("source");
    let target = tmp.path().join("backup");
    for i in 0..12 {
        write_fixture(
            &root.join(format!("f{:02}.jpg", i)),
            format!("content-{:02}", i).repeat(2000).as_bytes(),
        );
    }

    let project = tmp.path().join("project");
    {
        let engine = Arc::new(open_engine(&project, &target, &[&root]));
        engine.run_to_plan().unwrap();

        let canceller = Arc::clone(&engine);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(5));
            canceller.cancel();
        });
        // Small data sets may finish before the cancel lands; both outcomes
        // are legitimate.
        match engine.copy() {
            Ok(_) | Err(snapkeeper_core::Error::Cancelled) => {}
            Err(other) => panic!("unexpected copy error: {}", other),
        }
        handle.join().unwrap();
    }

    let leftovers: Vec<PathBuf> = collect_files(&target)
        .into_iter()
        .filter(|p| p.extension().map(|e| e == "tmp").unwrap_or(false))
        .collect();
    assert!(leftovers.is_empty(), "no temp file survives a cancel: {:?}", leftovers);

    // Reopen the project (recovery resets InProgress) and resume.
    let engine = open_engine(&project, &target, &[&root]);
    // Resume path: leftover Pending jobs run as-is; a completed first run
    // simply needs a fresh plan to recreate its (already satisfied) jobs.
    if engine.state() == PipelineState::Completed {
        engine.return_to_idle().unwrap();
    }
    if engine.store().pending_job_count().unwrap() == 0 {
        engine.plan().unwrap();
    }
    engine.copy().unwrap();

    let copied: Vec<PathBuf> = collect_files(&target)
        .into_iter()
        .filter(|p| p.extension().map(|e| e == "jpg").unwrap_or(false))
        .collect();
    assert_eq!(copied.len(), 12, "every unique file lands exactly once");
}
