//! Materializes the approved plan: at-most-once per unique file, atomic per
//! file. Workers only ever obtain work through the store's claim call, write
//! through a job-id-suffixed temp file beside the final destination, and
//! promote it with a rename.

use crate::config::EngineConfig;
use crate::control::{CancelToken, PauseGate};
use crate::error::{Error, Result};
use crate::hasher;
use crate::progress::{ProgressReporter, ProgressTracker};
use crate::storage::models::CopyJobDetail;
use crate::storage::Store;
use crate::category::FileCategory;
use filetime::FileTime;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const COPY_BUFFER_SIZE: usize = 1024 * 1024;
const MAX_ATTEMPTS: i64 = 3;

#[derive(Debug, Default, Clone)]
pub struct CopyOutcome {
    pub copied: u64,
    pub verified: u64,
    pub skipped: u64,
    pub failed: u64,
}

enum AttemptError {
    /// Worth another try after backoff: transient IO, verification mismatch.
    Retryable(String),
    /// Permission problems never improve on retry.
    NonRetryable(String),
    SourceMissing,
    Cancelled,
}

impl From<Error> for AttemptError {
    fn from(err: Error) -> Self {
        match err {
            Error::Cancelled => AttemptError::Cancelled,
            Error::Io(ref io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                AttemptError::NonRetryable(err.to_string())
            }
            other => AttemptError::Retryable(other.to_string()),
        }
    }
}

/// Run the copy workers over the Pending job set. Jobs must already exist
/// (`Store::create_jobs_from_plan`). On cancellation the claimed jobs stay
/// InProgress; the orchestrator resets them afterwards.
pub fn run_copy_stage(
    store: &Arc<Store>,
    config: &EngineConfig,
    tracker: &Arc<ProgressTracker>,
    reporter: &Arc<dyn ProgressReporter>,
    pause: &Arc<PauseGate>,
    cancel: &CancelToken,
) -> Result<CopyOutcome> {
    let workers = config.cpu_profile.copy_workers();
    info!("Copy stage: {} workers", workers);

    let (tx, rx) = async_channel::bounded::<CopyJobDetail>(config.copy_channel_capacity);
    let outcome = std::sync::Mutex::new(CopyOutcome::default());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let rx = rx.clone();
            let store = Arc::clone(store);
            let tracker = Arc::clone(tracker);
            let reporter = Arc::clone(reporter);
            let pause = Arc::clone(pause);
            let cancel = cancel.clone();
            let config = config.clone();
            let outcome = &outcome;
            scope.spawn(move || {
                while let Ok(job) = rx.recv_blocking() {
                    pause.wait_if_paused();
                    if cancel.is_cancelled() {
                        break;
                    }
                    tracker.set_current_path(&job.source_absolute_path);
                    let result =
                        run_job(&store, &job, &config, &tracker, &pause, &cancel);
                    let mut totals = outcome.lock().unwrap();
                    match result {
                        JobResult::Copied { verified } => {
                            tracker.add_file();
                            if verified {
                                totals.verified += 1;
                            } else {
                                totals.copied += 1;
                            }
                        }
                        JobResult::Skipped => {
                            tracker.add_file();
                            totals.skipped += 1;
                        }
                        JobResult::Failed(message) => {
                            tracker.add_error();
                            totals.failed += 1;
                            reporter.on_job_failed(
                                job.job_id,
                                &job.destination_full_path,
                                &message,
                            );
                        }
                        JobResult::Cancelled => break,
                    }
                }
            });
        }
        drop(rx);

        // Feeder: claim batches until the Pending set drains. The claim is
        // the only read path, so two engines sharing a store can never
        // double-process a job.
        loop {
            pause.wait_if_paused();
            if cancel.is_cancelled() {
                break;
            }
            let batch = match store.claim_pending_jobs(config.copy_channel_capacity) {
                Ok(batch) => batch,
                Err(err) => {
                    warn!("Copy feeder: claim failed: {}", err);
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            for job in batch {
                if tx.send_blocking(job).is_err() {
                    break;
                }
            }
        }
        drop(tx);
    });

    cancel.check()?;
    let outcome = outcome.into_inner().unwrap();
    info!(
        "Copy stage complete: {} copied, {} verified, {} skipped, {} failed",
        outcome.copied, outcome.verified, outcome.skipped, outcome.failed
    );
    Ok(outcome)
}

enum JobResult {
    Copied { verified: bool },
    Skipped,
    Failed(String),
    Cancelled,
}

/// Drive one claimed job to a terminal status, retrying with exponential
/// backoff. The claim already counted the first attempt.
fn run_job(
    store: &Store,
    job: &CopyJobDetail,
    config: &EngineConfig,
    tracker: &Arc<ProgressTracker>,
    pause: &PauseGate,
    cancel: &CancelToken,
) -> JobResult {
    let mut attempt = job.attempt_count;
    loop {
        match copy_attempt(job, config, tracker, pause, cancel) {
            Ok(attempt_result) => {
                let verified = attempt_result.verified;
                if let Err(err) = store.mark_job_copied(
                    job.job_id,
                    &attempt_result.actual_destination.to_string_lossy(),
                    verified,
                ) {
                    warn!("Cannot record completion of job {}: {}", job.job_id, err);
                }
                debug!(
                    "Job {}: {} -> {}",
                    job.job_id,
                    job.source_absolute_path,
                    attempt_result.actual_destination.display()
                );
                return JobResult::Copied { verified };
            }
            Err(AttemptError::Cancelled) => {
                // Temp already removed; job stays InProgress for the reset.
                return JobResult::Cancelled;
            }
            Err(AttemptError::SourceMissing) => {
                let _ = store.mark_job_skipped(job.job_id, "source missing");
                warn!("Job {}: source missing, skipped", job.job_id);
                return JobResult::Skipped;
            }
            Err(AttemptError::NonRetryable(message)) => {
                let _ = store.mark_job_error(job.job_id, &message);
                return JobResult::Failed(message);
            }
            Err(AttemptError::Retryable(message)) => {
                if attempt >= MAX_ATTEMPTS {
                    let _ = store.mark_job_error(job.job_id, &message);
                    return JobResult::Failed(message);
                }
                let backoff = Duration::from_millis(100u64 << attempt.max(0).min(8) as u32);
                warn!(
                    "Job {} attempt {} failed ({}), retrying in {:?}",
                    job.job_id, attempt, message, backoff
                );
                std::thread::sleep(backoff);
                match store.record_job_retry(job.job_id) {
                    Ok(count) => attempt = count,
                    Err(err) => {
                        let _ = store.mark_job_error(job.job_id, &err.to_string());
                        return JobResult::Failed(err.to_string());
                    }
                }
            }
        }
    }
}

struct AttemptResult {
    actual_destination: PathBuf,
    verified: bool,
}

/// One attempt of the safe-write protocol. Idempotent: a retry after any
/// failure point observes either the old world or a completed rename,
/// never a half-written destination.
fn copy_attempt(
    job: &CopyJobDetail,
    config: &EngineConfig,
    tracker: &Arc<ProgressTracker>,
    pause: &PauseGate,
    cancel: &CancelToken,
) -> std::result::Result<AttemptResult, AttemptError> {
    let source = Path::new(&job.source_absolute_path);
    let source_meta = match fs::metadata(source) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(AttemptError::SourceMissing);
        }
        Err(err) => return Err(Error::from(err).into()),
    };

    let resolution = resolve_destination(job, config, pause, cancel)?;
    let final_path = resolution.path;

    // A prior attempt (or a prior whole run) already promoted identical
    // content to this path; hashing it above proved it. Complete without
    // rewriting a byte.
    if resolution.existing_matches_hash {
        return Ok(AttemptResult {
            actual_destination: final_path,
            verified: true,
        });
    }

    if let Some(parent) = final_path.parent() {
        fs::create_dir_all(parent).map_err(Error::from)?;
    }

    let temp_path = temp_path_for(&final_path, job.job_id);
    let copy_result = write_temp_copy(source, &temp_path, tracker, pause, cancel);
    if let Err(err) = copy_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    // Carry the source timestamps over before the file goes live.
    let mtime = FileTime::from_last_modification_time(&source_meta);
    let atime = FileTime::from_last_access_time(&source_meta);
    if let Err(err) = filetime::set_file_times(&temp_path, atime, mtime) {
        warn!("Cannot preserve timestamps on {}: {}", temp_path.display(), err);
    }

    let mut verified = false;
    if config.verify_after_copy && config.hash_level.is_authoritative() {
        let rehash = hasher::rehash_for_verification(
            &temp_path,
            config.hash_level,
            &file_name_of(&final_path),
            category_of(job),
            job.partial_hash_info.as_deref(),
            pause,
            cancel,
        );
        match rehash {
            Ok(output) if output.hex == job.hash_hex => verified = true,
            Ok(output) => {
                let _ = fs::remove_file(&temp_path);
                return Err(Error::VerificationMismatch {
                    path: temp_path.display().to_string(),
                    expected: job.hash_hex.clone(),
                    actual: output.hex,
                }
                .into());
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path);
                return Err(err.into());
            }
        }
    }

    fs::rename(&temp_path, &final_path).map_err(|err| {
        let _ = fs::remove_file(&temp_path);
        AttemptError::from(Error::from(err))
    })?;

    Ok(AttemptResult {
        actual_destination: final_path,
        verified,
    })
}

struct DestinationResolution {
    path: PathBuf,
    existing_matches_hash: bool,
}

/// A destination "conflicts" when a different-hash file already sits there
/// or another worker's temp file targets the same final name. Conflicts get
/// `<stem>_<hash8>.<ext>`; anything beyond that an incrementing counter.
fn resolve_destination(
    job: &CopyJobDetail,
    config: &EngineConfig,
    pause: &PauseGate,
    cancel: &CancelToken,
) -> std::result::Result<DestinationResolution, AttemptError> {
    let planned = PathBuf::from(&job.destination_full_path);

    match destination_state(&planned, job, config, pause, cancel)? {
        DestState::Free => {
            return Ok(DestinationResolution {
                path: planned,
                existing_matches_hash: false,
            })
        }
        DestState::SameHash => {
            return Ok(DestinationResolution {
                path: planned,
                existing_matches_hash: true,
            })
        }
        DestState::Conflict => {}
    }

    let suffixed = suffixed_destination(&planned, &job.hash_hex, 0);
    match destination_state(&suffixed, job, config, pause, cancel)? {
        DestState::Free => {
            return Ok(DestinationResolution {
                path: suffixed,
                existing_matches_hash: false,
            })
        }
        DestState::SameHash => {
            return Ok(DestinationResolution {
                path: suffixed,
                existing_matches_hash: true,
            })
        }
        DestState::Conflict => {}
    }

    for counter in 1u32.. {
        let candidate = suffixed_destination(&planned, &job.hash_hex, counter);
        match destination_state(&candidate, job, config, pause, cancel)? {
            DestState::Free => {
                return Ok(DestinationResolution {
                    path: candidate,
                    existing_matches_hash: false,
                })
            }
            DestState::SameHash => {
                return Ok(DestinationResolution {
                    path: candidate,
                    existing_matches_hash: true,
                })
            }
            DestState::Conflict => continue,
        }
    }
    unreachable!("counter loop always returns")
}

enum DestState {
    Free,
    SameHash,
    Conflict,
}

fn destination_state(
    candidate: &Path,
    job: &CopyJobDetail,
    config: &EngineConfig,
    pause: &PauseGate,
    cancel: &CancelToken,
) -> std::result::Result<DestState, AttemptError> {
    if foreign_temp_exists(candidate, job.job_id) {
        return Ok(DestState::Conflict);
    }
    if !candidate.exists() {
        return Ok(DestState::Free);
    }
    if !config.hash_level.is_authoritative() {
        // Preview mode cannot prove identity; treat any occupant as foreign.
        return Ok(DestState::Conflict);
    }
    let existing = hasher::rehash_for_verification(
        candidate,
        config.hash_level,
        &file_name_of(candidate),
        category_of(job),
        job.partial_hash_info.as_deref(),
        pause,
        cancel,
    )?;
    if existing.hex == job.hash_hex {
        Ok(DestState::SameHash)
    } else {
        Ok(DestState::Conflict)
    }
}

/// Another job racing on the same final name leaves `<final>.<id>.tmp`
/// beside it; treat that as occupied even before its rename lands.
fn foreign_temp_exists(final_path: &Path, own_job_id: i64) -> bool {
    let (Some(parent), Some(name)) = (final_path.parent(), final_path.file_name()) else {
        return false;
    };
    let prefix = format!("{}.", name.to_string_lossy());
    let own = format!("{}.{}.tmp", name.to_string_lossy(), own_job_id);
    let Ok(entries) = fs::read_dir(parent) else {
        return false;
    };
    entries.flatten().any(|entry| {
        let entry_name = entry.file_name().to_string_lossy().into_owned();
        entry_name.starts_with(&prefix) && entry_name.ends_with(".tmp") && entry_name != own
    })
}

pub fn temp_path_for(final_path: &Path, job_id: i64) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(&format!(".{}.tmp", job_id));
    final_path.with_file_name(name)
}

pub fn suffixed_destination(planned: &Path, hash_hex: &str, counter: u32) -> PathBuf {
    let stem = planned
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let short = &hash_hex[..hash_hex.len().min(8)];
    let ext = planned.extension().map(|e| e.to_string_lossy().into_owned());
    let name = match (counter, ext) {
        (0, Some(ext)) => format!("{}_{}.{}", stem, short, ext),
        (0, None) => format!("{}_{}", stem, short),
        (n, Some(ext)) => format!("{}_{}_{}.{}", stem, short, n, ext),
        (n, None) => format!("{}_{}_{}", stem, short, n),
    };
    planned.with_file_name(name)
}

fn write_temp_copy(
    source: &Path,
    temp_path: &Path,
    tracker: &Arc<ProgressTracker>,
    pause: &PauseGate,
    cancel: &CancelToken,
) -> std::result::Result<(), AttemptError> {
    let mut reader = File::open(source).map_err(Error::from)?;
    let mut writer = File::create(temp_path).map_err(Error::from)?;
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        pause.wait_if_paused();
        if cancel.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }
        let read = reader.read(&mut buffer).map_err(Error::from)?;
        if read == 0 {
            break;
        }
        writer.write_all(&buffer[..read]).map_err(Error::from)?;
        tracker.add_bytes(read as u64);
    }
    writer.sync_all().map_err(Error::from)?;
    Ok(())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn category_of(job: &CopyJobDetail) -> FileCategory {
    let ext = Path::new(&job.source_absolute_path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    FileCategory::from_extension(&ext)
}

/// Does this file name carry the `<stem>_<8 hex>.<ext>` conflict suffix?
/// Verification uses it to tell renames apart from corruption.
pub fn has_conflict_suffix(file_name: &str) -> bool {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => file_name,
    };
    match stem.rsplit_once('_') {
        Some((_, tail)) => tail.len() == 8 && tail.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_path_carries_job_id() {
        let temp = temp_path_for(Path::new("/dest/2021/2021-03/IMG.jpg"), 42);
        assert_eq!(temp, PathBuf::from("/dest/2021/2021-03/IMG.jpg.42.tmp"));
    }

    #[test]
    fn test_suffixed_destination_shapes() {
        let planned = Path::new("/d/IMG.jpg");
        let hex = "ba7816bf8f01cfea";
        assert_eq!(
            suffixed_destination(planned, hex, 0),
            PathBuf::from("/d/IMG_ba7816bf.jpg")
        );
        assert_eq!(
            suffixed_destination(planned, hex, 2),
            PathBuf::from("/d/IMG_ba7816bf_2.jpg")
        );
        assert_eq!(
            suffixed_destination(Path::new("/d/noext"), hex, 0),
            PathBuf::from("/d/noext_ba7816bf")
        );
    }

    #[test]
    fn test_conflict_suffix_detection() {
        assert!(has_conflict_suffix("IMG_ba7816bf.jpg"));
        assert!(has_conflict_suffix("clip_00c0ffee.mp4"));
        assert!(!has_conflict_suffix("IMG_0001.jpg"));
        assert!(!has_conflict_suffix("IMG.jpg"));
        assert!(!has_conflict_suffix("holiday_2023.jpg"));
    }
}
