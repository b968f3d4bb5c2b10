//! Independent source↔destination re-hash pass over completed copy jobs.
//! Not wired into the pipeline state machine; it can run at any point after
//! a copy and only ever reads the filesystem.

use crate::config::EngineConfig;
use crate::control::{CancelToken, PauseGate};
use crate::copier::has_conflict_suffix;
use crate::error::Result;
use crate::hasher;
use crate::progress::ProgressTracker;
use crate::storage::models::CopyJobDetail;
use crate::storage::Store;
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Matched,
    HashMismatch,
    SourceMissing,
    DestMissing,
    SizeMismatch,
    ReadError,
}

impl VerifyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyOutcome::Matched => "Matched",
            VerifyOutcome::HashMismatch => "HashMismatch",
            VerifyOutcome::SourceMissing => "SourceMissing",
            VerifyOutcome::DestMissing => "DestMissing",
            VerifyOutcome::SizeMismatch => "SizeMismatch",
            VerifyOutcome::ReadError => "ReadError",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifyRecord {
    pub job_id: i64,
    pub outcome: VerifyOutcome,
    /// The destination carries the conflict-rename suffix, so a hash that
    /// differs from a same-named neighbour is not corruption.
    pub was_renamed: bool,
    pub source_hex: Option<String>,
    pub destination_hex: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct VerifyReport {
    pub checked: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub missing: usize,
    pub read_errors: usize,
}

/// Re-hash every Copied/Verified job's source and destination and persist
/// one verdict per job. Pairs are checked in parallel.
pub fn run_verification(
    store: &Arc<Store>,
    config: &EngineConfig,
    tracker: &Arc<ProgressTracker>,
    pause: &Arc<PauseGate>,
    cancel: &CancelToken,
) -> Result<VerifyReport> {
    let jobs = store.jobs_to_verify()?;
    if jobs.is_empty() {
        info!("Verification: no completed jobs to check");
        return Ok(VerifyReport::default());
    }
    tracker.reset(
        jobs.len() as u64,
        jobs.iter().map(|j| 2 * j.size_bytes as u64).sum(),
    );

    let records: Vec<VerifyRecord> = jobs
        .par_iter()
        .filter_map(|job| {
            if cancel.is_cancelled() {
                return None;
            }
            pause.wait_if_paused();
            tracker.set_current_path(&job.destination_full_path);
            let record = verify_pair(job, config, pause, cancel);
            tracker.add_file();
            if record.outcome != VerifyOutcome::Matched {
                tracker.add_error();
            }
            Some(record)
        })
        .collect();
    cancel.check()?;

    let mut report = VerifyReport {
        checked: records.len(),
        ..VerifyReport::default()
    };
    for record in &records {
        match record.outcome {
            VerifyOutcome::Matched => report.matched += 1,
            VerifyOutcome::HashMismatch | VerifyOutcome::SizeMismatch => report.mismatched += 1,
            VerifyOutcome::SourceMissing | VerifyOutcome::DestMissing => report.missing += 1,
            VerifyOutcome::ReadError => report.read_errors += 1,
        }
        store.insert_verification_result(
            record.job_id,
            record.outcome.as_str(),
            record.was_renamed,
            record.source_hex.as_deref(),
            record.destination_hex.as_deref(),
        )?;
    }
    info!(
        "Verification: {} checked, {} matched, {} mismatched, {} missing, {} read errors",
        report.checked, report.matched, report.mismatched, report.missing, report.read_errors
    );
    Ok(report)
}

fn verify_pair(
    job: &CopyJobDetail,
    config: &EngineConfig,
    pause: &PauseGate,
    cancel: &CancelToken,
) -> VerifyRecord {
    let source = Path::new(&job.source_absolute_path);
    let destination = Path::new(&job.destination_full_path);
    let was_renamed = destination
        .file_name()
        .map(|n| has_conflict_suffix(&n.to_string_lossy()))
        .unwrap_or(false);

    let base = |outcome| VerifyRecord {
        job_id: job.job_id,
        outcome,
        was_renamed,
        source_hex: None,
        destination_hex: None,
    };

    let source_meta = match std::fs::metadata(source) {
        Ok(meta) => meta,
        Err(_) => return base(VerifyOutcome::SourceMissing),
    };
    let dest_meta = match std::fs::metadata(destination) {
        Ok(meta) => meta,
        Err(_) => return base(VerifyOutcome::DestMissing),
    };
    if source_meta.len() != dest_meta.len() {
        return base(VerifyOutcome::SizeMismatch);
    }

    let partial = job.partial_hash_info.as_deref();
    let source_hash = hasher::rehash_for_verification(
        source,
        config.hash_level,
        &name_of(source),
        crate::category::FileCategory::from_extension(&ext_of(source)),
        partial,
        pause,
        cancel,
    );
    let dest_hash = hasher::rehash_for_verification(
        destination,
        config.hash_level,
        &name_of(destination),
        crate::category::FileCategory::from_extension(&ext_of(destination)),
        partial,
        pause,
        cancel,
    );

    match (source_hash, dest_hash) {
        (Ok(src), Ok(dst)) => {
            let outcome = if src.hex == dst.hex {
                VerifyOutcome::Matched
            } else {
                warn!(
                    "Hash mismatch for job {}: source {} destination {}",
                    job.job_id, src.hex, dst.hex
                );
                VerifyOutcome::HashMismatch
            };
            VerifyRecord {
                job_id: job.job_id,
                outcome,
                was_renamed,
                source_hex: Some(src.hex),
                destination_hex: Some(dst.hex),
            }
        }
        _ => base(VerifyOutcome::ReadError),
    }
}

fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn ext_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
