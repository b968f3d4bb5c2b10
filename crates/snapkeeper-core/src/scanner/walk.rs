use crate::category::FileCategory;
use crate::config::ScanFilter;
use crate::control::{CancelToken, PauseGate};
use crate::error::Result;
use crate::platform;
use crate::progress::ProgressTracker;
use crate::storage::models::{Candidate, ScanRoot};
use crate::storage::WriterHandle;
use chrono::{DateTime, Utc};
use glob::Pattern;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone)]
pub struct ScanOutcome {
    pub emitted: u64,
    pub rejected: u64,
    pub errors: u64,
    pub reparse_points_skipped: u64,
}

/// Streaming directory walk over the enabled roots. Candidates go to the
/// writer handle one at a time; a full writer queue blocks the walk, which
/// is the intended backpressure. Depth-first with an explicit stack, so
/// candidate order is stable per root.
pub fn scan_roots(
    roots: &[ScanRoot],
    filter: &ScanFilter,
    writer: &WriterHandle,
    tracker: &Arc<ProgressTracker>,
    pause: &PauseGate,
    cancel: &CancelToken,
) -> Result<ScanOutcome> {
    let active_extensions = filter.extension_set();
    let ignore_patterns: Vec<Pattern> = filter
        .ignore_patterns
        .iter()
        .filter_map(|raw| match Pattern::new(raw) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("Invalid ignore pattern '{}': {}", raw, e);
                None
            }
        })
        .collect();

    let mut outcome = ScanOutcome::default();
    for root in roots {
        walk_root(
            root,
            &active_extensions,
            &ignore_patterns,
            filter,
            writer,
            tracker,
            pause,
            cancel,
            &mut outcome,
        )?;
    }
    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
fn walk_root(
    root: &ScanRoot,
    active_extensions: &HashSet<&'static str>,
    ignore_patterns: &[Pattern],
    filter: &ScanFilter,
    writer: &WriterHandle,
    tracker: &Arc<ProgressTracker>,
    pause: &PauseGate,
    cancel: &CancelToken,
    outcome: &mut ScanOutcome,
) -> Result<()> {
    let root_path = PathBuf::from(&root.path);
    debug!("Scanning root {} ({})", root.id, root_path.display());

    let mut stack: Vec<PathBuf> = vec![root_path.clone()];
    while let Some(dir) = stack.pop() {
        pause.wait_if_paused();
        cancel.check()?;

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                // Access denied and vanished directories do not halt the walk.
                warn!("Cannot read directory {}: {}", dir.display(), err);
                outcome.errors += 1;
                tracker.add_error();
                continue;
            }
        };

        let mut subdirs: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Error reading entry in {}: {}", dir.display(), err);
                    outcome.errors += 1;
                    tracker.add_error();
                    continue;
                }
            };
            let path = entry.path();
            let metadata = match fs::symlink_metadata(&path) {
                Ok(m) => m,
                Err(err) => {
                    warn!("Cannot stat {}: {}", path.display(), err);
                    outcome.errors += 1;
                    tracker.add_error();
                    continue;
                }
            };

            if metadata.is_dir() || metadata.file_type().is_symlink() {
                if platform::is_reparse_point(&metadata) {
                    debug!("Skipping reparse point {}", path.display());
                    outcome.reparse_points_skipped += 1;
                    continue;
                }
                if metadata.is_dir() {
                    subdirs.push(path);
                }
                continue;
            }

            match examine_file(
                root,
                &root_path,
                &path,
                &metadata,
                active_extensions,
                ignore_patterns,
                filter,
            ) {
                Ok(Some(candidate)) => {
                    pause.wait_if_paused();
                    cancel.check()?;
                    tracker.set_current_path(&path.to_string_lossy());
                    tracker.add_file();
                    tracker.add_bytes(candidate.size_bytes as u64);
                    writer.insert_candidate(candidate);
                    outcome.emitted += 1;
                }
                Ok(None) => outcome.rejected += 1,
                Err(err) => {
                    warn!("Cannot examine {}: {}", path.display(), err);
                    outcome.errors += 1;
                    tracker.add_error();
                }
            }
        }

        // Files first, then descend; pushing in reverse keeps listing order.
        for sub in subdirs.into_iter().rev() {
            stack.push(sub);
        }
    }
    Ok(())
}

/// Cheap filters, applied in order: ignore globs, extension set, size
/// window. Only survivors cost a candidate allocation.
fn examine_file(
    root: &ScanRoot,
    root_path: &Path,
    path: &Path,
    metadata: &fs::Metadata,
    active_extensions: &HashSet<&'static str>,
    ignore_patterns: &[Pattern],
    filter: &ScanFilter,
) -> io::Result<Option<Candidate>> {
    if ignore_patterns.iter().any(|p| p.matches_path(path)) {
        return Ok(None);
    }

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !active_extensions.contains(extension.as_str()) {
        return Ok(None);
    }

    let size = metadata.len();
    if !filter.size_in_window(size) {
        return Ok(None);
    }

    let relative_path = path
        .strip_prefix(root_path)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let modified_utc = metadata
        .modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

    Ok(Some(Candidate {
        scan_root_id: root.id,
        relative_path,
        file_name,
        extension: extension.clone(),
        size_bytes: size as i64,
        modified_utc,
        category: FileCategory::from_extension(&extension),
    }))
}
