use super::{hash_file, HashInterner};
use crate::config::EngineConfig;
use crate::control::{CancelToken, PauseGate};
use crate::error::{Error, Result};
use crate::progress::ProgressTracker;
use crate::storage::models::HashWorkItem;
use crate::storage::{Store, WriterHandle};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone)]
pub struct HashStageOutcome {
    pub hashed: u64,
    pub errors: u64,
}

/// Parallel content hashing. The feeder queries everything still unhashed
/// (largest first) into a bounded channel; N workers pull concurrently,
/// intern the digest and hand the assignment to the writer actor.
pub fn run_hash_stage(
    store: &Arc<Store>,
    writer: &WriterHandle,
    config: &EngineConfig,
    tracker: &Arc<ProgressTracker>,
    pause: &Arc<PauseGate>,
    cancel: &CancelToken,
) -> Result<HashStageOutcome> {
    let items = store.hash_work_items()?;
    if items.is_empty() {
        debug!("Hash stage: nothing to do");
        return Ok(HashStageOutcome::default());
    }

    let total_files = items.len() as u64;
    let total_bytes: u64 = items.iter().map(|i| i.size_bytes as u64).sum();
    tracker.reset(total_files, total_bytes);

    let workers = config.cpu_profile.hash_workers();
    info!(
        "Hash stage: {} files ({} bytes) across {} workers",
        total_files, total_bytes, workers
    );

    let interner = HashInterner::new(Arc::clone(store), config.hash_level.as_str());
    let (tx, rx) = async_channel::bounded::<HashWorkItem>(config.hash_channel_capacity);
    let outcome = std::sync::Mutex::new(HashStageOutcome::default());

    std::thread::scope(|scope| {
        for worker_index in 0..workers {
            let rx = rx.clone();
            let interner = &interner;
            let writer = writer.clone();
            let tracker = Arc::clone(tracker);
            let pause = Arc::clone(pause);
            let cancel = cancel.clone();
            let config = config.clone();
            let outcome = &outcome;
            scope.spawn(move || {
                let mut hashed = 0u64;
                let mut errors = 0u64;
                while let Ok(item) = rx.recv_blocking() {
                    pause.wait_if_paused();
                    if cancel.is_cancelled() {
                        break;
                    }
                    tracker.set_current_path(&item.absolute_path);
                    match process_item(&item, interner, &config, &pause, &cancel) {
                        Ok(hash_id) => {
                            writer.set_hash(item.instance_id, hash_id);
                            tracker.add_file();
                            tracker.add_bytes(item.size_bytes as u64);
                            hashed += 1;
                        }
                        Err(Error::Cancelled) => break,
                        Err(err) => {
                            warn!("Hashing failed for {}: {}", item.absolute_path, err);
                            writer.mark_error(item.instance_id, err.to_string());
                            tracker.add_error();
                            errors += 1;
                        }
                    }
                }
                let mut total = outcome.lock().unwrap();
                total.hashed += hashed;
                total.errors += errors;
                debug!("Hash worker {} done: {} hashed, {} errors", worker_index, hashed, errors);
            });
        }
        drop(rx);

        // Feeder runs on the orchestrating thread. Blocking on a full
        // channel is the backpressure this stage wants.
        for item in items {
            pause.wait_if_paused();
            if cancel.is_cancelled() {
                break;
            }
            let instance_id = item.instance_id;
            if tx.send_blocking(item).is_err() {
                break;
            }
            writer.mark_hash_pending(instance_id);
        }
        drop(tx);
    });

    writer.flush();
    cancel.check()?;

    let outcome = outcome.into_inner().unwrap();
    info!(
        "Hash stage complete: {} hashed, {} errors",
        outcome.hashed, outcome.errors
    );
    Ok(outcome)
}

fn process_item(
    item: &HashWorkItem,
    interner: &HashInterner,
    config: &EngineConfig,
    pause: &PauseGate,
    cancel: &CancelToken,
) -> Result<i64> {
    let output = hash_file(
        Path::new(&item.absolute_path),
        config.hash_level,
        &item.file_name,
        item.size_bytes as u64,
        item.category,
        config.movie_hash_chunk_mb,
        pause,
        cancel,
    )?;
    interner.get_or_intern(&output, item.size_bytes)
}
