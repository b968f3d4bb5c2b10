//! Single writer actor: every pipeline mutation funnels through one thread
//! so the store never sees competing writers under load, while readers stay
//! concurrent on their own connections.

use super::models::Candidate;
use super::sqlite::Store;
use async_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

const CANDIDATE_FLUSH_THRESHOLD: usize = 10_000;
const UPDATE_FLUSH_THRESHOLD: usize = 512;

pub enum WriteCommand {
    InsertCandidate(Candidate),
    /// The instance was handed to a hash worker.
    MarkHashPending(i64),
    SetHash { instance_id: i64, hash_id: i64 },
    MarkError { instance_id: i64, message: String },
    /// Commit everything buffered, then reply.
    Flush(Sender<()>),
}

/// Cloneable handle the pipeline stages write through. The channel is
/// bounded; a full queue blocks the producer, which is the backpressure the
/// enumerator relies on.
#[derive(Clone)]
pub struct WriterHandle {
    tx: Sender<WriteCommand>,
}

impl WriterHandle {
    pub fn send(&self, cmd: WriteCommand) {
        // The receiver only disappears after close(); a send after that is
        // a pipeline bug worth surfacing in the logs, not a panic.
        if self.tx.send_blocking(cmd).is_err() {
            error!("Writer actor is gone; dropping write command");
        }
    }

    pub fn insert_candidate(&self, candidate: Candidate) {
        self.send(WriteCommand::InsertCandidate(candidate));
    }

    pub fn mark_hash_pending(&self, instance_id: i64) {
        self.send(WriteCommand::MarkHashPending(instance_id));
    }

    pub fn set_hash(&self, instance_id: i64, hash_id: i64) {
        self.send(WriteCommand::SetHash { instance_id, hash_id });
    }

    pub fn mark_error(&self, instance_id: i64, message: String) {
        self.send(WriteCommand::MarkError { instance_id, message });
    }

    /// Barrier: returns once everything sent before it is committed.
    pub fn flush(&self) {
        let (tx, rx) = async_channel::bounded(1);
        self.send(WriteCommand::Flush(tx));
        let _ = rx.recv_blocking();
    }
}

pub struct WriterActor {
    handle: WriterHandle,
    join: JoinHandle<()>,
}

impl WriterActor {
    pub fn spawn(store: Arc<Store>, capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity);
        let join = std::thread::Builder::new()
            .name("store-writer".into())
            .spawn(move || run_writer(store, rx))
            .expect("failed to spawn writer thread");
        Self {
            handle: WriterHandle { tx },
            join,
        }
    }

    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    /// Drain outstanding commands, commit, and stop the thread.
    pub fn close(self) {
        self.handle.flush();
        drop(self.handle);
        let _ = self.join.join();
    }
}

struct WriteBuffers {
    candidates: Vec<Candidate>,
    pending_marks: Vec<i64>,
    hash_updates: Vec<(i64, i64)>,
    error_updates: Vec<(i64, String)>,
}

impl WriteBuffers {
    fn new() -> Self {
        Self {
            candidates: Vec::new(),
            pending_marks: Vec::new(),
            hash_updates: Vec::new(),
            error_updates: Vec::new(),
        }
    }

    fn flush(&mut self, store: &Store) {
        if !self.candidates.is_empty() {
            if let Err(e) = store.batch_insert_candidates(&self.candidates) {
                error!("Writer: candidate batch failed: {}", e);
            }
            self.candidates.clear();
        }
        if !self.pending_marks.is_empty() {
            if let Err(e) = store.apply_hash_pending_marks(&self.pending_marks) {
                error!("Writer: hash-pending batch failed: {}", e);
            }
            self.pending_marks.clear();
        }
        if !self.hash_updates.is_empty() {
            if let Err(e) = store.apply_hash_updates(&self.hash_updates) {
                error!("Writer: hash update batch failed: {}", e);
            }
            self.hash_updates.clear();
        }
        if !self.error_updates.is_empty() {
            if let Err(e) = store.apply_error_updates(&self.error_updates) {
                error!("Writer: error update batch failed: {}", e);
            }
            self.error_updates.clear();
        }
    }
}

fn run_writer(store: Arc<Store>, rx: Receiver<WriteCommand>) {
    let mut buffers = WriteBuffers::new();
    debug!("Writer actor started");
    loop {
        // Block for the next command; when the queue momentarily drains,
        // commit whatever is buffered so readers see progress promptly.
        let cmd = match rx.try_recv() {
            Ok(cmd) => cmd,
            Err(async_channel::TryRecvError::Empty) => {
                buffers.flush(&store);
                match rx.recv_blocking() {
                    Ok(cmd) => cmd,
                    Err(_) => break,
                }
            }
            Err(async_channel::TryRecvError::Closed) => break,
        };
        match cmd {
            WriteCommand::InsertCandidate(candidate) => {
                buffers.candidates.push(candidate);
                if buffers.candidates.len() >= CANDIDATE_FLUSH_THRESHOLD {
                    buffers.flush(&store);
                }
            }
            WriteCommand::MarkHashPending(instance_id) => {
                buffers.pending_marks.push(instance_id);
                if buffers.pending_marks.len() >= UPDATE_FLUSH_THRESHOLD {
                    buffers.flush(&store);
                }
            }
            WriteCommand::SetHash { instance_id, hash_id } => {
                buffers.hash_updates.push((instance_id, hash_id));
                if buffers.hash_updates.len() >= UPDATE_FLUSH_THRESHOLD {
                    buffers.flush(&store);
                }
            }
            WriteCommand::MarkError { instance_id, message } => {
                buffers.error_updates.push((instance_id, message));
                if buffers.error_updates.len() >= UPDATE_FLUSH_THRESHOLD {
                    buffers.flush(&store);
                }
            }
            WriteCommand::Flush(reply) => {
                buffers.flush(&store);
                let _ = reply.send_blocking(());
            }
        }
    }
    buffers.flush(&store);
    debug!("Writer actor stopped");
}
