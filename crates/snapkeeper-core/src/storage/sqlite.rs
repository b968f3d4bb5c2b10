use crate::error::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

static MEMORY_STORE_SEQ: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone)]
enum StoreLocation {
    File(PathBuf),
    /// Named shared-cache URI so extra read connections see the same data.
    Memory(String),
}

/// The embedded project store. One write connection guarded by a mutex
/// serializes all mutations; read connections are opened on demand and run
/// concurrently under WAL.
#[derive(Debug)]
pub struct Store {
    write_conn: Mutex<Connection>,
    location: StoreLocation,
}

impl Store {
    /// Open or create the store at `path`, apply the schema idempotently,
    /// and roll incomplete work back to a resumable state.
    pub fn open(path: &Path) -> Result<Self> {
        let existing = path.exists();
        let conn = Connection::open(path).map_err(|e| Error::StorageOpen {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let store = Store {
            write_conn: Mutex::new(conn),
            location: StoreLocation::File(path.to_path_buf()),
        };
        store.configure_pragmas()?;
        if existing {
            store.check_integrity()?;
        }
        store.apply_schema()?;
        store.recover()?;
        Ok(store)
    }

    /// In-memory store for tests. Backed by a named shared-cache database so
    /// `reader()` connections attach to the same contents.
    pub fn open_in_memory() -> Result<Self> {
        let uri = format!(
            "file:snapkeeper-mem-{}?mode=memory&cache=shared",
            MEMORY_STORE_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let conn = Connection::open_with_flags(
            &uri,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        let store = Store {
            write_conn: Mutex::new(conn),
            location: StoreLocation::Memory(uri),
        };
        store.configure_pragmas()?;
        store.apply_schema()?;
        Ok(store)
    }

    fn configure_pragmas(&self) -> Result<()> {
        let conn = self.acquire_write();
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA cache_size = -64000;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("Store pragmas configured (WAL, NORMAL sync, 64MB cache)");
        Ok(())
    }

    fn apply_schema(&self) -> Result<()> {
        let conn = self.acquire_write();
        conn.execute_batch(include_str!("schema.sql"))?;
        debug!("Store schema applied");
        Ok(())
    }

    /// A corrupted store is reported, never auto-repaired.
    fn check_integrity(&self) -> Result<()> {
        let conn = self.acquire_write();
        let verdict: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if verdict == "ok" {
            Ok(())
        } else {
            Err(Error::StorageIntegrity(verdict))
        }
    }

    /// Serializes writes across the process: only one handle is out at a
    /// time, additional requests block.
    pub fn acquire_write(&self) -> MutexGuard<'_, Connection> {
        self.write_conn.lock().unwrap()
    }

    /// A concurrent-safe read connection. Callers should treat it as
    /// read-only; every mutation belongs on the write handle.
    pub fn reader(&self) -> Result<Connection> {
        let conn = match &self.location {
            StoreLocation::File(path) => Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?,
            StoreLocation::Memory(uri) => Connection::open_with_flags(
                uri,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
            )?,
        };
        conn.execute_batch("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Crash/close recovery: copy jobs caught mid-flight go back to Pending
    /// with one attempt refunded; instances in Error keep their message.
    pub fn recover(&self) -> Result<()> {
        let conn = self.acquire_write();
        let reset = conn.execute(
            "UPDATE CopyJobs
             SET Status = 'Pending',
                 AttemptCount = MAX(AttemptCount - 1, 0),
                 StartedUtc = NULL
             WHERE Status = 'InProgress'",
            [],
        )?;
        if reset > 0 {
            debug!("Recovered {} in-progress copy jobs to Pending", reset);
        }
        Ok(())
    }
}
