use super::models::*;
use super::sqlite::Store;
use crate::category::FileCategory;
use crate::config::{CpuProfile, HashLevel};
use crate::error::Result;
use crate::state::PipelineState;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

const INSERT_BATCH_SIZE: usize = 10_000;

pub fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn settings_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectSettings> {
    let categories_json: String = row.get(11)?;
    let enabled_categories: Vec<String> =
        serde_json::from_str(&categories_json).unwrap_or_default();
    Ok(ProjectSettings {
        project_name: row.get(0)?,
        hash_level: row.get(1)?,
        cpu_profile: row.get(2)?,
        target_path: row.get(3)?,
        current_state: row.get(4)?,
        verify_by_default: row.get(5)?,
        archive_scanning_enabled: row.get(6)?,
        archive_max_size_mb: row.get(7)?,
        archive_nested_enabled: row.get(8)?,
        archive_max_depth: row.get(9)?,
        movie_hash_chunk_size_mb: row.get(10)?,
        enabled_categories: enabled_categories
            .iter()
            .map(|s| FileCategory::parse(s))
            .collect(),
        created_utc: row.get(12)?,
        last_modified_utc: row.get(13)?,
        last_error: row.get(14)?,
    })
}

impl Store {
    // ── Project settings ─────────────────────────────────────────

    /// Create the single settings row if it does not exist yet. The hash
    /// algorithm is fixed here for the project's lifetime; reopening an
    /// existing project leaves it untouched.
    pub fn init_project(
        &self,
        name: &str,
        hash_level: HashLevel,
        cpu_profile: CpuProfile,
        categories: &[FileCategory],
    ) -> Result<()> {
        let labels: Vec<&str> = categories.iter().map(|c| c.as_str()).collect();
        let categories_json = serde_json::to_string(&labels).unwrap_or_else(|_| "[]".into());
        let now = now_utc();
        let conn = self.acquire_write();
        conn.execute(
            "INSERT INTO ProjectSettings
                 (Id, ProjectName, HashLevel, CpuProfile, EnabledCategories,
                  CreatedUtc, LastModifiedUtc)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(Id) DO NOTHING",
            params![name, hash_level.as_str(), cpu_profile.as_str(), categories_json, now],
        )?;
        Ok(())
    }

    pub fn load_settings(&self) -> Result<Option<ProjectSettings>> {
        let conn = self.acquire_write();
        let settings = conn
            .query_row(
                "SELECT ProjectName, HashLevel, CpuProfile, TargetPath, CurrentState,
                        VerifyByDefault, ArchiveScanningEnabled, ArchiveMaxSizeMB,
                        ArchiveNestedEnabled, ArchiveMaxDepth, MovieHashChunkSizeMB,
                        EnabledCategories, CreatedUtc, LastModifiedUtc, LastError
                 FROM ProjectSettings WHERE Id = 1",
                [],
                settings_from_row,
            )
            .optional()?;
        Ok(settings)
    }

    pub fn save_state(&self, state: PipelineState) -> Result<()> {
        let conn = self.acquire_write();
        conn.execute(
            "UPDATE ProjectSettings SET CurrentState = ?1, LastModifiedUtc = ?2 WHERE Id = 1",
            params![state.as_str(), now_utc()],
        )?;
        Ok(())
    }

    pub fn set_target_path(&self, target: &str) -> Result<()> {
        let conn = self.acquire_write();
        conn.execute(
            "UPDATE ProjectSettings SET TargetPath = ?1, LastModifiedUtc = ?2 WHERE Id = 1",
            params![target, now_utc()],
        )?;
        Ok(())
    }

    pub fn set_verify_by_default(&self, verify: bool) -> Result<()> {
        let conn = self.acquire_write();
        conn.execute(
            "UPDATE ProjectSettings SET VerifyByDefault = ?1, LastModifiedUtc = ?2 WHERE Id = 1",
            params![verify, now_utc()],
        )?;
        Ok(())
    }

    pub fn set_last_error(&self, message: Option<&str>) -> Result<()> {
        let conn = self.acquire_write();
        conn.execute(
            "UPDATE ProjectSettings SET LastError = ?1, LastModifiedUtc = ?2 WHERE Id = 1",
            params![message, now_utc()],
        )?;
        Ok(())
    }

    // ── Scan roots ───────────────────────────────────────────────

    pub fn add_root(&self, path: &str, label: Option<&str>, root_type: RootType) -> Result<i64> {
        let conn = self.acquire_write();
        conn.execute(
            "INSERT INTO ScanRoots (Path, Label, RootType, AddedUtc)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(Path) DO UPDATE SET IsEnabled = 1",
            params![path, label, root_type.as_str(), now_utc()],
        )?;
        let id = conn.query_row(
            "SELECT Id FROM ScanRoots WHERE Path = ?1",
            params![path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn list_roots(&self, enabled_only: bool) -> Result<Vec<ScanRoot>> {
        let conn = self.acquire_write();
        let sql = if enabled_only {
            "SELECT Id, Path, Label, RootType, IsEnabled, LastScanUtc, FileCount,
                    TotalBytes, AddedUtc
             FROM ScanRoots WHERE IsEnabled = 1 ORDER BY Id"
        } else {
            "SELECT Id, Path, Label, RootType, IsEnabled, LastScanUtc, FileCount,
                    TotalBytes, AddedUtc
             FROM ScanRoots ORDER BY Id"
        };
        let mut stmt = conn.prepare(sql)?;
        let roots = stmt
            .query_map([], |row| {
                Ok(ScanRoot {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    label: row.get(2)?,
                    root_type: RootType::parse(&row.get::<_, String>(3)?),
                    is_enabled: row.get(4)?,
                    last_scan_utc: row.get(5)?,
                    file_count: row.get(6)?,
                    total_bytes: row.get(7)?,
                    added_utc: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(roots)
    }

    pub fn set_root_enabled(&self, root_id: i64, enabled: bool) -> Result<()> {
        let conn = self.acquire_write();
        conn.execute(
            "UPDATE ScanRoots SET IsEnabled = ?1 WHERE Id = ?2",
            params![enabled, root_id],
        )?;
        Ok(())
    }

    /// Refresh a root's file count / byte total / last-scan stamp from its
    /// instances.
    pub fn update_root_stats(&self, root_id: i64) -> Result<()> {
        let conn = self.acquire_write();
        conn.execute(
            "UPDATE ScanRoots SET
                 FileCount = (SELECT COUNT(*) FROM FileInstances WHERE ScanRootId = ?1),
                 TotalBytes = (SELECT COALESCE(SUM(SizeBytes), 0)
                               FROM FileInstances WHERE ScanRootId = ?1),
                 LastScanUtc = ?2
             WHERE Id = ?1",
            params![root_id, now_utc()],
        )?;
        Ok(())
    }

    // ── File instances ───────────────────────────────────────────

    /// Insert candidates in transactions of up to 10 000 rows with one
    /// cached statement. `(ScanRootId, RelativePath)` collisions are
    /// silently ignored so rescans are safe. Returns the number actually
    /// inserted.
    pub fn batch_insert_candidates(&self, candidates: &[Candidate]) -> Result<usize> {
        let mut conn = self.acquire_write();
        let mut inserted = 0usize;
        for chunk in candidates.chunks(INSERT_BATCH_SIZE) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO FileInstances
                         (ScanRootId, RelativePath, FileName, Extension, SizeBytes,
                          ModifiedUtc, Status, Category, DiscoveredUtc)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'Discovered', ?7, ?8)
                     ON CONFLICT(ScanRootId, RelativePath) DO NOTHING",
                )?;
                let now = now_utc();
                for candidate in chunk {
                    inserted += stmt.execute(params![
                        candidate.scan_root_id,
                        candidate.relative_path,
                        candidate.file_name,
                        candidate.extension,
                        candidate.size_bytes,
                        candidate.modified_utc,
                        candidate.category.as_str(),
                        now,
                    ])?;
                }
            }
            tx.commit()?;
        }
        debug!("Inserted {} of {} candidates", inserted, candidates.len());
        Ok(inserted)
    }

    /// Everything still needing a content hash, largest first so the long
    /// tail parallelizes. Runs on its own read connection.
    pub fn hash_work_items(&self) -> Result<Vec<HashWorkItem>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT fi.Id, sr.Path, fi.RelativePath, fi.FileName, fi.SizeBytes, fi.Category
             FROM FileInstances fi
             JOIN ScanRoots sr ON sr.Id = fi.ScanRootId
             WHERE fi.Status IN ('Discovered', 'HashPending') AND fi.HashId IS NULL
             ORDER BY fi.SizeBytes DESC",
        )?;
        let items = stmt
            .query_map([], |row| {
                let root: String = row.get(1)?;
                let rel: String = row.get(2)?;
                Ok(HashWorkItem {
                    instance_id: row.get(0)?,
                    absolute_path: Path::new(&root).join(&rel).to_string_lossy().into_owned(),
                    file_name: row.get(3)?,
                    size_bytes: row.get(4)?,
                    category: FileCategory::parse(&row.get::<_, String>(5)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn update_status(&self, instance_id: i64, status: FileStatus) -> Result<()> {
        let conn = self.acquire_write();
        conn.execute(
            "UPDATE FileInstances SET Status = ?1 WHERE Id = ?2",
            params![status.as_str(), instance_id],
        )?;
        Ok(())
    }

    pub fn set_hash(&self, instance_id: i64, hash_id: i64) -> Result<()> {
        let conn = self.acquire_write();
        conn.execute(
            "UPDATE FileInstances SET HashId = ?1, Status = 'Hashed' WHERE Id = ?2",
            params![hash_id, instance_id],
        )?;
        Ok(())
    }

    /// Batched form used by the writer actor: one transaction for a run of
    /// hash assignments.
    pub fn apply_hash_updates(&self, updates: &[(i64, i64)]) -> Result<()> {
        let mut conn = self.acquire_write();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE FileInstances SET HashId = ?1, Status = 'Hashed' WHERE Id = ?2",
            )?;
            for (instance_id, hash_id) in updates {
                stmt.execute(params![hash_id, instance_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Batched HashPending marks from the writer actor. Only Discovered
    /// rows move; anything the worker already finished keeps its status.
    pub fn apply_hash_pending_marks(&self, instance_ids: &[i64]) -> Result<()> {
        let mut conn = self.acquire_write();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE FileInstances SET Status = 'HashPending'
                 WHERE Id = ?1 AND Status = 'Discovered'",
            )?;
            for instance_id in instance_ids {
                stmt.execute(params![instance_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn apply_error_updates(&self, updates: &[(i64, String)]) -> Result<()> {
        let mut conn = self.acquire_write();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE FileInstances SET Status = 'Error', ErrorMessage = ?1 WHERE Id = ?2",
            )?;
            for (instance_id, message) in updates {
                stmt.execute(params![message, instance_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Re-mark instances against the current extension set after the user
    /// narrows categories. Does not touch hashes.
    pub fn refilter_instances(&self, active_extensions: &[&str]) -> Result<usize> {
        let json = serde_json::to_string(active_extensions).unwrap_or_else(|_| "[]".into());
        let conn = self.acquire_write();
        let filtered = conn.execute(
            "UPDATE FileInstances SET Status = 'FilteredOut'
             WHERE Status IN ('Discovered', 'Hashed')
               AND Extension NOT IN (SELECT value FROM json_each(?1))",
            params![json],
        )?;
        let restored = conn.execute(
            "UPDATE FileInstances
             SET Status = CASE WHEN HashId IS NULL THEN 'Discovered' ELSE 'Hashed' END
             WHERE Status = 'FilteredOut'
               AND Extension IN (SELECT value FROM json_each(?1))",
            params![json],
        )?;
        Ok(filtered + restored)
    }

    // ── Rescan ───────────────────────────────────────────────────

    /// Drop a root's instances ahead of a rescan. The plan is invalidated
    /// wholesale (topology changed), so unique files, folder nodes and copy
    /// jobs go too. Hash assignments are snapshotted first keyed on
    /// `(RelativePath, SizeBytes, ModifiedUtc)` so unchanged files get them
    /// back without re-hashing.
    pub fn clear_root(&self, root_id: i64) -> Result<()> {
        let mut conn = self.acquire_write();
        let tx = conn.transaction()?;
        tx.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS PrevHashes (
                 ScanRootId INTEGER NOT NULL,
                 RelativePath TEXT NOT NULL,
                 SizeBytes INTEGER NOT NULL,
                 ModifiedUtc TEXT,
                 HashId INTEGER NOT NULL
             )",
        )?;
        tx.execute("DELETE FROM PrevHashes WHERE ScanRootId = ?1", params![root_id])?;
        tx.execute(
            "INSERT INTO PrevHashes (ScanRootId, RelativePath, SizeBytes, ModifiedUtc, HashId)
             SELECT ScanRootId, RelativePath, SizeBytes, ModifiedUtc, HashId
             FROM FileInstances
             WHERE ScanRootId = ?1 AND HashId IS NOT NULL",
            params![root_id],
        )?;
        tx.execute("DELETE FROM CopyJobs", [])?;
        tx.execute("DELETE FROM UniqueFiles", [])?;
        tx.execute("DELETE FROM FolderNodes", [])?;
        let dropped = tx.execute(
            "DELETE FROM FileInstances WHERE ScanRootId = ?1",
            params![root_id],
        )?;
        tx.commit()?;
        info!("Cleared {} instances under root {}", dropped, root_id);
        Ok(())
    }

    /// After re-enumeration, hand unchanged instances their previous hash
    /// so the hash stage skips them. Returns the number re-attached.
    pub fn reattach_hashes(&self, root_id: i64) -> Result<usize> {
        let conn = self.acquire_write();
        let reattached = conn.execute(
            "UPDATE FileInstances SET
                 HashId = (SELECT p.HashId FROM PrevHashes p
                           WHERE p.ScanRootId = FileInstances.ScanRootId
                             AND p.RelativePath = FileInstances.RelativePath
                             AND p.SizeBytes = FileInstances.SizeBytes
                             AND p.ModifiedUtc IS FileInstances.ModifiedUtc),
                 Status = 'Hashed'
             WHERE ScanRootId = ?1
               AND EXISTS (SELECT 1 FROM PrevHashes p
                           WHERE p.ScanRootId = FileInstances.ScanRootId
                             AND p.RelativePath = FileInstances.RelativePath
                             AND p.SizeBytes = FileInstances.SizeBytes
                             AND p.ModifiedUtc IS FileInstances.ModifiedUtc)",
            params![root_id],
        )?;
        conn.execute("DELETE FROM PrevHashes WHERE ScanRootId = ?1", params![root_id])?;
        if reattached > 0 {
            debug!("Re-attached {} cached hashes under root {}", reattached, root_id);
        }
        Ok(reattached)
    }

    /// Hash rows no instance references any more. Only called on rescan.
    pub fn prune_orphan_hashes(&self) -> Result<usize> {
        let conn = self.acquire_write();
        let pruned = conn.execute(
            "DELETE FROM Hashes
             WHERE Id NOT IN (SELECT HashId FROM FileInstances WHERE HashId IS NOT NULL)",
            [],
        )?;
        if pruned > 0 {
            info!("Pruned {} orphaned hash rows", pruned);
        }
        Ok(pruned)
    }

    // ── Hashes ───────────────────────────────────────────────────

    /// Insert-or-fetch in a single round trip. Two workers racing on the
    /// same digest both land on the same row id.
    pub fn get_or_create_hash(
        &self,
        algorithm: &str,
        bytes: &[u8],
        hex: &str,
        size_bytes: i64,
        partial_info: Option<&str>,
    ) -> Result<i64> {
        let conn = self.acquire_write();
        let id = conn.query_row(
            "INSERT INTO Hashes
                 (HashAlgorithm, HashBytes, HashHex, SizeBytes, PartialHashInfo, ComputedUtc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(HashBytes) DO UPDATE SET HashBytes = excluded.HashBytes
             RETURNING Id",
            params![algorithm, bytes, hex, size_bytes, partial_info, now_utc()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn hash_count(&self) -> Result<i64> {
        let conn = self.acquire_write();
        let count = conn.query_row("SELECT COUNT(*) FROM Hashes", [], |row| row.get(0))?;
        Ok(count)
    }

    // ── Copy jobs ────────────────────────────────────────────────

    pub fn purge_copy_jobs(&self) -> Result<()> {
        let conn = self.acquire_write();
        conn.execute("DELETE FROM CopyJobs", [])?;
        Ok(())
    }

    /// One Pending job per copy-enabled unique file in an enabled folder.
    /// Disable cascades happened at edit time, so a folder's own flag is
    /// authoritative here. Returns (job count, total bytes to copy).
    pub fn create_jobs_from_plan(&self, target_path: &str) -> Result<(usize, u64)> {
        let mut conn = self.acquire_write();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM CopyJobs", [])?;
        let created = tx.execute(
            "INSERT INTO CopyJobs (UniqueFileId, DestinationFullPath, Status)
             SELECT uf.Id,
                    ?1 || '/' || fn.ProposedRelativePath || '/' || uf.PlannedFileName,
                    'Pending'
             FROM UniqueFiles uf
             JOIN FolderNodes fn ON fn.Id = uf.PlannedFolderNodeId
             WHERE uf.CopyEnabled = 1 AND fn.CopyEnabled = 1",
            params![target_path],
        )?;
        tx.execute(
            "UPDATE FileInstances SET Status = 'CopyPlanned'
             WHERE Id IN (SELECT RepresentativeFileInstanceId FROM UniqueFiles uf
                          JOIN FolderNodes fn ON fn.Id = uf.PlannedFolderNodeId
                          WHERE uf.CopyEnabled = 1 AND fn.CopyEnabled = 1)",
            [],
        )?;
        let total_bytes: i64 = tx.query_row(
            "SELECT COALESCE(SUM(h.SizeBytes), 0)
             FROM CopyJobs cj
             JOIN UniqueFiles uf ON uf.Id = cj.UniqueFileId
             JOIN Hashes h ON h.Id = uf.HashId",
            [],
            |row| row.get(0),
        )?;
        tx.commit()?;
        info!("Created {} copy jobs ({} bytes)", created, total_bytes);
        Ok((created, total_bytes as u64))
    }

    /// Atomically select up to `limit` Pending jobs, mark them InProgress
    /// and return their join-projected detail. This is the only supported
    /// way for a worker to obtain work; a read followed by a separate
    /// update would double-process jobs.
    pub fn claim_pending_jobs(&self, limit: usize) -> Result<Vec<CopyJobDetail>> {
        let mut conn = self.acquire_write();
        let tx = conn.transaction()?;
        let ids: Vec<i64> = {
            let mut stmt = tx.prepare_cached(
                "SELECT Id FROM CopyJobs WHERE Status = 'Pending' ORDER BY Id LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        let now = now_utc();
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE CopyJobs
                 SET Status = 'InProgress', StartedUtc = ?1, AttemptCount = AttemptCount + 1
                 WHERE Id = ?2",
            )?;
            for id in &ids {
                stmt.execute(params![now, id])?;
            }
        }
        let mut details = Vec::with_capacity(ids.len());
        {
            let mut stmt = tx.prepare_cached(
                "SELECT cj.Id, cj.UniqueFileId, cj.DestinationFullPath, cj.AttemptCount,
                        sr.Path, fi.RelativePath, fi.SizeBytes, fi.ModifiedUtc, h.HashHex,
                        h.PartialHashInfo
                 FROM CopyJobs cj
                 JOIN UniqueFiles uf ON uf.Id = cj.UniqueFileId
                 JOIN FileInstances fi ON fi.Id = uf.RepresentativeFileInstanceId
                 JOIN ScanRoots sr ON sr.Id = fi.ScanRootId
                 JOIN Hashes h ON h.Id = uf.HashId
                 WHERE cj.Id = ?1",
            )?;
            for id in &ids {
                let detail = stmt.query_row(params![id], |row| {
                    let root: String = row.get(4)?;
                    let rel: String = row.get(5)?;
                    Ok(CopyJobDetail {
                        job_id: row.get(0)?,
                        unique_file_id: row.get(1)?,
                        destination_full_path: row.get(2)?,
                        attempt_count: row.get(3)?,
                        source_absolute_path: Path::new(&root)
                            .join(&rel)
                            .to_string_lossy()
                            .into_owned(),
                        size_bytes: row.get(6)?,
                        source_modified_utc: row.get(7)?,
                        hash_hex: row.get(8)?,
                        partial_hash_info: row.get(9)?,
                    })
                })?;
                details.push(detail);
            }
        }
        tx.commit()?;
        // Largest first within the batch; across batches order follows id.
        details.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
        Ok(details)
    }

    pub fn record_job_retry(&self, job_id: i64) -> Result<i64> {
        let conn = self.acquire_write();
        conn.execute(
            "UPDATE CopyJobs SET AttemptCount = AttemptCount + 1 WHERE Id = ?1",
            params![job_id],
        )?;
        let attempts = conn.query_row(
            "SELECT AttemptCount FROM CopyJobs WHERE Id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(attempts)
    }

    /// Terminal success. `actual_destination` may differ from the planned
    /// path when conflict resolution renamed the file.
    pub fn mark_job_copied(
        &self,
        job_id: i64,
        actual_destination: &str,
        verified: bool,
    ) -> Result<()> {
        let status = if verified { "Verified" } else { "Copied" };
        let now = now_utc();
        let mut conn = self.acquire_write();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE CopyJobs
             SET Status = ?1, DestinationFullPath = ?2, CompletedUtc = ?3, LastError = NULL
             WHERE Id = ?4",
            params![status, actual_destination, now, job_id],
        )?;
        tx.execute(
            "UPDATE UniqueFiles SET
                 CopiedUtc = ?1,
                 VerifiedUtc = CASE WHEN ?2 THEN ?1 ELSE VerifiedUtc END
             WHERE Id = (SELECT UniqueFileId FROM CopyJobs WHERE Id = ?3)",
            params![now, verified, job_id],
        )?;
        tx.execute(
            "UPDATE FileInstances SET Status = ?1
             WHERE Id = (SELECT uf.RepresentativeFileInstanceId
                         FROM UniqueFiles uf
                         JOIN CopyJobs cj ON cj.UniqueFileId = uf.Id
                         WHERE cj.Id = ?2)",
            params![status, job_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn mark_job_skipped(&self, job_id: i64, reason: &str) -> Result<()> {
        let conn = self.acquire_write();
        conn.execute(
            "UPDATE CopyJobs
             SET Status = 'Skipped', LastError = ?1, CompletedUtc = ?2
             WHERE Id = ?3",
            params![reason, now_utc(), job_id],
        )?;
        Ok(())
    }

    pub fn mark_job_error(&self, job_id: i64, message: &str) -> Result<()> {
        let conn = self.acquire_write();
        conn.execute(
            "UPDATE CopyJobs
             SET Status = 'Error', LastError = ?1, CompletedUtc = ?2
             WHERE Id = ?3",
            params![message, now_utc(), job_id],
        )?;
        Ok(())
    }

    /// Cancellation leaves workers' jobs InProgress; this puts them back so
    /// a resume picks them up with one attempt refunded.
    pub fn reset_in_progress_to_pending(&self) -> Result<usize> {
        let conn = self.acquire_write();
        let reset = conn.execute(
            "UPDATE CopyJobs
             SET Status = 'Pending',
                 AttemptCount = MAX(AttemptCount - 1, 0),
                 StartedUtc = NULL
             WHERE Status = 'InProgress'",
            [],
        )?;
        Ok(reset)
    }

    pub fn pending_job_count(&self) -> Result<i64> {
        let conn = self.acquire_write();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM CopyJobs WHERE Status = 'Pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn failed_jobs(&self) -> Result<Vec<FailedJobInfo>> {
        let conn = self.acquire_write();
        let mut stmt = conn.prepare(
            "SELECT cj.Id, cj.DestinationFullPath, sr.Path, fi.RelativePath,
                    cj.AttemptCount, cj.LastError
             FROM CopyJobs cj
             JOIN UniqueFiles uf ON uf.Id = cj.UniqueFileId
             JOIN FileInstances fi ON fi.Id = uf.RepresentativeFileInstanceId
             JOIN ScanRoots sr ON sr.Id = fi.ScanRootId
             WHERE cj.Status = 'Error'
             ORDER BY cj.Id",
        )?;
        let jobs = stmt
            .query_map([], |row| {
                let root: String = row.get(2)?;
                let rel: String = row.get(3)?;
                Ok(FailedJobInfo {
                    job_id: row.get(0)?,
                    destination_full_path: row.get(1)?,
                    source_absolute_path: Path::new(&root)
                        .join(&rel)
                        .to_string_lossy()
                        .into_owned(),
                    attempt_count: row.get(4)?,
                    last_error: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Completed jobs the verification pass re-checks.
    pub fn jobs_to_verify(&self) -> Result<Vec<CopyJobDetail>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT cj.Id, cj.UniqueFileId, cj.DestinationFullPath, cj.AttemptCount,
                    sr.Path, fi.RelativePath, fi.SizeBytes, fi.ModifiedUtc, h.HashHex,
                    h.PartialHashInfo
             FROM CopyJobs cj
             JOIN UniqueFiles uf ON uf.Id = cj.UniqueFileId
             JOIN FileInstances fi ON fi.Id = uf.RepresentativeFileInstanceId
             JOIN ScanRoots sr ON sr.Id = fi.ScanRootId
             JOIN Hashes h ON h.Id = uf.HashId
             WHERE cj.Status IN ('Copied', 'Verified')
             ORDER BY cj.Id",
        )?;
        let jobs = stmt
            .query_map([], |row| {
                let root: String = row.get(4)?;
                let rel: String = row.get(5)?;
                Ok(CopyJobDetail {
                    job_id: row.get(0)?,
                    unique_file_id: row.get(1)?,
                    destination_full_path: row.get(2)?,
                    attempt_count: row.get(3)?,
                    source_absolute_path: Path::new(&root)
                        .join(&rel)
                        .to_string_lossy()
                        .into_owned(),
                    size_bytes: row.get(6)?,
                    source_modified_utc: row.get(7)?,
                    hash_hex: row.get(8)?,
                    partial_hash_info: row.get(9)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn insert_verification_result(
        &self,
        job_id: i64,
        outcome: &str,
        was_renamed: bool,
        source_hex: Option<&str>,
        destination_hex: Option<&str>,
    ) -> Result<()> {
        let conn = self.acquire_write();
        conn.execute(
            "INSERT INTO VerificationResults
                 (CopyJobId, Outcome, WasRenamed, SourceHashHex, DestinationHashHex, CheckedUtc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![job_id, outcome, was_renamed, source_hex, destination_hex, now_utc()],
        )?;
        Ok(())
    }

    // ── Folder tree / summaries ──────────────────────────────────

    pub fn folder_tree(&self) -> Result<Vec<FolderNode>> {
        let conn = self.acquire_write();
        let mut stmt = conn.prepare(
            "SELECT Id, ParentId, DisplayName, ProposedRelativePath, UserEditedName,
                    CopyEnabled, UniqueCount, DuplicateCount, TotalSizeBytes, WhyExplanation
             FROM FolderNodes ORDER BY ProposedRelativePath",
        )?;
        let nodes = stmt
            .query_map([], |row| {
                Ok(FolderNode {
                    id: row.get(0)?,
                    parent_id: row.get(1)?,
                    display_name: row.get(2)?,
                    proposed_relative_path: row.get(3)?,
                    user_edited_name: row.get(4)?,
                    copy_enabled: row.get(5)?,
                    unique_count: row.get(6)?,
                    duplicate_count: row.get(7)?,
                    total_size_bytes: row.get(8)?,
                    why_explanation: row.get(9)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Paginated unique-file listing for review UIs, widest duplication
    /// first.
    pub fn list_unique_files(&self, offset: i64, limit: i64) -> Result<Vec<UniqueFileListing>> {
        let conn = self.acquire_write();
        let mut stmt = conn.prepare(
            "SELECT uf.Id, uf.PlannedFileName, uf.FileTypeCategory, uf.DuplicateCount,
                    uf.CopyEnabled, h.HashHex, h.SizeBytes, fn.ProposedRelativePath,
                    sr.Path, fi.RelativePath
             FROM UniqueFiles uf
             JOIN Hashes h ON h.Id = uf.HashId
             JOIN FileInstances fi ON fi.Id = uf.RepresentativeFileInstanceId
             JOIN ScanRoots sr ON sr.Id = fi.ScanRootId
             LEFT JOIN FolderNodes fn ON fn.Id = uf.PlannedFolderNodeId
             ORDER BY uf.DuplicateCount DESC, h.SizeBytes DESC
             LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt
            .query_map(params![limit, offset], |row| {
                let root: String = row.get(8)?;
                let rel: String = row.get(9)?;
                Ok(UniqueFileListing {
                    unique_file_id: row.get(0)?,
                    planned_file_name: row.get(1)?,
                    category: FileCategory::parse(&row.get::<_, String>(2)?),
                    duplicate_count: row.get(3)?,
                    copy_enabled: row.get(4)?,
                    hash_hex: row.get(5)?,
                    size_bytes: row.get(6)?,
                    planned_folder_path: row.get(7)?,
                    representative_path: Path::new(&root)
                        .join(&rel)
                        .to_string_lossy()
                        .into_owned(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every instance sharing a unique file's hash, the representative
    /// included.
    pub fn instances_for_unique_file(&self, unique_file_id: i64) -> Result<Vec<String>> {
        let conn = self.acquire_write();
        let mut stmt = conn.prepare(
            "SELECT sr.Path, fi.RelativePath
             FROM FileInstances fi
             JOIN ScanRoots sr ON sr.Id = fi.ScanRootId
             WHERE fi.HashId = (SELECT HashId FROM UniqueFiles WHERE Id = ?1)
             ORDER BY LENGTH(fi.RelativePath), fi.RelativePath",
        )?;
        let paths = stmt
            .query_map(params![unique_file_id], |row| {
                let root: String = row.get(0)?;
                let rel: String = row.get(1)?;
                Ok(Path::new(&root).join(&rel).to_string_lossy().into_owned())
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }

    pub fn project_summary(&self) -> Result<ProjectSummary> {
        let conn = self.acquire_write();
        let (total_instances, discovered, hashed, errored, total_bytes) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(Status = 'Discovered'), 0),
                    COALESCE(SUM(Status IN ('Hashed', 'CopyPlanned', 'Copied', 'Verified')), 0),
                    COALESCE(SUM(Status = 'Error'), 0),
                    COALESCE(SUM(SizeBytes), 0)
             FROM FileInstances",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )?;
        let (unique_files, unique_bytes) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(h.SizeBytes), 0)
             FROM UniqueFiles uf JOIN Hashes h ON h.Id = uf.HashId",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        let duplicate_instances = conn.query_row(
            "SELECT COALESCE(SUM(DuplicateCount - 1), 0) FROM UniqueFiles",
            [],
            |row| row.get(0),
        )?;
        Ok(ProjectSummary {
            total_instances,
            discovered,
            hashed,
            errored,
            unique_files,
            duplicate_instances,
            total_bytes,
            unique_bytes,
        })
    }
}

/// Read-side helper for tests and tooling: list a root's instances.
pub fn instances_for_root(conn: &Connection, root_id: i64) -> Result<Vec<FileInstance>> {
    let mut stmt = conn.prepare(
        "SELECT Id, ScanRootId, RelativePath, FileName, Extension, SizeBytes, ModifiedUtc,
                Status, Category, HashId, DiscoveredUtc, ErrorMessage
         FROM FileInstances WHERE ScanRootId = ?1 ORDER BY RelativePath",
    )?;
    let rows = stmt
        .query_map(params![root_id], |row| {
            Ok(FileInstance {
                id: row.get(0)?,
                scan_root_id: row.get(1)?,
                relative_path: row.get(2)?,
                file_name: row.get(3)?,
                extension: row.get(4)?,
                size_bytes: row.get(5)?,
                modified_utc: row.get(6)?,
                status: FileStatus::parse(&row.get::<_, String>(7)?),
                category: FileCategory::parse(&row.get::<_, String>(8)?),
                hash_id: row.get(9)?,
                discovered_utc: row.get(10)?,
                error_message: row.get(11)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
