//! Builds the destination proposal: one unique file per distinct hash, a
//! date-based folder tree, and per-folder rollups. Every step is one SQL
//! statement executed atomically, so a crash between steps leaves a store
//! that the next plan run simply rebuilds.

use crate::error::Result;
use crate::storage::Store;
use rusqlite::params;
use tracing::{debug, info};

#[derive(Debug, Default, Clone)]
pub struct PlanSummary {
    pub unique_files: usize,
    pub folders: usize,
    pub duplicate_instances: i64,
    pub total_bytes: i64,
}

const WHY_YEAR: &str = "Year taken from the representative file's modified time (UTC)";
const WHY_MONTH: &str = "Month taken from the representative file's modified time (UTC)";
const WHY_UNKNOWN: &str = "No usable date on the representative file";

/// Rebuild the whole plan from the hashed instances.
pub fn build_plan(store: &Store) -> Result<PlanSummary> {
    clear_previous_plan(store)?;
    let unique_files = group_unique_files(store)?;
    let folders = build_folder_tree(store)?;
    assign_folders(store)?;
    roll_up(store)?;

    let (duplicate_instances, total_bytes) = {
        let conn = store.acquire_write();
        conn.query_row(
            "SELECT COALESCE(SUM(uf.DuplicateCount - 1), 0), COALESCE(SUM(h.SizeBytes), 0)
             FROM UniqueFiles uf JOIN Hashes h ON h.Id = uf.HashId",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?
    };

    info!(
        "Plan built: {} unique files in {} folders ({} duplicate instances)",
        unique_files, folders, duplicate_instances
    );
    Ok(PlanSummary {
        unique_files,
        folders,
        duplicate_instances,
        total_bytes,
    })
}

fn clear_previous_plan(store: &Store) -> Result<()> {
    let conn = store.acquire_write();
    // Copy jobs cascade off UniqueFiles.
    conn.execute("DELETE FROM UniqueFiles", [])?;
    conn.execute("DELETE FROM FolderNodes", [])?;
    Ok(())
}

/// One UniqueFile per distinct hash. The representative is the instance
/// with the shortest relative path, ties broken lexicographically, which
/// favours shallower and likely more curated locations.
fn group_unique_files(store: &Store) -> Result<usize> {
    let conn = store.acquire_write();
    let created = conn.execute(
        "INSERT INTO UniqueFiles
             (HashId, RepresentativeFileInstanceId, FileTypeCategory, CopyEnabled,
              PlannedFileName, DuplicateCount)
         SELECT grouped.HashId, grouped.RepId, rep.Category, 1, rep.FileName, grouped.Cnt
         FROM (
             SELECT fi.HashId AS HashId,
                    (SELECT fi2.Id FROM FileInstances fi2
                     WHERE fi2.HashId = fi.HashId
                       AND fi2.Status NOT IN ('FilteredOut', 'Error')
                     ORDER BY LENGTH(fi2.RelativePath) ASC, fi2.RelativePath ASC
                     LIMIT 1) AS RepId,
                    COUNT(*) AS Cnt
             FROM FileInstances fi
             WHERE fi.HashId IS NOT NULL
               AND fi.Status NOT IN ('FilteredOut', 'Error')
             GROUP BY fi.HashId
         ) AS grouped
         JOIN FileInstances rep ON rep.Id = grouped.RepId",
        [],
    )?;
    debug!("Plan: {} unique files grouped", created);
    Ok(created)
}

/// Year roots and month children, keyed (and deduplicated) by proposed
/// relative path. Representatives without a date land under `Unknown`.
fn build_folder_tree(store: &Store) -> Result<usize> {
    let conn = store.acquire_write();

    conn.execute(
        "INSERT OR IGNORE INTO FolderNodes
             (ParentId, DisplayName, ProposedRelativePath, WhyExplanation)
         SELECT NULL, substr(fi.ModifiedUtc, 1, 4), substr(fi.ModifiedUtc, 1, 4), ?1
         FROM UniqueFiles uf
         JOIN FileInstances fi ON fi.Id = uf.RepresentativeFileInstanceId
         WHERE fi.ModifiedUtc IS NOT NULL
         GROUP BY substr(fi.ModifiedUtc, 1, 4)",
        params![WHY_YEAR],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO FolderNodes
             (ParentId, DisplayName, ProposedRelativePath, WhyExplanation)
         SELECT parent.Id,
                substr(fi.ModifiedUtc, 1, 7),
                substr(fi.ModifiedUtc, 1, 4) || '/' || substr(fi.ModifiedUtc, 1, 7),
                ?1
         FROM UniqueFiles uf
         JOIN FileInstances fi ON fi.Id = uf.RepresentativeFileInstanceId
         JOIN FolderNodes parent ON parent.ProposedRelativePath = substr(fi.ModifiedUtc, 1, 4)
         WHERE fi.ModifiedUtc IS NOT NULL
         GROUP BY substr(fi.ModifiedUtc, 1, 7)",
        params![WHY_MONTH],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO FolderNodes
             (ParentId, DisplayName, ProposedRelativePath, WhyExplanation)
         SELECT NULL, 'Unknown', 'Unknown', ?1
         WHERE EXISTS (SELECT 1 FROM UniqueFiles uf
                       JOIN FileInstances fi ON fi.Id = uf.RepresentativeFileInstanceId
                       WHERE fi.ModifiedUtc IS NULL)",
        params![WHY_UNKNOWN],
    )?;

    let folders: i64 = conn.query_row("SELECT COUNT(*) FROM FolderNodes", [], |row| row.get(0))?;
    Ok(folders as usize)
}

fn assign_folders(store: &Store) -> Result<()> {
    let conn = store.acquire_write();
    conn.execute(
        "UPDATE UniqueFiles SET PlannedFolderNodeId = (
             SELECT fn.Id FROM FolderNodes fn
             JOIN FileInstances fi ON fi.Id = UniqueFiles.RepresentativeFileInstanceId
             WHERE fn.ProposedRelativePath = CASE
                 WHEN fi.ModifiedUtc IS NULL THEN 'Unknown'
                 ELSE substr(fi.ModifiedUtc, 1, 4) || '/' || substr(fi.ModifiedUtc, 1, 7)
             END
         )",
        [],
    )?;
    Ok(())
}

/// Leaf counts from the assigned unique files, then one aggregation pass
/// into the year roots (the tree is two levels deep by construction).
fn roll_up(store: &Store) -> Result<()> {
    let conn = store.acquire_write();
    conn.execute(
        "UPDATE FolderNodes SET
             UniqueCount = (SELECT COUNT(*) FROM UniqueFiles uf
                            WHERE uf.PlannedFolderNodeId = FolderNodes.Id),
             TotalSizeBytes = (SELECT COALESCE(SUM(h.SizeBytes), 0)
                               FROM UniqueFiles uf
                               JOIN Hashes h ON h.Id = uf.HashId
                               WHERE uf.PlannedFolderNodeId = FolderNodes.Id),
             DuplicateCount = (SELECT COALESCE(SUM(uf.DuplicateCount - 1), 0)
                               FROM UniqueFiles uf
                               WHERE uf.PlannedFolderNodeId = FolderNodes.Id)",
        [],
    )?;
    conn.execute(
        "UPDATE FolderNodes SET
             UniqueCount = UniqueCount +
                 (SELECT COALESCE(SUM(c.UniqueCount), 0)
                  FROM FolderNodes c WHERE c.ParentId = FolderNodes.Id),
             TotalSizeBytes = TotalSizeBytes +
                 (SELECT COALESCE(SUM(c.TotalSizeBytes), 0)
                  FROM FolderNodes c WHERE c.ParentId = FolderNodes.Id),
             DuplicateCount = DuplicateCount +
                 (SELECT COALESCE(SUM(c.DuplicateCount), 0)
                  FROM FolderNodes c WHERE c.ParentId = FolderNodes.Id)
         WHERE ParentId IS NULL",
        [],
    )?;
    Ok(())
}

/// User edit: folder display name. The proposed path is untouched; the
/// rename only affects what the front end shows.
pub fn rename_folder(store: &Store, folder_id: i64, name: &str) -> Result<()> {
    let conn = store.acquire_write();
    conn.execute(
        "UPDATE FolderNodes SET UserEditedName = ?1 WHERE Id = ?2",
        params![name, folder_id],
    )?;
    Ok(())
}

/// User edit: enable or disable a folder and its whole subtree, so copy-job
/// generation only ever consults a folder's own flag.
pub fn set_folder_enabled(store: &Store, folder_id: i64, enabled: bool) -> Result<usize> {
    let conn = store.acquire_write();
    let changed = conn.execute(
        "WITH RECURSIVE subtree(Id) AS (
             SELECT Id FROM FolderNodes WHERE Id = ?1
             UNION ALL
             SELECT fn.Id FROM FolderNodes fn JOIN subtree s ON fn.ParentId = s.Id
         )
         UPDATE FolderNodes SET CopyEnabled = ?2
         WHERE Id IN (SELECT Id FROM subtree)",
        params![folder_id, enabled],
    )?;
    Ok(changed)
}

/// User edit: include or exclude one unique file from the copy.
pub fn set_unique_file_enabled(store: &Store, unique_file_id: i64, enabled: bool) -> Result<()> {
    let conn = store.acquire_write();
    conn.execute(
        "UPDATE UniqueFiles SET CopyEnabled = ?1 WHERE Id = ?2",
        params![enabled, unique_file_id],
    )?;
    Ok(())
}
