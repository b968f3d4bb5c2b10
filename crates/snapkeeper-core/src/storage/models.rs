use crate::category::FileCategory;

/// Pipeline status of one discovered file occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Discovered,
    FilteredOut,
    HashPending,
    Hashed,
    CopyPlanned,
    Copied,
    Verified,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Discovered => "Discovered",
            FileStatus::FilteredOut => "FilteredOut",
            FileStatus::HashPending => "HashPending",
            FileStatus::Hashed => "Hashed",
            FileStatus::CopyPlanned => "CopyPlanned",
            FileStatus::Copied => "Copied",
            FileStatus::Verified => "Verified",
            FileStatus::Error => "Error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Discovered" => FileStatus::Discovered,
            "FilteredOut" => FileStatus::FilteredOut,
            "HashPending" => FileStatus::HashPending,
            "Hashed" => FileStatus::Hashed,
            "CopyPlanned" => FileStatus::CopyPlanned,
            "Copied" => FileStatus::Copied,
            "Verified" => FileStatus::Verified,
            _ => FileStatus::Error,
        }
    }
}

/// Stable tag for the volume a scan root lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootType {
    Fixed,
    Removable,
    Network,
    Optical,
    Unknown,
}

impl RootType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootType::Fixed => "Fixed",
            RootType::Removable => "Removable",
            RootType::Network => "Network",
            RootType::Optical => "Optical",
            RootType::Unknown => "Unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Fixed" => RootType::Fixed,
            "Removable" => RootType::Removable,
            "Network" => RootType::Network,
            "Optical" => RootType::Optical,
            _ => RootType::Unknown,
        }
    }
}

/// The single ProjectSettings row.
#[derive(Debug, Clone)]
pub struct ProjectSettings {
    pub project_name: String,
    pub hash_level: String,
    pub cpu_profile: String,
    pub target_path: Option<String>,
    pub current_state: String,
    pub verify_by_default: bool,
    pub archive_scanning_enabled: bool,
    pub archive_max_size_mb: i64,
    pub archive_nested_enabled: bool,
    pub archive_max_depth: i64,
    pub movie_hash_chunk_size_mb: Option<i64>,
    pub enabled_categories: Vec<FileCategory>,
    pub created_utc: String,
    pub last_modified_utc: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScanRoot {
    pub id: i64,
    pub path: String,
    pub label: Option<String>,
    pub root_type: RootType,
    pub is_enabled: bool,
    pub last_scan_utc: Option<String>,
    pub file_count: i64,
    pub total_bytes: i64,
    pub added_utc: String,
}

/// A candidate produced by the enumerator, not yet persisted.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub scan_root_id: i64,
    pub relative_path: String,
    pub file_name: String,
    pub extension: String,
    pub size_bytes: i64,
    pub modified_utc: Option<String>,
    pub category: FileCategory,
}

#[derive(Debug, Clone)]
pub struct FileInstance {
    pub id: i64,
    pub scan_root_id: i64,
    pub relative_path: String,
    pub file_name: String,
    pub extension: String,
    pub size_bytes: i64,
    pub modified_utc: Option<String>,
    pub status: FileStatus,
    pub category: FileCategory,
    pub hash_id: Option<i64>,
    pub discovered_utc: String,
    pub error_message: Option<String>,
}

/// What a hash worker needs to process one file.
#[derive(Debug, Clone)]
pub struct HashWorkItem {
    pub instance_id: i64,
    pub absolute_path: String,
    pub file_name: String,
    pub size_bytes: i64,
    pub category: FileCategory,
}

#[derive(Debug, Clone)]
pub struct FolderNode {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub display_name: String,
    pub proposed_relative_path: String,
    pub user_edited_name: Option<String>,
    pub copy_enabled: bool,
    pub unique_count: i64,
    pub duplicate_count: i64,
    pub total_size_bytes: i64,
    pub why_explanation: Option<String>,
}

/// Join-projected detail a copy worker receives from a claim.
#[derive(Debug, Clone)]
pub struct CopyJobDetail {
    pub job_id: i64,
    pub unique_file_id: i64,
    pub destination_full_path: String,
    pub attempt_count: i64,
    pub source_absolute_path: String,
    pub size_bytes: i64,
    pub hash_hex: String,
    pub partial_hash_info: Option<String>,
    pub source_modified_utc: Option<String>,
}

/// One row of the paginated unique-file review listing.
#[derive(Debug, Clone)]
pub struct UniqueFileListing {
    pub unique_file_id: i64,
    pub planned_file_name: Option<String>,
    pub category: FileCategory,
    pub duplicate_count: i64,
    pub copy_enabled: bool,
    pub hash_hex: String,
    pub size_bytes: i64,
    pub planned_folder_path: Option<String>,
    pub representative_path: String,
}

/// One entry of the failed-job report for the current copy session.
#[derive(Debug, Clone)]
pub struct FailedJobInfo {
    pub job_id: i64,
    pub destination_full_path: String,
    pub source_absolute_path: String,
    pub attempt_count: i64,
    pub last_error: Option<String>,
}

/// Per-status instance counts plus byte totals for the status display.
#[derive(Debug, Clone, Default)]
pub struct ProjectSummary {
    pub total_instances: i64,
    pub discovered: i64,
    pub hashed: i64,
    pub errored: i64,
    pub unique_files: i64,
    pub duplicate_instances: i64,
    pub total_bytes: i64,
    pub unique_bytes: i64,
}
