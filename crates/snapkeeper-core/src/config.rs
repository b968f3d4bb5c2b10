use crate::category::FileCategory;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// The content hash chosen at project creation. Immutable for the lifetime
/// of a project; every row in the Hashes table carries the same algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashLevel {
    Sha1,
    Sha256,
    Sha3_256,
    /// Size + file name only. Preview scans; not authoritative.
    SizeName,
}

impl HashLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashLevel::Sha1 => "SHA1",
            HashLevel::Sha256 => "SHA256",
            HashLevel::Sha3_256 => "SHA3-256",
            HashLevel::SizeName => "SizeName",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SHA1" => Some(HashLevel::Sha1),
            "SHA256" => Some(HashLevel::Sha256),
            "SHA3-256" => Some(HashLevel::Sha3_256),
            "SizeName" => Some(HashLevel::SizeName),
            _ => None,
        }
    }

    pub fn is_authoritative(&self) -> bool {
        !matches!(self, HashLevel::SizeName)
    }
}

impl Default for HashLevel {
    fn default() -> Self {
        HashLevel::Sha256
    }
}

/// How aggressively the pipeline uses the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuProfile {
    Eco,
    Balanced,
    Fast,
    Max,
}

impl CpuProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            CpuProfile::Eco => "Eco",
            CpuProfile::Balanced => "Balanced",
            CpuProfile::Fast => "Fast",
            CpuProfile::Max => "Max",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Eco" => Some(CpuProfile::Eco),
            "Balanced" => Some(CpuProfile::Balanced),
            "Fast" => Some(CpuProfile::Fast),
            "Max" => Some(CpuProfile::Max),
            _ => None,
        }
    }

    pub fn hash_workers(&self) -> usize {
        let cores = num_cpus::get();
        match self {
            CpuProfile::Eco => 1,
            CpuProfile::Balanced => (cores / 4).max(1),
            CpuProfile::Fast => (cores * 3 / 4).max(1),
            CpuProfile::Max => cores.saturating_sub(1).max(1),
        }
    }

    pub fn copy_workers(&self) -> usize {
        match self {
            CpuProfile::Eco => 1,
            CpuProfile::Balanced | CpuProfile::Fast => 2,
            CpuProfile::Max => num_cpus::get().clamp(2, 4),
        }
    }

    /// Progress event cadence in events per second.
    pub fn update_cadence_hz(&self) -> u32 {
        match self {
            CpuProfile::Eco => 1,
            _ => 5,
        }
    }
}

impl Default for CpuProfile {
    fn default() -> Self {
        CpuProfile::Balanced
    }
}

/// Cheap candidate filters applied during enumeration, before anything is
/// persisted. Built once per scan from the project settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanFilter {
    pub enabled_categories: Vec<FileCategory>,
    pub min_size_bytes: Option<u64>,
    pub max_size_bytes: Option<u64>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            enabled_categories: vec![
                FileCategory::Image,
                FileCategory::Movie,
                FileCategory::Audio,
            ],
            min_size_bytes: None,
            max_size_bytes: None,
            ignore_patterns: Vec::new(),
        }
    }
}

impl ScanFilter {
    /// The active lowercase extension set for the enabled categories.
    pub fn extension_set(&self) -> HashSet<&'static str> {
        self.enabled_categories
            .iter()
            .flat_map(|c| c.extensions().iter().copied())
            .collect()
    }

    pub fn size_in_window(&self, size: u64) -> bool {
        if let Some(min) = self.min_size_bytes {
            if size < min {
                return false;
            }
        }
        if let Some(max) = self.max_size_bytes {
            if size > max {
                return false;
            }
        }
        true
    }
}

/// Engine tuning knobs. Channel capacities match the pipeline contract and
/// are overridable only for tests.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub hash_level: HashLevel,
    pub cpu_profile: CpuProfile,
    pub verify_after_copy: bool,
    pub movie_hash_chunk_mb: Option<u32>,
    pub filter: ScanFilter,
    pub scan_channel_capacity: usize,
    pub hash_channel_capacity: usize,
    pub copy_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hash_level: HashLevel::default(),
            cpu_profile: CpuProfile::default(),
            verify_after_copy: true,
            movie_hash_chunk_mb: None,
            filter: ScanFilter::default(),
            scan_channel_capacity: 50_000,
            hash_channel_capacity: 1_000,
            copy_channel_capacity: 100,
        }
    }
}

/// Remove directories that are subdirectories of other directories in the
/// list, so no file is enumerated twice.
pub fn non_overlapping_roots(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();

    for dir in dirs {
        let dir_path = Path::new(&dir);
        let mut should_add = true;

        result.retain(|kept| {
            let kept_path = Path::new(kept);
            if dir_path.starts_with(kept_path) {
                should_add = false;
            }
            !kept_path.starts_with(dir_path) || kept_path == dir_path
        });

        if should_add && !result.contains(&dir) {
            result.push(dir);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_worker_counts() {
        assert_eq!(CpuProfile::Eco.hash_workers(), 1);
        assert!(CpuProfile::Balanced.hash_workers() >= 1);
        assert!(CpuProfile::Max.hash_workers() >= 1);
        assert_eq!(CpuProfile::Eco.copy_workers(), 1);
        assert!(CpuProfile::Max.copy_workers() >= 2);
        assert_eq!(CpuProfile::Eco.update_cadence_hz(), 1);
        assert_eq!(CpuProfile::Fast.update_cadence_hz(), 5);
    }

    #[test]
    fn test_hash_level_round_trip() {
        for level in [
            HashLevel::Sha1,
            HashLevel::Sha256,
            HashLevel::Sha3_256,
            HashLevel::SizeName,
        ] {
            assert_eq!(HashLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(HashLevel::parse("MD5"), None);
    }

    #[test]
    fn test_filter_size_window() {
        let mut filter = ScanFilter::default();
        assert!(filter.size_in_window(0));
        filter.min_size_bytes = Some(10);
        filter.max_size_bytes = Some(100);
        assert!(!filter.size_in_window(9));
        assert!(filter.size_in_window(10));
        assert!(filter.size_in_window(100));
        assert!(!filter.size_in_window(101));
    }

    #[test]
    fn test_non_overlapping_with_subdirectory() {
        let dirs = vec![
            "/home/user".to_string(),
            "/home/user/docs".to_string(),
            "/var/data".to_string(),
        ];
        let result = non_overlapping_roots(dirs);
        assert_eq!(result.len(), 2);
        assert!(result.contains(&"/home/user".to_string()));
        assert!(result.contains(&"/var/data".to_string()));
    }

    #[test]
    fn test_non_overlapping_keeps_distinct() {
        let dirs = vec![
            "/home/user/photos".to_string(),
            "/home/user/docs".to_string(),
        ];
        let result = non_overlapping_roots(dirs);
        assert_eq!(result.len(), 2);
    }
}
