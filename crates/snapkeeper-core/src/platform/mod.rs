use crate::storage::models::RootType;
use std::fs::Metadata;
use std::path::Path;

/// Reparse points (junctions, symlinks) are never descended: a junction
/// pointing at an ancestor would otherwise loop the walk forever. The
/// metadata must come from `symlink_metadata`, which does not follow links.
pub fn is_reparse_point(metadata: &Metadata) -> bool {
    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;
        const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;
        if metadata.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0 {
            return true;
        }
    }
    metadata.file_type().is_symlink()
}

/// Best-effort volume classification for a scan root. Stored as a stable
/// tag; the walk itself never depends on it.
pub fn guess_root_type(path: &Path) -> RootType {
    let display = path.to_string_lossy();
    if display.starts_with("\\\\") || display.starts_with("//") {
        return RootType::Network;
    }
    #[cfg(unix)]
    {
        if display.starts_with("/media/")
            || display.starts_with("/run/media/")
            || display.starts_with("/Volumes/")
        {
            return RootType::Removable;
        }
        if display.starts_with('/') {
            return RootType::Fixed;
        }
    }
    #[cfg(windows)]
    {
        use std::path::{Component, Prefix};
        if let Some(Component::Prefix(prefix)) = path.components().next() {
            if matches!(prefix.kind(), Prefix::Disk(_) | Prefix::VerbatimDisk(_)) {
                return RootType::Fixed;
            }
        }
    }
    RootType::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_prefix_detected() {
        assert_eq!(guess_root_type(Path::new("//server/share")), RootType::Network);
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_paths_classified() {
        assert_eq!(guess_root_type(Path::new("/home/user/photos")), RootType::Fixed);
        assert_eq!(guess_root_type(Path::new("/media/usb0")), RootType::Removable);
    }
}
