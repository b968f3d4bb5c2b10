use serde::{Deserialize, Serialize};

/// Coarse media classification derived from the lowercase file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileCategory {
    Image,
    Movie,
    Audio,
    Document,
    Archive,
    Other,
}

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "heic", "heif", "webp", "raw", "cr2",
    "cr3", "nef", "arw", "dng", "orf", "rw2", "psd",
];

const MOVIE_EXTENSIONS: &[&str] = &[
    "mp4", "mov", "avi", "mkv", "wmv", "m4v", "mpg", "mpeg", "mts", "m2ts", "3gp", "webm", "flv",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "aac", "m4a", "ogg", "wma", "aiff", "opus",
];

const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "rtf", "odt",
];

const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"];

impl FileCategory {
    /// Classify by extension. Expects the extension already lowercased,
    /// without the leading dot.
    pub fn from_extension(ext: &str) -> Self {
        if IMAGE_EXTENSIONS.contains(&ext) {
            FileCategory::Image
        } else if MOVIE_EXTENSIONS.contains(&ext) {
            FileCategory::Movie
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            FileCategory::Audio
        } else if DOCUMENT_EXTENSIONS.contains(&ext) {
            FileCategory::Document
        } else if ARCHIVE_EXTENSIONS.contains(&ext) {
            FileCategory::Archive
        } else {
            FileCategory::Other
        }
    }

    /// All extensions belonging to this category.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            FileCategory::Image => IMAGE_EXTENSIONS,
            FileCategory::Movie => MOVIE_EXTENSIONS,
            FileCategory::Audio => AUDIO_EXTENSIONS,
            FileCategory::Document => DOCUMENT_EXTENSIONS,
            FileCategory::Archive => ARCHIVE_EXTENSIONS,
            FileCategory::Other => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Image => "Image",
            FileCategory::Movie => "Movie",
            FileCategory::Audio => "Audio",
            FileCategory::Document => "Document",
            FileCategory::Archive => "Archive",
            FileCategory::Other => "Other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Image" => FileCategory::Image,
            "Movie" => FileCategory::Movie,
            "Audio" => FileCategory::Audio,
            "Document" => FileCategory::Document,
            "Archive" => FileCategory::Archive,
            _ => FileCategory::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_common_extensions() {
        assert_eq!(FileCategory::from_extension("jpg"), FileCategory::Image);
        assert_eq!(FileCategory::from_extension("heic"), FileCategory::Image);
        assert_eq!(FileCategory::from_extension("mp4"), FileCategory::Movie);
        assert_eq!(FileCategory::from_extension("flac"), FileCategory::Audio);
        assert_eq!(FileCategory::from_extension("pdf"), FileCategory::Document);
        assert_eq!(FileCategory::from_extension("zip"), FileCategory::Archive);
        assert_eq!(FileCategory::from_extension("exe"), FileCategory::Other);
    }

    #[test]
    fn test_round_trip_labels() {
        for cat in [
            FileCategory::Image,
            FileCategory::Movie,
            FileCategory::Audio,
            FileCategory::Document,
            FileCategory::Archive,
            FileCategory::Other,
        ] {
            assert_eq!(FileCategory::parse(cat.as_str()), cat);
        }
    }
}
