mod walk;

pub use walk::{scan_roots, ScanOutcome};
