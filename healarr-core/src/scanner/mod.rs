//! Scanner Engine (spec §4.4): walks roots, dispatches the Detector
//! Adapter, and tracks per-scan progress with pause/resume/cancel.

pub mod engine;
pub mod walk;

pub use engine::{
    FileOutcome, NewScanFile, Scan, ScanEngine, ScanEngineConfig, ScanFile, ScanProgress,
    ScanRepository, ScanStatus,
};
pub use walk::{is_media_file, walk_media_files, MEDIA_EXTENSIONS, WalkResult};
