//! Encoding detection and conversion for single files and whole trees.
//!
//! [`convert::ConversionEngine`] converts one file at a time;
//! [`batch::BatchOrchestrator`] drives it over many files in bounded
//! parallel waves. Every conversion that rewrites a file can leave a
//! `<file>.bak` copy behind, which [`backup::BackupManager`] restores.

pub mod backup;
pub mod batch;
pub mod classify;
pub mod codec;
pub mod config;
pub mod convert;
pub mod detect;
pub mod encoding;
pub mod files;
pub mod host;
pub mod logging;
pub mod report;
pub mod storage;

pub use batch::{BatchOrchestrator, BatchResult};
pub use convert::{ConversionEngine, ConversionResult, LargeFilePolicy, Outcome};
pub use detect::{DetectionMethod, DetectionResult, EncodingDetector};
pub use encoding::EncodingName;
pub use host::Services;
