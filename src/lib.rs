//! # Heapstore - Heap Analysis Result Store
//!
//! Persists the outcome of heap-analysis runs so they can be listed,
//! inspected and removed across process restarts.
//!
//! Heapstore provides:
//! - A tagged `AnalysisResult` model and a versioned blob codec
//! - SQLite-backed storage of analyses plus their leaking instances
//! - Grouped leak projections per analysis and across all analyses
//! - A deferred, strictly ordered reaper for heap dump files

pub mod analysis;
pub mod codec;
pub mod storage;
pub mod reaper;
pub mod leak_directory;
pub mod config;

// Re-exports for convenient access
pub use analysis::{AnalysisResult, LeakingInstance};
pub use leak_directory::{FsLeakDirectory, LeakDirectoryProvider};
pub use reaper::FileReaper;
pub use storage::{HeapAnalysisStore, LeakingInstanceTable, InstanceStore};

/// Result type alias for Heapstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Heapstore operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Contract violation: {0}")]
    ContractViolation(String),
}
