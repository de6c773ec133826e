//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite with tables:
//! - heap_analysis(id, created_at_time_millis, retained_instance_count, exception_summary, payload)
//! - leaking_instance(heap_analysis_id, reference_key, class_name, group_hash, group_description)

pub mod schema;
pub mod leaking_instance;
pub mod heap_analysis;

pub use heap_analysis::{HeapAnalysisStore, Projection, RetrievedAnalysis, DbStats};
pub use leaking_instance::{InstanceStore, LeakingInstanceTable, GroupProjection, LeakGroupSummary};
