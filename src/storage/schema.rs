//! Database schema definitions

/// SQL to create the heap_analysis table
///
/// `payload` holds the full encoded `AnalysisResult`; the other columns are
/// a summary derived from it at write time and only used for listing.
pub const CREATE_HEAP_ANALYSIS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS heap_analysis (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at_time_millis INTEGER NOT NULL,
    retained_instance_count INTEGER NOT NULL DEFAULT 0,
    exception_summary TEXT DEFAULT NULL,
    payload BLOB NOT NULL
)
"#;

/// SQL to create the leaking_instance table
/// One row per leaking instance of a successful analysis
pub const CREATE_LEAKING_INSTANCE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS leaking_instance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    heap_analysis_id INTEGER NOT NULL,
    reference_key TEXT NOT NULL,
    class_name TEXT NOT NULL,
    group_hash TEXT NOT NULL,
    group_description TEXT NOT NULL,
    retained_heap_size INTEGER
)
"#;

/// Indexes on the heap_analysis table
pub const HEAP_ANALYSIS_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_heap_analysis_created_at ON heap_analysis(created_at_time_millis)",
];

/// Indexes on the leaking_instance table
pub const LEAKING_INSTANCE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_leaking_instance_analysis ON leaking_instance(heap_analysis_id)",
    "CREATE INDEX IF NOT EXISTS idx_leaking_instance_group ON leaking_instance(group_hash)",
];

/// Schema statements owned by the analysis record table
pub fn heap_analysis_statements() -> Vec<&'static str> {
    let mut stmts = vec![CREATE_HEAP_ANALYSIS_TABLE];
    stmts.extend(HEAP_ANALYSIS_INDEXES.iter().copied());
    stmts
}

/// Schema statements owned by the leaking instance table
pub fn leaking_instance_statements() -> Vec<&'static str> {
    let mut stmts = vec![CREATE_LEAKING_INSTANCE_TABLE];
    stmts.extend(LEAKING_INSTANCE_INDEXES.iter().copied());
    stmts
}
