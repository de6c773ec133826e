//! Analysis result types
//!
//! A heap analysis either succeeds with the instances it found leaking,
//! or fails with the exception that aborted it:
//! - `Success`: ordered leaking instances
//! - `Failure`: class name and message of the root cause

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome of one heap-analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnalysisResult {
    /// The analysis completed and found zero or more leaking instances
    Success {
        created_at_millis: i64,
        analysis_duration_millis: u64,
        leaking_instances: Vec<LeakingInstance>,
    },
    /// The analysis aborted; the cause is the exception that triggered it
    Failure {
        created_at_millis: i64,
        analysis_duration_millis: u64,
        cause_class_name: String,
        cause_message: Option<String>,
    },
}

impl AnalysisResult {
    /// Create a successful result timestamped now
    pub fn success(leaking_instances: Vec<LeakingInstance>, analysis_duration_millis: u64) -> Self {
        AnalysisResult::Success {
            created_at_millis: now_millis(),
            analysis_duration_millis,
            leaking_instances,
        }
    }

    /// Create a failed result timestamped now
    pub fn failure(
        cause_class_name: impl Into<String>,
        cause_message: Option<String>,
        analysis_duration_millis: u64,
    ) -> Self {
        AnalysisResult::Failure {
            created_at_millis: now_millis(),
            analysis_duration_millis,
            cause_class_name: cause_class_name.into(),
            cause_message,
        }
    }

    pub fn created_at_millis(&self) -> i64 {
        match self {
            AnalysisResult::Success { created_at_millis, .. }
            | AnalysisResult::Failure { created_at_millis, .. } => *created_at_millis,
        }
    }

    pub fn analysis_duration_millis(&self) -> u64 {
        match self {
            AnalysisResult::Success { analysis_duration_millis, .. }
            | AnalysisResult::Failure { analysis_duration_millis, .. } => *analysis_duration_millis,
        }
    }

    /// Leaking instances of a successful analysis; empty for a failure
    pub fn leaking_instances(&self) -> &[LeakingInstance] {
        match self {
            AnalysisResult::Success { leaking_instances, .. } => leaking_instances,
            AnalysisResult::Failure { .. } => &[],
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisResult::Success { .. })
    }

    /// Get the string representation of the result kind
    pub fn kind_str(&self) -> &'static str {
        match self {
            AnalysisResult::Success { .. } => "success",
            AnalysisResult::Failure { .. } => "failure",
        }
    }
}

/// A single instance reported as leaking by a successful analysis.
///
/// Instances sharing the same leak trace signature share a `group_hash`,
/// which is how the store groups them back together on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakingInstance {
    /// Key of the weak reference that detected the instance
    pub reference_key: String,
    /// Fully qualified class name of the leaking instance
    pub class_name: String,
    /// Stable hash identifying the leak group
    pub group_hash: String,
    /// Human readable signature of the leak group
    pub group_description: String,
    /// Retained heap size in bytes, when the engine computed it
    pub retained_heap_size: Option<u64>,
}

impl LeakingInstance {
    /// Create an instance whose group hash is derived from the group description
    pub fn new(
        reference_key: impl Into<String>,
        class_name: impl Into<String>,
        group_description: impl Into<String>,
    ) -> Self {
        let group_description = group_description.into();
        Self {
            reference_key: reference_key.into(),
            class_name: class_name.into(),
            group_hash: group_hash_of(&group_description),
            group_description,
            retained_heap_size: None,
        }
    }

    pub fn with_group_hash(mut self, group_hash: impl Into<String>) -> Self {
        self.group_hash = group_hash.into();
        self
    }

    pub fn with_retained_heap_size(mut self, bytes: u64) -> Self {
        self.retained_heap_size = Some(bytes);
        self
    }
}

/// Hash a leak trace signature into a group identifier
pub fn group_hash_of(signature: &str) -> String {
    blake3::hash(signature.as_bytes()).to_string()
}

/// Current wall clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
