//! Leaking instance storage
//!
//! Every method takes the caller's connection, which is normally an open
//! `rusqlite::Transaction`. Implementations must not begin or commit
//! transactions of their own: the analysis table decides the boundaries.

use std::collections::BTreeMap;

use rusqlite::{Connection, params};

use crate::Result;
use crate::analysis::LeakingInstance;
use super::schema;

/// Leaking instances of one analysis that share a group hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupProjection {
    pub group_hash: String,
    pub description: String,
    pub leak_count: usize,
}

/// A leak group aggregated over every stored analysis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakGroupSummary {
    pub group_hash: String,
    pub description: String,
    /// Total leaking instances in the group
    pub leak_count: usize,
    /// Number of analyses the group appeared in
    pub analysis_count: usize,
    /// Creation time of the most recent analysis containing the group
    pub last_seen_millis: i64,
}

/// Per-instance records keyed by analysis id.
pub trait InstanceStore {
    /// Create the tables this store owns
    fn initialize_schema(&self, conn: &Connection) -> Result<()>;

    /// Record one leaking instance of `analysis_id`
    fn insert(&self, conn: &Connection, analysis_id: i64, instance: &LeakingInstance) -> Result<()>;

    /// Instances of one analysis grouped by group hash, keyed (and iterated) by hash
    fn retrieve_all_by_analysis_id(
        &self,
        conn: &Connection,
        analysis_id: i64,
    ) -> Result<BTreeMap<String, GroupProjection>>;

    /// Groups across every analysis, most recently seen first, then by leak count
    fn retrieve_all_groups(&self, conn: &Connection) -> Result<Vec<LeakGroupSummary>>;

    /// Count all stored instances
    fn count(&self, conn: &Connection) -> Result<usize>;

    fn delete_by_analysis_id(&self, conn: &Connection, analysis_id: i64) -> Result<()>;

    fn delete_all(&self, conn: &Connection) -> Result<()>;
}

/// SQLite-backed `InstanceStore` over the `leaking_instance` table
#[derive(Debug, Clone, Copy, Default)]
pub struct LeakingInstanceTable;

impl InstanceStore for LeakingInstanceTable {
    fn initialize_schema(&self, conn: &Connection) -> Result<()> {
        for stmt in schema::leaking_instance_statements() {
            conn.execute(stmt, [])?;
        }
        Ok(())
    }

    fn insert(&self, conn: &Connection, analysis_id: i64, instance: &LeakingInstance) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            r#"
            INSERT INTO leaking_instance (heap_analysis_id, reference_key, class_name, group_hash, group_description, retained_heap_size)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )?;
        stmt.execute(params![
            analysis_id,
            instance.reference_key,
            instance.class_name,
            instance.group_hash,
            instance.group_description,
            instance.retained_heap_size.map(|s| i64::try_from(s).unwrap_or(i64::MAX)),
        ])?;
        Ok(())
    }

    fn retrieve_all_by_analysis_id(
        &self,
        conn: &Connection,
        analysis_id: i64,
    ) -> Result<BTreeMap<String, GroupProjection>> {
        let mut stmt = conn.prepare(
            "SELECT group_hash, MIN(group_description), COUNT(*)
             FROM leaking_instance
             WHERE heap_analysis_id = ?1
             GROUP BY group_hash",
        )?;

        let groups = stmt
            .query_map([analysis_id], |row| {
                Ok(GroupProjection {
                    group_hash: row.get(0)?,
                    description: row.get(1)?,
                    leak_count: row.get::<_, i64>(2)?.max(0) as usize,
                })
            })?
            .map(|r| r.map(|g| (g.group_hash.clone(), g)))
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        Ok(groups)
    }

    fn retrieve_all_groups(&self, conn: &Connection) -> Result<Vec<LeakGroupSummary>> {
        let mut stmt = conn.prepare(
            "SELECT li.group_hash, MIN(li.group_description), COUNT(*),
                    COUNT(DISTINCT li.heap_analysis_id), MAX(ha.created_at_time_millis)
             FROM leaking_instance li
             JOIN heap_analysis ha ON ha.id = li.heap_analysis_id
             GROUP BY li.group_hash
             ORDER BY 5 DESC, 3 DESC",
        )?;

        let groups = stmt
            .query_map([], |row| {
                Ok(LeakGroupSummary {
                    group_hash: row.get(0)?,
                    description: row.get(1)?,
                    leak_count: row.get::<_, i64>(2)?.max(0) as usize,
                    analysis_count: row.get::<_, i64>(3)?.max(0) as usize,
                    last_seen_millis: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(groups)
    }

    fn count(&self, conn: &Connection) -> Result<usize> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM leaking_instance", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn delete_by_analysis_id(&self, conn: &Connection, analysis_id: i64) -> Result<()> {
        conn.execute("DELETE FROM leaking_instance WHERE heap_analysis_id = ?1", [analysis_id])?;
        Ok(())
    }

    fn delete_all(&self, conn: &Connection) -> Result<()> {
        conn.execute("DELETE FROM leaking_instance", [])?;
        Ok(())
    }
}
