//! Heap analysis record table
//!
//! Owns the `heap_analysis` table and drives the instance store inside the
//! same transactions. Heap dump files are handed to the reaper only after
//! the transaction that dropped their rows has committed.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};

use crate::analysis::AnalysisResult;
use crate::codec;
use crate::config::HeapStoreConfig;
use crate::leak_directory::{FsLeakDirectory, LeakDirectoryProvider};
use crate::reaper::FileReaper;
use crate::{Error, Result};
use super::leaking_instance::{GroupProjection, InstanceStore, LeakGroupSummary, LeakingInstanceTable};
use super::schema;

/// Summary row of a stored analysis, as shown in history listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub id: i64,
    pub created_at_millis: i64,
    pub retained_instance_count: usize,
    pub exception_summary: Option<String>,
}

/// A decoded analysis together with its leak groups
pub type RetrievedAnalysis = (AnalysisResult, BTreeMap<String, GroupProjection>);

/// SQLite-backed store of heap analysis results.
///
/// Construct one per process and pass it by reference. All operations block
/// the calling thread for the duration of their transaction; only file
/// deletion is deferred to the reaper thread.
pub struct HeapAnalysisStore<S: InstanceStore = LeakingInstanceTable> {
    conn: Connection,
    instances: S,
    leak_directory: Arc<dyn LeakDirectoryProvider>,
    reaper: FileReaper,
}

impl HeapAnalysisStore<LeakingInstanceTable> {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path, leak_directory: Arc<dyn LeakDirectoryProvider>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_instance_store(conn, LeakingInstanceTable, leak_directory)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(leak_directory: Arc<dyn LeakDirectoryProvider>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_instance_store(conn, LeakingInstanceTable, leak_directory)
    }

    /// Open the database and leak directory named by `config`, relative to `base`
    pub fn open_with_config(config: &HeapStoreConfig, base: &Path) -> Result<Self> {
        let (database, leak_directory) = config.resolve(base);
        crate::config::check_layout(&database, &leak_directory)?;
        crate::config::ensure_db_dir(&database)?;
        let leak_directory = FsLeakDirectory::open(leak_directory)?;
        // Again once both exist, so `..` and symlinks are resolved.
        crate::config::check_layout(&database, leak_directory.leak_directory())?;
        Self::open(&database, Arc::new(leak_directory))
    }
}

impl<S: InstanceStore> HeapAnalysisStore<S> {
    /// Wrap an existing connection, using `instances` for per-instance rows
    pub fn with_instance_store(
        conn: Connection,
        instances: S,
        leak_directory: Arc<dyn LeakDirectoryProvider>,
    ) -> Result<Self> {
        let store = Self {
            conn,
            instances,
            leak_directory,
            reaper: FileReaper::spawn()?,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<()> {
        for stmt in schema::heap_analysis_statements() {
            self.conn.execute(stmt, [])?;
        }
        self.instances.initialize_schema(&self.conn)
    }

    /// Store a finished analysis and its leaking instances atomically.
    ///
    /// Returns the id assigned to the new record.
    pub fn insert(&mut self, result: &AnalysisResult) -> Result<i64> {
        let (retained_instance_count, exception_summary) = summarize(result)?;
        let payload = codec::encode(result);

        let tx = self.conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO heap_analysis (created_at_time_millis, retained_instance_count, exception_summary, payload)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                result.created_at_millis(),
                i64::try_from(retained_instance_count).unwrap_or(i64::MAX),
                exception_summary,
                payload,
            ],
        )?;

        let id = tx.last_insert_rowid();
        for instance in result.leaking_instances() {
            self.instances.insert(&tx, id, instance)?;
        }
        tx.commit()?;

        tracing::debug!("Stored {} heap analysis {}", result.kind_str(), id);
        Ok(id)
    }

    /// Load one analysis and its leak groups.
    ///
    /// A record whose payload no longer decodes is deleted in the same
    /// transaction and reported as absent, so unreadable rows do not pile up
    /// after a format change or a truncated write.
    pub fn retrieve(&mut self, id: i64) -> Result<Option<RetrievedAnalysis>> {
        let tx = self.conn.transaction()?;

        let payload: Option<Value> = tx
            .query_row("SELECT payload FROM heap_analysis WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        let Some(payload) = payload else {
            return Ok(None);
        };

        let bytes = match payload {
            Value::Blob(bytes) => bytes,
            Value::Text(text) => text.into_bytes(),
            _ => Vec::new(),
        };

        let analysis = match codec::decode(&bytes) {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::warn!("Deleting heap analysis {} with unreadable payload: {}", id, e);
                delete_rows(&tx, &self.instances, id)?;
                tx.commit()?;
                return Ok(None);
            }
        };

        let groups = self.instances.retrieve_all_by_analysis_id(&tx, id)?;
        tx.commit()?;
        Ok(Some((analysis, groups)))
    }

    /// List every stored analysis, newest first
    pub fn list_summaries(&self) -> Result<Vec<Projection>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, created_at_time_millis, retained_instance_count, exception_summary
             FROM heap_analysis
             ORDER BY created_at_time_millis DESC, id DESC",
        )?;

        let summaries = stmt
            .query_map([], |row| {
                Ok(Projection {
                    id: row.get(0)?,
                    created_at_millis: row.get(1)?,
                    retained_instance_count: row.get::<_, i64>(2)?.max(0) as usize,
                    exception_summary: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(summaries)
    }

    /// Leak groups across all stored analyses, most recently seen first
    pub fn list_groups(&self) -> Result<Vec<LeakGroupSummary>> {
        self.instances.retrieve_all_groups(&self.conn)
    }

    /// Delete one analysis and its instances, then queue removal of its heap dump.
    ///
    /// The dump file is removed in the background; it may still exist when
    /// this returns, and a file that is already gone is not an error.
    pub fn delete(&mut self, id: i64, heap_dump: Option<&Path>) -> Result<()> {
        let tx = self.conn.transaction()?;
        delete_rows(&tx, &self.instances, id)?;
        tx.commit()?;

        if let Some(path) = heap_dump {
            self.reaper.delete_file(path);
        }
        Ok(())
    }

    /// Delete every analysis and instance, then queue a clear of the leak directory
    pub fn delete_all(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM heap_analysis", [])?;
        self.instances.delete_all(&tx)?;
        tx.commit()?;

        self.reaper.clear_directory(Arc::clone(&self.leak_directory));
        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let analyses: i64 = self.conn.query_row("SELECT COUNT(*) FROM heap_analysis", [], |row| row.get(0))?;
        Ok(DbStats {
            analyses: analyses as usize,
            leaking_instances: self.instances.count(&self.conn)?,
        })
    }

    /// Background queue used for heap dump deletion
    pub fn reaper(&self) -> &FileReaper {
        &self.reaper
    }

    pub fn leak_directory(&self) -> &Arc<dyn LeakDirectoryProvider> {
        &self.leak_directory
    }
}

/// Derive the listing columns from a result
fn summarize(result: &AnalysisResult) -> Result<(usize, Option<String>)> {
    match result {
        AnalysisResult::Success { leaking_instances, .. } => Ok((leaking_instances.len(), None)),
        AnalysisResult::Failure { cause_class_name, cause_message, .. } => {
            if cause_class_name.trim().is_empty() {
                return Err(Error::ContractViolation(
                    "failed analysis stored without a cause".to_string(),
                ));
            }
            let summary = match cause_message {
                Some(message) => format!("{} {}", cause_class_name, message),
                None => cause_class_name.clone(),
            };
            Ok((0, Some(summary)))
        }
    }
}

fn delete_rows<S: InstanceStore>(conn: &Connection, instances: &S, id: i64) -> Result<()> {
    conn.execute("DELETE FROM heap_analysis WHERE id = ?1", [id])?;
    instances.delete_by_analysis_id(conn, id)
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DbStats {
    pub analyses: usize,
    pub leaking_instances: usize,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Analyses: {}", self.analyses)?;
        writeln!(f, "  Leaking instances: {}", self.leaking_instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::LeakingInstance;
    use std::cell::Cell;
    use std::path::PathBuf;

    /// Instance store that can be told to fail mid-transaction
    #[derive(Default)]
    struct FlakyInstances {
        inner: LeakingInstanceTable,
        fail_on_insert: Cell<Option<usize>>,
        inserted: Cell<usize>,
        fail_delete: Cell<bool>,
    }

    fn forced() -> Error {
        Error::Storage(rusqlite::Error::InvalidQuery)
    }

    impl InstanceStore for FlakyInstances {
        fn initialize_schema(&self, conn: &Connection) -> Result<()> {
            self.inner.initialize_schema(conn)
        }

        fn insert(&self, conn: &Connection, analysis_id: i64, instance: &LeakingInstance) -> Result<()> {
            let n = self.inserted.get();
            if self.fail_on_insert.get() == Some(n) {
                return Err(forced());
            }
            self.inner.insert(conn, analysis_id, instance)?;
            self.inserted.set(n + 1);
            Ok(())
        }

        fn retrieve_all_by_analysis_id(
            &self,
            conn: &Connection,
            analysis_id: i64,
        ) -> Result<BTreeMap<String, GroupProjection>> {
            self.inner.retrieve_all_by_analysis_id(conn, analysis_id)
        }

        fn retrieve_all_groups(&self, conn: &Connection) -> Result<Vec<LeakGroupSummary>> {
            self.inner.retrieve_all_groups(conn)
        }

        fn count(&self, conn: &Connection) -> Result<usize> {
            self.inner.count(conn)
        }

        fn delete_by_analysis_id(&self, conn: &Connection, analysis_id: i64) -> Result<()> {
            if self.fail_delete.get() {
                return Err(forced());
            }
            self.inner.delete_by_analysis_id(conn, analysis_id)
        }

        fn delete_all(&self, conn: &Connection) -> Result<()> {
            if self.fail_delete.get() {
                return Err(forced());
            }
            self.inner.delete_all(conn)
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        leaks: Arc<FsLeakDirectory>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let leaks = Arc::new(FsLeakDirectory::open(dir.path().join("leaks")).unwrap());
            Self { dir, leaks }
        }

        fn store(&self) -> HeapAnalysisStore {
            HeapAnalysisStore::open_in_memory(self.leaks.clone()).unwrap()
        }

        fn flaky_store(&self) -> HeapAnalysisStore<FlakyInstances> {
            let conn = Connection::open_in_memory().unwrap();
            HeapAnalysisStore::with_instance_store(conn, FlakyInstances::default(), self.leaks.clone()).unwrap()
        }

        fn dump(&self) -> PathBuf {
            let path = self.leaks.new_heap_dump_file();
            std::fs::write(&path, b"JAVA PROFILE 1.0.3").unwrap();
            path
        }
    }

    fn success_at(created_at_millis: i64, instances: Vec<LeakingInstance>) -> AnalysisResult {
        AnalysisResult::Success {
            created_at_millis,
            analysis_duration_millis: 100,
            leaking_instances: instances,
        }
    }

    fn two_leaks() -> Vec<LeakingInstance> {
        vec![
            LeakingInstance::new("k1", "com.example.MainActivity", "MainActivity.mContext"),
            LeakingInstance::new("k2", "com.example.DetailActivity", "DetailActivity.sInstance"),
        ]
    }

    #[test]
    fn test_insert_success_and_failure_summaries() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        let success_id = store.insert(&success_at(1_000, two_leaks())).unwrap();
        let failure_id = store
            .insert(&AnalysisResult::Failure {
                created_at_millis: 2_000,
                analysis_duration_millis: 5,
                cause_class_name: "OutOfMemoryError".into(),
                cause_message: Some("heap exhausted".into()),
            })
            .unwrap();

        let summaries = store.list_summaries().unwrap();
        assert_eq!(summaries.len(), 2);

        let failure = summaries.iter().find(|p| p.id == failure_id).unwrap();
        assert_eq!(failure.exception_summary.as_deref(), Some("OutOfMemoryError heap exhausted"));
        assert_eq!(failure.retained_instance_count, 0);

        let success = summaries.iter().find(|p| p.id == success_id).unwrap();
        assert_eq!(success.retained_instance_count, 2);
        assert_eq!(success.exception_summary, None);
    }

    #[test]
    fn test_failure_without_message() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        let id = store
            .insert(&AnalysisResult::Failure {
                created_at_millis: 1,
                analysis_duration_millis: 0,
                cause_class_name: "IllegalStateException".into(),
                cause_message: None,
            })
            .unwrap();

        let summaries = store.list_summaries().unwrap();
        assert_eq!(summaries[0].id, id);
        assert_eq!(summaries[0].exception_summary.as_deref(), Some("IllegalStateException"));
    }

    #[test]
    fn test_failure_without_cause_is_rejected() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        let err = store.insert(&AnalysisResult::failure("", None, 0)).unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
        assert!(store.list_summaries().unwrap().is_empty());
    }

    #[test]
    fn test_retrieve_returns_analysis_and_groups() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        let mut leaks = two_leaks();
        leaks.push(LeakingInstance::new("k3", "com.example.MainActivity", "MainActivity.mContext"));
        let analysis = success_at(1_000, leaks);
        let id = store.insert(&analysis).unwrap();

        let (retrieved, groups) = store.retrieve(id).unwrap().unwrap();
        assert_eq!(retrieved, analysis);
        assert_eq!(groups.len(), 2);

        let total: usize = groups.values().map(|g| g.leak_count).sum();
        let summary = &store.list_summaries().unwrap()[0];
        assert_eq!(total, summary.retained_instance_count);
    }

    #[test]
    fn test_retrieve_missing_id() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        assert!(store.retrieve(42).unwrap().is_none());
    }

    #[test]
    fn test_list_summaries_newest_first() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        for created_at in [3_000, 1_000, 5_000, 2_000, 4_000] {
            store.insert(&success_at(created_at, Vec::new())).unwrap();
        }

        let times: Vec<i64> = store.list_summaries().unwrap().iter().map(|p| p.created_at_millis).collect();
        assert_eq!(times, vec![5_000, 4_000, 3_000, 2_000, 1_000]);
    }

    #[test]
    fn test_corrupt_payload_is_deleted_on_retrieve() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        let id = store.insert(&success_at(1_000, two_leaks())).unwrap();
        let keep = store.insert(&success_at(2_000, two_leaks())).unwrap();
        store
            .conn
            .execute(
                "UPDATE heap_analysis SET payload = ?1 WHERE id = ?2",
                params![b"\x13\x37garbage".to_vec(), id],
            )
            .unwrap();

        assert!(store.retrieve(id).unwrap().is_none());

        let ids: Vec<i64> = store.list_summaries().unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![keep]);
        assert_eq!(store.stats().unwrap().leaking_instances, 2);
    }

    #[test]
    fn test_insert_rolls_back_when_fan_out_fails() {
        let fixture = Fixture::new();
        let mut store = fixture.flaky_store();
        store.instances.fail_on_insert.set(Some(1));

        let err = store.insert(&success_at(1_000, two_leaks())).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        assert!(store.list_summaries().unwrap().is_empty());
        assert_eq!(store.stats().unwrap().leaking_instances, 0);
    }

    #[test]
    fn test_delete_removes_rows() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        let id = store.insert(&success_at(1_000, two_leaks())).unwrap();
        let other = store.insert(&success_at(2_000, two_leaks())).unwrap();

        store.delete(id, None).unwrap();

        assert!(store.retrieve(id).unwrap().is_none());
        assert!(store.retrieve(other).unwrap().is_some());
        let stats = store.stats().unwrap();
        assert_eq!(stats.analyses, 1);
        assert_eq!(stats.leaking_instances, 2);
    }

    #[test]
    fn test_delete_rolls_back_when_sub_store_fails() {
        let fixture = Fixture::new();
        let mut store = fixture.flaky_store();

        let id = store.insert(&success_at(1_000, two_leaks())).unwrap();
        let dump = fixture.dump();
        store.instances.fail_delete.set(true);

        assert!(store.delete(id, Some(dump.as_path())).is_err());
        store.reaper().flush();

        assert_eq!(store.list_summaries().unwrap().len(), 1);
        assert_eq!(store.stats().unwrap().leaking_instances, 2);
        assert!(dump.exists());
    }

    #[test]
    fn test_delete_removes_heap_dump_eventually() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        let id = store.insert(&success_at(1_000, two_leaks())).unwrap();
        let dump = fixture.dump();

        store.delete(id, Some(dump.as_path())).unwrap();
        store.reaper().flush();

        assert!(!dump.exists());
    }

    #[test]
    fn test_delete_tolerates_missing_heap_dump() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        let id = store.insert(&success_at(1_000, Vec::new())).unwrap();
        let missing = fixture.dir.path().join("gone.hprof");

        store.delete(id, Some(missing.as_path())).unwrap();
        store.reaper().flush();

        assert!(store.list_summaries().unwrap().is_empty());
    }

    #[test]
    fn test_delete_all_clears_rows_and_directory() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        store.insert(&success_at(1_000, two_leaks())).unwrap();
        store.insert(&AnalysisResult::failure("OutOfMemoryError", None, 0)).unwrap();
        let dump = fixture.dump();

        store.delete_all().unwrap();
        store.reaper().flush();

        let stats = store.stats().unwrap();
        assert_eq!(stats.analyses, 0);
        assert_eq!(stats.leaking_instances, 0);
        assert!(!dump.exists());
        assert!(fixture.leaks.leak_directory().exists());
    }

    #[test]
    fn test_delete_all_rolls_back_when_sub_store_fails() {
        let fixture = Fixture::new();
        let mut store = fixture.flaky_store();

        store.insert(&success_at(1_000, two_leaks())).unwrap();
        let dump = fixture.dump();
        store.instances.fail_delete.set(true);

        assert!(store.delete_all().is_err());
        store.reaper().flush();

        assert_eq!(store.stats().unwrap().analyses, 1);
        assert!(dump.exists());
    }

    #[test]
    fn test_list_groups_across_analyses() {
        let fixture = Fixture::new();
        let mut store = fixture.store();

        store.insert(&success_at(1_000, two_leaks())).unwrap();
        store
            .insert(&success_at(
                2_000,
                vec![LeakingInstance::new("k9", "com.example.MainActivity", "MainActivity.mContext")],
            ))
            .unwrap();

        let groups = store.list_groups().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].description, "MainActivity.mContext");
        assert_eq!(groups[0].analysis_count, 2);
        assert_eq!(groups[0].last_seen_millis, 2_000);
    }

    #[test]
    fn test_records_survive_reopen() {
        let fixture = Fixture::new();
        let db = fixture.dir.path().join("heapstore.db");

        let id = {
            let mut store = HeapAnalysisStore::open(&db, fixture.leaks.clone()).unwrap();
            store.insert(&success_at(1_000, two_leaks())).unwrap()
        };

        let mut store = HeapAnalysisStore::open(&db, fixture.leaks.clone()).unwrap();
        let (analysis, groups) = store.retrieve(id).unwrap().unwrap();
        assert_eq!(analysis.leaking_instances().len(), 2);
        assert_eq!(groups.len(), 2);
    }
}
