//! Storage Partitions
//!
//! One SQLite file per project partition at `<project>/.engram/memory.db`,
//! plus one global partition at `~/.engram/user.db` for user-scoped style
//! items. Each partition wraps its connection in `Arc<RwLock>`: the write
//! lock is the per-project serialization boundary, so reconciliation and
//! view regeneration never interleave destructively, while readers observe
//! pre- or post-batch state only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::RwLock;

use crate::error::EngineResult;
use crate::migrations;

/// Project id used for rows in the global user partition
pub const GLOBAL_PROJECT_ID: &str = "__global__";

/// A single partition: one project's event/episode/memory tables, or the
/// global user partition.
#[derive(Clone)]
pub struct Partition {
    db: Arc<RwLock<Connection>>,
    project_id: String,
}

impl Partition {
    /// Open (or create) the partition for a project root
    pub fn open(project_root: &Path) -> EngineResult<Self> {
        let dir = project_root.join(".engram");
        std::fs::create_dir_all(&dir)?;
        Self::open_at(
            dir.join("memory.db"),
            project_root.to_string_lossy().into_owned(),
        )
    }

    /// Open (or create) the global user partition under the data directory
    pub fn open_global(data_dir: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        Self::open_at(data_dir.join("user.db"), GLOBAL_PROJECT_ID.to_string())
    }

    /// In-memory partition for tests and ephemeral use
    pub fn in_memory(project_id: impl Into<String>) -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(RwLock::new(conn)),
            project_id: project_id.into(),
        })
    }

    fn open_at(path: PathBuf, project_id: String) -> EngineResult<Self> {
        let conn = Connection::open(&path)?;
        // WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(RwLock::new(conn)),
            project_id,
        })
    }

    /// The partition key (absolute project path, or [`GLOBAL_PROJECT_ID`])
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// The shared connection handle
    pub fn db(&self) -> &Arc<RwLock<Connection>> {
        &self.db
    }
}

/// Registry of open partitions: the global user partition plus one per
/// project, opened lazily.
pub struct PartitionSet {
    data_dir: Option<PathBuf>,
    global: Partition,
    projects: RwLock<HashMap<String, Partition>>,
    in_memory: bool,
}

impl PartitionSet {
    /// Open the registry rooted at the given data directory
    /// (default: `~/.engram`).
    pub fn open(data_dir: Option<PathBuf>) -> EngineResult<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".engram"),
        };
        let global = Partition::open_global(&data_dir)?;
        Ok(Self {
            data_dir: Some(data_dir),
            global,
            projects: RwLock::new(HashMap::new()),
            in_memory: false,
        })
    }

    /// Fully in-memory registry for tests
    pub fn in_memory() -> EngineResult<Self> {
        Ok(Self {
            data_dir: None,
            global: Partition::in_memory(GLOBAL_PROJECT_ID)?,
            projects: RwLock::new(HashMap::new()),
            in_memory: true,
        })
    }

    /// The global user partition
    pub fn global(&self) -> &Partition {
        &self.global
    }

    /// Get or open the partition for a project (keyed by absolute path)
    pub async fn project(&self, project_id: &str) -> EngineResult<Partition> {
        {
            let projects = self.projects.read().await;
            if let Some(partition) = projects.get(project_id) {
                return Ok(partition.clone());
            }
        }

        let mut projects = self.projects.write().await;
        // Re-check under the write lock: another caller may have won the race
        if let Some(partition) = projects.get(project_id) {
            return Ok(partition.clone());
        }

        let partition = if self.in_memory {
            Partition::in_memory(project_id)?
        } else {
            Partition::open(Path::new(project_id))?
        };
        projects.insert(project_id.to_string(), partition.clone());
        Ok(partition)
    }

    /// The data directory, when backed by disk
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_partitions_are_isolated() {
        let set = PartitionSet::in_memory().unwrap();
        let a = set.project("/proj/a").await.unwrap();
        let b = set.project("/proj/b").await.unwrap();

        {
            let conn = a.db().write().await;
            conn.execute(
                "INSERT INTO events (id, project_id, source, timestamp, kind, content, dedup_hash)
                 VALUES ('e1', '/proj/a', 't', 0, 'message', '', 'h1')",
                [],
            )
            .unwrap();
        }

        let count: i64 = {
            let conn = b.db().read().await;
            conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
                .unwrap()
        };
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_project_partition_is_cached() {
        let set = PartitionSet::in_memory().unwrap();
        let a = set.project("/proj/a").await.unwrap();

        {
            let conn = a.db().write().await;
            conn.execute(
                "INSERT INTO events (id, project_id, source, timestamp, kind, content, dedup_hash)
                 VALUES ('e1', '/proj/a', 't', 0, 'message', '', 'h1')",
                [],
            )
            .unwrap();
        }

        // Second lookup returns the same underlying database
        let again = set.project("/proj/a").await.unwrap();
        let count: i64 = {
            let conn = again.db().read().await;
            conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
                .unwrap()
        };
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_disk_partition_layout() {
        let dir = tempfile::tempdir().unwrap();
        let partition = Partition::open(dir.path()).unwrap();
        assert!(dir.path().join(".engram/memory.db").exists());
        assert_eq!(partition.project_id(), dir.path().to_string_lossy());
    }
}
