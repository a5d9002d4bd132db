//! Partition database migrations
//!
//! SQL migrations are embedded as strings and executed when a partition is
//! opened.

use rusqlite::Connection;

use crate::EngineResult;

/// Partition tables SQL (001)
pub const PARTITION_TABLES_SQL: &str = include_str!("001_partition_tables.sql");

/// Run all partition migrations
pub fn run_migrations(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(PARTITION_TABLES_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('events', 'episodes', 'memory_items', 'view_meta', 'view_payloads')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 5);
    }
}
