//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The engine, signals and readers work on in-memory values handed to them
//! by store methods; they never execute SQL directly.

mod aggregates;
mod facts;
mod reference;

pub use facts::SqliteFactSource;

use crate::error::PipelineResult;
use rusqlite::{Connection, OpenFlags};

pub struct LedgerStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file or shared-memory URI
}

impl LedgerStore {
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open a private in-memory database. It cannot be rescanned from other
    /// connections; use [`LedgerStore::shared_memory`] when the fact scan
    /// should run in parallel.
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Open a named in-memory database that other connections in this
    /// process can attach to while this store is alive.
    pub fn shared_memory(name: &str) -> PipelineResult<Self> {
        Self::open(&format!("file:{name}?mode=memory&cache=shared"))
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_aggregates.sql"))?;
        Ok(())
    }

    fn table_exists(&self, table: &str) -> PipelineResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
