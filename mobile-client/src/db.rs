use crate::error::StoreError;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// The on-device SQLite database shared by the mirror and the action queue.
pub struct LocalDatabase {
    conn: Mutex<Connection>,
}

impl LocalDatabase {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        // SQLite leaves foreign keys off unless asked, per connection.
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;

        conn.execute_batch(
            "
            -- Mirrored reference data
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS dishes (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                price TEXT NOT NULL,
                image TEXT,
                category_id INTEGER NOT NULL,
                FOREIGN KEY (category_id) REFERENCES categories(id)
            );

            CREATE TABLE IF NOT EXISTS tables (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'empty'
            );

            -- Orders placed while the server was out of reach
            CREATE TABLE IF NOT EXISTS local_orders (
                temp_id TEXT PRIMARY KEY,
                table_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                items TEXT NOT NULL,
                created_at TEXT NOT NULL,
                sync_status TEXT NOT NULL DEFAULT 'pending'
            );

            -- Writes waiting to be replayed against the server
            CREATE TABLE IF NOT EXISTS action_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                endpoint TEXT NOT NULL,
                method TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0
            );
            ",
        )?;

        Self::migrate_conn(&conn)?;

        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS action_queue_entity_idx ON action_queue (entity_key, id);",
        )?;

        Ok(())
    }

    /// Brings an action queue created by an older build up to date.
    /// Rows written before entity keys existed share the empty key, so they
    /// still replay in one global order.
    fn migrate_conn(conn: &Connection) -> Result<(), StoreError> {
        let columns: Vec<String> = conn
            .prepare("PRAGMA table_info(action_queue)")?
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(|r| r.ok())
            .collect();

        let wanted = [
            ("entity_key", "TEXT NOT NULL DEFAULT ''"),
            ("status", "TEXT NOT NULL DEFAULT 'pending'"),
            ("next_attempt_at", "TEXT"),
            ("last_error", "TEXT"),
            ("local_order_id", "TEXT"),
        ];
        for (name, definition) in wanted {
            if !columns.iter().any(|c| c == name) {
                conn.execute(&format!("ALTER TABLE action_queue ADD COLUMN {} {}", name, definition), [])?;
            }
        }

        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` inside one transaction. Any error rolls back everything `f` wrote.
    pub fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}
