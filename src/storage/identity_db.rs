use rusqlite::{OptionalExtension, Result as SqlResult, params};
use std::path::Path;

use super::database::Database;
use super::models::Identity;

/// Database holding the signed-in identity
pub struct IdentityDatabase {
    db: Database,
}

impl IdentityDatabase {
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        Self::with_database(Database::new(path)?)
    }

    pub fn in_memory() -> SqlResult<Self> {
        Self::with_database(Database::in_memory()?)
    }

    fn with_database(db: Database) -> SqlResult<Self> {
        let identity_db = Self { db };
        identity_db.init_schema()?;
        Ok(identity_db)
    }

    fn init_schema(&self) -> SqlResult<()> {
        // Identity table (single row)
        self.db.connection().execute(
            "CREATE TABLE IF NOT EXISTS identity (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                identity TEXT NOT NULL,
                signed_in_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )?;
        Ok(())
    }

    /// Save identity (replace if exists)
    pub fn save_identity(&self, identity: &str) -> SqlResult<()> {
        self.db.connection().execute(
            "INSERT OR REPLACE INTO identity (id, identity, signed_in_at)
             VALUES (1, ?1, strftime('%s', 'now'))",
            params![identity],
        )?;
        Ok(())
    }

    /// Get identity
    pub fn get_identity(&self) -> SqlResult<Option<Identity>> {
        self.db
            .connection()
            .query_row(
                "SELECT identity, signed_in_at FROM identity WHERE id = 1",
                [],
                |row| {
                    Ok(Identity {
                        identity: row.get(0)?,
                        signed_in_at: row.get(1)?,
                    })
                },
            )
            .optional()
    }

    /// Remove identity, returns whether one was stored
    pub fn clear_identity(&self) -> SqlResult<bool> {
        let removed = self
            .db
            .connection()
            .execute("DELETE FROM identity WHERE id = 1", [])?;
        Ok(removed > 0)
    }
}
