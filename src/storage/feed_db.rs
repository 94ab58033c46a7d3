use rusqlite::{OptionalExtension, Result as SqlResult, Row, TransactionBehavior, params};
use std::path::Path;

use super::FeedBackend;
use super::database::Database;
use super::models::Appended;
use crate::common::{ChatMessage, MessageDraft};
use crate::error::BackendError;

const MESSAGE_COLUMNS: &str = "seq, id, feed, sender, body, sent_at";

/// SQLite-backed feed log (messages of every feed in one table)
pub struct FeedDatabase {
    db: Database,
}

impl FeedDatabase {
    /// Open or create the feed database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        Self::with_database(Database::new(path)?)
    }

    pub fn in_memory() -> SqlResult<Self> {
        Self::with_database(Database::in_memory()?)
    }

    fn with_database(db: Database) -> SqlResult<Self> {
        let feed_db = Self { db };
        feed_db.init_schema()?;
        Ok(feed_db)
    }

    fn init_schema(&self) -> SqlResult<()> {
        let conn = self.db.connection();

        // AUTOINCREMENT keeps seq strictly increasing even after deletes.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                feed TEXT NOT NULL,
                sender TEXT NOT NULL,
                body TEXT NOT NULL,
                sent_at INTEGER NOT NULL,
                committed_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                UNIQUE (feed, id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_feed_order ON messages(feed, sent_at, seq)",
            [],
        )?;

        Ok(())
    }

    /// Insert a draft into `feed`; a draft whose id is already stored in that feed is left untouched.
    ///
    /// `sent_at` is raised to the feed's tail inside the write lock, so writers
    /// on other connections cannot slip an earlier message behind it.
    pub fn insert_message(&mut self, feed: &str, draft: &MessageDraft) -> SqlResult<Appended> {
        let tx = self
            .db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO messages (id, feed, sender, body, sent_at)
             VALUES (?1, ?2, ?3, ?4,
                     MAX(?5, COALESCE((SELECT MAX(sent_at) FROM messages WHERE feed = ?2), ?5)))",
            params![draft.id, feed, draft.sender, draft.body, draft.sent_at],
        )?;
        let message = tx.query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE feed = ?1 AND id = ?2"),
            params![feed, draft.id],
            message_from_row,
        )?;
        tx.commit()?;

        if inserted == 1 {
            Ok(Appended::Committed(message))
        } else {
            Ok(Appended::Existing(message))
        }
    }

    /// Get the whole feed in order
    pub fn get_messages(&self, feed: &str) -> SqlResult<Vec<ChatMessage>> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE feed = ?1
             ORDER BY sent_at ASC, seq ASC"
        ))?;

        let messages = stmt
            .query_map(params![feed], message_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(messages)
    }

    /// Get messages committed after `seq`
    pub fn get_messages_after(&self, feed: &str, seq: u64) -> SqlResult<Vec<ChatMessage>> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE feed = ?1 AND seq > ?2
             ORDER BY sent_at ASC, seq ASC"
        ))?;

        let messages = stmt
            .query_map(params![feed, to_sql_seq(seq)], message_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(messages)
    }

    /// Get the last message of a feed
    pub fn last_message(&self, feed: &str) -> SqlResult<Option<ChatMessage>> {
        let conn = self.db.connection();
        conn.query_row(
            &format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages
                 WHERE feed = ?1
                 ORDER BY sent_at DESC, seq DESC
                 LIMIT 1"
            ),
            params![feed],
            message_from_row,
        )
        .optional()
    }

    /// Get message count of a feed
    pub fn message_count(&self, feed: &str) -> SqlResult<usize> {
        let conn = self.db.connection();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE feed = ?1",
            params![feed],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl FeedBackend for FeedDatabase {
    fn append(&mut self, feed: &str, draft: &MessageDraft) -> Result<Appended, BackendError> {
        Ok(self.insert_message(feed, draft)?)
    }

    fn read_all(&self, feed: &str) -> Result<Vec<ChatMessage>, BackendError> {
        Ok(self.get_messages(feed)?)
    }

    fn read_after(&self, feed: &str, watermark: u64) -> Result<Vec<ChatMessage>, BackendError> {
        Ok(self.get_messages_after(feed, watermark)?)
    }

    fn tail(&self, feed: &str) -> Result<Option<ChatMessage>, BackendError> {
        Ok(self.last_message(feed)?)
    }

    fn len(&self, feed: &str) -> Result<usize, BackendError> {
        Ok(self.message_count(feed)?)
    }
}

fn message_from_row(row: &Row<'_>) -> SqlResult<ChatMessage> {
    Ok(ChatMessage {
        seq: row.get::<_, i64>(0)? as u64,
        id: row.get(1)?,
        feed: row.get(2)?,
        sender: row.get(3)?,
        body: row.get(4)?,
        sent_at: row.get(5)?,
    })
}

fn to_sql_seq(seq: u64) -> i64 {
    i64::try_from(seq).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_come_back_in_feed_order() {
        let mut db = FeedDatabase::in_memory().unwrap();
        db.insert_message("room", &MessageDraft::at("alice", "second", 20))
            .unwrap();
        db.insert_message("room", &MessageDraft::at("bob", "first", 10))
            .unwrap();
        db.insert_message("other", &MessageDraft::at("carol", "elsewhere", 5))
            .unwrap();

        let bodies: Vec<_> = db
            .get_messages("room")
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(bodies, ["first", "second"]);
        assert_eq!(db.message_count("room").unwrap(), 2);
        assert_eq!(db.message_count("other").unwrap(), 1);
    }

    #[test]
    fn duplicate_draft_id_is_ignored() {
        let mut db = FeedDatabase::in_memory().unwrap();
        let draft = MessageDraft::at("alice", "hi", 1);

        let first = db.insert_message("room", &draft).unwrap();
        let second = db.insert_message("room", &draft).unwrap();

        assert!(matches!(first, Appended::Committed(_)));
        assert!(matches!(second, Appended::Existing(_)));
        assert_eq!(first.message(), second.message());
        assert_eq!(db.message_count("room").unwrap(), 1);
    }

    #[test]
    fn same_draft_id_lands_in_each_feed() {
        let mut db = FeedDatabase::in_memory().unwrap();
        let draft = MessageDraft::at("alice", "hi", 1);

        let in_a = db.insert_message("a", &draft).unwrap();
        let in_b = db.insert_message("b", &draft).unwrap();

        assert!(matches!(in_a, Appended::Committed(_)));
        assert!(matches!(in_b, Appended::Committed(_)));
        assert_eq!(in_b.message().feed, "b");
        assert_ne!(in_a.message().seq, in_b.message().seq);
        assert_eq!(db.message_count("a").unwrap(), 1);
        assert_eq!(db.message_count("b").unwrap(), 1);

        let again = db.insert_message("b", &draft).unwrap();
        assert!(matches!(again, Appended::Existing(_)));
        assert_eq!(db.message_count("b").unwrap(), 1);
    }

    #[test]
    fn late_sent_at_is_raised_to_the_feed_tail() {
        let mut db = FeedDatabase::in_memory().unwrap();
        db.insert_message("room", &MessageDraft::at("alice", "first", 100))
            .unwrap();
        let late = db
            .insert_message("room", &MessageDraft::at("bob", "late", 40))
            .unwrap()
            .into_message();
        let elsewhere = db
            .insert_message("other", &MessageDraft::at("bob", "own clock", 40))
            .unwrap()
            .into_message();

        assert_eq!(late.sent_at, 100);
        assert_eq!(elsewhere.sent_at, 40);
    }

    #[test]
    fn messages_after_watermark_skip_delivered_ones() {
        let mut db = FeedDatabase::in_memory().unwrap();
        let first = db
            .insert_message("room", &MessageDraft::at("alice", "one", 1))
            .unwrap()
            .into_message();
        db.insert_message("room", &MessageDraft::at("alice", "two", 2))
            .unwrap();
        db.insert_message("room", &MessageDraft::at("alice", "three", 3))
            .unwrap();

        let after: Vec<_> = db
            .get_messages_after("room", first.seq)
            .unwrap()
            .into_iter()
            .map(|m| m.body)
            .collect();
        assert_eq!(after, ["two", "three"]);
        assert!(db.get_messages_after("room", u64::MAX).unwrap().is_empty());
    }

    #[test]
    fn last_message_is_the_tail() {
        let mut db = FeedDatabase::in_memory().unwrap();
        assert!(db.last_message("room").unwrap().is_none());

        db.insert_message("room", &MessageDraft::at("alice", "a", 5))
            .unwrap();
        db.insert_message("room", &MessageDraft::at("bob", "b", 5))
            .unwrap();

        let tail = db.last_message("room").unwrap().unwrap();
        assert_eq!(tail.body, "b");
    }

    #[test]
    fn feed_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.db");
        {
            let mut db = FeedDatabase::open(&path).unwrap();
            db.insert_message("room", &MessageDraft::at("alice", "persisted", 1))
                .unwrap();
        }

        let db = FeedDatabase::open(&path).unwrap();
        let messages = db.get_messages("room").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, "persisted");
    }
}
