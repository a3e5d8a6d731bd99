//! Conversation participants

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::expenses::format_timestamp;
use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::UserIdentity;

/// First/last contact bookkeeping for one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserContact {
    pub owner: UserIdentity,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub message_count: i64,
}

impl Database {
    /// Record an inbound message from `owner`, creating the user on first contact.
    ///
    /// Returns true when this was the first message ever seen from the user.
    pub fn record_contact(&self, owner: &UserIdentity, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let ts = format_timestamp(&at);

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (owner, first_seen_at, last_seen_at, message_count)
             VALUES (?, ?, ?, 1)",
            params![owner.as_str(), ts, ts],
        )?;

        if inserted == 0 {
            conn.execute(
                "UPDATE users SET last_seen_at = MAX(last_seen_at, ?), message_count = message_count + 1
                 WHERE owner = ?",
                params![ts, owner.as_str()],
            )?;
        }

        Ok(inserted > 0)
    }

    pub fn get_user_contact(&self, owner: &UserIdentity) -> Result<Option<UserContact>> {
        let conn = self.conn()?;
        let contact = conn
            .query_row(
                "SELECT owner, first_seen_at, last_seen_at, message_count
                 FROM users WHERE owner = ?",
                params![owner.as_str()],
                |row| Self::row_to_contact(row),
            )
            .optional()?;
        Ok(contact)
    }

    /// All known users, most recently active first
    pub fn list_user_contacts(&self) -> Result<Vec<UserContact>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT owner, first_seen_at, last_seen_at, message_count
             FROM users ORDER BY last_seen_at DESC",
        )?;

        let contacts = stmt
            .query_map([], |row| Self::row_to_contact(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(contacts)
    }

    fn row_to_contact(row: &rusqlite::Row) -> rusqlite::Result<UserContact> {
        let owner: String = row.get(0)?;
        let first_seen: String = row.get(1)?;
        let last_seen: String = row.get(2)?;

        Ok(UserContact {
            owner: UserIdentity::new(owner),
            first_seen_at: parse_datetime(&first_seen),
            last_seen_at: parse_datetime(&last_seen),
            message_count: row.get(3)?,
        })
    }
}
