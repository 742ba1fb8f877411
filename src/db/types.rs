//! Shared type definitions for the database layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Contact {0} not found")]
    ContactNotFound(i64),
}

impl DbError {
    /// True when SQLite gave up waiting on another writer's lock.
    pub fn is_busy(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Position of a contact within its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl LinkPrecedence {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPrecedence::Primary => "primary",
            LinkPrecedence::Secondary => "secondary",
        }
    }
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkPrecedence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(LinkPrecedence::Primary),
            "secondary" => Ok(LinkPrecedence::Secondary),
            other => Err(format!("Unknown link precedence: {other}")),
        }
    }
}

/// A row from the `contacts` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbContact {
    pub id: i64,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    /// Set iff `link_precedence` is secondary.
    pub linked_id: Option<i64>,
    pub link_precedence: LinkPrecedence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbContact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Creation-order key: oldest `created_at` first, `id` breaks ties.
    pub fn age_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.id)
    }
}

/// Values for a contact that has not been inserted yet. The store assigns
/// `id`, `created_at` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<i64>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    pub fn primary(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    pub fn secondary(email: Option<&str>, phone_number: Option<&str>, primary_id: i64) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            linked_id: Some(primary_id),
            link_precedence: LinkPrecedence::Secondary,
        }
    }
}

/// A linkage rewrite for one existing contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactMutation {
    pub id: i64,
    pub link_precedence: LinkPrecedence,
    pub linked_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

impl ContactMutation {
    /// Apply this rewrite to an in-memory copy of the row.
    pub fn apply_to(&self, contact: &mut DbContact) {
        contact.link_precedence = self.link_precedence;
        contact.linked_id = self.linked_id;
        contact.updated_at = self.updated_at;
    }
}

/// Timestamp format used for every TEXT timestamp column. Fixed width with a
/// trailing `Z`, so lexical order equals chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Truncate to the precision stored in SQLite so in-memory values compare
/// equal to what a later read returns.
pub fn storage_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::parse_from_rfc3339(&format_timestamp(&now))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

pub(crate) fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_precedence_round_trips_through_str() {
        assert_eq!("primary".parse::<LinkPrecedence>(), Ok(LinkPrecedence::Primary));
        assert_eq!(LinkPrecedence::Secondary.as_str(), "secondary");
        assert!("tertiary".parse::<LinkPrecedence>().is_err());
    }

    #[test]
    fn test_timestamp_format_sorts_lexically() {
        let early = DateTime::parse_from_rfc3339("2023-04-11T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2023-04-21T05:30:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let (a, b) = (format_timestamp(&early), format_timestamp(&late));
        assert_eq!(a, "2023-04-11T00:00:00.000000Z");
        assert!(a < b);
    }

    #[test]
    fn test_storage_now_survives_round_trip() {
        let now = storage_now();
        let parsed = parse_timestamp(0, &format_timestamp(&now)).expect("parse");
        assert_eq!(parsed, now);
    }

    #[test]
    fn test_busy_classification() {
        let busy = DbError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ));
        assert!(busy.is_busy());
        assert!(!DbError::Migration("x".to_string()).is_busy());
    }
}
