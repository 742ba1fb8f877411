use std::collections::BTreeSet;

use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::*;
use crate::store::ContactStore;

const CONTACT_COLUMNS: &str =
    "id, email, phone_number, linked_id, link_precedence, created_at, updated_at";

impl ContactDb {
    // =========================================================================
    // Contacts
    // =========================================================================

    fn map_contact_row(row: &Row) -> rusqlite::Result<DbContact> {
        let precedence: String = row.get(4)?;
        let link_precedence = precedence.parse::<LinkPrecedence>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;
        let created_at: String = row.get(5)?;
        let updated_at: String = row.get(6)?;
        Ok(DbContact {
            id: row.get(0)?,
            email: row.get(1)?,
            phone_number: row.get(2)?,
            linked_id: row.get(3)?,
            link_precedence,
            created_at: parse_timestamp(5, &created_at)?,
            updated_at: parse_timestamp(6, &updated_at)?,
        })
    }

    /// Every contact, oldest first.
    pub fn get_all_contacts(&self) -> Result<Vec<DbContact>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map([], Self::map_contact_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The primary and all secondaries linked to it, oldest first.
    pub fn get_cluster(&self, primary_id: i64) -> Result<Vec<DbContact>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts
             WHERE id = ?1 OR linked_id = ?1
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![primary_id], Self::map_contact_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl ContactStore for ContactDb {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<DbContact>, DbError> {
        if email.is_none() && phone_number.is_none() {
            return Ok(Vec::new());
        }
        // NULL = NULL is never true, so an absent argument matches nothing.
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts
             WHERE email = ?1 OR phone_number = ?2
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![email, phone_number], Self::map_contact_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn find_by_ids_or_linked_ids(&self, ids: &BTreeSet<i64>) -> Result<Vec<DbContact>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts
             WHERE id IN ({placeholders}) OR linked_id IN ({placeholders})
             ORDER BY created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let bound = ids.iter().chain(ids.iter());
        let rows = stmt.query_map(params_from_iter(bound), Self::map_contact_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn find_by_id(&self, id: i64) -> Result<Option<DbContact>, DbError> {
        let contact = self
            .conn
            .query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                params![id],
                Self::map_contact_row,
            )
            .optional()?;
        Ok(contact)
    }

    fn save(&self, contact: &NewContact) -> Result<DbContact, DbError> {
        let now = storage_now();
        let stamp = format_timestamp(&now);
        self.conn.execute(
            "INSERT INTO contacts (email, phone_number, linked_id, link_precedence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                contact.email,
                contact.phone_number,
                contact.linked_id,
                contact.link_precedence.as_str(),
                stamp,
            ],
        )?;
        Ok(DbContact {
            id: self.conn.last_insert_rowid(),
            email: contact.email.clone(),
            phone_number: contact.phone_number.clone(),
            linked_id: contact.linked_id,
            link_precedence: contact.link_precedence,
            created_at: now,
            updated_at: now,
        })
    }

    fn save_all(&self, mutations: &[ContactMutation]) -> Result<(), DbError> {
        if mutations.is_empty() {
            return Ok(());
        }
        let mut stmt = self.conn.prepare(
            "UPDATE contacts
             SET link_precedence = ?1, linked_id = ?2, updated_at = ?3
             WHERE id = ?4",
        )?;
        for m in mutations {
            let changed = stmt.execute(params![
                m.link_precedence.as_str(),
                m.linked_id,
                format_timestamp(&m.updated_at),
                m.id,
            ])?;
            if changed == 0 {
                return Err(DbError::ContactNotFound(m.id));
            }
        }
        Ok(())
    }
}
