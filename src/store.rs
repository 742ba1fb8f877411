//! Storage seam consumed by the resolver and writer.
//!
//! Every call made through this trait during one `identify` runs inside the
//! transaction the caller opened; implementations never begin or commit on
//! their own.

use std::collections::BTreeSet;

use crate::db::{ContactMutation, DbContact, DbError, NewContact};

pub trait ContactStore {
    /// Contacts whose email equals `email` or whose phone equals `phone_number`.
    /// An absent argument matches nothing.
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<DbContact>, DbError>;

    /// Contacts whose `id` or `linked_id` is in `ids`, oldest first.
    fn find_by_ids_or_linked_ids(&self, ids: &BTreeSet<i64>) -> Result<Vec<DbContact>, DbError>;

    fn find_by_id(&self, id: i64) -> Result<Option<DbContact>, DbError>;

    /// Insert a contact, assigning its id and timestamps.
    fn save(&self, contact: &NewContact) -> Result<DbContact, DbError>;

    /// Rewrite precedence, link and `updated_at` for each named contact.
    fn save_all(&self, mutations: &[ContactMutation]) -> Result<(), DbError>;
}
