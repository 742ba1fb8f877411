//! Contact writer: applies resolver decisions to the store.
//!
//! The writer holds no transaction of its own. Callers run it inside
//! `ContactDb::with_transaction` so a failed insert also discards the
//! demotions that preceded it.

use crate::db::{ContactMutation, DbContact, DbError, NewContact};
use crate::store::ContactStore;

pub struct ContactWriter<'a, S: ContactStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: ContactStore + ?Sized> ContactWriter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn insert_primary(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<DbContact, DbError> {
        let contact = self.store.save(&NewContact::primary(email, phone_number))?;
        log::debug!("Inserted primary contact {}", contact.id);
        Ok(contact)
    }

    pub fn apply_mutations(&self, batch: &[ContactMutation]) -> Result<(), DbError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.store.save_all(batch)?;
        log::debug!("Relinked {} contact(s)", batch.len());
        Ok(())
    }

    pub fn insert_secondary(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
        primary_id: i64,
    ) -> Result<DbContact, DbError> {
        let contact = self
            .store
            .save(&NewContact::secondary(email, phone_number, primary_id))?;
        log::debug!("Inserted secondary contact {} -> {}", contact.id, primary_id);
        Ok(contact)
    }
}
