//! External view of a resolved cluster.

use serde::{Deserialize, Serialize};

use crate::db::DbContact;

/// Wire envelope: `{"contact": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ContactResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactResponse {
    pub primary_contact_id: i64,
    /// Primary's email first, then first-seen order.
    pub emails: Vec<String>,
    /// Primary's phone first, then first-seen order.
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<i64>,
}

/// Project a cluster into its response. `contacts` may or may not include
/// the primary itself; it is skipped either way.
pub fn build_response(primary: &DbContact, contacts: &[DbContact]) -> IdentifyResponse {
    let mut emails: Vec<String> = primary.email.iter().cloned().collect();
    let mut phone_numbers: Vec<String> = primary.phone_number.iter().cloned().collect();
    let mut secondary_contact_ids = Vec::new();

    for contact in contacts.iter().filter(|c| c.id != primary.id) {
        if let Some(email) = &contact.email {
            if !emails.contains(email) {
                emails.push(email.clone());
            }
        }
        if let Some(phone) = &contact.phone_number {
            if !phone_numbers.contains(phone) {
                phone_numbers.push(phone.clone());
            }
        }
        secondary_contact_ids.push(contact.id);
    }

    IdentifyResponse {
        contact: ContactResponse {
            primary_contact_id: primary.id,
            emails,
            phone_numbers,
            secondary_contact_ids,
        },
    }
}
