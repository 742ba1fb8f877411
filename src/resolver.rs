//! Cluster resolution: turn an observation into one normalized cluster.
//!
//! Matching is exact string equality on email or phone. Every contact touched
//! by the observation ends up in a single cluster whose primary is the oldest
//! contact (by `created_at`, then `id`). Secondaries always point straight at
//! that primary. A new secondary is recorded only when the observation carries
//! an email or phone the cluster has never seen.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};

use crate::db::{storage_now, ContactMutation, DbContact, DbError, LinkPrecedence};
use crate::store::ContactStore;
use crate::types::Observation;
use crate::writer::ContactWriter;

/// Result of resolving one observation.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub primary: DbContact,
    /// Every cluster member after mutation, primary included, oldest first.
    /// A row inserted by this call comes last.
    pub contacts: Vec<DbContact>,
    pub outcome: ResolutionOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionOutcome {
    /// No contact matched; a fresh primary was inserted.
    pub created_primary: bool,
    /// Id of a secondary inserted to record new information.
    pub inserted_secondary: Option<i64>,
    /// Former primaries demoted into this cluster.
    pub demoted: Vec<i64>,
    /// Rows rewritten (demotions included).
    pub relinked: usize,
    /// Stored links were broken or deeper than one hop; see `chase_primary`.
    pub anomaly: bool,
}

impl ResolutionOutcome {
    pub fn is_noop(&self) -> bool {
        !self.created_primary && self.inserted_secondary.is_none() && self.relinked == 0
    }
}

/// Oldest primary among `contacts`.
pub fn oldest_primary(contacts: &[DbContact]) -> Option<&DbContact> {
    contacts
        .iter()
        .filter(|c| c.is_primary())
        .min_by_key(|c| c.age_key())
}

/// Ids that seed the cluster expansion: every matched id and linked id, plus
/// the chosen primary.
pub fn candidate_ids(matches: &[DbContact], primary_id: i64) -> BTreeSet<i64> {
    let mut ids: BTreeSet<i64> = matches
        .iter()
        .flat_map(|c| std::iter::once(c.id).chain(c.linked_id))
        .collect();
    ids.insert(primary_id);
    ids
}

/// Rewrites needed so that `primary_id` is the sole primary and every other
/// member links straight to it. Members already in that shape are skipped.
pub fn normalize(
    cluster: &[DbContact],
    primary_id: i64,
    now: DateTime<Utc>,
) -> Vec<ContactMutation> {
    let mut batch = Vec::new();
    for contact in cluster {
        if contact.id == primary_id {
            if !contact.is_primary() || contact.linked_id.is_some() {
                batch.push(ContactMutation {
                    id: contact.id,
                    link_precedence: LinkPrecedence::Primary,
                    linked_id: None,
                    updated_at: now,
                });
            }
            continue;
        }

        let mut precedence = contact.link_precedence;
        let mut linked_id = contact.linked_id;
        let mut changed = false;
        if precedence == LinkPrecedence::Primary {
            precedence = LinkPrecedence::Secondary;
            changed = true;
        }
        if linked_id != Some(primary_id) {
            linked_id = Some(primary_id);
            changed = true;
        }
        if changed {
            batch.push(ContactMutation {
                id: contact.id,
                link_precedence: precedence,
                linked_id,
                updated_at: now,
            });
        }
    }
    batch
}

/// Whether the observation carries a supplied value the cluster lacks.
pub fn has_new_information(cluster: &[DbContact], observation: &Observation) -> bool {
    let email_known = |email: &str| cluster.iter().any(|c| c.email.as_deref() == Some(email));
    let phone_known =
        |phone: &str| cluster.iter().any(|c| c.phone_number.as_deref() == Some(phone));

    let new_email = observation.email.as_deref().is_some_and(|e| !email_known(e));
    let new_phone = observation
        .phone_number
        .as_deref()
        .is_some_and(|p| !phone_known(p));
    new_email || new_phone
}

/// Resolves observations against a store. Must run inside the caller's
/// transaction.
pub struct ClusterResolver<'a, S: ContactStore + ?Sized> {
    store: &'a S,
    writer: ContactWriter<'a, S>,
}

impl<'a, S: ContactStore + ?Sized> ClusterResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            writer: ContactWriter::new(store),
        }
    }

    pub fn resolve(&self, observation: &Observation) -> Result<Resolution, DbError> {
        let email = observation.email.as_deref();
        let phone_number = observation.phone_number.as_deref();

        let matches = self.store.find_by_email_or_phone(email, phone_number)?;
        let Some(pivot) = matches.iter().min_by_key(|c| c.age_key()) else {
            let primary = self.writer.insert_primary(email, phone_number)?;
            return Ok(Resolution {
                contacts: vec![primary.clone()],
                primary,
                outcome: ResolutionOutcome {
                    created_primary: true,
                    ..Default::default()
                },
            });
        };

        let mut outcome = ResolutionOutcome::default();
        let provisional = match oldest_primary(&matches) {
            Some(primary) => primary.clone(),
            None => {
                let (primary, anomaly) = self.chase_primary(pivot)?;
                outcome.anomaly = anomaly;
                primary
            }
        };

        let ids = candidate_ids(&matches, provisional.id);
        let mut cluster = dedup_by_id(self.store.find_by_ids_or_linked_ids(&ids)?);
        if !cluster.iter().any(|c| c.id == provisional.id) {
            cluster.push(provisional.clone());
        }

        // A matched secondary may drag in a primary older than any matched one.
        let primary = oldest_primary(&cluster).cloned().unwrap_or(provisional);

        let batch = normalize(&cluster, primary.id, storage_now());
        self.writer.apply_mutations(&batch)?;
        for mutation in &batch {
            if let Some(contact) = cluster.iter_mut().find(|c| c.id == mutation.id) {
                if contact.is_primary() && mutation.link_precedence == LinkPrecedence::Secondary {
                    outcome.demoted.push(contact.id);
                }
                mutation.apply_to(contact);
            }
        }
        outcome.relinked = batch.len();

        let primary = cluster
            .iter()
            .find(|c| c.id == primary.id)
            .cloned()
            .unwrap_or(primary);

        if has_new_information(&cluster, observation) {
            let inserted = self
                .writer
                .insert_secondary(email, phone_number, primary.id)?;
            outcome.inserted_secondary = Some(inserted.id);
            cluster.push(inserted);
        }

        Ok(Resolution {
            primary,
            contacts: cluster,
            outcome,
        })
    }

    /// Walk `linked_id` from `pivot` to its primary when only secondaries
    /// matched. One hop is the normal shape. Anything longer, a dangling link
    /// or a cycle is reported as an anomaly; the walk then stops and the last
    /// row reached is promoted by `normalize`.
    fn chase_primary(&self, pivot: &DbContact) -> Result<(DbContact, bool), DbError> {
        let mut current = pivot.clone();
        let mut visited = HashSet::from([current.id]);
        let mut hops = 0usize;
        while let Some(next_id) = current.linked_id {
            if !visited.insert(next_id) {
                log::warn!("Link cycle through contact {next_id} (from {})", pivot.id);
                return Ok((current, true));
            }
            let Some(next) = self.store.find_by_id(next_id)? else {
                log::warn!("Contact {} links to missing contact {next_id}", current.id);
                return Ok((current, true));
            };
            hops += 1;
            current = next;
            if current.is_primary() {
                if hops > 1 {
                    log::warn!(
                        "Contact {} reached primary {} through {hops} links",
                        pivot.id,
                        current.id
                    );
                }
                return Ok((current, hops > 1));
            }
        }

        log::warn!("No primary reachable from contact {}; promoting contact {}", pivot.id, current.id);
        Ok((current, true))
    }
}

fn dedup_by_id(contacts: Vec<DbContact>) -> Vec<DbContact> {
    let mut seen = HashSet::new();
    contacts.into_iter().filter(|c| seen.insert(c.id)).collect()
}
