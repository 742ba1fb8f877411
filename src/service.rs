//! Identity service: entry point for identify calls.
//!
//! Owns connection reuse, the one-transaction-per-call boundary and the
//! per-service latency rollups.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::db::ContactDb;
use crate::error::IdentifyError;
use crate::latency::{CallKind, LatencyRecorder, LatencyRollupsPayload};
use crate::resolver::{ClusterResolver, Resolution};
use crate::response::{build_response, IdentifyResponse};
use crate::types::{Config, IdentifyRequest, Observation};

/// Shared, thread-safe front door for identify calls.
///
/// Each call checks out its own connection, so calls on separate threads
/// only contend on SQLite's write lock.
pub struct IdentityService {
    db_path: PathBuf,
    busy_timeout: Duration,
    max_idle: usize,
    latency: LatencyRecorder,
    idle: Mutex<Vec<ContactDb>>,
}

/// A connection on loan from the service; returned to the idle list on drop.
struct PooledDb<'a> {
    db: Option<ContactDb>,
    service: &'a IdentityService,
}

impl Deref for PooledDb<'_> {
    type Target = ContactDb;

    fn deref(&self) -> &ContactDb {
        // Only `Drop` takes the connection out.
        self.db.as_ref().expect("pooled connection present until drop")
    }
}

impl Drop for PooledDb<'_> {
    fn drop(&mut self) {
        if let Some(db) = self.db.take() {
            self.service.release(db);
        }
    }
}

impl IdentityService {
    /// Open the store named by `config`, running migrations up front so a
    /// broken database fails here rather than on the first call.
    pub fn open(config: &Config) -> Result<Self, IdentifyError> {
        let db_path = match &config.db_path {
            Some(path) => path.clone(),
            None => ContactDb::default_db_path()?,
        };
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let first = ContactDb::open_at(db_path.clone(), busy_timeout)?;
        log::info!("Contact store ready at {}", db_path.display());

        Ok(Self {
            db_path,
            busy_timeout,
            max_idle: config.max_idle_connections,
            latency: LatencyRecorder::new(config.latency_budget_ms),
            idle: Mutex::new(vec![first]),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Latency and anomaly counts for calls made through this service.
    pub fn latency_rollups(&self) -> LatencyRollupsPayload {
        self.latency.snapshot()
    }

    fn checkout(&self) -> Result<PooledDb<'_>, IdentifyError> {
        let reused = self.idle.lock().pop();
        let db = match reused {
            Some(db) => db,
            None => ContactDb::open_at(self.db_path.clone(), self.busy_timeout)?,
        };
        Ok(PooledDb {
            db: Some(db),
            service: self,
        })
    }

    fn release(&self, db: ContactDb) {
        // A connection still inside a transaction is not safe to hand out again.
        if !db.conn_ref().is_autocommit() {
            log::warn!("Discarding connection left inside a transaction");
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(db);
        }
    }

    /// Validate a wire request, then identify it.
    pub fn identify_request(
        &self,
        request: IdentifyRequest,
    ) -> Result<IdentifyResponse, IdentifyError> {
        let observation = Observation::try_from(request)?;
        self.identify(&observation)
    }

    /// Resolve one observation: match, merge, record, and return the
    /// cluster view. All writes commit together or not at all.
    pub fn identify(&self, observation: &Observation) -> Result<IdentifyResponse, IdentifyError> {
        let started = Instant::now();
        let result = self.checkout().and_then(|db| {
            db.with_transaction(|tx| {
                ClusterResolver::new(tx)
                    .resolve(observation)
                    .map_err(IdentifyError::from)
            })
        });
        let elapsed_ms = started.elapsed().as_millis();

        let resolution = match result {
            Ok(resolution) => resolution,
            Err(e) => {
                self.latency.record(CallKind::Failed, elapsed_ms, false);
                log::error!("identify failed after {elapsed_ms}ms: {e}");
                return Err(e);
            }
        };
        self.latency.record(
            CallKind::from(&resolution.outcome),
            elapsed_ms,
            resolution.outcome.anomaly,
        );
        log_outcome(&resolution, elapsed_ms);

        Ok(build_response(&resolution.primary, &resolution.contacts))
    }
}

fn log_outcome(resolution: &Resolution, elapsed_ms: u128) {
    let primary_id = resolution.primary.id;
    let outcome = &resolution.outcome;
    if outcome.created_primary {
        log::info!("Created primary contact {primary_id} ({elapsed_ms}ms)");
        return;
    }
    if !outcome.demoted.is_empty() {
        log::info!(
            "Merged former primaries {:?} into {primary_id} ({} row(s) relinked)",
            outcome.demoted,
            outcome.relinked
        );
    }
    if let Some(secondary_id) = outcome.inserted_secondary {
        log::info!("Linked new secondary {secondary_id} to primary {primary_id}");
    }
    if outcome.is_noop() {
        log::debug!("Observation already known to cluster {primary_id} ({elapsed_ms}ms)");
    }
}
