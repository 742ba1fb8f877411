//! Identity reconciliation.
//!
//! Every observation (an email, a phone number, or both) is matched against
//! stored contacts and folded into a cluster with exactly one primary: the
//! oldest contact. The resolver merges clusters an observation bridges and
//! records new values as secondaries, all inside one write transaction.

pub mod db;
pub mod error;
pub mod latency;
mod migrations;
pub mod resolver;
pub mod response;
pub mod service;
pub mod state;
pub mod store;
pub mod types;
pub mod writer;

pub use error::{ErrorBody, IdentifyError};
pub use response::{ContactResponse, IdentifyResponse};
pub use service::IdentityService;
pub use types::{Config, IdentifyRequest, Observation};
