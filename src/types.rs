//! Configuration and inbound request types.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::IdentifyError;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 8;
pub const DEFAULT_LATENCY_BUDGET_MS: u64 = 250;

/// Service configuration, read from `~/.idrecon/config.json`.
///
/// Every field has a default, so an empty object (or a missing file) is a
/// valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Database file. Defaults to `~/.idrecon/contacts.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// How long a call waits for another writer before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Idle connections kept for reuse.
    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: usize,
    #[serde(default = "default_latency_budget_ms")]
    pub latency_budget_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_max_idle_connections() -> usize {
    DEFAULT_MAX_IDLE_CONNECTIONS
}

fn default_latency_budget_ms() -> u64 {
    DEFAULT_LATENCY_BUDGET_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
            latency_budget_ms: DEFAULT_LATENCY_BUDGET_MS,
        }
    }
}

impl Config {
    /// Config pointing at an explicit database file, defaults elsewhere.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: Some(path.into()),
            ..Self::default()
        }
    }
}

/// An inbound identify request, as it arrives on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    /// Clients send phone numbers as strings or as bare JSON numbers.
    #[serde(default, deserialize_with = "string_or_number")]
    pub phone_number: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Uint(u64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Uint(n) => n.to_string(),
    }))
}

/// A validated email/phone pair. At least one field is present and neither
/// present field is blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

impl Observation {
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Result<Self, IdentifyError> {
        let email = non_blank(email);
        let phone_number = non_blank(phone_number);
        if email.is_none() && phone_number.is_none() {
            return Err(IdentifyError::InvalidRequest(
                "Either email or phoneNumber must be provided".to_string(),
            ));
        }
        Ok(Self {
            email,
            phone_number,
        })
    }
}

impl TryFrom<IdentifyRequest> for Observation {
    type Error = IdentifyError;

    fn try_from(request: IdentifyRequest) -> Result<Self, Self::Error> {
        Observation::new(request.email.as_deref(), request.phone_number.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
