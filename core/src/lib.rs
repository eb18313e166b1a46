//! Core types and the storage contract shared by the miniscan crates.

use serde::{Deserialize, Serialize};
use std::fmt;

mod error;
pub mod pacer;
mod store;

pub use error::{ScanError, StoreOp};
pub use store::{MemoryStore, ScanStore};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Identity of a scanned service. Never changes once a record exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScanKey {
    pub ip: String,
    pub port: u32,
    pub service: String,
}

impl ScanKey {
    pub fn new(ip: impl Into<String>, port: u32, service: impl Into<String>) -> Self {
        ScanKey { ip: ip.into(), port, service: service.into() }
    }
}

impl fmt::Display for ScanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.ip, self.port, self.service)
    }
}

/// A decoded observation. `timestamp` is assigned by the scanner, not on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub key: ScanKey,
    pub timestamp: i64,
    pub response_text: String,
}

/// Persisted state for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub key: ScanKey,
    pub last_scanned_at: i64,
    pub response_text: String,
}

impl From<Observation> for ScanRecord {
    fn from(obs: Observation) -> Self {
        ScanRecord {
            key: obs.key,
            last_scanned_at: obs.timestamp,
            response_text: obs.response_text,
        }
    }
}

impl From<&Observation> for ScanRecord {
    fn from(obs: &Observation) -> Self {
        obs.clone().into()
    }
}
