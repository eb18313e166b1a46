use serde::{Deserialize, Serialize};

/// Flat row view of the `scans` table, for listings and CSV export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredScan {
    pub ip: String,
    pub port: u32,
    pub service: String,
    pub last_scanned_at: i64,
    pub response_text: String,
    /// Wall-clock seconds of the last write. Audit only, never compared.
    pub updated_at: i64,
}
