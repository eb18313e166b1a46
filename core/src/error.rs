use crate::ScanKey;
use std::fmt;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Store operation that failed, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Upsert,
    Close,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreOp::Get => "get",
            StoreOp::Upsert => "upsert",
            StoreOp::Close => "close",
        })
    }
}

/// Everything that can go wrong between raw message bytes and a stored record.
///
/// Decode-stage variants are permanent: retrying the same bytes fails the same way.
/// `Storage` is transient and worth redelivering.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("malformed payload{}: {reason}", key_suffix(.key))]
    MalformedPayload { key: Option<ScanKey>, reason: String },

    #[error("unsupported data version {version} for {key}")]
    UnsupportedVersion { key: ScanKey, version: i64 },

    #[error("missing or invalid field `{field}` in v{version} payload for {key}")]
    MissingField { key: ScanKey, version: u8, field: &'static str },

    #[error("storage {op} failed{}: {source}", key_suffix(.key))]
    Storage {
        op: StoreOp,
        key: Option<ScanKey>,
        #[source]
        source: BoxError,
    },
}

fn key_suffix(key: &Option<ScanKey>) -> String {
    match key {
        Some(k) => format!(" for {k}"),
        None => String::new(),
    }
}

impl ScanError {
    pub fn storage(op: StoreOp, key: Option<&ScanKey>, source: impl Into<BoxError>) -> Self {
        ScanError::Storage { op, key: key.cloned(), source: source.into() }
    }

    /// Permanent errors should not be redelivered.
    pub fn is_permanent(&self) -> bool {
        match self {
            ScanError::MalformedPayload { .. }
            | ScanError::UnsupportedVersion { .. }
            | ScanError::MissingField { .. } => true,
            ScanError::Storage { .. } => false,
        }
    }

    pub fn key(&self) -> Option<&ScanKey> {
        match self {
            ScanError::MalformedPayload { key, .. } | ScanError::Storage { key, .. } => key.as_ref(),
            ScanError::UnsupportedVersion { key, .. } | ScanError::MissingField { key, .. } => Some(key),
        }
    }

    /// Short machine-friendly name, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::MalformedPayload { .. } => "malformed_payload",
            ScanError::UnsupportedVersion { .. } => "unsupported_version",
            ScanError::MissingField { .. } => "missing_field",
            ScanError::Storage { .. } => "storage",
        }
    }
}
