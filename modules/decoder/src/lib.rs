//! Versioned scan envelope decoding.
//!
//! The wire format is a JSON object with the scan key, a source timestamp, a
//! `data_version` tag and a version-specific `data` object:
//!
//! ```text
//! v1: { "data_version": 1, "data": { "response_bytes_utf8": "<base64>" } }
//! v2: { "data_version": 2, "data": { "response_str": "<text>" } }
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use miniscan_core::{Observation, ScanError, ScanKey};
use serde::{Deserialize, Serialize};

/// Known payload versions. Adding one means a new variant here and a new arm in
/// [`Payload`]; every match below is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataVersion {
    V1 = 1,
    V2 = 2,
}

impl DataVersion {
    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            1 => Some(DataVersion::V1),
            2 => Some(DataVersion::V2),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Raw service response bytes, base64 on the wire.
    V1 { response_bytes: Vec<u8> },
    V2 { response_str: String },
}

impl Payload {
    pub fn version(&self) -> DataVersion {
        match self {
            Payload::V1 { .. } => DataVersion::V1,
            Payload::V2 { .. } => DataVersion::V2,
        }
    }
}

/// A scan message as published by a scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub key: ScanKey,
    pub timestamp: i64,
    pub payload: Payload,
}

#[derive(Deserialize)]
struct RawEnvelope {
    ip: String,
    port: u32,
    service: String,
    timestamp: i64,
    data_version: i64,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct V1Data {
    response_bytes_utf8: String,
}

#[derive(Deserialize)]
struct V2Data {
    response_str: String,
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    ip: &'a str,
    port: u32,
    service: &'a str,
    timestamp: i64,
    data_version: u8,
    data: WireData<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireData<'a> {
    V1 { response_bytes_utf8: String },
    V2 { response_str: &'a str },
}

/// Decode raw message bytes into an [`Observation`].
///
/// Fails without partial output. Errors carry the scan key whenever the outer
/// envelope parsed far enough to know it.
pub fn decode(raw: &[u8]) -> Result<Observation, ScanError> {
    let env = decode_envelope(raw)?;
    let response_text = match env.payload {
        Payload::V1 { response_bytes } => String::from_utf8(response_bytes).map_err(|e| {
            ScanError::MalformedPayload {
                key: Some(env.key.clone()),
                reason: format!("response_bytes_utf8 is not valid UTF-8: {e}"),
            }
        })?,
        Payload::V2 { response_str } => response_str,
    };
    Ok(Observation { key: env.key, timestamp: env.timestamp, response_text })
}

/// Parse the envelope and its version-specific payload without interpreting the
/// response bytes.
pub fn decode_envelope(raw: &[u8]) -> Result<Envelope, ScanError> {
    let raw: RawEnvelope = serde_json::from_slice(raw)
        .map_err(|e| ScanError::MalformedPayload { key: None, reason: e.to_string() })?;
    let key = ScanKey::new(raw.ip, raw.port, raw.service);

    let Some(version) = DataVersion::from_tag(raw.data_version) else {
        return Err(ScanError::UnsupportedVersion { key, version: raw.data_version });
    };

    let payload = match version {
        DataVersion::V1 => {
            let data: V1Data = serde_json::from_value(raw.data).map_err(|_| ScanError::MissingField {
                key: key.clone(),
                version: version.tag(),
                field: "response_bytes_utf8",
            })?;
            let response_bytes = STANDARD.decode(data.response_bytes_utf8.as_bytes()).map_err(|e| {
                ScanError::MalformedPayload {
                    key: Some(key.clone()),
                    reason: format!("response_bytes_utf8 is not valid base64: {e}"),
                }
            })?;
            Payload::V1 { response_bytes }
        }
        DataVersion::V2 => {
            let data: V2Data = serde_json::from_value(raw.data).map_err(|_| ScanError::MissingField {
                key: key.clone(),
                version: version.tag(),
                field: "response_str",
            })?;
            Payload::V2 { response_str: data.response_str }
        }
    };

    Ok(Envelope { key, timestamp: raw.timestamp, payload })
}

impl Envelope {
    /// Wire encoding, the inverse of [`decode_envelope`].
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        let data = match &self.payload {
            Payload::V1 { response_bytes } => {
                WireData::V1 { response_bytes_utf8: STANDARD.encode(response_bytes) }
            }
            Payload::V2 { response_str } => WireData::V2 { response_str },
        };
        serde_json::to_vec(&WireEnvelope {
            ip: &self.key.ip,
            port: self.key.port,
            service: &self.key.service,
            timestamp: self.timestamp,
            data_version: self.payload.version().tag(),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(version: i64, data: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "ip": "192.168.1.1",
            "port": 80,
            "service": "HTTP",
            "timestamp": 1000,
            "data_version": version,
            "data": data,
        }))
        .unwrap()
    }

    fn key() -> ScanKey {
        ScanKey::new("192.168.1.1", 80, "HTTP")
    }

    #[test]
    fn v1_base64_payload() {
        let raw = envelope(1, json!({ "response_bytes_utf8": STANDARD.encode("hello world") }));
        let obs = decode(&raw).unwrap();
        assert_eq!(obs.response_text, "hello world");
        assert_eq!(obs.key, key());
        assert_eq!(obs.timestamp, 1000);
    }

    #[test]
    fn v2_plain_payload() {
        let raw = envelope(2, json!({ "response_str": "hello world" }));
        let obs = decode(&raw).unwrap();
        assert_eq!(obs.response_text, "hello world");
    }

    #[test]
    fn unknown_version_is_rejected_with_tag() {
        let raw = envelope(99, json!({ "response_str": "hello world" }));
        match decode(&raw).unwrap_err() {
            ScanError::UnsupportedVersion { key: k, version } => {
                assert_eq!(k, key());
                assert_eq!(version, 99);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn not_json_is_malformed() {
        let err = decode(b"invalid json").unwrap_err();
        assert!(matches!(err, ScanError::MalformedPayload { key: None, .. }));
        assert!(err.is_permanent());
    }

    #[test]
    fn missing_outer_field_is_malformed() {
        let raw = br#"{"ip":"1.1.1.1","service":"SSH","timestamp":5,"data_version":2,"data":{"response_str":"x"}}"#;
        assert!(matches!(decode(raw).unwrap_err(), ScanError::MalformedPayload { key: None, .. }));
    }

    #[test]
    fn missing_version_field() {
        let err = decode(&envelope(1, json!({ "wrong_field": "value" }))).unwrap_err();
        assert!(matches!(
            err,
            ScanError::MissingField { version: 1, field: "response_bytes_utf8", .. }
        ));

        let err = decode(&envelope(2, json!({ "response_bytes_utf8": "aGk=" }))).unwrap_err();
        assert!(matches!(err, ScanError::MissingField { version: 2, field: "response_str", .. }));
    }

    #[test]
    fn wrong_field_type_is_missing_field() {
        let err = decode(&envelope(2, json!({ "response_str": 42 }))).unwrap_err();
        assert!(matches!(err, ScanError::MissingField { field: "response_str", .. }));

        let err = decode(&envelope(1, json!(null))).unwrap_err();
        assert!(matches!(err, ScanError::MissingField { field: "response_bytes_utf8", .. }));
    }

    #[test]
    fn bad_base64_keeps_key_context() {
        let err = decode(&envelope(1, json!({ "response_bytes_utf8": "not base64!!" }))).unwrap_err();
        match err {
            ScanError::MalformedPayload { key: Some(k), reason } => {
                assert_eq!(k, key());
                assert!(reason.contains("base64"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn v1_non_utf8_bytes_are_malformed() {
        let raw = envelope(1, json!({ "response_bytes_utf8": STANDARD.encode([0xffu8, 0xfe, 0x00]) }));
        assert!(matches!(decode(&raw).unwrap_err(), ScanError::MalformedPayload { key: Some(_), .. }));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let raw = br#"{"ip":"1.1.1.1","port":53,"service":"DNS","timestamp":7,"data_version":2,
            "data":{"response_str":"ok","extra":true},"trace":"abc"}"#;
        assert_eq!(decode(raw).unwrap().response_text, "ok");
    }

    #[test]
    fn to_json_matches_wire_shape() {
        let env = Envelope {
            key: ScanKey::new("1.1.1.4", 22, "SSH"),
            timestamp: 1_700_000_000,
            payload: Payload::V1 { response_bytes: b"service response: 4".to_vec() },
        };
        let value: serde_json::Value = serde_json::from_slice(&env.to_json().unwrap()).unwrap();
        assert_eq!(value["data_version"], 1);
        assert_eq!(value["data"]["response_bytes_utf8"], STANDARD.encode("service response: 4"));
        assert_eq!(decode_envelope(&env.to_json().unwrap()).unwrap(), env);
    }
}
