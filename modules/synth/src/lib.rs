//! Synthetic scan observations for exercising delivery end to end.

use miniscan_core::ScanKey;
use rand::seq::SliceRandom;
use rand::Rng;
use scan_decoder::{Envelope, Payload};

pub const DEFAULT_SERVICES: &[&str] = &["HTTP", "SSH", "DNS"];

/// Envelope generator. Randomness and the clock are supplied by the caller.
#[derive(Debug, Clone)]
pub struct Generator {
    pub services: Vec<String>,
    /// Probability that an envelope is backdated, to provoke out-of-order delivery.
    pub stale_ratio: f64,
    pub max_skew_secs: i64,
}

impl Default for Generator {
    fn default() -> Self {
        Generator {
            services: DEFAULT_SERVICES.iter().map(|s| s.to_string()).collect(),
            stale_ratio: 0.0,
            max_skew_secs: 24 * 60 * 60,
        }
    }
}

impl Generator {
    pub fn next<R: Rng + ?Sized>(&self, rng: &mut R, now: i64) -> Envelope {
        let service = self
            .services
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| DEFAULT_SERVICES[0].to_string());
        let key = ScanKey::new(format!("1.1.1.{}", rng.gen_range(0..255)), rng.gen_range(0..65535), service);

        let mut timestamp = now;
        if self.stale_ratio > 0.0 && rng.gen_bool(self.stale_ratio.min(1.0)) {
            timestamp -= rng.gen_range(1..=self.max_skew_secs.max(1));
        }

        let response = format!("service response: {}", rng.gen_range(0..100));
        let payload = if rng.gen_bool(0.5) {
            Payload::V1 { response_bytes: response.into_bytes() }
        } else {
            Payload::V2 { response_str: response }
        };
        Envelope { key, timestamp, payload }
    }
}
