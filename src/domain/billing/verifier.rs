//! Webhook signature verification.
//!
//! Verifies provider deliveries with HMAC-SHA256 over `"{t}.{payload}"` and
//! a timestamp window that rejects replays and far-future clocks. The
//! signature is checked before the payload is parsed, so unverified bytes
//! never reach the JSON decoder.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::errors::BillingError;
use super::event::ProviderEvent;

/// Default acceptance window for delivery age (5 minutes).
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Default allowance for future timestamps (1 minute of clock skew).
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 60;

/// Parsed components of the signature header.
///
/// Format: `t=<unix_ts>,v1=<hex>[,v1=<hex>...]`. Multiple `v1` entries occur
/// during signing-secret rotation; verification passes if any of them
/// matches. Unknown keys are skipped for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Unix timestamp the provider stamped into the signed payload.
    pub timestamp: i64,
    /// All candidate v1 signatures, decoded from hex.
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, BillingError> {
        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<Vec<u8>> = Vec::new();

        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=').ok_or_else(|| {
                BillingError::MalformedHeader("expected key=value pairs".to_string())
            })?;

            match key {
                "t" => {
                    timestamp = Some(value.parse().map_err(|_| {
                        BillingError::MalformedHeader("timestamp is not an integer".to_string())
                    })?);
                }
                "v1" => {
                    let decoded = hex::decode(value).map_err(|_| {
                        BillingError::MalformedHeader("v1 signature is not hex".to_string())
                    })?;
                    signatures.push(decoded);
                }
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| BillingError::MalformedHeader("missing t component".to_string()))?;
        if signatures.is_empty() {
            return Err(BillingError::MalformedHeader(
                "missing v1 signature".to_string(),
            ));
        }

        Ok(SignatureHeader {
            timestamp,
            signatures,
        })
    }
}

/// Verifier for incoming webhook deliveries.
pub struct EventVerifier {
    secret: String,
    tolerance_secs: i64,
    clock_skew_secs: i64,
}

impl EventVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64, clock_skew_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
            clock_skew_secs,
        }
    }

    /// Verifier with the standard 5 minute / 1 minute windows.
    pub fn with_default_windows(secret: impl Into<String>) -> Self {
        Self::new(secret, DEFAULT_TOLERANCE_SECS, DEFAULT_CLOCK_SKEW_SECS)
    }

    /// Verifies the delivery and parses the raw event envelope.
    ///
    /// Steps: parse the header, bound the timestamp, recompute the HMAC,
    /// compare in constant time against every candidate signature, and only
    /// then deserialize the payload.
    ///
    /// # Errors
    ///
    /// - `MalformedHeader` - header is not `t=...,v1=...`
    /// - `StaleDelivery` - timestamp older than the tolerance window
    /// - `SkewedDelivery` - timestamp further in the future than allowed skew
    /// - `SignatureInvalid` - no candidate signature matches
    /// - `Parse` - payload is not a valid event envelope
    pub fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ProviderEvent, BillingError> {
        let header = SignatureHeader::parse(signature_header)?;

        self.validate_timestamp(header.timestamp)?;

        let expected = self.compute_signature(header.timestamp, payload);
        let matched = header
            .signatures
            .iter()
            .any(|candidate| constant_time_compare(&expected, candidate));
        if !matched {
            return Err(BillingError::SignatureInvalid);
        }

        let event: ProviderEvent = serde_json::from_slice(payload)
            .map_err(|e| BillingError::parse(e.to_string()))?;

        Ok(event)
    }

    fn validate_timestamp(&self, timestamp: i64) -> Result<(), BillingError> {
        let now = chrono::Utc::now().timestamp();
        let age = now - timestamp;

        if age > self.tolerance_secs {
            return Err(BillingError::StaleDelivery);
        }
        if age < -self.clock_skew_secs {
            return Err(BillingError::SkewedDelivery);
        }

        Ok(())
    }

    fn compute_signature(&self, timestamp: i64, payload: &[u8]) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Computes a valid hex signature for test fixtures.
#[cfg(test)]
pub fn compute_test_signature(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
