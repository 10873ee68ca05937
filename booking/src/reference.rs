//! Booking references and verification payloads.
//!
//! A reference reads `{SITECODE}-{YYYYMMDD}-{SUFFIX}` with a six character
//! suffix from `A-Z0-9`. Uniqueness is enforced by the ledger, which rejects a
//! duplicate; callers regenerate and retry.
//!
//! The verification payload is the base64 JSON of [`VerificationClaims`]. With
//! a signing key it becomes `"<base64>.<hex hmac-sha256>"` and the gate can
//! detect forgery. Without one the claims are informational only and must be
//! compared against the ledger record at scan time.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{BookingReference, SiteId, Ticket, TicketStatus, TimeSlot};

type HmacSha256 = Hmac<Sha256>;

/// Length of the random suffix
pub const SUFFIX_LEN: usize = 6;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a reference with the given randomness source
pub fn generate_reference<R>(site_code: &str, visit_date: NaiveDate, rng: &mut R) -> BookingReference
where
    R: Rng + ?Sized,
{
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect();
    BookingReference::new(format!(
        "{}-{}-{suffix}",
        site_code.to_ascii_uppercase(),
        visit_date.format("%Y%m%d")
    ))
}

/// Generate a reference with the thread-local generator
#[must_use]
pub fn new_reference(site_code: &str, visit_date: NaiveDate) -> BookingReference {
    generate_reference(site_code, visit_date, &mut rand::thread_rng())
}

/// Claims carried by a gate-scan payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationClaims {
    /// Booking reference
    pub reference: BookingReference,
    /// Site
    pub site_id: SiteId,
    /// Visit date
    pub visit_date: NaiveDate,
    /// Booked window
    pub slot: TimeSlot,
    /// Booked headcount
    pub visitor_count: u32,
    /// Status when the payload was issued
    pub status: TicketStatus,
}

impl From<&Ticket> for VerificationClaims {
    fn from(ticket: &Ticket) -> Self {
        Self {
            reference: ticket.reference.clone(),
            site_id: ticket.site_id.clone(),
            visit_date: ticket.visit_date,
            slot: ticket.slot,
            visitor_count: ticket.visitor_count(),
            status: ticket.status,
        }
    }
}

/// Integrity of a decoded payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Integrity {
    /// Signature checked against the server key
    Signed,
    /// No key configured; claims are unverified
    Unsigned,
}

/// A decoded payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedPayload {
    /// Decoded claims
    pub claims: VerificationClaims,
    /// How far the claims can be trusted
    pub integrity: Integrity,
}

/// Payload decoding failures
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// Not base64 JSON claims
    #[error("malformed verification payload: {0}")]
    Malformed(String),
    /// Signature missing or wrong
    #[error("verification payload signature does not match")]
    Tampered,
}

/// Issues and checks verification payloads.
///
/// Cloning shares the key.
#[derive(Clone, Default)]
pub struct PayloadSigner {
    key: Option<Arc<[u8]>>,
}

impl std::fmt::Debug for PayloadSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadSigner")
            .field("signing", &self.is_signing())
            .finish()
    }
}

impl PayloadSigner {
    /// Signer using `key`; `None` or an empty key issues unsigned payloads
    #[must_use]
    pub fn new(key: Option<&str>) -> Self {
        Self {
            key: key.filter(|k| !k.is_empty()).map(|k| Arc::from(k.as_bytes())),
        }
    }

    /// Signer that never signs
    #[must_use]
    pub fn unsigned() -> Self {
        Self::default()
    }

    /// Does this signer attach an HMAC?
    #[must_use]
    pub fn is_signing(&self) -> bool {
        self.key.is_some()
    }

    /// Encode claims for the ticket artifact
    #[must_use]
    pub fn issue(&self, claims: &VerificationClaims) -> String {
        // Claims are plain data; serializing them cannot fail.
        let json = serde_json::to_vec(claims).unwrap_or_default();
        let body = STANDARD.encode(json);
        match self.mac(&body) {
            Some(mac) => format!("{body}.{}", hex::encode(mac.finalize().into_bytes())),
            None => body,
        }
    }

    /// Decode and, when a key is configured, authenticate a payload.
    ///
    /// With a key configured an unsigned payload is rejected as tampered.
    ///
    /// # Errors
    ///
    /// [`PayloadError::Malformed`] or [`PayloadError::Tampered`].
    pub fn verify(&self, payload: &str) -> Result<VerifiedPayload, PayloadError> {
        let (body, signature) = match payload.split_once('.') {
            Some((body, signature)) => (body, Some(signature)),
            None => (payload, None),
        };

        let integrity = match self.mac(body) {
            Some(mac) => {
                let signature = signature.ok_or(PayloadError::Tampered)?;
                let expected = hex::decode(signature).map_err(|_| PayloadError::Tampered)?;
                mac.verify_slice(&expected).map_err(|_| PayloadError::Tampered)?;
                Integrity::Signed
            },
            None => Integrity::Unsigned,
        };

        Ok(VerifiedPayload {
            claims: decode_claims(body)?,
            integrity,
        })
    }

    fn mac(&self, body: &str) -> Option<HmacSha256> {
        let key = self.key.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(key).ok()?;
        mac.update(body.as_bytes());
        Some(mac)
    }
}

/// Read the claims without checking any signature
///
/// # Errors
///
/// [`PayloadError::Malformed`] when the body is not base64 JSON claims.
pub fn decode_unverified(payload: &str) -> Result<VerificationClaims, PayloadError> {
    let body = payload.split_once('.').map_or(payload, |(body, _)| body);
    decode_claims(body)
}

fn decode_claims(body: &str) -> Result<VerificationClaims, PayloadError> {
    let json = STANDARD
        .decode(body)
        .map_err(|e| PayloadError::Malformed(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| PayloadError::Malformed(e.to_string()))
}
