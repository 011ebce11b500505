//! Shared-secret integrity signatures (HMAC-SHA256).
//!
//! The signature covers the exact bytes on the wire, i.e. the compressed
//! payload, and travels hex-encoded in the [`SIGNATURE_HEADER`] header.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded signature.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

/// Signs and verifies payloads with a shared key.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    pub fn new(key: &[u8]) -> Self {
        let mac = match HmacSha256::new_from_slice(key) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC accepts keys of any length"),
        };
        Self { mac }
    }

    /// Build a signer from an optional configured key. An empty key means
    /// signing is disabled.
    pub fn from_key(key: Option<&str>) -> Option<Self> {
        key.filter(|k| !k.is_empty()).map(|k| Self::new(k.as_bytes()))
    }

    /// Hex-encoded signature of `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex signature against `payload`.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Signer(..)")
    }
}
