//! Control handshake digests.
//!
//! A client proves it may take control by submitting a digest: the lowercase
//! hex HMAC-SHA256 of the station identifier, keyed with the shared control
//! secret. Operators may also configure a master key, which is compared
//! verbatim and grants the escalated level.
//!
//! Key material is held in [`Zeroizing`] buffers and wiped on drop.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use crate::error::{ProtocolError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Compute the control digest a client must submit for `station_id`.
pub fn control_digest(secret: &[u8], station_id: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| ProtocolError::Custom(format!("Invalid control secret: {e}")))?;
    mac.update(station_id.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Length differences return early; equal-length inputs compare in constant time.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}

/// Which key a submitted digest matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestMatch {
    /// The station digest under the shared secret.
    Station,
    /// The operator's master key.
    MasterKey,
    None,
}

/// Server-side verifier holding the expected digest and the master key.
pub struct ControlKeys {
    expected: Zeroizing<String>,
    master_key: Option<Zeroizing<String>>,
}

impl ControlKeys {
    pub fn new(secret: &[u8], station_id: &str, master_key: Option<&str>) -> Result<Self> {
        let expected = Zeroizing::new(control_digest(secret, station_id)?);
        let master_key = master_key
            .filter(|key| !key.is_empty())
            .map(|key| Zeroizing::new(key.to_string()));

        debug!(
            station_id,
            master_key = master_key.is_some(),
            "Control keys prepared"
        );
        Ok(Self {
            expected,
            master_key,
        })
    }

    /// Check the station digest first, then the master key.
    #[instrument(skip_all)]
    pub fn verify(&self, digest: &str) -> DigestMatch {
        if constant_time_eq(digest.as_bytes(), self.expected.as_bytes()) {
            return DigestMatch::Station;
        }

        match &self.master_key {
            Some(master) if constant_time_eq(digest.as_bytes(), master.as_bytes()) => {
                DigestMatch::MasterKey
            }
            _ => DigestMatch::None,
        }
    }
}

impl std::fmt::Debug for ControlKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlKeys")
            .field("master_key", &self.master_key.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn digest_is_lowercase_hex_sha256() {
        let digest = control_digest(b"secret", "station-1").unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(digest, control_digest(b"secret", "station-1").unwrap());
        assert_ne!(digest, control_digest(b"secret", "station-2").unwrap());
        assert_ne!(digest, control_digest(b"other", "station-1").unwrap());
    }

    #[test]
    fn rfc4231_vector() {
        // Test case 2 of RFC 4231.
        let digest = control_digest(b"Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(
            digest,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_order() {
        let keys = ControlKeys::new(b"secret", "dish", Some("letmein")).unwrap();
        let digest = control_digest(b"secret", "dish").unwrap();
        assert_eq!(keys.verify(&digest), DigestMatch::Station);
        assert_eq!(keys.verify("letmein"), DigestMatch::MasterKey);
        assert_eq!(keys.verify("guess"), DigestMatch::None);
        assert_eq!(keys.verify(""), DigestMatch::None);
    }

    #[test]
    fn near_miss_digests_are_rejected() {
        let keys = ControlKeys::new(b"secret", "dish", None).unwrap();
        let digest = control_digest(b"secret", "dish").unwrap();
        assert_eq!(keys.verify(&digest[..63]), DigestMatch::None);
        assert_eq!(keys.verify(&digest.to_uppercase()), DigestMatch::None);
        assert_eq!(keys.verify(&format!("{digest}0")), DigestMatch::None);
    }

    #[test]
    fn empty_master_key_never_matches() {
        let keys = ControlKeys::new(b"secret", "dish", Some("")).unwrap();
        assert_eq!(keys.verify(""), DigestMatch::None);
    }
}
