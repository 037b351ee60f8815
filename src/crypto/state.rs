use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const MAC_LEN: usize = 32;

/// How long an install link stays usable.
pub const STATE_MAX_AGE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("malformed state parameter")]
    Malformed,
    #[error("state signature mismatch")]
    BadSignature,
    #[error("state parameter expired")]
    Expired,
    #[error("state secret is empty or unusable")]
    InvalidKey,
}

/// Signs and verifies the OAuth `state` parameter.
///
/// Format: `base64url(hmac || "<issued_ms>.<nonce_hex>")`.
pub struct StateSigner {
    mac: HmacSha256,
    max_age: Duration,
}

impl StateSigner {
    pub fn new(secret: &str) -> Result<Self, StateError> {
        if secret.is_empty() {
            return Err(StateError::InvalidKey);
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
            .map_err(|_| StateError::InvalidKey)?;
        Ok(Self {
            mac,
            max_age: STATE_MAX_AGE,
        })
    }

    pub fn sign(&self, now_ms: i64) -> String {
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce_hex: String = nonce.iter().map(|b| format!("{b:02x}")).collect();
        let payload = format!("{now_ms}.{nonce_hex}");

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        let mut combined = mac.finalize().into_bytes().to_vec();
        combined.extend_from_slice(payload.as_bytes());

        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&combined)
    }

    pub fn verify(&self, signed: &str, now_ms: i64) -> Result<(), StateError> {
        let combined = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signed)
            .map_err(|_| StateError::Malformed)?;
        if combined.len() <= MAC_LEN {
            return Err(StateError::Malformed);
        }

        let (signature, payload) = combined.split_at(MAC_LEN);
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.verify_slice(signature)
            .map_err(|_| StateError::BadSignature)?;

        let issued_ms: i64 = std::str::from_utf8(payload)
            .ok()
            .and_then(|p| p.split_once('.'))
            .and_then(|(ts, _)| ts.parse().ok())
            .ok_or(StateError::Malformed)?;

        let age_ms = now_ms.saturating_sub(issued_ms);
        if age_ms < 0 || age_ms as u128 > self.max_age.as_millis() {
            return Err(StateError::Expired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn fresh_state_verifies() {
        let signer = StateSigner::new("secret").unwrap();
        let state = signer.sign(NOW);
        assert_eq!(signer.verify(&state, NOW + 60_000), Ok(()));
    }

    #[test]
    fn states_are_unique() {
        let signer = StateSigner::new("secret").unwrap();
        assert_ne!(signer.sign(NOW), signer.sign(NOW));
    }

    #[test]
    fn expired_state_is_rejected() {
        let signer = StateSigner::new("secret").unwrap();
        let state = signer.sign(NOW);
        assert_eq!(
            signer.verify(&state, NOW + 10 * 60 * 1000 + 1),
            Err(StateError::Expired)
        );
    }

    #[test]
    fn state_from_the_future_is_rejected() {
        let signer = StateSigner::new("secret").unwrap();
        let state = signer.sign(NOW + 5_000);
        assert_eq!(signer.verify(&state, NOW), Err(StateError::Expired));
    }

    #[test]
    fn other_key_fails_signature() {
        let state = StateSigner::new("secret").unwrap().sign(NOW);
        assert_eq!(
            StateSigner::new("other").unwrap().verify(&state, NOW),
            Err(StateError::BadSignature)
        );
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(matches!(StateSigner::new(""), Err(StateError::InvalidKey)));
    }

    #[test]
    fn garbage_is_malformed() {
        let signer = StateSigner::new("secret").unwrap();
        assert_eq!(signer.verify("not base64!", NOW), Err(StateError::Malformed));
        assert_eq!(signer.verify("c2hvcnQ", NOW), Err(StateError::Malformed));
    }
}
