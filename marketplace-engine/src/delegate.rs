use crate::errors::{MarketplaceError, Result};
use ed25519_dalek::{Signer, SigningKey};
use std::fmt;

/// Process-wide custodial keypair: transfer authority over seller token
/// pools and fee payer for buyer account creation. Loaded once at startup,
/// immutable afterwards, shared across concurrent fulfillments via `Arc`.
pub struct DelegateCredential {
    signing_key: SigningKey,
    address: String,
}

impl DelegateCredential {
    /// Build from a hex-encoded 32-byte signing seed. A malformed seed is a
    /// configuration fault, not a request-level error.
    pub fn from_hex_seed(seed_hex: &str) -> Result<Self> {
        let bytes = hex::decode(seed_hex.trim()).map_err(|e| {
            MarketplaceError::Config(format!("delegate seed is not valid hex: {}", e))
        })?;

        let seed: [u8; 32] = bytes.try_into().map_err(|_| {
            MarketplaceError::Config("delegate seed must decode to exactly 32 bytes".to_string())
        })?;

        let signing_key = SigningKey::from_bytes(&seed);
        let address = hex::encode(signing_key.verifying_key().to_bytes());

        Ok(DelegateCredential {
            signing_key,
            address,
        })
    }

    /// Public ledger address of the delegate (its verifying key).
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sign a serialized transaction message, returning the hex signature.
    pub fn sign(&self, message: &[u8]) -> String {
        let signature = self.signing_key.sign(message);
        hex::encode(signature.to_bytes())
    }
}

// The secret must never reach logs or client responses.
impl fmt::Debug for DelegateCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegateCredential")
            .field("address", &self.address)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}
