//! Tamper-evident state for the provider redirect round trip.
//!
//! The payload travels through the untrusted provider redirect as
//! `<base64url(json)>.<base64url(hmac-sha256)>`. There is no server-side
//! pending-request table: the only state is the process-wide signing
//! secret, and a fresh nonce makes every emitted value unique.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignedStateError {
    /// Malformed container or bad signature. Also covers a valid signature
    /// over a payload minted for a different purpose.
    #[error("signed state rejected")]
    InvalidSignedState,
    /// The signature checked out but the payload did not decode into the
    /// expected shape.
    #[error("signed state payload could not be decoded")]
    FailedToDecode,
}

#[derive(Serialize, Deserialize)]
struct Envelope<P> {
    purpose: String,
    nonce: String,
    #[serde(flatten)]
    payload: P,
}

/// Signer/validator for one purpose-scoped payload type.
#[derive(Clone)]
pub struct StateSigner<P> {
    purpose: &'static str,
    secret: SecretString,
    _payload: std::marker::PhantomData<fn() -> P>,
}

impl<P> StateSigner<P>
where
    P: Serialize + DeserializeOwned,
{
    #[must_use]
    pub fn new(purpose: &'static str, secret: SecretString) -> Self {
        Self {
            purpose,
            secret,
            _payload: std::marker::PhantomData,
        }
    }

    /// Serialize, encode, and sign a payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the RNG or JSON encoding fails.
    pub fn generate(&self, payload: P) -> anyhow::Result<String> {
        let mut nonce_bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|err| anyhow::anyhow!("failed to generate state nonce: {err}"))?;

        let envelope = Envelope {
            purpose: self.purpose.to_string(),
            nonce: URL_SAFE_NO_PAD.encode(nonce_bytes),
            payload,
        };
        let encoded = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&envelope)?);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(&encoded));
        Ok(format!("{encoded}.{signature}"))
    }

    /// Check the signature, then decode and return the payload with the
    /// nonce stripped.
    ///
    /// # Errors
    ///
    /// `InvalidSignedState` for signature/container problems,
    /// `FailedToDecode` when the authenticated payload has the wrong shape.
    pub fn validate(&self, state: &str) -> Result<P, SignedStateError> {
        let (encoded, signature) = state
            .rsplit_once('.')
            .ok_or(SignedStateError::InvalidSignedState)?;
        if encoded.is_empty() || signature.is_empty() {
            return Err(SignedStateError::InvalidSignedState);
        }

        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signature.as_bytes())
            .map_err(|_| SignedStateError::InvalidSignedState)?;
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(encoded.as_bytes());
        // verify_slice is constant time.
        mac.verify_slice(&signature_bytes)
            .map_err(|_| SignedStateError::InvalidSignedState)?;

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map_err(|_| SignedStateError::FailedToDecode)?;
        let envelope: Envelope<P> = serde_json::from_slice(&payload_bytes)
            .map_err(|_| SignedStateError::FailedToDecode)?;

        if envelope.purpose != self.purpose {
            return Err(SignedStateError::InvalidSignedState);
        }
        Ok(envelope.payload)
    }

    fn mac(&self, encoded: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(encoded.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}
