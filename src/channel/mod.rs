//! Secured callback channel: signature check, frame crypto and envelope codec.

pub mod crypto;
pub mod envelope;

pub use crypto::{AesKey, CryptoError};
pub use envelope::{Envelope, EnvelopeError};

/// Credentials of one callback URL, as configured in the admin console.
#[derive(Debug, Clone)]
pub struct SecureChannel {
    token: String,
    key: AesKey,
    /// Corp id the frames must be addressed to; empty disables the check.
    receive_id: String,
}

impl SecureChannel {
    pub fn new(token: impl Into<String>, key: AesKey, receive_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            key,
            receive_id: receive_id.into(),
        }
    }

    pub fn verify(&self, timestamp: &str, nonce: &str, encrypted: &str, signature: &str) -> bool {
        crypto::verify_signature(&self.token, timestamp, nonce, encrypted, signature)
    }

    /// Decrypts a payload and checks it was sealed for this receiver.
    pub fn open(&self, encrypted: &str) -> Result<String, CryptoError> {
        let frame = self.key.open(encrypted)?;
        if !self.receive_id.is_empty()
            && !frame.receive_id.is_empty()
            && frame.receive_id != self.receive_id
        {
            return Err(CryptoError::ReceiverMismatch {
                expected: self.receive_id.clone(),
                actual: frame.receive_id,
            });
        }
        Ok(frame.message)
    }

    #[cfg(test)]
    pub fn seal(&self, message: &str) -> String {
        self.key.seal(message, &self.receive_id)
    }

    #[cfg(test)]
    pub fn sign(&self, timestamp: &str, nonce: &str, encrypted: &str) -> String {
        crypto::signature(&self.token, timestamp, nonce, encrypted)
    }
}
