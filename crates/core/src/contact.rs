//! At-rest protection for personal emergency contacts.
//!
//! Contacts are sealed with ChaCha20-Poly1305 the moment a session is
//! created and only opened inside the emergency dispatcher.

use crate::error::{PresenceError, PresenceResult};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use std::fmt;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;

const CONTACT_AAD: &[u8] = b"campus-presence/emergency-contact";

/// An encrypted emergency contact. Never serialized, never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SealedContact {
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
}

impl fmt::Debug for SealedContact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<sealed>")
    }
}

pub struct ContactSealer {
    cipher: ChaCha20Poly1305,
}

impl ContactSealer {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Per-process key. Sealed contacts die with their sessions, so losing
    /// the key on restart loses nothing that would still be readable.
    pub fn random() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(&key)
    }

    pub fn from_hex(key_hex: &str) -> PresenceResult<Self> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|e| PresenceError::Config(format!("contact key is not hex: {e}")))?;
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            PresenceError::Config(format!("contact key must be {KEY_SIZE} bytes"))
        })?;
        Ok(Self::new(&key))
    }

    pub fn seal(&self, contact: &str) -> PresenceResult<SealedContact> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: contact.as_bytes(),
                    aad: CONTACT_AAD,
                },
            )
            .map_err(|_| PresenceError::Crypto("failed to seal contact".to_string()))?;
        Ok(SealedContact { nonce, ciphertext })
    }

    pub fn open(&self, sealed: &SealedContact) -> PresenceResult<String> {
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&sealed.nonce),
                Payload {
                    msg: &sealed.ciphertext,
                    aad: CONTACT_AAD,
                },
            )
            .map_err(|_| PresenceError::Crypto("failed to open contact".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|_| PresenceError::Crypto("contact is not valid UTF-8".to_string()))
    }
}
