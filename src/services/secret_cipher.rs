//! Secret cipher using AES-256-GCM
//!
//! Small secrets (signing-service tokens) are sealed for storage with a
//! freshly generated 32-byte key and 12-byte IV per record. The key and IV
//! are stored next to the ciphertext; the cipher only protects against casual
//! disclosure of the record store, not against an attacker holding it.

use crate::domain::SealedSecret;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use zeroize::Zeroizing;

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes
pub const IV_SIZE: usize = 12;

const TAG_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("invalid IV length: expected 12 bytes, got {0}")]
    InvalidIvLength(usize),

    #[error("ciphertext too short (missing authentication tag)")]
    Truncated,

    #[error("authentication failed: wrong key, wrong IV or tampered ciphertext")]
    Authentication,

    #[error("invalid base64 in sealed {field}: {source}")]
    Encoding {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("system random source failed")]
    Random,
}

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; IV_SIZE]>,
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

fn fixed<const N: usize>(bytes: &[u8], err: fn(usize) -> CipherError) -> Result<[u8; N], CipherError> {
    <[u8; N]>::try_from(bytes).map_err(|_| err(bytes.len()))
}

#[derive(Clone)]
pub struct SecretCipher {
    rng: Arc<SystemRandom>,
}

impl SecretCipher {
    pub fn new() -> Self {
        Self { rng: Arc::new(SystemRandom::new()) }
    }

    pub fn generate_key(&self) -> Result<Zeroizing<[u8; KEY_SIZE]>, CipherError> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        self.rng.fill(&mut key[..]).map_err(|_| CipherError::Random)?;
        Ok(key)
    }

    pub fn generate_iv(&self) -> Result<[u8; IV_SIZE], CipherError> {
        let mut iv = [0u8; IV_SIZE];
        self.rng.fill(&mut iv).map_err(|_| CipherError::Random)?;
        Ok(iv)
    }

    /// Encrypt `plaintext`; the returned ciphertext carries the 16-byte tag.
    #[instrument(skip_all, fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError> {
        let key: [u8; KEY_SIZE] = fixed(key, CipherError::InvalidKeyLength)?;
        let iv: [u8; IV_SIZE] = fixed(iv, CipherError::InvalidIvLength)?;

        let unbound = UnboundKey::new(&AES_256_GCM, &key).map_err(|_| CipherError::InvalidKeyLength(KEY_SIZE))?;
        let mut sealing_key = aead::SealingKey::new(unbound, SingleNonce { nonce: Some(iv) });

        let mut ciphertext = plaintext.to_vec();
        ciphertext.reserve(TAG_SIZE);
        sealing_key.seal_in_place_append_tag(Aad::empty(), &mut ciphertext).map_err(|_| {
            error!("Encryption failed");
            CipherError::Authentication
        })?;

        debug!(ciphertext_len = ciphertext.len(), "Encrypted secret");
        Ok(ciphertext)
    }

    #[instrument(skip_all, fields(ciphertext_len = ciphertext.len()))]
    pub fn decrypt(&self, ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError> {
        let key: [u8; KEY_SIZE] = fixed(key, CipherError::InvalidKeyLength)?;
        let iv: [u8; IV_SIZE] = fixed(iv, CipherError::InvalidIvLength)?;
        if ciphertext.len() < TAG_SIZE {
            return Err(CipherError::Truncated);
        }

        let unbound = UnboundKey::new(&AES_256_GCM, &key).map_err(|_| CipherError::InvalidKeyLength(KEY_SIZE))?;
        let mut opening_key = aead::OpeningKey::new(unbound, SingleNonce { nonce: Some(iv) });

        let mut buffer = ciphertext.to_vec();
        let plaintext = opening_key.open_in_place(Aad::empty(), &mut buffer).map_err(|_| {
            error!("Decryption failed - possible tampering or wrong key");
            CipherError::Authentication
        })?;
        Ok(plaintext.to_vec())
    }

    /// Seal a secret under a fresh key and IV
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedSecret, CipherError> {
        let key = self.generate_key()?;
        let iv = self.generate_iv()?;
        let ciphertext = self.encrypt(plaintext, &key[..], &iv)?;
        Ok(SealedSecret {
            ciphertext: STANDARD.encode(ciphertext),
            key: STANDARD.encode(&key[..]),
            iv: STANDARD.encode(iv),
        })
    }

    /// Open a sealed secret as UTF-8 text
    pub fn open(&self, sealed: &SealedSecret) -> Result<Zeroizing<String>, CipherError> {
        let decode = |field: &'static str, value: &str| {
            STANDARD.decode(value).map_err(|source| CipherError::Encoding { field, source })
        };
        let ciphertext = decode("ciphertext", &sealed.ciphertext)?;
        let key = Zeroizing::new(decode("key", &sealed.key)?);
        let iv = decode("iv", &sealed.iv)?;

        let plaintext = self.decrypt(&ciphertext, &key, &iv)?;
        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|_| CipherError::Authentication)
    }
}

impl Default for SecretCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}
