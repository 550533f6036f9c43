use std::{error::Error, fmt};

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use constant_time_eq::constant_time_eq;
use zeroize::Zeroize;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const SEPARATOR: u8 = b':';

#[derive(Debug)]
pub enum KeyError {
    InvalidHex(hex::FromHexError),
    InvalidLength(usize),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::InvalidHex(err) => write!(f, "key is not valid hex: {}", err),
            KeyError::InvalidLength(len) => {
                write!(f, "key must be {} bytes, got {}", KEY_LEN, len)
            }
        }
    }
}

impl Error for KeyError {}

#[derive(Debug)]
pub enum CipherError {
    MissingSeparator,
    InvalidHex(hex::FromHexError),
    InvalidNonceLength(usize),
    Encryption,
    /// Tag mismatch: tampered or truncated ciphertext, or the wrong key.
    Authentication,
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherError::MissingSeparator => f.write_str("ciphertext has no nonce separator"),
            CipherError::InvalidHex(err) => write!(f, "ciphertext is not valid hex: {}", err),
            CipherError::InvalidNonceLength(len) => {
                write!(f, "nonce must be {} bytes, got {}", NONCE_LEN, len)
            }
            CipherError::Encryption => f.write_str("encryption failed"),
            CipherError::Authentication => f.write_str("decryption failed authentication"),
        }
    }
}

impl Error for CipherError {}

impl From<hex::FromHexError> for CipherError {
    fn from(value: hex::FromHexError) -> Self {
        Self::InvalidHex(value)
    }
}

/// Pre-shared 256-bit secret shared by the agent and its controller.
#[derive(Clone)]
pub struct AdapterKey([u8; KEY_LEN]);

impl AdapterKey {
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(value: &str) -> Result<Self, KeyError> {
        let mut bytes = hex::decode(value.trim()).map_err(KeyError::InvalidHex)?;
        let key = <[u8; KEY_LEN]>::try_from(bytes.as_slice())
            .map(Self)
            .map_err(|_| KeyError::InvalidLength(bytes.len()));
        bytes.zeroize();
        key
    }

    pub fn generate() -> Self {
        let generated = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(generated.as_slice());
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl PartialEq for AdapterKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for AdapterKey {}

impl fmt::Debug for AdapterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdapterKey(..)")
    }
}

impl Drop for AdapterKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Encrypts with AES-256-GCM under a fresh nonce and returns `hex(nonce):hex(ciphertext)`.
///
/// The output alphabet is `[0-9a-f:]`, so it never contains the frame delimiter.
pub fn encrypt(plaintext: &[u8], key: &AdapterKey) -> Result<String, CipherError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = key
        .cipher()
        .encrypt(&nonce, plaintext)
        .map_err(|_| CipherError::Encryption)?;

    let mut text = String::with_capacity((NONCE_LEN + ciphertext.len()) * 2 + 1);
    text.push_str(&hex::encode(nonce));
    text.push(char::from(SEPARATOR));
    text.push_str(&hex::encode(ciphertext));
    Ok(text)
}

pub fn decrypt(text: &[u8], key: &AdapterKey) -> Result<Vec<u8>, CipherError> {
    let split = text
        .iter()
        .position(|b| *b == SEPARATOR)
        .ok_or(CipherError::MissingSeparator)?;
    let nonce = hex::decode(&text[..split])?;
    if nonce.len() != NONCE_LEN {
        return Err(CipherError::InvalidNonceLength(nonce.len()));
    }

    let ciphertext = hex::decode(&text[split + 1..])?;
    key.cipher()
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| CipherError::Authentication)
}
