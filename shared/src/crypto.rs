//! RSA-OAEP helpers.
//!
//! Every payload is encrypted against the recipient's public key with OAEP,
//! SHA-256 as both hash and MGF1 digest, and no label. A single OAEP block
//! holds at most `modulus_bytes - 66` bytes of plaintext (190 for a 2048-bit
//! key); `encrypt` refuses anything larger. `seal`/`open` split larger
//! payloads into independent blocks and are only used for state replies.

use crate::ProtocolError;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::Oaep;
use sha2::Sha256;
use std::fmt;

pub use rsa::{RsaPrivateKey, RsaPublicKey};

pub const SUPPORTED_KEY_BITS: [usize; 3] = [2048, 3072, 4096];

/// Two SHA-256 digests plus the two OAEP marker bytes.
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

fn padding() -> Oaep {
    Oaep::new::<Sha256>()
}

/// A private key together with its public half.
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    pub fn generate(bits: usize) -> Result<Self, ProtocolError> {
        if !SUPPORTED_KEY_BITS.contains(&bits) {
            return Err(ProtocolError::Handshake(format!(
                "unsupported key size {bits}"
            )));
        }
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| ProtocolError::Handshake(format!("key generation failed: {e}")))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// SubjectPublicKeyInfo PEM, the form sent during the handshake.
    pub fn public_pem(&self) -> Result<String, ProtocolError> {
        encode_public_key(&self.public)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        decrypt(ciphertext, &self.private)
    }

    pub fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        open(ciphertext, &self.private)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &(self.public.size() * 8))
            .finish_non_exhaustive()
    }
}

pub fn encode_public_key(key: &RsaPublicKey) -> Result<String, ProtocolError> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| ProtocolError::Handshake(format!("cannot encode public key: {e}")))
}

/// Parses a peer's PEM public key, rejecting key sizes outside
/// `SUPPORTED_KEY_BITS`.
pub fn decode_public_key(pem: &[u8]) -> Result<RsaPublicKey, ProtocolError> {
    let text = std::str::from_utf8(pem)
        .map_err(|_| ProtocolError::Handshake("public key is not valid UTF-8".into()))?;
    let key = RsaPublicKey::from_public_key_pem(text.trim())
        .map_err(|e| ProtocolError::Handshake(format!("malformed public key: {e}")))?;
    let bits = key.size() * 8;
    if !SUPPORTED_KEY_BITS.contains(&bits) {
        return Err(ProtocolError::Handshake(format!(
            "unsupported key size {bits}"
        )));
    }
    Ok(key)
}

pub fn max_plaintext_len(key: &RsaPublicKey) -> usize {
    key.size().saturating_sub(OAEP_OVERHEAD)
}

/// Encrypts one OAEP block. Never truncates: oversized payloads fail with
/// `PayloadTooLarge`.
pub fn encrypt(payload: &[u8], key: &RsaPublicKey) -> Result<Vec<u8>, ProtocolError> {
    let max = max_plaintext_len(key);
    if payload.len() > max {
        return Err(ProtocolError::PayloadTooLarge {
            len: payload.len(),
            max,
        });
    }
    key.encrypt(&mut rand::thread_rng(), padding(), payload)
        .map_err(|e| ProtocolError::Encrypt(e.to_string()))
}

pub fn decrypt(ciphertext: &[u8], key: &RsaPrivateKey) -> Result<Vec<u8>, ProtocolError> {
    if ciphertext.len() != key.size() {
        return Err(ProtocolError::Decrypt(format!(
            "expected {} ciphertext bytes, got {}",
            key.size(),
            ciphertext.len()
        )));
    }
    key.decrypt(padding(), ciphertext)
        .map_err(|e| ProtocolError::Decrypt(e.to_string()))
}

/// Encrypts an arbitrarily long payload as consecutive OAEP blocks, each
/// exactly one modulus long.
pub fn seal(payload: &[u8], key: &RsaPublicKey) -> Result<Vec<u8>, ProtocolError> {
    let max = max_plaintext_len(key);
    let mut out = Vec::with_capacity(payload.len().div_ceil(max.max(1)) * key.size());
    for chunk in payload.chunks(max) {
        out.extend_from_slice(&encrypt(chunk, key)?);
    }
    Ok(out)
}

pub fn open(ciphertext: &[u8], key: &RsaPrivateKey) -> Result<Vec<u8>, ProtocolError> {
    let block = key.size();
    if ciphertext.len() % block != 0 {
        return Err(ProtocolError::Decrypt(format!(
            "{} bytes is not a whole number of {block}-byte blocks",
            ciphertext.len()
        )));
    }
    let mut out = Vec::new();
    for chunk in ciphertext.chunks_exact(block) {
        out.extend_from_slice(&decrypt(chunk, key)?);
    }
    Ok(out)
}
