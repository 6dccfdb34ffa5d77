//! Cryptographic primitives for the transport
//!
//! This module provides:
//! - The 256-byte client init message, sealed with RSA-OAEP
//! - AES-128-CTR stream ciphers applied to every post-handshake byte
//! - Secure random number generation

mod cipher;
mod handshake;

pub use cipher::{CipherPair, CtrCipher};
pub use handshake::{InitMessage, INIT_MSG_LEN, MIN_MODULUS_LEN, PROTOCOL_VERSION};

use thiserror::Error;

/// Length of the symmetric session key in bytes
pub const SECRET_LEN: usize = 16;

/// Length of a counter-mode IV in bytes
pub const IV_LEN: usize = 16;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("asymmetric encryption failed: {0}")]
    Seal(String),

    #[error("asymmetric decryption failed: {0}")]
    Open(String),

    #[error("public key modulus too small: {0} bytes")]
    KeyTooSmall(usize),

    #[error("unsupported protocol version: {0}")]
    Version(u8),
}

/// Fill `buf` with cryptographically secure random bytes.
pub fn random_bytes(buf: &mut [u8]) {
    use rand::RngCore;
    rand::rngs::OsRng.fill_bytes(buf);
}

/// Generate a fresh symmetric session key.
pub fn new_secret() -> [u8; SECRET_LEN] {
    let mut secret = [0u8; SECRET_LEN];
    random_bytes(&mut secret);
    secret
}

/// Generate a fresh counter-mode IV.
pub fn new_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    random_bytes(&mut iv);
    iv
}
