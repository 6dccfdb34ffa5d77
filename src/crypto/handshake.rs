//! Client init message
//!
//! The first bytes a session puts on the wire are this 256-byte message,
//! sealed under the server's RSA public key with OAEP. Everything the
//! server needs to decrypt the rest of the session rides inside it.
//!
//! Plaintext layout:
//! ```text
//! | offset | bytes | field              |
//! |      0 |     1 | protocol version   |
//! |      1 |     1 | window size        |
//! |      2 |    16 | symmetric secret   |
//! |     18 |    16 | client->server IV  |
//! |     34 |    16 | server->client IV  |
//! |     50 |   206 | random padding     |
//! ```

use super::{random_bytes, CryptoError, IV_LEN, SECRET_LEN};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// Plaintext length of the client init message
pub const INIT_MSG_LEN: usize = 256;

/// Current protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Smallest RSA modulus able to seal the init message under OAEP/SHA-256
pub const MIN_MODULUS_LEN: usize = INIT_MSG_LEN + 2 * 32 + 2;

/// Decoded form of the client init message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitMessage {
    pub version: u8,
    pub window: u8,
    pub secret: [u8; SECRET_LEN],
    pub send_iv: [u8; IV_LEN],
    pub recv_iv: [u8; IV_LEN],
}

impl InitMessage {
    pub fn new(window: u8, secret: [u8; SECRET_LEN], send_iv: [u8; IV_LEN], recv_iv: [u8; IV_LEN]) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            window,
            secret,
            send_iv,
            recv_iv,
        }
    }

    /// Serialize to the fixed 256-byte plaintext, padding with random bytes.
    pub fn encode(&self) -> [u8; INIT_MSG_LEN] {
        let mut msg = [0u8; INIT_MSG_LEN];
        msg[0] = self.version;
        msg[1] = self.window;
        msg[2..18].copy_from_slice(&self.secret);
        msg[18..34].copy_from_slice(&self.send_iv);
        msg[34..50].copy_from_slice(&self.recv_iv);
        random_bytes(&mut msg[50..]);
        msg
    }

    /// Parse the fixed 256-byte plaintext, ignoring the pad region.
    pub fn decode(msg: &[u8]) -> Result<Self, CryptoError> {
        if msg.len() != INIT_MSG_LEN {
            return Err(CryptoError::Handshake(format!(
                "init message is {} bytes, expected {}",
                msg.len(),
                INIT_MSG_LEN
            )));
        }
        if msg[0] != PROTOCOL_VERSION {
            return Err(CryptoError::Version(msg[0]));
        }
        let mut parsed = Self {
            version: msg[0],
            window: msg[1],
            secret: [0u8; SECRET_LEN],
            send_iv: [0u8; IV_LEN],
            recv_iv: [0u8; IV_LEN],
        };
        parsed.secret.copy_from_slice(&msg[2..18]);
        parsed.send_iv.copy_from_slice(&msg[18..34]);
        parsed.recv_iv.copy_from_slice(&msg[34..50]);
        Ok(parsed)
    }

    /// Encode and seal under the server's public key.
    ///
    /// The ciphertext length equals the key's modulus size; those are the
    /// exact bytes a session emits in the clear before switching to the
    /// symmetric ciphers.
    pub fn seal(&self, public_key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
        if public_key.size() < MIN_MODULUS_LEN {
            return Err(CryptoError::KeyTooSmall(public_key.size()));
        }
        public_key
            .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), &self.encode())
            .map_err(|e| CryptoError::Seal(e.to_string()))
    }

    /// Unseal and decode a received init blob (server side).
    pub fn open(private_key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Self, CryptoError> {
        let plaintext = private_key
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|e| CryptoError::Open(e.to_string()))?;
        Self::decode(&plaintext)
    }
}
