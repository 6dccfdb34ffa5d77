//! Counter-mode stream ciphers
//!
//! One session keeps two independent AES-128-CTR transforms, one per
//! direction, seeded by the IVs exchanged in the init message. Each
//! keystream advances monotonically over the session's byte stream;
//! there is no resynchronization, so any byte loss is fatal.

use super::{IV_LEN, SECRET_LEN};
use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

type Aes128Ctr = Ctr128BE<Aes128>;

/// A keyed counter-mode transform applied in place.
pub struct CtrCipher(Aes128Ctr);

impl CtrCipher {
    pub fn new(secret: &[u8; SECRET_LEN], iv: &[u8; IV_LEN]) -> Self {
        Self(Aes128Ctr::new(secret.into(), iv.into()))
    }

    /// Transform `data` in place, advancing the keystream.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.0.apply_keystream(data);
    }
}

/// The two directional ciphers of one session.
pub struct CipherPair {
    pub send: CtrCipher,
    pub recv: CtrCipher,
}

impl CipherPair {
    pub fn new(secret: &[u8; SECRET_LEN], send_iv: &[u8; IV_LEN], recv_iv: &[u8; IV_LEN]) -> Self {
        Self {
            send: CtrCipher::new(secret, send_iv),
            recv: CtrCipher::new(secret, recv_iv),
        }
    }
}
