//! Key derivation and symmetric encryption for the secret store

mod cipher;
mod kdf;

pub use cipher::{AesCbcCipher, SafeCipher, BLOCK_LEN, IV_LEN, MIN_KEY_LEN};
pub use kdf::{derive, DERIVATION_ROUNDS};
