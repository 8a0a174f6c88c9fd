use crate::crypto::kdf;
use crate::error::{Result, SecureBytesError};
use crate::util::scramble;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroizing;

/// Length of the initialization vector prefixed to every blob.
pub const IV_LEN: usize = 16;

/// Cipher block length; ciphertext is always a multiple of this.
pub const BLOCK_LEN: usize = 16;

/// Minimum accepted key length in bytes.
///
/// Derivation normalizes the key to the working length, so this floor only
/// rejects trivially weak inputs; there is no upper bound.
pub const MIN_KEY_LEN: usize = 8;

const WORKING_KEY_LEN: usize = 32;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Symmetric encryption of opaque byte buffers with derived working keys.
///
/// The blob format is `iv (16 bytes) ‖ ciphertext (block-aligned)`. Identical
/// plaintext encrypted twice with the same key and salt yields different
/// blobs because the IV is drawn fresh per call, and either blob decrypts
/// back to the exact plaintext.
pub trait SafeCipher: Send + Sync {
    /// Encrypts `plaintext` under a working key derived from `(key, salt)`.
    fn encrypt(&self, plaintext: &[u8], key: &[u8], salt: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts a blob produced by [`encrypt`](SafeCipher::encrypt) with the
    /// same key and salt. The plaintext wipes itself when dropped.
    fn decrypt(&self, blob: &[u8], key: &[u8], salt: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

/// AES-256-CBC implementation of [`SafeCipher`] with PKCS7 padding.
///
/// # Examples
///
/// ```rust
/// use securebytes::crypto::{AesCbcCipher, SafeCipher};
///
/// let cipher = AesCbcCipher::new();
/// let blob = cipher.encrypt(b"payload", b"key-material", b"salt").unwrap();
/// let plaintext = cipher.decrypt(&blob, b"key-material", b"salt").unwrap();
/// assert_eq!(&*plaintext, b"payload");
/// ```
#[derive(Default, Debug, Clone)]
pub struct AesCbcCipher;

impl AesCbcCipher {
    /// Creates a new cipher instance.
    pub fn new() -> Self {
        Self
    }

    fn validate_arguments(input: &[u8], input_name: &str, key: &[u8], salt: &[u8]) -> Result<()> {
        if input.is_empty() {
            return Err(SecureBytesError::MissingArgument(format!(
                "{} must not be empty",
                input_name
            )));
        }
        if key.is_empty() {
            return Err(SecureBytesError::MissingArgument(
                "key must not be empty".to_string(),
            ));
        }
        if salt.is_empty() {
            return Err(SecureBytesError::MissingArgument(
                "salt must not be empty".to_string(),
            ));
        }
        if key.len() < MIN_KEY_LEN {
            return Err(SecureBytesError::InvalidKeySize(format!(
                "key length {} is below the minimum of {} bytes",
                key.len(),
                MIN_KEY_LEN
            )));
        }
        Ok(())
    }
}

impl SafeCipher for AesCbcCipher {
    fn encrypt(&self, plaintext: &[u8], key: &[u8], salt: &[u8]) -> Result<Vec<u8>> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        Self::validate_arguments(plaintext, "plaintext", key, salt)?;

        let working_key = kdf::derive(key, salt, WORKING_KEY_LEN)?;

        // Fresh IV per call; reuse would make equal plaintexts observable.
        let mut iv = [0_u8; IV_LEN];
        scramble(&mut iv)?;

        let encryptor = Aes256CbcEnc::new_from_slices(&working_key, &iv)
            .map_err(|e| SecureBytesError::OperationFailed(format!("cipher setup failed: {}", e)))?;
        let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);

        #[cfg(feature = "metrics")]
        metrics::histogram!("securebytes.cipher.encrypt_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        Ok(blob)
    }

    fn decrypt(&self, blob: &[u8], key: &[u8], salt: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        Self::validate_arguments(blob, "blob", key, salt)?;

        if blob.len() < IV_LEN + BLOCK_LEN {
            return Err(SecureBytesError::InvalidCiphertext(format!(
                "blob length {} is too short to carry an IV and one block",
                blob.len()
            )));
        }
        let (iv, ciphertext) = blob.split_at(IV_LEN);
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(SecureBytesError::InvalidCiphertext(format!(
                "ciphertext length {} is not a multiple of the block length",
                ciphertext.len()
            )));
        }

        let working_key = kdf::derive(key, salt, WORKING_KEY_LEN)?;

        let decryptor = Aes256CbcDec::new_from_slices(&working_key, iv)
            .map_err(|e| SecureBytesError::OperationFailed(format!("cipher setup failed: {}", e)))?;
        let plaintext = decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| {
                SecureBytesError::InvalidCiphertext("padding validation failed".to_string())
            })?;

        #[cfg(feature = "metrics")]
        metrics::histogram!("securebytes.cipher.decrypt_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        Ok(Zeroizing::new(plaintext))
    }
}
