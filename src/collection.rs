//! Encrypted ordered storage for multi-byte secrets
//!
//! This module provides the encrypted byte collection, the aggregate that
//! callers actually store secrets in. The collection never holds its content
//! directly: each byte lives in the shared [`SafeByteCache`](crate::cache)
//! and the collection keeps only the encrypted, ordered list of cache ids,
//! under a per-instance key that stays protected between operations. Only
//! the element count is kept in plaintext, and it is cross-checked against
//! the decrypted id list on every read.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use securebytes::collection::EncryptedByteCollection;
//!
//! let collection = EncryptedByteCollection::with_defaults().unwrap();
//! for byte in b"secret" {
//!     collection.append(*byte).unwrap();
//! }
//!
//! let plaintext = collection.to_decrypted_bytes().unwrap();
//! assert_eq!(&*plaintext, b"secret");
//! ```

use crate::cache::{SafeByteCache, SafeByteId};
use crate::codec::{FixedWidthCodec, IdListCodec};
use crate::crypto::{AesCbcCipher, SafeCipher};
use crate::detector::{AlertChannel, InjectionDetector};
use crate::entropy::{mixed_key_material, EntropySource, GlobalEntropySource};
use crate::error::{Result, SecureBytesError};
use crate::protect::{KeyGuard, MaskingProtector, MemoryProtector};
use crate::util::scramble;
use log::debug;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use zeroize::{Zeroize, Zeroizing};

const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;

struct CollectionState {
    blob: Vec<u8>,
    len: usize,
    key: Vec<u8>,
    disposed: bool,
}

/// Ordered sequence of secret bytes, held encrypted at rest.
///
/// Content is stored as an encrypted list of [`SafeByteId`]s resolved
/// through a [`SafeByteCache`]; the only plaintext state is the element
/// count. Every operation runs under one exclusive lock, so append order is
/// the order in which callers acquire it. The instance key is unprotected
/// only around the individual encrypt and decrypt calls.
pub struct EncryptedByteCollection {
    cache: Arc<SafeByteCache>,
    cipher: Arc<dyn SafeCipher>,
    protector: Arc<dyn MemoryProtector>,
    codec: Arc<dyn IdListCodec>,
    salt: [u8; SALT_LEN],
    detector: InjectionDetector,
    state: Mutex<CollectionState>,
}

impl EncryptedByteCollection {
    /// Creates a collection resolving its bytes through `cache`.
    ///
    /// The entropy source contributes to the instance key and is not
    /// retained.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::OperationFailed` - If key or salt material
    ///   cannot be generated.
    pub fn new(
        cache: Arc<SafeByteCache>,
        cipher: Arc<dyn SafeCipher>,
        protector: Arc<dyn MemoryProtector>,
        codec: Arc<dyn IdListCodec>,
        entropy: &dyn EntropySource,
        channel: AlertChannel,
    ) -> Result<Self> {
        let block = protector.block_size().max(1);
        let key_len = KEY_LEN.div_ceil(block) * block;
        let mut key = mixed_key_material(entropy, key_len)?.to_vec();
        protector.protect(&mut key)?;

        let mut salt = [0_u8; SALT_LEN];
        scramble(&mut salt)?;

        let collection = Self {
            cache,
            cipher,
            protector,
            codec,
            salt,
            detector: InjectionDetector::new(channel),
            state: Mutex::new(CollectionState {
                blob: Vec::new(),
                len: 0,
                key,
                disposed: false,
            }),
        };

        {
            let state = collection.lock_state()?;
            collection.refresh_baseline(&state)?;
        }

        Ok(collection)
    }

    /// Creates a collection over its own cache with the default cipher,
    /// protector, codec, entropy source, and alert channel.
    ///
    /// # Errors
    ///
    /// Propagates construction failures from [`EncryptedByteCollection::new`].
    pub fn with_defaults() -> Result<Self> {
        Self::new(
            Arc::new(SafeByteCache::with_defaults()?),
            Arc::new(AesCbcCipher::new()),
            Arc::new(MaskingProtector::new()?),
            Arc::new(FixedWidthCodec::new()),
            &GlobalEntropySource,
            AlertChannel::default(),
        )
    }

    /// The cache this collection resolves its bytes through.
    pub fn cache(&self) -> &SafeByteCache {
        &self.cache
    }

    /// Appends one secret byte.
    ///
    /// The byte is deduplicated through the cache and its id appended to
    /// the encrypted list.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::Disposed` - If the collection or cache has been
    ///   disposed.
    /// * `SecureBytesError::IntegrityViolation` - On detected external
    ///   modification with the throwing alert channel.
    pub fn append(&self, byte: u8) -> Result<()> {
        let id = self.cache.get_or_create(byte)?;
        self.append_id(id)
    }

    /// Appends an id obtained earlier from the cache.
    ///
    /// The id is not validated here; an id the cache does not know fails
    /// at reveal time.
    ///
    /// # Errors
    ///
    /// Same as [`EncryptedByteCollection::append`], and
    /// `SecureBytesError::InvalidCiphertext` if the stored list does not
    /// match the recorded length.
    pub fn append_id(&self, id: SafeByteId) -> Result<()> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        let mut guard = self.lock_state()?;
        if guard.disposed {
            return Err(SecureBytesError::Disposed);
        }
        self.verify_integrity(&guard)?;

        let state = &mut *guard;
        let mut ids = self.decrypt_ids(state)?;
        ids.push(id);

        let mut encoded = self.codec.serialize(&ids)?;
        let key_guard = KeyGuard::open(&mut state.key, self.protector.as_ref())?;
        let blob = self.cipher.encrypt(&encoded, key_guard.bytes(), &self.salt);
        drop(key_guard);
        encoded.zeroize();
        state.blob = blob?;
        state.len += 1;

        self.refresh_baseline(&*state)?;
        debug!("Appended byte, collection length {}", state.len);

        #[cfg(feature = "metrics")]
        metrics::histogram!("securebytes.collection.append_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        Ok(())
    }

    /// Returns the cache id stored at `index`.
    ///
    /// Revealing the byte behind the id is a separate, explicit step
    /// through [`SafeByteCache::reveal`].
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::EmptyCollection` - If nothing has been appended.
    /// * `SecureBytesError::IndexOutOfRange` - If `index` is past the end.
    /// * `SecureBytesError::Disposed` - If the collection has been disposed.
    pub fn get(&self, index: usize) -> Result<SafeByteId> {
        let mut guard = self.lock_state()?;
        if guard.disposed {
            return Err(SecureBytesError::Disposed);
        }
        self.verify_integrity(&guard)?;

        if guard.len == 0 {
            return Err(SecureBytesError::EmptyCollection);
        }
        if index >= guard.len {
            return Err(SecureBytesError::IndexOutOfRange {
                index,
                length: guard.len,
            });
        }

        let state = &mut *guard;
        let ids = self.decrypt_ids(state)?;
        ids.get(index)
            .copied()
            .ok_or(SecureBytesError::IndexOutOfRange {
                index,
                length: ids.len(),
            })
    }

    /// Decrypts the whole secret and returns it as a self-wiping buffer.
    ///
    /// This is the only operation that materializes the full plaintext
    /// contiguously; the returned buffer zeroes itself on drop.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::EmptyCollection` - If nothing has been appended.
    /// * `SecureBytesError::NotFound` - If a stored id is unknown to the
    ///   cache.
    /// * `SecureBytesError::Disposed` - If the collection or cache has been
    ///   disposed.
    pub fn to_decrypted_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        let mut guard = self.lock_state()?;
        if guard.disposed {
            return Err(SecureBytesError::Disposed);
        }
        self.verify_integrity(&guard)?;

        if guard.len == 0 {
            return Err(SecureBytesError::EmptyCollection);
        }

        let state = &mut *guard;
        let ids = self.decrypt_ids(state)?;
        let mut bytes = Zeroizing::new(Vec::with_capacity(ids.len()));
        for id in &ids {
            bytes.push(self.cache.reveal(*id)?);
        }

        #[cfg(feature = "metrics")]
        metrics::histogram!("securebytes.collection.to_decrypted_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        Ok(bytes)
    }

    /// Number of stored bytes, without decrypting anything.
    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.len).unwrap_or(0)
    }

    /// Whether the collection holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wipes the encrypted content and the instance key, then marks the
    /// collection disposed. Idempotent; later operations fail with
    /// `Disposed`. The shared cache is left untouched.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::OperationFailed` - If the collection lock is
    ///   poisoned.
    pub fn dispose(&self) -> Result<()> {
        let mut state = self.lock_state()?;
        if state.disposed {
            return Ok(());
        }

        state.blob.zeroize();
        state.blob.clear();
        state.key.zeroize();
        state.key.clear();
        state.len = 0;
        state.disposed = true;
        debug!("Collection disposed");
        Ok(())
    }

    // Decrypts and decodes the id list, checking it against the plaintext
    // length.
    fn decrypt_ids(&self, state: &mut CollectionState) -> Result<Vec<SafeByteId>> {
        let ids = if state.blob.is_empty() {
            Vec::new()
        } else {
            let key_guard = KeyGuard::open(&mut state.key, self.protector.as_ref())?;
            let plain = self
                .cipher
                .decrypt(&state.blob, key_guard.bytes(), &self.salt)?;
            drop(key_guard);
            self.codec.deserialize(&plain)?
        };

        if ids.len() != state.len {
            return Err(SecureBytesError::InvalidCiphertext(format!(
                "decoded {} ids but collection length is {}",
                ids.len(),
                state.len
            )));
        }
        Ok(ids)
    }

    fn verify_integrity(&self, state: &CollectionState) -> Result<()> {
        let len_bytes = (state.len as u64).to_le_bytes();
        self.detector.verify_unchanged(&[&state.blob, &len_bytes])
    }

    fn refresh_baseline(&self, state: &CollectionState) -> Result<()> {
        let len_bytes = (state.len as u64).to_le_bytes();
        self.detector.notify_changed(&[&state.blob, &len_bytes])
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, CollectionState>> {
        self.state
            .lock()
            .map_err(|_| SecureBytesError::OperationFailed("collection lock poisoned".to_string()))
    }

    #[cfg(test)]
    fn corrupt_blob_for_test(&self) {
        let mut state = self.state.lock().expect("collection lock");
        if let Some(byte) = state.blob.first_mut() {
            *byte ^= 0x01;
        }
    }

    #[cfg(test)]
    fn set_len_for_test(&self, len: usize) {
        let mut state = self.state.lock().expect("collection lock");
        state.len = len;
    }
}

impl Drop for EncryptedByteCollection {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}

impl fmt::Debug for EncryptedByteCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedByteCollection")
            .field("len", &self.len())
            .field("channel", &self.detector.channel())
            .finish_non_exhaustive()
    }
}
