//! Deduplicating encrypted storage for single byte values
//!
//! This module provides the safe byte cache, the backing store that the
//! encrypted collection resolves its contents through. Every distinct byte
//! value is encrypted once under a protected cache-wide key and addressed by
//! an opaque id derived from a salted one-way hash, so equal bytes share one
//! ciphertext without the cache ever holding a plaintext lookup table. Decoy
//! entries are mixed in so the cache's size and growth do not track the true
//! amount of stored data.

use crate::crypto::SafeCipher;
use crate::detector::{AlertChannel, InjectionDetector};
use crate::entropy::{mixed_key_material, EntropySource, GlobalEntropySource};
use crate::error::{Result, SecureBytesError};
use crate::protect::{KeyGuard, MaskingProtector, MemoryProtector};
use crate::util::{constant_time_eq, hash, scramble};
use log::debug;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use zeroize::{Zeroize, Zeroizing};

/// Length of the cache-wide encryption key before block-size padding.
pub const CACHE_KEY_LEN: usize = 32;

// Noise appended to each stored byte so every entry encrypts the same
// plaintext length.
const NOISE_PAD_LEN: usize = 7;

// Per-entry derivation salt length.
const ENTRY_SALT_LEN: usize = 16;

// Decoys inserted when a cache is constructed.
const DECOY_SEED_COUNT: usize = 8;

// One additional decoy per this many real creations.
const DECOY_INTERVAL: usize = 4;

const SESSION_SALT_LEN: usize = 16;

// Drawn once per process; ids are stable within a session and meaningless
// across sessions.
static SESSION_SALT: OnceCell<[u8; SESSION_SALT_LEN]> = OnceCell::new();

/// Opaque handle to one cached byte value.
///
/// Ids are derived from a salted one-way hash of the byte, so a handle does
/// not reveal the value it stands for. Handles are only meaningful to the
/// cache that issued them, within the process that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SafeByteId(u64);

impl SafeByteId {
    pub(crate) fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// The raw id value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

struct CacheEntry {
    blob: Vec<u8>,
    salt: [u8; ENTRY_SALT_LEN],
    real: bool,
}

struct CacheState {
    entries: HashMap<u64, CacheEntry>,
    real_count: usize,
    creations: usize,
    key: Vec<u8>,
    disposed: bool,
}

/// Encrypted, deduplicating store of single byte values.
///
/// Each distinct byte is held as one ciphertext, encrypted under a shared
/// key that stays protected in memory except for the instant an operation
/// needs it. Lookups go through salted one-way ids with collisions resolved
/// by transiently decrypting the candidate, so no plaintext index ever
/// exists. An [`InjectionDetector`] fingerprints the whole store and flags
/// any modification the cache did not make itself.
///
/// The cache is safe to share across threads; all methods take `&self`.
///
/// # Examples
///
/// ```rust,no_run
/// use securebytes::cache::SafeByteCache;
///
/// let cache = SafeByteCache::with_defaults().unwrap();
/// let id = cache.get_or_create(42).unwrap();
/// assert_eq!(cache.reveal(id).unwrap(), 42);
/// ```
pub struct SafeByteCache {
    cipher: Arc<dyn SafeCipher>,
    protector: Arc<dyn MemoryProtector>,
    detector: InjectionDetector,
    state: Mutex<CacheState>,
}

impl SafeByteCache {
    /// Creates a cache over the given cipher and protector, reporting
    /// integrity incidents through `channel`.
    ///
    /// The entropy source contributes to the cache key and is not retained.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::OperationFailed` - If key material cannot be
    ///   generated.
    pub fn new(
        cipher: Arc<dyn SafeCipher>,
        protector: Arc<dyn MemoryProtector>,
        entropy: &dyn EntropySource,
        channel: AlertChannel,
    ) -> Result<Self> {
        let block = protector.block_size().max(1);
        let key_len = CACHE_KEY_LEN.div_ceil(block) * block;
        let mut key = mixed_key_material(entropy, key_len)?.to_vec();
        protector.protect(&mut key)?;

        let cache = Self {
            cipher,
            protector,
            detector: InjectionDetector::new(channel),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                real_count: 0,
                creations: 0,
                key,
                disposed: false,
            }),
        };

        {
            let mut state = cache.lock_state()?;
            for _ in 0..DECOY_SEED_COUNT {
                cache.insert_decoy(&mut state)?;
            }
            cache.refresh_baseline(&state)?;
        }

        Ok(cache)
    }

    /// Creates a cache over the default cipher, protector, entropy source,
    /// and alert channel.
    ///
    /// # Errors
    ///
    /// Propagates construction failures from [`SafeByteCache::new`].
    pub fn with_defaults() -> Result<Self> {
        Self::new(
            Arc::new(crate::crypto::AesCbcCipher::new()),
            Arc::new(MaskingProtector::new()?),
            &GlobalEntropySource,
            AlertChannel::default(),
        )
    }

    /// Returns the id for `byte`, storing it first if the cache does not
    /// hold it yet.
    ///
    /// Equal bytes always resolve to the same id within one cache instance.
    /// Id collisions are resolved by probing: a candidate entry only matches
    /// after its transient decryption compares equal in constant time.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::Disposed` - If the cache has been disposed.
    /// * `SecureBytesError::IntegrityViolation` - If the store was modified
    ///   externally and the throwing alert channel is configured.
    pub fn get_or_create(&self, byte: u8) -> Result<SafeByteId> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        let mut guard = self.lock_state()?;
        if guard.disposed {
            return Err(SecureBytesError::Disposed);
        }
        self.verify_integrity(&guard)?;

        let state = &mut *guard;
        let base = derive_id(byte)?;
        let mut probe = 0_u64;
        loop {
            let id = base.wrapping_add(probe);
            let occupant = match state.entries.get(&id) {
                None => None,
                Some(entry) if !entry.real => Some(false),
                Some(entry) => {
                    let key_guard = KeyGuard::open(&mut state.key, self.protector.as_ref())?;
                    let plain = self
                        .cipher
                        .decrypt(&entry.blob, key_guard.bytes(), &entry.salt)?;
                    drop(key_guard);
                    Some(
                        plain
                            .first()
                            .is_some_and(|stored| constant_time_eq(&[*stored], &[byte])),
                    )
                }
            };

            match occupant {
                Some(true) => {
                    #[cfg(feature = "metrics")]
                    metrics::histogram!("securebytes.cache.get_or_create_duration_seconds")
                        .record(start.elapsed().as_secs_f64());

                    return Ok(SafeByteId(id));
                }
                Some(false) => {
                    probe += 1;
                }
                None => {
                    self.create_entry(&mut *state, id, byte, true)?;
                    state.real_count += 1;
                    state.creations += 1;
                    if state.creations % DECOY_INTERVAL == 0 {
                        self.insert_decoy(&mut *state)?;
                    }
                    self.refresh_baseline(&*state)?;
                    debug!("Created cache entry, {} real entries", state.real_count);

                    #[cfg(feature = "metrics")]
                    metrics::histogram!("securebytes.cache.get_or_create_duration_seconds")
                        .record(start.elapsed().as_secs_f64());

                    return Ok(SafeByteId(id));
                }
            }
        }
    }

    /// Decrypts and returns the byte behind `id`.
    ///
    /// The cache key is unprotected only for the duration of the decrypt
    /// call and re-protected before this method returns, on every path.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::NotFound` - If `id` is unknown or refers to a
    ///   decoy.
    /// * `SecureBytesError::Disposed` - If the cache has been disposed.
    /// * `SecureBytesError::IntegrityViolation` - If the store was modified
    ///   externally and the throwing alert channel is configured.
    pub fn reveal(&self, id: SafeByteId) -> Result<u8> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        let mut guard = self.lock_state()?;
        if guard.disposed {
            return Err(SecureBytesError::Disposed);
        }
        self.verify_integrity(&guard)?;

        let state = &mut *guard;
        let entry = state
            .entries
            .get(&id.0)
            .filter(|entry| entry.real)
            .ok_or(SecureBytesError::NotFound(id.0))?;

        let key_guard = KeyGuard::open(&mut state.key, self.protector.as_ref())?;
        let plain = self
            .cipher
            .decrypt(&entry.blob, key_guard.bytes(), &entry.salt)?;
        drop(key_guard);

        let byte = plain.first().copied().ok_or_else(|| {
            SecureBytesError::InvalidCiphertext("cache entry decrypted to no bytes".to_string())
        })?;

        #[cfg(feature = "metrics")]
        metrics::histogram!("securebytes.cache.reveal_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        Ok(byte)
    }

    /// Number of real entries; decoys are not counted.
    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.real_count).unwrap_or(0)
    }

    /// Whether the cache holds no real entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wipes every ciphertext and the cache key, then marks the cache
    /// disposed. Idempotent; later operations fail with `Disposed`.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::OperationFailed` - If the cache lock is
    ///   poisoned.
    pub fn dispose(&self) -> Result<()> {
        let mut state = self.lock_state()?;
        if state.disposed {
            return Ok(());
        }

        for entry in state.entries.values_mut() {
            entry.blob.zeroize();
            entry.salt.zeroize();
        }
        state.entries.clear();
        state.key.zeroize();
        state.key.clear();
        state.real_count = 0;
        state.disposed = true;
        debug!("Byte cache disposed");
        Ok(())
    }

    fn create_entry(&self, state: &mut CacheState, id: u64, byte: u8, real: bool) -> Result<()> {
        let mut salt = [0_u8; ENTRY_SALT_LEN];
        scramble(&mut salt)?;

        let mut plaintext = Zeroizing::new(vec![0_u8; 1 + NOISE_PAD_LEN]);
        plaintext[0] = byte;
        scramble(&mut plaintext[1..])?;

        let key_guard = KeyGuard::open(&mut state.key, self.protector.as_ref())?;
        let blob = self
            .cipher
            .encrypt(&plaintext, key_guard.bytes(), &salt)?;
        drop(key_guard);

        state.entries.insert(id, CacheEntry { blob, salt, real });
        Ok(())
    }

    fn insert_decoy(&self, state: &mut CacheState) -> Result<()> {
        let mut raw = [0_u8; 8];
        loop {
            scramble(&mut raw)?;
            let id = u64::from_le_bytes(raw);
            if !state.entries.contains_key(&id) {
                let mut value = [0_u8; 1];
                scramble(&mut value)?;
                return self.create_entry(state, id, value[0], false);
            }
        }
    }

    fn verify_integrity(&self, state: &CacheState) -> Result<()> {
        let parts = state_parts(&state.entries);
        let refs: Vec<&[u8]> = parts.iter().map(|part| part.as_slice()).collect();
        self.detector.verify_unchanged(&refs)
    }

    fn refresh_baseline(&self, state: &CacheState) -> Result<()> {
        let parts = state_parts(&state.entries);
        let refs: Vec<&[u8]> = parts.iter().map(|part| part.as_slice()).collect();
        self.detector.notify_changed(&refs)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|_| SecureBytesError::OperationFailed("cache lock poisoned".to_string()))
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.state.lock().expect("cache lock").entries.len()
    }

    #[cfg(test)]
    fn decoy_ids(&self) -> Vec<u64> {
        self.state
            .lock()
            .expect("cache lock")
            .entries
            .iter()
            .filter(|(_, entry)| !entry.real)
            .map(|(id, _)| *id)
            .collect()
    }

    #[cfg(test)]
    fn corrupt_entry_for_test(&self, id: SafeByteId) {
        let mut state = self.state.lock().expect("cache lock");
        if let Some(entry) = state.entries.get_mut(&id.0) {
            if let Some(byte) = entry.blob.first_mut() {
                *byte ^= 0x01;
            }
        }
    }

    #[cfg(test)]
    fn plant_decoy_for_test(&self, id: u64) -> Result<()> {
        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        let mut value = [0_u8; 1];
        scramble(&mut value)?;
        self.create_entry(state, id, value[0], false)?;
        self.refresh_baseline(&*state)
    }
}

impl Drop for SafeByteCache {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}

impl fmt::Debug for SafeByteCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeByteCache")
            .field("channel", &self.detector.channel())
            .finish_non_exhaustive()
    }
}

// Probe-0 id for a byte: leading eight bytes of a session-salted digest.
fn derive_id(byte: u8) -> Result<u64> {
    let salt = session_salt()?;
    let mut input = Zeroizing::new(Vec::with_capacity(SESSION_SALT_LEN + 1));
    input.extend_from_slice(salt);
    input.push(byte);
    let digest = hash(&input);

    let mut raw = [0_u8; 8];
    raw.copy_from_slice(&digest[..8]);
    Ok(u64::from_le_bytes(raw))
}

fn session_salt() -> Result<&'static [u8; SESSION_SALT_LEN]> {
    SESSION_SALT.get_or_try_init(|| {
        let mut salt = [0_u8; SESSION_SALT_LEN];
        scramble(&mut salt)?;
        Ok(salt)
    })
}

// One part per entry, ordered by id so the fingerprint is independent of
// map iteration order.
fn state_parts(entries: &HashMap<u64, CacheEntry>) -> Vec<Vec<u8>> {
    let mut ids: Vec<u64> = entries.keys().copied().collect();
    ids.sort_unstable();

    let mut parts = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(entry) = entries.get(&id) {
            let mut part =
                Vec::with_capacity(8 + ENTRY_SALT_LEN + entry.blob.len() + 1);
            part.extend_from_slice(&id.to_le_bytes());
            part.extend_from_slice(&entry.salt);
            part.extend_from_slice(&entry.blob);
            part.push(u8::from(entry.real));
            parts.push(part);
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::AesCbcCipher;
    use std::thread;

    struct StubEntropy;

    impl EntropySource for StubEntropy {
        fn get_bytes(&self, count: usize) -> Result<Vec<u8>> {
            Ok(vec![0x5a; count])
        }

        fn get_available_bytes(&self, max: usize) -> Result<Vec<u8>> {
            Ok(vec![0xa5; max])
        }
    }

    fn new_test_cache(channel: AlertChannel) -> SafeByteCache {
        SafeByteCache::new(
            Arc::new(AesCbcCipher::new()),
            Arc::new(MaskingProtector::new().expect("protector")),
            &StubEntropy,
            channel,
        )
        .expect("cache construction")
    }

    #[test]
    fn test_same_byte_reuses_entry() {
        let cache = new_test_cache(AlertChannel::ThrowException);

        let first = cache.get_or_create(42).expect("first create");
        let second = cache.get_or_create(42).expect("second create");

        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_bytes_get_distinct_ids() {
        let cache = new_test_cache(AlertChannel::ThrowException);

        let mut ids = std::collections::HashSet::new();
        for byte in 0_u8..=255 {
            ids.insert(cache.get_or_create(byte).expect("create"));
        }

        assert_eq!(ids.len(), 256);
        assert_eq!(cache.len(), 256);
    }

    #[test]
    fn test_reveal_returns_original_byte() {
        let cache = new_test_cache(AlertChannel::ThrowException);

        for byte in [0_u8, 1, 127, 255] {
            let id = cache.get_or_create(byte).expect("create");
            assert_eq!(cache.reveal(id).expect("reveal"), byte);
        }
    }

    #[test]
    fn test_occupied_slot_probes_to_next_id() {
        let cache = new_test_cache(AlertChannel::ThrowException);

        // Occupy the byte's natural slot so creation must step past it.
        let base = derive_id(99).expect("derive");
        cache.plant_decoy_for_test(base).expect("plant");

        let id = cache.get_or_create(99).expect("create");
        assert_eq!(id.value(), base.wrapping_add(1));

        // Lookup walks the same sequence and lands on the same entry.
        assert_eq!(cache.get_or_create(99).expect("lookup"), id);
        assert_eq!(cache.reveal(id).expect("reveal"), 99);
    }

    #[test]
    fn test_reveal_unknown_id_not_found() {
        let cache = new_test_cache(AlertChannel::ThrowException);

        let result = cache.reveal(SafeByteId::from_raw(0xdead_beef));
        assert!(matches!(result, Err(SecureBytesError::NotFound(_))));
    }

    #[test]
    fn test_decoys_uncounted_and_unrevealable() {
        let cache = new_test_cache(AlertChannel::ThrowException);

        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
        assert_eq!(cache.entry_count(), 8);

        for id in cache.decoy_ids() {
            let result = cache.reveal(SafeByteId::from_raw(id));
            assert!(matches!(result, Err(SecureBytesError::NotFound(_))));
        }
    }

    #[test]
    fn test_decoy_inserted_every_fourth_creation() {
        let cache = new_test_cache(AlertChannel::ThrowException);
        let seeded = cache.entry_count();

        for byte in 0_u8..4 {
            cache.get_or_create(byte).expect("create");
        }

        // Four real entries plus one decoy on the fourth creation.
        assert_eq!(cache.entry_count(), seeded + 5);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_disposed_cache_rejects_operations() {
        let cache = new_test_cache(AlertChannel::ThrowException);
        let id = cache.get_or_create(9).expect("create");

        cache.dispose().expect("dispose");
        cache.dispose().expect("dispose twice");

        assert!(matches!(
            cache.get_or_create(9),
            Err(SecureBytesError::Disposed)
        ));
        assert!(matches!(cache.reveal(id), Err(SecureBytesError::Disposed)));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_external_modification_detected() {
        let cache = new_test_cache(AlertChannel::ThrowException);
        let id = cache.get_or_create(7).expect("create");

        cache.corrupt_entry_for_test(id);

        assert!(matches!(
            cache.reveal(id),
            Err(SecureBytesError::IntegrityViolation(_))
        ));
    }

    #[test]
    fn test_concurrent_creates_agree_on_ids() {
        let cache = Arc::new(new_test_cache(AlertChannel::ThrowException));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let cache = cache.clone();
            handles.push(thread::spawn(move || {
                (0_u8..8)
                    .map(|byte| cache.get_or_create(byte).expect("create"))
                    .collect::<Vec<_>>()
            }));
        }

        let all_ids: Vec<Vec<SafeByteId>> = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect();

        for ids in &all_ids[1..] {
            assert_eq!(ids, &all_ids[0]);
        }
        assert_eq!(cache.len(), 8);
    }

    #[test]
    fn test_reveal_after_reveal_is_stable() {
        let cache = new_test_cache(AlertChannel::ThrowException);
        let id = cache.get_or_create(200).expect("create");

        assert_eq!(cache.reveal(id).expect("first"), 200);
        assert_eq!(cache.reveal(id).expect("second"), 200);
    }
}
