use crate::error::{Result, SecureBytesError};
use crate::util::{hash, scramble, wipe};
use log::error;
use std::fmt;
use zeroize::Zeroize;

/// Required buffer alignment for the default protector.
pub const DEFAULT_BLOCK_SIZE: usize = 16;

const MASK_PAD_LEN: usize = 32;

/// Toggles the readability of a byte region holding key material.
///
/// Implementations mark a buffer inaccessible to casual inspection
/// (`protect`) and restore it (`unprotect`). The core always calls these in
/// strict protect → unprotect → protect brackets through [`KeyGuard`] and
/// never holds unprotected state past the guard scope.
///
/// Buffers passed to either operation must be non-empty and a multiple of
/// [`block_size`](MemoryProtector::block_size) in length.
pub trait MemoryProtector: Send + Sync {
    /// Masks the buffer in place so the raw key material is not resident.
    fn protect(&self, buffer: &mut [u8]) -> Result<()>;

    /// Restores the buffer in place to its raw form.
    fn unprotect(&self, buffer: &mut [u8]) -> Result<()>;

    /// Required length alignment for protected buffers, in bytes.
    fn block_size(&self) -> usize;
}

/// Default [`MemoryProtector`] masking buffers with a keyed XOR stream.
///
/// Each instance draws a random 32-byte pad at construction. Protection XORs
/// the buffer with a BLAKE2b-256 keystream derived from the pad and a block
/// counter, so the at-rest form carries no recognizable key bytes and the
/// operation reverses exactly. The pad never leaves the instance and is wiped
/// on drop.
///
/// # Examples
///
/// ```rust
/// use securebytes::protect::{MaskingProtector, MemoryProtector};
///
/// let protector = MaskingProtector::new().unwrap();
/// let mut key = [7u8; 32];
/// protector.protect(&mut key).unwrap();
/// assert_ne!(key, [7u8; 32]);
/// protector.unprotect(&mut key).unwrap();
/// assert_eq!(key, [7u8; 32]);
/// ```
pub struct MaskingProtector {
    pad: [u8; MASK_PAD_LEN],
}

impl MaskingProtector {
    /// Creates a protector with a fresh random pad.
    ///
    /// # Errors
    ///
    /// * `SecureBytesError::OperationFailed` - If the OS random source fails.
    pub fn new() -> Result<Self> {
        let mut pad = [0_u8; MASK_PAD_LEN];
        scramble(&mut pad)?;
        Ok(Self { pad })
    }

    fn check_buffer(&self, buffer: &[u8]) -> Result<()> {
        if buffer.is_empty() {
            return Err(SecureBytesError::MissingArgument(
                "protected buffer must not be empty".to_string(),
            ));
        }
        if buffer.len() % self.block_size() != 0 {
            return Err(SecureBytesError::OperationFailed(format!(
                "buffer length {} is not a multiple of the protector block size {}",
                buffer.len(),
                self.block_size()
            )));
        }
        Ok(())
    }

    // XOR is an involution, so the same keystream both masks and restores.
    fn apply_mask(&self, buffer: &mut [u8]) {
        let mut block_input = [0_u8; MASK_PAD_LEN + 8];
        block_input[..MASK_PAD_LEN].copy_from_slice(&self.pad);

        for (counter, chunk) in buffer.chunks_mut(32).enumerate() {
            block_input[MASK_PAD_LEN..].copy_from_slice(&(counter as u64).to_le_bytes());
            let mut mask = hash(&block_input);
            for (byte, m) in chunk.iter_mut().zip(mask.iter()) {
                *byte ^= m;
            }
            wipe(&mut mask);
        }

        wipe(&mut block_input);
    }
}

impl MemoryProtector for MaskingProtector {
    fn protect(&self, buffer: &mut [u8]) -> Result<()> {
        self.check_buffer(buffer)?;
        self.apply_mask(buffer);
        Ok(())
    }

    fn unprotect(&self, buffer: &mut [u8]) -> Result<()> {
        self.check_buffer(buffer)?;
        self.apply_mask(buffer);
        Ok(())
    }

    fn block_size(&self) -> usize {
        DEFAULT_BLOCK_SIZE
    }
}

impl fmt::Debug for MaskingProtector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaskingProtector")
            .field("block_size", &self.block_size())
            .finish()
    }
}

impl Drop for MaskingProtector {
    fn drop(&mut self) {
        self.pad.zeroize();
    }
}

/// Scoped unprotect bracket over a protected key buffer.
///
/// Construction unprotects the key; dropping the guard re-protects it on
/// every exit path, including failures in between. The unprotected bytes are
/// only reachable through [`bytes`](KeyGuard::bytes) while the guard lives,
/// so no caller can hold the raw key past the intended scope.
pub struct KeyGuard<'a> {
    key: &'a mut [u8],
    protector: &'a dyn MemoryProtector,
}

impl<'a> KeyGuard<'a> {
    /// Unprotects `key` in place and returns the guard keeping it open.
    ///
    /// # Errors
    ///
    /// Propagates protector failures; the key is left untouched on error.
    pub fn open(key: &'a mut [u8], protector: &'a dyn MemoryProtector) -> Result<Self> {
        protector.unprotect(key)?;
        Ok(Self { key, protector })
    }

    /// The raw key bytes, valid only while the guard is alive.
    pub fn bytes(&self) -> &[u8] {
        self.key
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.protector.protect(self.key) {
            error!("Failed to re-protect key on guard release: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_round_trip() {
        let protector = MaskingProtector::new().unwrap();
        let original = [0xab_u8; 48];
        let mut buffer = original;

        protector.protect(&mut buffer).unwrap();
        assert_ne!(buffer, original, "protected buffer should be masked");

        protector.unprotect(&mut buffer).unwrap();
        assert_eq!(buffer, original, "unprotect should restore the buffer");
    }

    #[test]
    fn test_distinct_instances_mask_differently() {
        let first = MaskingProtector::new().unwrap();
        let second = MaskingProtector::new().unwrap();
        let mut a = [0_u8; 16];
        let mut b = [0_u8; 16];

        first.protect(&mut a).unwrap();
        second.protect(&mut b).unwrap();

        assert_ne!(a, b, "each protector instance should carry its own pad");
    }

    #[test]
    fn test_rejects_misaligned_buffer() {
        let protector = MaskingProtector::new().unwrap();
        let mut buffer = [0_u8; 15];

        let result = protector.protect(&mut buffer);
        assert!(matches!(
            result,
            Err(SecureBytesError::OperationFailed(_))
        ));
    }

    #[test]
    fn test_rejects_empty_buffer() {
        let protector = MaskingProtector::new().unwrap();
        let mut buffer = [0_u8; 0];

        let result = protector.unprotect(&mut buffer);
        assert!(matches!(
            result,
            Err(SecureBytesError::MissingArgument(_))
        ));
    }

    #[test]
    fn test_guard_exposes_raw_key_and_reprotects() {
        let protector = MaskingProtector::new().unwrap();
        let raw = [0x5c_u8; 32];
        let mut key = raw;
        protector.protect(&mut key).unwrap();
        let protected = key;

        {
            let guard = KeyGuard::open(&mut key, &protector).unwrap();
            assert_eq!(guard.bytes(), &raw, "guard should expose the raw key");
        }

        assert_eq!(key, protected, "drop should re-protect the key");
    }

    #[test]
    fn test_guard_reprotects_on_error_path() {
        fn failing_use(key: &mut [u8], protector: &dyn MemoryProtector) -> Result<()> {
            let _guard = KeyGuard::open(key, protector)?;
            Err(SecureBytesError::OperationFailed("simulated".to_string()))
        }

        let protector = MaskingProtector::new().unwrap();
        let mut key = [0x11_u8; 16];
        protector.protect(&mut key).unwrap();
        let protected = key;

        assert!(failing_use(&mut key, &protector).is_err());
        assert_eq!(
            key, protected,
            "key should be re-protected even when the operation fails"
        );
    }
}
