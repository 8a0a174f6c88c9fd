use crate::error::{Result, SecureBytesError};
use blake2::{Blake2b, Digest};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Computes a BLAKE2b-256 hash of the input data.
///
/// # Arguments
///
/// * `data` - The input data to hash.
///
/// # Returns
///
/// A 32-byte array containing the BLAKE2b-256 hash.
pub(crate) fn hash(data: &[u8]) -> [u8; 32] {
    use blake2::digest::consts::U32;
    type Blake2b256 = Blake2b<U32>;

    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut result = [0_u8; 32];
    result.copy_from_slice(&digest);
    result
}

/// Compares two byte slices in constant time.
///
/// Uses the `subtle` crate so the comparison takes the same amount of time
/// regardless of where the first difference occurs. Slices of different
/// length compare unequal immediately; length is not secret here.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Overwrites a byte slice with zeros.
///
/// `zeroize` is used so the compiler cannot optimize the store away.
pub(crate) fn wipe(buffer: &mut [u8]) {
    buffer.zeroize();
}

/// Fills a byte slice with cryptographically secure random bytes.
///
/// # Errors
///
/// * `SecureBytesError::OperationFailed` - If the OS random source fails.
pub(crate) fn scramble(buffer: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buffer)
        .map_err(|e| SecureBytesError::OperationFailed(format!("Random generation failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_hash_deterministic() {
        let data = b"input bytes";
        assert_eq!(hash(data), hash(data));
        assert_ne!(hash(data), hash(b"other bytes"));
    }

    #[test]
    fn test_hash_known_values() {
        // BLAKE2b-256 reference digests
        assert_eq!(
            hash(b""),
            hex!("0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8")
        );
        assert_eq!(
            hash(b"test"),
            hex!("928b20366943e2afd11ebc0eae2e53a93bf177a4fcf35bcc64d503704e65e202")
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(&[1, 2, 3], &[1, 2, 3]));
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2, 4]));
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2]));
        assert!(constant_time_eq(&[], &[]));
    }

    #[test]
    fn test_wipe() {
        let mut data = vec![0xff; 16];
        wipe(&mut data);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_scramble_changes_buffer() {
        let mut data = vec![0u8; 32];
        scramble(&mut data).unwrap();
        assert_ne!(data, vec![0u8; 32]);
    }
}
