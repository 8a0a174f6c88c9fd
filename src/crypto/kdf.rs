use crate::error::{Result, SecureBytesError};
use sha2::Sha512;
use zeroize::Zeroizing;

/// Iteration count for key derivation.
///
/// Deliberately expensive relative to a single hash; every encrypt and
/// decrypt pays this cost, which bounds how fast stored entries can be
/// brute-forced if their ciphertext leaks.
pub const DERIVATION_ROUNDS: u32 = 1024;

/// Derives `output_length` bytes from a password and salt.
///
/// PBKDF2-HMAC-SHA512 with [`DERIVATION_ROUNDS`] iterations. The salt must
/// be unique per encryption context; it is not secret. The result wipes
/// itself when dropped.
///
/// # Arguments
///
/// * `password` - The low-entropy input keying material.
/// * `salt` - Context-unique salt bytes.
/// * `output_length` - Number of derived bytes to produce.
///
/// # Errors
///
/// * `SecureBytesError::MissingArgument` - If the password or salt is empty,
///   or `output_length` is zero.
///
/// # Examples
///
/// ```rust
/// use securebytes::crypto::derive;
///
/// let key = derive(b"correct horse", b"per-context-salt", 32).unwrap();
/// assert_eq!(key.len(), 32);
/// ```
pub fn derive(password: &[u8], salt: &[u8], output_length: usize) -> Result<Zeroizing<Vec<u8>>> {
    if password.is_empty() {
        return Err(SecureBytesError::MissingArgument(
            "derivation password must not be empty".to_string(),
        ));
    }
    if salt.is_empty() {
        return Err(SecureBytesError::MissingArgument(
            "derivation salt must not be empty".to_string(),
        ));
    }
    if output_length == 0 {
        return Err(SecureBytesError::MissingArgument(
            "derivation output length must be positive".to_string(),
        ));
    }

    let mut output = Zeroizing::new(vec![0_u8; output_length]);
    pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, DERIVATION_ROUNDS, &mut output);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        let first = derive(b"password", b"salt", 32).unwrap();
        let second = derive(b"password", b"salt", 32).unwrap();
        assert_eq!(*first, *second);
    }

    #[test]
    fn test_derive_varies_with_inputs() {
        let base = derive(b"password", b"salt", 32).unwrap();
        assert_ne!(*base, *derive(b"password2", b"salt", 32).unwrap());
        assert_ne!(*base, *derive(b"password", b"salt2", 32).unwrap());
    }

    #[test]
    fn test_derive_output_length() {
        for len in [1, 16, 32, 64, 100] {
            assert_eq!(derive(b"password", b"salt", len).unwrap().len(), len);
        }
    }

    #[test]
    fn test_derive_rejects_empty_inputs() {
        assert!(matches!(
            derive(b"", b"salt", 32),
            Err(SecureBytesError::MissingArgument(_))
        ));
        assert!(matches!(
            derive(b"password", b"", 32),
            Err(SecureBytesError::MissingArgument(_))
        ));
        assert!(matches!(
            derive(b"password", b"salt", 0),
            Err(SecureBytesError::MissingArgument(_))
        ));
    }
}
