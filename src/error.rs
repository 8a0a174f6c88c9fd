use thiserror::Error;

/// Errors that can occur in the securebytes library.
///
/// This enum represents all possible error conditions that can occur when
/// working with encrypted byte storage. Each variant includes a description of
/// what went wrong and, where appropriate, additional context information.
///
/// # Examples
///
/// ```rust
/// use securebytes::{Result, SecureBytesError};
/// use securebytes::collection::EncryptedByteCollection;
///
/// fn read_first(collection: &EncryptedByteCollection) -> Result<()> {
///     match collection.get(0) {
///         Ok(_id) => println!("First id resolved"),
///         Err(SecureBytesError::EmptyCollection) => println!("Nothing stored yet"),
///         Err(e) => return Err(e),
///     }
///     Ok(())
/// }
/// ```
#[derive(Error, Debug)]
pub enum SecureBytesError {
    /// A required input was null, empty, or zero-length.
    ///
    /// This error occurs when an operation receives an empty plaintext, key,
    /// salt, or a zero byte count where a positive one is required.
    #[error("Missing or empty argument: {0}")]
    MissingArgument(String),

    /// The key length falls outside the declared bounds.
    ///
    /// Derivation normalizes key length, so only a weak-key floor is
    /// enforced; keys shorter than the minimum are rejected.
    #[error("Invalid key size: {0}")]
    InvalidKeySize(String),

    /// The ciphertext failed padding or format validation on decrypt.
    ///
    /// This error occurs when a blob is too short to carry an IV, is not
    /// block-aligned, fails PKCS7 padding validation, or decodes to an id
    /// list inconsistent with the recorded length. It is a tamper signal and
    /// is never silently recovered.
    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// An index was outside the collection bounds.
    #[error("Index {index} out of range for collection of length {length}")]
    IndexOutOfRange { index: usize, length: usize },

    /// The collection holds no elements.
    ///
    /// Returned by element access and full decryption on a collection that
    /// has never been appended to, or whose contents were disposed.
    #[error("Collection is empty")]
    EmptyCollection,

    /// No cache entry exists for the given id.
    ///
    /// Decoy entries are deliberately indistinguishable from absent ones, so
    /// revealing a decoy id reports this same condition.
    #[error("No entry found for id {0}")]
    NotFound(u64),

    /// The object has already been disposed.
    ///
    /// Once a cache or collection is disposed its key material is wiped and
    /// every subsequent operation fails with this error.
    #[error("Object is already disposed")]
    Disposed,

    /// The entropy pool could not satisfy a blocking read.
    ///
    /// This error occurs when a request exceeds the pool capacity or when
    /// the retry ceiling elapses before enough bytes accumulate.
    #[error("Entropy pool could not satisfy request: {0}")]
    EntropyUnavailable(String),

    /// The injection detector observed an unauthorized state change.
    ///
    /// Only the throwing alert channel surfaces this error; the other
    /// channels report the violation without failing the triggering call.
    #[error("Integrity violation detected: {0}")]
    IntegrityViolation(String),

    /// An internal operation failed.
    ///
    /// This is a general error for infrastructure faults such as poisoned
    /// locks, misaligned protector buffers, or failed random generation.
    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

/// Result type for securebytes operations.
///
/// This type alias is used throughout the library to represent operation
/// results that may fail with a `SecureBytesError`.
///
/// # Examples
///
/// ```rust
/// use securebytes::Result;
/// use securebytes::collection::EncryptedByteCollection;
///
/// fn collect(data: &[u8]) -> Result<usize> {
///     let collection = EncryptedByteCollection::with_defaults()?;
///     for &b in data {
///         collection.append(b)?;
///     }
///     Ok(collection.len())
/// }
/// ```
pub type Result<T> = std::result::Result<T, SecureBytesError>;
