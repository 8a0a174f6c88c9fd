//! # Secure Bytes
//!
//! A library for keeping secret byte sequences encrypted in memory.
//!
//! The `securebytes` library stores sensitive data (passwords, tokens, key
//! material) so that no plaintext copy of the whole secret exists between
//! accesses. Each distinct byte value is encrypted once in a deduplicating
//! cache, collections hold only an encrypted list of cache ids, and the keys
//! for both layers stay masked in memory except for the moment an operation
//! needs them. An injection detector fingerprints every store and raises an
//! alert when content changes behind the owner's back.
//!
//! ## Features
//!
//! - **Encrypted At Rest**: Secrets are AES-encrypted in memory, not merely
//!   wiped after use
//! - **Deduplicating Byte Cache**: Equal bytes share one ciphertext, looked
//!   up through salted one-way ids with no plaintext index
//! - **Decoy Entries**: Cache size and growth do not track the true amount
//!   of stored data
//! - **Protected Keys**: Encryption keys are masked between uses and exposed
//!   only inside scoped guards
//! - **Injection Detection**: External modification of stored state is
//!   detected and reported through configurable alert channels
//! - **Harvested Entropy**: A background pool of scheduler-jitter entropy
//!   strengthens key generation beyond the OS random source
//! - **Self-Wiping Buffers**: Decrypted output zeroes itself when dropped
//! - **Thread-Safe**: Caches and collections can be shared across threads
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use securebytes::collection::EncryptedByteCollection;
//!
//! // Create a collection with the default cipher, protector, and cache
//! let collection = EncryptedByteCollection::with_defaults().unwrap();
//!
//! // Append the secret byte by byte; only ciphertext is retained
//! for byte in b"correct horse battery staple" {
//!     collection.append(*byte).unwrap();
//! }
//! assert_eq!(collection.len(), 28);
//!
//! // Materialize the plaintext only when needed; the buffer wipes itself
//! let plaintext = collection.to_decrypted_bytes().unwrap();
//! assert_eq!(&*plaintext, b"correct horse battery staple");
//! ```
//!
//! ## Advanced Usage
//!
//! ### Sharing One Cache Across Collections
//!
//! ```rust,no_run
//! use securebytes::cache::SafeByteCache;
//! use securebytes::codec::FixedWidthCodec;
//! use securebytes::collection::EncryptedByteCollection;
//! use securebytes::crypto::AesCbcCipher;
//! use securebytes::detector::AlertChannel;
//! use securebytes::entropy::GlobalEntropySource;
//! use securebytes::protect::MaskingProtector;
//! use std::sync::Arc;
//!
//! // Collections built over the same cache share byte ciphertexts
//! let cache = Arc::new(SafeByteCache::with_defaults().unwrap());
//!
//! let collection = EncryptedByteCollection::new(
//!     cache.clone(),
//!     Arc::new(AesCbcCipher::new()),
//!     Arc::new(MaskingProtector::new().unwrap()),
//!     Arc::new(FixedWidthCodec::new()),
//!     &GlobalEntropySource,
//!     AlertChannel::default(),
//! )
//! .unwrap();
//!
//! collection.append(42).unwrap();
//! let id = collection.get(0).unwrap();
//! assert_eq!(cache.reveal(id).unwrap(), 42);
//! ```
//!
//! ### Reacting to Integrity Alerts
//!
//! ```rust,no_run
//! use securebytes::detector::{register_alert_listener, InjectionMessage};
//!
//! // Listeners receive every alert delivered on the RaiseEvent channel
//! register_alert_listener(|message: &InjectionMessage| {
//!     eprintln!("unexpected modification detected at {}", message.detected_at);
//! });
//! ```
//!
//! ### Drawing From the Entropy Pool
//!
//! ```rust,no_run
//! use securebytes::entropy::{EntropyPool, EntropySource};
//!
//! // The process-wide pool harvests entropy on a background thread
//! let pool = EntropyPool::global().unwrap();
//!
//! // Blocking read of exactly 24 bytes
//! let nonce = pool.get_bytes(24).unwrap();
//! assert_eq!(nonce.len(), 24);
//!
//! // Non-blocking read of whatever is currently available
//! let extra = pool.get_available_bytes(64).unwrap();
//! assert!(extra.len() <= 64);
//! ```
//!
//! ## Error Handling
//!
//! All operations that can fail return a `Result<T, SecureBytesError>` where
//! `SecureBytesError` describes what went wrong.
//!
//! ```rust,no_run
//! use securebytes::collection::EncryptedByteCollection;
//! use securebytes::Result;
//!
//! fn read_first(collection: &EncryptedByteCollection) -> Result<()> {
//!     // Reading an empty collection fails with SecureBytesError::EmptyCollection
//!     match collection.get(0) {
//!         Ok(id) => println!("first entry has id {}", id.value()),
//!         Err(e) => println!("failed to read entry: {}", e),
//!     }
//!
//!     Ok(())
//! }
//! ```

/// Encrypted ordered storage for multi-byte secrets
pub mod collection;

/// Deduplicating encrypted storage for single byte values
pub mod cache;

/// Key derivation and symmetric encryption
pub mod crypto;

/// In-memory key protection
pub mod protect;

/// Harvested entropy pool and key material mixing
pub mod entropy;

/// Integrity monitoring and alerting
pub mod detector;

/// Id list serialization
pub mod codec;

/// Error types
pub mod error;

mod util;

// Re-export key types
pub use crate::cache::{SafeByteCache, SafeByteId};
pub use crate::collection::EncryptedByteCollection;
pub use crate::detector::{AlertChannel, InjectionDetector};
pub use crate::error::{Result, SecureBytesError};
