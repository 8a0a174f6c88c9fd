use crate::cache::SafeByteId;
use crate::error::{Result, SecureBytesError};

const ID_WIDTH: usize = 8;

/// Compact encoding of an ordered id sequence.
///
/// Implementations must round-trip exactly. The empty list has a canonical
/// encoding, and callers treat an absent blob as "no ids" before the codec
/// is ever involved.
pub trait IdListCodec: Send + Sync {
    /// Encodes the ids in order.
    fn serialize(&self, ids: &[SafeByteId]) -> Result<Vec<u8>>;

    /// Decodes an encoded id sequence.
    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<SafeByteId>>;
}

/// Default [`IdListCodec`]: each id as 8 little-endian bytes, concatenated.
///
/// The empty list encodes as the empty byte string. Input whose length is
/// not a multiple of the id width cannot have been produced by this codec
/// and is rejected as tampered.
///
/// # Examples
///
/// ```rust
/// use securebytes::codec::{FixedWidthCodec, IdListCodec};
///
/// let codec = FixedWidthCodec::new();
/// let encoded = codec.serialize(&[]).unwrap();
/// assert!(encoded.is_empty());
/// assert!(codec.deserialize(&encoded).unwrap().is_empty());
/// ```
#[derive(Default, Debug, Clone)]
pub struct FixedWidthCodec;

impl FixedWidthCodec {
    /// Creates a new codec instance.
    pub fn new() -> Self {
        Self
    }
}

impl IdListCodec for FixedWidthCodec {
    fn serialize(&self, ids: &[SafeByteId]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(ids.len() * ID_WIDTH);
        for id in ids {
            out.extend_from_slice(&id.value().to_le_bytes());
        }
        Ok(out)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<SafeByteId>> {
        if bytes.len() % ID_WIDTH != 0 {
            return Err(SecureBytesError::InvalidCiphertext(format!(
                "id list length {} is not a multiple of the id width {}",
                bytes.len(),
                ID_WIDTH
            )));
        }

        let mut ids = Vec::with_capacity(bytes.len() / ID_WIDTH);
        for chunk in bytes.chunks_exact(ID_WIDTH) {
            let mut raw = [0_u8; ID_WIDTH];
            raw.copy_from_slice(chunk);
            ids.push(SafeByteId::from_raw(u64::from_le_bytes(raw)));
        }
        Ok(ids)
    }
}
