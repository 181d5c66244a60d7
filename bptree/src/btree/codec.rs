//! Byte encoding of keys and values.
//!
//! Nodes store every key and value as a length-prefixed byte string. Integers
//! encode big-endian so that the byte form sorts like the number for
//! non-negative values; ordering is still decided by the tree's comparator on
//! decoded keys, never on bytes.

/// Conversion between a key or value and its stored bytes.
pub trait Codec: Sized {
    /// Upper bound on the encoded length, or `None` if it depends on the value.
    const MAX_ENCODED_LEN: Option<usize> = None;

    /// Append the encoded form to `buf`.
    fn encode(&self, buf: &mut Vec<u8>);

    /// Decode a value from exactly the bytes produced by `encode`.
    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;

    /// Number of bytes `encode` appends.
    fn encoded_len(&self) -> usize {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf.len()
    }
}

/// Errors that can occur when decoding stored bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fixed-width type decoded from the wrong number of bytes.
    WrongLength { expected: usize, actual: usize },
    /// String bytes are not valid UTF-8.
    InvalidUtf8,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongLength { expected, actual } => {
                write!(f, "expected {expected} bytes, got {actual}")
            }
            Self::InvalidUtf8 => write!(f, "invalid UTF-8"),
        }
    }
}

impl std::error::Error for CodecError {}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CodecError> {
    bytes.try_into().map_err(|_| CodecError::WrongLength {
        expected: N,
        actual: bytes.len(),
    })
}

macro_rules! impl_int_codec {
    ($($ty:ty),*) => {
        $(
            impl Codec for $ty {
                const MAX_ENCODED_LEN: Option<usize> = Some(std::mem::size_of::<$ty>());

                fn encode(&self, buf: &mut Vec<u8>) {
                    buf.extend_from_slice(&self.to_be_bytes());
                }

                fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
                    Ok(Self::from_be_bytes(fixed(bytes)?))
                }
            }
        )*
    };
}

impl_int_codec!(u8, u16, u32, u64, i32, i64);

impl Codec for String {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }

    fn encoded_len(&self) -> usize {
        self.len()
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }
}

impl Codec for Vec<u8> {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }

    fn encoded_len(&self) -> usize {
        self.len()
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(bytes.to_vec())
    }
}

impl<const N: usize> Codec for [u8; N] {
    const MAX_ENCODED_LEN: Option<usize> = Some(N);

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        fixed(bytes)
    }
}
