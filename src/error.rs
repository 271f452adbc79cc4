//! The error taxonomy: two public leaves (encoding / decoding) under one
//! common root, per spec §7.

use thiserror::Error;

/// Anything that can go wrong turning a value into bytes.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("cannot encode a value of this type")]
    UnsupportedType,

    #[error("no registry entry for this struct/enum type")]
    UnknownType,

    #[error("buffer view is not contiguous and cannot be serialized")]
    BadBuffer,

    #[error("value too large to encode: {0}")]
    Overflow(&'static str),

    #[error("container was mutated while it was being encoded")]
    MutatedDuringIter,

    #[error("recursion limit of {limit} exceeded while encoding")]
    RecursionLimit { limit: usize },
}

/// Anything that can go wrong turning bytes back into a value.
#[derive(Debug, Error)]
pub enum DecodingError {
    #[error("unexpected end of input: needed {needed} more byte(s), {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown opcode 0x{opcode:02x}")]
    InvalidOpcode { opcode: u8 },

    #[error("malformed payload for opcode 0x{opcode:02x}: {reason}")]
    Malformed { opcode: u8, reason: &'static str },

    #[error("stack underflow (attempted pop across a mark or empty stack)")]
    StackUnderflow,

    #[error("opcode 0x{opcode:02x} found a mark where none was expected")]
    UnexpectedMark { opcode: u8 },

    #[error("opcode 0x{opcode:02x} needed a mark that was never pushed")]
    MissingMark { opcode: u8 },

    #[error("memo index {index} was never written")]
    MissingMemo { index: u64 },

    #[error("no registry entry for code {code}")]
    UnknownType { code: u32 },

    #[error("opcode 0x{opcode:02x} expected a value of a different kind on the stack")]
    TypeMismatch { opcode: u8 },

    #[error("struct field `{field}` is required but was not present on the wire")]
    MissingField { field: &'static str },

    #[error("NEXT_BUFFER used without an out-of-band buffer iterator")]
    MissingBuffer,

    #[error("out-of-band buffer iterator exhausted")]
    BufferUnderflow,

    #[error("declared length {0} exceeds what this platform can address")]
    Overflow(u64),
}

/// The common root: every fallible operation in this crate returns this.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Decoding(#[from] DecodingError),
}

pub type Result<T> = std::result::Result<T, Error>;
pub type EncodeResult<T> = std::result::Result<T, EncodingError>;
pub type DecodeResult<T> = std::result::Result<T, DecodingError>;
