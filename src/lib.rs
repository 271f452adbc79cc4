//! A compact stack-machine bytecode codec compatible with pickle protocol
//! v5: primitives, containers, date/time values, and user-defined structs
//! and enums, with an opt-in out-of-band buffer path.
//!
//! ```rust
//! use quickle_codec::{dumps, loads, registry::EmptyRegistry, value::Value};
//!
//! fn main() {
//!     let registry = EmptyRegistry;
//!     let original = Value::list(vec![Value::int(1), Value::str("hi"), Value::None]);
//!     let bytes = dumps(&original, &registry).unwrap();
//!     let roundtripped = loads(&bytes, &registry).unwrap();
//!     assert_eq!(original, roundtripped);
//! }
//! ```

pub mod buffer;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod memo;
pub mod opcode;
pub mod registry;
pub mod stack;
pub mod value;
pub mod wire;

pub use crate::decoder::{BufferSource, Decoder, DecoderConfig, VecBufferSource};
pub use crate::encoder::{Encoder, EncoderConfig};
pub use crate::error::{DecodingError, EncodingError, Error, Result};
pub use crate::registry::{EmptyRegistry, EnumDescriptor, StructDescriptor, TypeRegistry};
pub use crate::value::{BufferList, Value};

use std::rc::Rc;

/// Knobs shared by the encoder and decoder (spec §4.H): recursion/overflow
/// limits and the memory-reuse thresholds each scratch structure resets to
/// between calls.
#[derive(Debug, Clone)]
pub struct Config {
    pub recursion_limit: usize,
    pub write_buffer_size: usize,
    pub buffer_reset_cap: usize,
    pub memo_buffered_size: usize,
    pub value_stack_reset: usize,
    pub mark_stack_reset: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recursion_limit: 1000,
            write_buffer_size: 256,
            buffer_reset_cap: 1 << 20,
            memo_buffered_size: 64,
            value_stack_reset: 256,
            mark_stack_reset: 64,
        }
    }
}

impl Config {
    fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            recursion_limit: self.recursion_limit,
            write_buffer_size: self.write_buffer_size,
            buffer_reset_cap: self.buffer_reset_cap,
            memo_buffered_size: self.memo_buffered_size,
        }
    }

    fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            value_stack_reset: self.value_stack_reset,
            mark_stack_reset: self.mark_stack_reset,
            memo_reset: self.memo_buffered_size,
        }
    }
}

/// Encode `value` into a self-contained, STOP-terminated byte stream, with
/// memoization on and buffers inlined. Equivalent to building an `Encoder`
/// with a default `Config` and discarding it after one call; long-lived
/// callers that encode repeatedly should keep an `Encoder` around instead to
/// reuse its scratch allocations (spec §5).
pub fn dumps<R: TypeRegistry + ?Sized>(value: &Value, registry: &R) -> Result<Vec<u8>> {
    let mut encoder = Encoder::new(registry, Config::default().encoder_config());
    let (bytes, _) = encoder.encode(value, true, false)?;
    Ok(bytes)
}

/// The out-of-band counterpart of [`dumps`]: out-of-band buffer handles are
/// collected rather than inlined, for callers who ship them over a separate
/// channel (spec §4.D's "opt-in out-of-band buffer path").
pub fn dumps_with_buffers<R: TypeRegistry + ?Sized>(
    value: &Value,
    registry: &R,
) -> Result<(Vec<u8>, BufferList)> {
    let mut encoder = Encoder::new(registry, Config::default().encoder_config());
    let (bytes, buffers) = encoder.encode(value, true, true)?;
    Ok((bytes, buffers.unwrap_or_default()))
}

/// Decode a single STOP-terminated value from `bytes`, with no out-of-band
/// buffers available.
pub fn loads<R: TypeRegistry + ?Sized>(bytes: &[u8], registry: &R) -> Result<Value> {
    let mut decoder = Decoder::new(registry, Config::default().decoder_config());
    let mut buffers = VecBufferSource::new(Vec::new());
    Ok(decoder.decode(bytes, &mut buffers)?)
}

/// The out-of-band counterpart of [`loads`]: `buffers` is drained in
/// encounter order to satisfy `NEXT_BUFFER` opcodes.
pub fn loads_with_buffers<R: TypeRegistry + ?Sized>(
    bytes: &[u8],
    registry: &R,
    buffers: Vec<Rc<[u8]>>,
) -> Result<Value> {
    let mut decoder = Decoder::new(registry, Config::default().decoder_config());
    let mut source = VecBufferSource::new(buffers);
    Ok(decoder.decode(bytes, &mut source)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_nested_container() {
        let registry = EmptyRegistry;
        let original = Value::list(vec![
            Value::int(1),
            Value::str("hi"),
            Value::None,
            Value::tuple(vec![Value::Bool(true), Value::Bool(false)]),
        ]);
        let bytes = dumps(&original, &registry).unwrap();
        let roundtripped = loads(&bytes, &registry).unwrap();
        assert_eq!(original, roundtripped);
    }

    #[test]
    fn memoizes_a_shared_sublist() {
        let registry = EmptyRegistry;
        let shared = Value::list(vec![Value::int(1)]);
        let original = Value::list(vec![shared.clone(), shared]);
        let bytes = dumps(&original, &registry).unwrap();
        // One MEMOIZE for the outer list, one for the shared sublist, plus a
        // BINGET back-reference instead of a second encoding.
        assert!(bytes.iter().filter(|&&b| b == opcode::raw::MEMOIZE).count() >= 2);
        assert!(bytes.contains(&opcode::raw::BINGET));
        let roundtripped = loads(&bytes, &registry).unwrap();
        assert_eq!(original, roundtripped);
    }

    #[test]
    fn negative_integers_use_long1_per_worked_example() {
        let registry = EmptyRegistry;
        let bytes = dumps(&Value::int(-1), &registry).unwrap();
        assert_eq!(bytes, vec![opcode::raw::LONG1, 1, 0xff, opcode::raw::STOP]);
    }

    #[test]
    fn small_nonnegative_integers_use_binint1() {
        let registry = EmptyRegistry;
        let bytes = dumps(&Value::int(1), &registry).unwrap();
        assert_eq!(bytes, vec![opcode::raw::BININT1, 1, opcode::raw::STOP]);
    }

    #[test]
    fn none_encodes_as_a_bare_two_bytes() {
        let registry = EmptyRegistry;
        let bytes = dumps(&Value::None, &registry).unwrap();
        assert_eq!(bytes, vec![opcode::raw::NONE, opcode::raw::STOP]);
    }

    #[test]
    fn empty_list_is_memoized_even_unshared() {
        let registry = EmptyRegistry;
        let bytes = dumps(&Value::list(Vec::new()), &registry).unwrap();
        assert_eq!(
            bytes,
            vec![opcode::raw::EMPTY_LIST, opcode::raw::MEMOIZE, opcode::raw::STOP]
        );
    }

    #[test]
    fn shared_ints_are_not_memoized_but_appear_inline() {
        let registry = EmptyRegistry;
        let one = Value::int(1);
        let original = Value::list(vec![one.clone(), one]);
        let bytes = dumps(&original, &registry).unwrap();
        assert_eq!(
            bytes,
            vec![
                opcode::raw::EMPTY_LIST,
                opcode::raw::MEMOIZE,
                opcode::raw::MARK,
                opcode::raw::BININT1,
                1,
                opcode::raw::BININT1,
                1,
                opcode::raw::APPENDS,
                opcode::raw::STOP,
            ]
        );
    }

    #[test]
    fn a_self_referential_list_round_trips_to_a_true_cycle() {
        let registry = EmptyRegistry;
        let list = Value::list(Vec::new());
        if let Value::List(inner) = &list {
            inner.borrow_mut().push(list.clone());
        }
        let bytes = dumps(&list, &registry).unwrap();
        let roundtripped = loads(&bytes, &registry).unwrap();
        if let Value::List(inner) = &roundtripped {
            let first = inner.borrow()[0].clone();
            match first {
                Value::List(back) => assert!(Rc::ptr_eq(inner, &back)),
                other => panic!("expected a list back-reference, got {other:?}"),
            }
        } else {
            panic!("expected a list");
        }
    }

    #[test]
    fn short_text_round_trips_and_is_memoized() {
        let registry = EmptyRegistry;
        let bytes = dumps(&Value::str("hi"), &registry).unwrap();
        assert_eq!(
            bytes,
            vec![
                opcode::raw::SHORT_BINUNICODE,
                2,
                b'h',
                b'i',
                opcode::raw::MEMOIZE,
                opcode::raw::STOP,
            ]
        );
    }
}
