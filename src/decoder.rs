//! The decoder VM (spec §4.G): a dispatch loop over `wire::Cursor`, driving
//! a value stack, a mark stack, and an index-addressed memo.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{NaiveDate, NaiveTime};
use num_bigint::BigInt;

use crate::error::{DecodeResult, DecodingError};
use crate::memo::DecoderMemo;
use crate::opcode::Opcode;
use crate::registry::{EnumDescriptor, TypeRegistry};
use crate::stack::{MarkStack, ValueStack};
use crate::value::{DateTime, Delta, EnumValue, Time, TzValue, Value};
use crate::wire::Cursor;

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub value_stack_reset: usize,
    pub mark_stack_reset: usize,
    pub memo_reset: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            value_stack_reset: 256,
            mark_stack_reset: 64,
            memo_reset: 64,
        }
    }
}

/// An out-of-band buffer source for `NEXT_BUFFER` (spec §4.G). Host
/// collaborators supply these in encounter order; the core only ever pulls
/// from the front.
pub trait BufferSource {
    fn next(&mut self) -> Option<Rc<[u8]>>;
}

/// A `BufferSource` over an in-memory list, for callers who already have
/// all out-of-band buffers materialized.
pub struct VecBufferSource {
    buffers: std::vec::IntoIter<Rc<[u8]>>,
}

impl VecBufferSource {
    pub fn new(buffers: Vec<Rc<[u8]>>) -> Self {
        Self {
            buffers: buffers.into_iter(),
        }
    }
}

impl BufferSource for VecBufferSource {
    fn next(&mut self) -> Option<Rc<[u8]>> {
        self.buffers.next()
    }
}

pub struct Decoder<'r, R: TypeRegistry + ?Sized> {
    registry: &'r R,
    stack: ValueStack,
    marks: MarkStack,
    memo: DecoderMemo,
}

impl<'r, R: TypeRegistry + ?Sized> Decoder<'r, R> {
    pub fn new(registry: &'r R, config: DecoderConfig) -> Self {
        Self {
            registry,
            stack: ValueStack::new(config.value_stack_reset),
            marks: MarkStack::new(config.mark_stack_reset),
            memo: DecoderMemo::new(config.memo_reset),
        }
    }

    /// Decode a single STOP-terminated value from `input`. Any out-of-band
    /// buffers referenced by `NEXT_BUFFER` are drawn from `buffers`.
    #[tracing::instrument(level = "trace", skip(self, input, buffers), fields(bytes = input.len()))]
    pub fn decode(
        &mut self,
        input: &[u8],
        buffers: &mut dyn BufferSource,
    ) -> DecodeResult<Value> {
        let mut cursor = Cursor::new(input);
        let result = self.run(&mut cursor, buffers);
        self.stack.reset();
        self.marks.reset();
        self.memo.clear();
        match &result {
            Ok(_) => tracing::debug!("decode finished"),
            Err(err) => tracing::debug!(%err, "decode failed"),
        }
        result
    }

    fn run(&mut self, cursor: &mut Cursor<'_>, buffers: &mut dyn BufferSource) -> DecodeResult<Value> {
        loop {
            let byte = cursor.read_u8()?;
            let op = Opcode::from_byte(byte).ok_or(DecodingError::InvalidOpcode { opcode: byte })?;
            if let Some(value) = self.step(op, byte, cursor, buffers)? {
                return Ok(value);
            }
        }
    }

    fn fence(&self) -> usize {
        self.marks.fence()
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self, opcode: u8) -> DecodeResult<Value> {
        self.stack
            .pop(self.fence())
            .map_err(|_| DecodingError::TypeMismatch { opcode })
    }

    /// Dispatch one opcode. Returns `Some(value)` when the opcode was STOP.
    fn step(
        &mut self,
        op: Opcode,
        byte: u8,
        cursor: &mut Cursor<'_>,
        buffers: &mut dyn BufferSource,
    ) -> DecodeResult<Option<Value>> {
        match op {
            Opcode::Proto | Opcode::Frame => {
                // PROTO carries one payload byte; FRAME carries 8 (a u64 length).
                // Neither affects decoding state (spec §4.G).
                if op == Opcode::Proto {
                    cursor.read_u8()?;
                } else {
                    cursor.read_u64_le()?;
                }
            }
            Opcode::Stop => {
                let value = self.pop(byte)?;
                return Ok(Some(value));
            }
            Opcode::Mark => self.marks.push(self.stack.len()),
            Opcode::Pop => {
                self.pop(byte)?;
            }
            Opcode::PopMark => {
                let (mark, _) = self.marks.pop(byte)?;
                self.stack.truncate(mark);
            }
            Opcode::None_ => self.push(Value::None),
            Opcode::NewTrue => self.push(Value::Bool(true)),
            Opcode::NewFalse => self.push(Value::Bool(false)),
            Opcode::BinInt => {
                let n = cursor.read_i32_le()?;
                self.push(Value::Int(BigInt::from(n)));
            }
            Opcode::BinInt1 => {
                let n = cursor.read_u8()?;
                self.push(Value::Int(BigInt::from(n)));
            }
            Opcode::BinInt2 => {
                let n = cursor.read_u16_le()?;
                self.push(Value::Int(BigInt::from(n)));
            }
            Opcode::Long1 => {
                let len = cursor.read_u8()? as usize;
                let bytes = cursor.read_bytes(len)?;
                self.push(Value::Int(decode_long(bytes)));
            }
            Opcode::Long4 => {
                let len = cursor.read_u32_le()? as usize;
                let bytes = cursor.read_bytes(len)?;
                self.push(Value::Int(decode_long(bytes)));
            }
            Opcode::BinFloat => {
                let f = cursor.read_f64_be()?;
                self.push(Value::Float(f));
            }
            Opcode::ShortBinUnicode => {
                let bytes = cursor.read_length_prefixed(1)?;
                self.push(Value::str(decode_utf8(byte, bytes)?));
            }
            Opcode::BinUnicode => {
                let bytes = cursor.read_length_prefixed(4)?;
                self.push(Value::str(decode_utf8(byte, bytes)?));
            }
            Opcode::BinUnicode8 => {
                let bytes = cursor.read_length_prefixed(8)?;
                self.push(Value::str(decode_utf8(byte, bytes)?));
            }
            Opcode::ShortBinBytes => {
                let bytes = cursor.read_length_prefixed(1)?;
                self.push(Value::bytes(bytes.to_vec()));
            }
            Opcode::BinBytes => {
                let bytes = cursor.read_length_prefixed(4)?;
                self.push(Value::bytes(bytes.to_vec()));
            }
            Opcode::BinBytes8 => {
                let bytes = cursor.read_length_prefixed(8)?;
                self.push(Value::bytes(bytes.to_vec()));
            }
            Opcode::ByteArray8 => {
                let bytes = cursor.read_length_prefixed(8)?;
                self.push(Value::ByteArray(Rc::new(RefCell::new(bytes.to_vec()))));
            }
            Opcode::NextBuffer => {
                let bytes = buffers.next().ok_or(DecodingError::MissingBuffer)?;
                self.push(Value::Buffer(Rc::new(crate::value::OwnedBuffer {
                    bytes,
                    readonly: false,
                })));
            }
            Opcode::ReadonlyBuffer => {
                let top = self.stack.last_mut(self.fence())?;
                if let Value::Buffer(handle) = top {
                    *handle = Rc::new(crate::value::OwnedBuffer {
                        bytes: handle.as_bytes().into(),
                        readonly: true,
                    });
                } else {
                    return Err(DecodingError::TypeMismatch { opcode: byte });
                }
            }
            Opcode::EmptyList => self.push(Value::list(Vec::new())),
            Opcode::EmptyDict => self.push(Value::Dict(Rc::new(RefCell::new(indexmap::IndexMap::new())))),
            Opcode::EmptySet => self.push(Value::Set(Rc::new(RefCell::new(indexmap::IndexSet::new())))),
            Opcode::EmptyTuple => self.push(Value::tuple(Vec::new())),
            Opcode::Append => {
                let item = self.pop(byte)?;
                let list = self.top_list(byte)?;
                list.borrow_mut().push(item);
            }
            Opcode::Appends => {
                let (mark, _) = self.marks.pop(byte)?;
                let items = self.stack.drain_above(mark);
                let list = self.top_list(byte)?;
                list.borrow_mut().extend(items);
            }
            Opcode::SetItem => {
                let value = self.pop(byte)?;
                let key = self.pop(byte)?;
                let dict = self.top_dict(byte)?;
                dict.borrow_mut().insert(key, value);
            }
            Opcode::SetItems => {
                let (mark, _) = self.marks.pop(byte)?;
                let items = self.stack.drain_above(mark);
                let dict = self.top_dict(byte)?;
                let mut dict = dict.borrow_mut();
                for pair in items.chunks(2) {
                    if let [k, v] = pair {
                        dict.insert(k.clone(), v.clone());
                    }
                }
            }
            Opcode::AddItems => {
                let (mark, _) = self.marks.pop(byte)?;
                let items = self.stack.drain_above(mark);
                let set = self.top_set(byte)?;
                set.borrow_mut().extend(items);
            }
            Opcode::FrozenSet => {
                let (mark, _) = self.marks.pop(byte)?;
                let items = self.stack.drain_above(mark);
                self.push(Value::FrozenSet(Rc::new(items.into_iter().collect())));
            }
            Opcode::Tuple1 => {
                let a = self.pop(byte)?;
                self.push(Value::tuple(vec![a]));
            }
            Opcode::Tuple2 => {
                let b = self.pop(byte)?;
                let a = self.pop(byte)?;
                self.push(Value::tuple(vec![a, b]));
            }
            Opcode::Tuple3 => {
                let c = self.pop(byte)?;
                let b = self.pop(byte)?;
                let a = self.pop(byte)?;
                self.push(Value::tuple(vec![a, b, c]));
            }
            Opcode::Tuple => {
                let (mark, _) = self.marks.pop(byte)?;
                let items = self.stack.drain_above(mark);
                self.push(Value::tuple(items));
            }
            Opcode::BinGet => {
                let idx = cursor.read_u8()? as u64;
                let value = self
                    .memo
                    .get(idx)
                    .cloned()
                    .ok_or(DecodingError::MissingMemo { index: idx })?;
                self.push(value);
            }
            Opcode::LongBinGet => {
                let idx = cursor.read_u32_le()? as u64;
                let value = self
                    .memo
                    .get(idx)
                    .cloned()
                    .ok_or(DecodingError::MissingMemo { index: idx })?;
                self.push(value);
            }
            Opcode::Memoize => {
                let value = self.stack.last(self.fence())?.clone();
                self.memo.push(value);
            }
            Opcode::Complex => {
                let re = cursor.read_f64_be()?;
                let im = cursor.read_f64_be()?;
                self.push(Value::Complex(re, im));
            }
            Opcode::TimeDelta => {
                let days = cursor.read_i32_le()?;
                let seconds = sign_extend_24(cursor.read_uint_le(3)?);
                let microseconds = sign_extend_24(cursor.read_uint_le(3)?);
                self.push(Value::Delta(Delta {
                    days,
                    seconds,
                    microseconds,
                }));
            }
            Opcode::Date => {
                let year = cursor.read_u16_le()?;
                let month = cursor.read_u8()?;
                let day = cursor.read_u8()?;
                let date = naive_date(year, month, day, byte)?;
                self.push(Value::Date(date));
            }
            Opcode::Time => {
                let (time, fold) = read_time_payload(cursor, byte)?;
                self.push(Value::Time(Time {
                    time,
                    fold,
                    tz: None,
                }));
            }
            Opcode::TimeTz => {
                let tz = self.pop_timezone(byte)?;
                let (time, fold) = read_time_payload(cursor, byte)?;
                self.push(Value::Time(Time {
                    time,
                    fold,
                    tz: Some(tz),
                }));
            }
            Opcode::DateTime => {
                let (date, time, fold) = read_datetime_payload(cursor, byte)?;
                self.push(Value::DateTime(DateTime {
                    date,
                    time,
                    fold,
                    tz: None,
                }));
            }
            Opcode::DateTimeTz => {
                let tz = self.pop_timezone(byte)?;
                let (date, time, fold) = read_datetime_payload(cursor, byte)?;
                self.push(Value::DateTime(DateTime {
                    date,
                    time,
                    fold,
                    tz: Some(tz),
                }));
            }
            Opcode::TimezoneUtc => self.push(Value::Timezone(TzValue::Utc)),
            Opcode::Timezone => {
                let packed = cursor.read_uint_le(3)?;
                let negative = packed & (1 << 23) != 0;
                let magnitude = (packed & 0x7fffff) as i32;
                // `negative` means the day component is -1, so the total
                // offset is `magnitude - 86400`, not `-magnitude` (spec
                // §4.A "bit23 set ⇒ negative day").
                let seconds = if negative { magnitude - 86_400 } else { magnitude };
                // Payload also carries a microseconds field (spec §4.A); the
                // value model only tracks whole-second offsets, so read past
                // it to keep the cursor aligned with what the encoder wrote.
                let _microseconds = cursor.read_uint_le(3)?;
                self.push(Value::Timezone(TzValue::FixedOffsetSeconds(seconds)));
            }
            Opcode::ZoneInfo => {
                let key = self.pop(byte)?;
                let key = match key {
                    Value::Str(s) => s,
                    _ => return Err(DecodingError::TypeMismatch { opcode: byte }),
                };
                self.push(Value::Timezone(TzValue::Named(key)));
            }
            Opcode::Struct1 | Opcode::Struct2 | Opcode::Struct4 => {
                let code = self.read_typecode(op, cursor)?;
                let desc = self
                    .registry
                    .struct_by_code(code)
                    .ok_or(DecodingError::UnknownType { code })?;
                self.push(Value::Struct(desc.allocate()));
            }
            Opcode::BuildStruct => {
                let (mark, _) = self.marks.pop(byte)?;
                let mut fields = self.stack.drain_above(mark);
                let instance = match self.stack.last(self.fence())? {
                    Value::Struct(s) => s.clone(),
                    _ => return Err(DecodingError::TypeMismatch { opcode: byte }),
                };
                let desc = self
                    .registry
                    .struct_by_code(instance.code)
                    .ok_or(DecodingError::UnknownType { code: instance.code })?;
                if let Some(missing) = desc.fill_missing(&mut fields) {
                    return Err(DecodingError::MissingField { field: missing });
                }
                *instance.fields.borrow_mut() = fields;
            }
            Opcode::Enum1 | Opcode::Enum2 | Opcode::Enum4 => {
                let code = self.read_typecode(op, cursor)?;
                let selector = self.pop(byte)?;
                let desc = self
                    .registry
                    .enum_by_code(code)
                    .ok_or(DecodingError::UnknownType { code })?;
                let member = self.resolve_enum_member(desc, selector, byte)?;
                self.push(Value::Enum(desc.build(member)));
            }
        }
        Ok(None)
    }

    fn top_list(&mut self, opcode: u8) -> DecodeResult<crate::value::List> {
        match self.stack.last(self.fence())? {
            Value::List(l) => Ok(l.clone()),
            _ => Err(DecodingError::TypeMismatch { opcode }),
        }
    }

    fn top_dict(&mut self, opcode: u8) -> DecodeResult<crate::value::Dict> {
        match self.stack.last(self.fence())? {
            Value::Dict(d) => Ok(d.clone()),
            _ => Err(DecodingError::TypeMismatch { opcode }),
        }
    }

    fn top_set(&mut self, opcode: u8) -> DecodeResult<crate::value::Set> {
        match self.stack.last(self.fence())? {
            Value::Set(s) => Ok(s.clone()),
            _ => Err(DecodingError::TypeMismatch { opcode }),
        }
    }

    fn pop_timezone(&mut self, opcode: u8) -> DecodeResult<TzValue> {
        match self.pop(opcode)? {
            Value::Timezone(tz) => Ok(tz),
            _ => Err(DecodingError::TypeMismatch { opcode }),
        }
    }

    fn read_typecode(&self, op: Opcode, cursor: &mut Cursor<'_>) -> DecodeResult<u32> {
        match op {
            Opcode::Struct1 | Opcode::Enum1 => Ok(cursor.read_u8()? as u32),
            Opcode::Struct2 | Opcode::Enum2 => Ok(cursor.read_u16_le()? as u32),
            Opcode::Struct4 | Opcode::Enum4 => cursor.read_u32_le(),
            _ => unreachable!("read_typecode called on a non-typecode opcode"),
        }
    }

    fn resolve_enum_member(
        &self,
        desc: &dyn EnumDescriptor,
        selector: Value,
        opcode: u8,
    ) -> DecodeResult<EnumValue> {
        match selector {
            Value::Int(n) => {
                let n = n
                    .to_string()
                    .parse::<i64>()
                    .map_err(|_| DecodingError::Overflow(0))?;
                desc.member_by_value(n)
                    .ok_or(DecodingError::TypeMismatch { opcode })
            }
            Value::Str(s) => desc
                .member_by_name(&s)
                .ok_or(DecodingError::TypeMismatch { opcode }),
            _ => Err(DecodingError::TypeMismatch { opcode }),
        }
    }
}

fn decode_long(bytes: &[u8]) -> BigInt {
    if bytes.is_empty() {
        BigInt::from(0)
    } else {
        BigInt::from_signed_bytes_le(bytes)
    }
}

fn decode_utf8(opcode: u8, bytes: &[u8]) -> DecodeResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| DecodingError::Malformed {
        opcode,
        reason: "text payload is not valid UTF-8",
    })
}

fn sign_extend_24(raw: u32) -> i32 {
    let shifted = (raw << 8) as i32;
    shifted >> 8
}

fn naive_date(year: u16, month: u8, day: u8, opcode: u8) -> DecodeResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32).ok_or(DecodingError::Malformed {
        opcode,
        reason: "date fields do not form a valid calendar date",
    })
}

fn read_time_payload(cursor: &mut Cursor<'_>, opcode: u8) -> DecodeResult<(NaiveTime, bool)> {
    let packed_hour = cursor.read_u8()?;
    let fold = packed_hour & 0x80 != 0;
    let hour = packed_hour & 0x7f;
    let minute = cursor.read_u8()?;
    let second = cursor.read_u8()?;
    let micros = cursor.read_uint_le(3)?;
    let time = NaiveTime::from_hms_micro_opt(hour as u32, minute as u32, second as u32, micros)
        .ok_or(DecodingError::Malformed {
            opcode,
            reason: "time fields do not form a valid time of day",
        })?;
    Ok((time, fold))
}

fn read_datetime_payload(
    cursor: &mut Cursor<'_>,
    opcode: u8,
) -> DecodeResult<(NaiveDate, NaiveTime, bool)> {
    let year = cursor.read_u16_le()?;
    let month = cursor.read_u8()?;
    let day = cursor.read_u8()?;
    let date = naive_date(year, month, day, opcode)?;
    let (time, fold) = read_time_payload(cursor, opcode)?;
    Ok((date, time, fold))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::raw;
    use crate::registry::EmptyRegistry;

    #[test]
    fn decodes_a_flat_none_stream() {
        let bytes = [raw::NONE, raw::STOP];
        let registry = EmptyRegistry;
        let mut decoder = Decoder::new(&registry, DecoderConfig::default());
        let mut buffers = VecBufferSource::new(Vec::new());
        let value = decoder.decode(&bytes, &mut buffers).unwrap();
        assert_eq!(value, Value::None);
    }

    #[test]
    fn decodes_binint1() {
        let bytes = [raw::BININT1, 42, raw::STOP];
        let registry = EmptyRegistry;
        let mut decoder = Decoder::new(&registry, DecoderConfig::default());
        let mut buffers = VecBufferSource::new(Vec::new());
        let value = decoder.decode(&bytes, &mut buffers).unwrap();
        assert_eq!(value, Value::int(42));
    }

    #[test]
    fn rejects_unknown_opcodes() {
        let bytes = [0xff];
        let registry = EmptyRegistry;
        let mut decoder = Decoder::new(&registry, DecoderConfig::default());
        let mut buffers = VecBufferSource::new(Vec::new());
        assert!(matches!(
            decoder.decode(&bytes, &mut buffers),
            Err(DecodingError::InvalidOpcode { opcode: 0xff })
        ));
    }
}
