//! The encoder engine (spec §4.D): a depth-first walk that consults the
//! memo before emitting each non-atomic value, batches containers, and
//! routes buffers in-band or out-of-band.

use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::error::{EncodeResult, EncodingError};
use crate::memo::{identity_of, is_shared, LookupTable};
use crate::opcode::{raw, BATCH_SIZE};
use crate::registry::TypeRegistry;
use crate::value::{BufferList, TzValue, Value};
use crate::buffer::WriteBuffer;

/// Tunable knobs for an `Encoder` instance (spec §4.H / §5).
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub recursion_limit: usize,
    pub write_buffer_size: usize,
    pub buffer_reset_cap: usize,
    pub memo_buffered_size: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 1000,
            write_buffer_size: 256,
            buffer_reset_cap: 1 << 20,
            memo_buffered_size: 64,
        }
    }
}

pub struct Encoder<'r, R: TypeRegistry + ?Sized> {
    registry: &'r R,
    memo: LookupTable,
    buf: WriteBuffer,
    config: EncoderConfig,
    depth: usize,
}

impl<'r, R: TypeRegistry + ?Sized> Encoder<'r, R> {
    pub fn new(registry: &'r R, config: EncoderConfig) -> Self {
        let buf = WriteBuffer::new(
            config.write_buffer_size,
            config.write_buffer_size,
            config.buffer_reset_cap,
        );
        let memo = LookupTable::new(config.memo_buffered_size);
        Self {
            registry,
            memo,
            buf,
            config,
            depth: 0,
        }
    }

    /// Encode `value` to a self-contained, STOP-terminated byte stream.
    /// When `collect_buffers` is set, any out-of-band buffer handles
    /// encountered are returned alongside the bytes instead of being
    /// inlined (spec §4.D).
    #[tracing::instrument(level = "trace", skip(self, value), fields(memoize, collect_buffers))]
    pub fn encode(
        &mut self,
        value: &Value,
        memoize: bool,
        collect_buffers: bool,
    ) -> EncodeResult<(Vec<u8>, Option<BufferList>)> {
        self.depth = 0;
        let mut buffers = collect_buffers.then(Vec::new);
        let result = self.save(value, memoize, memoize, &mut buffers);
        let outcome = result.and_then(|()| {
            self.buf.write_u8(raw::STOP)?;
            Ok(self.buf.as_slice().to_vec())
        });
        self.memo.reset();
        self.buf.reset();
        match &outcome {
            Ok(bytes) => tracing::debug!(bytes = bytes.len(), "encode finished"),
            Err(err) => tracing::debug!(%err, "encode failed"),
        }
        outcome.map(|bytes| (bytes, buffers))
    }

    fn write_backref(&mut self, id: u32) -> EncodeResult<()> {
        if id < 256 {
            self.buf.write(&[raw::BINGET, id as u8])
        } else {
            let mut out = [raw::LONG_BINGET, 0, 0, 0, 0];
            out[1..].copy_from_slice(&id.to_le_bytes());
            self.buf.write(&out)
        }
    }

    fn memoize_value(&mut self, value: &Value) -> EncodeResult<()> {
        if let Some(id) = identity_of(value) {
            let next = self.memo.len() as u32;
            self.memo.set(id, next);
        }
        self.buf.write_u8(raw::MEMOIZE)
    }

    fn write_typecode(&mut self, code: u32, op1: u8, op2: u8, op3: u8) -> EncodeResult<()> {
        if code < 0xff {
            self.buf.write(&[op1, code as u8])
        } else if code <= 0xffff {
            let c = code as u16;
            self.buf.write(&[op2, (c & 0xff) as u8, (c >> 8) as u8])
        } else {
            let mut out = [op3, 0, 0, 0, 0];
            out[1..].copy_from_slice(&code.to_le_bytes());
            self.buf.write(&out)
        }
    }

    fn save(
        &mut self,
        value: &Value,
        memoize_enabled: bool,
        force: bool,
        buffers: &mut Option<BufferList>,
    ) -> EncodeResult<()> {
        if value.is_atom() {
            return self.save_atom(value);
        }

        if memoize_enabled {
            if let Some(id) = identity_of(value) {
                if let Some(existing) = self.memo.get(id) {
                    return self.write_backref(existing);
                }
            }
        }

        self.depth += 1;
        if self.depth > self.config.recursion_limit {
            self.depth -= 1;
            return Err(EncodingError::RecursionLimit {
                limit: self.config.recursion_limit,
            });
        }
        let result = self.save_nonatomic(value, memoize_enabled, force, buffers);
        self.depth -= 1;
        result
    }

    fn save_atom(&mut self, value: &Value) -> EncodeResult<()> {
        match value {
            Value::None => self.buf.write_u8(raw::NONE),
            Value::Bool(true) => self.buf.write_u8(raw::NEWTRUE),
            Value::Bool(false) => self.buf.write_u8(raw::NEWFALSE),
            Value::Int(n) => self.save_int(n),
            Value::Float(f) => self.save_float(*f),
            Value::Complex(re, im) => {
                let mut out = [raw::COMPLEX, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
                out[1..9].copy_from_slice(&re.to_be_bytes());
                out[9..17].copy_from_slice(&im.to_be_bytes());
                self.buf.write(&out)
            }
            Value::Timezone(TzValue::Utc) => self.buf.write_u8(raw::TIMEZONE_UTC),
            _ => unreachable!("save_atom called on a non-atom"),
        }
    }

    fn save_float(&mut self, f: f64) -> EncodeResult<()> {
        let mut out = [raw::BINFLOAT, 0, 0, 0, 0, 0, 0, 0, 0];
        out[1..].copy_from_slice(&f.to_be_bytes());
        self.buf.write(&out)
    }

    /// §4.D: narrowest of BININT1/BININT2/BININT for non-negative values
    /// within their respective ranges, BININT for non-negative values up
    /// to `i32::MAX`; everything else (including every negative integer,
    /// per spec §8's worked example S3) uses LONG1/LONG4.
    fn save_int(&mut self, n: &BigInt) -> EncodeResult<()> {
        if let Some(small) = n.to_u32() {
            if small < 256 {
                return self.buf.write(&[raw::BININT1, small as u8]);
            }
            if small < 65536 {
                let mut out = [raw::BININT2, 0, 0];
                out[1..].copy_from_slice(&(small as u16).to_le_bytes());
                return self.buf.write(&out);
            }
            if small <= i32::MAX as u32 {
                let mut out = [raw::BININT, 0, 0, 0, 0];
                out[1..].copy_from_slice(&(small as i32).to_le_bytes());
                return self.buf.write(&out);
            }
        }
        if n.is_zero() {
            return self.buf.write(&[raw::LONG1, 0]);
        }
        let bytes = n.to_signed_bytes_le();
        if bytes.len() < 256 {
            self.buf.write(&[raw::LONG1, bytes.len() as u8])?;
            self.buf.write(&bytes)
        } else {
            let len = u32::try_from(bytes.len())
                .map_err(|_| EncodingError::Overflow("integer magnitude exceeds 2^31 bytes"))?;
            self.buf.write(&raw::LONG4.to_le_bytes())?;
            self.buf.write(&len.to_le_bytes())?;
            self.buf.write(&bytes)
        }
    }

    fn write_text(&mut self, op_short: u8, op_bin: u8, op8: u8, s: &str) -> EncodeResult<()> {
        let bytes = s.as_bytes();
        self.write_length_prefixed(op_short, op_bin, op8, bytes)
    }

    fn write_length_prefixed(
        &mut self,
        op_short: u8,
        op_bin: u8,
        op8: u8,
        bytes: &[u8],
    ) -> EncodeResult<()> {
        let len = bytes.len();
        if len <= 0xff {
            self.buf.write(&[op_short, len as u8])?;
        } else if len <= 0xffff_ffff {
            self.buf.write(&[op_bin])?;
            self.buf.write(&(len as u32).to_le_bytes())?;
        } else {
            self.buf.write(&[op8])?;
            self.buf.write(&(len as u64).to_le_bytes())?;
        }
        self.buf.write(bytes)
    }

    fn save_nonatomic(
        &mut self,
        value: &Value,
        memoize_enabled: bool,
        force: bool,
        buffers: &mut Option<BufferList>,
    ) -> EncodeResult<()> {
        match value {
            Value::Str(s) => {
                self.write_text(
                    raw::SHORT_BINUNICODE,
                    raw::BINUNICODE,
                    raw::BINUNICODE8,
                    s,
                )?;
                self.maybe_memoize(value, memoize_enabled, force)
            }
            Value::Bytes(b) => {
                self.write_length_prefixed(raw::SHORT_BINBYTES, raw::BINBYTES, raw::BINBYTES8, b)?;
                self.maybe_memoize(value, memoize_enabled, force)
            }
            Value::ByteArray(b) => {
                let data = b.borrow();
                self.buf.write(&[raw::BYTEARRAY8])?;
                self.buf.write(&(data.len() as u64).to_le_bytes())?;
                self.buf.write(&data)?;
                drop(data);
                self.maybe_memoize(value, memoize_enabled, force)
            }
            Value::Buffer(handle) => {
                if !handle.is_contiguous() {
                    return Err(EncodingError::BadBuffer);
                }
                if let Some(out) = buffers.as_mut() {
                    self.buf.write_u8(raw::NEXT_BUFFER)?;
                    if handle.is_readonly() {
                        self.buf.write_u8(raw::READONLY_BUFFER)?;
                    }
                    out.push(handle.clone());
                } else if handle.is_readonly() {
                    self.write_length_prefixed(
                        raw::SHORT_BINBYTES,
                        raw::BINBYTES,
                        raw::BINBYTES8,
                        handle.as_bytes(),
                    )?;
                } else {
                    self.buf.write(&[raw::BYTEARRAY8])?;
                    self.buf
                        .write(&(handle.as_bytes().len() as u64).to_le_bytes())?;
                    self.buf.write(handle.as_bytes())?;
                }
                self.maybe_memoize(value, memoize_enabled, force)
            }
            Value::List(items) => {
                self.buf.write_u8(raw::EMPTY_LIST)?;
                self.maybe_memoize(value, memoize_enabled, force)?;
                let len = items.borrow().len();
                if len == 0 {
                    return Ok(());
                }
                if len == 1 {
                    let item = items.borrow()[0].clone();
                    self.save(&item, memoize_enabled, force, buffers)?;
                    return self.buf.write_u8(raw::APPEND);
                }
                let mut total = 0;
                while total < len {
                    self.buf.write_u8(raw::MARK)?;
                    let mut batch = 0;
                    while total < len && batch < BATCH_SIZE {
                        let snapshot_len = items.borrow().len();
                        if snapshot_len != len {
                            return Err(EncodingError::MutatedDuringIter);
                        }
                        let item = items.borrow()[total].clone();
                        self.save(&item, memoize_enabled, force, buffers)?;
                        total += 1;
                        batch += 1;
                    }
                    self.buf.write_u8(raw::APPENDS)?;
                }
                Ok(())
            }
            Value::Dict(map) => {
                self.buf.write_u8(raw::EMPTY_DICT)?;
                self.maybe_memoize(value, memoize_enabled, force)?;
                let len = map.borrow().len();
                if len == 0 {
                    return Ok(());
                }
                if len == 1 {
                    let (k, v) = {
                        let m = map.borrow();
                        let (k, v) = m.get_index(0).expect("len == 1");
                        (k.clone(), v.clone())
                    };
                    self.save(&k, memoize_enabled, force, buffers)?;
                    self.save(&v, memoize_enabled, force, buffers)?;
                    return self.buf.write_u8(raw::SETITEM);
                }
                let mut total = 0;
                while total < len {
                    self.buf.write_u8(raw::MARK)?;
                    let mut batch = 0;
                    while total < len && batch < BATCH_SIZE {
                        if map.borrow().len() != len {
                            return Err(EncodingError::MutatedDuringIter);
                        }
                        let (k, v) = {
                            let m = map.borrow();
                            let (k, v) = m.get_index(total).expect("within bounds");
                            (k.clone(), v.clone())
                        };
                        self.save(&k, memoize_enabled, force, buffers)?;
                        self.save(&v, memoize_enabled, force, buffers)?;
                        total += 1;
                        batch += 1;
                    }
                    self.buf.write_u8(raw::SETITEMS)?;
                }
                Ok(())
            }
            Value::Set(set) => {
                self.buf.write_u8(raw::EMPTY_SET)?;
                self.maybe_memoize(value, memoize_enabled, force)?;
                let len = set.borrow().len();
                if len == 0 {
                    return Ok(());
                }
                let mut total = 0;
                while total < len {
                    self.buf.write_u8(raw::MARK)?;
                    let mut batch = 0;
                    while total < len && batch < BATCH_SIZE {
                        if set.borrow().len() != len {
                            return Err(EncodingError::MutatedDuringIter);
                        }
                        let item = set.borrow().get_index(total).expect("within bounds").clone();
                        self.save(&item, memoize_enabled, force, buffers)?;
                        total += 1;
                        batch += 1;
                    }
                    self.buf.write_u8(raw::ADDITEMS)?;
                }
                Ok(())
            }
            Value::Tuple(items) => self.save_tuple(value, items, memoize_enabled, force, buffers),
            Value::FrozenSet(items) => {
                self.buf.write_u8(raw::MARK)?;
                for item in items.iter() {
                    self.save(item, memoize_enabled, force, buffers)?;
                }
                if memoize_enabled {
                    if let Some(id) = identity_of(value) {
                        if let Some(existing) = self.memo.get(id) {
                            self.buf.write_u8(raw::POP_MARK)?;
                            return self.write_backref(existing);
                        }
                    }
                }
                self.buf.write_u8(raw::FROZENSET)?;
                self.maybe_memoize(value, memoize_enabled, force)
            }
            Value::Struct(instance) => {
                let desc = self
                    .registry
                    .struct_by_code(instance.code)
                    .ok_or(EncodingError::UnknownType)?;
                self.write_typecode(instance.code, raw::STRUCT1, raw::STRUCT2, raw::STRUCT4)?;
                self.maybe_memoize(value, memoize_enabled, force)?;
                self.buf.write_u8(raw::MARK)?;
                let fields = instance.fields.borrow().clone();
                if fields.len() != desc.fields().len() {
                    return Err(EncodingError::UnsupportedType);
                }
                for field in &fields {
                    self.save(field, memoize_enabled, force, buffers)?;
                }
                self.buf.write_u8(raw::BUILD_STRUCT)
            }
            Value::Enum(member) => {
                self.registry
                    .enum_by_code(member.code)
                    .ok_or(EncodingError::UnknownType)?;
                match &member.value {
                    crate::value::EnumValue::Int(i) => self.save_int(&BigInt::from(*i))?,
                    crate::value::EnumValue::Name(name) => {
                        self.write_text(raw::SHORT_BINUNICODE, raw::BINUNICODE, raw::BINUNICODE8, name)?
                    }
                }
                self.write_typecode(member.code, raw::ENUM1, raw::ENUM2, raw::ENUM4)?;
                self.memoize_value(value)
            }
            Value::Date(date) => {
                use chrono::Datelike;
                let mut out = [raw::DATE, 0, 0, 0, 0];
                out[1..3].copy_from_slice(&(date.year() as u16).to_le_bytes());
                out[3] = date.month() as u8;
                out[4] = date.day() as u8;
                self.buf.write(&out)
            }
            Value::Time(t) => self.save_time(t),
            Value::DateTime(dt) => self.save_datetime(dt),
            Value::Delta(d) => {
                let mut out = [raw::TIMEDELTA, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
                out[1..5].copy_from_slice(&d.days.to_le_bytes());
                out[5..8].copy_from_slice(&d.seconds.to_le_bytes()[..3]);
                out[8..11].copy_from_slice(&d.microseconds.to_le_bytes()[..3]);
                self.buf.write(&out)
            }
            Value::Timezone(tz) => self.save_timezone(tz),
            _ => unreachable!("atoms handled in save_atom"),
        }
    }

    /// Per spec §9's resolved Open Question: date/time values are never
    /// force-memoized (they carry no `Rc` handle to check a refcount on),
    /// so this only fires if a future `Value` variant wraps one in `Rc`.
    fn maybe_memoize(
        &mut self,
        value: &Value,
        memoize_enabled: bool,
        force: bool,
    ) -> EncodeResult<()> {
        if memoize_enabled && (force || is_shared(value)) {
            self.memoize_value(value)
        } else {
            Ok(())
        }
    }

    fn save_tuple(
        &mut self,
        value: &Value,
        items: &Rc<Vec<Value>>,
        memoize_enabled: bool,
        force: bool,
        buffers: &mut Option<BufferList>,
    ) -> EncodeResult<()> {
        let len = items.len();
        if len == 0 {
            return self.buf.write_u8(raw::EMPTY_TUPLE);
        }
        let child_force = force || Rc::strong_count(items) > 1;
        if len <= 3 {
            for item in items.iter() {
                self.save(item, memoize_enabled, child_force, buffers)?;
            }
            if let Some(existing) = memoize_enabled
                .then(|| identity_of(value).and_then(|id| self.memo.get(id)))
                .flatten()
            {
                for _ in 0..len {
                    self.buf.write_u8(raw::POP)?;
                }
                return self.write_backref(existing);
            }
            self.buf
                .write_u8(match len {
                    1 => raw::TUPLE1,
                    2 => raw::TUPLE2,
                    _ => raw::TUPLE3,
                })?;
        } else {
            self.buf.write_u8(raw::MARK)?;
            for item in items.iter() {
                self.save(item, memoize_enabled, child_force, buffers)?;
            }
            if let Some(existing) = memoize_enabled
                .then(|| identity_of(value).and_then(|id| self.memo.get(id)))
                .flatten()
            {
                self.buf.write_u8(raw::POP_MARK)?;
                return self.write_backref(existing);
            }
            self.buf.write_u8(raw::TUPLE)?;
        }
        self.maybe_memoize(value, memoize_enabled, force)
    }

    fn save_time(&mut self, t: &crate::value::Time) -> EncodeResult<()> {
        if let Some(tz) = &t.tz {
            self.save_timezone(tz)?;
            self.write_time_payload(raw::TIME_TZ, t)
        } else {
            self.write_time_payload(raw::TIME, t)
        }
    }

    fn write_time_payload(&mut self, op: u8, t: &crate::value::Time) -> EncodeResult<()> {
        use chrono::Timelike;
        let micros = t.time.nanosecond() / 1000;
        let micro_bytes = micros.to_le_bytes();
        let out = [
            op,
            t.time.hour() as u8 | if t.fold { 0x80 } else { 0 },
            t.time.minute() as u8,
            t.time.second() as u8,
            micro_bytes[0],
            micro_bytes[1],
            micro_bytes[2],
        ];
        self.buf.write(&out)
    }

    fn save_datetime(&mut self, dt: &crate::value::DateTime) -> EncodeResult<()> {
        if let Some(tz) = &dt.tz {
            self.save_timezone(tz)?;
            self.write_datetime_payload(raw::DATETIME_TZ, dt)
        } else {
            self.write_datetime_payload(raw::DATETIME, dt)
        }
    }

    fn write_datetime_payload(&mut self, op: u8, dt: &crate::value::DateTime) -> EncodeResult<()> {
        use chrono::{Datelike, Timelike};
        let year_bytes = (dt.date.year() as u16).to_le_bytes();
        let micros = dt.time.nanosecond() / 1000;
        let micro_bytes = micros.to_le_bytes();
        let out = [
            op,
            year_bytes[0],
            year_bytes[1],
            dt.date.month() as u8,
            dt.date.day() as u8,
            dt.time.hour() as u8 | if dt.fold { 0x80 } else { 0 },
            dt.time.minute() as u8,
            dt.time.second() as u8,
            micro_bytes[0],
            micro_bytes[1],
            micro_bytes[2],
        ];
        self.buf.write(&out)
    }

    fn save_timezone(&mut self, tz: &TzValue) -> EncodeResult<()> {
        match tz {
            TzValue::Utc => self.buf.write_u8(raw::TIMEZONE_UTC),
            TzValue::FixedOffsetSeconds(seconds) => {
                // Wire payload is a day-sign bit plus a seconds-of-day
                // magnitude in [0, 86400) — `quickle.c`'s
                // `PyDateTime_DELTA_GET_SECONDS` is always normalized that
                // way, with the total offset being `days*86400 + seconds`.
                if seconds.unsigned_abs() >= 86_400 {
                    return Err(EncodingError::Overflow(
                        "fixed-offset timezone must be within +/-24h",
                    ));
                }
                let (negative_day, mag) = if *seconds < 0 {
                    (true, (86_400 + *seconds) as u32)
                } else {
                    (false, *seconds as u32)
                };
                let mut packed = mag & 0x7fffff;
                if negative_day {
                    packed |= 1 << 23;
                }
                let mut out = [raw::TIMEZONE, 0, 0, 0, 0, 0, 0];
                out[1..4].copy_from_slice(&packed.to_le_bytes()[..3]);
                self.buf.write(&out)
            }
            TzValue::Named(key) => {
                self.write_text(raw::SHORT_BINUNICODE, raw::BINUNICODE, raw::BINUNICODE8, key)?;
                self.buf.write_u8(raw::ZONEINFO)
            }
        }
    }
}
