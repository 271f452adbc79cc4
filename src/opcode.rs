//! The opcode alphabet: single-byte tags plus their payload schemas.
//!
//! The core pickle-compatible opcodes keep the byte values and names Python's
//! `pickle.py` and `pickletools.py` use. The extension opcodes (`0xb0..=0xc0`)
//! are specific to this wire format and have no pickle protocol equivalent.

#![allow(non_camel_case_types)]

/// The raw opcode byte values, grouped the way `pickletools.py` documents
/// protocol generations.
pub mod raw {
    // Protocol 0/1
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const EMPTY_LIST: u8 = b']';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEM: u8 = b's';
    pub const SETITEMS: u8 = b'u';
    pub const TUPLE: u8 = b't';
    pub const BINFLOAT: u8 = b'G';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';

    // Protocol 2
    pub const PROTO: u8 = 0x80;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;

    // Protocol 3
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';

    // Protocol 4
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const EMPTY_SET: u8 = 0x8f;
    pub const ADDITEMS: u8 = 0x90;
    pub const FROZENSET: u8 = 0x91;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;

    // Protocol 5
    pub const BYTEARRAY8: u8 = 0x96;
    pub const NEXT_BUFFER: u8 = 0x97;
    pub const READONLY_BUFFER: u8 = 0x98;

    // Extension opcodes (this wire format only, not pickle-compatible)
    pub const BUILD_STRUCT: u8 = 0xb0;
    pub const STRUCT1: u8 = 0xb1;
    pub const STRUCT2: u8 = 0xb2;
    pub const STRUCT4: u8 = 0xb3;
    pub const ENUM1: u8 = 0xb4;
    pub const ENUM2: u8 = 0xb5;
    pub const ENUM4: u8 = 0xb6;
    pub const COMPLEX: u8 = 0xb7;
    pub const TIMEDELTA: u8 = 0xb8;
    pub const DATE: u8 = 0xb9;
    pub const TIME: u8 = 0xba;
    pub const DATETIME: u8 = 0xbb;
    pub const TIME_TZ: u8 = 0xbc;
    pub const DATETIME_TZ: u8 = 0xbd;
    pub const TIMEZONE_UTC: u8 = 0xbe;
    pub const TIMEZONE: u8 = 0xbf;
    pub const ZONEINFO: u8 = 0xc0;
}

/// Maximum number of elements a single APPENDS/SETITEMS/ADDITEMS batch
/// carries before the encoder starts a fresh MARK .. batch-op group.
pub const BATCH_SIZE: usize = 1000;

/// A decoded opcode tag, without its payload. Used by the decoder dispatch
/// loop and by error messages that need to name "the offending opcode".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Mark = raw::MARK,
    Stop = raw::STOP,
    Pop = raw::POP,
    PopMark = raw::POP_MARK,
    BinInt = raw::BININT,
    BinInt1 = raw::BININT1,
    BinInt2 = raw::BININT2,
    None_ = raw::NONE,
    BinUnicode = raw::BINUNICODE,
    Append = raw::APPEND,
    EmptyDict = raw::EMPTY_DICT,
    Appends = raw::APPENDS,
    EmptyList = raw::EMPTY_LIST,
    EmptyTuple = raw::EMPTY_TUPLE,
    SetItem = raw::SETITEM,
    SetItems = raw::SETITEMS,
    Tuple = raw::TUPLE,
    BinFloat = raw::BINFLOAT,
    BinGet = raw::BINGET,
    LongBinGet = raw::LONG_BINGET,
    Proto = raw::PROTO,
    Tuple1 = raw::TUPLE1,
    Tuple2 = raw::TUPLE2,
    Tuple3 = raw::TUPLE3,
    NewTrue = raw::NEWTRUE,
    NewFalse = raw::NEWFALSE,
    Long1 = raw::LONG1,
    Long4 = raw::LONG4,
    BinBytes = raw::BINBYTES,
    ShortBinBytes = raw::SHORT_BINBYTES,
    ShortBinUnicode = raw::SHORT_BINUNICODE,
    BinUnicode8 = raw::BINUNICODE8,
    BinBytes8 = raw::BINBYTES8,
    EmptySet = raw::EMPTY_SET,
    AddItems = raw::ADDITEMS,
    FrozenSet = raw::FROZENSET,
    Memoize = raw::MEMOIZE,
    Frame = raw::FRAME,
    ByteArray8 = raw::BYTEARRAY8,
    NextBuffer = raw::NEXT_BUFFER,
    ReadonlyBuffer = raw::READONLY_BUFFER,
    BuildStruct = raw::BUILD_STRUCT,
    Struct1 = raw::STRUCT1,
    Struct2 = raw::STRUCT2,
    Struct4 = raw::STRUCT4,
    Enum1 = raw::ENUM1,
    Enum2 = raw::ENUM2,
    Enum4 = raw::ENUM4,
    Complex = raw::COMPLEX,
    TimeDelta = raw::TIMEDELTA,
    Date = raw::DATE,
    Time = raw::TIME,
    DateTime = raw::DATETIME,
    TimeTz = raw::TIME_TZ,
    DateTimeTz = raw::DATETIME_TZ,
    TimezoneUtc = raw::TIMEZONE_UTC,
    Timezone = raw::TIMEZONE,
    ZoneInfo = raw::ZONEINFO,
}

impl Opcode {
    /// Look up the `Opcode` for a raw byte, or `None` if it falls outside
    /// the defined alphabet.
    pub fn from_byte(b: u8) -> Option<Self> {
        use raw::*;
        Some(match b {
            MARK => Self::Mark,
            STOP => Self::Stop,
            POP => Self::Pop,
            POP_MARK => Self::PopMark,
            BININT => Self::BinInt,
            BININT1 => Self::BinInt1,
            BININT2 => Self::BinInt2,
            NONE => Self::None_,
            BINUNICODE => Self::BinUnicode,
            APPEND => Self::Append,
            EMPTY_DICT => Self::EmptyDict,
            APPENDS => Self::Appends,
            EMPTY_LIST => Self::EmptyList,
            EMPTY_TUPLE => Self::EmptyTuple,
            SETITEM => Self::SetItem,
            SETITEMS => Self::SetItems,
            TUPLE => Self::Tuple,
            BINFLOAT => Self::BinFloat,
            BINGET => Self::BinGet,
            LONG_BINGET => Self::LongBinGet,
            PROTO => Self::Proto,
            TUPLE1 => Self::Tuple1,
            TUPLE2 => Self::Tuple2,
            TUPLE3 => Self::Tuple3,
            NEWTRUE => Self::NewTrue,
            NEWFALSE => Self::NewFalse,
            LONG1 => Self::Long1,
            LONG4 => Self::Long4,
            BINBYTES => Self::BinBytes,
            SHORT_BINBYTES => Self::ShortBinBytes,
            SHORT_BINUNICODE => Self::ShortBinUnicode,
            BINUNICODE8 => Self::BinUnicode8,
            BINBYTES8 => Self::BinBytes8,
            EMPTY_SET => Self::EmptySet,
            ADDITEMS => Self::AddItems,
            FROZENSET => Self::FrozenSet,
            MEMOIZE => Self::Memoize,
            FRAME => Self::Frame,
            BYTEARRAY8 => Self::ByteArray8,
            NEXT_BUFFER => Self::NextBuffer,
            READONLY_BUFFER => Self::ReadonlyBuffer,
            BUILD_STRUCT => Self::BuildStruct,
            STRUCT1 => Self::Struct1,
            STRUCT2 => Self::Struct2,
            STRUCT4 => Self::Struct4,
            ENUM1 => Self::Enum1,
            ENUM2 => Self::Enum2,
            ENUM4 => Self::Enum4,
            COMPLEX => Self::Complex,
            TIMEDELTA => Self::TimeDelta,
            DATE => Self::Date,
            TIME => Self::Time,
            DATETIME => Self::DateTime,
            TIME_TZ => Self::TimeTz,
            DATETIME_TZ => Self::DateTimeTz,
            TIMEZONE_UTC => Self::TimezoneUtc,
            TIMEZONE => Self::Timezone,
            ZONEINFO => Self::ZoneInfo,
            _ => return None,
        })
    }

    pub fn byte(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_defined_byte() {
        for b in 0u8..=255 {
            if let Some(op) = Opcode::from_byte(b) {
                assert_eq!(op.byte(), b);
            }
        }
    }

    #[test]
    fn rejects_unknown_bytes() {
        assert!(Opcode::from_byte(0xff).is_none());
        assert!(Opcode::from_byte(b'x').is_none());
    }
}
