//! The closed value taxonomy (spec §3): every shape of data this codec
//! knows how to move across the wire, modeled as idiomatic Rust types.
//!
//! Mutable containers are reference-counted (`Rc<RefCell<_>>`) so the
//! encoder can detect sharing and cycles by pointer identity — the direct
//! analogue of the reference implementation's identity-keyed memo (see
//! `DESIGN.md`). Tuples and frozensets are reference-counted but not
//! `RefCell`-wrapped: mutable-reference, immutable-value, per spec §3.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use chrono::{FixedOffset, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use num_bigint::BigInt;

pub type List = Rc<RefCell<Vec<Value>>>;
pub type Tuple = Rc<Vec<Value>>;
pub type Dict = Rc<RefCell<indexmap::IndexMap<Value, Value>>>;
pub type Set = Rc<RefCell<indexmap::IndexSet<Value>>>;
pub type FrozenSet = Rc<indexmap::IndexSet<Value>>;
pub type ByteArray = Rc<RefCell<Vec<u8>>>;
/// Out-of-band buffer handles collected during an encode pass, in
/// encounter order (spec §4.D).
pub type BufferList = Vec<Rc<dyn BufferView>>;

/// A view over bytes that can be handed to the encoder's out-of-band path.
/// Host collaborators implement this for whatever memory they actually own;
/// the core never assumes a particular allocator.
pub trait BufferView: fmt::Debug {
    fn as_bytes(&self) -> &[u8];
    fn is_readonly(&self) -> bool;
    /// `false` for strided/non-contiguous views; encoding one is
    /// `EncodingError::BadBuffer`.
    fn is_contiguous(&self) -> bool {
        true
    }
}

/// The simplest possible `BufferView`: an owned, always-contiguous byte
/// vector with a fixed readonly flag.
#[derive(Debug, Clone)]
pub struct OwnedBuffer {
    pub bytes: Rc<[u8]>,
    pub readonly: bool,
}

impl BufferView for OwnedBuffer {
    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
    fn is_readonly(&self) -> bool {
        self.readonly
    }
}

/// A timezone value: the fixed-offset and UTC-singleton cases carry their
/// own data; the named case only ever carries the zone key, mirroring the
/// wire format (`ZONEINFO` opcode payload is just a key string).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TzValue {
    Utc,
    FixedOffsetSeconds(i32),
    Named(Rc<str>),
}

impl TzValue {
    pub fn as_chrono_fixed_offset(&self) -> Option<FixedOffset> {
        match self {
            TzValue::Utc => Some(FixedOffset::east_opt(0).unwrap()),
            TzValue::FixedOffsetSeconds(s) => FixedOffset::east_opt(*s),
            TzValue::Named(_) => None,
        }
    }

    pub fn as_chrono_tz(&self) -> Option<Tz> {
        match self {
            TzValue::Named(key) => key.parse().ok(),
            _ => None,
        }
    }
}

/// An exact `timedelta`: days / seconds / microseconds kept separate rather
/// than normalized into a single duration type, matching the wire payload
/// (`TIMEDELTA` carries all three fields independently, spec §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Delta {
    pub days: i32,
    pub seconds: i32,
    pub microseconds: i32,
}

/// A naive or zone-aware time-of-day, with the `fold` disambiguation bit
/// pickle's `datetime` opcodes carry for repeated wall-clock times.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Time {
    pub time: NaiveTime,
    pub fold: bool,
    pub tz: Option<TzValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DateTime {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub fold: bool,
    pub tz: Option<TzValue>,
}

/// A materialized struct instance: positional field values keyed to a
/// registry code (spec §4.J — field identifiers/defaults live in the
/// descriptor, not here).
#[derive(Debug)]
pub struct StructInstance {
    pub code: u32,
    pub fields: RefCell<Vec<Value>>,
}

/// An enum member, resolved against the registry by value (integer enums)
/// or by name (everything else).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnumValue {
    Int(i64),
    Name(Rc<str>),
}

#[derive(Debug)]
pub struct EnumInstance {
    pub code: u32,
    pub value: EnumValue,
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Complex(f64, f64),
    Bytes(Rc<[u8]>),
    ByteArray(ByteArray),
    Buffer(Rc<dyn BufferView>),
    Str(Rc<str>),
    List(List),
    Tuple(Tuple),
    Dict(Dict),
    Set(Set),
    FrozenSet(FrozenSet),
    Date(NaiveDate),
    Time(Time),
    DateTime(DateTime),
    Delta(Delta),
    Timezone(TzValue),
    Struct(Rc<StructInstance>),
    Enum(Rc<EnumInstance>),
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn bytes(b: impl Into<Rc<[u8]>>) -> Self {
        Value::Bytes(b.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn int(v: impl Into<BigInt>) -> Self {
        Value::Int(v.into())
    }

    /// Whether this value is an "atom": one the encoder never memoizes
    /// (spec §4.D — null, bool, integers, floats, complex, the UTC
    /// singleton).
    pub fn is_atom(&self) -> bool {
        matches!(
            self,
            Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Complex(..)
        ) || matches!(self, Value::Timezone(TzValue::Utc))
    }
}

/// Structural equality, with an identity fast path on shared containers so
/// that cyclic values (spec §8 property 4) compare without looping forever.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (None, None) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Complex(ar, ai), Complex(br, bi)) => {
                ar.to_bits() == br.to_bits() && ai.to_bits() == bi.to_bits()
            }
            (Bytes(a), Bytes(b)) => a == b,
            (ByteArray(a), ByteArray(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Buffer(a), Buffer(b)) => Rc::ptr_eq(a, b) || a.as_bytes() == b.as_bytes(),
            (Str(a), Str(b)) => a == b,
            (List(a), List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Tuple(a), Tuple(b)) => Rc::ptr_eq(a, b) || a == b,
            (Dict(a), Dict(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Set(a), Set(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (FrozenSet(a), FrozenSet(b)) => Rc::ptr_eq(a, b) || a == b,
            (Date(a), Date(b)) => a == b,
            (Time(a), Time(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (Delta(a), Delta(b)) => a == b,
            (Timezone(a), Timezone(b)) => a == b,
            (Struct(a), Struct(b)) => {
                Rc::ptr_eq(a, b) || (a.code == b.code && *a.fields.borrow() == *b.fields.borrow())
            }
            (Enum(a), Enum(b)) => Rc::ptr_eq(a, b) || (a.code == b.code && a.value == b.value),
            _ => false,
        }
    }
}

impl Eq for Value {}

/// Hash every item and XOR the results, so the combined hash doesn't depend
/// on iteration order — needed to keep `Dict`/`Set`/`FrozenSet`'s `Hash`
/// consistent with their order-independent `IndexMap`/`IndexSet` equality.
fn order_independent_hash<T: Hash>(items: impl Iterator<Item = T>) -> u64 {
    let mut acc: u64 = 0;
    for item in items {
        let mut h = std::collections::hash_map::DefaultHasher::new();
        item.hash(&mut h);
        acc ^= h.finish();
    }
    acc
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        use Value::*;
        std::mem::discriminant(self).hash(state);
        match self {
            None => {}
            Bool(b) => b.hash(state),
            Int(i) => i.hash(state),
            Float(f) => f.to_bits().hash(state),
            Complex(r, i) => {
                r.to_bits().hash(state);
                i.to_bits().hash(state);
            }
            Bytes(b) => b.hash(state),
            ByteArray(b) => b.borrow().hash(state),
            Buffer(b) => b.as_bytes().hash(state),
            Str(s) => s.hash(state),
            List(l) => l.borrow().hash(state),
            Tuple(t) => t.hash(state),
            Dict(d) => {
                let d = d.borrow();
                order_independent_hash(d.iter()).hash(state);
            }
            Set(s) => order_independent_hash(s.borrow().iter()).hash(state),
            FrozenSet(s) => {
                // Order-independent: matches IndexSet equality semantics.
                order_independent_hash(s.iter()).hash(state);
            }
            Date(d) => d.hash(state),
            Time(t) => t.hash(state),
            DateTime(dt) => dt.hash(state),
            Delta(d) => d.hash(state),
            Timezone(tz) => tz.hash(state),
            Struct(s) => {
                s.code.hash(state);
                s.fields.borrow().hash(state);
            }
            Enum(e) => {
                e.code.hash(state);
                e.value.hash(state);
            }
        }
    }
}
