//! The lookup table (spec §4.B) and the two memo flavors built on top of it:
//! the encoder's identity-keyed memo/registry (component B) and the
//! decoder's index-addressed memo array (component F).

use std::rc::Rc;

use crate::value::Value;

const MIN_CAPACITY: usize = 8;
const PERTURB_SHIFT: u32 = 5;

/// An open-addressing hash map keyed by raw identity (a pointer cast to
/// `usize`), with the probe sequence and resize policy of
/// `original_source/quickle.c`'s `LookupTable`: perturb-reprobe
/// `i = 5*i + perturb + 1`, no deletion, minimum capacity 8, resize to
/// `4*used` (or `2*used` past 50,000 entries) once the load factor exceeds
/// 2/3.
#[derive(Debug, Clone)]
pub struct LookupTable {
    slots: Vec<Option<(usize, u32)>>,
    capacity: usize,
    used: usize,
    buffered_size: usize,
}

impl LookupTable {
    pub fn new(buffered_size: usize) -> Self {
        let capacity = buffered_size.max(MIN_CAPACITY).next_power_of_two();
        Self {
            slots: vec![None; capacity],
            capacity,
            used: 0,
            buffered_size,
        }
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    fn probe(slots: &[Option<(usize, u32)>], capacity: usize, key: usize) -> usize {
        let mask = capacity - 1;
        let mut i = (key >> 3) & mask;
        let mut perturb = key;
        loop {
            match &slots[i] {
                None => return i,
                Some((k, _)) if *k == key => return i,
                _ => {
                    i = (i.wrapping_mul(5).wrapping_add(perturb).wrapping_add(1)) & mask;
                    perturb >>= PERTURB_SHIFT;
                }
            }
        }
    }

    pub fn get(&self, key: usize) -> Option<u32> {
        let i = Self::probe(&self.slots, self.capacity, key);
        self.slots[i].map(|(_, v)| v)
    }

    /// Insert or overwrite. No deletion is ever performed (spec §4.B).
    pub fn set(&mut self, key: usize, value: u32) {
        let i = Self::probe(&self.slots, self.capacity, key);
        if self.slots[i].is_none() {
            self.used += 1;
        }
        self.slots[i] = Some((key, value));
        if self.used * 3 > self.capacity * 2 {
            let target = if self.used > 50_000 {
                self.used * 2
            } else {
                self.used * 4
            };
            self.resize(target);
        }
    }

    fn resize(&mut self, min_size: usize) {
        let new_capacity = min_size.max(MIN_CAPACITY).next_power_of_two();
        tracing::debug!(from = self.capacity, to = new_capacity, used = self.used, "resizing memo table");
        let old = std::mem::replace(&mut self.slots, vec![None; new_capacity]);
        self.capacity = new_capacity;
        for (key, value) in old.into_iter().flatten() {
            let i = Self::probe(&self.slots, self.capacity, key);
            self.slots[i] = Some((key, value));
        }
    }

    /// Clear entries for reuse between calls. Only shrinks the backing
    /// array if its capacity exceeds the configured buffered size.
    pub fn reset(&mut self) {
        self.used = 0;
        let floor = self.buffered_size.max(MIN_CAPACITY).next_power_of_two();
        if self.capacity > floor {
            self.capacity = floor;
            self.slots = vec![None; floor];
        } else {
            self.slots.iter_mut().for_each(|s| *s = None);
        }
    }
}

/// Identity of a `Value`'s backing allocation, for values that carry one
/// (every non-atomic container/struct/enum variant). Atoms have no
/// storage to share and are never memoized (spec §4.D).
pub fn identity_of(value: &Value) -> Option<usize> {
    use Value::*;
    Some(match value {
        None | Bool(_) | Int(_) | Float(_) | Complex(..) => return Option::None,
        Bytes(b) => Rc::as_ptr(b) as *const () as usize,
        ByteArray(b) => Rc::as_ptr(b) as usize,
        Buffer(b) => Rc::as_ptr(b) as *const () as usize,
        Str(s) => Rc::as_ptr(s) as *const () as usize,
        List(l) => Rc::as_ptr(l) as usize,
        Tuple(t) => Rc::as_ptr(t) as usize,
        Dict(d) => Rc::as_ptr(d) as usize,
        Set(s) => Rc::as_ptr(s) as usize,
        FrozenSet(s) => Rc::as_ptr(s) as usize,
        Date(_) | Time(_) | DateTime(_) | Delta(_) | Timezone(_) => return Option::None,
        Struct(s) => Rc::as_ptr(s) as *const () as usize,
        Enum(e) => Rc::as_ptr(e) as *const () as usize,
    })
}

/// Whether `value`'s backing allocation currently has more than one live
/// `Rc` handle — the direct analogue of `quickle.c`'s
/// `Py_REFCNT(obj) > 1` sharing heuristic (spec §4.D, §9).
pub fn is_shared(value: &Value) -> bool {
    use Value::*;
    match value {
        None | Bool(_) | Int(_) | Float(_) | Complex(..) => false,
        Bytes(b) => Rc::strong_count(b) > 1,
        ByteArray(b) => Rc::strong_count(b) > 1,
        Buffer(b) => Rc::strong_count(b) > 1,
        Str(s) => Rc::strong_count(s) > 1,
        List(l) => Rc::strong_count(l) > 1,
        Tuple(t) => Rc::strong_count(t) > 1,
        Dict(d) => Rc::strong_count(d) > 1,
        Set(s) => Rc::strong_count(s) > 1,
        FrozenSet(s) => Rc::strong_count(s) > 1,
        Date(_) | Time(_) | DateTime(_) | Delta(_) | Timezone(_) => false,
        Struct(s) => Rc::strong_count(s) > 1,
        Enum(e) => Rc::strong_count(e) > 1,
    }
}

/// The decoder's memo: an index-addressed array of materialized values
/// (spec §3, §4.F). Writing at index `i` extends the array as needed;
/// overwriting a live slot releases the prior value.
#[derive(Debug, Default)]
pub struct DecoderMemo {
    slots: Vec<Option<Value>>,
    reset_threshold: usize,
}

impl DecoderMemo {
    pub fn new(reset_threshold: usize) -> Self {
        Self {
            slots: Vec::new(),
            reset_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: u64) -> Option<&Value> {
        let index = usize::try_from(index).ok()?;
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    /// Append at the next free index — what `MEMOIZE` does (spec §4.G:
    /// "appends the current top-of-stack to the memo at index equal to
    /// the current memo length; no overwrite").
    pub fn push(&mut self, value: Value) -> u64 {
        let idx = self.slots.len();
        self.slots.push(Some(value));
        idx as u64
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        if self.slots.capacity() > self.reset_threshold {
            tracing::debug!(
                capacity = self.slots.capacity(),
                threshold = self.reset_threshold,
                "shrinking decoder memo back to baseline"
            );
            self.slots.shrink_to(self.reset_threshold);
        }
    }
}
