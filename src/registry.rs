//! External collaborator interfaces (spec §4.J): the contracts the core
//! uses to look up user-defined struct and enum types. The core never
//! defines how a host creates these types — only what it needs from them.

use std::rc::Rc;

use crate::value::{EnumInstance, EnumValue, StructInstance, Value};

/// A user-defined record type: an ordered field list, and an ordered list
/// of default values aligned to the *tail* of the field list (spec §3).
pub trait StructDescriptor {
    fn code(&self) -> u32;
    fn fields(&self) -> &[&'static str];
    /// Defaults for the trailing `defaults().len()` fields, in field order.
    fn defaults(&self) -> &[Value];

    /// Allocate an uninitialized instance: one placeholder (`Value::None`)
    /// slot per declared field, ready to be filled positionally by
    /// `BUILD_STRUCT`.
    fn allocate(&self) -> Rc<StructInstance> {
        Rc::new(StructInstance {
            code: self.code(),
            fields: std::cell::RefCell::new(vec![Value::None; self.fields().len()]),
        })
    }

    /// Fill missing trailing fields with their declared defaults, in place.
    /// Returns the name of the first required (non-default) field still
    /// missing, if any.
    fn fill_missing(&self, fields: &mut Vec<Value>) -> Option<&'static str> {
        let total = self.fields().len();
        let have = fields.len();
        if have > total {
            fields.truncate(total);
            return None;
        }
        let defaults = self.defaults();
        let first_defaultable = total - defaults.len();
        if have < first_defaultable {
            return Some(self.fields()[have]);
        }
        for i in have..total {
            fields.push(defaults[i - first_defaultable].clone());
        }
        None
    }
}

/// A user-defined enum type: integer enums are looked up by value, every
/// other enum by member name (spec §3, §4.J).
pub trait EnumDescriptor {
    fn code(&self) -> u32;
    fn is_int_valued(&self) -> bool;
    fn member_by_value(&self, value: i64) -> Option<EnumValue>;
    fn member_by_name(&self, name: &str) -> Option<EnumValue>;

    fn build(&self, value: EnumValue) -> Rc<EnumInstance> {
        Rc::new(EnumInstance {
            code: self.code(),
            value,
        })
    }
}

/// Which kind of user type a registry code refers to; used to report
/// `decoding-type-mismatch` when e.g. an `ENUM*` opcode names a struct code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Struct,
    Enum,
}

/// Maps small integer codes to struct/enum descriptors, and back. Codes are
/// in `[0, 2^31)` (spec §3). The encoder and decoder ends of a byte stream
/// must share identical code assignments for any user type actually used.
pub trait TypeRegistry {
    fn struct_by_code(&self, code: u32) -> Option<&dyn StructDescriptor>;
    fn enum_by_code(&self, code: u32) -> Option<&dyn EnumDescriptor>;

    fn kind_of(&self, code: u32) -> Option<TypeKind> {
        if self.struct_by_code(code).is_some() {
            Some(TypeKind::Struct)
        } else if self.enum_by_code(code).is_some() {
            Some(TypeKind::Enum)
        } else {
            None
        }
    }
}

/// A registry with no registered types. Encoding/decoding any struct or enum
/// against this registry fails with `unknown-type`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyRegistry;

impl TypeRegistry for EmptyRegistry {
    fn struct_by_code(&self, _code: u32) -> Option<&dyn StructDescriptor> {
        None
    }
    fn enum_by_code(&self, _code: u32) -> Option<&dyn EnumDescriptor> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Point {
        defaults: Vec<Value>,
    }
    impl StructDescriptor for Point {
        fn code(&self) -> u32 {
            1
        }
        fn fields(&self) -> &[&'static str] {
            &["x", "y", "label"]
        }
        fn defaults(&self) -> &[Value] {
            &self.defaults
        }
    }

    #[test]
    fn fill_missing_applies_trailing_defaults() {
        let desc = Point { defaults: vec![Value::str("origin")] };
        let mut fields = vec![Value::int(1), Value::int(2)];
        assert_eq!(desc.fill_missing(&mut fields), None);
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[2], Value::str("origin"));
    }

    #[test]
    fn fill_missing_reports_required_field() {
        let desc = Point { defaults: vec![Value::str("origin")] };
        let mut fields = vec![Value::int(1)];
        assert_eq!(desc.fill_missing(&mut fields), Some("y"));
    }

    #[test]
    fn fill_missing_discards_extra_fields() {
        let desc = Point { defaults: vec![Value::str("origin")] };
        let mut fields = vec![Value::int(1), Value::int(2), Value::str("p"), Value::int(9)];
        assert_eq!(desc.fill_missing(&mut fields), None);
        assert_eq!(fields.len(), 3);
    }
}
