//! Primitive kinds, declared type specs and the builtin classes

use crate::object::class::{Class, ClassRef};
use crate::object::value::Value;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

/// Primitive kinds a declared type may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// Signed 8-bit integer
    Int8,
    /// Signed 16-bit integer
    Int16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 8-bit integer
    UInt8,
    /// Unsigned 16-bit integer
    UInt16,
    /// Unsigned 32-bit integer
    UInt32,
    /// Unsigned 64-bit integer
    UInt64,
    /// 64-bit float
    Double,
    /// Machine boolean
    Bool,
    /// No value
    Void,
}

impl PrimitiveKind {
    /// All fixed-width integer kinds
    pub const INTEGRAL: [PrimitiveKind; 8] = [
        PrimitiveKind::Int8,
        PrimitiveKind::Int16,
        PrimitiveKind::Int32,
        PrimitiveKind::Int64,
        PrimitiveKind::UInt8,
        PrimitiveKind::UInt16,
        PrimitiveKind::UInt32,
        PrimitiveKind::UInt64,
    ];

    /// Type code used by compiled call sites.
    ///
    /// Integers encode `size << 1 | signed` with sizes 0..=3 for 8..=64 bits.
    pub fn type_code(self) -> u8 {
        match self {
            PrimitiveKind::UInt8 => 0x00,
            PrimitiveKind::Int8 => 0x01,
            PrimitiveKind::UInt16 => 0x02,
            PrimitiveKind::Int16 => 0x03,
            PrimitiveKind::UInt32 => 0x04,
            PrimitiveKind::Int32 => 0x05,
            PrimitiveKind::UInt64 => 0x06,
            PrimitiveKind::Int64 => 0x07,
            PrimitiveKind::Double => 0x09,
            PrimitiveKind::Bool => 0x0C,
            PrimitiveKind::Void => 0x0D,
        }
    }

    /// Bit width of an integral kind
    pub fn bit_width(self) -> Option<u32> {
        match self {
            PrimitiveKind::Int8 | PrimitiveKind::UInt8 => Some(8),
            PrimitiveKind::Int16 | PrimitiveKind::UInt16 => Some(16),
            PrimitiveKind::Int32 | PrimitiveKind::UInt32 => Some(32),
            PrimitiveKind::Int64 | PrimitiveKind::UInt64 => Some(64),
            _ => None,
        }
    }

    /// Whether an integral kind is signed
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            PrimitiveKind::Int8 | PrimitiveKind::Int16 | PrimitiveKind::Int32 | PrimitiveKind::Int64
        )
    }

    /// Whether this is a fixed-width integer
    pub fn is_integral(self) -> bool {
        self.bit_width().is_some()
    }

    /// Inclusive value range of an integral kind
    pub fn bounds(self) -> Option<(i128, i128)> {
        let width = self.bit_width()?;
        if self.is_signed() {
            let half = 1i128 << (width - 1);
            Some((-half, half - 1))
        } else {
            Some((0, (1i128 << width) - 1))
        }
    }

    /// Whether `value` is representable
    pub fn contains(self, value: i128) -> bool {
        match self.bounds() {
            Some((min, max)) => value >= min && value <= max,
            None => false,
        }
    }

    /// Class name of the primitive
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Int8 => "int8",
            PrimitiveKind::Int16 => "int16",
            PrimitiveKind::Int32 => "int32",
            PrimitiveKind::Int64 => "int64",
            PrimitiveKind::UInt8 => "uint8",
            PrimitiveKind::UInt16 => "uint16",
            PrimitiveKind::UInt32 => "uint32",
            PrimitiveKind::UInt64 => "uint64",
            PrimitiveKind::Double => "double",
            PrimitiveKind::Bool => "cbool",
            PrimitiveKind::Void => "void",
        }
    }
}

/// A resolved declared type
#[derive(Clone)]
pub struct TypeSpec {
    /// Declared class
    pub class: ClassRef,
    /// `None` is accepted as well
    pub optional: bool,
    /// Subclasses are rejected
    pub exact: bool,
}

impl TypeSpec {
    /// Non-optional spec for `class`
    pub fn new(class: &ClassRef) -> Self {
        Self {
            class: class.clone(),
            optional: false,
            exact: false,
        }
    }

    /// `Optional[class]`
    pub fn optional(class: &ClassRef) -> Self {
        Self {
            optional: true,
            ..Self::new(class)
        }
    }

    /// Require an exact class match
    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    /// Whether `value` satisfies this spec
    pub fn accepts(&self, value: &Value) -> bool {
        if self.optional && value.is_none() {
            return true;
        }
        match self.class.primitive() {
            Some(PrimitiveKind::Void) => value.is_none(),
            Some(PrimitiveKind::Bool) => matches!(value, Value::Bool(_)),
            Some(PrimitiveKind::Double) => matches!(value, Value::Float(_)),
            Some(kind) => value.as_int().map_or(false, |v| kind.contains(v)),
            None => Builtins::get().is_instance(value, &self.class, self.exact),
        }
    }
}

impl PartialEq for TypeSpec {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.class, &other.class)
            && self.optional == other.optional
            && self.exact == other.exact
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optional {
            write!(f, "Optional[{}]", self.class.name())
        } else {
            f.write_str(self.class.name())
        }
    }
}

impl fmt::Debug for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeSpec({}{})", self, if self.exact { "!" } else { "" })
    }
}

static BUILTINS: Lazy<Arc<Builtins>> = Lazy::new(|| Arc::new(Builtins::create()));

/// Process-wide builtin classes
pub struct Builtins {
    /// `object`
    pub object: ClassRef,
    /// `type`
    pub type_: ClassRef,
    /// `NoneType`
    pub none: ClassRef,
    /// `int`
    pub int: ClassRef,
    /// `bool`
    pub bool_: ClassRef,
    /// `float`
    pub float: ClassRef,
    /// `str`
    pub str_: ClassRef,
    /// `function`
    pub function: ClassRef,
    /// `method`
    pub method: ClassRef,
    /// `builtin_function_or_method`
    pub builtin_function: ClassRef,
    /// `staticmethod`
    pub staticmethod: ClassRef,
    /// `classmethod`
    pub classmethod: ClassRef,
    /// `property`
    pub property: ClassRef,
    /// `cached_property`
    pub cached_property: ClassRef,
    /// `coroutine`
    pub coroutine: ClassRef,
    primitives: Vec<(PrimitiveKind, ClassRef)>,
}

impl Builtins {
    /// Shared builtin classes
    pub fn get() -> &'static Arc<Builtins> {
        &BUILTINS
    }

    fn create() -> Self {
        let object = Class::builtin("object", &[], None);
        let plain = |name: &str| Class::builtin(name, &[object.clone()], None);
        let int = plain("int");
        let float = plain("float");

        let mut primitives = Vec::new();
        for kind in PrimitiveKind::INTEGRAL {
            primitives.push((kind, Class::builtin(kind.name(), &[int.clone()], Some(kind))));
        }
        primitives.push((
            PrimitiveKind::Double,
            Class::builtin("double", &[float.clone()], Some(PrimitiveKind::Double)),
        ));
        primitives.push((
            PrimitiveKind::Bool,
            Class::builtin("cbool", &[object.clone()], Some(PrimitiveKind::Bool)),
        ));
        primitives.push((
            PrimitiveKind::Void,
            Class::builtin("void", &[object.clone()], Some(PrimitiveKind::Void)),
        ));

        Self {
            type_: plain("type"),
            none: plain("NoneType"),
            bool_: Class::builtin("bool", &[int.clone()], None),
            str_: plain("str"),
            function: plain("function"),
            method: plain("method"),
            builtin_function: plain("builtin_function_or_method"),
            staticmethod: plain("staticmethod"),
            classmethod: plain("classmethod"),
            property: plain("property"),
            cached_property: plain("cached_property"),
            coroutine: plain("coroutine"),
            int,
            float,
            object,
            primitives,
        }
    }

    /// Class of a primitive kind
    pub fn primitive(&self, kind: PrimitiveKind) -> &ClassRef {
        self.primitives
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, class)| class)
            .unwrap_or(&self.object)
    }

    /// Every builtin class, for module registration
    pub fn all(&self) -> Vec<ClassRef> {
        let mut classes = vec![
            self.object.clone(),
            self.type_.clone(),
            self.none.clone(),
            self.int.clone(),
            self.bool_.clone(),
            self.float.clone(),
            self.str_.clone(),
            self.function.clone(),
            self.method.clone(),
            self.builtin_function.clone(),
            self.staticmethod.clone(),
            self.classmethod.clone(),
            self.property.clone(),
            self.cached_property.clone(),
            self.coroutine.clone(),
        ];
        classes.extend(self.primitives.iter().map(|(_, class)| class.clone()));
        classes
    }

    /// `isinstance` with an optional exact-match requirement
    pub fn is_instance(&self, value: &Value, class: &ClassRef, exact: bool) -> bool {
        let actual = value.class_of();
        if exact {
            Arc::ptr_eq(&actual, class)
        } else {
            actual.is_subclass_of(class)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integral_bounds() {
        assert_eq!(PrimitiveKind::Int8.bounds(), Some((-128, 127)));
        assert_eq!(PrimitiveKind::UInt8.bounds(), Some((0, 255)));
        assert_eq!(
            PrimitiveKind::Int64.bounds(),
            Some((i64::MIN as i128, i64::MAX as i128))
        );
        assert_eq!(PrimitiveKind::UInt64.bounds(), Some((0, u64::MAX as i128)));
        assert_eq!(PrimitiveKind::Double.bounds(), None);
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(PrimitiveKind::Int8.type_code(), 0x01);
        assert_eq!(PrimitiveKind::UInt64.type_code(), 0x06);
        assert_eq!(PrimitiveKind::Bool.type_code(), 0x0C);
    }

    #[test]
    fn test_bool_is_int_subclass() {
        let builtins = Builtins::get();
        assert!(builtins.is_instance(&Value::Bool(true), &builtins.int, false));
        assert!(!builtins.is_instance(&Value::Bool(true), &builtins.int, true));
        assert!(builtins.is_instance(&Value::Int(3), &builtins.object, false));
    }

    #[test]
    fn test_spec_accepts() {
        let builtins = Builtins::get();
        let spec = TypeSpec::optional(&builtins.str_);
        assert!(spec.accepts(&Value::None));
        assert!(spec.accepts(&Value::from("x")));
        assert!(!spec.accepts(&Value::Int(1)));
        assert_eq!(spec.to_string(), "Optional[str]");

        let int8 = TypeSpec::new(builtins.primitive(PrimitiveKind::Int8));
        assert!(int8.accepts(&Value::Int(-128)));
        assert!(!int8.accepts(&Value::Int(128)));
    }
}
