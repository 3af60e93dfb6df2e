//! Runtime values
//!
//! `Value` is the handle the dispatch core passes around. Scalars are stored
//! inline; everything with identity is reference counted, so `Value::is`
//! compares pointers the way the host's `is` operator does.

use crate::dispatch::awaitable::Awaitable;
use crate::dispatch::thunk::{AccessorThunk, StaticThunk};
use crate::error::{DispatchError, DispatchResult};
use crate::object::class::{ClassRef, Instance};
use crate::object::descriptor::Descriptor;
use crate::object::function::{BoundMethod, CallArgs, Function};
use crate::object::types::Builtins;
use crate::runtime::Runtime;
use std::fmt;
use std::sync::Arc;

/// A runtime value
#[derive(Clone)]
pub enum Value {
    /// The canonical no-value object
    None,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i128),
    /// Float
    Float(f64),
    /// String
    Str(Arc<str>),
    /// Class instance
    Instance(Arc<Instance>),
    /// Class object
    Class(ClassRef),
    /// Function
    Function(Arc<Function>),
    /// Function bound to a receiver
    Bound(Arc<BoundMethod>),
    /// Static method, class method or property
    Descriptor(Arc<Descriptor>),
    /// Return-type checking thunk
    Thunk(Arc<StaticThunk>),
    /// Property accessor thunk
    Accessor(Arc<AccessorThunk>),
    /// Awaitable result of a coroutine
    Awaitable(Arc<Awaitable>),
}

impl Value {
    /// String value
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    /// True for the no-value object
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Identity comparison
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Bound(a), Value::Bound(b)) => Arc::ptr_eq(a, b),
            (Value::Descriptor(a), Value::Descriptor(b)) => Arc::ptr_eq(a, b),
            (Value::Thunk(a), Value::Thunk(b)) => Arc::ptr_eq(a, b),
            (Value::Accessor(a), Value::Accessor(b)) => Arc::ptr_eq(a, b),
            (Value::Awaitable(a), Value::Awaitable(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Class of this value
    pub fn class_of(&self) -> ClassRef {
        let builtins = Builtins::get();
        match self {
            Value::None => builtins.none.clone(),
            Value::Bool(_) => builtins.bool_.clone(),
            Value::Int(_) => builtins.int.clone(),
            Value::Float(_) => builtins.float.clone(),
            Value::Str(_) => builtins.str_.clone(),
            Value::Instance(instance) => instance.class().clone(),
            Value::Class(_) => builtins.type_.clone(),
            Value::Function(_) => builtins.function.clone(),
            Value::Bound(_) => builtins.method.clone(),
            Value::Descriptor(descr) => match descr.as_ref() {
                Descriptor::StaticMethod(_) => builtins.staticmethod.clone(),
                Descriptor::ClassMethod(_) => builtins.classmethod.clone(),
                Descriptor::Property(_) => builtins.property.clone(),
                Descriptor::CachedProperty(_) => builtins.cached_property.clone(),
            },
            Value::Thunk(_) | Value::Accessor(_) => builtins.builtin_function.clone(),
            Value::Awaitable(_) => builtins.coroutine.clone(),
        }
    }

    /// Name of this value's class
    pub fn type_name(&self) -> String {
        self.class_of().name().to_string()
    }

    /// Integer view; booleans count as integers
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(i128::from(*b)),
            _ => None,
        }
    }

    /// Function view
    pub fn as_function(&self) -> Option<&Arc<Function>> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Class view
    pub fn as_class(&self) -> Option<&ClassRef> {
        match self {
            Value::Class(c) => Some(c),
            _ => None,
        }
    }

    /// Instance view
    pub fn as_instance(&self) -> Option<&Arc<Instance>> {
        match self {
            Value::Instance(i) => Some(i),
            _ => None,
        }
    }

    /// Descriptor view
    pub fn as_descriptor(&self) -> Option<&Arc<Descriptor>> {
        match self {
            Value::Descriptor(d) => Some(d),
            _ => None,
        }
    }

    /// Awaitable view
    pub fn as_awaitable(&self) -> Option<&Arc<Awaitable>> {
        match self {
            Value::Awaitable(a) => Some(a),
            _ => None,
        }
    }

    /// Whether this member earns a dispatch slot: compiled functions and
    /// descriptors wrapping them.
    pub fn is_slot_member(&self) -> bool {
        match self {
            Value::Function(f) => f.is_compiled(),
            Value::Descriptor(descr) => descr.is_slot_member(),
            Value::Accessor(accessor) => accessor.is_slot_member(),
            _ => false,
        }
    }

    /// Functions and descriptors bind through `descr_get`
    pub fn is_descriptor(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Descriptor(_))
    }

    /// Data descriptors take precedence over instance dictionaries
    pub fn is_data_descriptor(&self) -> bool {
        match self {
            Value::Descriptor(descr) => descr.is_data(),
            _ => false,
        }
    }

    /// The function this member ultimately runs, looking through descriptors
    /// and accessor thunks. Properties answer with their getter.
    pub fn underlying_function(&self) -> Option<&Arc<Function>> {
        match self {
            Value::Function(f) => Some(f),
            Value::Descriptor(descr) => match descr.as_ref() {
                Descriptor::StaticMethod(inner) | Descriptor::ClassMethod(inner) => {
                    inner.underlying_function()
                }
                Descriptor::Property(prop) => {
                    prop.getter.as_ref().and_then(|g| g.underlying_function())
                }
                Descriptor::CachedProperty(cached) => cached.function.underlying_function(),
            },
            Value::Accessor(accessor) => accessor.target().and_then(|t| t.underlying_function()),
            _ => None,
        }
    }

    /// Call this value
    pub fn call(&self, rt: &Runtime, args: &CallArgs) -> DispatchResult<Value> {
        match self {
            Value::Function(f) => f.call(rt, args),
            Value::Bound(bound) => bound
                .function
                .call(rt, &args.prepend(bound.receiver.clone())),
            Value::Thunk(thunk) => thunk.call(rt, args),
            Value::Accessor(accessor) => accessor.call(rt, args),
            Value::Descriptor(descr) => match descr.as_ref() {
                Descriptor::StaticMethod(inner) | Descriptor::ClassMethod(inner) => {
                    inner.call(rt, args)
                }
                _ => Err(DispatchError::NotCallable(self.type_name())),
            },
            Value::Class(class) => Ok(Value::Instance(Instance::new(class))),
            _ => Err(DispatchError::NotCallable(self.type_name())),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Str(s) => write!(f, "'{}'", s),
            Value::Instance(instance) => write!(f, "<{} object>", instance.class().name()),
            Value::Class(class) => write!(f, "<class '{}'>", class.qualname()),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Bound(bound) => write!(f, "<bound method {:?} of {:?}>", bound.function, bound.receiver),
            Value::Descriptor(descr) => write!(f, "<{} object>", descr.kind_name()),
            Value::Thunk(thunk) => write!(f, "<static thunk {}>", thunk.name()),
            Value::Accessor(accessor) => write!(f, "<accessor thunk {}>", accessor.member()),
            Value::Awaitable(_) => f.write_str("<coroutine object>"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(i128::from(v))
    }
}

impl From<i128> for Value {
    fn from(v: i128) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl From<ClassRef> for Value {
    fn from(v: ClassRef) -> Self {
        Value::Class(v)
    }
}

impl From<Arc<Function>> for Value {
    fn from(v: Arc<Function>) -> Self {
        Value::Function(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::types::Builtins;

    #[test]
    fn test_identity() {
        let a = Value::from("abc");
        assert!(a.is(&Value::from("abc")));
        assert!(Value::Int(3).is(&Value::Int(3)));
        assert!(!Value::Int(3).is(&Value::Bool(true)));

        let f = Function::new("f", |_, _| Ok(Value::None)).into_value();
        let g = Function::new("f", |_, _| Ok(Value::None)).into_value();
        assert!(f.is(&f.clone()));
        assert!(!f.is(&g));
    }

    #[test]
    fn test_class_of_scalars() {
        let builtins = Builtins::get();
        assert!(Arc::ptr_eq(&Value::None.class_of(), &builtins.none));
        assert!(Arc::ptr_eq(&Value::Int(1).class_of(), &builtins.int));
        assert_eq!(Value::from("x").type_name(), "str");
        assert_eq!(Value::Float(1.5).type_name(), "float");
    }

    #[test]
    fn test_debug_repr() {
        assert_eq!(format!("{:?}", Value::Int(300)), "300");
        assert_eq!(format!("{:?}", Value::from("s")), "'s'");
        assert_eq!(format!("{:?}", Value::None), "None");
    }

    #[test]
    fn test_call_non_callable() {
        let rt = Runtime::new();
        let err = Value::Int(1).call(&rt, &CallArgs::empty()).unwrap_err();
        assert_eq!(err, DispatchError::NotCallable("int".to_string()));
    }

    #[test]
    fn test_slot_member_detection() {
        let dynamic = Function::new("f", |_, _| Ok(Value::None)).into_value();
        assert!(!dynamic.is_slot_member());
        let compiled = Function::compiled(
            "f",
            crate::object::function::Signature::new()
                .returns(crate::object::types::TypeSpec::new(&Builtins::get().int)),
            |_, _| Ok(Value::Int(1)),
        )
        .into_value();
        assert!(compiled.is_slot_member());
        assert!(Descriptor::static_method(compiled).is_slot_member());
    }

    #[test]
    fn test_debug_names_accessor_member() {
        use crate::dispatch::thunk::AccessorKind;
        let accessor = Value::Accessor(AccessorThunk::new("size", AccessorKind::MissingSet));
        assert_eq!(format!("{:?}", accessor), "<accessor thunk size>");
    }
}
