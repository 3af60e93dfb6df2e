//! Return-type enforcement
//!
//! Rules, first match wins:
//! 1. fixed-width integer: integral and in range, else overflow / type error
//! 2. machine boolean: must be a bool
//! 3. void or `NoneType`: anything, normalized to `None`
//! 4. optional and `None`: accepted
//! 5. otherwise an instance of the declared class (exact when requested)

use crate::error::{DispatchError, DispatchResult};
use crate::object::types::{Builtins, PrimitiveKind, TypeSpec};
use crate::object::value::Value;
use std::sync::Arc;

/// Declared return type of one member, with the names used in errors
#[derive(Clone, Debug)]
pub struct ReturnCheck {
    owner: Arc<str>,
    member: Arc<str>,
    expected: TypeSpec,
}

impl ReturnCheck {
    /// Check for `owner.member` returning `expected`
    pub fn new(owner: &str, member: &str, expected: TypeSpec) -> Self {
        Self {
            owner: Arc::from(owner),
            member: Arc::from(member),
            expected,
        }
    }

    /// Owner class name
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Member name
    pub fn member(&self) -> &str {
        &self.member
    }

    /// Declared type
    pub fn expected(&self) -> &TypeSpec {
        &self.expected
    }

    /// Validate `value`, returning it (or the normalized `None`) on success
    pub fn apply(&self, value: Value) -> DispatchResult<Value> {
        let class = &self.expected.class;
        match class.primitive() {
            Some(kind) if kind.is_integral() => return self.check_integral(kind, value),
            Some(PrimitiveKind::Bool) => {
                return match value {
                    Value::Bool(_) => Ok(value),
                    other => Err(self.mismatch(&other)),
                };
            }
            Some(PrimitiveKind::Void) => return Ok(Value::None),
            _ => {}
        }
        if Arc::ptr_eq(class, &Builtins::get().none) {
            return Ok(Value::None);
        }
        if self.expected.optional && value.is_none() {
            return Ok(value);
        }
        let accepted = match class.primitive() {
            Some(PrimitiveKind::Double) => matches!(value, Value::Float(_)),
            _ => Builtins::get().is_instance(&value, class, self.expected.exact),
        };
        if accepted {
            Ok(value)
        } else {
            Err(self.mismatch(&value))
        }
    }

    fn check_integral(&self, kind: PrimitiveKind, value: Value) -> DispatchResult<Value> {
        let Some(raw) = value.as_int() else {
            return Err(self.mismatch(&value));
        };
        if kind.contains(raw) {
            Ok(value)
        } else {
            Err(DispatchError::ReturnOverflow {
                owner: self.owner.to_string(),
                member: self.member.to_string(),
                expected: kind.name().to_string(),
                actual: format!("{} ({:?})", value.type_name(), value),
            })
        }
    }

    fn mismatch(&self, value: &Value) -> DispatchError {
        DispatchError::ReturnType {
            owner: self.owner.to_string(),
            member: self.member.to_string(),
            expected: self.expected.to_string(),
            actual: value.type_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn check(spec: TypeSpec) -> ReturnCheck {
        ReturnCheck::new("Base", "f", spec)
    }

    #[test]
    fn test_subtype_accepted() {
        let builtins = Builtins::get();
        let result = check(TypeSpec::new(&builtins.int)).apply(Value::Bool(true)).unwrap();
        assert!(result.is(&Value::Bool(true)));
    }

    #[test]
    fn test_exact_rejects_subtype() {
        let builtins = Builtins::get();
        let err = check(TypeSpec::new(&builtins.int).exact())
            .apply(Value::Bool(true))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn test_optional_none() {
        let builtins = Builtins::get();
        assert!(check(TypeSpec::optional(&builtins.str_)).apply(Value::None).is_ok());
        let err = check(TypeSpec::new(&builtins.str_)).apply(Value::None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: unexpected return type from Base.f, expected str, got NoneType"
        );
    }

    #[test]
    fn test_void_normalizes() {
        let builtins = Builtins::get();
        let void = check(TypeSpec::new(builtins.primitive(PrimitiveKind::Void)));
        assert!(void.apply(Value::Int(5)).unwrap().is_none());
        let none = check(TypeSpec::new(&builtins.none));
        assert!(none.apply(Value::from("x")).unwrap().is_none());
    }

    #[test]
    fn test_integral_overflow_message() {
        let builtins = Builtins::get();
        let int8 = check(TypeSpec::new(builtins.primitive(PrimitiveKind::Int8)));
        assert!(int8.apply(Value::Int(127)).is_ok());
        let err = int8.apply(Value::Int(128)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "OverflowError: unexpected return type from Base.f, expected int8, got out-of-range int (128)"
        );
        assert!(int8.apply(Value::from("1")).unwrap_err().is_type_error());
    }

    #[test]
    fn test_cbool_requires_bool() {
        let builtins = Builtins::get();
        let cbool = check(TypeSpec::new(builtins.primitive(PrimitiveKind::Bool)));
        assert!(cbool.apply(Value::Bool(false)).is_ok());
        assert!(cbool.apply(Value::Int(0)).unwrap_err().is_type_error());
    }

    #[test]
    fn test_double_requires_float() {
        let builtins = Builtins::get();
        let double = check(TypeSpec::new(builtins.primitive(PrimitiveKind::Double)));
        assert!(double.apply(Value::Float(0.5)).is_ok());
        assert!(double.apply(Value::Int(1)).unwrap_err().is_type_error());
    }
}
