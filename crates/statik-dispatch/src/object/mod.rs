//! Object model
//!
//! The host-side view of classes, functions, descriptors and values that the
//! dispatch core operates on.

pub mod class;
pub mod descriptor;
pub mod function;
pub mod types;
pub mod value;

pub use class::{Class, ClassBuilder, ClassFlags, ClassId, ClassRef, Instance};
pub use descriptor::{CachedProperty, Descriptor, Property};
pub use function::{BoundMethod, CallArgs, CallFlags, Function, FunctionFlags, NativeFn, Param, ParamType, Signature};
pub use types::{Builtins, PrimitiveKind, TypeSpec};
pub use value::Value;
