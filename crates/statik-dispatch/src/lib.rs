//! Statik dispatch core
//!
//! This crate provides the statically typed calling convention layered over a
//! dynamic object runtime:
//! - Slot maps and per-class dispatch tables, built lazily along the MRO
//! - Lazy slot resolution with a one-time warm-up rewrite for compiled functions
//! - Return-type enforcement for patched members, including awaitable results
//! - Patch propagation through the weak subclass graph
//! - Generic class instantiation with memoized instances

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod defaults;
pub mod dispatch;
pub mod error;
pub mod generic;
pub mod object;
pub mod path;
pub mod runtime;

pub use config::{ConfigError, RuntimeOptions};
pub use dispatch::{
    Accessor, Awaitable, DispatchTable, IndirectionRef, MemberKey, ReturnCheck, SlotBehavior,
    SlotMap, StaticThunk,
};
pub use error::{DispatchError, DispatchResult, ErrorKind};
pub use generic::{GenericArg, GenericCache, GenericInfo, GenericParam};
pub use object::{
    Builtins, CachedProperty, CallArgs, CallFlags, Class, ClassBuilder, ClassFlags, ClassId,
    ClassRef, Descriptor, Function, FunctionFlags, Instance, Param, ParamType, PrimitiveKind,
    Property, Signature, TypeSpec, Value,
};
pub use path::{QualifiedPath, Segment, TypeDescr};
pub use runtime::{Module, Runtime};
