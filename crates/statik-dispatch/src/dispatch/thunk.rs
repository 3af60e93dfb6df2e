//! Call targets installed by the resolver
//!
//! - [`TypeCheckState`]: a replacement member, checked against the declared
//!   return type on every call
//! - [`StaticThunk`]: stable callable handed to compiled call sites; follows
//!   patches of the member it stands for
//! - [`AccessorThunk`]: callable standing in for a property accessor that is
//!   not a plain function

use crate::dispatch::awaitable::Awaitable;
use crate::dispatch::enforcer::ReturnCheck;
use crate::dispatch::slot_map::{Accessor, MemberKey};
use crate::error::{DispatchError, DispatchResult};
use crate::object::descriptor::{descr_get, Descriptor};
use crate::object::function::CallArgs;
use crate::object::value::Value;
use crate::runtime::Runtime;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};

/// How a type-checked slot calls its member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Plain function; an instance attribute of the same name wins
    Overridable,
    /// Arbitrary callable or descriptor, called without the receiver
    NonFunc,
    /// Property accessor; an instance attribute of the same name is returned
    Property,
    /// Class method; the receiver is replaced by its class
    ClassMethod,
}

/// Behavior of a slot whose member was replaced with something the declared
/// types cannot vouch for
pub struct TypeCheckState {
    value: Value,
    original: Value,
    key: MemberKey,
    check: ReturnCheck,
    mode: CallMode,
    coroutine: bool,
}

impl TypeCheckState {
    pub(crate) fn new(
        value: Value,
        original: Value,
        key: MemberKey,
        check: ReturnCheck,
        mode: CallMode,
        coroutine: bool,
    ) -> Self {
        Self {
            value,
            original,
            key,
            check,
            mode,
            coroutine,
        }
    }

    /// Member being called
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Member as originally declared
    pub fn original(&self) -> &Value {
        &self.original
    }

    /// Return check applied to results
    pub fn check(&self) -> &ReturnCheck {
        &self.check
    }

    /// Call mode
    pub fn mode(&self) -> CallMode {
        self.mode
    }

    /// The original member was a coroutine
    pub fn is_coroutine(&self) -> bool {
        self.coroutine
    }

    pub(crate) fn invoke(&self, rt: &Runtime, args: &CallArgs) -> DispatchResult<Value> {
        let result = self.call_member(rt, args)?;
        finish(rt, &self.check, self.coroutine, result)
    }

    fn call_member(&self, rt: &Runtime, args: &CallArgs) -> DispatchResult<Value> {
        let receiver = args.receiver();
        let name = self.key.member();
        match self.mode {
            CallMode::Overridable => {
                if self.key.accessor_kind().is_none() {
                    if let Some(callable) = instance_attribute(receiver, name) {
                        return callable.call(rt, &args.without_receiver());
                    }
                }
                self.value.call(rt, args)
            }
            CallMode::NonFunc => {
                if !self.value.is_data_descriptor() {
                    if let Some(callable) = instance_attribute(receiver, name) {
                        return callable.call(rt, &args.without_receiver());
                    }
                }
                if self.value.is_descriptor() {
                    let instance = receiver.cloned().unwrap_or(Value::None);
                    let bound = descr_get(rt, &self.value, &instance, &instance.class_of(), name)?;
                    return bound.call(rt, &args.without_receiver());
                }
                self.value.call(rt, &args.without_receiver())
            }
            CallMode::Property => {
                if self.key.accessor_kind() == Some(Accessor::Get) {
                    if let Some(value) = instance_attribute(receiver, name) {
                        return Ok(value);
                    }
                }
                self.value.call(rt, args)
            }
            CallMode::ClassMethod => {
                if let Some(callable) = instance_attribute(receiver, name) {
                    return callable.call(rt, &args.without_receiver());
                }
                match receiver {
                    Some(Value::Instance(instance)) => self
                        .value
                        .call(rt, &args.with_receiver(Value::Class(instance.class().clone()))),
                    _ => self.value.call(rt, args),
                }
            }
        }
    }
}

impl fmt::Debug for TypeCheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeCheckState")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("expected", self.check.expected())
            .field("coroutine", &self.coroutine)
            .finish()
    }
}

fn instance_attribute(receiver: Option<&Value>, name: &str) -> Option<Value> {
    receiver?.as_instance()?.get_local(name)
}

/// Apply `check` to a call result. Coroutine results are wrapped so the
/// check runs when the awaitable resolves.
fn finish(rt: &Runtime, check: &ReturnCheck, coroutine: bool, result: Value) -> DispatchResult<Value> {
    if !coroutine {
        return check.apply(result);
    }
    let awaitable = match result {
        Value::Awaitable(awaitable) => awaitable,
        other => Awaitable::ready(other),
    };
    let checked = awaitable.checked(check.clone(), rt.options().eager_await_shortcut);
    Ok(Value::Awaitable(checked))
}

/// Strip the wrapper a call site would otherwise call through
fn unwrap_callable(value: &Value) -> Value {
    if let Value::Descriptor(descr) = value {
        match descr.as_ref() {
            Descriptor::StaticMethod(inner) | Descriptor::ClassMethod(inner) => return inner.clone(),
            Descriptor::Property(prop) => {
                if let Some(getter) = &prop.getter {
                    return getter.clone();
                }
            }
            Descriptor::CachedProperty(_) => {}
        }
    }
    value.clone()
}

struct ThunkState {
    current: Option<Value>,
    patched: bool,
}

/// Stable indirection to a class or module member
pub struct StaticThunk {
    owner: Arc<str>,
    name: Arc<str>,
    original: Option<Value>,
    check: Option<ReturnCheck>,
    classmethod: bool,
    coroutine: bool,
    state: RwLock<ThunkState>,
    this: Weak<StaticThunk>,
}

impl StaticThunk {
    /// Thunk for `owner.name`, currently bound to `current`. Results are
    /// checked against the return type declared by `original`, if any.
    pub fn make(
        owner: &str,
        name: &str,
        current: Option<Value>,
        original: Option<Value>,
        check: Option<ReturnCheck>,
    ) -> Arc<StaticThunk> {
        let classmethod = matches!(
            original.as_ref().and_then(Value::as_descriptor).map(|d| d.as_ref()),
            Some(Descriptor::ClassMethod(_))
        );
        let coroutine = original
            .as_ref()
            .and_then(Value::underlying_function)
            .map_or(false, |f| f.is_coroutine());
        let patched = match (&current, &original) {
            (Some(current), Some(original)) => !current.is(original),
            _ => true,
        };
        let state = ThunkState {
            current: current.as_ref().map(unwrap_callable),
            patched,
        };
        Arc::new_cyclic(|this| StaticThunk {
            owner: Arc::from(owner),
            name: Arc::from(name),
            original,
            check,
            classmethod,
            coroutine,
            state: RwLock::new(state),
            this: this.clone(),
        })
    }

    /// Owning class or module name
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Member name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member as originally declared
    pub fn original(&self) -> Option<&Value> {
        self.original.as_ref()
    }

    /// Callable the thunk currently forwards to
    pub fn current(&self) -> Option<Value> {
        self.state.read().current.clone()
    }

    /// The member has been replaced or deleted since the thunk was made
    pub fn is_patched(&self) -> bool {
        self.state.read().patched
    }

    /// Handle for call sites
    pub fn indirection(&self) -> IndirectionRef {
        IndirectionRef {
            thunk: self.this.clone(),
        }
    }

    /// Follow a change of the member; `None` marks it deleted
    pub(crate) fn update(&self, value: Option<&Value>) {
        let patched = match (value, &self.original) {
            (Some(value), Some(original)) => !value.is(original),
            _ => true,
        };
        let next = ThunkState {
            current: value.map(unwrap_callable),
            patched,
        };
        let previous = std::mem::replace(&mut *self.state.write(), next);
        drop(previous);
    }

    /// Call the current member
    pub fn call(&self, rt: &Runtime, args: &CallArgs) -> DispatchResult<Value> {
        let Some(current) = self.current() else {
            return Err(DispatchError::Deleted {
                member: self.name.to_string(),
            });
        };
        let result = if self.classmethod {
            match args.receiver() {
                None => {
                    return Err(DispatchError::MissingReceiver {
                        member: self.name.to_string(),
                    })
                }
                Some(Value::Instance(instance)) => current.call(
                    rt,
                    &args.with_receiver(Value::Class(instance.class().clone())),
                )?,
                Some(_) => current.call(rt, args)?,
            }
        } else {
            current.call(rt, args)?
        };
        match &self.check {
            Some(check) => finish(rt, check, self.coroutine, result),
            None => Ok(result),
        }
    }
}

impl fmt::Debug for StaticThunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<thunk {}.{}>", self.owner, self.name)
    }
}

/// Reference a compiled call site holds to a patchable member
///
/// While the member is unpatched, [`load`](IndirectionRef::load) yields the
/// original callable so the call site can skip the thunk.
#[derive(Clone, Debug)]
pub struct IndirectionRef {
    thunk: Weak<StaticThunk>,
}

impl IndirectionRef {
    /// Callable to invoke: the member itself when unpatched, else the thunk
    pub fn load(&self) -> Option<Value> {
        let thunk = self.thunk.upgrade()?;
        if thunk.is_patched() {
            Some(Value::Thunk(thunk))
        } else {
            thunk.current()
        }
    }

    /// The member has been patched
    pub fn is_patched(&self) -> bool {
        self.thunk.upgrade().map_or(false, |t| t.is_patched())
    }

    /// Underlying thunk
    pub fn thunk(&self) -> Option<Arc<StaticThunk>> {
        self.thunk.upgrade()
    }
}

/// What an [`AccessorThunk`] does
#[derive(Debug, Clone)]
pub enum AccessorKind {
    /// Read through the descriptor
    Get(Value),
    /// The property has no getter
    MissingGet,
    /// The property has no setter
    MissingSet,
    /// The property has no deleter
    MissingDelete,
}

/// Callable standing in for a property accessor
#[derive(Debug)]
pub struct AccessorThunk {
    member: Arc<str>,
    kind: AccessorKind,
}

impl AccessorThunk {
    /// Thunk for `member`
    pub fn new(member: &str, kind: AccessorKind) -> Arc<AccessorThunk> {
        Arc::new(AccessorThunk {
            member: Arc::from(member),
            kind,
        })
    }

    /// Member name
    pub fn member(&self) -> &str {
        &self.member
    }

    /// Kind
    pub fn kind(&self) -> &AccessorKind {
        &self.kind
    }

    /// Descriptor read by a `Get` thunk
    pub fn target(&self) -> Option<&Value> {
        match &self.kind {
            AccessorKind::Get(descr) => Some(descr),
            _ => None,
        }
    }

    pub(crate) fn is_slot_member(&self) -> bool {
        match &self.kind {
            AccessorKind::Get(descr) => descr.is_slot_member(),
            _ => true,
        }
    }

    /// Run the accessor against `args[0]`
    pub fn call(&self, rt: &Runtime, args: &CallArgs) -> DispatchResult<Value> {
        let Some(receiver) = args.receiver() else {
            return Err(DispatchError::MissingReceiver {
                member: self.member.to_string(),
            });
        };
        let action = match &self.kind {
            AccessorKind::Get(descr) => {
                return descr_get(rt, descr, receiver, &receiver.class_of(), &self.member)
            }
            AccessorKind::MissingGet => "unreadable",
            AccessorKind::MissingSet => "can't set",
            AccessorKind::MissingDelete => "can't delete",
        };
        Err(DispatchError::Accessor {
            action,
            member: self.member.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::class::{ClassBuilder, Instance};
    use crate::object::function::Function;
    use crate::object::types::{Builtins, TypeSpec};

    fn int_check() -> ReturnCheck {
        ReturnCheck::new("C", "f", TypeSpec::new(&Builtins::get().int))
    }

    #[test]
    fn test_thunk_follows_updates() {
        let rt = Runtime::new();
        let original = Function::new("f", |_, _| Ok(Value::Int(1))).into_value();
        let thunk = StaticThunk::make("m", "f", Some(original.clone()), Some(original.clone()), Some(int_check()));
        let handle = thunk.indirection();
        assert!(!handle.is_patched());
        assert!(handle.load().unwrap().is(&original));

        let replacement = Function::new("g", |_, _| Ok(Value::Int(2))).into_value();
        thunk.update(Some(&replacement));
        assert!(handle.is_patched());
        assert!(matches!(handle.load(), Some(Value::Thunk(_))));
        assert!(matches!(thunk.call(&rt, &CallArgs::empty()), Ok(Value::Int(2))));

        thunk.update(Some(&original));
        assert!(!handle.is_patched());
    }

    #[test]
    fn test_thunk_checks_return() {
        let rt = Runtime::new();
        let original = Function::new("f", |_, _| Ok(Value::Int(1))).into_value();
        let thunk = StaticThunk::make("C", "f", Some(original.clone()), Some(original), Some(int_check()));
        let bad = Function::new("f", |_, _| Ok(Value::str("no"))).into_value();
        thunk.update(Some(&bad));
        let err = thunk.call(&rt, &CallArgs::empty()).unwrap_err();
        assert!(err.is_type_error());
    }

    #[test]
    fn test_thunk_deleted() {
        let rt = Runtime::new();
        let original = Function::new("f", |_, _| Ok(Value::Int(1))).into_value();
        let thunk = StaticThunk::make("C", "f", Some(original.clone()), Some(original), None);
        thunk.update(None);
        let err = thunk.call(&rt, &CallArgs::empty()).unwrap_err();
        assert_eq!(err, DispatchError::Deleted { member: "f".to_string() });
    }

    #[test]
    fn test_classmethod_thunk_needs_receiver() {
        let rt = Runtime::new();
        let inner = Function::new("make", |_, args| Ok(args.receiver().cloned().unwrap_or(Value::None))).into_value();
        let original = Descriptor::class_method(inner);
        let thunk = StaticThunk::make("C", "make", Some(original.clone()), Some(original), None);
        let err = thunk.call(&rt, &CallArgs::empty()).unwrap_err();
        assert_eq!(err, DispatchError::MissingReceiver { member: "make".to_string() });

        let class = ClassBuilder::new("C").build(&rt).unwrap();
        let instance = Value::Instance(Instance::new(&class));
        let result = thunk.call(&rt, &CallArgs::new(vec![instance])).unwrap();
        assert!(result.is(&Value::Class(class)));
    }

    #[test]
    fn test_missing_accessor_messages() {
        let rt = Runtime::new();
        let class = ClassBuilder::new("C").build(&rt).unwrap();
        let receiver = Value::Instance(Instance::new(&class));
        let args = CallArgs::new(vec![receiver, Value::Int(1)]);

        let set = AccessorThunk::new("x", AccessorKind::MissingSet);
        assert_eq!(set.call(&rt, &args).unwrap_err().to_string(), "AttributeError: can't set attribute 'x'");
        let get = AccessorThunk::new("x", AccessorKind::MissingGet);
        assert_eq!(get.call(&rt, &args).unwrap_err().to_string(), "AttributeError: unreadable attribute 'x'");
        let delete = AccessorThunk::new("x", AccessorKind::MissingDelete);
        assert!(delete.call(&rt, &args).unwrap_err().is_attribute_error());
        assert!(set.call(&rt, &CallArgs::empty()).is_err());
    }
}
