//! Table construction and slot resolution
//!
//! A table is built on first use. Its slot map is the nearest static
//! ancestor's map extended by the members the class declares itself, so
//! inherited slots keep their indices. Entries start unresolved and are
//! classified on their first call (or when the member changes).

use crate::dispatch::enforcer::ReturnCheck;
use crate::dispatch::slot_map::{Accessor, MemberKey, SlotMap};
use crate::dispatch::table::{DispatchTable, MissingState, SlotBehavior};
use crate::dispatch::thunk::{AccessorKind, AccessorThunk, CallMode, StaticThunk, TypeCheckState};
use crate::error::{DispatchError, DispatchResult};
use crate::object::class::{ClassRef, TableState};
use crate::object::descriptor::Descriptor;
use crate::object::types::{Builtins, TypeSpec};
use crate::object::value::Value;
use crate::runtime::Runtime;
use std::sync::Arc;
use tracing::{debug, trace};

/// Dispatch table of `class`, building it (and its static ancestors' tables)
/// if needed
pub fn ensure_table(rt: &Runtime, class: &ClassRef) -> DispatchResult<Arc<DispatchTable>> {
    if class.is_root() {
        return Err(DispatchError::Runtime(format!(
            "cannot build a dispatch table for {}",
            class.qualname()
        )));
    }
    {
        let mut state = class.table_state();
        match &*state {
            TableState::Built(table) => return Ok(table.clone()),
            TableState::Building => panic!("recursive dispatch table build for {}", class.qualname()),
            TableState::Unbuilt => *state = TableState::Building,
        }
    }

    let built = build_table(rt, class);
    let mut state = class.table_state();
    match built {
        Ok(table) => {
            if let TableState::Built(existing) = &*state {
                return Ok(existing.clone());
            }
            *state = TableState::Built(table.clone());
            Ok(table)
        }
        Err(err) => {
            *state = TableState::Unbuilt;
            Err(err)
        }
    }
}

fn build_table(rt: &Runtime, class: &ClassRef) -> DispatchResult<Arc<DispatchTable>> {
    let base_map = match class.ancestors().iter().find(|c| c.is_static()) {
        Some(base) => ensure_table(rt, base)?.slot_map().clone(),
        None => Arc::new(SlotMap::empty()),
    };
    let slot_map = if class.is_static() {
        let extended = base_map.extend(class.declared_members());
        if extended.len() == base_map.len() {
            base_map
        } else {
            Arc::new(extended)
        }
    } else {
        base_map
    };
    debug!(class = %class.qualname(), slots = slot_map.len(), "built dispatch table");
    Ok(Arc::new(DispatchTable::alloc(class, slot_map)))
}

/// Build the tables of every transitive subclass of `class`
pub(crate) fn ensure_subclass_tables(rt: &Runtime, class: &ClassRef) -> DispatchResult<()> {
    for subclass in class.subclasses() {
        ensure_table(rt, &subclass)?;
        ensure_subclass_tables(rt, &subclass)?;
    }
    Ok(())
}

/// Classify the member behind an unresolved entry and install it
pub(crate) fn resolve_entry(
    table: &DispatchTable,
    slot: usize,
    key: &MemberKey,
) -> DispatchResult<()> {
    let Some(class) = table.owner() else {
        panic!("dispatch table outlived its class while resolving {}", key);
    };
    let value = current_member(&class, key);
    let original = original_member(&class, key);
    let behavior = classify(&class, key, value, original.as_ref())?;
    debug!(
        class = %class.qualname(),
        member = %key,
        slot,
        kind = behavior.kind_name(),
        "resolved slot"
    );
    table.set(slot, behavior);
    Ok(())
}

/// Member for `key` defined directly on `class`. Accessor keys answer with
/// the accessor of the property defined there.
pub(crate) fn own_member(class: &ClassRef, key: &MemberKey) -> Option<Value> {
    let source = class.get_own(key.member())?;
    match key.accessor_kind() {
        None => Some(source),
        Some(accessor) => Some(accessor_member(class, key, &source, accessor)),
    }
}

/// Member for `key` along the full MRO
pub(crate) fn current_member(class: &ClassRef, key: &MemberKey) -> Option<Value> {
    class.mro().find_map(|c| own_member(c, key))
}

/// Member for `key` from the ancestors only
pub(crate) fn inherited_member(class: &ClassRef, key: &MemberKey) -> Option<Value> {
    class.ancestors().iter().find_map(|c| own_member(c, key))
}

/// Member for `key` as declared by the nearest static class in the MRO
pub(crate) fn original_member(class: &ClassRef, key: &MemberKey) -> Option<Value> {
    class.mro().filter(|c| c.is_static()).find_map(|c| {
        let declared = c.declared(key.member())?;
        match key.accessor_kind() {
            None => Some(declared.clone()),
            Some(accessor) => Some(accessor_member(c, key, declared, accessor)),
        }
    })
}

/// Callable used for `accessor` of the member `source`
///
/// Property accessors are used as is. Anything else gets an
/// [`AccessorThunk`], cached on `class` per source member so repeated
/// lookups agree on identity.
pub(crate) fn accessor_member(class: &ClassRef, key: &MemberKey, source: &Value, accessor: Accessor) -> Value {
    let kind = match (source.as_descriptor().map(|d| d.as_ref()), accessor) {
        (Some(Descriptor::Property(prop)), _) => match prop.accessor(accessor) {
            Some(function) => return function.clone(),
            None => match accessor {
                Accessor::Get => AccessorKind::MissingGet,
                Accessor::Set => AccessorKind::MissingSet,
                Accessor::Delete => AccessorKind::MissingDelete,
            },
        },
        (_, Accessor::Get) => AccessorKind::Get(source.clone()),
        (_, Accessor::Set) => AccessorKind::MissingSet,
        (_, Accessor::Delete) => AccessorKind::MissingDelete,
    };
    if let Some(special) = class.cached_special(key, source) {
        return special;
    }
    let special = Value::Accessor(AccessorThunk::new(key.member(), kind));
    trace!(class = %class.qualname(), member = %key, "created accessor thunk");
    class.store_special(key.clone(), source.clone(), special.clone());
    special
}

/// Declared return type of `original` for `key`
pub fn return_spec(original: &Value, key: &MemberKey) -> Option<TypeSpec> {
    match original {
        Value::Function(function) => function.return_spec().cloned(),
        Value::Descriptor(descr) => match descr.as_ref() {
            Descriptor::StaticMethod(inner) | Descriptor::ClassMethod(inner) => return_spec(inner, key),
            Descriptor::Property(prop) => {
                let accessor = key.accessor_kind().unwrap_or(Accessor::Get);
                prop.accessor(accessor).and_then(|f| return_spec(f, key))
            }
            Descriptor::CachedProperty(cached) => return_spec(&cached.function, key),
        },
        Value::Accessor(thunk) => match thunk.target() {
            Some(target) => return_spec(target, key),
            None => Some(TypeSpec::optional(&Builtins::get().object)),
        },
        Value::Thunk(thunk) => thunk.original().and_then(|o| return_spec(o, key)),
        _ => None,
    }
}

/// Behavior for `key` on `class` given its current member `value` and the
/// member as declared
pub(crate) fn classify(
    class: &ClassRef,
    key: &MemberKey,
    value: Option<Value>,
    original: Option<&Value>,
) -> DispatchResult<Arc<SlotBehavior>> {
    if let (Some(value), Some(original)) = (&value, original) {
        if value.is(original) {
            if let Some(behavior) = unchecked_behavior(class, value) {
                return Ok(Arc::new(behavior));
            }
        }
    }

    let missing_annotation = || DispatchError::MissingAnnotation {
        owner: class.name().to_string(),
        member: key.to_string(),
    };
    let original = original.ok_or_else(missing_annotation)?;
    let expected = return_spec(original, key).ok_or_else(missing_annotation)?;

    let Some(value) = value else {
        return Ok(Arc::new(SlotBehavior::Missing(MissingState::new(
            class.name(),
            key.member(),
            expected,
        ))));
    };

    let check = ReturnCheck::new(class.name(), key.member(), expected);
    let coroutine = original
        .underlying_function()
        .map_or(false, |f| f.is_coroutine());
    let mode = call_mode(&value, original, key, coroutine);
    Ok(Arc::new(SlotBehavior::TypeChecked(TypeCheckState::new(
        value,
        original.clone(),
        key.clone(),
        check,
        mode,
        coroutine,
    ))))
}

/// Behaviors that need no return check: the declared compiled member on a
/// class without instance dictionaries, and accessor thunks
fn unchecked_behavior(class: &ClassRef, value: &Value) -> Option<SlotBehavior> {
    if !class.has_instance_dict() {
        match value {
            Value::Function(function) if function.is_compiled() => {
                return Some(if function.is_initialized() {
                    SlotBehavior::Direct(function.clone())
                } else {
                    SlotBehavior::LazyInit(function.clone())
                });
            }
            Value::Descriptor(descr) => match descr.as_ref() {
                Descriptor::StaticMethod(Value::Function(f)) if f.is_compiled() => {
                    return Some(SlotBehavior::StaticMethod(f.clone()));
                }
                Descriptor::ClassMethod(Value::Function(f)) if f.is_compiled() => {
                    return Some(SlotBehavior::ClassMethod {
                        function: f.clone(),
                        declaring: Arc::downgrade(class),
                    });
                }
                _ => {}
            },
            _ => {}
        }
    }
    match value {
        Value::Accessor(_) => Some(SlotBehavior::Accessor(value.clone())),
        _ => None,
    }
}

fn call_mode(value: &Value, original: &Value, key: &MemberKey, coroutine: bool) -> CallMode {
    let is_classmethod =
        |v: &Value| matches!(v.as_descriptor().map(|d| d.as_ref()), Some(Descriptor::ClassMethod(_)));
    if coroutine && is_classmethod(original) {
        return CallMode::ClassMethod;
    }
    match value {
        Value::Function(_) => CallMode::Overridable,
        _ if key.accessor_kind().is_some() => CallMode::Property,
        _ if is_classmethod(value) => CallMode::ClassMethod,
        _ => CallMode::NonFunc,
    }
}

/// Thunk standing for `key` on `class`, created on first request
pub(crate) fn class_thunk(
    rt: &Runtime,
    class: &ClassRef,
    key: &MemberKey,
    fallback: &Value,
) -> DispatchResult<Arc<StaticThunk>> {
    let table = ensure_table(rt, class)?;
    if let Some(thunk) = table.thunk(key) {
        return Ok(thunk);
    }
    let current = current_member(class, key).unwrap_or_else(|| fallback.clone());
    let original = original_member(class, key);
    let check = original
        .as_ref()
        .and_then(|o| return_spec(o, key))
        .map(|spec| ReturnCheck::new(class.name(), key.member(), spec));
    let thunk = StaticThunk::make(class.name(), key.member(), Some(current), original, check);
    Ok(table.insert_thunk(key.clone(), thunk))
}
