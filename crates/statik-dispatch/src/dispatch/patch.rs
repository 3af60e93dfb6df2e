//! Member change propagation
//!
//! Runs before a class member is assigned or deleted. The entry for the
//! member is reclassified on the class and copied into every subclass that
//! inherits it; thunks handed out for the member are repointed.

use crate::dispatch::resolver;
use crate::dispatch::slot_map::{accessor_keys, MemberKey};
use crate::dispatch::table::{DispatchTable, SlotBehavior};
use crate::error::{DispatchError, DispatchResult};
use crate::object::class::ClassRef;
use crate::object::value::Value;
use crate::runtime::Runtime;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// `class.name` is about to become `new_value` (`None`: deleted)
pub fn on_member_changed(
    rt: &Runtime,
    class: &ClassRef,
    name: &str,
    new_value: Option<&Value>,
) -> DispatchResult<()> {
    if let Some(base) = class.final_declarer(name) {
        return Err(DispatchError::FinalOverride {
            class: class.name().to_string(),
            base: base.name().to_string(),
        });
    }
    let Some(table) = table_for_update(rt, class)? else {
        trace!(class = %class.qualname(), member = name, "no dispatch table, nothing to update");
        return Ok(());
    };

    // Every entry is classified before any is installed, so a failure
    // leaves the tables as they were.
    let mut pending = Vec::new();
    plan_slot(class, &table, &MemberKey::name(name), new_value.cloned(), &mut pending)?;
    for update in pending {
        commit(class, &table, update);
    }
    Ok(())
}

/// Table to update for `class`. A class without a table still gets one when
/// a built subclass inherits through it.
fn table_for_update(rt: &Runtime, class: &ClassRef) -> DispatchResult<Option<Arc<DispatchTable>>> {
    if let Some(table) = class.table() {
        return Ok(Some(table));
    }
    if class.is_root() || !has_built_subclass(class) {
        return Ok(None);
    }
    resolver::ensure_table(rt, class).map(Some)
}

fn has_built_subclass(class: &ClassRef) -> bool {
    class
        .subclasses()
        .iter()
        .any(|subclass| subclass.table().is_some() || has_built_subclass(subclass))
}

struct PendingSlot {
    key: MemberKey,
    slot: usize,
    behavior: Arc<SlotBehavior>,
    value: Option<Value>,
}

fn plan_slot(
    class: &ClassRef,
    table: &DispatchTable,
    key: &MemberKey,
    new_value: Option<Value>,
    pending: &mut Vec<PendingSlot>,
) -> DispatchResult<()> {
    let Some(slot) = table.slot_map().get(key) else {
        return Ok(());
    };

    let original = resolver::original_member(class, key);
    let new_value = new_value.or_else(|| resolver::inherited_member(class, key));

    let property = match (&original, key.accessor_kind()) {
        (Some(original), None) if is_property_like(original) => Some(original),
        _ => None,
    };
    if let (Some(property), Some(value)) = (property, &new_value) {
        if !value.is_descriptor() {
            return Err(DispatchError::PropertyAssign {
                actual: value.type_name(),
                owner: class.name().to_string(),
                member: key.member().to_string(),
                expected: property.type_name(),
            });
        }
    }

    let behavior = resolver::classify(class, key, new_value.clone(), original.as_ref())?;

    if let Some(property) = property {
        for accessor in accessor_keys(property) {
            let accessor_key = MemberKey::Accessor(key.member().clone(), *accessor);
            let accessor_value = new_value
                .as_ref()
                .map(|v| resolver::accessor_member(class, &accessor_key, v, *accessor));
            plan_slot(class, table, &accessor_key, accessor_value, pending)?;
        }
    }

    pending.push(PendingSlot {
        key: key.clone(),
        slot,
        behavior,
        value: new_value,
    });
    Ok(())
}

fn commit(class: &ClassRef, table: &DispatchTable, update: PendingSlot) {
    let PendingSlot { key, slot, behavior, value } = update;
    if let Some(thunk) = table.thunk(&key) {
        thunk.update(value.as_ref());
    }
    table.set(slot, behavior.clone());
    debug!(
        class = %class.qualname(),
        member = %key,
        slot,
        kind = behavior.kind_name(),
        "updated slot"
    );
    propagate(class, class, &key, slot, &behavior, value.as_ref());
}

fn is_property_like(value: &Value) -> bool {
    value.as_descriptor().map_or(false, |d| d.is_property_like())
}

/// Whether `subclass` resolves `member` through `origin`: no class before
/// `origin` in its MRO defines it
fn inherits_through(subclass: &ClassRef, origin: &ClassRef, member: &str) -> bool {
    for class in subclass.mro() {
        if Arc::ptr_eq(class, origin) {
            return true;
        }
        if class.defines(member) {
            return false;
        }
    }
    false
}

/// Copy `behavior` into every subclass table that inherits `key` from `origin`
fn propagate(
    origin: &ClassRef,
    class: &ClassRef,
    key: &MemberKey,
    slot: usize,
    behavior: &Arc<SlotBehavior>,
    new_value: Option<&Value>,
) {
    for subclass in class.subclasses() {
        if !inherits_through(&subclass, origin, key.member()) {
            continue;
        }
        if let Some(table) = subclass.table() {
            if table.slot_map().get(key) != Some(slot) {
                warn!(
                    class = %subclass.qualname(),
                    member = %key,
                    slot,
                    "subclass table disagrees on slot index"
                );
                continue;
            }
            if let Some(thunk) = table.thunk(key) {
                thunk.update(new_value);
            }
            table.set(slot, behavior.clone());
            trace!(class = %subclass.qualname(), member = %key, slot, "propagated slot");
        }
        propagate(origin, &subclass, key, slot, behavior, new_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::resolver::ensure_table;
    use crate::object::class::{ClassBuilder, Instance};
    use crate::object::function::{CallArgs, Function, Signature};
    use crate::object::types::{Builtins, TypeSpec};

    fn int_method(result: i64) -> Value {
        Function::compiled(
            "f",
            Signature::new().receiver().returns(TypeSpec::new(&Builtins::get().int)),
            move |_, _| Ok(Value::Int(result.into())),
        )
        .into_value()
    }

    #[test]
    fn test_patch_reaches_subclass() {
        let rt = Runtime::new();
        let base = ClassBuilder::new("Base")
            .static_class()
            .member("f", int_method(1))
            .build(&rt)
            .unwrap();
        let derived = ClassBuilder::new("Derived").static_class().base(&base).build(&rt).unwrap();
        let derived_table = ensure_table(&rt, &derived).unwrap();
        ensure_table(&rt, &base).unwrap();

        let replacement = Function::new("f", |_, _| Ok(Value::Int(7))).into_value();
        on_member_changed(&rt, &base, "f", Some(&replacement)).unwrap();
        base.store_member("f", replacement);

        assert_eq!(derived_table.entry(0).kind_name(), "type-checked");
        let receiver = Value::Instance(Instance::new(&derived));
        let result = derived_table.invoke(&rt, 0, &CallArgs::new(vec![receiver]));
        assert!(matches!(result, Ok(Value::Int(7))));
    }

    #[test]
    fn test_overriding_subclass_is_skipped() {
        let rt = Runtime::new();
        let base = ClassBuilder::new("Base")
            .static_class()
            .member("f", int_method(1))
            .build(&rt)
            .unwrap();
        let derived = ClassBuilder::new("Derived")
            .static_class()
            .base(&base)
            .member("f", int_method(2))
            .build(&rt)
            .unwrap();
        ensure_table(&rt, &base).unwrap();
        let derived_table = ensure_table(&rt, &derived).unwrap();
        let before = derived_table.entry(0);

        let replacement = Function::new("f", |_, _| Ok(Value::Int(7))).into_value();
        on_member_changed(&rt, &base, "f", Some(&replacement)).unwrap();
        assert!(Arc::ptr_eq(&before, &derived_table.entry(0)));
    }

    #[test]
    fn test_final_member_rejected() {
        let rt = Runtime::new();
        let base = ClassBuilder::new("Base")
            .static_class()
            .member("f", int_method(1))
            .final_member("f")
            .build(&rt)
            .unwrap();
        let derived = ClassBuilder::new("Derived").base(&base).build(&rt).unwrap();
        let replacement = Function::new("f", |_, _| Ok(Value::Int(7))).into_value();
        let err = on_member_changed(&rt, &derived, "f", Some(&replacement)).unwrap_err();
        assert!(matches!(err, DispatchError::FinalOverride { .. }));
    }

    #[test]
    fn test_untouched_without_table() {
        let rt = Runtime::new();
        let base = ClassBuilder::new("Base")
            .static_class()
            .member("f", int_method(1))
            .build(&rt)
            .unwrap();
        on_member_changed(&rt, &base, "f", None).unwrap();
        assert!(base.table().is_none());
    }
}
