//! Slot maps
//!
//! A slot map assigns every statically dispatched member key of a class a
//! stable index. A subclass map starts as a copy of its nearest static
//! ancestor's map and only appends, so inherited members keep their index.

use crate::object::descriptor::Descriptor;
use crate::object::value::Value;
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Property accessor selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Accessor {
    /// Getter
    Get,
    /// Setter
    Set,
    /// Deleter
    Delete,
}

impl Accessor {
    /// Path suffix naming the accessor
    pub fn suffix(self) -> &'static str {
        match self {
            Accessor::Get => "fget",
            Accessor::Set => "fset",
            Accessor::Delete => "fdel",
        }
    }

    /// Parse a path suffix
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "fget" => Some(Accessor::Get),
            "fset" => Some(Accessor::Set),
            "fdel" => Some(Accessor::Delete),
            _ => None,
        }
    }
}

/// Key of a slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberKey {
    /// Plain member
    Name(Arc<str>),
    /// Property accessor
    Accessor(Arc<str>, Accessor),
}

impl MemberKey {
    /// Plain member key
    pub fn name(name: &str) -> Self {
        MemberKey::Name(Arc::from(name))
    }

    /// Accessor key
    pub fn accessor(name: &str, accessor: Accessor) -> Self {
        MemberKey::Accessor(Arc::from(name), accessor)
    }

    /// Member name, without the accessor
    pub fn member(&self) -> &Arc<str> {
        match self {
            MemberKey::Name(name) | MemberKey::Accessor(name, _) => name,
        }
    }

    /// Accessor selector, if any
    pub fn accessor_kind(&self) -> Option<Accessor> {
        match self {
            MemberKey::Name(_) => None,
            MemberKey::Accessor(_, accessor) => Some(*accessor),
        }
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKey::Name(name) => f.write_str(name),
            MemberKey::Accessor(name, accessor) => write!(f, "{}.{}", name, accessor.suffix()),
        }
    }
}

/// Accessor keys a property-like member contributes
pub fn accessor_keys(value: &Value) -> &'static [Accessor] {
    match value.as_descriptor().map(|d| d.as_ref()) {
        Some(Descriptor::Property(_)) => &[Accessor::Get, Accessor::Set, Accessor::Delete],
        Some(Descriptor::CachedProperty(_)) => &[Accessor::Get, Accessor::Set],
        _ => &[],
    }
}

/// Member key to slot index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotMap {
    slots: IndexMap<MemberKey, usize>,
}

impl SlotMap {
    /// Map without slots
    pub fn empty() -> Self {
        Self::default()
    }

    /// Copy this map and append a slot for every new statically dispatched
    /// member in `members`, in iteration order.
    pub fn extend<'a, I>(&self, members: I) -> SlotMap
    where
        I: IntoIterator<Item = (&'a Arc<str>, &'a Value)>,
    {
        let mut slots = self.slots.clone();
        for (name, value) in members {
            let key = MemberKey::Name(name.clone());
            if slots.contains_key(&key) || !value.is_slot_member() {
                continue;
            }
            let index = slots.len();
            slots.insert(key, index);
            for accessor in accessor_keys(value) {
                let index = slots.len();
                slots
                    .entry(MemberKey::Accessor(name.clone(), *accessor))
                    .or_insert(index);
            }
        }
        SlotMap { slots }
    }

    /// Slot index of `key`
    pub fn get(&self, key: &MemberKey) -> Option<usize> {
        self.slots.get(key).copied()
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no member has a slot
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Keys in slot order
    pub fn keys(&self) -> impl Iterator<Item = &MemberKey> {
        self.slots.keys()
    }

    /// Key stored at `index`
    pub fn key_at(&self, index: usize) -> Option<&MemberKey> {
        self.slots.get_index(index).map(|(key, _)| key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::descriptor::Property;
    use crate::object::function::{Function, Signature};
    use crate::object::types::{Builtins, TypeSpec};

    fn compiled(name: &str) -> Value {
        Function::compiled(
            name,
            Signature::new().receiver().returns(TypeSpec::new(&Builtins::get().int)),
            |_, _| Ok(Value::Int(0)),
        )
        .into_value()
    }

    fn members(entries: &[(&str, Value)]) -> Vec<(Arc<str>, Value)> {
        entries
            .iter()
            .map(|(n, v)| (Arc::from(*n), v.clone()))
            .collect()
    }

    #[test]
    fn test_extend_skips_dynamic_members() {
        let own = members(&[
            ("f", compiled("f")),
            ("g", Function::new("g", |_, _| Ok(Value::None)).into_value()),
            ("h", compiled("h")),
        ]);
        let map = SlotMap::empty().extend(own.iter().map(|(n, v)| (n, v)));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&MemberKey::name("f")), Some(0));
        assert_eq!(map.get(&MemberKey::name("g")), None);
        assert_eq!(map.get(&MemberKey::name("h")), Some(1));
    }

    #[test]
    fn test_extend_keeps_inherited_indices() {
        let base = members(&[("f", compiled("f")), ("g", compiled("g"))]);
        let base_map = SlotMap::empty().extend(base.iter().map(|(n, v)| (n, v)));
        let derived = members(&[("k", compiled("k")), ("f", compiled("f"))]);
        let derived_map = base_map.extend(derived.iter().map(|(n, v)| (n, v)));
        assert_eq!(derived_map.get(&MemberKey::name("f")), Some(0));
        assert_eq!(derived_map.get(&MemberKey::name("g")), Some(1));
        assert_eq!(derived_map.get(&MemberKey::name("k")), Some(2));
    }

    #[test]
    fn test_property_accessor_keys() {
        let prop = crate::object::descriptor::Descriptor::property(
            Property::getter(compiled("x")).with_setter(compiled("x")),
        );
        let own = members(&[("x", prop)]);
        let map = SlotMap::empty().extend(own.iter().map(|(n, v)| (n, v)));
        assert_eq!(map.len(), 4);
        assert_eq!(map.get(&MemberKey::accessor("x", Accessor::Get)), Some(1));
        assert_eq!(map.get(&MemberKey::accessor("x", Accessor::Set)), Some(2));
        assert_eq!(map.get(&MemberKey::accessor("x", Accessor::Delete)), Some(3));
        assert_eq!(
            map.key_at(1).map(|k| k.to_string()),
            Some("x.fget".to_string())
        );
    }
}
