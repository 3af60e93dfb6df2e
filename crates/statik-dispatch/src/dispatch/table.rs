//! Dispatch tables
//!
//! One table per class, one entry per slot of the class's [`SlotMap`]. Each
//! entry holds an `Arc<SlotBehavior>`; invocation clones the `Arc` and drops
//! the lock before calling, so a call may re-enter the table (to resolve,
//! warm up or patch) without deadlocking.

use crate::dispatch::resolver;
use crate::dispatch::slot_map::{MemberKey, SlotMap};
use crate::dispatch::thunk::{StaticThunk, TypeCheckState};
use crate::error::{DispatchError, DispatchResult};
use crate::object::class::{Class, ClassRef};
use crate::object::function::{CallArgs, Function};
use crate::object::types::TypeSpec;
use crate::object::value::Value;
use crate::runtime::Runtime;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Member that no longer exists anywhere in the MRO
#[derive(Debug, Clone)]
pub struct MissingState {
    owner: Arc<str>,
    member: Arc<str>,
    expected: TypeSpec,
}

impl MissingState {
    pub(crate) fn new(owner: &str, member: &str, expected: TypeSpec) -> Self {
        Self {
            owner: Arc::from(owner),
            member: Arc::from(member),
            expected,
        }
    }

    /// Member name
    pub fn member(&self) -> &str {
        &self.member
    }

    /// Type the member was declared to return
    pub fn expected(&self) -> &TypeSpec {
        &self.expected
    }

    fn raise(&self, args: &CallArgs) -> DispatchError {
        let owner = match args.receiver() {
            Some(receiver) => receiver.type_name(),
            None => self.owner.to_string(),
        };
        DispatchError::MissingAttribute {
            owner,
            member: self.member.to_string(),
        }
    }
}

/// What a slot does when invoked
pub enum SlotBehavior {
    /// Not resolved yet
    Unresolved(MemberKey),
    /// Compiled function that has never run; becomes `Direct` after a call
    LazyInit(Arc<Function>),
    /// Compiled function, no checks
    Direct(Arc<Function>),
    /// Compiled static method; the receiver is dropped
    StaticMethod(Arc<Function>),
    /// Compiled class method; instance receivers are replaced by their class
    ClassMethod {
        /// Function
        function: Arc<Function>,
        /// Class the slot was resolved for
        declaring: Weak<Class>,
    },
    /// Property accessor thunk, called as is
    Accessor(Value),
    /// Replacement member whose result is checked against the declared type
    TypeChecked(TypeCheckState),
    /// Deleted member
    Missing(MissingState),
}

impl SlotBehavior {
    /// Short name of the variant
    pub fn kind_name(&self) -> &'static str {
        match self {
            SlotBehavior::Unresolved(_) => "unresolved",
            SlotBehavior::LazyInit(_) => "lazy-init",
            SlotBehavior::Direct(_) => "direct",
            SlotBehavior::StaticMethod(_) => "staticmethod",
            SlotBehavior::ClassMethod { .. } => "classmethod",
            SlotBehavior::Accessor(_) => "accessor",
            SlotBehavior::TypeChecked(_) => "type-checked",
            SlotBehavior::Missing(_) => "missing",
        }
    }

    /// Anything but `Unresolved`
    pub fn is_resolved(&self) -> bool {
        !matches!(self, SlotBehavior::Unresolved(_))
    }
}

impl fmt::Debug for SlotBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotBehavior::Unresolved(key) => write!(f, "Unresolved({})", key),
            SlotBehavior::LazyInit(func) => write!(f, "LazyInit({})", func.name()),
            SlotBehavior::Direct(func) => write!(f, "Direct({})", func.name()),
            SlotBehavior::StaticMethod(func) => write!(f, "StaticMethod({})", func.name()),
            SlotBehavior::ClassMethod { function, .. } => {
                write!(f, "ClassMethod({})", function.name())
            }
            SlotBehavior::Accessor(value) => write!(f, "Accessor({:?})", value),
            SlotBehavior::TypeChecked(state) => write!(f, "TypeChecked({:?})", state.value()),
            SlotBehavior::Missing(state) => write!(f, "Missing({})", state.member()),
        }
    }
}

/// Per-class array of slot behaviors
pub struct DispatchTable {
    owner: Weak<Class>,
    slot_map: Arc<SlotMap>,
    entries: Box<[RwLock<Arc<SlotBehavior>>]>,
    thunks: Mutex<FxHashMap<MemberKey, Arc<StaticThunk>>>,
}

impl DispatchTable {
    /// Table for `owner` with every slot unresolved
    pub(crate) fn alloc(owner: &ClassRef, slot_map: Arc<SlotMap>) -> Self {
        let entries = slot_map
            .keys()
            .map(|key| RwLock::new(Arc::new(SlotBehavior::Unresolved(key.clone()))))
            .collect();
        Self {
            owner: Arc::downgrade(owner),
            slot_map,
            entries,
            thunks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Owning class
    pub fn owner(&self) -> Option<ClassRef> {
        self.owner.upgrade()
    }

    /// Slot map the table is indexed by
    pub fn slot_map(&self) -> &Arc<SlotMap> {
        &self.slot_map
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table has no slots
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_index(&self, slot: usize) {
        assert!(
            slot < self.entries.len(),
            "slot {} out of range for dispatch table of size {}",
            slot,
            self.entries.len()
        );
    }

    /// Current behavior of `slot`
    pub fn entry(&self, slot: usize) -> Arc<SlotBehavior> {
        self.check_index(slot);
        self.entries[slot].read().clone()
    }

    /// Replace the behavior of `slot`. The previous behavior is released
    /// after the entry holds the new one.
    pub fn set(&self, slot: usize, behavior: Arc<SlotBehavior>) {
        self.check_index(slot);
        let previous = std::mem::replace(&mut *self.entries[slot].write(), behavior);
        drop(previous);
    }

    /// Replace `slot` only if it still holds `expected`
    pub(crate) fn replace_if(
        &self,
        slot: usize,
        expected: &Arc<SlotBehavior>,
        behavior: Arc<SlotBehavior>,
    ) -> bool {
        self.check_index(slot);
        let mut entry = self.entries[slot].write();
        if !Arc::ptr_eq(&*entry, expected) {
            return false;
        }
        let previous = std::mem::replace(&mut *entry, behavior);
        drop(entry);
        drop(previous);
        true
    }

    /// Return every slot to the unresolved state
    pub fn reinit(&self) {
        for (slot, key) in self.slot_map.keys().enumerate() {
            self.set(slot, Arc::new(SlotBehavior::Unresolved(key.clone())));
        }
    }

    pub(crate) fn thunk(&self, key: &MemberKey) -> Option<Arc<StaticThunk>> {
        self.thunks.lock().get(key).cloned()
    }

    pub(crate) fn insert_thunk(&self, key: MemberKey, thunk: Arc<StaticThunk>) -> Arc<StaticThunk> {
        self.thunks.lock().entry(key).or_insert(thunk).clone()
    }

    /// Call through `slot`
    pub fn invoke(&self, rt: &Runtime, slot: usize, args: &CallArgs) -> DispatchResult<Value> {
        let behavior = self.entry(slot);
        match &*behavior {
            SlotBehavior::Unresolved(key) => {
                resolver::resolve_entry(self, slot, key)?;
                self.invoke(rt, slot, args)
            }
            SlotBehavior::LazyInit(function) => {
                let result = function.call(rt, args);
                if rt.options().warm_up_compiled_slots {
                    let direct = Arc::new(SlotBehavior::Direct(function.clone()));
                    if self.replace_if(slot, &behavior, direct) {
                        trace!(function = %function.name(), slot, "warm-up slot now direct");
                    }
                }
                result
            }
            SlotBehavior::Direct(function) => function.call(rt, args),
            SlotBehavior::StaticMethod(function) => function.call(rt, &args.without_receiver()),
            SlotBehavior::ClassMethod {
                function,
                declaring,
            } => {
                let adjusted = match (args.receiver(), declaring.upgrade()) {
                    (Some(Value::Instance(instance)), Some(declaring))
                        if instance.class().is_subclass_of(&declaring) =>
                    {
                        Some(args.with_receiver(Value::Class(instance.class().clone())))
                    }
                    _ => None,
                };
                function.call(rt, adjusted.as_ref().unwrap_or(args))
            }
            SlotBehavior::Accessor(accessor) => accessor.call(rt, args),
            SlotBehavior::TypeChecked(state) => state.invoke(rt, args),
            SlotBehavior::Missing(state) => Err(state.raise(args)),
        }
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<_> = self.entries.iter().map(|e| e.read().clone()).collect();
        f.debug_struct("DispatchTable")
            .field("owner", &self.owner.upgrade().map(|c| c.qualname()))
            .field("entries", &entries)
            .finish()
    }
}
