//! Class objects
//!
//! A `Class` owns its member dictionary, the snapshot of statically declared
//! members taken at definition time, a weak list of subclasses and, once
//! something dispatches through it, a [`DispatchTable`].
//!
//! ```text
//! Class
//! ├── ancestors: MRO without the class itself (C3)
//! ├── dict: current members, in definition order
//! ├── declared: compiled members as defined (never patched)
//! ├── subclasses: Weak<Class> registered through add_subclass
//! └── table: Unbuilt | Building | Built(Arc<DispatchTable>)
//! ```

use crate::dispatch::slot_map::MemberKey;
use crate::dispatch::table::DispatchTable;
use crate::error::{DispatchError, DispatchResult};
use crate::generic::GenericInfo;
use crate::object::types::{Builtins, PrimitiveKind};
use crate::object::value::Value;
use crate::runtime::Runtime;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Shared class handle
pub type ClassRef = Arc<Class>;

/// Unique class identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u64);

static NEXT_CLASS_ID: AtomicU64 = AtomicU64::new(1);

impl ClassId {
    fn next() -> Self {
        ClassId(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

bitflags::bitflags! {
    /// Flags describing how a class participates in static dispatch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClassFlags: u32 {
        /// Defined by compiled code with declared member types
        const STATIC = 1 << 0;
        /// Instances carry a member dictionary
        const INSTANCE_DICT = 1 << 1;
        /// Generic template awaiting type arguments
        const GENERIC_TEMPLATE = 1 << 2;
        /// Specialization of a generic template
        const GENERIC_INSTANCE = 1 << 3;
        /// Provided by the runtime
        const BUILTIN = 1 << 4;
    }
}

pub(crate) enum TableState {
    Unbuilt,
    Building,
    Built(Arc<DispatchTable>),
}

/// A class object
pub struct Class {
    id: ClassId,
    name: Arc<str>,
    module: Arc<str>,
    flags: ClassFlags,
    primitive: Option<PrimitiveKind>,
    bases: Vec<ClassRef>,
    ancestors: Vec<ClassRef>,
    dict: RwLock<IndexMap<Arc<str>, Value>>,
    declared: IndexMap<Arc<str>, Value>,
    final_members: Vec<Arc<str>>,
    subclasses: Mutex<Vec<Weak<Class>>>,
    table: Mutex<TableState>,
    specials: Mutex<FxHashMap<MemberKey, (Value, Value)>>,
    generic: Option<GenericInfo>,
}

pub(crate) struct ClassParts {
    pub(crate) name: Arc<str>,
    pub(crate) module: Arc<str>,
    pub(crate) flags: ClassFlags,
    pub(crate) bases: Vec<ClassRef>,
    pub(crate) members: IndexMap<Arc<str>, Value>,
    pub(crate) declared: IndexMap<Arc<str>, Value>,
    pub(crate) final_members: Vec<Arc<str>>,
    pub(crate) generic: Option<GenericInfo>,
}

impl Class {
    pub(crate) fn builtin(name: &str, bases: &[ClassRef], primitive: Option<PrimitiveKind>) -> ClassRef {
        let mut ancestors = Vec::new();
        if let Some(base) = bases.first() {
            ancestors.extend(base.mro().cloned());
        }
        Arc::new(Class {
            id: ClassId::next(),
            name: Arc::from(name),
            module: Arc::from(crate::defaults::BUILTINS_MODULE),
            flags: ClassFlags::BUILTIN,
            primitive,
            bases: bases.to_vec(),
            ancestors,
            dict: RwLock::new(IndexMap::new()),
            declared: IndexMap::new(),
            final_members: Vec::new(),
            subclasses: Mutex::new(Vec::new()),
            table: Mutex::new(TableState::Unbuilt),
            specials: Mutex::new(FxHashMap::default()),
            generic: None,
        })
    }

    /// Create and register a class from resolved parts
    pub(crate) fn from_parts(rt: &Runtime, parts: ClassParts) -> DispatchResult<ClassRef> {
        let ancestors = linearize(&parts.bases)?;
        for name in parts.members.keys() {
            if let Some(base) = ancestors.iter().find(|c| c.is_final(name)) {
                return Err(DispatchError::FinalOverride {
                    class: parts.name.to_string(),
                    base: base.name().to_string(),
                });
            }
        }

        let class = Arc::new(Class {
            id: ClassId::next(),
            name: parts.name,
            module: parts.module,
            flags: parts.flags,
            primitive: None,
            bases: parts.bases,
            ancestors,
            dict: RwLock::new(parts.members),
            declared: parts.declared,
            final_members: parts.final_members,
            subclasses: Mutex::new(Vec::new()),
            table: Mutex::new(TableState::Unbuilt),
            specials: Mutex::new(FxHashMap::default()),
            generic: parts.generic,
        });

        for base in &class.bases {
            rt.add_subclass(base, &class);
        }
        rt.register_class(&class);
        debug!(
            class = %class.qualname(),
            flags = ?class.flags,
            declared = class.declared.len(),
            "defined class"
        );
        Ok(class)
    }

    /// Class id
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Defining module
    pub fn module(&self) -> &str {
        &self.module
    }

    /// `module.name`
    pub fn qualname(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    /// Flags
    pub fn flags(&self) -> ClassFlags {
        self.flags
    }

    /// Participates in static dispatch
    pub fn is_static(&self) -> bool {
        self.flags
            .intersects(ClassFlags::STATIC | ClassFlags::GENERIC_INSTANCE)
    }

    /// The root `object` class
    pub fn is_root(&self) -> bool {
        self.bases.is_empty()
    }

    /// Instances carry a member dictionary
    pub fn has_instance_dict(&self) -> bool {
        self.flags.contains(ClassFlags::INSTANCE_DICT)
    }

    /// Primitive kind of a builtin primitive class
    pub fn primitive(&self) -> Option<PrimitiveKind> {
        self.primitive
    }

    /// Direct bases
    pub fn bases(&self) -> &[ClassRef] {
        &self.bases
    }

    /// MRO without the class itself
    pub fn ancestors(&self) -> &[ClassRef] {
        &self.ancestors
    }

    /// Full MRO, starting with this class
    pub fn mro<'a>(self: &'a Arc<Self>) -> impl Iterator<Item = &'a ClassRef> + 'a {
        std::iter::once(self).chain(self.ancestors.iter())
    }

    /// `issubclass(self, other)`
    pub fn is_subclass_of(self: &Arc<Self>, other: &ClassRef) -> bool {
        self.mro().any(|c| Arc::ptr_eq(c, other))
    }

    /// Generic template or instance information
    pub fn generic(&self) -> Option<&GenericInfo> {
        self.generic.as_ref()
    }

    /// Member defined directly on this class
    pub fn get_own(&self, name: &str) -> Option<Value> {
        self.dict.read().get(name).cloned()
    }

    /// Whether this class defines `name` itself
    pub fn defines(&self, name: &str) -> bool {
        self.dict.read().contains_key(name)
    }

    /// Member lookup along the MRO
    pub fn lookup(self: &Arc<Self>, name: &str) -> Option<Value> {
        self.mro().find_map(|c| c.get_own(name))
    }

    /// Own member names, in definition order
    pub fn member_names(&self) -> Vec<Arc<str>> {
        self.dict.read().keys().cloned().collect()
    }

    pub(crate) fn members_snapshot(&self) -> IndexMap<Arc<str>, Value> {
        self.dict.read().clone()
    }

    pub(crate) fn store_member(&self, name: &str, value: Value) {
        let previous = self.dict.write().insert(Arc::from(name), value);
        drop(previous);
    }

    pub(crate) fn remove_member(&self, name: &str) -> Option<Value> {
        self.dict.write().shift_remove(name)
    }

    /// Compiled member as declared at definition time
    pub fn declared(&self, name: &str) -> Option<&Value> {
        self.declared.get(name)
    }

    /// Compiled members as declared, in definition order
    pub fn declared_members(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.declared.iter()
    }

    pub(crate) fn declared_snapshot(&self) -> IndexMap<Arc<str>, Value> {
        self.declared.clone()
    }

    /// Members this class declares final
    pub fn final_members(&self) -> &[Arc<str>] {
        &self.final_members
    }

    fn is_final(&self, name: &str) -> bool {
        self.final_members.iter().any(|m| &**m == name)
    }

    /// Nearest ancestor declaring `name` final
    pub fn final_declarer(&self, name: &str) -> Option<&ClassRef> {
        self.ancestors.iter().find(|c| c.is_final(name))
    }

    /// Live subclasses; dead entries are pruned
    pub fn subclasses(&self) -> Vec<ClassRef> {
        let mut subclasses = self.subclasses.lock();
        subclasses.retain(|weak| weak.strong_count() > 0);
        subclasses.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn register_subclass(&self, derived: &ClassRef) {
        let mut subclasses = self.subclasses.lock();
        if !subclasses
            .iter()
            .any(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(derived)))
        {
            subclasses.push(Arc::downgrade(derived));
        }
    }

    /// Dispatch table, if built
    pub fn table(&self) -> Option<Arc<DispatchTable>> {
        match &*self.table.lock() {
            TableState::Built(table) => Some(table.clone()),
            _ => None,
        }
    }

    pub(crate) fn table_state(&self) -> parking_lot::MutexGuard<'_, TableState> {
        self.table.lock()
    }

    pub(crate) fn reset_table(&self) {
        let previous = std::mem::replace(&mut *self.table.lock(), TableState::Unbuilt);
        drop(previous);
        self.specials.lock().clear();
    }

    pub(crate) fn cached_special(&self, key: &MemberKey, source: &Value) -> Option<Value> {
        let specials = self.specials.lock();
        specials
            .get(key)
            .filter(|(cached_source, _)| cached_source.is(source))
            .map(|(_, special)| special.clone())
    }

    pub(crate) fn store_special(&self, key: MemberKey, source: Value, special: Value) {
        let previous = self.specials.lock().insert(key, (source, special));
        drop(previous);
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.qualname())
    }
}

/// C3 linearization of `bases`, excluding the class being defined
fn linearize(bases: &[ClassRef]) -> DispatchResult<Vec<ClassRef>> {
    let mut sequences: Vec<Vec<ClassRef>> = bases.iter().map(|b| b.mro().cloned().collect()).collect();
    sequences.push(bases.to_vec());

    let mut result = Vec::new();
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Ok(result);
        }
        let next = sequences
            .iter()
            .map(|s| &s[0])
            .find(|head| {
                !sequences
                    .iter()
                    .any(|s| s[1..].iter().any(|c| Arc::ptr_eq(c, head)))
            })
            .cloned();
        let Some(next) = next else {
            let names: Vec<&str> = bases.iter().map(|b| b.name()).collect();
            return Err(DispatchError::InconsistentMro(names.join(", ")));
        };
        for sequence in sequences.iter_mut() {
            if Arc::ptr_eq(&sequence[0], &next) {
                sequence.remove(0);
            }
        }
        result.push(next);
    }
}

/// Builder used by the class-definition machinery
pub struct ClassBuilder {
    name: Arc<str>,
    module: Arc<str>,
    flags: ClassFlags,
    bases: Vec<ClassRef>,
    members: IndexMap<Arc<str>, Value>,
    final_members: Vec<Arc<str>>,
    type_params: Option<Vec<Arc<str>>>,
}

impl ClassBuilder {
    /// Start a class named `name` in module `__main__`
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            module: Arc::from("__main__"),
            flags: ClassFlags::empty(),
            bases: Vec::new(),
            members: IndexMap::new(),
            final_members: Vec::new(),
            type_params: None,
        }
    }

    /// Defining module
    pub fn module(mut self, module: &str) -> Self {
        self.module = Arc::from(module);
        self
    }

    /// Add a base class
    pub fn base(mut self, base: &ClassRef) -> Self {
        self.bases.push(base.clone());
        self
    }

    /// Mark the class as compiled with declared types
    pub fn static_class(mut self) -> Self {
        self.flags |= ClassFlags::STATIC;
        self
    }

    /// Give instances a member dictionary
    pub fn instance_dict(mut self) -> Self {
        self.flags |= ClassFlags::INSTANCE_DICT;
        self
    }

    /// Define a member
    pub fn member(mut self, name: &str, value: Value) -> Self {
        self.members.insert(Arc::from(name), value);
        self
    }

    /// Declare `name` final
    pub fn final_member(mut self, name: &str) -> Self {
        self.final_members.push(Arc::from(name));
        self
    }

    /// Make this a generic template over `params`
    pub fn generic(mut self, params: &[&str]) -> Self {
        self.flags |= ClassFlags::GENERIC_TEMPLATE | ClassFlags::STATIC;
        self.type_params = Some(params.iter().map(|p| Arc::from(*p)).collect());
        self
    }

    /// Create the class and register it with `rt`
    pub fn build(self, rt: &Runtime) -> DispatchResult<ClassRef> {
        let bases = if self.bases.is_empty() {
            vec![Builtins::get().object.clone()]
        } else {
            self.bases
        };
        let declared = if self.flags.contains(ClassFlags::STATIC) {
            self.members
                .iter()
                .filter(|(_, value)| value.is_slot_member())
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect()
        } else {
            IndexMap::new()
        };
        if let Some(params) = &self.type_params {
            let limit = rt.options().max_generic_arity;
            if params.len() > limit {
                return Err(DispatchError::Runtime(format!(
                    "generic class {} declares {} type parameters, limit is {}",
                    self.name,
                    params.len(),
                    limit
                )));
            }
        }
        let generic = self.type_params.map(|params| GenericInfo::Template { params });
        Class::from_parts(
            rt,
            ClassParts {
                name: self.name,
                module: self.module,
                flags: self.flags,
                bases,
                members: self.members,
                declared,
                final_members: self.final_members,
                generic,
            },
        )
    }
}

/// Instance of a class
pub struct Instance {
    class: ClassRef,
    dict: Option<RwLock<IndexMap<Arc<str>, Value>>>,
}

impl Instance {
    /// Allocate an instance of `class`
    pub fn new(class: &ClassRef) -> Arc<Instance> {
        let dict = class
            .has_instance_dict()
            .then(|| RwLock::new(IndexMap::new()));
        Arc::new(Instance {
            class: class.clone(),
            dict,
        })
    }

    /// Class of the instance
    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    /// Whether the instance carries a dictionary
    pub fn has_dict(&self) -> bool {
        self.dict.is_some()
    }

    /// Instance dictionary entry
    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.dict.as_ref().and_then(|d| d.read().get(name).cloned())
    }

    /// Set an instance dictionary entry
    pub fn set_local(&self, name: &str, value: Value) -> DispatchResult<()> {
        let Some(dict) = &self.dict else {
            return Err(DispatchError::MissingAttribute {
                owner: self.class.name().to_string(),
                member: name.to_string(),
            });
        };
        let previous = dict.write().insert(Arc::from(name), value);
        drop(previous);
        Ok(())
    }
}
