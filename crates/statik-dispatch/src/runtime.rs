//! Runtime facade
//!
//! `Runtime` owns everything shared between classes: the module registry,
//! the caches behind path resolution and the generic instance cache. It is
//! the entry point compiled code and the class machinery call into.

use crate::config::RuntimeOptions;
use crate::defaults::BUILTINS_MODULE;
use crate::dispatch::enforcer::ReturnCheck;
use crate::dispatch::patch;
use crate::dispatch::resolver;
use crate::dispatch::slot_map::{Accessor, MemberKey};
use crate::dispatch::table::DispatchTable;
use crate::dispatch::thunk::{IndirectionRef, StaticThunk};
use crate::error::{DispatchError, DispatchResult};
use crate::generic::{self, GenericArg, GenericCache};
use crate::object::class::{Class, ClassBuilder, ClassRef};
use crate::object::function::CallArgs;
use crate::object::types::{Builtins, TypeSpec};
use crate::object::value::Value;
use crate::path::{QualifiedPath, Segment, TypeDescr};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Module namespace
pub struct Module {
    name: Arc<str>,
    members: RwLock<IndexMap<Arc<str>, Value>>,
    thunks: Mutex<FxHashMap<Arc<str>, Arc<StaticThunk>>>,
}

impl Module {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            members: RwLock::new(IndexMap::new()),
            thunks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Member lookup
    pub fn get(&self, name: &str) -> Option<Value> {
        self.members.read().get(name).cloned()
    }

    /// Member names, in definition order
    pub fn member_names(&self) -> Vec<Arc<str>> {
        self.members.read().keys().cloned().collect()
    }

    fn thunk(&self, name: &Arc<str>, fallback: &Value) -> Arc<StaticThunk> {
        let mut thunks = self.thunks.lock();
        if let Some(thunk) = thunks.get(name) {
            return thunk.clone();
        }
        let current = self.get(name).unwrap_or_else(|| fallback.clone());
        let check = fallback
            .underlying_function()
            .and_then(|f| f.return_spec().cloned())
            .map(|spec| ReturnCheck::new(&self.name, name, spec));
        let thunk = StaticThunk::make(&self.name, name, Some(current), Some(fallback.clone()), check);
        thunks.insert(name.clone(), thunk.clone());
        thunk
    }
}

/// Shared runtime state
pub struct Runtime {
    options: RuntimeOptions,
    modules: RwLock<FxHashMap<Arc<str>, Arc<Module>>>,
    classes: Mutex<Vec<Weak<Class>>>,
    slot_cache: RwLock<FxHashMap<QualifiedPath, usize>>,
    type_cache: RwLock<FxHashMap<TypeDescr, TypeSpec>>,
    generics: GenericCache,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Runtime with default options
    pub fn new() -> Self {
        Self::with_options(RuntimeOptions::default())
    }

    /// Runtime with `options`; the builtins module is registered up front
    pub fn with_options(options: RuntimeOptions) -> Self {
        let rt = Self {
            options,
            modules: RwLock::new(FxHashMap::default()),
            classes: Mutex::new(Vec::new()),
            slot_cache: RwLock::new(FxHashMap::default()),
            type_cache: RwLock::new(FxHashMap::default()),
            generics: GenericCache::new(),
        };
        let builtins = rt.define_module(BUILTINS_MODULE);
        {
            let mut members = builtins.members.write();
            for class in Builtins::get().all() {
                members.insert(Arc::from(class.name()), Value::Class(class));
            }
        }
        rt
    }

    /// Options in effect
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Builtin classes
    pub fn builtins(&self) -> &'static Arc<Builtins> {
        Builtins::get()
    }

    /// Module `name`, created if missing
    pub fn define_module(&self, name: &str) -> Arc<Module> {
        if let Some(module) = self.module(name) {
            return module;
        }
        let mut modules = self.modules.write();
        modules
            .entry(Arc::from(name))
            .or_insert_with(|| Arc::new(Module::new(name)))
            .clone()
    }

    /// Module `name`, if defined
    pub fn module(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.read().get(name).cloned()
    }

    /// Assign a module-level member. Thunks for it are repointed and cached
    /// type resolutions that went through it are dropped.
    pub fn set_module_member(&self, module: &str, name: &str, value: Value) {
        let module = self.define_module(module);
        if let Some(thunk) = module.thunks.lock().get(name) {
            thunk.update(Some(&value));
        }
        let previous = module.members.write().insert(Arc::from(name), value);
        drop(previous);

        let module_name = module.name();
        self.type_cache
            .write()
            .retain(|descr, _| !descr.path.references(module_name, name));
        self.slot_cache
            .write()
            .retain(|path, _| !path.references(module_name, name));
        trace!(module = module_name, member = name, "module member set");
    }

    /// Build `builder` in `module` and bind it there under its name
    pub fn define_class(&self, module: &str, builder: ClassBuilder) -> DispatchResult<ClassRef> {
        let class = builder.module(module).build(self)?;
        self.set_module_member(module, class.name(), Value::Class(class.clone()));
        Ok(class)
    }

    pub(crate) fn register_class(&self, class: &ClassRef) {
        let mut classes = self.classes.lock();
        classes.retain(|weak| weak.strong_count() > 0);
        classes.push(Arc::downgrade(class));
    }

    /// Record `derived` as a subclass of `base`
    pub fn add_subclass(&self, base: &ClassRef, derived: &ClassRef) {
        base.register_subclass(derived);
    }

    /// Assign `class.name = value`
    pub fn set_member(&self, class: &ClassRef, name: &str, value: Value) -> DispatchResult<()> {
        self.on_member_changed(class, name, Some(&value))?;
        class.store_member(name, value);
        Ok(())
    }

    /// `del class.name`
    pub fn delete_member(&self, class: &ClassRef, name: &str) -> DispatchResult<()> {
        if !class.defines(name) {
            return Err(DispatchError::MissingAttribute {
                owner: class.name().to_string(),
                member: name.to_string(),
            });
        }
        self.on_member_changed(class, name, None)?;
        class.remove_member(name);
        Ok(())
    }

    /// Hook run before `class.name` changes; `None` means deletion
    pub fn on_member_changed(
        &self,
        class: &ClassRef,
        name: &str,
        new_value: Option<&Value>,
    ) -> DispatchResult<()> {
        patch::on_member_changed(self, class, name, new_value)
    }

    /// Dispatch table of `class`, built on demand
    pub fn ensure_table(&self, class: &ClassRef) -> DispatchResult<Arc<DispatchTable>> {
        resolver::ensure_table(self, class)
    }

    /// Resolve `path` to the value it names
    pub fn resolve_path(&self, path: &QualifiedPath) -> DispatchResult<Value> {
        let unresolved = |segment: &str| DispatchError::UnresolvedPath {
            path: path.to_string(),
            segment: segment.to_string(),
        };
        let mut segments = path.segments().iter();
        let Some(Segment::Name(module_name)) = segments.next() else {
            return Err(DispatchError::MalformedPath {
                path: path.to_string(),
                reason: "path must start with a module name".to_string(),
            });
        };
        let module = self.module(module_name).ok_or_else(|| unresolved(&**module_name))?;

        let mut current: Option<Value> = None;
        for segment in segments {
            current = Some(match (segment, &current) {
                (Segment::Name(name), None) => module.get(name).ok_or_else(|| unresolved(&**name))?,
                (Segment::Name(name), Some(Value::Class(class))) => {
                    class.lookup(name).ok_or_else(|| unresolved(&**name))?
                }
                (Segment::Name(name), Some(_)) => return Err(unresolved(&**name)),
                (Segment::Args(descrs), Some(Value::Class(template))) => {
                    let args = descrs
                        .iter()
                        .map(|d| self.resolve_type(d).map(|spec| GenericArg { class: spec.class, optional: spec.optional }))
                        .collect::<DispatchResult<Vec<_>>>()?;
                    Value::Class(self.instantiate(template, &args)?)
                }
                (Segment::Args(_), _) => return Err(DispatchError::NotAType(path.to_string())),
            });
        }
        current.ok_or_else(|| DispatchError::MalformedPath {
            path: path.to_string(),
            reason: "path names a module".to_string(),
        })
    }

    /// Resolve `path` to a class
    pub fn resolve_class(&self, path: &QualifiedPath) -> DispatchResult<ClassRef> {
        match self.resolve_path(path)? {
            Value::Class(class) => Ok(class),
            _ => Err(DispatchError::NotAType(path.to_string())),
        }
    }

    /// Resolve a type descriptor, memoized until a module member it goes
    /// through is reassigned
    pub fn resolve_type(&self, descr: &TypeDescr) -> DispatchResult<TypeSpec> {
        if let Some(spec) = self.type_cache.read().get(descr) {
            return Ok(spec.clone());
        }
        let class = self.resolve_class(&descr.path)?;
        let spec = TypeSpec {
            class,
            optional: descr.optional,
            exact: descr.exact,
        };
        self.type_cache.write().insert(descr.clone(), spec.clone());
        Ok(spec)
    }

    /// Slot index of the member named by `path`
    ///
    /// `m.C.f` names a member, `m.C.p.fget` (or `fset`, `fdel`) an accessor
    /// of property `p`. Tables of `C` and all its subclasses are built.
    pub fn resolve_slot(&self, path: &QualifiedPath) -> DispatchResult<usize> {
        if let Some(slot) = self.slot_cache.read().get(path) {
            return Ok(*slot);
        }
        let malformed = || DispatchError::MalformedPath {
            path: path.to_string(),
            reason: "expected a member of a class".to_string(),
        };
        let (container, last) = path.split_last().ok_or_else(malformed)?;
        let (class, key) = match self.resolve_path(&container)? {
            Value::Class(class) => (class, MemberKey::Name(last.clone())),
            _ => {
                let accessor = Accessor::from_suffix(last)
                    .ok_or_else(|| DispatchError::NotAType(container.to_string()))?;
                let (owner, property) = container.split_last().ok_or_else(malformed)?;
                (self.resolve_class(&owner)?, MemberKey::Accessor(property.clone(), accessor))
            }
        };

        let table = resolver::ensure_table(self, &class)?;
        resolver::ensure_subclass_tables(self, &class)?;
        let slot = table
            .slot_map()
            .get(&key)
            .ok_or_else(|| DispatchError::UnresolvedPath {
                path: path.to_string(),
                segment: key.to_string(),
            })?;
        self.slot_cache.write().insert(path.clone(), slot);
        debug!(path = %path, slot, "resolved slot index");
        Ok(slot)
    }

    /// Indirection for the callable at `path`. `owner` is the class holding
    /// the member, or anything else for a module-level function.
    pub fn get_indirect_reference(
        &self,
        path: &QualifiedPath,
        callable: &Value,
        owner: &Value,
    ) -> DispatchResult<IndirectionRef> {
        let (_, name) = path.split_last().ok_or_else(|| DispatchError::MalformedPath {
            path: path.to_string(),
            reason: "expected a qualified member name".to_string(),
        })?;
        let thunk = match owner {
            Value::Class(class) => {
                resolver::class_thunk(self, class, &MemberKey::Name(name.clone()), callable)?
            }
            _ => {
                let module_name = path.module().ok_or_else(|| DispatchError::MalformedPath {
                    path: path.to_string(),
                    reason: "path must start with a module name".to_string(),
                })?;
                let module = self.module(module_name).ok_or_else(|| DispatchError::UnresolvedPath {
                    path: path.to_string(),
                    segment: module_name.to_string(),
                })?;
                module.thunk(name, callable)
            }
        };
        Ok(thunk.indirection())
    }

    /// `template[args]`
    pub fn instantiate(&self, template: &ClassRef, args: &[GenericArg]) -> DispatchResult<ClassRef> {
        self.generics.instantiate(self, template, args)
    }

    /// Whether `value` fits type parameter `index` of `container`'s generic class
    pub fn check_param_type(&self, container: &Value, value: &Value, index: usize) -> bool {
        generic::check_param_type(container, value, index)
    }

    /// Call `slot` on `args[0]`. Class receivers dispatch through their own
    /// table.
    pub fn invoke_method(&self, slot: usize, args: &CallArgs) -> DispatchResult<Value> {
        let Some(receiver) = args.receiver() else {
            return Err(DispatchError::Runtime(
                "method invocation without a receiver".to_string(),
            ));
        };
        let class = match receiver {
            Value::Class(class) => class.clone(),
            other => other.class_of(),
        };
        let table = resolver::ensure_table(self, &class)?;
        table.invoke(self, slot, args)
    }

    /// Call method `name` of `receiver` through its dispatch slot
    pub fn call_method(&self, receiver: &Value, name: &str, args: Vec<Value>) -> DispatchResult<Value> {
        self.call_key(receiver, &MemberKey::name(name), args)
    }

    /// Run accessor `accessor` of property `name` on `receiver`
    pub fn call_accessor(
        &self,
        receiver: &Value,
        name: &str,
        accessor: Accessor,
        args: Vec<Value>,
    ) -> DispatchResult<Value> {
        self.call_key(receiver, &MemberKey::accessor(name, accessor), args)
    }

    fn call_key(&self, receiver: &Value, key: &MemberKey, args: Vec<Value>) -> DispatchResult<Value> {
        let class = match receiver {
            Value::Class(class) => class.clone(),
            other => other.class_of(),
        };
        let table = resolver::ensure_table(self, &class)?;
        let slot = table
            .slot_map()
            .get(key)
            .ok_or_else(|| DispatchError::MissingAttribute {
                owner: class.name().to_string(),
                member: key.to_string(),
            })?;
        let mut values = Vec::with_capacity(args.len() + 1);
        values.push(receiver.clone());
        values.extend(args);
        table.invoke(self, slot, &CallArgs::new(values))
    }

    /// Drop memoized slot indices and type resolutions
    pub fn clear_caches(&self) {
        self.slot_cache.write().clear();
        self.type_cache.write().clear();
    }

    /// Drop every generic instance
    pub fn clear_generic_types(&self) {
        self.generics.clear();
    }

    /// Number of generic instances created
    pub fn generic_instance_count(&self) -> usize {
        self.generics.len()
    }

    /// Discard every dispatch table; they are rebuilt on next use
    pub fn clear_tables(&self) {
        let classes: Vec<ClassRef> = {
            let mut classes = self.classes.lock();
            classes.retain(|weak| weak.strong_count() > 0);
            classes.iter().filter_map(Weak::upgrade).collect()
        };
        for class in &classes {
            class.reset_table();
        }
        self.slot_cache.write().clear();
        debug!(classes = classes.len(), "cleared dispatch tables");
    }
}
