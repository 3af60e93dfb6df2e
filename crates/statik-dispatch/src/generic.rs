//! Generic classes
//!
//! A template declares type parameter names. Instantiating it with concrete
//! arguments creates (once per argument list) a static class named after the
//! arguments, e.g. `Box[int, Optional[str]]`, that copies the template's
//! members and records the arguments for parameter checks.

use crate::error::{DispatchError, DispatchResult};
use crate::object::class::{Class, ClassFlags, ClassId, ClassParts, ClassRef};
use crate::object::types::TypeSpec;
use crate::object::value::Value;
use crate::runtime::Runtime;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Concrete type argument of a generic instance
#[derive(Clone)]
pub struct GenericParam {
    /// Argument class
    pub class: ClassRef,
    /// `None` is also accepted
    pub optional: bool,
}

/// Argument passed when instantiating a template
pub type GenericArg = GenericParam;

impl GenericParam {
    /// Plain argument
    pub fn of(class: &ClassRef) -> Self {
        Self {
            class: class.clone(),
            optional: false,
        }
    }

    /// `Optional[class]`
    pub fn optional(class: &ClassRef) -> Self {
        Self {
            class: class.clone(),
            optional: true,
        }
    }

    /// Whether `value` is valid for this parameter
    pub fn accepts(&self, value: &Value) -> bool {
        let spec = if self.optional {
            TypeSpec::optional(&self.class)
        } else {
            TypeSpec::new(&self.class)
        };
        spec.accepts(value)
    }

    fn cache_key(&self) -> (ClassId, bool) {
        (self.class.id(), self.optional)
    }
}

impl fmt::Display for GenericParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optional {
            write!(f, "Optional[{}]", self.class.name())
        } else {
            f.write_str(self.class.name())
        }
    }
}

impl fmt::Debug for GenericParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Generic role of a class
#[derive(Clone, Debug)]
pub enum GenericInfo {
    /// Template declaring type parameter names
    Template {
        /// Parameter names
        params: Vec<Arc<str>>,
    },
    /// Instantiation of `template`
    Instance {
        /// Template class
        template: ClassRef,
        /// Arguments, by position
        params: Vec<GenericParam>,
    },
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    template: ClassId,
    args: Vec<(ClassId, bool)>,
}

/// Instantiated generic classes, keyed by template and arguments
#[derive(Default)]
pub struct GenericCache {
    instances: RwLock<FxHashMap<InstanceKey, ClassRef>>,
}

impl GenericCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached instances
    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    /// No instances cached
    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    /// Forget every instance
    pub fn clear(&self) {
        let previous = std::mem::take(&mut *self.instances.write());
        drop(previous);
    }

    /// `template[args]`, created on first request
    pub(crate) fn instantiate(
        &self,
        rt: &Runtime,
        template: &ClassRef,
        args: &[GenericArg],
    ) -> DispatchResult<ClassRef> {
        let Some(GenericInfo::Template { params }) = template.generic() else {
            return Err(DispatchError::NotGeneric(template.name().to_string()));
        };
        if params.len() != args.len() {
            return Err(DispatchError::GenericArity {
                template: template.name().to_string(),
                expected: params.len(),
                actual: args.len(),
            });
        }

        let key = InstanceKey {
            template: template.id(),
            args: args.iter().map(GenericParam::cache_key).collect(),
        };
        if let Some(instance) = self.instances.read().get(&key) {
            return Ok(instance.clone());
        }

        let name = instance_name(template, args);
        let instance = Class::from_parts(
            rt,
            ClassParts {
                name: Arc::from(name.as_str()),
                module: Arc::from(template.module()),
                flags: template
                    .flags()
                    .difference(ClassFlags::GENERIC_TEMPLATE)
                    .union(ClassFlags::STATIC | ClassFlags::GENERIC_INSTANCE),
                bases: template.bases().to_vec(),
                members: template.members_snapshot(),
                declared: template.declared_snapshot(),
                final_members: template.final_members().to_vec(),
                generic: Some(GenericInfo::Instance {
                    template: template.clone(),
                    params: args.to_vec(),
                }),
            },
        )?;

        let mut instances = self.instances.write();
        let instance = instances.entry(key).or_insert(instance).clone();
        debug!(class = %instance.qualname(), "instantiated generic class");
        Ok(instance)
    }
}

fn instance_name(template: &ClassRef, args: &[GenericArg]) -> String {
    let args: Vec<String> = args.iter().map(ToString::to_string).collect();
    format!("{}[{}]", template.name(), args.join(", "))
}

/// Argument `index` of the generic class of `receiver`. Class receivers
/// answer for themselves.
pub(crate) fn param_record(receiver: &Value, index: usize) -> Option<GenericParam> {
    let class = match receiver {
        Value::Class(class) => class.clone(),
        other => other.class_of(),
    };
    match class.generic()? {
        GenericInfo::Instance { params, .. } => params.get(index).cloned(),
        GenericInfo::Template { .. } => None,
    }
}

/// Whether `value` is valid for type parameter `index` of `container`'s
/// generic class; false when `container` is not a generic instance
pub fn check_param_type(container: &Value, value: &Value, index: usize) -> bool {
    param_record(container, index).map_or(false, |param| param.accepts(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::class::{ClassBuilder, Instance};
    use crate::object::types::Builtins;

    fn template(rt: &Runtime) -> ClassRef {
        ClassBuilder::new("Box").generic(&["T"]).build(rt).unwrap()
    }

    #[test]
    fn test_instances_are_cached() {
        let rt = Runtime::new();
        let cache = GenericCache::new();
        let boxed = template(&rt);
        let int = GenericArg::of(&Builtins::get().int);
        let first = cache.instantiate(&rt, &boxed, &[int.clone()]).unwrap();
        let second = cache.instantiate(&rt, &boxed, &[int]).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "Box[int]");
        assert!(first.flags().contains(ClassFlags::GENERIC_INSTANCE));
        assert!(!first.flags().contains(ClassFlags::GENERIC_TEMPLATE));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_optional_argument_name() {
        let rt = Runtime::new();
        let cache = GenericCache::new();
        let boxed = template(&rt);
        let instance = cache
            .instantiate(&rt, &boxed, &[GenericArg::optional(&Builtins::get().str_)])
            .unwrap();
        assert_eq!(instance.name(), "Box[Optional[str]]");
    }

    #[test]
    fn test_arity_mismatch() {
        let rt = Runtime::new();
        let cache = GenericCache::new();
        let boxed = template(&rt);
        let int = GenericArg::of(&Builtins::get().int);
        let err = cache.instantiate(&rt, &boxed, &[int.clone(), int]).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: Box expected 1 generic arguments, got 2");
    }

    #[test]
    fn test_not_generic() {
        let rt = Runtime::new();
        let cache = GenericCache::new();
        let plain = ClassBuilder::new("Plain").build(&rt).unwrap();
        let err = cache
            .instantiate(&rt, &plain, &[GenericArg::of(&Builtins::get().int)])
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotGeneric(_)));
    }

    #[test]
    fn test_check_param_type() {
        let rt = Runtime::new();
        let cache = GenericCache::new();
        let boxed = template(&rt);
        let instance = cache
            .instantiate(&rt, &boxed, &[GenericArg::optional(&Builtins::get().int)])
            .unwrap();
        let container = Value::Instance(Instance::new(&instance));
        assert!(check_param_type(&container, &Value::Int(3), 0));
        assert!(check_param_type(&container, &Value::None, 0));
        assert!(!check_param_type(&container, &Value::str("x"), 0));
        assert!(!check_param_type(&container, &Value::Int(3), 1));
        assert!(!check_param_type(&Value::Int(1), &Value::Int(3), 0));
    }

    #[test]
    fn test_clear() {
        let rt = Runtime::new();
        let cache = GenericCache::new();
        let boxed = template(&rt);
        cache
            .instantiate(&rt, &boxed, &[GenericArg::of(&Builtins::get().int)])
            .unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }
}
