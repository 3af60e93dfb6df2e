//! Descriptors stored in class dictionaries

use crate::dispatch::slot_map::Accessor;
use crate::error::{DispatchError, DispatchResult};
use crate::object::class::ClassRef;
use crate::object::function::{BoundMethod, CallArgs};
use crate::object::value::Value;
use crate::runtime::Runtime;
use std::sync::Arc;

/// Property accessors
#[derive(Clone, Debug, Default)]
pub struct Property {
    /// Getter
    pub getter: Option<Value>,
    /// Setter
    pub setter: Option<Value>,
    /// Deleter
    pub deleter: Option<Value>,
}

impl Property {
    /// Read-only property
    pub fn getter(getter: Value) -> Self {
        Self {
            getter: Some(getter),
            ..Self::default()
        }
    }

    /// Add a setter
    pub fn with_setter(mut self, setter: Value) -> Self {
        self.setter = Some(setter);
        self
    }

    /// Add a deleter
    pub fn with_deleter(mut self, deleter: Value) -> Self {
        self.deleter = Some(deleter);
        self
    }

    /// Accessor function for `accessor`
    pub fn accessor(&self, accessor: Accessor) -> Option<&Value> {
        match accessor {
            Accessor::Get => self.getter.as_ref(),
            Accessor::Set => self.setter.as_ref(),
            Accessor::Delete => self.deleter.as_ref(),
        }
    }
}

/// Property computed once per instance and stored in its dictionary
#[derive(Clone, Debug)]
pub struct CachedProperty {
    /// Attribute name used for the instance dictionary
    pub name: Arc<str>,
    /// Getter
    pub function: Value,
}

/// A descriptor
#[derive(Debug)]
pub enum Descriptor {
    /// `staticmethod`
    StaticMethod(Value),
    /// `classmethod`
    ClassMethod(Value),
    /// `property`
    Property(Property),
    /// `cached_property`
    CachedProperty(CachedProperty),
}

impl Descriptor {
    /// `staticmethod(function)`
    pub fn static_method(function: Value) -> Value {
        Value::Descriptor(Arc::new(Descriptor::StaticMethod(function)))
    }

    /// `classmethod(function)`
    pub fn class_method(function: Value) -> Value {
        Value::Descriptor(Arc::new(Descriptor::ClassMethod(function)))
    }

    /// `property(...)`
    pub fn property(property: Property) -> Value {
        Value::Descriptor(Arc::new(Descriptor::Property(property)))
    }

    /// `cached_property(function)`
    pub fn cached_property(name: &str, function: Value) -> Value {
        Value::Descriptor(Arc::new(Descriptor::CachedProperty(CachedProperty {
            name: Arc::from(name),
            function,
        })))
    }

    /// Descriptor type name
    pub fn kind_name(&self) -> &'static str {
        match self {
            Descriptor::StaticMethod(_) => "staticmethod",
            Descriptor::ClassMethod(_) => "classmethod",
            Descriptor::Property(_) => "property",
            Descriptor::CachedProperty(_) => "cached_property",
        }
    }

    /// Only properties are data descriptors
    pub fn is_data(&self) -> bool {
        matches!(self, Descriptor::Property(_))
    }

    /// Properties get accessor slots
    pub fn is_property_like(&self) -> bool {
        matches!(self, Descriptor::Property(_) | Descriptor::CachedProperty(_))
    }

    pub(crate) fn is_slot_member(&self) -> bool {
        match self {
            Descriptor::StaticMethod(inner) | Descriptor::ClassMethod(inner) => {
                inner.is_slot_member()
            }
            Descriptor::Property(prop) => {
                prop.getter.as_ref().map_or(false, Value::is_slot_member)
                    || prop.setter.as_ref().map_or(false, Value::is_slot_member)
            }
            Descriptor::CachedProperty(cached) => cached.function.is_slot_member(),
        }
    }
}

/// Bind `descr`, found under `name`, to `instance` the way attribute lookup
/// on an instance does
pub fn descr_get(
    rt: &Runtime,
    descr: &Value,
    instance: &Value,
    owner: &ClassRef,
    name: &str,
) -> DispatchResult<Value> {
    match descr {
        Value::Function(_) => Ok(Value::Bound(Arc::new(BoundMethod {
            receiver: instance.clone(),
            function: descr.clone(),
        }))),
        Value::Descriptor(d) => match d.as_ref() {
            Descriptor::StaticMethod(inner) => Ok(inner.clone()),
            Descriptor::ClassMethod(inner) => Ok(Value::Bound(Arc::new(BoundMethod {
                receiver: Value::Class(owner.clone()),
                function: inner.clone(),
            }))),
            Descriptor::Property(prop) => match &prop.getter {
                Some(getter) => getter.call(rt, &CallArgs::new(vec![instance.clone()])),
                None => Err(DispatchError::Accessor {
                    action: "unreadable",
                    member: name.to_string(),
                }),
            },
            Descriptor::CachedProperty(cached) => {
                let target = instance.as_instance();
                if let Some(hit) = target.and_then(|i| i.get_local(&cached.name)) {
                    return Ok(hit);
                }
                let value = cached
                    .function
                    .call(rt, &CallArgs::new(vec![instance.clone()]))?;
                if let Some(target) = target {
                    if target.has_dict() {
                        target.set_local(&cached.name, value.clone())?;
                    }
                }
                Ok(value)
            }
        },
        other => Ok(other.clone()),
    }
}
