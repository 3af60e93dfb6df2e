//! Functions, signatures and the call protocol

use crate::error::{DispatchError, DispatchResult};
use crate::generic;
use crate::object::types::TypeSpec;
use crate::object::value::Value;
use crate::runtime::Runtime;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Native body of a function
pub type NativeFn = Arc<dyn Fn(&Runtime, &CallArgs) -> DispatchResult<Value> + Send + Sync>;

bitflags::bitflags! {
    /// Function properties fixed at definition time
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FunctionFlags: u8 {
        /// Compiled with declared types
        const COMPILED = 1 << 0;
        /// Returns an awaitable
        const COROUTINE = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Call-site markers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CallFlags: u8 {
        /// Argument types were verified by the compiler
        const STATICALLY_VERIFIED = 1 << 0;
    }
}

/// Arguments of one call: receiver and positionals first, keyword values last
#[derive(Clone, Debug, Default)]
pub struct CallArgs {
    values: Vec<Value>,
    kwnames: Vec<Arc<str>>,
    flags: CallFlags,
}

impl CallArgs {
    /// Positional arguments
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            kwnames: Vec::new(),
            flags: CallFlags::empty(),
        }
    }

    /// No arguments
    pub fn empty() -> Self {
        Self::default()
    }

    /// Name the trailing values as keyword arguments
    ///
    /// Names beyond the number of values are dropped from the front, so each
    /// kept name still pairs with a trailing value.
    pub fn with_keywords(mut self, mut names: Vec<Arc<str>>) -> Self {
        if names.len() > self.values.len() {
            names.drain(..names.len() - self.values.len());
        }
        self.kwnames = names;
        self
    }

    /// Mark the call as statically verified
    pub fn verified(mut self) -> Self {
        self.flags |= CallFlags::STATICALLY_VERIFIED;
        self
    }

    /// Whether argument checks can be skipped
    pub fn is_verified(&self) -> bool {
        self.flags.contains(CallFlags::STATICALLY_VERIFIED)
    }

    /// Call flags
    pub fn flags(&self) -> CallFlags {
        self.flags
    }

    /// All values, keyword values included
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when there are no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `index`
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Implicit first argument
    pub fn receiver(&self) -> Option<&Value> {
        self.values.first()
    }

    /// Positional values
    pub fn positional(&self) -> &[Value] {
        &self.values[..self.keyword_start()]
    }

    /// Keyword names
    pub fn kwnames(&self) -> &[Arc<str>] {
        &self.kwnames
    }

    /// Keyword name/value pairs
    pub fn keywords(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        let start = self.keyword_start();
        self.kwnames.iter().zip(&self.values[start..])
    }

    /// Drop the receiver
    pub fn without_receiver(&self) -> CallArgs {
        let values = self.values.get(1..).map(<[Value]>::to_vec).unwrap_or_default();
        let dropped_keyword = usize::from(self.kwnames.len() > values.len());
        CallArgs {
            values,
            kwnames: self.kwnames[dropped_keyword..].to_vec(),
            flags: self.flags,
        }
    }

    fn keyword_start(&self) -> usize {
        self.values.len().saturating_sub(self.kwnames.len())
    }

    /// Replace the receiver
    pub fn with_receiver(&self, receiver: Value) -> CallArgs {
        let mut args = self.clone();
        match args.values.first_mut() {
            Some(first) => *first = receiver,
            None => args.values.push(receiver),
        }
        args
    }

    /// Insert a receiver in front
    pub fn prepend(&self, receiver: Value) -> CallArgs {
        let mut values = Vec::with_capacity(self.values.len() + 1);
        values.push(receiver);
        values.extend(self.values.iter().cloned());
        CallArgs {
            values,
            kwnames: self.kwnames.clone(),
            flags: self.flags,
        }
    }
}

/// Declared parameter type
#[derive(Clone, Debug)]
pub enum ParamType {
    /// Unchecked
    Any,
    /// Declared class
    Declared(TypeSpec),
    /// Type parameter of the receiver's generic class, by position
    Generic(usize),
}

/// A declared parameter
#[derive(Clone, Debug)]
pub struct Param {
    /// Parameter name
    pub name: Arc<str>,
    /// Declared type
    pub ty: ParamType,
}

/// Declared parameter and return types of a compiled function
#[derive(Clone, Debug, Default)]
pub struct Signature {
    params: Vec<Param>,
    returns: Option<TypeSpec>,
}

impl Signature {
    /// Empty signature
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unchecked `self` parameter
    pub fn receiver(self) -> Self {
        self.param("self", ParamType::Any)
    }

    /// Add a parameter
    pub fn param(mut self, name: &str, ty: ParamType) -> Self {
        self.params.push(Param {
            name: Arc::from(name),
            ty,
        });
        self
    }

    /// Set the declared return type
    pub fn returns(mut self, spec: TypeSpec) -> Self {
        self.returns = Some(spec);
        self
    }

    /// Declared parameters
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Declared return type
    pub fn return_spec(&self) -> Option<&TypeSpec> {
        self.returns.as_ref()
    }

    fn check_arguments(&self, function: &str, args: &CallArgs) -> DispatchResult<()> {
        let receiver = args.receiver();
        for (param, value) in self.params.iter().zip(args.positional()) {
            check_param(function, param, value, receiver)?;
        }
        for (name, value) in args.keywords() {
            if let Some(param) = self.params.iter().find(|p| p.name == *name) {
                check_param(function, param, value, receiver)?;
            }
        }
        Ok(())
    }
}

fn check_param(
    function: &str,
    param: &Param,
    value: &Value,
    receiver: Option<&Value>,
) -> DispatchResult<()> {
    let expected = match &param.ty {
        ParamType::Any => return Ok(()),
        ParamType::Declared(spec) => {
            if spec.accepts(value) {
                return Ok(());
            }
            spec.to_string()
        }
        ParamType::Generic(index) => {
            let Some(record) = receiver.and_then(|r| generic::param_record(r, *index)) else {
                return Ok(());
            };
            if record.accepts(value) {
                return Ok(());
            }
            record.to_string()
        }
    };
    Err(DispatchError::ArgumentType {
        function: function.to_string(),
        param: param.name.to_string(),
        expected,
        actual: value.type_name(),
    })
}

/// A function value
pub struct Function {
    name: Arc<str>,
    signature: Option<Signature>,
    flags: FunctionFlags,
    body: NativeFn,
    initialized: AtomicBool,
}

impl Function {
    /// Function supplied at run time, without declared types
    pub fn new<F>(name: &str, body: F) -> Self
    where
        F: Fn(&Runtime, &CallArgs) -> DispatchResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            signature: None,
            flags: FunctionFlags::empty(),
            body: Arc::new(body),
            initialized: AtomicBool::new(false),
        }
    }

    /// Statically compiled function
    pub fn compiled<F>(name: &str, signature: Signature, body: F) -> Self
    where
        F: Fn(&Runtime, &CallArgs) -> DispatchResult<Value> + Send + Sync + 'static,
    {
        Self {
            signature: Some(signature),
            flags: FunctionFlags::COMPILED,
            ..Self::new(name, body)
        }
    }

    /// Mark as a coroutine function
    pub fn coroutine(mut self) -> Self {
        self.flags |= FunctionFlags::COROUTINE;
        self
    }

    /// Wrap into a value
    pub fn into_value(self) -> Value {
        Value::Function(Arc::new(self))
    }

    /// Function name
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Declared signature, present for compiled functions
    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// Declared return type
    pub fn return_spec(&self) -> Option<&TypeSpec> {
        self.signature.as_ref().and_then(Signature::return_spec)
    }

    /// Flags
    pub fn flags(&self) -> FunctionFlags {
        self.flags
    }

    /// Compiled with declared types
    pub fn is_compiled(&self) -> bool {
        self.flags.contains(FunctionFlags::COMPILED)
    }

    /// Returns an awaitable
    pub fn is_coroutine(&self) -> bool {
        self.flags.contains(FunctionFlags::COROUTINE)
    }

    /// Whether the function has run at least once
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Call the function
    pub fn call(&self, rt: &Runtime, args: &CallArgs) -> DispatchResult<Value> {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            trace!(function = %self.name, "first call");
        }
        if let Some(signature) = &self.signature {
            if !args.is_verified() && rt.options().check_dynamic_arguments {
                signature.check_arguments(&self.name, args)?;
            }
        }
        (self.body)(rt, args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Function bound to a receiver
#[derive(Clone, Debug)]
pub struct BoundMethod {
    /// Implicit first argument
    pub receiver: Value,
    /// Callable
    pub function: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::types::Builtins;

    fn int_param_function() -> Function {
        let int = &Builtins::get().int;
        Function::compiled(
            "add_one",
            Signature::new()
                .param("x", ParamType::Declared(TypeSpec::new(int)))
                .returns(TypeSpec::new(int)),
            |_, args| Ok(Value::Int(args.values()[0].as_int().unwrap_or(0) + 1)),
        )
    }

    #[test]
    fn test_call_args_views() {
        let args = CallArgs::new(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
            .with_keywords(vec![Arc::from("z")]);
        assert_eq!(args.positional().len(), 2);
        let keywords: Vec<_> = args.keywords().map(|(n, _)| n.to_string()).collect();
        assert_eq!(keywords, vec!["z".to_string()]);
        assert_eq!(args.without_receiver().len(), 2);
        assert_eq!(args.prepend(Value::None).len(), 4);
        assert!(args.with_receiver(Value::None).values()[0].is_none());
    }

    #[test]
    fn test_excess_keyword_names_are_clamped() {
        let args = CallArgs::new(vec![Value::Int(1)])
            .with_keywords(vec![Arc::from("a"), Arc::from("b")]);
        assert!(args.positional().is_empty());
        let keywords: Vec<_> = args.keywords().map(|(n, _)| n.to_string()).collect();
        assert_eq!(keywords, vec!["b".to_string()]);

        let rest = args.without_receiver();
        assert_eq!(rest.len(), 0);
        assert!(rest.kwnames().is_empty());
        assert_eq!(rest.keywords().count(), 0);
    }

    #[test]
    fn test_dynamic_call_checks_arguments() {
        let rt = Runtime::new();
        let f = int_param_function();
        let err = f.call(&rt, &CallArgs::new(vec![Value::from("x")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: add_one expected 'int' for argument x, got 'str'"
        );
    }

    #[test]
    fn test_verified_call_skips_checks() {
        let rt = Runtime::new();
        let f = int_param_function();
        let result = f
            .call(&rt, &CallArgs::new(vec![Value::from("x")]).verified())
            .unwrap();
        assert!(result.is(&Value::Int(1)));
    }

    #[test]
    fn test_keyword_argument_checked() {
        let rt = Runtime::new();
        let f = int_param_function();
        let args = CallArgs::new(vec![Value::Float(1.0)]).with_keywords(vec![Arc::from("x")]);
        assert!(f.call(&rt, &args).unwrap_err().is_type_error());
    }

    #[test]
    fn test_initialized_after_first_call() {
        let rt = Runtime::new();
        let f = int_param_function();
        assert!(!f.is_initialized());
        f.call(&rt, &CallArgs::new(vec![Value::Int(1)])).unwrap();
        assert!(f.is_initialized());
    }
}
