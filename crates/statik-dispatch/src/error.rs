//! Dispatch errors
//!
//! Every failure surfaced through a dispatch entry is a `DispatchError`. The
//! variants carry the owner, member, expected and actual descriptions so the
//! caller can report them without re-deriving context.

use thiserror::Error;

/// Broad exception category of a [`DispatchError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `TypeError`
    Type,
    /// `AttributeError`
    Attribute,
    /// `OverflowError`
    Overflow,
    /// `RuntimeError`
    Runtime,
    /// Raised by user code
    Raised,
}

/// Errors produced by the dispatch core
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// Returned value does not match the declared return type
    #[error("TypeError: unexpected return type from {owner}.{member}, expected {expected}, got {actual}")]
    ReturnType {
        /// Owning class name
        owner: String,
        /// Member name
        member: String,
        /// Expected type, `Optional[...]` when optional
        expected: String,
        /// Actual type name
        actual: String,
    },

    /// Returned integer does not fit the declared primitive
    #[error("OverflowError: unexpected return type from {owner}.{member}, expected {expected}, got out-of-range {actual}")]
    ReturnOverflow {
        /// Owning class name
        owner: String,
        /// Member name
        member: String,
        /// Declared primitive
        expected: String,
        /// Actual type and value, e.g. `int (300)`
        actual: String,
    },

    /// Argument does not match the declared parameter type
    #[error("TypeError: {function} expected '{expected}' for argument {param}, got '{actual}'")]
    ArgumentType {
        /// Function name
        function: String,
        /// Parameter name
        param: String,
        /// Expected type
        expected: String,
        /// Actual type name
        actual: String,
    },

    /// Call through a slot whose member no longer exists
    #[error("AttributeError: '{owner}' object has no attribute '{member}'")]
    MissingAttribute {
        /// Receiver type name
        owner: String,
        /// Member name
        member: String,
    },

    /// Property accessor that is not provided by the descriptor
    #[error("AttributeError: {action} attribute '{member}'")]
    Accessor {
        /// `unreadable`, `can't set`, `can't delete`
        action: &'static str,
        /// Member name
        member: String,
    },

    /// A compiled member has no declared return type
    #[error("RuntimeError: missing type annotation on static compiled method {owner}.{member}")]
    MissingAnnotation {
        /// Owning class name
        owner: String,
        /// Member name
        member: String,
    },

    /// Call through a thunk whose member was deleted
    #[error("TypeError: {member} has been deleted")]
    Deleted {
        /// Member name
        member: String,
    },

    /// Class method thunk called without a receiver
    #[error("TypeError: {member} must be invoked with >= 1 arguments")]
    MissingReceiver {
        /// Member name
        member: String,
    },

    /// Override of a member declared final by an ancestor
    #[error("TypeError: {class} overrides a final method in the static base class {base}")]
    FinalOverride {
        /// Overriding class
        class: String,
        /// Class declaring the final member
        base: String,
    },

    /// Non-descriptor assigned over a declared property
    #[error("TypeError: Cannot assign a {actual}, because {owner}.{member} is expected to be a {expected}")]
    PropertyAssign {
        /// Assigned value type
        actual: String,
        /// Owning class name
        owner: String,
        /// Member name
        member: String,
        /// Declared descriptor type
        expected: String,
    },

    /// Wrong number of generic arguments
    #[error("TypeError: {template} expected {expected} generic arguments, got {actual}")]
    GenericArity {
        /// Template name
        template: String,
        /// Declared arity
        expected: usize,
        /// Supplied argument count
        actual: usize,
    },

    /// Instantiation requested for a class that is not a generic template
    #[error("TypeError: {0} is not a generic type")]
    NotGeneric(String),

    /// Value is not callable
    #[error("TypeError: '{0}' object is not callable")]
    NotCallable(String),

    /// Path resolves to something other than a class
    #[error("TypeError: bad name provided for class loader, {0} is not a type")]
    NotAType(String),

    /// Path segment does not exist
    #[error("AttributeError: bad name provided for class loader, {segment} doesn't exist in {path}")]
    UnresolvedPath {
        /// Full path
        path: String,
        /// Missing segment
        segment: String,
    },

    /// Path is malformed
    #[error("TypeError: malformed path {path}: {reason}")]
    MalformedPath {
        /// Input text
        path: String,
        /// Reason
        reason: String,
    },

    /// Bases admit no consistent linearization
    #[error("TypeError: Cannot create a consistent method resolution order (MRO) for bases {0}")]
    InconsistentMro(String),

    /// Generic error in the runtime
    #[error("RuntimeError: {0}")]
    Runtime(String),

    /// Exception raised by user code
    #[error("{kind}: {message}")]
    Raised {
        /// Exception class name
        kind: String,
        /// Message
        message: String,
    },
}

impl DispatchError {
    /// Build a user-raised exception
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        DispatchError::Raised {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Exception category
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::ReturnOverflow { .. } => ErrorKind::Overflow,
            DispatchError::MissingAttribute { .. }
            | DispatchError::Accessor { .. }
            | DispatchError::UnresolvedPath { .. } => ErrorKind::Attribute,
            DispatchError::MissingAnnotation { .. } | DispatchError::Runtime(_) => {
                ErrorKind::Runtime
            }
            DispatchError::Raised { .. } => ErrorKind::Raised,
            _ => ErrorKind::Type,
        }
    }

    /// True for `TypeError`
    pub fn is_type_error(&self) -> bool {
        self.kind() == ErrorKind::Type
    }

    /// True for `AttributeError`
    pub fn is_attribute_error(&self) -> bool {
        self.kind() == ErrorKind::Attribute
    }

    /// True for `OverflowError`
    pub fn is_overflow_error(&self) -> bool {
        self.kind() == ErrorKind::Overflow
    }
}

/// Dispatch result
pub type DispatchResult<T> = Result<T, DispatchError>;
