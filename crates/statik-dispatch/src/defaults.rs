//! Default constants for runtime configuration.

/// Check argument types when a compiled function is called without the
/// statically-verified marker.
pub const DEFAULT_CHECK_DYNAMIC_ARGUMENTS: bool = true;

/// Check an awaitable's result immediately when it is already complete at
/// wrap time instead of installing the deferred adapter.
pub const DEFAULT_EAGER_AWAIT_SHORTCUT: bool = true;

/// Rewrite a warm-up slot to a direct entry after its first call.
pub const DEFAULT_WARM_UP_COMPILED_SLOTS: bool = true;

/// Largest number of type parameters a generic template may declare.
pub const DEFAULT_MAX_GENERIC_ARITY: usize = 16;

/// Name of the module holding the builtin classes.
pub const BUILTINS_MODULE: &str = "builtins";
