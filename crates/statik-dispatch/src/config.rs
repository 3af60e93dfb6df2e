//! Runtime configuration
//!
//! Options can be built in code with the `with_*` helpers or loaded from a
//! TOML document:
//!
//! ```toml
//! check_dynamic_arguments = false
//! max_generic_arity = 4
//! ```

use crate::defaults::{
    DEFAULT_CHECK_DYNAMIC_ARGUMENTS, DEFAULT_EAGER_AWAIT_SHORTCUT, DEFAULT_MAX_GENERIC_ARITY,
    DEFAULT_WARM_UP_COMPILED_SLOTS,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading options
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the options file
    #[error("Failed to read options file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse options: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid options: {0}")]
    ValidationError(String),
}

/// Runtime options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Check argument types on dynamically dispatched calls to compiled functions
    pub check_dynamic_arguments: bool,

    /// Check already-completed awaitables immediately at wrap time
    pub eager_await_shortcut: bool,

    /// Rewrite warm-up slots to direct entries after the first call
    pub warm_up_compiled_slots: bool,

    /// Maximum generic template arity
    pub max_generic_arity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            check_dynamic_arguments: DEFAULT_CHECK_DYNAMIC_ARGUMENTS,
            eager_await_shortcut: DEFAULT_EAGER_AWAIT_SHORTCUT,
            warm_up_compiled_slots: DEFAULT_WARM_UP_COMPILED_SLOTS,
            max_generic_arity: DEFAULT_MAX_GENERIC_ARITY,
        }
    }
}

impl RuntimeOptions {
    /// Load options from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse options from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let options: RuntimeOptions = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    /// Validate option values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_generic_arity == 0 {
            return Err(ConfigError::ValidationError(
                "max_generic_arity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Toggle dynamic argument checks
    pub fn with_dynamic_argument_checks(mut self, enabled: bool) -> Self {
        self.check_dynamic_arguments = enabled;
        self
    }

    /// Toggle the eager awaitable shortcut
    pub fn with_eager_await_shortcut(mut self, enabled: bool) -> Self {
        self.eager_await_shortcut = enabled;
        self
    }

    /// Toggle warm-up rewrites
    pub fn with_warm_up(mut self, enabled: bool) -> Self {
        self.warm_up_compiled_slots = enabled;
        self
    }

    /// Set the maximum generic arity
    pub fn with_max_generic_arity(mut self, arity: usize) -> Self {
        self.max_generic_arity = arity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let options = RuntimeOptions::default();
        assert!(options.check_dynamic_arguments);
        assert!(options.eager_await_shortcut);
        assert!(options.warm_up_compiled_slots);
        assert_eq!(options.max_generic_arity, DEFAULT_MAX_GENERIC_ARITY);
    }

    #[test]
    fn test_parse_partial_toml() {
        let options = RuntimeOptions::from_toml_str(
            r#"
check_dynamic_arguments = false
max_generic_arity = 4
"#,
        )
        .unwrap();
        assert!(!options.check_dynamic_arguments);
        assert!(options.warm_up_compiled_slots);
        assert_eq!(options.max_generic_arity, 4);
    }

    #[test]
    fn test_reject_zero_arity() {
        let err = RuntimeOptions::from_toml_str("max_generic_arity = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = RuntimeOptions::from_toml_str("max_generic_arity = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "eager_await_shortcut = false").unwrap();
        let options = RuntimeOptions::from_file(file.path()).unwrap();
        assert!(!options.eager_await_shortcut);
    }

    #[test]
    fn test_builder_helpers() {
        let options = RuntimeOptions::default()
            .with_warm_up(false)
            .with_max_generic_arity(2);
        assert!(!options.warm_up_compiled_slots);
        assert_eq!(options.max_generic_arity, 2);
    }
}
