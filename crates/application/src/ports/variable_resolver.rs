//! Variable resolver port

use std::collections::BTreeMap;

/// Result of substituting `{{name}}` references in one string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The input with every known variable replaced.
    pub resolved: String,
    /// Names that had no value; their references are left untouched.
    pub unresolved: Vec<String>,
}

impl Resolution {
    /// A resolution that changed nothing.
    #[must_use]
    pub fn unchanged(input: &str) -> Self {
        Self {
            resolved: input.to_string(),
            unresolved: Vec::new(),
        }
    }

    /// Returns true when every reference was resolved.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Substitutes `{{name}}` references against environment/collection values.
pub trait VariableResolver: Send + Sync {
    /// Resolves every reference in `input`.
    fn resolve(&self, input: &str) -> Resolution;

    /// Current variable values, exposed to scripts via `getEnvVar`.
    fn variables(&self) -> BTreeMap<String, String>;
}
