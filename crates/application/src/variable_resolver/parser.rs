//! Parser for `{{variable}}` references.

use std::ops::Range;

/// A `{{name}}` reference found in a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableReference {
    /// Trimmed name between the braces.
    pub name: String,
    /// Byte range of the whole `{{...}}` token.
    pub span: Range<usize>,
}

impl VariableReference {
    /// Returns true for `$`-prefixed dynamic variables.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.name.starts_with('$')
    }
}

/// Finds every non-empty `{{name}}` reference, left to right.
///
/// An unterminated `{{` ends the scan; empty or whitespace-only names are
/// skipped.
#[must_use]
pub fn parse_variables(input: &str) -> Vec<VariableReference> {
    let mut references = Vec::new();
    let mut cursor = 0;

    while let Some(open) = input[cursor..].find("{{") {
        let start = cursor + open;
        let Some(close) = input[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + close + 2;
        let name = input[start + 2..end - 2].trim();
        if !name.is_empty() {
            references.push(VariableReference {
                name: name.to_string(),
                span: start..end,
            });
        }
        cursor = end;
    }

    references
}
