use serde::{Deserialize, Serialize};

use crate::frontend::lexer::LexFlags;

/// Resource bounds for a single compile. Exceeding one is an overflow
/// error, never a silent truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_tokens: usize,
    pub max_records: usize,
    pub max_stack_depth: usize,
    /// Brackets open at once. Each one is a level of lexer recursion.
    pub max_nesting: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            max_records: 16384,
            max_stack_depth: 512,
            max_nesting: 256,
        }
    }
}

/// What the calling context permits in an expression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// `$2`, `$name` and `$(expr)` column references.
    pub allow_dollar: bool,
    /// `=` and the compound assignments, `++` and `--`.
    pub allow_assignment: bool,
    /// A bare top-level comma is the sequence operator instead of ending
    /// the expression.
    pub allow_comma_operator: bool,
    pub limits: Limits,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dollar(mut self, allow: bool) -> Self {
        self.allow_dollar = allow;
        self
    }

    pub fn assignment(mut self, allow: bool) -> Self {
        self.allow_assignment = allow;
        self
    }

    pub fn comma_operator(mut self, allow: bool) -> Self {
        self.allow_comma_operator = allow;
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Tokenizer permissions for a top-level expression.
    pub fn lex_flags(&self) -> LexFlags {
        LexFlags {
            allow_dollar: self.allow_dollar,
            allow_assignment: self.allow_assignment,
            allow_comma_operator: self.allow_comma_operator,
            dict: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_restrictive() {
        let opts = CompileOptions::new();
        assert!(!opts.allow_dollar);
        assert!(!opts.allow_assignment);
        assert!(!opts.allow_comma_operator);
        assert_eq!(opts.limits.max_stack_depth, 512);
        assert_eq!(opts.limits.max_nesting, 256);
    }

    #[test]
    fn test_builder() {
        let opts = CompileOptions::new().assignment(true).dollar(true);
        assert!(opts.allow_assignment);
        assert!(opts.allow_dollar);
        assert!(!opts.allow_comma_operator);
    }

    #[test]
    fn test_postcard_round_trip() {
        let opts = CompileOptions::new().comma_operator(true).limits(Limits {
            max_tokens: 10,
            ..Limits::default()
        });
        let bytes = postcard::to_allocvec(&opts).unwrap();
        let back: CompileOptions = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, opts);
        assert_eq!(back.limits.max_records, 16384);
    }
}
