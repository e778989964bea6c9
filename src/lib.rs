//! Tokenizer and bytecode compiler for algebraic expressions: arithmetic,
//! comparisons, short-circuit logic, ternaries, assignments, function calls,
//! subscripts and slices, list and dictionary literals, `%` string
//! substitution and `$` column references.

pub mod bytecode;
pub mod frontend;
pub mod options;

pub use bytecode::{CompileError, CompiledExpr, ErrorKind, compile};
pub use options::{CompileOptions, Limits};
