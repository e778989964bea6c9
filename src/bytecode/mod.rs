pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod op;
pub mod peephole;
pub mod stack_check;

pub use compile::compile;
pub use compile_error::{CompileError, ErrorKind};
pub use ir::{Bytecode, CompiledExpr};
pub use op::Op;
