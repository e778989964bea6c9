use serde::{Deserialize, Serialize};

use crate::frontend::token::{AssignOp, Operator, Subscript};

/// Bumped whenever an opcode is added, removed or renumbered.
pub const BYTECODE_VERSION: u16 = 2;

// =============================================================================
// OPCODE - closed numbering shared with the evaluator
// =============================================================================

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpCode {
    Return = 0,
    PushNumber = 1,
    PushString = 2,
    LookupValue = 3,
    LookupPointer = 4,
    DerefValue = 5,
    DerefPointer = 6,
    SliceValue = 7,
    MakeDict = 8,
    MakeList = 9,
    Call = 10,
    Operator = 11,
    Assign = 12,
    IncDec = 13,
    Substitute = 14,
    Dollar = 15,
    SlicePointer = 16,
    BranchIfFalse = 17,
    BranchIfTrue = 18,
    Goto = 19,
    MakeBool = 20,
}

impl OpCode {
    pub const ALL: [OpCode; 21] = [
        OpCode::Return,
        OpCode::PushNumber,
        OpCode::PushString,
        OpCode::LookupValue,
        OpCode::LookupPointer,
        OpCode::DerefValue,
        OpCode::DerefPointer,
        OpCode::SliceValue,
        OpCode::MakeDict,
        OpCode::MakeList,
        OpCode::Call,
        OpCode::Operator,
        OpCode::Assign,
        OpCode::IncDec,
        OpCode::Substitute,
        OpCode::Dollar,
        OpCode::SlicePointer,
        OpCode::BranchIfFalse,
        OpCode::BranchIfTrue,
        OpCode::Goto,
        OpCode::MakeBool,
    ];

    pub fn from_u8(byte: u8) -> Option<OpCode> {
        OpCode::ALL.get(byte as usize).copied()
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            OpCode::Return => "RETURN",
            OpCode::PushNumber => "PUSH_NUM",
            OpCode::PushString => "PUSH_STR",
            OpCode::LookupValue => "LOOKUP",
            OpCode::LookupPointer => "LOOKUP_PTR",
            OpCode::DerefValue => "DEREF",
            OpCode::DerefPointer => "DEREF_PTR",
            OpCode::SliceValue => "SLICE",
            OpCode::MakeDict => "MAKE_DICT",
            OpCode::MakeList => "MAKE_LIST",
            OpCode::Call => "CALL",
            OpCode::Operator => "OP",
            OpCode::Assign => "ASSIGN",
            OpCode::IncDec => "INCDEC",
            OpCode::Substitute => "SUBST",
            OpCode::Dollar => "DOLLAR",
            OpCode::SlicePointer => "SLICE_PTR",
            OpCode::BranchIfFalse => "BRANCH_FALSE",
            OpCode::BranchIfTrue => "BRANCH_TRUE",
            OpCode::Goto => "GOTO",
            OpCode::MakeBool => "MAKE_BOOL",
        }
    }
}

// =============================================================================
// OP - one logical instruction
// =============================================================================

/// A conditional jump. The condition is left on the stack as a boolean.
/// Falling through always pops it; taking the branch pops it only when
/// `pop_on_branch` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Record index of the destination; `None` until back-patched.
    pub target: Option<u32>,
    pub pop_on_branch: bool,
}

impl Branch {
    pub fn unresolved(pop_on_branch: bool) -> Self {
        Self {
            target: None,
            pop_on_branch,
        }
    }
}

/// Instructions that name something (`PushString`, the lookups and
/// dereferences) carry their text in the records that follow the header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Return,
    PushNumber(f64),
    PushString,
    LookupValue,
    LookupPointer,
    DerefValue,
    DerefPointer,
    SliceValue(Subscript),
    SlicePointer(Subscript),
    MakeDict(u32),
    MakeList(u32),
    Call(u32),
    Operator(Operator),
    Assign(AssignOp),
    IncDec(Operator),
    Substitute(u32),
    Dollar,
    BranchIfFalse(Branch),
    BranchIfTrue(Branch),
    Goto(Option<u32>),
    MakeBool,
}

impl Op {
    pub fn opcode(&self) -> OpCode {
        match self {
            Op::Return => OpCode::Return,
            Op::PushNumber(_) => OpCode::PushNumber,
            Op::PushString => OpCode::PushString,
            Op::LookupValue => OpCode::LookupValue,
            Op::LookupPointer => OpCode::LookupPointer,
            Op::DerefValue => OpCode::DerefValue,
            Op::DerefPointer => OpCode::DerefPointer,
            Op::SliceValue(_) => OpCode::SliceValue,
            Op::SlicePointer(_) => OpCode::SlicePointer,
            Op::MakeDict(_) => OpCode::MakeDict,
            Op::MakeList(_) => OpCode::MakeList,
            Op::Call(_) => OpCode::Call,
            Op::Operator(_) => OpCode::Operator,
            Op::Assign(_) => OpCode::Assign,
            Op::IncDec(_) => OpCode::IncDec,
            Op::Substitute(_) => OpCode::Substitute,
            Op::Dollar => OpCode::Dollar,
            Op::BranchIfFalse(_) => OpCode::BranchIfFalse,
            Op::BranchIfTrue(_) => OpCode::BranchIfTrue,
            Op::Goto(_) => OpCode::Goto,
            Op::MakeBool => OpCode::MakeBool,
        }
    }

    /// True if a text payload follows the header.
    pub fn has_text(&self) -> bool {
        matches!(
            self,
            Op::PushString | Op::LookupValue | Op::LookupPointer | Op::DerefValue | Op::DerefPointer
        )
    }

    /// The assignable form of a value access, if it has one.
    pub fn pointer_form(&self) -> Option<Op> {
        match self {
            Op::LookupValue => Some(Op::LookupPointer),
            Op::DerefValue => Some(Op::DerefPointer),
            Op::SliceValue(s) if s.has_pointer_form() => Some(Op::SlicePointer(*s)),
            _ => None,
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Op::BranchIfFalse(_) | Op::BranchIfTrue(_) | Op::Goto(_))
    }

    pub fn target(&self) -> Option<u32> {
        match self {
            Op::BranchIfFalse(b) | Op::BranchIfTrue(b) => b.target,
            Op::Goto(target) => *target,
            _ => None,
        }
    }

    /// Writes a jump destination. Returns false for non-branch instructions.
    pub fn set_target(&mut self, to: u32) -> bool {
        match self {
            Op::BranchIfFalse(b) | Op::BranchIfTrue(b) => b.target = Some(to),
            Op::Goto(target) => *target = Some(to),
            _ => return false,
        }
        true
    }

    /// Values popped and pushed when the instruction falls through.
    pub fn stack_effect(&self) -> (u32, u32) {
        match self {
            Op::Return => (1, 0),
            Op::PushNumber(_) | Op::PushString | Op::LookupValue | Op::LookupPointer => (0, 1),
            Op::DerefValue | Op::DerefPointer => (1, 1),
            Op::SliceValue(s) | Op::SlicePointer(s) => (1 + s.operands(), 1),
            Op::MakeDict(n) => (2 * n, 1),
            Op::MakeList(n) => (*n, 1),
            Op::Call(n) => (n + 1, 1),
            Op::Operator(op) => (op.arity() as u32, 1),
            Op::Assign(_) => (2, 1),
            Op::IncDec(_) => (1, 1),
            Op::Substitute(n) => (n + 1, 1),
            Op::Dollar => (1, 1),
            Op::BranchIfFalse(_) | Op::BranchIfTrue(_) => (1, 0),
            Op::Goto(_) => (0, 0),
            Op::MakeBool => (1, 1),
        }
    }
}
