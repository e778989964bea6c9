use std::rc::Rc;

use tracing::{debug, trace};

use crate::bytecode::compile_error::CompileError;
use crate::bytecode::ir::{Bytecode, CompiledExpr, Instr, Record, text_records};
use crate::bytecode::op::{Branch, Op};
use crate::bytecode::peephole;
use crate::frontend::lexer::Lexer;
use crate::frontend::number::{FloatScanner, NumberScanner};
use crate::frontend::strings;
use crate::frontend::token::{ASSIGN_PRECEDENCE, AssignOp, Bracket, Operator, Token, TokenKind};
use crate::options::CompileOptions;

/// Reduction precedence that flushes everything down to the nearest barrier.
const FLUSH: u8 = u8::MAX;

/// Compiles `text` into bytecode. Returns the expression and the number of
/// bytes consumed; a top-level expression may stop before the end of `text`.
pub fn compile(
    text: &str,
    line: u32,
    source_id: u64,
    file: &str,
    options: &CompileOptions,
) -> Result<(Rc<CompiledExpr>, usize), CompileError> {
    Compiler::new(text, options).compile(line, source_id, file)
}

// =============================================================================
// Operator stack
// =============================================================================

/// A pending operator or bracket.
#[derive(Debug, Clone, Copy)]
enum Entry {
    /// `branch` is the unpatched jump of `&&` / `||`.
    Operator {
        op: Operator,
        pos: usize,
        branch: Option<u32>,
    },
    Assign {
        op: AssignOp,
        pos: usize,
    },
    /// `?` waiting for its `:`.
    Question {
        pos: usize,
        branch: u32,
    },
    /// `:` whose goto is patched once the else-branch is complete.
    Colon {
        pos: usize,
        goto: u32,
    },
    Dollar {
        pos: usize,
    },
    Bracket {
        kind: TokenKind,
        pos: usize,
    },
}

impl Entry {
    /// `None` marks a barrier that ordinary reduction never pops.
    fn precedence(&self) -> Option<u8> {
        match self {
            // prefix increments bind to the access right after them
            Entry::Operator {
                op: Operator::PreIncrement | Operator::PreDecrement,
                ..
            } => Some(1),
            Entry::Operator { op, .. } => Some(op.precedence()),
            Entry::Assign { .. } => Some(ASSIGN_PRECEDENCE),
            Entry::Colon { .. } => Some(Operator::Colon.precedence()),
            Entry::Dollar { .. } => Some(0),
            Entry::Question { .. } | Entry::Bracket { .. } => None,
        }
    }

    fn pos(&self) -> usize {
        match self {
            Entry::Operator { pos, .. }
            | Entry::Assign { pos, .. }
            | Entry::Question { pos, .. }
            | Entry::Colon { pos, .. }
            | Entry::Dollar { pos }
            | Entry::Bracket { pos, .. } => *pos,
        }
    }
}

// =============================================================================
// Compiler
// =============================================================================

pub struct Compiler<'a> {
    source: &'a str,
    options: &'a CompileOptions,
    scanner: &'a dyn NumberScanner,

    code: Bytecode,
    stack: Vec<Entry>,

    /// Most recent instruction, the operand of an lvalue rewrite.
    last_emitted: Option<u32>,
}

impl<'a> Compiler<'a> {
    pub fn new(source: &'a str, options: &'a CompileOptions) -> Self {
        Self {
            source,
            options,
            scanner: &FloatScanner,
            code: Bytecode::default(),
            stack: Vec::new(),
            last_emitted: None,
        }
    }

    pub fn with_scanner(mut self, scanner: &'a dyn NumberScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn compile(
        mut self,
        line: u32,
        source_id: u64,
        file: &str,
    ) -> Result<(Rc<CompiledExpr>, usize), CompileError> {
        let tokenized = Lexer::new(self.source, self.options.lex_flags())
            .with_scanner(self.scanner)
            .with_max_tokens(self.options.limits.max_tokens)
            .with_max_depth(self.options.limits.max_nesting)
            .tokenize()?;

        for token in &tokenized.tokens {
            self.token(token)?;
        }

        let rewrites = peephole::thread_branches(&mut self.code);
        self.code
            .validate()
            .map_err(|e| CompileError::internal(0, e.to_string()))?;

        debug!(
            records = self.code.len(),
            tokens = tokenized.tokens.len(),
            rewrites,
            consumed = tokenized.end,
            "compiled expression"
        );

        let expr = CompiledExpr {
            source: self.source[..tokenized.end].to_string(),
            line,
            source_id,
            file: file.to_string(),
            code: self.code,
        };
        Ok((Rc::new(expr), tokenized.end))
    }

    fn token(&mut self, token: &Token) -> Result<(), CompileError> {
        let pos = token.start;
        match token.kind {
            TokenKind::Start => {}

            TokenKind::Number => {
                let text = token.text(self.source);
                let Some((value, _)) = self.scanner.scan(text) else {
                    return Err(CompileError::internal(pos, "numeric literal no longer scans"));
                };
                self.emit(Op::PushNumber(value), pos)?;
            }

            TokenKind::StringLiteral => {
                let payload = self.string_payload(token)?;
                self.emit_text(Op::PushString, &payload, pos)?;
            }

            TokenKind::Name => {
                self.emit_text(Op::LookupValue, token.text(self.source), pos)?;
            }

            TokenKind::MemberName => {
                self.emit_text(Op::DerefValue, token.text(self.source), pos)?;
            }

            TokenKind::DollarName => {
                self.emit_text(Op::PushString, token.text(self.source), pos)?;
            }

            TokenKind::Dot => self.reduce(0, false, false)?,

            TokenKind::Dollar => self.push(Entry::Dollar { pos })?,

            TokenKind::UnaryOp | TokenKind::PrefixOp => {
                let op = operator(token)?;
                self.reduce(token.precedence, token.right_assoc, true)?;
                self.push(Entry::Operator {
                    op,
                    pos,
                    branch: None,
                })?;
            }

            TokenKind::PostfixOp => {
                let op = operator(token)?;
                self.pointerize(pos)?;
                self.emit(Op::IncDec(op), pos)?;
            }

            TokenKind::BinaryOp | TokenKind::SubstOperator => self.binary(token)?,

            TokenKind::TernaryOp => self.ternary(token)?,

            TokenKind::AssignOp => {
                let op = token
                    .assign
                    .ok_or_else(|| CompileError::internal(pos, "assignment token without an operator"))?;
                self.reduce_to_lvalue(token.precedence)?;
                self.pointerize(pos)?;
                self.push(Entry::Assign { op, pos })?;
            }

            TokenKind::SubstArgs
            | TokenKind::SubExpr
            | TokenKind::ListLiteral
            | TokenKind::DictLiteral
            | TokenKind::CallArgs
            | TokenKind::Subscript => match token.bracket {
                Some(Bracket::Open) => self.open(token)?,
                Some(Bracket::Close) => self.close(token)?,
                Some(Bracket::SliceSep) => {
                    self.reduce(FLUSH, false, false)?;
                    self.expect_open(TokenKind::Subscript, pos, false)?;
                }
                None => return Err(CompileError::internal(pos, "bracket token without a role")),
            },

            TokenKind::End => self.finish(pos)?,
        }
        Ok(())
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn binary(&mut self, token: &Token) -> Result<(), CompileError> {
        let op = operator(token)?;
        let pos = token.start;
        self.reduce(token.precedence, token.right_assoc, false)?;
        match op {
            // separates collected items; the closing bracket counts them
            Operator::Collect => {}
            Operator::LogicalAnd | Operator::LogicalOr => {
                let branch = Branch::unresolved(false);
                let jump = if op == Operator::LogicalAnd {
                    Op::BranchIfFalse(branch)
                } else {
                    Op::BranchIfTrue(branch)
                };
                let at = self.emit(jump, pos)?;
                self.push(Entry::Operator {
                    op,
                    pos,
                    branch: Some(at),
                })?;
            }
            _ => self.push(Entry::Operator {
                op,
                pos,
                branch: None,
            })?,
        }
        Ok(())
    }

    fn ternary(&mut self, token: &Token) -> Result<(), CompileError> {
        let pos = token.start;
        match operator(token)? {
            Operator::Question => {
                self.reduce(token.precedence, token.right_assoc, false)?;
                let branch = self.emit(Op::BranchIfFalse(Branch::unresolved(true)), pos)?;
                self.push(Entry::Question { pos, branch })?;
            }
            Operator::Colon => {
                self.reduce(FLUSH, false, false)?;
                match self.stack.pop() {
                    Some(Entry::Question { branch, .. }) => {
                        let goto = self.emit(Op::Goto(None), pos)?;
                        self.patch(branch, self.next_position())?;
                        self.push(Entry::Colon { pos, goto })?;
                    }
                    _ => return Err(CompileError::internal(pos, "Could not match : to a ?")),
                }
            }
            // key/value separator inside a dictionary
            Operator::Collect => self.reduce(token.precedence, false, false)?,
            other => {
                return Err(CompileError::internal(
                    pos,
                    format!("{:?} is not a ternary operator", other),
                ));
            }
        }
        Ok(())
    }

    /// Pops and applies every pending entry that binds at least as tightly
    /// as an incoming operator of precedence `incoming`. Stops at barriers.
    fn reduce(&mut self, incoming: u8, right_assoc: bool, prefix: bool) -> Result<(), CompileError> {
        while let Some(entry) = self.stack.last().copied() {
            let Some(mut precedence) = entry.precedence() else {
                break;
            };
            // `x**-1` is `x**(-1)`
            if prefix
                && matches!(
                    entry,
                    Entry::Operator {
                        op: Operator::Power,
                        ..
                    }
                )
            {
                precedence += 1;
            }
            let pops = if right_assoc {
                precedence < incoming
            } else {
                precedence <= incoming
            };
            if !pops {
                break;
            }
            self.stack.pop();
            trace!(?entry, "reduce");
            self.apply(entry)?;
        }
        Ok(())
    }

    fn apply(&mut self, entry: Entry) -> Result<(), CompileError> {
        match entry {
            Entry::Operator { op, pos, branch } => match op {
                // a single, unbracketed substitution value
                Operator::Substitute => {
                    self.emit(Op::Substitute(1), pos)?;
                }
                Operator::PreIncrement | Operator::PreDecrement => {
                    self.pointerize(pos)?;
                    self.emit(Op::IncDec(op), pos)?;
                }
                Operator::LogicalAnd | Operator::LogicalOr => {
                    let branch = branch.ok_or_else(|| {
                        CompileError::internal(pos, "short-circuit operator without a branch")
                    })?;
                    self.emit(Op::MakeBool, pos)?;
                    self.patch(branch, self.next_position())?;
                }
                Operator::Collect => {}
                _ => {
                    self.emit(Op::Operator(op), pos)?;
                }
            },
            Entry::Assign { op, pos } => {
                self.emit(Op::Assign(op), pos)?;
            }
            Entry::Colon { goto, .. } => {
                self.patch(goto, self.next_position())?;
                self.last_emitted = None;
            }
            Entry::Dollar { pos } => {
                self.emit(Op::Dollar, pos)?;
            }
            Entry::Question { pos, .. } | Entry::Bracket { pos, .. } => {
                return Err(CompileError::internal(pos, "reduced past a barrier"));
            }
        }
        Ok(())
    }

    /// Right-associative reduction ahead of an assignment. A pending `:`
    /// stays on the stack, so `a ? b : c = 1` assigns in the else branch.
    fn reduce_to_lvalue(&mut self, incoming: u8) -> Result<(), CompileError> {
        while let Some(entry) = self.stack.last().copied() {
            if matches!(entry, Entry::Colon { .. }) {
                break;
            }
            match entry.precedence() {
                Some(precedence) if precedence < incoming => {}
                _ => break,
            }
            self.stack.pop();
            trace!(?entry, "reduce");
            self.apply(entry)?;
        }
        Ok(())
    }

    /// Rewrites the last access into its assignable form.
    fn pointerize(&mut self, pos: usize) -> Result<(), CompileError> {
        // nothing to rewrite, or a resolved `?:` whose value comes from two places
        let Some(at) = self.last_emitted else {
            return Err(not_an_lvalue(pos));
        };
        let instr = self
            .code
            .instr_mut(at)
            .ok_or_else(|| CompileError::internal(pos, "last instruction is out of range"))?;
        match instr.op.pointer_form() {
            Some(pointer) => {
                trace!(at, from = ?instr.op, "lvalue rewrite");
                instr.op = pointer;
                Ok(())
            }
            None if matches!(instr.op, Op::SliceValue(_)) => Err(CompileError::syntax(
                pos,
                "Syntax Error: Cannot assign to a slice with no lower bound",
            )),
            None => Err(not_an_lvalue(pos)),
        }
    }

    // =========================================================================
    // Brackets
    // =========================================================================

    fn open(&mut self, token: &Token) -> Result<(), CompileError> {
        if matches!(token.kind, TokenKind::CallArgs | TokenKind::Subscript) {
            // `$(1)[0]` indexes the column value
            self.reduce(0, false, false)?;
        }
        self.push(Entry::Bracket {
            kind: token.kind,
            pos: token.start,
        })
    }

    fn close(&mut self, token: &Token) -> Result<(), CompileError> {
        let pos = token.start;
        self.reduce(FLUSH, false, false)?;
        self.expect_open(token.kind, pos, true)?;

        let items = token.items;
        match token.kind {
            TokenKind::SubExpr => {}
            TokenKind::CallArgs => {
                self.emit(Op::Call(items), pos)?;
            }
            TokenKind::ListLiteral => {
                self.emit(Op::MakeList(items), pos)?;
            }
            TokenKind::DictLiteral => {
                self.emit(Op::MakeDict(items), pos)?;
            }
            TokenKind::Subscript => {
                let shape = token
                    .subscript
                    .ok_or_else(|| CompileError::internal(pos, "subscript without a shape"))?;
                self.emit(Op::SliceValue(shape), pos)?;
            }
            TokenKind::SubstArgs => match self.stack.pop() {
                Some(Entry::Operator {
                    op: Operator::Substitute,
                    ..
                }) => {
                    self.emit(Op::Substitute(items), pos)?;
                }
                _ => {
                    return Err(CompileError::internal(
                        pos,
                        "Could not match string substitution ( ) to a %",
                    ));
                }
            },
            other => {
                return Err(CompileError::internal(
                    pos,
                    format!("{:?} does not close a bracket", other),
                ));
            }
        }
        Ok(())
    }

    /// Checks that the top of the stack is the opening bracket of `kind`,
    /// popping it when `pop` is set.
    fn expect_open(&mut self, kind: TokenKind, pos: usize, pop: bool) -> Result<(), CompileError> {
        match self.stack.last().copied() {
            Some(Entry::Bracket { kind: open, .. }) if open == kind => {
                if pop {
                    self.stack.pop();
                }
                Ok(())
            }
            Some(Entry::Question { pos: at, .. }) => Err(unmatched_question(at)),
            _ => {
                let bracket = self.source.get(pos..pos + 1).unwrap_or("?");
                Err(CompileError::internal(
                    pos,
                    format!("Could not match {} to an opening bracket", bracket),
                ))
            }
        }
    }

    fn finish(&mut self, pos: usize) -> Result<(), CompileError> {
        self.reduce(FLUSH, false, false)?;
        match self.stack.last().copied() {
            None => {}
            Some(Entry::Question { pos: at, .. }) => return Err(unmatched_question(at)),
            Some(entry) => {
                return Err(CompileError::internal(
                    entry.pos(),
                    "Unexpected junk left on the operator stack",
                ));
            }
        }
        self.emit(Op::Return, pos)?;
        Ok(())
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn next_position(&self) -> u32 {
        self.code.len() as u32
    }

    fn emit(&mut self, op: Op, pos: usize) -> Result<u32, CompileError> {
        self.reserve(1, pos)?;
        let at = self.next_position();
        trace!(at, ?op, "emit");
        self.code.records.push(Record::Instr(Instr {
            op,
            len: 1,
            pos: pos as u32,
        }));
        self.last_emitted = Some(at);
        Ok(at)
    }

    fn emit_text(&mut self, op: Op, text: &str, pos: usize) -> Result<u32, CompileError> {
        let chunks = text_records(text);
        let len = 1 + chunks.len();
        self.reserve(len, pos)?;
        let at = self.next_position();
        trace!(at, ?op, text, "emit");
        self.code.records.push(Record::Instr(Instr {
            op,
            len: len as u32,
            pos: pos as u32,
        }));
        self.code.records.extend(chunks);
        self.last_emitted = Some(at);
        Ok(at)
    }

    fn reserve(&mut self, records: usize, pos: usize) -> Result<(), CompileError> {
        let limit = self.options.limits.max_records;
        if self.code.len() + records > limit {
            return Err(CompileError::Overflow {
                offset: pos,
                what: "bytecode length",
                limit,
            });
        }
        self.code
            .records
            .try_reserve(records)
            .map_err(|_| CompileError::OutOfMemory { offset: pos })
    }

    fn push(&mut self, entry: Entry) -> Result<(), CompileError> {
        let limit = self.options.limits.max_stack_depth;
        if self.stack.len() >= limit {
            return Err(CompileError::Overflow {
                offset: entry.pos(),
                what: "operator stack depth",
                limit,
            });
        }
        self.stack
            .try_reserve(1)
            .map_err(|_| CompileError::OutOfMemory { offset: entry.pos() })?;
        self.stack.push(entry);
        Ok(())
    }

    /// Back-patches the branch at `at` to jump to `to`.
    fn patch(&mut self, at: u32, to: u32) -> Result<(), CompileError> {
        let instr = self
            .code
            .instr_mut(at)
            .ok_or_else(|| CompileError::internal(0, format!("no instruction at {} to patch", at)))?;
        if !instr.op.set_target(to) {
            return Err(CompileError::internal(
                instr.pos as usize,
                format!("{:?} is not a branch", instr.op),
            ));
        }
        trace!(at, to, "patched branch");
        Ok(())
    }

    /// Text records end at the first NUL, so a payload may not contain one.
    fn string_payload(&self, token: &Token) -> Result<String, CompileError> {
        let text = token.text(self.source);
        let payload = if token.verbatim {
            text.to_string()
        } else {
            match strings::scan_literal(text) {
                Ok(Some(lit)) => strings::decode_literal(text, &lit),
                _ => return Err(CompileError::internal(token.start, "string literal no longer scans")),
            }
        };
        if let Some(nul) = text.find('\0') {
            return Err(CompileError::syntax(
                token.start + nul,
                "Syntax Error: Strings may not contain NUL characters",
            ));
        }
        Ok(payload)
    }
}

fn operator(token: &Token) -> Result<Operator, CompileError> {
    token
        .operator
        .ok_or_else(|| CompileError::internal(token.start, "operator token without an operator"))
}

fn not_an_lvalue(pos: usize) -> CompileError {
    CompileError::syntax(
        pos,
        "Syntax Error: Can only assign to a variable, a member or an element",
    )
}

fn unmatched_question(pos: usize) -> CompileError {
    CompileError::syntax(pos, "Syntax Error: No : to match with ?")
}
