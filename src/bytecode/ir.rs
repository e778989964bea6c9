use std::collections::HashSet;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bytecode::op::{BYTECODE_VERSION, Op};

/// Payload bytes carried by one text record.
pub const TEXT_CHUNK: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("bytecode version {found} is not supported (expected {expected})")]
    Version { found: u16, expected: u16 },
    #[error("malformed bytecode at record {at}: {reason}")]
    Malformed { at: u32, reason: String },
    #[error("postcard: {0}")]
    Postcard(#[from] postcard::Error),
}

impl DecodeError {
    fn malformed(at: u32, reason: impl Into<String>) -> Self {
        DecodeError::Malformed {
            at,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// Header of one logical instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    pub op: Op,
    /// Records spanned by this instruction, header included.
    pub len: u32,
    /// Source byte offset, for runtime diagnostics.
    pub pos: u32,
}

/// Fixed-size unit of the instruction stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Instr(Instr),
    /// Part of a NUL-terminated payload following an instruction header.
    Text([u8; TEXT_CHUNK]),
}

/// Splits `text` into NUL-terminated chunks.
pub fn text_records(text: &str) -> Vec<Record> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    bytes
        .chunks(TEXT_CHUNK)
        .map(|chunk| {
            let mut buf = [0u8; TEXT_CHUNK];
            buf[..chunk.len()].copy_from_slice(chunk);
            Record::Text(buf)
        })
        .collect()
}

// =============================================================================
// Bytecode
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bytecode {
    pub records: Vec<Record>,
}

impl Bytecode {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn instr(&self, at: u32) -> Option<&Instr> {
        match self.records.get(at as usize) {
            Some(Record::Instr(instr)) => Some(instr),
            _ => None,
        }
    }

    pub fn instr_mut(&mut self, at: u32) -> Option<&mut Instr> {
        match self.records.get_mut(at as usize) {
            Some(Record::Instr(instr)) => Some(instr),
            _ => None,
        }
    }

    /// Walks the stream using only the `len` fields. Stops early if the
    /// stream is malformed; call [`Bytecode::validate`] to find out why.
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions { code: self, at: 0 }
    }

    /// Decodes the payload of the instruction at `at`.
    pub fn text_at(&self, at: u32) -> Option<String> {
        let instr = self.instr(at)?;
        let start = at as usize + 1;
        let end = at as usize + instr.len as usize;
        let mut bytes = Vec::new();
        for record in self.records.get(start..end)? {
            let Record::Text(chunk) = record else {
                return None;
            };
            match chunk.iter().position(|b| *b == 0) {
                Some(nul) => {
                    bytes.extend_from_slice(&chunk[..nul]);
                    return String::from_utf8(bytes).ok();
                }
                None => bytes.extend_from_slice(chunk),
            }
        }
        None
    }

    /// Checks that the stream is walkable, every payload is terminated,
    /// every branch lands on an instruction, and the last one returns.
    pub fn validate(&self) -> Result<(), DecodeError> {
        let total = self.records.len() as u32;
        let mut starts = HashSet::new();
        let mut branches = Vec::new();
        let mut last = None;

        let mut at = 0u32;
        while at < total {
            let Some(instr) = self.instr(at) else {
                return Err(DecodeError::malformed(at, "expected an instruction header"));
            };
            if instr.len == 0 || at + instr.len > total {
                return Err(DecodeError::malformed(
                    at,
                    format!("length {} overruns the stream", instr.len),
                ));
            }
            if instr.op.has_text() {
                if self.text_at(at).is_none() {
                    return Err(DecodeError::malformed(at, "unterminated text payload"));
                }
            } else if instr.len != 1 {
                return Err(DecodeError::malformed(
                    at,
                    format!("{:?} has no payload but spans {} records", instr.op, instr.len),
                ));
            }
            if instr.op.is_branch() {
                match instr.op.target() {
                    Some(target) => branches.push((at, target)),
                    None => return Err(DecodeError::malformed(at, "unresolved branch")),
                }
            }
            starts.insert(at);
            last = Some(&instr.op);
            at += instr.len;
        }

        for (at, target) in branches {
            if !starts.contains(&target) {
                return Err(DecodeError::malformed(
                    at,
                    format!("branch target {} is not an instruction", target),
                ));
            }
        }
        match last {
            Some(Op::Return) => Ok(()),
            _ => Err(DecodeError::malformed(total, "missing final return")),
        }
    }
}

pub struct Instructions<'a> {
    code: &'a Bytecode,
    at: u32,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = (u32, &'a Instr);

    fn next(&mut self) -> Option<Self::Item> {
        let at = self.at;
        let instr = self.code.instr(at)?;
        if instr.len == 0 {
            return None;
        }
        self.at = at + instr.len;
        Some((at, instr))
    }
}

// =============================================================================
// Compiled expression
// =============================================================================

/// The artifact handed to the evaluator. Immutable once built; share it as
/// `Rc<CompiledExpr>` and use [`CompiledExpr::deep_copy`] for a private copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledExpr {
    /// The compiled text, for diagnostics.
    pub source: String,
    pub line: u32,
    /// Opaque id scoping per-invocation scratch state.
    pub source_id: u64,
    pub file: String,
    pub code: Bytecode,
}

impl CompiledExpr {
    /// A new, unshared expression with its own copy of the bytecode.
    pub fn deep_copy(self: &Rc<Self>) -> Rc<Self> {
        Rc::new(CompiledExpr::clone(self))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(postcard::to_allocvec(&(BYTECODE_VERSION, self))?)
    }

    /// Decodes and validates an expression written by [`CompiledExpr::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (version, expr): (u16, CompiledExpr) = postcard::from_bytes(bytes)?;
        if version != BYTECODE_VERSION {
            warn!(found = version, "rejecting bytecode from another version");
            return Err(DecodeError::Version {
                found: version,
                expected: BYTECODE_VERSION,
            });
        }
        if let Err(e) = expr.code.validate() {
            warn!(error = %e, "rejecting malformed bytecode");
            return Err(e);
        }
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::Branch;
    use pretty_assertions::assert_eq;

    fn instr(op: Op, len: u32) -> Record {
        Record::Instr(Instr { op, len, pos: 0 })
    }

    fn with_text(op: Op, text: &str) -> Vec<Record> {
        let chunks = text_records(text);
        let mut out = vec![instr(op, 1 + chunks.len() as u32)];
        out.extend(chunks);
        out
    }

    fn expr(records: Vec<Record>) -> CompiledExpr {
        CompiledExpr {
            source: "x".to_string(),
            line: 1,
            source_id: 0,
            file: "test".to_string(),
            code: Bytecode { records },
        }
    }

    #[test]
    fn test_text_records_are_terminated() {
        assert_eq!(text_records("").len(), 1);
        assert_eq!(text_records("1234567").len(), 1);
        // eight bytes plus the NUL spill into a second chunk
        assert_eq!(text_records("12345678").len(), 2);
    }

    #[test]
    fn test_text_round_trip() {
        let mut records = with_text(Op::LookupValue, "a_long_variable_name");
        records.push(instr(Op::Return, 1));
        let code = Bytecode { records };
        assert_eq!(code.text_at(0).as_deref(), Some("a_long_variable_name"));
        assert!(code.validate().is_ok());
    }

    #[test]
    fn test_walk_uses_lengths() {
        let mut records = with_text(Op::PushString, "hello world");
        records.push(instr(Op::Return, 1));
        let code = Bytecode { records };
        let starts: Vec<u32> = code.instructions().map(|(at, _)| at).collect();
        assert_eq!(starts, vec![0, 3]);
    }

    #[test]
    fn test_validate_missing_return() {
        let code = Bytecode {
            records: vec![instr(Op::PushNumber(1.0), 1)],
        };
        assert!(matches!(code.validate(), Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_validate_unresolved_branch() {
        let code = Bytecode {
            records: vec![
                instr(Op::PushNumber(1.0), 1),
                instr(Op::Goto(None), 1),
                instr(Op::Return, 1),
            ],
        };
        let err = code.validate().unwrap_err();
        assert!(err.to_string().contains("unresolved"), "msg was: {}", err);
    }

    #[test]
    fn test_validate_branch_into_payload() {
        let mut records = vec![
            instr(Op::PushNumber(1.0), 1),
            instr(Op::BranchIfTrue(Branch { target: Some(3), pop_on_branch: false }), 1),
        ];
        records.extend(with_text(Op::PushString, "abc"));
        records.push(instr(Op::Return, 1));
        let err = Bytecode { records }.validate().unwrap_err();
        assert!(err.to_string().contains("not an instruction"), "msg was: {}", err);
    }

    #[test]
    fn test_validate_overrun() {
        let code = Bytecode {
            records: vec![instr(Op::LookupValue, 4)],
        };
        assert!(code.validate().is_err());
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut records = with_text(Op::LookupValue, "x");
        records.push(instr(Op::Return, 1));
        let expected = expr(records);
        let bytes = expected.to_bytes().unwrap();
        let decoded = CompiledExpr::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_from_bytes_rejects_other_version() {
        let expected = expr(vec![instr(Op::PushNumber(2.0), 1), instr(Op::Return, 1)]);
        let bytes = postcard::to_allocvec(&(BYTECODE_VERSION + 1, &expected)).unwrap();
        assert!(matches!(
            CompiledExpr::from_bytes(&bytes),
            Err(DecodeError::Version { .. })
        ));
    }

    #[test]
    fn test_deep_copy_is_unshared() {
        let shared = Rc::new(expr(vec![instr(Op::Return, 1)]));
        let alias = Rc::clone(&shared);
        let copy = shared.deep_copy();
        assert_eq!(Rc::strong_count(&shared), 2);
        assert_eq!(Rc::strong_count(&copy), 1);
        assert_eq!(*copy, *alias);
    }
}
