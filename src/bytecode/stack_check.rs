use std::collections::HashMap;

use crate::bytecode::ir::Bytecode;
use crate::bytecode::op::Op;

#[derive(Debug, thiserror::Error)]
#[error("stack-check error: {message}")]
pub struct StackCheckError {
    pub at: u32,
    pub message: String,
}

impl StackCheckError {
    fn new(at: u32, message: impl Into<String>) -> Self {
        Self {
            at,
            message: message.into(),
        }
    }
}

/// Checks that evaluating `code` never pops an empty stack, that every
/// path into an instruction arrives with the same depth, and that the
/// final `Return` sees exactly one value. Returns the deepest the stack
/// gets.
///
/// Branches only jump forward, so one pass in stream order sees every
/// incoming edge before the instruction it lands on.
pub fn check(code: &Bytecode) -> Result<u32, StackCheckError> {
    let mut incoming: HashMap<u32, u32> = HashMap::new();
    let mut depth: Option<u32> = Some(0);
    let mut deepest = 0;

    for (at, instr) in code.instructions() {
        if let Some(&arrived) = incoming.get(&at) {
            match depth {
                Some(d) if d != arrived => {
                    return Err(StackCheckError::new(
                        at,
                        format!("paths join at {} with depths {} and {}", at, d, arrived),
                    ));
                }
                _ => depth = Some(arrived),
            }
        }
        // only reachable by a jump that has not been seen
        let Some(d) = depth else {
            continue;
        };

        let (pops, pushes) = instr.op.stack_effect();
        if d < pops {
            return Err(StackCheckError::new(
                at,
                format!("stack underflow at {}, op={:?}, needed {} items", at, instr.op, pops),
            ));
        }

        depth = match &instr.op {
            Op::Return => {
                if d != 1 {
                    return Err(StackCheckError::new(
                        at,
                        format!("return at {} with {} values on the stack", at, d),
                    ));
                }
                None
            }
            Op::Goto(_) => {
                join(&mut incoming, at, instr.op.target(), d)?;
                None
            }
            Op::BranchIfFalse(b) | Op::BranchIfTrue(b) => {
                let taken = if b.pop_on_branch { d - 1 } else { d };
                join(&mut incoming, at, b.target, taken)?;
                Some(d - 1)
            }
            _ => Some(d - pops + pushes),
        };
        deepest = deepest.max(depth.unwrap_or(0));
    }

    if depth.is_some() {
        return Err(StackCheckError::new(
            code.len() as u32,
            "falls off the end without returning",
        ));
    }
    Ok(deepest)
}

fn join(
    incoming: &mut HashMap<u32, u32>,
    at: u32,
    target: Option<u32>,
    depth: u32,
) -> Result<(), StackCheckError> {
    let Some(target) = target else {
        return Err(StackCheckError::new(at, format!("unresolved branch at {}", at)));
    };
    if target <= at {
        return Err(StackCheckError::new(
            at,
            format!("branch at {} jumps backward to {}", at, target),
        ));
    }
    match incoming.get(&target) {
        Some(&seen) if seen != depth => Err(StackCheckError::new(
            at,
            format!(
                "branch at {} reaches {} with depth {}, another path has {}",
                at, target, depth, seen
            ),
        )),
        _ => {
            incoming.insert(target, depth);
            Ok(())
        }
    }
}
