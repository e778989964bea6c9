use tracing::trace;

use crate::bytecode::ir::Bytecode;
use crate::bytecode::op::Op;

/// Redirects every branch that lands on another jump straight to that
/// jump's destination, repeating until nothing changes. Returns the number
/// of targets rewritten.
///
/// Branch targets only ever point forward, so each rewrite strictly
/// increases a target and the loop terminates.
pub fn thread_branches(code: &mut Bytecode) -> usize {
    let mut rewrites = 0;
    loop {
        let mut changed = false;
        let starts: Vec<u32> = code.instructions().map(|(at, _)| at).collect();
        for at in starts {
            let Some(jump) = code.instr(at).map(|i| i.op.clone()) else {
                continue;
            };
            let Some(target) = jump.target() else {
                continue;
            };
            let Some(landing) = code.instr(target).map(|i| &i.op) else {
                continue;
            };
            let Some(next) = threaded_target(&jump, landing) else {
                continue;
            };
            if next == target || next == at {
                continue;
            }
            if let Some(instr) = code.instr_mut(at) {
                instr.op.set_target(next);
                trace!(at, from = target, to = next, "threaded branch");
                rewrites += 1;
                changed = true;
            }
        }
        if !changed {
            return rewrites;
        }
    }
}

/// Where `jump` may go instead of `landing`, if anywhere.
fn threaded_target(jump: &Op, landing: &Op) -> Option<u32> {
    match (jump, landing) {
        // an unconditional jump has no effect on the stack
        (_, Op::Goto(target)) => *target,
        // the same condition is re-tested, still on the stack, with the same
        // outcome
        (Op::BranchIfFalse(a), Op::BranchIfFalse(b)) | (Op::BranchIfTrue(a), Op::BranchIfTrue(b))
            if !a.pop_on_branch && !b.pop_on_branch =>
        {
            b.target
        }
        _ => None,
    }
}
