use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use crate::bytecode::ir::{Bytecode, CompiledExpr, Instr};
use crate::bytecode::op::{Branch, Op};
use crate::frontend::token::{Operator, Subscript};

/// Print disassembly of a compiled expression
pub fn print_bc(expr: &CompiledExpr) {
    println!("════════════════════════════════════════");
    println!(" {}:{}  {}", expr.file, expr.line, expr.source.trim_end());
    println!(
        " {} instructions, {} records",
        expr.code.instructions().count(),
        expr.code.len()
    );
    println!("════════════════════════════════════════");
    print!("{}", disassemble_to_string(&expr.code));
    println!();
}

fn collect_jump_targets(code: &Bytecode) -> BTreeSet<u32> {
    code.instructions()
        .filter_map(|(_, instr)| instr.op.target())
        .collect()
}

// =============================================================================
// String output (for testing/logging)
// =============================================================================

/// Return disassembly as a String. Positions are record indices, so text
/// payloads show up as gaps in the numbering.
pub fn disassemble_to_string(code: &Bytecode) -> String {
    let mut output = String::new();
    let jump_targets = collect_jump_targets(code);

    for (at, instr) in code.instructions() {
        if jump_targets.contains(&at) {
            output.push_str("      ┌──────────────────────────────────\n");
        }

        let _ = write!(output, "{:04} ", at);
        output.push_str(if jump_targets.contains(&at) { "► " } else { "  " });

        let line = format_instr(code, at, instr);
        let (pops, pushes) = instr.op.stack_effect();
        let _ = writeln!(output, "{:<32}; {}", line, stack_picture(pops, pushes));
    }

    output
}

fn format_instr(code: &Bytecode, at: u32, instr: &Instr) -> String {
    let name = instr.op.opcode().mnemonic();
    let operand = match &instr.op {
        Op::PushNumber(v) => format!("{:?}", v),
        op if op.has_text() => match code.text_at(at) {
            Some(text) => format!("{:?}", text),
            None => "<bad text>".to_string(),
        },
        Op::SliceValue(s) | Op::SlicePointer(s) => format_subscript(*s).to_string(),
        Op::MakeDict(n) | Op::MakeList(n) | Op::Call(n) | Op::Substitute(n) => n.to_string(),
        Op::Operator(op) => format!("{:<3} (0x{:02X})", op.symbol(), op.code()),
        Op::Assign(op) => format!("{:<3} (0x{:02X})", op.symbol(), op.code()),
        Op::IncDec(op) => match op {
            Operator::PreIncrement | Operator::PreDecrement => format!("{}x", op.symbol()),
            _ => format!("x{}", op.symbol()),
        },
        Op::BranchIfFalse(b) | Op::BranchIfTrue(b) => format_branch(b),
        Op::Goto(target) => format_target(*target),
        _ => String::new(),
    };
    if operand.is_empty() {
        name.to_string()
    } else {
        format!("{:<12} {}", name, operand)
    }
}

fn format_subscript(s: Subscript) -> &'static str {
    match s {
        Subscript::Index => "[i]",
        Subscript::Slice { min: true, max: true } => "[lo:hi]",
        Subscript::Slice { min: true, max: false } => "[lo:]",
        Subscript::Slice { min: false, max: true } => "[:hi]",
        Subscript::Slice { min: false, max: false } => "[:]",
    }
}

fn format_branch(b: &Branch) -> String {
    let target = format_target(b.target);
    if b.pop_on_branch {
        format!("{} pop", target)
    } else {
        target
    }
}

fn format_target(target: Option<u32>) -> String {
    match target {
        Some(t) => format!("→ {:04}", t),
        None => "→ ????".to_string(),
    }
}

/// `( a b -- x )` for an instruction popping two values and pushing one.
fn stack_picture(pops: u32, pushes: u32) -> String {
    let inputs = if pops <= 4 {
        ["a", "b", "c", "d"][..pops as usize].join(" ")
    } else {
        format!("a1..a{}", pops)
    };
    let outputs = if pushes == 1 { "x" } else { "" };
    let mut picture = String::from("(");
    if !inputs.is_empty() {
        picture.push(' ');
        picture.push_str(&inputs);
    }
    picture.push_str(" --");
    if !outputs.is_empty() {
        picture.push(' ');
        picture.push_str(outputs);
    }
    picture.push_str(" )");
    picture
}

// =============================================================================
// Compact mode
// =============================================================================

/// Print compact disassembly (no stack comments)
pub fn print_bc_compact(expr: &CompiledExpr) {
    print!("{}", compact_to_string(&expr.code));
}

pub fn compact_to_string(code: &Bytecode) -> String {
    let mut output = format!("-- {} records --\n", code.len());
    for (at, instr) in code.instructions() {
        let _ = writeln!(output, "  {:04}  {:?}", at, instr.op);
    }
    output
}

// =============================================================================
// Statistics
// =============================================================================

/// Print bytecode statistics
pub fn print_bc_stats(expr: &CompiledExpr) {
    println!("=== BYTECODE STATISTICS ===\n");

    let instructions = expr.code.instructions().count();
    let records = expr.code.len();
    let text = records - instructions;

    println!("Source bytes:     {}", expr.source.len());
    println!("Instructions:     {}", instructions);
    println!("Text records:     {}", text);
    println!("Total records:    {}", records);
    println!();

    println!("Op frequency:");
    let op_counts = count_ops(&expr.code);
    let mut counts: Vec<_> = op_counts.iter().collect();
    counts.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

    for (op, count) in counts.iter().take(10) {
        let pct = (**count as f64 / instructions.max(1) as f64) * 100.0;
        println!("  {:<14} {:>4} ({:>5.1}%)", op, count, pct);
    }
}

/// Mnemonic frequencies, walking the stream by `len` alone.
fn count_ops(code: &Bytecode) -> HashMap<&'static str, usize> {
    let mut counts = HashMap::new();
    for (_, instr) in code.instructions() {
        *counts.entry(instr.op.opcode().mnemonic()).or_insert(0) += 1;
    }
    counts
}
