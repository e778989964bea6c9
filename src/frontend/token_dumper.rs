use std::fmt::Write as _;

use crate::frontend::token::{Bracket, Token, TokenKind};

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints the source text and the interesting fields
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, source: &str, tokens: &[Token]) {
        print!("{}", self.dump_to_string(source, tokens));
    }

    pub fn dump_to_string(&self, source: &str, tokens: &[Token]) -> String {
        let mut out = String::new();
        for t in tokens {
            self.print_one(&mut out, source, t);
        }
        out
    }

    fn print_one(&self, out: &mut String, source: &str, t: &Token) {
        let (line, col) = line_col(source, t.start);

        let kind = self.kind(t);
        let colr = if self.color { self.color(t) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        let _ = if self.show_debug_repr {
            writeln!(
                out,
                "[{:02}:{:02}] {}{:<8} {:?}{}",
                line, col, colr, kind, t, reset
            )
        } else {
            writeln!(
                out,
                "[{:02}:{:02}] {}{:<8} {}{}",
                line,
                col,
                colr,
                kind,
                describe(source, t),
                reset
            )
        };
    }

    fn kind(&self, t: &Token) -> &'static str {
        use TokenKind::*;
        match t.kind {
            Start | End => "END",
            StringLiteral | Number => "LITERAL",
            Name | MemberName | DollarName => "NAME",
            Dollar | Dot => "ACCESS",
            SubstOperator | PostfixOp | PrefixOp | UnaryOp | BinaryOp | TernaryOp => "OP",
            AssignOp => "ASSIGN",
            _ => "BRACKET",
        }
    }

    fn color(&self, t: &Token) -> &'static str {
        use TokenKind::*;
        match t.kind {
            Start | End => Self::DIM,
            StringLiteral => Self::GRN,
            Number => Self::CYN,
            Name | MemberName | DollarName => Self::YEL,
            SubstOperator | PostfixOp | PrefixOp | UnaryOp | BinaryOp | TernaryOp | AssignOp => {
                Self::MAG
            }
            _ => Self::RESET,
        }
    }
}

/// One letter per source byte naming the state of the token covering it
/// (see [`TokenKind::letter`]); whitespace between tokens is a space.
pub fn state_string(source: &str, tokens: &[Token]) -> String {
    let mut states = vec![b' '; source.len()];
    for t in tokens {
        let end = (t.start + t.len).min(states.len());
        for b in states.get_mut(t.start..end).into_iter().flatten() {
            *b = t.kind.letter() as u8;
        }
    }
    String::from_utf8(states).unwrap_or_default()
}

/// One-based line and column of a byte offset.
fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let col = before.rfind('\n').map_or(before.len(), |nl| before.len() - nl - 1) + 1;
    (line, col)
}

fn describe(source: &str, t: &Token) -> String {
    let mut s = format!("{:?}", t.kind);
    let text = t.text(source);
    if !text.is_empty() {
        let _ = write!(s, " {:?}", text);
    }
    if let Some(op) = t.operator {
        let _ = write!(s, " op={:?} prec={}", op, t.precedence);
    }
    if let Some(op) = t.assign {
        let _ = write!(s, " assign={:?}", op);
    }
    match t.bracket {
        Some(Bracket::Close) => {
            let _ = write!(s, " close items={}", t.items);
        }
        Some(Bracket::Open) => s.push_str(" open"),
        Some(Bracket::SliceSep) => s.push_str(" slice"),
        None => {}
    }
    if let Some(sub) = t.subscript {
        let _ = write!(s, " {:?}", sub);
    }
    if t.verbatim {
        s.push_str(" verbatim");
    }
    s
}
