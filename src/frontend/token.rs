use std::ops::Range;

use serde::{Deserialize, Serialize};

// =============================================================================
// TOKEN KIND - the tokenizer's abstract states
// =============================================================================

/// Lexical role of a token. Each variant is also a tokenizer state: after a
/// token of kind `K` has been scanned, only `K.successors()` may follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Start,
    StringLiteral,
    SubstOperator,
    SubstArgs,
    SubExpr,
    PostfixOp,
    Name,
    PrefixOp,
    UnaryOp,
    BinaryOp,
    TernaryOp,
    Number,
    ListLiteral,
    DictLiteral,
    Dollar,
    CallArgs,
    Subscript,
    Dot,
    AssignOp,
    MemberName,
    End,
    DollarName,
}

impl TokenKind {
    /// Ordered candidates for the token that may follow this one.
    pub fn successors(self) -> &'static [TokenKind] {
        use TokenKind::*;
        const VALUE: &[TokenKind] = &[
            StringLiteral,
            SubExpr,
            Name,
            PrefixOp,
            UnaryOp,
            Number,
            ListLiteral,
            DictLiteral,
            Dollar,
        ];
        match self {
            Start | BinaryOp | TernaryOp | AssignOp => VALUE,
            StringLiteral => &[SubstOperator, BinaryOp, TernaryOp, Subscript, End],
            SubstOperator => &[
                StringLiteral,
                SubstArgs,
                Name,
                PrefixOp,
                UnaryOp,
                Number,
                ListLiteral,
                DictLiteral,
                Dollar,
            ],
            SubstArgs => &[BinaryOp, TernaryOp, Subscript, End],
            SubExpr | ListLiteral | DictLiteral => &[BinaryOp, TernaryOp, Subscript, Dot, End],
            PostfixOp | Number | DollarName => &[BinaryOp, TernaryOp, End],
            Name | MemberName => &[
                PostfixOp, BinaryOp, TernaryOp, CallArgs, Subscript, Dot, AssignOp, End,
            ],
            PrefixOp => &[Name],
            UnaryOp => &[
                StringLiteral,
                SubExpr,
                Name,
                PrefixOp,
                Number,
                ListLiteral,
                DictLiteral,
                Dollar,
            ],
            Dollar => &[SubExpr, Number, DollarName],
            CallArgs => &[BinaryOp, TernaryOp, CallArgs, Subscript, Dot, End],
            Subscript => &[BinaryOp, TernaryOp, CallArgs, Subscript, AssignOp, End],
            Dot => &[MemberName],
            End => &[],
        }
    }

    /// Phrase used when listing what the tokenizer would have accepted.
    pub fn phrase(self) -> &'static str {
        use TokenKind::*;
        match self {
            StringLiteral | Number | ListLiteral | DictLiteral | Dollar => "a literal value",
            SubstOperator => "a string substitution operator",
            SubstArgs => "a list of string substitutions",
            SubExpr => "a bracketed expression",
            PostfixOp | PrefixOp | UnaryOp => "a unary operator",
            Name | MemberName | DollarName => "a variable name",
            BinaryOp | TernaryOp | AssignOp => "a binary/ternary operator",
            CallArgs => "a list of function arguments",
            Subscript | Dot => "an object dereference",
            Start | End => "the end of the expression",
        }
    }

    /// Single-letter tag, handy in compact dumps.
    pub fn letter(self) -> char {
        (b'A' + self as u8) as char
    }
}

// =============================================================================
// OPERATORS
// =============================================================================

/// Every operator the tokenizer can classify, excluding assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Negate,
    UnaryPlus,
    BitNot,
    Not,
    PostDecrement,
    PostIncrement,
    PreDecrement,
    PreIncrement,
    Power,
    Multiply,
    Divide,
    Modulo,
    Add,
    Subtract,
    ShiftLeft,
    ShiftRight,
    Less,
    LessEqual,
    GreaterEqual,
    Greater,
    Equal,
    NotEqual,
    BitAnd,
    BitXor,
    BitOr,
    LogicalAnd,
    LogicalOr,
    /// Comma that evaluates both sides and keeps the right one.
    Sequence,
    /// Comma that separates collected items; emits nothing.
    Collect,
    Question,
    Colon,
    /// `%` applied to a string literal.
    Substitute,
}

impl Operator {
    /// Evaluator operator id. Stable across bytecode versions.
    pub fn code(self) -> u8 {
        use Operator::*;
        match self {
            PostDecrement => 0x21,
            PostIncrement => 0x22,
            PreDecrement => 0x23,
            PreIncrement => 0x24,
            Negate => 0x25,
            UnaryPlus => 0x26,
            BitNot => 0x27,
            Not => 0x28,
            Substitute => 0x40,
            Power => 0x49,
            Multiply => 0x4A,
            Divide => 0x4B,
            Modulo => 0x4C,
            Add => 0x4D,
            Subtract => 0x4E,
            ShiftLeft => 0x4F,
            ShiftRight => 0x50,
            Less => 0x51,
            LessEqual => 0x52,
            GreaterEqual => 0x53,
            Greater => 0x54,
            Equal => 0x55,
            NotEqual => 0x56,
            BitAnd => 0x57,
            BitXor => 0x58,
            BitOr => 0x59,
            LogicalAnd => 0x5A,
            LogicalOr => 0x5B,
            Sequence => 0x5C,
            Collect => 0x5F,
            Question => 0x7D,
            Colon => 0x7E,
        }
    }

    /// Binding strength; lower binds tighter.
    pub fn precedence(self) -> u8 {
        use Operator::*;
        match self {
            Power => 2,
            Negate | UnaryPlus | BitNot | Not => 3,
            PostDecrement | PostIncrement | PreDecrement | PreIncrement => 3,
            Substitute => 4,
            Multiply | Divide | Modulo => 5,
            Add | Subtract => 6,
            ShiftLeft | ShiftRight => 7,
            Less | LessEqual | GreaterEqual | Greater => 8,
            Equal => 9,
            NotEqual => 10,
            BitAnd => 11,
            BitXor => 12,
            BitOr => 13,
            LogicalAnd => 14,
            LogicalOr => 15,
            Question | Colon => 16,
            Sequence | Collect => 18,
        }
    }

    pub fn right_assoc(self) -> bool {
        use Operator::*;
        matches!(
            self,
            Power
                | Negate
                | UnaryPlus
                | BitNot
                | Not
                | PostDecrement
                | PostIncrement
                | PreDecrement
                | PreIncrement
                | Question
                | Colon
        )
    }

    /// Number of operands the evaluator pops.
    pub fn arity(self) -> u8 {
        use Operator::*;
        match self {
            Negate | UnaryPlus | BitNot | Not => 1,
            PostDecrement | PostIncrement | PreDecrement | PreIncrement => 1,
            Collect => 0,
            _ => 2,
        }
    }

    pub fn symbol(self) -> &'static str {
        use Operator::*;
        match self {
            Negate | Subtract => "-",
            UnaryPlus | Add => "+",
            BitNot => "~",
            Not => "!",
            PostDecrement | PreDecrement => "--",
            PostIncrement | PreIncrement => "++",
            Power => "**",
            Multiply => "*",
            Divide => "/",
            Modulo | Substitute => "%",
            ShiftLeft => "<<",
            ShiftRight => ">>",
            Less => "<",
            LessEqual => "<=",
            GreaterEqual => ">=",
            Greater => ">",
            Equal => "==",
            NotEqual => "!=",
            BitAnd => "&",
            BitXor => "^",
            BitOr => "|",
            LogicalAnd => "&&",
            LogicalOr => "||",
            Sequence | Collect => ",",
            Question => "?",
            Colon => ":",
        }
    }
}

/// Spellings tried in a value-expected state, longest first.
pub const UNARY_SPELLINGS: &[(&str, Operator)] = &[
    ("not", Operator::Not),
    ("NOT", Operator::Not),
    ("-", Operator::Negate),
    ("+", Operator::UnaryPlus),
    ("~", Operator::BitNot),
    ("!", Operator::Not),
];

/// Binary spellings, longest first so `**` wins over `*` and `<=` over `<`.
pub const BINARY_SPELLINGS: &[(&str, Operator)] = &[
    ("and", Operator::LogicalAnd),
    ("AND", Operator::LogicalAnd),
    ("or", Operator::LogicalOr),
    ("OR", Operator::LogicalOr),
    ("**", Operator::Power),
    ("<<", Operator::ShiftLeft),
    (">>", Operator::ShiftRight),
    ("<=", Operator::LessEqual),
    (">=", Operator::GreaterEqual),
    ("==", Operator::Equal),
    ("<>", Operator::NotEqual),
    ("!=", Operator::NotEqual),
    ("&&", Operator::LogicalAnd),
    ("||", Operator::LogicalOr),
    ("*", Operator::Multiply),
    ("/", Operator::Divide),
    ("%", Operator::Modulo),
    ("+", Operator::Add),
    ("-", Operator::Subtract),
    ("<", Operator::Less),
    (">", Operator::Greater),
    ("&", Operator::BitAnd),
    ("^", Operator::BitXor),
    ("|", Operator::BitOr),
];

// =============================================================================
// ASSIGNMENT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    AndAssign,
    XorAssign,
    OrAssign,
    ShlAssign,
    ShrAssign,
    PowAssign,
}

pub const ASSIGN_PRECEDENCE: u8 = 17;

impl AssignOp {
    pub fn code(self) -> u8 {
        0x40 + self as u8
    }

    pub fn symbol(self) -> &'static str {
        use AssignOp::*;
        match self {
            Assign => "=",
            AddAssign => "+=",
            SubAssign => "-=",
            MulAssign => "*=",
            DivAssign => "/=",
            ModAssign => "%=",
            AndAssign => "&=",
            XorAssign => "^=",
            OrAssign => "|=",
            ShlAssign => "<<=",
            ShrAssign => ">>=",
            PowAssign => "**=",
        }
    }
}

pub const ASSIGN_SPELLINGS: &[(&str, AssignOp)] = &[
    ("<<=", AssignOp::ShlAssign),
    (">>=", AssignOp::ShrAssign),
    ("**=", AssignOp::PowAssign),
    ("+=", AssignOp::AddAssign),
    ("-=", AssignOp::SubAssign),
    ("*=", AssignOp::MulAssign),
    ("/=", AssignOp::DivAssign),
    ("%=", AssignOp::ModAssign),
    ("&=", AssignOp::AndAssign),
    ("^=", AssignOp::XorAssign),
    ("|=", AssignOp::OrAssign),
    ("=", AssignOp::Assign),
];

// =============================================================================
// BRACKETS AND SUBSCRIPTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    Open,
    Close,
    /// The `:` between the bounds of a slice.
    SliceSep,
}

/// Shape of an `[...]` dereference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subscript {
    Index,
    Slice { min: bool, max: bool },
}

impl Subscript {
    /// Values the evaluator pops for this subscript.
    pub fn operands(self) -> u32 {
        match self {
            Subscript::Index => 1,
            Subscript::Slice { min, max } => min as u32 + max as u32,
        }
    }

    /// A slice with only an upper bound has no assignable form.
    pub fn has_pointer_form(self) -> bool {
        !matches!(self, Subscript::Slice { min: false, max: true })
    }
}

// =============================================================================
// TOKEN
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset into the text handed to the outermost tokenize call.
    pub start: usize,
    pub len: usize,
    pub operator: Option<Operator>,
    pub assign: Option<AssignOp>,
    pub precedence: u8,
    pub right_assoc: bool,
    pub bracket: Option<Bracket>,
    /// Top-level item count, set on closing tokens and on `End`.
    pub items: u32,
    pub subscript: Option<Subscript>,
    /// String token whose payload is the raw span, with no quotes to strip.
    pub verbatim: bool,
}

impl Token {
    pub fn new(kind: TokenKind, start: usize, len: usize) -> Self {
        Self {
            kind,
            start,
            len,
            operator: None,
            assign: None,
            precedence: 0,
            right_assoc: false,
            bracket: None,
            items: 0,
            subscript: None,
            verbatim: false,
        }
    }

    pub fn with_operator(mut self, op: Operator) -> Self {
        self.operator = Some(op);
        self.precedence = op.precedence();
        self.right_assoc = op.right_assoc();
        self
    }

    pub fn with_assign(mut self, op: AssignOp) -> Self {
        self.assign = Some(op);
        self.precedence = ASSIGN_PRECEDENCE;
        self.right_assoc = true;
        self
    }

    pub fn with_bracket(mut self, bracket: Bracket) -> Self {
        self.bracket = Some(bracket);
        self
    }

    pub fn with_items(mut self, items: u32) -> Self {
        self.items = items;
        self
    }

    pub fn verbatim(mut self) -> Self {
        self.verbatim = true;
        self
    }

    pub fn span(&self) -> Range<usize> {
        self.start..self.start + self.len
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        source.get(self.span()).unwrap_or("")
    }

    pub fn is_close(&self) -> bool {
        self.bracket == Some(Bracket::Close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_has_no_successors() {
        assert!(TokenKind::End.successors().is_empty());
    }

    #[test]
    fn test_every_state_but_end_can_continue() {
        use TokenKind::*;
        for kind in [
            Start,
            StringLiteral,
            SubstOperator,
            SubstArgs,
            SubExpr,
            PostfixOp,
            Name,
            PrefixOp,
            UnaryOp,
            BinaryOp,
            TernaryOp,
            Number,
            ListLiteral,
            DictLiteral,
            Dollar,
            CallArgs,
            Subscript,
            Dot,
            AssignOp,
            MemberName,
            DollarName,
        ] {
            assert!(!kind.successors().is_empty(), "{:?} is a dead end", kind);
        }
    }

    #[test]
    fn test_letters_follow_declaration_order() {
        assert_eq!(TokenKind::Start.letter(), 'A');
        assert_eq!(TokenKind::End.letter(), 'U');
        assert_eq!(TokenKind::DollarName.letter(), 'V');
    }

    #[test]
    fn test_binary_spellings_longest_first() {
        // a spelling must never be shadowed by an earlier prefix of itself
        for (i, (long, _)) in BINARY_SPELLINGS.iter().enumerate() {
            for (short, _) in &BINARY_SPELLINGS[..i] {
                assert!(
                    !(long.starts_with(short) && long.len() > short.len()),
                    "{:?} is shadowed by {:?}",
                    long,
                    short
                );
            }
        }
    }

    #[test]
    fn test_assign_spellings_longest_first() {
        for (i, (long, _)) in ASSIGN_SPELLINGS.iter().enumerate() {
            for (short, _) in &ASSIGN_SPELLINGS[..i] {
                assert!(!(long.starts_with(short) && long.len() > short.len()));
            }
        }
        assert_eq!(ASSIGN_SPELLINGS.last().map(|(s, _)| *s), Some("="));
    }

    #[test]
    fn test_precedence_table() {
        assert!(Operator::Power.precedence() < Operator::Negate.precedence());
        assert!(Operator::Multiply.precedence() < Operator::Add.precedence());
        assert!(Operator::Equal.precedence() < Operator::NotEqual.precedence());
        assert!(Operator::LogicalAnd.precedence() < Operator::LogicalOr.precedence());
        assert!(Operator::Question.precedence() < ASSIGN_PRECEDENCE);
        assert!(ASSIGN_PRECEDENCE < Operator::Sequence.precedence());
    }

    #[test]
    fn test_assign_codes() {
        assert_eq!(AssignOp::Assign.code(), 0x40);
        assert_eq!(AssignOp::ShrAssign.code(), 0x4A);
        assert_eq!(AssignOp::PowAssign.code(), 0x4B);
    }

    #[test]
    fn test_subscript_pointer_form() {
        assert!(Subscript::Index.has_pointer_form());
        assert!(Subscript::Slice { min: true, max: true }.has_pointer_form());
        assert!(Subscript::Slice { min: true, max: false }.has_pointer_form());
        assert!(!Subscript::Slice { min: false, max: true }.has_pointer_form());
    }

    #[test]
    fn test_token_text() {
        let src = "abc + def";
        let t = Token::new(TokenKind::Name, 6, 3);
        assert_eq!(t.text(src), "def");
        assert_eq!(t.span(), 6..9);
    }

    #[test]
    fn test_with_assign_is_right_assoc() {
        let t = Token::new(TokenKind::AssignOp, 0, 2).with_assign(AssignOp::AddAssign);
        assert!(t.right_assoc);
        assert_eq!(t.precedence, ASSIGN_PRECEDENCE);
    }
}
