use tracing::{debug, trace};

use crate::frontend::number::{FloatScanner, NumberScanner};
use crate::frontend::strings::{self, is_ident_byte};
use crate::frontend::token::{
    ASSIGN_SPELLINGS, AssignOp, BINARY_SPELLINGS, Bracket, Operator, Subscript, Token, TokenKind,
    UNARY_SPELLINGS,
};

/// Functions whose single argument is taken as literal text.
const TEXT_FUNCTIONS: &[&str] = &["unit", "texify"];

/// Prefixes of functions that bind a dummy variable, e.g. `diff_dx(x**2, 1)`.
const DUMMY_PREFIXES: &[&str] = &["diff_d", "int_d"];

/// The only token accepted after a dummy-variable function name.
const CALL_ONLY: &[TokenKind] = &[TokenKind::CallArgs];

/// Words that are operators, never variable names.
const KEYWORDS: &[&str] = &["and", "or", "not", "AND", "OR", "NOT"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LexerError {
    #[error("{message}")]
    Syntax { offset: usize, message: String },
    #[error("Overflow Error: {what} exceeds the limit of {limit}")]
    Overflow {
        offset: usize,
        what: &'static str,
        limit: usize,
    },
    #[error("Out of memory while tokenizing")]
    OutOfMemory { offset: usize },
}

impl LexerError {
    pub fn syntax(offset: usize, message: impl Into<String>) -> Self {
        LexerError::Syntax {
            offset,
            message: message.into(),
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            LexerError::Syntax { offset, .. }
            | LexerError::Overflow { offset, .. }
            | LexerError::OutOfMemory { offset } => *offset,
        }
    }

    /// Shifts the offset from an interior's frame into its parent's.
    pub fn rebase(mut self, by: usize) -> Self {
        match &mut self {
            LexerError::Syntax { offset, .. }
            | LexerError::Overflow { offset, .. }
            | LexerError::OutOfMemory { offset } => *offset += by,
        }
        self
    }
}

/// Permissions granted by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LexFlags {
    pub allow_dollar: bool,
    pub allow_assignment: bool,
    /// A bare top-level comma is the sequence operator rather than the end.
    pub allow_comma_operator: bool,
    /// The text is the inside of a dictionary literal.
    pub dict: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tokenized {
    pub tokens: Vec<Token>,
    /// Item count carried by the `End` token.
    pub items: u32,
    /// Bytes consumed, trailing whitespace included.
    pub end: usize,
}

pub fn tokenize(text: &str, flags: LexFlags) -> Result<Tokenized, LexerError> {
    Lexer::new(text, flags).tokenize()
}

// =============================================================================
// Per-level scanning state
// =============================================================================

/// What a comma means at one nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Commas {
    Sequence,
    Collect,
    Dict,
    /// Top level only: the comma ends the expression.
    Terminate,
}

#[derive(Debug, Clone, Copy)]
struct Level<'a> {
    text: &'a str,
    /// Offset of `text` within the outermost source.
    base: usize,
    commas: Commas,
    top: bool,
    /// Lower bound of a slice: an unmatched `:` ends the level.
    stop_at_colon: bool,
    /// Number of enclosing levels.
    depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DictPhase {
    Key,
    Value,
}

/// Carried from one token to the next.
#[derive(Debug, Default, Clone, Copy)]
struct Pending {
    text_call: bool,
    dummy: bool,
    forced: Option<&'static [TokenKind]>,
}

#[derive(Debug)]
struct Cursor {
    pos: usize,
    state: TokenKind,
    ternary_depth: u32,
    comma_items: u32,
    dict_items: u32,
    dict_phase: DictPhase,
    pending: Pending,
}

impl Cursor {
    fn new() -> Self {
        Self {
            pos: 0,
            state: TokenKind::Start,
            ternary_depth: 0,
            comma_items: 1,
            dict_items: 0,
            dict_phase: DictPhase::Key,
            pending: Pending::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LevelEnd {
    items: u32,
    /// Local offset where the level stopped.
    end: usize,
}

// =============================================================================
// LEXER
// =============================================================================

pub struct Lexer<'a> {
    source: &'a str,
    flags: LexFlags,
    scanner: &'a dyn NumberScanner,
    max_tokens: usize,
    max_depth: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, flags: LexFlags) -> Self {
        Lexer {
            source,
            flags,
            scanner: &FloatScanner,
            max_tokens: usize::MAX,
            max_depth: usize::MAX,
            tokens: Vec::new(),
        }
    }

    pub fn with_scanner(mut self, scanner: &'a dyn NumberScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Bounds bracket nesting, and with it the lexer's recursion.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn tokenize(mut self) -> Result<Tokenized, LexerError> {
        let commas = if self.flags.dict {
            Commas::Dict
        } else if self.flags.allow_comma_operator {
            Commas::Sequence
        } else {
            Commas::Terminate
        };
        let level = Level {
            text: self.source,
            base: 0,
            commas,
            top: true,
            stop_at_colon: false,
            depth: 0,
        };
        let end = self.scan_level(level)?;
        debug!(
            tokens = self.tokens.len(),
            items = end.items,
            consumed = end.end,
            "tokenized expression"
        );
        Ok(Tokenized {
            tokens: self.tokens,
            items: end.items,
            end: end.end,
        })
    }

    fn scan_level(&mut self, level: Level<'a>) -> Result<LevelEnd, LexerError> {
        let bytes = level.text.as_bytes();
        let mut cur = Cursor::new();

        loop {
            while bytes.get(cur.pos).is_some_and(|b| *b <= b' ') {
                cur.pos += 1;
            }
            let pending = std::mem::take(&mut cur.pending);
            let candidates = pending.forced.unwrap_or_else(|| cur.state.successors());

            let mut matched = None;
            for &kind in candidates {
                if self.try_kind(kind, &level, &mut cur, pending)? {
                    matched = Some(kind);
                    break;
                }
            }
            match matched {
                Some(TokenKind::End) => break,
                Some(kind) => cur.state = kind,
                None => return Err(expecting(candidates, cur.pos)),
            }
        }

        let items = match level.commas {
            Commas::Dict => {
                if cur.dict_phase == DictPhase::Key {
                    return Err(LexerError::syntax(
                        cur.pos,
                        "Syntax Error: Expecting : followed by value for dictionary key",
                    ));
                }
                cur.dict_items
            }
            Commas::Collect => cur.comma_items,
            Commas::Sequence | Commas::Terminate => 0,
        };
        if level.top {
            let end = Token::new(TokenKind::End, level.base + cur.pos, 0).with_items(items);
            self.push(end, cur.pos)?;
        }
        Ok(LevelEnd {
            items,
            end: cur.pos,
        })
    }

    /// Tries to scan one token of `kind` at the cursor. On success the token
    /// is recorded and the cursor advanced past it.
    fn try_kind(
        &mut self,
        kind: TokenKind,
        level: &Level<'a>,
        cur: &mut Cursor,
        pending: Pending,
    ) -> Result<bool, LexerError> {
        let rest = &level.text[cur.pos..];
        let at = level.base + cur.pos;

        let token = match kind {
            TokenKind::Start => return Ok(false),

            TokenKind::StringLiteral => match strings::scan_literal(rest) {
                Ok(Some(lit)) => Token::new(kind, at, lit.len),
                Ok(None) => return Ok(false),
                Err(_) => {
                    return Err(LexerError::syntax(
                        cur.pos,
                        "Syntax Error: Mismatched quote",
                    ));
                }
            },

            TokenKind::SubstOperator => {
                if !rest.starts_with('%') || rest.starts_with("%=") {
                    return Ok(false);
                }
                Token::new(kind, at, 1).with_operator(Operator::Substitute)
            }

            TokenKind::SubstArgs | TokenKind::SubExpr | TokenKind::CallArgs => {
                if !rest.starts_with('(') {
                    return Ok(false);
                }
                self.paren_group(kind, level, cur, pending)?;
                return Ok(true);
            }

            TokenKind::ListLiteral | TokenKind::DictLiteral => {
                let (open, close) = if kind == TokenKind::ListLiteral {
                    (b'[', b']')
                } else {
                    (b'{', b'}')
                };
                if rest.as_bytes().first() != Some(&open) {
                    return Ok(false);
                }
                self.collection(kind, open, close, level, cur)?;
                return Ok(true);
            }

            TokenKind::Subscript => {
                if !rest.starts_with('[') {
                    return Ok(false);
                }
                self.subscript(level, cur)?;
                return Ok(true);
            }

            TokenKind::PostfixOp | TokenKind::PrefixOp => {
                let post = kind == TokenKind::PostfixOp;
                let op = if rest.starts_with("--") {
                    if post {
                        Operator::PostDecrement
                    } else {
                        Operator::PreDecrement
                    }
                } else if rest.starts_with("++") {
                    if post {
                        Operator::PostIncrement
                    } else {
                        Operator::PreIncrement
                    }
                } else {
                    return Ok(false);
                };
                Token::new(kind, at, 2).with_operator(op)
            }

            TokenKind::Name => {
                let Some(len) = ident_len(rest) else {
                    return Ok(false);
                };
                let word = &rest[..len];
                if KEYWORDS.contains(&word) {
                    return Ok(false);
                }
                if let Some(prefix) = dummy_prefix(word) {
                    let name = Token::new(kind, at, prefix.len());
                    self.push(name, cur.pos)?;
                    let dummy = Token::new(TokenKind::StringLiteral, at + prefix.len(), len - prefix.len())
                        .verbatim();
                    self.push(dummy, cur.pos + prefix.len())?;
                    cur.pos += len;
                    cur.pending.dummy = true;
                    cur.pending.forced = Some(CALL_ONLY);
                    return Ok(true);
                }
                cur.pending.text_call = TEXT_FUNCTIONS.contains(&word);
                Token::new(kind, at, len)
            }

            TokenKind::MemberName | TokenKind::DollarName => match ident_len(rest) {
                Some(len) => Token::new(kind, at, len),
                None => return Ok(false),
            },

            TokenKind::UnaryOp => match match_spelling(rest, UNARY_SPELLINGS) {
                Some((len, op)) => Token::new(kind, at, len).with_operator(op),
                None => return Ok(false),
            },

            TokenKind::BinaryOp => {
                if rest.starts_with(',') {
                    let Some(op) = self.comma(level, cur)? else {
                        return Ok(false);
                    };
                    Token::new(kind, at, 1).with_operator(op)
                } else {
                    // `+=` is an assignment wherever one may follow
                    if self.flags.allow_assignment
                        && cur.state.successors().contains(&TokenKind::AssignOp)
                        && assign_spelling(rest).is_some()
                    {
                        return Ok(false);
                    }
                    match match_spelling(rest, BINARY_SPELLINGS) {
                        Some((len, op)) => Token::new(kind, at, len).with_operator(op),
                        None => return Ok(false),
                    }
                }
            }

            TokenKind::TernaryOp => {
                if rest.starts_with('?') {
                    cur.ternary_depth += 1;
                    Token::new(kind, at, 1).with_operator(Operator::Question)
                } else if rest.starts_with(':') {
                    if level.commas == Commas::Dict && cur.ternary_depth == 0 {
                        if cur.dict_phase == DictPhase::Value {
                            return Err(LexerError::syntax(
                                cur.pos,
                                "Syntax Error: Expecting , to separate dictionary items",
                            ));
                        }
                        cur.dict_phase = DictPhase::Value;
                        cur.dict_items += 1;
                        Token::new(kind, at, 1).with_operator(Operator::Collect)
                    } else if cur.ternary_depth == 0 {
                        if level.stop_at_colon {
                            return Ok(false);
                        }
                        return Err(LexerError::syntax(
                            cur.pos,
                            "Syntax Error: No preceding ? to match with :",
                        ));
                    } else {
                        cur.ternary_depth -= 1;
                        Token::new(kind, at, 1).with_operator(Operator::Colon)
                    }
                } else {
                    return Ok(false);
                }
            }

            TokenKind::Number => {
                let scanner = self.scanner;
                match scanner.scan(rest) {
                    Some((_, len)) if len > 0 => Token::new(kind, at, len),
                    _ => return Ok(false),
                }
            }

            TokenKind::Dollar => {
                if !self.flags.allow_dollar || !rest.starts_with('$') {
                    return Ok(false);
                }
                Token::new(kind, at, 1)
            }

            TokenKind::Dot => {
                if !rest.starts_with('.') {
                    return Ok(false);
                }
                Token::new(kind, at, 1)
            }

            TokenKind::AssignOp => {
                if !self.flags.allow_assignment {
                    return Ok(false);
                }
                match assign_spelling(rest) {
                    Some((len, op)) => Token::new(kind, at, len).with_assign(op),
                    None => return Ok(false),
                }
            }

            TokenKind::End => {
                let at_end = cur.pos >= level.text.len();
                let at_colon =
                    level.stop_at_colon && cur.ternary_depth == 0 && rest.starts_with(':');
                return Ok(level.top || at_end || at_colon);
            }
        };

        let len = token.len;
        self.push(token, cur.pos)?;
        cur.pos += len;
        Ok(true)
    }

    /// Decides what a comma means here. `None` ends a top-level expression.
    fn comma(&self, level: &Level<'a>, cur: &mut Cursor) -> Result<Option<Operator>, LexerError> {
        if cur.ternary_depth > 0 {
            return Ok(Some(Operator::Sequence));
        }
        let op = match level.commas {
            Commas::Terminate => return Ok(None),
            Commas::Sequence => Operator::Sequence,
            Commas::Collect => {
                cur.comma_items += 1;
                Operator::Collect
            }
            Commas::Dict => {
                if cur.dict_phase == DictPhase::Key {
                    return Err(LexerError::syntax(
                        cur.pos,
                        "Syntax Error: Expecting : followed by value for dictionary key",
                    ));
                }
                cur.dict_phase = DictPhase::Key;
                Operator::Collect
            }
        };
        Ok(Some(op))
    }

    // =========================================================================
    // Bracketed groups
    // =========================================================================

    fn matching(
        &self,
        level: &Level<'a>,
        open_at: usize,
        open: u8,
        close: u8,
    ) -> Result<usize, LexerError> {
        strings::find_matching(&level.text[open_at..], open, close)
            .map(|c| open_at + c)
            .ok_or_else(|| {
                LexerError::syntax(
                    open_at,
                    format!(
                        "Syntax Error: Mismatched {} {}",
                        open as char, close as char
                    ),
                )
            })
    }

    /// Tokenizes `level.text[start..end]` as a nested level.
    fn nested(
        &mut self,
        level: &Level<'a>,
        start: usize,
        end: usize,
        commas: Commas,
        stop_at_colon: bool,
    ) -> Result<LevelEnd, LexerError> {
        if level.depth >= self.max_depth {
            return Err(LexerError::Overflow {
                offset: start,
                what: "nesting depth",
                limit: self.max_depth,
            });
        }
        let inner = Level {
            text: &level.text[start..end],
            base: level.base + start,
            commas,
            top: false,
            stop_at_colon,
            depth: level.depth + 1,
        };
        self.scan_level(inner).map_err(|e| e.rebase(start))
    }

    fn open_token(&mut self, kind: TokenKind, level: &Level<'a>, at: usize) -> Result<(), LexerError> {
        let token = Token::new(kind, level.base + at, 1).with_bracket(Bracket::Open);
        self.push(token, at)
    }

    fn close_token(
        &mut self,
        kind: TokenKind,
        level: &Level<'a>,
        at: usize,
        items: u32,
        subscript: Option<Subscript>,
    ) -> Result<(), LexerError> {
        let mut token = Token::new(kind, level.base + at, 1)
            .with_bracket(Bracket::Close)
            .with_items(items);
        token.subscript = subscript;
        self.push(token, at)
    }

    fn paren_group(
        &mut self,
        kind: TokenKind,
        level: &Level<'a>,
        cur: &mut Cursor,
        pending: Pending,
    ) -> Result<(), LexerError> {
        let open = cur.pos;
        let close = self.matching(level, open, b'(', b')')?;
        self.open_token(kind, level, open)?;

        let interior = &level.text[open + 1..close];
        let mut items = if kind == TokenKind::CallArgs && pending.text_call {
            self.verbatim_argument(level, open + 1, interior)?
        } else if kind != TokenKind::SubExpr && interior.trim().is_empty() {
            0
        } else {
            let commas = if kind == TokenKind::SubExpr {
                Commas::Sequence
            } else {
                Commas::Collect
            };
            self.nested(level, open + 1, close, commas, false)?.items
        };
        if kind == TokenKind::CallArgs && pending.dummy {
            items += 1;
        }

        self.close_token(kind, level, close, items, None)?;
        cur.pos = close + 1;
        Ok(())
    }

    /// The argument of a text function becomes one string token.
    fn verbatim_argument(
        &mut self,
        level: &Level<'a>,
        start: usize,
        interior: &str,
    ) -> Result<u32, LexerError> {
        let body = interior.trim();
        if body.is_empty() {
            return Ok(0);
        }
        let local = start + (interior.len() - interior.trim_start().len());
        let token = Token::new(TokenKind::StringLiteral, level.base + local, body.len());
        let quoted = matches!(strings::scan_literal(body), Ok(Some(lit)) if lit.len == body.len());
        self.push(if quoted { token } else { token.verbatim() }, local)?;
        Ok(1)
    }

    fn collection(
        &mut self,
        kind: TokenKind,
        open: u8,
        close: u8,
        level: &Level<'a>,
        cur: &mut Cursor,
    ) -> Result<(), LexerError> {
        let open_at = cur.pos;
        let close_at = self.matching(level, open_at, open, close)?;
        self.open_token(kind, level, open_at)?;

        let items = if level.text[open_at + 1..close_at].trim().is_empty() {
            0
        } else {
            let commas = if kind == TokenKind::DictLiteral {
                Commas::Dict
            } else {
                Commas::Collect
            };
            self.nested(level, open_at + 1, close_at, commas, false)?.items
        };

        self.close_token(kind, level, close_at, items, None)?;
        cur.pos = close_at + 1;
        Ok(())
    }

    fn subscript(&mut self, level: &Level<'a>, cur: &mut Cursor) -> Result<(), LexerError> {
        let kind = TokenKind::Subscript;
        let open = cur.pos;
        let close = self.matching(level, open, b'[', b']')?;
        self.open_token(kind, level, open)?;

        let interior = &level.text[open + 1..close];
        let first = open + 1 + (interior.len() - interior.trim_start().len());
        if first == close {
            return Err(expecting(TokenKind::Start.successors(), first));
        }

        let shape = if level.text.as_bytes()[first] == b':' {
            self.slice_separator(level, first)?;
            let max = self.slice_upper(level, first + 1, close)?;
            Subscript::Slice { min: false, max }
        } else {
            let lower = self.nested(level, first, close, Commas::Sequence, true)?;
            let stop = first + lower.end;
            if stop >= close {
                Subscript::Index
            } else {
                self.slice_separator(level, stop)?;
                let max = self.slice_upper(level, stop + 1, close)?;
                Subscript::Slice { min: true, max }
            }
        };

        self.close_token(kind, level, close, shape.operands(), Some(shape))?;
        cur.pos = close + 1;
        Ok(())
    }

    fn slice_separator(&mut self, level: &Level<'a>, at: usize) -> Result<(), LexerError> {
        let token = Token::new(TokenKind::Subscript, level.base + at, 1).with_bracket(Bracket::SliceSep);
        self.push(token, at)
    }

    /// Tokenizes the upper bound of a slice, if there is one.
    fn slice_upper(&mut self, level: &Level<'a>, start: usize, close: usize) -> Result<bool, LexerError> {
        if level.text[start..close].trim().is_empty() {
            return Ok(false);
        }
        self.nested(level, start, close, Commas::Sequence, false)?;
        Ok(true)
    }

    fn push(&mut self, token: Token, local: usize) -> Result<(), LexerError> {
        if self.tokens.len() >= self.max_tokens {
            return Err(LexerError::Overflow {
                offset: local,
                what: "token count",
                limit: self.max_tokens,
            });
        }
        self.tokens
            .try_reserve(1)
            .map_err(|_| LexerError::OutOfMemory { offset: local })?;
        trace!(kind = ?token.kind, start = token.start, len = token.len, "token");
        self.tokens.push(token);
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Length of the identifier at the start of `text`. Must begin with a letter.
fn ident_len(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    if !bytes.first().is_some_and(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    Some(bytes.iter().take_while(|b| is_ident_byte(**b)).count())
}

fn dummy_prefix(word: &str) -> Option<&'static str> {
    DUMMY_PREFIXES.iter().copied().find(|prefix| {
        word.len() > prefix.len()
            && word.starts_with(prefix)
            && word.as_bytes()[prefix.len()].is_ascii_alphabetic()
    })
}

/// First spelling in `table` that matches at the start of `text`. Keyword
/// spellings need a non-identifier character after them.
fn match_spelling<T: Copy>(text: &str, table: &[(&str, T)]) -> Option<(usize, T)> {
    table
        .iter()
        .find(|(spelling, _)| {
            text.starts_with(spelling)
                && !(spelling.as_bytes()[0].is_ascii_alphabetic()
                    && text
                        .as_bytes()
                        .get(spelling.len())
                        .is_some_and(|b| is_ident_byte(*b)))
        })
        .map(|(spelling, value)| (spelling.len(), *value))
}

fn assign_spelling(text: &str) -> Option<(usize, AssignOp)> {
    // `==` is a comparison
    if text.starts_with("==") {
        return None;
    }
    match_spelling(text, ASSIGN_SPELLINGS)
}

fn expecting(candidates: &[TokenKind], offset: usize) -> LexerError {
    let mut phrases: Vec<&str> = Vec::new();
    for kind in candidates.iter().filter(|k| **k != TokenKind::End) {
        let phrase = kind.phrase();
        if !phrases.contains(&phrase) {
            phrases.push(phrase);
        }
    }
    LexerError::syntax(
        offset,
        format!(
            "Syntax Error: At this point, was expecting {}.",
            phrases.join(" or ")
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use TokenKind as K;

    fn permissive() -> LexFlags {
        LexFlags {
            allow_dollar: true,
            allow_assignment: true,
            ..LexFlags::default()
        }
    }

    fn lex(src: &str) -> Tokenized {
        tokenize(src, permissive()).unwrap()
    }

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).tokens.iter().map(|t| t.kind).collect()
    }

    fn ops(src: &str) -> Vec<Operator> {
        lex(src).tokens.iter().filter_map(|t| t.operator).collect()
    }

    fn err(src: &str) -> LexerError {
        tokenize(src, permissive()).unwrap_err()
    }

    fn err_with(src: &str, flags: LexFlags) -> LexerError {
        tokenize(src, flags).unwrap_err()
    }

    /// The last closing token of `kind`, i.e. the outermost group.
    fn close_of(src: &str, kind: TokenKind) -> Token {
        lex(src)
            .tokens
            .into_iter()
            .rev()
            .find(|t| t.kind == kind && t.is_close())
            .unwrap()
    }

    macro_rules! at {
        ($err:expr, $offset:expr, $needle:expr) => {{
            let e = $err;
            assert_eq!(e.offset(), $offset, "error was: {}", e);
            assert!(e.to_string().contains($needle), "msg was: {}", e);
        }};
    }

    // =========================================================================
    // Basics
    // =========================================================================

    #[test]
    fn test_simple_arithmetic() {
        assert_eq!(kinds("1 + 2"), vec![K::Number, K::BinaryOp, K::Number, K::End]);
    }

    #[test]
    fn test_minus_depends_on_state() {
        assert_eq!(kinds("-1 - 2"), vec![K::UnaryOp, K::Number, K::BinaryOp, K::Number, K::End]);
        assert_eq!(ops("-1 - 2"), vec![Operator::Negate, Operator::Subtract]);
    }

    #[test]
    fn test_longest_spelling_wins() {
        assert_eq!(ops("a <= b"), vec![Operator::LessEqual]);
        assert_eq!(ops("a ** b"), vec![Operator::Power]);
        assert_eq!(ops("a << b"), vec![Operator::ShiftLeft]);
        assert_eq!(ops("a && b || c"), vec![Operator::LogicalAnd, Operator::LogicalOr]);
        assert_eq!(ops("a <> b"), vec![Operator::NotEqual]);
    }

    #[test]
    fn test_keyword_operators() {
        assert_eq!(kinds("a and not b"), vec![K::Name, K::BinaryOp, K::UnaryOp, K::Name, K::End]);
        assert_eq!(ops("a OR b"), vec![Operator::LogicalOr]);
    }

    #[test]
    fn test_keyword_prefix_is_a_name() {
        let t = lex("android + order");
        assert_eq!(t.tokens[0].len, 7);
        assert_eq!(t.tokens[2].kind, K::Name);
    }

    #[test]
    fn test_token_spans() {
        let src = "  alpha*12.5";
        let t = lex(src);
        assert_eq!(t.tokens[0].text(src), "alpha");
        assert_eq!(t.tokens[2].text(src), "12.5");
        assert_eq!(t.end, src.len());
    }

    #[test]
    fn test_end_includes_trailing_whitespace() {
        assert_eq!(lex("1 + 2  ").end, 7);
    }

    #[test]
    fn test_empty_expression() {
        at!(err(""), 0, "was expecting a literal value");
        at!(err("   "), 3, "was expecting");
    }

    #[test]
    fn test_expecting_message() {
        let e = err("1 +");
        assert_eq!(
            e.to_string(),
            "Syntax Error: At this point, was expecting a literal value or a bracketed \
             expression or a variable name or a unary operator."
        );
        assert_eq!(e.offset(), 3);
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    #[test]
    fn test_compound_assignment() {
        assert_eq!(kinds("x += 1"), vec![K::Name, K::AssignOp, K::Number, K::End]);
        let t = lex("x <<= 2");
        assert_eq!(t.tokens[1].assign, Some(AssignOp::ShlAssign));
    }

    #[test]
    fn test_equality_is_not_assignment() {
        assert_eq!(kinds("x == 3"), vec![K::Name, K::BinaryOp, K::Number, K::End]);
        assert_eq!(ops("x == 3"), vec![Operator::Equal]);
    }

    #[test]
    fn test_assignment_not_allowed() {
        let flags = LexFlags::default();
        at!(err_with("x += 1", flags), 3, "was expecting");
        // a bare `=` ends the expression
        assert_eq!(tokenize("x = 1", flags).unwrap().end, 2);
    }

    #[test]
    fn test_assignment_is_right_assoc() {
        let t = lex("a = b = 1");
        assert!(t.tokens[1].right_assoc);
        assert_eq!(t.tokens[1].precedence, 17);
    }

    #[test]
    fn test_member_assignment() {
        assert_eq!(
            kinds("a.b.c = 1"),
            vec![K::Name, K::Dot, K::MemberName, K::Dot, K::MemberName, K::AssignOp, K::Number, K::End]
        );
    }

    #[test]
    fn test_increments() {
        assert_eq!(kinds("x++"), vec![K::Name, K::PostfixOp, K::End]);
        assert_eq!(kinds("--x"), vec![K::PrefixOp, K::Name, K::End]);
        assert_eq!(ops("x--"), vec![Operator::PostDecrement]);
    }

    // =========================================================================
    // Strings
    // =========================================================================

    #[test]
    fn test_string_substitution() {
        assert_eq!(
            kinds("'%d %d' % (1, 2)"),
            vec![K::StringLiteral, K::SubstOperator, K::SubstArgs, K::Number, K::BinaryOp, K::Number, K::SubstArgs, K::End]
        );
        assert_eq!(close_of("'%d %d' % (1, 2)", K::SubstArgs).items, 2);
    }

    #[test]
    fn test_single_substitution() {
        assert_eq!(kinds("'%s' % x"), vec![K::StringLiteral, K::SubstOperator, K::Name, K::End]);
    }

    #[test]
    fn test_unterminated_string() {
        at!(err("1 + 'abc"), 4, "Mismatched quote");
    }

    #[test]
    fn test_brackets_inside_quotes() {
        assert_eq!(close_of("f(')', 2)", K::CallArgs).items, 2);
    }

    // =========================================================================
    // Bracketed groups
    // =========================================================================

    #[test]
    fn test_call_argument_counts() {
        assert_eq!(close_of("f(1, 2, 3)", K::CallArgs).items, 3);
        assert_eq!(close_of("f()", K::CallArgs).items, 0);
        assert_eq!(close_of("f(g(1, 2))", K::CallArgs).items, 1);
    }

    #[test]
    fn test_nested_tokens_have_absolute_offsets() {
        let src = "f(ab, [cd])";
        let t = lex(src);
        let names: Vec<&str> = t
            .tokens
            .iter()
            .filter(|t| t.kind == K::Name)
            .map(|t| t.text(src))
            .collect();
        assert_eq!(names, vec!["f", "ab", "cd"]);
    }

    #[test]
    fn test_list_literal() {
        assert_eq!(close_of("[1,2,3]", K::ListLiteral).items, 3);
        assert_eq!(close_of("[ ]", K::ListLiteral).items, 0);
    }

    #[test]
    fn test_empty_sub_expression() {
        at!(err("1 + ()"), 5, "was expecting");
    }

    #[test]
    fn test_sub_expression_comma_is_sequence() {
        assert_eq!(ops("(a, b)"), vec![Operator::Sequence]);
    }

    #[test]
    fn test_ternary_comma_in_list_is_sequence() {
        let t = lex("[a ? 1, 2 : 3]");
        assert!(t.tokens.iter().any(|t| t.operator == Some(Operator::Sequence)));
        assert_eq!(close_of("[a ? 1, 2 : 3]", K::ListLiteral).items, 1);
    }

    #[test]
    fn test_top_level_comma() {
        let t = lex("1, 2");
        assert_eq!(t.end, 1);
        assert_eq!(t.tokens.iter().map(|t| t.kind).collect::<Vec<_>>(), vec![K::Number, K::End]);

        let flags = LexFlags {
            allow_comma_operator: true,
            ..permissive()
        };
        let t = tokenize("1, 2", flags).unwrap();
        assert_eq!(t.end, 4);
        assert_eq!(t.tokens[1].operator, Some(Operator::Sequence));
    }

    #[test]
    fn test_mismatched_brackets() {
        at!(err("(1+2"), 0, "Mismatched ( )");
        at!(err("[1,2"), 0, "Mismatched [ ]");
        at!(err("{1:2"), 0, "Mismatched { }");
        at!(err("1 + f(2"), 5, "Mismatched ( )");
    }

    #[test]
    fn test_nested_error_is_rebased() {
        at!(err("f(1, 2 +)"), 8, "a literal value");
        at!(err("[1, (2 3)]"), 7, "binary/ternary operator");
    }

    // =========================================================================
    // Dictionaries
    // =========================================================================

    #[test]
    fn test_dict_literal() {
        assert_eq!(close_of("{1:2,3:4}", K::DictLiteral).items, 2);
        assert_eq!(close_of("{}", K::DictLiteral).items, 0);
        assert_eq!(close_of("{'a': x ? 1 : 2}", K::DictLiteral).items, 1);
    }

    #[test]
    fn test_dict_dangling_key() {
        at!(err("{1:2,3}"), 6, "Expecting : followed by value");
    }

    #[test]
    fn test_dict_comma_before_colon() {
        at!(err("{1,2}"), 2, "Expecting : followed by value");
    }

    #[test]
    fn test_dict_second_colon() {
        at!(err("{1:2:3}"), 4, "Expecting , to separate dictionary items");
    }

    #[test]
    fn test_stray_colon() {
        at!(err("a : b"), 2, "No preceding ? to match with :");
    }

    // =========================================================================
    // Subscripts
    // =========================================================================

    #[test]
    fn test_index() {
        assert_eq!(close_of("a[1]", K::Subscript).subscript, Some(Subscript::Index));
        assert_eq!(close_of("a[1]", K::Subscript).items, 1);
    }

    #[test]
    fn test_slices() {
        assert_eq!(
            close_of("a[1:2]", K::Subscript).subscript,
            Some(Subscript::Slice { min: true, max: true })
        );
        assert_eq!(
            close_of("a[:2]", K::Subscript).subscript,
            Some(Subscript::Slice { min: false, max: true })
        );
        assert_eq!(
            close_of("a[1:]", K::Subscript).subscript,
            Some(Subscript::Slice { min: true, max: false })
        );
        assert_eq!(
            close_of("a[ : ]", K::Subscript).subscript,
            Some(Subscript::Slice { min: false, max: false })
        );
    }

    #[test]
    fn test_slice_separator_token() {
        let t = lex("a[i+1 : j]");
        let sep: Vec<&Token> = t
            .tokens
            .iter()
            .filter(|t| t.bracket == Some(Bracket::SliceSep))
            .collect();
        assert_eq!(sep.len(), 1);
        assert_eq!(sep[0].start, 6);
    }

    #[test]
    fn test_ternary_inside_index() {
        assert_eq!(close_of("a[b ? 1 : 2]", K::Subscript).subscript, Some(Subscript::Index));
    }

    #[test]
    fn test_empty_subscript() {
        at!(err("a[ ]"), 3, "was expecting");
    }

    #[test]
    fn test_subscript_chain() {
        assert_eq!(
            kinds("m[1][2]"),
            vec![K::Name, K::Subscript, K::Number, K::Subscript, K::Subscript, K::Number, K::Subscript, K::End]
        );
    }

    // =========================================================================
    // Special functions and dollars
    // =========================================================================

    #[test]
    fn test_text_function() {
        let src = "unit( m/s )";
        let t = lex(src);
        assert_eq!(
            t.tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![K::Name, K::CallArgs, K::StringLiteral, K::CallArgs, K::End]
        );
        assert!(t.tokens[2].verbatim);
        assert_eq!(t.tokens[2].text(src), "m/s");
        assert_eq!(t.tokens[3].items, 1);
    }

    #[test]
    fn test_text_function_with_quoted_argument() {
        let t = lex("texify('x**2')");
        assert!(!t.tokens[2].verbatim);
    }

    #[test]
    fn test_dummy_variable_function() {
        let src = "diff_dx(x**2, 1)";
        let t = lex(src);
        assert_eq!(t.tokens[0].text(src), "diff_d");
        assert_eq!(t.tokens[1].kind, K::StringLiteral);
        assert_eq!(t.tokens[1].text(src), "x");
        assert!(t.tokens[1].verbatim);
        assert_eq!(close_of(src, K::CallArgs).items, 3);
    }

    #[test]
    fn test_dummy_variable_needs_arguments() {
        at!(err("int_dt + 1"), 7, "a list of function arguments");
    }

    #[test]
    fn test_dollar() {
        assert_eq!(
            kinds("$2 + $x + $(1)"),
            vec![
                K::Dollar, K::Number, K::BinaryOp, K::Dollar, K::DollarName, K::BinaryOp, K::Dollar, K::SubExpr, K::Number,
                K::SubExpr, K::End
            ]
        );
        at!(err_with("$2", LexFlags::default()), 0, "was expecting");
    }

    // =========================================================================
    // Limits
    // =========================================================================

    #[test]
    fn test_token_limit() {
        let e = Lexer::new("1+2+3", permissive())
            .with_max_tokens(3)
            .tokenize()
            .unwrap_err();
        assert!(matches!(e, LexerError::Overflow { limit: 3, .. }));
    }

    #[test]
    fn test_nesting_limit() {
        let lexer = |src| Lexer::new(src, permissive()).with_max_depth(1).tokenize();
        assert!(lexer("(1) + [2]").is_ok());

        let e = lexer("((1))").unwrap_err();
        assert!(matches!(
            e,
            LexerError::Overflow {
                what: "nesting depth",
                limit: 1,
                ..
            }
        ));
        assert_eq!(e.offset(), 2);
        assert!(e.to_string().contains("nesting depth exceeds the limit of 1"));
    }
}
