use std::ops::Range;

/// How backslashes inside a literal are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escapes {
    /// `\\`, `\'` and `\"` only.
    Plain,
    /// Plain escapes plus the C control escapes. Prefix `e`.
    Extended,
    /// Nothing is processed. Prefix `r`.
    Raw,
}

/// A quoted literal found at the start of some text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    /// Bytes spanned, prefix and quotes included.
    pub len: usize,
    /// Bytes between the quotes.
    pub body: Range<usize>,
    pub escapes: Escapes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unterminated;

/// Recognises a string literal at the start of `text`.
///
/// Returns `Ok(None)` when `text` does not start with a quote (optionally
/// prefixed by `r` or `e`), `Err` when the quote is never closed.
pub fn scan_literal(text: &str) -> Result<Option<Literal>, Unterminated> {
    let bytes = text.as_bytes();
    let (escapes, quote) = match bytes {
        [b'r' | b'R', b'\'' | b'"', ..] => (Escapes::Raw, 1),
        [b'e' | b'E', b'\'' | b'"', ..] => (Escapes::Extended, 1),
        [b'\'' | b'"', ..] => (Escapes::Plain, 0),
        _ => return Ok(None),
    };
    let closing = closing_quote(bytes, quote, escapes == Escapes::Raw)?;
    Ok(Some(Literal {
        len: closing.at + closing.delim,
        body: closing.body_start..closing.at,
        escapes,
    }))
}

struct Closing {
    body_start: usize,
    /// Position of the closing delimiter.
    at: usize,
    delim: usize,
}

/// Finds the end of the literal whose opening quote is at `quote`.
fn closing_quote(bytes: &[u8], quote: usize, raw: bool) -> Result<Closing, Unterminated> {
    let q = bytes[quote];
    let triple = bytes.len() >= quote + 3 && bytes[quote + 1] == q && bytes[quote + 2] == q;
    let delim = if triple { 3 } else { 1 };
    let body_start = quote + delim;

    let mut i = body_start;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && !raw {
            i += 2;
            continue;
        }
        if b == q && (!triple || bytes[i..].starts_with(&[q, q, q])) {
            return Ok(Closing {
                body_start,
                at: i,
                delim,
            });
        }
        i += 1;
    }
    Err(Unterminated)
}

/// Decodes the payload of a literal found by [`scan_literal`].
pub fn decode_literal(text: &str, lit: &Literal) -> String {
    let body = &text[lit.body.clone()];
    if lit.escapes == Escapes::Raw {
        return body.to_string();
    }

    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        let decoded = match (next, lit.escapes) {
            ('\\', _) => Some('\\'),
            ('\'', _) => Some('\''),
            ('"', _) => Some('"'),
            ('n', Escapes::Extended) => Some('\n'),
            ('t', Escapes::Extended) => Some('\t'),
            ('r', Escapes::Extended) => Some('\r'),
            ('a', Escapes::Extended) => Some('\x07'),
            ('b', Escapes::Extended) => Some('\x08'),
            ('f', Escapes::Extended) => Some('\x0c'),
            ('v', Escapes::Extended) => Some('\x0b'),
            ('?', Escapes::Extended) => Some('?'),
            _ => None,
        };
        match decoded {
            Some(d) => out.push(d),
            None => {
                out.push('\\');
                out.push(next);
            }
        }
    }
    out
}

/// Position of the bracket closing the one at `text[0]`, skipping over
/// quoted literals. Only brackets of the same kind are counted.
pub fn find_matching(text: &str, open: u8, close: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\'' || b == b'"' {
            let raw = i > 0
                && matches!(bytes[i - 1], b'r' | b'R')
                && (i < 2 || !is_ident_byte(bytes[i - 2]));
            let closing = closing_quote(bytes, i, raw).ok()?;
            i = closing.at + closing.delim;
            continue;
        }
        if b == open {
            depth += 1;
        } else if b == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

pub fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(s: &str) -> String {
        let lit = scan_literal(s).unwrap().unwrap();
        decode_literal(s, &lit)
    }

    #[test]
    fn test_plain_quotes() {
        let lit = scan_literal("'abc' + 1").unwrap().unwrap();
        assert_eq!(lit.len, 5);
        assert_eq!(lit.body, 1..4);
        assert_eq!(lit.escapes, Escapes::Plain);
    }

    #[test]
    fn test_not_a_literal() {
        assert_eq!(scan_literal("abc"), Ok(None));
        assert_eq!(scan_literal("rx"), Ok(None));
        assert_eq!(scan_literal(""), Ok(None));
    }

    #[test]
    fn test_unterminated() {
        assert_eq!(scan_literal("'abc"), Err(Unterminated));
        assert_eq!(scan_literal(r#""a\""#), Err(Unterminated));
    }

    #[test]
    fn test_triple_quotes_span_inner_quotes() {
        let src = r#""""say "hi" now""" x"#;
        let lit = scan_literal(src).unwrap().unwrap();
        assert_eq!(&src[..lit.len], r#""""say "hi" now""""#);
        assert_eq!(decoded(src), r#"say "hi" now"#);
    }

    #[test]
    fn test_empty_string_is_not_triple() {
        let lit = scan_literal("''").unwrap().unwrap();
        assert_eq!(lit.len, 2);
        assert_eq!(lit.body, 1..1);
    }

    #[test]
    fn test_plain_escapes() {
        assert_eq!(decoded(r#""a\"b""#), "a\"b");
        assert_eq!(decoded(r"'a\\b'"), "a\\b");
        // control escapes stay literal without the e prefix
        assert_eq!(decoded(r"'a\nb'"), "a\\nb");
    }

    #[test]
    fn test_extended_escapes() {
        assert_eq!(decoded(r"e'a\nb\t'"), "a\nb\t");
        assert_eq!(decoded(r"E'\?'"), "?");
    }

    #[test]
    fn test_raw_string() {
        assert_eq!(decoded(r"r'a\nb'"), "a\\nb");
        // a backslash does not protect the closing quote
        let lit = scan_literal(r"r'a\' + 1").unwrap().unwrap();
        assert_eq!(lit.len, 5);
    }

    #[test]
    fn test_find_matching_nested() {
        assert_eq!(find_matching("(a(b)c) + 1", b'(', b')'), Some(6));
        assert_eq!(find_matching("(a(b)c", b'(', b')'), None);
    }

    #[test]
    fn test_find_matching_skips_quotes() {
        assert_eq!(find_matching("(')', x)", b'(', b')'), Some(7));
        assert_eq!(find_matching(r#"[""")""" ]"#, b'[', b']'), Some(9));
    }

    #[test]
    fn test_find_matching_unterminated_quote() {
        assert_eq!(find_matching("(')", b'(', b')'), None);
    }
}
