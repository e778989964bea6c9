/// Recognises numeric literals on behalf of the tokenizer and compiler.
///
/// `scan` looks at the start of `text` and returns the literal's value and
/// the number of bytes it spans, or `None` if no number starts there. Signs
/// are never consumed; `-1` is a unary operator applied to `1`.
pub trait NumberScanner {
    fn scan(&self, text: &str) -> Option<(f64, usize)>;
}

/// Decimal floats (`12`, `1.5`, `.5`, `2.`, `6.02e23`) and hexadecimal
/// integers (`0x1F`).
#[derive(Debug, Default, Clone, Copy)]
pub struct FloatScanner;

impl NumberScanner for FloatScanner {
    fn scan(&self, text: &str) -> Option<(f64, usize)> {
        let bytes = text.as_bytes();

        if bytes.len() > 2 && bytes[0] == b'0' && bytes[1] == b'x' {
            let digits = bytes[2..].iter().take_while(|b| b.is_ascii_hexdigit()).count();
            if digits > 0 {
                let value = bytes[2..2 + digits].iter().fold(0.0, |acc, b| {
                    acc * 16.0 + (*b as char).to_digit(16).unwrap_or(0) as f64
                });
                return Some((value, 2 + digits));
            }
        }

        let mut pos = 0;
        let mut had_digit = false;
        let mut had_point = false;
        while let Some(&b) = bytes.get(pos) {
            if b.is_ascii_digit() {
                had_digit = true;
            } else if b == b'.' && !had_point {
                had_point = true;
            } else {
                break;
            }
            pos += 1;
        }
        if !had_digit {
            return None;
        }

        // exponent only counts if digits follow it
        if matches!(bytes.get(pos), Some(b'e' | b'E')) {
            let mut exp = pos + 1;
            if matches!(bytes.get(exp), Some(b'+' | b'-')) {
                exp += 1;
            }
            let digits = bytes[exp.min(bytes.len())..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            if digits > 0 {
                pos = exp + digits;
            }
        }

        text[..pos].parse::<f64>().ok().map(|v| (v, pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(s: &str) -> Option<(f64, usize)> {
        FloatScanner.scan(s)
    }

    #[test]
    fn test_integers_and_fractions() {
        assert_eq!(scan("42"), Some((42.0, 2)));
        assert_eq!(scan("1.5+x"), Some((1.5, 3)));
        assert_eq!(scan(".25"), Some((0.25, 3)));
        assert_eq!(scan("2."), Some((2.0, 2)));
    }

    #[test]
    fn test_exponent() {
        assert_eq!(scan("6e2"), Some((600.0, 3)));
        assert_eq!(scan("1E-3*"), Some((0.001, 4)));
        assert_eq!(scan("2.5e+1"), Some((25.0, 6)));
    }

    #[test]
    fn test_dangling_exponent_not_consumed() {
        // `2e` leaves the `e` for whatever comes next
        assert_eq!(scan("2e"), Some((2.0, 1)));
        assert_eq!(scan("2e+"), Some((2.0, 1)));
    }

    #[test]
    fn test_second_point_stops_scan() {
        assert_eq!(scan("1.2.3"), Some((1.2, 3)));
    }

    #[test]
    fn test_hex() {
        assert_eq!(scan("0x1F"), Some((31.0, 4)));
        assert_eq!(scan("0xg"), Some((0.0, 1)));
    }

    #[test]
    fn test_not_a_number() {
        assert_eq!(scan("x1"), None);
        assert_eq!(scan("."), None);
        assert_eq!(scan("-1"), None);
        assert_eq!(scan(""), None);
    }
}
