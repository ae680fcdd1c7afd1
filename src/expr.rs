//! Constant folding of C integer expressions.
//!
//! Enough of the C expression grammar to resolve enum initialisers and
//! version macros: integer literals (decimal, hex, octal, binary, with
//! `u`/`l` suffixes), parentheses, unary `+ - ~`, and the binary operators
//! `* / % + - << >> & ^ |` with C precedence. Identifiers are resolved
//! through a caller-supplied lookup. Anything else evaluates to `None`.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(i64),
    Ident(String),
    Op(&'static str),
    Open,
    Close,
}

const OPERATORS: &[&str] = &["<<", ">>", "+", "-", "*", "/", "%", "&", "|", "^", "~"];

fn tokenize(expr: &str) -> Option<Vec<Token>> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut idx = 0;

    while idx < bytes.len() {
        let ch = bytes[idx] as char;
        if ch.is_ascii_whitespace() {
            idx += 1;
        } else if ch.is_ascii_digit() {
            let start = idx;
            while idx < bytes.len() && (bytes[idx] as char).is_ascii_alphanumeric() {
                idx += 1;
            }
            tokens.push(Token::Number(parse_literal(&expr[start..idx])?));
        } else if ch.is_ascii_alphabetic() || ch == '_' {
            let start = idx;
            while idx < bytes.len()
                && ((bytes[idx] as char).is_ascii_alphanumeric() || bytes[idx] == b'_')
            {
                idx += 1;
            }
            tokens.push(Token::Ident(expr[start..idx].to_string()));
        } else if ch == '(' {
            tokens.push(Token::Open);
            idx += 1;
        } else if ch == ')' {
            tokens.push(Token::Close);
            idx += 1;
        } else {
            let op = OPERATORS.iter().find(|op| expr[idx..].starts_with(**op))?;
            tokens.push(Token::Op(op));
            idx += op.len();
        }
    }

    Some(tokens)
}

fn parse_literal(text: &str) -> Option<i64> {
    let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let lower = digits.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()
    } else if lower.len() > 1 && lower.starts_with('0') {
        i64::from_str_radix(&lower[1..], 8).ok()
    } else {
        lower.parse().ok()
    }
}

struct Parser<'a, F: Fn(&str) -> Option<i64>> {
    tokens: &'a [Token],
    pos: usize,
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<i64>> Parser<'_, F> {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn binary(&mut self, level: usize) -> Option<i64> {
        const LEVELS: &[&[&str]] = &[
            &["|"],
            &["^"],
            &["&"],
            &["<<", ">>"],
            &["+", "-"],
            &["*", "/", "%"],
        ];
        if level == LEVELS.len() {
            return self.unary();
        }

        let mut left = self.binary(level + 1)?;
        while let Some(op) = self.peek_op().filter(|op| LEVELS[level].contains(op)) {
            self.pos += 1;
            let right = self.binary(level + 1)?;
            left = apply(op, left, right)?;
        }
        Some(left)
    }

    fn unary(&mut self) -> Option<i64> {
        match self.tokens.get(self.pos)? {
            Token::Op("-") => {
                self.pos += 1;
                self.unary()?.checked_neg()
            }
            Token::Op("+") => {
                self.pos += 1;
                self.unary()
            }
            Token::Op("~") => {
                self.pos += 1;
                Some(!self.unary()?)
            }
            Token::Number(value) => {
                self.pos += 1;
                Some(*value)
            }
            Token::Ident(name) => {
                self.pos += 1;
                (self.lookup)(name)
            }
            Token::Open => {
                self.pos += 1;
                let value = self.binary(0)?;
                match self.tokens.get(self.pos)? {
                    Token::Close => {
                        self.pos += 1;
                        Some(value)
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

fn apply(op: &str, left: i64, right: i64) -> Option<i64> {
    match op {
        "+" => left.checked_add(right),
        "-" => left.checked_sub(right),
        "*" => left.checked_mul(right),
        "/" => left.checked_div(right),
        "%" => left.checked_rem(right),
        "<<" => u32::try_from(right).ok().and_then(|shift| left.checked_shl(shift)),
        ">>" => u32::try_from(right).ok().and_then(|shift| left.checked_shr(shift)),
        "&" => Some(left & right),
        "|" => Some(left | right),
        "^" => Some(left ^ right),
        _ => None,
    }
}

/// Evaluates `expr`, resolving identifiers through `lookup`.
pub fn eval_int_expr<F>(expr: &str, lookup: F) -> Option<i64>
where
    F: Fn(&str) -> Option<i64>,
{
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return None;
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        lookup: &lookup,
    };
    let value = parser.binary(0)?;
    (parser.pos == tokens.len()).then_some(value)
}

/// Evaluates an expression that may not reference any identifier.
pub fn eval_literal_expr(expr: &str) -> Option<i64> {
    eval_int_expr(expr, |_| None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_in_every_radix() {
        assert_eq!(eval_literal_expr("42"), Some(42));
        assert_eq!(eval_literal_expr("0x1F"), Some(31));
        assert_eq!(eval_literal_expr("010"), Some(8));
        assert_eq!(eval_literal_expr("0b101"), Some(5));
        assert_eq!(eval_literal_expr("7u"), Some(7));
        assert_eq!(eval_literal_expr("0xFFUL"), Some(255));
        assert_eq!(eval_literal_expr("0"), Some(0));
    }

    #[test]
    fn precedence_follows_c() {
        assert_eq!(eval_literal_expr("1 + 2 * 3"), Some(7));
        assert_eq!(eval_literal_expr("(1 + 2) * 3"), Some(9));
        assert_eq!(eval_literal_expr("1 << 4 | 1"), Some(17));
        assert_eq!(eval_literal_expr("-1"), Some(-1));
        assert_eq!(eval_literal_expr("~0 & 0xF"), Some(15));
        assert_eq!(eval_literal_expr("10 - 4 - 3"), Some(3));
    }

    #[test]
    fn identifiers_resolve_through_lookup() {
        let lookup = |name: &str| (name == "BASE").then_some(100);
        assert_eq!(eval_int_expr("BASE + 1", lookup), Some(101));
        assert_eq!(eval_int_expr("OTHER + 1", lookup), None);
    }

    #[test]
    fn unsupported_input_is_unresolved() {
        assert_eq!(eval_literal_expr(""), None);
        assert_eq!(eval_literal_expr("1 / 0"), None);
        assert_eq!(eval_literal_expr("sizeof(int)"), None);
        assert_eq!(eval_literal_expr("(1 + 2"), None);
        assert_eq!(eval_literal_expr("1 2"), None);
        assert_eq!(eval_literal_expr("\"1\""), None);
    }
}
