//! Restricted arithmetic expressions
//!
//! Grammar (whitespace ignored):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := ('-' | '+') unary | primary
//! primary := NUMBER | '$' NAME ('[' INDEX ']')* | '(' expr ')'
//! ```
//!
//! Anything else (identifiers, calls, attribute access, strings) is
//! rejected while tokenizing. Integer arithmetic stays integral except for
//! `/`, which always yields a float. `%` takes the sign of the divisor.

use pad_core::value;
use serde_json::Value;

use crate::error::{ScriptError, ScriptResult};

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn into_value(self) -> ScriptResult<Value> {
        match self {
            Num::Int(i) => Ok(Value::from(i)),
            Num::Float(f) => value::from_f64(f)
                .ok_or_else(|| ScriptError::expression("result is not a finite number")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(Num),
    Var(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
}

fn describe(token: &Token) -> String {
    match token {
        Token::Num(Num::Int(i)) => i.to_string(),
        Token::Num(Num::Float(f)) => f.to_string(),
        Token::Var(name) => format!("${name}"),
        Token::Plus => "+".into(),
        Token::Minus => "-".into(),
        Token::Star => "*".into(),
        Token::Slash => "/".into(),
        Token::Percent => "%".into(),
        Token::LParen => "(".into(),
        Token::RParen => ")".into(),
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(source: &str) -> ScriptResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '/' | '%' | '(' | ')' => {
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '(' => Token::LParen,
                    _ => Token::RParen,
                });
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && is_name_char(chars[i]) {
                    return Err(ScriptError::expression(format!(
                        "malformed number near '{}'",
                        chars[start..=i].iter().collect::<String>()
                    )));
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Num(parse_number(&text)?));
            }
            '$' => {
                let start = i + 1;
                i = start;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                if i == start {
                    return Err(ScriptError::expression("'$' must be followed by a name"));
                }
                while i < chars.len() && chars[i] == '[' {
                    let Some(close) = chars[i..].iter().position(|&c| c == ']') else {
                        return Err(ScriptError::expression("unclosed '[' in variable index"));
                    };
                    i += close + 1;
                }
                tokens.push(Token::Var(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                return Err(ScriptError::expression(format!(
                    "identifier '{name}' is not allowed (use $name for variables)"
                )));
            }
            other => {
                return Err(ScriptError::expression(format!(
                    "unexpected character '{other}'"
                )));
            }
        }
    }

    Ok(tokens)
}

fn parse_number(text: &str) -> ScriptResult<Num> {
    if !text.contains('.') {
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Num::Int(i));
        }
    }
    text.parse::<f64>()
        .map(Num::Float)
        .map_err(|_| ScriptError::expression(format!("malformed number '{text}'")))
}

/// Numeric view of a substituted variable
fn value_to_num(name: &str, value: &Value) -> ScriptResult<Num> {
    match value {
        Value::Number(n) => Ok(n
            .as_i64()
            .map(Num::Int)
            .unwrap_or_else(|| Num::Float(n.as_f64().unwrap_or(f64::NAN)))),
        Value::Bool(b) => Ok(Num::Int(i64::from(*b))),
        Value::String(s) => parse_number(s.trim()).map_err(|_| {
            ScriptError::expression(format!("${name} is the string {s:?}, not a number"))
        }),
        other => Err(ScriptError::expression(format!(
            "${name} is a {}, not a number",
            value::type_name(other)
        ))),
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    lookup: &'a dyn Fn(&str) -> ScriptResult<Value>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> ScriptResult<Num> {
        let mut left = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.term()?;
            left = binary(&op, left, right)?;
        }
        Ok(left)
    }

    fn term(&mut self) -> ScriptResult<Num> {
        let mut left = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash | Token::Percent)) = self.peek().cloned() {
            self.pos += 1;
            let right = self.unary()?;
            left = binary(&op, left, right)?;
        }
        Ok(left)
    }

    fn unary(&mut self) -> ScriptResult<Num> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                self.nested(|p| p.unary()).and_then(negate)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.nested(|p| p.unary())
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> ScriptResult<Num> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::Var(name)) => {
                let value = (self.lookup)(&name)?;
                value_to_num(&name, &value)
            }
            Some(Token::LParen) => {
                let inner = self.nested(|p| p.expr())?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(ScriptError::expression(format!(
                        "expected ')' but found '{}'",
                        describe(&other)
                    ))),
                    None => Err(ScriptError::expression("missing ')'")),
                }
            }
            Some(other) => Err(ScriptError::expression(format!(
                "unexpected '{}'",
                describe(&other)
            ))),
            None => Err(ScriptError::expression("unexpected end of expression")),
        }
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self) -> ScriptResult<Num>) -> ScriptResult<Num> {
        if self.depth >= MAX_DEPTH {
            return Err(ScriptError::expression("expression nested too deeply"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }
}

fn negate(n: Num) -> ScriptResult<Num> {
    match n {
        Num::Int(i) => i
            .checked_neg()
            .map(Num::Int)
            .ok_or_else(|| ScriptError::expression("integer overflow")),
        Num::Float(f) => Ok(Num::Float(-f)),
    }
}

fn floor_mod_int(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    Some(if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
}

fn floor_mod_float(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

fn binary(op: &Token, left: Num, right: Num) -> ScriptResult<Num> {
    let overflow = || ScriptError::expression("integer overflow");
    let result = match (op, left, right) {
        (Token::Slash, _, r) if r.as_f64() == 0.0 => {
            return Err(ScriptError::expression("division by zero"))
        }
        (Token::Percent, _, r) if r.as_f64() == 0.0 => {
            return Err(ScriptError::expression("modulo by zero"))
        }
        (Token::Slash, l, r) => Num::Float(l.as_f64() / r.as_f64()),
        (Token::Plus, Num::Int(a), Num::Int(b)) => Num::Int(a.checked_add(b).ok_or_else(overflow)?),
        (Token::Minus, Num::Int(a), Num::Int(b)) => Num::Int(a.checked_sub(b).ok_or_else(overflow)?),
        (Token::Star, Num::Int(a), Num::Int(b)) => Num::Int(a.checked_mul(b).ok_or_else(overflow)?),
        (Token::Percent, Num::Int(a), Num::Int(b)) => {
            Num::Int(floor_mod_int(a, b).ok_or_else(overflow)?)
        }
        (Token::Plus, l, r) => Num::Float(l.as_f64() + r.as_f64()),
        (Token::Minus, l, r) => Num::Float(l.as_f64() - r.as_f64()),
        (Token::Star, l, r) => Num::Float(l.as_f64() * r.as_f64()),
        (Token::Percent, l, r) => Num::Float(floor_mod_float(l.as_f64(), r.as_f64())),
        (other, _, _) => {
            return Err(ScriptError::expression(format!(
                "'{}' is not an operator",
                describe(other)
            )))
        }
    };
    Ok(result)
}

/// Evaluate `source` (without the leading `=`)
///
/// `lookup` receives each variable reference without its `$` (for example
/// `count` or `grid[1][$i]`).
pub fn evaluate(source: &str, lookup: &dyn Fn(&str) -> ScriptResult<Value>) -> ScriptResult<Value> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ScriptError::expression("empty expression"));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        lookup,
    };
    let result = parser.expr()?;
    if let Some(extra) = parser.peek() {
        return Err(ScriptError::expression(format!(
            "unexpected '{}' after expression",
            describe(extra)
        )));
    }
    result.into_value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(source: &str) -> ScriptResult<Value> {
        evaluate(source, &|name| match name {
            "a" => Ok(json!(1)),
            "b" => Ok(json!(2)),
            "half" => Ok(json!(0.5)),
            "flag" => Ok(json!(true)),
            "text" => Ok(json!("12")),
            "word" => Ok(json!("hello")),
            "list[1]" => Ok(json!(7)),
            other => Err(ScriptError::UndefinedVariable {
                name: other.to_string(),
            }),
        })
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("2+3*4").unwrap(), json!(14));
        assert_eq!(eval("(2+3)*4").unwrap(), json!(20));
        assert_eq!(eval("10 - 4 - 3").unwrap(), json!(3));
        assert_eq!(eval("-2 * -3").unwrap(), json!(6));
        assert_eq!(eval("+5").unwrap(), json!(5));
    }

    #[test]
    fn test_variables() {
        assert_eq!(eval("$a+$b").unwrap(), json!(3));
        assert_eq!(eval("$a + $half").unwrap(), json!(1.5));
        assert_eq!(eval("$flag + 1").unwrap(), json!(2));
        assert_eq!(eval("$text * 2").unwrap(), json!(24));
        assert_eq!(eval("$list[1] - 2").unwrap(), json!(5));
    }

    #[test]
    fn test_division_and_modulo() {
        assert_eq!(eval("7 / 2").unwrap(), json!(3.5));
        assert_eq!(eval("6 / 3").unwrap(), json!(2.0));
        assert_eq!(eval("7 % 3").unwrap(), json!(1));
        assert_eq!(eval("-7 % 3").unwrap(), json!(2));
        assert_eq!(eval("7 % -3").unwrap(), json!(-2));
        assert_eq!(eval("5.5 % 2").unwrap(), json!(1.5));
    }

    #[test]
    fn test_undefined_variable_propagates() {
        let err = eval("$missing + 1").unwrap_err();
        assert!(matches!(err, ScriptError::UndefinedVariable { name } if name == "missing"));
    }

    #[test]
    fn test_disallowed_constructs() {
        for source in [
            "abs(1)",
            "__import__('os')",
            "$a.real",
            "2 ** 3",
            "1 < 2",
            "'text'",
            "[1, 2]",
            "x",
            "",
            "(1 + 2",
            "1 2",
            "$word + 1",
            "1abc",
        ] {
            let err = eval(source).unwrap_err();
            assert!(
                matches!(err, ScriptError::Expression(_)),
                "{source:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_arithmetic_faults() {
        assert!(matches!(eval("1 / 0"), Err(ScriptError::Expression(_))));
        assert!(matches!(eval("1 % 0"), Err(ScriptError::Expression(_))));
        assert!(matches!(
            eval("9223372036854775807 + 1"),
            Err(ScriptError::Expression(_))
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(matches!(eval(&deep), Err(ScriptError::Expression(_))));
        let ok = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert_eq!(eval(&ok).unwrap(), json!(1));
    }

    #[test]
    fn test_depth_balanced_after_limit() {
        let lookup = |_: &str| -> ScriptResult<Value> { Ok(json!(0)) };
        let mut parser = Parser {
            tokens: tokenize("1").unwrap(),
            pos: 0,
            depth: MAX_DEPTH,
            lookup: &lookup,
        };
        assert!(parser.nested(|p| p.expr()).is_err());
        assert_eq!(parser.depth, MAX_DEPTH);

        parser.depth = MAX_DEPTH - 1;
        assert!(parser.nested(|p| p.expr()).is_ok());
        assert_eq!(parser.depth, MAX_DEPTH - 1);
    }
}
