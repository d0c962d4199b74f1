//! Classification and quoting of the literal text typed into block slots.

use alloc::string::String;
use core::fmt::Write;

use checked_float::{CheckedFloat, FloatChecker};
use compact_str::CompactString;

/// Error type used by [`NumberChecker`].
#[derive(Debug)]
pub enum NumberError {
    Nan,
    Infinity,
}

/// [`FloatChecker`] type used for validating a [`Number`].
pub struct NumberChecker;
impl FloatChecker<f64> for NumberChecker {
    type Error = NumberError;
    fn check(value: f64) -> Result<f64, Self::Error> {
        if value.is_nan() { return Err(NumberError::Nan); }
        if value.is_infinite() { return Err(NumberError::Infinity); }
        Ok(if value.to_bits() == 0x8000000000000000 { 0.0 } else { value }) // lua prints -0.0 as "-0.0", which the editor would never show
    }
}

/// The type used to represent numeric literals.
pub type Number = CheckedFloat<f64, NumberChecker>;

/// Parses a number the way the editor accepts it in numeric slots, including `0x`, `0o`, and `0b` prefixes.
pub fn parse_number(s: &str) -> Option<Number> {
    let s = s.trim();
    let parsed = match s.get(..2) {
        Some("0x" | "0X") => i64::from_str_radix(&s[2..], 16).ok().map(|x| x as f64),
        Some("0o" | "0O") => i64::from_str_radix(&s[2..], 8).ok().map(|x| x as f64),
        Some("0b" | "0B") => i64::from_str_radix(&s[2..], 2).ok().map(|x| x as f64),
        _ => s.parse::<f64>().ok(),
    };
    parsed.and_then(|x| Number::new(x).ok())
}
/// Renders a number as a lua numeric literal.
pub fn stringify_number(v: Number) -> CompactString {
    debug_assert!(v.get().is_finite());
    let mut buf = ryu::Buffer::new();
    let res = buf.format_finite(v.get());
    CompactString::new(res.strip_suffix(".0").unwrap_or(res))
}

/// The interpretation of a literal slot's text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal<'a> {
    Number(Number),
    Bool(bool),
    Text(&'a str),
}
impl<'a> Literal<'a> {
    pub fn classify(text: &'a str) -> Self {
        match text {
            "true" => Literal::Bool(true),
            "false" => Literal::Bool(false),
            _ => match parse_number(text) {
                Some(x) if !text.trim().is_empty() => Literal::Number(x),
                _ => Literal::Text(text),
            }
        }
    }
    /// Renders the literal as a lua value of its natural type.
    pub fn to_lua(self) -> String {
        match self {
            Literal::Number(x) => stringify_number(x).into(),
            Literal::Bool(x) => if x { "true".into() } else { "false".into() },
            Literal::Text(x) => quote(x),
        }
    }
    /// Renders the literal where a number is expected; empty slots count as `0`.
    pub fn to_lua_number(self) -> String {
        match self {
            Literal::Text(x) if x.trim().is_empty() => "0".into(),
            x => x.to_lua(),
        }
    }
}

/// Quotes `text` as a double-quoted lua string literal.
///
/// Backslashes, quotes, and line breaks get their short escapes and every other control byte is written as a decimal escape,
/// so the result never spans more than one line.
pub fn quote(text: &str) -> String {
    let mut res = String::with_capacity(text.len() + 2);
    res.push('"');
    for ch in text.chars() {
        match ch {
            '\\' => res.push_str("\\\\"),
            '"' => res.push_str("\\\""),
            '\n' => res.push_str("\\n"),
            '\r' => res.push_str("\\r"),
            ch if (ch as u32) < 0x20 || ch as u32 == 0x7f => { write!(res, "\\{:03}", ch as u32).ok(); }
            ch => res.push(ch),
        }
    }
    res.push('"');
    res
}

/// Checks if `name` can be spliced into generated code as a lua identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_'),
        _ => false,
    }
}

#[test]
fn test_number_to_string() {
    assert_eq!(stringify_number(Number::new(0.0).unwrap()), "0");
    assert_eq!(stringify_number(Number::new(-0.0).unwrap()), "0");
    assert_eq!(stringify_number(Number::new(7.0).unwrap()), "7");
    assert_eq!(stringify_number(Number::new(-13.0).unwrap()), "-13");
    assert_eq!(stringify_number(Number::new(0.25).unwrap()), "0.25");
    assert_eq!(stringify_number(Number::new(5.67e50).unwrap()), "5.67e50");
    assert_eq!(stringify_number(Number::new(6e-24).unwrap()), "6e-24");
}

#[test]
fn test_classify() {
    assert_eq!(Literal::classify("3").to_lua(), "3");
    assert_eq!(Literal::classify(" 0x1F ").to_lua(), "31");
    assert_eq!(Literal::classify("1e3").to_lua(), "1000");
    assert_eq!(Literal::classify("true"), Literal::Bool(true));
    assert_eq!(Literal::classify("hello").to_lua(), "\"hello\"");
    assert_eq!(Literal::classify("").to_lua(), "\"\"");
    assert_eq!(Literal::classify("").to_lua_number(), "0");
    assert_eq!(Literal::classify("NaN").to_lua(), "\"NaN\"");
    assert_eq!(Literal::classify("inf").to_lua(), "\"inf\"");
}

#[test]
fn test_quote() {
    assert_eq!(quote("plain"), "\"plain\"");
    assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
    assert_eq!(quote("a\\b"), "\"a\\\\b\"");
    assert_eq!(quote("two\nlines\r"), "\"two\\nlines\\r\"");
    assert_eq!(quote("bell\u{7}"), "\"bell\\007\"");
    assert_eq!(quote("gat ☺"), "\"gat ☺\"");
    assert!(!quote("x\ny").contains('\n'));
}

#[test]
fn test_is_identifier() {
    assert!(is_identifier("GPIO4"));
    assert!(is_identifier("_x1"));
    assert!(!is_identifier("4GPIO"));
    assert!(!is_identifier("GPIO4); os.exit("));
    assert!(!is_identifier(""));
}
