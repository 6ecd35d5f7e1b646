// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Expression evaluator backing the `javascript` step kind. Per the design
//! notes, sandboxed script execution is replaced with a small hand-rolled
//! evaluator over the same restricted grammar the Condition Evaluator uses,
//! extended with a fixed utility surface (`sum`, `avg`, `extractNumbers`,
//! `extractEmails`, `wordCount`, `validate::*`, `analyze::sentiment`) backed
//! by native Rust functions rather than an embedded JS engine.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum JsValue {
    Number(f64),
    Str(String),
    Bool(bool),
    Array(Vec<JsValue>),
}

impl fmt::Display for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsValue::Number(n) => write!(f, "{n}"),
            JsValue::Str(s) => write!(f, "{s}"),
            JsValue::Bool(b) => write!(f, "{b}"),
            JsValue::Array(items) => {
                let rendered: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

impl JsValue {
    fn as_number(&self) -> Result<f64, String> {
        match self {
            JsValue::Number(n) => Ok(*n),
            JsValue::Array(items) if !items.is_empty() => {
                let sum: f64 = items.iter().filter_map(|v| v.as_number().ok()).sum();
                Ok(sum)
            }
            other => Err(format!("expected a number, got {other}")),
        }
    }

    fn as_str(&self) -> Result<&str, String> {
        match self {
            JsValue::Str(s) => Ok(s),
            other => Err(format!("expected a string, got {other}")),
        }
    }

    fn flatten_numbers(args: &[JsValue]) -> Vec<f64> {
        let mut out = Vec::new();
        for arg in args {
            match arg {
                JsValue::Number(n) => out.push(*n),
                JsValue::Array(items) => out.extend(Self::flatten_numbers(items)),
                _ => {}
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    ColonColon,
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                tokens.push(Token::ColonColon);
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err("unterminated string literal".to_string());
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let mut s = String::new();
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    s.push(chars[i]);
                    i += 1;
                }
                let n = s.parse::<f64>().map_err(|_| format!("invalid number literal '{s}'"))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut s = String::new();
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    s.push(chars[i]);
                    i += 1;
                }
                tokens.push(Token::Ident(s));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<(), String> {
        match self.advance() {
            Some(t) if &t == expected => Ok(()),
            Some(other) => Err(format!("expected {expected:?}, found {other:?}")),
            None => Err(format!("expected {expected:?}, found end of input")),
        }
    }

    fn parse_expr(&mut self) -> Result<JsValue, String> {
        let mut left = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    let right = self.parse_term()?;
                    left = add(left, right)?;
                }
                Some(Token::Minus) => {
                    self.advance();
                    let right = self.parse_term()?;
                    left = JsValue::Number(left.as_number()? - right.as_number()?);
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<JsValue, String> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    let right = self.parse_unary()?;
                    left = JsValue::Number(left.as_number()? * right.as_number()?);
                }
                Some(Token::Slash) => {
                    self.advance();
                    let right = self.parse_unary()?;
                    let denom = right.as_number()?;
                    if denom == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    left = JsValue::Number(left.as_number()? / denom);
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<JsValue, String> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            let val = self.parse_unary()?;
            return Ok(JsValue::Number(-val.as_number()?));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<JsValue, String> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(JsValue::Number(n)),
            Some(Token::Str(s)) => Ok(JsValue::Str(s)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                let mut full_name = name;
                if matches!(self.peek(), Some(Token::ColonColon)) {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(rest)) => full_name = format!("{full_name}::{rest}"),
                        other => return Err(format!("expected identifier after '::', found {other:?}")),
                    }
                }
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Some(Token::RParen)) {
                        args.push(self.parse_expr()?);
                        while matches!(self.peek(), Some(Token::Comma)) {
                            self.advance();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(&Token::RParen)?;
                    apply_function(&full_name, args)
                } else {
                    match full_name.as_str() {
                        "true" => Ok(JsValue::Bool(true)),
                        "false" => Ok(JsValue::Bool(false)),
                        other => Err(format!("unknown identifier '{other}'")),
                    }
                }
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

fn add(left: JsValue, right: JsValue) -> Result<JsValue, String> {
    match (&left, &right) {
        (JsValue::Str(_), _) | (_, JsValue::Str(_)) => Ok(JsValue::Str(format!("{left}{right}"))),
        _ => Ok(JsValue::Number(left.as_number()? + right.as_number()?)),
    }
}

fn apply_function(name: &str, args: Vec<JsValue>) -> Result<JsValue, String> {
    match name {
        "sum" => Ok(JsValue::Number(JsValue::flatten_numbers(&args).into_iter().sum())),
        "avg" => {
            let nums = JsValue::flatten_numbers(&args);
            if nums.is_empty() {
                return Err("avg() requires at least one numeric argument".to_string());
            }
            Ok(JsValue::Number(nums.iter().sum::<f64>() / nums.len() as f64))
        }
        "extractNumbers" => {
            let text = args.first().ok_or("extractNumbers() requires one argument")?.as_str()?;
            Ok(JsValue::Array(extract_numbers(text).into_iter().map(JsValue::Number).collect()))
        }
        "extractEmails" => {
            let text = args.first().ok_or("extractEmails() requires one argument")?.as_str()?;
            Ok(JsValue::Array(extract_emails(text).into_iter().map(JsValue::Str).collect()))
        }
        "wordCount" => {
            let text = args.first().ok_or("wordCount() requires one argument")?.as_str()?;
            Ok(JsValue::Number(text.split_whitespace().count() as f64))
        }
        "validate::email" => {
            let text = args.first().ok_or("validate::email() requires one argument")?.as_str()?;
            Ok(JsValue::Bool(is_valid_email(text)))
        }
        "validate::url" => {
            let text = args.first().ok_or("validate::url() requires one argument")?.as_str()?;
            Ok(JsValue::Bool(text.starts_with("http://") || text.starts_with("https://")))
        }
        "analyze::sentiment" => {
            let text = args.first().ok_or("analyze::sentiment() requires one argument")?.as_str()?;
            Ok(JsValue::Str(sentiment_of(text).to_string()))
        }
        other => Err(format!("unknown function '{other}'")),
    }
}

fn extract_numbers(text: &str) -> Vec<f64> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_digit() || c == '.' {
            current.push(c);
        } else if !current.is_empty() {
            if let Ok(n) = current.parse::<f64>() {
                out.push(n);
            }
            current.clear();
        }
    }
    out
}

fn extract_emails(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|tok| tok.trim_matches(|c: char| !c.is_alphanumeric() && c != '@' && c != '.' && c != '_' && c != '-'))
        .filter(|tok| is_valid_email(tok))
        .map(|s| s.to_string())
        .collect()
}

fn is_valid_email(text: &str) -> bool {
    let Some((local, domain)) = text.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

const POSITIVE_WORDS: &[&str] = &["good", "great", "excellent", "success", "pass", "happy", "love", "works"];
const NEGATIVE_WORDS: &[&str] = &["bad", "fail", "error", "broken", "hate", "problem", "crash"];

fn sentiment_of(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    let positive = POSITIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
    let negative = NEGATIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => "positive",
        std::cmp::Ordering::Less => "negative",
        std::cmp::Ordering::Equal => "neutral",
    }
}

/// Evaluates a script and returns its final value. The grammar supports
/// number/string literals, `+ - * /`, parenthesized groups, and the fixed
/// utility function surface; there is no control flow, matching the
/// expression-evaluator-not-embedded-engine decision.
pub fn evaluate(script: &str) -> Result<JsValue, String> {
    let tokens = tokenize(script)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err("trailing tokens after expression".to_string());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_arithmetic() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), JsValue::Number(14.0));
    }

    #[test]
    fn evaluates_sum_and_avg() {
        assert_eq!(evaluate("sum(1, 2, 3)").unwrap(), JsValue::Number(6.0));
        assert_eq!(evaluate("avg(2, 4)").unwrap(), JsValue::Number(3.0));
    }

    #[test]
    fn extracts_numbers_from_text() {
        let result = evaluate("extractNumbers(\"order 12 of 45 units\")").unwrap();
        assert_eq!(result, JsValue::Array(vec![JsValue::Number(12.0), JsValue::Number(45.0)]));
    }

    #[test]
    fn validates_email_addresses() {
        assert_eq!(evaluate("validate::email(\"a@b.com\")").unwrap(), JsValue::Bool(true));
        assert_eq!(evaluate("validate::email(\"not-an-email\")").unwrap(), JsValue::Bool(false));
    }

    #[test]
    fn analyzes_sentiment() {
        assert_eq!(evaluate("analyze::sentiment(\"this works great\")").unwrap(), JsValue::Str("positive".to_string()));
    }

    #[test]
    fn string_concatenation_via_plus() {
        assert_eq!(evaluate("\"a\" + \"b\"").unwrap(), JsValue::Str("ab".to_string()));
    }

    #[test]
    fn rejects_unknown_function() {
        assert!(evaluate("frobnicate(1)").is_err());
    }
}
