// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Condition Evaluator (§4.2): structured v2.0 condition trees, and a
//! hand-rolled recursive-descent parser for the restricted legacy
//! expression grammar. Per the Design Notes (§9), the legacy grammar is
//! deliberately NOT implemented by reusing a general-purpose expression
//! evaluator crate.

use std::collections::HashMap;

use crate::status::StepStatus;
use crate::template::{self, TemplateContext};
use crate::workflow::{Combinator, Condition, ConditionDataType, ConditionGroup, ConditionOp, ConditionOperand, StepField};

/// A read-only snapshot of one step's result, as seen by the evaluator.
#[derive(Debug, Clone)]
pub struct StepResultView {
    pub status: StepStatus,
    pub response: String,
}

/// Everything a condition may read: prior step results/outputs, session
/// refs, and the run identifiers (§4.2's `context`).
pub struct ConditionContext<'a> {
    pub step_results: &'a HashMap<String, StepResultView>,
    pub step_outputs: &'a HashMap<String, String>,
    pub thread_id: &'a str,
    pub project_id: Option<&'a str>,
}

/// Result of evaluating any condition: exactly one of true/false, plus an
/// optional diagnostic. Totality is the contract (§8): evaluation never
/// panics and never returns anything but `true` or `false`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionOutcome {
    pub result: bool,
    pub error: Option<String>,
}

impl ConditionOutcome {
    fn ok(result: bool) -> Self {
        Self { result, error: None }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            result: false,
            error: Some(message.into()),
        }
    }
}

/// Dispatches to the structured or legacy evaluator depending on the
/// condition's shape.
pub fn evaluate(condition: &Condition, ctx: &ConditionContext) -> ConditionOutcome {
    match condition {
        Condition::Structured(structured) => evaluate_group(&structured.root_group, ctx),
        Condition::Legacy { expression } | Condition::Bare(expression) => {
            evaluate_legacy(expression, ctx)
        }
    }
}

// ---------------------------------------------------------------------
// Structured v2.0 evaluation
// ---------------------------------------------------------------------

fn evaluate_group(group: &ConditionGroup, ctx: &ConditionContext) -> ConditionOutcome {
    if group.rules.is_empty() && group.subgroups.is_empty() {
        return ConditionOutcome::ok(matches!(group.combinator, Combinator::And));
    }

    let mut short_circuit_value = None;
    let mut first_error: Option<String> = None;

    macro_rules! fold {
        ($outcome:expr) => {{
            let outcome: ConditionOutcome = $outcome;
            if outcome.error.is_some() && first_error.is_none() {
                first_error = outcome.error.clone();
            }
            match group.combinator {
                Combinator::And => {
                    if !outcome.result {
                        short_circuit_value = Some(false);
                    }
                }
                Combinator::Or => {
                    if outcome.result {
                        short_circuit_value = Some(true);
                    }
                }
            }
        }};
    }

    for rule in &group.rules {
        if short_circuit_value.is_some() {
            break;
        }
        fold!(evaluate_rule(rule, ctx));
    }
    for sub in &group.subgroups {
        if short_circuit_value.is_some() {
            break;
        }
        fold!(evaluate_group(sub, ctx));
    }

    let result = short_circuit_value.unwrap_or(matches!(group.combinator, Combinator::And));
    ConditionOutcome {
        result,
        error: first_error,
    }
}

fn evaluate_rule(rule: &crate::workflow::ConditionRule, ctx: &ConditionContext) -> ConditionOutcome {
    let left = match resolve_operand(&rule.left, ctx) {
        Ok(v) => v,
        Err(e) => return ConditionOutcome::err(e),
    };
    let right = match resolve_operand(&rule.right, ctx) {
        Ok(v) => v,
        Err(e) => return ConditionOutcome::err(e),
    };

    let left = match coerce(&left, rule.data_type) {
        Ok(v) => v,
        Err(e) => return ConditionOutcome::err(e),
    };
    let right = match coerce(&right, rule.data_type) {
        Ok(v) => v,
        Err(e) => return ConditionOutcome::err(e),
    };

    apply_op(&left, rule.op, &right)
}

fn resolve_operand(op: &ConditionOperand, ctx: &ConditionContext) -> Result<Value, String> {
    match op {
        ConditionOperand::Literal { value, .. } => Ok(Value::from_json(value)),
        ConditionOperand::StepField { step_id, field } => {
            let result = ctx
                .step_results
                .get(step_id)
                .ok_or_else(|| format!("no result for step '{step_id}'"))?;
            Ok(match field {
                StepField::Output | StepField::Response => Value::Str(result.response.clone()),
                StepField::Status => Value::Str(status_word(result.status).to_string()),
            })
        }
    }
}

fn status_word(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Success => "success",
        StepStatus::Blocked => "blocked",
        StepStatus::Failed => "failed",
        StepStatus::NotExecuted => "not_executed",
        StepStatus::Skipped => "skipped",
        StepStatus::Aborted => "aborted",
    }
}

fn coerce(value: &Value, data_type: ConditionDataType) -> Result<Value, String> {
    match (data_type, value) {
        (ConditionDataType::String, v) => Ok(Value::Str(v.to_str())),
        (ConditionDataType::Number, v) => v.to_num().map(Value::Num),
        (ConditionDataType::Boolean, v) => Ok(Value::Bool(v.to_bool())),
    }
}

fn apply_op(left: &Value, op: ConditionOp, right: &Value) -> ConditionOutcome {
    let result = match op {
        ConditionOp::Equals => values_equal(left, right),
        ConditionOp::NotEquals => !values_equal(left, right),
        ConditionOp::Contains => left.to_str().contains(&right.to_str()),
        ConditionOp::NotContains => !left.to_str().contains(&right.to_str()),
        ConditionOp::GreaterThan | ConditionOp::GreaterThanOrEqual
        | ConditionOp::LessThan | ConditionOp::LessThanOrEqual => {
            let (l, r) = match (left.to_num(), right.to_num()) {
                (Ok(l), Ok(r)) => (l, r),
                _ => return ConditionOutcome::err("numeric comparison on non-numeric operand"),
            };
            match op {
                ConditionOp::GreaterThan => l > r,
                ConditionOp::GreaterThanOrEqual => l >= r,
                ConditionOp::LessThan => l < r,
                ConditionOp::LessThanOrEqual => l <= r,
                _ => unreachable!(),
            }
        }
    };
    ConditionOutcome::ok(result)
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Num(a), Value::Num(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => left.to_str() == right.to_str(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::Bool(b) => Value::Bool(*b),
            other => Value::Str(other.to_string()),
        }
    }

    fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Num(n) => {
                if n.fract() == 0.0 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::Bool(b) => b.to_string(),
        }
    }

    fn to_num(&self) -> Result<f64, String> {
        match self {
            Value::Num(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("cannot coerce '{s}' to a number")),
        }
    }

    fn to_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty() && s != "false",
        }
    }
}

// ---------------------------------------------------------------------
// Legacy expression evaluation: resolve templates, then a hand-rolled
// recursive-descent parser over the restricted grammar from §4.2/§9.
// ---------------------------------------------------------------------

fn evaluate_legacy(expression: &str, ctx: &ConditionContext) -> ConditionOutcome {
    let step_outputs = ctx.step_outputs.clone();
    let template_ctx = TemplateContext {
        step_outputs: &step_outputs,
        thread_id: ctx.thread_id,
        project_id: ctx.project_id,
    };
    let resolved = template::resolve(expression, &template_ctx);

    let tokens = match tokenize(&resolved) {
        Ok(t) => t,
        Err(e) => return ConditionOutcome::err(e),
    };
    let mut parser = Parser { tokens, pos: 0 };
    let value = match parser.parse_or() {
        Ok(v) => v,
        Err(e) => return ConditionOutcome::err(e),
    };
    if parser.pos != parser.tokens.len() {
        return ConditionOutcome::err("unexpected trailing tokens in legacy expression");
    }
    ConditionOutcome::ok(value.to_bool())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Num(f64),
    Ident(String),
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Not,
    Dot,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
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
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err("'=' is not a valid operator; use '=='".to_string());
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err("'&' is not a valid operator; use '&&'".to_string());
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err("'|' is not a valid operator; use '||'".to_string());
                }
            }
            _ if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number literal '{text}'"))?;
                tokens.push(Token::Num(n));
            }
            _ if c.is_alphanumeric() || c == '_' || c == '-' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(text));
            }
            _ => return Err(format!("unexpected character '{c}' in legacy expression")),
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

    fn expect(&mut self, token: &Token) -> Result<(), String> {
        match self.advance() {
            Some(t) if &t == token => Ok(()),
            Some(t) => Err(format!("expected {token:?}, found {t:?}")),
            None => Err(format!("expected {token:?}, found end of expression")),
        }
    }

    fn parse_or(&mut self) -> Result<Value, String> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let right = self.parse_and()?;
            left = Value::Bool(left.to_bool() || right.to_bool());
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Value, String> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let right = self.parse_not()?;
            left = Value::Bool(left.to_bool() && right.to_bool());
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Value, String> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            let v = self.parse_not()?;
            return Ok(Value::Bool(!v.to_bool()));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Value, String> {
        let left = self.parse_primary()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(ConditionOp::Equals),
            Some(Token::NotEq) => Some(ConditionOp::NotEquals),
            Some(Token::Lt) => Some(ConditionOp::LessThan),
            Some(Token::Gt) => Some(ConditionOp::GreaterThan),
            Some(Token::Le) => Some(ConditionOp::LessThanOrEqual),
            Some(Token::Ge) => Some(ConditionOp::GreaterThanOrEqual),
            _ => None,
        };
        let Some(op) = op else { return Ok(left) };
        self.advance();
        let right = self.parse_primary()?;
        let outcome = apply_op(&left, op, &right);
        if let Some(err) = outcome.error {
            return Err(err);
        }
        Ok(Value::Bool(outcome.result))
    }

    fn parse_primary(&mut self) -> Result<Value, String> {
        let mut value = self.parse_atom()?;
        // Optional `.includes(arg)` postfix.
        while matches!(self.peek(), Some(Token::Dot)) {
            self.advance();
            let method = match self.advance() {
                Some(Token::Ident(name)) => name,
                other => return Err(format!("expected method name after '.', found {other:?}")),
            };
            if method != "includes" {
                return Err(format!("unsupported method '.{method}()'"));
            }
            self.expect(&Token::LParen)?;
            let arg = self.parse_or()?;
            self.expect(&Token::RParen)?;
            value = Value::Bool(value.to_str().contains(&arg.to_str()));
        }
        Ok(value)
    }

    fn parse_atom(&mut self) -> Result<Value, String> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Value::Str(s)),
            Some(Token::Num(n)) => Ok(Value::Num(n)),
            Some(Token::LParen) => {
                let v = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(v)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "parseInt" | "parseFloat" => {
                    self.expect(&Token::LParen)?;
                    let arg = self.parse_or()?;
                    self.expect(&Token::RParen)?;
                    let n = arg.to_num()?;
                    Ok(Value::Num(if name == "parseInt" { n.trunc() } else { n }))
                }
                _ => Ok(Value::Str(name)),
            },
            other => Err(format!("unexpected token {other:?} in legacy expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ConditionDataType as DT, ConditionOp as Op, ConditionRule};

    fn ctx<'a>(
        results: &'a HashMap<String, StepResultView>,
        outputs: &'a HashMap<String, String>,
    ) -> ConditionContext<'a> {
        ConditionContext {
            step_results: results,
            step_outputs: outputs,
            thread_id: "t1",
            project_id: None,
        }
    }

    fn success(response: &str) -> StepResultView {
        StepResultView {
            status: StepStatus::Success,
            response: response.to_string(),
        }
    }

    #[test]
    fn structured_equals_true() {
        let mut results = HashMap::new();
        results.insert("s1".to_string(), success("success"));
        let outputs = HashMap::new();
        let rule = ConditionRule {
            left: ConditionOperand::StepField {
                step_id: "s1".to_string(),
                field: StepField::Output,
            },
            op: Op::Equals,
            right: ConditionOperand::Literal {
                data_type: DT::String,
                value: serde_json::json!("success"),
            },
            data_type: DT::String,
        };
        let group = ConditionGroup {
            combinator: Combinator::And,
            rules: vec![rule],
            subgroups: vec![],
        };
        let outcome = evaluate_group(&group, &ctx(&results, &outputs));
        assert!(outcome.result);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn empty_and_group_is_true_empty_or_group_is_false() {
        let results = HashMap::new();
        let outputs = HashMap::new();
        let and_group = ConditionGroup {
            combinator: Combinator::And,
            rules: vec![],
            subgroups: vec![],
        };
        assert!(evaluate_group(&and_group, &ctx(&results, &outputs)).result);

        let or_group = ConditionGroup {
            combinator: Combinator::Or,
            rules: vec![],
            subgroups: vec![],
        };
        assert!(!evaluate_group(&or_group, &ctx(&results, &outputs)).result);
    }

    #[test]
    fn missing_step_result_errors_to_false() {
        let results = HashMap::new();
        let outputs = HashMap::new();
        let rule = ConditionRule {
            left: ConditionOperand::StepField {
                step_id: "missing".to_string(),
                field: StepField::Output,
            },
            op: Op::Equals,
            right: ConditionOperand::Literal {
                data_type: DT::String,
                value: serde_json::json!("x"),
            },
            data_type: DT::String,
        };
        let group = ConditionGroup {
            combinator: Combinator::And,
            rules: vec![rule],
            subgroups: vec![],
        };
        let outcome = evaluate_group(&group, &ctx(&results, &outputs));
        assert!(!outcome.result);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn legacy_equality_on_resolved_output() {
        let results = HashMap::new();
        let mut outputs = HashMap::new();
        outputs.insert("s1".to_string(), "success".to_string());
        let outcome = evaluate_legacy("{s1.output} == \"success\"", &ctx(&results, &outputs));
        assert!(outcome.result);
    }

    #[test]
    fn legacy_includes_and_and_or() {
        let results = HashMap::new();
        let mut outputs = HashMap::new();
        outputs.insert("s1".to_string(), "hello world".to_string());
        let outcome = evaluate_legacy(
            "{s1.output}.includes(\"world\") && true",
            &ctx(&results, &outputs),
        );
        assert!(outcome.result);

        let outcome = evaluate_legacy("false || true", &ctx(&results, &outputs));
        assert!(outcome.result);
    }

    #[test]
    fn legacy_parse_int_and_numeric_comparison() {
        let results = HashMap::new();
        let mut outputs = HashMap::new();
        outputs.insert("n".to_string(), "42".to_string());
        let outcome = evaluate_legacy("parseInt({n.output}) > 10", &ctx(&results, &outputs));
        assert!(outcome.result);
    }

    #[test]
    fn legacy_negation() {
        let results = HashMap::new();
        let outputs = HashMap::new();
        let outcome = evaluate_legacy("!false", &ctx(&results, &outputs));
        assert!(outcome.result);
    }

    #[test]
    fn legacy_syntax_error_yields_false_with_error() {
        let results = HashMap::new();
        let outputs = HashMap::new();
        let outcome = evaluate_legacy("== ==", &ctx(&results, &outputs));
        assert!(!outcome.result);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn legacy_disallows_unknown_function_calls() {
        let results = HashMap::new();
        let outputs = HashMap::new();
        let outcome = evaluate_legacy("eval(\"1\")", &ctx(&results, &outputs));
        // `eval` parses as a bare identifier-string, then `(` is a trailing
        // token, which is a syntax error -> false.
        assert!(!outcome.result);
        assert!(outcome.error.is_some());
    }
}
