// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Template Resolver (§4.1): substitution-only, never an expression
//! language. Undefined references are left as literal text -- the
//! Condition Evaluator's legacy mode relies on this contract.

use chrono::Utc;
use std::collections::HashMap;

/// Read-only view a template is resolved against.
pub struct TemplateContext<'a> {
    pub step_outputs: &'a HashMap<String, String>,
    pub thread_id: &'a str,
    pub project_id: Option<&'a str>,
}

/// Replaces `{stepId.output}`, `{stepId}`, `{timestamp}`, `{threadId}`, and
/// `{projectId}` references in `template`. Unknown references are left
/// untouched rather than raising -- this is a documented contract, not an
/// oversight.
pub fn resolve(template: &str, ctx: &TemplateContext) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(rel_end) = template[i..].find('}') {
                let end = i + rel_end;
                let inner = &template[i + 1..end];
                if let Some(replacement) = substitute(inner, ctx) {
                    out.push_str(&replacement);
                } else {
                    // Leave the literal reference text untouched.
                    out.push_str(&template[i..=end]);
                }
                i = end + 1;
                continue;
            }
        }
        out.push(template[i..].chars().next().unwrap());
        i += template[i..].chars().next().unwrap().len_utf8();
    }
    out
}

fn substitute(inner: &str, ctx: &TemplateContext) -> Option<String> {
    match inner {
        "timestamp" => Some(Utc::now().to_rfc3339()),
        "threadId" => Some(ctx.thread_id.to_string()),
        "projectId" => ctx.project_id.map(|s| s.to_string()),
        _ => {
            let step_id = inner.split('.').next().unwrap_or(inner);
            ctx.step_outputs.get(step_id).cloned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(outputs: &'a HashMap<String, String>) -> TemplateContext<'a> {
        TemplateContext {
            step_outputs: outputs,
            thread_id: "thread-1",
            project_id: Some("proj-1"),
        }
    }

    #[test]
    fn substitutes_step_output_with_field() {
        let mut outputs = HashMap::new();
        outputs.insert("s1".to_string(), "hello".to_string());
        let result = resolve("value: {s1.output}", &ctx(&outputs));
        assert_eq!(result, "value: hello");
    }

    #[test]
    fn substitutes_bare_step_reference() {
        let mut outputs = HashMap::new();
        outputs.insert("s1".to_string(), "hello".to_string());
        let result = resolve("value: {s1}", &ctx(&outputs));
        assert_eq!(result, "value: hello");
    }

    #[test]
    fn substitutes_thread_and_project_id() {
        let outputs = HashMap::new();
        let result = resolve("{threadId}/{projectId}", &ctx(&outputs));
        assert_eq!(result, "thread-1/proj-1");
    }

    #[test]
    fn leaves_undefined_references_as_literal_text() {
        let outputs = HashMap::new();
        let result = resolve("missing: {nope.output}", &ctx(&outputs));
        assert_eq!(result, "missing: {nope.output}");
    }

    #[test]
    fn is_idempotent_once_all_references_are_bound() {
        let mut outputs = HashMap::new();
        outputs.insert("s1".to_string(), "hello".to_string());
        let once = resolve("{s1.output}", &ctx(&outputs));
        let twice = resolve(&once, &ctx(&outputs));
        assert_eq!(once, twice);
    }

    #[test]
    fn does_not_evaluate_expressions() {
        let outputs = HashMap::new();
        let result = resolve("{1 + 1}", &ctx(&outputs));
        assert_eq!(result, "{1 + 1}");
    }
}
