//! Rule-based code-quality callables.
//!
//! The five steps share one context and are meant to run in the order of
//! `graphs/code_quality.json`:
//!
//! 1. `quality.extract_functions` scans `code` (Python source) for `def`s
//! 2. `quality.check_complexity` scores each function's control flow
//! 3. `quality.detect_basic_issues` turns the metrics into a list of issues
//! 4. `quality.suggest_improvements` proposes fixes and marks some applied
//! 5. `quality.evaluate_quality` computes `quality_score` out of 100
//!
//! Steps 4 and 5 form a loop: every pass applies more suggestions, so the
//! score climbs until it reaches `threshold`.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use stepflow_core::callable::{CallableError, CallableRegistry, SyncFnStep};
use stepflow_types::graph::Context;

const DEFAULT_THRESHOLD: i64 = 70;
const MAX_LINE_LENGTH: usize = 88;
const MAX_PARAMS: usize = 5;
const MAX_FUNCTION_LINES: usize = 50;
const MAX_COMPLEXITY: i64 = 10;
const MAX_LONG_LINE_ISSUES: usize = 5;

/// Words that add a path through a function body.
const BRANCH_KEYWORDS: [&str; 10] = [
    "if", "elif", "else", "for", "while", "try", "except", "and", "or", "return",
];

pub(super) fn register(registry: &mut CallableRegistry) -> Result<(), CallableError> {
    let patterns = Arc::new(
        Patterns::compile().map_err(|e| CallableError::failed(format!("source pattern: {e}")))?,
    );

    let p = Arc::clone(&patterns);
    registry.register_step(
        "quality.extract_functions",
        SyncFnStep::new(move |context: Context| extract_functions(&p, context)),
    )?;
    let p = Arc::clone(&patterns);
    registry.register_step(
        "quality.check_complexity",
        SyncFnStep::new(move |context: Context| check_complexity(&p, context)),
    )?;
    registry.register_step(
        "quality.detect_basic_issues",
        SyncFnStep::new(move |context: Context| detect_basic_issues(&patterns, context)),
    )?;
    registry.register_step("quality.suggest_improvements", SyncFnStep::new(suggest_improvements))?;
    registry.register_step("quality.evaluate_quality", SyncFnStep::new(evaluate_quality))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

struct Patterns {
    function: Regex,
    docstring: Regex,
    todo: Regex,
    keywords: Vec<(&'static str, Regex)>,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        let keywords = BRANCH_KEYWORDS
            .iter()
            .map(|word| Ok((*word, Regex::new(&format!(r"\b{word}\b"))?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self {
            function: Regex::new(
                r"(?P<is_async>async\s+)?def\s+(?P<name>\w+)\s*\((?P<params>[^)]*)\)\s*(?:->\s*(?P<return_type>[^:]+))?\s*:",
            )?,
            docstring: Regex::new(r#"(?m)^\s*"""[^"]*""""#)?,
            todo: Regex::new(r"(?i)#\s*(TODO|FIXME|XXX|HACK)[\s:]+(.+)")?,
            keywords,
        })
    }
}

// ---------------------------------------------------------------------------
// Context records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionInfo {
    name: String,
    line: usize,
    params: Vec<String>,
    param_count: usize,
    is_async: bool,
    return_type: Option<String>,
    has_docstring: bool,
    body: String,
    line_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ComplexityInfo {
    name: String,
    complexity: i64,
    breakdown: BTreeMap<String, usize>,
    rating: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Issue {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function: Option<String>,
    line: usize,
    severity: Severity,
    message: String,
}

impl Issue {
    /// Identifies the issue across loop passes.
    fn key(&self) -> String {
        suggestion_key(&self.kind, self.function.as_deref(), self.line)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct IssueCounts {
    error: usize,
    warning: usize,
    info: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Suggestion {
    id: String,
    issue_type: String,
    function: Option<String>,
    line: usize,
    action: String,
    impact: i64,
    category: String,
    original_issue: String,
    applied: bool,
}

fn suggestion_key(kind: &str, function: Option<&str>, line: usize) -> String {
    format!("{kind}:{}:{line}", function.unwrap_or_default())
}

/// Read `key` from the context; absent and null both yield `None`.
fn field<T: DeserializeOwned>(context: &Context, key: &str) -> Result<Option<T>, CallableError> {
    match context.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| CallableError::InvalidInput(format!("{key}: {e}"))),
    }
}

fn put(context: &mut Context, key: &str, value: impl Serialize) -> Result<(), CallableError> {
    let value = serde_json::to_value(value)
        .map_err(|e| CallableError::failed(format!("encode {key}: {e}")))?;
    context.insert(key.to_string(), value);
    Ok(())
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn extract_functions(patterns: &Patterns, mut context: Context) -> Result<Context, CallableError> {
    let code: String = field(&context, "code")?.unwrap_or_default();
    let lines: Vec<&str> = code.split('\n').collect();

    let mut functions = Vec::new();
    for caps in patterns.function.captures_iter(&code) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.name("name")) else {
            continue;
        };
        let line = code[..whole.start()].matches('\n').count() + 1;
        let body = function_body(&lines, line - 1);
        let body_text = body.join("\n");

        // The docstring must follow the signature's first colon.
        let after_colon = body_text
            .find(':')
            .map_or(body_text.as_str(), |i| &body_text[i + 1..]);

        let params: Vec<String> = caps
            .name("params")
            .map(|m| m.as_str())
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != "self" && *p != "cls")
            .map(String::from)
            .collect();

        functions.push(FunctionInfo {
            name: name.as_str().to_string(),
            line,
            param_count: params.len(),
            params,
            is_async: caps.name("is_async").is_some(),
            return_type: caps.name("return_type").map(|m| m.as_str().trim().to_string()),
            has_docstring: patterns.docstring.is_match(after_colon),
            line_count: body.len(),
            body: body_text,
        });
    }

    tracing::debug!(
        functions = functions.len(),
        names = ?functions.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
        "extracted functions"
    );
    put(&mut context, "function_count", functions.len())?;
    put(&mut context, "functions", functions)?;
    Ok(context)
}

/// The lines of the function whose `def` sits on `start`: everything up to
/// the next dedented `def`/`class`, minus trailing blank lines.
fn function_body<'a>(lines: &[&'a str], start: usize) -> Vec<&'a str> {
    let mut body = Vec::new();
    let mut indent: Option<usize> = None;

    for (offset, line) in lines.iter().skip(start).enumerate() {
        if offset == 0 {
            body.push(*line);
            continue;
        }
        let stripped = line.trim_start();
        if !stripped.is_empty() && indent.is_none() {
            indent = Some(line.len() - stripped.len());
        }
        let required = indent.filter(|n| *n > 0).unwrap_or(4);
        let dedented = !stripped.is_empty() && !line.starts_with(&" ".repeat(required));
        if dedented
            && (stripped.starts_with("def ")
                || stripped.starts_with("async def ")
                || stripped.starts_with("class "))
        {
            break;
        }
        body.push(*line);
    }

    while body.last().is_some_and(|l| l.trim().is_empty()) {
        body.pop();
    }
    body
}

fn check_complexity(patterns: &Patterns, mut context: Context) -> Result<Context, CallableError> {
    let functions: Vec<FunctionInfo> = field(&context, "functions")?.unwrap_or_default();

    let results: Vec<ComplexityInfo> = functions
        .iter()
        .map(|func| {
            let mut complexity: i64 = 1;
            let mut breakdown = BTreeMap::new();
            for (word, pattern) in &patterns.keywords {
                let count = pattern.find_iter(&func.body).count();
                if count > 0 {
                    complexity += count as i64;
                    breakdown.insert(word.to_string(), count);
                }
            }
            // One return is the normal exit, not a branch.
            if breakdown.get("return").is_some_and(|n| *n > 1) {
                complexity -= 1;
            }
            ComplexityInfo {
                name: func.name.clone(),
                complexity,
                breakdown,
                rating: complexity_rating(complexity).to_string(),
            }
        })
        .collect();

    let total: i64 = results.iter().map(|r| r.complexity).sum();
    let average = if results.is_empty() {
        0.0
    } else {
        total as f64 / results.len() as f64
    };

    tracing::debug!(
        functions = results.len(),
        total_complexity = total,
        avg_complexity = average,
        "analyzed complexity"
    );
    put(&mut context, "complexity", results)?;
    put(&mut context, "total_complexity", total)?;
    put(&mut context, "avg_complexity", (average * 100.0).round() / 100.0)?;
    Ok(context)
}

fn complexity_rating(complexity: i64) -> &'static str {
    match complexity {
        ..=5 => "low",
        6..=10 => "moderate",
        11..=20 => "high",
        _ => "very_high",
    }
}

fn detect_basic_issues(
    patterns: &Patterns,
    mut context: Context,
) -> Result<Context, CallableError> {
    let code: String = field(&context, "code")?.unwrap_or_default();
    let functions: Vec<FunctionInfo> = field(&context, "functions")?.unwrap_or_default();
    let complexity: Vec<ComplexityInfo> = field(&context, "complexity")?.unwrap_or_default();
    let complexity: BTreeMap<&str, i64> = complexity
        .iter()
        .map(|c| (c.name.as_str(), c.complexity))
        .collect();

    let mut issues = Vec::new();
    for func in &functions {
        let mut flag = |kind: &str, severity: Severity, message: String| {
            issues.push(Issue {
                kind: kind.to_string(),
                function: Some(func.name.clone()),
                line: func.line,
                severity,
                message,
            });
        };
        let name = &func.name;

        if !func.has_docstring {
            flag(
                "missing_docstring",
                Severity::Warning,
                format!("Function '{name}' is missing a docstring"),
            );
        }
        if func.param_count > MAX_PARAMS {
            flag(
                "too_many_params",
                Severity::Warning,
                format!(
                    "Function '{name}' has {} parameters (recommended: <= {MAX_PARAMS})",
                    func.param_count
                ),
            );
        }
        if func.line_count > MAX_FUNCTION_LINES {
            flag(
                "long_function",
                Severity::Warning,
                format!(
                    "Function '{name}' is {} lines long (recommended: <= {MAX_FUNCTION_LINES})",
                    func.line_count
                ),
            );
        }
        let score = complexity.get(name.as_str()).copied().unwrap_or(0);
        if score > MAX_COMPLEXITY {
            flag(
                "high_complexity",
                Severity::Error,
                format!("Function '{name}' has complexity {score} (recommended: <= {MAX_COMPLEXITY})"),
            );
        }
        if func.return_type.is_none() {
            flag(
                "missing_return_type",
                Severity::Info,
                format!("Function '{name}' is missing return type annotation"),
            );
        }
    }

    let long_lines = code
        .split('\n')
        .enumerate()
        .map(|(i, line)| (i + 1, line.chars().count()))
        .filter(|(_, len)| *len > MAX_LINE_LENGTH)
        .take(MAX_LONG_LINE_ISSUES);
    for (line, len) in long_lines {
        issues.push(Issue {
            kind: "long_line".to_string(),
            function: None,
            line,
            severity: Severity::Info,
            message: format!("Line {line} exceeds {MAX_LINE_LENGTH} characters ({len} chars)"),
        });
    }

    for caps in patterns.todo.captures_iter(&code) {
        let (Some(whole), Some(tag), Some(text)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let line = code[..whole.start()].matches('\n').count() + 1;
        let tag = tag.as_str().to_uppercase();
        let text: String = text.as_str().trim().chars().take(50).collect();
        issues.push(Issue {
            kind: "todo_comment".to_string(),
            function: None,
            line,
            severity: Severity::Info,
            message: format!("{tag} found at line {line}: {text}"),
        });
    }

    let count = |severity: Severity| issues.iter().filter(|i| i.severity == severity).count();
    let counts = IssueCounts {
        error: count(Severity::Error),
        warning: count(Severity::Warning),
        info: count(Severity::Info),
    };

    tracing::debug!(
        issues = issues.len(),
        errors = counts.error,
        warnings = counts.warning,
        info = counts.info,
        "detected issues"
    );
    put(&mut context, "issue_count", issues.len())?;
    put(&mut context, "issues", issues)?;
    put(&mut context, "issue_counts", counts)?;
    context
        .entry("improvement_iteration")
        .or_insert_with(|| json!(0));
    context
        .entry("applied_suggestions")
        .or_insert_with(|| json!([]));
    context
        .entry("threshold")
        .or_insert_with(|| json!(DEFAULT_THRESHOLD));
    Ok(context)
}

/// Action, impact and category for an issue type.
fn suggestion_template(kind: &str) -> (String, i64, &'static str) {
    let (action, impact, category) = match kind {
        "missing_docstring" => (
            "Add a docstring describing the function's purpose, parameters, and return value",
            5,
            "documentation",
        ),
        "too_many_params" => (
            "Consider using a configuration object or breaking down the function",
            8,
            "design",
        ),
        "long_function" => (
            "Refactor into smaller, focused functions with single responsibilities",
            10,
            "design",
        ),
        "high_complexity" => (
            "Simplify control flow, extract helper methods, or use early returns",
            12,
            "design",
        ),
        "missing_return_type" => ("Add return type annotation for better code clarity", 3, "typing"),
        "long_line" => (
            "Break long lines using proper line continuation or reformatting",
            2,
            "style",
        ),
        "todo_comment" => ("Address the TODO item or create a tracked issue", 4, "maintenance"),
        other => {
            return (
                format!("Review and address the {} issue", other.replace('_', " ")),
                3,
                "general",
            );
        }
    };
    (action.to_string(), impact, category)
}

fn suggest_improvements(mut context: Context) -> Result<Context, CallableError> {
    let issues: Vec<Issue> = field(&context, "issues")?.unwrap_or_default();
    let iteration: usize = field(&context, "improvement_iteration")?.unwrap_or(0);
    let mut applied: Vec<String> = field(&context, "applied_suggestions")?.unwrap_or_default();

    // One suggestion per issue type per pass, skipping issues already handled.
    let mut seen = Vec::new();
    let mut suggestions = Vec::new();
    for issue in &issues {
        if applied.contains(&issue.key()) || seen.contains(&issue.kind.as_str()) {
            continue;
        }
        seen.push(issue.kind.as_str());
        let (action, impact, category) = suggestion_template(&issue.kind);
        suggestions.push(Suggestion {
            id: format!("suggestion_{}_{iteration}", suggestions.len() + 1),
            issue_type: issue.kind.clone(),
            function: issue.function.clone(),
            line: issue.line,
            action,
            impact,
            category: category.to_string(),
            original_issue: issue.message.clone(),
            applied: false,
        });
    }

    // Later passes apply more at once.
    let mut newly_applied = 0;
    for suggestion in suggestions.iter_mut().take(2 + iteration) {
        let key = suggestion_key(
            &suggestion.issue_type,
            suggestion.function.as_deref(),
            suggestion.line,
        );
        if !applied.contains(&key) {
            applied.push(key);
            suggestion.applied = true;
            newly_applied += 1;
        }
    }
    let impact: i64 = suggestions
        .iter()
        .filter(|s| s.applied)
        .map(|s| s.impact)
        .sum();

    tracing::debug!(
        iteration = iteration + 1,
        suggestions = suggestions.len(),
        newly_applied,
        impact,
        "suggested improvements"
    );
    put(&mut context, "suggestion_count", suggestions.len())?;
    put(&mut context, "suggestions", suggestions)?;
    put(&mut context, "applied_suggestions", applied)?;
    put(&mut context, "improvement_iteration", iteration + 1)?;
    put(&mut context, "newly_applied_count", newly_applied)?;
    put(&mut context, "iteration_impact", impact)?;
    Ok(context)
}

fn evaluate_quality(mut context: Context) -> Result<Context, CallableError> {
    let counts: IssueCounts = field(&context, "issue_counts")?.unwrap_or_default();
    let issues: Vec<Value> = field(&context, "issues")?.unwrap_or_default();
    let applied: Vec<Value> = field(&context, "applied_suggestions")?.unwrap_or_default();
    let functions: Vec<Value> = field(&context, "functions")?.unwrap_or_default();
    let avg_complexity: f64 = field(&context, "avg_complexity")?.unwrap_or(0.0);
    let iteration: i64 = field(&context, "improvement_iteration")?.unwrap_or(1);
    let threshold = context
        .get("threshold")
        .cloned()
        .unwrap_or_else(|| json!(DEFAULT_THRESHOLD));
    let Some(target) = threshold.as_f64() else {
        return Err(CallableError::InvalidInput(format!(
            "threshold must be a number, got {threshold}"
        )));
    };

    let base = 100;
    let error_penalty = counts.error as i64 * 10;
    let warning_penalty = counts.warning as i64 * 5;
    let info_penalty = counts.info as i64 * 2;
    let improvement_bonus = applied.len() as i64 * 5;
    let iteration_bonus = iteration * 8;
    let complexity_penalty = if avg_complexity > 10.0 {
        ((avg_complexity - 10.0) * 2.0) as i64
    } else {
        0
    };

    let score = (base - error_penalty - warning_penalty - info_penalty + improvement_bonus
        + iteration_bonus
        - complexity_penalty)
        .clamp(0, 100);
    let grade = quality_grade(score);
    let meets_threshold = score as f64 >= target;

    let report = json!({
        "score": score,
        "grade": grade,
        "threshold": threshold,
        "meets_threshold": meets_threshold,
        "breakdown": {
            "base_score": base,
            "error_penalty": -error_penalty,
            "warning_penalty": -warning_penalty,
            "info_penalty": -info_penalty,
            "complexity_penalty": -complexity_penalty,
            "improvement_bonus": improvement_bonus,
            "iteration_bonus": iteration_bonus,
        },
        "metrics": {
            "function_count": functions.len(),
            "total_issues": issues.len(),
            "applied_improvements": applied.len(),
            "iterations": iteration,
            "avg_complexity": avg_complexity,
        },
    });

    if meets_threshold {
        tracing::info!(score, grade, "quality threshold met");
    } else {
        tracing::debug!(score, grade, threshold = target, "quality below threshold");
    }
    put(&mut context, "quality_score", score)?;
    put(&mut context, "quality_grade", grade)?;
    put(&mut context, "quality_report", report)?;
    put(&mut context, "meets_threshold", meets_threshold)?;
    Ok(context)
}

fn quality_grade(score: i64) -> &'static str {
    match score {
        90.. => "A",
        80..=89 => "B",
        70..=79 => "C",
        60..=69 => "D",
        _ => "F",
    }
}
