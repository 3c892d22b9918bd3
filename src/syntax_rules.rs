//! # Syntax Rules
//!
//! Loop, conditional and interpolation directives. Each finds its directives
//! by regex plus balanced-delimiter scanning and renders its blocks through
//! the render context, so nested directives become child sections.

use futures_util::FutureExt;
use lazy_static::lazy_static;
use regex::Regex;

use crate::document::{escape_attribute, escape_text};
use crate::error::{EvalError, RuleError};
use crate::expression::Evaluation;
use crate::parse::{find_balanced, find_block_end, is_escaped_at, skip_whitespace, unquote_block};
use crate::render::RenderContext;
use crate::rule::{Branch, MatchData, Rule, RuleKind, RuleMatch, RuleResult};
use crate::scope::Scope;
use crate::tree::Piece;
use crate::value::Value;

lazy_static! {
    static ref FOR_RE: Regex = Regex::new(r"@?\bfor\s*\(").unwrap();
    static ref IF_RE: Regex = Regex::new(r"@?\bif\s*\(").unwrap();
    static ref INTERPOLATION_RE: Regex = Regex::new(r"@\(").unwrap();
    static ref LOOP_HEADER_RE: Regex =
        Regex::new(r"^\s*([A-Za-z_$][\w$]*)(?:\s*,\s*([A-Za-z_$][\w$]*))?\s+in\s+(?s)(.+?)\s*$").unwrap();
}

/// `( .. ) { .. }` starting at the open paren: header, body and the index
/// just past the closing brace.
fn header_and_block(template: &str, paren: usize) -> Option<(&str, &str, usize)> {
    let close = find_balanced(template, paren, b'(', b')')?;
    let brace = skip_whitespace(template, close + 1);
    if template.as_bytes().get(brace) != Some(&b'{') {
        return None;
    }
    let end = find_block_end(template, brace)?;
    Some((&template[paren + 1..close], &template[brace + 1..end], end + 1))
}

/// Text value of an interpolation: primitives stringify, everything else
/// (nullish, collections, functions, nodes) renders empty.
pub fn display_value(value: &Value) -> String {
    match value.unwrapped() {
        Value::Undefined
        | Value::Null
        | Value::Array(_)
        | Value::Object(_)
        | Value::Function(_)
        | Value::Node(_)
        | Value::Promise(_)
        | Value::Observable(_) => String::new(),
        other => other.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOOP
// ═══════════════════════════════════════════════════════════════════════════════

/// `@for (item in expr) { .. }` and `@for (index, item in expr) { .. }`.
pub struct LoopRule;

impl LoopRule {
    /// `(key, value)` pairs the loop visits. Keys are indices, or property
    /// names for objects.
    fn entries(value: &Value, limit: usize, source: &str) -> Result<Vec<(Value, Value)>, RuleError> {
        let entries: Vec<(Value, Value)> = match value.unwrapped() {
            Value::Undefined | Value::Null => Vec::new(),
            Value::Number(n) => {
                if !n.is_finite() || n <= 0.0 {
                    Vec::new()
                } else {
                    let count = n.floor();
                    if count > limit as f64 {
                        tracing::warn!(iterable = source, count, limit, "loop range truncated");
                    }
                    let count = (count as usize).min(limit);
                    (0..count).map(|i| (Value::from(i), Value::from(i))).collect()
                }
            }
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| (Value::from(i), item.clone()))
                .collect(),
            Value::String(s) => s
                .chars()
                .enumerate()
                .map(|(i, c)| (Value::from(i), Value::from(c.to_string())))
                .collect(),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| (Value::from(k.as_str()), v.clone()))
                .collect(),
            other => {
                return Err(EvalError::type_error(format!(
                    "`{}` is not iterable (got {})",
                    source,
                    other.kind()
                ))
                .into())
            }
        };

        if entries.len() > limit {
            tracing::warn!(iterable = source, count = entries.len(), limit, "loop truncated");
            return Ok(entries.into_iter().take(limit).collect());
        }
        Ok(entries)
    }
}

impl Rule for LoopRule {
    fn name(&self) -> &str {
        "loop"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Syntax
    }

    fn priority(&self) -> i32 {
        10
    }

    fn find(&self, template: &str) -> Vec<RuleMatch> {
        let mut matches = Vec::new();
        for m in FOR_RE.find_iter(template) {
            if is_escaped_at(template, m.start()) {
                continue;
            }
            let Some((header, body, end)) = header_and_block(template, m.end() - 1) else {
                continue;
            };
            let Some(caps) = LOOP_HEADER_RE.captures(header) else {
                continue;
            };

            let first = caps[1].to_string();
            let (index, item) = match caps.get(2) {
                Some(second) => (Some(first), second.as_str().to_string()),
                None => (None, first),
            };
            matches.push(RuleMatch::new(
                template,
                m.start(),
                end,
                MatchData::Loop {
                    index,
                    item,
                    iterable: caps[3].to_string(),
                    body: body.to_string(),
                },
            ));
        }
        matches
    }

    fn execute(
        &self,
        rule_match: &RuleMatch,
        scope: &Scope,
        ctx: &mut RenderContext<'_>,
    ) -> Result<RuleResult, RuleError> {
        let MatchData::Loop {
            index,
            item,
            iterable,
            body,
        } = &rule_match.data
        else {
            return Err(RuleError::Malformed(rule_match.text.clone()));
        };

        let expr = ctx.expression(iterable);
        let mut result = RuleResult::default();
        result.add_observables(expr.find_observables(scope));

        let value = expr.execute(scope, &[]);
        let entries = Self::entries(&value, ctx.options().max_loop_iterations, iterable)?;
        let body = unquote_block(body);

        for (key, value) in entries {
            let mut locals = Vec::with_capacity(2);
            if let Some(index) = index {
                locals.push((index.clone(), key));
            }
            locals.push((item.clone(), value));

            let child = scope.create_child(locals);
            let block = ctx.render_block(&body, &child)?;
            result.push_block(block);
        }

        Ok(result)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONDITIONAL
// ═══════════════════════════════════════════════════════════════════════════════

/// `@if (a) { .. } @elseif (b) { .. } @else { .. }`. `else if` is accepted
/// for `elseif`, and the leading marker is optional throughout.
pub struct ConditionalRule;

impl ConditionalRule {
    /// Keyword at `at` (optionally marked) followed by a non-identifier char.
    fn keyword_at(template: &str, at: usize, keyword: &str) -> Option<usize> {
        let rest = &template[at..];
        let rest = rest.strip_prefix('@').unwrap_or(rest);
        let offset = template.len() - rest.len();
        if !rest.starts_with(keyword) {
            return None;
        }
        let after = offset + keyword.len();
        match template.as_bytes().get(after) {
            Some(b) if b.is_ascii_alphanumeric() || *b == b'_' || *b == b'$' => None,
            _ => Some(after),
        }
    }

    /// Parse the `elseif`/`else` links following a block that ends at `end`.
    fn chain(template: &str, mut end: usize, branches: &mut Vec<Branch>) -> usize {
        loop {
            let at = skip_whitespace(template, end);

            let else_if = Self::keyword_at(template, at, "elseif").or_else(|| {
                let after_else = Self::keyword_at(template, at, "else")?;
                Self::keyword_at(template, skip_whitespace(template, after_else), "if")
            });
            if let Some(after) = else_if {
                let paren = skip_whitespace(template, after);
                if template.as_bytes().get(paren) != Some(&b'(') {
                    return end;
                }
                let Some((condition, body, next)) = header_and_block(template, paren) else {
                    return end;
                };
                branches.push(Branch {
                    condition: Some(condition.to_string()),
                    body: body.to_string(),
                });
                end = next;
                continue;
            }

            if let Some(after) = Self::keyword_at(template, at, "else") {
                let brace = skip_whitespace(template, after);
                if template.as_bytes().get(brace) != Some(&b'{') {
                    return end;
                }
                let Some(close) = find_block_end(template, brace) else {
                    return end;
                };
                branches.push(Branch {
                    condition: None,
                    body: template[brace + 1..close].to_string(),
                });
                return close + 1;
            }

            return end;
        }
    }
}

impl Rule for ConditionalRule {
    fn name(&self) -> &str {
        "conditional"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Syntax
    }

    fn priority(&self) -> i32 {
        20
    }

    fn find(&self, template: &str) -> Vec<RuleMatch> {
        let mut matches = Vec::new();
        for m in IF_RE.find_iter(template) {
            if is_escaped_at(template, m.start()) {
                continue;
            }
            let Some((condition, body, end)) = header_and_block(template, m.end() - 1) else {
                continue;
            };
            let mut branches = vec![Branch {
                condition: Some(condition.to_string()),
                body: body.to_string(),
            }];
            let end = Self::chain(template, end, &mut branches);
            matches.push(RuleMatch::new(
                template,
                m.start(),
                end,
                MatchData::Conditional { branches },
            ));
        }
        matches
    }

    fn execute(
        &self,
        rule_match: &RuleMatch,
        scope: &Scope,
        ctx: &mut RenderContext<'_>,
    ) -> Result<RuleResult, RuleError> {
        let MatchData::Conditional { branches } = &rule_match.data else {
            return Err(RuleError::Malformed(rule_match.text.clone()));
        };

        let mut result = RuleResult::default();
        let mut chosen = None;

        // Every condition is a dependency, even those never evaluated.
        for (i, branch) in branches.iter().enumerate() {
            match &branch.condition {
                Some(condition) => {
                    let expr = ctx.expression(condition);
                    result.add_observables(expr.find_observables(scope));
                    if chosen.is_none() && expr.execute(scope, &[]).is_truthy() {
                        chosen = Some(i);
                    }
                }
                None => {
                    if chosen.is_none() {
                        chosen = Some(i);
                    }
                }
            }
        }

        if let Some(i) = chosen {
            let body = unquote_block(&branches[i].body);
            let block = ctx.render_block(&body, scope)?;
            result.output = block.pieces;
        }

        Ok(result)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERPOLATION
// ═══════════════════════════════════════════════════════════════════════════════

/// `@(expr)`.
pub struct InterpolationRule;

fn render_text(value: &Value, escape: bool, in_tag: bool) -> Vec<Piece> {
    let text = display_value(value);
    let text = match (escape, in_tag) {
        (false, _) => text,
        (true, false) => escape_text(&text),
        (true, true) => escape_attribute(&text),
    };
    if text.is_empty() {
        Vec::new()
    } else {
        vec![Piece::Text(text)]
    }
}

impl Rule for InterpolationRule {
    fn name(&self) -> &str {
        "interpolation"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Syntax
    }

    fn priority(&self) -> i32 {
        30
    }

    fn find(&self, template: &str) -> Vec<RuleMatch> {
        INTERPOLATION_RE
            .find_iter(template)
            .filter_map(|m| {
                let close = find_balanced(template, m.end() - 1, b'(', b')')?;
                let expression = template[m.end()..close].trim();
                if expression.is_empty() {
                    return None;
                }
                Some(RuleMatch::new(
                    template,
                    m.start(),
                    close + 1,
                    MatchData::Interpolation {
                        expression: expression.to_string(),
                    },
                ))
            })
            .collect()
    }

    fn execute(
        &self,
        rule_match: &RuleMatch,
        scope: &Scope,
        ctx: &mut RenderContext<'_>,
    ) -> Result<RuleResult, RuleError> {
        let MatchData::Interpolation { expression } = &rule_match.data else {
            return Err(RuleError::Malformed(rule_match.text.clone()));
        };

        let expr = ctx.expression(expression);
        let escape = ctx.options().escape_html;
        let in_tag = ctx.in_tag();

        let mut result = RuleResult::default();
        result.add_observables(expr.find_observables(scope));

        match expr.eval(scope, &[]) {
            Evaluation::Ready(value) => result.output = render_text(&value, escape, in_tag),
            Evaluation::Pending(future) => {
                ctx.defer(
                    future
                        .map(move |value| render_text(&value, escape, in_tag))
                        .boxed_local(),
                );
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_find() {
        let template = "<ul>@for (i, item in items) { <li>@(item)</li> }</ul>";
        let matches = LoopRule.find(template);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].start, 4);
        assert_eq!(matches[0].end, template.len() - 5);
        match &matches[0].data {
            MatchData::Loop {
                index,
                item,
                iterable,
                body,
            } => {
                assert_eq!(index.as_deref(), Some("i"));
                assert_eq!(item, "item");
                assert_eq!(iterable, "items");
                assert_eq!(body, " <li>@(item)</li> ");
            }
            other => panic!("unexpected match data {:?}", other),
        }
    }

    #[test]
    fn test_loop_ignores_prose() {
        assert!(LoopRule.find("thanks for (almost) everything").is_empty());
        assert!(LoopRule.find("before(x in y) {}").is_empty());
        assert_eq!(LoopRule.find("for(i in 3) { \"<b>@(i)</b>\" }").len(), 1);
    }

    #[test]
    fn test_conditional_chain() {
        let template = "@if (a) {A} @elseif (b) {B} else if (c) {C} @else {D} tail";
        let matches = ConditionalRule.find(template);
        let chain = &matches[0];
        assert_eq!(&template[chain.end..], " tail");
        let MatchData::Conditional { branches } = &chain.data else {
            panic!("expected conditional");
        };
        let conditions: Vec<_> = branches.iter().map(|b| b.condition.as_deref()).collect();
        assert_eq!(conditions, vec![Some("a"), Some("b"), Some("c"), None]);
        assert_eq!(branches[3].body, "D");
    }

    #[test]
    fn test_conditional_stops_at_unrelated_words() {
        let template = "if (a) {A} elsewhere";
        let matches = ConditionalRule.find(template);
        assert_eq!(matches[0].end, 10);
    }

    #[test]
    fn test_interpolation_find() {
        let matches = InterpolationRule.find("a @(x + f(')')) b @( ) c");
        assert_eq!(matches.len(), 1);
        assert_eq!(
            matches[0].data,
            MatchData::Interpolation {
                expression: "x + f(')')".to_string()
            }
        );
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&Value::from(3)), "3");
        assert_eq!(display_value(&Value::from(false)), "false");
        assert_eq!(display_value(&Value::Null), "");
        assert_eq!(display_value(&Value::array(vec![Value::from(1)])), "");
        assert_eq!(display_value(&Value::observable("inner")), "inner");
    }
}
