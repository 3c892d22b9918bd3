//! # Attribute Rules
//!
//! Directives written inside an opening tag. None of them produce markup:
//! each resolves what it needs while the template renders and records it as
//! section data, which the binding passes apply once the element exists in
//! the host tree (refs, then injection, then event listeners).

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::RuleError;
use crate::parse::find_balanced;
use crate::render::RenderContext;
use crate::rule::{static_name, InjectPosition, MatchData, ResultData, Rule, RuleKind, RuleMatch, RuleResult};
use crate::scope::Scope;

lazy_static! {
    static ref REF_RE: Regex = Regex::new(r"@ref\(").unwrap();
    static ref EVENT_RE: Regex = Regex::new(r"@on:([A-Za-z][\w.:-]*)\(").unwrap();
    static ref INJECT_RE: Regex = Regex::new(r"@inject(?::(head|tail))?\(").unwrap();
}

/// Matches of `re` whose last char is the opening paren of the payload.
fn find_with_payload(
    template: &str,
    re: &Regex,
    data: impl Fn(&regex::Captures<'_>, &str) -> Option<MatchData>,
) -> Vec<RuleMatch> {
    re.captures_iter(template)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let close = find_balanced(template, whole.end() - 1, b'(', b')')?;
            let payload = template[whole.end()..close].trim();
            Some(RuleMatch::new(
                template,
                whole.start(),
                close + 1,
                data(&caps, payload)?,
            ))
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// REF
// ═══════════════════════════════════════════════════════════════════════════════

/// `@ref(name)`: after insertion, the element is written into the scope
/// under the name the expression evaluates to.
pub struct RefRule;

impl Rule for RefRule {
    fn name(&self) -> &str {
        "ref"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Attribute
    }

    fn priority(&self) -> i32 {
        10
    }

    fn find(&self, template: &str) -> Vec<RuleMatch> {
        find_with_payload(template, &REF_RE, |_, payload| {
            Some(MatchData::Ref {
                expression: payload.to_string(),
            })
        })
    }

    fn execute(
        &self,
        rule_match: &RuleMatch,
        scope: &Scope,
        ctx: &mut RenderContext<'_>,
    ) -> Result<RuleResult, RuleError> {
        let MatchData::Ref { expression } = &rule_match.data else {
            return Err(RuleError::Malformed(rule_match.text.clone()));
        };
        if expression.is_empty() {
            return Err(RuleError::Malformed(rule_match.text.clone()));
        }

        let name = static_name("ref", &ctx.expression(expression), scope)?;
        Ok(RuleResult::directive(ResultData::Ref { name }))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT
// ═══════════════════════════════════════════════════════════════════════════════

/// `@on:event(handler)`: the handler runs with `event` in scope each time
/// the element receives the event. A handler that evaluates to a function is
/// called with the event.
pub struct EventRule;

impl Rule for EventRule {
    fn name(&self) -> &str {
        "event"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Attribute
    }

    fn priority(&self) -> i32 {
        20
    }

    fn find(&self, template: &str) -> Vec<RuleMatch> {
        find_with_payload(template, &EVENT_RE, |caps, payload| {
            Some(MatchData::Event {
                event: caps.get(1)?.as_str().to_string(),
                handler: payload.to_string(),
            })
        })
    }

    fn execute(
        &self,
        rule_match: &RuleMatch,
        _scope: &Scope,
        ctx: &mut RenderContext<'_>,
    ) -> Result<RuleResult, RuleError> {
        let MatchData::Event { event, handler } = &rule_match.data else {
            return Err(RuleError::Malformed(rule_match.text.clone()));
        };
        if handler.is_empty() {
            return Err(RuleError::Malformed(rule_match.text.clone()));
        }

        let handler = ctx.expression(handler);
        if let Some(err) = handler.parse_error() {
            return Err(err.clone().into());
        }

        Ok(RuleResult::directive(ResultData::Event {
            event: event.clone(),
            handler,
        }))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INJECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// `@inject(target)`, `@inject:head(target)`, `@inject:tail(target)`: the
/// element is moved to the start or end of the element referenced as
/// `target`. Runs after every other attribute rule.
pub struct InjectionRule;

impl Rule for InjectionRule {
    fn name(&self) -> &str {
        "inject"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Attribute
    }

    fn priority(&self) -> i32 {
        30
    }

    fn runs_last(&self) -> bool {
        true
    }

    fn find(&self, template: &str) -> Vec<RuleMatch> {
        find_with_payload(template, &INJECT_RE, |caps, payload| {
            let position = match caps.get(1) {
                Some(name) => InjectPosition::parse(name.as_str())?,
                None => InjectPosition::Tail,
            };
            Some(MatchData::Injection {
                target: payload.to_string(),
                position,
            })
        })
    }

    fn execute(
        &self,
        rule_match: &RuleMatch,
        scope: &Scope,
        ctx: &mut RenderContext<'_>,
    ) -> Result<RuleResult, RuleError> {
        let MatchData::Injection { target, position } = &rule_match.data else {
            return Err(RuleError::Malformed(rule_match.text.clone()));
        };
        if target.is_empty() {
            return Err(RuleError::Malformed(rule_match.text.clone()));
        }

        let target = static_name("inject", &ctx.expression(target), scope)?;
        Ok(RuleResult::directive(ResultData::Injection {
            target,
            position: *position,
        }))
    }
}
