//! # Rule Contract
//!
//! A rule finds one kind of directive in template text and turns each match
//! into output. Syntax rules replace text; attribute rules live inside opening
//! tags and leave behind a directive the binding passes act on once the markup
//! is in the host tree.

use std::fmt;

use crate::error::RuleError;
use crate::expression::Expression;
use crate::observable::Observable;
use crate::render::{BlockOutput, RenderContext};
use crate::scope::Scope;
use crate::tree::Piece;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Syntax,
    Attribute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InjectPosition {
    Head,
    Tail,
}

impl InjectPosition {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "head" => Some(InjectPosition::Head),
            "tail" => Some(InjectPosition::Tail),
            _ => None,
        }
    }
}

/// One `(condition) { body }` link of a conditional chain. `else` has no
/// condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub condition: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchData {
    Loop {
        index: Option<String>,
        item: String,
        iterable: String,
        body: String,
    },
    Conditional {
        branches: Vec<Branch>,
    },
    Interpolation {
        expression: String,
    },
    Ref {
        expression: String,
    },
    Event {
        event: String,
        handler: String,
    },
    Injection {
        target: String,
        position: InjectPosition,
    },
    /// Captures of a custom rule.
    Custom(Vec<String>),
}

/// A directive occurrence. `start..end` are byte offsets into the text the
/// rule scanned; `text` is that substring.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub data: MatchData,
}

impl RuleMatch {
    pub fn new(template: &str, start: usize, end: usize, data: MatchData) -> Self {
        Self {
            text: template[start..end].to_string(),
            start,
            end,
            data,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum ResultData {
    #[default]
    None,
    Ref {
        name: String,
    },
    Event {
        event: String,
        handler: Expression,
    },
    Injection {
        target: String,
        position: InjectPosition,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RuleResult {
    pub output: Vec<Piece>,
    /// Reactive values the output depends on.
    pub observables: Vec<Observable<Value>>,
    pub data: ResultData,
}

impl RuleResult {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: vec![Piece::Text(output.into())],
            ..Self::default()
        }
    }

    pub fn directive(data: ResultData) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Append a rendered block, carrying over its dependencies.
    pub fn push_block(&mut self, block: BlockOutput) {
        self.output.extend(block.pieces);
        self.add_observables(block.observables);
    }

    pub fn add_observables(&mut self, observables: impl IntoIterator<Item = Observable<Value>>) {
        for obs in observables {
            if !self.observables.iter().any(|o| o.ptr_eq(&obs)) {
                self.observables.push(obs);
            }
        }
    }
}

pub trait Rule {
    fn name(&self) -> &str;

    fn kind(&self) -> RuleKind;

    /// Lower runs earlier.
    fn priority(&self) -> i32;

    /// Attribute rules that must see every other directive's result first.
    fn runs_last(&self) -> bool {
        false
    }

    fn find(&self, template: &str) -> Vec<RuleMatch>;

    fn execute(
        &self,
        rule_match: &RuleMatch,
        scope: &Scope,
        ctx: &mut RenderContext<'_>,
    ) -> Result<RuleResult, RuleError>;
}

impl fmt::Debug for dyn Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("priority", &self.priority())
            .finish()
    }
}

/// Resolve the name a static-only directive points at. Reactive values are
/// rejected since the binding would never follow them.
pub fn static_name(
    directive: &'static str,
    expression: &Expression,
    scope: &Scope,
) -> Result<String, RuleError> {
    match expression.try_execute(scope, &[])? {
        Value::Observable(_) => Err(RuleError::ReactiveStaticTarget {
            directive,
            expression: expression.source().to_string(),
        }),
        Value::String(name) if !name.is_empty() => Ok(name),
        Value::Number(n) => Ok(crate::value::format_number(n)),
        other => Err(RuleError::InvalidTarget {
            directive,
            expression: expression.source().to_string(),
            found: other.kind(),
        }),
    }
}
