//! # Reactive Template Engine
//!
//! Renders HTML templates containing `@` directives against a scope of named
//! values and keeps the rendered markup in sync when reactive values change.
//!
//! ## Directives
//!
//! | Syntax | Kind | Effect |
//! |--------|------|--------|
//! | `@for (item in items) { … }` | syntax | repeat the body per element |
//! | `@if (cond) { … } else { … }` | syntax | render the first truthy branch |
//! | `@(expr)` | syntax | insert the value, escaped |
//! | `@ref(name)` | attribute | write the element into the scope |
//! | `@on:event(handler)` | attribute | attach an event listener |
//! | `@inject:head(target)` | attribute | move the element into `target` |
//!
//! `@@` renders a literal `@`.
//!
//! ## Guarantees
//!
//! 1. **Convergence**: after any observable changes, every bound container
//!    shows exactly what a fresh render against the current scope would.
//! 2. **Isolation**: a change re-renders only the fragments that depend on
//!    the changed observable.
//! 3. **Static directives**: `@ref` and `@inject` reject reactive targets
//!    with `T-ERR-STATIC-001`.
//! 4. **Lifecycle**: unbinding detaches every listener the instance added;
//!    disposal is terminal.

mod arena;
mod ast;
mod attribute_rules;
mod binding;
mod builtins;
mod cache;
mod document;
mod engine;
mod error;
pub mod escape;
mod eval;
mod expr_lowerer;
mod expression;
mod instance;
mod observable;
mod options;
pub mod parse;
mod render;
mod rule;
mod scope;
mod syntax_rules;
mod tree;
mod value;
mod visitor;

#[cfg(test)]
mod expression_tests;
#[cfg(test)]
mod instance_tests;
#[cfg(test)]
mod safety_tests;

pub use attribute_rules::{EventRule, InjectionRule, RefRule};
pub use document::{escape_attribute, escape_text, Document, Event, ListenerId, Node, NodeId, NodeKind};
pub use engine::TemplateEngine;
pub use error::{
    EngineError, EvalError, EvalResult, RuleError, ERR_ALREADY_BOUND, ERR_DISPOSED, ERR_NOT_BOUND,
    ERR_OPTIONS, ERR_STATIC_DIRECTIVE,
};
pub use expression::{Evaluation, Expression};
pub use instance::{FragmentChange, ListenerHandle, TemplateInstance};
pub use observable::{Observable, ObservableId, Subscription, SubscriptionId};
pub use options::EngineOptions;
pub use render::{BlockOutput, RenderContext};
pub use rule::{
    static_name, Branch, InjectPosition, MatchData, ResultData, Rule, RuleKind, RuleMatch, RuleResult,
};
pub use scope::{Scope, ScopeProvider};
pub use syntax_rules::{display_value, ConditionalRule, InterpolationRule, LoopRule};
pub use tree::{FragmentId, Piece, SectionId};
pub use value::{format_number, Function, Promise, Resolver, Value};
