//! # Template Engine
//!
//! Entry point for rendering a template against a scope. `parse` masks
//! escaped markers, runs the rule pipeline once and hands the resulting
//! section tree to a [`TemplateInstance`], which keeps it in sync with the
//! reactive values it references.

use std::rc::Rc;

use crate::attribute_rules::{EventRule, InjectionRule, RefRule};
use crate::cache::ExpressionCache;
use crate::error::EngineError;
use crate::escape;
use crate::instance::TemplateInstance;
use crate::options::EngineOptions;
use crate::render::{EngineCore, RenderContext};
use crate::rule::Rule;
use crate::scope::Scope;
use crate::syntax_rules::{ConditionalRule, InterpolationRule, LoopRule};
use crate::tree::RenderTree;

pub struct TemplateEngine {
    scope: Scope,
    options: EngineOptions,
    rules: Vec<Rc<dyn Rule>>,
    expressions: Rc<ExpressionCache>,
}

impl TemplateEngine {
    pub fn new(scope: Scope) -> Self {
        Self::with_options(scope, EngineOptions::default())
    }

    pub fn with_options(scope: Scope, options: EngineOptions) -> Self {
        Self {
            scope,
            options,
            rules: default_rules(),
            expressions: Rc::new(ExpressionCache::new()),
        }
    }

    /// Add a rule alongside the built-in ones. Rules of the same kind run in
    /// priority order.
    pub fn register_rule(&mut self, rule: impl Rule + 'static) -> &mut Self {
        tracing::debug!(rule = rule.name(), priority = rule.priority(), "registering rule");
        self.rules.push(Rc::new(rule));
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn parse(&self, template: &str) -> Result<TemplateInstance, EngineError> {
        let core = Rc::new(EngineCore::new(
            &self.rules,
            self.options.clone(),
            Rc::clone(&self.expressions),
        ));

        let masked = escape::mask(template);
        let mut tree = RenderTree::new();
        let root = RenderContext::new(&core, &mut tree).render_block(&masked, &self.scope)?;
        tree.set_root(root.pieces);

        tracing::debug!(
            sections = tree.section_count(),
            fragments = tree.fragment_count(),
            "template parsed"
        );
        Ok(TemplateInstance::new(core, self.scope.clone(), tree))
    }

    /// Render `template` once and return its markup.
    pub fn process(template: &str, scope: Scope) -> Result<String, EngineError> {
        let instance = Self::new(scope).parse(template)?;
        let markup = instance.get_template();
        instance.dispose();
        Ok(markup)
    }

    pub fn create(template: &str, scope: Scope) -> Result<TemplateInstance, EngineError> {
        Self::new(scope).parse(template)
    }
}

fn default_rules() -> Vec<Rc<dyn Rule>> {
    vec![
        Rc::new(LoopRule),
        Rc::new(ConditionalRule),
        Rc::new(InterpolationRule),
        Rc::new(RefRule),
        Rc::new(EventRule),
        Rc::new(InjectionRule),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_process_renders_static_markup() {
        let scope = Scope::from_pairs([("name", Value::from("Ada"))]);
        let markup = TemplateEngine::process("<p>Hello @(name)</p>", scope).unwrap();
        assert_eq!(markup, "<p>Hello Ada</p>");
    }

    #[test]
    fn test_engine_reuses_parsed_expressions() {
        let engine = TemplateEngine::new(Scope::from_pairs([("n", Value::from(1))]));
        engine.parse("@(n) @(n)").unwrap();
        engine.parse("@(n)").unwrap();
        assert_eq!(engine.expressions.len(), 1);
        assert!(engine.expressions.hits() >= 2);
    }
}
