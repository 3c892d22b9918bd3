//! # Render Pipeline
//!
//! Runs the rules over a block of (masked) template text:
//!
//! 1. Every syntax rule scans the block. Only top-level matches are kept;
//!    directives nested in a kept match are rendered by that match's rule.
//! 2. Each kept match becomes a section and is executed. Reactive sections in
//!    element content carve a fragment of their own; inside tags and raw-text
//!    elements they render inline.
//! 3. Matches are swapped for slot tokens, and the attribute rules run over
//!    the tokenized text (injection last). A claimed attribute directive is
//!    replaced with a per-directive key attribute pointing at its section.
//! 4. Unclaimed attribute syntax is stripped and the text is split into
//!    pieces at the slot tokens.

use futures_util::future::LocalBoxFuture;
use std::ops::Range;
use std::rc::Rc;

use crate::cache::ExpressionCache;
use crate::error::{EngineError, RuleError};
use crate::escape::{SLOT_CLOSE, SLOT_OPEN};
use crate::expression::Expression;
use crate::observable::Observable;
use crate::options::EngineOptions;
use crate::parse::{markup_contexts, MarkupContext};
use crate::rule::{ResultData, Rule, RuleKind, RuleMatch};
use crate::scope::Scope;
use crate::tree::{Piece, PendingOutput, RenderTree, Section, SectionId};
use crate::value::Value;

/// Immutable per-instance configuration: the ordered rule sets and options
/// every render and rebuild of one instance runs with.
pub struct EngineCore {
    pub(crate) syntax_rules: Vec<Rc<dyn Rule>>,
    pub(crate) attribute_rules: Vec<Rc<dyn Rule>>,
    pub(crate) options: EngineOptions,
    pub(crate) expressions: Rc<ExpressionCache>,
}

impl EngineCore {
    pub(crate) fn new(
        rules: &[Rc<dyn Rule>],
        options: EngineOptions,
        expressions: Rc<ExpressionCache>,
    ) -> Self {
        let mut syntax_rules: Vec<Rc<dyn Rule>> = rules
            .iter()
            .filter(|r| r.kind() == RuleKind::Syntax)
            .cloned()
            .collect();
        let mut attribute_rules: Vec<Rc<dyn Rule>> = rules
            .iter()
            .filter(|r| r.kind() == RuleKind::Attribute)
            .cloned()
            .collect();
        syntax_rules.sort_by_key(|r| r.priority());
        attribute_rules.sort_by_key(|r| (r.runs_last(), r.priority()));

        Self {
            syntax_rules,
            attribute_rules,
            options,
            expressions,
        }
    }

    pub(crate) fn key_attribute(&self, section: SectionId) -> String {
        format!("{}-{}", self.options.node_attribute, section.token())
    }

    pub(crate) fn key_prefix(&self) -> String {
        format!("{}-", self.options.node_attribute)
    }
}

/// Result of rendering one block of template text.
#[derive(Debug, Default)]
pub struct BlockOutput {
    pub pieces: Vec<Piece>,
    /// Sections created directly in this block.
    pub sections: Vec<SectionId>,
    /// Reactive values referenced anywhere inside the block, nested
    /// directives included.
    pub observables: Vec<Observable<Value>>,
}

pub struct RenderContext<'a> {
    core: &'a EngineCore,
    tree: &'a mut RenderTree,
    /// Section currently executing; new sections become its children.
    parent: Option<SectionId>,
    /// One frame per `render_block` in progress.
    frames: Vec<Vec<Observable<Value>>>,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(core: &'a EngineCore, tree: &'a mut RenderTree) -> Self {
        Self {
            core,
            tree,
            parent: None,
            frames: Vec::new(),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.core.options
    }

    pub fn expression(&self, source: &str) -> Expression {
        self.core.expressions.get(source)
    }

    /// Whether the executing section sits inside an opening tag.
    pub fn in_tag(&self) -> bool {
        self.parent
            .and_then(|id| self.tree.section(id))
            .is_some_and(|s| s.in_tag)
    }

    fn parent_inline(&self) -> bool {
        self.parent
            .and_then(|id| self.tree.section(id))
            .is_some_and(|s| s.inline)
    }

    /// Hand off output that becomes available later. The executing section
    /// renders empty until [`settle`](crate::instance::TemplateInstance::settle)
    /// applies it, unless the section was rebuilt in the meantime.
    pub fn defer(&mut self, output: LocalBoxFuture<'static, Vec<Piece>>) {
        let Some(section) = self.parent else {
            tracing::warn!("deferred output outside of a section ignored");
            return;
        };
        let generation = self.tree.section(section).map_or(0, |s| s.generation);
        self.tree.pending.push(PendingOutput {
            section,
            generation,
            output,
        });
    }

    fn record_observables(&mut self, observables: &[Observable<Value>]) {
        for frame in &mut self.frames {
            for obs in observables {
                if !frame.iter().any(|o| o.ptr_eq(obs)) {
                    frame.push(obs.clone());
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BLOCK RENDERING
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn render_block(&mut self, text: &str, scope: &Scope) -> Result<BlockOutput, EngineError> {
        self.frames.push(Vec::new());
        let rendered = self.render_block_inner(text, scope);
        let observables = self.frames.pop().unwrap_or_default();
        let (pieces, sections) = rendered?;
        Ok(BlockOutput {
            pieces,
            sections,
            observables,
        })
    }

    fn render_block_inner(
        &mut self,
        text: &str,
        scope: &Scope,
    ) -> Result<(Vec<Piece>, Vec<SectionId>), EngineError> {
        let core = self.core;
        let mut sections = Vec::new();

        // Syntax phase
        let matches = top_level_matches(core, text);
        let positions: Vec<usize> = matches.iter().map(|(_, m)| m.start).collect();
        let contexts = markup_contexts(text, &positions);
        let within_tag = self.in_tag();
        let within_inline = self.parent_inline();

        let mut order: Vec<usize> = (0..matches.len()).collect();
        order.sort_by_key(|&i| (matches[i].0.priority(), std::cmp::Reverse(matches[i].1.start)));

        let mut slots: Vec<Option<Piece>> = vec![None; matches.len()];
        for i in order {
            let (rule, rule_match) = &matches[i];
            let id = self.tree.insert_section(Section {
                rule: Rc::clone(rule),
                rule_match: rule_match.clone(),
                scope: scope.clone(),
                parent: self.parent,
                children: Vec::new(),
                fragment: None,
                in_tag: within_tag || contexts[i].in_tag(),
                inline: within_inline || !contexts[i].allows_fragments(),
                output: Vec::new(),
                observables: Vec::new(),
                data: ResultData::None,
                generation: 0,
            });
            let deferred_before = self.tree.pending.len();
            self.execute_section(id)?;
            sections.push(id);

            let section = self.tree.section(id);
            let deferred = self.tree.pending.len() > deferred_before;
            let carve = section.is_some_and(|s| !s.inline && (s.is_reactive() || deferred));
            slots[i] = Some(if carve {
                Piece::Fragment(self.tree.carve_fragment(id))
            } else {
                Piece::Section(id)
            });
        }

        let mut tokenized = text.to_string();
        for (i, (_, rule_match)) in matches.iter().enumerate().rev() {
            tokenized.replace_range(rule_match.start..rule_match.end, &slot_token(i));
        }

        // Attribute phase
        for rule in &core.attribute_rules {
            let found = rule.find(&tokenized);
            if found.is_empty() {
                continue;
            }
            let positions: Vec<usize> = found.iter().map(|m| m.start).collect();
            let contexts = markup_contexts(&tokenized, &positions);

            for (rule_match, context) in found.into_iter().zip(contexts).rev() {
                if context != MarkupContext::Tag {
                    continue;
                }
                let id = self.tree.insert_section(Section {
                    rule: Rc::clone(rule),
                    rule_match: rule_match.clone(),
                    scope: scope.clone(),
                    parent: self.parent,
                    children: Vec::new(),
                    fragment: None,
                    in_tag: true,
                    inline: true,
                    output: Vec::new(),
                    observables: Vec::new(),
                    data: ResultData::None,
                    generation: 0,
                });
                self.execute_section(id)?;
                sections.push(id);

                let claimed = self
                    .tree
                    .section(id)
                    .is_some_and(|s| !matches!(s.data, ResultData::None));
                let replacement = if claimed {
                    format!(" {}", core.key_attribute(id))
                } else {
                    String::new()
                };
                let span = directive_span(&tokenized, rule_match.start, rule_match.end);
                tokenized.replace_range(span, &replacement);
            }
        }

        if core.options.strip_unclaimed {
            for rule in &core.attribute_rules {
                for rule_match in rule.find(&tokenized).into_iter().rev() {
                    tracing::debug!(
                        rule = rule.name(),
                        directive = %rule_match.text,
                        "stripping unclaimed attribute directive"
                    );
                    let span = directive_span(&tokenized, rule_match.start, rule_match.end);
                    tokenized.replace_range(span, "");
                }
            }
        }

        Ok((split_slots(&tokenized, slots), sections))
    }

    /// Run (or re-run) the rule of section `id` against its stored match and
    /// scope. Rule failures are logged and leave the section empty, except for
    /// malformed directives, which render their source unchanged, and static
    /// directive misuse, which is returned.
    pub(crate) fn execute_section(&mut self, id: SectionId) -> Result<(), EngineError> {
        let Some(section) = self.tree.section(id) else {
            return Ok(());
        };
        let rule = Rc::clone(&section.rule);
        let rule_match = section.rule_match.clone();
        let scope = section.scope.clone();

        let previous = self.parent.replace(id);
        let result = rule.execute(&rule_match, &scope, self);
        self.parent = previous;

        let (output, observables, data) = match result {
            Ok(result) => (result.output, result.observables, result.data),
            Err(err) => match err.into_static_violation() {
                Ok(violation) => return Err(violation),
                Err(RuleError::Malformed(reason)) => {
                    tracing::warn!(rule = rule.name(), directive = %rule_match.text, %reason, "malformed directive left as written");
                    (vec![Piece::Text(rule_match.text.clone())], Vec::new(), ResultData::None)
                }
                Err(err) => {
                    tracing::warn!(rule = rule.name(), directive = %rule_match.text, error = %err, "directive failed; output omitted");
                    (Vec::new(), Vec::new(), ResultData::None)
                }
            },
        };

        self.record_observables(&observables);
        if let Some(section) = self.tree.section_mut(id) {
            section.output = output;
            section.observables = observables;
            section.data = data;
        }
        Ok(())
    }
}

/// Keep matches that are not nested inside an earlier, wider match. Ties at
/// the same offset go to the longer match, then to the lower priority.
fn top_level_matches(core: &EngineCore, text: &str) -> Vec<(Rc<dyn Rule>, RuleMatch)> {
    let mut all: Vec<(Rc<dyn Rule>, RuleMatch)> = core
        .syntax_rules
        .iter()
        .flat_map(|rule| {
            rule.find(text)
                .into_iter()
                .map(move |m| (Rc::clone(rule), m))
        })
        .collect();
    all.sort_by_key(|(rule, m)| (m.start, std::cmp::Reverse(m.end), rule.priority()));

    let mut kept: Vec<(Rc<dyn Rule>, RuleMatch)> = Vec::new();
    let mut covered = 0;
    for (rule, m) in all {
        if m.start < covered || m.end <= m.start {
            continue;
        }
        covered = m.end;
        kept.push((rule, m));
    }
    kept
}

/// A directive's byte range widened over the whitespace char before it.
fn directive_span(text: &str, start: usize, end: usize) -> Range<usize> {
    match text[..start].chars().next_back() {
        Some(c) if c.is_whitespace() => start - c.len_utf8()..end,
        _ => start..end,
    }
}

fn slot_token(index: usize) -> String {
    format!("{}{}{}", SLOT_OPEN, index, SLOT_CLOSE)
}

fn split_slots(text: &str, mut slots: Vec<Option<Piece>>) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find(SLOT_OPEN) {
        let after = &rest[open + SLOT_OPEN.len_utf8()..];
        let Some(close) = after.find(SLOT_CLOSE) else {
            break;
        };
        let slot = after[..close]
            .parse::<usize>()
            .ok()
            .and_then(|i| slots.get_mut(i))
            .and_then(Option::take);

        if open > 0 {
            pieces.push(Piece::Text(rest[..open].to_string()));
        }
        if let Some(piece) = slot {
            pieces.push(piece);
        }
        rest = &after[close + SLOT_CLOSE.len_utf8()..];
    }

    if !rest.is_empty() {
        pieces.push(Piece::Text(rest.to_string()));
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::SectionId;

    #[test]
    fn test_split_slots() {
        let mut tree = RenderTree::new();
        let id = tree.set_root(Vec::new());
        let section = SectionId(id.0);

        let text = format!("a{}b{}c", slot_token(1), slot_token(0));
        let pieces = split_slots(&text, vec![Some(Piece::Section(section)), Some(Piece::Fragment(id))]);
        assert_eq!(
            pieces,
            vec![
                Piece::Text("a".into()),
                Piece::Fragment(id),
                Piece::Text("b".into()),
                Piece::Section(section),
                Piece::Text("c".into()),
            ]
        );
    }
}
