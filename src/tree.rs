//! # Render Tree
//!
//! Sections and fragments live in generational arenas. A fragment is a list
//! of pieces: literal markup, a section rendered inline, or a nested fragment
//! rendered between its own boundary markers. Rendering always walks the
//! current section outputs, so a rebuilt section shows up everywhere it is
//! embedded.

use std::fmt;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;

use crate::arena::{Arena, Key};
use crate::observable::Observable;
use crate::rule::{ResultData, Rule, RuleMatch};
use crate::scope::Scope;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectionId(pub(crate) Key);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentId(pub(crate) Key);

impl SectionId {
    /// Suffix of the node attribute that points an element at this section.
    pub(crate) fn token(self) -> String {
        format!("{}-{}", self.0.index(), self.0.generation())
    }

    pub(crate) fn from_token(token: &str) -> Option<Self> {
        let (index, generation) = token.split_once('-')?;
        Some(SectionId(Key::from_parts(
            index.parse().ok()?,
            generation.parse().ok()?,
        )))
    }
}

impl FragmentId {
    fn marker_name(self) -> String {
        format!("{}{}.{}", FRAGMENT_MARKER_PREFIX, self.0.index(), self.0.generation())
    }

    pub(crate) fn start_marker(self) -> String {
        self.marker_name()
    }

    pub(crate) fn end_marker(self) -> String {
        format!("/{}", self.marker_name())
    }

    /// Decode a boundary comment: `(fragment, is_end)`.
    pub(crate) fn parse_marker(comment: &str) -> Option<(FragmentId, bool)> {
        let (rest, is_end) = match comment.strip_prefix('/') {
            Some(rest) => (rest, true),
            None => (comment, false),
        };
        let (index, generation) = rest.strip_prefix(FRAGMENT_MARKER_PREFIX)?.split_once('.')?;
        let key = Key::from_parts(index.parse().ok()?, generation.parse().ok()?);
        Some((FragmentId(key), is_end))
    }
}

const FRAGMENT_MARKER_PREFIX: &str = "tpl:f";

#[derive(Debug, Clone, PartialEq)]
pub enum Piece {
    Text(String),
    Section(SectionId),
    Fragment(FragmentId),
}

pub struct Section {
    pub(crate) rule: Rc<dyn Rule>,
    pub(crate) rule_match: RuleMatch,
    pub(crate) scope: Scope,
    pub(crate) parent: Option<SectionId>,
    pub(crate) children: Vec<SectionId>,
    /// Fragment carved for this section's output, if it is independently
    /// re-renderable.
    pub(crate) fragment: Option<FragmentId>,
    pub(crate) in_tag: bool,
    /// Rendered inside a tag or raw text, where boundary comments cannot
    /// stand; such a section never carves a fragment and is refreshed with
    /// its enclosing region.
    pub(crate) inline: bool,
    pub(crate) output: Vec<Piece>,
    pub(crate) observables: Vec<Observable<Value>>,
    pub(crate) data: ResultData,
    /// Bumped on every rebuild; stale async results compare against it.
    pub(crate) generation: u64,
}

impl Section {
    pub fn is_reactive(&self) -> bool {
        !self.observables.is_empty()
    }
}

impl fmt::Debug for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("rule", &self.rule.name())
            .field("source", &self.rule_match.text)
            .field("parent", &self.parent)
            .field("fragment", &self.fragment)
            .field("generation", &self.generation)
            .finish()
    }
}

#[derive(Debug)]
pub struct Fragment {
    pub(crate) pieces: Vec<Piece>,
    /// Section whose output this fragment renders. `None` for the root.
    pub(crate) owner: Option<SectionId>,
}

/// An async evaluation started by a section, tagged with the section
/// generation it belongs to.
pub(crate) struct PendingOutput {
    pub(crate) section: SectionId,
    pub(crate) generation: u64,
    pub(crate) output: LocalBoxFuture<'static, Vec<Piece>>,
}

#[derive(Default)]
pub struct RenderTree {
    pub(crate) sections: Arena<Section>,
    pub(crate) fragments: Arena<Fragment>,
    root: Option<FragmentId>,
    pub(crate) pending: Vec<PendingOutput>,
    /// Sections created since the last call to `take_created`.
    created: Vec<SectionId>,
}

impl RenderTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<FragmentId> {
        self.root
    }

    pub(crate) fn set_root(&mut self, pieces: Vec<Piece>) -> FragmentId {
        let id = FragmentId(self.fragments.insert(Fragment {
            pieces,
            owner: None,
        }));
        self.root = Some(id);
        id
    }

    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.sections.get(id.0)
    }

    pub(crate) fn section_mut(&mut self, id: SectionId) -> Option<&mut Section> {
        self.sections.get_mut(id.0)
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub(crate) fn insert_section(&mut self, section: Section) -> SectionId {
        let parent = section.parent;
        let id = SectionId(self.sections.insert(section));
        if let Some(parent) = parent.and_then(|p| self.sections.get_mut(p.0)) {
            parent.children.push(id);
        }
        self.created.push(id);
        id
    }

    pub(crate) fn carve_fragment(&mut self, owner: SectionId) -> FragmentId {
        let id = FragmentId(self.fragments.insert(Fragment {
            pieces: vec![Piece::Section(owner)],
            owner: Some(owner),
        }));
        if let Some(section) = self.sections.get_mut(owner.0) {
            section.fragment = Some(id);
        }
        id
    }

    pub(crate) fn take_created(&mut self) -> Vec<SectionId> {
        std::mem::take(&mut self.created)
    }

    pub(crate) fn take_pending(&mut self) -> Vec<PendingOutput> {
        std::mem::take(&mut self.pending)
    }

    /// Remove every descendant of `id` together with the fragments they
    /// carved. The removed sections are returned so the caller can drop
    /// their dependency records.
    pub(crate) fn dispose_children(&mut self, id: SectionId) -> Vec<(SectionId, Section)> {
        let children = match self.sections.get_mut(id.0) {
            Some(section) => std::mem::take(&mut section.children),
            None => return Vec::new(),
        };

        let mut removed = Vec::new();
        let mut stack = children;
        while let Some(child) = stack.pop() {
            if let Some(mut section) = self.sections.remove(child.0) {
                stack.append(&mut section.children);
                if let Some(fragment) = section.fragment {
                    self.fragments.remove(fragment.0);
                }
                removed.push((child, section));
            }
        }
        self.pending.retain(|p| self.sections.contains(p.section.0));
        removed
    }

    /// The fragment whose region displays `id`: its own, else the nearest
    /// ancestor's, else the root.
    pub(crate) fn display_fragment(&self, id: SectionId) -> Option<FragmentId> {
        let mut current = Some(id);
        while let Some(section_id) = current {
            let section = self.section(section_id)?;
            if let Some(fragment) = section.fragment {
                return Some(fragment);
            }
            current = section.parent;
        }
        self.root
    }

    /// The fragment whose region encloses `id`'s region.
    pub(crate) fn fragment_parent(&self, id: FragmentId) -> Option<FragmentId> {
        let owner = self.fragments.get(id.0)?.owner?;
        match self.section(owner)?.parent {
            Some(parent) => self.display_fragment(parent),
            None => self.root,
        }
    }

    pub(crate) fn is_fragment_within(&self, id: FragmentId, ancestor: FragmentId) -> bool {
        let mut current = self.fragment_parent(id);
        while let Some(fragment) = current {
            if fragment == ancestor {
                return true;
            }
            current = self.fragment_parent(fragment);
        }
        false
    }

    /// Markup of a fragment's content. With `markers`, nested fragments are
    /// wrapped in their boundary comments.
    pub(crate) fn render_fragment(&self, id: FragmentId, markers: bool) -> String {
        let mut out = String::new();
        if let Some(fragment) = self.fragments.get(id.0) {
            self.render_pieces(&fragment.pieces, markers, &mut out);
        }
        out
    }

    /// The fragment including its own boundary markers.
    pub(crate) fn render_region(&self, id: FragmentId) -> String {
        let mut out = String::new();
        self.render_piece(&Piece::Fragment(id), true, &mut out);
        out
    }

    fn render_pieces(&self, pieces: &[Piece], markers: bool, out: &mut String) {
        for piece in pieces {
            self.render_piece(piece, markers, out);
        }
    }

    fn render_piece(&self, piece: &Piece, markers: bool, out: &mut String) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Section(id) => {
                if let Some(section) = self.section(*id) {
                    self.render_pieces(&section.output, markers, out);
                }
            }
            Piece::Fragment(id) => {
                let Some(fragment) = self.fragments.get(id.0) else {
                    return;
                };
                if markers {
                    out.push_str("<!--");
                    out.push_str(&id.start_marker());
                    out.push_str("-->");
                }
                self.render_pieces(&fragment.pieces, markers, out);
                if markers {
                    out.push_str("<!--");
                    out.push_str(&id.end_marker());
                    out.push_str("-->");
                }
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.sections.clear();
        self.fragments.clear();
        self.pending.clear();
        self.created.clear();
        self.root = None;
    }
}

impl fmt::Debug for RenderTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderTree")
            .field("sections", &self.sections.len())
            .field("fragments", &self.fragments.len())
            .field("root", &self.root)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_round_trip() {
        let mut arena: Arena<()> = Arena::new();
        let key = arena.insert(());
        let id = FragmentId(key);

        assert_eq!(FragmentId::parse_marker(&id.start_marker()), Some((id, false)));
        assert_eq!(FragmentId::parse_marker(&id.end_marker()), Some((id, true)));
        assert_eq!(FragmentId::parse_marker("just a comment"), None);

        let section = SectionId(key);
        assert_eq!(SectionId::from_token(&section.token()), Some(section));
        assert_eq!(SectionId::from_token("x-1"), None);
    }
}
