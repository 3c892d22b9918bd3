//! Escape handling for the directive marker.
//!
//! A doubled marker (`@@`) in authored text stands for one literal `@`. Before
//! any rule scans the template, doubled markers are swapped for a Unicode
//! noncharacter so no rule can mistake them for directive syntax; rendered
//! output restores them.

use std::borrow::Cow;

/// Directive marker character.
pub const MARKER: char = '@';

/// Stands in for an escaped marker while rules run. U+FDD0..U+FDEF are
/// permanently reserved noncharacters and never occur in interchange text.
pub(crate) const ESCAPED_MARKER: char = '\u{FDD0}';

/// Delimiters of engine-internal slot tokens (see `render.rs`).
pub(crate) const SLOT_OPEN: char = '\u{FDD1}';
pub(crate) const SLOT_CLOSE: char = '\u{FDD2}';

fn is_reserved(c: char) -> bool {
    c == ESCAPED_MARKER || c == SLOT_OPEN || c == SLOT_CLOSE
}

/// Replace every doubled marker with the private placeholder. Stray reserved
/// characters are dropped so they can never collide with engine tokens.
pub fn mask(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if is_reserved(c) {
            continue;
        }
        if c == MARKER && chars.peek() == Some(&MARKER) {
            chars.next();
            out.push(ESCAPED_MARKER);
            continue;
        }
        out.push(c);
    }

    out
}

/// Restore placeholders to single literal markers.
pub fn unmask(text: &str) -> Cow<'_, str> {
    if text.contains(ESCAPED_MARKER) {
        Cow::Owned(text.replace(ESCAPED_MARKER, "@"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Mask `input`, run `f` over the masked text and unmask its result.
pub fn process<F>(input: &str, f: F) -> String
where
    F: FnOnce(&str) -> String,
{
    let masked = mask(input);
    let output = f(&masked);
    unmask(&output).into_owned()
}
