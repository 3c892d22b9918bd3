//! # Template Scanning
//!
//! Byte-level helpers shared by the directive rules: balanced delimiter
//! scanning, block bodies and the markup context (text, opening tag or
//! attribute value) at a given offset.
//!
//! All delimiters are ASCII, so scanning over bytes never splits a UTF-8
//! sequence and every returned offset is a char boundary.

use std::borrow::Cow;

use crate::escape::ESCAPED_MARKER;

// ═══════════════════════════════════════════════════════════════════════════════
// DELIMITERS
// ═══════════════════════════════════════════════════════════════════════════════

fn is_quote(b: u8) -> bool {
    b == b'"' || b == b'\'' || b == b'`'
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Index just past the string literal opening at `start`.
fn skip_string(bytes: &[u8], start: usize) -> Option<usize> {
    let quote = bytes[start];
    let mut i = start + 1;
    let mut template_brace_depth = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            i += 2;
            continue;
        }
        if quote == b'`' {
            if b == b'$' && bytes.get(i + 1) == Some(&b'{') {
                template_brace_depth += 1;
                i += 2;
                continue;
            }
            if b == b'}' && template_brace_depth > 0 {
                template_brace_depth -= 1;
                i += 1;
                continue;
            }
            if b == b'`' && template_brace_depth == 0 {
                return Some(i + 1);
            }
        } else if b == quote {
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

/// Index of the delimiter closing the one at `open`, skipping quoted strings.
pub fn find_balanced(text: &str, open: usize, open_ch: u8, close_ch: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&open_ch) {
        return None;
    }

    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        let b = bytes[i];
        if is_quote(b) {
            i = skip_string(bytes, i)?;
            continue;
        }
        if b == open_ch {
            depth += 1;
        } else if b == close_ch {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

pub fn skip_whitespace(text: &str, from: usize) -> usize {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Index of the `}` closing the block brace at `open`.
///
/// Block bodies hold markup, where quotes and parentheses are ordinary text.
/// Only a string literal at the very start of a block and the heads of nested
/// directives (`@(..)`, `@name(..)`, `if (..)`) are scanned quote-aware.
pub fn find_block_end(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => {
                depth += 1;
                let next = skip_whitespace(text, i + 1);
                if next < bytes.len() && is_quote(bytes[next]) {
                    i = skip_string(bytes, next)?;
                    continue;
                }
            }
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            b'(' if opens_directive_parens(bytes, i) => {
                i = find_balanced(text, i, b'(', b')')? + 1;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Keywords that open a directive head without the `@` marker.
const BARE_HEADS: [&[u8]; 3] = [b"for", b"if", b"elseif"];

/// Whether the `(` at `paren` opens a directive head: `@(`, `@name(`,
/// `@name:arg(`, or one of [`BARE_HEADS`] standing as a whole word.
fn opens_directive_parens(bytes: &[u8], paren: usize) -> bool {
    let mut word_end = paren;
    while word_end > 0 && bytes[word_end - 1].is_ascii_whitespace() {
        word_end -= 1;
    }
    let mut word_start = word_end;
    while word_start > 0
        && (is_ident_byte(bytes[word_start - 1]) || matches!(bytes[word_start - 1], b':' | b'-'))
    {
        word_start -= 1;
    }

    if word_start > 0 && bytes[word_start - 1] == b'@' {
        return true;
    }
    let word = &bytes[word_start..word_end];
    BARE_HEADS.contains(&word) && (word_start == 0 || !is_ident_byte(bytes[word_start - 1]))
}

/// A block whose whole content is one string literal renders the string.
pub fn unquote_block(body: &str) -> Cow<'_, str> {
    let trimmed = body.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() < 2 || !is_quote(bytes[0]) {
        return Cow::Borrowed(body);
    }
    if skip_string(bytes, 0) != Some(bytes.len()) {
        return Cow::Borrowed(body);
    }

    let quote = bytes[0] as char;
    let inner = &trimmed[1..trimmed.len() - 1];
    if !inner.contains('\\') {
        return Cow::Borrowed(inner);
    }

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) if next == quote || next == '\\' => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// Whether the directive at `pos` was written with a doubled marker.
pub fn is_escaped_at(text: &str, pos: usize) -> bool {
    text[..pos].ends_with(ESCAPED_MARKER)
}

// ═══════════════════════════════════════════════════════════════════════════════
// MARKUP CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupContext {
    /// Element content.
    Content,
    /// Inside an opening tag, between attributes.
    Tag,
    /// Inside a quoted attribute value.
    Attribute,
    /// Text of an element whose content is not parsed as markup
    /// (`textarea`, `title`, `script`, `style`).
    RawText,
}

impl MarkupContext {
    pub fn in_tag(self) -> bool {
        matches!(self, MarkupContext::Tag | MarkupContext::Attribute)
    }

    /// Whether boundary comments can be placed here and survive as nodes.
    pub fn allows_fragments(self) -> bool {
        self == MarkupContext::Content
    }
}

/// Elements whose content the HTML parser keeps as a single text node.
const RAW_TEXT_ELEMENTS: [&str; 4] = ["script", "style", "textarea", "title"];

#[derive(Clone, Copy)]
enum ScanState {
    Content,
    /// Opening tag; carries the element name when it starts raw text.
    Tag(Option<&'static str>),
    Quote(u8, Option<&'static str>),
    Comment,
    RawText(&'static str),
}

fn raw_text_element(name: &[u8]) -> Option<&'static str> {
    RAW_TEXT_ELEMENTS
        .iter()
        .find(|el| name.eq_ignore_ascii_case(el.as_bytes()))
        .copied()
}

/// Markup context at each of `positions`, found by scanning forward from the
/// start of `text`.
pub fn markup_contexts(text: &str, positions: &[usize]) -> Vec<MarkupContext> {
    let bytes = text.as_bytes();
    let mut order: Vec<usize> = (0..positions.len()).collect();
    order.sort_by_key(|&k| positions[k]);

    let mut result = vec![MarkupContext::Content; positions.len()];
    let mut state = ScanState::Content;
    let mut i = 0;
    let mut next = 0;

    while next < order.len() {
        let target = positions[order[next]];
        if i >= target || i >= bytes.len() {
            result[order[next]] = match state {
                ScanState::Tag(_) => MarkupContext::Tag,
                ScanState::Quote(..) => MarkupContext::Attribute,
                ScanState::RawText(_) => MarkupContext::RawText,
                ScanState::Content | ScanState::Comment => MarkupContext::Content,
            };
            next += 1;
            continue;
        }

        let b = bytes[i];
        state = match state {
            ScanState::Content if b == b'<' && bytes[i..].starts_with(b"<!--") => {
                i += 4;
                ScanState::Comment
            }
            ScanState::Content
                if b == b'<' && bytes.get(i + 1).is_some_and(|c| c.is_ascii_alphabetic()) =>
            {
                i += 1;
                let len = bytes[i..]
                    .iter()
                    .take_while(|c| c.is_ascii_alphanumeric() || **c == b'-')
                    .count();
                let raw = raw_text_element(&bytes[i..i + len]);
                i += len;
                ScanState::Tag(raw)
            }
            ScanState::Comment if bytes[i..].starts_with(b"-->") => {
                i += 3;
                ScanState::Content
            }
            ScanState::Tag(raw) if b == b'"' || b == b'\'' => {
                i += 1;
                ScanState::Quote(b, raw)
            }
            ScanState::Tag(raw) if b == b'>' => {
                i += 1;
                raw.map_or(ScanState::Content, ScanState::RawText)
            }
            ScanState::Quote(q, raw) if b == q => {
                i += 1;
                ScanState::Tag(raw)
            }
            ScanState::RawText(name)
                if b == b'<'
                    && bytes.get(i + 1) == Some(&b'/')
                    && bytes
                        .get(i + 2..i + 2 + name.len())
                        .is_some_and(|n| n.eq_ignore_ascii_case(name.as_bytes())) =>
            {
                i += 2 + name.len();
                ScanState::Tag(None)
            }
            other => {
                i += 1;
                other
            }
        };
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_balanced_skips_strings() {
        let text = "@(f(')', \"(\") + g(1))!";
        assert_eq!(find_balanced(text, 1, b'(', b')'), Some(text.len() - 2));
        assert_eq!(find_balanced("(unclosed", 0, b'(', b')'), None);
        assert_eq!(find_balanced("x(", 0, b'(', b')'), None);
    }

    #[test]
    fn test_block_end_treats_markup_quotes_as_text() {
        let text = "{ <p>don't</p> }";
        assert_eq!(find_block_end(text, 0), Some(text.len() - 1));

        let text = "{ \"a } b\" } rest";
        assert_eq!(find_block_end(text, 0), Some(10));

        let text = "{ @(x ? '}' : '{') <b>}</b> }";
        assert_eq!(find_block_end(text, 0), Some(22));

        let text = "{ @if (a) { \"}\" } }!";
        assert_eq!(find_block_end(text, 0), Some(text.len() - 2));
    }

    #[test]
    fn test_block_end_treats_prose_parentheses_as_text() {
        let text = "{ <p>Note (don't forget)</p> } tail";
        assert_eq!(find_block_end(text, 0), Some(text.find(" tail").unwrap() - 1));

        let text = "{ <p>Price (USD</p> }";
        assert_eq!(find_block_end(text, 0), Some(text.len() - 1));

        let text = "{ <p>a) b</p> }";
        assert_eq!(find_block_end(text, 0), Some(text.len() - 1));

        // Directive heads stay quote-aware.
        let text = "{ @on:click(say(')')) if (x == '}') {y} }";
        assert_eq!(find_block_end(text, 0), Some(text.len() - 1));
    }

    #[test]
    fn test_directive_heads() {
        let heads = |text: &str| opens_directive_parens(text.as_bytes(), text.len() - 1);
        assert!(heads("@("));
        assert!(heads("@ref("));
        assert!(heads("@inject:head ("));
        assert!(heads("} else if ("));
        assert!(heads("for ("));
        assert!(!heads("Note ("));
        assert!(!heads("verify ("));
        assert!(!heads("("));
    }

    #[test]
    fn test_unquote_block() {
        assert_eq!(unquote_block(" \"<span>@(i)</span>\" "), "<span>@(i)</span>");
        assert_eq!(unquote_block("'it\\'s'"), "it's");
        assert_eq!(unquote_block(" <p>'a'</p> "), " <p>'a'</p> ");
        assert_eq!(unquote_block("\"a\" + \"b\""), "\"a\" + \"b\"");
    }

    #[test]
    fn test_markup_contexts() {
        let text = "<div class=\"x @a\" @b>@c<!-- <p @d> --></div>";
        let positions = [
            text.find("@a").unwrap(),
            text.find("@b").unwrap(),
            text.find("@c").unwrap(),
            text.find("@d").unwrap(),
        ];
        assert_eq!(
            markup_contexts(text, &positions),
            vec![
                MarkupContext::Attribute,
                MarkupContext::Tag,
                MarkupContext::Content,
                MarkupContext::Content,
            ]
        );
        assert!(!markup_contexts("a < b @x", &[6])[0].in_tag());
    }

    #[test]
    fn test_raw_text_elements() {
        let text = "<textarea rows=\"2\">@a</textarea>@b<TITLE>x @c</TITLE><script></script>@d<style>p {} @e";
        let positions: Vec<usize> = ["@a", "@b", "@c", "@d", "@e"]
            .iter()
            .map(|m| text.find(m).unwrap())
            .collect();
        let contexts = markup_contexts(text, &positions);
        assert_eq!(
            contexts,
            vec![
                MarkupContext::RawText,
                MarkupContext::Content,
                MarkupContext::RawText,
                MarkupContext::Content,
                MarkupContext::RawText,
            ]
        );
        assert!(!contexts[0].in_tag());
        assert!(!contexts[0].allows_fragments());
        assert!(contexts[1].allows_fragments());
    }

    #[test]
    fn test_escaped_marker_detection() {
        let text = format!("{}if (x)", ESCAPED_MARKER);
        assert!(is_escaped_at(&text, ESCAPED_MARKER.len_utf8()));
        assert!(!is_escaped_at("if (x)", 0));
    }
}
