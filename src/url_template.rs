//! Relative URL templates and percent-encoding.
//!
//! Templates carry `{name}` placeholders whose names follow
//! `[a-zA-Z][a-zA-Z0-9_-]*`. Values substituted into the path, the query
//! string or a form body are encoded by [`canonicalize`], which returns its
//! input unchanged (and unallocated) when nothing needs escaping.

use std::borrow::Cow;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

/// Renders the placeholder grammar for error messages.
pub(crate) const PARAM_PATTERN: &str = "\\{([a-zA-Z][a-zA-Z0-9_-]*)\\}";

/// Which characters to escape, for raw values and for values the caller
/// already encoded.
#[derive(Debug)]
pub(crate) struct EncodeSet {
    raw: &'static AsciiSet,
    encoded: &'static AsciiSet,
}

const PATH_SEGMENT_ALWAYS: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'\\')
    .add(b'?')
    .add(b'#');

const QUERY_COMPONENT_ALWAYS: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'\'')
    .add(b'<')
    .add(b'>')
    .add(b'#');

const FORM_ALWAYS: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'\'')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'@')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'/')
    .add(b'\\')
    .add(b'?')
    .add(b'#')
    .add(b'&')
    .add(b'!')
    .add(b'$')
    .add(b'(')
    .add(b')')
    .add(b',')
    .add(b'~');

/// A single path segment value. `/` and `%` survive only when encoded.
pub(crate) const PATH_SEGMENT: EncodeSet = EncodeSet {
    raw: &PATH_SEGMENT_ALWAYS.add(b'/').add(b'%'),
    encoded: PATH_SEGMENT_ALWAYS,
};

/// A query parameter name or value.
pub(crate) const QUERY_COMPONENT: EncodeSet = EncodeSet {
    raw: &QUERY_COMPONENT_ALWAYS
        .add(b'&')
        .add(b'=')
        .add(b'+')
        .add(b'%'),
    encoded: QUERY_COMPONENT_ALWAYS,
};

/// A form field name or value.
pub(crate) const FORM: EncodeSet = EncodeSet {
    raw: &FORM_ALWAYS.add(b'+').add(b'%'),
    encoded: FORM_ALWAYS,
};

/// Percent-encodes `input` for the context described by `set`.
///
/// When `already_encoded` is set, existing `%XX` escapes are kept and tab,
/// newline, form feed and carriage return are dropped.
pub(crate) fn canonicalize<'a>(input: &'a str, set: &EncodeSet, already_encoded: bool) -> Cow<'a, str> {
    if !already_encoded {
        return utf8_percent_encode(input, set.raw).into();
    }

    let is_stripped = |c: char| matches!(c, '\t' | '\n' | '\x0c' | '\r');
    if input.contains(is_stripped) {
        let kept: String = input.chars().filter(|&c| !is_stripped(c)).collect();
        return Cow::Owned(utf8_percent_encode(&kept, set.encoded).to_string());
    }
    utf8_percent_encode(input, set.encoded).into()
}

/// Percent-encodes a path parameter value.
#[must_use]
pub fn canonicalize_for_path(input: &str, already_encoded: bool) -> Cow<'_, str> {
    canonicalize(input, &PATH_SEGMENT, already_encoded)
}

/// Whether `name` is a legal placeholder name.
pub(crate) fn is_valid_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Extracts the distinct placeholder names of a template, in order of first
/// appearance.
///
/// Braces around text that is not a legal name are left alone, so the
/// literal text later fails the placeholder cross-check with a clear
/// message.
#[must_use]
pub fn parse_path_params(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(after.len());
        let name = &after[..name_len];
        if after[name_len..].starts_with('}') && is_valid_param_name(name) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_owned());
            }
            rest = &after[name_len + 1..];
        } else {
            rest = after;
        }
    }
    names
}

/// Returns the literal query string of a template when it contains a
/// placeholder.
pub(crate) fn placeholder_in_query(template: &str) -> Option<&str> {
    let (_, query) = template.split_once('?')?;
    (!query.is_empty() && !parse_path_params(query).is_empty()).then_some(query)
}

/// Whether a relative path contains a `.` or `..` segment, literal or
/// escaped.
pub(crate) fn is_path_traversal(relative: &str) -> bool {
    let path = relative.split(['?', '#']).next().unwrap_or_default();
    path.split('/').any(|segment| {
        let decoded = segment.replace("%2e", ".").replace("%2E", ".");
        decoded == "." || decoded == ".."
    })
}
