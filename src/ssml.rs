//! SSML filtering: restricts markup to the tags an engine declares.
//!
//! This is a flat textual pass over `<...>` spans, not an XML parser:
//! malformed or badly nested markup is rewritten, never rejected.
//!
//! A tag is considered supported when any supported tag *name* occurs as a
//! substring of the whole tag text, so `"prosody"` keeps
//! `<prosody rate="fast">` and `</prosody>`. Downstream engines rely on that
//! loose match, including for tags that only mention a supported name inside
//! an attribute value.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const SPEAK_OPEN: &str = "<speak>";
const SPEAK_CLOSE: &str = "</speak>";

static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

// ─────────────────────────────────────────────────────────────────────────────
// Tag transform strategy
// ─────────────────────────────────────────────────────────────────────────────

/// Per-engine rewrite applied to every supported tag that survives filtering.
pub trait TagTransformer: Send + Sync {
    fn transform(&self, tag: &str) -> String;
}

/// Keeps supported tags verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTags;

impl TagTransformer for IdentityTags {
    fn transform(&self, tag: &str) -> String {
        tag.to_string()
    }
}

impl<F> TagTransformer for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn transform(&self, tag: &str) -> String {
        self(tag)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Strip every `<...>` span and collapse doubled spaces.
pub fn remove_ssml(text: &str) -> String {
    RE_TAG.replace_all(text, "").replace("  ", " ")
}

/// Ensure `sentence` is wrapped in exactly one outer `<speak>` element and
/// drop text lying outside it.
///
/// Returns `""` when nothing but an empty `<speak></speak>` remains. With
/// `include_tags == false` the outer wrapper is removed from the result.
pub fn format_speak_tags(sentence: &str, include_tags: bool) -> String {
    let has_open = sentence.contains(SPEAK_OPEN);
    let has_close = sentence.contains(SPEAK_CLOSE);

    let mut to_speak = match (has_open, has_close) {
        (false, false) => format!("{SPEAK_OPEN}{sentence}{SPEAK_CLOSE}"),
        (false, true) => format!("{SPEAK_OPEN}{sentence}"),
        (true, false) => format!("{sentence}{SPEAK_CLOSE}"),
        (true, true) => sentence.to_string(),
    };

    if !to_speak.starts_with(SPEAK_OPEN) {
        if let Some((_, rest)) = to_speak.split_once(SPEAK_OPEN) {
            to_speak = format!("{SPEAK_OPEN}{rest}");
        }
    }
    if !to_speak.ends_with(SPEAK_CLOSE) {
        if let Some((head, _)) = to_speak.rsplit_once(SPEAK_CLOSE) {
            to_speak = format!("{head}{SPEAK_CLOSE}");
        }
    }

    if to_speak == format!("{SPEAK_OPEN}{SPEAK_CLOSE}") {
        return String::new();
    }

    if include_tags {
        to_speak
    } else {
        let inner = to_speak.strip_prefix(SPEAK_OPEN).unwrap_or(&to_speak);
        inner.strip_suffix(SPEAK_CLOSE).unwrap_or(inner).to_string()
    }
}

fn is_supported(tag: &str, supported_tags: &BTreeSet<String>) -> bool {
    supported_tags.iter().any(|name| tag.contains(name.as_str()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Sanitise `utterance` against `supported_tags`.
///
/// * no supported tags → all markup stripped, plain text returned;
/// * otherwise the `<speak>` wrapper is normalised, supported tags pass
///   through `transformer` and unsupported tags are deleted (their content
///   is kept).
pub fn validate(
    utterance: &str,
    supported_tags: &BTreeSet<String>,
    transformer: &dyn TagTransformer,
) -> String {
    if supported_tags.is_empty() {
        return remove_ssml(utterance);
    }

    // The wrapper goes through the tag pass like any other tag.
    let normalized = format_speak_tags(utterance, true);
    if normalized.is_empty() {
        return normalized;
    }

    RE_TAG
        .replace_all(&normalized, |caps: &Captures| {
            let tag = &caps[0];
            if is_supported(tag, supported_tags) {
                transformer.transform(tag)
            } else {
                String::new()
            }
        })
        .replace("  ", " ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_supported_tags_strips_everything() {
        let out = validate("Hello <foo>world</foo>", &tags(&[]), &IdentityTags);
        assert_eq!(out, "Hello world");

        let out = validate(
            "<speak>It's <prosody rate=\"slow\">late</prosody> <break/> now</speak>",
            &tags(&[]),
            &IdentityTags,
        );
        assert!(!RE_TAG.is_match(&out), "got: {out}");
        assert_eq!(out, "It's late now");
    }

    #[test]
    fn test_speak_supported_is_unchanged() {
        let out = validate("<speak>Hi</speak>", &tags(&["speak"]), &IdentityTags);
        assert_eq!(out, "<speak>Hi</speak>");
    }

    #[test]
    fn test_unsupported_tag_removed_content_kept() {
        let out = validate(
            "<speak>say <emphasis>this</emphasis> slowly</speak>",
            &tags(&["speak"]),
            &IdentityTags,
        );
        assert_eq!(out, "<speak>say this slowly</speak>");
    }

    #[test]
    fn test_substring_match_keeps_attribute_tags() {
        let out = validate(
            "<prosody rate=\"fast\">quick</prosody>",
            &tags(&["speak", "prosody"]),
            &IdentityTags,
        );
        assert_eq!(out, "<speak><prosody rate=\"fast\">quick</prosody></speak>");

        // A supported name inside an attribute value keeps the tag too.
        let out = validate("<say-as x=\"prosody\">7</say-as>", &tags(&["prosody"]), &IdentityTags);
        assert_eq!(out, "<say-as x=\"prosody\">7");
    }

    #[test]
    fn test_speak_wrapper_kept_by_substring_name() {
        let out = validate("hi <b>there</b>", &tags(&["peak"]), &IdentityTags);
        assert_eq!(out, "<speak>hi there</speak>");

        let out = validate("<speak>hi</speak>", &tags(&["break"]), &IdentityTags);
        assert_eq!(out, "hi");
    }

    #[test]
    fn test_transformer_applied_to_supported_tags() {
        let upper = |tag: &str| tag.to_uppercase();
        let out = validate("<speak>a <break/> b</speak>", &tags(&["speak", "break"]), &upper);
        assert_eq!(out, "<SPEAK>a <BREAK/> b</SPEAK>");
    }

    #[test]
    fn test_empty_speak_collapses() {
        assert_eq!(format_speak_tags("", true), "");
        assert_eq!(format_speak_tags("<speak></speak>", false), "");
        assert_eq!(validate("", &tags(&["speak"]), &IdentityTags), "");
    }

    #[test]
    fn test_format_speak_tags_wrapping() {
        assert_eq!(format_speak_tags("hi", true), "<speak>hi</speak>");
        assert_eq!(format_speak_tags("hi</speak>", true), "<speak>hi</speak>");
        assert_eq!(format_speak_tags("<speak>hi", true), "<speak>hi</speak>");
        assert_eq!(format_speak_tags("junk <speak>hi</speak> tail", true), "<speak>hi</speak>");
        assert_eq!(format_speak_tags("<speak>hi</speak>", false), "hi");
    }

    #[test]
    fn test_remove_ssml_collapses_double_spaces() {
        assert_eq!(remove_ssml("a <x/> b"), "a b");
    }
}
