//! Trailing metadata micro-syntax.
//!
//! Recognized markers, in priority order:
//! - `// text` side note, rest of the string.
//! - `@@a,b,c` comma-separated tags, rest of the string.
//! - `::payload::` control-channel text, up to the last closing `::`.
//!
//! The clause must open with a marker, after optional leading whitespace.
//! Only that first marker is honored and everything after it belongs to it.
//! Text that does not open with a marker carries no metadata.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const NOTE_MARKER: &str = "//";
pub const TAG_MARKER: &str = "@@";
pub const CONTROL_MARKER: &str = "::";

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(//|@@|::)").expect("valid marker regex"));

/// Metadata parsed from one free-form argument string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Human-readable side note.
    pub note: Option<String>,
    /// Labels, trimmed, empties dropped, in input order.
    pub tags: Vec<String>,
    /// Control-channel payload.
    pub control: Option<String>,
}

impl Annotation {
    /// Parses the trailing metadata clause of a command.
    ///
    /// Never fails: input without a recognized marker yields an empty value.
    pub fn parse(raw: &str) -> Self {
        let Some(caps) = MARKER_RE.captures(raw) else {
            return Self::default();
        };
        let Some(marker) = caps.get(1) else {
            return Self::default();
        };
        let rest = &raw[marker.end()..];

        match marker.as_str() {
            NOTE_MARKER => Self {
                note: non_empty(rest),
                ..Self::default()
            },
            TAG_MARKER => Self {
                tags: split_tags(rest),
                ..Self::default()
            },
            _ => {
                let body = match rest.rfind(CONTROL_MARKER) {
                    Some(index) => &rest[..index],
                    None => rest,
                };
                Self {
                    control: non_empty(body),
                    ..Self::default()
                }
            }
        }
    }

    /// Builds an annotation carrying only a note.
    pub fn note(text: impl Into<String>) -> Self {
        Self {
            note: non_empty(&text.into()),
            ..Self::default()
        }
    }

    /// Builds an annotation carrying only tags.
    pub fn tags<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tags: labels
                .into_iter()
                .filter_map(|label| non_empty(label.as_ref()))
                .collect(),
            ..Self::default()
        }
    }

    /// Builds an annotation carrying only control-channel text.
    pub fn control(text: impl Into<String>) -> Self {
        Self {
            control: non_empty(&text.into()),
            ..Self::default()
        }
    }

    /// Returns true when no field carries a value.
    pub fn is_empty(&self) -> bool {
        self.note.is_none() && self.tags.is_empty() && self.control.is_none()
    }

    /// Returns true when note or control text is present.
    pub fn has_text(&self) -> bool {
        self.note.is_some() || self.control.is_some()
    }
}

fn split_tags(value: &str) -> Vec<String> {
    value.split(',').filter_map(non_empty).collect()
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::Annotation;

    #[test]
    fn note_marker_takes_rest_of_string() {
        let parsed = Annotation::parse("// entry point, keep @@stable");
        assert_eq!(parsed.note.as_deref(), Some("entry point, keep @@stable"));
        assert!(parsed.tags.is_empty());
        assert!(parsed.control.is_none());
    }

    #[test]
    fn tag_marker_splits_and_drops_empty_labels() {
        let parsed = Annotation::parse("@@ api, core,, ,draft ");
        assert_eq!(parsed.tags, vec!["api", "core", "draft"]);
        assert!(parsed.note.is_none());
    }

    #[test]
    fn control_marker_stops_at_last_closing_marker() {
        let parsed = Annotation::parse("::TODO: wire the parser:: trailing");
        assert_eq!(parsed.control.as_deref(), Some("TODO: wire the parser"));

        let unterminated = Annotation::parse("::NAME: text:");
        assert_eq!(unterminated.control.as_deref(), Some("NAME: text:"));
    }

    #[test]
    fn only_leading_marker_is_honored() {
        let parsed = Annotation::parse("@@one,two // not a note");
        assert_eq!(parsed.tags, vec!["one", "two // not a note"]);
        assert!(parsed.note.is_none());

        let padded = Annotation::parse("  \t// the note");
        assert_eq!(padded.note.as_deref(), Some("the note"));
    }

    #[test]
    fn marker_after_leading_text_is_ignored() {
        assert!(Annotation::parse("ignored words // the note").is_empty());
        assert!(Annotation::parse("see @@tag").is_empty());
        assert!(Annotation::parse("http://example.com").is_empty());
    }

    #[test]
    fn empty_or_markerless_input_is_empty() {
        assert!(Annotation::parse("").is_empty());
        assert!(Annotation::parse("   plain words ").is_empty());
        assert!(Annotation::parse("//   ").is_empty());
    }
}
