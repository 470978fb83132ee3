//! Narrative tone validation: pattern-based detection and cleanup of
//! formatting the narrator is not supposed to use
//!
//! Structured sub-blocks ([STAT_CHANGES] and [DM_ACTIONS]) are machine
//! content, not prose: they are never scanned and survive cleaning
//! byte-for-byte.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Delimiter pairs whose contents are opaque to the validator
const OPAQUE_BLOCKS: &[(&str, &str)] = &[
    ("[STAT_CHANGES]", "[/STAT_CHANGES]"),
    ("[DM_ACTIONS]", "[/DM_ACTIONS]"),
];

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+").unwrap());
static BOLD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^-\s+").unwrap());
static META_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[A-Z][A-Za-z0-9 ]{0,29}:\s").unwrap());

/// Kinds of tone violations the validator looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Header,
    Bold,
    Bullet,
    MetaLabel,
}

/// One detected violation with a short excerpt for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToneViolation {
    pub kind: ViolationKind,
    pub excerpt: String,
}

/// Scan narrated prose for disallowed formatting, skipping opaque blocks
pub fn detect_violations(text: &str) -> Vec<ToneViolation> {
    let mut violations = Vec::new();

    for segment in segments(text) {
        if segment.opaque {
            continue;
        }
        for m in HEADER_RE.find_iter(segment.text) {
            violations.push(violation(ViolationKind::Header, segment.text, m.start()));
        }
        for m in BOLD_RE.find_iter(segment.text) {
            violations.push(ToneViolation {
                kind: ViolationKind::Bold,
                excerpt: excerpt(m.as_str()),
            });
        }
        for m in BULLET_RE.find_iter(segment.text) {
            violations.push(violation(ViolationKind::Bullet, segment.text, m.start()));
        }
        for m in META_LABEL_RE.find_iter(segment.text) {
            violations.push(violation(ViolationKind::MetaLabel, segment.text, m.start()));
        }
    }

    violations
}

/// Boolean convenience over `detect_violations`
pub fn has_violations(text: &str) -> bool {
    !detect_violations(text).is_empty()
}

/// Strip header and bold markers and flatten bullet lines, leaving opaque
/// block contents untouched. Meta-labels are reported, not rewritten.
pub fn clean(text: &str) -> String {
    let mut out = String::with_capacity(text.len());

    for segment in segments(text) {
        if segment.opaque {
            out.push_str(segment.text);
            continue;
        }
        let cleaned = HEADER_RE.replace_all(segment.text, "");
        let cleaned = BULLET_RE.replace_all(&cleaned, "");
        let cleaned = BOLD_RE.replace_all(&cleaned, "$1");
        out.push_str(&cleaned);
    }

    out
}

struct Segment<'a> {
    text: &'a str,
    opaque: bool,
}

/// Split text into narrative and opaque spans. An opening delimiter with
/// no closing partner is treated as narrative.
fn segments(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = text;

    loop {
        // Earliest opening delimiter of either block kind
        let next_open = OPAQUE_BLOCKS
            .iter()
            .filter_map(|(open, close)| rest.find(open).map(|pos| (pos, *open, *close)))
            .min_by_key(|(pos, _, _)| *pos);

        let Some((start, open, close)) = next_open else {
            break;
        };

        let Some(end_rel) = rest[start + open.len()..].find(close) else {
            break;
        };
        let end = start + open.len() + end_rel + close.len();

        if start > 0 {
            out.push(Segment {
                text: &rest[..start],
                opaque: false,
            });
        }
        out.push(Segment {
            text: &rest[start..end],
            opaque: true,
        });
        rest = &rest[end..];
    }

    if !rest.is_empty() {
        out.push(Segment {
            text: rest,
            opaque: false,
        });
    }

    out
}

fn violation(kind: ViolationKind, text: &str, at: usize) -> ToneViolation {
    let line = text[at..].lines().next().unwrap_or_default();
    ToneViolation {
        kind,
        excerpt: excerpt(line),
    }
}

fn excerpt(s: &str) -> String {
    const MAX: usize = 60;
    if s.len() <= MAX {
        return s.to_string();
    }
    let mut end = MAX;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
