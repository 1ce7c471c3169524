// Search/replace patch engine with tolerant region matching.
//
// A patch names a region by (a copy of) its text. The region is located with
// an ordered list of strategies and the first hit is spliced with the
// replacement. Nothing else in the document changes.

mod strategies;

use std::ops::Range;

use serde::Serialize;
use thiserror::Error;

pub use strategies::{MatchStrategy, MATCH_STRATEGIES};

/// Span of the original text selected for replacement.
///
/// `start` and `end` are UTF-8 byte offsets that always fall on char
/// boundaries, with `start <= end <= text.len()`, so they slice the text
/// directly. Use [`MatchSpan::char_range`] for character offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchSpan {
    pub start: usize,
    pub end: usize,
}

impl MatchSpan {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "match span start {start} is after end {end}");
        Self { start, end }
    }

    /// Character (Unicode scalar value) offsets of the span within `text`.
    pub fn char_range(&self, text: &str) -> Range<usize> {
        let start = text[..self.start].chars().count();
        start..start + text[self.start..self.end].chars().count()
    }

    /// 1-based inclusive line range covered by the span.
    pub fn line_range(&self, text: &str) -> (usize, usize) {
        let first = text[..self.start].matches('\n').count() + 1;
        let covered = &text[self.start..self.end];
        let newlines = covered.trim_end_matches('\n').matches('\n').count();
        (first, first + newlines)
    }
}

/// Which strategy located the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// Verbatim substring.
    Exact,
    /// Same lines once leading/trailing whitespace is ignored.
    WhitespaceTolerant,
    /// First and last lines agree; interior lines are not compared.
    Anchor,
}

impl MatchTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::WhitespaceTolerant => "whitespace_tolerant",
            Self::Anchor => "anchor",
        }
    }
}

/// How a successful patch was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Applied {
    /// Blank search text replaced the whole document.
    WholeDocument,
    Matched { tier: MatchTier, span: MatchSpan },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patched {
    pub text: String,
    pub applied: Applied,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error(
        "content not found: the {search_lines}-line search block matched no region exactly, \
         ignoring indentation, or by its first and last lines"
    )]
    NotFound { search_lines: usize },
}

/// Locates the region `search` describes, trying each strategy in priority
/// order. Returns the first hit; the span is in byte offsets.
pub fn find_match(original: &str, search: &str) -> Option<(MatchTier, MatchSpan)> {
    MATCH_STRATEGIES
        .iter()
        .find_map(|strategy| (strategy.find)(original, search).map(|span| (strategy.tier, span)))
}

/// Applies one search/replace patch to `original`.
///
/// Blank `search` (empty or whitespace only) replaces the whole document and
/// skips matching. On failure the caller still owns the untouched original.
///
/// Repeating the same patch against the result is not a no-op when the
/// replacement itself contains the searched text.
pub fn apply_patch(original: &str, search: &str, replace: &str) -> Result<Patched, PatchError> {
    if search.trim().is_empty() {
        return Ok(Patched { text: replace.to_string(), applied: Applied::WholeDocument });
    }

    let (tier, span) = find_match(original, search)
        .ok_or_else(|| PatchError::NotFound { search_lines: search.lines().count() })?;

    let mut text = String::with_capacity(original.len() - (span.end - span.start) + replace.len());
    text.push_str(&original[..span.start]);
    text.push_str(replace);
    text.push_str(&original[span.end..]);

    Ok(Patched { text, applied: Applied::Matched { tier, span } })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patched(original: &str, search: &str, replace: &str) -> String {
        apply_patch(original, search, replace).expect("patch should apply").text
    }

    fn tier_of(original: &str, search: &str) -> Option<MatchTier> {
        find_match(original, search).map(|(tier, _)| tier)
    }

    #[test]
    fn exact_single_line_replacement() {
        assert_eq!(patched("a\nb\nc\n", "b", "X"), "a\nX\nc\n");
    }

    #[test]
    fn exact_match_replaces_first_occurrence_only() {
        assert_eq!(patched("foo bar foo", "foo", "baz"), "baz bar foo");
    }

    #[test]
    fn empty_search_replaces_whole_document() {
        let result = apply_patch("anything\nat all", "", "fresh").expect("sentinel applies");
        assert_eq!(result.text, "fresh");
        assert_eq!(result.applied, Applied::WholeDocument);
    }

    #[test]
    fn whitespace_only_search_is_the_whole_document_sentinel() {
        // Even though "  \n" occurs verbatim, the sentinel wins.
        assert_eq!(patched("x  \ny", "  \n", "z"), "z");
    }

    #[test]
    fn indented_block_matches_whitespace_tolerant_tier() {
        let original = ["  foo", "  bar", "  baz"].join("\n");
        let result = apply_patch(&original, "foo\nbar\nbaz", "qux").expect("tier 2 should match");
        assert_eq!(result.text, "qux");
        assert!(matches!(
            result.applied,
            Applied::Matched { tier: MatchTier::WhitespaceTolerant, .. }
        ));
    }

    #[test]
    fn whitespace_tolerant_replaces_original_text_not_trimmed_text() {
        let original = "fn main() {\n    let x = 1;\n    let y = 2;\n}\n";
        let result = patched(original, "let x = 1;\nlet y = 2;\n", "    let z = 3;\n");
        assert_eq!(result, "fn main() {\n    let z = 3;\n}\n");
    }

    #[test]
    fn trailing_newline_in_search_consumes_line_terminator() {
        let original = "  a\n  b\n  c\n";
        assert_eq!(patched(original, "a\nb\n", "X\n"), "X\n  c\n");
    }

    #[test]
    fn search_without_trailing_newline_still_consumes_line_terminator() {
        let original = "  a\n  b\n  c\n";
        let (tier, span) = find_match(original, "a\nb").expect("should match");
        assert_eq!(tier, MatchTier::WhitespaceTolerant);
        assert_eq!(&original[span.start..span.end], "  a\n  b\n");
        assert_eq!(patched(original, "a\nb", "X\n"), "X\n  c\n");
        assert_eq!(patched(original, "a\nb", "X"), "X  c\n");
    }

    #[test]
    fn crlf_documents_match_line_tiers() {
        let original = "  one\r\n  two\r\nthree\r\n";
        let (_, span) = find_match(original, "one\ntwo").expect("should match");
        assert_eq!(&original[span.start..span.end], "  one\r\n  two\r\n");
        assert_eq!(patched(original, "one\ntwo", "1\r\n2\r\n"), "1\r\n2\r\nthree\r\n");
    }

    #[test]
    fn anchor_tier_tolerates_interior_drift() {
        let original = "start\nfn demo() {\n    old_call(1, 2);\n}\nend\n";
        let search = "fn demo() {\n    new_call(1,2);\n}";
        assert_eq!(tier_of(original, search), Some(MatchTier::Anchor));
        assert_eq!(patched(original, search, "fn demo() {}\n"), "start\nfn demo() {}\nend\n");
    }

    #[test]
    fn anchor_tier_requires_three_lines() {
        let original = "header\nbody one\n";
        let search = "header\nbody two";
        assert_eq!(tier_of(original, search), None);
        assert_eq!(
            apply_patch(original, search, "x"),
            Err(PatchError::NotFound { search_lines: 2 })
        );
    }

    #[test]
    fn anchor_tier_requires_matching_block_length() {
        let original = "begin\nmiddle\nend\n";
        let search = "begin\none\ntwo\nend";
        assert_eq!(tier_of(original, search), None);
    }

    #[test]
    fn exact_tier_takes_priority_over_line_tiers() {
        // A later verbatim occurrence beats an earlier indented one.
        let original = "  x = 1\n  y = 2\nx = 1\ny = 2\n";
        let (tier, span) = find_match(original, "x = 1\ny = 2").expect("should match");
        assert_eq!(tier, MatchTier::Exact);
        assert_eq!(&original[span.start..span.end], "x = 1\ny = 2");
        assert_eq!(span.start, 16);
    }

    #[test]
    fn first_anchor_span_wins_when_several_qualify() {
        let original = "open\na\nclose\nopen\nb\nclose\n";
        let (tier, span) = find_match(original, "open\nzzz\nclose").expect("should match");
        assert_eq!(tier, MatchTier::Anchor);
        assert_eq!(span.start, 0);
    }

    #[test]
    fn not_found_leaves_error_only() {
        let error = apply_patch("alpha\nbeta\n", "gamma", "delta").expect_err("should fail");
        assert_eq!(error, PatchError::NotFound { search_lines: 1 });
        assert!(error.to_string().starts_with("content not found"));
    }

    #[test]
    fn repeated_patch_is_not_idempotent_when_replacement_contains_search() {
        let once = patched("x", "x", "xx");
        let twice = patched(&once, "x", "xx");
        assert_eq!(once, "xx");
        assert_eq!(twice, "xxx");
    }

    #[test]
    fn multibyte_text_splices_on_char_boundaries() {
        assert_eq!(patched("héllo wörld", "wörld", "мир"), "héllo мир");
        assert_eq!(patched("  日本\n  語\n", "日本\n語\n", "ok\n"), "ok\n");
    }

    #[test]
    fn char_range_counts_characters_not_bytes() {
        let original = "héllo wörld\n";
        let (_, span) = find_match(original, "wörld").expect("should match");
        assert_eq!((span.start, span.end), (7, 13));
        assert_eq!(span.char_range(original), 6..11);
    }

    #[test]
    fn line_range_reports_covered_lines() {
        let original = "a\nb\nc\nd\n";
        let (_, span) = find_match(original, "b\nc\n").expect("should match");
        assert_eq!(span.line_range(original), (2, 3));
    }
}
