// Region-matching strategies, in priority order.
//
// Each strategy is a pure function from (document, search) to an optional
// span. `find_match` walks the table and stops at the first hit.

use std::ops::Range;

use super::{MatchSpan, MatchTier};

/// Search blocks shorter than this never use the anchor strategy.
const ANCHOR_MIN_LINES: usize = 3;

pub struct MatchStrategy {
    pub tier: MatchTier,
    pub find: fn(&str, &str) -> Option<MatchSpan>,
}

pub const MATCH_STRATEGIES: [MatchStrategy; 3] = [
    MatchStrategy { tier: MatchTier::Exact, find: find_exact },
    MatchStrategy { tier: MatchTier::WhitespaceTolerant, find: find_whitespace_tolerant },
    MatchStrategy { tier: MatchTier::Anchor, find: find_anchor },
];

/// First verbatim occurrence.
pub fn find_exact(document: &str, search: &str) -> Option<MatchSpan> {
    document.find(search).map(|start| MatchSpan::new(start, start + search.len()))
}

/// First run of lines equal to the search lines after trimming each side.
pub fn find_whitespace_tolerant(document: &str, search: &str) -> Option<MatchSpan> {
    let block = SearchBlock::parse(search);
    let lines = DocumentLine::split(document);
    let n = block.lines.len();

    line_windows(&lines, n)
        .find(|&start| {
            lines[start..start + n]
                .iter()
                .zip(&block.lines)
                .all(|(line, wanted)| line.trimmed() == wanted.trim())
        })
        .map(|start| block.span(&lines[start..start + n]))
}

/// First run of lines of the same length whose first and last lines match
/// after trimming. Interior lines are ignored.
pub fn find_anchor(document: &str, search: &str) -> Option<MatchSpan> {
    let block = SearchBlock::parse(search);
    let n = block.lines.len();
    if n < ANCHOR_MIN_LINES {
        return None;
    }

    let first = block.lines[0].trim();
    let last = block.lines[n - 1].trim();
    let lines = DocumentLine::split(document);

    line_windows(&lines, n)
        .find(|&start| lines[start].trimmed() == first && lines[start + n - 1].trimmed() == last)
        .map(|start| block.span(&lines[start..start + n]))
}

fn line_windows(lines: &[DocumentLine<'_>], n: usize) -> Range<usize> {
    let count = if n == 0 || n > lines.len() { 0 } else { lines.len() - n + 1 };
    0..count
}

/// Search text split into lines, minus one trailing empty line.
struct SearchBlock<'a> {
    lines: Vec<&'a str>,
}

impl<'a> SearchBlock<'a> {
    fn parse(search: &'a str) -> Self {
        let mut lines: Vec<&str> = search.split('\n').collect();
        if lines.len() > 1 && lines.last() == Some(&"") {
            lines.pop();
        }
        Self { lines }
    }

    /// Span from the first matched line's start through the last matched
    /// line's terminator, whether or not the search text ends in a newline.
    fn span(&self, matched: &[DocumentLine<'_>]) -> MatchSpan {
        let first = &matched[0];
        let last = &matched[matched.len() - 1];
        MatchSpan::new(first.start, last.end)
    }
}

/// One document line: trimmed-for-matching text plus the byte range of the
/// whole line including its terminator.
struct DocumentLine<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

impl<'a> DocumentLine<'a> {
    fn split(document: &'a str) -> Vec<Self> {
        let mut offset = 0;
        document
            .split_inclusive('\n')
            .map(|chunk| {
                let start = offset;
                offset += chunk.len();
                let text = chunk.strip_suffix('\n').unwrap_or(chunk);
                let text = text.strip_suffix('\r').unwrap_or(text);
                DocumentLine { text, start, end: offset }
            })
            .collect()
    }

    fn trimmed(&self) -> &'a str {
        self.text.trim()
    }
}
