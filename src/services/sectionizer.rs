//! Heading-boundary section splitter.
//!
//! Pure single-pass scan over raw markdown text. Produces a flat, ordered
//! list of section records; heading hierarchy is never materialized as a
//! tree and is reconstructed on demand by comparing levels.
//!
//! Lines before the first heading belong to no section. Callers needing a
//! preamble view slice the original text up to the first section's start
//! line. A text with no headings yields an empty list; callers fall back to
//! the raw text.

/// One parsed section record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSection {
    /// Heading title text.
    pub title: String,

    /// Heading level, 1-6.
    pub level: u8,

    /// Lines between this heading and the next, trimmed of leading and
    /// trailing blank lines.
    pub body: String,

    /// Line offset of the heading within the input.
    pub start_line: usize,

    /// Exclusive end line offset (the next section's start, or the input
    /// length for the last section).
    pub end_line: usize,

    /// Position within the document, contiguous from 0.
    pub order_index: usize,
}

/// Parse an ATX heading line: 1-6 `#` characters, a separator, title text.
///
/// Returns `(level, title)` or None when the line is not a heading.
fn parse_heading(line: &str) -> Option<(u8, &str)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }

    let rest = &trimmed[hashes..];
    // A separator must follow the hashes, then non-empty title text
    if !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let title = rest.trim();
    if title.is_empty() {
        return None;
    }

    Some((hashes as u8, title))
}

/// Split raw text into ordered sections along heading boundaries.
pub fn split_sections(text: &str) -> Vec<ParsedSection> {
    let lines: Vec<&str> = text.lines().collect();
    let mut sections = Vec::new();

    // (title, level, heading line) of the currently open section
    let mut open: Option<(String, u8, usize)> = None;
    let mut body_lines: Vec<&str> = Vec::new();

    let mut close =
        |open: &mut Option<(String, u8, usize)>, body_lines: &mut Vec<&str>,
         sections: &mut Vec<ParsedSection>, end_line: usize| {
            if let Some((title, level, start_line)) = open.take() {
                sections.push(ParsedSection {
                    title,
                    level,
                    body: trim_blank_edges(body_lines),
                    start_line,
                    end_line,
                    order_index: sections.len(),
                });
            }
            body_lines.clear();
        };

    for (line_no, line) in lines.iter().enumerate() {
        if let Some((level, title)) = parse_heading(line) {
            close(&mut open, &mut body_lines, &mut sections, line_no);
            open = Some((title.to_string(), level, line_no));
        } else if open.is_some() {
            body_lines.push(line);
        }
        // Lines before the first heading are dropped (preamble)
    }

    close(&mut open, &mut body_lines, &mut sections, lines.len());

    sections
}

/// Join body lines, dropping leading and trailing blank lines.
fn trim_blank_edges(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let end = lines.iter().rposition(|l| !l.trim().is_empty());

    match (start, end) {
        (Some(s), Some(e)) => lines[s..=e].join("\n"),
        _ => String::new(),
    }
}

/// Whether the section at `index` is a leaf: its immediately following
/// section (same document, next order index) has a level no deeper than its
/// own, or it is the last section.
pub fn is_leaf(levels: &[u8], index: usize) -> bool {
    match levels.get(index + 1) {
        Some(&next_level) => next_level <= levels[index],
        None => true,
    }
}
