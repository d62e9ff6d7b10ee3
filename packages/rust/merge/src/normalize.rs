//! Markdown normalization pipeline.
//!
//! Each pass is a function `&str -> String` applied in sequence. The whole
//! pipeline is deterministic and idempotent, so both sides of a three-way
//! merge see the same formatting and cosmetic differences (line endings,
//! bullet styles, wrapping) never surface as spurious text conflicts.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full normalization pipeline on markdown text.
pub fn normalize(md: &str) -> String {
    let mut result = normalize_line_endings(md);
    result = normalize_lines(&result);
    result = unwrap_paragraphs(&result);
    result = collapse_blank_lines(&result);
    ensure_trailing_newline(&result)
}

// ---------------------------------------------------------------------------
// Pass 1: Normalize line endings
// ---------------------------------------------------------------------------

fn normalize_line_endings(md: &str) -> String {
    md.replace("\r\n", "\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Per-line cleanup (trailing whitespace, list markers)
// ---------------------------------------------------------------------------

/// Trim trailing whitespace and unify list markers.
///
/// Bullets become `-` with a single space after the marker; ordered-list
/// markers keep their numbering but also get a single space. Lines inside
/// code fences are only trimmed, never restyled.
fn normalize_lines(md: &str) -> String {
    static BULLET_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(\s*)[-*+]\s+(.*)$").expect("valid regex"));
    static ORDERED_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(\s*)(\d+[.)])\s+(.*)$").expect("valid regex"));
    static BREAK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^\s*(?:(?:-\s*){3,}|(?:\*\s*){3,}|(?:_\s*){3,})$").expect("valid regex")
    });

    let mut out: Vec<String> = Vec::new();
    let mut in_fence = false;

    for line in md.lines() {
        let line = line.trim_end();
        if is_fence_delimiter(line) {
            in_fence = !in_fence;
            out.push(line.to_string());
            continue;
        }
        if in_fence || BREAK_RE.is_match(line) {
            out.push(line.to_string());
            continue;
        }

        if let Some(caps) = BULLET_RE.captures(line) {
            out.push(format!("{}- {}", &caps[1], &caps[2]));
        } else if let Some(caps) = ORDERED_RE.captures(line) {
            out.push(format!("{}{} {}", &caps[1], &caps[2], &caps[3]));
        } else {
            out.push(line.to_string());
        }
    }

    out.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 3: Unwrap hard-wrapped paragraphs
// ---------------------------------------------------------------------------

/// Join hard-wrapped prose lines so paragraph wrapping is consistent.
///
/// A line joins its predecessor when the predecessor is prose or a list
/// item and the line itself does not open a new block (heading, list item,
/// table row, quote, fence, thematic break, indented code).
fn unwrap_paragraphs(md: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_fence = false;

    for line in md.lines() {
        if is_fence_delimiter(line) {
            in_fence = !in_fence;
            out.push(line.to_string());
            continue;
        }
        if in_fence {
            out.push(line.to_string());
            continue;
        }

        if can_join(out.last().map(|s| s.as_str()), line) {
            let prev = out.last_mut().expect("non-empty after can_join");
            prev.push(' ');
            prev.push_str(line.trim_start());
        } else {
            out.push(line.to_string());
        }
    }

    out.join("\n")
}

fn can_join(prev: Option<&str>, line: &str) -> bool {
    let Some(prev) = prev else {
        return false;
    };
    if prev.is_empty() || line.trim().is_empty() {
        return false;
    }
    // Continuations attach to prose and to list items, nothing else.
    if starts_block(prev) && !is_list_item(prev) {
        return false;
    }
    !starts_block(line)
}

/// Whether a line opens a block of its own rather than continuing prose.
fn starts_block(line: &str) -> bool {
    static BREAK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^\s*(?:(?:-\s*){3,}|(?:\*\s*){3,}|(?:_\s*){3,})$").expect("valid regex")
    });
    static SETEXT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(?:=+|-{1,2})\s*$").expect("valid regex"));

    // Indented code blocks keep their line breaks.
    if line.starts_with("    ") || line.starts_with('\t') {
        return true;
    }
    let trimmed = line.trim_start();
    trimmed.is_empty()
        || trimmed.starts_with('#')
        || trimmed.starts_with('>')
        || trimmed.starts_with('|')
        || is_list_item(line)
        || BREAK_RE.is_match(line)
        || SETEXT_RE.is_match(trimmed)
}

fn is_list_item(line: &str) -> bool {
    static LIST_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s").expect("valid regex"));
    LIST_RE.is_match(line)
}

// ---------------------------------------------------------------------------
// Pass 4: Collapse blank-line runs
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines into a single blank line and drop blank
/// lines at the start of the document. Blank lines inside code fences are
/// content and stay untouched.
fn collapse_blank_lines(md: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut in_fence = false;
    let mut prev_blank = false;

    for line in md.lines() {
        if is_fence_delimiter(line) {
            in_fence = !in_fence;
            out.push(line);
            prev_blank = false;
            continue;
        }
        if in_fence {
            out.push(line);
            prev_blank = false;
            continue;
        }

        let blank = line.is_empty();
        if blank && (prev_blank || out.is_empty()) {
            continue;
        }
        out.push(line);
        prev_blank = blank;
    }

    out.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 5: Ensure trailing newline
// ---------------------------------------------------------------------------

/// Ensure the document ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    if trimmed.is_empty() {
        return String::new();
    }
    format!("{trimmed}\n")
}

fn is_fence_delimiter(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_becomes_lf() {
        let input = "# Title\r\n\r\nBody text.\r\n";
        let result = normalize(input);
        assert!(!result.contains('\r'));
        assert_eq!(result, "# Title\n\nBody text.\n");
    }

    #[test]
    fn bullet_markers_unified() {
        let input = "* first\n+ second\n-   third\n";
        let result = normalize(input);
        assert_eq!(result, "- first\n- second\n- third\n");
    }

    #[test]
    fn ordered_marker_spacing_unified() {
        let input = "1.   first\n2. second\n";
        let result = normalize(input);
        assert_eq!(result, "1. first\n2. second\n");
    }

    #[test]
    fn thematic_break_not_restyled() {
        let input = "before\n\n---\n\n* * *\n\nafter\n";
        let result = normalize(input);
        assert!(result.contains("---"));
        assert!(result.contains("* * *"));
        assert!(!result.contains("- * *"));
    }

    #[test]
    fn code_fence_content_untouched() {
        let input = "```python\n* not a bullet   \nx = 1\n\n\n\ny = 2\n```\n";
        let result = normalize(input);
        assert!(result.contains("* not a bullet"));
        assert!(result.contains("x = 1\n\n\n\ny = 2"));
    }

    #[test]
    fn trailing_whitespace_trimmed() {
        let input = "Line one.   \nLine two.\t\n";
        let result = normalize(input);
        assert_eq!(result, "Line one. Line two.\n");
    }

    #[test]
    fn wrapped_paragraph_unwrapped() {
        let input = "This paragraph was\nhard wrapped at some\narbitrary width.\n\nNext paragraph.\n";
        let result = normalize(input);
        assert_eq!(
            result,
            "This paragraph was hard wrapped at some arbitrary width.\n\nNext paragraph.\n"
        );
    }

    #[test]
    fn list_continuation_joins_item() {
        let input = "- an item that wraps\n  onto the next line\n- second item\n";
        let result = normalize(input);
        assert_eq!(
            result,
            "- an item that wraps onto the next line\n- second item\n"
        );
    }

    #[test]
    fn headings_never_join_neighbors() {
        let input = "## Section\nFirst line of prose.\n";
        let result = normalize(input);
        assert_eq!(result, "## Section\nFirst line of prose.\n");
    }

    #[test]
    fn table_rows_stay_separate() {
        let input = "| a | b |\n| --- | --- |\n| 1 | 2 |\n";
        let result = normalize(input);
        assert_eq!(result, input);
    }

    #[test]
    fn blank_runs_collapse() {
        let input = "para one\n\n\n\npara two\n";
        let result = normalize(input);
        assert_eq!(result, "para one\n\npara two\n");
    }

    #[test]
    fn leading_blank_lines_dropped() {
        let input = "\n\n# Title\n";
        let result = normalize(input);
        assert_eq!(result, "# Title\n");
    }

    #[test]
    fn exactly_one_trailing_newline() {
        assert_eq!(normalize("no newline"), "no newline\n");
        assert_eq!(normalize("many\n\n\n"), "many\n");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        let input = "# Doc\r\n\r\nSome wrapped\nprose here.   \n\n\n* bullet one\n+ bullet two\n  wrapped continuation\n\n```rust\nlet x = 1;   \n* raw\n```\n\n1.  ordered\n\n> quote line\n> second quote line\n";
        let once = normalize(input);
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn idempotent_on_already_clean_document() {
        let input = "# Title\n\nParagraph of prose on one line.\n\n- item\n- item two\n\n```sh\nls -la\n```\n";
        assert_eq!(normalize(input), input);
    }

    #[test]
    fn blockquotes_not_unwrapped() {
        let input = "> first quoted line\n> second quoted line\n";
        let result = normalize(input);
        assert_eq!(result, input);
    }
}
