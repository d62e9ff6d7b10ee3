//! Line-based three-way merge.
//!
//! Compares a common base against two descendants (the live "current" text
//! and the freshly generated "incoming" text) and splices non-overlapping
//! changes from both sides into one result. Overlapping, non-identical
//! changes become git-style conflict regions in the returned text; the
//! caller decides what to do with a conflicting result, so markers never
//! leak anywhere the caller does not put them.
//!
//! Overlap is strict: edits that merely touch at a boundary are separate
//! regions and merge cleanly. Output is line-oriented and always ends with
//! a newline when non-empty.

use similar::{Algorithm, DiffOp, capture_diff_slices};
use tracing::debug;

const MARKER_OURS: &str = "<<<<<<< current";
const MARKER_BASE: &str = "||||||| base";
const MARKER_SEP: &str = "=======";
const MARKER_THEIRS: &str = ">>>>>>> incoming";

/// Result of a three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// All changes merged without overlap; safe to persist.
    Clean(String),
    /// One or more overlapping edits. `text` carries conflict markers and
    /// must never be written to live content.
    Conflicting { text: String, conflicts: usize },
}

/// One side's change to a base line range. `base_start == base_end` is a
/// pure insertion before `base_start`.
#[derive(Debug)]
struct Hunk {
    base_start: usize,
    base_end: usize,
    side_start: usize,
    side_len: usize,
}

/// Merge `ours` and `theirs` against their common `base`.
pub fn three_way_merge(base: &str, ours: &str, theirs: &str) -> MergeOutcome {
    let base_lines: Vec<&str> = base.lines().collect();
    let our_lines: Vec<&str> = ours.lines().collect();
    let their_lines: Vec<&str> = theirs.lines().collect();

    let our_ops = capture_diff_slices(Algorithm::Myers, &base_lines, &our_lines);
    let their_ops = capture_diff_slices(Algorithm::Myers, &base_lines, &their_lines);
    let a = hunks_from_ops(&our_ops);
    let b = hunks_from_ops(&their_ops);

    let mut out: Vec<&str> = Vec::new();
    let mut conflicts = 0usize;
    let mut base_pos = 0usize;
    let (mut i, mut j) = (0usize, 0usize);

    while i < a.len() || j < b.len() {
        // Seed a block with whichever side changes the earlier base range.
        // On a tie, a pure insertion goes first: it lands before the line
        // the other side is editing.
        let seed_a = match (a.get(i), b.get(j)) {
            (Some(ha), Some(hb)) => {
                if ha.base_start != hb.base_start {
                    ha.base_start < hb.base_start
                } else {
                    let a_insert = ha.base_start == ha.base_end;
                    let b_insert = hb.base_start == hb.base_end;
                    a_insert || !b_insert
                }
            }
            (Some(_), None) => true,
            _ => false,
        };

        let mut block_a: Vec<&Hunk> = Vec::new();
        let mut block_b: Vec<&Hunk> = Vec::new();
        let (mut lo, mut hi);
        if seed_a {
            lo = a[i].base_start;
            hi = a[i].base_end;
            block_a.push(&a[i]);
            i += 1;
        } else {
            lo = b[j].base_start;
            hi = b[j].base_end;
            block_b.push(&b[j]);
            j += 1;
        }

        // Absorb hunks from either side that collide with the block, until
        // the block stops growing. Absorbing one side can widen the range
        // enough to pull in more hunks from the other.
        loop {
            let mut grew = false;
            while j < b.len() && collides(lo, hi, b[j].base_start, b[j].base_end) {
                lo = lo.min(b[j].base_start);
                hi = hi.max(b[j].base_end);
                block_b.push(&b[j]);
                j += 1;
                grew = true;
            }
            while i < a.len() && collides(lo, hi, a[i].base_start, a[i].base_end) {
                lo = lo.min(a[i].base_start);
                hi = hi.max(a[i].base_end);
                block_a.push(&a[i]);
                i += 1;
                grew = true;
            }
            if !grew {
                break;
            }
        }

        // Unchanged region before the block.
        out.extend_from_slice(&base_lines[base_pos..lo]);

        let ours_chunk = side_chunk(&base_lines, &our_lines, &block_a, lo, hi);
        let theirs_chunk = side_chunk(&base_lines, &their_lines, &block_b, lo, hi);

        if block_b.is_empty() {
            out.extend(ours_chunk);
        } else if block_a.is_empty() {
            out.extend(theirs_chunk);
        } else if ours_chunk == theirs_chunk {
            // Both sides made the identical change.
            out.extend(ours_chunk);
        } else {
            conflicts += 1;
            out.push(MARKER_OURS);
            out.extend(ours_chunk);
            out.push(MARKER_BASE);
            out.extend_from_slice(&base_lines[lo..hi]);
            out.push(MARKER_SEP);
            out.extend(theirs_chunk);
            out.push(MARKER_THEIRS);
        }

        base_pos = hi;
    }
    out.extend_from_slice(&base_lines[base_pos..]);

    let text = join_lines(&out);
    if conflicts == 0 {
        MergeOutcome::Clean(text)
    } else {
        debug!(conflicts, "merge produced conflicts");
        MergeOutcome::Conflicting { text, conflicts }
    }
}

/// Whether a hunk `[s, e)` overlaps the block `[lo, hi)`.
///
/// All checks are strict so adjacent edits stay independent. Two pure
/// insertions collide only at the same point; an insertion collides with a
/// range only when it falls strictly inside it.
fn collides(lo: usize, hi: usize, s: usize, e: usize) -> bool {
    if lo == hi && s == e {
        lo == s
    } else if lo == hi {
        s < lo && lo < e
    } else if s == e {
        lo < s && s < hi
    } else {
        lo < e && s < hi
    }
}

fn hunks_from_ops(ops: &[DiffOp]) -> Vec<Hunk> {
    let mut hunks = Vec::new();
    for op in ops {
        match *op {
            DiffOp::Equal { .. } => {}
            DiffOp::Delete {
                old_index,
                old_len,
                new_index,
            } => hunks.push(Hunk {
                base_start: old_index,
                base_end: old_index + old_len,
                side_start: new_index,
                side_len: 0,
            }),
            DiffOp::Insert {
                old_index,
                new_index,
                new_len,
            } => hunks.push(Hunk {
                base_start: old_index,
                base_end: old_index,
                side_start: new_index,
                side_len: new_len,
            }),
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => hunks.push(Hunk {
                base_start: old_index,
                base_end: old_index + old_len,
                side_start: new_index,
                side_len: new_len,
            }),
        }
    }
    hunks
}

/// Reconstruct one side's text for the base range `[lo, hi)`: hunk
/// replacements where the side changed lines, base lines in the gaps.
fn side_chunk<'a>(
    base: &[&'a str],
    side: &[&'a str],
    hunks: &[&Hunk],
    lo: usize,
    hi: usize,
) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut pos = lo;
    for hunk in hunks {
        out.extend_from_slice(&base[pos..hunk.base_start]);
        out.extend_from_slice(&side[hunk.side_start..hunk.side_start + hunk.side_len]);
        pos = hunk.base_end;
    }
    out.extend_from_slice(&base[pos..hi]);
    out
}

fn join_lines(lines: &[&str]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
