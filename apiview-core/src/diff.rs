//! Inline line diff between two renderings of a code file.

use similar::{Algorithm, ChangeTag, TextDiff};

use crate::types::{CodeLine, DiffLine, DiffLineKind};

/// Computes an inline diff of two revisions.
///
/// Lines are compared by the display strings of their plain-text renderings
/// (`before_text` / `after_text`), while the emitted lines come from the HTML
/// renderings at the same index: `after_html` for unchanged and added lines,
/// `before_html` for removed lines. Each text slice must be index-aligned with
/// its HTML slice, which holds for two renderings of the same code file.
pub fn compute(
    before_text: &[CodeLine],
    after_text: &[CodeLine],
    before_html: &[CodeLine],
    after_html: &[CodeLine],
) -> Vec<DiffLine> {
    let old: Vec<&str> = before_text.iter().map(|l| l.display_string.as_str()).collect();
    let new: Vec<&str> = after_text.iter().map(|l| l.display_string.as_str()).collect();

    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_slices(&old, &new);

    let mut lines = Vec::with_capacity(new.len());
    for op in diff.ops() {
        for change in diff.iter_changes(op) {
            let (kind, side, index) = match change.tag() {
                ChangeTag::Equal => (DiffLineKind::Unchanged, after_html, change.new_index()),
                ChangeTag::Insert => (DiffLineKind::Added, after_html, change.new_index()),
                ChangeTag::Delete => (DiffLineKind::Removed, before_html, change.old_index()),
            };
            if let Some(line) = index.and_then(|i| side.get(i)) {
                lines.push(DiffLine { kind, line: line.clone() });
            }
        }
    }
    lines
}
