//! Section assembler.

use super::model::{Outline, SectionEntry};

/// Separator between sections in the assembled draft.
pub const SECTION_SEPARATOR: &str = "\n\n";

/// Completed sections in outline order.
///
/// Entries that never completed are skipped; one being regenerated keeps
/// its last completed HTML. Ids missing from the outline
/// sort last, keeping their relative order.
pub fn ordered_sections<'a>(outline: &Outline, sections: &'a [SectionEntry]) -> Vec<&'a SectionEntry> {
    let mut completed: Vec<&SectionEntry> = sections.iter().filter(|s| s.is_completed()).collect();
    completed.sort_by_key(|s| outline.position(&s.section_id).unwrap_or(usize::MAX));
    completed
}

/// Concatenate completed section HTML. Empty when nothing has completed.
pub fn assemble_html(outline: &Outline, sections: &[SectionEntry]) -> String {
    ordered_sections(outline, sections)
        .into_iter()
        .map(|s| s.html.trim())
        .collect::<Vec<_>>()
        .join(SECTION_SEPARATOR)
}
