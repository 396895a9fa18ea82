//! Prompt builders for each stage's single user message.

use std::fmt::Write;

use super::model::{JobParams, Outline, OutlineSection};
use crate::search::SearchResult;

/// SEO prompts only need the opening of the article.
const SEO_EXCERPT_CHARS: usize = 6000;

fn push_param(out: &mut String, label: &str, value: &str) {
    if !value.is_empty() {
        let _ = writeln!(out, "- {label}: {value}");
    }
}

fn push_params(out: &mut String, params: &JobParams) {
    push_param(out, "Topic", &params.topic);
    push_param(out, "Language", &params.language);
    push_param(out, "Audience", &params.audience);
    push_param(out, "Author persona", &params.author_persona);
    push_param(out, "Angle", &params.angle);
    push_param(out, "Content goal", &params.content_goal);
    push_param(out, "Desired length", &params.desired_length);
    push_param(out, "Complexity", &params.complexity);
    push_param(out, "Constraints", &params.constraints);
}

/// Research request: parameters plus the gated search results.
pub fn research_prompt(params: &JobParams, results: &[SearchResult]) -> String {
    let mut out = String::from("Research and outline a long-form article.\n\nArticle parameters:\n");
    push_params(&mut out, params);

    out.push_str("\nSearch results to ground the research:\n");
    for (i, result) in results.iter().enumerate() {
        let _ = writeln!(out, "{}. {} ({})", i + 1, result.title, result.url);
        if !result.snippet.is_empty() {
            let _ = writeln!(out, "   {}", result.snippet);
        }
    }

    out.push_str(
        "\nRespond with a single JSON object and nothing else:\n\
         {\"outline\": {\"title\": string, \"sections\": [{\"sectionId\": string, \"title\": string, \"description\": string}]},\n \
         \"sectionNotes\": {<sectionId>: string},\n \
         \"sources\": [url]}\n\
         Use short stable section ids such as \"s1\", \"s2\".",
    );
    out
}

/// Drafting request for one outline section.
pub fn section_prompt(
    params: &JobParams,
    outline: &Outline,
    section: &OutlineSection,
    notes: Option<&str>,
) -> String {
    let mut out = String::from("Write one section of a long-form article.\n\nArticle parameters:\n");
    push_params(&mut out, params);

    if !outline.title.is_empty() {
        let _ = writeln!(out, "\nArticle title: {}", outline.title);
    }
    out.push_str("Full outline, for context only:\n");
    for (i, s) in outline.sections.iter().enumerate() {
        let marker = if s.section_id == section.section_id { " <- this section" } else { "" };
        let _ = writeln!(out, "{}. {}{marker}", i + 1, s.title);
    }

    let _ = writeln!(out, "\nSection to write: {}", section.title);
    if !section.description.is_empty() {
        let _ = writeln!(out, "Section brief: {}", section.description);
    }
    if let Some(notes) = notes.filter(|n| !n.trim().is_empty()) {
        let _ = writeln!(out, "Research notes:\n{notes}");
    }

    out.push_str(
        "\nReturn only the section as HTML, starting with an <h2> heading. \
         No markdown, no code fences, no surrounding commentary. Do not use em or en dashes.",
    );
    out
}

/// Style-normalization pass over the assembled draft.
pub fn cleanup_prompt(params: &JobParams, draft_html: &str) -> String {
    let mut out = String::from(
        "Edit the article below for consistent style and smooth transitions between sections. \
         Do not add, remove or reorder content, and keep every heading.\n\nArticle parameters:\n",
    );
    push_params(&mut out, params);
    out.push_str(
        "\nReturn only the full cleaned HTML. No markdown, no code fences. \
         Do not use em or en dashes.\n\nArticle:\n",
    );
    out.push_str(draft_html);
    out
}

/// SEO metadata request for a finished article.
pub fn seo_prompt(params: &JobParams, final_html: &str) -> String {
    let excerpt: String = final_html.chars().take(SEO_EXCERPT_CHARS).collect();
    let mut out = String::from("Write search-engine metadata for the article below.\n\nArticle parameters:\n");
    push_params(&mut out, params);
    out.push_str(
        "\nRespond with a single JSON object and nothing else:\n\
         {\"metaTitle\": string (max 60 chars), \"metaDescription\": string (max 160 chars), \
         \"slug\": string, \"keywords\": [string]}\n\nArticle:\n",
    );
    out.push_str(&excerpt);
    out
}
