//! Parsing of the structured payloads returned by research and SEO runs.
//!
//! Assistants are asked for JSON but drift in field naming and shape, so the
//! raw types accept a few aliases and are then normalized into the model.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use tracing::warn;

use super::model::{Outline, OutlineSection, ResearchArtifacts, SeoPackage};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResearch {
    #[serde(alias = "sections")]
    outline: RawOutline,
    #[serde(default, alias = "notes", alias = "section_notes")]
    section_notes: Option<RawNotes>,
    #[serde(default)]
    sources: Vec<RawSource>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOutline {
    Full {
        #[serde(default)]
        title: String,
        sections: Vec<RawSection>,
    },
    Bare(Vec<RawSection>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSection {
    #[serde(default, alias = "id", alias = "section_id")]
    section_id: Option<String>,
    #[serde(default, alias = "heading")]
    title: String,
    #[serde(default, alias = "summary")]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNotes {
    Map(BTreeMap<String, serde_json::Value>),
    List(Vec<RawNote>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNote {
    #[serde(alias = "id", alias = "section_id")]
    section_id: String,
    #[serde(alias = "note", alias = "text")]
    notes: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSource {
    Url(String),
    Object {
        #[serde(alias = "link")]
        url: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSeo {
    #[serde(default, alias = "title", alias = "meta_title")]
    meta_title: String,
    #[serde(default, alias = "description", alias = "meta_description")]
    meta_description: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    keywords: Option<RawKeywords>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawKeywords {
    List(Vec<String>),
    Joined(String),
}

/// Find the outermost JSON object in text that may carry prose around it.
fn extract_json_object(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        return trimmed;
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn note_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(note_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Assign `section-{n}` to blank ids and suffix duplicates.
fn assign_section_ids(raw: Vec<RawSection>) -> Vec<(Option<String>, OutlineSection)> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .enumerate()
        .map(|(index, section)| {
            let original = section
                .section_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty());
            let base = original
                .clone()
                .unwrap_or_else(|| format!("section-{}", index + 1));
            let mut id = base.clone();
            let mut suffix = 2;
            while !seen.insert(id.clone()) {
                id = format!("{base}-{suffix}");
                suffix += 1;
            }
            if original.as_deref().is_some_and(|o| o != id) {
                warn!(section_id = %base, assigned = %id, "Duplicate outline section id");
            }
            (
                original,
                OutlineSection {
                    section_id: id,
                    title: section.title.trim().to_string(),
                    description: section.description.trim().to_string(),
                },
            )
        })
        .collect()
}

/// Parse the research payload into outline, notes and sources.
///
/// `fallback_sources` are used when the payload lists no sources. Fails when
/// the payload is not JSON or the outline has no sections.
pub fn parse_research(
    text: &str,
    fallback_sources: &[String],
) -> Result<ResearchArtifacts, String> {
    let raw: RawResearch = serde_json::from_str(extract_json_object(text))
        .map_err(|e| format!("research payload is not valid JSON: {e}"))?;

    let (title, raw_sections) = match raw.outline {
        RawOutline::Full { title, sections } => (title, sections),
        RawOutline::Bare(sections) => (String::new(), sections),
    };
    if raw_sections.is_empty() {
        return Err("research outline has no sections".to_string());
    }

    let assigned = assign_section_ids(raw_sections);
    // Notes are keyed by the id the assistant used; only the first section
    // carrying an id keeps the mapping.
    let mut note_keys: BTreeMap<String, String> = BTreeMap::new();
    for (original, section) in &assigned {
        if let Some(original) = original {
            note_keys
                .entry(original.clone())
                .or_insert_with(|| section.section_id.clone());
        }
    }

    let raw_notes: Vec<(String, serde_json::Value)> = match raw.section_notes {
        Some(RawNotes::Map(map)) => map.into_iter().collect(),
        Some(RawNotes::List(list)) => list.into_iter().map(|n| (n.section_id, n.notes)).collect(),
        None => Vec::new(),
    };
    let mut section_notes = BTreeMap::new();
    for (key, value) in raw_notes {
        match note_keys.get(key.trim()) {
            Some(section_id) => {
                let text = note_text(value);
                if !text.is_empty() {
                    section_notes.insert(section_id.clone(), text);
                }
            }
            None => warn!(section_id = %key, "Dropping notes for unknown outline section"),
        }
    }

    let mut seen = HashSet::new();
    let mut sources: Vec<String> = raw
        .sources
        .into_iter()
        .map(|s| match s {
            RawSource::Url(url) | RawSource::Object { url } => url.trim().to_string(),
        })
        .filter(|url| !url.is_empty() && seen.insert(url.clone()))
        .collect();
    if sources.is_empty() {
        sources = fallback_sources.to_vec();
    }

    Ok(ResearchArtifacts {
        outline: Outline {
            title: title.trim().to_string(),
            sections: assigned.into_iter().map(|(_, s)| s).collect(),
        },
        section_notes,
        sources,
    })
}

/// Lowercase ASCII slug with single hyphens between words.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Parse the SEO payload. Fails when it is not JSON or has no meta title.
pub fn parse_seo(text: &str) -> Result<SeoPackage, String> {
    let raw: RawSeo = serde_json::from_str(extract_json_object(text))
        .map_err(|e| format!("SEO payload is not valid JSON: {e}"))?;

    let meta_title = raw.meta_title.trim().to_string();
    if meta_title.is_empty() {
        return Err("SEO payload has no meta title".to_string());
    }
    let slug = match slugify(&raw.slug) {
        s if s.is_empty() => slugify(&meta_title),
        s => s,
    };
    let keywords = match raw.keywords {
        Some(RawKeywords::List(list)) => list,
        Some(RawKeywords::Joined(joined)) => joined.split(',').map(str::to_string).collect(),
        None => Vec::new(),
    }
    .into_iter()
    .map(|k| k.trim().to_string())
    .filter(|k| !k.is_empty())
    .collect();

    Ok(SeoPackage {
        meta_title,
        meta_description: raw.meta_description.trim().to_string(),
        slug,
        keywords,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_research_payload() {
        let text = r#"{
            "outline": {"title": "Guide", "sections": [
                {"sectionId": "s1", "title": "Intro", "description": "Why"},
                {"sectionId": "s2", "title": "Body", "description": "How"}
            ]},
            "sectionNotes": {"s1": "note one", "s2": ["a", "b"]},
            "sources": ["https://a.example", {"url": "https://b.example"}, "https://a.example"]
        }"#;
        let research = parse_research(text, &[]).unwrap();
        assert_eq!(research.outline.title, "Guide");
        assert_eq!(research.outline.sections.len(), 2);
        assert_eq!(research.section_notes["s1"], "note one");
        assert_eq!(research.section_notes["s2"], "a\nb");
        assert_eq!(research.sources, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn accepts_bare_section_list_and_note_list() {
        let text = r#"{
            "sections": [{"id": "intro", "heading": "Intro"}],
            "notes": [{"sectionId": "intro", "notes": "n"}, {"sectionId": "ghost", "notes": "x"}]
        }"#;
        let research = parse_research(text, &["https://fallback.example".into()]).unwrap();
        assert_eq!(research.outline.sections[0].section_id, "intro");
        assert_eq!(research.outline.sections[0].title, "Intro");
        assert_eq!(research.section_notes.len(), 1);
        assert_eq!(research.sources, vec!["https://fallback.example"]);
    }

    #[test]
    fn assigns_missing_and_duplicate_ids() {
        let text = r#"{"outline": {"sections": [
            {"title": "A"},
            {"sectionId": "x", "title": "B"},
            {"sectionId": "x", "title": "C"},
            {"sectionId": "  ", "title": "D"}
        ]}, "sectionNotes": {"x": "for B"}}"#;
        let research = parse_research(text, &[]).unwrap();
        let ids: Vec<_> = research
            .outline
            .sections
            .iter()
            .map(|s| s.section_id.as_str())
            .collect();
        assert_eq!(ids, vec!["section-1", "x", "x-2", "section-4"]);
        assert_eq!(research.section_notes["x"], "for B");
    }

    #[test]
    fn prose_around_json_is_ignored() {
        let text = "Here is the research:\n{\"outline\": [{\"sectionId\": \"s1\", \"title\": \"T\"}]}\nEnjoy!";
        let research = parse_research(text, &[]).unwrap();
        assert_eq!(research.outline.sections.len(), 1);
    }

    #[test]
    fn rejects_unparsable_or_empty_outline() {
        assert!(parse_research("no json here", &[]).is_err());
        assert!(parse_research(r#"{"outline": {"sections": []}}"#, &[]).is_err());
        assert!(parse_research(r#"{"sources": []}"#, &[]).is_err());
    }

    #[test]
    fn parses_seo_payload() {
        let seo = parse_seo(
            r#"{"metaTitle": " Rust Ownership Guide ", "metaDescription": "Learn it.", "keywords": "rust, ownership , "}"#,
        )
        .unwrap();
        assert_eq!(seo.meta_title, "Rust Ownership Guide");
        assert_eq!(seo.slug, "rust-ownership-guide");
        assert_eq!(seo.keywords, vec!["rust", "ownership"]);
    }

    #[test]
    fn seo_slug_is_normalized() {
        let seo = parse_seo(r#"{"title": "T", "slug": "/My Slug!!/", "keywords": ["a"]}"#).unwrap();
        assert_eq!(seo.slug, "my-slug");
        assert!(parse_seo(r#"{"metaDescription": "no title"}"#).is_err());
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("  Hello,  World - 2024 "), "hello-world-2024");
        assert_eq!(slugify("---"), "");
    }
}
