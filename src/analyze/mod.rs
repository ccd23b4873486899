//! Template HTML analysis.
//!
//! Finds runs of visible text in raw email HTML, guesses the marketing role of
//! each one and produces a copy of the HTML with the text swapped for
//! `{{ variable }}` placeholders.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{BlockKind, DetectedBlock, DetectedVariable, TemplateAnalysis};
use crate::render::placeholders;

/// Blocks at or below this many characters are ignored.
const MIN_BLOCK_CHARS: usize = 3;
const ORIGINAL_TEXT_PREVIEW: usize = 200;

static TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<!--.*?-->|<(/?)([A-Za-z][A-Za-z0-9]*)([^>]*)>").expect("tag pattern is valid")
});

static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("attribute pattern is valid")
});

static CLOCK_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,2}:\d{2}\b").expect("time pattern is valid"));

/// A text run and the tag it was found under.
#[derive(Debug, Clone)]
struct RawBlock {
    text: String,
    tag: Option<String>,
    /// Lowercased class, id and style attributes of `tag`
    hints: String,
}

/// Analyze `html` and build a templated copy.
pub fn analyze_template(html: &str) -> TemplateAnalysis {
    let raw_blocks = extract_blocks(html);
    let total = raw_blocks.len();

    let mut counters: HashMap<BlockKind, usize> = HashMap::new();
    let blocks: Vec<DetectedBlock> = raw_blocks
        .into_iter()
        .enumerate()
        .map(|(position, raw)| {
            let (kind, confidence) = classify(&raw, position, total);
            let n = counters.entry(kind).or_insert(0);
            *n += 1;
            DetectedBlock {
                length: raw.text.chars().count(),
                variable_name: format!("{}_{}", kind.as_str(), n),
                text: raw.text,
                tag: raw.tag,
                kind,
                confidence,
            }
        })
        .collect();

    let variables = blocks
        .iter()
        .map(|block| DetectedVariable {
            name: block.variable_name.clone(),
            kind: block.kind,
            original_text: block.text.chars().take(ORIGINAL_TEXT_PREVIEW).collect(),
            confidence: block.confidence,
        })
        .collect();

    TemplateAnalysis {
        original_html: html.to_string(),
        template_html: substitute_blocks(html, &blocks),
        existing_placeholders: placeholders(html),
        blocks_count: blocks.len(),
        variables,
        blocks,
    }
}

fn extract_blocks(html: &str) -> Vec<RawBlock> {
    let mut blocks = Vec::new();
    let mut current_tag: Option<String> = None;
    let mut hints = String::new();
    let mut in_raw_text = false;
    let mut cursor = 0;

    let mut push_text = |segment: &str, tag: &Option<String>, hints: &str, skip: bool| {
        let text = segment.trim();
        if skip || text.chars().count() <= MIN_BLOCK_CHARS {
            return;
        }
        if text.contains("{{") || text.contains("{%") {
            return;
        }
        blocks.push(RawBlock {
            text: text.to_string(),
            tag: tag.clone(),
            hints: hints.to_string(),
        });
    };

    for caps in TAG.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        push_text(&html[cursor..whole.start()], &current_tag, &hints, in_raw_text);
        cursor = whole.end();

        // Comments have no tag name group
        let Some(name) = caps.get(2) else { continue };
        let name = name.as_str().to_ascii_lowercase();
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());

        if name == "script" || name == "style" {
            in_raw_text = !closing;
        }
        if !closing {
            hints = attribute_hints(caps.get(3).map(|m| m.as_str()).unwrap_or_default());
            current_tag = Some(name);
        }
    }
    push_text(&html[cursor..], &current_tag, &hints, in_raw_text);

    blocks
}

fn attribute_hints(attributes: &str) -> String {
    ATTRIBUTE
        .captures_iter(attributes)
        .filter(|caps| {
            matches!(
                caps[1].to_ascii_lowercase().as_str(),
                "class" | "id" | "style"
            )
        })
        .filter_map(|caps| caps.get(2).or_else(|| caps.get(3)))
        .map(|m| m.as_str().to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn classify(block: &RawBlock, position: usize, total: usize) -> (BlockKind, f32) {
    let text = block.text.to_lowercase();
    let tag = block.tag.as_deref().unwrap_or_default();
    let hints = block.hints.replace(' ', "");
    let length = block.text.chars().count();

    if hints.contains("preheader") || (position == 0 && hints.contains("display:none")) {
        return (BlockKind::Preheader, 0.9);
    }
    if ["unsubscribe", "отписаться", "all rights reserved", "©"]
        .iter()
        .any(|marker| text.contains(marker))
        || hints.contains("footer")
    {
        return (BlockKind::Footer, 0.9);
    }
    if (tag == "a" && length <= 40) || hints.contains("button") || hints.contains("btn") {
        return (BlockKind::Cta, 0.85);
    }
    if tag == "h1" {
        return (BlockKind::Headline, 0.9);
    }
    if matches!(tag, "h2" | "h3") {
        return (BlockKind::Subheadline, 0.75);
    }
    if CLOCK_TIME.is_match(&text) || text.contains("agenda") || hints.contains("agenda") {
        return (BlockKind::Agenda, 0.7);
    }
    if ["deadline", "last chance", "days left", "until ", "ends "]
        .iter()
        .any(|marker| text.contains(marker))
    {
        return (BlockKind::Deadline, 0.65);
    }
    if text.contains("speaker") || hints.contains("speaker") {
        return (BlockKind::Speaker, 0.65);
    }
    if tag == "li" || text.starts_with('✓') || text.starts_with('•') {
        return (BlockKind::Benefits, 0.6);
    }
    if text.starts_with('"')
        || text.starts_with('“')
        || text.starts_with('«')
        || hints.contains("testimonial")
        || hints.contains("review")
    {
        return (BlockKind::SocialProof, 0.55);
    }
    if position + 1 == total && total > 1 && length <= 80 {
        return (BlockKind::Footer, 0.4);
    }
    if length >= 60 || tag == "p" {
        return (BlockKind::Body, 0.6);
    }
    (BlockKind::Other, 0.3)
}

/// Replace each block's first occurrence, longest text first.
fn substitute_blocks(html: &str, blocks: &[DetectedBlock]) -> String {
    let mut ordered: Vec<&DetectedBlock> = blocks.iter().collect();
    ordered.sort_by(|a, b| b.length.cmp(&a.length));

    ordered.into_iter().fold(html.to_string(), |acc, block| {
        acc.replacen(&block.text, &format!("{{{{{}}}}}", block.variable_name), 1)
    })
}
