//! Rendering context assembly.
//!
//! A context is the JSON object templates are rendered against:
//! `brand`, `event`, `knowledge`, `campaign`, `meta` and `overrides`.

use serde_json::{json, Map, Value};
use url::{form_urlencoded, Url};

use crate::config::BrandDefaults;
use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{Campaign, CampaignType, ContextOverrides, Event, KnowledgeEntry, KnowledgeFilter};

/// Build the context for an event and campaign type.
///
/// Subject, preheader and CTA values resolve in order: override, campaign, default.
pub async fn build_context(
    repo: &Repository,
    brand: &BrandDefaults,
    event_id: &str,
    campaign_type: &str,
    overrides: &ContextOverrides,
) -> Result<Value, AppError> {
    if event_id.trim().is_empty() {
        return Err(AppError::Validation("eventId is required".to_string()));
    }

    let event = repo
        .get_event(event_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Event {} not found", event_id)))?;

    let knowledge = repo
        .list_knowledge(&KnowledgeFilter {
            event_id: Some(event_id.to_string()),
            content_type: None,
        })
        .await?;

    let campaign = repo.find_campaign(event_id, campaign_type).await?;

    assemble(brand, &event, &knowledge, campaign.as_ref(), campaign_type, overrides)
}

fn assemble(
    brand: &BrandDefaults,
    event: &Event,
    knowledge: &[KnowledgeEntry],
    campaign: Option<&Campaign>,
    campaign_type: &str,
    overrides: &ContextOverrides,
) -> Result<Value, AppError> {
    let cta_url = overrides
        .cta_url
        .as_deref()
        .filter(|url| !url.is_empty())
        .or(event.landing_url.as_deref().filter(|url| !url.is_empty()))
        .or(event.site_url.as_deref().filter(|url| !url.is_empty()))
        .unwrap_or("#");

    let subject_a = non_empty(&overrides.subject_a)
        .or_else(|| campaign.and_then(|c| non_empty(&c.subject_a)))
        .unwrap_or_else(|| event.name.clone());
    let subject_b = non_empty(&overrides.subject_b)
        .or_else(|| campaign.and_then(|c| non_empty(&c.subject_b)))
        .unwrap_or_else(|| event.name.clone());
    let preheader = non_empty(&overrides.preheader)
        .or_else(|| campaign.and_then(|c| non_empty(&c.preheader)))
        .or_else(|| event.description.clone())
        .unwrap_or_default();
    let cta_top_text =
        non_empty(&overrides.cta_top_text).unwrap_or_else(|| brand.cta_top_text.clone());
    let cta_bottom_text =
        non_empty(&overrides.cta_bottom_text).unwrap_or_else(|| brand.cta_bottom_text.clone());

    let mut grouped: Map<String, Value> = Map::new();
    for entry in knowledge {
        let slot = grouped
            .entry(entry.content_type.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = slot {
            items.push(serde_json::to_value(entry)?);
        }
    }

    let campaign_value = match campaign {
        Some(c) => serde_json::to_value(c)?,
        None => Value::Object(Map::new()),
    };
    let event_value = serde_json::to_value(event)?;
    let overrides_value = serde_json::to_value(overrides)?;

    Ok(json!({
        "brand": {
            "name": brand.name,
            "utmSource": brand.utm_source,
            "utmMedium": brand.utm_medium,
        },
        "event": event_value,
        "knowledge": grouped,
        "campaign": campaign_value,
        "meta": {
            "subjectA": subject_a,
            "subjectB": subject_b,
            "preheader": preheader,
            "cta_top_url": with_utm(cta_url, brand, campaign_type, "cta_top"),
            "cta_top_text": cta_top_text,
            "cta_bottom_url": with_utm(cta_url, brand, campaign_type, "cta_bottom"),
            "cta_bottom_text": cta_bottom_text,
        },
        "overrides": overrides_value,
    }))
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}

/// Append UTM parameters the URL does not already carry.
///
/// `#` and anything that does not parse as an absolute URL come back unchanged.
/// The original text is kept as written; missing pairs are appended before any
/// fragment.
pub fn with_utm(raw: &str, brand: &BrandDefaults, campaign_type: &str, content: &str) -> String {
    if raw.is_empty() || raw == "#" {
        return raw.to_string();
    }

    let Ok(url) = Url::parse(raw) else {
        return raw.to_string();
    };

    let present: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
    let wanted = [
        ("utm_source", brand.utm_source.as_str()),
        ("utm_medium", brand.utm_medium.as_str()),
        ("utm_campaign", campaign_type),
        ("utm_content", content),
    ];

    let missing: Vec<(&str, &str)> = wanted
        .into_iter()
        .filter(|(key, value)| !value.is_empty() && !present.iter().any(|p| p == key))
        .collect();

    if missing.is_empty() {
        return raw.to_string();
    }

    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(missing)
        .finish();

    let (base, fragment) = match raw.find('#') {
        Some(at) => raw.split_at(at),
        None => (raw, ""),
    };
    let separator = if !base.contains('?') {
        "?"
    } else if base.ends_with('?') || base.ends_with('&') {
        ""
    } else {
        "&"
    };

    format!("{}{}{}{}", base, separator, encoded, fragment)
}

/// Set `value` at a dotted key of one or two segments.
///
/// Returns false, leaving the context untouched, for deeper or malformed keys
/// and when the first segment holds a non-object value.
pub fn insert_dotted(context: &mut Value, key: &str, value: Value) -> bool {
    let segments: Vec<&str> = key.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return false;
    }

    let Some(root) = context.as_object_mut() else {
        return false;
    };

    match segments.as_slice() {
        [single] => {
            root.insert(single.to_string(), value);
            true
        }
        [parent, child] => {
            let slot = root
                .entry(parent.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match slot.as_object_mut() {
                Some(map) => {
                    map.insert(child.to_string(), value);
                    true
                }
                None => false,
            }
        }
        _ => false,
    }
}

/// Arrays are padded up to this index when a path reaches past their end.
const MAX_PADDED_INDEX: usize = 256;

/// Set `value` at a dotted path of any depth.
///
/// Missing and null intermediates become objects; numeric segments index into
/// arrays. Returns false when an intermediate holds a scalar.
pub fn insert_path(context: &mut Value, path: &str, value: Value) -> bool {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return false;
    }
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };

    let mut current = context;
    for segment in parents {
        current = match child_slot(current, segment) {
            Some(slot) => slot,
            None => return false,
        };
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
    }

    match child_slot(current, last) {
        Some(slot) => {
            *slot = value;
            true
        }
        None => false,
    }
}

fn child_slot<'a>(parent: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match parent {
        Value::Object(map) => Some(map.entry(segment.to_string()).or_insert(Value::Null)),
        Value::Array(items) => {
            let index = segment.parse::<usize>().ok()?;
            if index > MAX_PADDED_INDEX {
                return None;
            }
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
            items.get_mut(index)
        }
        _ => None,
    }
}

/// Look up a dotted path; numeric segments index into arrays.
pub fn lookup_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Campaign type to use when a request names none.
pub fn campaign_type_or_default(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| CampaignType::default().as_str().to_string())
}
