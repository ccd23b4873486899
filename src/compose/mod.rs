//! Email composition: context, generated slots, mappings, render.

use std::collections::BTreeMap;

use futures::future::try_join_all;
use serde_json::Value;

use crate::config::BrandDefaults;
use crate::context::{
    build_context, campaign_type_or_default, insert_dotted, insert_path, lookup_path,
};
use crate::db::Repository;
use crate::errors::AppError;
use crate::generator::ContentGenerator;
use crate::mapping::{effective_rules, resolve_mappings, value_to_string, PREVIEW_CHARS};
use crate::models::{
    ComposeRequest, ComposedEmail, ContextOverrides, GenerateEmailRequest, GeneratedEmail,
    GenerationRequest, MappingOrigin, TemplateVariableFilter,
};
use crate::render::{content_keys, has_placeholder, placeholders, render_template, render_text};
use crate::validate::{validate_content, validate_html};

/// A placeholder that is filled with generated text when a template uses it.
#[derive(Debug, Clone, Copy)]
pub struct GenerationSlot {
    pub key: &'static str,
    pub instruction: &'static str,
    pub content_types: &'static [&'static str],
    pub max_length: usize,
    pub top_k: usize,
}

pub const GENERATION_SLOTS: [GenerationSlot; 2] = [
    GenerationSlot {
        key: "hero.subtitle",
        instruction: "Write a short subtitle for a \"{type}\" email about the event. At most 100 characters.",
        content_types: &["speaker", "talk", "benefit"],
        max_length: 100,
        top_k: 3,
    },
    GenerationSlot {
        key: "meta.preheader",
        instruction: "Write a short preheader (the first line of the email) for a \"{type}\" email. At most 80 characters. Make the reader want to open it.",
        content_types: &["benefit", "pain_point"],
        max_length: 80,
        top_k: 2,
    },
];

impl GenerationSlot {
    fn request(&self, event_id: &str, content_type: &str, content_plan: Option<&str>) -> GenerationRequest {
        let mut prompt = self.instruction.replace("{type}", content_type);
        if let Some(plan) = content_plan.map(str::trim).filter(|p| !p.is_empty()) {
            prompt.push_str(" Content plan: ");
            prompt.push_str(plan);
        }

        GenerationRequest {
            event_id: event_id.to_string(),
            prompt,
            content_types: self.content_types.iter().map(|s| s.to_string()).collect(),
            max_length: self.max_length,
            top_k: self.top_k,
        }
    }
}

/// Generate text for every slot `html` uses and merge it into `context`.
///
/// Requests run concurrently; the first failure aborts the whole enrichment.
pub async fn enrich_context(
    generator: &dyn ContentGenerator,
    context: &mut Value,
    html: &str,
    event_id: &str,
    content_type: &str,
    content_plan: Option<&str>,
) -> Result<BTreeMap<String, String>, AppError> {
    let slots: Vec<&GenerationSlot> = GENERATION_SLOTS
        .iter()
        .filter(|slot| has_placeholder(html, slot.key))
        .collect();

    let requests: Vec<GenerationRequest> = slots
        .iter()
        .map(|slot| slot.request(event_id, content_type, content_plan))
        .collect();

    let results = try_join_all(requests.iter().map(|r| generator.generate(r))).await?;

    let mut generated = BTreeMap::new();
    for (slot, result) in slots.iter().zip(results) {
        if insert_dotted(context, slot.key, Value::String(result.generated_text.clone())) {
            generated.insert(slot.key.to_string(), result.generated_text);
        } else {
            tracing::warn!("Skipping generated value for unsupported key {}", slot.key);
        }
    }

    tracing::info!(
        "Generated {} slot(s) with the {} generator for event {}",
        generated.len(),
        generator.name(),
        event_id
    );
    Ok(generated)
}

/// Compose a preview email for an event from a stored template.
pub async fn compose_email(
    repo: &Repository,
    brand: &BrandDefaults,
    generator: &dyn ContentGenerator,
    request: &ComposeRequest,
) -> Result<ComposedEmail, AppError> {
    if request.event_id.trim().is_empty()
        || request.template_id.trim().is_empty()
        || request.subject.trim().is_empty()
    {
        return Err(AppError::Validation(
            "eventId, templateId and subject are required".to_string(),
        ));
    }

    let template = repo
        .get_template(&request.template_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Template {} not found", request.template_id)))?;

    let content_type = campaign_type_or_default(request.content_type.as_deref());
    let mut context = build_context(
        repo,
        brand,
        &request.event_id,
        &content_type,
        &ContextOverrides::default(),
    )
    .await?;

    let generated = enrich_context(
        generator,
        &mut context,
        &template.html_content,
        &request.event_id,
        &content_type,
        request.content_plan.as_deref(),
    )
    .await?;

    insert_dotted(
        &mut context,
        "meta.subjectA",
        Value::String(request.subject.clone()),
    );

    let html = render_template(&template.html_content, &context)?;

    Ok(ComposedEmail {
        subject: request.subject.clone(),
        html,
        generated,
        context_keys: content_keys(&context),
    })
}

/// Generate a complete email with mapping trace and validation reports.
///
/// Variables registered for the content type join the template's own, and
/// their registered defaults fill what mappings and context leave unresolved.
/// Variables nothing resolves render as empty text and are reported as
/// unresolved instead of failing the render.
pub async fn generate_email(
    repo: &Repository,
    brand: &BrandDefaults,
    generator: &dyn ContentGenerator,
    request: &GenerateEmailRequest,
) -> Result<GeneratedEmail, AppError> {
    if request.template_id.trim().is_empty() || request.event_id.trim().is_empty() {
        return Err(AppError::Validation(
            "templateId and eventId are required".to_string(),
        ));
    }

    let template = repo
        .get_template(&request.template_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Template {} not found", request.template_id)))?;

    let content_type = campaign_type_or_default(request.content_type_code.as_deref());
    let mut context = build_context(
        repo,
        brand,
        &request.event_id,
        &content_type,
        &ContextOverrides::default(),
    )
    .await?;

    enrich_context(
        generator,
        &mut context,
        &template.html_content,
        &request.event_id,
        &content_type,
        request.content_plan.as_deref(),
    )
    .await?;

    let registered = repo
        .list_template_variables(&TemplateVariableFilter {
            content_type: Some(content_type.clone()),
        })
        .await?;

    let mut required_variables = template.required_variables.clone();
    for variable in registered.iter().filter(|v| v.is_required) {
        if !required_variables.contains(&variable.variable_name) {
            required_variables.push(variable.variable_name.clone());
        }
    }

    let subject_template = template.subject_template.as_deref().unwrap_or_default();
    let mut variables = placeholders(&template.html_content);
    for variable in placeholders(subject_template)
        .into_iter()
        .chain(required_variables.iter().cloned())
        .chain(registered.iter().map(|v| v.variable_name.clone()))
    {
        if !variables.contains(&variable) {
            variables.push(variable);
        }
    }

    let rules = effective_rules(&template.mappings, &request.mappings);
    let mut mapping_log = resolve_mappings(&mut context, &variables, &rules);

    for entry in mapping_log
        .iter_mut()
        .filter(|e| e.origin == MappingOrigin::Unresolved)
    {
        let default_value = registered
            .iter()
            .find(|v| v.variable_name == entry.variable)
            .and_then(|v| v.default_value.clone())
            .filter(|value| !value.is_empty());

        match default_value {
            Some(value) => {
                if insert_path(&mut context, &entry.variable, Value::String(value.clone())) {
                    entry.origin = MappingOrigin::Default;
                    entry.value_preview = Some(value.chars().take(PREVIEW_CHARS).collect());
                } else {
                    entry.note = Some(format!("cannot write a value at {}", entry.variable));
                }
            }
            None => {
                if insert_path(&mut context, &entry.variable, Value::String(String::new())) {
                    entry.note.get_or_insert_with(|| "rendered as empty".to_string());
                }
            }
        }
    }

    let html = render_template(&template.html_content, &context)?;
    let subject = if subject_template.trim().is_empty() {
        lookup_path(&context, "meta.subjectA")
            .map(value_to_string)
            .unwrap_or_default()
    } else {
        render_text(subject_template, &context)?
    };
    let preheader = lookup_path(&context, "meta.preheader")
        .map(value_to_string)
        .unwrap_or_default();

    let content_validation =
        validate_content(&subject, &preheader, &required_variables, &mapping_log);
    let html_validation = validate_html(&html);

    tracing::info!(
        "Generated email for template {} and event {} ({} variables, valid: {})",
        template.id,
        request.event_id,
        mapping_log.len(),
        content_validation.valid && html_validation.valid
    );

    Ok(GeneratedEmail {
        subject,
        preheader,
        html,
        content_validation,
        html_validation,
        mapping_log,
        template_id: template.id,
        event_id: request.event_id.clone(),
    })
}
