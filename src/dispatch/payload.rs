//! Per-recipient message construction
//!
//! Direct campaigns carry a handlebars source in `message_body`;
//! template campaigns reference a provider-hosted template and take
//! their positional parameters from the recipient's variables. Both
//! paths produce an [`OutboundMessage`] for the gateway to shape into
//! provider wire format.

use handlebars::Handlebars;
use serde_json::{Map, Value};

use crate::gateway::provider::OutboundMessage;
use crate::models::{Campaign, CampaignRecipient, CampaignType};
use crate::utils::error::DispatchError;

/// Language sent for provider templates when the campaign carries none
const DEFAULT_TEMPLATE_LANGUAGE: &str = "en";

/// Build the outbound message for one recipient.
///
/// Rendering or a missing template/body is a validation failure: the
/// same input fails the same way on every attempt, so these are never
/// retried.
pub fn build_message(
    campaign: &Campaign,
    recipient: &CampaignRecipient,
) -> Result<OutboundMessage, DispatchError> {
    match campaign.campaign_type {
        CampaignType::Template => {
            let name = campaign.template_name.as_deref().ok_or_else(|| {
                DispatchError::Template("Template campaign without a template name".to_string())
            })?;

            let language = campaign
                .template_language
                .clone()
                .unwrap_or_else(|| DEFAULT_TEMPLATE_LANGUAGE.to_string());

            // A body source, when present, is rendered locally for
            // providers that cannot host the template
            let rendered_body = campaign
                .message_body
                .as_deref()
                .map(|source| render_body(source, recipient))
                .transpose()?;

            Ok(OutboundMessage::Template {
                name: name.to_string(),
                language,
                parameters: template_parameters(recipient),
                rendered_body,
            })
        }
        CampaignType::Direct => {
            let source = campaign.message_body.as_deref().ok_or_else(|| {
                DispatchError::Template("Direct campaign without a message body".to_string())
            })?;

            Ok(OutboundMessage::Text {
                body: render_body(source, recipient)?,
            })
        }
    }
}

/// Render a handlebars source with the recipient's variables.
///
/// The context exposes `phone`, `name` (falling back to the phone
/// number), and every key of the recipient's variables object. The
/// built-in fields win on a key collision.
pub fn render_body(source: &str, recipient: &CampaignRecipient) -> Result<String, DispatchError> {
    let handlebars = Handlebars::new();

    handlebars
        .render_template(source, &render_context(recipient))
        .map_err(|e| DispatchError::Template(e.to_string()))
}

fn render_context(recipient: &CampaignRecipient) -> Map<String, Value> {
    let mut context = Map::new();

    if let Some(Value::Object(vars)) = &recipient.variables {
        context.extend(vars.clone());
    }

    context.insert("phone".to_string(), Value::String(recipient.phone.clone()));
    let name = recipient
        .name
        .clone()
        .unwrap_or_else(|| recipient.phone.clone());
    context.insert("name".to_string(), Value::String(name));

    context
}

/// Ordered positional parameters for a provider template.
///
/// Keys sort numerically when every key is an integer, so "10" follows
/// "9" instead of "1"; otherwise the sort is lexical.
pub fn template_parameters(recipient: &CampaignRecipient) -> Vec<String> {
    let Some(Value::Object(vars)) = &recipient.variables else {
        return Vec::new();
    };

    let mut keys: Vec<&String> = vars.keys().collect();
    if keys.iter().all(|k| k.parse::<u64>().is_ok()) {
        keys.sort_by_key(|k| k.parse::<u64>().unwrap_or(u64::MAX));
    } else {
        keys.sort();
    }

    keys.into_iter()
        .filter_map(|key| vars.get(key))
        .map(value_to_string)
        .collect()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
