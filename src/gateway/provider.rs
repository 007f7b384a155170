//! Provider payload shaping
//!
//! Turns an outbound message into the JSON body the target provider's
//! send endpoint expects. The Cloud API (`meta`) wants a template name
//! plus ordered body parameters; the bridged web client (`webjs`) wants
//! the final rendered text. Callers pick a [`OutboundMessage`] variant
//! and never touch provider JSON themselves.

use serde_json::{json, Value};

use crate::models::ProviderType;

/// What to send, independent of provider encoding
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Provider-hosted template plus its ordered body parameters
    Template {
        name: String,
        language: String,
        parameters: Vec<String>,
        /// Locally rendered fallback for providers without template hosting
        rendered_body: Option<String>,
    },

    /// Fully rendered text body
    Text { body: String },
}

/// Shape a message into the provider's wire format
pub fn shape_payload(provider: ProviderType, to: &str, message: &OutboundMessage) -> Value {
    match provider {
        ProviderType::Meta => meta_payload(to, message),
        ProviderType::Webjs => webjs_payload(to, message),
    }
}

fn meta_payload(to: &str, message: &OutboundMessage) -> Value {
    match message {
        OutboundMessage::Template {
            name,
            language,
            parameters,
            ..
        } => {
            let components: Vec<Value> = if parameters.is_empty() {
                Vec::new()
            } else {
                vec![json!({
                    "type": "body",
                    "parameters": parameters
                        .iter()
                        .map(|text| json!({ "type": "text", "text": text }))
                        .collect::<Vec<_>>(),
                })]
            };

            json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": "template",
                "template": {
                    "name": name,
                    "language": { "code": language },
                    "components": components,
                },
            })
        }
        OutboundMessage::Text { body } => json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body },
        }),
    }
}

fn webjs_payload(to: &str, message: &OutboundMessage) -> Value {
    // The web bridge has no native template support; templates reach it
    // already rendered as text
    let body = match message {
        OutboundMessage::Template {
            name,
            rendered_body,
            ..
        } => match rendered_body {
            Some(body) => body.clone(),
            None => {
                tracing::warn!(template = %name, "Template without a rendered body sent to webjs, using its name");
                name.clone()
            }
        },
        OutboundMessage::Text { body } => body.clone(),
    };

    json!({
        "to": to,
        "body": body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_template_payload() {
        let message = OutboundMessage::Template {
            name: "order_update".to_string(),
            language: "en".to_string(),
            parameters: vec!["Maria".to_string(), "A-1042".to_string()],
            rendered_body: None,
        };

        let payload = shape_payload(ProviderType::Meta, "5511999990000", &message);

        assert_eq!(payload["messaging_product"], "whatsapp");
        assert_eq!(payload["type"], "template");
        assert_eq!(payload["template"]["name"], "order_update");
        assert_eq!(payload["template"]["language"]["code"], "en");

        let parameters = &payload["template"]["components"][0]["parameters"];
        assert_eq!(parameters[0]["text"], "Maria");
        assert_eq!(parameters[1]["text"], "A-1042");
    }

    #[test]
    fn test_meta_template_without_parameters() {
        let message = OutboundMessage::Template {
            name: "welcome".to_string(),
            language: "pt_BR".to_string(),
            parameters: vec![],
            rendered_body: None,
        };

        let payload = shape_payload(ProviderType::Meta, "5511999990000", &message);
        assert_eq!(payload["template"]["components"], json!([]));
    }

    #[test]
    fn test_webjs_template_uses_rendered_body() {
        let message = OutboundMessage::Template {
            name: "order_update".to_string(),
            language: "en".to_string(),
            parameters: vec!["Maria".to_string()],
            rendered_body: Some("Oi Maria, pedido A-1042 enviado".to_string()),
        };

        let payload = shape_payload(ProviderType::Webjs, "5511999990000", &message);
        assert_eq!(payload["body"], "Oi Maria, pedido A-1042 enviado");

        // Meta ignores the local rendering and keeps the hosted template
        let payload = shape_payload(ProviderType::Meta, "5511999990000", &message);
        assert_eq!(payload["type"], "template");
    }

    #[test]
    fn test_meta_text_payload() {
        let message = OutboundMessage::Text {
            body: "Your order shipped".to_string(),
        };

        let payload = shape_payload(ProviderType::Meta, "5511999990000", &message);
        assert_eq!(payload["type"], "text");
        assert_eq!(payload["text"]["body"], "Your order shipped");
    }

    #[test]
    fn test_webjs_text_payload() {
        let message = OutboundMessage::Text {
            body: "Oi Maria, seu pedido chegou".to_string(),
        };

        let payload = shape_payload(ProviderType::Webjs, "5511999990000", &message);
        assert_eq!(payload["to"], "5511999990000");
        assert_eq!(payload["body"], "Oi Maria, seu pedido chegou");
        assert!(payload.get("messaging_product").is_none());
    }
}
