//! Stored email templates and rendering into queue requests.

use serde::{Deserialize, Serialize};
use shared::template::{
    render_template, validate_template, RenderOptions, TemplateValidation, TemplateVariables,
    SUPPORTED_VARIABLES,
};
use uuid::Uuid;

use super::email_queue::QueueEmailRequest;

/// An email template with `{variable}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EmailTemplate {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub subject: String,
    pub body_html: String,
    pub body_text: Option<String>,
}

impl EmailTemplate {
    /// Checks subject and both bodies for unsupported variables.
    pub fn validate(&self) -> TemplateValidation {
        let mut errors = Vec::new();
        let parts = [
            Some(self.subject.as_str()),
            Some(self.body_html.as_str()),
            self.body_text.as_deref(),
        ];
        for part in parts.into_iter().flatten() {
            for error in validate_template(part, &SUPPORTED_VARIABLES).errors {
                if !errors.contains(&error) {
                    errors.push(error);
                }
            }
        }
        TemplateValidation {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Renders the template for one recipient.
    ///
    /// Only the HTML body is escaped; subject and text body are plain text.
    pub fn render(
        &self,
        recipient_email: impl Into<String>,
        recipient_name: Option<String>,
        variables: &TemplateVariables,
    ) -> QueueEmailRequest {
        let plain = RenderOptions {
            escape_html: false,
            ..RenderOptions::default()
        };

        let mut request = QueueEmailRequest::new(
            self.tenant_id,
            recipient_email,
            render_template(&self.subject, variables, &plain),
            render_template(&self.body_html, variables, &RenderOptions::default()),
        );
        request.email_template_id = Some(self.id);
        request.recipient_name = recipient_name;
        request.body_text = self
            .body_text
            .as_deref()
            .map(|text| render_template(text, variables, &plain));
        request.variables = serde_json::to_value(variables).ok();
        request
    }
}
