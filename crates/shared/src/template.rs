//! Email template rendering.
//!
//! Templates use `{variable_name}` placeholders. Values are HTML-escaped by
//! default since rendered bodies are sent as HTML email.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref VARIABLE_PATTERN: Regex =
        Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("variable pattern is valid");
}

/// Variables available to a template. `None` renders as the missing-value placeholder.
pub type TemplateVariables = HashMap<String, Option<String>>;

/// Variables the template editor offers.
pub const SUPPORTED_VARIABLES: [&str; 7] = [
    "client_name",
    "task_name",
    "due_date",
    "staff_name",
    "company_name",
    "workflow_name",
    "stage_name",
];

/// Rendering options.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub escape_html: bool,
    pub missing_value_placeholder: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            escape_html: true,
            missing_value_placeholder: "N/A".to_string(),
        }
    }
}

/// Result of checking a template against a set of supported variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Substitutes every `{name}` present in `variables`.
///
/// Placeholders whose name is not a key of `variables` are left as-is.
pub fn render_template(
    template: &str,
    variables: &TemplateVariables,
    options: &RenderOptions,
) -> String {
    VARIABLE_PATTERN
        .replace_all(template, |caps: &Captures| match variables.get(&caps[1]) {
            Some(Some(value)) if options.escape_html => escape_html(value),
            Some(Some(value)) => value.clone(),
            Some(None) => options.missing_value_placeholder.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Distinct variable names in order of first appearance.
pub fn extract_variables(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in VARIABLE_PATTERN.captures_iter(template) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Reports every variable in `template` that is not in `supported`.
pub fn validate_template(template: &str, supported: &[&str]) -> TemplateValidation {
    let errors: Vec<String> = extract_variables(template)
        .into_iter()
        .filter(|name| !supported.contains(&name.as_str()))
        .map(|name| format!("Unknown variable: {{{}}}", name))
        .collect();

    TemplateValidation {
        valid: errors.is_empty(),
        errors,
    }
}

/// Escapes the five HTML-significant characters.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
