//! `{placeholder}` substitution for sequence subjects and bodies.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::RenderError;
use crate::leads::Lead;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z]+)\}").expect("valid placeholder regex"));

/// Placeholders a template may reference.
pub const KNOWN_PLACEHOLDERS: &[&str] =
    &["firstName", "lastName", "fullName", "email", "phone", "program"];

/// Names of all placeholders used in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Check that a template only uses known placeholders.
pub fn validate(template: &str) -> Result<(), RenderError> {
    for name in placeholders(template) {
        if !KNOWN_PLACEHOLDERS.contains(&name.as_str()) {
            return Err(RenderError::UnknownPlaceholder(name));
        }
    }
    Ok(())
}

fn lookup(lead: &Lead, name: &str) -> Result<String, RenderError> {
    match name {
        "firstName" => Ok(lead.first_name.clone()),
        "lastName" => Ok(lead.last_name.clone().unwrap_or_default()),
        "fullName" => Ok(lead.full_name()),
        "email" => Ok(lead.email.clone()),
        "phone" => lead
            .phone
            .clone()
            .ok_or_else(|| RenderError::MissingField(name.to_string())),
        "program" => Ok(lead.program.display_name().to_string()),
        other => Err(RenderError::UnknownPlaceholder(other.to_string())),
    }
}

/// Substitute every placeholder in `template` with the lead's data.
pub fn render(template: &str, lead: &Lead) -> Result<String, RenderError> {
    let mut failure = None;
    let out = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        match lookup(lead, &caps[1]) {
            Ok(value) => value,
            Err(e) => {
                failure.get_or_insert(e);
                String::new()
            }
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(out.into_owned()),
    }
}
