//! `{{name}}` placeholder rendering against a variable bag.

use crate::types::Variables;
use maestro_core::{MaestroError, MaestroResult};
use regex::{Captures, Regex};
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid")
});

/// Substitute every placeholder with its value from `variables`.
///
/// Fails with [`MaestroError::MissingVariable`] naming the first placeholder
/// that has no value. Substituted values are not re-scanned.
pub fn render(template: &str, variables: &Variables) -> MaestroResult<String> {
    if let Some(missing) = placeholders(template)
        .into_iter()
        .find(|name| !variables.contains_key(name))
    {
        return Err(MaestroError::MissingVariable(missing));
    }

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        variables.get(&caps[1]).cloned().unwrap_or_default()
    });
    Ok(rendered.into_owned())
}

/// Placeholder names in order of first appearance, without duplicates.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}
