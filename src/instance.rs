//! Instance name resolution.
//!
//! A bare name such as `MyInstance` maps onto the hosted URL pattern from the
//! configuration; anything that already carries an `http`/`https` scheme is
//! returned unchanged. No network calls happen here.

use tracing::debug;
use url::Url;

use crate::config::DEFAULT_INSTANCE_URL_TEMPLATE;
use crate::error::{Result, XmlmcError};

/// Resolves `name` with the default hosted URL pattern.
pub fn resolve_instance_name(name: &str) -> Result<Url> {
    resolve_with_template(name, DEFAULT_INSTANCE_URL_TEMPLATE)
}

/// Resolves `name` using `template`, whose `{instance}` placeholder receives the name.
pub fn resolve_with_template(name: &str, template: &str) -> Result<Url> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(XmlmcError::Config("instance name cannot be empty".to_string()));
    }

    if is_qualified_url(trimmed) {
        debug!("Instance '{}' is already a URL", trimmed);
        return Ok(Url::parse(trimmed)?);
    }

    if trimmed.chars().any(|c| c.is_whitespace() || "/?#".contains(c)) {
        return Err(XmlmcError::Config(format!("'{}' is not a valid instance name", trimmed)));
    }

    let resolved = template.replace("{instance}", &urlencoding::encode(trimmed));
    debug!("Resolved instance '{}' to {}", trimmed, resolved);
    Ok(Url::parse(&resolved)?)
}

fn is_qualified_url(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
