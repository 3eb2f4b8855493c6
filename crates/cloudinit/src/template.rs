//! write_files content templating
//!
//! Bootstrap providers emit Go-template style placeholders such as
//! `{{ .DefaultNetworkInterfaceName }}`. Only `{{ .Field }}` and `{{ Field }}`
//! placeholders are substituted; every other byte, including shell syntax
//! like `${#ARR[@]}` or `{% ... %}`, is copied through untouched.

use crate::error::CloudInitError;

/// Values exposed to write_files content
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateContext {
    pub default_network_interface_name: String,
}

impl TemplateContext {
    fn lookup(&self, field: &str) -> Option<&str> {
        match field {
            "DefaultNetworkInterfaceName" => Some(&self.default_network_interface_name),
            _ => None,
        }
    }
}

/// Field name of a placeholder body (`.Field` or `Field`, surrounding spaces allowed)
fn placeholder_field(body: &str) -> Option<&str> {
    let body = body.trim();
    let field = body.strip_prefix('.').unwrap_or(body);
    let mut chars = field.chars();
    let first = chars.next()?;
    (first.is_ascii_alphabetic() && chars.all(|c| c.is_ascii_alphanumeric() || c == '_'))
        .then_some(field)
}

/// Render `content` for the file at `path`.
///
/// A placeholder naming a field the agent does not provide is an error.
pub fn render(path: &str, content: &str, ctx: &TemplateContext) -> Result<String, CloudInitError> {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        match placeholder_field(&after[..end]) {
            Some(field) => {
                let value = ctx.lookup(field).ok_or_else(|| CloudInitError::Template {
                    path: path.to_string(),
                    field: field.to_string(),
                })?;
                out.push_str(value);
            }
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}
