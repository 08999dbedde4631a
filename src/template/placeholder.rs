//! `${path}` placeholder templates
//!
//! Syntax:
//! - `${name}` or `${ns.field.sub}` substitutes a context value
//! - `$$` is a literal `$`
//! - a `$` followed by anything else is kept as-is
//!
//! An unterminated `${`, an empty name, or an empty path segment is a
//! template error regardless of the missing-variable policy.

use serde_json::Value;

use super::{MissingVariablePolicy, TemplateContext, TemplateRenderer};
use crate::module::traits::ExchangeError;

/// One parsed piece of a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    /// `$$`
    Dollar,
    Variable(&'a str),
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn check_path(path: &str, offset: usize) -> Result<(), ExchangeError> {
    if path.is_empty() {
        return Err(ExchangeError::Template(format!(
            "empty variable name at offset {}",
            offset
        )));
    }
    for part in path.split('.') {
        if part.is_empty() || !part.chars().all(is_name_char) {
            return Err(ExchangeError::Template(format!(
                "invalid variable name '{}' at offset {}",
                path, offset
            )));
        }
    }
    Ok(())
}

/// Split template text into segments
pub fn parse_template(template: &str) -> Result<Vec<Segment<'_>>, ExchangeError> {
    let mut segments = Vec::new();
    let bytes = template.as_bytes();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        match bytes.get(i + 1) {
            Some(b'$') => {
                if literal_start < i {
                    segments.push(Segment::Literal(&template[literal_start..i]));
                }
                segments.push(Segment::Dollar);
                i += 2;
                literal_start = i;
            }
            Some(b'{') => {
                if literal_start < i {
                    segments.push(Segment::Literal(&template[literal_start..i]));
                }
                let name_start = i + 2;
                let close = template[name_start..].find('}').ok_or_else(|| {
                    ExchangeError::Template(format!("unterminated '${{' at offset {}", i))
                })?;
                let path = template[name_start..name_start + close].trim();
                check_path(path, i)?;
                segments.push(Segment::Variable(path));
                i = name_start + close + 1;
                literal_start = i;
            }
            _ => i += 1,
        }
    }

    if literal_start < template.len() {
        segments.push(Segment::Literal(&template[literal_start..]));
    }
    Ok(segments)
}

fn write_value(out: &mut String, value: &Value) -> Result<(), ExchangeError> {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Array(_) | Value::Object(_) => out.push_str(&serde_json::to_string(value)?),
    }
    Ok(())
}

/// Renderer for `${path}` templates
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer {
    policy: MissingVariablePolicy,
}

impl PlaceholderRenderer {
    pub fn new(policy: MissingVariablePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MissingVariablePolicy {
        self.policy
    }
}

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, context: &TemplateContext) -> Result<String, ExchangeError> {
        let segments = parse_template(template)?;
        let mut out = String::with_capacity(template.len());

        for segment in segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Dollar => out.push('$'),
                Segment::Variable(path) => match context.lookup(path) {
                    Some(value) => write_value(&mut out, value)?,
                    None => match self.policy {
                        MissingVariablePolicy::Empty => {}
                        MissingVariablePolicy::Error => {
                            return Err(ExchangeError::Template(format!(
                                "unresolved variable '{}'",
                                path
                            )))
                        }
                    },
                },
            }
        }
        Ok(out)
    }
}
