//! URL path templates.
//!
//! `{name}` is a required placeholder, `{?name}` an optional one. Templates are
//! compiled once and generated many times. Substituted values are percent-encoded
//! as path segments.

use crate::{RequestError, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::HashMap;

/// Characters escaped in a substituted path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Param { name: String, optional: bool },
}

/// A compiled URL template.
///
/// # Examples
///
/// ```
/// use adapterkit::UrlTemplate;
/// use std::collections::HashMap;
///
/// let template = UrlTemplate::compile("/api/product/{id}/{?variant}").unwrap();
/// assert_eq!(template.parameters_count(), 2);
///
/// let params = HashMap::from([("id".to_string(), "42".to_string())]);
/// assert_eq!(template.generate(&params).unwrap(), "/api/product/42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    source: String,
    parts: Vec<Part>,
}

impl UrlTemplate {
    /// Compiles a template string.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error for an unclosed or empty placeholder.
    pub fn compile(source: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find('{') {
            if open > 0 {
                parts.push(Part::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                RequestError::configuration(format!("Unclosed placeholder in URL template: {source}"))
            })?;

            let inner = after[..close].trim();
            let (name, optional) = match inner.strip_prefix('?') {
                Some(name) => (name.trim(), true),
                None => (inner, false),
            };
            if name.is_empty() {
                return Err(RequestError::configuration(format!(
                    "Empty placeholder in URL template: {source}"
                )));
            }
            parts.push(Part::Param {
                name: name.to_string(),
                optional,
            });
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    /// The template string this was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Number of placeholders, required and optional.
    pub fn parameters_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part, Part::Param { .. }))
            .count()
    }

    /// Names of the required placeholders, in template order.
    pub fn required_parameters(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            Part::Param {
                name,
                optional: false,
            } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Substitutes `params` into the template.
    ///
    /// An absent optional placeholder is dropped together with the slash that
    /// introduced its segment.
    ///
    /// # Errors
    ///
    /// Returns a `Template` error naming the first missing required placeholder.
    pub fn generate(&self, params: &HashMap<String, String>) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());

        for (i, part) in self.parts.iter().enumerate() {
            match part {
                Part::Literal(text) => {
                    if out.ends_with('/') && text.starts_with('/') {
                        out.push_str(&text[1..]);
                    } else {
                        out.push_str(text);
                    }
                }
                Part::Param { name, optional } => match params.get(name) {
                    Some(value) => out.extend(utf8_percent_encode(value, SEGMENT)),
                    None if *optional => {
                        let ends_segment = match self.parts.get(i + 1) {
                            None => true,
                            Some(Part::Literal(next)) => next.starts_with('/'),
                            Some(Part::Param { .. }) => false,
                        };
                        if ends_segment && out.ends_with('/') && out.len() > 1 {
                            out.pop();
                        }
                    }
                    None => {
                        return Err(RequestError::template(format!(
                            "Missing URL parameter: {name}"
                        )))
                    }
                },
            }
        }

        Ok(out)
    }
}
