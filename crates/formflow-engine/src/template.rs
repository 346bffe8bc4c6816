//! `{{ path }}` placeholder rendering
//!
//! Every `{{ a.b[0].c }}` occurrence in a source string is replaced with a
//! JSON-encoded literal looked up from the request context, so the rendered
//! string hands the downstream evaluator only syntactically-legal literals.
//! Lookup failures render the literal `null`; the caller records a warning.

use regex::{Captures, Regex};

use crate::data::types::GraphValue;

/// One step of a template path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

/// A parsed placeholder path such as `applicant.addresses[0].city`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePath {
    /// The path exactly as written inside the braces (whitespace stripped).
    pub raw: String,
    pub segments: Vec<PathSeg>,
}

impl TemplatePath {
    /// Parses dotted identifiers with optional bracketed integer indices.
    pub fn parse(raw: &str) -> Option<TemplatePath> {
        let mut segments = Vec::new();
        for part in raw.split('.') {
            let (name, indices) = match part.find('[') {
                Some(bracket) => (&part[..bracket], &part[bracket..]),
                None => (part, ""),
            };
            if name.is_empty() || !is_identifier(name) {
                return None;
            }
            segments.push(PathSeg::Key(name.to_string()));
            let mut rest = indices;
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']')?;
                let index: usize = stripped[..close].parse().ok()?;
                segments.push(PathSeg::Index(index));
                rest = &stripped[close + 1..];
            }
            if !rest.is_empty() {
                return None;
            }
        }
        if segments.is_empty() {
            return None;
        }
        Some(TemplatePath {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The root identifier the lookup chain resolves first.
    pub fn root(&self) -> &str {
        match &self.segments[0] {
            PathSeg::Key(name) => name,
            // parse() guarantees the first segment is a key
            PathSeg::Index(_) => "",
        }
    }

    /// Walks the remaining segments against a resolved root value.
    pub fn walk(&self, root: &GraphValue) -> Option<GraphValue> {
        let mut current = root.clone();
        for seg in &self.segments[1..] {
            current = match seg {
                PathSeg::Key(key) => current.get_key(key)?,
                PathSeg::Index(index) => current.get_index(*index)?,
            };
        }
        Some(current)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The outcome of rendering a template.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub text: String,
    /// Paths that had no value and were rendered as `null`.
    pub missing: Vec<String>,
}

/// Rewrites `{{ path }}` placeholders to JSON literals.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    pattern: Regex,
}

impl TemplateRenderer {
    pub fn new() -> TemplateRenderer {
        TemplateRenderer {
            pattern: Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.\[\]]*)\s*\}\}")
                .expect("placeholder pattern is valid"),
        }
    }

    /// Returns the parsed path of every placeholder in `text`, in order of
    /// appearance. Malformed paths are kept as raw-only entries so the
    /// renderer can still null them out.
    pub fn placeholder_paths(&self, text: &str) -> Vec<TemplatePath> {
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| {
                TemplatePath::parse(m.as_str()).unwrap_or(TemplatePath {
                    raw: m.as_str().to_string(),
                    segments: Vec::new(),
                })
            })
            .collect()
    }

    /// Replaces every placeholder using `lookup`; `None` renders as `null`
    /// and the path is reported in [`Rendered::missing`].
    pub fn render<F>(&self, text: &str, mut lookup: F) -> Rendered
    where
        F: FnMut(&TemplatePath) -> Option<GraphValue>,
    {
        let mut missing = Vec::new();
        let rendered = self.pattern.replace_all(text, |caps: &Captures<'_>| {
            let raw = &caps[1];
            let value = TemplatePath::parse(raw).and_then(|path| lookup(&path));
            match value {
                Some(v) => v.to_json_literal(),
                None => {
                    missing.push(raw.to_string());
                    "null".to_string()
                }
            }
        });
        Rendered {
            text: rendered.into_owned(),
            missing,
        }
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        TemplateRenderer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(path: &TemplatePath) -> Option<GraphValue> {
        let values: HashMap<&str, GraphValue> = HashMap::from([
            ("name", GraphValue::from("Ada")),
            ("age", GraphValue::Int(36)),
            (
                "addresses",
                GraphValue::List(vec![GraphValue::Map(HashMap::from([(
                    "city".to_string(),
                    GraphValue::from("Oslo"),
                )]))]),
            ),
        ]);
        values.get(path.root()).and_then(|root| path.walk(root))
    }

    #[test]
    fn test_no_placeholders_is_identity() {
        let renderer = TemplateRenderer::new();
        let out = renderer.render("MATCH (n) RETURN n", |_| None);
        assert_eq!(out.text, "MATCH (n) RETURN n");
        assert!(out.missing.is_empty());
    }

    #[test]
    fn test_scalar_renders_as_json_literal() {
        let renderer = TemplateRenderer::new();
        let out = renderer.render("{{ name }} is {{age}}", lookup);
        assert_eq!(out.text, "\"Ada\" is 36");
    }

    #[test]
    fn test_path_with_index() {
        let renderer = TemplateRenderer::new();
        let out = renderer.render("{{ addresses[0].city }}", lookup);
        assert_eq!(out.text, "\"Oslo\"");
    }

    #[test]
    fn test_missing_path_renders_null() {
        let renderer = TemplateRenderer::new();
        let out = renderer.render("x = {{ unknown.thing }}", lookup);
        assert_eq!(out.text, "x = null");
        assert_eq!(out.missing, vec!["unknown.thing".to_string()]);
    }

    #[test]
    fn test_placeholder_inside_string_literal_is_rendered() {
        let renderer = TemplateRenderer::new();
        let out = renderer.render("'prefix {{ age }} suffix'", lookup);
        assert_eq!(out.text, "'prefix 36 suffix'");
    }

    #[test]
    fn test_path_parsing() {
        let path = TemplatePath::parse("a.b[2].c").unwrap();
        assert_eq!(path.root(), "a");
        assert_eq!(
            path.segments,
            vec![
                PathSeg::Key("a".to_string()),
                PathSeg::Key("b".to_string()),
                PathSeg::Index(2),
                PathSeg::Key("c".to_string()),
            ]
        );
        assert!(TemplatePath::parse("0bad").is_none());
        assert!(TemplatePath::parse("a..b").is_none());
        assert!(TemplatePath::parse("a[x]").is_none());
    }

    #[test]
    fn test_node_property_collapse_through_path() {
        use crate::data::types::GraphNode;
        let node = GraphValue::Node(GraphNode {
            id: 3,
            labels: vec!["Applicant".to_string()],
            properties: HashMap::from([("firstName".to_string(), GraphValue::from("Ada"))]),
        });
        let path = TemplatePath::parse("applicant.firstName").unwrap();
        assert_eq!(path.walk(&node), Some(GraphValue::from("Ada")));
    }
}
