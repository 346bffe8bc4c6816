//! Schema entities as they arrive from the graph
//!
//! Sections, questions and actions are plain vertices; the engine reads them
//! as [`GraphNode`]s and interprets a handful of well-known properties.
//! Variable definition lists are stored on nodes and edges as JSON strings.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::types::{GraphNode, GraphValue};

/// A named, lazily-evaluated expression attached to a section, edge or
/// action. Exactly one of `cypher`/`python` carries the body; an explicit
/// `cypher:`/`python:` prefix on the body may override the field choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDef {
    pub name: String,
    #[serde(default)]
    pub cypher: Option<String>,
    #[serde(default)]
    pub python: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Which evaluator a definition or inline expression selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluator {
    Cypher,
    Python,
}

impl VariableDef {
    /// Picks the evaluator and body for this definition. The field chooses
    /// the evaluator unless the body itself carries a prefix.
    pub fn evaluator(&self) -> Option<(Evaluator, &str)> {
        if let Some(body) = self.cypher.as_deref() {
            return Some(classify_expression(body, Evaluator::Cypher));
        }
        if let Some(body) = self.python.as_deref() {
            return Some(classify_expression(body, Evaluator::Python));
        }
        None
    }
}

/// Resolves an inline expression's evaluator from its prefix, falling back
/// to `default` when none is present. The returned body keeps the prefix;
/// evaluators strip it themselves.
pub fn classify_expression(body: &str, default: Evaluator) -> (Evaluator, &str) {
    let trimmed = body.trim_start();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("cypher:") {
        (Evaluator::Cypher, body)
    } else if lower.starts_with("python:") {
        (Evaluator::Python, body)
    } else {
        (default, body)
    }
}

/// Strips an optional case-insensitive `cypher:`/`python:` prefix.
pub fn strip_evaluator_prefix(body: &str) -> &str {
    let trimmed = body.trim_start();
    let lower = trimmed.to_ascii_lowercase();
    for prefix in ["cypher:", "python:"] {
        if lower.starts_with(prefix) {
            return trimmed[prefix.len()..].trim_start();
        }
    }
    trimmed
}

/// Parses a `variables` property into definitions. The property is either a
/// JSON string or an already-structured list; anything unreadable yields an
/// empty list rather than failing the request.
pub fn parse_variable_defs(value: Option<&GraphValue>) -> Vec<VariableDef> {
    let Some(value) = value else {
        return Vec::new();
    };
    let parsed: Result<Vec<VariableDef>, _> = match value {
        GraphValue::String(raw) => serde_json::from_str(raw),
        GraphValue::List(_) => serde_json::from_value(value.to_json()),
        _ => return Vec::new(),
    };
    match parsed {
        Ok(defs) => defs,
        Err(err) => {
            debug!("Unreadable variables property ignored: {}", err);
            Vec::new()
        }
    }
}

/// The two traversable edge kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    Precedes,
    Triggers,
}

impl EdgeType {
    pub fn from_name(name: &str) -> Option<EdgeType> {
        match name {
            "PRECEDES" => Some(EdgeType::Precedes),
            "TRIGGERS" => Some(EdgeType::Triggers),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Precedes => "PRECEDES",
            EdgeType::Triggers => "TRIGGERS",
        }
    }
}

/// The action kinds the engine knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    CreatePropertyNode,
    GotoSection,
    MarkSectionComplete,
}

impl ActionType {
    pub fn from_name(name: &str) -> Option<ActionType> {
        match name {
            "CreatePropertyNode" => Some(ActionType::CreatePropertyNode),
            "GotoSection" => Some(ActionType::GotoSection),
            "MarkSectionComplete" => Some(ActionType::MarkSectionComplete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::CreatePropertyNode => "CreatePropertyNode",
            ActionType::GotoSection => "GotoSection",
            ActionType::MarkSectionComplete => "MarkSectionComplete",
        }
    }
}

/// One outgoing edge with its resolved target, as returned by the edge
/// enumeration query.
#[derive(Debug, Clone)]
pub struct EdgeRecord {
    pub edge_id: i64,
    pub edge_type: EdgeType,
    pub order: Option<i64>,
    pub ask_when: Option<String>,
    pub source_node: Option<String>,
    pub variables: Vec<VariableDef>,
    pub target: GraphNode,
}

impl EdgeRecord {
    /// Builds an edge record from an edge-enumeration row. Rows with a
    /// missing target or an unknown relationship type are skipped.
    pub fn from_row(row: &std::collections::HashMap<String, GraphValue>) -> Option<EdgeRecord> {
        let edge_type = row
            .get("edgeType")
            .and_then(GraphValue::as_str)
            .and_then(EdgeType::from_name)?;
        let target = row.get("target").and_then(GraphValue::as_node)?.clone();
        Some(EdgeRecord {
            edge_id: row.get("edgeId").and_then(GraphValue::as_i64).unwrap_or(0),
            edge_type,
            order: row.get("orderInForm").and_then(GraphValue::as_i64),
            ask_when: row
                .get("askWhen")
                .and_then(GraphValue::as_str)
                .map(str::to_string),
            source_node: row
                .get("sourceNode")
                .and_then(GraphValue::as_str)
                .map(str::to_string),
            variables: parse_variable_defs(row.get("variables")),
            target,
        })
    }
}
