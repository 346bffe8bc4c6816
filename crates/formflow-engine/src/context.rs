//! Per-request execution context
//!
//! Constructed at request entry, mutated only by the traversal, discarded at
//! response emission. Owns the read-only input map, the insert-only variable
//! cache, the scope stack of variable definitions, the single-slot current
//! source node, the append-only warnings list and the side-effect
//! accumulators.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::warn;

use crate::data::entities::VariableDef;
use crate::data::types::GraphValue;

/// A recoverable failure reported alongside a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub variable: String,
    pub message: String,
}

/// Where a scope frame came from; definition lookup searches edge frames
/// first, then node frames, then section frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Section,
    Node,
    Edge,
}

#[derive(Debug, Clone)]
struct ScopeFrame {
    kind: ScopeKind,
    defs: Vec<VariableDef>,
}

/// A materialised variable: the evaluator's unprocessed return value and the
/// parsed/normalised form.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedVar {
    pub raw: GraphValue,
    pub value: GraphValue,
}

/// Execution context for one traversal request.
#[derive(Debug)]
pub struct RequestContext {
    trace_id: String,
    inputs: HashMap<String, GraphValue>,
    vars: HashMap<String, CachedVar>,
    evaluating: HashSet<String>,
    scopes: Vec<ScopeFrame>,
    source_node: Option<GraphValue>,
    created_node_ids: Vec<i64>,
    next_section_id: Option<String>,
    completed: bool,
    warnings: Vec<Warning>,
}

impl RequestContext {
    /// Builds a context with the caller's input parameters. The input map is
    /// never mutated afterwards; variables that collide with an input name
    /// shadow it in lookups without touching it.
    pub fn new(trace_id: impl Into<String>, inputs: HashMap<String, GraphValue>) -> RequestContext {
        RequestContext {
            trace_id: trace_id.into(),
            inputs,
            vars: HashMap::new(),
            evaluating: HashSet::new(),
            scopes: Vec::new(),
            source_node: None,
            created_node_ids: Vec::new(),
            next_section_id: None,
            completed: false,
            warnings: Vec::new(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn inputs(&self) -> &HashMap<String, GraphValue> {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Option<&GraphValue> {
        self.inputs.get(name)
    }

    /// The variable cache entry, if the variable was materialised.
    pub fn cached(&self, name: &str) -> Option<&CachedVar> {
        self.vars.get(name)
    }

    /// Every materialised variable, for response shaping.
    pub fn materialized_vars(&self) -> &HashMap<String, CachedVar> {
        &self.vars
    }

    /// Caches an evaluation result. The cache is insert-only: re-evaluation
    /// never happens, so a second insert for the same name is ignored.
    pub fn cache_var(&mut self, name: &str, raw: GraphValue, value: GraphValue) {
        self.vars
            .entry(name.to_string())
            .or_insert(CachedVar { raw, value });
    }

    /// Marks a variable as being evaluated; returns false if it already is,
    /// which signals a self-referential definition.
    pub fn begin_eval(&mut self, name: &str) -> bool {
        self.evaluating.insert(name.to_string())
    }

    pub fn end_eval(&mut self, name: &str) {
        self.evaluating.remove(name);
    }

    pub fn push_scope(&mut self, kind: ScopeKind, defs: Vec<VariableDef>) {
        self.scopes.push(ScopeFrame { kind, defs });
    }

    /// Drops the topmost edge frame; node and section frames persist for the
    /// rest of the request.
    pub fn pop_edge_scope(&mut self) {
        if let Some(at) = self
            .scopes
            .iter()
            .rposition(|frame| frame.kind == ScopeKind::Edge)
        {
            self.scopes.remove(at);
        }
    }

    /// Finds a variable definition, searching edge frames first, then node
    /// frames, then section frames, each most-recent-first.
    pub fn find_definition(&self, name: &str) -> Option<&VariableDef> {
        for kind in [ScopeKind::Edge, ScopeKind::Node, ScopeKind::Section] {
            for frame in self.scopes.iter().rev().filter(|f| f.kind == kind) {
                if let Some(def) = frame.defs.iter().find(|d| d.name == name) {
                    return Some(def);
                }
            }
        }
        None
    }

    /// The current source node; stack-like state that persists across edges
    /// until re-declared.
    pub fn source_node(&self) -> Option<&GraphValue> {
        self.source_node.as_ref()
    }

    pub fn set_source_node(&mut self, value: GraphValue) {
        self.source_node = if value.is_null() { None } else { Some(value) };
    }

    pub fn clear_source_node(&mut self) {
        self.source_node = None;
    }

    /// Reserved template names resolvable after variables and inputs.
    pub fn reserved(&self, name: &str) -> Option<GraphValue> {
        match name {
            "sourceNode" => Some(
                self.source_node
                    .clone()
                    .unwrap_or(GraphValue::Null),
            ),
            "createdNodeIds" => Some(GraphValue::List(
                self.created_node_ids
                    .iter()
                    .map(|id| GraphValue::Int(*id))
                    .collect(),
            )),
            _ => None,
        }
    }

    pub fn warn(&mut self, variable: impl Into<String>, message: impl Into<String>) {
        let warning = Warning {
            variable: variable.into(),
            message: message.into(),
        };
        warn!(
            trace_id = %self.trace_id,
            variable = %warning.variable,
            "{}",
            warning.message
        );
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn record_created(&mut self, ids: impl IntoIterator<Item = i64>) {
        self.created_node_ids.extend(ids);
    }

    pub fn created_node_ids(&self) -> &[i64] {
        &self.created_node_ids
    }

    pub fn set_next_section_id(&mut self, section_id: impl Into<String>) {
        self.next_section_id = Some(section_id.into());
    }

    pub fn next_section_id(&self) -> Option<&str> {
        self.next_section_id.as_deref()
    }

    pub fn set_completed(&mut self) {
        self.completed = true;
    }

    pub fn completed(&self) -> bool {
        self.completed
    }
}
