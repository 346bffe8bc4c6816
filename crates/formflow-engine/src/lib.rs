//! Formflow Engine - stateless graph-traversal core for dynamic questionnaires
//!
//! A graph database holds a versioned schema of Sections, Questions and
//! Actions connected by `PRECEDES`/`TRIGGERS` edges. Given a starting Section
//! and a set of input parameters, the engine walks the graph until it finds
//! the next unanswered Question, executes an Action, or runs out of
//! traversable edges, and returns a response describing the next step.
//!
//! The crate is database-agnostic at its seams: the [`GraphStore`] and
//! [`ScriptSandbox`] traits abstract the two external collaborators. The
//! shipped implementations are a Neo4j adapter (`adapters`) and a restricted
//! in-process expression evaluator (`sandbox`).

#![forbid(unsafe_code)]

/// Core data types: values, entities, errors
pub mod data;

/// Traits for the external collaborators
pub mod traits;

/// Implementation adapters for the graph store
pub mod adapters;

/// Restricted expression evaluator
pub mod sandbox;

/// `{{ path }}` placeholder rendering
pub mod template;

/// Per-request execution context
pub mod context;

/// Lazy variable resolution and evaluator dispatch
pub mod resolver;

/// The engine's fixed Cypher statements
pub mod queries;

/// Graph traversal
pub mod traversal;

/// Action execution
pub mod action;

/// Request entry point and response shaping
pub mod session;

/// Testing utilities
pub mod test_utils;

// Re-export key types for convenient usage
pub use data::entities::{ActionType, EdgeRecord, EdgeType, VariableDef};
pub use data::errors::{EngineError, GraphStoreError, SandboxError};
pub use data::types::{GraphNode, GraphValue};

pub use context::{RequestContext, Warning};
pub use resolver::EvaluatorDefaults;
pub use session::{EngineResponse, FlowEngine, SectionRequest, VarReport};
pub use traversal::{TraversalEngine, TraversalOutcome};

pub use traits::graph_store::{GraphStore, QueryOptions, QueryReply};
pub use traits::script_sandbox::ScriptSandbox;

pub use adapters::neo4j_store::{Neo4jConfig, Neo4jGraphStore};
pub use sandbox::RestrictedSandbox;
