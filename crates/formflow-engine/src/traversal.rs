//! Graph traversal
//!
//! Walks `PRECEDES`/`TRIGGERS` edges from a starting section until it finds
//! an unanswered question, executes an immediate-return action, or runs out
//! of truthy edges. The walk is iterative and strictly sequential; cycles in
//! the schema are allowed and progress through them depends on questions
//! becoming answered between visits.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::action::{execute_action, ActionDisposition};
use crate::context::{RequestContext, ScopeKind};
use crate::data::entities::{parse_variable_defs, ActionType, EdgeRecord, EdgeType};
use crate::data::errors::{EngineError, GraphStoreError};
use crate::data::types::{GraphNode, GraphValue};
use crate::queries;
use crate::resolver::VariableResolver;
use crate::traits::graph_store::{GraphStore, QueryOptions};
use crate::traits::script_sandbox::ScriptSandbox;

/// The terminal state of one traversal.
#[derive(Debug, Clone)]
pub enum TraversalOutcome {
    /// The next question the client should ask, with the source node the
    /// answered-ness check ran against.
    UnansweredQuestion { question: GraphNode },
    /// An action executed and requested an immediate return.
    Action {
        action_type: Option<ActionType>,
        action_id: String,
    },
    /// No truthy edge remained; the section is complete.
    Completed,
}

/// What an edge points at, as far as dispatch is concerned.
enum Target {
    Question(String),
    Action,
    Other,
}

/// Resolves nodes and walks edges. One instance serves many requests; all
/// per-request state lives in the [`RequestContext`].
pub struct TraversalEngine {
    graph: Arc<dyn GraphStore>,
    resolver: VariableResolver,
}

impl TraversalEngine {
    pub fn new(graph: Arc<dyn GraphStore>, sandbox: Arc<dyn ScriptSandbox>) -> TraversalEngine {
        let resolver = VariableResolver::new(graph.clone(), sandbox);
        TraversalEngine { graph, resolver }
    }

    pub fn with_resolver(graph: Arc<dyn GraphStore>, resolver: VariableResolver) -> TraversalEngine {
        TraversalEngine { graph, resolver }
    }

    pub fn resolver(&self) -> &VariableResolver {
        &self.resolver
    }

    /// Looks up the latest active version of a section.
    pub async fn resolve_section(&self, section_id: &str) -> Result<GraphNode, EngineError> {
        let params = HashMap::from([(
            "sectionId".to_string(),
            GraphValue::from(section_id),
        )]);
        let options = QueryOptions::with_timeout(self.resolver.defaults().adhoc_timeout);
        let reply = self
            .graph
            .run_query(queries::LATEST_ACTIVE_SECTION, params, options)
            .await
            .map_err(store_error)?;
        reply
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.get("section").and_then(GraphValue::as_node).cloned())
            .ok_or_else(|| EngineError::SectionNotFound(section_id.to_string()))
    }

    /// Walks the graph from a resolved section node until a terminal
    /// condition is reached. Side effects accumulate in the context.
    #[instrument(skip(self, ctx, section), fields(trace_id = %ctx.trace_id(), section_id = section.string_prop("sectionId").unwrap_or("?")))]
    pub async fn traverse(
        &self,
        section: &GraphNode,
        ctx: &mut RequestContext,
    ) -> Result<TraversalOutcome, EngineError> {
        ctx.push_scope(
            ScopeKind::Section,
            parse_variable_defs(section.properties.get("variables")),
        );
        let mut current = section.clone();

        'walk: loop {
            let edges = self.outgoing_edges(current.id).await?;
            debug!(node_id = current.id, edges = edges.len(), "Enumerated edges");

            for edge in edges {
                ctx.push_scope(ScopeKind::Edge, edge.variables.clone());

                if !self
                    .resolver
                    .eval_predicate(ctx, edge.ask_when.as_deref())
                    .await?
                {
                    ctx.pop_edge_scope();
                    continue;
                }

                if let Some(expr) = &edge.source_node {
                    match self.resolver.eval_source_expr(ctx, expr).await? {
                        Some(value) => ctx.set_source_node(value),
                        None => {
                            // resolution failed: clear the slot, abandon the
                            // edge, try the next one in sort order
                            ctx.clear_source_node();
                            ctx.pop_edge_scope();
                            continue;
                        }
                    }
                }

                match classify_target(&edge) {
                    Target::Question(question_id) => {
                        if self.question_answered(ctx, &question_id).await? {
                            debug!(question_id = %question_id, "Question answered, descending");
                            ctx.pop_edge_scope();
                            ctx.push_scope(
                                ScopeKind::Node,
                                parse_variable_defs(edge.target.properties.get("variables")),
                            );
                            current = edge.target;
                            continue 'walk;
                        }
                        debug!(question_id = %question_id, "Stopping at unanswered question");
                        return Ok(TraversalOutcome::UnansweredQuestion {
                            question: edge.target,
                        });
                    }
                    Target::Action => {
                        let disposition = execute_action(
                            &edge.target,
                            ctx,
                            &self.resolver,
                        )
                        .await?;
                        match disposition {
                            ActionDisposition::Return {
                                action_type,
                                action_id,
                            } => {
                                return Ok(TraversalOutcome::Action {
                                    action_type,
                                    action_id,
                                });
                            }
                            ActionDisposition::Continue => {
                                // the action pushed its own node scope
                                ctx.pop_edge_scope();
                                current = edge.target;
                                continue 'walk;
                            }
                        }
                    }
                    Target::Other => {
                        debug!(
                            target_id = edge.target.id,
                            "Edge target is neither question nor action, skipping"
                        );
                        ctx.pop_edge_scope();
                        continue;
                    }
                }
            }

            debug!(node_id = current.id, "No truthy edge remains, section complete");
            ctx.set_completed();
            return Ok(TraversalOutcome::Completed);
        }
    }

    async fn outgoing_edges(&self, node_id: i64) -> Result<Vec<EdgeRecord>, EngineError> {
        let params = HashMap::from([("nodeId".to_string(), GraphValue::Int(node_id))]);
        let options = QueryOptions::with_timeout(self.resolver.defaults().adhoc_timeout);
        let reply = self
            .graph
            .run_query(queries::OUTGOING_EDGES, params, options)
            .await
            .map_err(store_error)?;
        Ok(reply
            .rows
            .iter()
            .filter_map(EdgeRecord::from_row)
            .collect())
    }

    /// True when a datapoint supplied by the current source answers the
    /// question. With no resolved source the question counts as unanswered.
    async fn question_answered(
        &self,
        ctx: &mut RequestContext,
        question_id: &str,
    ) -> Result<bool, EngineError> {
        let Some(source_id) = ctx
            .source_node()
            .and_then(GraphValue::as_node)
            .map(|node| node.id)
        else {
            return Ok(false);
        };
        let params = HashMap::from([
            ("sourceId".to_string(), GraphValue::Int(source_id)),
            ("questionId".to_string(), GraphValue::from(question_id)),
        ]);
        let options = QueryOptions::with_timeout(self.resolver.defaults().adhoc_timeout);
        match self
            .graph
            .run_query(queries::QUESTION_ANSWERED, params, options)
            .await
        {
            Ok(reply) => Ok(!reply.rows.is_empty()),
            Err(GraphStoreError::Unavailable(msg)) => Err(EngineError::Unavailable(msg)),
            Err(err) => {
                // degraded: treat the question as unanswered rather than
                // failing the request
                ctx.warn(
                    question_id,
                    format!("answered-ness check failed: {}", err),
                );
                Ok(false)
            }
        }
    }
}

fn classify_target(edge: &EdgeRecord) -> Target {
    if edge.target.properties.contains_key("actionType") {
        return Target::Action;
    }
    if edge.edge_type == EdgeType::Precedes && edge.target.has_label("Question") {
        if let Some(question_id) = edge.target.string_prop("questionId") {
            return Target::Question(question_id.to_string());
        }
    }
    Target::Other
}

fn store_error(err: GraphStoreError) -> EngineError {
    match err {
        GraphStoreError::Unavailable(msg) => EngineError::Unavailable(msg),
        other => EngineError::Internal(other.to_string()),
    }
}
