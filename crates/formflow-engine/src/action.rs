//! Action execution
//!
//! Actions are vertices with an `actionType` property and a query body.
//! Their side effects land in the request context; whether traversal stops
//! or continues afterwards is governed by `returnImmediately` (default
//! true). A query error inside an action body is surfaced rather than
//! downgraded, because action side effects are meant to be observable.

use tracing::{debug, warn};

use crate::context::{RequestContext, ScopeKind};
use crate::data::entities::{parse_variable_defs, ActionType};
use crate::data::errors::{EngineError, GraphStoreError};
use crate::data::types::{GraphNode, GraphValue};
use crate::resolver::VariableResolver;
use crate::traits::graph_store::QueryOptions;

/// Whether traversal stops at the action or continues past it.
#[derive(Debug, Clone)]
pub(crate) enum ActionDisposition {
    Return {
        action_type: Option<ActionType>,
        action_id: String,
    },
    Continue,
}

pub(crate) async fn execute_action(
    action: &GraphNode,
    ctx: &mut RequestContext,
    resolver: &VariableResolver,
) -> Result<ActionDisposition, EngineError> {
    let action_id = action
        .string_prop("actionId")
        .unwrap_or("<unidentified>")
        .to_string();
    let return_immediately = action
        .properties
        .get("returnImmediately")
        .and_then(GraphValue::as_bool)
        .unwrap_or(true);

    ctx.push_scope(
        ScopeKind::Node,
        parse_variable_defs(action.properties.get("variables")),
    );

    // an action-level sourceNode replaces the current source before the body
    // runs; on failure the warning is already appended and the slot is kept
    if let Some(expr) = action.string_prop("sourceNode") {
        if let Some(value) = resolver.eval_source_expr(ctx, expr).await? {
            ctx.set_source_node(value);
        }
    }

    let action_type = action
        .string_prop("actionType")
        .and_then(ActionType::from_name);

    match action_type {
        Some(ActionType::CreatePropertyNode) => {
            let created = run_action_body(action, &action_id, ctx, resolver)
                .await?
                .unwrap_or_default();
            let ids: Vec<i64> = created
                .iter()
                .flat_map(|row| row.get("createdId").and_then(GraphValue::as_i64))
                .collect();
            debug!(action_id = %action_id, created = ids.len(), "Property nodes created");
            ctx.record_created(ids);
        }
        Some(ActionType::GotoSection) => {
            if let Some(next) = action.string_prop("nextSectionId") {
                let rendered = resolver.render(ctx, next).await?;
                ctx.set_next_section_id(rendered.text.trim_matches('"'));
            } else {
                ctx.warn(action_id.as_str(), "GotoSection action has no nextSectionId");
            }
        }
        Some(ActionType::MarkSectionComplete) => {
            // completion is only signalled when the body actually ran
            if run_action_body(action, &action_id, ctx, resolver)
                .await?
                .is_some()
            {
                ctx.set_completed();
            }
        }
        None => {
            let unknown = action.string_prop("actionType").unwrap_or("<missing>");
            warn!(action_id = %action_id, action_type = %unknown, "Unknown action type ignored");
            let message = format!("unknown action type '{}' ignored", unknown);
            ctx.warn(action_id.as_str(), message);
            return Ok(ActionDisposition::Return {
                action_type: None,
                action_id,
            });
        }
    }

    if return_immediately {
        Ok(ActionDisposition::Return {
            action_type,
            action_id,
        })
    } else {
        Ok(ActionDisposition::Continue)
    }
}

/// Renders and runs the action's query body. Returns `None` when the body
/// did not run: it was missing, or it timed out (a warning, not an error).
/// A query error is surfaced.
async fn run_action_body(
    action: &GraphNode,
    action_id: &str,
    ctx: &mut RequestContext,
    resolver: &VariableResolver,
) -> Result<Option<Vec<std::collections::HashMap<String, GraphValue>>>, EngineError> {
    let Some(body) = action.string_prop("cypher") else {
        ctx.warn(action_id, "action has no query body");
        return Ok(None);
    };
    let rendered = resolver.render(ctx, body).await?;
    let statement = crate::data::entities::strip_evaluator_prefix(&rendered.text).to_string();
    let params = resolver.query_params(ctx);
    let options = QueryOptions {
        timeout: resolver.defaults().adhoc_timeout,
        row_cap: resolver.defaults().row_cap,
    };
    match resolver.graph().run_query(&statement, params, options).await {
        Ok(reply) => {
            if reply.truncated {
                ctx.warn(
                    action_id,
                    format!("query result truncated at {} rows", options.row_cap),
                );
            }
            Ok(Some(reply.rows))
        }
        Err(GraphStoreError::Timeout) => {
            ctx.warn(action_id, "action body timeout, side effects skipped");
            Ok(None)
        }
        Err(GraphStoreError::Query(message)) => Err(EngineError::ActionFailed {
            action_id: action_id.to_string(),
            message,
        }),
        Err(GraphStoreError::Unavailable(msg)) => Err(EngineError::Unavailable(msg)),
    }
}
