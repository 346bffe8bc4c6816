//! Request entry point and response shaping
//!
//! [`FlowEngine`] is the facade the host embeds: it validates the request,
//! builds the per-request context, runs one traversal and shapes the
//! response. The engine itself is stateless; everything request-scoped lives
//! in the [`RequestContext`] and is discarded once the response is emitted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::context::{RequestContext, Warning};
use crate::data::errors::EngineError;
use crate::data::types::{GraphNode, GraphValue};
use crate::resolver::EvaluatorDefaults;
use crate::traversal::{TraversalEngine, TraversalOutcome};
use crate::traits::graph_store::GraphStore;
use crate::traits::script_sandbox::ScriptSandbox;

/// One traversal request: the starting section and the caller's input
/// parameters (everything else in the payload). The host may supply its own
/// trace id so its logs correlate with the engine's.
#[derive(Debug, Clone)]
pub struct SectionRequest {
    pub section_id: String,
    pub inputs: HashMap<String, GraphValue>,
    pub trace_id: Option<String>,
}

/// A materialised variable as reported in the response: the normalised
/// value and the evaluator's unprocessed return.
#[derive(Debug, Clone, Serialize)]
pub struct VarReport {
    pub value: serde_json::Value,
    pub raw: serde_json::Value,
}

/// The engine's response for one request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineResponse {
    pub section_id: String,
    pub question: Option<serde_json::Value>,
    pub next_section_id: Option<String>,
    pub created_node_ids: Vec<i64>,
    pub completed: bool,
    pub request_variables: serde_json::Value,
    pub source_node: Option<serde_json::Value>,
    pub vars: BTreeMap<String, VarReport>,
    pub warnings: Vec<Warning>,
    pub trace_id: String,
}

/// The public facade over the traversal core.
pub struct FlowEngine {
    traversal: TraversalEngine,
}

impl FlowEngine {
    pub fn new(graph: Arc<dyn GraphStore>, sandbox: Arc<dyn ScriptSandbox>) -> FlowEngine {
        FlowEngine {
            traversal: TraversalEngine::new(graph, sandbox),
        }
    }

    pub fn with_defaults(
        graph: Arc<dyn GraphStore>,
        sandbox: Arc<dyn ScriptSandbox>,
        defaults: EvaluatorDefaults,
    ) -> FlowEngine {
        let resolver =
            crate::resolver::VariableResolver::with_defaults(graph.clone(), sandbox, defaults);
        FlowEngine {
            traversal: TraversalEngine::with_resolver(graph, resolver),
        }
    }

    /// Runs one traversal: validates the request, resolves the section,
    /// walks the graph and shapes the response.
    #[instrument(skip(self, request), fields(section_id = %request.section_id))]
    pub async fn run_section(
        &self,
        request: SectionRequest,
    ) -> Result<EngineResponse, EngineError> {
        let trace_id = request
            .trace_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if request.section_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "sectionId must be a non-empty string".to_string(),
            ));
        }

        let section = self.traversal.resolve_section(&request.section_id).await?;
        let mut inputs = request.inputs;
        inputs
            .entry("sectionId".to_string())
            .or_insert_with(|| GraphValue::from(request.section_id.clone()));
        validate_inputs(&section, &inputs)?;

        info!(
            trace_id = %trace_id,
            section_id = %request.section_id,
            "Engine invoked"
        );

        let mut ctx = RequestContext::new(trace_id, inputs);
        let outcome = self.traversal.traverse(&section, &mut ctx).await?;

        let response = assemble_response(&request.section_id, outcome, ctx);
        info!(
            trace_id = %response.trace_id,
            completed = response.completed,
            question = response.question.is_some(),
            next_section = response.next_section_id.as_deref().unwrap_or(""),
            "Engine response"
        );
        Ok(response)
    }
}

/// Every input parameter the section declares must be present.
fn validate_inputs(
    section: &GraphNode,
    inputs: &HashMap<String, GraphValue>,
) -> Result<(), EngineError> {
    let declared = match section.properties.get("inputParams") {
        Some(GraphValue::List(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(GraphValue::String(raw)) => {
            serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
        }
        _ => Vec::new(),
    };
    let missing: Vec<String> = declared
        .into_iter()
        .filter(|name| !inputs.contains_key(name))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EngineError::InvalidRequest(format!(
            "missing input parameters: {}",
            missing.join(", ")
        )))
    }
}

fn assemble_response(
    section_id: &str,
    outcome: TraversalOutcome,
    ctx: RequestContext,
) -> EngineResponse {
    let question = match &outcome {
        TraversalOutcome::UnansweredQuestion { question } => Some(node_to_response_json(question)),
        _ => None,
    };
    let source_node = ctx.source_node().map(|value| match value.as_node() {
        Some(node) => node_to_response_json(node),
        None => value.to_json(),
    });
    let vars = ctx
        .materialized_vars()
        .iter()
        .map(|(name, cached)| {
            (
                name.clone(),
                VarReport {
                    value: cached.value.to_json(),
                    raw: cached.raw.to_json(),
                },
            )
        })
        .collect();
    let request_variables = serde_json::Value::Object(
        ctx.inputs()
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect(),
    );

    EngineResponse {
        section_id: section_id.to_string(),
        question,
        next_section_id: ctx.next_section_id().map(str::to_string),
        created_node_ids: ctx.created_node_ids().to_vec(),
        completed: ctx.completed(),
        request_variables,
        source_node,
        vars,
        warnings: ctx.warnings().to_vec(),
        trace_id: ctx.trace_id().to_string(),
    }
}

/// Nodes serialise flat for clients: every property at the top level plus
/// `id` and `labels`, so `question.questionId` works without indirection.
fn node_to_response_json(node: &GraphNode) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    for (key, value) in &node.properties {
        obj.insert(key.clone(), value.to_json());
    }
    obj.insert("id".to_string(), serde_json::json!(node.id));
    obj.insert("labels".to_string(), serde_json::json!(node.labels));
    serde_json::Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section_with_inputs(raw: GraphValue) -> GraphNode {
        GraphNode {
            id: 1,
            labels: vec!["Section".to_string()],
            properties: HashMap::from([("inputParams".to_string(), raw)]),
        }
    }

    #[test]
    fn test_validate_inputs_accepts_complete_set() {
        let section = section_with_inputs(GraphValue::List(vec![
            GraphValue::from("applicationId"),
            GraphValue::from("applicantId"),
        ]));
        let inputs = HashMap::from([
            ("applicationId".to_string(), GraphValue::from("A1")),
            ("applicantId".to_string(), GraphValue::from("P1")),
        ]);
        assert!(validate_inputs(&section, &inputs).is_ok());
    }

    #[test]
    fn test_validate_inputs_reports_missing() {
        let section =
            section_with_inputs(GraphValue::from(r#"["applicationId", "applicantId"]"#));
        let inputs = HashMap::from([("applicationId".to_string(), GraphValue::from("A1"))]);
        let err = validate_inputs(&section, &inputs).unwrap_err();
        match err {
            EngineError::InvalidRequest(msg) => assert!(msg.contains("applicantId")),
            other => panic!("expected InvalidRequest, got {:?}", other),
        }
    }

    #[test]
    fn test_node_response_shape_is_flat() {
        let node = GraphNode {
            id: 9,
            labels: vec!["Question".to_string()],
            properties: HashMap::from([
                ("questionId".to_string(), GraphValue::from("Q_FN")),
                ("prompt".to_string(), GraphValue::from("First name?")),
            ]),
        };
        let json = node_to_response_json(&node);
        assert_eq!(json["questionId"], serde_json::json!("Q_FN"));
        assert_eq!(json["prompt"], serde_json::json!("First name?"));
        assert_eq!(json["id"], serde_json::json!(9));
        assert_eq!(json["labels"], serde_json::json!(["Question"]));
    }
}
