//! Lazy variable resolution and evaluator dispatch
//!
//! Variables are evaluated at most once per request: the first template
//! lookup that needs one renders its body, dispatches to the graph store or
//! the sandbox under the definition's timeout, and caches the result. Any
//! recoverable failure caches `null` and appends a warning; only store
//! unavailability escapes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;

use crate::context::RequestContext;
use crate::data::entities::{classify_expression, strip_evaluator_prefix, Evaluator, VariableDef};
use crate::data::errors::{EngineError, GraphStoreError, SandboxError};
use crate::data::types::GraphValue;
use crate::template::{Rendered, TemplatePath, TemplateRenderer};
use crate::traits::graph_store::{GraphStore, QueryOptions, QueryReply};
use crate::traits::script_sandbox::ScriptSandbox;

/// Timeouts and caps applied when a definition does not override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatorDefaults {
    /// Per-variable evaluation budget.
    pub variable_timeout: Duration,
    /// Budget for ad-hoc evaluations embedded in predicates and source-node
    /// expressions.
    pub adhoc_timeout: Duration,
    /// Row ceiling for evaluator queries.
    pub row_cap: usize,
}

impl Default for EvaluatorDefaults {
    fn default() -> Self {
        EvaluatorDefaults {
            variable_timeout: Duration::from_millis(500),
            adhoc_timeout: Duration::from_millis(1500),
            row_cap: QueryOptions::DEFAULT_ROW_CAP,
        }
    }
}

/// An evaluator result before and after normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated {
    pub raw: GraphValue,
    pub value: GraphValue,
}

impl Evaluated {
    fn from_raw(raw: GraphValue) -> Evaluated {
        let value = json_parse_if_possible(&raw);
        Evaluated { raw, value }
    }
}

/// A recoverable evaluator failure; everything except `Unavailable` turns
/// into a warning at the call site.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum EvalFailure {
    #[error("evaluator timeout exceeded")]
    Timeout,
    #[error("forbidden operation: {0}")]
    Denied(String),
    #[error("{0}")]
    Failed(String),
    #[error("graph database unavailable: {0}")]
    Unavailable(String),
}

impl From<GraphStoreError> for EvalFailure {
    fn from(err: GraphStoreError) -> Self {
        match err {
            GraphStoreError::Timeout => EvalFailure::Timeout,
            GraphStoreError::Query(msg) => EvalFailure::Failed(format!("query failed: {}", msg)),
            GraphStoreError::Unavailable(msg) => EvalFailure::Unavailable(msg),
        }
    }
}

impl From<SandboxError> for EvalFailure {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Timeout => EvalFailure::Timeout,
            SandboxError::Denied(msg) => EvalFailure::Denied(msg),
            SandboxError::Eval(msg) => EvalFailure::Failed(msg),
        }
    }
}

impl From<EngineError> for EvalFailure {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Unavailable(msg) => EvalFailure::Unavailable(msg),
            other => EvalFailure::Failed(other.to_string()),
        }
    }
}

/// If the value is a string containing valid JSON, returns the parsed form.
pub fn json_parse_if_possible(value: &GraphValue) -> GraphValue {
    if let GraphValue::String(s) = value {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(s) {
            return GraphValue::from_json(&json);
        }
    }
    match value {
        GraphValue::List(items) => {
            GraphValue::List(items.iter().map(json_parse_if_possible).collect())
        }
        GraphValue::Map(map) => GraphValue::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), json_parse_if_possible(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolves named variables and ad-hoc expressions against the request
/// context.
pub struct VariableResolver {
    graph: Arc<dyn GraphStore>,
    sandbox: Arc<dyn ScriptSandbox>,
    renderer: TemplateRenderer,
    defaults: EvaluatorDefaults,
}

impl VariableResolver {
    pub fn new(graph: Arc<dyn GraphStore>, sandbox: Arc<dyn ScriptSandbox>) -> VariableResolver {
        Self::with_defaults(graph, sandbox, EvaluatorDefaults::default())
    }

    pub fn with_defaults(
        graph: Arc<dyn GraphStore>,
        sandbox: Arc<dyn ScriptSandbox>,
        defaults: EvaluatorDefaults,
    ) -> VariableResolver {
        VariableResolver {
            graph,
            sandbox,
            renderer: TemplateRenderer::new(),
            defaults,
        }
    }

    pub fn defaults(&self) -> &EvaluatorDefaults {
        &self.defaults
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    /// Template lookup chain: variable cache, then lazily-evaluated
    /// definitions in scope, then input parameters, then reserved names.
    pub fn lookup_path<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        path: &'a TemplatePath,
    ) -> BoxFuture<'a, Result<Option<GraphValue>, EngineError>> {
        async move {
            let root = path.root().to_string();
            let root_value = if let Some(cached) = ctx.cached(&root) {
                Some(cached.value.clone())
            } else if ctx.find_definition(&root).is_some() {
                Some(self.resolve_variable(ctx, &root).await?)
            } else if let Some(input) = ctx.input(&root) {
                Some(input.clone())
            } else {
                ctx.reserved(&root)
            };
            Ok(root_value.and_then(|value| path.walk(&value)))
        }
        .boxed()
    }

    /// Returns the variable's value, evaluating and caching its definition
    /// on first use. Unknown names resolve to `null` without caching.
    pub fn resolve_variable<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        name: &'a str,
    ) -> BoxFuture<'a, Result<GraphValue, EngineError>> {
        async move {
            if let Some(cached) = ctx.cached(name) {
                return Ok(cached.value.clone());
            }
            let Some(def) = ctx.find_definition(name).cloned() else {
                return Ok(GraphValue::Null);
            };
            if !ctx.begin_eval(name) {
                ctx.warn(name, "variable definition refers to itself");
                return Ok(GraphValue::Null);
            }
            let result = self.eval_definition(ctx, &def).await;
            ctx.end_eval(name);
            match result {
                Ok(evaluated) => {
                    ctx.cache_var(name, evaluated.raw, evaluated.value.clone());
                    Ok(evaluated.value)
                }
                Err(EvalFailure::Unavailable(msg)) => Err(EngineError::Unavailable(msg)),
                Err(failure) => {
                    ctx.warn(name, failure.to_string());
                    ctx.cache_var(name, GraphValue::Null, GraphValue::Null);
                    Ok(GraphValue::Null)
                }
            }
        }
        .boxed()
    }

    async fn eval_definition(
        &self,
        ctx: &mut RequestContext,
        def: &VariableDef,
    ) -> Result<Evaluated, EvalFailure> {
        let timeout = def
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.defaults.variable_timeout);
        let Some((evaluator, body)) = def.evaluator() else {
            return Err(EvalFailure::Failed(
                "definition has no expression body".to_string(),
            ));
        };
        let body = body.to_string();
        match evaluator {
            Evaluator::Cypher => self.eval_cypher(ctx, &body, timeout, &def.name).await,
            Evaluator::Python => self.eval_python(ctx, &body, timeout).await,
        }
    }

    /// Renders every placeholder in `text`, lazily materialising variables
    /// the placeholders refer to. Unresolvable paths render `null` and
    /// append a warning.
    pub async fn render(
        &self,
        ctx: &mut RequestContext,
        text: &str,
    ) -> Result<Rendered, EngineError> {
        let paths = self.renderer.placeholder_paths(text);
        let mut resolved: HashMap<String, Option<GraphValue>> = HashMap::new();
        for path in &paths {
            if resolved.contains_key(&path.raw) {
                continue;
            }
            let value = if path.segments.is_empty() {
                None
            } else {
                self.lookup_path(ctx, path).await?
            };
            resolved.insert(path.raw.clone(), value);
        }
        let rendered = self
            .renderer
            .render(text, |path| resolved.get(&path.raw).cloned().flatten());
        for missing in &rendered.missing {
            ctx.warn(
                missing.clone(),
                format!("no value for template path '{}'", missing),
            );
        }
        Ok(rendered)
    }

    async fn run_cypher(
        &self,
        ctx: &mut RequestContext,
        body: &str,
        timeout: Duration,
        label: &str,
    ) -> Result<QueryReply, EvalFailure> {
        let rendered = self.render(ctx, body).await.map_err(EvalFailure::from)?;
        let statement = strip_evaluator_prefix(&rendered.text).to_string();
        let params = self.query_params(ctx);
        let options = QueryOptions {
            timeout,
            row_cap: self.defaults.row_cap,
        };
        let reply = self
            .graph
            .run_query(&statement, params, options)
            .await
            .map_err(EvalFailure::from)?;
        if reply.truncated {
            ctx.warn(
                label,
                format!("query result truncated at {} rows", self.defaults.row_cap),
            );
        }
        Ok(reply)
    }

    async fn eval_cypher(
        &self,
        ctx: &mut RequestContext,
        body: &str,
        timeout: Duration,
        label: &str,
    ) -> Result<Evaluated, EvalFailure> {
        let reply = self.run_cypher(ctx, body, timeout, label).await?;
        Ok(shape_cypher_result(reply.rows))
    }

    async fn eval_python(
        &self,
        ctx: &mut RequestContext,
        body: &str,
        timeout: Duration,
    ) -> Result<Evaluated, EvalFailure> {
        let rendered = self.render(ctx, body).await.map_err(EvalFailure::from)?;
        let expression = strip_evaluator_prefix(&rendered.text).to_string();
        let scope = self.sandbox_scope(ctx);
        let raw = self
            .sandbox
            .eval(&expression, &scope, timeout)
            .map_err(EvalFailure::from)?;
        Ok(Evaluated::from_raw(raw))
    }

    /// Evaluates an `askWhen` predicate. Absent or empty predicates are
    /// true; a `cypher:` predicate is truthy when the query returns at least
    /// one row; otherwise sandbox truthiness applies. Recoverable failures
    /// make the predicate false.
    pub async fn eval_predicate(
        &self,
        ctx: &mut RequestContext,
        expr: Option<&str>,
    ) -> Result<bool, EngineError> {
        let Some(expr) = expr else { return Ok(true) };
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Ok(true);
        }
        let (evaluator, body) = classify_expression(trimmed, Evaluator::Python);
        let timeout = self.defaults.adhoc_timeout;
        let outcome = match evaluator {
            Evaluator::Cypher => self
                .run_cypher(ctx, body, timeout, "askWhen")
                .await
                .map(|reply| !reply.rows.is_empty()),
            Evaluator::Python => self
                .eval_python(ctx, body, timeout)
                .await
                .map(|evaluated| evaluated.value.is_truthy()),
        };
        match outcome {
            Ok(truthy) => Ok(truthy),
            Err(EvalFailure::Unavailable(msg)) => Err(EngineError::Unavailable(msg)),
            Err(failure) => {
                ctx.warn(
                    "askWhen",
                    format!("askWhen evaluation failed, treated as false: {}", failure),
                );
                Ok(false)
            }
        }
    }

    /// Evaluates a `sourceNode` expression: `cypher:`/`python:` dispatch or
    /// a bare `{{ variable }}` reference. `Ok(None)` means the expression
    /// failed (a warning was appended); a resolved `null` is `Ok(Some)`.
    pub async fn eval_source_expr(
        &self,
        ctx: &mut RequestContext,
        expr: &str,
    ) -> Result<Option<GraphValue>, EngineError> {
        let trimmed = expr.trim();
        let lower = trimmed.to_ascii_lowercase();
        let outcome: Result<GraphValue, EvalFailure> = if lower.starts_with("cypher:") {
            self.eval_cypher(ctx, trimmed, self.defaults.adhoc_timeout, "sourceNode")
                .await
                .map(|evaluated| evaluated.value)
        } else if lower.starts_with("python:") {
            self.eval_python(ctx, trimmed, self.defaults.adhoc_timeout)
                .await
                .map(|evaluated| evaluated.value)
        } else if let Some(path) = bare_template_path(trimmed) {
            match self.lookup_path(ctx, &path).await {
                Ok(value) => Ok(value.unwrap_or(GraphValue::Null)),
                Err(err) => Err(EvalFailure::from(err)),
            }
        } else {
            Err(EvalFailure::Failed(format!(
                "unrecognised sourceNode expression '{}'",
                trimmed
            )))
        };
        match outcome {
            Ok(value) => Ok(Some(value)),
            Err(EvalFailure::Unavailable(msg)) => Err(EngineError::Unavailable(msg)),
            Err(failure) => {
                ctx.warn("sourceNode", failure.to_string());
                Ok(None)
            }
        }
    }

    /// Parameters forwarded to evaluator queries: the request inputs plus
    /// every already-materialised variable. The adapter skips values the
    /// driver cannot bind.
    pub fn query_params(&self, ctx: &RequestContext) -> HashMap<String, GraphValue> {
        let mut params = ctx.inputs().clone();
        for (name, cached) in ctx.materialized_vars() {
            params.insert(name.clone(), cached.value.clone());
        }
        params
    }

    /// The value map sandbox expressions evaluate against.
    pub fn sandbox_scope(&self, ctx: &RequestContext) -> HashMap<String, GraphValue> {
        let mut scope = HashMap::new();
        for name in ["sourceNode", "createdNodeIds"] {
            if let Some(value) = ctx.reserved(name) {
                scope.insert(name.to_string(), value);
            }
        }
        for (name, value) in ctx.inputs() {
            scope.insert(name.clone(), value.clone());
        }
        for (name, cached) in ctx.materialized_vars() {
            scope.insert(name.clone(), cached.value.clone());
        }
        scope
    }
}

/// Collapses a query result the way the evaluator contract promises: no
/// rows is `null`, a single row with a single column is that value, anything
/// else is the list of row maps. String values that parse as JSON are
/// replaced by the parsed form.
fn shape_cypher_result(rows: Vec<HashMap<String, GraphValue>>) -> Evaluated {
    if rows.is_empty() {
        return Evaluated {
            raw: GraphValue::Null,
            value: GraphValue::Null,
        };
    }
    if rows.len() == 1 && rows[0].len() == 1 {
        let single = rows
            .into_iter()
            .next()
            .and_then(|row| row.into_values().next())
            .unwrap_or(GraphValue::Null);
        return Evaluated::from_raw(single);
    }
    let raw = GraphValue::List(rows.into_iter().map(GraphValue::Map).collect());
    Evaluated::from_raw(raw)
}

/// Accepts exactly one `{{ path }}` placeholder spanning the whole string.
fn bare_template_path(expr: &str) -> Option<TemplatePath> {
    let inner = expr.strip_prefix("{{")?.strip_suffix("}}")?;
    TemplatePath::parse(inner.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ScopeKind;
    use crate::sandbox::RestrictedSandbox;
    use crate::test_utils::fakes::ScriptedGraphStore;

    fn resolver(store: Arc<ScriptedGraphStore>) -> VariableResolver {
        VariableResolver::new(store, Arc::new(RestrictedSandbox::new()))
    }

    fn python_def(name: &str, body: &str) -> VariableDef {
        VariableDef {
            name: name.to_string(),
            cypher: None,
            python: Some(body.to_string()),
            timeout_ms: None,
        }
    }

    fn cypher_def(name: &str, body: &str) -> VariableDef {
        VariableDef {
            name: name.to_string(),
            cypher: Some(body.to_string()),
            python: None,
            timeout_ms: None,
        }
    }

    #[tokio::test]
    async fn test_variable_evaluated_once() {
        let store = Arc::new(ScriptedGraphStore::new());
        store.add_rows(
            "RETURN 41 + 1 AS answer",
            vec![HashMap::from([(
                "answer".to_string(),
                GraphValue::Int(42),
            )])],
        );
        let resolver = resolver(store.clone());
        let mut ctx = RequestContext::new("t", HashMap::new());
        ctx.push_scope(
            ScopeKind::Section,
            vec![cypher_def("answer", "RETURN 41 + 1 AS answer")],
        );

        for _ in 0..3 {
            let value = resolver.resolve_variable(&mut ctx, "answer").await.unwrap();
            assert_eq!(value, GraphValue::Int(42));
        }
        assert_eq!(store.calls_for("RETURN 41 + 1 AS answer"), 1);
    }

    #[tokio::test]
    async fn test_failure_caches_null_and_warns() {
        let store = Arc::new(ScriptedGraphStore::new());
        store.fail_with("RETURN slow", GraphStoreError::Timeout);
        let resolver = resolver(store.clone());
        let mut ctx = RequestContext::new("t", HashMap::new());
        ctx.push_scope(ScopeKind::Section, vec![cypher_def("slow", "RETURN slow")]);

        let value = resolver.resolve_variable(&mut ctx, "slow").await.unwrap();
        assert_eq!(value, GraphValue::Null);
        assert_eq!(ctx.warnings().len(), 1);
        assert_eq!(ctx.warnings()[0].variable, "slow");
        assert!(ctx.warnings()[0].message.contains("timeout"));

        // cached null, no second store call
        let again = resolver.resolve_variable(&mut ctx, "slow").await.unwrap();
        assert_eq!(again, GraphValue::Null);
        assert_eq!(store.calls_for("RETURN slow"), 1);
        assert_eq!(ctx.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_json_string_results_are_parsed() {
        let store = Arc::new(ScriptedGraphStore::new());
        store.add_rows(
            "RETURN s.flags AS flags",
            vec![HashMap::from([(
                "flags".to_string(),
                GraphValue::from("[1, 2]"),
            )])],
        );
        let resolver = resolver(store);
        let mut ctx = RequestContext::new("t", HashMap::new());
        ctx.push_scope(
            ScopeKind::Section,
            vec![cypher_def("flags", "RETURN s.flags AS flags")],
        );

        let value = resolver.resolve_variable(&mut ctx, "flags").await.unwrap();
        assert_eq!(
            value,
            GraphValue::List(vec![GraphValue::Int(1), GraphValue::Int(2)])
        );
        let cached = ctx.cached("flags").unwrap();
        assert_eq!(cached.raw, GraphValue::from("[1, 2]"));
    }

    #[tokio::test]
    async fn test_variables_shadow_inputs_in_templates() {
        let store = Arc::new(ScriptedGraphStore::new());
        let resolver = resolver(store);
        let inputs = HashMap::from([("name".to_string(), GraphValue::from("input"))]);
        let mut ctx = RequestContext::new("t", inputs);
        ctx.push_scope(ScopeKind::Section, vec![python_def("name", "'variable'")]);

        let rendered = resolver.render(&mut ctx, "{{ name }}").await.unwrap();
        assert_eq!(rendered.text, "\"variable\"");
    }

    #[tokio::test]
    async fn test_predicate_defaults_and_failures() {
        let store = Arc::new(ScriptedGraphStore::new());
        let resolver = resolver(store);
        let mut ctx = RequestContext::new("t", HashMap::new());

        assert!(resolver.eval_predicate(&mut ctx, None).await.unwrap());
        assert!(resolver.eval_predicate(&mut ctx, Some("  ")).await.unwrap());
        assert!(resolver
            .eval_predicate(&mut ctx, Some("python: 1 == 1"))
            .await
            .unwrap());
        // broken expression is a warning, not a match
        assert!(!resolver
            .eval_predicate(&mut ctx, Some("python: 1 +"))
            .await
            .unwrap());
        assert_eq!(ctx.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_cypher_predicate_truthy_on_rows() {
        let store = Arc::new(ScriptedGraphStore::new());
        store.add_rows(
            "MATCH (n) RETURN n LIMIT 1",
            vec![HashMap::from([("n".to_string(), GraphValue::Int(1))])],
        );
        let resolver = resolver(store);
        let mut ctx = RequestContext::new("t", HashMap::new());
        assert!(resolver
            .eval_predicate(&mut ctx, Some("cypher: MATCH (n) RETURN n LIMIT 1"))
            .await
            .unwrap());
        assert!(!resolver
            .eval_predicate(&mut ctx, Some("cypher: MATCH (m) RETURN m LIMIT 1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_source_expr_template_reference() {
        let store = Arc::new(ScriptedGraphStore::new());
        let resolver = resolver(store);
        let inputs = HashMap::from([("anchor".to_string(), GraphValue::from("A1"))]);
        let mut ctx = RequestContext::new("t", inputs);

        let resolved = resolver
            .eval_source_expr(&mut ctx, "{{ anchor }}")
            .await
            .unwrap();
        assert_eq!(resolved, Some(GraphValue::from("A1")));

        let failed = resolver
            .eval_source_expr(&mut ctx, "just text")
            .await
            .unwrap();
        assert_eq!(failed, None);
        assert_eq!(ctx.warnings().len(), 1);
    }

    #[test]
    fn test_shape_cypher_result() {
        assert_eq!(shape_cypher_result(vec![]).value, GraphValue::Null);

        let single = shape_cypher_result(vec![HashMap::from([(
            "v".to_string(),
            GraphValue::from("7"),
        )])]);
        assert_eq!(single.raw, GraphValue::from("7"));
        assert_eq!(single.value, GraphValue::Int(7));

        let multi = shape_cypher_result(vec![
            HashMap::from([("v".to_string(), GraphValue::Int(1))]),
            HashMap::from([("v".to_string(), GraphValue::Int(2))]),
        ]);
        assert!(matches!(multi.value, GraphValue::List(ref items) if items.len() == 2));
    }
}
