//! Fake implementations for deterministic engine tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::data::errors::GraphStoreError;
use crate::data::types::GraphValue;
use crate::traits::graph_store::{GraphStore, QueryOptions, QueryReply, Record};

/// One recorded `run_query` invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub statement: String,
    pub params: HashMap<String, GraphValue>,
}

/// Canned rows for a statement, optionally gated on one parameter value so
/// the same statement can answer differently per question or node.
struct ScriptEntry {
    param: Option<(String, GraphValue)>,
    rows: Vec<Record>,
}

/// Fake [`GraphStore`] scripted with canned rows per statement. Statements
/// not scripted return an empty result; every call is journalled so tests
/// can assert ordering and at-most-once properties.
#[derive(Default)]
pub struct ScriptedGraphStore {
    scripts: Mutex<HashMap<String, Vec<ScriptEntry>>>,
    failures: Mutex<HashMap<String, GraphStoreError>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts rows for every call of `statement`.
    pub fn add_rows(&self, statement: &str, rows: Vec<Record>) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .entry(statement.to_string())
            .or_default()
            .push(ScriptEntry { param: None, rows });
    }

    /// Scripts rows for calls of `statement` whose parameter `param` equals
    /// `value`. Keyed entries win over unkeyed ones.
    pub fn add_rows_for_param(
        &self,
        statement: &str,
        param: &str,
        value: GraphValue,
        rows: Vec<Record>,
    ) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .entry(statement.to_string())
            .or_default()
            .push(ScriptEntry {
                param: Some((param.to_string(), value)),
                rows,
            });
    }

    /// Makes every call of `statement` fail with the given error.
    pub fn fail_with(&self, statement: &str, error: GraphStoreError) {
        self.failures
            .lock()
            .expect("failures lock")
            .insert(statement.to_string(), error);
    }

    /// The full call journal.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// How many times `statement` was executed.
    pub fn calls_for(&self, statement: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|call| call.statement == statement)
            .count()
    }
}

#[async_trait]
impl GraphStore for ScriptedGraphStore {
    async fn run_query(
        &self,
        statement: &str,
        params: HashMap<String, GraphValue>,
        options: QueryOptions,
    ) -> Result<QueryReply, GraphStoreError> {
        self.calls.lock().expect("calls lock").push(RecordedCall {
            statement: statement.to_string(),
            params: params.clone(),
        });

        if let Some(error) = self.failures.lock().expect("failures lock").get(statement) {
            return Err(error.clone());
        }

        let scripts = self.scripts.lock().expect("scripts lock");
        let Some(entries) = scripts.get(statement) else {
            return Ok(QueryReply::default());
        };

        // keyed entries first, then the statement-wide fallback
        let matched = entries
            .iter()
            .find(|entry| match &entry.param {
                Some((name, value)) => params.get(name) == Some(value),
                None => false,
            })
            .or_else(|| entries.iter().find(|entry| entry.param.is_none()));

        let Some(entry) = matched else {
            return Ok(QueryReply::default());
        };
        let mut rows = entry.rows.clone();
        let truncated = rows.len() > options.row_cap;
        rows.truncate(options.row_cap);
        Ok(QueryReply { rows, truncated })
    }
}
