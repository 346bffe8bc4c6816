//! GraphStore trait definition for graph database interaction

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::data::errors::GraphStoreError;
use crate::data::types::GraphValue;

/// One result row: column name to value.
pub type Record = HashMap<String, GraphValue>;

/// Per-call execution limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Hard deadline for the call; expiry yields [`GraphStoreError::Timeout`].
    pub timeout: Duration,
    /// Hard ceiling on returned rows; excess rows are dropped and the reply
    /// is flagged as truncated.
    pub row_cap: usize,
}

impl QueryOptions {
    /// Default ceiling on rows returned per query.
    pub const DEFAULT_ROW_CAP: usize = 100;

    /// Options with the given deadline and the default row cap.
    pub fn with_timeout(timeout: Duration) -> QueryOptions {
        QueryOptions {
            timeout,
            row_cap: Self::DEFAULT_ROW_CAP,
        }
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            timeout: Duration::from_millis(1500),
            row_cap: Self::DEFAULT_ROW_CAP,
        }
    }
}

/// The outcome of a successful query.
#[derive(Debug, Clone, Default)]
pub struct QueryReply {
    pub rows: Vec<Record>,
    /// True when the row cap truncated the result. Truncation is not an
    /// error; callers surface it as a warning.
    pub truncated: bool,
}

/// Interface to the schema/data graph. Each call is an independent
/// transaction; the engine never spans a traversal with one.
///
/// Implementations enforce the row cap and the per-call timeout, and must
/// return nodes by value so repeated visits never share mutable state.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Executes a parameterised statement and returns the mapped rows.
    async fn run_query(
        &self,
        statement: &str,
        params: HashMap<String, GraphValue>,
        options: QueryOptions,
    ) -> Result<QueryReply, GraphStoreError>;
}
