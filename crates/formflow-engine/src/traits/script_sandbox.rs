//! ScriptSandbox trait definition

use std::collections::HashMap;
use std::time::Duration;

use crate::data::errors::SandboxError;
use crate::data::types::GraphValue;

/// Evaluates a restricted expression dialect against a value map.
///
/// The dialect allows arithmetic, comparison, membership and indexing,
/// attribute/key access, literals, the builtins `len`/`min`/`max`/`sum`/
/// `sorted`, and a whitelisted regular-expression and date/time module.
/// File, network and process access, imports and dunder names are rejected
/// with [`SandboxError::Denied`]. A runaway expression must not block its
/// caller for longer than `timeout` plus a small epsilon.
pub trait ScriptSandbox: Send + Sync {
    fn eval(
        &self,
        expression: &str,
        scope: &HashMap<String, GraphValue>,
        timeout: Duration,
    ) -> Result<GraphValue, SandboxError>;
}
