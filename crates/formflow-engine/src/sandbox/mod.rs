//! Restricted in-process expression evaluator
//!
//! Implements [`ScriptSandbox`] with a small expression dialect: operators,
//! membership, indexing, attribute access, literals, the builtins
//! `len`/`min`/`max`/`sum`/`sorted`, and the `re` and `datetime` modules.
//! There are no statements, no loops, no imports and no assignment, so the
//! worst a hostile expression can do is burn its own deadline; the
//! interpreter checks the deadline at every node and bails with
//! [`SandboxError::Timeout`].

mod interp;
mod lexer;
mod parser;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::data::errors::SandboxError;
use crate::data::types::GraphValue;
use crate::traits::script_sandbox::ScriptSandbox;

/// The shipped [`ScriptSandbox`] implementation.
#[derive(Debug, Clone, Default)]
pub struct RestrictedSandbox;

impl RestrictedSandbox {
    pub fn new() -> RestrictedSandbox {
        RestrictedSandbox
    }
}

impl ScriptSandbox for RestrictedSandbox {
    fn eval(
        &self,
        expression: &str,
        scope: &HashMap<String, GraphValue>,
        timeout: Duration,
    ) -> Result<GraphValue, SandboxError> {
        let deadline = Instant::now() + timeout;
        let tokens = lexer::tokenize(expression)?;
        let ast = parser::parse(tokens)?;
        let interp = interp::Interp { scope, deadline };
        interp.eval(&ast, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::GraphNode;

    fn eval(expr: &str) -> Result<GraphValue, SandboxError> {
        eval_with(expr, HashMap::new())
    }

    fn eval_with(
        expr: &str,
        scope: HashMap<String, GraphValue>,
    ) -> Result<GraphValue, SandboxError> {
        RestrictedSandbox::new().eval(expr, &scope, Duration::from_millis(500))
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), GraphValue::Int(7));
        assert_eq!(eval("10 / 4").unwrap(), GraphValue::Float(2.5));
        assert_eq!(eval("7 % 3").unwrap(), GraphValue::Int(1));
        assert_eq!(eval("-(2 + 3)").unwrap(), GraphValue::Int(-5));
        assert!(matches!(eval("1 / 0"), Err(SandboxError::Eval(_))));
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval("1 < 2 and 'a' < 'b'").unwrap(), GraphValue::Bool(true));
        assert_eq!(eval("1 == 1.0").unwrap(), GraphValue::Bool(true));
        assert_eq!(eval("not True").unwrap(), GraphValue::Bool(false));
        // short-circuit returns the deciding operand
        assert_eq!(eval("0 or 'fallback'").unwrap(), GraphValue::from("fallback"));
        assert_eq!(eval("0 and 'never'").unwrap(), GraphValue::Int(0));
    }

    #[test]
    fn test_json_rendered_literals() {
        // the template renderer substitutes JSON, so both spellings must work
        assert_eq!(eval("null == None").unwrap(), GraphValue::Bool(true));
        assert_eq!(eval("true == True").unwrap(), GraphValue::Bool(true));
        assert_eq!(eval("false == False").unwrap(), GraphValue::Bool(true));
    }

    #[test]
    fn test_membership_and_indexing() {
        assert_eq!(eval("2 in [1, 2, 3]").unwrap(), GraphValue::Bool(true));
        assert_eq!(eval("'x' not in 'abc'").unwrap(), GraphValue::Bool(true));
        assert_eq!(eval("[10, 20, 30][-1]").unwrap(), GraphValue::Int(30));
        assert_eq!(
            eval("{'a': 1}['a']").unwrap(),
            GraphValue::Int(1)
        );
        assert_eq!(eval("'abc'[1]").unwrap(), GraphValue::from("b"));
        assert!(matches!(eval("[1][5]"), Err(SandboxError::Eval(_))));
    }

    #[test]
    fn test_attribute_access_on_nodes() {
        let node = GraphValue::Node(GraphNode {
            id: 11,
            labels: vec!["Applicant".to_string()],
            properties: HashMap::from([("age".to_string(), GraphValue::Int(42))]),
        });
        let scope = HashMap::from([("applicant".to_string(), node)]);
        assert_eq!(
            eval_with("applicant.age >= 18", scope).unwrap(),
            GraphValue::Bool(true)
        );
    }

    #[test]
    fn test_builtins() {
        assert_eq!(eval("len('abc')").unwrap(), GraphValue::Int(3));
        assert_eq!(eval("len([1, 2])").unwrap(), GraphValue::Int(2));
        assert_eq!(eval("min([3, 1, 2])").unwrap(), GraphValue::Int(1));
        assert_eq!(eval("max(3, 1, 2)").unwrap(), GraphValue::Int(3));
        assert_eq!(eval("sum([1, 2, 3])").unwrap(), GraphValue::Int(6));
        assert_eq!(eval("sum([1, 0.5])").unwrap(), GraphValue::Float(1.5));
        assert_eq!(
            eval("sorted([3, 1, 2])").unwrap(),
            GraphValue::List(vec![
                GraphValue::Int(1),
                GraphValue::Int(2),
                GraphValue::Int(3)
            ])
        );
        assert!(matches!(eval("min([])"), Err(SandboxError::Eval(_))));
    }

    #[test]
    fn test_re_module() {
        assert_eq!(
            eval("re.match('[A-Z]+', 'ABC-1')").unwrap(),
            GraphValue::Bool(true)
        );
        assert_eq!(
            eval("re.match('[0-9]+', 'ABC-1')").unwrap(),
            GraphValue::Bool(false)
        );
        assert_eq!(
            eval("re.search('[0-9]+', 'ABC-1')").unwrap(),
            GraphValue::Bool(true)
        );
        assert_eq!(
            eval("re.findall('[0-9]+', 'a1b22')").unwrap(),
            GraphValue::List(vec![GraphValue::from("1"), GraphValue::from("22")])
        );
    }

    #[test]
    fn test_datetime_module() {
        assert_eq!(
            eval("datetime.year('2023-06-15')").unwrap(),
            GraphValue::Int(2023)
        );
        assert_eq!(
            eval("datetime.month('2023-06-15T10:00:00Z')").unwrap(),
            GraphValue::Int(6)
        );
        assert_eq!(
            eval("datetime.day('2023-06-15')").unwrap(),
            GraphValue::Int(15)
        );
        assert!(matches!(
            eval("len(datetime.today())").unwrap(),
            GraphValue::Int(10)
        ));
    }

    #[test]
    fn test_denied_operations() {
        assert!(matches!(eval("__import__('os')"), Err(SandboxError::Denied(_))));
        assert!(matches!(eval("x.__dict__"), Err(SandboxError::Denied(_))));
        assert!(matches!(eval("open('/etc/passwd')"), Err(SandboxError::Denied(_))));
        assert!(matches!(eval("os.getcwd()"), Err(SandboxError::Denied(_))));
        assert!(matches!(eval("eval('1')"), Err(SandboxError::Denied(_))));
    }

    #[test]
    fn test_undefined_name() {
        assert!(matches!(eval("nobody"), Err(SandboxError::Eval(_))));
    }

    #[test]
    fn test_timeout() {
        let result =
            RestrictedSandbox::new().eval("1 + 1", &HashMap::new(), Duration::from_millis(0));
        assert_eq!(result, Err(SandboxError::Timeout));
    }

    #[test]
    fn test_truthiness_pinned() {
        for (expr, expected) in [
            ("not None", true),
            ("not 0", true),
            ("not 0.0", true),
            ("not ''", true),
            ("not []", true),
            ("not {}", true),
            ("not 'x'", false),
            ("not [0]", false),
            ("not 1", false),
        ] {
            assert_eq!(
                eval(expr).unwrap(),
                GraphValue::Bool(expected),
                "for {}",
                expr
            );
        }
    }
}
