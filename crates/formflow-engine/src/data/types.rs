//! Value types shared between the graph store, the sandbox and the renderer

use std::collections::HashMap;
use std::fmt;

/// A node returned by the graph store, copied by value so repeated visits
/// never share mutable state.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    /// Internal graph id of the vertex
    pub id: i64,
    /// Vertex labels, e.g. `["Question"]`
    pub labels: Vec<String>,
    /// Vertex properties
    pub properties: HashMap<String, GraphValue>,
}

impl GraphNode {
    /// Returns a string property by name.
    pub fn string_prop(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(GraphValue::as_str)
    }

    /// Returns true if the node carries the given label.
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Tagged value variant covering everything the engine moves between the
/// graph store, the template renderer and the sandbox.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<GraphValue>),
    Map(HashMap<String, GraphValue>),
    Node(GraphNode),
}

impl GraphValue {
    /// Builds a value from a JSON document. Integral numbers become `Int`,
    /// everything else maps one to one.
    pub fn from_json(value: &serde_json::Value) -> GraphValue {
        match value {
            serde_json::Value::Null => GraphValue::Null,
            serde_json::Value::Bool(b) => GraphValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    GraphValue::Int(i)
                } else {
                    GraphValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => GraphValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                GraphValue::List(items.iter().map(GraphValue::from_json).collect())
            }
            serde_json::Value::Object(map) => GraphValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), GraphValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts the value to JSON. Nodes serialise as
    /// `{ "id": …, "labels": […], "properties": {…} }`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            GraphValue::Null => serde_json::Value::Null,
            GraphValue::Bool(b) => serde_json::Value::Bool(*b),
            GraphValue::Int(i) => serde_json::json!(i),
            GraphValue::Float(f) => serde_json::json!(f),
            GraphValue::String(s) => serde_json::Value::String(s.clone()),
            GraphValue::List(items) => {
                serde_json::Value::Array(items.iter().map(GraphValue::to_json).collect())
            }
            GraphValue::Map(map) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in map {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
            GraphValue::Node(node) => {
                let mut props = serde_json::Map::new();
                for (k, v) in &node.properties {
                    props.insert(k.clone(), v.to_json());
                }
                serde_json::json!({
                    "id": node.id,
                    "labels": node.labels,
                    "properties": serde_json::Value::Object(props),
                })
            }
        }
    }

    /// Renders the value as a JSON literal suitable for textual substitution
    /// into a query or expression.
    pub fn to_json_literal(&self) -> String {
        self.to_json().to_string()
    }

    /// Truthiness as pinned by the conformance tests: `null`, `false`, zero,
    /// the empty string and empty collections are false; everything else,
    /// including nodes, is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            GraphValue::Null => false,
            GraphValue::Bool(b) => *b,
            GraphValue::Int(i) => *i != 0,
            GraphValue::Float(f) => *f != 0.0,
            GraphValue::String(s) => !s.is_empty(),
            GraphValue::List(items) => !items.is_empty(),
            GraphValue::Map(map) => !map.is_empty(),
            GraphValue::Node(_) => true,
        }
    }

    /// Keyed access. Maps look up the key directly; nodes collapse the
    /// implicit `properties` indirection, with `id` and `labels` reachable
    /// as pseudo-keys.
    pub fn get_key(&self, key: &str) -> Option<GraphValue> {
        match self {
            GraphValue::Map(map) => map.get(key).cloned(),
            GraphValue::Node(node) => {
                if let Some(v) = node.properties.get(key) {
                    return Some(v.clone());
                }
                match key {
                    "id" => Some(GraphValue::Int(node.id)),
                    "labels" => Some(GraphValue::List(
                        node.labels
                            .iter()
                            .map(|l| GraphValue::String(l.clone()))
                            .collect(),
                    )),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Indexed access into lists.
    pub fn get_index(&self, index: usize) -> Option<GraphValue> {
        match self {
            GraphValue::List(items) => items.get(index).cloned(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GraphValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            GraphValue::Int(i) => Some(*i),
            GraphValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            GraphValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&GraphNode> {
        match self {
            GraphValue::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, GraphValue::Null)
    }
}

impl fmt::Display for GraphValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphValue::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for GraphValue {
    fn from(s: &str) -> Self {
        GraphValue::String(s.to_string())
    }
}

impl From<String> for GraphValue {
    fn from(s: String) -> Self {
        GraphValue::String(s)
    }
}

impl From<i64> for GraphValue {
    fn from(i: i64) -> Self {
        GraphValue::Int(i)
    }
}

impl From<bool> for GraphValue {
    fn from(b: bool) -> Self {
        GraphValue::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node() -> GraphNode {
        GraphNode {
            id: 7,
            labels: vec!["Question".to_string()],
            properties: HashMap::from([
                ("questionId".to_string(), GraphValue::from("Q1")),
                ("orderInForm".to_string(), GraphValue::Int(10)),
            ]),
        }
    }

    #[test]
    fn test_json_round_trip() {
        let value = GraphValue::from_json(&json!({
            "name": "first",
            "count": 3,
            "ratio": 0.5,
            "tags": ["a", "b"],
            "none": null
        }));
        assert_eq!(value.get_key("count"), Some(GraphValue::Int(3)));
        assert_eq!(value.get_key("ratio"), Some(GraphValue::Float(0.5)));
        assert_eq!(
            value.get_key("tags").and_then(|t| t.get_index(1)),
            Some(GraphValue::from("b"))
        );
        assert_eq!(value.to_json()["name"], json!("first"));
    }

    #[test]
    fn test_node_property_collapse() {
        let value = GraphValue::Node(node());
        assert_eq!(value.get_key("questionId"), Some(GraphValue::from("Q1")));
        assert_eq!(value.get_key("id"), Some(GraphValue::Int(7)));
        assert_eq!(value.get_key("missing"), None);
    }

    #[test]
    fn test_node_json_shape() {
        let json = GraphValue::Node(node()).to_json();
        assert_eq!(json["id"], json!(7));
        assert_eq!(json["labels"], json!(["Question"]));
        assert_eq!(json["properties"]["questionId"], json!("Q1"));
    }

    #[test]
    fn test_truthiness_conformance() {
        assert!(!GraphValue::Null.is_truthy());
        assert!(!GraphValue::Bool(false).is_truthy());
        assert!(!GraphValue::Int(0).is_truthy());
        assert!(!GraphValue::Float(0.0).is_truthy());
        assert!(!GraphValue::String(String::new()).is_truthy());
        assert!(!GraphValue::List(vec![]).is_truthy());
        assert!(!GraphValue::Map(HashMap::new()).is_truthy());

        assert!(GraphValue::Bool(true).is_truthy());
        assert!(GraphValue::Int(-1).is_truthy());
        assert!(GraphValue::String("x".to_string()).is_truthy());
        assert!(GraphValue::List(vec![GraphValue::Null]).is_truthy());
        assert!(GraphValue::Node(node()).is_truthy());
    }

    #[test]
    fn test_json_literal() {
        assert_eq!(GraphValue::Null.to_json_literal(), "null");
        assert_eq!(GraphValue::from("a\"b").to_json_literal(), "\"a\\\"b\"");
        assert_eq!(GraphValue::Int(42).to_json_literal(), "42");
    }
}
