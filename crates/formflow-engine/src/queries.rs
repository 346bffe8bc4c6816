//! The engine's fixed Cypher statements
//!
//! Latest-active version resolution happens inside the queries rather than
//! in application code, so historic versions never reach the traversal.

/// Resolves the latest active version of a section by external id.
pub const LATEST_ACTIVE_SECTION: &str = "\
MATCH (s:Section {sectionId: $sectionId})
WHERE coalesce(s.active, true)
RETURN s AS section
ORDER BY coalesce(s.versionNumber, 0) DESC
LIMIT 1";

/// Enumerates the traversable edges of a node, sorted by `orderInForm`
/// (legacy schemas spelled it `order`) with creation order as the tiebreak.
/// Inactive targets are filtered here so superseded versions are invisible.
pub const OUTGOING_EDGES: &str = "\
MATCH (n) WHERE id(n) = $nodeId
MATCH (n)-[e]->(t)
WHERE type(e) IN ['PRECEDES', 'TRIGGERS'] AND coalesce(t.active, true)
RETURN type(e) AS edgeType, id(e) AS edgeId,
       e.orderInForm AS orderInForm, e.askWhen AS askWhen,
       e.sourceNode AS sourceNode, e.variables AS variables,
       t AS target
ORDER BY coalesce(e.orderInForm, e.order), id(e)";

/// The canonical answered-ness check: does a datapoint supplied by the
/// source answer this question?
pub const QUESTION_ANSWERED: &str = "\
MATCH (src) WHERE id(src) = $sourceId
MATCH (src)-[:SUPPLIES]->(:Datapoint)-[:ANSWERS]->(q {questionId: $questionId})
RETURN q LIMIT 1";
