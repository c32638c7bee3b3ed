//! SPARQL 1.1 JSON results envelope.
//!
//! `{"head":{"vars":[..]},"results":{"bindings":[{var: term}]}}`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// RDF term kinds as they appear in the `type` member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TermKind {
    Uri,
    Literal,
    /// Emitted by older Virtuoso releases (DBpedia) for datatyped literals.
    TypedLiteral,
    Bnode,
}

/// One bound value in a result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RdfTerm {
    #[serde(rename = "type")]
    pub kind: TermKind,
    pub value: String,
    #[serde(rename = "xml:lang", default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

impl RdfTerm {
    pub fn is_uri(&self) -> bool {
        self.kind == TermKind::Uri
    }
}

/// One result row: variable name to term. Unbound variables are absent.
pub type Binding = BTreeMap<String, RdfTerm>;

// `head` is not needed: unbound variables are simply absent from a row.
#[derive(Debug, Deserialize)]
struct SparqlResults {
    results: Results,
}

#[derive(Debug, Deserialize)]
struct Results {
    bindings: Vec<Binding>,
}

/// Parse a results document into its rows.
///
/// Errors carry a short description; the caller wraps them into an
/// endpoint failure.
pub fn parse_results(body: &str) -> Result<Vec<Binding>, String> {
    serde_json::from_str::<SparqlResults>(body)
        .map(|doc| doc.results.bindings)
        .map_err(|e| format!("malformed results envelope: {e}"))
}
