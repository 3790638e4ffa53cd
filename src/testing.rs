//! Store gateways for tests: an in-memory oxigraph store that evaluates the
//! generated SPARQL, and a recording fake with scripted failures.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::sync::Mutex;

use oxigraph::model::Term;
use oxigraph::sparql::{QueryResults, SparqlEvaluator};
use oxigraph::store::Store;

use crate::store::{QueryRow, RdfSyntax, StoreError, StoreGateway};

fn rejected(e: impl Display) -> StoreError {
    StoreError::Rejected {
        status: 400,
        body: e.to_string(),
    }
}

fn term_value(term: &Term) -> String {
    match term {
        Term::NamedNode(node) => node.as_str().to_string(),
        Term::BlankNode(node) => node.as_str().to_string(),
        Term::Literal(literal) => literal.value().to_string(),
        #[allow(unreachable_patterns)]
        other => other.to_string(),
    }
}

/// Gateway over an in-memory oxigraph store.
///
/// Bulk import accepts N-Triples only (it is replayed as `INSERT DATA`) and
/// ignores the target graph; export always produces N-Triples.
pub struct OxigraphGateway {
    store: Store,
}

impl OxigraphGateway {
    pub fn new() -> Self {
        Self {
            store: Store::new().unwrap(),
        }
    }

    fn evaluate(&self, query: &str) -> Result<QueryResults<'static>, StoreError> {
        SparqlEvaluator::new()
            .parse_query(query)
            .map_err(rejected)?
            .on_store(&self.store)
            .execute()
            .map_err(rejected)
    }

    /// Every stored triple in N-Triples form.
    pub fn triples(&self) -> BTreeSet<String> {
        let mut triples = BTreeSet::new();
        if let QueryResults::Graph(iter) = self
            .evaluate("CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o }")
            .unwrap()
        {
            for triple in iter {
                triples.insert(triple.unwrap().to_string());
            }
        }
        triples
    }

    /// Insert raw N-Triples / SPARQL triple patterns directly.
    pub fn insert(&self, triples: &str) {
        self.store
            .update(format!("INSERT DATA {{ {} }}", triples).as_str())
            .unwrap();
    }
}

#[async_trait::async_trait]
impl StoreGateway for OxigraphGateway {
    async fn execute_read(&self, query: &str) -> Result<Vec<QueryRow>, StoreError> {
        match self.evaluate(query)? {
            QueryResults::Solutions(solutions) => {
                let mut rows = Vec::new();
                for solution in solutions {
                    let solution = solution.map_err(rejected)?;
                    let row: QueryRow = solution
                        .iter()
                        .map(|(var, term)| (var.as_str().to_string(), term_value(term)))
                        .collect();
                    rows.push(row);
                }
                Ok(rows)
            }
            _ => Err(StoreError::Decode("expected SELECT solutions".to_string())),
        }
    }

    async fn execute_update(&self, statement: &str) -> Result<(), StoreError> {
        self.store.update(statement).map_err(rejected)
    }

    async fn import_bulk(
        &self,
        data: Vec<u8>,
        _syntax: RdfSyntax,
        _target_graph: Option<&str>,
    ) -> Result<(), StoreError> {
        let text = String::from_utf8(data).map_err(rejected)?;
        self.store
            .update(format!("INSERT DATA {{\n{}\n}}", text).as_str())
            .map_err(rejected)
    }

    async fn export_all(&self, _syntax: RdfSyntax) -> Result<Vec<u8>, StoreError> {
        let mut out = String::new();
        for triple in self.triples() {
            out.push_str(&triple);
            out.push_str(" .\n");
        }
        Ok(out.into_bytes())
    }
}

/// Records every call; can be told to reject the n-th update (0-based).
#[derive(Default)]
pub struct RecordingGateway {
    pub rows: Vec<QueryRow>,
    pub fail_update_at: Option<usize>,
    pub updates: Mutex<Vec<String>>,
    pub imports: Mutex<Vec<(String, RdfSyntax, Option<String>)>>,
}

impl RecordingGateway {
    pub fn updates(&self) -> Vec<String> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl StoreGateway for RecordingGateway {
    async fn execute_read(&self, _query: &str) -> Result<Vec<QueryRow>, StoreError> {
        Ok(self.rows.clone())
    }

    async fn execute_update(&self, statement: &str) -> Result<(), StoreError> {
        let mut updates = self.updates.lock().unwrap();
        if self.fail_update_at == Some(updates.len()) {
            return Err(StoreError::Rejected {
                status: 500,
                body: "scripted failure".to_string(),
            });
        }
        updates.push(statement.to_string());
        Ok(())
    }

    async fn import_bulk(
        &self,
        data: Vec<u8>,
        syntax: RdfSyntax,
        target_graph: Option<&str>,
    ) -> Result<(), StoreError> {
        self.imports.lock().unwrap().push((
            String::from_utf8_lossy(&data).into_owned(),
            syntax,
            target_graph.map(str::to_string),
        ));
        Ok(())
    }

    async fn export_all(&self, _syntax: RdfSyntax) -> Result<Vec<u8>, StoreError> {
        Ok(Vec::new())
    }
}
