//! Graph store gateway.
//!
//! [`StoreGateway`] is the seam between the taxonomy logic and the triple
//! store; [`GraphDbClient`] implements it over the RDF4J / GraphDB REST API.
//! No retries, pooling or transactions are layered on top of the transport.

use std::collections::HashMap;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::StoreConfig;

/// One solution of a SELECT query: variable name -> lexical value.
pub type QueryRow = HashMap<String, String>;

const SPARQL_QUERY: &str = "application/sparql-query";
const SPARQL_UPDATE: &str = "application/sparql-update";
const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("graph store unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("graph store rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected graph store response: {0}")]
    Decode(String),
}

/// RDF serializations accepted for import and produced on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdfSyntax {
    Turtle,
    RdfXml,
    NTriples,
}

impl RdfSyntax {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Turtle => "text/turtle",
            Self::RdfXml => "application/rdf+xml",
            Self::NTriples => "application/n-triples",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Turtle => "ttl",
            Self::RdfXml => "rdf",
            Self::NTriples => "nt",
        }
    }

    /// Pick the syntax from an uploaded file name.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        Self::from_format(ext)
    }

    /// Parse an export format name (`ttl`, `rdf`, `nt`, ...).
    pub fn from_format(format: &str) -> Option<Self> {
        match format.to_ascii_lowercase().as_str() {
            "ttl" | "turtle" => Some(Self::Turtle),
            "rdf" | "xml" | "owl" | "rdfxml" => Some(Self::RdfXml),
            "nt" | "ntriples" => Some(Self::NTriples),
            _ => None,
        }
    }
}

/// Read, update and bulk transfer against one repository.
#[async_trait::async_trait]
pub trait StoreGateway: Send + Sync {
    async fn execute_read(&self, query: &str) -> Result<Vec<QueryRow>, StoreError>;

    async fn execute_update(&self, statement: &str) -> Result<(), StoreError>;

    async fn import_bulk(
        &self,
        data: Vec<u8>,
        syntax: RdfSyntax,
        target_graph: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn export_all(&self, syntax: RdfSyntax) -> Result<Vec<u8>, StoreError>;
}

/// GraphDB (RDF4J protocol) client.
#[derive(Clone)]
pub struct GraphDbClient {
    client: Client,
    query_endpoint: String,
    statements_endpoint: String,
}

impl GraphDbClient {
    pub fn new(client: Client, config: &StoreConfig) -> Self {
        let base = config.base_url.trim_end_matches('/');
        let query_endpoint = format!("{}/repositories/{}", base, config.repository);
        let statements_endpoint = format!("{}/statements", query_endpoint);

        Self {
            client,
            query_endpoint,
            statements_endpoint,
        }
    }

    fn read_request(&self, query: &str) -> RequestBuilder {
        self.client
            .post(&self.query_endpoint)
            .header(CONTENT_TYPE, SPARQL_QUERY)
            .header(ACCEPT, SPARQL_RESULTS_JSON)
            .body(query.to_string())
    }

    fn import_request(
        &self,
        data: Vec<u8>,
        syntax: RdfSyntax,
        target_graph: Option<&str>,
    ) -> RequestBuilder {
        let mut request = self
            .client
            .post(&self.statements_endpoint)
            .header(CONTENT_TYPE, syntax.content_type());
        if let Some(graph) = target_graph {
            request = request.query(&[("context", format!("<{}>", graph))]);
        }
        request.body(data)
    }

    /// Explicit statements only; inferred and axiomatic triples stay behind.
    fn export_request(&self, syntax: RdfSyntax) -> RequestBuilder {
        self.client
            .get(&self.statements_endpoint)
            .query(&[("infer", "false")])
            .header(ACCEPT, syntax.content_type())
    }
}

#[async_trait::async_trait]
impl StoreGateway for GraphDbClient {
    async fn execute_read(&self, query: &str) -> Result<Vec<QueryRow>, StoreError> {
        debug!("SPARQL query:\n{}", query);

        let response = self.read_request(query).send().await?;

        let response = ensure_success(response).await?;
        let body = response.text().await?;
        let rows = parse_select_results(&body)?;

        debug!("SPARQL query returned {} rows", rows.len());
        Ok(rows)
    }

    async fn execute_update(&self, statement: &str) -> Result<(), StoreError> {
        debug!("SPARQL update:\n{}", statement);

        let response = self
            .client
            .post(&self.statements_endpoint)
            .header(CONTENT_TYPE, SPARQL_UPDATE)
            .body(statement.to_string())
            .send()
            .await?;

        ensure_success(response).await?;
        Ok(())
    }

    async fn import_bulk(
        &self,
        data: Vec<u8>,
        syntax: RdfSyntax,
        target_graph: Option<&str>,
    ) -> Result<(), StoreError> {
        info!(
            "Importing {} bytes of {} into {}",
            data.len(),
            syntax.content_type(),
            target_graph.unwrap_or("the default graph")
        );

        let response = self.import_request(data, syntax, target_graph).send().await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn export_all(&self, syntax: RdfSyntax) -> Result<Vec<u8>, StoreError> {
        let response = self.export_request(syntax).send().await?;

        let response = ensure_success(response).await?;
        let bytes = response.bytes().await?;

        info!("Exported {} bytes as {}", bytes.len(), syntax.content_type());
        Ok(bytes.to_vec())
    }
}

/// Map a non-2xx response to [`StoreError::Rejected`] with its body attached.
async fn ensure_success(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Rejected {
        status: status.as_u16(),
        body,
    })
}

// ============================================================================
// SPARQL JSON results
// ============================================================================

#[derive(Debug, Deserialize)]
struct SelectResults {
    results: SelectBindings,
}

#[derive(Debug, Deserialize)]
struct SelectBindings {
    bindings: Vec<HashMap<String, BoundTerm>>,
}

#[derive(Debug, Deserialize)]
struct BoundTerm {
    value: String,
}

/// Flatten `application/sparql-results+json` into lexical-value rows.
pub fn parse_select_results(body: &str) -> Result<Vec<QueryRow>, StoreError> {
    let results: SelectResults = serde_json::from_str(body)
        .map_err(|e| StoreError::Decode(format!("invalid SPARQL JSON results: {}", e)))?;

    Ok(results
        .results
        .bindings
        .into_iter()
        .map(|binding| {
            binding
                .into_iter()
                .map(|(var, term)| (var, term.value))
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_select_results() {
        let body = r#"{
            "head": {"vars": ["class", "subClass", "classLabels"]},
            "results": {"bindings": [
                {
                    "class": {"type": "uri", "value": "http://ex.org/taxonomy/A"},
                    "subClass": {"type": "uri", "value": "http://ex.org/taxonomy/B"},
                    "classLabels": {"type": "literal", "value": "A|en"}
                },
                {
                    "class": {"type": "uri", "value": "http://ex.org/taxonomy/B"},
                    "classLabels": {"type": "literal", "value": ""}
                }
            ]}
        }"#;

        let rows = parse_select_results(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["subClass"], "http://ex.org/taxonomy/B");
        assert_eq!(rows[0]["classLabels"], "A|en");
        assert!(!rows[1].contains_key("subClass"));
    }

    #[test]
    fn test_parse_select_results_rejects_garbage() {
        let err = parse_select_results("<html>oops</html>").unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn test_syntax_from_filename() {
        assert_eq!(RdfSyntax::from_filename("animals.ttl"), Some(RdfSyntax::Turtle));
        assert_eq!(RdfSyntax::from_filename("Animals.RDF"), Some(RdfSyntax::RdfXml));
        assert_eq!(RdfSyntax::from_filename("dump.nt"), Some(RdfSyntax::NTriples));
        assert_eq!(RdfSyntax::from_filename("notes.txt"), None);
        assert_eq!(RdfSyntax::from_filename("ttl"), None);
    }

    fn client() -> GraphDbClient {
        let config = StoreConfig {
            base_url: "http://localhost:7200/".to_string(),
            repository: "animals".to_string(),
            graph: None,
        };
        GraphDbClient::new(Client::new(), &config)
    }

    #[test]
    fn test_read_request() {
        let request = client().read_request("SELECT * WHERE { ?s ?p ?o }").build().unwrap();

        assert_eq!(
            request.url().as_str(),
            "http://localhost:7200/repositories/animals"
        );
        assert_eq!(request.headers()[CONTENT_TYPE], SPARQL_QUERY);
        assert_eq!(request.headers()[ACCEPT], SPARQL_RESULTS_JSON);
    }

    #[test]
    fn test_export_request_excludes_inferred_statements() {
        let request = client().export_request(RdfSyntax::Turtle).build().unwrap();

        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(
            request.url().as_str(),
            "http://localhost:7200/repositories/animals/statements?infer=false"
        );
        assert_eq!(request.headers()[ACCEPT], "text/turtle");
    }

    #[test]
    fn test_import_request_targets_context() {
        let request = client()
            .import_request(b"<a> <b> <c> .".to_vec(), RdfSyntax::NTriples, Some("http://ex.org/g"))
            .build()
            .unwrap();

        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/repositories/animals/statements");
        let pairs: Vec<(String, String)> = request.url().query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("context".to_string(), "<http://ex.org/g>".to_string())]);
        assert_eq!(request.headers()[CONTENT_TYPE], "application/n-triples");
    }

    #[test]
    fn test_import_request_default_graph() {
        let request = client()
            .import_request(Vec::new(), RdfSyntax::Turtle, None)
            .build()
            .unwrap();
        assert_eq!(request.url().query(), None);
    }
}
