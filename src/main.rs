//! Taxonomy Service - taxonomy management over a SPARQL graph store.

mod config;
mod generator;
mod hierarchy;
mod literal;
mod sparql;
mod store;
mod taxonomy;
#[cfg(test)]
mod testing;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use config::AppConfig;
use generator::{OpenRouterGenerator, TaxonomyGenerator};
use hierarchy::Forest;
use serde::{Deserialize, Serialize};
use sparql::LiteralKind;
use std::sync::Arc;
use store::{GraphDbClient, RdfSyntax, StoreError};
use taxonomy::{LiteralChange, TaxonomyError, TaxonomyService};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    taxonomy: Arc<TaxonomyService<GraphDbClient>>,
    generator: Option<Arc<dyn TaxonomyGenerator>>,
}

type ApiError = (StatusCode, String);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "taxonomy_service=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    info!(
        "Graph store: {} (repository: {}, import graph: {:?})",
        config.store.base_url, config.store.repository, config.store.graph
    );

    let http = reqwest::Client::new();
    let gateway = GraphDbClient::new(http.clone(), &config.store);
    let taxonomy = TaxonomyService::new(
        gateway,
        config.taxonomy_base.clone(),
        config.store.graph.clone(),
    );

    let generator: Option<Arc<dyn TaxonomyGenerator>> = match &config.generator {
        Some(generator_config) => {
            info!("Taxonomy generator enabled (model: {})", generator_config.model);
            Some(Arc::new(OpenRouterGenerator::new(
                http.clone(),
                generator_config,
                &config.taxonomy_base,
            )))
        }
        None => {
            warn!("OPENROUTER_API_KEY not set; /generate_taxonomy is disabled");
            None
        }
    };

    let state = AppState {
        taxonomy: Arc::new(taxonomy),
        generator,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/taxonomy-tree", get(read_taxonomy_tree))
        .route("/clear_repository", post(clear_repository))
        .route("/import_taxonomy", post(import_taxonomy))
        .route("/export_taxonomy", get(export_taxonomy))
        .route("/generate_taxonomy", post(generate_taxonomy))
        .route("/concepts", post(create_concept).delete(delete_concept))
        .route(
            "/concepts/literals",
            post(add_literal).put(update_literal).delete(delete_literal),
        )
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CreateConceptRequest {
    name: String,
    #[serde(default)]
    parent_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreatedConcept {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct ConceptRef {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct LiteralRequest {
    uri: String,
    kind: LiteralKind,
    value: String,
    #[serde(default)]
    locale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LiteralUpdateRequest {
    uri: String,
    kind: LiteralKind,
    old_value: String,
    #[serde(default)]
    old_locale: Option<String>,
    new_value: String,
    #[serde(default)]
    new_locale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateQuery {
    #[serde(default)]
    replace: bool,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    message: String,
    triples_bytes: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Taxonomy hierarchy as a tree.
async fn read_taxonomy_tree(State(state): State<AppState>) -> Result<Json<Forest>, ApiError> {
    let forest = state.taxonomy.read_tree().await.map_err(api_error)?;
    info!("Taxonomy tree: {} root concepts", forest.len());
    Ok(Json(forest))
}

/// Wipe the repository.
async fn clear_repository(
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.taxonomy.clear_all().await.map_err(api_error)?;
    Ok(MessageResponse::new("Repository cleared"))
}

/// Import a `.ttl`, `.rdf` or `.nt` upload.
async fn import_taxonomy(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<MessageResponse>, ApiError> {
    let (filename, data) = read_upload(&mut multipart).await?;

    let syntax = RdfSyntax::from_filename(&filename).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            "Unsupported file format. Use .ttl, .rdf or .nt".to_string(),
        )
    })?;

    info!("Received taxonomy file: {} ({} bytes)", filename, data.len());

    state
        .taxonomy
        .import(data, syntax)
        .await
        .map_err(api_error)?;

    Ok(MessageResponse::new(format!(
        "Taxonomy from '{}' imported",
        filename
    )))
}

/// Serialize the whole store.
async fn export_taxonomy(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let format = query.format.as_deref().unwrap_or("ttl");
    let syntax = RdfSyntax::from_format(format).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("Unsupported export format: {}", format),
        )
    })?;

    let data = state.taxonomy.export(syntax).await.map_err(api_error)?;

    Ok((
        [
            (header::CONTENT_TYPE, syntax.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"taxonomy.{}\"", syntax.extension()),
            ),
        ],
        data,
    ))
}

async fn create_concept(
    State(state): State<AppState>,
    Json(request): Json<CreateConceptRequest>,
) -> Result<(StatusCode, Json<CreatedConcept>), ApiError> {
    let uri = state
        .taxonomy
        .create_concept(&request.name, request.parent_uri.as_deref())
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(CreatedConcept { uri })))
}

/// Delete a concept together with its subtree.
async fn delete_concept(
    State(state): State<AppState>,
    Json(request): Json<ConceptRef>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .taxonomy
        .delete_concept(&request.uri)
        .await
        .map_err(api_error)?;
    Ok(MessageResponse::new(format!("Concept {} deleted", request.uri)))
}

async fn add_literal(
    State(state): State<AppState>,
    Json(request): Json<LiteralRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .taxonomy
        .add_literal(
            &request.uri,
            request.kind,
            &request.value,
            request.locale.as_deref(),
        )
        .await
        .map_err(api_error)?;
    Ok(MessageResponse::new("Literal added"))
}

async fn delete_literal(
    State(state): State<AppState>,
    Json(request): Json<LiteralRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .taxonomy
        .delete_literal(
            &request.uri,
            request.kind,
            &request.value,
            request.locale.as_deref(),
        )
        .await
        .map_err(api_error)?;
    Ok(MessageResponse::new("Literal deleted"))
}

async fn update_literal(
    State(state): State<AppState>,
    Json(request): Json<LiteralUpdateRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let change = LiteralChange {
        kind: request.kind,
        old_value: &request.old_value,
        old_locale: request.old_locale.as_deref(),
        new_value: &request.new_value,
        new_locale: request.new_locale.as_deref(),
    };
    state
        .taxonomy
        .update_literal(&request.uri, change)
        .await
        .map_err(api_error)?;
    Ok(MessageResponse::new("Literal updated"))
}

/// Upload a corpus, have the model build a taxonomy from it and import it.
async fn generate_taxonomy(
    State(state): State<AppState>,
    Query(query): Query<GenerateQuery>,
    mut multipart: Multipart,
) -> Result<Json<GenerateResponse>, ApiError> {
    let generator = state.generator.clone().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Taxonomy generation is not configured".to_string(),
        )
    })?;

    let mut documents = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        let filename = field.file_name().unwrap_or("corpus.txt").to_string();
        let data = field.bytes().await.map_err(|e| {
            (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
        })?;

        let text = corpus_text(&filename, &data).map_err(|e| {
            (StatusCode::UNPROCESSABLE_ENTITY, format!("{}: {}", filename, e))
        })?;
        info!("Corpus document: {} ({} chars)", filename, text.chars().count());
        documents.push(text);
    }

    let corpus = documents.join("\n\n");
    if corpus.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No corpus text uploaded".to_string()));
    }

    let size = state
        .taxonomy
        .generate_and_import(generator.as_ref(), &corpus, query.replace)
        .await
        .map_err(api_error)?;

    Ok(Json(GenerateResponse {
        message: format!("Generated taxonomy imported from {} documents", documents.len()),
        triples_bytes: size,
    }))
}

// ============================================================================
// Helper functions
// ============================================================================

/// Map a taxonomy error to the response status and message.
fn api_error(err: TaxonomyError) -> ApiError {
    let status = match &err {
        TaxonomyError::Validation(_) => StatusCode::BAD_REQUEST,
        TaxonomyError::Store(StoreError::Transport(_)) => StatusCode::SERVICE_UNAVAILABLE,
        TaxonomyError::Store(_) => StatusCode::BAD_GATEWAY,
        TaxonomyError::Assembly(_) | TaxonomyError::LiteralUpdate { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        TaxonomyError::Generation(_) => StatusCode::BAD_GATEWAY,
    };
    error!("Request failed ({}): {}", status, err);
    (status, err.to_string())
}

/// Read the `file` field of a multipart upload.
async fn read_upload(multipart: &mut Multipart) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload").to_string();
            let data = field.bytes().await.map_err(|e| {
                (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
            })?;
            if data.is_empty() {
                return Err((StatusCode::BAD_REQUEST, "Uploaded file is empty".to_string()));
            }
            return Ok((filename, data.to_vec()));
        }
    }

    Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()))
}

/// Plain text of one corpus document.
fn corpus_text(filename: &str, data: &[u8]) -> anyhow::Result<String> {
    if filename.to_lowercase().ends_with(".pdf") {
        extract_pdf_text(data)
    } else {
        Ok(String::from_utf8_lossy(data).to_string())
    }
}

/// Extract text from a PDF file using lopdf.
fn extract_pdf_text(data: &[u8]) -> anyhow::Result<String> {
    use lopdf::Document;
    use std::io::Cursor;

    let doc = Document::load_from(Cursor::new(data))
        .map_err(|e| anyhow::anyhow!("Failed to load PDF: {}", e))?;

    let mut text = String::new();
    for (page_num, _) in doc.get_pages() {
        if let Ok(content) = doc.extract_text(&[page_num]) {
            text.push_str(&content);
            text.push('\n');
        }
    }

    Ok(text)
}
