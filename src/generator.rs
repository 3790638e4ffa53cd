//! Corpus-to-taxonomy generation through the OpenRouter chat API.
//!
//! The model is asked for a Turtle document only; [`extract_turtle`] strips
//! whatever prose or markdown fencing it wraps the document in anyway.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::GeneratorConfig;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Anything that turns a text corpus into a serialized Turtle graph.
#[async_trait::async_trait]
pub trait TaxonomyGenerator: Send + Sync {
    async fn generate(&self, corpus: &str) -> Result<String>;
}

/// OpenRouter client for taxonomy generation.
#[derive(Clone)]
pub struct OpenRouterGenerator {
    client: Client,
    api_key: String,
    model: String,
    max_output_chars: usize,
    taxonomy_base: String,
}

impl OpenRouterGenerator {
    pub fn new(client: Client, config: &GeneratorConfig, taxonomy_base: &str) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_output_chars: config.max_output_chars,
            taxonomy_base: taxonomy_base.to_string(),
        }
    }

    /// Send a chat completion request and return the first choice's text.
    async fn chat(&self, messages: Vec<Message>) -> Result<String> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(65536),
        };

        debug!("Sending request to OpenRouter: model={}", request.model);

        let response = self
            .client
            .post(OPENROUTER_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to OpenRouter")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenRouter API error ({}): {}", status, error_text);
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse OpenRouter response")?;

        if let Some(usage) = &response.usage {
            info!(
                "OpenRouter response: {} tokens (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(content)
    }
}

#[async_trait::async_trait]
impl TaxonomyGenerator for OpenRouterGenerator {
    async fn generate(&self, corpus: &str) -> Result<String> {
        info!(
            "Generating taxonomy with {} (corpus: {} chars)",
            self.model,
            corpus.chars().count()
        );

        let messages = vec![
            Message::system(build_prompt(&self.taxonomy_base)),
            Message::user(format!(
                "--- START OF CORPUS ---\n{}\n--- END OF CORPUS ---\n\nYour answer (Turtle only):",
                corpus
            )),
        ];

        let response = self.chat(messages).await?;
        if response.trim().is_empty() {
            anyhow::bail!("Model returned no content (request may have been blocked)");
        }
        if response.len() >= self.max_output_chars {
            warn!(
                "Model response might have been truncated ({} chars, limit {})",
                response.len(),
                self.max_output_chars
            );
        }

        let turtle = extract_turtle(&response)?;
        debug!("Generated taxonomy:\n{}", turtle);
        Ok(turtle)
    }
}

fn build_prompt(taxonomy_base: &str) -> String {
    format!(
        r#"You are an expert in ontologies and natural language processing. Analyse the corpus provided by the user and build a hierarchical taxonomy of the concepts it describes.

Requirements:
1. Format: strictly Turtle (TTL).
2. Prefixes: use exactly these prefixes:
   @prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .
   @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
   @prefix owl: <http://www.w3.org/2002/07/owl#> .
   @prefix xsd: <http://www.w3.org/2001/XMLSchema#> .
   @prefix ex: <{taxonomy_base}/> .
3. Structure:
   * Every concept is an instance of `rdfs:Class`.
   * Use `rdfs:subClassOf` for the hierarchy; every concept has at most one parent.
   * Every concept has an `rdfs:label` in Ukrainian (`@uk`) and English (`@en`).
   * Every concept has an `rdfs:comment` in Ukrainian (`@uk`) and English (`@en`) briefly describing it.
   * Never use the character `|` inside labels or comments.
4. Hierarchy: 2-4 levels deep, with general top-level concepts and more specific subclasses.
5. Quality: capture the key entities, notions, processes and roles of the text; avoid concepts that are too generic or too specific to form a hierarchy.
6. Answer with Turtle ONLY: no explanations, no markdown. Start directly with `@prefix`.

Example concept:
ex:SomeConceptName
    a rdfs:Class ;
    rdfs:subClassOf ex:SomeParentConcept ;
    rdfs:label "Назва концепту"@uk ;
    rdfs:label "Concept Name"@en ;
    rdfs:comment "Короткий опис концепту."@uk ;
    rdfs:comment "Short description of the concept."@en ."#
    )
}

/// Cut the Turtle document out of a model response.
///
/// The document starts at the first `@prefix`; a closing markdown fence ends
/// it. A response with no `@prefix` at all is rejected.
pub fn extract_turtle(response: &str) -> Result<String> {
    let text = response.trim();

    let start = match text.find("@prefix") {
        Some(start) => start,
        None => {
            let preview: String = text.chars().take(500).collect();
            error!("Model response has no @prefix: {}", preview);
            anyhow::bail!("Model response is not Turtle (no @prefix found)");
        }
    };
    if start > 0 {
        warn!("Model response did not start with @prefix; trimming {} leading bytes", start);
    }

    let mut turtle = &text[start..];
    if let Some(fence) = turtle.find("\n```") {
        warn!("Found markdown fence at byte {}; truncating response", fence);
        turtle = &turtle[..fence];
    }

    let turtle = turtle.trim();
    if turtle.is_empty() {
        anyhow::bail!("No Turtle data left after cleaning the model response");
    }
    Ok(turtle.to_string())
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: Role,
    content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    System,
    User,
}

impl Message {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: &str = "@prefix ex: <http://ex.org/taxonomy/> .\nex:A a <http://www.w3.org/2000/01/rdf-schema#Class> .";

    #[test]
    fn test_extract_clean_response() {
        assert_eq!(extract_turtle(TTL).unwrap(), TTL);
    }

    #[test]
    fn test_extract_fenced_response() {
        let response = format!("Here is your taxonomy:\n```turtle\n{}\n```\nEnjoy!", TTL);
        assert_eq!(extract_turtle(&response).unwrap(), TTL);
    }

    #[test]
    fn test_extract_rejects_prose() {
        assert!(extract_turtle("I cannot help with that.").is_err());
        assert!(extract_turtle("").is_err());
    }

    #[test]
    fn test_prompt_uses_taxonomy_base() {
        let prompt = build_prompt("http://ex.org/taxonomy");
        assert!(prompt.contains("@prefix ex: <http://ex.org/taxonomy/> ."));
    }

    #[test]
    fn test_request_serialization() {
        let request = ChatCompletionRequest {
            model: "m".to_string(),
            messages: vec![Message::system("s"), Message::user("u")],
            max_tokens: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "m",
                "messages": [
                    {"role": "system", "content": "s"},
                    {"role": "user", "content": "u"}
                ]
            })
        );
    }
}
