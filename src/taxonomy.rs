//! Taxonomy operations over a [`StoreGateway`].
//!
//! Reads run the hierarchy query and assemble the forest; writes build the
//! statements with [`crate::sparql`] and execute them one at a time. Nothing
//! here locks or retries: concurrent callers interleave at the store.

use std::fmt;

use thiserror::Error;
use tracing::{info, warn};

use crate::generator::TaxonomyGenerator;
use crate::hierarchy::{build_forest, AssemblyError, Forest, RelationRow};
use crate::sparql::{self, LiteralKind, ValidationError};
use crate::store::{RdfSyntax, StoreError, StoreGateway};

/// Step of a literal update that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStep {
    Delete,
    Insert,
}

impl fmt::Display for UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delete => write!(f, "delete"),
            Self::Insert => write!(f, "insert"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    /// A failure at `Insert` leaves the old literal deleted and the new one
    /// missing; no rollback is attempted.
    #[error("literal update failed at the {step} step: {source}")]
    LiteralUpdate {
        step: UpdateStep,
        #[source]
        source: StoreError,
    },

    #[error("taxonomy generation failed: {0:#}")]
    Generation(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TaxonomyError>;

/// Replacement for an existing literal.
#[derive(Debug, Clone)]
pub struct LiteralChange<'a> {
    pub kind: LiteralKind,
    pub old_value: &'a str,
    pub old_locale: Option<&'a str>,
    pub new_value: &'a str,
    pub new_locale: Option<&'a str>,
}

pub struct TaxonomyService<G> {
    gateway: G,
    taxonomy_base: String,
    import_graph: Option<String>,
}

impl<G: StoreGateway> TaxonomyService<G> {
    pub fn new(gateway: G, taxonomy_base: impl Into<String>, import_graph: Option<String>) -> Self {
        Self {
            gateway,
            taxonomy_base: taxonomy_base.into(),
            import_graph,
        }
    }

    #[allow(dead_code)]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// `{base}/{name}`, with the name taken verbatim.
    pub fn concept_uri(&self, name: &str) -> Result<String> {
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        let uri = format!("{}/{}", self.taxonomy_base, name);
        if !sparql::is_valid_iri(&uri) {
            return Err(ValidationError::InvalidIri(uri).into());
        }
        Ok(uri)
    }

    /// Read the current snapshot and assemble it into a forest.
    pub async fn read_tree(&self) -> Result<Forest> {
        let rows = self
            .gateway
            .execute_read(&sparql::taxonomy_hierarchy())
            .await?;

        let relations: Vec<RelationRow> = rows
            .iter()
            .filter_map(|row| {
                let relation = RelationRow::from_query_row(row);
                if relation.is_none() {
                    warn!("Skipping hierarchy row without a class binding: {:?}", row);
                }
                relation
            })
            .collect();

        Ok(build_forest(&relations)?)
    }

    /// Create a concept named `name`, under `parent_uri` when given.
    /// Returns the new concept's uri.
    pub async fn create_concept(&self, name: &str, parent_uri: Option<&str>) -> Result<String> {
        let uri = self.concept_uri(name)?;
        let statement = match parent_uri {
            Some(parent) => sparql::create_subconcept(&uri, parent)?,
            None => sparql::create_top_concept(&uri)?,
        };
        self.gateway.execute_update(&statement).await?;

        info!("Created concept {} (parent: {:?})", uri, parent_uri);
        Ok(uri)
    }

    /// Delete a concept, its whole subtree and every parent reference to it.
    pub async fn delete_concept(&self, uri: &str) -> Result<()> {
        let statement = sparql::delete_concept_subtree(uri)?;
        self.gateway.execute_update(&statement).await?;
        info!("Deleted concept subtree rooted at {}", uri);
        Ok(())
    }

    pub async fn add_literal(
        &self,
        uri: &str,
        kind: LiteralKind,
        value: &str,
        locale: Option<&str>,
    ) -> Result<()> {
        let statement = sparql::add_literal(uri, kind, value, locale)?;
        self.gateway.execute_update(&statement).await?;
        Ok(())
    }

    /// Deleting a literal that does not exist succeeds.
    pub async fn delete_literal(
        &self,
        uri: &str,
        kind: LiteralKind,
        value: &str,
        locale: Option<&str>,
    ) -> Result<()> {
        let statement = sparql::delete_literal(uri, kind, value, locale)?;
        self.gateway.execute_update(&statement).await?;
        Ok(())
    }

    /// Delete the old literal, then insert the new one. Not atomic.
    pub async fn update_literal(&self, uri: &str, change: LiteralChange<'_>) -> Result<()> {
        let update = sparql::update_literal(
            uri,
            change.kind,
            change.old_value,
            change.old_locale,
            change.new_value,
            change.new_locale,
        )?;

        self.gateway
            .execute_update(&update.delete)
            .await
            .map_err(|source| TaxonomyError::LiteralUpdate {
                step: UpdateStep::Delete,
                source,
            })?;

        if let Err(source) = self.gateway.execute_update(&update.insert).await {
            warn!(
                "Literal {:?} of {} was deleted but its replacement could not be inserted",
                change.old_value, uri
            );
            return Err(TaxonomyError::LiteralUpdate {
                step: UpdateStep::Insert,
                source,
            });
        }
        Ok(())
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.gateway.execute_update(&sparql::clear_all()).await?;
        info!("Cleared graph store");
        Ok(())
    }

    pub async fn import(&self, data: Vec<u8>, syntax: RdfSyntax) -> Result<()> {
        self.gateway
            .import_bulk(data, syntax, self.import_graph.as_deref())
            .await?;
        Ok(())
    }

    pub async fn export(&self, syntax: RdfSyntax) -> Result<Vec<u8>> {
        Ok(self.gateway.export_all(syntax).await?)
    }

    /// Generate a taxonomy from `corpus` and import it as Turtle.
    ///
    /// With `replace`, the store is cleared once generation has succeeded.
    /// Returns the size of the imported document.
    pub async fn generate_and_import(
        &self,
        generator: &dyn TaxonomyGenerator,
        corpus: &str,
        replace: bool,
    ) -> Result<usize> {
        let turtle = generator
            .generate(corpus)
            .await
            .map_err(TaxonomyError::Generation)?;

        if replace {
            self.clear_all().await?;
        }

        let size = turtle.len();
        self.import(turtle.into_bytes(), RdfSyntax::Turtle).await?;
        info!("Imported generated taxonomy ({} bytes)", size);
        Ok(size)
    }
}
