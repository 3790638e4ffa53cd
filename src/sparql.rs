//! SPARQL text for the taxonomy: the hierarchy read query and the update
//! statements that mutate it.
//!
//! Every value is escaped and every IRI / language tag validated before it
//! is embedded; nothing from a request reaches the statement text verbatim.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const PREFIXES: &str = "PREFIX rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#>
PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>
";

/// Result variables of [`taxonomy_hierarchy`].
pub mod vars {
    pub const CLASS: &str = "class";
    pub const CLASS_LABELS: &str = "classLabels";
    pub const CLASS_DEFINITIONS: &str = "classDefinitions";
    pub const SUB_CLASS: &str = "subClass";
    pub const SUB_CLASS_LABELS: &str = "subClassLabels";
    pub const SUB_CLASS_DEFINITIONS: &str = "subClassDefinitions";
}

/// Input rejected before any statement is built.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid IRI: {0:?}")]
    InvalidIri(String),

    #[error("invalid language tag: {0:?}")]
    InvalidLocale(String),

    #[error("literal value must not be empty")]
    EmptyValue,

    #[error("concept name must not be empty")]
    EmptyName,
}

/// Which literal of a concept is being edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiteralKind {
    Label,
    Definition,
}

impl LiteralKind {
    fn predicate(self) -> &'static str {
        match self {
            Self::Label => "rdfs:label",
            Self::Definition => "rdfs:comment",
        }
    }
}

/// The two statements making up a literal update, executed in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralUpdate {
    pub delete: String,
    pub insert: String,
}

/// One row per (class, direct subclass) pair, with labels and definitions
/// aggregated into `value|locale||...` blobs.
///
/// Self-edges are dropped, and so are edges that skip an intermediate class,
/// since stores running RDFS inference materialise the transitive closure.
pub fn taxonomy_hierarchy() -> String {
    format!(
        r#"{PREFIXES}
SELECT ?class ?subClass
    (GROUP_CONCAT(DISTINCT ?classLabel; SEPARATOR="||") AS ?classLabels)
    (GROUP_CONCAT(DISTINCT ?classComment; SEPARATOR="||") AS ?classDefinitions)
    (GROUP_CONCAT(DISTINCT ?subClassLabel; SEPARATOR="||") AS ?subClassLabels)
    (GROUP_CONCAT(DISTINCT ?subClassComment; SEPARATOR="||") AS ?subClassDefinitions)
WHERE {{
  ?class a rdfs:Class .
  OPTIONAL {{ ?class rdfs:label ?cl . BIND(CONCAT(STR(?cl), "|", LANG(?cl)) AS ?classLabel) }}
  OPTIONAL {{ ?class rdfs:comment ?cc . BIND(CONCAT(STR(?cc), "|", LANG(?cc)) AS ?classComment) }}
  OPTIONAL {{
    ?subClass rdfs:subClassOf ?class .
    FILTER (?subClass != ?class)
    FILTER NOT EXISTS {{
      ?mid rdfs:subClassOf ?class .
      ?subClass rdfs:subClassOf ?mid .
      FILTER (?mid != ?class && ?mid != ?subClass)
    }}
    OPTIONAL {{ ?subClass rdfs:label ?sl . BIND(CONCAT(STR(?sl), "|", LANG(?sl)) AS ?subClassLabel) }}
    OPTIONAL {{ ?subClass rdfs:comment ?sc . BIND(CONCAT(STR(?sc), "|", LANG(?sc)) AS ?subClassComment) }}
  }}
}}
GROUP BY ?class ?subClass
ORDER BY ?class ?subClass
"#
    )
}

/// Wipe every graph in the repository.
pub fn clear_all() -> String {
    "CLEAR ALL".to_string()
}

pub fn create_top_concept(uri: &str) -> Result<String, ValidationError> {
    let uri = iri(uri)?;
    Ok(format!("{PREFIXES}INSERT DATA {{\n  {uri} a rdfs:Class .\n}}"))
}

/// Concept type and parent edge in a single statement.
pub fn create_subconcept(uri: &str, parent_uri: &str) -> Result<String, ValidationError> {
    let uri = iri(uri)?;
    let parent = iri(parent_uri)?;
    Ok(format!(
        "{PREFIXES}INSERT DATA {{\n  {uri} a rdfs:Class ;\n    rdfs:subClassOf {parent} .\n}}"
    ))
}

/// Remove a concept with its whole `rdfs:subClassOf*` closure.
///
/// Deletes every triple whose subject is in the closure and every
/// `rdfs:subClassOf` triple pointing at a member, so no parent reference to
/// a removed concept survives. The closure is evaluated by the store.
pub fn delete_concept_subtree(uri: &str) -> Result<String, ValidationError> {
    let uri = iri(uri)?;
    Ok(format!(
        r#"{PREFIXES}DELETE {{
  ?member ?p ?o .
  ?referrer rdfs:subClassOf ?member .
}}
WHERE {{
  ?member rdfs:subClassOf* {uri} .
  {{ ?member ?p ?o }}
  UNION
  {{ ?referrer rdfs:subClassOf ?member }}
}}"#
    ))
}

pub fn add_literal(
    uri: &str,
    kind: LiteralKind,
    value: &str,
    locale: Option<&str>,
) -> Result<String, ValidationError> {
    let triple = literal_triple(uri, kind, value, locale)?;
    Ok(format!("{PREFIXES}INSERT DATA {{\n  {triple} .\n}}"))
}

/// Exact-match removal; a literal that does not exist is a no-op at the store.
pub fn delete_literal(
    uri: &str,
    kind: LiteralKind,
    value: &str,
    locale: Option<&str>,
) -> Result<String, ValidationError> {
    let triple = literal_triple(uri, kind, value, locale)?;
    Ok(format!("{PREFIXES}DELETE DATA {{\n  {triple} .\n}}"))
}

/// Delete-then-insert. The pair is not atomic.
pub fn update_literal(
    uri: &str,
    kind: LiteralKind,
    old_value: &str,
    old_locale: Option<&str>,
    new_value: &str,
    new_locale: Option<&str>,
) -> Result<LiteralUpdate, ValidationError> {
    Ok(LiteralUpdate {
        delete: delete_literal(uri, kind, old_value, old_locale)?,
        insert: add_literal(uri, kind, new_value, new_locale)?,
    })
}

/// Escape a value for a double-quoted SPARQL string.
pub fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\'' => escaped.push_str("\\'"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Whether `uri` can be written as a SPARQL `IRIREF`.
pub fn is_valid_iri(uri: &str) -> bool {
    static IRI: OnceLock<Regex> = OnceLock::new();
    IRI.get_or_init(|| {
        Regex::new(r#"^[A-Za-z][A-Za-z0-9+.\-]*:[^\x00-\x20<>"{}|^`\\]*$"#)
            .expect("IRI pattern is valid")
    })
    .is_match(uri)
}

/// Whether `locale` has the shape of a BCP-47 language tag.
pub fn is_valid_locale(locale: &str) -> bool {
    static LANG: OnceLock<Regex> = OnceLock::new();
    LANG.get_or_init(|| {
        Regex::new(r"^[A-Za-z]{1,8}(-[A-Za-z0-9]{1,8})*$").expect("language tag pattern is valid")
    })
    .is_match(locale)
}

fn iri(uri: &str) -> Result<String, ValidationError> {
    if is_valid_iri(uri) {
        Ok(format!("<{uri}>"))
    } else {
        Err(ValidationError::InvalidIri(uri.to_string()))
    }
}

fn literal_term(value: &str, locale: Option<&str>) -> Result<String, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::EmptyValue);
    }
    let quoted = format!("\"{}\"", escape_literal(value));
    match locale.filter(|l| !l.is_empty()) {
        Some(locale) if is_valid_locale(locale) => Ok(format!("{quoted}@{locale}")),
        Some(locale) => Err(ValidationError::InvalidLocale(locale.to_string())),
        None => Ok(quoted),
    }
}

fn literal_triple(
    uri: &str,
    kind: LiteralKind,
    value: &str,
    locale: Option<&str>,
) -> Result<String, ValidationError> {
    Ok(format!(
        "{} {} {}",
        iri(uri)?,
        kind.predicate(),
        literal_term(value, locale)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAT: &str = "http://ex.org/taxonomy/Cat";
    const ANIMAL: &str = "http://ex.org/taxonomy/Animal";

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("plain"), "plain");
        assert_eq!(
            escape_literal("say \"hi\"\nnow"),
            "say \\\"hi\\\"\\nnow"
        );
        assert_eq!(escape_literal("a\\b'c\t\r"), "a\\\\b\\'c\\t\\r");
    }

    #[test]
    fn test_injection_is_neutralised() {
        let hostile = "x\" . } ; DROP ALL ; INSERT DATA { <a> <b> \"c";
        let statement = add_literal(CAT, LiteralKind::Label, hostile, Some("en")).unwrap();
        assert!(statement.contains("\"x\\\" . } ; DROP ALL ; INSERT DATA { <a> <b> \\\"c\"@en"));
        // Exactly one unescaped opening and closing quote around the value
        let unescaped_quotes = statement
            .char_indices()
            .filter(|&(i, c)| c == '"' && !statement[..i].ends_with('\\'))
            .count();
        assert_eq!(unescaped_quotes, 2);
    }

    #[test]
    fn test_create_statements() {
        let top = create_top_concept(CAT).unwrap();
        assert!(top.contains("INSERT DATA"));
        assert!(top.contains(&format!("<{CAT}> a rdfs:Class .")));

        let sub = create_subconcept(CAT, ANIMAL).unwrap();
        assert!(sub.contains(&format!("<{CAT}> a rdfs:Class ;")));
        assert!(sub.contains(&format!("rdfs:subClassOf <{ANIMAL}> .")));
    }

    #[test]
    fn test_invalid_iri_rejected() {
        for bad in ["", "Cat", "http://ex.org/a b", "http://ex.org/a>", "http://ex.org/{x}"] {
            assert_eq!(
                create_top_concept(bad),
                Err(ValidationError::InvalidIri(bad.to_string())),
                "{bad:?}"
            );
        }
        assert!(create_subconcept(CAT, "nope").is_err());
    }

    #[test]
    fn test_delete_subtree_uses_closure() {
        let statement = delete_concept_subtree(ANIMAL).unwrap();
        assert!(statement.contains(&format!("?member rdfs:subClassOf* <{ANIMAL}>")));
        assert!(statement.contains("?referrer rdfs:subClassOf ?member ."));
    }

    #[test]
    fn test_literal_statements() {
        let add = add_literal(CAT, LiteralKind::Label, "Кіт", Some("uk")).unwrap();
        assert!(add.contains(&format!("<{CAT}> rdfs:label \"Кіт\"@uk .")));

        let del = delete_literal(CAT, LiteralKind::Definition, "A cat", None).unwrap();
        assert!(del.contains("DELETE DATA"));
        assert!(del.contains(&format!("<{CAT}> rdfs:comment \"A cat\" .")));
    }

    #[test]
    fn test_literal_validation() {
        assert_eq!(
            add_literal(CAT, LiteralKind::Label, "", None),
            Err(ValidationError::EmptyValue)
        );
        assert_eq!(
            add_literal(CAT, LiteralKind::Label, "Cat", Some("en\"@")),
            Err(ValidationError::InvalidLocale("en\"@".to_string()))
        );
        assert!(add_literal(CAT, LiteralKind::Label, "Cat", Some("en-GB")).is_ok());
        assert!(add_literal(CAT, LiteralKind::Label, "Cat", Some("")).is_ok());
    }

    #[test]
    fn test_update_literal_is_delete_then_insert() {
        let update =
            update_literal(CAT, LiteralKind::Label, "Kat", Some("en"), "Cat", Some("en")).unwrap();
        assert!(update.delete.contains("DELETE DATA"));
        assert!(update.delete.contains("\"Kat\"@en"));
        assert!(update.insert.contains("INSERT DATA"));
        assert!(update.insert.contains("\"Cat\"@en"));
    }

    #[test]
    fn test_literal_kind_serde() {
        let kind: LiteralKind = serde_json::from_str("\"definition\"").unwrap();
        assert_eq!(kind, LiteralKind::Definition);
    }
}
