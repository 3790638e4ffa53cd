//! Decoding of the locale-tagged literal blobs produced by the hierarchy query.
//!
//! The store aggregates every label (or definition) of a concept into one
//! scalar column: records are joined by `||`, and each record is the literal
//! value and its language tag joined by a single `|`. Values containing `|`
//! cannot be represented; there is no escape mechanism.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Separator between records of a blob.
pub const RECORD_SEPARATOR: &str = "||";
/// Separator between a value and its locale inside one record.
pub const LOCALE_SEPARATOR: char = '|';

/// A label or definition value with its optional language tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LiteralEntry {
    pub value: String,
    pub locale: Option<String>,
}

impl LiteralEntry {
    pub fn new(value: impl Into<String>, locale: Option<&str>) -> Self {
        Self {
            value: value.into(),
            locale: locale.map(str::to_string),
        }
    }
}

/// Decode a `value|locale||value|locale` blob.
///
/// Records without a separator get no locale, as does a record with an empty
/// locale (`"a|"`, how untagged literals come out of `LANG()`). Empty records
/// and records with an empty value are skipped rather than failing the read.
/// No de-duplication happens here; the query is expected to emit DISTINCT
/// values.
pub fn parse_multi_value(blob: &str) -> Vec<LiteralEntry> {
    if blob.trim().is_empty() {
        return Vec::new();
    }

    let mut entries = Vec::new();
    for record in blob.split(RECORD_SEPARATOR) {
        let (value, locale) = match record.split_once(LOCALE_SEPARATOR) {
            Some((value, locale)) => (value, Some(locale)),
            None => (record, None),
        };

        if value.is_empty() {
            debug!("Skipping malformed literal record: {:?}", record);
            continue;
        }

        let locale = locale.filter(|l| !l.is_empty());
        entries.push(LiteralEntry::new(value, locale));
    }

    entries
}

/// Human-readable name for a concept identifier.
///
/// Returns the text after the last `#` when it is non-empty, otherwise the
/// last non-empty segment of the path, otherwise the identifier itself. The
/// identifier is split as-is, so names are never percent-encoded.
pub fn display_name(uri: &str) -> String {
    if let Some((_, fragment)) = uri.rsplit_once('#') {
        if !fragment.is_empty() {
            return fragment.to_string();
        }
    }

    let without_fragment = uri.split('#').next().unwrap_or(uri);
    // Only the path counts; "http://ex.org/" has no segment to offer.
    let path = match without_fragment.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or(""),
        None => without_fragment,
    };

    path.split('/')
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
        .unwrap_or_else(|| uri.to_string())
}
