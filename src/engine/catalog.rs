//! File-backed collaborators for the binary: a JSON-lines entity catalog, a loader and document
//! builder over it, and the "modified since last build" identifier filter.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::interfaces::{DocumentBuilder, Entity, EntityLoader, IdentifierFilter};
use crate::{Document, EntityId, Timestamp};

/// One catalog entry. Every key other than `id`, `modified` and `deleted` becomes a document
/// field. A `deleted` record is a tombstone: it never loads, so its document leaves the index.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CatalogRecord {
    pub id: EntityId,
    #[serde(default)]
    pub modified: Option<Timestamp>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl Entity for CatalogRecord {
    fn entity_id(&self) -> EntityId {
        self.id
    }
}

/// Entities read from a JSON-lines file, keyed by id. A later line with the same id replaces
/// the earlier one.
#[derive(Debug, Default)]
pub struct JsonCatalog {
    records: BTreeMap<EntityId, CatalogRecord>,
}

impl JsonCatalog {
    /// Read `path`. Blank lines are ignored; malformed lines are skipped with a warning.
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Ok(Self::parse(&text, &path.display().to_string()))
    }

    /// Parse JSON-lines text; `origin` only labels warnings.
    pub fn parse(text: &str, origin: &str) -> Self {
        let mut records = BTreeMap::new();
        let mut skipped = 0usize;
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<CatalogRecord>(line) {
                Ok(record) => {
                    records.insert(record.id, record);
                }
                Err(e) => {
                    skipped += 1;
                    warn!("{origin}:{}: skipping record: {e}", lineno + 1);
                }
            }
        }
        debug!("{origin}: {} records, {skipped} skipped", records.len());
        Self { records }
    }

    pub fn from_records<I: IntoIterator<Item = CatalogRecord>>(records: I) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id, r)).collect(),
        }
    }

    /// All ids in ascending order, tombstones included.
    pub fn ids(&self) -> Vec<EntityId> {
        self.records.keys().copied().collect()
    }

    pub fn get(&self, id: EntityId) -> Option<&CatalogRecord> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub struct CatalogLoader {
    catalog: Arc<JsonCatalog>,
}

impl CatalogLoader {
    pub fn new(catalog: Arc<JsonCatalog>) -> Self {
        Self { catalog }
    }
}

impl EntityLoader<CatalogRecord> for CatalogLoader {
    fn load(&self, ids: &[EntityId]) -> Result<Vec<CatalogRecord>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.catalog.get(*id))
            .filter(|r| !r.deleted)
            .cloned()
            .collect())
    }
}

/// Flattens a catalog record into document fields: strings as-is, arrays one value per element,
/// nulls dropped, anything else as its JSON text.
#[derive(Clone, Copy, Debug, Default)]
pub struct CatalogDocumentBuilder;

fn push_value(doc: &mut Document, name: &str, value: &serde_json::Value) {
    match value {
        serde_json::Value::Null => {}
        serde_json::Value::String(s) => doc.add_field(name, s.as_str()),
        serde_json::Value::Array(items) => {
            for item in items {
                push_value(doc, name, item);
            }
        }
        other => doc.add_field(name, other.to_string()),
    }
}

impl DocumentBuilder<CatalogRecord> for CatalogDocumentBuilder {
    fn build(&self, entity: &CatalogRecord) -> Document {
        let mut doc = Document::new(entity.id);
        for (name, value) in &entity.fields {
            push_value(&mut doc, name, value);
        }
        if let Some(modified) = entity.modified {
            doc.add_field("modified", modified.to_string());
        }
        doc
    }
}

/// True if `modified` is later than `since` by more than `tolerance_ms`.
pub fn modified_after(modified: Timestamp, since: Timestamp, tolerance_ms: i64) -> bool {
    modified - since > tolerance_ms
}

/// Keeps identifiers whose catalog record changed after the last successful build.
///
/// With no last build date everything but tombstones is kept: a fresh index has nothing to remove.
/// Records without a `modified` stamp are always kept. Ids unknown to the catalog are kept too, so
/// the loader reports them as missing.
pub struct ModifiedSinceFilter {
    catalog: Arc<JsonCatalog>,
    since: Option<Timestamp>,
    tolerance_ms: i64,
}

impl ModifiedSinceFilter {
    pub fn new(catalog: Arc<JsonCatalog>, since: Option<Timestamp>) -> Self {
        Self {
            catalog,
            since,
            tolerance_ms: 0,
        }
    }

    pub fn with_tolerance(mut self, tolerance_ms: i64) -> Self {
        self.tolerance_ms = tolerance_ms.max(0);
        self
    }
}

impl IdentifierFilter for ModifiedSinceFilter {
    fn needs_indexing(&self, id: EntityId) -> bool {
        let record = self.catalog.get(id);
        let Some(since) = self.since else {
            return !record.is_some_and(|r| r.deleted);
        };
        match record.and_then(|r| r.modified) {
            Some(modified) => modified_after(modified, since, self.tolerance_ms),
            None => true,
        }
    }
}
