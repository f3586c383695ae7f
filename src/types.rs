//! Public types shared by the pipeline, its stages and the persistence layer.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Opaque numeric identifier of an indexable entity.
pub type EntityId = u64;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Logical partition of the search engine. One pipeline instance runs per index type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexType {
    Product,
    Sku,
    Category,
    Customer,
    Promotion,
    CmUser,
    ChangeSet,
}

impl IndexType {
    pub const ALL: [IndexType; 7] = [
        IndexType::Product,
        IndexType::Sku,
        IndexType::Category,
        IndexType::Customer,
        IndexType::Promotion,
        IndexType::CmUser,
        IndexType::ChangeSet,
    ];

    /// Stable key used in the build-status table and the config file.
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Product => "product",
            IndexType::Sku => "sku",
            IndexType::Category => "category",
            IndexType::Customer => "customer",
            IndexType::Promotion => "promotion",
            IndexType::CmUser => "cmuser",
            IndexType::ChangeSet => "changeset",
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        IndexType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| format!("unknown index type '{s}'"))
    }
}

/// Lifecycle of one index as recorded in its build status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexStatus {
    Complete,
    RebuildInProgress,
    UpdateInProgress,
    Missing,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Complete => "COMPLETE",
            IndexStatus::RebuildInProgress => "REBUILD_IN_PROGRESS",
            IndexStatus::UpdateInProgress => "UPDATE_IN_PROGRESS",
            IndexStatus::Missing => "MISSING",
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            IndexStatus::RebuildInProgress | IndexStatus::UpdateInProgress
        )
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETE" => Ok(IndexStatus::Complete),
            "REBUILD_IN_PROGRESS" => Ok(IndexStatus::RebuildInProgress),
            "UPDATE_IN_PROGRESS" => Ok(IndexStatus::UpdateInProgress),
            "MISSING" => Ok(IndexStatus::Missing),
            other => Err(format!("unknown index status '{other}'")),
        }
    }
}

/// Kind of run started on a pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BuildMode {
    /// Re-index entities changed since the last build.
    #[default]
    Update,
    /// Index everything from scratch.
    Rebuild,
}

impl BuildMode {
    /// Status the build record carries while a run of this mode is in flight.
    pub fn in_progress_status(&self) -> IndexStatus {
        match self {
            BuildMode::Update => IndexStatus::UpdateInProgress,
            BuildMode::Rebuild => IndexStatus::RebuildInProgress,
        }
    }
}

/// Durable record of indexing progress for one index type.
///
/// The pipeline owns `status`, `operation_start_date`, `total_records`,
/// `processed_records`, `last_modified_date` and (once a run completes)
/// `last_build_date`. See [`IndexBuildStatus::apply_progress`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexBuildStatus {
    pub index_type: IndexType,
    pub status: IndexStatus,
    pub last_build_date: Option<Timestamp>,
    pub operation_start_date: Option<Timestamp>,
    pub total_records: u64,
    pub processed_records: u64,
    pub last_modified_date: Option<Timestamp>,
}

impl IndexBuildStatus {
    /// Fresh record for an index that has never been built.
    pub fn new(index_type: IndexType) -> Self {
        Self {
            index_type,
            status: IndexStatus::Missing,
            last_build_date: None,
            operation_start_date: None,
            total_records: 0,
            processed_records: 0,
            last_modified_date: None,
        }
    }

    /// Copy the pipeline-owned progress fields of `update` onto this (durable) record.
    /// A `None` last build date in the update never erases a stored one.
    pub fn apply_progress(&mut self, update: &IndexBuildStatus) {
        self.status = update.status;
        self.operation_start_date = update.operation_start_date;
        self.total_records = update.total_records;
        self.processed_records = update.processed_records;
        self.last_modified_date = update.last_modified_date;
        if update.last_build_date.is_some() {
            self.last_build_date = update.last_build_date;
        }
    }
}

/// Search-engine document. The pipeline never looks inside; builders fill it, sinks serialize it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Document {
    pub id: EntityId,
    pub fields: BTreeMap<String, Vec<String>>,
}

impl Document {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    /// Append a value to a (possibly multi-valued) field.
    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields
            .entry(name.into())
            .or_default()
            .push(value.into());
    }

    pub fn field(&self, name: &str) -> Option<&[String]> {
        self.fields.get(name).map(Vec::as_slice)
    }
}
