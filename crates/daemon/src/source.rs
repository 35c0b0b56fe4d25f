// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The dataset catalog a data provider serves from.
//!
//! A `SchemaSource` is shared by all provider threads and only hands out plain descriptions.
//! Everything it opens lives behind a `SourceWorkspace`, which is confined to the thread that
//! opened it: workspaces and tables are handed out as `Rc`, so they cannot cross threads.

use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;
use vgdb_common::{Envelope, FilterError, QueryFilter, TableError};
use vgdb_db::{RowRecord, TableSchema, WorkspaceIdentity};
use vgdb_rpc_common::RelationshipClassQuery;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("dataset {0} does not exist")]
    UnknownDataset(i64),
    #[error("table {0} does not exist")]
    UnknownTable(String),
    #[error("relationship class {0} does not exist")]
    UnknownRelationshipClass(String),
    #[error("invalid relationship query: {0}")]
    InvalidQuery(String),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("could not read catalog: {0}")]
    Catalog(String),
}

/// Whether a catalog entry is opened as a table or as a relationship class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetType {
    Table,
    RelationshipClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetInfo {
    pub id: i64,
    pub name: String,
    pub dataset_type: DatasetType,
}

/// A relationship class linking two datasets of the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub dataset: DatasetInfo,
    pub origin_dataset_id: i64,
    pub destination_dataset_id: i64,
}

impl Association {
    pub fn touches(&self, dataset_ids: &[i64]) -> bool {
        dataset_ids.contains(&self.origin_dataset_id)
            || dataset_ids.contains(&self.destination_dataset_id)
    }
}

/// Rows read from a source table. Owns what it iterates, so it may outlive the call that
/// produced it, but not the thread.
pub type SourceCursor = Box<dyn Iterator<Item = Result<RowRecord, SourceError>>>;

pub trait SchemaSource: Send + Sync {
    fn dataset(&self, dataset_id: i64) -> Option<DatasetInfo>;

    /// Relationship classes with at least one end among `dataset_ids`.
    fn associations(&self, dataset_ids: &[i64]) -> Vec<Association>;

    /// Datasets added to every schema request, such as issue tables.
    fn issue_dataset_ids(&self) -> Vec<i64>;

    /// Open a workspace for the calling thread. Called once per provider per thread.
    fn open_workspace(&self) -> Result<Rc<dyn SourceWorkspace>, SourceError>;
}

pub trait SourceWorkspace {
    fn identity(&self) -> WorkspaceIdentity;

    fn open_table(&self, name: &str) -> Result<Rc<dyn SourceTable>, SourceError>;

    fn open_relationship_class(&self, name: &str) -> Result<Rc<dyn SourceTable>, SourceError>;

    /// Build the join table for a relationship query. Potentially expensive.
    fn create_query_table(
        &self,
        query: &RelationshipClassQuery,
    ) -> Result<Rc<dyn SourceTable>, SourceError>;
}

pub trait SourceTable {
    /// Field list, object id / shape fields, geometry type and spatial reference.
    fn schema(&self) -> Arc<TableSchema>;

    fn class_id(&self) -> i64 {
        self.schema().class_handle()
    }

    fn count(&self, filter: &QueryFilter) -> Result<i64, SourceError>;

    /// Matching rows as full-width records in schema field order. `filter.sub_fields` names
    /// the columns the caller will read; sources may leave the others null.
    fn search(&self, filter: &QueryFilter) -> Result<SourceCursor, SourceError>;

    fn extent(&self) -> Result<Option<Envelope>, SourceError>;
}
