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

//! Answers schema and data requests out of a [`SchemaSource`].
//!
//! A provider serves one verification session. What has been described is protocol state for
//! that session, shared by every thread and every connection serving the provider: clients
//! describe classes on one connection and read them on others. Independent sessions need
//! their own provider, and so their own daemon or loopback transport.
//! What has been opened is not: workspaces and tables are cached per thread, keyed by
//! provider instance, and never handed to another thread.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::iter::Peekable;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, warn};
use vgdb_common::{ClassDef, FilterError, QueryFilter, TableError, Value};
use vgdb_db::{RowRecord, TableSchema};
use vgdb_rpc_common::convert::{
    schema_to_msg, shape_from_msg, shape_to_msg, value_to_msg, workspace_to_msg,
};
use vgdb_rpc_common::{
    DataRequest, DataResponse, DataTarget, FailedItemMsg, GdbObjectMsg, ObjectClassMsg,
    ProviderFault, RelationshipClassQuery, RowBatch, SchemaRequest, SchemaResponse, ValueMsg,
};

use crate::source::{
    DatasetInfo, DatasetType, SchemaSource, SourceCursor, SourceError, SourceTable,
    SourceWorkspace,
};

/// Class handles handed out for relationship query tables start here, clear of catalog ids.
const QUERY_CLASS_HANDLE_BASE: i64 = 1 << 40;

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_CACHES: RefCell<HashMap<u64, ThreadCache>> = RefCell::new(HashMap::new());
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Rows per batch when the client does not ask for a size.
    pub batch_size: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { batch_size: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("class {0} was not described by a schema request")]
    UnknownClass(ClassDef),
    #[error("relationship query {0} was not described by a schema request")]
    UnknownRelationshipQuery(String),
    #[error("relationship queries cannot be combined with dataset ids in one schema request")]
    MixedSchemaRequest,
    #[error("request names neither datasets nor relationship queries")]
    NoTarget,
    #[error("invalid search geometry: {0}")]
    InvalidGeometry(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Table(#[from] TableError),
}

impl From<ProviderError> for ProviderFault {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::UnknownClass(class_def) => ProviderFault::UnknownClass(class_def),
            ProviderError::UnknownRelationshipQuery(name) => {
                ProviderFault::UnknownRelationshipQuery(name)
            }
            ProviderError::MixedSchemaRequest
            | ProviderError::NoTarget
            | ProviderError::InvalidGeometry(_) => ProviderFault::InvalidRequest(e.to_string()),
            ProviderError::Source(SourceError::Filter(f))
            | ProviderError::Table(TableError::InvalidFilter(f)) => {
                ProviderFault::InvalidFilter(f.to_string())
            }
            ProviderError::Source(_) | ProviderError::Table(_) => {
                ProviderFault::SourceFailure(e.to_string())
            }
        }
    }
}

/// Everything described so far. Plain data; safe to share.
#[derive(Default)]
struct Registry {
    classes: HashMap<ClassDef, DatasetInfo>,
    queries: HashMap<RelationshipClassQuery, ClassDef>,
}

/// One thread's open handles for one provider.
struct ThreadCache {
    workspace: Rc<dyn SourceWorkspace>,
    tables: HashMap<i64, Rc<dyn SourceTable>>,
    query_tables: HashMap<RelationshipClassQuery, Rc<dyn SourceTable>>,
}

impl ThreadCache {
    fn table(&mut self, info: &DatasetInfo) -> Result<Rc<dyn SourceTable>, SourceError> {
        if let Some(table) = self.tables.get(&info.id) {
            return Ok(table.clone());
        }
        let table = match info.dataset_type {
            DatasetType::Table => self.workspace.open_table(&info.name)?,
            DatasetType::RelationshipClass => self.workspace.open_relationship_class(&info.name)?,
        };
        self.tables.insert(info.id, table.clone());
        Ok(table)
    }

    fn query_table(
        &mut self,
        query: &RelationshipClassQuery,
    ) -> Result<Rc<dyn SourceTable>, SourceError> {
        if let Some(table) = self.query_tables.get(query) {
            return Ok(table.clone());
        }
        let table = self.workspace.create_query_table(query)?;
        self.query_tables.insert(query.clone(), table.clone());
        Ok(table)
    }
}

/// Data access for one verification session. See the module docs for what is shared.
pub struct DataProvider {
    id: u64,
    source: Arc<dyn SchemaSource>,
    config: ProviderConfig,
    registry: RwLock<Registry>,
}

impl DataProvider {
    pub fn new(source: Arc<dyn SchemaSource>, config: ProviderConfig) -> Self {
        Self {
            id: NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed),
            source,
            config,
            registry: RwLock::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Run `f` against the calling thread's cache, opening the workspace on first use.
    fn with_cache<R>(
        &self,
        f: impl FnOnce(&mut ThreadCache) -> Result<R, ProviderError>,
    ) -> Result<R, ProviderError> {
        THREAD_CACHES.with(|caches| {
            let mut caches = caches.borrow_mut();
            let cache = match caches.entry(self.id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    debug!(provider = self.id, "opening workspace for thread");
                    entry.insert(ThreadCache {
                        workspace: self.source.open_workspace()?,
                        tables: HashMap::new(),
                        query_tables: HashMap::new(),
                    })
                }
            };
            f(cache)
        })
    }

    /// Tables this provider holds open on the calling thread, joins included.
    pub fn open_tables_on_this_thread(&self) -> usize {
        THREAD_CACHES.with(|caches| {
            caches
                .borrow()
                .get(&self.id)
                .map(|c| c.tables.len() + c.query_tables.len())
                .unwrap_or(0)
        })
    }

    pub fn get_schema(&self, request: SchemaRequest) -> Result<SchemaResponse, ProviderError> {
        match (
            request.dataset_ids.is_empty(),
            request.relationship_queries.is_empty(),
        ) {
            (false, false) => Err(ProviderError::MixedSchemaRequest),
            (true, true) => Err(ProviderError::NoTarget),
            (false, true) => self.describe_datasets(&request.dataset_ids),
            (true, false) => self.describe_queries(&request.relationship_queries),
        }
    }

    fn describe_datasets(&self, requested: &[i64]) -> Result<SchemaResponse, ProviderError> {
        let mut ids = requested.to_vec();
        for id in self.source.issue_dataset_ids() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        let mut items: Vec<(i64, Option<DatasetInfo>)> = ids
            .into_iter()
            .map(|id| (id, self.source.dataset(id)))
            .collect();
        for association in self.source.associations(requested) {
            if association.touches(requested)
                && !items.iter().any(|(id, _)| *id == association.dataset.id)
            {
                items.push((association.dataset.id, Some(association.dataset)));
            }
        }

        let mut response = SchemaResponse::default();
        let mut described = vec![];
        self.with_cache(|cache| {
            let identity = cache.workspace.identity();
            let workspace_handle = identity.workspace_handle;
            response.workspaces.push(workspace_to_msg(&identity));
            for (id, info) in items {
                let Some(info) = info else {
                    warn!(dataset_id = id, "unknown dataset skipped");
                    response.failed_items.push(FailedItemMsg {
                        dataset_id: Some(id),
                        relationship_class_name: None,
                        message: SourceError::UnknownDataset(id).to_string(),
                    });
                    continue;
                };
                let table = match cache.table(&info) {
                    Ok(table) => table,
                    Err(e) => {
                        warn!(dataset_id = id, error = ?e, "could not open dataset");
                        response.failed_items.push(FailedItemMsg {
                            dataset_id: Some(id),
                            relationship_class_name: None,
                            message: e.to_string(),
                        });
                        continue;
                    }
                };
                let msg = schema_to_msg(&table.schema(), workspace_handle);
                described.push((msg.class_def(), info.clone()));
                match info.dataset_type {
                    DatasetType::Table => response.class_definitions.push(msg),
                    DatasetType::RelationshipClass => response.relclass_definitions.push(msg),
                }
            }
            Ok(())
        })?;

        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.classes.extend(described);
        Ok(response)
    }

    fn describe_queries(
        &self,
        queries: &[RelationshipClassQuery],
    ) -> Result<SchemaResponse, ProviderError> {
        let mut response = SchemaResponse::default();
        self.with_cache(|cache| {
            let workspace_handle = cache.workspace.identity().workspace_handle;
            for query in queries {
                let schema = match cache.query_table(query) {
                    Ok(table) => table.schema(),
                    Err(e) => {
                        warn!(relationship = %query.relationship_class_name, error = ?e,
                              "could not create query table");
                        response.failed_items.push(FailedItemMsg {
                            dataset_id: None,
                            relationship_class_name: Some(query.relationship_class_name.clone()),
                            message: e.to_string(),
                        });
                        continue;
                    }
                };
                let class_def = self.register_query(query, workspace_handle);
                response
                    .relclass_definitions
                    .push(query_class_msg(&schema, class_def));
            }
            Ok(())
        })?;
        Ok(response)
    }

    /// The identity of a query table, the same on every thread and for every repeat.
    fn register_query(&self, query: &RelationshipClassQuery, workspace_handle: i64) -> ClassDef {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let next = QUERY_CLASS_HANDLE_BASE + registry.queries.len() as i64;
        *registry
            .queries
            .entry(query.clone())
            .or_insert_with(|| ClassDef::new(next, workspace_handle))
    }

    fn described_class(&self, class_def: &ClassDef) -> Option<DatasetInfo> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.classes.get(class_def).cloned()
    }

    fn described_query(&self, query: &RelationshipClassQuery) -> Option<ClassDef> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.queries.get(query).copied()
    }

    /// Resolve a data request to a stream of responses. Counts and extents are a single
    /// response; rows come in batches, produced as the stream is consumed. The stream holds
    /// this thread's table handle and must be consumed on this thread.
    pub fn get_data(&self, request: DataRequest) -> Result<DataBatches, ProviderError> {
        let (class_handle, table, is_query) = match &request.target {
            DataTarget::ClassDef(class_def) => {
                let info = self
                    .described_class(class_def)
                    .ok_or(ProviderError::UnknownClass(*class_def))?;
                let table = self.with_cache(|cache| Ok(cache.table(&info)?))?;
                (class_def.class_handle, table, false)
            }
            DataTarget::RelQuery(query) => {
                let class_def = self.described_query(query).ok_or_else(|| {
                    ProviderError::UnknownRelationshipQuery(query.relationship_class_name.clone())
                })?;
                let table = self.with_cache(|cache| Ok(cache.query_table(query)?))?;
                (class_def.class_handle, table, true)
            }
        };
        debug!(
            class_handle,
            count_only = request.count_only,
            extent_only = request.extent_only,
            "data request"
        );

        let schema = table.schema();
        let search_geometry = request
            .search_geometry
            .as_ref()
            .map(|shape| shape_from_msg(shape).map(Arc::new))
            .transpose()
            .map_err(|e| ProviderError::InvalidGeometry(e.to_string()))?;
        let mut filter = QueryFilter {
            sub_fields: request.sub_fields,
            where_clause: request.where_clause,
            search_geometry,
        };

        if request.extent_only {
            return Ok(DataBatches::single(DataResponse::Extent(table.extent()?)));
        }
        if request.count_only {
            // Query feature classes count by their shape; everything else by object id.
            let count_field = match (is_query, schema.shape_field_name()) {
                (true, Some(shape)) => Some(shape),
                _ => schema.oid_field_name(),
            };
            filter.sub_fields = count_field.unwrap_or("*").to_string();
            return Ok(DataBatches::single(DataResponse::RowCount(
                table.count(&filter)?,
            )));
        }

        let projection = Projection::new(&schema, filter.sub_field_names())?;
        filter.sub_fields = projection.sub_fields();
        let batch_size = match request.batch_size {
            0 => self.config.batch_size,
            n => n,
        }
        .max(1) as usize;
        Ok(DataBatches {
            state: BatchState::Rows {
                class_handle,
                projection,
                cursor: table.search(&filter)?.peekable(),
                batch_size,
                finished: false,
            },
        })
    }
}

fn query_class_msg(schema: &TableSchema, class_def: ClassDef) -> ObjectClassMsg {
    let mut msg = schema_to_msg(schema, class_def.workspace_handle);
    msg.class_handle = class_def.class_handle;
    msg
}

/// Which columns of a record go on the wire. The object id field is always included when the
/// table has one; the shape travels separately from the attribute values.
struct Projection {
    names: Vec<String>,
    value_indices: Vec<usize>,
    shape_index: Option<usize>,
    shape_name: Option<String>,
}

impl Projection {
    fn new(schema: &TableSchema, requested: Option<Vec<String>>) -> Result<Self, ProviderError> {
        let mut indices: Vec<usize> = match requested {
            None => (0..schema.fields().len()).collect::<Vec<_>>(),
            Some(names) => names
                .iter()
                .map(|name| {
                    schema
                        .find_field(name)
                        .ok_or_else(|| SourceError::Filter(FilterError::UnknownField(name.clone())))
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        if let Some(oid_index) = schema.oid_index() {
            if !indices.contains(&oid_index) {
                indices.insert(0, oid_index);
            }
        }
        let mut seen = HashSet::new();
        indices.retain(|i| seen.insert(*i));
        let shape_index = schema.shape_index().filter(|i| indices.contains(i));
        let value_indices: Vec<usize> = indices
            .into_iter()
            .filter(|i| Some(*i) != shape_index)
            .collect();
        let names = value_indices
            .iter()
            .map(|i| schema.field_names()[*i].clone())
            .collect();
        let shape_name = shape_index.map(|i| schema.field_names()[i].clone());
        Ok(Self {
            names,
            value_indices,
            shape_index,
            shape_name,
        })
    }

    /// Sub fields handed to the source: the batch columns plus the shape, if projected.
    fn sub_fields(&self) -> String {
        self.names
            .iter()
            .chain(self.shape_name.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join(",")
    }

    fn encode(&self, class_handle: i64, record: &RowRecord) -> GdbObjectMsg {
        GdbObjectMsg {
            class_handle,
            object_id: record.oid,
            values: self
                .value_indices
                .iter()
                .map(|i| record.values.get(*i).map_or(ValueMsg::Null, value_to_msg))
                .collect(),
            shape: self
                .shape_index
                .and_then(|i| record.values.get(i))
                .and_then(Value::as_geometry)
                .map(|g| shape_to_msg(g)),
        }
    }
}

enum BatchState {
    Single(Option<DataResponse>),
    Rows {
        class_handle: i64,
        projection: Projection,
        cursor: Peekable<SourceCursor>,
        batch_size: usize,
        finished: bool,
    },
}

/// The responses to one data request, produced lazily. Not `Send`: it reads through the
/// calling thread's table handles.
pub struct DataBatches {
    state: BatchState,
}

impl DataBatches {
    fn single(response: DataResponse) -> Self {
        Self {
            state: BatchState::Single(Some(response)),
        }
    }
}

impl Iterator for DataBatches {
    type Item = Result<DataResponse, ProviderError>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.state {
            BatchState::Single(response) => response.take().map(Ok),
            BatchState::Rows {
                class_handle,
                projection,
                cursor,
                batch_size,
                finished,
            } => {
                if *finished {
                    return None;
                }
                let mut rows = Vec::with_capacity(*batch_size);
                while rows.len() < *batch_size {
                    match cursor.next() {
                        Some(Ok(record)) => rows.push(projection.encode(*class_handle, &record)),
                        Some(Err(e)) => {
                            *finished = true;
                            return Some(Err(e.into()));
                        }
                        None => break,
                    }
                }
                let has_more_data = cursor.peek().is_some();
                *finished = !has_more_data;
                Some(Ok(DataResponse::Rows(RowBatch {
                    class_handle: *class_handle,
                    field_names: projection.names.clone(),
                    rows,
                    has_more_data,
                })))
            }
        }
    }
}
