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

use indexmap::IndexMap;
use std::sync::Arc;

use tracing::{info, warn};
use vgdb_common::{ClassDef, TableError};
use vgdb_db::{StorageKind, VirtualTable, VirtualWorkspace, WorkspaceDbType, WorkspaceIdentity};
use vgdb_rpc_common::convert::{schema_from_msg, workspace_from_msg};
use vgdb_rpc_common::{
    DataTarget, ObjectClassMsg, RelationshipClassQuery, RpcError, SchemaRequest, SchemaResponse,
    Transport,
};

use crate::RemoteBackingStore;

/// Materialises the schema a data provider describes as virtual workspaces whose tables read
/// through remote backing stores.
pub struct SchemaLoader {
    transport: Arc<dyn Transport>,
    batch_size: u32,
    storage_kind: StorageKind,
}

impl SchemaLoader {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            batch_size: 0,
            storage_kind: StorageKind::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Storage used by the rows of every table this loader creates.
    pub fn with_storage_kind(mut self, storage_kind: StorageKind) -> Self {
        self.storage_kind = storage_kind;
        self
    }

    /// Describe the given datasets (plus whatever the provider adds on its own) and return one
    /// workspace per workspace handle, in the order the provider listed them.
    pub fn load(&self, dataset_ids: &[i64]) -> Result<Vec<Arc<VirtualWorkspace>>, TableError> {
        let request = SchemaRequest {
            dataset_ids: dataset_ids.to_vec(),
            relationship_queries: vec![],
        };
        let response = self.get_schema(request)?;

        let mut workspaces: IndexMap<i64, Arc<VirtualWorkspace>> = IndexMap::new();
        for msg in &response.workspaces {
            let identity = workspace_from_msg(msg)
                .map_err(|e| transport_error(e, msg.workspace_handle))?;
            workspaces.insert(
                msg.workspace_handle,
                Arc::new(VirtualWorkspace::new(identity)),
            );
        }

        // Relationship classes arrive with the relationship table kind already set.
        let classes = response
            .class_definitions
            .iter()
            .chain(response.relclass_definitions.iter());
        for msg in classes {
            let workspace = workspaces
                .entry(msg.workspace_handle)
                .or_insert_with(|| {
                    Arc::new(VirtualWorkspace::new(WorkspaceIdentity::new(
                        msg.workspace_handle,
                        WorkspaceDbType::Other,
                    )))
                })
                .clone();
            let table = self.bound_table(msg, DataTarget::ClassDef(msg.class_def()))?;
            // Duplicates are logged by the workspace and dropped.
            workspace.try_add(table);
        }

        log_failures(&response);
        info!(
            workspaces = workspaces.len(),
            tables = response.class_definitions.len() + response.relclass_definitions.len(),
            "loaded remote schema"
        );
        Ok(workspaces.into_values().collect())
    }

    /// Ask the provider to create (or reuse) the join table for `query` and return it bound to
    /// a remote store that addresses it by the query itself.
    pub fn open_query_table(
        &self,
        query: RelationshipClassQuery,
    ) -> Result<Arc<VirtualTable>, TableError> {
        let request = SchemaRequest {
            dataset_ids: vec![],
            relationship_queries: vec![query.clone()],
        };
        let response = self.get_schema(request)?;
        let Some(msg) = response.relclass_definitions.first() else {
            let reason = response
                .failed_items
                .first()
                .map(|f| f.message.clone())
                .unwrap_or_else(|| "no table described".to_string());
            return Err(TableError::Backing(format!(
                "relationship query {}: {reason}",
                query.relationship_class_name
            )));
        };
        self.bound_table(msg, DataTarget::RelQuery(query))
    }

    fn get_schema(&self, request: SchemaRequest) -> Result<SchemaResponse, TableError> {
        self.transport
            .get_schema(request)
            .map_err(|e| transport_error(e, -1))
    }

    fn bound_table(
        &self,
        msg: &ObjectClassMsg,
        target: DataTarget,
    ) -> Result<Arc<VirtualTable>, TableError> {
        let table = Arc::new(
            VirtualTable::with_schema(schema_from_msg(msg)?).with_storage_kind(self.storage_kind),
        );
        let store = RemoteBackingStore::new(
            target,
            msg.class_def(),
            table.schema(),
            self.transport.clone(),
        )
        .with_batch_size(self.batch_size);
        table.bind(Arc::new(store))?;
        Ok(table)
    }
}

fn transport_error(e: RpcError, workspace_handle: i64) -> TableError {
    e.into_table_error(ClassDef::new(-1, workspace_handle))
}

fn log_failures(response: &SchemaResponse) {
    for failed in &response.failed_items {
        warn!(
            dataset_id = ?failed.dataset_id,
            relationship = ?failed.relationship_class_name,
            message = %failed.message,
            "provider could not describe schema item"
        );
    }
}
