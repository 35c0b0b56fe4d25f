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

use std::sync::Arc;
use std::vec;

use tracing::{debug, warn};
use vgdb_common::{ClassDef, Envelope, QueryFilter, TableError};
use vgdb_db::{BackingStore, RecordStream, RowRecord, TableSchema};
use vgdb_rpc_common::convert::{BatchLayout, shape_to_msg};
use vgdb_rpc_common::{
    DataRequest, DataResponse, DataStream, DataTarget, GdbObjectMsg, RpcError, Transport,
};

/// A backing store that answers every operation by asking a data provider.
///
/// Holds no rows of its own: counts, extents and searches are all fresh requests.
pub struct RemoteBackingStore {
    target: DataTarget,
    class_def: ClassDef,
    schema: Arc<TableSchema>,
    transport: Arc<dyn Transport>,
    batch_size: u32,
}

impl RemoteBackingStore {
    pub fn new(
        target: DataTarget,
        class_def: ClassDef,
        schema: Arc<TableSchema>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            target,
            class_def,
            schema,
            transport,
            batch_size: 0,
        }
    }

    /// Rows per batch to ask for; 0 leaves it to the provider.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn class_def(&self) -> ClassDef {
        self.class_def
    }

    fn request(&self, filter: &QueryFilter) -> DataRequest {
        DataRequest {
            sub_fields: filter.sub_fields.clone(),
            where_clause: filter.where_clause.clone(),
            search_geometry: filter.search_geometry.as_deref().map(shape_to_msg),
            batch_size: self.batch_size,
            ..DataRequest::new(self.target.clone())
        }
    }

    fn table_error(&self, e: RpcError) -> TableError {
        e.into_table_error(self.class_def)
    }

    /// Issue a request that is answered by exactly one response.
    fn call(&self, request: DataRequest) -> Result<DataResponse, TableError> {
        let mut stream = self
            .transport
            .open_data_stream(request)
            .map_err(|e| self.table_error(e))?;
        let response = stream.next_batch().map_err(|e| self.table_error(e))?;
        stream.cancel();
        response.ok_or_else(|| {
            self.table_error(RpcError::UnexpectedReply(
                "data exchange ended without a response".to_string(),
            ))
        })
    }

    fn open_search(&self, request: DataRequest) -> Result<RemoteRecords, TableError> {
        let stream = self
            .transport
            .open_data_stream(request)
            .map_err(|e| self.table_error(e))?;
        Ok(RemoteRecords {
            stream,
            schema: self.schema.clone(),
            class_def: self.class_def,
            layout: None,
            pending: Vec::new().into_iter(),
            done: false,
        })
    }
}

impl BackingStore for RemoteBackingStore {
    fn extent(&self) -> Result<Option<Envelope>, TableError> {
        let request = DataRequest {
            extent_only: true,
            ..DataRequest::new(self.target.clone())
        };
        match self.call(request)? {
            DataResponse::Extent(extent) => Ok(extent),
            other => Err(self.table_error(unexpected(&other, "extent"))),
        }
    }

    fn row_count(&self, filter: &QueryFilter) -> Result<i64, TableError> {
        let request = DataRequest {
            count_only: true,
            ..self.request(filter)
        };
        match self.call(request)? {
            DataResponse::RowCount(count) => Ok(count),
            other => Err(self.table_error(unexpected(&other, "row count"))),
        }
    }

    fn get_row(&self, oid: i64) -> Result<Option<RowRecord>, TableError> {
        let Some(oid_field) = self.schema.oid_field_name() else {
            return Err(TableError::Backing(format!(
                "table {} has no object id field",
                self.schema.name()
            )));
        };
        let request = DataRequest {
            where_clause: format!("{oid_field} = {oid}"),
            batch_size: 1,
            ..DataRequest::new(self.target.clone())
        };
        let mut records = self.open_search(request)?;
        let first = records.next().transpose()?;
        records.cancel();
        Ok(first)
    }

    fn search(
        &self,
        filter: &QueryFilter,
        _recycling: bool,
    ) -> Result<RecordStream<'_>, TableError> {
        debug!(class = %self.class_def, where_clause = %filter.where_clause, "remote search");
        Ok(Box::new(self.open_search(self.request(filter))?))
    }
}

fn unexpected(response: &DataResponse, wanted: &str) -> RpcError {
    let got = match response {
        DataResponse::RowCount(_) => "row count",
        DataResponse::Extent(_) => "extent",
        DataResponse::Rows(_) => "row batch",
    };
    RpcError::UnexpectedReply(format!("expected {wanted}, got {got}"))
}

/// Presents the batches of one data exchange as a single lazy record stream.
///
/// The next batch is only requested once the current one has been consumed.
struct RemoteRecords {
    stream: Box<dyn DataStream>,
    schema: Arc<TableSchema>,
    class_def: ClassDef,
    layout: Option<BatchLayout>,
    pending: vec::IntoIter<GdbObjectMsg>,
    done: bool,
}

impl RemoteRecords {
    fn fail(&mut self, e: RpcError) -> Option<Result<RowRecord, TableError>> {
        self.cancel();
        Some(Err(e.into_table_error(self.class_def)))
    }

    fn cancel(&mut self) {
        if !self.done {
            self.done = true;
            self.stream.cancel();
        }
    }
}

impl Iterator for RemoteRecords {
    type Item = Result<RowRecord, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(msg) = self.pending.next() {
                let Some(layout) = &self.layout else {
                    return self.fail(RpcError::UnexpectedReply("row without a batch".into()));
                };
                return match layout.record(msg) {
                    Ok(record) => Some(Ok(record)),
                    Err(e) => self.fail(e),
                };
            }
            if self.done {
                return None;
            }
            let batch = match self.stream.next_batch() {
                Ok(Some(DataResponse::Rows(batch))) => batch,
                Ok(Some(other)) => return self.fail(unexpected(&other, "row batch")),
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    warn!(class = %self.class_def, error = ?e, "data exchange failed");
                    return self.fail(e);
                }
            };
            if batch.class_handle != self.class_def.class_handle {
                return self.fail(RpcError::UnexpectedReply(format!(
                    "batch for class {} on a stream for {}",
                    batch.class_handle, self.class_def
                )));
            }
            match BatchLayout::new(&self.schema, &batch.field_names) {
                Ok(layout) => self.layout = Some(layout),
                Err(e) => return self.fail(e),
            }
            if !batch.has_more_data {
                self.done = true;
            }
            self.pending = batch.rows.into_iter();
        }
    }
}

impl Drop for RemoteRecords {
    fn drop(&mut self) {
        self.cancel();
    }
}
