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

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use test_case::test_case;
    use vgdb_common::{ClassDef, Field, FieldType, QueryFilter, TableError, Value};
    use vgdb_db::{BackingStore, DatasetKind, TableSchema};
    use vgdb_rpc_client::{RemoteBackingStore, SchemaLoader};
    use vgdb_rpc_common::convert::schema_to_msg;
    use vgdb_rpc_common::{
        DataRequest, DataResponse, DataStream, DataTarget, GdbObjectMsg, ProviderFault,
        RowBatch, RpcError, SchemaRequest, SchemaResponse, Transport, ValueMsg,
    };

    const CLASS: ClassDef = ClassDef {
        class_handle: 4,
        workspace_handle: 1,
    };

    fn parcels_schema() -> TableSchema {
        let mut schema = TableSchema::new("PARCELS", CLASS.class_handle, DatasetKind::Table);
        schema.add_field(Field::object_id("OBJECTID")).unwrap();
        schema
            .add_field(Field::new("OWNER", FieldType::String).length(64))
            .unwrap();
        schema
    }

    /// Serves a fixed set of rows for one class, in batches of the requested size.
    #[derive(Default)]
    struct ScriptedTransport {
        rows: Vec<(i64, String)>,
        requests: Mutex<Vec<DataRequest>>,
        batches_served: Arc<AtomicUsize>,
        cancels: Arc<AtomicUsize>,
    }

    impl ScriptedTransport {
        fn with_rows(count: i64) -> Self {
            Self {
                rows: (1..=count).map(|oid| (oid, format!("owner {oid}"))).collect(),
                ..Default::default()
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn get_schema(&self, request: SchemaRequest) -> Result<SchemaResponse, RpcError> {
            let mut response = SchemaResponse::default();
            if request.dataset_ids.contains(&CLASS.class_handle) {
                response
                    .class_definitions
                    .push(schema_to_msg(&parcels_schema(), CLASS.workspace_handle));
            }
            Ok(response)
        }

        fn open_data_stream(
            &self,
            request: DataRequest,
        ) -> Result<Box<dyn DataStream>, RpcError> {
            self.requests.lock().unwrap().push(request.clone());
            let responses = match &request.target {
                DataTarget::ClassDef(cd) if *cd == CLASS => {
                    let selected: Vec<_> = self
                        .rows
                        .iter()
                        .filter(|(oid, _)| match request.where_clause.strip_prefix("OBJECTID = ") {
                            Some(wanted) => wanted.parse::<i64>().unwrap() == *oid,
                            None => true,
                        })
                        .cloned()
                        .collect();
                    if request.count_only {
                        vec![Ok(DataResponse::RowCount(selected.len() as i64))]
                    } else if request.extent_only {
                        vec![Ok(DataResponse::Extent(None))]
                    } else {
                        batches(selected, request.batch_size as usize)
                    }
                }
                DataTarget::ClassDef(cd) => {
                    vec![Err(RpcError::Remote(ProviderFault::UnknownClass(*cd)))]
                }
                DataTarget::RelQuery(q) => vec![Err(RpcError::Remote(
                    ProviderFault::UnknownRelationshipQuery(q.relationship_class_name.clone()),
                ))],
            };
            Ok(Box::new(ScriptedStream {
                responses: responses.into_iter(),
                finished: false,
                batches_served: self.batches_served.clone(),
                cancels: self.cancels.clone(),
            }))
        }
    }

    fn batches(rows: Vec<(i64, String)>, size: usize) -> Vec<Result<DataResponse, RpcError>> {
        let size = if size == 0 { rows.len().max(1) } else { size };
        let chunks: Vec<_> = rows.chunks(size).map(|c| c.to_vec()).collect();
        if chunks.is_empty() {
            return vec![Ok(DataResponse::Rows(RowBatch {
                class_handle: CLASS.class_handle,
                field_names: vec!["OBJECTID".into(), "OWNER".into()],
                rows: vec![],
                has_more_data: false,
            }))];
        }
        let last = chunks.len() - 1;
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                Ok(DataResponse::Rows(RowBatch {
                    class_handle: CLASS.class_handle,
                    field_names: vec!["OBJECTID".into(), "OWNER".into()],
                    rows: chunk
                        .into_iter()
                        .map(|(oid, owner)| GdbObjectMsg {
                            class_handle: CLASS.class_handle,
                            object_id: oid,
                            values: vec![ValueMsg::BigInteger(oid), ValueMsg::String(owner)],
                            shape: None,
                        })
                        .collect(),
                    has_more_data: i < last,
                }))
            })
            .collect()
    }

    struct ScriptedStream {
        responses: std::vec::IntoIter<Result<DataResponse, RpcError>>,
        finished: bool,
        batches_served: Arc<AtomicUsize>,
        cancels: Arc<AtomicUsize>,
    }

    impl DataStream for ScriptedStream {
        fn next_batch(&mut self) -> Result<Option<DataResponse>, RpcError> {
            if self.finished {
                return Ok(None);
            }
            match self.responses.next() {
                Some(response) => {
                    self.batches_served.fetch_add(1, Ordering::SeqCst);
                    if !matches!(&response, Ok(r) if r.has_more_data()) {
                        self.finished = true;
                    }
                    response.map(Some)
                }
                None => {
                    self.finished = true;
                    Ok(None)
                }
            }
        }

        fn cancel(&mut self) {
            if !self.finished {
                self.finished = true;
                self.cancels.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn store(transport: Arc<ScriptedTransport>, batch_size: u32) -> RemoteBackingStore {
        RemoteBackingStore::new(
            DataTarget::ClassDef(CLASS),
            CLASS,
            Arc::new(parcels_schema()),
            transport,
        )
        .with_batch_size(batch_size)
    }

    #[test_case(1 ; "single row batches")]
    #[test_case(3 ; "uneven batches")]
    #[test_case(10 ; "exact batch")]
    #[test_case(0 ; "provider default")]
    fn test_pagination_is_transparent(batch_size: u32) {
        let transport = Arc::new(ScriptedTransport::with_rows(10));
        let store = store(transport.clone(), batch_size);
        let oids: Vec<i64> = store
            .search(&QueryFilter::new(), false)
            .unwrap()
            .map(|r| r.unwrap().oid)
            .collect();
        assert_eq!(oids, (1..=10).collect::<Vec<_>>());
        assert_eq!(transport.cancels.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_abandoned_search_cancels_exchange() {
        let transport = Arc::new(ScriptedTransport::with_rows(10));
        let store = store(transport.clone(), 2);
        {
            let mut records = store.search(&QueryFilter::new(), true).unwrap();
            assert_eq!(records.next().unwrap().unwrap().oid, 1);
        }
        assert_eq!(transport.batches_served.load(Ordering::SeqCst), 1);
        assert_eq!(transport.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_count_get_row_and_extent_are_requests() {
        let transport = Arc::new(ScriptedTransport::with_rows(5));
        let store = store(transport.clone(), 0);

        assert_eq!(store.row_count(&QueryFilter::new()).unwrap(), 5);
        let record = store.get_row(3).unwrap().unwrap();
        assert_eq!(record.values[1], Value::String("owner 3".into()));
        assert_eq!(store.get_row(42).unwrap(), None);
        assert_eq!(store.extent().unwrap(), None);

        let requests = transport.requests.lock().unwrap();
        assert!(requests[0].count_only);
        assert_eq!(requests[1].where_clause, "OBJECTID = 3");
        assert!(requests[3].extent_only);
    }

    #[test]
    fn test_undescribed_class_is_schema_desync() {
        let other = ClassDef::new(99, 1);
        let store = RemoteBackingStore::new(
            DataTarget::ClassDef(other),
            other,
            Arc::new(parcels_schema()),
            Arc::new(ScriptedTransport::with_rows(3)),
        );
        let err = store.row_count(&QueryFilter::new()).unwrap_err();
        assert_eq!(err, TableError::SchemaDesync(other));

        let mut records = store.search(&QueryFilter::new(), false).unwrap();
        assert_eq!(
            records.next().unwrap().unwrap_err(),
            TableError::SchemaDesync(other)
        );
        assert!(records.next().is_none());
    }

    #[test]
    fn test_loader_binds_described_tables() {
        let transport = Arc::new(ScriptedTransport::with_rows(4));
        let workspaces = SchemaLoader::new(transport.clone())
            .load(&[CLASS.class_handle])
            .unwrap();
        assert_eq!(workspaces.len(), 1);
        let table = workspaces[0].table_by_name("parcels").unwrap();
        assert!(table.is_bound());
        assert_eq!(workspaces[0].class_def(&table), CLASS);
        assert_eq!(table.row_count(&QueryFilter::new()).unwrap(), 4);
        assert_eq!(table.get_row(2).unwrap().get(1).unwrap(), &Value::from("owner 2"));
        assert!(table.get_row(9).unwrap_err().is_not_found());
    }
}
