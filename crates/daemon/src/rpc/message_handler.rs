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

//! Protocol logic, independent of how messages are carried.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};
use vgdb_rpc_common::{
    ClientMessage, DataRequest, ProviderFault, RpcError, SchemaRequest, ServerMessage,
};

use crate::provider::DataProvider;

/// One client's duplex message channel, as seen from the provider.
pub trait Connection {
    /// The next message from the client, or None once the client has gone away.
    fn recv(&mut self) -> Result<Option<ClientMessage>, RpcError>;

    fn send(&mut self, message: ServerMessage) -> Result<(), RpcError>;
}

/// Serves schema requests and data exchanges for one provider.
///
/// A data exchange answers the request with its first response right away. While more batches
/// remain, it waits for the client to ask for the `Next` one or to `Cancel`. Any other request
/// arriving mid-exchange abandons the open exchange and is then served normally.
pub struct MessageHandler {
    provider: Arc<DataProvider>,
    open_exchanges: AtomicUsize,
}

/// Holds one count in [`MessageHandler::open_exchanges`] while an exchange is open.
struct OpenExchange<'a>(&'a AtomicUsize);

impl<'a> OpenExchange<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for OpenExchange<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MessageHandler {
    pub fn new(provider: Arc<DataProvider>) -> Self {
        Self {
            provider,
            open_exchanges: AtomicUsize::new(0),
        }
    }

    pub fn provider(&self) -> &Arc<DataProvider> {
        &self.provider
    }

    /// Data exchanges currently open across every connection served by this handler.
    pub fn open_exchanges(&self) -> usize {
        self.open_exchanges.load(Ordering::SeqCst)
    }

    pub fn handle_schema(&self, request: SchemaRequest) -> ServerMessage {
        match self.provider.get_schema(request) {
            Ok(response) => ServerMessage::Schema(response),
            Err(e) => {
                warn!(error = ?e, "schema request failed");
                ServerMessage::Fault(e.into())
            }
        }
    }

    /// Serve `connection` on the calling thread until the client goes away.
    pub fn serve<C: Connection + ?Sized>(&self, connection: &mut C) -> Result<(), RpcError> {
        let mut pending = None;
        loop {
            let message = match pending.take() {
                Some(message) => message,
                None => match connection.recv()? {
                    Some(message) => message,
                    None => return Ok(()),
                },
            };
            match message {
                ClientMessage::Schema(request) => connection.send(self.handle_schema(request))?,
                ClientMessage::Data(request) => pending = self.run_exchange(request, connection)?,
                ClientMessage::Next => {
                    connection.send(ServerMessage::Fault(ProviderFault::NoOpenExchange))?
                }
                // Nothing is open; the exchange it meant already ended.
                ClientMessage::Cancel => {}
            }
        }
    }

    /// Run one data exchange to completion. Returns the message that interrupted it, if any.
    fn run_exchange<C: Connection + ?Sized>(
        &self,
        request: DataRequest,
        connection: &mut C,
    ) -> Result<Option<ClientMessage>, RpcError> {
        let mut batches = match self.provider.get_data(request) {
            Ok(batches) => batches,
            Err(e) => {
                warn!(error = ?e, "data request failed");
                connection.send(ServerMessage::Fault(e.into()))?;
                return Ok(None);
            }
        };
        let _open = OpenExchange::enter(&self.open_exchanges);
        loop {
            let response = match batches.next() {
                Some(Ok(response)) => response,
                Some(Err(e)) => {
                    warn!(error = ?e, "data exchange failed");
                    connection.send(ServerMessage::Fault(e.into()))?;
                    return Ok(None);
                }
                None => return Ok(None),
            };
            let more = response.has_more_data();
            connection.send(ServerMessage::Data(response))?;
            if !more {
                return Ok(None);
            }
            match connection.recv()? {
                Some(ClientMessage::Next) => continue,
                Some(ClientMessage::Cancel) => {
                    debug!("data exchange cancelled");
                    return Ok(None);
                }
                Some(other) => {
                    debug!("data exchange abandoned for a new request");
                    return Ok(Some(other));
                }
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::provider::ProviderConfig;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use vgdb_common::ClassDef;
    use vgdb_rpc_common::{DataResponse, DataTarget};

    const CATALOG: &str = r#"{
        "workspace": { "handle": 1 },
        "datasets": [
            { "id": 5, "name": "WELLS",
              "fields": [ { "name": "OBJECTID", "type": "ObjectId" },
                          { "name": "DEPTH", "type": "Double" } ],
              "rows": [ { "OBJECTID": 1, "DEPTH": 12.5 }, { "OBJECTID": 2, "DEPTH": 40.0 },
                        { "OBJECTID": 3, "DEPTH": 7.25 } ] }
        ]
    }"#;

    /// Replays scripted client messages and records what the handler sends back.
    struct ScriptedConnection {
        incoming: VecDeque<ClientMessage>,
        sent: Vec<ServerMessage>,
    }

    impl Connection for ScriptedConnection {
        fn recv(&mut self) -> Result<Option<ClientMessage>, RpcError> {
            Ok(self.incoming.pop_front())
        }

        fn send(&mut self, message: ServerMessage) -> Result<(), RpcError> {
            self.sent.push(message);
            Ok(())
        }
    }

    /// Notes how many exchanges the handler reports open whenever it waits on the client.
    struct ObservingConnection<'a> {
        handler: &'a MessageHandler,
        inner: ScriptedConnection,
        observed: Vec<usize>,
    }

    impl Connection for ObservingConnection<'_> {
        fn recv(&mut self) -> Result<Option<ClientMessage>, RpcError> {
            self.observed.push(self.handler.open_exchanges());
            self.inner.recv()
        }

        fn send(&mut self, message: ServerMessage) -> Result<(), RpcError> {
            self.inner.send(message)
        }
    }

    fn handler() -> MessageHandler {
        let catalog = MemoryCatalog::from_json(CATALOG).unwrap();
        let provider = DataProvider::new(Arc::new(catalog), ProviderConfig { batch_size: 1 });
        MessageHandler::new(Arc::new(provider))
    }

    fn run(messages: Vec<ClientMessage>) -> Vec<ServerMessage> {
        let handler = handler();
        let mut connection = ScriptedConnection {
            incoming: messages.into(),
            sent: vec![],
        };
        handler.serve(&mut connection).unwrap();
        connection.sent
    }

    fn schema() -> ClientMessage {
        ClientMessage::Schema(SchemaRequest {
            dataset_ids: vec![5],
            relationship_queries: vec![],
        })
    }

    fn data() -> ClientMessage {
        ClientMessage::Data(DataRequest::new(DataTarget::ClassDef(ClassDef::new(5, 1))))
    }

    fn batch_sizes(sent: &[ServerMessage]) -> Vec<usize> {
        sent.iter()
            .filter_map(|m| match m {
                ServerMessage::Data(DataResponse::Rows(batch)) => Some(batch.rows.len()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_batches_follow_next() {
        let sent = run(vec![schema(), data(), ClientMessage::Next, ClientMessage::Next]);
        assert_eq!(sent.len(), 4);
        assert_eq!(batch_sizes(&sent), vec![1, 1, 1]);
        let ServerMessage::Data(last) = &sent[3] else {
            panic!("expected data");
        };
        assert!(!last.has_more_data());
    }

    #[test]
    fn test_cancel_ends_exchange_without_reply() {
        let sent = run(vec![schema(), data(), ClientMessage::Cancel, schema()]);
        assert_eq!(sent.len(), 3);
        assert!(matches!(sent[2], ServerMessage::Schema(_)));
    }

    #[test]
    fn test_new_request_abandons_open_exchange() {
        let sent = run(vec![schema(), data(), data(), ClientMessage::Next]);
        assert_eq!(batch_sizes(&sent), vec![1, 1, 1]);
    }

    #[test]
    fn test_stray_next_and_unknown_class_fault() {
        let sent = run(vec![ClientMessage::Next, ClientMessage::Cancel, data()]);
        assert_eq!(
            sent,
            vec![
                ServerMessage::Fault(ProviderFault::NoOpenExchange),
                ServerMessage::Fault(ProviderFault::UnknownClass(ClassDef::new(5, 1))),
            ]
        );
    }

    #[test]
    fn test_open_exchanges_counted_while_waiting_for_client() {
        let handler = handler();
        let mut connection = ObservingConnection {
            handler: &handler,
            inner: ScriptedConnection {
                incoming: vec![schema(), data(), ClientMessage::Next, ClientMessage::Cancel]
                    .into(),
                sent: vec![],
            },
            observed: vec![],
        };
        handler.serve(&mut connection).unwrap();
        assert_eq!(connection.observed, vec![0, 0, 1, 1, 0]);
        assert_eq!(handler.open_exchanges(), 0);
    }
}
