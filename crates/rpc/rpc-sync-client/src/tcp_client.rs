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

//! Blocking client transport over TCP, one exchange per connection at a time.

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, trace};
use vgdb_rpc_common::frame::{read_frame, write_frame};
use vgdb_rpc_common::{
    ClientMessage, DataRequest, DataResponse, DataStream, RpcError, SchemaRequest,
    SchemaResponse, ServerMessage, Transport,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Longest wait for any single reply, applied as the socket read and write timeout.
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    /// Rows per batch requested by remote backing stores; 0 leaves it to the provider.
    pub batch_hint: u32,
    /// Idle connections kept for reuse.
    pub max_idle_connections: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            batch_hint: 0,
            max_idle_connections: 8,
        }
    }
}

type Pool = Arc<Mutex<Vec<TcpStream>>>;

/// Talks to a `DataServer` over plain TCP.
///
/// Each call checks a connection out of a small pool. A data stream keeps its connection until
/// the exchange is drained or cancelled, then returns it; connections that failed mid-exchange
/// are discarded instead.
pub struct TcpTransport {
    address: SocketAddr,
    config: ClientConfig,
    idle: Pool,
}

impl TcpTransport {
    pub fn new(address: impl ToSocketAddrs, config: ClientConfig) -> Result<Self, RpcError> {
        let address = address
            .to_socket_addrs()
            .map_err(|e| RpcError::CouldNotSend(e.to_string()))?
            .next()
            .ok_or_else(|| RpcError::CouldNotSend("address resolves to nothing".to_string()))?;
        Ok(Self {
            address,
            config,
            idle: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn checkout(&self) -> Result<TcpStream, RpcError> {
        let pooled = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        if let Some(connection) = pooled {
            return Ok(connection);
        }
        let connection = TcpStream::connect_timeout(&self.address, self.config.connect_timeout)
            .map_err(|e| {
                error!(address = %self.address, error = ?e, "could not connect to data provider");
                RpcError::CouldNotSend(e.to_string())
            })?;
        let configure = || -> std::io::Result<()> {
            connection.set_nodelay(true)?;
            connection.set_read_timeout(Some(self.config.call_timeout))?;
            connection.set_write_timeout(Some(self.config.call_timeout))
        };
        configure().map_err(|e| RpcError::CouldNotSend(e.to_string()))?;
        debug!(address = %self.address, "connected to data provider");
        Ok(connection)
    }

    fn call(&self, message: &ClientMessage) -> Result<ServerMessage, RpcError> {
        let mut connection = self.checkout()?;
        write_frame(&mut connection, message)?;
        let reply = read_reply(&mut connection)?;
        checkin(&self.idle, connection, self.config.max_idle_connections);
        Ok(reply)
    }
}

fn read_reply(connection: &mut TcpStream) -> Result<ServerMessage, RpcError> {
    read_frame(connection)?.ok_or_else(|| {
        RpcError::CouldNotReceive("data provider closed the connection".to_string())
    })
}

fn checkin(pool: &Pool, connection: TcpStream, max_idle: usize) {
    let mut idle = pool.lock().unwrap_or_else(PoisonError::into_inner);
    if idle.len() < max_idle {
        idle.push(connection);
    }
}

impl Transport for TcpTransport {
    fn get_schema(&self, request: SchemaRequest) -> Result<SchemaResponse, RpcError> {
        match self.call(&ClientMessage::Schema(request))? {
            ServerMessage::Schema(response) => Ok(response),
            ServerMessage::Fault(fault) => Err(RpcError::Remote(fault)),
            ServerMessage::Data(_) => Err(RpcError::UnexpectedReply(
                "data response to a schema request".to_string(),
            )),
        }
    }

    fn open_data_stream(&self, request: DataRequest) -> Result<Box<dyn DataStream>, RpcError> {
        let mut connection = self.checkout()?;
        write_frame(&mut connection, &ClientMessage::Data(request))?;
        Ok(Box::new(TcpDataStream {
            connection: Some(connection),
            state: ExchangeState::AwaitingReply,
            idle: self.idle.clone(),
            max_idle: self.config.max_idle_connections,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeState {
    /// A request is on the wire and its reply has not been read yet.
    AwaitingReply,
    /// The last batch said more data follows; nothing is in flight.
    MoreAvailable,
    Finished,
}

struct TcpDataStream {
    connection: Option<TcpStream>,
    state: ExchangeState,
    idle: Pool,
    max_idle: usize,
}

impl TcpDataStream {
    fn finish(&mut self, reusable: bool) {
        self.state = ExchangeState::Finished;
        if let Some(connection) = self.connection.take() {
            if reusable {
                checkin(&self.idle, connection, self.max_idle);
            }
        }
    }

    fn exchange(&mut self) -> Result<DataResponse, RpcError> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| RpcError::CouldNotReceive("connection already released".into()))?;
        if self.state == ExchangeState::MoreAvailable {
            write_frame(connection, &ClientMessage::Next)?;
            self.state = ExchangeState::AwaitingReply;
        }
        match read_reply(connection)? {
            ServerMessage::Data(response) => Ok(response),
            ServerMessage::Fault(fault) => {
                // The provider ends the exchange with the fault; the connection stays usable.
                self.finish(true);
                Err(RpcError::Remote(fault))
            }
            ServerMessage::Schema(_) => Err(RpcError::UnexpectedReply(
                "schema response on a data stream".to_string(),
            )),
        }
    }
}

impl DataStream for TcpDataStream {
    fn next_batch(&mut self) -> Result<Option<DataResponse>, RpcError> {
        if self.state == ExchangeState::Finished {
            return Ok(None);
        }
        match self.exchange() {
            Ok(response) => {
                if response.has_more_data() {
                    self.state = ExchangeState::MoreAvailable;
                } else {
                    self.finish(true);
                }
                Ok(Some(response))
            }
            Err(e) => {
                self.finish(false);
                Err(e)
            }
        }
    }

    fn cancel(&mut self) {
        match self.state {
            ExchangeState::Finished => {}
            ExchangeState::MoreAvailable => {
                let sent = self
                    .connection
                    .as_mut()
                    .map(|connection| write_frame(connection, &ClientMessage::Cancel));
                trace!("cancelled data exchange");
                self.finish(matches!(sent, Some(Ok(()))));
            }
            // A reply is still in flight; the connection cannot be reused safely.
            ExchangeState::AwaitingReply => self.finish(false),
        }
    }
}

impl Drop for TcpDataStream {
    fn drop(&mut self) {
        self.cancel();
    }
}
