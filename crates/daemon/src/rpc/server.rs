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

//! TCP listener for remote clients, one thread per connection.
//!
//! Every connection talks to the same provider, so all clients of one server belong to the
//! same verification session.

use eyre::Context;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use vgdb_rpc_common::frame::{read_frame, write_frame};
use vgdb_rpc_common::{ClientMessage, RpcError, ServerMessage};

use super::message_handler::{Connection, MessageHandler};

/// How often idle connections look at the kill switch.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Longest wait for the rest of a frame once it has started arriving, and for a write.
    pub read_timeout: Duration,
    /// Connections beyond this are closed as soon as they are accepted, unless every served
    /// connection is inside an open data exchange. A client holding cursors open needs one more
    /// connection for each nested read.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            max_connections: 64,
        }
    }
}

struct TcpConnection {
    stream: TcpStream,
    read_timeout: Duration,
    kill_switch: Arc<AtomicBool>,
}

impl TcpConnection {
    /// Block until a frame starts arriving. False if the peer closed or we are shutting down.
    fn wait_readable(&mut self) -> Result<bool, RpcError> {
        let receive_error = |e: std::io::Error| RpcError::CouldNotReceive(e.to_string());
        self.stream
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(receive_error)?;
        let mut first = [0u8; 1];
        loop {
            if self.kill_switch.load(Ordering::Relaxed) {
                return Ok(false);
            }
            match self.stream.peek(&mut first) {
                Ok(0) => return Ok(false),
                Ok(_) => break,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(receive_error(e)),
            }
        }
        self.stream
            .set_read_timeout(Some(self.read_timeout))
            .map_err(receive_error)?;
        Ok(true)
    }
}

impl Connection for TcpConnection {
    fn recv(&mut self) -> Result<Option<ClientMessage>, RpcError> {
        if !self.wait_readable()? {
            return Ok(None);
        }
        read_frame(&mut self.stream)
    }

    fn send(&mut self, message: ServerMessage) -> Result<(), RpcError> {
        write_frame(&mut self.stream, &message)
    }
}

pub struct DataServer {
    listener: TcpListener,
    handler: Arc<MessageHandler>,
    config: ServerConfig,
    kill_switch: Arc<AtomicBool>,
}

impl DataServer {
    pub fn bind(
        address: impl ToSocketAddrs,
        handler: Arc<MessageHandler>,
        config: ServerConfig,
        kill_switch: Arc<AtomicBool>,
    ) -> eyre::Result<Self> {
        let listener = TcpListener::bind(address).context("Unable to bind data server")?;
        listener
            .set_nonblocking(true)
            .context("Unable to make listener non-blocking")?;
        Ok(Self {
            listener,
            handler,
            config,
            kill_switch,
        })
    }

    pub fn local_addr(&self) -> eyre::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    fn admits(&self, served: usize) -> bool {
        served < self.config.max_connections || self.handler.open_exchanges() >= served
    }

    /// Accept connections until the kill switch is set, then wait for open connections to wind
    /// down.
    pub fn serve(&self) -> eyre::Result<()> {
        info!(address = ?self.local_addr()?, "data server listening");
        let mut connections: Vec<JoinHandle<()>> = vec![];
        let mut next_id = 0usize;
        loop {
            if self.kill_switch.load(Ordering::Relaxed) {
                info!("Kill switch activated, exiting");
                break;
            }
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
                Err(e) => {
                    error!(error = ?e, "Unable to accept connection");
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
            };
            connections.retain(|c| !c.is_finished());
            if !self.admits(connections.len()) {
                warn!(%peer, limit = self.config.max_connections, "refusing connection");
                continue;
            }
            let configure = || -> std::io::Result<()> {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                stream.set_write_timeout(Some(self.config.read_timeout))
            };
            if let Err(e) = configure() {
                error!(%peer, error = ?e, "Unable to configure connection");
                continue;
            }
            let mut connection = TcpConnection {
                stream,
                read_timeout: self.config.read_timeout,
                kill_switch: self.kill_switch.clone(),
            };
            let handler = self.handler.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("vgdb-conn-{next_id}"))
                .spawn(move || {
                    debug!(%peer, "client connected");
                    match handler.serve(&mut connection) {
                        Ok(()) => debug!(%peer, "client disconnected"),
                        Err(e) => warn!(%peer, error = ?e, "connection ended with an error"),
                    }
                });
            next_id += 1;
            match spawned {
                Ok(handle) => connections.push(handle),
                Err(e) => error!(error = ?e, "Unable to spawn connection thread"),
            }
        }
        for connection in connections {
            if connection.join().is_err() {
                error!("connection thread panicked");
            }
        }
        Ok(())
    }
}
