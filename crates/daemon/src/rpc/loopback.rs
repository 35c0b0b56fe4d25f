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

//! In-process transport: the provider runs on a pool of worker threads and every call is a
//! channel conversation with one of them.

use flume::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, trace, warn};
use vgdb_rpc_common::{
    ClientMessage, DataRequest, DataResponse, DataStream, RpcError, SchemaRequest,
    SchemaResponse, ServerMessage, Transport,
};

use super::message_handler::{Connection, MessageHandler};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Provider threads kept for the life of the transport. Each open data exchange holds one
    /// until it is drained or cancelled; when none is idle, another is started and retires
    /// after `idle_timeout` without work.
    pub workers: usize,
    pub idle_timeout: Duration,
    pub call_timeout: Duration,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            idle_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// The provider's end of one loopback conversation.
struct ChannelConnection {
    from_client: Receiver<ClientMessage>,
    to_client: Sender<ServerMessage>,
}

impl Connection for ChannelConnection {
    fn recv(&mut self) -> Result<Option<ClientMessage>, RpcError> {
        // A disconnected client is the end of the conversation, not an error.
        Ok(self.from_client.recv().ok())
    }

    fn send(&mut self, message: ServerMessage) -> Result<(), RpcError> {
        self.to_client
            .send(message)
            .map_err(|e| RpcError::CouldNotSend(e.to_string()))
    }
}

/// Provider threads and the queue of conversations they take turns serving.
///
/// `available` counts workers waiting on the queue that no queued conversation has claimed.
/// Every conversation either claims one of them or gets a worker of its own.
struct WorkerPool {
    handler: Arc<MessageHandler>,
    queue: Receiver<ChannelConnection>,
    idle_timeout: Duration,
    available: AtomicUsize,
    started: AtomicUsize,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// `claimed` workers start on a conversation that is already queued for them.
    fn spawn_worker(self: &Arc<Self>, retires: bool, claimed: bool) -> std::io::Result<()> {
        let id = self.started.fetch_add(1, Ordering::SeqCst);
        let pool = self.clone();
        let thread = std::thread::Builder::new()
            .name(format!("vgdb-provider-{id}"))
            .spawn(move || pool.work(retires, claimed))?;
        self.threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(thread);
        Ok(())
    }

    fn work(&self, retires: bool, mut claimed: bool) {
        loop {
            if !claimed {
                self.available.fetch_add(1, Ordering::SeqCst);
            }
            claimed = false;
            let next = if retires {
                self.queue.recv_timeout(self.idle_timeout)
            } else {
                self.queue
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected)
            };
            match next {
                Ok(mut connection) => {
                    if let Err(e) = self.handler.serve(&mut connection) {
                        debug!(error = ?e, "loopback conversation ended early");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.take_available() {
                        break;
                    }
                    // A queued conversation is counting on this worker.
                    claimed = true;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        trace!("provider worker exiting");
    }

    fn take_available(&self) -> bool {
        self.available
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Find a worker for a conversation that was just queued.
    fn assign(self: &Arc<Self>) {
        if self.take_available() {
            return;
        }
        debug!("all provider workers busy, starting another");
        if let Err(e) = self.spawn_worker(true, true) {
            warn!(error = ?e, "Unable to start provider worker");
        }
    }
}

pub struct LoopbackTransport {
    jobs: Option<Sender<ChannelConnection>>,
    pool: Arc<WorkerPool>,
    call_timeout: Duration,
}

impl LoopbackTransport {
    pub fn new(handler: Arc<MessageHandler>, config: LoopbackConfig) -> eyre::Result<Self> {
        let (jobs, queue) = flume::unbounded::<ChannelConnection>();
        let pool = Arc::new(WorkerPool {
            handler,
            queue,
            idle_timeout: config.idle_timeout,
            available: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            threads: Mutex::new(Vec::with_capacity(config.workers)),
        });
        for _ in 0..config.workers.max(1) {
            pool.spawn_worker(false, false)?;
        }
        Ok(Self {
            jobs: Some(jobs),
            pool,
            call_timeout: config.call_timeout,
        })
    }

    /// Provider threads started so far, including ones that have since retired.
    pub fn workers_started(&self) -> usize {
        self.pool.started.load(Ordering::SeqCst)
    }

    /// Stop accepting calls and wait for every worker to finish its current conversation.
    pub fn shutdown(mut self) {
        self.jobs = None;
        let threads = std::mem::take(
            &mut *self
                .pool
                .threads
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for thread in threads {
            if thread.join().is_err() {
                error!("provider worker panicked");
            }
        }
    }

    fn open(&self) -> Result<(Sender<ClientMessage>, Receiver<ServerMessage>), RpcError> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| RpcError::CouldNotSend("loopback transport is shut down".into()))?;
        let (to_server, from_client) = flume::unbounded();
        let (to_client, from_server) = flume::unbounded();
        jobs.send(ChannelConnection {
            from_client,
            to_client,
        })
        .map_err(|e| RpcError::CouldNotSend(e.to_string()))?;
        self.pool.assign();
        Ok((to_server, from_server))
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        // Workers drain what they hold and exit once the queue is closed.
        self.jobs = None;
    }
}

fn recv_reply(
    from_server: &Receiver<ServerMessage>,
    timeout: Duration,
) -> Result<ServerMessage, RpcError> {
    from_server.recv_timeout(timeout).map_err(|e| match e {
        RecvTimeoutError::Timeout => RpcError::Timeout,
        RecvTimeoutError::Disconnected => {
            RpcError::CouldNotReceive("provider worker went away".to_string())
        }
    })
}

fn send_message(to_server: &Sender<ClientMessage>, message: ClientMessage) -> Result<(), RpcError> {
    to_server
        .send(message)
        .map_err(|e| RpcError::CouldNotSend(e.to_string()))
}

impl Transport for LoopbackTransport {
    fn get_schema(&self, request: SchemaRequest) -> Result<SchemaResponse, RpcError> {
        let (to_server, from_server) = self.open()?;
        send_message(&to_server, ClientMessage::Schema(request))?;
        match recv_reply(&from_server, self.call_timeout)? {
            ServerMessage::Schema(response) => Ok(response),
            ServerMessage::Fault(fault) => Err(RpcError::Remote(fault)),
            ServerMessage::Data(_) => Err(RpcError::UnexpectedReply(
                "data response to a schema request".to_string(),
            )),
        }
    }

    fn open_data_stream(&self, request: DataRequest) -> Result<Box<dyn DataStream>, RpcError> {
        let (to_server, from_server) = self.open()?;
        send_message(&to_server, ClientMessage::Data(request))?;
        Ok(Box::new(LoopbackStream {
            to_server: Some(to_server),
            from_server,
            more_available: false,
            call_timeout: self.call_timeout,
        }))
    }
}

struct LoopbackStream {
    /// None once the exchange is over; dropping it releases the worker.
    to_server: Option<Sender<ClientMessage>>,
    from_server: Receiver<ServerMessage>,
    more_available: bool,
    call_timeout: Duration,
}

impl LoopbackStream {
    fn finish(&mut self) {
        self.more_available = false;
        self.to_server = None;
    }

    fn exchange(&mut self) -> Result<DataResponse, RpcError> {
        if self.more_available {
            if let Some(to_server) = &self.to_server {
                send_message(to_server, ClientMessage::Next)?;
            }
        }
        match recv_reply(&self.from_server, self.call_timeout)? {
            ServerMessage::Data(response) => Ok(response),
            ServerMessage::Fault(fault) => Err(RpcError::Remote(fault)),
            ServerMessage::Schema(_) => Err(RpcError::UnexpectedReply(
                "schema response on a data stream".to_string(),
            )),
        }
    }
}

impl DataStream for LoopbackStream {
    fn next_batch(&mut self) -> Result<Option<DataResponse>, RpcError> {
        if self.to_server.is_none() {
            return Ok(None);
        }
        match self.exchange() {
            Ok(response) => {
                self.more_available = response.has_more_data();
                if !self.more_available {
                    self.finish();
                }
                Ok(Some(response))
            }
            Err(e) => {
                self.finish();
                Err(e)
            }
        }
    }

    fn cancel(&mut self) {
        if self.more_available {
            if let Some(to_server) = &self.to_server {
                // The worker may already be gone; either way the exchange is over.
                let _ = to_server.send(ClientMessage::Cancel);
            }
            trace!("cancelled data exchange");
        }
        self.finish();
    }
}

impl Drop for LoopbackStream {
    fn drop(&mut self) {
        self.cancel();
    }
}
