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

//! Carrying provider requests to and from clients:
//! - `MessageHandler` holds the protocol, against any `Connection`
//! - `DataServer` serves it over TCP
//! - `LoopbackTransport` serves it to clients in the same process

mod loopback;
mod message_handler;
mod server;

pub use loopback::{LoopbackConfig, LoopbackTransport};
pub use message_handler::{Connection, MessageHandler};
pub use server::{DataServer, ServerConfig};
