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

use bincode::{Decode, Encode};
use thiserror::Error;
use vgdb_common::{ClassDef, TableError};

pub use messages::{
    ClientMessage, DataRequest, DataResponse, DataTarget, DatasetKindMsg, FailedItemMsg,
    FieldMsg, GdbObjectMsg, JoinType, ObjectClassMsg, RelationshipClassQuery, RowBatch,
    SchemaRequest, SchemaResponse, ServerMessage, ShapeMsg, ValueMsg, WorkspaceDbTypeMsg,
    WorkspaceMsg,
};
pub use transport::{DataStream, Transport};

pub mod convert;
pub mod frame;
mod messages;
mod transport;

/// Errors at the transport / encoding layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    #[error("could not send request: {0}")]
    CouldNotSend(String),
    #[error("could not receive response: {0}")]
    CouldNotReceive(String),
    #[error("could not decode message: {0}")]
    CouldNotDecode(String),
    #[error("timed out waiting for the data provider")]
    Timeout,
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("data provider fault: {0}")]
    Remote(ProviderFault),
}

impl RpcError {
    /// Translate into the table-layer taxonomy, on behalf of the table addressed by
    /// `class_def`. Requests for classes the provider never described surface as a schema
    /// desync, never as an empty result.
    pub fn into_table_error(self, class_def: ClassDef) -> TableError {
        match self {
            RpcError::Timeout => TableError::Timeout,
            RpcError::Remote(
                ProviderFault::UnknownClass(_) | ProviderFault::UnknownRelationshipQuery(_),
            ) => TableError::SchemaDesync(class_def),
            RpcError::Remote(fault) => TableError::Backing(fault.to_string()),
            other => TableError::Transport(other.to_string()),
        }
    }
}

/// Failures reported by the data provider in place of a response.
#[derive(Debug, Clone, PartialEq, Error, Encode, Decode)]
pub enum ProviderFault {
    #[error("class {0} is not part of the known schema")]
    UnknownClass(ClassDef),
    #[error("relationship query {0} is not part of the known schema")]
    UnknownRelationshipQuery(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("no data exchange is open")]
    NoOpenExchange,
    #[error("data source failure: {0}")]
    SourceFailure(String),
}
