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

use crate::{DataRequest, DataResponse, RpcError, SchemaRequest, SchemaResponse};

/// Client side of the channel to a data provider.
///
/// Every call blocks the caller until the provider answers or the per-call timeout expires.
pub trait Transport: Send + Sync {
    fn get_schema(&self, request: SchemaRequest) -> Result<SchemaResponse, RpcError>;

    /// Send a data request and return the exchange it opens. The first response is fetched by
    /// the first [`DataStream::next_batch`].
    fn open_data_stream(&self, request: DataRequest) -> Result<Box<dyn DataStream>, RpcError>;
}

/// One open data exchange.
///
/// Pull-based: batch N+1 is only requested from the provider once batch N has been handed
/// out, so responses arrive in order on a single duplex channel. Implementations end the
/// exchange cleanly on [`DataStream::cancel`] and on drop.
pub trait DataStream: Send {
    /// The next response, or None when the exchange is complete.
    fn next_batch(&mut self) -> Result<Option<DataResponse>, RpcError>;

    fn cancel(&mut self);
}
