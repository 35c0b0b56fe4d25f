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

//! Length-prefixed bincode frames for stream transports.
//!
//! Each frame is a 4-byte little-endian payload length followed by the bincode (standard
//! config) encoding of one message.

use crate::RpcError;
use bincode::{Decode, Encode};
use std::io::{ErrorKind, Read, Write};

pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

pub fn encode<T: Encode>(message: &T) -> Result<Vec<u8>, RpcError> {
    bincode::encode_to_vec(message, bincode::config::standard())
        .map_err(|e| RpcError::CouldNotSend(e.to_string()))
}

pub fn decode<T: Decode<()>>(bytes: &[u8]) -> Result<T, RpcError> {
    let (message, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| RpcError::CouldNotDecode(e.to_string()))?;
    Ok(message)
}

fn io_error(e: std::io::Error, on_send: bool) -> RpcError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => RpcError::Timeout,
        _ if on_send => RpcError::CouldNotSend(e.to_string()),
        _ => RpcError::CouldNotReceive(e.to_string()),
    }
}

pub fn write_frame<W: Write, T: Encode>(writer: &mut W, message: &T) -> Result<(), RpcError> {
    let payload = encode(message)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(RpcError::CouldNotSend(format!(
            "frame of {} bytes exceeds maximum of {MAX_FRAME_SIZE}",
            payload.len()
        )));
    }
    let length = (payload.len() as u32).to_le_bytes();
    let mut send = || -> std::io::Result<()> {
        writer.write_all(&length)?;
        writer.write_all(&payload)?;
        writer.flush()
    };
    send().map_err(|e| io_error(e, true))
}

/// Read one frame. Returns None on a clean end of stream before the length prefix.
pub fn read_frame<R: Read, T: Decode<()>>(reader: &mut R) -> Result<Option<T>, RpcError> {
    let mut length = [0u8; 4];
    match reader.read_exact(&mut length) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(io_error(e, false)),
    }
    let length = u32::from_le_bytes(length) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(RpcError::CouldNotDecode(format!(
            "frame of {length} bytes exceeds maximum of {MAX_FRAME_SIZE}"
        )));
    }
    let mut payload = vec![0u8; length];
    reader
        .read_exact(&mut payload)
        .map_err(|e| io_error(e, false))?;
    decode(&payload).map(Some)
}
