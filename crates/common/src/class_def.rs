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
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The (class handle, workspace handle) pair addressing a table across the process boundary.
///
/// Two backing stores referring to the same table on the same peer compare equal by this
/// pair, never by reference.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Encode,
    Decode,
)]
pub struct ClassDef {
    pub class_handle: i64,
    pub workspace_handle: i64,
}

impl ClassDef {
    pub fn new(class_handle: i64, workspace_handle: i64) -> Self {
        Self {
            class_handle,
            workspace_handle,
        }
    }
}

impl Display for ClassDef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}@{}", self.class_handle, self.workspace_handle)
    }
}
