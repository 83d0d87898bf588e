// This file is part of Astarte.
//
// Copyright 2025, 2026 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Get Ownership Voucher Next Entry, Type 62
//!
//! Acknowledges the previous message and requests the next voucher entry.

use serde::{Deserialize, Serialize};

use crate::v101::ClientMessage;

use super::ov_next_entry::OvNextEntry;

/// ```cddl
/// TO2.GetOVNextEntry = [
///     OVEntryNum
/// ]
/// OVEntryNum = uint8
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOvNextEntry {
    /// Index of the requested entry, from zero to `NumOVEntries - 1`.
    pub ov_entry_num: u8,
}

impl Serialize for GetOvNextEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        (self.ov_entry_num,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for GetOvNextEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (ov_entry_num,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { ov_entry_num })
    }
}

crate::v101::cbor_message!(GetOvNextEntry, 62, "the TO2.GetOVNextEntry");

impl ClientMessage for GetOvNextEntry {
    type Response = OvNextEntry;
}
