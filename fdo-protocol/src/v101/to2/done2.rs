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

//! Done 2, Type 71
//!
//! Last message of the TO2, the owner echoes the nonce the device sent in the TO2.ProveDevice.

use serde::{Deserialize, Serialize};

use crate::v101::NonceTo2SetupDv;

/// ```cddl
/// TO2.Done2 = [
///     NonceTO2SetupDv
/// ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done2 {
    /// Nonce from the TO2.ProveDevice unprotected header.
    pub nonce_to2_setup_dv: NonceTo2SetupDv,
}

impl Serialize for Done2 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        (self.nonce_to2_setup_dv,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Done2 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (nonce_to2_setup_dv,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { nonce_to2_setup_dv })
    }
}

crate::v101::cbor_message!(Done2, 71, "the TO2.Done2");
