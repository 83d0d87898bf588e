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

//! Device Service Info Ready, Type 66
//!
//! Carries the HMAC of the replacement Ownership Voucher header and the maximum size of the
//! owner service info the device can receive.

use serde::{Deserialize, Serialize};

use crate::v101::ClientMessage;
use crate::v101::hash_hmac::HMac;

use super::owner_service_info_ready::OwnerServiceInfoReady;

/// ```cddl
/// TO2.DeviceServiceInfoReady = [
///     ReplacementHMac, ;; Replacement for DI.SetHMac.HMac or equivalent
///     maxOwnerServiceInfoSz    ;; maximum size service info that Device can receive
/// ]
/// ReplacementHMac = HMac / null
/// maxOwnerServiceInfoSz = uint16 / null
/// ```
///
/// A null `ReplacementHMac` asks the owner to keep the current credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceServiceInfoReady {
    /// HMAC of the replacement header, null on credential reuse.
    pub replacement_hmac: Option<HMac>,
    /// Maximum size of the owner service info, null for the default.
    pub max_owner_service_info_sz: Option<u16>,
}

impl Serialize for DeviceServiceInfoReady {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            replacement_hmac,
            max_owner_service_info_sz,
        } = self;

        (replacement_hmac, max_owner_service_info_sz).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DeviceServiceInfoReady {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (replacement_hmac, max_owner_service_info_sz) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            replacement_hmac,
            max_owner_service_info_sz,
        })
    }
}

crate::v101::cbor_message!(
    DeviceServiceInfoReady,
    66,
    "the TO2.DeviceServiceInfoReady"
);

impl ClientMessage for DeviceServiceInfoReady {
    type Response = OwnerServiceInfoReady;
}
