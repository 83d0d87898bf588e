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

//! Owner Service Info, Type 69
//!
//! Sends as many Owner to Device ServiceInfo entries as will conveniently fit into a message.
//! The owner keeps sending until `IsDone` is true.

use serde::{Deserialize, Serialize};

use crate::v101::service_info::ServiceInfo;

/// ```cddl
/// TO2.OwnerServiceInfo = [
///     IsMoreServiceInfo,
///     IsDone,
///     ServiceInfo
/// ]
/// IsDone = bool
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerServiceInfo {
    /// The owner has more service info to send.
    pub is_more_service_info: bool,
    /// The owner finished the service info exchange.
    pub is_done: bool,
    /// Service info sent to the device.
    pub service_info: ServiceInfo,
}

impl Serialize for OwnerServiceInfo {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            is_more_service_info,
            is_done,
            service_info,
        } = self;

        (is_more_service_info, is_done, service_info).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OwnerServiceInfo {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (is_more_service_info, is_done, service_info) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            is_more_service_info,
            is_done,
            service_info,
        })
    }
}

crate::v101::cbor_message!(OwnerServiceInfo, 69, "the TO2.OwnerServiceInfo");
