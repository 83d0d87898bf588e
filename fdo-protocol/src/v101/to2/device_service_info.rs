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

//! Device Service Info, Type 68
//!
//! Sends as many Device to Owner ServiceInfo entries as will conveniently fit into a message,
//! based on protocol and implementation constraints. The first message carries the `devmod`
//! module.

use serde::{Deserialize, Serialize};

use crate::v101::ClientMessage;
use crate::v101::service_info::ServiceInfo;

use super::owner_service_info::OwnerServiceInfo;

/// ```cddl
/// TO2.DeviceServiceInfo = [
///     IsMoreServiceInfo,
///     ServiceInfo
/// ]
/// IsMoreServiceInfo = bool
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceServiceInfo {
    /// The device has more service info to send.
    pub is_more_service_info: bool,
    /// Service info sent to the owner.
    pub service_info: ServiceInfo,
}

impl Serialize for DeviceServiceInfo {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            is_more_service_info,
            service_info,
        } = self;

        (is_more_service_info, service_info).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DeviceServiceInfo {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (is_more_service_info, service_info) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            is_more_service_info,
            service_info,
        })
    }
}

crate::v101::cbor_message!(DeviceServiceInfo, 68, "the TO2.DeviceServiceInfo");

impl ClientMessage for DeviceServiceInfo {
    type Response = OwnerServiceInfo;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::v101::Message;
    use crate::v101::service_info::ServiceInfoKv;

    use super::*;

    #[test]
    fn device_service_info_roundtrip() {
        let msg = DeviceServiceInfo {
            is_more_service_info: false,
            service_info: vec![ServiceInfoKv::new("devmod:active", &true).unwrap()],
        };

        let buf = msg.to_bytes().unwrap();

        assert_eq!(DeviceServiceInfo::decode(&buf).unwrap(), msg);
    }

    #[test]
    fn empty_service_info() {
        let msg = DeviceServiceInfo {
            is_more_service_info: false,
            service_info: Vec::new(),
        };

        let buf = msg.to_bytes().unwrap();

        assert_eq!(buf, [0x82, 0xf4, 0x80]);
    }
}
