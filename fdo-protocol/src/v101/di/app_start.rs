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

//! AppStart, Type 10
//!
//! Starts the Device Initialization with the manufacturing info of the device.

use serde::{Deserialize, Serialize};

use crate::utils::CborBstr;
use crate::v101::{ClientMessage, InitialMessage};

use super::mfg_info::MfgInfo;
use super::set_credentials::SetCredentials;

/// ```cddl
/// DI.AppStart = [
///     DeviceMfgInfo
/// ]
/// DeviceMfgInfo = bstr .cbor MfgInfo
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AppStart {
    /// Info the manufacturer uses to create the voucher.
    pub device_mfg_info: CborBstr<MfgInfo>,
}

impl AppStart {
    /// Creates the message with the manufacturing info.
    pub fn new(device_mfg_info: MfgInfo) -> Self {
        Self {
            device_mfg_info: CborBstr::new(device_mfg_info),
        }
    }
}

impl Serialize for AppStart {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        (&self.device_mfg_info,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AppStart {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (device_mfg_info,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { device_mfg_info })
    }
}

crate::v101::cbor_message!(AppStart, 10, "the DI.AppStart");

impl ClientMessage for AppStart {
    type Response = SetCredentials;
}

impl InitialMessage for AppStart {}
