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

//! SetCredentials, Type 11
//!
//! The manufacturer sends the Ownership Voucher header the device stores in its credential.

use serde::{Deserialize, Serialize};

use crate::utils::CborBstr;
use crate::v101::ownership_voucher::OvHeader;

/// ```cddl
/// DI.SetCredentials = [
///     OVHeader
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SetCredentials {
    /// Header of the new Ownership Voucher.
    pub ov_header: CborBstr<OvHeader>,
}

impl Serialize for SetCredentials {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        (&self.ov_header,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SetCredentials {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (ov_header,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { ov_header })
    }
}

crate::v101::cbor_message!(SetCredentials, 11, "the DI.SetCredentials");
