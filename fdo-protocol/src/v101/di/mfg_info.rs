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

//! Manufacturing info sent in the DI.AppStart.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::utils::Hex;
use crate::v101::public_key::{PkEnc, PkType};

/// Device info for the manufacturer, matching the one of the C and Java clients.
///
/// ```text
/// MfgInfo.cbor = [
///   pkType,
///   pkEnc,
///   serialNo,  ;; tstr
///   modelNo,   ;; tstr
///   CSR,       ;; bstr
/// ]
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct MfgInfo {
    /// Type of the device key
    pub pk_type: PkType,
    /// Encoding of the device key
    pub pk_enc: PkEnc,
    /// Serial number of the device
    pub serial_no: String,
    /// Model number, used by the manufacturer as the device info
    pub model_no: String,
    /// DER certificate signing request for the device key
    pub cert_info: ByteBuf,
}

impl Debug for MfgInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            pk_type,
            pk_enc,
            serial_no,
            model_no,
            cert_info,
        } = self;

        f.debug_struct("MfgInfo")
            .field("pk_type", &pk_type)
            .field("pk_enc", &pk_enc)
            .field("serial_no", &serial_no)
            .field("model_no", &model_no)
            .field("cert_info", &Hex::new(cert_info))
            .finish()
    }
}

impl Serialize for MfgInfo {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            pk_type,
            pk_enc,
            serial_no,
            model_no,
            cert_info,
        } = self;

        (pk_type, pk_enc, serial_no, model_no, cert_info).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MfgInfo {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (pk_type, pk_enc, serial_no, model_no, cert_info) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            pk_type,
            pk_enc,
            serial_no,
            model_no,
            cert_info,
        })
    }
}
