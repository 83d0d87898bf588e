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

//! Hello Device, Type 60
//!
//! First message in the TO2, sets up new owner for proof of ownership.
//!
//! The maxDeviceMessageSize indicates the maximum sized FIDO Device Onboard message the Device is
//! able to receive, buffer, and decode. A value of zero indicates the default message size.

use serde::{Deserialize, Serialize};

use crate::v101::key_exchange::{CipherSuite, KexSuiteName};
use crate::v101::sign_info::EASigInfo;
use crate::v101::{ClientMessage, Guid, InitialMessage, NonceTo2ProveOv};

use super::prove_ov_hdr::ProveOvHdr;

/// ```cddl
/// TO2.HelloDevice = [
///     maxDeviceMessageSize,
///     Guid,
///     NonceTO2ProveOV,
///     kexSuiteName,
///     cipherSuiteName,
///     eASigInfo  ;; Device attestation signature info
/// ]
/// maxDeviceMessageSize = uint16
/// kexSuiteName = tstr
/// cipherSuiteName = CipherSuites
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HelloDevice {
    /// Maximum message size the device can receive, zero for the default.
    pub max_device_message_size: u16,
    /// Current device GUID.
    pub guid: Guid,
    /// Nonce the Owner must sign in the ProveOVHdr.
    pub nonce_to2_prove_ov: NonceTo2ProveOv,
    /// Key exchange requested by the device.
    pub kex_suite_name: KexSuiteName,
    /// Cipher for the encrypted channel.
    pub cipher_suite_name: CipherSuite,
    /// Device attestation signature info.
    pub e_a_sig_info: EASigInfo,
}

impl Serialize for HelloDevice {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            max_device_message_size,
            guid,
            nonce_to2_prove_ov,
            kex_suite_name,
            cipher_suite_name,
            e_a_sig_info,
        } = self;

        (
            max_device_message_size,
            guid,
            nonce_to2_prove_ov,
            kex_suite_name,
            cipher_suite_name,
            e_a_sig_info,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HelloDevice {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (
            max_device_message_size,
            guid,
            nonce_to2_prove_ov,
            kex_suite_name,
            cipher_suite_name,
            e_a_sig_info,
        ) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            max_device_message_size,
            guid,
            nonce_to2_prove_ov,
            kex_suite_name,
            cipher_suite_name,
            e_a_sig_info,
        })
    }
}

crate::v101::cbor_message!(HelloDevice, 60, "the TO2.HelloDevice");

impl ClientMessage for HelloDevice {
    type Response = ProveOvHdr;
}

impl InitialMessage for HelloDevice {}
