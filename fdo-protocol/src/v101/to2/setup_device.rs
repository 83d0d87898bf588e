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

//! Setup Device, Type 65
//!
//! Sends the new rendezvous information, GUID and owner key to the device, signed with the new
//! owner key `Owner2Key`. From this message on the channel is encrypted.

use coset::CoseSign1;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::v101::public_key::PublicKey;
use crate::v101::rendezvous_info::RendezvousInfo;
use crate::v101::{Guid, NonceTo2SetupDv};

use super::sign1_payload;

/// ```cddl
/// TO2.SetupDevice = CoseSignature
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SetupDevice(pub CoseSign1);

impl SetupDevice {
    /// Returns the signed Cose
    pub fn sign(&self) -> &CoseSign1 {
        &self.0
    }

    /// Decodes the payload, without verifying the signature.
    pub fn payload(&self) -> Result<SetupDevicePayload, Error> {
        sign1_payload(&self.0, "the TO2.SetupDevice payload")
    }
}

crate::v101::sign1_message!(SetupDevice, 65, "the TO2.SetupDevice");

/// ```cddl
/// TO2SetupDevicePayload = [
///     RendezvousInfo, ;; RendezvousInfo replacement
///     Guid,           ;; GUID replacement
///     NonceTO2SetupDv,;; proves freshness of signature
///     Owner2Key       ;; Replacement for Owner key
/// ]
/// Owner2Key = PublicKey
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SetupDevicePayload {
    /// Rendezvous info replacement
    pub rendezvous_info: RendezvousInfo,
    /// GUID replacement
    pub guid: Guid,
    /// Nonce sent in the TO2.ProveDevice
    pub nonce_to2_setup_dv: NonceTo2SetupDv,
    /// Replacement for the owner key
    pub owner2_key: PublicKey,
}

impl Serialize for SetupDevicePayload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            rendezvous_info,
            guid,
            nonce_to2_setup_dv,
            owner2_key,
        } = self;

        (rendezvous_info, guid, nonce_to2_setup_dv, owner2_key).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SetupDevicePayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (rendezvous_info, guid, nonce_to2_setup_dv, owner2_key) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            rendezvous_info,
            guid,
            nonce_to2_setup_dv,
            owner2_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use coset::{CoseSign1Builder, HeaderBuilder};
    use pretty_assertions::assert_eq;

    use crate::utils::to_cbor;
    use crate::v101::public_key::PkType;
    use crate::v101::rendezvous_info::{RendezvousInstr, RvVariable};
    use crate::v101::tests::create_guid;
    use crate::v101::{Message, Nonce};

    use super::*;

    #[test]
    fn setup_device_payload() {
        let payload = SetupDevicePayload {
            rendezvous_info: vec![vec![
                RendezvousInstr::new(RvVariable::Dns, "rv.example.com").unwrap(),
                RendezvousInstr::flag(RvVariable::Bypass),
            ]],
            guid: create_guid(),
            nonce_to2_setup_dv: Nonce::new([3; 16]),
            owner2_key: PublicKey::with_crypto(PkType::Secp384R1, vec![4; 97]),
        };

        let sign = CoseSign1Builder::new()
            .protected(
                HeaderBuilder::new()
                    .algorithm(coset::iana::Algorithm::ES384)
                    .build(),
            )
            .payload(to_cbor(&payload, "test").unwrap())
            .signature(vec![0; 96])
            .build();

        let buf = SetupDevice(sign).to_bytes().unwrap();

        let res = SetupDevice::decode(&buf).unwrap();

        assert_eq!(res.payload().unwrap(), payload);
    }
}
