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

//! The Device Credential type indicates those values which must be persisted in the Device to
//! prepare it for FIDO Device Onboard onboarding.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_bytes::{ByteBuf, Bytes};
use zeroize::Zeroizing;

use crate::Error;
use crate::error::ErrorKind;

use super::hash_hmac::Hash;
use super::rendezvous_info::RendezvousInfo;
use super::{Guid, Protver};

/// Onboarding lifecycle of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum DeviceState {
    /// Device Initialization never completed.
    PreDi = 0,
    /// Initialized, waiting to be onboarded.
    PreTo1 = 1,
    /// Onboarded.
    Idle = 2,
    /// Onboarded, the credential was handed over to a new owner.
    Resale = 3,
}

impl DeviceState {
    /// Returns true if the device must look for its owner.
    pub fn needs_onboarding(&self, resale: bool) -> bool {
        match self {
            DeviceState::PreTo1 | DeviceState::Resale => true,
            DeviceState::Idle => resale,
            DeviceState::PreDi => false,
        }
    }
}

impl TryFrom<u8> for DeviceState {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0 => DeviceState::PreDi,
            1 => DeviceState::PreTo1,
            2 => DeviceState::Idle,
            3 => DeviceState::Resale,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for DeviceState")),
        };

        Ok(value)
    }
}

impl From<DeviceState> for u8 {
    fn from(value: DeviceState) -> Self {
        value as u8
    }
}

/// Persisted device credentials.
///
/// The GUID, rendezvous info and public key hash are replaced at the end of TO2. The private key
/// and the secrets must stay confidential.
///
/// ```cddl
/// DeviceCredential = [
///     DCProtVer:     protver,
///     DCGuid:        Guid,           ;; modified in TO2
///     DCRVInfo:      RendezvousInfo, ;; modified in TO2
///     DCDeviceInfo:  tstr,
///     DCPubKeyHash:  Hash,           ;; modified in TO2
///     DCState:       uint8,
///     DCPrivateKey:  bstr,           ;; PKCS#8, confidentiality required
///     DCHmacSecret:  bstr,           ;; HMAC-SHA256 key, confidentiality required
///     DCHmacSecret384: bstr          ;; HMAC-SHA384 key, confidentiality required
/// ]
/// ```
#[derive(Clone, PartialEq)]
pub struct DeviceCredential {
    /// Specifies the protocol version.
    pub dc_prot_ver: Protver,
    /// Current device’s GUID.
    pub dc_guid: Guid,
    /// Contains instructions on how to find the Rendezvous Server.
    pub dc_rv_info: RendezvousInfo,
    /// Text used by the manufacturer to indicate the device type.
    pub dc_device_info: String,
    /// Hash of the manufacturer’s public key, matched against the voucher header.
    pub dc_pub_key_hash: Hash,
    /// Onboarding lifecycle marker.
    pub dc_state: DeviceState,
    /// Device attestation key, PKCS#8 DER.
    pub dc_private_key: Zeroizing<Vec<u8>>,
    /// Secret for HMAC-SHA256
    pub dc_hmac_secret: Zeroizing<Vec<u8>>,
    /// Secret for HMAC-SHA384
    pub dc_hmac_secret_384: Zeroizing<Vec<u8>>,
}

impl DeviceCredential {
    /// Encodes the credential to CBOR.
    pub fn encode(&self) -> Result<Zeroizing<Vec<u8>>, Error> {
        crate::utils::to_cbor(self, "device credential").map(Zeroizing::new)
    }

    /// Decodes the credential from CBOR.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        crate::utils::from_cbor(buf, "device credential")
    }
}

impl Debug for DeviceCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCredential")
            .field("dc_prot_ver", &self.dc_prot_ver)
            .field("dc_guid", &self.dc_guid)
            .field("dc_rv_info", &self.dc_rv_info)
            .field("dc_device_info", &self.dc_device_info)
            .field("dc_pub_key_hash", &self.dc_pub_key_hash)
            .field("dc_state", &self.dc_state)
            .finish_non_exhaustive()
    }
}

impl Serialize for DeviceCredential {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            dc_prot_ver,
            dc_guid,
            dc_rv_info,
            dc_device_info,
            dc_pub_key_hash,
            dc_state,
            dc_private_key,
            dc_hmac_secret,
            dc_hmac_secret_384,
        } = self;

        (
            dc_prot_ver,
            dc_guid,
            dc_rv_info,
            dc_device_info,
            dc_pub_key_hash,
            dc_state,
            Bytes::new(dc_private_key),
            Bytes::new(dc_hmac_secret),
            Bytes::new(dc_hmac_secret_384),
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DeviceCredential {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (
            dc_prot_ver,
            dc_guid,
            dc_rv_info,
            dc_device_info,
            dc_pub_key_hash,
            dc_state,
            dc_private_key,
            dc_hmac_secret,
            dc_hmac_secret_384,
        ): (_, _, _, _, _, _, ByteBuf, ByteBuf, ByteBuf) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            dc_prot_ver,
            dc_guid,
            dc_rv_info,
            dc_device_info,
            dc_pub_key_hash,
            dc_state,
            dc_private_key: Zeroizing::new(dc_private_key.into_vec()),
            dc_hmac_secret: Zeroizing::new(dc_hmac_secret.into_vec()),
            dc_hmac_secret_384: Zeroizing::new(dc_hmac_secret_384.into_vec()),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use crate::v101::hash_hmac::Hashtype;
    use crate::v101::rendezvous_info::{RendezvousInstr, RvVariable};
    use crate::v101::tests::create_guid;

    use super::*;

    pub(crate) fn create_credential() -> DeviceCredential {
        DeviceCredential {
            dc_prot_ver: 101,
            dc_guid: create_guid(),
            dc_rv_info: vec![vec![
                RendezvousInstr::new(RvVariable::Dns, "rv.example.com").unwrap(),
                RendezvousInstr::new(RvVariable::DevPort, &8041u16).unwrap(),
            ]],
            dc_device_info: "test-device".to_string(),
            dc_pub_key_hash: Hash::new(Hashtype::Sha256, vec![3; 32]).unwrap(),
            dc_state: DeviceState::PreTo1,
            dc_private_key: Zeroizing::new(vec![0x30, 0x01, 0x02]),
            dc_hmac_secret: Zeroizing::new(vec![1; 32]),
            dc_hmac_secret_384: Zeroizing::new(vec![2; 48]),
        }
    }

    #[test]
    fn credential_roundtrip() {
        let credential = create_credential();

        let buf = credential.encode().unwrap();

        // Version comes first: array of 9, then 101
        assert_eq!(&buf[..3], &[0x89, 0x18, 0x65]);

        let back = DeviceCredential::decode(&buf).unwrap();

        assert_eq!(back, credential);
    }

    #[test]
    fn debug_hides_secrets() {
        let credential = create_credential();

        let debug = format!("{credential:?}");

        assert!(debug.contains("test-device"));
        assert!(!debug.contains("dc_hmac_secret"));
        assert!(!debug.contains("dc_private_key"));
    }

    #[test]
    fn states_needing_onboarding() {
        assert!(DeviceState::PreTo1.needs_onboarding(false));
        assert!(DeviceState::Resale.needs_onboarding(false));
        assert!(!DeviceState::Idle.needs_onboarding(false));
        assert!(DeviceState::Idle.needs_onboarding(true));
        assert!(!DeviceState::PreDi.needs_onboarding(true));
    }
}
