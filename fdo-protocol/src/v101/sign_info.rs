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

//! [`SigInfo`] is used to encode parameters for the device attestation signature.
//!
//! It flows from the device as `eASigInfo` and back to the device as `eBSigInfo`.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::Error;
use crate::error::ErrorKind;

/// ```cddl
/// SigInfo = [
///     sgType: DeviceSgType,
///     Info: bstr
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigInfo {
    sg_type: DeviceSgType,
    info: ByteBuf,
}

impl SigInfo {
    /// Create the sign info with the given type, the info is empty for ECDSA and RSA.
    pub fn new(sg_type: DeviceSgType) -> Self {
        Self {
            sg_type,
            info: ByteBuf::new(),
        }
    }

    /// Returns the signature type.
    pub fn sg_type(&self) -> DeviceSgType {
        self.sg_type
    }
}

impl Serialize for SigInfo {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { sg_type, info } = self;

        (sg_type, info).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SigInfo {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (sg_type, info) = Deserialize::deserialize(deserializer)?;

        Ok(Self { sg_type, info })
    }
}

/// ```cddl
/// eASigInfo = SigInfo  ;; from Device to Rendezvous/Owner
/// ```
pub type EASigInfo = SigInfo;

/// ```cddl
/// eBSigInfo = SigInfo  ;; from Owner/Rendezvous to Device
/// ```
pub type EBSigInfo = SigInfo;

/// ```cddl
/// DeviceSgType //= (
///     StSECP256R1: ES256,  ;; ECDSA secp256r1 = NIST-P-256 = prime256v1
///     StSECP384R1: ES384,  ;; ECDSA secp384r1 = NIST-P-384
///     StRSA2048:   RS256,  ;; RSA 2048 bit
///     StRSA3072:   RS384,  ;; RSA 3072 bit
///     StEPID10:    90,     ;; Intel® EPID 1.0 signature
///     StEPID11:    91      ;; Intel® EPID 1.1 signature
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
#[repr(i64)]
pub enum DeviceSgType {
    /// ECDSA secp256r1 = NIST-P-256 = prime256v1
    StSecP256R1 = coset::iana::Algorithm::ES256 as i64,
    /// ECDSA secp384r1 = NIST-P-384
    StSecP384R1 = coset::iana::Algorithm::ES384 as i64,
    /// RSA 2048 bit
    StRsa2048 = coset::iana::Algorithm::RS256 as i64,
    /// RSA 3072 bit
    StRsa3072 = coset::iana::Algorithm::RS384 as i64,
    /// Intel® EPID 1.0 signature
    StEpid10 = 90,
    /// Intel® EPID 1.1 signature
    StEpid11 = 91,
}

impl TryFrom<i64> for DeviceSgType {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        let value = match value {
            -7 => DeviceSgType::StSecP256R1,
            -35 => DeviceSgType::StSecP384R1,
            -257 => DeviceSgType::StRsa2048,
            -258 => DeviceSgType::StRsa3072,
            90 => DeviceSgType::StEpid10,
            91 => DeviceSgType::StEpid11,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for DeviceSgType")),
        };

        Ok(value)
    }
}

impl From<DeviceSgType> for i64 {
    fn from(value: DeviceSgType) -> Self {
        value as i64
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::utils::{from_cbor, to_cbor};

    use super::*;

    #[test]
    fn sig_info_encoding() {
        let info = SigInfo::new(DeviceSgType::StSecP256R1);

        let buf = to_cbor(&info, "sig info").unwrap();

        // [-7, h'']
        assert_eq!(buf, [0x82, 0x26, 0x40]);

        let back: SigInfo = from_cbor(&buf, "sig info").unwrap();

        assert_eq!(back, info);
    }

    #[test]
    fn sg_type_matches_cose_algorithms() {
        assert_eq!(i64::from(DeviceSgType::StSecP384R1), -35);
        assert_eq!(i64::from(DeviceSgType::StRsa3072), -258);
        assert!(DeviceSgType::try_from(0).is_err());
    }
}
