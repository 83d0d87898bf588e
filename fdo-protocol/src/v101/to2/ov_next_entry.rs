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

//! Ownership Voucher Next Entry, Type 63
//!
//! Transmits the requested Ownership Voucher entry to the Device.

use ciborium::Value;
use coset::{AsCborValue, CoseSign1, TaggedCborSerializable};
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::ErrorKind;
use crate::v101::ownership_voucher::OvEntryPayload;

use super::sign1_payload;

/// Tag of a `COSE_Sign1`.
const COSE_SIGN1_TAG: u64 = 18;

/// ```cddl
/// TO2.OVNextEntry = [
///     OVEntryNum
///     OVEntry
/// ]
/// OVEntry = CoseSignature
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OvNextEntry {
    /// Index of the entry
    pub ov_entry_num: u8,
    /// Entry signed by the previous owner key.
    pub ov_entry: CoseSign1,
}

impl OvNextEntry {
    /// Decodes the entry payload, without verifying the signature.
    pub fn payload(&self) -> Result<OvEntryPayload, Error> {
        sign1_payload(&self.ov_entry, "the OVEntry payload")
    }

    /// Tagged encoding of the entry, hashed in the following entry.
    pub fn entry_bytes(&self) -> Result<Vec<u8>, Error> {
        self.ov_entry.clone().to_tagged_vec().map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode the OVEntry");

            Error::new(ErrorKind::Encode, "the OVEntry")
        })
    }
}

impl Serialize for OvNextEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let entry = self
            .ov_entry
            .clone()
            .to_cbor_value()
            .map_err(serde::ser::Error::custom)?;

        (
            self.ov_entry_num,
            Value::Tag(COSE_SIGN1_TAG, Box::new(entry)),
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OvNextEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (ov_entry_num, entry): (u8, Value) = Deserialize::deserialize(deserializer)?;

        let entry = match entry {
            Value::Tag(COSE_SIGN1_TAG, inner) => *inner,
            Value::Tag(tag, _) => {
                return Err(serde::de::Error::custom(format!(
                    "invalid OVEntry tag {tag}"
                )));
            }
            entry => entry,
        };

        let ov_entry = CoseSign1::from_cbor_value(entry).map_err(serde::de::Error::custom)?;

        Ok(Self {
            ov_entry_num,
            ov_entry,
        })
    }
}

crate::v101::cbor_message!(OvNextEntry, 63, "the TO2.OVNextEntry");

#[cfg(test)]
mod tests {
    use coset::{CoseSign1Builder, HeaderBuilder};
    use pretty_assertions::assert_eq;

    use crate::utils::to_cbor;
    use crate::v101::Message;
    use crate::v101::hash_hmac::{Hash, Hashtype};
    use crate::v101::public_key::{PkType, PublicKey};

    use super::*;

    #[test]
    fn ov_next_entry_roundtrip() {
        let payload = OvEntryPayload {
            ove_hash_prev_entry: Hash::new(Hashtype::Sha256, vec![1; 32]).unwrap(),
            ove_hash_hdr_info: Hash::new(Hashtype::Sha256, vec![2; 32]).unwrap(),
            ove_extra: None,
            ove_pub_key: PublicKey::with_crypto(PkType::Secp256R1, vec![4; 65]),
        };

        let entry = CoseSign1Builder::new()
            .protected(
                HeaderBuilder::new()
                    .algorithm(coset::iana::Algorithm::ES256)
                    .build(),
            )
            .payload(to_cbor(&payload, "test").unwrap())
            .signature(vec![0; 64])
            .build();

        let msg = OvNextEntry {
            ov_entry_num: 0,
            ov_entry: entry,
        };

        let buf = msg.to_bytes().unwrap();

        // array of two, index zero, then the COSE_Sign1 tag
        assert_eq!(&buf[..3], &[0x82, 0x00, 0xd2]);

        let res = OvNextEntry::decode(&buf).unwrap();

        assert_eq!(res.ov_entry_num, 0);
        assert_eq!(res.payload().unwrap(), payload);
        assert_eq!(res.entry_bytes().unwrap(), msg.entry_bytes().unwrap());
    }
}
