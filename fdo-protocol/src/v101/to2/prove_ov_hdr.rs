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

//! Prove Ownership Voucher Header, Type 61
//!
//! From Owner Onboarding Service to Device.
//!
//! ```cddl
//! TO2.ProveOVHdr = CoseSignature
//! TO2ProveOVHdrUnprotectedHeaders = (
//!     CUPHNonce:       NonceTO2ProveDv, ;; nonce is used below in TO2.ProveDevice and TO2.Done
//!     CUPHOwnerPubKey: PublicKey ;; Owner key, as convenience to Device
//! )
//! ```
//!
//! This message serves several purposes:
//!
//! - The Owner begins sending the Ownership Voucher to the device (only the header is in this
//!   message).
//! - The Owner signs the message with the Owner key (the last key in the Ownership Voucher),
//!   allowing the Device to verify (later on) that the Owner controls this private key.
//! - The Owner starts the key exchange protocol by sending the initial key exchange parameter
//!   xAKeyExchange to the Device.

use coset::CoseSign1;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::ErrorKind;
use crate::utils::CborBstr;
use crate::v101::eat_signature::{CUPH_NONCE, CUPH_OWNER_PUB_KEY};
use crate::v101::hash_hmac::{HMac, Hash};
use crate::v101::key_exchange::XAKeyExchange;
use crate::v101::ownership_voucher::OvHeader;
use crate::v101::public_key::PublicKey;
use crate::v101::sign_info::EBSigInfo;
use crate::v101::{NonceTo2ProveDv, NonceTo2ProveOv};

use super::{nonce_param, sign1_payload, unprotected_param};

/// ```cddl
/// TO2.ProveOVHdr = CoseSignature
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProveOvHdr(pub CoseSign1);

impl ProveOvHdr {
    /// Returns the signed Cose
    pub fn sign(&self) -> &CoseSign1 {
        &self.0
    }

    /// Returns the decoded Cose payload
    pub fn payload(&self) -> Result<ProveOvHdrPayload, Error> {
        sign1_payload(&self.0, "the TO2.ProveOVHdr payload")
    }

    /// Nonce the device must sign in the TO2.ProveDevice
    pub fn nonce_to2_prove_dv(&self) -> Result<NonceTo2ProveDv, Error> {
        nonce_param(&self.0, CUPH_NONCE, "the TO2.ProveOVHdr CUPHNonce")
    }

    /// Owner public key used to sign the message.
    pub fn owner_pub_key(&self) -> Result<PublicKey, Error> {
        unprotected_param(&self.0, CUPH_OWNER_PUB_KEY)
            .ok_or(Error::new(
                ErrorKind::Invalid,
                "the TO2.ProveOVHdr owner public key is missing",
            ))?
            .deserialized()
            .map_err(|err| {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %err, "couldn't decode the owner public key");

                Error::new(ErrorKind::Decode, "the TO2.ProveOVHdr owner public key")
            })
    }
}

crate::v101::sign1_message!(ProveOvHdr, 61, "the TO2.ProveOVHdr");

/// ```cddl
/// TO2ProveOVHdrPayload = [
///     bstr .cbor OVHeader,     ;; Ownership Voucher header
///     NumOVEntries, ;; number of ownership voucher entries
///     HMac,         ;; Ownership Voucher "hmac" of hdr
///     NonceTO2ProveOV, ;; nonce from TO2.HelloDevice
///     eBSigInfo,    ;; Device attestation signature info
///     xAKeyExchange,;; Key exchange first step
///     helloDeviceHash: Hash, ;; hash of HelloDevice message
///     maxOwnerMessageSize
/// ]
/// NumOVEntries = uint8
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProveOvHdrPayload {
    /// Ownership Voucher header, with the bytes as received.
    pub ov_header: CborBstr<OvHeader>,
    /// Number of voucher entries.
    pub num_ov_entries: u8,
    /// HMAC of the header with the device secret.
    pub hmac: HMac,
    /// Nonce from TO2.HelloDevice
    pub nonce_to2_prove_ov: NonceTo2ProveOv,
    /// Device attestation signature info
    pub e_b_sig_info: EBSigInfo,
    /// Key exchange first step
    pub xa_key_exchange: XAKeyExchange,
    /// Hash of the HelloDevice message
    pub hello_device_hash: Hash,
    /// Maximum message size the owner can receive
    pub max_owner_message_size: u16,
}

impl Serialize for ProveOvHdrPayload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            ov_header,
            num_ov_entries,
            hmac,
            nonce_to2_prove_ov,
            e_b_sig_info,
            xa_key_exchange,
            hello_device_hash,
            max_owner_message_size,
        } = self;

        (
            ov_header,
            num_ov_entries,
            hmac,
            nonce_to2_prove_ov,
            e_b_sig_info,
            xa_key_exchange,
            hello_device_hash,
            max_owner_message_size,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProveOvHdrPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (
            ov_header,
            num_ov_entries,
            hmac,
            nonce_to2_prove_ov,
            e_b_sig_info,
            xa_key_exchange,
            hello_device_hash,
            max_owner_message_size,
        ) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            ov_header,
            num_ov_entries,
            hmac,
            nonce_to2_prove_ov,
            e_b_sig_info,
            xa_key_exchange,
            hello_device_hash,
            max_owner_message_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use coset::{CoseSign1Builder, HeaderBuilder};
    use pretty_assertions::assert_eq;

    use crate::utils::to_cbor;
    use crate::v101::hash_hmac::Hashtype;
    use crate::v101::public_key::PkType;
    use crate::v101::sign_info::{DeviceSgType, SigInfo};
    use crate::v101::tests::create_guid;
    use crate::v101::{Message, Nonce};

    use super::*;

    #[test]
    fn prove_ov_hdr_payload_and_headers() {
        let owner = PublicKey::with_crypto(PkType::Secp256R1, vec![4; 65]);

        let payload = ProveOvHdrPayload {
            ov_header: CborBstr::new(OvHeader {
                ovh_prot_ver: 101,
                ov_guid: create_guid(),
                ov_rv_info: Vec::new(),
                ov_device_info: "device".to_string(),
                ov_pub_key: owner.clone(),
                ov_dev_cert_chain_hash: None,
            }),
            num_ov_entries: 2,
            hmac: HMac::new(Hashtype::HmacSha256, vec![1; 32]).unwrap(),
            nonce_to2_prove_ov: Nonce::new([2; 16]),
            e_b_sig_info: SigInfo::new(DeviceSgType::StSecP256R1),
            xa_key_exchange: XAKeyExchange::new(vec![3; 10]),
            hello_device_hash: Hash::new(Hashtype::Sha256, vec![4; 32]).unwrap(),
            max_owner_message_size: 0,
        };

        let sign = CoseSign1Builder::new()
            .protected(
                HeaderBuilder::new()
                    .algorithm(coset::iana::Algorithm::ES256)
                    .build(),
            )
            .unprotected(
                HeaderBuilder::new()
                    .value(CUPH_NONCE, ciborium::Value::Bytes(vec![7; 16]))
                    .value(
                        CUPH_OWNER_PUB_KEY,
                        ciborium::Value::serialized(&owner).unwrap(),
                    )
                    .build(),
            )
            .payload(to_cbor(&payload, "test").unwrap())
            .signature(vec![0; 64])
            .build();

        let buf = ProveOvHdr(sign).to_bytes().unwrap();

        let res = ProveOvHdr::decode(&buf).unwrap();

        assert_eq!(res.payload().unwrap(), payload);
        assert_eq!(res.nonce_to2_prove_dv().unwrap(), Nonce::new([7; 16]));
        assert_eq!(res.owner_pub_key().unwrap(), owner);
    }

    #[test]
    fn missing_owner_key() {
        let sign = CoseSign1Builder::new()
            .payload(vec![0x80])
            .signature(vec![0; 64])
            .build();

        let res = ProveOvHdr(sign);

        assert!(res.owner_pub_key().is_err());
        assert!(res.nonce_to2_prove_dv().is_err());
    }
}
