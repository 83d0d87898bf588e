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

//! Parts of the Ownership Voucher the device receives during TO2.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use super::hash_hmac::Hash;
use super::public_key::PublicKey;
use super::rendezvous_info::RendezvousInfo;
use super::{Guid, Protver};

/// ```cddl
/// OVHeader = [
///     OVHProtVer:        protver,        ;; protocol version
///     OVGuid:            Guid,           ;; guid
///     OVRVInfo:          RendezvousInfo, ;; rendezvous instructions
///     OVDeviceInfo:      tstr,           ;; DeviceInfo
///     OVPubKey:          PublicKey,      ;; mfg public key
///     OVDevCertChainHash:OVDevCertChainHashOrNull
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OvHeader {
    /// Protocol version
    pub ovh_prot_ver: Protver,
    /// Device GUID
    pub ov_guid: Guid,
    /// Rendezvous instructions
    pub ov_rv_info: RendezvousInfo,
    /// Device info string
    pub ov_device_info: String,
    /// Manufacturer public key
    pub ov_pub_key: PublicKey,
    /// Hash of the device certificate chain
    pub ov_dev_cert_chain_hash: Option<Hash>,
}

impl Serialize for OvHeader {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            ovh_prot_ver,
            ov_guid,
            ov_rv_info,
            ov_device_info,
            ov_pub_key,
            ov_dev_cert_chain_hash,
        } = self;

        (
            ovh_prot_ver,
            ov_guid,
            ov_rv_info,
            ov_device_info,
            ov_pub_key,
            ov_dev_cert_chain_hash,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OvHeader {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (ovh_prot_ver, ov_guid, ov_rv_info, ov_device_info, ov_pub_key, ov_dev_cert_chain_hash) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            ovh_prot_ver,
            ov_guid,
            ov_rv_info,
            ov_device_info,
            ov_pub_key,
            ov_dev_cert_chain_hash,
        })
    }
}

/// ```cddl
/// OVEntryPayload = [
///     OVEHashPrevEntry: Hash,
///     OVEHashHdrInfo:   Hash,  ;; hash[GUID||DeviceInfo] in header
///     OVEExtra:         null / bstr .cbor OVEExtraInfo
///     OVEPubKey:        PublicKey
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OvEntryPayload {
    /// Hash of the previous entry, or of the header and its HMAC for the first one.
    pub ove_hash_prev_entry: Hash,
    /// Hash of the GUID and device info of the header.
    pub ove_hash_hdr_info: Hash,
    /// Extra information, not interpreted by the device.
    pub ove_extra: Option<ByteBuf>,
    /// Key of the next owner in the chain.
    pub ove_pub_key: PublicKey,
}

impl Serialize for OvEntryPayload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            ove_hash_prev_entry,
            ove_hash_hdr_info,
            ove_extra,
            ove_pub_key,
        } = self;

        (ove_hash_prev_entry, ove_hash_hdr_info, ove_extra, ove_pub_key).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OvEntryPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (ove_hash_prev_entry, ove_hash_hdr_info, ove_extra, ove_pub_key) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            ove_hash_prev_entry,
            ove_hash_hdr_info,
            ove_extra,
            ove_pub_key,
        })
    }
}
