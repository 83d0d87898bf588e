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

//! Acknowledges the HelloRV message.
//!
//! The nonce must be returned inside the signed `TO1.ProveToRV`.

use serde::{Deserialize, Serialize};

use crate::v101::NonceTo1Proof;
use crate::v101::sign_info::EBSigInfo;

/// ```cddl
/// TO1.HelloRVAck = [
///     NonceTO1Proof,
///     eBSigInfo
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HelloRvAck {
    /// Nonce to sign in the ProveToRV.
    pub nonce_to1_proof: NonceTo1Proof,
    /// Signature info echoed by the Rendezvous Server.
    pub e_b_sig_info: EBSigInfo,
}

impl Serialize for HelloRvAck {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            nonce_to1_proof,
            e_b_sig_info,
        } = self;

        (nonce_to1_proof, e_b_sig_info).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HelloRvAck {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (nonce_to1_proof, e_b_sig_info) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            nonce_to1_proof,
            e_b_sig_info,
        })
    }
}

crate::v101::cbor_message!(HelloRvAck, 31, "the TO1.HelloRVAck");
