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

//! Prove Device, Type 64
//!
//! Proves the provenance of the Device to the Owner, using the Entity Attestation Token based on
//! the challenge `NonceTO2ProveDv` sent as part of the TO2.ProveOVHdr unprotected header. The
//! second part of the key exchange, `xBKeyExchange`, travels in the FDO claim.
//!
//! ```cddl
//! TO2.ProveDevice = EAToken
//! $$EATPayloadBase //= (
//!     EAT-NONCE: NonceTO2ProveDv
//! )
//! TO2ProveDevicePayload = [
//!     xBKeyExchange
//! ]
//! $EATUnprotectedHeaders /= (
//!     EUPHNonce: NonceTO2SetupDv ;; NonceTO2SetupDv is used below in TO2.SetupDevice and TO2.Done2
//! )
//! $EATPayloads /= (
//!     TO2ProveDevicePayload
//! )
//! ```

use ciborium::Value;
use coset::CoseSign1;

use crate::Error;
use crate::error::ErrorKind;
use crate::v101::eat_signature::{EUPH_NONCE, EatPayload};
use crate::v101::key_exchange::XBKeyExchange;
use crate::v101::{ClientMessage, NonceTo2SetupDv};

use super::nonce_param;
use super::setup_device::SetupDevice;

/// ```cddl
/// TO2.ProveDevice = EAToken
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProveDevice(pub CoseSign1);

impl ProveDevice {
    /// Builds the FDO claim carrying the device key exchange parameter.
    pub fn fdo_claim(xb_key_exchange: &XBKeyExchange) -> Value {
        Value::Array(vec![Value::Bytes(xb_key_exchange.as_ref().to_vec())])
    }

    /// Returns the signed token.
    pub fn token(&self) -> &CoseSign1 {
        &self.0
    }

    /// Decodes the EAT claims without verifying the signature.
    pub fn claims(&self) -> Result<EatPayload, Error> {
        let payload = self.0.payload.as_deref().unwrap_or_default();

        EatPayload::decode(payload)
    }

    /// Returns the device key exchange parameter from the FDO claim.
    pub fn xb_key_exchange(&self) -> Result<XBKeyExchange, Error> {
        let claims = self.claims()?;

        let bytes = claims
            .fdo
            .and_then(|fdo| fdo.into_array().ok())
            .and_then(|fdo| fdo.into_iter().next())
            .and_then(|xb| xb.into_bytes().ok())
            .ok_or(Error::new(
                ErrorKind::Invalid,
                "the TO2.ProveDevice xBKeyExchange",
            ))?;

        Ok(XBKeyExchange::new(bytes))
    }

    /// Nonce the owner must sign in the TO2.SetupDevice
    pub fn nonce_to2_setup_dv(&self) -> Result<NonceTo2SetupDv, Error> {
        nonce_param(&self.0, EUPH_NONCE, "the TO2.ProveDevice EUPHNonce")
    }
}

crate::v101::sign1_message!(ProveDevice, 64, "the TO2.ProveDevice");

impl ClientMessage for ProveDevice {
    type Response = SetupDevice;
}
