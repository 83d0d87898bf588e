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

//! Transfer Ownership Protocol 2 (TO2).
//!
//! The Device connects to the Owner Onboarding Service, the Owner proves its ownership through the
//! Ownership Voucher, the Device proves its identity, both sides exchange keys to set up an
//! encrypted channel, exchange service info and the Device receives its new credentials.

use ciborium::Value;
use coset::{CoseSign1, Label};
use serde::de::DeserializeOwned;

use crate::Error;
use crate::error::ErrorKind;

pub mod device_service_info;
pub mod device_service_info_ready;
pub mod done;
pub mod done2;
pub mod get_ov_next_entry;
pub mod hello_device;
pub mod ov_next_entry;
pub mod owner_service_info;
pub mod owner_service_info_ready;
pub mod prove_device;
pub mod prove_ov_hdr;
pub mod setup_device;

/// Returns an unprotected header parameter of the signature.
pub(crate) fn unprotected_param(sign: &CoseSign1, label: i64) -> Option<&Value> {
    sign.unprotected
        .rest
        .iter()
        .find_map(|(key, value)| (*key == Label::Int(label)).then_some(value))
}

/// Decodes the payload of a signature, without verifying it.
pub(crate) fn sign1_payload<T>(sign: &CoseSign1, ctx: &'static str) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    let payload = sign
        .payload
        .as_deref()
        .ok_or(Error::new(ErrorKind::Invalid, ctx))?;

    crate::utils::from_cbor(payload, ctx)
}

/// Reads a 16 bytes nonce from an unprotected header parameter.
pub(crate) fn nonce_param(
    sign: &CoseSign1,
    label: i64,
    ctx: &'static str,
) -> Result<crate::v101::Nonce, Error> {
    let bytes: [u8; 16] = unprotected_param(sign, label)
        .and_then(Value::as_bytes)
        .and_then(|bytes| bytes.as_slice().try_into().ok())
        .ok_or(Error::new(ErrorKind::Invalid, ctx))?;

    Ok(crate::v101::Nonce::new(bytes))
}
