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

//! EAT signatures are used for entity attestation of Devices.
//!
//! ```cddl
//! EAToken = #6.18(EATokenBase)
//! EATPayloadBaseMap = { EATPayloadBase }
//! $$EATPayloadBase //= (
//!     EAT-FDO => $EATPayloads,
//!     EAT-NONCE => Nonce,
//!     EAT-UEID  => EAT-GUID,
//!     EATOtherClaims
//! )
//! EAT-GUID = bstr .size 17
//! EAT-RAND = 1
//! ```

use ciborium::Value;

use crate::Error;
use crate::error::ErrorKind;
use crate::utils::{from_cbor, to_cbor};

use super::{Guid, Nonce};

/// ```cddl
/// EAT-NONCE      = 10 ;; iana assignment
/// ```
pub const EAT_NONCE: i64 = 10;

/// ```cddl
/// EAT-UEID       = 256 ;; iana assignment
/// ```
pub const EAT_UEID: i64 = 256;

/// ```cddl
/// EAT-FDO        = -257 ;; iana assignment
/// ```
pub const EAT_FDO: i64 = -257;

/// ```cddl
/// EUPHNonce      = -259 ;; iana assignment
/// ```
pub const EUPH_NONCE: i64 = -259;

/// ```cddl
/// CUPHNonce       = 256 ;; iana assignment
/// ```
pub const CUPH_NONCE: i64 = 256;

/// ```cddl
/// CUPHOwnerPubKey = 257 ;; iana assignment
/// ```
pub const CUPH_OWNER_PUB_KEY: i64 = 257;

/// First byte of the UEID, marks a random identifier.
const EAT_RAND: u8 = 1;

/// Claims of the EAT signed by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct EatPayload {
    /// Nonce received from the server.
    pub nonce: Nonce,
    /// Device GUID.
    pub guid: Guid,
    /// FDO specific claim.
    pub fdo: Option<Value>,
}

impl EatPayload {
    /// Encodes the claims map.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut ueid = Vec::with_capacity(17);
        ueid.push(EAT_RAND);
        ueid.extend_from_slice(self.guid.as_bytes());

        let mut claims = Vec::with_capacity(3);

        if let Some(fdo) = &self.fdo {
            claims.push((Value::from(EAT_FDO), fdo.clone()));
        }

        claims.push((
            Value::from(EAT_NONCE),
            Value::Bytes(self.nonce.as_bytes().to_vec()),
        ));
        claims.push((Value::from(EAT_UEID), Value::Bytes(ueid)));

        to_cbor(&Value::Map(claims), "EAT payload")
    }

    /// Decodes the claims map.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let value: Value = from_cbor(buf, "EAT payload")?;

        let claims = value
            .into_map()
            .map_err(|_| Error::new(ErrorKind::Invalid, "EAT payload is not a map"))?;

        let mut nonce = None;
        let mut guid = None;
        let mut fdo = None;

        for (key, value) in claims {
            let Some(key) = key.as_integer().and_then(|key| i64::try_from(key).ok()) else {
                continue;
            };

            match key {
                EAT_NONCE => {
                    let bytes: [u8; 16] = value
                        .as_bytes()
                        .and_then(|bytes| bytes.as_slice().try_into().ok())
                        .ok_or(Error::new(ErrorKind::Invalid, "EAT nonce"))?;

                    nonce = Some(Nonce::new(bytes));
                }
                EAT_UEID => {
                    let bytes: [u8; 16] = value
                        .as_bytes()
                        .and_then(|bytes| bytes.split_first())
                        .filter(|(first, _)| **first == EAT_RAND)
                        .and_then(|(_, guid)| guid.try_into().ok())
                        .ok_or(Error::new(ErrorKind::Invalid, "EAT ueid"))?;

                    guid = Some(Guid::new(bytes));
                }
                EAT_FDO => {
                    fdo = Some(value);
                }
                _ => {}
            }
        }

        Ok(Self {
            nonce: nonce.ok_or(Error::new(ErrorKind::Invalid, "missing EAT nonce"))?,
            guid: guid.ok_or(Error::new(ErrorKind::Invalid, "missing EAT ueid"))?,
            fdo,
        })
    }
}
