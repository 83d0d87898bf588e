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

//! Completes the TO1 protocol.
//!
//! Indicates to the Device ROE that a new Owner is indeed waiting for it, and may be found by
//! connecting to any of the entries in to1dBlobPayload.RVTO2Addr containing network address
//! information.

use coset::CoseSign1;

use crate::Error;
use crate::utils::from_cbor;
use crate::v101::rv_to2_addr::To1dBlobPayload;

/// ```cddl
/// TO1.RVRedirect = to1d
/// to1d = CoseSignature
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RvRedirect(pub CoseSign1);

impl RvRedirect {
    /// Returns the to1d signed blob
    pub fn to1d(&self) -> &CoseSign1 {
        &self.0
    }

    /// Returns the to1d signed blob
    pub fn into_to1d(self) -> CoseSign1 {
        self.0
    }

    /// Parses the Rendezvous blob, the signature is verified in TO2 with the Owner key.
    pub fn payload(&self) -> Result<To1dBlobPayload, Error> {
        to1d_payload(&self.0)
    }
}

/// Parses the payload of a `to1d`.
pub fn to1d_payload(to1d: &CoseSign1) -> Result<To1dBlobPayload, Error> {
    let payload = to1d.payload.as_deref().unwrap_or_default();

    from_cbor(payload, "the to1d payload")
}

crate::v101::sign1_message!(RvRedirect, 33, "the TO1.RVRedirect");

#[cfg(test)]
mod tests {
    use coset::{CoseSign1Builder, HeaderBuilder};
    use pretty_assertions::assert_eq;

    use crate::utils::to_cbor;
    use crate::v101::Message;
    use crate::v101::TransportProtocol;
    use crate::v101::hash_hmac::{Hash, Hashtype};
    use crate::v101::rv_to2_addr::RvTo2AddrEntry;

    use super::*;

    fn create_to1d() -> (To1dBlobPayload, CoseSign1) {
        let to1d = To1dBlobPayload {
            to1d_rv: vec![RvTo2AddrEntry {
                rv_ip: None,
                rv_dns: Some("example.com".into()),
                rv_port: 80,
                rv_protocol: TransportProtocol::Http,
            }],
            to1d_to0d_hash: Hash::new(Hashtype::Sha256, vec![8; 32]).unwrap(),
        };

        let sign = CoseSign1Builder::new()
            .protected(
                HeaderBuilder::new()
                    .algorithm(coset::iana::Algorithm::ES256)
                    .build(),
            )
            .payload(to_cbor(&to1d, "to1d").unwrap())
            .signature(vec![1; 64])
            .build();

        (to1d, sign)
    }

    #[test]
    fn rv_redirect_roundtrip() {
        let (to1d, sign) = create_to1d();

        let rv_redirect = RvRedirect(sign);

        let buf = rv_redirect.to_bytes().unwrap();

        let mut res = RvRedirect::decode(&buf).unwrap();

        res.0.protected.original_data.take();

        assert_eq!(res, rv_redirect);
        assert_eq!(res.payload().unwrap(), to1d);
    }
}
