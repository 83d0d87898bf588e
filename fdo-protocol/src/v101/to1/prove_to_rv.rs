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

//! Proves the device identity to the Rendezvous Server.
//!
//! The message is an EAT signed with the device attestation key, the payload contains the
//! `NonceTO1Proof` received in the HelloRVAck.

use coset::CoseSign1;

use crate::Error;
use crate::v101::ClientMessage;
use crate::v101::eat_signature::EatPayload;

use super::rv_redirect::RvRedirect;

/// ```cddl
/// TO1.ProveToRV = EAToken
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProveToRv(pub CoseSign1);

impl ProveToRv {
    /// Returns the signed token.
    pub fn token(&self) -> &CoseSign1 {
        &self.0
    }

    /// Decodes the EAT claims without verifying the signature.
    pub fn claims(&self) -> Result<EatPayload, Error> {
        let payload = self.0.payload.as_deref().unwrap_or_default();

        EatPayload::decode(payload)
    }
}

crate::v101::sign1_message!(ProveToRv, 32, "the TO1.ProveToRV");

impl ClientMessage for ProveToRv {
    type Response = RvRedirect;
}

#[cfg(test)]
mod tests {
    use coset::{CoseSign1Builder, HeaderBuilder};
    use pretty_assertions::assert_eq;

    use crate::v101::tests::create_guid;
    use crate::v101::{Message, Nonce};

    use super::*;

    #[test]
    fn prove_to_rv_claims() {
        let eat = EatPayload {
            nonce: Nonce::new([5; 16]),
            guid: create_guid(),
            fdo: None,
        };

        let sign = CoseSign1Builder::new()
            .protected(
                HeaderBuilder::new()
                    .algorithm(coset::iana::Algorithm::ES256)
                    .build(),
            )
            .payload(eat.encode().unwrap())
            .signature(vec![0; 64])
            .build();

        let buf = ProveToRv(sign).to_bytes().unwrap();

        let res = ProveToRv::decode(&buf).unwrap();

        assert_eq!(res.claims().unwrap(), eat);
    }

    #[test]
    fn prove_to_rv_requires_payload() {
        let sign = CoseSign1Builder::new().signature(vec![0; 64]).build();

        let buf = ProveToRv(sign).to_bytes().unwrap();

        assert!(ProveToRv::decode(&buf).is_err());
    }
}
