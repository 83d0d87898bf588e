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

//! Establishes the presence of the device at the Rendezvous Server.
//!
//! If the Rendezvous Server does not include a record for this Guid, then it returns an
//! `RESOURCE_NOT_FOUND` error and the device moves on to the next rendezvous address.

use serde::{Deserialize, Serialize};

use crate::v101::sign_info::EASigInfo;
use crate::v101::{ClientMessage, Guid, InitialMessage};

use super::hello_rv_ack::HelloRvAck;

/// ```cddl
/// TO1.HelloRV = [
///     Guid,
///     eASigInfo
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HelloRv {
    /// The device GUID, used as an index by the Rendezvous Server.
    pub guid: Guid,
    /// Signature info for device attestation.
    pub e_a_sig_info: EASigInfo,
}

impl Serialize for HelloRv {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { guid, e_a_sig_info } = self;

        (guid, e_a_sig_info).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HelloRv {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (guid, e_a_sig_info) = Deserialize::deserialize(deserializer)?;

        Ok(Self { guid, e_a_sig_info })
    }
}

crate::v101::cbor_message!(HelloRv, 30, "the TO1.HelloRV");

impl ClientMessage for HelloRv {
    type Response = HelloRvAck;
}

impl InitialMessage for HelloRv {}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::v101::Message;
    use crate::v101::sign_info::{DeviceSgType, SigInfo};
    use crate::v101::tests::create_guid;

    use super::*;

    #[test]
    fn hello_rv_roundtrip() {
        let hello_rv = HelloRv {
            guid: create_guid(),
            e_a_sig_info: SigInfo::new(DeviceSgType::StSecP256R1),
        };

        let buf = hello_rv.to_bytes().unwrap();

        let res = HelloRv::decode(&buf).unwrap();

        assert_eq!(res, hello_rv);
        // array of two, then the 16 bytes guid
        assert_eq!(&buf[..2], &[0x82, 0x50]);
    }
}
