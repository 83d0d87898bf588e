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

//! SetHMAC, Type 12
//!
//! The device answers with the HMAC of the Ownership Voucher header.

use serde::{Deserialize, Serialize};

use crate::v101::ClientMessage;
use crate::v101::hash_hmac::HMac;

use super::done::Done;

/// ```cddl
/// DI.SetHMAC = [
///     Hmac
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetHmac {
    /// HMAC of the header with the device secret.
    pub hmac: HMac,
}

impl Serialize for SetHmac {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        (&self.hmac,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SetHmac {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (hmac,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { hmac })
    }
}

crate::v101::cbor_message!(SetHmac, 12, "the DI.SetHMAC");

impl ClientMessage for SetHmac {
    type Response = Done;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::v101::Message;
    use crate::v101::hash_hmac::Hashtype;

    use super::*;

    #[test]
    fn set_hmac_roundtrip() {
        let msg = SetHmac {
            hmac: HMac::new(Hashtype::HmacSha384, vec![9; 48]).unwrap(),
        };

        let buf = msg.to_bytes().unwrap();

        // [[6, bstr]]
        assert_eq!(&buf[..3], &[0x81, 0x82, 0x06]);
        assert_eq!(SetHmac::decode(&buf).unwrap(), msg);
    }
}
