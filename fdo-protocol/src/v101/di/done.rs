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

//! Done, Type 13
//!
//! Ends the Device Initialization, the device can now store its credential.

use serde::{Deserialize, Serialize};

/// ```cddl
/// DI.Done = []
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Done;

impl Serialize for Done {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let empty: [ciborium::Value; 0] = [];

        empty.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Done {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let []: [ciborium::Value; 0] = Deserialize::deserialize(deserializer)?;

        Ok(Self)
    }
}

crate::v101::cbor_message!(Done, 13, "the DI.Done");

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::v101::Message;

    use super::*;

    #[test]
    fn done_is_an_empty_array() {
        let buf = Done.to_bytes().unwrap();

        assert_eq!(buf, [0x80]);
        assert_eq!(Done::decode(&buf).unwrap(), Done);

        Done::decode(&[0x01]).unwrap_err();
    }
}
