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

//! The RendezvousInfo type indicates the manner and order in which the Device and Owner find the
//! Rendezvous Server.
//!
//! It is configured during manufacturing (e.g., at an ODM), so the manufacturing entity has the
//! choice of which Rendezvous Server(s) to use and how to access it or them.

use std::fmt::Debug;

use ciborium::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::Error;
use crate::error::ErrorKind;
use crate::utils::{Hex, from_cbor, to_cbor};

/// ```cddl
/// RendezvousInfo = [
///     + RendezvousDirective
/// ]
/// ```
///
/// An empty list is accepted while decoding, the device reports it as unusable.
pub type RendezvousInfo = Vec<RendezvousDirective>;

/// ```cddl
/// RendezvousDirective = [
///     + RendezvousInstr
/// ]
/// ```
pub type RendezvousDirective = Vec<RendezvousInstr>;

/// ```cddl
/// RendezvousInstr = [
///     RVVariable,
///     RVValue
/// ]
/// RVValue = bstr .cbor any
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct RendezvousInstr {
    rv_variable: RvVariable,
    rv_value: ByteBuf,
}

impl RendezvousInstr {
    /// Creates the instruction, encoding the value.
    pub fn new<T>(rv_variable: RvVariable, value: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        let rv_value = to_cbor(value, "rendezvous value").map(ByteBuf::from)?;

        Ok(Self {
            rv_variable,
            rv_value,
        })
    }

    /// Creates an instruction that carries no value, like [`RvVariable::Bypass`].
    pub fn flag(rv_variable: RvVariable) -> Self {
        Self {
            rv_variable,
            rv_value: ByteBuf::new(),
        }
    }

    /// Identifies the type to decode for the value.
    pub fn rv_variable(&self) -> RvVariable {
        self.rv_variable
    }

    /// Decodes the value of the instruction.
    pub fn value<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        if self.rv_value.is_empty() {
            return Err(Error::new(ErrorKind::Invalid, "empty rendezvous value"));
        }

        from_cbor(&self.rv_value, "rendezvous value")
    }
}

impl Debug for RendezvousInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendezvousInstr")
            .field("rv_variable", &self.rv_variable)
            .field("rv_value", &Hex::new(&self.rv_value))
            .finish()
    }
}

impl Serialize for RendezvousInstr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            rv_variable,
            rv_value,
        } = self;

        // Flags like bypass are sent without a value
        if rv_value.is_empty() {
            (rv_variable,).serialize(serializer)
        } else {
            (rv_variable, rv_value).serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for RendezvousInstr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;

        let items: Vec<Value> = Deserialize::deserialize(deserializer)?;
        let mut items = items.into_iter();

        let rv_variable = items
            .next()
            .and_then(|value| value.as_integer())
            .and_then(|value| u8::try_from(value).ok())
            .ok_or_else(|| D::Error::custom("missing rendezvous variable"))
            .and_then(|value| RvVariable::try_from(value).map_err(D::Error::custom))?;

        let rv_value = match items.next() {
            Some(Value::Bytes(bytes)) => ByteBuf::from(bytes),
            None => ByteBuf::new(),
            Some(_) => return Err(D::Error::custom("rendezvous value is not a bstr")),
        };

        if items.next().is_some() {
            return Err(D::Error::custom("too many elements in rendezvous instruction"));
        }

        Ok(Self {
            rv_variable,
            rv_value,
        })
    }
}

/// ```cddl
/// RVVariable /= (
///     RVDevOnly     => 0,
///     RVOwnerOnly   => 1,
///     RVIPAddress   => 2,
///     RVDevPort     => 3,
///     RVOwnerPort   => 4,
///     RVDns         => 5,
///     RVSvCertHash  => 6,
///     RVClCertHash  => 7,
///     RVUserInput   => 8,
///     RVWifiSsid    => 9,
///     RVWifiPw      => 10,
///     RVMedium      => 11,
///     RVProtocol    => 12,
///     RVDelaysec    => 13,
///     RVBypass      => 14,
///     RVExtRV       => 15
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum RvVariable {
    /// Only the device follows this directive.
    DevOnly = 0,
    /// Only the owner follows this directive, the device skips it.
    OwnerOnly = 1,
    /// IP address
    IPAddress = 2,
    /// Port used by the device
    DevPort = 3,
    /// Port used by the owner
    OwnerPort = 4,
    /// DNS name
    Dns = 5,
    /// TLS Server cert hash
    SvCertHash = 6,
    /// TLS CA cert hash
    ClCertHash = 7,
    /// User input
    UserInput = 8,
    /// Wi-Fi SSID
    WifiSsid = 9,
    /// Wi-Fi password
    WifiPw = 10,
    /// Network medium
    Medium = 11,
    /// Protocol to use, see [`RvProtocolValue`]
    Protocol = 12,
    /// Seconds to wait before the next directive
    Delaysec = 13,
    /// Skip TO1 and contact the owner directly
    Bypass = 14,
    /// External rendezvous
    ExtRV = 15,
}

impl TryFrom<u8> for RvVariable {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0 => RvVariable::DevOnly,
            1 => RvVariable::OwnerOnly,
            2 => RvVariable::IPAddress,
            3 => RvVariable::DevPort,
            4 => RvVariable::OwnerPort,
            5 => RvVariable::Dns,
            6 => RvVariable::SvCertHash,
            7 => RvVariable::ClCertHash,
            8 => RvVariable::UserInput,
            9 => RvVariable::WifiSsid,
            10 => RvVariable::WifiPw,
            11 => RvVariable::Medium,
            12 => RvVariable::Protocol,
            13 => RvVariable::Delaysec,
            14 => RvVariable::Bypass,
            15 => RvVariable::ExtRV,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for RvVariable")),
        };

        Ok(value)
    }
}

impl From<RvVariable> for u8 {
    fn from(value: RvVariable) -> Self {
        value as u8
    }
}

/// ```cddl
/// RVProtocolValue /= (
///     RVProtRest    => 0,
///     RVProtHttp    => 1,
///     RVProtHttps   => 2,
///     RVProtTcp     => 3,
///     RVProtTls     => 4,
///     RVProtCoapTcp => 5,
///     RVProtCoapUdp => 6
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum RvProtocolValue {
    /// First supported protocol from: https, http, coaps, coap
    Rest = 0,
    /// HTTP over TCP
    Http = 1,
    /// HTTP over TLS
    Https = 2,
    /// Bare TCP
    Tcp = 3,
    /// Bare TLS
    Tls = 4,
    /// CoAP over TCP
    CoapTcp = 5,
    /// CoAP over UDP
    CoapUdp = 6,
}

impl TryFrom<u8> for RvProtocolValue {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0 => RvProtocolValue::Rest,
            1 => RvProtocolValue::Http,
            2 => RvProtocolValue::Https,
            3 => RvProtocolValue::Tcp,
            4 => RvProtocolValue::Tls,
            5 => RvProtocolValue::CoapTcp,
            6 => RvProtocolValue::CoapUdp,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for RvProtocolValue")),
        };

        Ok(value)
    }
}

impl From<RvProtocolValue> for u8 {
    fn from(value: RvProtocolValue) -> Self {
        value as u8
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn instr_value_is_wrapped_cbor() {
        let instr = RendezvousInstr::new(RvVariable::DevPort, &8080u16).unwrap();

        let buf = to_cbor(&instr, "instr").unwrap();

        // [3, h'191f90']
        assert_eq!(buf, [0x82, 0x03, 0x43, 0x19, 0x1f, 0x90]);

        let back: RendezvousInstr = from_cbor(&buf, "instr").unwrap();

        assert_eq!(back.rv_variable(), RvVariable::DevPort);
        assert_eq!(back.value::<u16>().unwrap(), 8080);
    }

    #[test]
    fn flag_has_no_value() {
        let instr = RendezvousInstr::flag(RvVariable::Bypass);

        let buf = to_cbor(&instr, "instr").unwrap();

        assert_eq!(buf, [0x81, 0x0e]);

        let back: RendezvousInstr = from_cbor(&buf, "instr").unwrap();

        assert_eq!(back, instr);

        let err = back.value::<bool>().unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn empty_rendezvous_info_decodes() {
        let info: RendezvousInfo = from_cbor(&[0x80], "rv info").unwrap();

        assert!(info.is_empty());
    }

    #[test]
    fn unknown_variable() {
        assert!(RvVariable::try_from(16).is_err());
        assert_eq!(RvProtocolValue::try_from(2).unwrap(), RvProtocolValue::Https);
    }
}
