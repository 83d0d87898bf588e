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

//! Records and messages of the version 1.1 of the protocol.
//!
//! You can find the spec [here](https://fidoalliance.org/specs/FDO/FIDO-Device-Onboard-PS-v1.1-20220419/FIDO-Device-Onboard-PS-v1.1-20220419.html)

use std::fmt::{Debug, Display};
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::ops::Deref;

use coset::{CborSerializable, CoseSign1, TaggedCborSerializable};
use serde::{Deserialize, Serialize};
use serde_bytes::{ByteArray, ByteBuf};

use crate::Error;
use crate::error::ErrorKind;
use crate::utils::Hex;

pub mod device_credentials;
pub mod eat_signature;
pub mod error;
pub mod hash_hmac;
pub mod key_exchange;
pub mod ownership_voucher;
pub mod public_key;
pub mod rendezvous_info;
pub mod rv_to2_addr;
pub mod service_info;
pub mod sign_info;

pub mod di;
pub mod to1;
pub mod to2;

/// Major version of the protocol
pub const PROTOCOL_VERSION_MAJOR: Protver = 1;
/// Minor version of the protocol
pub const PROTOCOL_VERSION_MINOR: Protver = 1;
/// Protocol version to pass in the path:
///
/// ```text
/// major * 100 + minor
/// ```
pub const PROTOCOL_VERSION: Protver = PROTOCOL_VERSION_MAJOR * 100 + PROTOCOL_VERSION_MINOR;

/// Protocol version: the version of the transmitted ("wire") protocol
pub type Protver = u16;
/// A message type, which acts to identify the message body.
pub type Msgtype = u16;

/// Serialize and deserialize a message.
pub trait Message: Sized {
    /// A message type, which acts to identify the message body.
    const MSG_TYPE: Msgtype;

    /// Decodes a message from a buffer.
    fn decode(buf: &[u8]) -> Result<Self, Error>;

    /// Encode a message into the writer.
    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write;

    /// Encode the message into a new buffer.
    fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();

        self.encode(&mut buf)?;

        Ok(buf)
    }
}

/// Message sent from the device to the server
pub trait ClientMessage: Message {
    /// Response to this message.
    type Response: Message;
}

/// Initial message in a protocol (TO1, or TO2).
///
/// This message doesn't require authentication.
pub trait InitialMessage: ClientMessage {}

/// Implements [`Message`] for a record serialized with serde.
macro_rules! cbor_message {
    ($name:ty, $msg_type:literal, $ctx:literal) => {
        impl $crate::v101::Message for $name {
            const MSG_TYPE: $crate::v101::Msgtype = $msg_type;

            fn decode(buf: &[u8]) -> Result<Self, $crate::Error> {
                $crate::utils::from_cbor(buf, $ctx)
            }

            fn encode<W>(&self, writer: &mut W) -> Result<(), $crate::Error>
            where
                W: std::io::Write,
            {
                ciborium::into_writer(self, writer).map_err(|err| {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %err, "couldn't encode {}", $ctx);

                    $crate::Error::new($crate::error::ErrorKind::Encode, $ctx)
                })
            }
        }
    };
}

/// Implements [`Message`] for a new type over a [`CoseSign1`].
macro_rules! sign1_message {
    ($name:ident, $msg_type:literal, $ctx:literal) => {
        impl $crate::v101::Message for $name {
            const MSG_TYPE: $crate::v101::Msgtype = $msg_type;

            fn decode(buf: &[u8]) -> Result<Self, $crate::Error> {
                $crate::v101::decode_sign1(buf, $ctx).map($name)
            }

            fn encode<W>(&self, writer: &mut W) -> Result<(), $crate::Error>
            where
                W: std::io::Write,
            {
                $crate::v101::encode_sign1(&self.0, writer, $ctx)
            }
        }
    };
}

pub(crate) use cbor_message;
pub(crate) use sign1_message;

/// Decodes a `COSE_Sign1`, tagged or not, requiring a payload.
pub fn decode_sign1(buf: &[u8], ctx: &'static str) -> Result<CoseSign1, Error> {
    let sign = CoseSign1::from_tagged_slice(buf)
        .or_else(|_| CoseSign1::from_slice(buf))
        .map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode {ctx}");

            Error::new(ErrorKind::Decode, ctx)
        })?;

    if sign.payload.is_none() {
        return Err(Error::new(ErrorKind::Invalid, ctx));
    }

    Ok(sign)
}

/// Writes a tagged `COSE_Sign1`.
pub fn encode_sign1<W>(sign: &CoseSign1, writer: &mut W, ctx: &'static str) -> Result<(), Error>
where
    W: Write,
{
    let buf = sign.clone().to_tagged_vec().map_err(|err| {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %err, "couldn't encode {ctx}");

        Error::new(ErrorKind::Encode, ctx)
    })?;

    writer.write_all(&buf).map_err(|err| {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %err, "couldn't write {ctx}");

        Error::new(ErrorKind::Write, ctx)
    })
}

/// Guid is implemented as a 128-bit cryptographically strong random number.
///
/// The Guid type identifies a Device during onboarding, and is replaced each time onboarding is
/// successful in the Transfer Ownership 2 (TO2) protocol.
///
/// ```cddl
/// Guid = bstr .size 16
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Guid(ByteArray<16>);

impl Guid {
    /// Create the new guid from bytes
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(ByteArray::new(bytes))
    }

    /// Returns the bytes of the guid.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Deref for Guid {
    type Target = [u8; 16];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Debug for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Guid")
            .field(&Hex::new(self.0.as_slice()))
            .finish()
    }
}

impl Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&Hex::new(self.0.as_slice()), f)
    }
}

/// Raw IP address as received on the wire.
///
/// The length is not checked while decoding, since an invalid address must only drop the entry
/// it belongs to.
///
/// ```cddl
/// IPAddress = ip4 / ip6
/// ip4 = bstr .size 4
/// ip6 = bstr .size 16
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpAddress(ByteBuf);

impl IpAddress {
    /// Returns the address if it has the length of an IPv4 or IPv6 address.
    pub fn to_ip_addr(&self) -> Option<IpAddr> {
        match self.0.len() {
            4 => {
                let bytes: [u8; 4] = self.0.as_slice().try_into().ok()?;

                Some(IpAddr::V4(Ipv4Addr::from(bytes)))
            }
            16 => {
                let bytes: [u8; 16] = self.0.as_slice().try_into().ok()?;

                Some(IpAddr::V6(Ipv6Addr::from(bytes)).to_canonical())
            }
            _ => None,
        }
    }
}

impl From<IpAddr> for IpAddress {
    fn from(value: IpAddr) -> Self {
        match value {
            IpAddr::V4(addr) => Self(ByteBuf::from(addr.octets().to_vec())),
            IpAddr::V6(addr) => Self(ByteBuf::from(addr.octets().to_vec())),
        }
    }
}

impl From<Vec<u8>> for IpAddress {
    fn from(value: Vec<u8>) -> Self {
        Self(ByteBuf::from(value))
    }
}

/// ```cddl
/// DNSAddress = tstr
/// ```
pub type DnsAddress = String;

/// ```cddl
/// Port = uint16
/// ```
pub type Port = u16;

/// ``` cddl
/// TransportProtocol /= (
///     ProtTCP:    1,     ;; bare TCP stream
///     ProtTLS:    2,     ;; bare TLS stream
///     ProtHTTP:   3,
///     ProtCoAP:   4,
///     ProtHTTPS:  5,
///     ProtCoAPS:  6,
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum TransportProtocol {
    /// TCP stream
    Tcp = 1,
    /// TLS stream
    Tls = 2,
    /// HTTP messages
    Http = 3,
    /// CoAP messages
    CoAp = 4,
    /// HTTPS messages
    Https = 5,
    /// CoAPS messages
    CoAps = 6,
}

impl TransportProtocol {
    /// URL scheme and default port, for the protocols carried over HTTP.
    pub fn http_scheme(&self) -> Option<(&'static str, Port)> {
        match self {
            TransportProtocol::Http => Some(("http", 80)),
            TransportProtocol::Https => Some(("https", 443)),
            TransportProtocol::Tcp
            | TransportProtocol::Tls
            | TransportProtocol::CoAp
            | TransportProtocol::CoAps => None,
        }
    }
}

impl TryFrom<u8> for TransportProtocol {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            1 => TransportProtocol::Tcp,
            2 => TransportProtocol::Tls,
            3 => TransportProtocol::Http,
            4 => TransportProtocol::CoAp,
            5 => TransportProtocol::Https,
            6 => TransportProtocol::CoAps,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for TransportProtocol")),
        };

        Ok(value)
    }
}

impl From<TransportProtocol> for u8 {
    fn from(value: TransportProtocol) -> Self {
        value as u8
    }
}

/// The protocol keeps several nonces in play during the authentication phase.
///
/// ```cddl
/// Nonce = bstr .size 16
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(ByteArray<16>);

impl Nonce {
    /// Create a nonce from random bytes.
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(ByteArray::new(bytes))
    }

    /// Returns the bytes of the nonce.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Debug for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Nonce")
            .field(&Hex::new(self.0.as_slice()))
            .finish()
    }
}

/// ```cddl
/// NonceTO1Proof = Nonce
/// ```
pub type NonceTo1Proof = Nonce;

/// ```cddl
/// NonceTO2ProveOV = Nonce
/// ```
pub type NonceTo2ProveOv = Nonce;

/// ```cddl
/// NonceTO2ProveDv = Nonce
/// ```
pub type NonceTo2ProveDv = Nonce;

/// ```cddl
/// NonceTO2SetupDv = Nonce
/// ```
pub type NonceTo2SetupDv = Nonce;

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    pub(crate) fn create_guid() -> Guid {
        Guid::new([
            0x43, 0xbc, 0x9e, 0x0f, 0x73, 0x1a, 0x4e, 0x7f, 0x94, 0x7c, 0x5d, 0x03, 0xb0, 0xc1,
            0xe4, 0x83,
        ])
    }

    #[test]
    fn guid_display() {
        let guid = create_guid();

        insta::assert_snapshot!(guid, @"43bc9e0f731a4e7f947c5d03b0c1e483");
        insta::assert_debug_snapshot!(guid, @"Guid(43bc9e0f731a4e7f947c5d03b0c1e483)");
    }

    #[test]
    fn guid_is_a_bstr() {
        let guid = create_guid();

        let buf = crate::utils::to_cbor(&guid, "guid").unwrap();

        assert_eq!(buf[0], 0x50);
        assert_eq!(&buf[1..], guid.as_slice());
    }

    #[test]
    fn ip_address_validity() {
        let v4 = IpAddress::from(vec![127, 0, 0, 1]);
        assert_eq!(v4.to_ip_addr(), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));

        let v6 = IpAddress::from(IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(v6.to_ip_addr(), Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));

        let invalid = IpAddress::from(vec![10, 0, 0]);
        assert_eq!(invalid.to_ip_addr(), None);
    }

    #[test]
    fn transport_protocol_http_scheme() {
        assert_eq!(
            TransportProtocol::Http.http_scheme(),
            Some(("http", 80))
        );
        assert_eq!(
            TransportProtocol::Https.http_scheme(),
            Some(("https", 443))
        );
        assert_eq!(TransportProtocol::CoAp.http_scheme(), None);
    }

    #[test]
    fn transport_protocol_error() {
        let err = TransportProtocol::try_from(7u8).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::OutOfRange);
    }
}
