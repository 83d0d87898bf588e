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

//! Key exchange parameters, in either direction, and the session suites.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::Error;
use crate::error::ErrorKind;

/// Parameters for a key exchange with ECC keys.
///
/// The parameters are sent as length prefixed byte strings:
///
/// ```text
/// len(x) || x || len(y) || y || len(rand) || rand
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdhParams {
    x: Vec<u8>,
    y: Vec<u8>,
    rand: Vec<u8>,
}

impl EcdhParams {
    /// Creates the parameters from the SEC1 uncompressed point and the random part.
    pub fn from_sec1(point: &[u8], rand: &[u8]) -> Result<Self, Error> {
        let (first, coords) = point
            .split_first()
            .ok_or(Error::new(ErrorKind::Invalid, "empty ecc point"))?;

        if *first != 0x04 || coords.is_empty() || coords.len() % 2 != 0 {
            return Err(Error::new(ErrorKind::Invalid, "ecc point encoding"));
        }

        let (x, y) = coords.split_at(coords.len() / 2);

        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            rand: rand.to_vec(),
        })
    }

    /// Parses the length prefixed parameters.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let err = Error::new(ErrorKind::Invalid, "for len prefixed slice EcdhParams");

        let (x, rest) = parse_len_prefixed_slice(bytes).ok_or(err)?;
        let (y, rest) = parse_len_prefixed_slice(rest).ok_or(err)?;
        let (rand, rest) = parse_len_prefixed_slice(rest).ok_or(err)?;

        if !rest.is_empty() {
            return Err(Error::new(
                ErrorKind::Invalid,
                "for remaining bytes in EcdhParams",
            ));
        }

        if x.len() != y.len() {
            return Err(Error::new(ErrorKind::Invalid, "mismatched point length"));
        }

        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            rand: rand.to_vec(),
        })
    }

    /// Encodes the parameters with the length prefixes.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::with_capacity(6 + self.x.len() + self.y.len() + self.rand.len());

        for part in [&self.x, &self.y, &self.rand] {
            let len = u16::try_from(part.len())
                .map_err(|_| Error::new(ErrorKind::OutOfRange, "ecdh param too big"))?;

            buf.extend_from_slice(&len.to_be_bytes());
            buf.extend_from_slice(part);
        }

        Ok(buf)
    }

    /// Returns the SEC1 uncompressed point `0x04 || x || y`.
    pub fn sec1_point(&self) -> Vec<u8> {
        let mut point = Vec::with_capacity(1 + self.x.len() + self.y.len());

        point.push(0x04);
        point.extend_from_slice(&self.x);
        point.extend_from_slice(&self.y);

        point
    }

    /// Length in bytes of one coordinate.
    pub fn coordinate_len(&self) -> usize {
        self.x.len()
    }

    /// Returns the random part
    pub fn rand(&self) -> &[u8] {
        &self.rand
    }
}

fn parse_len_prefixed_slice(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let (blen, rest) = bytes.split_first_chunk::<2>()?;

    let len: usize = u16::from_be_bytes(*blen).into();

    let first = rest.get(..len)?;
    let second = rest.get(len..)?;

    Some((first, second))
}

/// Key exchange from owner to device.
///
/// ```cddl
/// xAKeyExchange = bstr
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct XAKeyExchange(ByteBuf);

impl XAKeyExchange {
    /// Wraps the owner parameters.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(ByteBuf::from(bytes))
    }
}

impl AsRef<[u8]> for XAKeyExchange {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key exchange from device to owner.
///
/// ```cddl
/// xBKeyExchange = bstr
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct XBKeyExchange(ByteBuf);

impl XBKeyExchange {
    /// Wraps the device parameters.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(ByteBuf::from(bytes))
    }
}

impl AsRef<[u8]> for XBKeyExchange {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Key exchange suites, sent by name in `TO2.HelloDevice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum KexSuiteName {
    /// Diffie-Hellman with the RFC3526 2048-bit group (id 14).
    DhKexId14,
    /// Diffie-Hellman with the RFC3526 3072-bit group (id 15).
    DhKexId15,
    /// Encryption with an RSA2048RESTR Owner key.
    AsymKex2048,
    /// Encryption with an RSA 3072-bit Owner key.
    AsymKex3072,
    /// ECDH on NIST P-256
    Ecdh256,
    /// ECDH on NIST P-384
    Ecdh384,
}

impl KexSuiteName {
    /// Every suite known by the protocol.
    pub const ALL: [KexSuiteName; 6] = [
        KexSuiteName::DhKexId14,
        KexSuiteName::DhKexId15,
        KexSuiteName::AsymKex2048,
        KexSuiteName::AsymKex3072,
        KexSuiteName::Ecdh256,
        KexSuiteName::Ecdh384,
    ];

    /// Name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            KexSuiteName::DhKexId14 => "DHKEXid14",
            KexSuiteName::DhKexId15 => "DHKEXid15",
            KexSuiteName::AsymKex2048 => "ASYMKEX2048",
            KexSuiteName::AsymKex3072 => "ASYMKEX3072",
            KexSuiteName::Ecdh256 => "ECDH256",
            KexSuiteName::Ecdh384 => "ECDH384",
        }
    }
}

impl Display for KexSuiteName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for KexSuiteName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|suite| suite.as_str() == s)
            .ok_or(Error::new(ErrorKind::Invalid, "kex suite name"))
    }
}

impl TryFrom<String> for KexSuiteName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KexSuiteName> for &'static str {
    fn from(value: KexSuiteName) -> Self {
        value.as_str()
    }
}

/// Cipher suites for the encrypted part of TO2, sent as COSE algorithm identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
#[repr(i64)]
pub enum CipherSuite {
    /// AES-GCM with a 128-bit key
    A128Gcm = 1,
    /// AES-GCM with a 192-bit key
    A192Gcm = 2,
    /// AES-GCM with a 256-bit key
    A256Gcm = 3,
    /// AES-CCM, 64-bit length, 128-bit tag, 128-bit key
    AesCcm64_128_128 = 32,
    /// AES-CCM, 64-bit length, 128-bit tag, 256-bit key
    AesCcm64_128_256 = 33,
    /// AES-128 CBC with HMAC-SHA256
    CoseAes128Cbc = -17760703,
    /// AES-128 CTR with HMAC-SHA256
    CoseAes128Ctr = -17760704,
    /// AES-256 CBC with HMAC-SHA384
    CoseAes256Cbc = -17760705,
    /// AES-256 CTR with HMAC-SHA384
    CoseAes256Ctr = -17760706,
}

impl CipherSuite {
    /// Every suite known by the protocol.
    pub const ALL: [CipherSuite; 9] = [
        CipherSuite::A128Gcm,
        CipherSuite::A192Gcm,
        CipherSuite::A256Gcm,
        CipherSuite::AesCcm64_128_128,
        CipherSuite::AesCcm64_128_256,
        CipherSuite::CoseAes128Cbc,
        CipherSuite::CoseAes128Ctr,
        CipherSuite::CoseAes256Cbc,
        CipherSuite::CoseAes256Ctr,
    ];

    /// Name of the suite, as used in configurations.
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherSuite::A128Gcm => "A128GCM",
            CipherSuite::A192Gcm => "A192GCM",
            CipherSuite::A256Gcm => "A256GCM",
            CipherSuite::AesCcm64_128_128 => "AES-CCM-64-128-128",
            CipherSuite::AesCcm64_128_256 => "AES-CCM-64-128-256",
            CipherSuite::CoseAes128Cbc => "COSEAES128CBC",
            CipherSuite::CoseAes128Ctr => "COSEAES128CTR",
            CipherSuite::CoseAes256Cbc => "COSEAES256CBC",
            CipherSuite::CoseAes256Ctr => "COSEAES256CTR",
        }
    }
}

impl Display for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CipherSuite {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|suite| suite.as_str() == s)
            .ok_or(Error::new(ErrorKind::Invalid, "cipher suite name"))
    }
}

impl TryFrom<i64> for CipherSuite {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|suite| i64::from(*suite) == value)
            .ok_or(Error::new(ErrorKind::OutOfRange, "for CipherSuite"))
    }
}

impl From<CipherSuite> for i64 {
    fn from(value: CipherSuite) -> Self {
        value as i64
    }
}
