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

//! Protocol digests and keyed digests.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::Error;
use crate::error::ErrorKind;
use crate::utils::Hex;

/// Crypto hash
///
/// ```cddl
/// Hash = [
///     hashtype: int, ;; negative values possible
///     hash: bstr
/// ]
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Hash {
    hashtype: Hashtype,
    hash: ByteBuf,
}

impl Hash {
    /// Creates a hash, checking the digest length against the type.
    pub fn new(hashtype: Hashtype, hash: Vec<u8>) -> Result<Self, Error> {
        if hash.len() != hashtype.output_len() {
            return Err(Error::new(ErrorKind::Invalid, "hash length"));
        }

        Ok(Self {
            hashtype,
            hash: ByteBuf::from(hash),
        })
    }

    /// Returns the [`Hashtype`]
    pub fn hash_type(&self) -> Hashtype {
        self.hashtype
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.hash
    }
}

impl Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self { hashtype, hash } = self;

        f.debug_struct("Hash")
            .field("hashtype", &hashtype)
            .field("hash", &Hex::new(hash))
            .finish()
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { hashtype, hash } = self;

        (hashtype, hash).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (hashtype, hash): (Hashtype, ByteBuf) = Deserialize::deserialize(deserializer)?;

        Hash::new(hashtype, hash.into_vec()).map_err(serde::de::Error::custom)
    }
}

/// A HMAC RFC2104 is encoded as a hash.
///
/// ```cddl
/// HMac = Hash
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HMac(Hash);

impl HMac {
    /// Creates a keyed hash, the type must be one of the HMAC ones.
    pub fn new(hashtype: Hashtype, hash: Vec<u8>) -> Result<Self, Error> {
        if !hashtype.is_hmac() {
            return Err(Error::new(ErrorKind::Invalid, "hashtype, not a hmac type"));
        }

        Hash::new(hashtype, hash).map(Self)
    }

    /// Return the hash type.
    pub fn hash_type(&self) -> Hashtype {
        self.0.hash_type()
    }
}

impl AsRef<[u8]> for HMac {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<'de> Deserialize<'de> for HMac {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hash = Hash::deserialize(deserializer)?;

        if !hash.hash_type().is_hmac() {
            return Err(serde::de::Error::custom("invalid hashtype, not a hmac type"));
        }

        Ok(HMac(hash))
    }
}

/// ```cddl
/// hashtype = (
///     SHA256: -16,
///     SHA384: -43,
///     HMAC-SHA256: 5,
///     HMAC-SHA384: 6
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
#[repr(i8)]
pub enum Hashtype {
    /// Sha256 Hash digest
    Sha256 = -16,
    /// Sha384 Hash digest
    Sha384 = -43,
    /// HMAC-SHA256 signature
    HmacSha256 = 5,
    /// HMAC-SHA384 signature
    HmacSha384 = 6,
}

impl Hashtype {
    /// Check if the hash type is a HMAC
    pub fn is_hmac(&self) -> bool {
        match self {
            Hashtype::HmacSha256 | Hashtype::HmacSha384 => true,
            Hashtype::Sha256 | Hashtype::Sha384 => false,
        }
    }

    /// Length of the digest in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            Hashtype::Sha256 | Hashtype::HmacSha256 => 32,
            Hashtype::Sha384 | Hashtype::HmacSha384 => 48,
        }
    }
}

impl TryFrom<i8> for Hashtype {
    type Error = Error;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        let value = match value {
            -16 => Hashtype::Sha256,
            -43 => Hashtype::Sha384,
            5 => Hashtype::HmacSha256,
            6 => Hashtype::HmacSha384,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for HashType")),
        };

        Ok(value)
    }
}

impl From<Hashtype> for i8 {
    fn from(value: Hashtype) -> Self {
        value as i8
    }
}
