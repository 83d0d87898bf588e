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

//! Public Key encoding for signature keys.

use std::fmt::Debug;

use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::ErrorKind;
use crate::utils::Hex;

/// ```cddl
/// PublicKey = [
///     pkType,
///     pkEnc,
///     pkBody
/// ]
/// ```
#[derive(Clone, PartialEq)]
pub struct PublicKey {
    pk_type: PkType,
    pk_enc: PkEnc,
    pk_body: Value,
}

impl PublicKey {
    /// Key bytes in the "crypto" encoding: a SEC1 point or a DER RSA key.
    pub fn with_crypto(pk_type: PkType, key: Vec<u8>) -> Self {
        Self {
            pk_type,
            pk_enc: PkEnc::Crypto,
            pk_body: Value::Bytes(key),
        }
    }

    /// DER encoded `SubjectPublicKeyInfo`.
    pub fn with_x509(pk_type: PkType, der: Vec<u8>) -> Self {
        Self {
            pk_type,
            pk_enc: PkEnc::X509,
            pk_body: Value::Bytes(der),
        }
    }

    /// Returns the public key bytes, if the encoding carries them directly.
    pub fn key(&self) -> Option<&[u8]> {
        match (self.pk_enc, &self.pk_body) {
            (PkEnc::Crypto | PkEnc::X509, Value::Bytes(bytes)) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the [`PkType`]
    pub fn pk_type(&self) -> PkType {
        self.pk_type
    }

    /// Returns the [`PkEnc`]
    pub fn pk_enc(&self) -> PkEnc {
        self.pk_enc
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("PublicKey");

        debug
            .field("pk_type", &self.pk_type)
            .field("pk_enc", &self.pk_enc);

        match self.key() {
            Some(key) => debug.field("pk_body", &Hex::new(key)),
            None => debug.field("pk_body", &self.pk_body),
        };

        debug.finish()
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            pk_type,
            pk_enc,
            pk_body,
        } = self;

        (pk_type, pk_enc, pk_body).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (pk_type, pk_enc, pk_body) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            pk_type,
            pk_enc,
            pk_body,
        })
    }
}

/// ```cddl
/// pkType = (
///     RSA2048RESTR: 1, ;; RSA 2048 with restricted key/exponent (PKCS1 1.5 encoding)
///     RSAPKCS:      5, ;; RSA key, PKCS1, v1.5
///     RSAPSS:       6, ;; RSA key, PSS
///     SECP256R1:    10, ;; ECDSA secp256r1 = NIST-P-256 = prime256v1
///     SECP384R1:    11, ;; ECDSA secp384r1 = NIST-P-384
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum PkType {
    /// RSA 2048 with restricted key/exponent
    Rsa2048Restr = 1,
    /// RSA key, PKCS1, v1.5
    RsaPkcs = 5,
    /// RSA key, PSS
    RsaPss = 6,
    /// ECDSA secp256r1
    Secp256R1 = 10,
    /// ECDSA secp384r1
    Secp384R1 = 11,
}

impl TryFrom<u8> for PkType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            1 => PkType::Rsa2048Restr,
            5 => PkType::RsaPkcs,
            6 => PkType::RsaPss,
            10 => PkType::Secp256R1,
            11 => PkType::Secp384R1,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for PkType")),
        };

        Ok(value)
    }
}

impl From<PkType> for u8 {
    fn from(value: PkType) -> Self {
        value as u8
    }
}

/// ```cddl
/// pkEnc = (
///     Crypto:       0      ;; applies to crypto with its own encoding (e.g., Intel® EPID)
///     X509:         1,     ;; X509 DER encoding, applies to RSA and ECDSA
///     X5CHAIN:      2,     ;; COSE x5chain, an ordered chain of X.509 certificates
///     COSEKEY:      3      ;; COSE key encoding
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum PkEnc {
    /// Crypto specific encoding
    Crypto = 0,
    /// X509 DER encoding
    X509 = 1,
    /// COSE x5chain
    X5Chain = 2,
    /// COSE key
    CoseKey = 3,
}

impl TryFrom<u8> for PkEnc {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            0 => PkEnc::Crypto,
            1 => PkEnc::X509,
            2 => PkEnc::X5Chain,
            3 => PkEnc::CoseKey,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for PkEnc")),
        };

        Ok(value)
    }
}

impl From<PkEnc> for u8 {
    fn from(value: PkEnc) -> Self {
        value as u8
    }
}
