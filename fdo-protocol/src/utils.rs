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

//! Helpers shared by the protocol records.

use std::fmt::{Debug, Display};
use std::ops::Deref;

use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::Error;
use crate::error::ErrorKind;

/// A CBOR value carried inside a `bstr`.
///
/// The bytes received from the wire are kept, so hashes and HMACs are computed over exactly what
/// the peer signed instead of a re-encoding.
///
/// ```cddl
/// bstr .cbor T
/// ```
#[derive(Debug, Clone)]
pub struct CborBstr<T> {
    bytes: OnceCell<ByteBuf>,
    value: T,
}

impl<T> CborBstr<T> {
    /// Wraps a value, the bytes are encoded lazily.
    pub fn new(value: T) -> Self {
        Self {
            bytes: OnceCell::new(),
            value,
        }
    }

    /// Returns the inner value.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Returns the encoded value.
    pub fn bytes(&self) -> Result<&[u8], Error>
    where
        T: Serialize,
    {
        self.bytes
            .get_or_try_init(|| {
                let mut buf = Vec::new();

                ciborium::into_writer(&self.value, &mut buf).map_err(|err| {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %err, "couldn't encode cbor bstr value");

                    Error::new(ErrorKind::Encode, "cbor bstr value")
                })?;

                Ok(ByteBuf::from(buf))
            })
            .map(|buf| buf.as_slice())
    }

    /// Decodes the value from the given bytes, keeping them.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, Error>
    where
        T: DeserializeOwned,
    {
        let value = ciborium::from_reader(bytes.as_slice()).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode cbor bstr value");

            Error::new(ErrorKind::Decode, "cbor bstr value")
        })?;

        Ok(Self {
            bytes: OnceCell::with_value(ByteBuf::from(bytes)),
            value,
        })
    }
}

impl<T: PartialEq> PartialEq for CborBstr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Deref for CborBstr<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> Serialize for CborBstr<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let bytes = self.bytes().map_err(serde::ser::Error::custom)?;

        serializer.serialize_bytes(bytes)
    }
}

impl<'de, T> Deserialize<'de> for CborBstr<T>
where
    T: DeserializeOwned,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = ByteBuf::deserialize(deserializer)?;

        Self::from_bytes(bytes.into_vec()).map_err(serde::de::Error::custom)
    }
}

/// Encodes a value to a CBOR buffer.
pub(crate) fn to_cbor<T>(value: &T, ctx: &'static str) -> Result<Vec<u8>, Error>
where
    T: Serialize + ?Sized,
{
    let mut buf = Vec::new();

    ciborium::into_writer(value, &mut buf).map_err(|err| {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %err, ctx, "couldn't encode");

        Error::new(ErrorKind::Encode, ctx)
    })?;

    Ok(buf)
}

/// Decodes a value from a CBOR buffer.
pub(crate) fn from_cbor<T>(buf: &[u8], ctx: &'static str) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    ciborium::from_reader(buf).map_err(|err| {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %err, ctx, "couldn't decode");

        Error::new(ErrorKind::Decode, ctx)
    })
}

/// New type to debug print a byte slice as hex.
pub struct Hex<'a>(&'a [u8]);

impl<'a> Hex<'a> {
    /// Create a new instance for the slice.
    pub fn new(items: &'a [u8]) -> Self {
        Self(items)
    }
}

impl Debug for Hex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self, f)
    }
}

impl Display for Hex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn cbor_bstr_keeps_received_bytes() {
        // 42 encoded on two bytes, a re-encoding would shrink it
        let wire = vec![0x19, 0x00, 0x2a];

        let bstr = CborBstr::<u64>::from_bytes(wire.clone()).unwrap();

        assert_eq!(*bstr, 42);
        assert_eq!(bstr.bytes().unwrap(), wire.as_slice());
    }

    #[test]
    fn cbor_bstr_is_wrapped_in_bytes() {
        let bstr = CborBstr::new(42u8);

        let buf = to_cbor(&bstr, "test").unwrap();

        // bstr of length 2 containing uint 42
        assert_eq!(buf, [0x42, 0x18, 0x2a]);

        let back: CborBstr<u8> = from_cbor(&buf, "test").unwrap();

        assert_eq!(*back, 42);
    }

    #[test]
    fn hex_display() {
        let value = [0xde, 0xad, 0xbe, 0xef];

        let hex = Hex::new(&value);

        insta::assert_snapshot!(hex, @"deadbeef");
    }
}
