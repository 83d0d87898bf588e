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

//! Type to manage [`ServiceInfo`].
//!
//! The ServiceInfo type is a collection of key-value pairs which allows an interaction between the
//! Management Service (on the cloud side) and Management Agent functions (on the Device side),
//! using the FIDO Device Onboard encrypted channel as a transport.
//!
//! See <https://fidoalliance.org/specs/FDO/FIDO-Device-Onboard-PS-v1.1-20220419/FIDO-Device-Onboard-PS-v1.1-20220419.html#ServiceInfo>.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::Error;
use crate::error::ErrorKind;

/// ```cddl
/// ServiceInfo = [
///     * ServiceInfoKV
/// ]
/// ```
pub type ServiceInfo = Vec<ServiceInfoKv>;

/// ```cddl
/// ServiceInfoKV = [
///     ServiceInfoKey: tstr,
///     ServiceInfoVal: bstr .cbor any
/// ]
/// ```
///
/// The key is in the form `module:message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfoKv {
    service_info_key: String,
    service_info_val: ByteBuf,
}

impl ServiceInfoKv {
    /// Creates a key value, encoding the value to CBOR.
    pub fn new<T>(service_info_key: impl Into<String>, value: &T) -> Result<Self, Error>
    where
        T: Serialize + ?Sized,
    {
        let service_info_val = crate::utils::to_cbor(value, "service info value")?;

        Ok(Self::from_raw(service_info_key, service_info_val))
    }

    /// Creates a key value with an already encoded value.
    pub fn from_raw(service_info_key: impl Into<String>, service_info_val: Vec<u8>) -> Self {
        Self {
            service_info_key: service_info_key.into(),
            service_info_val: ByteBuf::from(service_info_val),
        }
    }

    /// Return the service info key
    pub fn key(&self) -> &str {
        &self.service_info_key
    }

    /// Returns the module name part of the key.
    pub fn module(&self) -> &str {
        self.service_info_key
            .split_once(':')
            .map_or(self.service_info_key.as_str(), |(module, _)| module)
    }

    /// Returns the message name part of the key, empty if the key has no separator.
    pub fn message(&self) -> &str {
        self.service_info_key
            .split_once(':')
            .map_or("", |(_, message)| message)
    }

    /// Return the encoded service info value
    pub fn value_as_bytes(&self) -> &[u8] {
        self.service_info_val.as_slice()
    }

    /// Return the service info value
    pub fn value<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        ciborium::from_reader::<T, &[u8]>(self.service_info_val.as_slice()).map_err(|error| {
            #[cfg(feature = "tracing")]
            tracing::error!(%error, key = self.key(), "couldn't decode service info value");

            Error::new(ErrorKind::Decode, "service info value")
        })
    }

    /// Size of the key value once encoded in a [`ServiceInfo`] array.
    pub fn encoded_len(&self) -> usize {
        // array header, plus the two heads for the text and byte strings
        1 + head_len(self.service_info_key.len())
            + self.service_info_key.len()
            + head_len(self.service_info_val.len())
            + self.service_info_val.len()
    }
}

/// Length of a CBOR major type head for the given argument.
pub fn head_len(arg: usize) -> usize {
    match arg {
        0..=23 => 1,
        24..=0xff => 2,
        0x100..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

impl Serialize for ServiceInfoKv {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            service_info_key,
            service_info_val,
        } = self;

        (service_info_key, service_info_val).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ServiceInfoKv {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (service_info_key, service_info_val) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            service_info_key,
            service_info_val,
        })
    }
}

/// Device [`ServiceInfo`] devmod Module.
///
/// The “devmod” module implements a set of messages to the FIDO Device Onboard Owner that identify
/// the capabilities of the device.
///
/// All FIDO Device Onboard Owners must implement this module, and FIDO Device Onboard Owner
/// implementations must provide these messages to any module that asks for them. In addition all
/// “devmod” messages are sent by the Device in the first Device ServiceInfo.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Devmod {
    /// Indicates the module is active. Devmod is required on all devices
    Active,
    /// OS name (e.g., Linux)
    Os(String),
    /// Architecture name / instruction set (e.g., X86_64)
    Arch(String),
    /// Version of OS (e.g., “Ubuntu* 16.0.4LTS”)
    Version(String),
    /// Model specifier for this FIDO Device Onboard Device, manufacturer specific
    Device(String),
    /// Serial number for this FIDO Device Onboard Device, manufacturer specific
    Sn(String),
    /// Filename separator, that works to make lists of file names (e.g., ‘:’ or ‘;’)
    Sep(String),
    /// Either the same value as “arch”, or a list of machine formats that can be interpreted by
    /// this device, in preference order, separated by the “sep” value (e.g., “x86:X86_64”)
    Bin(String),
    /// Number of modules supported by this FIDO Device Onboard Device
    Nummodules(usize),
    /// Enumerates the modules supported by this FIDO Device Onboard Device.
    ///
    /// Encoded as `[start, count, names...]`.
    Modules {
        /// Index of the first module in this message.
        start: usize,
        /// Module names.
        names: Vec<String>,
    },
}

impl Devmod {
    /// Returns the ServiceInfoKey for the Devmod
    pub fn key(&self) -> &'static str {
        match self {
            Devmod::Active => "devmod:active",
            Devmod::Os(_) => "devmod:os",
            Devmod::Arch(_) => "devmod:arch",
            Devmod::Version(_) => "devmod:version",
            Devmod::Device(_) => "devmod:device",
            Devmod::Sn(_) => "devmod:sn",
            Devmod::Sep(_) => "devmod:sep",
            Devmod::Bin(_) => "devmod:bin",
            Devmod::Nummodules(_) => "devmod:nummodules",
            Devmod::Modules { .. } => "devmod:modules",
        }
    }

    /// Encodes the message into a key value.
    pub fn to_kv(&self) -> Result<ServiceInfoKv, Error> {
        match self {
            Devmod::Active => ServiceInfoKv::new(self.key(), &true),
            Devmod::Os(value)
            | Devmod::Arch(value)
            | Devmod::Version(value)
            | Devmod::Device(value)
            | Devmod::Sn(value)
            | Devmod::Sep(value)
            | Devmod::Bin(value) => ServiceInfoKv::new(self.key(), value),
            Devmod::Nummodules(value) => ServiceInfoKv::new(self.key(), value),
            Devmod::Modules { start, names } => {
                let mut value = Vec::with_capacity(names.len() + 2);
                value.push(ciborium::Value::from(*start as u64));
                value.push(ciborium::Value::from(names.len() as u64));
                value.extend(names.iter().map(|name| ciborium::Value::Text(name.clone())));

                ServiceInfoKv::new(self.key(), &value)
            }
        }
    }
}
