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

//! Owner addresses returned by the Rendezvous Server.

use serde::{Deserialize, Serialize};

use super::hash_hmac::Hash;
use super::{DnsAddress, IpAddress, Port, TransportProtocol};

/// ```cddl
/// RVTO2AddrEntry = [
///     RVIP: IPAddress / null,       ;; IP address where Owner is waiting for TO2
///     RVDNS: DNSAddress / null,     ;; DNS address where Owner is waiting for TO2
///     RVPort: Port,                 ;; TCP/UDP port to go with above
///     RVProtocol: TransportProtocol ;; Protocol, to go with above
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RvTo2AddrEntry {
    /// IP address where Owner is waiting for TO2
    pub rv_ip: Option<IpAddress>,
    /// DNS address where Owner is waiting for TO2
    pub rv_dns: Option<DnsAddress>,
    /// TCP/UDP port to go with above
    pub rv_port: Port,
    /// Protocol, to go with above
    pub rv_protocol: TransportProtocol,
}

impl Serialize for RvTo2AddrEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            rv_ip,
            rv_dns,
            rv_port,
            rv_protocol,
        } = self;

        (rv_ip, rv_dns, rv_port, rv_protocol).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RvTo2AddrEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (rv_ip, rv_dns, rv_port, rv_protocol) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            rv_ip,
            rv_dns,
            rv_port,
            rv_protocol,
        })
    }
}

/// ```cddl
/// RVTO2Addr = [ + RVTO2AddrEntry ]
/// ```
pub type RvTo2Addr = Vec<RvTo2AddrEntry>;

/// Payload of the `to1d` signed by the Owner during TO0.
///
/// ```cddl
/// to1dBlobPayload = [
///     to1dRV:       RVTO2Addr, ;; IP address or DNS, port and protocol
///     to1dTo0dHash: Hash       ;; Hash of to0d from TO0.OwnerSign
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct To1dBlobPayload {
    /// Addresses the Owner is waiting on.
    pub to1d_rv: RvTo2Addr,
    /// Hash of the `to0d` sent to the Rendezvous Server.
    pub to1d_to0d_hash: Hash,
}

impl Serialize for To1dBlobPayload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            to1d_rv,
            to1d_to0d_hash,
        } = self;

        (to1d_rv, to1d_to0d_hash).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for To1dBlobPayload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (to1d_rv, to1d_to0d_hash) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            to1d_rv,
            to1d_to0d_hash,
        })
    }
}
