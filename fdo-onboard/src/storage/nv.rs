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

//! Credential stored in two slots of a non volatile memory.
//!
//! Every save writes the slot not holding the current credential, with a generation one higher
//! than the current. Loading picks the valid slot with the highest generation, so an interrupted
//! write always leaves the previous credential readable.

use std::future::Future;

use fdo_protocol::v101::device_credentials::DeviceCredential;
use serde::Deserialize;
use serde_bytes::ByteBuf;
use tracing::{debug, error, instrument, warn};
use zeroize::Zeroizing;

use crate::Error;

use super::{CredentialStore, digest, open};

/// Slot of the non volatile memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvSlot {
    /// First slot.
    A,
    /// Second slot.
    B,
}

impl NvSlot {
    fn other(self) -> Self {
        match self {
            NvSlot::A => NvSlot::B,
            NvSlot::B => NvSlot::A,
        }
    }
}

/// Non volatile memory with two slots.
pub trait NvRam: Send {
    /// Reads the content of the slot, [`None`] if it was never written.
    fn read(
        &mut self,
        slot: NvSlot,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Error>> + Send;

    /// Overwrites the content of the slot.
    fn write(&mut self, slot: NvSlot, data: &[u8])
    -> impl Future<Output = Result<(), Error>> + Send;
}

/// Memory backed slots, mostly useful for testing.
#[derive(Debug, Default, Clone)]
pub struct MemoryNvRam {
    a: Option<Vec<u8>>,
    b: Option<Vec<u8>>,
}

impl MemoryNvRam {
    /// Create empty slots.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, slot: NvSlot) -> &mut Option<Vec<u8>> {
        match slot {
            NvSlot::A => &mut self.a,
            NvSlot::B => &mut self.b,
        }
    }
}

impl NvRam for MemoryNvRam {
    async fn read(&mut self, slot: NvSlot) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.slot_mut(slot).clone())
    }

    async fn write(&mut self, slot: NvSlot, data: &[u8]) -> Result<(), Error> {
        *self.slot_mut(slot) = Some(data.to_vec());

        Ok(())
    }
}

/// ```cddl
/// NvRecord = [
///     generation: uint64,
///     payload:    bstr .cbor DeviceCredential,
///     digest:     bstr, ;; SHA-256 of the payload
/// ]
/// ```
#[derive(Debug, Deserialize)]
struct NvRecord(u64, ByteBuf, ByteBuf);

/// Credential stored in the A/B slots.
#[derive(Debug)]
pub struct NvStore<N> {
    nvram: N,
}

struct Current {
    slot: NvSlot,
    generation: u64,
    credential: DeviceCredential,
}

impl<N> NvStore<N>
where
    N: NvRam,
{
    /// Uses the slots of the memory.
    pub fn new(nvram: N) -> Self {
        Self { nvram }
    }

    /// Returns the underlying memory.
    pub fn into_inner(self) -> N {
        self.nvram
    }

    async fn read_slot(&mut self, slot: NvSlot) -> Result<Option<(u64, DeviceCredential)>, Error> {
        let Some(buf) = self.nvram.read(slot).await? else {
            return Ok(None);
        };
        let buf = Zeroizing::new(buf);

        let NvRecord(generation, payload, digest) = ciborium::from_reader(buf.as_slice())
            .map_err(|err| {
                warn!(error = %err, ?slot, "couldn't decode slot record");

                Error::Integrity
            })?;

        let payload = Zeroizing::new(payload.into_vec());

        match open(&payload, &digest) {
            Ok(credential) => Ok(Some((generation, credential))),
            Err(err) => {
                warn!(error = %err, ?slot, "invalid slot content");

                Err(Error::Integrity)
            }
        }
    }

    async fn current(&mut self) -> Result<Option<Current>, Error> {
        let mut found_any = false;
        let mut best: Option<Current> = None;

        for slot in [NvSlot::A, NvSlot::B] {
            match self.read_slot(slot).await {
                Ok(None) => {}
                Ok(Some((generation, credential))) => {
                    found_any = true;

                    if best.as_ref().is_none_or(|best| generation > best.generation) {
                        best = Some(Current {
                            slot,
                            generation,
                            credential,
                        });
                    }
                }
                Err(Error::Integrity) => {
                    found_any = true;
                }
                Err(err) => return Err(err),
            }
        }

        match best {
            Some(current) => Ok(Some(current)),
            None if found_any => {
                error!("no valid credential in the slots");

                Err(Error::Integrity)
            }
            None => Ok(None),
        }
    }
}

impl<N> CredentialStore for NvStore<N>
where
    N: NvRam,
{
    #[instrument(skip(self))]
    async fn load(&mut self) -> Result<DeviceCredential, Error> {
        let current = self.current().await?.ok_or(Error::NotInitialized)?;

        debug!(slot = ?current.slot, generation = current.generation, "credential loaded");

        Ok(current.credential)
    }

    #[instrument(skip_all)]
    async fn save(&mut self, credential: &DeviceCredential) -> Result<(), Error> {
        let (slot, generation) = match self.current().await {
            Ok(Some(current)) => (current.slot.other(), current.generation.saturating_add(1)),
            Ok(None) | Err(Error::Integrity) => (NvSlot::A, 1),
            Err(err) => return Err(err),
        };

        let payload = credential.encode()?;
        let digest = digest(&payload);
        let record = (
            generation,
            serde_bytes::Bytes::new(&payload),
            serde_bytes::Bytes::new(&digest),
        );

        let mut buf = Zeroizing::new(Vec::new());
        ciborium::into_writer(&record, &mut *buf).map_err(|err| {
            error!(error = %err, "couldn't encode slot record");

            Error::Protocol(fdo_protocol::Error::new(
                fdo_protocol::error::ErrorKind::Encode,
                "nv slot record",
            ))
        })?;

        self.nvram.write(slot, &buf).await?;

        debug!(?slot, generation, "credential saved");

        Ok(())
    }
}
