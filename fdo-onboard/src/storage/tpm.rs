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

//! Slots stored in the non volatile memory of a TPM.

use std::io;

use tracing::{debug, error, info};
use tss_esapi::Context;
use tss_esapi::attributes::NvIndexAttributesBuilder;
use tss_esapi::handles::{NvIndexHandle, NvIndexTpmHandle, TpmHandle};
use tss_esapi::interface_types::algorithm::HashingAlgorithm;
use tss_esapi::interface_types::resource_handles::{NvAuth, Provision};
use tss_esapi::structures::{MaxNvBuffer, NvPublicBuilder};
use zeroize::Zeroizing;

use crate::Error;
use crate::crypto::tpm::Tpm;

use super::{NvRam, NvSlot};

/// Index of the first slot in the owner range.
pub const SLOT_A_INDEX: u32 = 0x01D1_0001;
/// Index of the second slot in the owner range.
pub const SLOT_B_INDEX: u32 = 0x01D1_0002;

/// Size of each NV index.
const SLOT_SIZE: u16 = 2048;
/// Bytes read or written with a single command.
const CHUNK_SIZE: usize = 512;
/// Length prefix of the stored record.
const LEN_SIZE: usize = 4;

fn tpm_err(ctx: &'static str, err: tss_esapi::Error) -> Error {
    error!(error = %err, "{ctx}");

    Error::io(ctx, io::Error::other(err))
}

/// Two NV indices in the owner hierarchy.
///
/// Shares the TPM with the [`TpmCrypto`](crate::crypto::tpm::TpmCrypto).
#[derive(Debug, Clone)]
pub struct TpmNvRam {
    tpm: Tpm,
}

impl TpmNvRam {
    /// Stores the slots in the connected TPM.
    pub fn new(tpm: Tpm) -> Self {
        Self { tpm }
    }

    /// Returns the TPM handle.
    pub fn tpm(&self) -> &Tpm {
        &self.tpm
    }
}

fn index(slot: NvSlot) -> Result<NvIndexTpmHandle, Error> {
    let index = match slot {
        NvSlot::A => SLOT_A_INDEX,
        NvSlot::B => SLOT_B_INDEX,
    };

    NvIndexTpmHandle::new(index).map_err(|err| tpm_err("create NV index handle", err))
}

/// Returns the handle of the slot, if the index is defined.
fn handle(ctx: &mut Context, slot: NvSlot) -> Result<Option<NvIndexHandle>, Error> {
    let index = index(slot)?;

    match ctx.tr_from_tpm_public(TpmHandle::NvIndex(index)) {
        Ok(handle) => Ok(Some(handle.into())),
        Err(err) => {
            debug!(error = %err, ?slot, "NV index not defined");

            Ok(None)
        }
    }
}

fn define(ctx: &mut Context, slot: NvSlot) -> Result<NvIndexHandle, Error> {
    let index = index(slot)?;

    let attributes = NvIndexAttributesBuilder::new()
        .with_owner_write(true)
        .with_owner_read(true)
        .build()
        .map_err(|err| tpm_err("build NV index attributes", err))?;

    let public = NvPublicBuilder::new()
        .with_nv_index(index)
        .with_index_name_algorithm(HashingAlgorithm::Sha256)
        .with_index_attributes(attributes)
        .with_data_area_size(SLOT_SIZE.into())
        .build()
        .map_err(|err| tpm_err("build NV index public area", err))?;

    let handle = ctx
        .execute_with_nullauth_session(|ctx| ctx.nv_define_space(Provision::Owner, None, public))
        .map_err(|err| tpm_err("define NV index", err))?;

    info!(?slot, "defined NV index");

    Ok(handle)
}

fn read_at(
    ctx: &mut Context,
    handle: NvIndexHandle,
    offset: usize,
    out: &mut [u8],
) -> Result<(), Error> {
    for (i, chunk) in out.chunks_mut(CHUNK_SIZE).enumerate() {
        let offset = u16::try_from(offset + i * CHUNK_SIZE)
            .map_err(|_| Error::Config("NV offset out of range"))?;
        let size =
            u16::try_from(chunk.len()).map_err(|_| Error::Config("NV chunk out of range"))?;

        let data = ctx
            .execute_with_nullauth_session(|ctx| ctx.nv_read(NvAuth::Owner, handle, size, offset))
            .map_err(|err| tpm_err("read NV index", err))?;

        if data.len() != chunk.len() {
            return Err(Error::Integrity);
        }

        chunk.copy_from_slice(&data);
    }

    Ok(())
}

fn read_slot(ctx: &mut Context, slot: NvSlot) -> Result<Option<Vec<u8>>, Error> {
    let Some(handle) = handle(ctx, slot)? else {
        return Ok(None);
    };

    let mut len = [0; LEN_SIZE];
    read_at(ctx, handle, 0, &mut len)?;

    let len = usize::try_from(u32::from_be_bytes(len)).map_err(|_| Error::Integrity)?;
    if len + LEN_SIZE > usize::from(SLOT_SIZE) {
        error!(len, "invalid NV record length");

        return Err(Error::Integrity);
    }

    let mut buf = vec![0; len];
    read_at(ctx, handle, LEN_SIZE, &mut buf)?;

    Ok(Some(buf))
}

fn write_slot(ctx: &mut Context, slot: NvSlot, record: &[u8]) -> Result<(), Error> {
    let handle = match handle(ctx, slot)? {
        Some(handle) => handle,
        None => define(ctx, slot)?,
    };

    for (i, chunk) in record.chunks(CHUNK_SIZE).enumerate() {
        let offset =
            u16::try_from(i * CHUNK_SIZE).map_err(|_| Error::Config("NV offset out of range"))?;
        let buffer = MaxNvBuffer::try_from(chunk.to_vec())
            .map_err(|err| tpm_err("create NV buffer", err))?;

        ctx.execute_with_nullauth_session(|ctx| {
            ctx.nv_write(NvAuth::Owner, handle, buffer, offset)
        })
        .map_err(|err| tpm_err("write NV index", err))?;
    }

    Ok(())
}

/// Prefixes the data with its big endian length.
fn record(data: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
    if data.len() + LEN_SIZE > usize::from(SLOT_SIZE) {
        return Err(Error::Config("credential too big for the NV index"));
    }

    let len = u32::try_from(data.len()).map_err(|_| Error::Config("NV record too big"))?;

    Ok(Zeroizing::new([len.to_be_bytes().as_slice(), data].concat()))
}

impl NvRam for TpmNvRam {
    async fn read(&mut self, slot: NvSlot) -> Result<Option<Vec<u8>>, Error> {
        self.tpm
            .run(move |tpm| read_slot(tpm.context(), slot))
            .await
    }

    async fn write(&mut self, slot: NvSlot, data: &[u8]) -> Result<(), Error> {
        let record = record(data)?;
        let len = data.len();

        self.tpm
            .run(move |tpm| write_slot(tpm.context(), slot, &record))
            .await?;

        debug!(?slot, len, "NV index written");

        Ok(())
    }
}
