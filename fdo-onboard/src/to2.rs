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

//! Transfer Ownership Protocol 2 (TO2)
//!
//! Transfer Ownership Protocol 2 (TO2) is an interaction between the Device ROE and the Owner
//! Onboarding Service where the transfer of ownership to the new Owner actually happens.
//!
//! The replacement credential is only returned after the TO2.Done2 nonce is verified, nothing is
//! persisted here.

use std::collections::VecDeque;

use coset::{CoseSign1, HeaderBuilder};
use fdo_protocol::error::ErrorKind;
use fdo_protocol::utils::CborBstr;
use fdo_protocol::v101::device_credentials::{DeviceCredential, DeviceState};
use fdo_protocol::v101::eat_signature::{EUPH_NONCE, EatPayload};
use fdo_protocol::v101::error::{ErrorCode, ErrorMessage};
use fdo_protocol::v101::hash_hmac::{HMac, Hashtype};
use fdo_protocol::v101::key_exchange::XAKeyExchange;
use fdo_protocol::v101::ownership_voucher::OvHeader;
use fdo_protocol::v101::public_key::PublicKey;
use fdo_protocol::v101::service_info::{ServiceInfo, ServiceInfoKv};
use fdo_protocol::v101::sign_info::SigInfo;
use fdo_protocol::v101::to2::device_service_info::DeviceServiceInfo;
use fdo_protocol::v101::to2::device_service_info_ready::DeviceServiceInfoReady;
use fdo_protocol::v101::to2::done::Done;
use fdo_protocol::v101::to2::get_ov_next_entry::GetOvNextEntry;
use fdo_protocol::v101::to2::hello_device::HelloDevice;
use fdo_protocol::v101::to2::owner_service_info::OwnerServiceInfo;
use fdo_protocol::v101::to2::prove_device::ProveDevice;
use fdo_protocol::v101::to2::prove_ov_hdr::{ProveOvHdr, ProveOvHdrPayload};
use fdo_protocol::v101::{Message, NonceTo2ProveDv, NonceTo2ProveOv, NonceTo2SetupDv};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::client::{Client, Transport};
use crate::config::DEFAULT_MAX_SERVICE_INFO_SIZE;
use crate::crypto::{Crypto, hash, verify_cose_signature, verify_hash};
use crate::error::To2Step;
use crate::srv_info::ServiceInfoRegistry;
use crate::{Ctx, Error};

/// Zero means the default message size.
const MAX_DEVICE_MESSAGE_SIZE: u16 = 0;

/// Heads of the TO2.DeviceServiceInfo array, the boolean and the service info array.
const DEVICE_SERVICE_INFO_OVERHEAD: usize = 5;

/// Result of a successful TO2.
#[derive(Debug, Clone, PartialEq)]
pub enum To2Outcome {
    /// The owner replaced the credential, it must be persisted.
    Replaced(DeviceCredential),
    /// The owner kept the current credential.
    Reused,
}

/// Runs TO2 against the owner at `url`.
///
/// The `to1d` received from the Rendezvous Server is verified with the owner key, it's missing
/// when the rendezvous was bypassed.
#[instrument(skip_all, fields(%url))]
pub async fn negotiate<C, R, T>(
    ctx: &Ctx<'_, C, R>,
    transport: &mut T,
    url: &Url,
    credential: &DeviceCredential,
    to1d: Option<&CoseSign1>,
    registry: &mut ServiceInfoRegistry,
) -> Result<To2Outcome, Error>
where
    C: Crypto,
    T: Transport,
{
    info!("To2 started");

    registry.reset().await;

    let to2 = To2 {
        client: Client::new(transport, url, ctx.cancel()),
        credential,
        state: Hello {},
    };

    let prove = to2
        .run(ctx)
        .await
        .map_err(|err| err.at_step(To2Step::HelloDevice))?;
    let chain = prove
        .run(ctx, to1d)
        .await
        .map_err(|err| err.at_step(To2Step::HelloDevice))?;
    let prove_dv = chain
        .run()
        .await
        .map_err(|err| err.at_step(To2Step::OvEntries))?;
    let setup = prove_dv
        .run(ctx)
        .await
        .map_err(|err| err.at_step(To2Step::ProveDevice))?;
    let ready = setup
        .run(ctx)
        .await
        .map_err(|err| err.at_step(To2Step::ServiceInfoReady))?;
    let done = ready
        .run(registry)
        .await
        .map_err(|err| err.at_step(To2Step::ServiceInfo))?;
    let outcome = done.run().await.map_err(|err| err.at_step(To2Step::Done))?;

    info!("To2 done");

    Ok(outcome)
}

fn invalid(ctx: &'static str) -> Error {
    fdo_protocol::Error::new(ErrorKind::Invalid, ctx).into()
}

fn to_cbor<T>(value: &T, ctx: &'static str) -> Result<Vec<u8>, Error>
where
    T: Serialize,
{
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|err| {
        error!(error = %err, "couldn't encode {ctx}");

        fdo_protocol::Error::new(ErrorKind::Encode, ctx)
    })?;

    Ok(buf)
}

/// Checks the header HMAC is of a type the device has a secret for.
fn check_hmac_type(hash_type: Hashtype) -> Result<(), Error> {
    if !hash_type.is_hmac() {
        error!(?hash_type, "not an HMAC type");

        return Err(invalid("ownership voucher HMAC type"));
    }

    Ok(())
}

/// TO2 protocol
struct To2<'a, 'c, T, S> {
    client: Client<'c, T>,
    credential: &'a DeviceCredential,
    state: S,
}

impl<'a, 'c, T, S> To2<'a, 'c, T, S> {
    fn next<N>(self, state: N) -> To2<'a, 'c, T, N> {
        To2 {
            client: self.client,
            credential: self.credential,
            state,
        }
    }
}

/// First state of TO2
struct Hello {}

impl<'a, 'c, T> To2<'a, 'c, T, Hello>
where
    T: Transport,
{
    async fn run<C, R>(mut self, ctx: &Ctx<'_, C, R>) -> Result<To2<'a, 'c, T, Prove>, Error>
    where
        C: Crypto,
    {
        let config = ctx.config();

        let hello = HelloDevice {
            max_device_message_size: MAX_DEVICE_MESSAGE_SIZE,
            guid: self.credential.dc_guid,
            nonce_to2_prove_ov: ctx.crypto.create_nonce()?,
            kex_suite_name: config.kex,
            cipher_suite_name: config.cipher,
            e_a_sig_info: SigInfo::new(ctx.crypto.sign_info_type()),
        };

        let hdr = self.client.send(&hello).await?;

        info!("To2.HelloDevice sent");

        Ok(self.next(Prove { hello, hdr }))
    }
}

struct Prove {
    hello: HelloDevice,
    hdr: ProveOvHdr,
}

impl<'a, 'c, T> To2<'a, 'c, T, Prove>
where
    T: Transport,
{
    async fn run<C, R>(
        mut self,
        ctx: &Ctx<'_, C, R>,
        to1d: Option<&CoseSign1>,
    ) -> Result<To2<'a, 'c, T, VerifyChain>, Error>
    where
        C: Crypto,
    {
        let payload = self.state.hdr.payload()?;
        let owner_key = self.state.hdr.owner_pub_key()?;

        verify_cose_signature(self.state.hdr.sign(), &owner_key)
            .inspect_err(|_| error!("couldn't verify To2.ProveOvHdr signature"))?;

        info!("To2.ProveOvHdr signature verified");

        if payload.nonce_to2_prove_ov != self.state.hello.nonce_to2_prove_ov {
            error!("mismatched To2.ProveOvHdr nonce");

            return Err(invalid("mismatched TO2.ProveOVHdr nonce"));
        }

        let hello = self.state.hello.to_bytes()?;
        if let Err(err) = verify_hash(&payload.hello_device_hash, &hello) {
            error!("couldn't verify hello device hash");

            let msg = ErrorMessage::new(
                ErrorCode::MessageBodyError,
                ProveOvHdr::MSG_TYPE,
                "failed to validate HelloDevice hash",
            );
            self.client.notify(&msg).await;

            return Err(err.into());
        }

        info!("To2.ProveOvHdr HelloDevice verified");

        let ov_header: &OvHeader = &payload.ov_header;

        if ov_header.ov_guid != self.credential.dc_guid {
            error!(guid = %ov_header.ov_guid, "ownership voucher for another device");

            return Err(invalid("ownership voucher GUID"));
        }

        let manufacturer_key = to_cbor(&ov_header.ov_pub_key, "ov header public key")?;
        verify_hash(&self.credential.dc_pub_key_hash, &manufacturer_key)
            .inspect_err(|_| error!("couldn't verify device public key hash"))?;

        info!("To2.ProveOvHdr OVPubKey verified");

        check_hmac_type(payload.hmac.hash_type())?;
        if let Err(err) = ctx
            .crypto
            .verify_hmac(&payload.hmac, payload.ov_header.bytes()?)
            .await
        {
            error!("couldn't verify device credentials hmac");

            let msg = ErrorMessage::new(
                ErrorCode::InvalidOwnershipVoucher,
                ProveOvHdr::MSG_TYPE,
                "failed to validate the ownership voucher HMAC",
            );
            self.client.notify(&msg).await;

            return Err(err.into());
        }

        info!("To2.ProveOvHdr Hmac verified");

        match to1d {
            Some(to1d) => {
                verify_cose_signature(to1d, &owner_key)
                    .inspect_err(|_| error!("couldn't verify To1.RvRedirect.to1d signature"))?;

                info!("To2.ProveOvHdr RvRedirect verified");
            }
            None => debug!("rendezvous bypassed, no to1d to verify"),
        }

        let nonce_to2_prove_dv = self.state.hdr.nonce_to2_prove_dv()?;

        Ok(self.next(VerifyChain {
            payload,
            owner_key,
            nonce_to2_prove_dv,
        }))
    }
}

struct VerifyChain {
    payload: ProveOvHdrPayload,
    owner_key: PublicKey,
    nonce_to2_prove_dv: NonceTo2ProveDv,
}

impl<'a, 'c, T> To2<'a, 'c, T, VerifyChain>
where
    T: Transport,
{
    async fn run(mut self) -> Result<To2<'a, 'c, T, ProveDv>, Error> {
        let num_ov_entries = self.state.payload.num_ov_entries;

        if num_ov_entries == 0 {
            error!("ownership voucher without entries");

            return Err(invalid("number of entries must be greater than 0"));
        }

        debug!(num_ov_entries, "checking entries");

        let ov_header = &self.state.payload.ov_header;

        // OVHeader||HMac, without the bstr wrapping of the header
        let mut prev_entry = ov_header.bytes()?.to_vec();
        prev_entry.extend(to_cbor(&self.state.payload.hmac, "ov header hmac")?);

        let mut hdr_info = ov_header.ov_guid.as_bytes().to_vec();
        hdr_info.extend_from_slice(ov_header.ov_device_info.as_bytes());

        let mut variables = Variables {
            prev_entry,
            pub_key: ov_header.ov_pub_key.clone(),
            hdr_info,
        };

        for ov_entry_num in 0..num_ov_entries {
            let entry = self.client.send(&GetOvNextEntry { ov_entry_num }).await?;

            if entry.ov_entry_num != ov_entry_num {
                error!(
                    expected = ov_entry_num,
                    value = entry.ov_entry_num,
                    "mismatched entry number"
                );

                return Err(invalid("TO2.OVNextEntry number"));
            }

            variables.validate(&entry)?;

            debug!(ov_entry_num, "To2.OvNextEntry validated");
        }

        if variables.pub_key != self.state.owner_key {
            debug!(
                last = ?variables.pub_key,
                owner = ?self.state.owner_key,
                "final key mismatch"
            );

            let msg = ErrorMessage::new(
                ErrorCode::InvalidOwnershipVoucher,
                GetOvNextEntry::MSG_TYPE,
                "last entry key is not the owner key",
            );
            self.client.notify(&msg).await;

            return Err(invalid("final key mismatch"));
        }

        info!("To2.OvNextEntry chain verified");

        let VerifyChain {
            payload,
            owner_key,
            nonce_to2_prove_dv,
        } = self.state;

        let hmac_type = payload.hmac.hash_type();

        Ok(To2 {
            client: self.client,
            credential: self.credential,
            state: ProveDv {
                ov_header: payload.ov_header.into_inner(),
                hmac_type,
                owner_key,
                nonce_to2_prove_dv,
                xa_key_exchange: payload.xa_key_exchange,
            },
        })
    }
}

/// Accumulator of the chain validation.
///
/// - **prev_entry**: data hashed in the next entry, `OVHeader||HMac` for the first one and the
///   tagged previous entry after.
/// - **pub_key**: key that signs the next entry, starts from the manufacturer key in the header.
/// - **hdr_info**: `Guid||DeviceInfo` of the header.
struct Variables {
    prev_entry: Vec<u8>,
    pub_key: PublicKey,
    hdr_info: Vec<u8>,
}

impl Variables {
    fn validate(
        &mut self,
        entry: &fdo_protocol::v101::to2::ov_next_entry::OvNextEntry,
    ) -> Result<(), Error> {
        verify_cose_signature(&entry.ov_entry, &self.pub_key)
            .inspect_err(|_| error!("couldn't validate ov entry signature"))?;

        let payload = entry.payload()?;

        verify_hash(&payload.ove_hash_hdr_info, &self.hdr_info)
            .inspect_err(|_| error!("couldn't validate hash hdr info"))?;

        verify_hash(&payload.ove_hash_prev_entry, &self.prev_entry)
            .inspect_err(|_| error!("couldn't validate hash of the previous entry"))?;

        self.pub_key = payload.ove_pub_key;
        self.prev_entry = entry.entry_bytes()?;

        Ok(())
    }
}

struct ProveDv {
    ov_header: OvHeader,
    hmac_type: Hashtype,
    owner_key: PublicKey,
    nonce_to2_prove_dv: NonceTo2ProveDv,
    xa_key_exchange: XAKeyExchange,
}

impl<'a, 'c, T> To2<'a, 'c, T, ProveDv>
where
    T: Transport,
{
    async fn run<C, R>(mut self, ctx: &Ctx<'_, C, R>) -> Result<To2<'a, 'c, T, DvReady>, Error>
    where
        C: Crypto,
    {
        let config = ctx.config();

        let (xb, session) =
            ctx.crypto
                .key_exchange(config.kex, config.cipher, &self.state.xa_key_exchange)?;

        info!("To2.ProveDevice key exchange generated");

        let eat = EatPayload {
            nonce: self.state.nonce_to2_prove_dv,
            guid: self.credential.dc_guid,
            fdo: Some(ProveDevice::fdo_claim(&xb)),
        };

        let nonce_to2_setup_dv = ctx.crypto.create_nonce()?;

        let unprotected = HeaderBuilder::new().value(
            EUPH_NONCE,
            ciborium::Value::Bytes(nonce_to2_setup_dv.as_bytes().to_vec()),
        );

        let sign = ctx.crypto.cose_sign(unprotected, eat.encode()?).await?;

        self.client.set_session(session);

        let setup = self.client.send_plain(&ProveDevice(sign)).await?;

        info!("To2.ProveDevice succeeded");

        let payload = setup.payload()?;

        verify_cose_signature(setup.sign(), &payload.owner2_key)
            .inspect_err(|_| error!("couldn't verify To2.SetupDevice signature"))?;

        if payload.nonce_to2_setup_dv != nonce_to2_setup_dv {
            error!("mismatched To2.SetupDevice nonce");

            return Err(invalid("mismatched TO2.SetupDevice nonce"));
        }

        info!("To2.SetupDevice verified");

        let reuse = payload.guid == self.credential.dc_guid
            && payload.rendezvous_info == self.credential.dc_rv_info
            && payload.owner2_key == self.state.owner_key;

        let replacement = if reuse {
            if !config.allow_credential_reuse {
                error!("owner requested credential reuse, but it's not allowed");

                let msg = ErrorMessage::new(
                    ErrorCode::CredReuseError,
                    fdo_protocol::v101::to2::setup_device::SetupDevice::MSG_TYPE,
                    "credential reuse is not supported",
                );
                self.client.notify(&msg).await;

                return Err(invalid("credential reuse not allowed"));
            }

            info!("To2.SetupDevice credential reuse");

            None
        } else {
            let ov_header = OvHeader {
                ovh_prot_ver: self.state.ov_header.ovh_prot_ver,
                ov_guid: payload.guid,
                ov_rv_info: payload.rendezvous_info,
                ov_device_info: self.state.ov_header.ov_device_info.clone(),
                ov_pub_key: payload.owner2_key,
                ov_dev_cert_chain_hash: self.state.ov_header.ov_dev_cert_chain_hash.clone(),
            };

            Some(self.stage(ctx, ov_header).await?)
        };

        Ok(self.next_ready(replacement, nonce_to2_setup_dv))
    }

    /// Computes the replacement HMAC and credential for the new header.
    async fn stage<C, R>(
        &self,
        ctx: &Ctx<'_, C, R>,
        ov_header: OvHeader,
    ) -> Result<Replacement, Error>
    where
        C: Crypto,
    {
        let header = CborBstr::new(ov_header);
        let hmac = ctx
            .crypto
            .hmac(self.state.hmac_type, header.bytes()?)
            .await?;

        let ov_header = header.into_inner();

        let owner_key = to_cbor(&ov_header.ov_pub_key, "owner2 public key")?;
        let dc_pub_key_hash = hash(self.credential.dc_pub_key_hash.hash_type(), &owner_key)?;

        let credential = DeviceCredential {
            dc_guid: ov_header.ov_guid,
            dc_rv_info: ov_header.ov_rv_info,
            dc_pub_key_hash,
            dc_state: DeviceState::Idle,
            ..self.credential.clone()
        };

        debug!(guid = %credential.dc_guid, "replacement credential staged");

        Ok(Replacement { hmac, credential })
    }

    fn next_ready(
        self,
        replacement: Option<Replacement>,
        nonce_to2_setup_dv: NonceTo2SetupDv,
    ) -> To2<'a, 'c, T, DvReady> {
        let nonce_to2_prove_dv = self.state.nonce_to2_prove_dv;

        self.next(DvReady {
            replacement,
            nonce_to2_prove_dv,
            nonce_to2_setup_dv,
        })
    }
}

struct Replacement {
    hmac: HMac,
    credential: DeviceCredential,
}

struct DvReady {
    replacement: Option<Replacement>,
    nonce_to2_prove_dv: NonceTo2ProveDv,
    nonce_to2_setup_dv: NonceTo2SetupDv,
}

impl<'a, 'c, T> To2<'a, 'c, T, DvReady>
where
    T: Transport,
{
    async fn run<C, R>(mut self, ctx: &Ctx<'_, C, R>) -> Result<To2<'a, 'c, T, SrvInfo>, Error> {
        let max_size = ctx.config().max_service_info_size();

        let ready = DeviceServiceInfoReady {
            replacement_hmac: self.state.replacement.as_ref().map(|r| r.hmac.clone()),
            max_owner_service_info_sz: Some(max_size),
        };

        let owner_ready = self.client.send(&ready).await?;

        // Our max only limits what the owner sends us
        let mtu = owner_ready
            .max_device_service_info_sz
            .filter(|size| *size != 0)
            .unwrap_or(DEFAULT_MAX_SERVICE_INFO_SIZE);

        info!(mtu, max_size, "To2.DeviceServiceInfoReady done");

        let DvReady {
            replacement,
            nonce_to2_prove_dv,
            nonce_to2_setup_dv,
        } = self.state;

        Ok(To2 {
            client: self.client,
            credential: self.credential,
            state: SrvInfo {
                mtu: usize::from(mtu),
                max_size: usize::from(max_size),
                replacement,
                nonce_to2_prove_dv,
                nonce_to2_setup_dv,
            },
        })
    }
}

struct SrvInfo {
    /// Max size of the device service info.
    mtu: usize,
    /// Max size of the owner service info.
    max_size: usize,
    replacement: Option<Replacement>,
    nonce_to2_prove_dv: NonceTo2ProveDv,
    nonce_to2_setup_dv: NonceTo2SetupDv,
}

impl<'a, 'c, T> To2<'a, 'c, T, SrvInfo>
where
    T: Transport,
{
    /// Exchanges the service info.
    ///
    /// While a side has more to send the other replies with an empty message, the replies of the
    /// modules are queued and sent once the owner finished its batch.
    ///
    /// The device must answer the owner's `is_done` with TO2.Done, replies to that last message
    /// are dropped.
    async fn run(
        mut self,
        registry: &mut ServiceInfoRegistry,
    ) -> Result<To2<'a, 'c, T, DvDone>, Error> {
        let mut queue: VecDeque<ServiceInfoKv> = registry
            .announce(&self.credential.dc_device_info)?
            .into();
        let mut owner_more = false;

        loop {
            let service_info = if owner_more {
                ServiceInfo::new()
            } else {
                next_chunk(&mut queue, self.state.mtu)?
            };
            let is_more = !owner_more && !queue.is_empty();

            debug!(
                len = service_info.len(),
                is_more, "To2.DeviceServiceInfo sending"
            );

            let owner = self
                .client
                .send(&DeviceServiceInfo {
                    is_more_service_info: is_more,
                    service_info,
                })
                .await?;

            info!(
                len = owner.service_info.len(),
                is_more = owner.is_more_service_info,
                is_done = owner.is_done,
                "To2.OwnerServiceInfo received"
            );

            if is_more && (owner.is_done || !owner.service_info.is_empty()) {
                error!("owner sent service info while the device had more");

                return Err(invalid("TO2.OwnerServiceInfo while device has more"));
            }

            let size = to_cbor(&owner.service_info, "owner service info")?.len();
            if size > self.state.max_size {
                error!(size, max = self.state.max_size, "owner service info too big");

                let msg = ErrorMessage::new(
                    ErrorCode::MessageBodyError,
                    OwnerServiceInfo::MSG_TYPE,
                    "owner service info bigger than the announced max size",
                );
                self.client.notify(&msg).await;

                let err = fdo_protocol::Error::new(ErrorKind::OutOfRange, "owner service info size");

                return Err(err.into());
            }

            for kv in &owner.service_info {
                queue.extend(registry.dispatch(kv).await?);
            }

            if owner.is_done {
                if !queue.is_empty() {
                    warn!(len = queue.len(), "owner is done, dropping module replies");
                }

                break;
            }

            owner_more = owner.is_more_service_info;
        }

        registry.finish().await?;

        info!("To2.OwnerServiceInfo done");

        let SrvInfo {
            replacement,
            nonce_to2_prove_dv,
            nonce_to2_setup_dv,
            ..
        } = self.state;

        Ok(To2 {
            client: self.client,
            credential: self.credential,
            state: DvDone {
                replacement: replacement.map(|r| r.credential),
                nonce_to2_prove_dv,
                nonce_to2_setup_dv,
            },
        })
    }
}

/// Takes from the queue the key values fitting a TO2.DeviceServiceInfo of `mtu` bytes.
fn next_chunk(queue: &mut VecDeque<ServiceInfoKv>, mtu: usize) -> Result<ServiceInfo, Error> {
    let mut size = DEVICE_SERVICE_INFO_OVERHEAD;
    let mut chunk = ServiceInfo::new();

    while let Some(kv) = queue.front() {
        let len = kv.encoded_len();

        if size + len > mtu {
            if chunk.is_empty() {
                error!(key = kv.key(), len, mtu, "service info bigger than the MTU");

                return Err(fdo_protocol::Error::new(ErrorKind::OutOfRange, "service info size").into());
            }

            break;
        }

        size += len;
        chunk.extend(queue.pop_front());
    }

    Ok(chunk)
}

/// Final message for the FDO
struct DvDone {
    replacement: Option<DeviceCredential>,
    nonce_to2_prove_dv: NonceTo2ProveDv,
    nonce_to2_setup_dv: NonceTo2SetupDv,
}

impl<T> To2<'_, '_, T, DvDone>
where
    T: Transport,
{
    async fn run(mut self) -> Result<To2Outcome, Error> {
        let done = Done {
            nonce_to2_prove_dv: self.state.nonce_to2_prove_dv,
        };

        let done2 = self.client.send(&done).await?;

        if done2.nonce_to2_setup_dv != self.state.nonce_to2_setup_dv {
            error!("mismatched To2.Done2 nonce");

            return Err(invalid("mismatched TO2.Done2 nonce"));
        }

        info!("To2.Done2 verified");

        Ok(match self.state.replacement {
            Some(credential) => To2Outcome::Replaced(credential),
            None => To2Outcome::Reused,
        })
    }
}

#[cfg(test)]
mod tests {
    use fdo_protocol::v101::key_exchange::KexSuiteName;
    use fdo_protocol::v101::service_info::ServiceInfoKv;
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    use crate::OnboardConfig;
    use crate::client::responder::InProcessTransport;
    use crate::crypto::software::SoftwareCrypto;
    use crate::crypto::verify_hmac;
    use crate::directive::tests::Hosts;
    use crate::error::To2Step;
    use crate::srv_info::tests::Recorder;
    use crate::tests::{Owner, Server, Tamper, create_credential, to2_url};

    use super::*;

    fn registry() -> ServiceInfoRegistry {
        let mut registry = ServiceInfoRegistry::new();
        registry.register("test.recorder", Recorder::default());

        registry
    }

    fn owner() -> Owner {
        Owner::new(&create_credential())
    }

    async fn run(
        owner: Owner,
        config: &OnboardConfig,
        registry: &mut ServiceInfoRegistry,
    ) -> (Result<To2Outcome, Error>, Server) {
        let credential = owner.credential.clone();
        let crypto = SoftwareCrypto::from_credential(&credential).unwrap();
        let resolver = Hosts::default();
        let cancel = CancellationToken::new();
        let ctx = Ctx::new(&crypto, &resolver, config, cancel.clone());

        let to1d = owner.to1d();
        let mut transport = InProcessTransport::new(Server::new(owner), cancel);

        let res = negotiate(
            &ctx,
            &mut transport,
            &to2_url(),
            &credential,
            Some(&to1d),
            registry,
        )
        .await;

        (res, transport.into_responder())
    }

    fn step(err: &Error) -> Option<To2Step> {
        match err {
            Error::To2 { step, .. } => Some(*step),
            _ => None,
        }
    }

    #[tokio::test]
    async fn replaces_the_credential() {
        let owner = owner();
        let config = OnboardConfig::new(KexSuiteName::Ecdh256);
        let mut registry = registry();

        let (res, server) = run(owner, &config, &mut registry).await;

        let To2Outcome::Replaced(credential) = res.unwrap() else {
            panic!("expected a replaced credential");
        };

        let owner = server.owner();
        assert_eq!(credential.dc_guid, owner.new_guid);
        assert_eq!(credential.dc_rv_info, owner.new_rv_info);
        assert_eq!(credential.dc_state, DeviceState::Idle);

        let key = to_cbor(&owner.owner2_key(), "key").unwrap();
        verify_hash(&credential.dc_pub_key_hash, &key).unwrap();

        // The owner checks the HMAC of the new header with the device secret
        let header = server.replacement_header(&credential).unwrap();
        let replacement_hmac = server.replacement_hmac().unwrap();
        verify_hmac(&credential.dc_hmac_secret, &replacement_hmac, &header).unwrap();
    }

    #[tokio::test]
    async fn announces_devmod_and_dispatches_owner_info() {
        let mut owner = owner();
        owner.service_info = vec![
            ServiceInfoKv::new("test.recorder:active", &true).unwrap(),
            ServiceInfoKv::new("test.recorder:ping", &"hello").unwrap(),
            ServiceInfoKv::new("unknown:active", &true).unwrap(),
        ];
        let config = OnboardConfig::new(KexSuiteName::Ecdh256);
        let mut registry = registry();

        let (res, server) = run(owner, &config, &mut registry).await;
        res.unwrap();

        let received = server.device_service_info();
        let keys: Vec<&str> = received.iter().map(ServiceInfoKv::key).collect();

        assert!(keys.contains(&"devmod:active"));
        assert!(keys.contains(&"devmod:modules"));
        assert!(keys.contains(&"test.recorder:active"));
        assert!(keys.contains(&"test.recorder:pong"));

        let unknown = received
            .iter()
            .find(|kv| kv.key() == "unknown:active")
            .unwrap();
        assert!(!unknown.value::<bool>().unwrap());
    }

    #[tokio::test]
    async fn device_service_info_is_chunked() {
        let mut owner = owner();
        owner.max_device_service_info_sz = Some(64);
        let config = OnboardConfig::new(KexSuiteName::Ecdh256);
        let mut registry = registry();

        let (res, server) = run(owner, &config, &mut registry).await;
        res.unwrap();

        let sizes = server.device_service_info_sizes();
        assert!(sizes.len() > 1, "{sizes:?}");
        assert!(sizes.iter().all(|size| *size <= 64), "{sizes:?}");
    }

    #[tokio::test]
    async fn device_chunks_to_the_owner_max() {
        let mut owner = owner();
        owner.max_device_service_info_sz = Some(4000);
        // only limits the owner service info
        let mut config = OnboardConfig::new(KexSuiteName::Ecdh256);
        config.max_service_info_size = 64;
        let mut registry = registry();

        let (res, server) = run(owner, &config, &mut registry).await;
        res.unwrap();

        let sizes = server.device_service_info_sizes();
        // the devmod announcement, then the empty replies to the owner
        assert!(sizes[0] > 64, "{sizes:?}");
        assert_eq!(sizes.iter().filter(|size| **size > 1).count(), 1, "{sizes:?}");
    }

    #[tokio::test]
    async fn owner_service_info_too_big() {
        let mut owner = owner();
        owner.service_info = vec![
            ServiceInfoKv::new("test.recorder:active", &true).unwrap(),
            ServiceInfoKv::new("test.recorder:ping", &"a".repeat(2000)).unwrap(),
        ];
        let config = OnboardConfig::new(KexSuiteName::Ecdh256);
        let mut registry = registry();

        let (res, server) = run(owner, &config, &mut registry).await;

        let err = res.unwrap_err();
        assert_eq!(step(&err), Some(To2Step::ServiceInfo));
        assert_eq!(server.error_codes(), [ErrorCode::MessageBodyError]);
    }

    #[tokio::test]
    async fn replies_to_the_last_owner_message_are_dropped() {
        let mut owner = owner();
        owner.service_info = vec![
            ServiceInfoKv::new("test.recorder:active", &true).unwrap(),
            ServiceInfoKv::new("test.recorder:ping", &"hello").unwrap(),
        ];
        owner.service_info_done = true;
        let config = OnboardConfig::new(KexSuiteName::Ecdh256);
        let mut registry = registry();

        let (res, server) = run(owner, &config, &mut registry).await;

        assert!(matches!(res.unwrap(), To2Outcome::Replaced(_)));

        let keys: Vec<&str> = server
            .device_service_info()
            .iter()
            .map(ServiceInfoKv::key)
            .collect();
        assert!(keys.contains(&"devmod:active"));
        assert!(!keys.contains(&"test.recorder:active"), "{keys:?}");
        assert!(!keys.contains(&"test.recorder:pong"), "{keys:?}");
    }

    #[tokio::test]
    async fn credential_reuse() {
        let mut owner = owner();
        owner.reuse = true;

        let mut config = OnboardConfig::new(KexSuiteName::Ecdh256);
        config.allow_credential_reuse = true;

        let (res, server) = run(owner, &config, &mut registry()).await;

        assert_eq!(res.unwrap(), To2Outcome::Reused);
        assert!(server.replacement_hmac().is_none());
    }

    #[tokio::test]
    async fn credential_reuse_not_allowed() {
        let mut owner = owner();
        owner.reuse = true;

        let config = OnboardConfig::new(KexSuiteName::Ecdh256);

        let (res, server) = run(owner, &config, &mut registry()).await;

        let err = res.unwrap_err();
        assert_eq!(step(&err), Some(To2Step::ProveDevice));
        assert_eq!(server.error_codes(), [ErrorCode::CredReuseError]);
    }

    #[tokio::test]
    async fn tampered_messages() {
        let cases = [
            (Tamper::HelloDeviceHash, To2Step::HelloDevice),
            (Tamper::HeaderHmac, To2Step::HelloDevice),
            (Tamper::To1dSignature, To2Step::HelloDevice),
            (Tamper::EntryHash, To2Step::OvEntries),
            (Tamper::LastEntryKey, To2Step::OvEntries),
            (Tamper::SetupDeviceNonce, To2Step::ProveDevice),
            (Tamper::Done2Nonce, To2Step::Done),
        ];

        let config = OnboardConfig::new(KexSuiteName::Ecdh256);

        for (tamper, expected) in cases {
            let mut owner = owner();
            owner.tamper = Some(tamper);

            let (res, _server) = run(owner, &config, &mut registry()).await;

            let err = res.unwrap_err();
            assert_eq!(step(&err), Some(expected), "{tamper:?}: {err:#}");
        }
    }

    #[tokio::test]
    async fn hello_hash_mismatch_is_reported() {
        let mut owner = owner();
        owner.tamper = Some(Tamper::HelloDeviceHash);
        let config = OnboardConfig::new(KexSuiteName::Ecdh256);

        let (res, server) = run(owner, &config, &mut registry()).await;

        assert!(res.is_err());
        assert_eq!(server.error_codes(), [ErrorCode::MessageBodyError]);
    }

    #[tokio::test]
    async fn p384_key_exchange() {
        let owner = owner();
        let config = OnboardConfig::new(KexSuiteName::Ecdh384);

        let (res, _server) = run(owner, &config, &mut registry()).await;

        assert!(matches!(res.unwrap(), To2Outcome::Replaced(_)));
    }

    #[test]
    fn chunk_too_big() {
        let kv = ServiceInfoKv::new("devmod:device", &"a".repeat(100)).unwrap();
        let mut queue = VecDeque::from([kv]);

        let err = next_chunk(&mut queue, 64).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
