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

//! Transfer Ownership Protocol 1 (TO1).
//!
//! Transfer Ownership Protocol 1 (TO1) finishes the rendezvous started between the New Owner and
//! the Rendezvous Server in the Transfer Ownership Protocol 0 (TO0). In this protocol, the Device
//! ROE communicates with the Rendezvous Server and obtains the IP addressing info for the
//! prospective new Owner

use coset::{CoseSign1, HeaderBuilder};
use fdo_protocol::v101::NonceTo1Proof;
use fdo_protocol::v101::device_credentials::DeviceCredential;
use fdo_protocol::v101::eat_signature::EatPayload;
use fdo_protocol::v101::rv_to2_addr::RvTo2AddrEntry;
use fdo_protocol::v101::sign_info::SigInfo;
use fdo_protocol::v101::to1::hello_rv::HelloRv;
use fdo_protocol::v101::to1::prove_to_rv::ProveToRv;
use fdo_protocol::v101::to1::rv_redirect::to1d_payload;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::client::{Client, Transport};
use crate::crypto::Crypto;
use crate::directive::{RendezvousDirective, Resolver, http_urls, resolve};
use crate::{Ctx, Error};

/// Result of the discovery for a directive.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Owner URLs to try, in order.
    pub owner_urls: Vec<Url>,
    /// Blob signed by the owner, received from the Rendezvous Server.
    pub to1d: Option<CoseSign1>,
}

/// Finds the owner addresses for a directive.
///
/// With bypass the directive URLs are the owner addresses, otherwise TO1 is run against each
/// URL until one succeeds. A failure of every URL returns no address and is not an error.
#[instrument(skip_all, fields(bypass = directive.bypass))]
pub async fn discover<C, R, T>(
    ctx: &Ctx<'_, C, R>,
    transport: &mut T,
    credential: &DeviceCredential,
    directive: &RendezvousDirective,
) -> Result<Discovery, Error>
where
    C: Crypto,
    R: Resolver,
    T: Transport,
{
    if directive.bypass {
        info!("rendezvous bypass, skipping TO1");

        return Ok(Discovery {
            owner_urls: directive.urls.clone(),
            to1d: None,
        });
    }

    let mut to1d = None;

    for url in &directive.urls {
        let client = Client::new(transport, url, ctx.cancel());

        match To1::new(client, credential).rv_owner(ctx).await {
            Ok(blob) => {
                info!(%url, "TO1 succeeded");

                to1d = Some(blob);

                break;
            }
            Err(Error::Canceled) => return Err(Error::Canceled),
            Err(err) => {
                error!(error = format!("{err:#}"), %url, "TO1 failed");
            }
        }
    }

    let Some(to1d) = to1d else {
        info!("all TO1 attempts failed for this directive");

        return Ok(Discovery::default());
    };

    let entries = to1d_payload(&to1d)?.to1d_rv;

    let mut owner_urls = Vec::with_capacity(entries.len());
    for entry in &entries {
        owner_urls.extend(owner_addr_urls(ctx.resolver, entry).await);
    }

    if owner_urls.is_empty() {
        warn!("TO1 succeeded but no valid TO2 address found");
    }

    Ok(Discovery {
        owner_urls,
        to1d: Some(to1d),
    })
}

/// Expands an owner address into URLs.
async fn owner_addr_urls<R>(resolver: &R, entry: &RvTo2AddrEntry) -> Vec<Url>
where
    R: Resolver,
{
    if entry.rv_dns.is_none() && entry.rv_ip.is_none() {
        error!("both IP and DNS are missing in the owner address");

        return Vec::new();
    }

    let Some((scheme, default_port)) = entry.rv_protocol.http_scheme() else {
        error!(protocol = ?entry.rv_protocol, "unsupported transport protocol");

        return Vec::new();
    };

    let port = if entry.rv_port != 0 {
        entry.rv_port
    } else {
        default_port
    };

    let dns = match &entry.rv_dns {
        Some(dns) => resolve(resolver, dns).await,
        None => None,
    };

    let ip = entry.rv_ip.as_ref().and_then(|ip| {
        let addr = ip.to_ip_addr();

        if addr.is_none() {
            warn!(?ip, "IP address is not valid");
        }

        addr
    });

    http_urls(scheme, port, dns, ip)
}

/// Transfer ownership protocol to contact the Rendezvous Server.
struct To1<'a, 'c, T, S> {
    client: Client<'c, T>,
    credential: &'a DeviceCredential,
    state: S,
}

/// Hello message to the Rendezvous Server
struct Hello {}

impl<'a, 'c, T> To1<'a, 'c, T, Hello>
where
    T: Transport,
{
    fn new(client: Client<'c, T>, credential: &'a DeviceCredential) -> Self {
        Self {
            client,
            credential,
            state: Hello {},
        }
    }

    /// Retrieves the to1d blob.
    async fn rv_owner<C, R>(self, ctx: &Ctx<'_, C, R>) -> Result<CoseSign1, Error>
    where
        C: Crypto,
    {
        let ack = self.run(ctx).await?;

        let to1d = ack.run(ctx).await?;

        info!("To1 Done");

        Ok(to1d)
    }

    async fn run<C, R>(mut self, ctx: &Ctx<'_, C, R>) -> Result<To1<'a, 'c, T, Ack>, Error>
    where
        C: Crypto,
    {
        let hello = HelloRv {
            guid: self.credential.dc_guid,
            e_a_sig_info: SigInfo::new(ctx.crypto.sign_info_type()),
        };

        let ack = self.client.send(&hello).await?;

        debug!(sg_type = ?ack.e_b_sig_info.sg_type(), "To1.HelloRvAck received");

        Ok(To1 {
            client: self.client,
            credential: self.credential,
            state: Ack {
                nonce: ack.nonce_to1_proof,
            },
        })
    }
}

struct Ack {
    nonce: NonceTo1Proof,
}

impl<T> To1<'_, '_, T, Ack>
where
    T: Transport,
{
    async fn run<C, R>(mut self, ctx: &Ctx<'_, C, R>) -> Result<CoseSign1, Error>
    where
        C: Crypto,
    {
        let eat = EatPayload {
            nonce: self.state.nonce,
            guid: self.credential.dc_guid,
            fdo: None,
        };

        let sign = ctx
            .crypto
            .cose_sign(HeaderBuilder::new(), eat.encode()?)
            .await?;

        info!("To1.HelloRvAck signed");

        let redirect = self.client.send(&ProveToRv(sign)).await?;

        // Check the owner addresses can be parsed before succeeding
        let payload = redirect.payload()?;

        debug!(addrs = ?payload.to1d_rv, "To1.RVRedirect received");

        Ok(redirect.into_to1d())
    }
}
