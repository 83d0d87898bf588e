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

//! Onboarding loop.
//!
//! Follows the rendezvous directives of the credential in order, discovering the owner with TO1
//! and running TO2 against every owner address, until one succeeds or the run is canceled.

use fdo_protocol::v101::device_credentials::{DeviceCredential, DeviceState};
use tracing::{debug, error, info, instrument, warn};

use crate::client::Transport;
use crate::crypto::Crypto;
use crate::directive::{self, Resolver};
use crate::srv_info::ServiceInfoRegistry;
use crate::storage::CredentialStore;
use crate::time::{self, DEFAULT_DELAY, add_jitter};
use crate::to1::{self, Discovery};
use crate::to2::{self, To2Outcome};
use crate::{Ctx, Error};

/// Result of the onboard command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Onboarded {
    /// The replacement credential was stored.
    Replaced,
    /// The owner kept the credential, nothing was stored.
    Reused,
    /// The device was already onboarded and resale wasn't requested.
    AlreadyOnboarded,
}

/// Onboards the device and stores the replacement credential.
///
/// The `credential` must be the one loaded from the `store`.
#[instrument(skip_all, fields(guid = %credential.dc_guid))]
pub async fn onboard<C, R, S, T>(
    ctx: &Ctx<'_, C, R>,
    store: &mut S,
    credential: &DeviceCredential,
    transport: &mut T,
    registry: &mut ServiceInfoRegistry,
) -> Result<Onboarded, Error>
where
    C: Crypto,
    R: Resolver,
    S: CredentialStore,
    T: Transport,
{
    if credential.dc_state == DeviceState::PreDi {
        error!("device initialization never completed");

        return Err(Error::Config("device not initialized"));
    }

    if !credential.dc_state.needs_onboarding(ctx.config().resale) {
        info!(state = ?credential.dc_state, "onboarding already completed");

        return Ok(Onboarded::AlreadyOnboarded);
    }

    match run(ctx, transport, credential, registry).await? {
        To2Outcome::Replaced(replacement) => {
            store
                .save(&replacement)
                .await
                .map_err(|err| Error::Persistence(Box::new(err)))?;

            info!(guid = %replacement.dc_guid, "onboarding completed, credential replaced");

            Ok(Onboarded::Replaced)
        }
        To2Outcome::Reused => {
            info!("onboarding completed, credential reused");

            Ok(Onboarded::Reused)
        }
    }
}

/// Retries the onboarding until an owner accepts the device.
///
/// Only fatal errors and the cancellation are returned, every other failure moves to the next
/// owner address or directive.
#[instrument(skip_all)]
pub async fn run<C, R, T>(
    ctx: &Ctx<'_, C, R>,
    transport: &mut T,
    credential: &DeviceCredential,
    registry: &mut ServiceInfoRegistry,
) -> Result<To2Outcome, Error>
where
    C: Crypto,
    R: Resolver,
    T: Transport,
{
    let directives = directive::parse(&credential.dc_rv_info, ctx.resolver).await?;

    let last = directives.len().saturating_sub(1);

    let mut pass: u64 = 0;

    loop {
        pass += 1;

        debug!(pass, "following the rendezvous directives");

        for (i, directive) in directives.iter().enumerate() {
            if ctx.cancel().is_cancelled() {
                return Err(Error::Canceled);
            }

            let discovery = match to1::discover(ctx, transport, credential, directive).await {
                Ok(discovery) => discovery,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    error!(error = format!("{err:#}"), directive = i, "discovery failed");

                    Discovery::default()
                }
            };

            let outcome = try_owners(ctx, transport, credential, &discovery, registry).await?;

            if let Some(outcome) = outcome {
                return Ok(outcome);
            }

            let delay = if !directive.delay.is_zero() {
                directive.delay
            } else if i == last {
                DEFAULT_DELAY
            } else {
                continue;
            };

            let delay = add_jitter(delay);

            info!(secs = delay.as_secs(), directive = i, "waiting before the next directive");

            time::wait(ctx.cancel(), delay).await?;
        }
    }
}

/// Runs TO2 against the owner addresses in order.
async fn try_owners<C, R, T>(
    ctx: &Ctx<'_, C, R>,
    transport: &mut T,
    credential: &DeviceCredential,
    discovery: &Discovery,
    registry: &mut ServiceInfoRegistry,
) -> Result<Option<To2Outcome>, Error>
where
    C: Crypto,
    R: Resolver,
    T: Transport,
{
    let retry_delay = ctx.config().to2_retry_delay;

    for (i, url) in discovery.owner_urls.iter().enumerate() {
        if ctx.cancel().is_cancelled() {
            return Err(Error::Canceled);
        }

        let res = to2::negotiate(
            ctx,
            transport,
            url,
            credential,
            discovery.to1d.as_ref(),
            registry,
        )
        .await;

        match res {
            Ok(outcome) => return Ok(Some(outcome)),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                error!(error = format!("{err:#}"), %url, "TO2 failed");
            }
        }

        if !retry_delay.is_zero() && i + 1 < discovery.owner_urls.len() {
            warn!(secs = retry_delay.as_secs(), "waiting before the next owner");

            time::wait(ctx.cancel(), retry_delay).await?;
        }
    }

    Ok(None)
}
