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

#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

//! Device side of the FIDO Device Onboard protocol.
//!
//! The device gets its credential from the manufacturer (DI). Then it finds its owner through the
//! Rendezvous Server (TO1), proves its identity to the owner (TO2) and stores the replacement
//! credential.

pub mod client;
pub mod config;
pub mod crypto;
pub mod di;
pub mod directive;
pub mod error;
pub mod onboard;
pub mod srv_info;
pub mod storage;
pub mod time;
pub mod to1;
pub mod to2;

#[cfg(test)]
mod tests;

pub use fdo_protocol;
pub use rustls;
pub use tokio_util::sync::CancellationToken;
pub use url;

pub use self::config::OnboardConfig;
pub use self::crypto::Crypto;
pub use self::error::Error;
pub use self::storage::CredentialStore;

/// Context shared by the protocols of an onboarding run.
#[derive(Debug)]
pub struct Ctx<'a, C, R> {
    crypto: &'a C,
    resolver: &'a R,
    config: &'a OnboardConfig,
    cancel: CancellationToken,
}

impl<'a, C, R> Ctx<'a, C, R> {
    /// Creates a new context.
    pub fn new(
        crypto: &'a C,
        resolver: &'a R,
        config: &'a OnboardConfig,
        cancel: CancellationToken,
    ) -> Self
    where
        C: Crypto,
        R: directive::Resolver,
    {
        Self {
            crypto,
            resolver,
            config,
            cancel,
        }
    }

    /// Returns the configuration of the run.
    pub fn config(&self) -> &OnboardConfig {
        self.config
    }

    /// Returns the token that cancels the run.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }
}
