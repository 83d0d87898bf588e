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

//! Errors returned while onboarding the device.

use std::io;

/// Step of the TO2 protocol that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum To2Step {
    /// TO2.HelloDevice and TO2.ProveOVHdr
    HelloDevice,
    /// TO2.GetOVNextEntry and TO2.OVNextEntry
    OvEntries,
    /// TO2.ProveDevice and TO2.SetupDevice
    ProveDevice,
    /// TO2.DeviceServiceInfoReady and TO2.OwnerServiceInfoReady
    ServiceInfoReady,
    /// TO2.DeviceServiceInfo and TO2.OwnerServiceInfo
    ServiceInfo,
    /// TO2.Done and TO2.Done2
    Done,
}

impl std::fmt::Display for To2Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            To2Step::HelloDevice => write!(f, "TO2.HelloDevice"),
            To2Step::OvEntries => write!(f, "TO2.GetOVNextEntry"),
            To2Step::ProveDevice => write!(f, "TO2.ProveDevice"),
            To2Step::ServiceInfoReady => write!(f, "TO2.DeviceServiceInfoReady"),
            To2Step::ServiceInfo => write!(f, "TO2.DeviceServiceInfo"),
            To2Step::Done => write!(f, "TO2.Done"),
        }
    }
}

/// Error returned by the onboarding client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration is invalid, this is never retried.
    #[error("invalid configuration, {0}")]
    Config(&'static str),
    /// The rendezvous info doesn't contain any directive the device can follow.
    #[error("no usable rendezvous directive")]
    NoUsableDirectives,
    /// The onboarding was canceled.
    #[error("onboarding canceled")]
    Canceled,
    /// Couldn't store the credential after a successful transfer.
    #[error("couldn't persist the device credential")]
    Persistence(#[source] Box<Error>),
    /// The device credential is missing.
    #[error("device credential not initialized")]
    NotInitialized,
    /// The stored device credential is corrupted.
    #[error("device credential integrity check failed")]
    Integrity,
    /// IO error on a local resource.
    #[error("couldn't {ctx}")]
    Io {
        /// Operation that failed
        ctx: &'static str,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// Protocol record couldn't be processed.
    #[error(transparent)]
    Protocol(#[from] fdo_protocol::Error),
    /// The message couldn't be delivered.
    #[error("transport failure, {0}")]
    Transport(&'static str),
    /// A TO2 step failed.
    #[error("{step} failed")]
    To2 {
        /// Failed step
        step: To2Step,
        /// Cause of the failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn io(ctx: &'static str, source: io::Error) -> Self {
        Self::Io { ctx, source }
    }

    /// Wraps the error with the TO2 step, cancellation and configuration errors are kept as is.
    pub(crate) fn at_step(self, step: To2Step) -> Self {
        match self {
            Error::Canceled | Error::Config(_) | Error::To2 { .. } => self,
            source => Error::To2 {
                step,
                source: Box::new(source),
            },
        }
    }

    /// Returns true for errors that stop the onboarding instead of moving to the next URL.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::Canceled
                | Error::NoUsableDirectives
                | Error::Persistence(_)
                | Error::NotInitialized
                | Error::Integrity
        )
    }
}
