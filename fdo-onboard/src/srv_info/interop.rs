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

//! FIDO Alliance interoperability test module, `fido_alliance`.
//!
//! Only registered for the interop test events. It records the conformance string sent by the
//! owner.

use async_trait::async_trait;
use fdo_protocol::v101::service_info::{ServiceInfo, ServiceInfoKv};
use tracing::{debug, info};

use crate::Error;

use super::ServiceInfoModule;

/// Name of the module.
pub const MODULE: &str = "fido_alliance";

/// Handler of `fido_alliance`.
#[derive(Debug, Default)]
pub struct Interop {
    conformance: Option<String>,
}

impl Interop {
    /// Conformance string received in the last TO2.
    pub fn conformance(&self) -> Option<&str> {
        self.conformance.as_deref()
    }
}

#[async_trait]
impl ServiceInfoModule for Interop {
    async fn receive(&mut self, message: &str, kv: &ServiceInfoKv) -> Result<ServiceInfo, Error> {
        match message {
            "dev_conformance" => {
                let value: String = kv.value()?;

                info!(conformance = value, "interop conformance received");

                self.conformance = Some(value);
            }
            _ => debug!(message, "unknown message ignored"),
        }

        Ok(ServiceInfo::new())
    }

    async fn reset(&mut self) {
        self.conformance = None;
    }

    async fn finish(&mut self) -> Result<(), Error> {
        info!(conformance = ?self.conformance, "interop test module done");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_conformance() {
        let mut interop = Interop::default();

        let kv = ServiceInfoKv::new("fido_alliance:dev_conformance", "test-event-1").unwrap();
        let reply = interop.receive("dev_conformance", &kv).await.unwrap();

        assert!(reply.is_empty());
        assert_eq!(interop.conformance(), Some("test-event-1"));

        interop.reset().await;
        assert_eq!(interop.conformance(), None);
    }
}
