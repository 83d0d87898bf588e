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

//! Service Info Modules (FSIM) of the device.
//!
//! The [`ServiceInfoRegistry`] maps the module names to their handlers. The owner service info is
//! dispatched by the module part of the key, the `active` message is answered by the registry.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use fdo_protocol::v101::service_info::{ServiceInfo, ServiceInfoKv};
use tracing::{debug, info, instrument, warn};

use crate::Error;
use crate::config::ModulesConfig;

pub mod command;
pub mod devmod;
pub mod download;
pub mod interop;
pub mod upload;
pub mod wget;

pub use self::devmod::DevmodInfo;

/// Handler of a service info module.
#[async_trait]
pub trait ServiceInfoModule: Send {
    /// Handles a message sent by the owner to the module.
    ///
    /// The `message` is the key without the module name. The returned key values are sent to the
    /// owner in the next TO2.DeviceServiceInfo.
    async fn receive(&mut self, message: &str, kv: &ServiceInfoKv) -> Result<ServiceInfo, Error>;

    /// Discards the state of a previous TO2 attempt.
    async fn reset(&mut self) {}

    /// Called once the owner is done sending service info.
    async fn finish(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

struct Entry {
    module: Box<dyn ServiceInfoModule>,
    active: bool,
}

impl Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

/// Modules supported by the device.
#[derive(Debug)]
pub struct ServiceInfoRegistry {
    devmod: DevmodInfo,
    modules: BTreeMap<String, Entry>,
}

impl ServiceInfoRegistry {
    /// Creates an empty registry announcing the information of the running system.
    pub fn new() -> Self {
        Self::with_devmod(DevmodInfo::from_system())
    }

    /// Creates an empty registry with the given `devmod` information.
    pub fn with_devmod(devmod: DevmodInfo) -> Self {
        Self {
            devmod,
            modules: BTreeMap::new(),
        }
    }

    /// Creates the registry with the built-in modules.
    ///
    /// The module directories are resolved once here. The `http` client is used by `fdo.wget`.
    pub fn builtin(config: &ModulesConfig, http: reqwest::Client) -> Result<Self, Error> {
        let resolve = |dir: &crate::config::ModuleDir, ctx| {
            dir.resolve().map_err(|err| Error::io(ctx, err))
        };

        let download = resolve(&config.download, "resolve the download directory")?;
        let wget = resolve(&config.wget, "resolve the wget directory")?;
        let working_dir = resolve(&config.working_dir, "resolve the working directory")?;

        let mut registry = Self::new();

        registry.register(download::MODULE, download::Download::new(download));
        registry.register(wget::MODULE, wget::Wget::new(wget, http));

        if config.run_commands {
            registry.register(command::MODULE, command::Command::run(working_dir.clone()));
        } else if config.echo_commands {
            registry.register(command::MODULE, command::Command::echo());
        }

        registry.register(upload::MODULE, upload::Upload::new(working_dir));

        if config.interop {
            registry.register(interop::MODULE, interop::Interop::default());
        }

        Ok(registry)
    }

    /// Registers the handler for the module, replacing the previous one.
    pub fn register<M>(&mut self, name: impl Into<String>, module: M) -> &mut Self
    where
        M: ServiceInfoModule + 'static,
    {
        let name = name.into();

        debug!(%name, "module registered");

        self.modules.insert(
            name,
            Entry {
                module: Box::new(module),
                active: false,
            },
        );

        self
    }

    /// Names of the registered modules, sorted.
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Returns the `devmod` messages listing the modules.
    pub(crate) fn announce(&self, device: &str) -> Result<ServiceInfo, Error> {
        let mut names = vec![devmod::MODULE.to_string()];
        names.extend(self.module_names().map(str::to_string));

        self.devmod.messages(device, names)
    }

    /// Resets the modules before a TO2 attempt.
    pub(crate) async fn reset(&mut self) {
        for entry in self.modules.values_mut() {
            entry.active = false;
            entry.module.reset().await;
        }
    }

    /// Dispatches a key value sent by the owner.
    #[instrument(skip_all, fields(key = kv.key()))]
    pub(crate) async fn dispatch(&mut self, kv: &ServiceInfoKv) -> Result<ServiceInfo, Error> {
        let module = kv.module();
        let message = kv.message();

        if message == "active" {
            return self.activate(module, kv);
        }

        let Some(entry) = self.modules.get_mut(module) else {
            warn!("message for an unknown module ignored");

            return Ok(ServiceInfo::new());
        };

        if !entry.active {
            warn!("message for an inactive module ignored");

            return Ok(ServiceInfo::new());
        }

        entry.module.receive(message, kv).await
    }

    fn activate(&mut self, module: &str, kv: &ServiceInfoKv) -> Result<ServiceInfo, Error> {
        let requested = kv.value::<bool>()?;

        let active = match self.modules.get_mut(module) {
            Some(entry) => {
                entry.active = requested;

                requested
            }
            None => false,
        };

        info!(module, requested, active, "module activation");

        let reply = ServiceInfoKv::new(format!("{module}:active"), &active)?;

        Ok(vec![reply])
    }

    /// Notifies the active modules that the owner is done.
    pub(crate) async fn finish(&mut self) -> Result<(), Error> {
        for (name, entry) in &mut self.modules {
            if entry.active {
                debug!(%name, "finishing module");

                entry.module.finish().await?;
            }
        }

        Ok(())
    }
}

impl Default for ServiceInfoRegistry {
    fn default() -> Self {
        Self::new()
    }
}
