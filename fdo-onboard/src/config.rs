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

//! Configuration of an onboarding run.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fdo_protocol::v101::key_exchange::{CipherSuite, KexSuiteName};
use tracing::error;

use crate::Error;

/// Cipher suite used when none is configured.
pub const DEFAULT_CIPHER: CipherSuite = CipherSuite::A128Gcm;

/// Service info transfer unit when none is configured or announced.
pub const DEFAULT_MAX_SERVICE_INFO_SIZE: u16 = 1300;

/// Delay between TO2 attempts on different owner URLs.
pub const DEFAULT_TO2_RETRY_DELAY: Duration = Duration::ZERO;

/// Key exchange suites implemented by the device.
pub const SUPPORTED_KEX: [KexSuiteName; 2] = [KexSuiteName::Ecdh256, KexSuiteName::Ecdh384];

/// Cipher suites implemented by the device.
pub const SUPPORTED_CIPHERS: [CipherSuite; 3] =
    [CipherSuite::A128Gcm, CipherSuite::A192Gcm, CipherSuite::A256Gcm];

/// Directory used by a service info module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ModuleDir {
    /// Use the default of the module, the current working directory.
    #[default]
    UseLibraryDefault,
    /// Use the given directory.
    UseDirectory(PathBuf),
}

impl ModuleDir {
    /// Returns the directory, resolving the library default.
    pub fn resolve(&self) -> io::Result<PathBuf> {
        match self {
            ModuleDir::UseLibraryDefault => std::env::current_dir(),
            ModuleDir::UseDirectory(path) => Ok(path.clone()),
        }
    }
}

impl From<Option<PathBuf>> for ModuleDir {
    fn from(value: Option<PathBuf>) -> Self {
        value
            .map(ModuleDir::UseDirectory)
            .unwrap_or(ModuleDir::UseLibraryDefault)
    }
}

/// Configuration of the service info modules.
#[derive(Debug, Clone, Default)]
pub struct ModulesConfig {
    /// Destination of the `fdo.download` files.
    pub download: ModuleDir,
    /// Destination of the `fdo.wget` files.
    pub wget: ModuleDir,
    /// Base directory for the relative paths of `fdo.upload`.
    pub working_dir: ModuleDir,
    /// Register `fdo.command`, echoing the commands instead of running them.
    pub echo_commands: bool,
    /// Register `fdo.command` running the commands in the working directory, takes precedence
    /// over `echo_commands`.
    pub run_commands: bool,
    /// Register the `fido_alliance` interop test module.
    pub interop: bool,
}

/// Configuration of an onboarding run.
///
/// Built once and passed by reference to the orchestrator.
#[derive(Debug, Clone)]
pub struct OnboardConfig {
    /// Key exchange suite proposed in TO2.HelloDevice.
    pub kex: KexSuiteName,
    /// Cipher suite proposed in TO2.HelloDevice.
    pub cipher: CipherSuite,
    /// Accept an owner that keeps the current credential.
    pub allow_credential_reuse: bool,
    /// Onboard again a device that already completed TO2.
    pub resale: bool,
    /// Delay between TO2 attempts on different owner URLs.
    pub to2_retry_delay: Duration,
    /// Maximum service info size the device can receive, 0 for the default.
    pub max_service_info_size: u16,
    /// Skip the TLS certificate validation.
    pub insecure_tls: bool,
    /// Service info modules.
    pub modules: ModulesConfig,
}

impl OnboardConfig {
    /// Creates the configuration with the defaults and the given key exchange.
    pub fn new(kex: KexSuiteName) -> Self {
        Self {
            kex,
            cipher: DEFAULT_CIPHER,
            allow_credential_reuse: false,
            resale: false,
            to2_retry_delay: DEFAULT_TO2_RETRY_DELAY,
            max_service_info_size: DEFAULT_MAX_SERVICE_INFO_SIZE,
            insecure_tls: false,
            modules: ModulesConfig::default(),
        }
    }

    /// Maximum service info size, with the default applied.
    pub fn max_service_info_size(&self) -> u16 {
        match self.max_service_info_size {
            0 => DEFAULT_MAX_SERVICE_INFO_SIZE,
            size => size,
        }
    }

    /// Checks the suites and the module directories.
    pub fn validate(&self) -> Result<(), Error> {
        if !SUPPORTED_KEX.contains(&self.kex) {
            error!(kex = %self.kex, "unsupported key exchange suite");

            return Err(Error::Config("unsupported key exchange suite"));
        }

        if !SUPPORTED_CIPHERS.contains(&self.cipher) {
            error!(cipher = %self.cipher, "unsupported cipher suite");

            return Err(Error::Config("unsupported cipher suite"));
        }

        if let ModuleDir::UseDirectory(dir) = &self.modules.working_dir {
            check_working_dir(dir)?;
        }

        if let ModuleDir::UseDirectory(dir) = &self.modules.download {
            check_dir_exists(dir, "download directory doesn't exist")?;
        }

        if let ModuleDir::UseDirectory(dir) = &self.modules.wget {
            check_dir_exists(dir, "wget directory doesn't exist")?;
        }

        Ok(())
    }
}

fn check_dir_exists(dir: &Path, ctx: &'static str) -> Result<(), Error> {
    if !dir.is_dir() {
        error!(dir = %dir.display(), "{ctx}");

        return Err(Error::Config(ctx));
    }

    Ok(())
}

fn check_working_dir(dir: &Path) -> Result<(), Error> {
    if !dir.is_absolute() {
        error!(dir = %dir.display(), "working directory is not absolute");

        return Err(Error::Config("working directory must be an absolute path"));
    }

    check_dir_exists(dir, "working directory doesn't exist")?;

    tempfile::Builder::new()
        .prefix(".fdo.test_")
        .tempfile_in(dir)
        .map_err(|err| {
            error!(error = %err, dir = %dir.display(), "working directory is not writable");

            Error::Config("working directory is not writable")
        })?;

    Ok(())
}
