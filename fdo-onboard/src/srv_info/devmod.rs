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

//! Device module, `devmod`.
//!
//! Sent by the device at the start of the service info exchange, it describes the device and
//! lists the supported modules.

use fdo_protocol::v101::service_info::{Devmod, ServiceInfo};
use tracing::{debug, warn};

use crate::Error;

/// Name of the module.
pub const MODULE: &str = "devmod";

/// Separator of the file name lists.
const FILE_SEP: &str = ";";

const OS_RELEASE: &str = "/etc/os-release";

/// Information sent in the `devmod` messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevmodInfo {
    /// Operating system name (`devmod:os`).
    pub os: String,
    /// Architecture, also used as `devmod:bin`.
    pub arch: String,
    /// Version of the operating system.
    pub version: String,
    /// Serial number, not sent if missing.
    pub sn: Option<String>,
}

impl DevmodInfo {
    /// Reads the information of the running system.
    pub fn from_system() -> Self {
        let version = match std::fs::read_to_string(OS_RELEASE) {
            Ok(content) => os_version(&content),
            Err(err) => {
                warn!(error = %err, "couldn't read {OS_RELEASE}");

                None
            }
        };

        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            version: version.unwrap_or_else(|| "unknown".to_string()),
            sn: None,
        }
    }

    /// Builds the messages, `device` is the model of the device.
    pub(crate) fn messages(&self, device: &str, modules: Vec<String>) -> Result<ServiceInfo, Error> {
        let mut msgs = vec![
            Devmod::Active,
            Devmod::Os(self.os.clone()),
            Devmod::Arch(self.arch.clone()),
            Devmod::Version(self.version.clone()),
            Devmod::Device(device.to_string()),
        ];

        msgs.extend(self.sn.clone().map(Devmod::Sn));

        msgs.extend([
            Devmod::Sep(FILE_SEP.to_string()),
            Devmod::Bin(self.arch.clone()),
            Devmod::Nummodules(modules.len()),
            Devmod::Modules {
                start: 0,
                names: modules,
            },
        ]);

        debug!(len = msgs.len(), "devmod messages");

        msgs.iter()
            .map(|msg| msg.to_kv().map_err(Error::from))
            .collect()
    }
}

/// Returns the `PRETTY_NAME` of the os-release file.
fn os_version(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let value = line.strip_prefix("PRETTY_NAME=")?;

        Some(value.trim_matches('"').to_string())
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn pretty_name() {
        let content = r#"NAME="Test OS"
VERSION_ID="1.0"
PRETTY_NAME="Test OS 1.0 (Stable)"
"#;

        assert_eq!(os_version(content).as_deref(), Some("Test OS 1.0 (Stable)"));
        assert_eq!(os_version("NAME=test"), None);
    }

    #[test]
    fn messages_in_order() {
        let info = DevmodInfo {
            os: "linux".to_string(),
            arch: "aarch64".to_string(),
            version: "1.0".to_string(),
            sn: Some("SN-1".to_string()),
        };

        let msgs = info
            .messages("board", vec!["devmod".to_string()])
            .unwrap();

        let keys: Vec<&str> = msgs.iter().map(|kv| kv.key()).collect();
        assert_eq!(
            keys,
            [
                "devmod:active",
                "devmod:os",
                "devmod:arch",
                "devmod:version",
                "devmod:device",
                "devmod:sn",
                "devmod:sep",
                "devmod:bin",
                "devmod:nummodules",
                "devmod:modules",
            ]
        );

        assert_eq!(msgs[7].value::<String>().unwrap(), "aarch64");
        assert_eq!(msgs[8].value::<u64>().unwrap(), 1);
    }
}
