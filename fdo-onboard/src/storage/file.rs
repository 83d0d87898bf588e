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

//! Credential stored in a file.

use std::io;
use std::path::{Path, PathBuf};

use fdo_protocol::v101::device_credentials::DeviceCredential;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, instrument, warn};

use crate::Error;

use super::{CredentialStore, seal, unseal};

/// Stores the credential in a file, replacing it atomically.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Uses the file at the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path of the credential file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();

        let suffix: u64 = rand::random();

        self.dir().join(format!(".{name}.tmp-{suffix:016x}"))
    }

    /// Writes the content in a temporary file next to the destination.
    async fn write_temp(&self, content: &[u8]) -> Result<PathBuf, Error> {
        let tmp = self.temp_path();

        debug!(tmp = %tmp.display(), "writing temporary credential");

        let res = async {
            let mut options = File::options();
            options.create_new(true).write(true);
            #[cfg(unix)]
            options.mode(0o600);

            let mut file = options.open(&tmp).await.map_err(|err| {
                error!(error = %err, "couldn't create temporary file");

                Error::io("create temporary credential file", err)
            })?;

            file.write_all(content).await.map_err(|err| {
                error!(error = %err, "couldn't write temporary file");

                Error::io("write temporary credential file", err)
            })?;

            file.sync_all().await.map_err(|err| {
                error!(error = %err, "couldn't sync temporary file");

                Error::io("sync temporary credential file", err)
            })
        }
        .await;

        match res {
            Ok(()) => Ok(tmp),
            Err(err) => {
                remove_stale(&tmp).await;

                Err(err)
            }
        }
    }

    /// Replaces the destination with the temporary file.
    async fn commit(&self, tmp: &Path) -> Result<(), Error> {
        match tokio::fs::symlink_metadata(&self.path).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                error!(path = %self.path.display(), "credential path is a symbolic link");

                return Err(Error::io(
                    "replace credential, the destination is a symbolic link",
                    io::Error::new(io::ErrorKind::InvalidInput, "symbolic link"),
                ));
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                error!(error = %err, "couldn't stat credential file");

                return Err(Error::io("stat credential file", err));
            }
        }

        tokio::fs::rename(tmp, &self.path).await.map_err(|err| {
            error!(error = %err, "couldn't rename temporary file");

            Error::io("rename temporary credential file", err)
        })?;

        // Persist the rename
        let dir = File::open(self.dir()).await.map_err(|err| {
            error!(error = %err, "couldn't open credential directory");

            Error::io("open credential directory", err)
        })?;

        dir.sync_all().await.map_err(|err| {
            error!(error = %err, "couldn't sync credential directory");

            Error::io("sync credential directory", err)
        })
    }
}

async fn remove_stale(tmp: &Path) {
    if let Err(err) = tokio::fs::remove_file(tmp).await {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(error = %err, tmp = %tmp.display(), "couldn't remove temporary file");
        }
    }
}

impl CredentialStore for FileStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&mut self) -> Result<DeviceCredential, Error> {
        let buf = match tokio::fs::read(&self.path).await {
            Ok(buf) => zeroize::Zeroizing::new(buf),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotInitialized);
            }
            Err(err) => {
                error!(error = %err, "couldn't read credential file");

                return Err(Error::io("read credential file", err));
            }
        };

        unseal(&buf)
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn save(&mut self, credential: &DeviceCredential) -> Result<(), Error> {
        let buf = seal(credential)?;

        let tmp = self.write_temp(&buf).await?;

        if let Err(err) = self.commit(&tmp).await {
            remove_stale(&tmp).await;

            return Err(err);
        }

        debug!("credential saved");

        Ok(())
    }
}
