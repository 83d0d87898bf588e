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

//! File download module, `fdo.download`.
//!
//! The owner sends the `name`, `length` and optionally the `sha-384` of the file, followed by
//! the `data` chunks. The data is written in a temporary file inside the destination directory,
//! renamed once the whole length is received. The device answers with `done`, the number of
//! bytes written or -1 on failure.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_lc_rs::digest::{self, SHA384};
use fdo_protocol::error::ErrorKind;
use fdo_protocol::v101::service_info::{ServiceInfo, ServiceInfoKv};
use serde_bytes::ByteBuf;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::Error;

use super::ServiceInfoModule;

/// Name of the module.
pub const MODULE: &str = "fdo.download";

/// File written in a temporary path, moved to the destination on commit.
pub(crate) struct Staged {
    file: tokio::fs::File,
    path: TempPath,
    written: u64,
    digest: digest::Context,
}

impl Staged {
    /// Creates the temporary file in `dir`, the name starts with `prefix`.
    pub(crate) fn create(dir: &Path, prefix: &str) -> Result<Self, Error> {
        let tmp = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(dir)
            .map_err(|err| Error::io("create the temporary file", err))?;

        let (file, path) = tmp.into_parts();

        debug!(path = %path.display(), "temporary file created");

        Ok(Self {
            file: tokio::fs::File::from_std(file),
            path,
            written: 0,
            digest: digest::Context::new(&SHA384),
        })
    }

    pub(crate) async fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.file
            .write_all(data)
            .await
            .map_err(|err| Error::io("write the temporary file", err))?;

        self.digest.update(data);
        self.written += data.len() as u64;

        Ok(())
    }

    pub(crate) fn written(&self) -> u64 {
        self.written
    }

    /// Checks the digest and moves the file to `dest`, returns the size.
    pub(crate) async fn commit(mut self, dest: &Path, sha384: Option<&[u8]>) -> Result<u64, Error> {
        self.file
            .sync_all()
            .await
            .map_err(|err| Error::io("sync the temporary file", err))?;

        let digest = self.digest.finish();

        if sha384.is_some_and(|expected| expected != digest.as_ref()) {
            error!(dest = %dest.display(), "sha-384 mismatch");

            return Err(fdo_protocol::Error::new(ErrorKind::Crypto, "sha-384 of the file").into());
        }

        self.path
            .persist(dest)
            .map_err(|err| Error::io("rename the temporary file", err.error))?;

        Ok(self.written)
    }
}

/// Destination of a file sent by the owner, only the base name is used.
pub(crate) fn destination(dir: &Path, name: &str) -> Option<PathBuf> {
    Path::new(name).file_name().map(|base| dir.join(base))
}

#[derive(Default)]
struct Transfer {
    name: Option<String>,
    length: Option<u64>,
    sha384: Option<Vec<u8>>,
    staged: Option<Staged>,
}

/// Handler of `fdo.download`.
pub struct Download {
    dir: PathBuf,
    transfer: Option<Transfer>,
}

impl Download {
    /// Stores the files in `dir`.
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            transfer: None,
        }
    }

    fn done(value: i64) -> Result<ServiceInfo, Error> {
        Ok(vec![ServiceInfoKv::new(format!("{MODULE}:done"), &value)?])
    }

    fn fail(&mut self, reason: &str) -> Result<ServiceInfo, Error> {
        warn!(reason, "download failed");

        // Dropping the staged file removes it
        self.transfer = None;

        Self::done(-1)
    }

    async fn data(&mut self, data: &[u8]) -> Result<ServiceInfo, Error> {
        let transfer = self.transfer.get_or_insert_default();

        let (Some(name), Some(length)) = (transfer.name.as_deref(), transfer.length) else {
            return self.fail("data received before the name and length");
        };

        let Some(dest) = destination(&self.dir, name) else {
            return self.fail("invalid file name");
        };

        if transfer.staged.is_none() {
            match Staged::create(&self.dir, ".fdo.download_") {
                Ok(staged) => transfer.staged = Some(staged),
                Err(err) => {
                    error!(error = %err, "couldn't stage the download");

                    return self.fail("temporary file");
                }
            }
        }

        let Some(staged) = transfer.staged.as_mut() else {
            return self.fail("missing staged file");
        };

        if let Err(err) = staged.write(data).await {
            error!(error = %err, "couldn't write the download");

            return self.fail("write");
        }

        if staged.written() > length {
            return self.fail("more data than the length");
        }

        if staged.written() < length {
            return Ok(ServiceInfo::new());
        }

        let Some(Transfer {
            sha384,
            staged: Some(staged),
            ..
        }) = self.transfer.take()
        else {
            return self.fail("missing staged file");
        };

        match staged.commit(&dest, sha384.as_deref()).await {
            Ok(written) => {
                info!(dest = %dest.display(), written, "download completed");

                Self::done(i64::try_from(written).unwrap_or(i64::MAX))
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "couldn't complete the download");

                Self::done(-1)
            }
        }
    }
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("dir", &self.dir)
            .field("in_progress", &self.transfer.is_some())
            .finish()
    }
}

#[async_trait]
impl ServiceInfoModule for Download {
    async fn receive(&mut self, message: &str, kv: &ServiceInfoKv) -> Result<ServiceInfo, Error> {
        match message {
            "name" => {
                self.transfer.get_or_insert_default().name = Some(kv.value::<String>()?);
            }
            "length" => {
                self.transfer.get_or_insert_default().length = Some(kv.value::<u64>()?);
            }
            "sha-384" => {
                self.transfer.get_or_insert_default().sha384 =
                    Some(kv.value::<ByteBuf>()?.into_vec());
            }
            "data" => {
                let data = kv.value::<ByteBuf>()?;

                return self.data(&data).await;
            }
            _ => debug!(message, "unknown message ignored"),
        }

        Ok(ServiceInfo::new())
    }

    async fn reset(&mut self) {
        self.transfer = None;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kv<T: serde::Serialize>(key: &str, value: T) -> ServiceInfoKv {
        ServiceInfoKv::new(format!("{MODULE}:{key}"), &value).unwrap()
    }

    fn sha384(data: &[u8]) -> ByteBuf {
        ByteBuf::from(digest::digest(&SHA384, data).as_ref().to_vec())
    }

    async fn send(download: &mut Download, kv: ServiceInfoKv) -> ServiceInfo {
        let message = kv.message().to_string();

        download.receive(&message, &kv).await.unwrap()
    }

    fn files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        names
    }

    #[tokio::test]
    async fn chunked_download() {
        let dir = tempfile::tempdir().unwrap();
        let mut download = Download::new(dir.path().to_path_buf());

        let content = b"hello world";

        assert!(send(&mut download, kv("name", "../etc/file.txt")).await.is_empty());
        assert!(send(&mut download, kv("length", content.len())).await.is_empty());
        assert!(send(&mut download, kv("sha-384", sha384(content))).await.is_empty());
        assert!(
            send(&mut download, kv("data", ByteBuf::from(&content[..5])))
                .await
                .is_empty()
        );

        // Only the temporary file exists
        let staged = files(dir.path());
        assert_eq!(staged.len(), 1);
        assert!(staged[0].starts_with(".fdo.download_"), "{staged:?}");

        let reply = send(&mut download, kv("data", ByteBuf::from(&content[5..]))).await;
        assert_eq!(reply, [kv("done", content.len() as i64)]);

        assert_eq!(files(dir.path()), ["file.txt"]);
        assert_eq!(
            std::fs::read(dir.path().join("file.txt")).unwrap(),
            content
        );
    }

    #[tokio::test]
    async fn digest_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut download = Download::new(dir.path().to_path_buf());

        send(&mut download, kv("name", "file.txt")).await;
        send(&mut download, kv("length", 3)).await;
        send(&mut download, kv("sha-384", sha384(b"abd"))).await;
        let reply = send(&mut download, kv("data", ByteBuf::from(b"abc".to_vec()))).await;

        assert_eq!(reply, [kv("done", -1)]);
        assert!(files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn data_without_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut download = Download::new(dir.path().to_path_buf());

        let reply = send(&mut download, kv("data", ByteBuf::from(b"abc".to_vec()))).await;

        assert_eq!(reply, [kv("done", -1)]);
    }

    #[tokio::test]
    async fn too_much_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut download = Download::new(dir.path().to_path_buf());

        send(&mut download, kv("name", "file.txt")).await;
        send(&mut download, kv("length", 2)).await;
        let reply = send(&mut download, kv("data", ByteBuf::from(b"abc".to_vec()))).await;

        assert_eq!(reply, [kv("done", -1)]);
        assert!(files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn reset_discards_the_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let mut download = Download::new(dir.path().to_path_buf());

        send(&mut download, kv("name", "file.txt")).await;
        send(&mut download, kv("length", 6)).await;
        send(&mut download, kv("data", ByteBuf::from(b"abc".to_vec()))).await;

        download.reset().await;

        assert!(files(dir.path()).is_empty());
    }
}
