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

//! File upload module, `fdo.upload`.
//!
//! The owner requests a file by `name`, the device answers with the `length`, the `data` chunks
//! and, when `need-sha` was set, the `sha-384` of the content. A length of -1 reports that the
//! file couldn't be read.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use aws_lc_rs::digest::{self, SHA384};
use fdo_protocol::v101::service_info::{ServiceInfo, ServiceInfoKv};
use serde_bytes::Bytes;
use tracing::{debug, error, info, instrument};

use crate::Error;

use super::ServiceInfoModule;

/// Name of the module.
pub const MODULE: &str = "fdo.upload";

/// Size of a data chunk, fits the default service info size.
const CHUNK_SIZE: usize = 1014;

/// Resolves the file names sent by the owner.
///
/// Absolute names are used as is, relative ones are joined to the base directory and can't
/// escape it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDir {
    base: PathBuf,
}

impl WorkingDir {
    /// Creates the resolver for the base directory.
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    /// Returns the path of the file.
    pub fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty file name"));
        }

        let path = Path::new(name);

        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }

        let mut relative = PathBuf::new();

        for component in path.components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !relative.pop() {
                        return Err(io::Error::new(
                            io::ErrorKind::PermissionDenied,
                            "path escapes the working directory",
                        ));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "invalid relative path",
                    ));
                }
            }
        }

        Ok(self.base.join(relative))
    }

    /// Reads a regular file.
    pub async fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        let path = self.resolve(name)?;

        let meta = tokio::fs::metadata(&path).await?;
        if meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                "can't upload a directory",
            ));
        }

        tokio::fs::read(&path).await
    }
}

/// Handler of `fdo.upload`.
#[derive(Debug)]
pub struct Upload {
    dir: WorkingDir,
    need_sha: bool,
}

impl Upload {
    /// Serves the files relative to `working_dir`.
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            dir: WorkingDir::new(working_dir),
            need_sha: false,
        }
    }

    fn key(message: &str) -> String {
        format!("{MODULE}:{message}")
    }

    #[instrument(skip(self))]
    async fn upload(&mut self, name: &str) -> Result<ServiceInfo, Error> {
        let content = match self.dir.read(name).await {
            Ok(content) => content,
            Err(err) => {
                error!(error = %err, "couldn't read the file");

                return Ok(vec![ServiceInfoKv::new(Self::key("length"), &-1i64)?]);
            }
        };

        let mut reply = Vec::with_capacity(content.len() / CHUNK_SIZE + 3);
        reply.push(ServiceInfoKv::new(Self::key("length"), &content.len())?);

        for chunk in content.chunks(CHUNK_SIZE) {
            reply.push(ServiceInfoKv::new(Self::key("data"), Bytes::new(chunk))?);
        }

        if self.need_sha {
            let sha = digest::digest(&SHA384, &content);

            reply.push(ServiceInfoKv::new(
                Self::key("sha-384"),
                Bytes::new(sha.as_ref()),
            )?);
        }

        info!(len = content.len(), "file uploaded");

        Ok(reply)
    }
}

#[async_trait]
impl ServiceInfoModule for Upload {
    async fn receive(&mut self, message: &str, kv: &ServiceInfoKv) -> Result<ServiceInfo, Error> {
        match message {
            "need-sha" => {
                self.need_sha = kv.value::<bool>()?;

                Ok(ServiceInfo::new())
            }
            "name" => {
                let name = kv.value::<String>()?;

                self.upload(&name).await
            }
            _ => {
                debug!(message, "unknown message ignored");

                Ok(ServiceInfo::new())
            }
        }
    }

    async fn reset(&mut self) {
        self.need_sha = false;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_bytes::ByteBuf;

    use super::*;

    #[test]
    fn working_dir_resolution() {
        let dir = WorkingDir::new(PathBuf::from("/var/lib/fdo"));

        assert_eq!(
            dir.resolve("/etc/hostname").unwrap(),
            PathBuf::from("/etc/hostname")
        );
        assert_eq!(
            dir.resolve("logs/./boot.log").unwrap(),
            PathBuf::from("/var/lib/fdo/logs/boot.log")
        );
        assert_eq!(
            dir.resolve("logs/../boot.log").unwrap(),
            PathBuf::from("/var/lib/fdo/boot.log")
        );

        let err = dir.resolve("../secret").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);

        let err = dir.resolve("logs/../../secret").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);

        let err = dir.resolve("").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn directories_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let working_dir = WorkingDir::new(dir.path().to_path_buf());

        let err = working_dir.read("sub").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::IsADirectory);
    }

    #[tokio::test]
    async fn uploads_in_chunks_with_sha() {
        let dir = tempfile::tempdir().unwrap();
        let content = vec![7u8; CHUNK_SIZE + 10];
        std::fs::write(dir.path().join("report.bin"), &content).unwrap();

        let mut upload = Upload::new(dir.path().to_path_buf());

        let need_sha = ServiceInfoKv::new("fdo.upload:need-sha", &true).unwrap();
        upload.receive("need-sha", &need_sha).await.unwrap();

        let name = ServiceInfoKv::new("fdo.upload:name", "report.bin").unwrap();
        let reply = upload.receive("name", &name).await.unwrap();

        let keys: Vec<&str> = reply.iter().map(|kv| kv.key()).collect();
        assert_eq!(
            keys,
            [
                "fdo.upload:length",
                "fdo.upload:data",
                "fdo.upload:data",
                "fdo.upload:sha-384"
            ]
        );
        assert_eq!(reply[0].value::<usize>().unwrap(), content.len());

        let data: Vec<u8> = reply[1..3]
            .iter()
            .flat_map(|kv| kv.value::<ByteBuf>().unwrap().into_vec())
            .collect();
        assert_eq!(data, content);

        let sha = reply[3].value::<ByteBuf>().unwrap();
        assert_eq!(sha.as_slice(), digest::digest(&SHA384, &content).as_ref());
    }

    #[tokio::test]
    async fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut upload = Upload::new(dir.path().to_path_buf());

        let name = ServiceInfoKv::new("fdo.upload:name", "missing.txt").unwrap();
        let reply = upload.receive("name", &name).await.unwrap();

        assert_eq!(reply.len(), 1);
        assert_eq!(reply[0].value::<i64>().unwrap(), -1);
    }
}
