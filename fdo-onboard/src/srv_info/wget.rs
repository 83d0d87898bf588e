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

//! HTTP download module, `fdo.wget`.
//!
//! The owner sends the optional `name` and `sha-384`, then the `url` that starts the download.
//! The file is written in the destination directory the same way as `fdo.download`, the device
//! answers with `done`.

use std::path::PathBuf;

use async_trait::async_trait;
use fdo_protocol::v101::service_info::{ServiceInfo, ServiceInfoKv};
use serde_bytes::ByteBuf;
use tracing::{debug, error, info, instrument};
use url::Url;

use crate::Error;

use super::ServiceInfoModule;
use super::download::{Staged, destination};

/// Name of the module.
pub const MODULE: &str = "fdo.wget";

/// Handler of `fdo.wget`.
#[derive(Debug)]
pub struct Wget {
    dir: PathBuf,
    http: reqwest::Client,
    name: Option<String>,
    sha384: Option<Vec<u8>>,
}

impl Wget {
    /// Stores the files in `dir`.
    pub fn new(dir: PathBuf, http: reqwest::Client) -> Self {
        Self {
            dir,
            http,
            name: None,
            sha384: None,
        }
    }

    fn done(value: i64) -> Result<ServiceInfo, Error> {
        Ok(vec![ServiceInfoKv::new(format!("{MODULE}:done"), &value)?])
    }

    #[instrument(skip(self))]
    async fn wget(&mut self, url: &str) -> Result<ServiceInfo, Error> {
        let name = self.name.take();
        let sha384 = self.sha384.take();

        let url = match Url::parse(url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => {
                error!(scheme = url.scheme(), "unsupported scheme");

                return Self::done(-1);
            }
            Err(err) => {
                error!(error = %err, "invalid url");

                return Self::done(-1);
            }
        };

        // Default to the last segment of the path
        let name = name.or_else(|| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
        });

        let Some(dest) = name.and_then(|name| destination(&self.dir, &name)) else {
            error!("missing file name");

            return Self::done(-1);
        };

        match self.fetch(url, dest.clone(), sha384).await {
            Ok(written) => {
                info!(dest = %dest.display(), written, "wget completed");

                Self::done(i64::try_from(written).unwrap_or(i64::MAX))
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "wget failed");

                Self::done(-1)
            }
        }
    }

    async fn fetch(&self, url: Url, dest: PathBuf, sha384: Option<Vec<u8>>) -> Result<u64, Error> {
        let mut resp = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| {
                error!(error = %err, "couldn't send wget request");

                Error::Transport("wget request")
            })?;

        let mut staged = Staged::create(&self.dir, ".fdo.wget_")?;

        while let Some(chunk) = resp.chunk().await.map_err(|err| {
            error!(error = %err, "couldn't read wget response");

            Error::Transport("wget response body")
        })? {
            staged.write(&chunk).await?;
        }

        staged.commit(&dest, sha384.as_deref()).await
    }
}

#[async_trait]
impl ServiceInfoModule for Wget {
    async fn receive(&mut self, message: &str, kv: &ServiceInfoKv) -> Result<ServiceInfo, Error> {
        match message {
            "name" => self.name = Some(kv.value()?),
            "sha-384" => self.sha384 = Some(kv.value::<ByteBuf>()?.into_vec()),
            "url" => {
                let url = kv.value::<String>()?;

                return self.wget(&url).await;
            }
            _ => debug!(message, "unknown message ignored"),
        }

        Ok(ServiceInfo::new())
    }

    async fn reset(&mut self) {
        self.name = None;
        self.sha384 = None;
    }
}
