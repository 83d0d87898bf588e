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

//! Command module, `fdo.command`.
//!
//! Running the commands is opt-in, [`Command::echo`] only logs the requested command line: the
//! `execute` message is answered with an `exitcode` of 0 and, when requested, the command line as
//! `stdout`. [`Command::run`] spawns the program in the working directory and returns its output.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use fdo_protocol::v101::service_info::{ServiceInfo, ServiceInfoKv};
use serde_bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::Error;

use super::ServiceInfoModule;

/// Name of the module.
pub const MODULE: &str = "fdo.command";

/// Exit code reported when the program couldn't be started.
const SPAWN_FAILED: i32 = 127;

#[derive(Debug, Clone)]
enum Mode {
    Echo,
    Run { working_dir: PathBuf },
}

/// Handler of `fdo.command`.
#[derive(Debug)]
pub struct Command {
    mode: Mode,
    request: Request,
}

#[derive(Debug, Default)]
struct Request {
    command: Option<String>,
    args: Vec<String>,
    may_fail: bool,
    return_stdout: bool,
    return_stderr: bool,
}

impl Request {
    fn command_line(&self) -> Option<String> {
        let command = self.command.as_deref()?;

        let line = std::iter::once(command)
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        Some(line)
    }
}

/// Output of a command.
struct Output {
    exitcode: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl Command {
    /// Logs the commands without running them.
    pub fn echo() -> Self {
        Self {
            mode: Mode::Echo,
            request: Request::default(),
        }
    }

    /// Runs the commands in the working directory.
    pub fn run(working_dir: PathBuf) -> Self {
        Self {
            mode: Mode::Run { working_dir },
            request: Request::default(),
        }
    }

    async fn execute(&mut self) -> Result<ServiceInfo, Error> {
        let request = std::mem::take(&mut self.request);

        let Some(line) = request.command_line() else {
            warn!("execute without a command");

            return Ok(vec![ServiceInfoKv::new(
                format!("{MODULE}:exitcode"),
                &1u8,
            )?]);
        };

        let output = match &self.mode {
            Mode::Echo => {
                info!(command = line, "echoing command, not executed");

                Output {
                    exitcode: 0,
                    stdout: line.into_bytes(),
                    stderr: Vec::new(),
                }
            }
            Mode::Run { working_dir } => Self::spawn(&request, working_dir).await?,
        };

        if output.exitcode != 0 && !request.may_fail {
            error!(exitcode = output.exitcode, "command failed");

            return Err(Error::io(
                "run the fdo.command program",
                std::io::Error::other(format!("exit code {}", output.exitcode)),
            ));
        }

        let mut reply = Vec::with_capacity(3);

        if request.return_stdout {
            reply.push(ServiceInfoKv::new(
                format!("{MODULE}:stdout"),
                Bytes::new(&output.stdout),
            )?);
        }

        if request.return_stderr {
            reply.push(ServiceInfoKv::new(
                format!("{MODULE}:stderr"),
                Bytes::new(&output.stderr),
            )?);
        }

        reply.push(ServiceInfoKv::new(
            format!("{MODULE}:exitcode"),
            &output.exitcode,
        )?);

        Ok(reply)
    }

    async fn spawn(request: &Request, working_dir: &Path) -> Result<Output, Error> {
        let Some(command) = request.command.as_deref() else {
            return Err(Error::Config("missing fdo.command program"));
        };

        info!(command, args = ?request.args, dir = %working_dir.display(), "running command");

        let res = tokio::process::Command::new(command)
            .args(&request.args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .output()
            .await;

        match res {
            Ok(output) => {
                // killed by a signal
                let exitcode = output.status.code().unwrap_or(-1);

                debug!(exitcode, "command exited");

                Ok(Output {
                    exitcode,
                    stdout: output.stdout,
                    stderr: output.stderr,
                })
            }
            Err(err) if request.may_fail => {
                warn!(error = %err, command, "couldn't start the command");

                Ok(Output {
                    exitcode: SPAWN_FAILED,
                    stdout: Vec::new(),
                    stderr: err.to_string().into_bytes(),
                })
            }
            Err(err) => {
                error!(error = %err, command, "couldn't start the command");

                Err(Error::io("start the fdo.command program", err))
            }
        }
    }
}

#[async_trait]
impl ServiceInfoModule for Command {
    async fn receive(&mut self, message: &str, kv: &ServiceInfoKv) -> Result<ServiceInfo, Error> {
        match message {
            "command" => self.request.command = Some(kv.value()?),
            "args" => self.request.args = kv.value()?,
            "may_fail" => self.request.may_fail = kv.value()?,
            "return_stdout" => self.request.return_stdout = kv.value()?,
            "return_stderr" => self.request.return_stderr = kv.value()?,
            "execute" => return self.execute().await,
            "sig" => debug!(message, "signals not supported"),
            _ => debug!(message, "unknown message ignored"),
        }

        Ok(ServiceInfo::new())
    }

    async fn reset(&mut self) {
        self.request = Request::default();
    }
}
