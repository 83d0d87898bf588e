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

//! In process transport, dispatching the messages to a [`Responder`].

use fdo_protocol::v101::Msgtype;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use crate::Error;

use super::{Transport, resets_token};

/// Message received by the [`Responder`].
#[derive(Debug)]
pub struct Request<'a> {
    /// Server the message was sent to.
    pub base_url: &'a Url,
    /// Type of the message.
    pub msg_type: Msgtype,
    /// Encoded message.
    pub body: Vec<u8>,
    /// Token returned by a previous response of the same protocol.
    pub token: Option<&'a str>,
}

/// Reply of the [`Responder`].
#[derive(Debug)]
pub struct Response {
    /// Type of the message.
    pub msg_type: Msgtype,
    /// Encoded message.
    pub body: Vec<u8>,
    /// Token to send with the next messages.
    pub token: Option<String>,
}

/// Server side of the in process transport.
pub trait Responder: Send {
    /// Handles a message.
    fn respond(&mut self, req: Request<'_>) -> Result<Response, Error>;
}

/// Transport calling the [`Responder`] directly.
#[derive(Debug)]
pub struct InProcessTransport<R> {
    responder: R,
    cancel: CancellationToken,
    token: Option<String>,
    prev_msg: Option<Msgtype>,
    sent: Vec<(Url, Msgtype)>,
}

impl<R> InProcessTransport<R> {
    /// Creates the transport, every message fails after the token is cancelled.
    pub fn new(responder: R, cancel: CancellationToken) -> Self {
        Self {
            responder,
            cancel,
            token: None,
            prev_msg: None,
            sent: Vec::new(),
        }
    }

    /// Server and message type of every message sent.
    pub fn sent(&self) -> &[(Url, Msgtype)] {
        &self.sent
    }

    /// Returns the responder.
    pub fn responder(&self) -> &R {
        &self.responder
    }

    /// Returns a mutable reference to the responder.
    pub fn responder_mut(&mut self) -> &mut R {
        &mut self.responder
    }

    /// Consumes the transport, returning the responder.
    pub fn into_responder(self) -> R {
        self.responder
    }
}

impl<R> Transport for InProcessTransport<R>
where
    R: Responder,
{
    #[instrument(skip(self, body))]
    async fn send(
        &mut self,
        base_url: &Url,
        msg_type: Msgtype,
        body: Vec<u8>,
    ) -> Result<(Msgtype, Vec<u8>), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        if resets_token(self.prev_msg, msg_type) {
            self.token = None;
        }

        self.prev_msg = Some(msg_type);
        self.sent.push((base_url.clone(), msg_type));

        let resp = self.responder.respond(Request {
            base_url,
            msg_type,
            body,
            token: self.token.as_deref(),
        })?;

        if let Some(token) = resp.token {
            self.token = Some(token);
        }

        debug!(resp = resp.msg_type, "in process response");

        Ok((resp.msg_type, resp.body))
    }
}
