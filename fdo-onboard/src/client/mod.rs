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

//! Client for the FDO protocol.
//!
//! The [`Transport`] only moves bytes, the [`Client`] encodes the messages, checks the response
//! type and seals the messages once the TO2 session is established.

use std::future::Future;
use std::io::Write;
use std::marker::PhantomData;

use coset::{CoseEncrypt0, TaggedCborSerializable};
use fdo_protocol::error::ErrorKind;
use fdo_protocol::v101::error::ErrorMessage;
use fdo_protocol::v101::{ClientMessage, Message, Msgtype};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use url::Url;

use crate::Error;
use crate::crypto::Session;

pub mod http;
pub mod responder;

/// Protocol of a message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Protocol {
    Di,
    To1,
    To2,
    Other,
}

impl Protocol {
    pub(crate) fn of(msg_type: Msgtype) -> Self {
        match msg_type {
            10..=13 => Protocol::Di,
            30..=33 => Protocol::To1,
            60..=71 => Protocol::To2,
            _ => Protocol::Other,
        }
    }
}

/// Returns true if the message starts a new protocol session, so the previous token must be
/// discarded.
pub(crate) fn resets_token(prev: Option<Msgtype>, msg_type: Msgtype) -> bool {
    prev.is_none_or(|prev| msg_type < prev || Protocol::of(prev) != Protocol::of(msg_type))
}

/// Sends a protocol message and receives the response.
pub trait Transport: Send {
    /// Sends the encoded body with the given message type to the server at `base_url`.
    ///
    /// Returns the message type and the body of the response. An [`ErrorMessage`] is returned as
    /// a normal response.
    fn send(
        &mut self,
        base_url: &Url,
        msg_type: Msgtype,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<(Msgtype, Vec<u8>), Error>> + Send;
}

/// Message sealed with the session key.
#[derive(Debug)]
pub(crate) struct EncMessage<M> {
    inner: CoseEncrypt0,
    _message: PhantomData<M>,
}

impl<M> EncMessage<M> {
    fn new(inner: CoseEncrypt0) -> Self {
        Self {
            inner,
            _message: PhantomData,
        }
    }

    pub(crate) fn seal(session: &Session, msg: &M) -> Result<Self, fdo_protocol::Error>
    where
        M: Message,
    {
        let buf = msg.to_bytes()?;

        session.encrypt(&buf).map(Self::new)
    }

    pub(crate) fn open(&self, session: &Session) -> Result<M, fdo_protocol::Error>
    where
        M: Message,
    {
        let msg = session.decrypt(&self.inner)?;

        M::decode(&msg)
    }
}

impl<M> Message for EncMessage<M>
where
    M: Message,
{
    const MSG_TYPE: Msgtype = M::MSG_TYPE;

    fn decode(buf: &[u8]) -> Result<Self, fdo_protocol::Error> {
        CoseEncrypt0::from_tagged_slice(buf)
            .map_err(|err| {
                error!(error = %err, "couldn't decode encrypted cose");

                fdo_protocol::Error::new(ErrorKind::Decode, "encrypted cose")
            })
            .map(Self::new)
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), fdo_protocol::Error>
    where
        W: Write,
    {
        self.inner
            .clone()
            .to_tagged_vec()
            .map_err(|err| {
                error!(error = %err, "couldn't encode encrypted cose");

                fdo_protocol::Error::new(ErrorKind::Encode, "encrypted cose")
            })
            .and_then(|buf| {
                writer.write_all(&buf).map_err(|err| {
                    error!(error = %err, "couldn't write encrypted cose");

                    fdo_protocol::Error::new(ErrorKind::Write, "encrypted cose")
                })
            })
    }
}

/// Client bound to a server for a single protocol run.
pub(crate) struct Client<'a, T> {
    transport: &'a mut T,
    base_url: &'a Url,
    cancel: &'a CancellationToken,
    session: Option<Session>,
}

impl<'a, T> Client<'a, T>
where
    T: Transport,
{
    pub(crate) fn new(transport: &'a mut T, base_url: &'a Url, cancel: &'a CancellationToken) -> Self {
        Self {
            transport,
            base_url,
            cancel,
            session: None,
        }
    }

    /// From now on every message is encrypted.
    pub(crate) fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    /// Sends the message, sealed if the session is established.
    pub(crate) async fn send<M>(&mut self, msg: &M) -> Result<M::Response, Error>
    where
        M: ClientMessage,
    {
        let body = match &self.session {
            Some(session) => EncMessage::seal(session, msg)?.to_bytes()?,
            None => msg.to_bytes()?,
        };

        self.exchange::<M>(body).await
    }

    /// Sends the message in clear, the response is still opened with the session.
    pub(crate) async fn send_plain<M>(&mut self, msg: &M) -> Result<M::Response, Error>
    where
        M: ClientMessage,
    {
        let body = msg.to_bytes()?;

        self.exchange::<M>(body).await
    }

    /// Reports a failure to the server, the delivery is best effort.
    pub(crate) async fn notify(&mut self, msg: &ErrorMessage) {
        if self.cancel.is_cancelled() {
            return;
        }

        let body = match msg.to_bytes() {
            Ok(body) => body,
            Err(err) => {
                error!(error = %err, "couldn't encode error message");

                return;
            }
        };

        let res = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            res = self.transport.send(self.base_url, ErrorMessage::MSG_TYPE, body) => res,
        };

        if let Err(err) = res {
            debug!(error = %err, "couldn't deliver error message");
        }
    }

    async fn exchange<M>(&mut self, body: Vec<u8>) -> Result<M::Response, Error>
    where
        M: ClientMessage,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        debug!(msg_type = M::MSG_TYPE, len = body.len(), "sending message");

        let (msg_type, body) = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::Canceled),
            res = self.transport.send(self.base_url, M::MSG_TYPE, body) => res?,
        };

        debug!(msg_type, len = body.len(), "received message");

        if msg_type == ErrorMessage::MSG_TYPE {
            return Err(Self::error_message(&body));
        }

        if msg_type != M::Response::MSG_TYPE {
            error!(
                expected = M::Response::MSG_TYPE,
                value = msg_type,
                "received invalid message type"
            );

            return Err(fdo_protocol::Error::new(ErrorKind::Invalid, "response message type").into());
        }

        let msg = match &self.session {
            Some(session) => EncMessage::<M::Response>::decode(&body)?.open(session)?,
            None => M::Response::decode(&body)?,
        };

        Ok(msg)
    }

    fn error_message(body: &[u8]) -> Error {
        match ErrorMessage::decode(body) {
            Ok(error) => {
                error!(%error, "response containing error message received");
            }
            Err(err) => {
                error!(error = %err, "couldn't decode error message");
            }
        }

        fdo_protocol::Error::new(ErrorKind::Message, "error message received").into()
    }
}
