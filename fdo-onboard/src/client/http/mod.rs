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

//! FDO transport for the HTTP protocol

use std::time::Duration;

use fdo_protocol::error::ErrorKind;
use fdo_protocol::utils::Hex;
use fdo_protocol::v101::error::ErrorMessage;
use fdo_protocol::v101::{Message, Msgtype, PROTOCOL_VERSION};
use http::{HeaderMap, StatusCode, header};
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::Error;

use self::retry::HttpRetry;

pub use self::tls::tls_config;

use super::{Transport, resets_token};

mod retry;
pub mod tls;

const CBOR_MIME: HeaderValue = HeaderValue::from_static("application/cbor");
const MESSAGE_TYPE_HEADER: HeaderName = HeaderName::from_static("message-type");
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Transport for the HTTP or HTTPS protocol.
///
/// The authorization token received in the first response of a protocol is sent with the
/// following messages of the same protocol.
#[derive(Debug)]
pub struct HttpTransport {
    inner: reqwest::Client,
    retry: HttpRetry,
    authorization: Option<HeaderValue>,
    prev_msg: Option<Msgtype>,
}

impl HttpTransport {
    /// Creates the transport with a TLS configuration.
    pub fn create(tls: rustls::ClientConfig) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, CBOR_MIME);

        let inner = reqwest::ClientBuilder::new()
            .use_preconfigured_tls(tls)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|err| {
                error!(error = %err, "couldn't build the client");

                Error::Config("HTTP client")
            })?;

        Ok(Self {
            inner,
            retry: HttpRetry::new(),
            authorization: None,
            prev_msg: None,
        })
    }

    fn make_url(base_url: &Url, msg_type: Msgtype) -> Result<Url, Error> {
        base_url
            .join(&format!("/fdo/{PROTOCOL_VERSION}/msg/{msg_type}"))
            .map_err(|err| {
                error!(error = %err, "couldn't parse URL");

                Error::Protocol(fdo_protocol::Error::new(ErrorKind::Invalid, "url"))
            })
    }

    fn create_req(
        &self,
        base_url: &Url,
        msg_type: Msgtype,
        body: Vec<u8>,
    ) -> Result<reqwest::Request, Error> {
        let url = Self::make_url(base_url, msg_type)?;

        let mut req = reqwest::Request::new(Method::POST, url);
        req.body_mut().replace(body.into());
        req.headers_mut()
            .insert(MESSAGE_TYPE_HEADER, msg_type.into());

        if let Some(authorization) = &self.authorization {
            req.headers_mut()
                .insert(header::AUTHORIZATION, authorization.clone());
        }

        Ok(req)
    }

    async fn handle_response(&mut self, mut resp: reqwest::Response) -> Result<(Msgtype, Vec<u8>), Error> {
        let status = resp.status();

        trace!(%status, "HTTP response status");

        let msg_type = match Self::get_message_type(resp.headers()) {
            Ok(msg_type) => msg_type,
            Err(_) if !status.is_success() => {
                error!(%status, "response has invalid status code");

                return Err(Error::Transport("invalid HTTP status code in response"));
            }
            Err(err) => return Err(err),
        };

        match status {
            StatusCode::OK => {}
            _ if msg_type == ErrorMessage::MSG_TYPE => {
                debug!(%status, "response carries an error message");
            }
            status => {
                error!(%status, "response has invalid status code");

                return Err(Error::Transport("invalid HTTP status code in response"));
            }
        }

        Self::check_content_type(resp.headers())?;

        if let Some(mut authorization) = resp.headers_mut().remove(header::AUTHORIZATION) {
            authorization.set_sensitive(true);

            if self
                .authorization
                .as_ref()
                .is_some_and(|current| *current != authorization)
            {
                warn!("authorization token changed by the server");
            }

            self.authorization = Some(authorization);
        }

        let bytes = resp.bytes().await.map_err(|err| {
            error!(error = %err, "couldn't read response body");

            Error::Transport("read response body")
        })?;

        trace!(msg = %Hex::new(&bytes));

        Ok((msg_type, bytes.to_vec()))
    }

    fn get_message_type(headers: &HeaderMap) -> Result<Msgtype, Error> {
        let msg_type = headers.get(MESSAGE_TYPE_HEADER).ok_or(Error::Protocol(
            fdo_protocol::Error::new(ErrorKind::Invalid, "message type header in response"),
        ))?;

        let msg_type = msg_type.to_str().map_err(|err| {
            error!(error = %err, "couldn't convert header value to string");

            Error::Protocol(fdo_protocol::Error::new(ErrorKind::Invalid, "UTF-8 string"))
        })?;

        msg_type.parse().map_err(|err| {
            error!(error = %err, msg_type, "couldn't parse message-type");

            Error::Protocol(fdo_protocol::Error::new(ErrorKind::Invalid, "message-type"))
        })
    }

    fn check_content_type(headers: &HeaderMap) -> Result<(), Error> {
        let content_type = headers.get(header::CONTENT_TYPE).ok_or(Error::Protocol(
            fdo_protocol::Error::new(ErrorKind::Invalid, "HTTP Content-Type header missing"),
        ))?;

        if content_type != CBOR_MIME {
            let content_type = String::from_utf8_lossy(content_type.as_bytes());

            error!(%content_type, "invalid CONTENT_TYPE header");

            return Err(Error::Protocol(fdo_protocol::Error::new(
                ErrorKind::Invalid,
                "HTTP mime type",
            )));
        }

        Ok(())
    }

    async fn send_with_retry(&mut self, req: reqwest::Request) -> Result<reqwest::Response, Error> {
        let req_cl = req.try_clone();

        let mut resp = self.send_single(req).await;

        let Some(req) = req_cl else {
            warn!("couldn't clone the request");

            return resp;
        };

        while let Some(retry) = self.retry.retry(&resp) {
            retry.await;

            let Some(req_cl) = req.try_clone() else {
                return resp;
            };

            resp = self.send_single(req_cl).await;
        }

        resp
    }

    async fn send_single(&self, req: reqwest::Request) -> Result<reqwest::Response, Error> {
        self.inner.execute(req).await.map_err(|err| {
            error!(error = %err, "couldn't send HTTP request");

            Error::Transport("send HTTP request")
        })
    }
}

impl Transport for HttpTransport {
    async fn send(
        &mut self,
        base_url: &Url,
        msg_type: Msgtype,
        body: Vec<u8>,
    ) -> Result<(Msgtype, Vec<u8>), Error> {
        if resets_token(self.prev_msg, msg_type) {
            debug!(msg_type, "new protocol session, discarding the token");

            self.authorization = None;
        }

        self.prev_msg = Some(msg_type);

        let req = self.create_req(base_url, msg_type, body)?;
        let resp = self.send_with_retry(req).await?;

        self.handle_response(resp).await
    }
}
