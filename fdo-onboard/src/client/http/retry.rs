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

//! Retry of the HTTP requests.

use std::future::Future;
use std::time::Duration;

use http::status::StatusCode;
use pin_project_lite::pin_project;
use tracing::{info, warn};

use crate::Error;
use crate::time::add_jitter;

use super::MESSAGE_TYPE_HEADER;

/// Delay before the first retry, doubled on each attempt.
const RETRY_DELAY: Duration = Duration::from_secs(1);

// Retries with a delay.
#[derive(Debug, Clone)]
pub(crate) struct HttpRetry {
    count: u8,
    retries: u8,
}

impl HttpRetry {
    pub(crate) fn new() -> Self {
        Self {
            retries: 3,
            count: 0,
        }
    }

    fn should_retry_code(resp: &reqwest::Response) -> bool {
        // An error message in the body is a protocol failure, not a transient one
        if resp.headers().contains_key(MESSAGE_TYPE_HEADER) {
            return false;
        }

        matches!(
            resp.status(),
            StatusCode::REQUEST_TIMEOUT
                | StatusCode::CONFLICT
                | StatusCode::TOO_MANY_REQUESTS
                | StatusCode::BAD_GATEWAY
                | StatusCode::GATEWAY_TIMEOUT
        )
    }

    pub(crate) fn retry(
        &mut self,
        result: &Result<reqwest::Response, Error>,
    ) -> Option<HttpRetryFuture> {
        if let Ok(resp) = result.as_ref() {
            if !Self::should_retry_code(resp) {
                self.count = 0;

                return None;
            }
        }

        if self.count >= self.retries {
            warn!("max retry reached");

            self.count = 0;

            return None;
        }

        Some(self.create_retry())
    }

    fn create_retry(&mut self) -> HttpRetryFuture {
        self.count += 1;

        let duration = add_jitter(RETRY_DELAY * (1 << (self.count - 1)));

        info!(
            "retrying http request {}/{} in {}ms",
            self.count,
            self.retries,
            duration.as_millis()
        );

        HttpRetryFuture {
            timeout: tokio::time::sleep(duration),
        }
    }
}

pin_project! {
    pub(crate) struct HttpRetryFuture {
        #[pin]
        timeout: tokio::time::Sleep,
    }
}

impl Future for HttpRetryFuture {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let this = self.project();

        this.timeout.poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> Result<reqwest::Response, Error> {
        let resp = http::Response::builder()
            .status(status)
            .body(Vec::<u8>::new())
            .unwrap();

        Ok(reqwest::Response::from(resp))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_status() {
        let mut retry = HttpRetry::new();

        for _ in 0..3 {
            let fut = retry.retry(&response(502)).unwrap();
            fut.await;
        }

        assert!(retry.retry(&response(502)).is_none());
        // the counter restarts
        assert!(retry.retry(&response(429)).is_some());
    }

    #[test]
    fn success_is_not_retried() {
        let mut retry = HttpRetry::new();

        assert!(retry.retry(&response(200)).is_none());
        assert!(retry.retry(&response(404)).is_none());
    }

    #[tokio::test]
    async fn transport_errors_are_retried() {
        let mut retry = HttpRetry::new();

        assert!(retry.retry(&Err(Error::Transport("send HTTP request"))).is_some());
    }
}
