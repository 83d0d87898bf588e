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

//! Delays between onboarding attempts.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Error;

/// Delay after the last directive when none is configured.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(120);

/// Adds or removes a random amount up to 25% of the delay.
///
/// The result is always in the range `[0.75 * delay, 1.25 * delay]`.
pub fn add_jitter(delay: Duration) -> Duration {
    // Use millis to have a non empty range for small delays
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let max = millis / 4;

    if max == 0 {
        return delay;
    }

    let value = rand::random_range(-(max as i128)..=(max as i128));
    let add = Duration::from_millis(value.unsigned_abs() as u64);

    if value.is_negative() {
        delay.saturating_sub(add)
    } else {
        delay.saturating_add(add)
    }
}

/// Waits for the delay, returns [`Error::Canceled`] if the token is cancelled first.
pub(crate) async fn wait(cancel: &CancellationToken, delay: Duration) -> Result<(), Error> {
    debug!(millis = delay.as_millis(), "waiting");

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Canceled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
