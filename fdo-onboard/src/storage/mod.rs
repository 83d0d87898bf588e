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

//! Persistent storage of the device credential.
//!
//! The credential is wrapped in an envelope with a digest of the payload, so a corrupted or
//! partially written credential is detected when loading it.

use std::future::Future;

use fdo_protocol::v101::device_credentials::DeviceCredential;
use serde::Deserialize;
use serde_bytes::ByteBuf;
use tracing::error;
use zeroize::Zeroizing;

use crate::Error;

pub mod file;
pub mod nv;
#[cfg(feature = "tpm")]
pub mod tpm;

pub use self::file::FileStore;
pub use self::nv::{MemoryNvRam, NvRam, NvSlot, NvStore};

/// Version of the credential envelope.
const ENVELOPE_VERSION: u16 = 1;

/// Loads and persists the device credential.
pub trait CredentialStore: Send {
    /// Reads the stored credential.
    ///
    /// Returns [`Error::NotInitialized`] if it was never stored and [`Error::Integrity`] if it
    /// cannot be decoded or the digest doesn't match.
    fn load(&mut self) -> impl Future<Output = Result<DeviceCredential, Error>> + Send;

    /// Atomically replaces the stored credential.
    ///
    /// On error the previous credential is still valid.
    fn save(
        &mut self,
        credential: &DeviceCredential,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

/// ```cddl
/// Envelope = [
///     version: uint16,
///     payload: bstr .cbor DeviceCredential,
///     digest:  bstr, ;; SHA-256 of the payload
/// ]
/// ```
#[derive(Debug, Deserialize)]
struct Envelope(u16, ByteBuf, ByteBuf);

pub(crate) fn digest(payload: &[u8]) -> Vec<u8> {
    aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, payload)
        .as_ref()
        .to_vec()
}

/// Verifies the digest and decodes the payload.
pub(crate) fn open(payload: &[u8], expected: &[u8]) -> Result<DeviceCredential, Error> {
    if digest(payload) != expected {
        error!("credential digest mismatch");

        return Err(Error::Integrity);
    }

    DeviceCredential::decode(payload).map_err(|err| {
        error!(error = %err, "couldn't decode credential");

        Error::Integrity
    })
}

/// Encodes the credential into the envelope.
pub(crate) fn seal(credential: &DeviceCredential) -> Result<Zeroizing<Vec<u8>>, Error> {
    let payload = credential.encode()?;
    let digest = digest(&payload);

    let envelope = (
        ENVELOPE_VERSION,
        serde_bytes::Bytes::new(&payload),
        serde_bytes::Bytes::new(&digest),
    );

    let mut buf = Zeroizing::new(Vec::new());
    ciborium::into_writer(&envelope, &mut *buf).map_err(|err| {
        error!(error = %err, "couldn't encode credential envelope");

        Error::Protocol(fdo_protocol::Error::new(
            fdo_protocol::error::ErrorKind::Encode,
            "credential envelope",
        ))
    })?;

    Ok(buf)
}

/// Decodes the envelope, checking the version and the digest.
pub(crate) fn unseal(buf: &[u8]) -> Result<DeviceCredential, Error> {
    let Envelope(version, payload, digest) = ciborium::from_reader(buf).map_err(|err| {
        error!(error = %err, "couldn't decode credential envelope");

        Error::Integrity
    })?;

    let payload = Zeroizing::new(payload.into_vec());

    if version != ENVELOPE_VERSION {
        error!(version, "unsupported credential envelope version");

        return Err(Error::Integrity);
    }

    open(&payload, &digest)
}

#[cfg(test)]
mod tests {
    use fdo_protocol::v101::device_credentials::DeviceState;
    use pretty_assertions::assert_eq;

    use crate::tests::create_credential;

    use super::*;

    #[test]
    fn seal_and_unseal() {
        let credential = create_credential();

        let buf = seal(&credential).unwrap();
        let res = unseal(&buf).unwrap();

        assert_eq!(res.dc_guid, credential.dc_guid);
        assert_eq!(res.dc_state, DeviceState::PreTo1);
        assert_eq!(*res.dc_private_key, *credential.dc_private_key);
    }

    #[test]
    fn tampered_payload() {
        let credential = create_credential();

        let mut buf = seal(&credential).unwrap();
        // Last byte of the digest
        let last = buf.len() - 1;
        buf[last] ^= 0xff;

        assert!(matches!(unseal(&buf), Err(Error::Integrity)));
    }

    #[test]
    fn garbage_is_integrity_error() {
        assert!(matches!(unseal(b"\x01\x02\x03"), Err(Error::Integrity)));
    }
}
