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

//! TLS configuration of the HTTP transport.

use std::path::PathBuf;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{error, info, warn};

use crate::Error;

/// Builds the client configuration trusting the certificates in the PEM files.
///
/// With `insecure` the server certificate is not validated at all, the handshake signatures
/// are still checked.
pub fn tls_config(ca_certs: &[PathBuf], insecure: bool) -> Result<ClientConfig, Error> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|err| {
            error!(error = %err, "couldn't configure the TLS protocol versions");

            Error::Config("TLS protocol versions")
        })?;

    if insecure {
        warn!("TLS certificate validation disabled");

        let verifier = NoCertificateVerification(provider.signature_verification_algorithms);

        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth());
    }

    let mut roots = RootCertStore::empty();

    for path in ca_certs {
        let certs = CertificateDer::pem_file_iter(path).map_err(|err| {
            error!(error = %err, path = %path.display(), "couldn't read the CA certificates");

            Error::Config("CA certificate file")
        })?;

        let mut added = 0usize;

        for cert in certs {
            let cert = cert.map_err(|err| {
                error!(error = %err, path = %path.display(), "couldn't parse CA certificate");

                Error::Config("CA certificate file")
            })?;

            roots.add(cert).map_err(|err| {
                error!(error = %err, path = %path.display(), "invalid CA certificate");

                Error::Config("CA certificate")
            })?;

            added += 1;
        }

        if added == 0 {
            error!(path = %path.display(), "no certificate in the file");

            return Err(Error::Config("CA certificate file"));
        }

        info!(path = %path.display(), added, "CA certificates loaded");
    }

    Ok(builder
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Accepts every server certificate.
#[derive(Debug)]
struct NoCertificateVerification(WebPkiSupportedAlgorithms);

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insecure_and_empty_roots() {
        tls_config(&[], true).unwrap();
        tls_config(&[], false).unwrap();
    }

    #[test]
    fn file_without_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.pem");
        std::fs::write(&path, "not a certificate").unwrap();

        let err = tls_config(&[path], false).unwrap_err();
        insta::assert_snapshot!(err, @"invalid configuration, CA certificate file");

        let err = tls_config(&[dir.path().join("missing.pem")], false).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
