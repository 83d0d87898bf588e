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

//! Software based crypto operations, with the device key kept in memory.

use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::{
    ECDSA_P256_SHA256_FIXED_SIGNING, ECDSA_P384_SHA384_FIXED_SIGNING, EcdsaKeyPair,
    EcdsaSigningAlgorithm, KeyPair,
};
use coset::iana::Algorithm as CoseAlgorithm;
use coset::{CoseSign1, CoseSign1Builder, HeaderBuilder};
use fdo_protocol::Error;
use fdo_protocol::error::ErrorKind;
use fdo_protocol::v101::Nonce;
use fdo_protocol::v101::device_credentials::DeviceCredential;
use fdo_protocol::v101::hash_hmac::{HMac, Hashtype};
use fdo_protocol::v101::key_exchange::{CipherSuite, KexSuiteName, XAKeyExchange, XBKeyExchange};
use fdo_protocol::v101::public_key::{PkType, PublicKey};
use fdo_protocol::v101::sign_info::DeviceSgType;
use rcgen::{CertificateParams, DistinguishedName, DnType};
use tracing::{error, info};
use zeroize::Zeroizing;

use super::{Crypto, DeviceSecrets, Session, ecdh_key_exchange, hmac, random};

/// Device key and HMAC secrets kept in memory.
pub struct SoftwareCrypto {
    rng: SystemRandom,
    key: EcdsaKeyPair,
    pkcs8: Zeroizing<Vec<u8>>,
    sg_type: DeviceSgType,
    hmac_secret: Zeroizing<Vec<u8>>,
    hmac_secret_384: Zeroizing<Vec<u8>>,
}

impl SoftwareCrypto {
    /// Reads the P-256 or P-384 private key and the secrets of the credential.
    pub fn from_credential(credential: &DeviceCredential) -> Result<Self, Error> {
        Self::new(
            credential.dc_private_key.clone(),
            credential.dc_hmac_secret.clone(),
            credential.dc_hmac_secret_384.clone(),
        )
    }

    /// Generates a new device key and HMAC secrets.
    pub fn generate(pk_type: PkType) -> Result<(Self, DeviceSecrets), Error> {
        let rng = SystemRandom::new();

        let alg: &'static EcdsaSigningAlgorithm = match pk_type {
            PkType::Secp256R1 => &ECDSA_P256_SHA256_FIXED_SIGNING,
            PkType::Secp384R1 => &ECDSA_P384_SHA384_FIXED_SIGNING,
            PkType::Rsa2048Restr | PkType::RsaPkcs | PkType::RsaPss => {
                error!(?pk_type, "unsupported device key type");

                return Err(Error::new(ErrorKind::Unsupported, "device key type"));
            }
        };

        let doc = EcdsaKeyPair::generate_pkcs8(alg, &rng)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to generate the device key"))?;

        let secrets = DeviceSecrets {
            private_key: Zeroizing::new(doc.as_ref().to_vec()),
            hmac_secret: random(&rng, 32)?,
            hmac_secret_384: random(&rng, 48)?,
        };

        info!(?pk_type, "generated device key");

        let this = Self::new(
            secrets.private_key.clone(),
            secrets.hmac_secret.clone(),
            secrets.hmac_secret_384.clone(),
        )?;

        Ok((this, secrets))
    }

    fn new(
        pkcs8: Zeroizing<Vec<u8>>,
        hmac_secret: Zeroizing<Vec<u8>>,
        hmac_secret_384: Zeroizing<Vec<u8>>,
    ) -> Result<Self, Error> {
        let (key, sg_type) = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &pkcs8)
            .map(|key| (key, DeviceSgType::StSecP256R1))
            .or_else(|_| {
                EcdsaKeyPair::from_pkcs8(&ECDSA_P384_SHA384_FIXED_SIGNING, &pkcs8)
                    .map(|key| (key, DeviceSgType::StSecP384R1))
            })
            .map_err(|err| {
                error!(error = %err, "couldn't parse device key");

                Error::new(ErrorKind::Crypto, "to parse device key")
            })?;

        Ok(Self {
            rng: SystemRandom::new(),
            key,
            pkcs8,
            sg_type,
            hmac_secret,
            hmac_secret_384,
        })
    }

    fn cose_alg(&self) -> CoseAlgorithm {
        match self.sg_type {
            DeviceSgType::StSecP384R1 => CoseAlgorithm::ES384,
            _ => CoseAlgorithm::ES256,
        }
    }
}

impl Crypto for SoftwareCrypto {
    fn sign_info_type(&self) -> DeviceSgType {
        self.sg_type
    }

    fn public_key(&self) -> PublicKey {
        let pk_type = match self.sg_type {
            DeviceSgType::StSecP384R1 => PkType::Secp384R1,
            _ => PkType::Secp256R1,
        };

        PublicKey::with_crypto(pk_type, self.key.public_key().as_ref().to_vec())
    }

    async fn cose_sign(
        &self,
        unprotected: HeaderBuilder,
        payload: Vec<u8>,
    ) -> Result<CoseSign1, Error> {
        let protected = HeaderBuilder::new().algorithm(self.cose_alg()).build();

        let sign = CoseSign1Builder::new()
            .protected(protected)
            .unprotected(unprotected.build())
            .payload(payload)
            .try_create_signature(&[], |bytes| {
                let sign = self
                    .key
                    .sign(&self.rng, bytes)
                    .map_err(|_| Error::new(ErrorKind::Crypto, "to sign cose"))?;

                Ok(sign.as_ref().to_vec())
            })?
            .build();

        Ok(sign)
    }

    async fn csr(&self, device_info: &str) -> Result<Vec<u8>, Error> {
        let key = rcgen::KeyPair::try_from(self.pkcs8.as_slice()).map_err(|err| {
            error!(error = %err, "couldn't read the device key for the csr");

            Error::new(ErrorKind::Crypto, "to read the device key for the csr")
        })?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, device_info);

        let mut params = CertificateParams::new(Vec::<String>::new()).map_err(|err| {
            error!(error = %err, "couldn't create csr parameters");

            Error::new(ErrorKind::Crypto, "to create csr parameters")
        })?;
        params.distinguished_name = dn;

        let csr = params.serialize_request(&key).map_err(|err| {
            error!(error = %err, "couldn't serialize csr");

            Error::new(ErrorKind::Crypto, "to serialize csr")
        })?;

        Ok(csr.der().to_vec())
    }

    async fn hmac(&self, hash_type: Hashtype, data: &[u8]) -> Result<HMac, Error> {
        let secret = match hash_type {
            Hashtype::HmacSha256 => &self.hmac_secret,
            Hashtype::HmacSha384 => &self.hmac_secret_384,
            Hashtype::Sha256 | Hashtype::Sha384 => {
                return Err(Error::new(ErrorKind::Invalid, "hash type for hmac"));
            }
        };

        if secret.is_empty() {
            error!(?hash_type, "missing hmac secret");

            return Err(Error::new(ErrorKind::Invalid, "missing hmac secret"));
        }

        hmac(secret, hash_type, data)
    }

    fn create_nonce(&self) -> Result<Nonce, Error> {
        super::nonce(&self.rng)
    }

    fn key_exchange(
        &self,
        kex: KexSuiteName,
        cipher: CipherSuite,
        xa: &XAKeyExchange,
    ) -> Result<(XBKeyExchange, Session), Error> {
        ecdh_key_exchange(&self.rng, kex, cipher, xa)
    }
}

impl std::fmt::Debug for SoftwareCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareCrypto")
            .field("sg_type", &self.sg_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use aws_lc_rs::agreement;
    use aws_lc_rs::rand::SecureRandom;
    use fdo_protocol::v101::key_exchange::EcdhParams;
    use pretty_assertions::assert_eq;

    use crate::crypto::{KexParams, verify_cose_signature};

    use super::*;

    pub(crate) fn device_pkcs8() -> Zeroizing<Vec<u8>> {
        let rng = SystemRandom::new();

        let doc = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();

        Zeroizing::new(doc.as_ref().to_vec())
    }

    /// Owner side of the ECDH key exchange.
    pub(crate) fn owner_exchange(
        kex: KexSuiteName,
    ) -> (agreement::EphemeralPrivateKey, Vec<u8>, XAKeyExchange) {
        let rng = SystemRandom::new();
        let params = KexParams::for_suite(kex).unwrap();

        let key = agreement::EphemeralPrivateKey::generate(params.agreement, &rng).unwrap();
        let point = key.compute_public_key().unwrap();

        let mut rand = vec![0; params.rand_len];
        rng.fill(&mut rand).unwrap();

        let xa = EcdhParams::from_sec1(point.as_ref(), &rand)
            .unwrap()
            .encode()
            .map(XAKeyExchange::new)
            .unwrap();

        (key, rand, xa)
    }

    /// Derives the owner session from the device parameters.
    pub(crate) fn owner_session(
        kex: KexSuiteName,
        cipher: CipherSuite,
        key: agreement::EphemeralPrivateKey,
        ow_rand: &[u8],
        xb: &XBKeyExchange,
    ) -> Session {
        let params = KexParams::for_suite(kex).unwrap();
        let dv_params = EcdhParams::parse(xb.as_ref()).unwrap();

        let dv_key = agreement::UnparsedPublicKey::new(params.agreement, dv_params.sec1_point());

        agreement::agree_ephemeral(key, dv_key, (), |shx| {
            let mut sh_se = shx.to_vec();
            sh_se.extend_from_slice(dv_params.rand());
            sh_se.extend_from_slice(ow_rand);

            Session::derive(kex, cipher, &sh_se).map_err(|_| ())
        })
        .unwrap()
    }

    fn from_pkcs8(pkcs8: &[u8]) -> Result<SoftwareCrypto, Error> {
        SoftwareCrypto::new(
            Zeroizing::new(pkcs8.to_vec()),
            Zeroizing::new(vec![1; 32]),
            Zeroizing::new(vec![2; 48]),
        )
    }

    #[tokio::test]
    async fn sign_with_device_key() {
        let crypto = from_pkcs8(&device_pkcs8()).unwrap();

        assert_eq!(crypto.sign_info_type(), DeviceSgType::StSecP256R1);

        let sign = crypto
            .cose_sign(HeaderBuilder::new(), b"eat".to_vec())
            .await
            .unwrap();

        verify_cose_signature(&sign, &crypto.public_key()).unwrap();
    }

    #[tokio::test]
    async fn p384_device_key() {
        let (crypto, secrets) = SoftwareCrypto::generate(PkType::Secp384R1).unwrap();
        assert_eq!(crypto.sign_info_type(), DeviceSgType::StSecP384R1);
        assert_eq!(secrets.hmac_secret.len(), 32);
        assert_eq!(secrets.hmac_secret_384.len(), 48);

        let sign = crypto
            .cose_sign(HeaderBuilder::new(), b"eat".to_vec())
            .await
            .unwrap();

        verify_cose_signature(&sign, &crypto.public_key()).unwrap();
    }

    #[test]
    fn invalid_device_key() {
        let err = from_pkcs8(b"not a key").unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Crypto);

        let err = SoftwareCrypto::generate(PkType::RsaPss).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn hmac_with_credential_secrets() {
        let crypto = from_pkcs8(&device_pkcs8()).unwrap();

        let tag = crypto.hmac(Hashtype::HmacSha256, b"header").await.unwrap();
        assert_eq!(tag, hmac(&[1; 32], Hashtype::HmacSha256, b"header").unwrap());
        crypto.verify_hmac(&tag, b"header").await.unwrap();
        crypto.verify_hmac(&tag, b"other").await.unwrap_err();

        let tag = crypto.hmac(Hashtype::HmacSha384, b"header").await.unwrap();
        assert_eq!(tag, hmac(&[2; 48], Hashtype::HmacSha384, b"header").unwrap());

        let err = crypto.hmac(Hashtype::Sha256, b"header").await.unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn csr_has_device_info() {
        for pk_type in [PkType::Secp256R1, PkType::Secp384R1] {
            let (crypto, _secrets) = SoftwareCrypto::generate(pk_type).unwrap();

            let csr = crypto.csr("fdo-device-info").await.unwrap();

            // DER SEQUENCE
            assert_eq!(csr[0], 0x30);
            assert!(
                csr.windows(15).any(|w| w == b"fdo-device-info"),
                "missing common name"
            );
        }
    }

    #[test]
    fn key_exchange_agrees() {
        let crypto = from_pkcs8(&device_pkcs8()).unwrap();

        for (kex, cipher) in [
            (KexSuiteName::Ecdh256, CipherSuite::A128Gcm),
            (KexSuiteName::Ecdh384, CipherSuite::A256Gcm),
        ] {
            let (ow_key, ow_rand, xa) = owner_exchange(kex);

            let (xb, device) = crypto.key_exchange(kex, cipher, &xa).unwrap();
            let owner = owner_session(kex, cipher, ow_key, &ow_rand, &xb);

            let enc = device.encrypt(b"TO2.DeviceServiceInfoReady").unwrap();
            assert_eq!(owner.decrypt(&enc).unwrap(), b"TO2.DeviceServiceInfoReady");
        }
    }

    #[test]
    fn key_exchange_mismatched_curve() {
        let crypto = from_pkcs8(&device_pkcs8()).unwrap();

        let (_key, _rand, xa) = owner_exchange(KexSuiteName::Ecdh384);

        let err = crypto
            .key_exchange(KexSuiteName::Ecdh256, CipherSuite::A128Gcm, &xa)
            .unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }
}
