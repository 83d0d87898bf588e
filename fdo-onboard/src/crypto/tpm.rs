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

//! Signs and computes the HMACs with keys that never leave the TPM.
//!
//! The device key and the HMAC keys are created under a primary key of the owner hierarchy. The
//! credential stores only their public and encrypted private parts, which can be loaded only in
//! the same TPM.

use std::cell::RefCell;
use std::str::FromStr;

use aws_lc_rs::rand::SystemRandom;
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
use serde_bytes::{ByteBuf, Bytes};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};
use tss_esapi::Context;
use tss_esapi::attributes::ObjectAttributesBuilder;
use tss_esapi::handles::KeyHandle;
use tss_esapi::interface_types::algorithm::{HashingAlgorithm, PublicAlgorithm};
use tss_esapi::interface_types::ecc::EccCurve;
use tss_esapi::interface_types::resource_handles::Hierarchy;
use tss_esapi::structures::{
    Digest, EccPoint, EccScheme, HashScheme, KeyDerivationFunctionScheme, KeyedHashScheme,
    MaxBuffer, Private, Public, PublicBuilder, PublicEccParameters, PublicKeyedHashParameters,
    Signature, SignatureScheme, SymmetricCipherParameters, SymmetricDefinitionObject,
};
use tss_esapi::tcti_ldr::TctiNameConf;
use tss_esapi::traits::{Marshall, UnMarshall};
use zeroize::Zeroizing;

use super::{Crypto, DeviceSecrets, Session, ecdh_key_exchange};

/// Default connection, to the TPM resource manager.
pub const TPM_CONNECTION: &str = "device:/dev/tpmrm0";

type Job = Box<dyn FnOnce(&mut TpmContext) + Send>;

fn tpm_err(ctx: &'static str) -> impl FnOnce(tss_esapi::Error) -> Error {
    move |error| {
        error!(%error, "couldn't {ctx}");

        Error::new(ErrorKind::Crypto, ctx)
    }
}

fn stopped() -> Error {
    error!("the TPM task stopped");

    Error::new(ErrorKind::Io, "TPM task stopped")
}

/// Handle to the TPM.
///
/// The TPM context lives in a blocking task, every command is sent to it and run there. The handle
/// can be cloned to share the same context between the credential storage and the crypto.
#[derive(Debug, Clone)]
pub struct Tpm {
    jobs: mpsc::UnboundedSender<Job>,
}

impl Tpm {
    /// Connects to the TPM with a TCTI configuration (e.g. `mssim:host=localhost,port=2321`).
    pub async fn with_connection(connection: &str) -> Result<Self, Error> {
        let conf = TctiNameConf::from_str(connection).map_err(|error| {
            error!(%error, connection, "couldn't parse TPM connection");

            Error::new(ErrorKind::Invalid, "TPM connection")
        })?;

        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            let ctx = match Context::new(conf) {
                Ok(ctx) => ctx,
                Err(error) => {
                    error!(%error, "couldn't connect to the TPM device");

                    let _ = ready_tx.send(Err(Error::new(ErrorKind::Io, "to connect to the TPM")));

                    return;
                }
            };

            let _ = ready_tx.send(Ok(()));

            let mut tpm = TpmContext { ctx, primary: None };

            while let Some(job) = rx.blocking_recv() {
                job(&mut tpm);
            }

            tpm.flush_primary();

            debug!("TPM task exited");
        });

        ready_rx.await.map_err(|_| stopped())??;

        info!(connection, "connected to the TPM");

        Ok(Self { jobs })
    }

    /// Runs the commands on the TPM context and waits for the result.
    pub(crate) async fn run<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut TpmContext) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<Error> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        self.jobs
            .send(Box::new(move |tpm| {
                let _ = tx.send(f(tpm));
            }))
            .map_err(|_| E::from(stopped()))?;

        rx.await.map_err(|_| E::from(stopped()))?
    }
}

/// TPM context owned by the blocking task.
pub(crate) struct TpmContext {
    ctx: Context,
    primary: Option<KeyHandle>,
}

impl TpmContext {
    pub(crate) fn context(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Returns the primary key, created the first time.
    ///
    /// The primary key is derived from the owner seed, so the same template always gives the
    /// same key and the stored children can be loaded again.
    fn primary(&mut self) -> Result<KeyHandle, Error> {
        if let Some(primary) = self.primary {
            return Ok(primary);
        }

        let object_attributes = ObjectAttributesBuilder::new()
            .with_fixed_tpm(true)
            .with_fixed_parent(true)
            .with_st_clear(false)
            .with_sensitive_data_origin(true)
            .with_user_with_auth(true)
            .with_decrypt(true)
            // Can only protect other objects in the TPM
            .with_restricted(true)
            .build()
            .map_err(tpm_err("build the primary key attributes"))?;

        let primary_pub = PublicBuilder::new()
            .with_public_algorithm(PublicAlgorithm::SymCipher)
            .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
            .with_object_attributes(object_attributes)
            .with_symmetric_cipher_parameters(SymmetricCipherParameters::new(
                SymmetricDefinitionObject::AES_256_CFB,
            ))
            .with_symmetric_cipher_unique_identifier(Digest::default())
            .build()
            .map_err(tpm_err("build the primary key template"))?;

        let primary = self
            .ctx
            .execute_with_nullauth_session(|ctx| {
                ctx.create_primary(Hierarchy::Owner, primary_pub, None, None, None, None)
            })
            .map(|res| res.key_handle)
            .map_err(tpm_err("create the primary key"))?;

        info!("created primary key handle");

        self.primary = Some(primary);

        Ok(primary)
    }

    fn flush_primary(&mut self) {
        let Some(primary) = self.primary.take() else {
            return;
        };

        if let Err(error) = self.ctx.flush_context(primary.into()) {
            error!(%error, "couldn't flush the primary key");
        }
    }

    fn create(&mut self, template: Public, ctx: &'static str) -> Result<TpmObject, Error> {
        let primary = self.primary()?;

        let key = self
            .ctx
            .execute_with_nullauth_session(|tpm| {
                tpm.create(primary, template, None, None, None, None)
            })
            .map_err(tpm_err(ctx))?;

        Ok(TpmObject {
            public: key.out_public,
            private: key.out_private,
        })
    }

    /// Loads the object, runs the command and flushes it.
    fn with_loaded<F, T>(&mut self, object: &TpmObject, ctx: &'static str, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Context, KeyHandle) -> Result<T, tss_esapi::Error>,
    {
        let primary = self.primary()?;

        self.ctx
            .execute_with_nullauth_session(|tpm| {
                let key = tpm.load(primary, object.private.clone(), object.public.clone())?;

                let res = f(tpm, key);

                if let Err(error) = tpm.flush_context(key.into()) {
                    error!(%error, "couldn't flush key from TPM");
                }

                res
            })
            .map_err(tpm_err(ctx))
    }

    /// Signs with the ECC key, returning the fixed size `r || s` signature.
    fn sign(&mut self, key: &TpmObject, curve: Curve, data: &[u8]) -> Result<Vec<u8>, Error> {
        let data = MaxBuffer::try_from(data).map_err(tpm_err("allocate signing buffer"))?;

        let hash_alg = curve.hash();

        let signature = self.with_loaded(key, "sign with the TPM", |tpm, handle| {
            let (digest, validation) = tpm.hash(data, hash_alg, Hierarchy::Null)?;

            let scheme = SignatureScheme::EcDsa {
                hash_scheme: HashScheme::new(hash_alg),
            };

            tpm.sign(handle, digest, scheme, validation)
        })?;

        let Signature::EcDsa(signature) = signature else {
            error!("not an ecc signature");

            return Err(Error::new(ErrorKind::Invalid, "signature"));
        };

        let len = curve.coordinate_len();
        let mut raw = left_pad(signature.signature_r().value(), len)?;
        raw.extend_from_slice(&left_pad(signature.signature_s().value(), len)?);

        Ok(raw)
    }

    fn hmac(&mut self, key: &TpmObject, hash_type: Hashtype, data: &[u8]) -> Result<HMac, Error> {
        let buffer = MaxBuffer::try_from(data).map_err(tpm_err("allocate hmac buffer"))?;

        let alg = match hash_type {
            Hashtype::HmacSha256 => HashingAlgorithm::Sha256,
            Hashtype::HmacSha384 => HashingAlgorithm::Sha384,
            Hashtype::Sha256 | Hashtype::Sha384 => {
                return Err(Error::new(ErrorKind::Invalid, "hash type for hmac"));
            }
        };

        let digest = self.with_loaded(key, "compute the hmac with the TPM", |tpm, handle| {
            tpm.hmac(handle.into(), buffer, alg)
        })?;

        HMac::new(hash_type, digest.value().to_vec())
    }
}

/// Pads a big endian integer to the coordinate length.
fn left_pad(value: &[u8], len: usize) -> Result<Vec<u8>, Error> {
    let Some(pad) = len.checked_sub(value.len()) else {
        error!(len = value.len(), "signature parameter too big");

        return Err(Error::new(ErrorKind::Invalid, "signature parameter"));
    };

    let mut buf = vec![0; pad];
    buf.extend_from_slice(value);

    Ok(buf)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Curve {
    P256,
    P384,
}

impl Curve {
    fn from_pk_type(pk_type: PkType) -> Result<Self, Error> {
        match pk_type {
            PkType::Secp256R1 => Ok(Curve::P256),
            PkType::Secp384R1 => Ok(Curve::P384),
            PkType::Rsa2048Restr | PkType::RsaPkcs | PkType::RsaPss => {
                error!(?pk_type, "unsupported TPM device key type");

                Err(Error::new(ErrorKind::Unsupported, "device key type"))
            }
        }
    }

    fn pk_type(self) -> PkType {
        match self {
            Curve::P256 => PkType::Secp256R1,
            Curve::P384 => PkType::Secp384R1,
        }
    }

    fn hash(self) -> HashingAlgorithm {
        match self {
            Curve::P256 => HashingAlgorithm::Sha256,
            Curve::P384 => HashingAlgorithm::Sha384,
        }
    }

    fn coordinate_len(self) -> usize {
        match self {
            Curve::P256 => 32,
            Curve::P384 => 48,
        }
    }

    fn ecc_curve(self) -> EccCurve {
        match self {
            Curve::P256 => EccCurve::NistP256,
            Curve::P384 => EccCurve::NistP384,
        }
    }
}

/// Public and encrypted private part of a key created in the TPM.
#[derive(Clone)]
struct TpmObject {
    public: Public,
    private: Private,
}

impl TpmObject {
    fn sign_template(curve: Curve) -> Result<Public, tss_esapi::Error> {
        let object_attributes = ObjectAttributesBuilder::new()
            .with_fixed_tpm(true)
            .with_fixed_parent(true)
            .with_st_clear(false)
            .with_sensitive_data_origin(true)
            .with_user_with_auth(true)
            // Used only for signing
            .with_sign_encrypt(true)
            .build()?;

        let ecc_params = PublicEccParameters::builder()
            .with_ecc_scheme(EccScheme::EcDsa(HashScheme::new(curve.hash())))
            .with_curve(curve.ecc_curve())
            .with_key_derivation_function_scheme(KeyDerivationFunctionScheme::Null)
            .with_is_signing_key(true)
            .build()?;

        PublicBuilder::new()
            .with_public_algorithm(PublicAlgorithm::Ecc)
            .with_ecc_parameters(ecc_params)
            .with_object_attributes(object_attributes)
            .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
            .with_ecc_unique_identifier(EccPoint::default())
            .build()
    }

    fn hmac_template(hash_type: Hashtype) -> Result<Public, tss_esapi::Error> {
        let (scheme, name_alg) = match hash_type {
            Hashtype::HmacSha384 => (KeyedHashScheme::HMAC_SHA_384, HashingAlgorithm::Sha384),
            _ => (KeyedHashScheme::HMAC_SHA_256, HashingAlgorithm::Sha256),
        };

        let object_attributes = ObjectAttributesBuilder::new()
            .with_fixed_tpm(true)
            .with_fixed_parent(true)
            .with_st_clear(false)
            .with_sensitive_data_origin(true)
            .with_user_with_auth(true)
            .with_sign_encrypt(true)
            .build()?;

        PublicBuilder::new()
            .with_public_algorithm(PublicAlgorithm::KeyedHash)
            .with_name_hashing_algorithm(name_alg)
            .with_object_attributes(object_attributes)
            .with_keyed_hash_parameters(PublicKeyedHashParameters::new(scheme))
            .with_keyed_hash_unique_identifier(Digest::default())
            .build()
    }

    /// Encodes the blob as the CBOR array `[public, private]`.
    fn encode(&self) -> Result<Zeroizing<Vec<u8>>, Error> {
        let public = self.public.marshall().map_err(|error| {
            error!(%error, "couldn't marshall TPM public part");

            Error::new(ErrorKind::Encode, "TPM public part")
        })?;

        let mut buf = Zeroizing::new(Vec::new());
        ciborium::into_writer(
            &(Bytes::new(&public), Bytes::new(self.private.value())),
            &mut *buf,
        )
        .map_err(|error| {
            error!(%error, "couldn't encode TPM key blob");

            Error::new(ErrorKind::Encode, "TPM key blob")
        })?;

        Ok(buf)
    }

    fn decode(buf: &[u8], ctx: &'static str) -> Result<Self, Error> {
        let (public, private): (ByteBuf, ByteBuf) = ciborium::from_reader(buf).map_err(|error| {
            error!(%error, "couldn't decode {ctx}");

            Error::new(ErrorKind::Decode, ctx)
        })?;

        let private = Private::try_from(private.into_vec()).map_err(|error| {
            error!(%error, "couldn't read private part of {ctx}");

            Error::new(ErrorKind::Decode, ctx)
        })?;
        let public = Public::unmarshall(&public).map_err(|error| {
            error!(%error, "couldn't unmarshall public part of {ctx}");

            Error::new(ErrorKind::Decode, ctx)
        })?;

        Ok(Self { public, private })
    }

    /// Returns the curve and the SEC1 uncompressed point of an ECC key.
    fn ecc_point(&self) -> Result<(Curve, Vec<u8>), Error> {
        let Public::Ecc {
            parameters, unique, ..
        } = &self.public
        else {
            return Err(Error::new(ErrorKind::Invalid, "public part is not for ECC"));
        };

        let curve = match parameters.ecc_curve() {
            EccCurve::NistP256 => Curve::P256,
            EccCurve::NistP384 => Curve::P384,
            curve => {
                error!(?curve, "unsupported TPM key curve");

                return Err(Error::new(ErrorKind::Unsupported, "TPM key curve"));
            }
        };

        let len = curve.coordinate_len();

        let mut point = vec![0x04];
        point.extend_from_slice(&left_pad(unique.x().value(), len)?);
        point.extend_from_slice(&left_pad(unique.y().value(), len)?);

        Ok((curve, point))
    }

    fn ensure_keyed_hash(&self) -> Result<(), Error> {
        if !matches!(self.public, Public::KeyedHash { .. }) {
            return Err(Error::new(ErrorKind::Invalid, "public part is not for HMAC"));
        }

        Ok(())
    }
}

/// Device key and HMAC keys stored in the TPM.
pub struct TpmCrypto {
    tpm: Tpm,
    rng: SystemRandom,
    curve: Curve,
    point: Vec<u8>,
    sign: TpmObject,
    hmac_256: TpmObject,
    hmac_384: Option<TpmObject>,
}

impl TpmCrypto {
    /// Reads the TPM key blobs of the credential.
    pub fn from_credential(tpm: Tpm, credential: &DeviceCredential) -> Result<Self, Error> {
        let sign = TpmObject::decode(&credential.dc_private_key, "TPM device key")?;
        let (curve, point) = sign.ecc_point()?;

        let hmac_256 = TpmObject::decode(&credential.dc_hmac_secret, "TPM HMAC key")?;
        hmac_256.ensure_keyed_hash()?;

        let hmac_384 = if credential.dc_hmac_secret_384.is_empty() {
            None
        } else {
            let key = TpmObject::decode(&credential.dc_hmac_secret_384, "TPM HMAC-384 key")?;
            key.ensure_keyed_hash()?;

            Some(key)
        };

        Ok(Self {
            tpm,
            rng: SystemRandom::new(),
            curve,
            point,
            sign,
            hmac_256,
            hmac_384,
        })
    }

    /// Creates a new device key and HMAC keys in the TPM.
    pub async fn generate(tpm: Tpm, pk_type: PkType) -> Result<(Self, DeviceSecrets), Error> {
        let curve = Curve::from_pk_type(pk_type)?;

        let (sign, hmac_256, hmac_384) = tpm
            .run(move |ctx| {
                let sign = TpmObject::sign_template(curve)
                    .map_err(tpm_err("build the signing key template"))
                    .and_then(|template| ctx.create(template, "create the signing key"))?;
                let hmac_256 = TpmObject::hmac_template(Hashtype::HmacSha256)
                    .map_err(tpm_err("build the HMAC key template"))
                    .and_then(|template| ctx.create(template, "create the HMAC key"))?;
                let hmac_384 = TpmObject::hmac_template(Hashtype::HmacSha384)
                    .map_err(tpm_err("build the HMAC key template"))
                    .and_then(|template| ctx.create(template, "create the HMAC-384 key"))?;

                Ok::<_, Error>((sign, hmac_256, hmac_384))
            })
            .await?;

        info!(?pk_type, "created device keys in the TPM");

        let secrets = DeviceSecrets {
            private_key: sign.encode()?,
            hmac_secret: hmac_256.encode()?,
            hmac_secret_384: hmac_384.encode()?,
        };

        let (curve, point) = sign.ecc_point()?;

        let this = Self {
            tpm,
            rng: SystemRandom::new(),
            curve,
            point,
            sign,
            hmac_256,
            hmac_384: Some(hmac_384),
        };

        Ok((this, secrets))
    }

    fn cose_alg(&self) -> CoseAlgorithm {
        match self.curve {
            Curve::P256 => CoseAlgorithm::ES256,
            Curve::P384 => CoseAlgorithm::ES384,
        }
    }
}

impl Crypto for TpmCrypto {
    fn sign_info_type(&self) -> DeviceSgType {
        match self.curve {
            Curve::P256 => DeviceSgType::StSecP256R1,
            Curve::P384 => DeviceSgType::StSecP384R1,
        }
    }

    fn public_key(&self) -> PublicKey {
        PublicKey::with_crypto(self.curve.pk_type(), self.point.clone())
    }

    async fn cose_sign(
        &self,
        unprotected: HeaderBuilder,
        payload: Vec<u8>,
    ) -> Result<CoseSign1, Error> {
        let protected = HeaderBuilder::new().algorithm(self.cose_alg()).build();

        let mut sign = CoseSign1Builder::new()
            .protected(protected)
            .unprotected(unprotected.build())
            .payload(payload)
            .build();

        let tbs = sign.tbs_data(&[]);
        let key = self.sign.clone();
        let curve = self.curve;

        sign.signature = self
            .tpm
            .run(move |ctx| ctx.sign(&key, curve, &tbs))
            .await?;

        Ok(sign)
    }

    async fn csr(&self, device_info: &str) -> Result<Vec<u8>, Error> {
        let device_info = device_info.to_string();
        let key = self.sign.clone();
        let curve = self.curve;
        let point = self.point.clone();

        self.tpm
            .run(move |ctx| {
                let mut dn = DistinguishedName::new();
                dn.push(DnType::CommonName, device_info);

                let mut params = CertificateParams::new(Vec::<String>::new()).map_err(|err| {
                    error!(error = %err, "couldn't create csr parameters");

                    Error::new(ErrorKind::Crypto, "to create csr parameters")
                })?;
                params.distinguished_name = dn;

                let compat = RcgenKeyCompat {
                    ctx: RefCell::new(ctx),
                    key,
                    curve,
                    point,
                };

                let csr = params.serialize_request(&compat).map_err(|err| {
                    error!(error = %err, "couldn't serialize csr");

                    Error::new(ErrorKind::Crypto, "to serialize csr")
                })?;

                Ok(csr.der().to_vec())
            })
            .await
    }

    async fn hmac(&self, hash_type: Hashtype, data: &[u8]) -> Result<HMac, Error> {
        let key = match hash_type {
            Hashtype::HmacSha256 => self.hmac_256.clone(),
            Hashtype::HmacSha384 => self.hmac_384.clone().ok_or_else(|| {
                error!("missing HMAC-384 key");

                Error::new(ErrorKind::Invalid, "missing hmac secret")
            })?,
            Hashtype::Sha256 | Hashtype::Sha384 => {
                return Err(Error::new(ErrorKind::Invalid, "hash type for hmac"));
            }
        };

        let data = data.to_vec();

        self.tpm
            .run(move |ctx| ctx.hmac(&key, hash_type, &data))
            .await
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

impl std::fmt::Debug for TpmCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TpmCrypto")
            .field("curve", &self.curve)
            .finish_non_exhaustive()
    }
}

/// Signs the CSR with the TPM key.
struct RcgenKeyCompat<'a> {
    ctx: RefCell<&'a mut TpmContext>,
    key: TpmObject,
    curve: Curve,
    point: Vec<u8>,
}

impl rcgen::PublicKeyData for RcgenKeyCompat<'_> {
    fn der_bytes(&self) -> &[u8] {
        &self.point
    }

    fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        match self.curve {
            Curve::P256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            Curve::P384 => &rcgen::PKCS_ECDSA_P384_SHA384,
        }
    }
}

impl rcgen::SigningKey for RcgenKeyCompat<'_> {
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, rcgen::Error> {
        let raw = self
            .ctx
            .try_borrow_mut()
            .map_err(|_| rcgen::Error::RingUnspecified)
            .and_then(|mut ctx| {
                ctx.sign(&self.key, self.curve, msg)
                    .map_err(|_| rcgen::Error::RingUnspecified)
            })?;

        // X.509 wants the DER Ecdsa-Sig-Value, not the fixed size one
        let der = match self.curve {
            Curve::P256 => p256::ecdsa::Signature::from_slice(&raw)
                .map(|sign| sign.to_der().as_bytes().to_vec()),
            Curve::P384 => p384::ecdsa::Signature::from_slice(&raw)
                .map(|sign| sign.to_der().as_bytes().to_vec()),
        };

        der.map_err(|_| rcgen::Error::RingUnspecified)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn pad_signature_parameters() {
        assert_eq!(left_pad(&[1, 2], 4).unwrap(), [0, 0, 1, 2]);
        assert_eq!(left_pad(&[1, 2, 3, 4], 4).unwrap(), [1, 2, 3, 4]);

        let err = left_pad(&[1; 33], 32).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn curve_parameters() {
        let curve = Curve::from_pk_type(PkType::Secp384R1).unwrap();

        assert_eq!(curve, Curve::P384);
        assert_eq!(curve.pk_type(), PkType::Secp384R1);
        assert_eq!(curve.coordinate_len(), 48);
        assert_eq!(curve.hash(), HashingAlgorithm::Sha384);

        let err = Curve::from_pk_type(PkType::RsaPkcs).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn invalid_key_blob() {
        let err = TpmObject::decode(b"not cbor", "TPM device key").err().unwrap();

        assert_eq!(*err.kind(), ErrorKind::Decode);
    }

    #[tokio::test]
    async fn invalid_connection() {
        let err = Tpm::with_connection("not-a-tcti:").await.unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }
}
