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

//! Crypto operations like signing, key exchange and encryption.

use std::future::Future;

use aws_lc_rs::agreement;
use aws_lc_rs::rand::SecureRandom;
use coset::iana::Algorithm as CoseAlgorithm;
use coset::{CoseEncrypt0, CoseSign1, HeaderBuilder};
use fdo_protocol::Error;
use fdo_protocol::error::ErrorKind;
use fdo_protocol::v101::Nonce;
use fdo_protocol::v101::hash_hmac::{HMac, Hash, Hashtype};
use fdo_protocol::v101::key_exchange::{
    CipherSuite, EcdhParams, KexSuiteName, XAKeyExchange, XBKeyExchange,
};
use fdo_protocol::v101::public_key::{PkType, PublicKey};
use fdo_protocol::v101::sign_info::DeviceSgType;
use tracing::{debug, error};
use zeroize::Zeroizing;

pub(crate) mod kdf;
pub mod software;
#[cfg(feature = "tpm")]
pub mod tpm;

/// Cryptographic operations done with the device key and HMAC secrets.
///
/// The key may live outside of the process memory (e.g. in a TPM), so the operations using it
/// are asynchronous.
pub trait Crypto: Send + Sync {
    /// Device signing information.
    ///
    /// Is used to encode parameters for the device attestation signature.
    fn sign_info_type(&self) -> DeviceSgType;

    /// Public part of the device key.
    fn public_key(&self) -> PublicKey;

    /// Signs a payload into a COSE Sign1 object.
    fn cose_sign(
        &self,
        unprotected: HeaderBuilder,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<CoseSign1, Error>> + Send;

    /// Creates a DER certificate signing request for the device key.
    ///
    /// The device info is the common name of the subject.
    fn csr(&self, device_info: &str) -> impl Future<Output = Result<Vec<u8>, Error>> + Send;

    /// Computes the HMAC with the device secret for the hash type.
    fn hmac(
        &self,
        hash_type: Hashtype,
        data: &[u8],
    ) -> impl Future<Output = Result<HMac, Error>> + Send;

    /// Verifies an HMAC computed with the device secret.
    fn verify_hmac(
        &self,
        to_check: &HMac,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Error>> + Send {
        async move {
            let computed = self.hmac(to_check.hash_type(), data).await?;

            aws_lc_rs::constant_time::verify_slices_are_equal(computed.as_ref(), to_check.as_ref())
                .map_err(|_| Error::new(ErrorKind::Crypto, "to verify hmac"))
        }
    }

    /// Creates a random [`Nonce`]
    fn create_nonce(&self) -> Result<Nonce, Error>;

    /// Computes the device side of the key exchange and derives the session.
    fn key_exchange(
        &self,
        kex: KexSuiteName,
        cipher: CipherSuite,
        xa: &XAKeyExchange,
    ) -> Result<(XBKeyExchange, Session), Error>;
}

/// Secrets of a new credential, returned when the device key is generated.
///
/// With a TPM these are the wrapped key blobs, usable only with the same TPM.
pub struct DeviceSecrets {
    /// Device private key.
    pub private_key: Zeroizing<Vec<u8>>,
    /// Secret for the HMAC-SHA256.
    pub hmac_secret: Zeroizing<Vec<u8>>,
    /// Secret for the HMAC-SHA384.
    pub hmac_secret_384: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for DeviceSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSecrets").finish_non_exhaustive()
    }
}

/// Hash type used for the key type, SHA-384 only for P-384 keys.
pub fn hash_type_for(pk_type: PkType) -> Hashtype {
    match pk_type {
        PkType::Secp384R1 => Hashtype::Sha384,
        _ => Hashtype::Sha256,
    }
}

/// HMAC type used for the key type, HMAC-SHA384 only for P-384 keys.
pub fn hmac_type_for(pk_type: PkType) -> Hashtype {
    match pk_type {
        PkType::Secp384R1 => Hashtype::HmacSha384,
        _ => Hashtype::HmacSha256,
    }
}

pub(crate) fn random(rng: &dyn SecureRandom, len: usize) -> Result<Zeroizing<Vec<u8>>, Error> {
    let mut buf = Zeroizing::new(vec![0; len]);

    rng.fill(buf.as_mut_slice())
        .map_err(|_| Error::new(ErrorKind::Crypto, "to generate random bytes"))?;

    Ok(buf)
}

pub(crate) fn nonce(rng: &dyn SecureRandom) -> Result<Nonce, Error> {
    let mut nonce = [0u8; 16];

    rng.fill(nonce.as_mut_slice())
        .map_err(|_| Error::new(ErrorKind::Crypto, "to create nonce"))?;

    Ok(Nonce::new(nonce))
}

/// Device side of the ECDH key exchange.
///
/// The key is ephemeral, so it never uses the device key.
pub(crate) fn ecdh_key_exchange(
    rng: &dyn SecureRandom,
    kex: KexSuiteName,
    cipher: CipherSuite,
    xa: &XAKeyExchange,
) -> Result<(XBKeyExchange, Session), Error> {
    let params = KexParams::for_suite(kex)?;

    let ow_params = EcdhParams::parse(xa.as_ref())?;

    debug!(
        coordinate_len = ow_params.coordinate_len(),
        rand_len = ow_params.rand().len(),
        "owner key exchange parameters"
    );

    if ow_params.coordinate_len() != params.coordinate_len {
        return Err(Error::new(ErrorKind::Invalid, "mismatched point length"));
    }

    let dv_priv_key = agreement::EphemeralPrivateKey::generate(params.agreement, rng)
        .map_err(|_| Error::new(ErrorKind::Crypto, "to create agreement key"))?;

    let dv_pub_key = dv_priv_key
        .compute_public_key()
        .map_err(|_| Error::new(ErrorKind::Crypto, "to compute the public key"))?;

    let dv_rand = random(rng, params.rand_len)?;

    let xb = EcdhParams::from_sec1(dv_pub_key.as_ref(), &dv_rand)?
        .encode()
        .map(XBKeyExchange::new)?;

    let ow_pub_key = agreement::UnparsedPublicKey::new(params.agreement, ow_params.sec1_point());

    let session = agreement::agree_ephemeral(
        dv_priv_key,
        ow_pub_key,
        Error::new(ErrorKind::Crypto, "failed key agreement"),
        |shx| {
            // ShSe = Shx || DeviceRandom || OwnerRandom
            let mut sh_se = Zeroizing::new(Vec::with_capacity(
                shx.len() + dv_rand.len() + ow_params.rand().len(),
            ));
            sh_se.extend_from_slice(shx);
            sh_se.extend_from_slice(&dv_rand);
            sh_se.extend_from_slice(ow_params.rand());

            Session::derive(kex, cipher, &sh_se)
        },
    )?;

    Ok((xb, session))
}

/// Computes a digest
pub fn hash(hash_type: Hashtype, data: &[u8]) -> Result<Hash, Error> {
    let alg = match hash_type {
        Hashtype::Sha256 => &aws_lc_rs::digest::SHA256,
        Hashtype::Sha384 => &aws_lc_rs::digest::SHA384,
        Hashtype::HmacSha256 | Hashtype::HmacSha384 => {
            return Err(Error::new(ErrorKind::Invalid, "hmac type instead of hash"));
        }
    };

    let digest = aws_lc_rs::digest::digest(alg, data);

    Hash::new(hash_type, digest.as_ref().to_vec())
}

/// Verifies an Hash
pub fn verify_hash(to_check: &Hash, data: &[u8]) -> Result<(), Error> {
    let digest = hash(to_check.hash_type(), data)?;

    if to_check.as_ref() != digest.as_ref() {
        return Err(Error::new(ErrorKind::Invalid, "hash mismatch"));
    }

    Ok(())
}

fn hmac_alg(hash_type: Hashtype) -> Result<aws_lc_rs::hmac::Algorithm, Error> {
    match hash_type {
        Hashtype::HmacSha256 => Ok(aws_lc_rs::hmac::HMAC_SHA256),
        Hashtype::HmacSha384 => Ok(aws_lc_rs::hmac::HMAC_SHA384),
        Hashtype::Sha256 | Hashtype::Sha384 => {
            Err(Error::new(ErrorKind::Invalid, "hash type for hmac"))
        }
    }
}

/// Computes the HMAC of the data with the secret.
pub fn hmac(secret: &[u8], hash_type: Hashtype, data: &[u8]) -> Result<HMac, Error> {
    let key = aws_lc_rs::hmac::Key::new(hmac_alg(hash_type)?, secret);

    let tag = aws_lc_rs::hmac::sign(&key, data);

    HMac::new(hash_type, tag.as_ref().to_vec())
}

/// Verifies an HMac with the secret.
pub fn verify_hmac(secret: &[u8], hmac: &HMac, data: &[u8]) -> Result<(), Error> {
    let key = aws_lc_rs::hmac::Key::new(hmac_alg(hmac.hash_type())?, secret);

    aws_lc_rs::hmac::verify(&key, data, hmac.as_ref())
        .map_err(|_| Error::new(ErrorKind::Crypto, "to verify hmac"))
}

/// Verifies a COSE signature.
pub fn verify_cose_signature(sign: &CoseSign1, pub_key: &PublicKey) -> Result<(), Error> {
    let alg = sign
        .protected
        .header
        .alg
        .as_ref()
        .and_then(|alg| match alg {
            coset::RegisteredLabelWithPrivate::Assigned(alg) => Some(alg),
            coset::RegisteredLabelWithPrivate::PrivateUse(_)
            | coset::RegisteredLabelWithPrivate::Text(_) => None,
        })
        .ok_or(Error::new(ErrorKind::Invalid, "missing alg header"))?;

    debug!(
        pub_key = ?pub_key.pk_type(),
        algo = ?alg,
        "checking algorithm and public key"
    );

    let key = pub_key
        .key()
        .ok_or(Error::new(ErrorKind::Invalid, "public key"))?;

    let verification: &'static dyn aws_lc_rs::signature::VerificationAlgorithm =
        match (pub_key.pk_type(), alg) {
            (PkType::Secp256R1, CoseAlgorithm::ES256) => {
                &aws_lc_rs::signature::ECDSA_P256_SHA256_FIXED
            }
            (PkType::Secp384R1, CoseAlgorithm::ES384) => {
                &aws_lc_rs::signature::ECDSA_P384_SHA384_FIXED
            }
            (PkType::Rsa2048Restr | PkType::RsaPkcs, CoseAlgorithm::RS256) => {
                &aws_lc_rs::signature::RSA_PKCS1_2048_8192_SHA256
            }
            (PkType::RsaPkcs, CoseAlgorithm::RS384) => {
                &aws_lc_rs::signature::RSA_PKCS1_3072_8192_SHA384
            }
            (PkType::RsaPss, CoseAlgorithm::PS256) => {
                &aws_lc_rs::signature::RSA_PSS_2048_8192_SHA256
            }
            (PkType::RsaPss, CoseAlgorithm::PS384) => {
                &aws_lc_rs::signature::RSA_PSS_2048_8192_SHA384
            }
            _ => {
                error!(pk_type = ?pub_key.pk_type(), ?alg, "unsupported signature");

                return Err(Error::new(
                    ErrorKind::Unsupported,
                    "cose signing algorithm and public key pair",
                ));
            }
        };

    let key = aws_lc_rs::signature::UnparsedPublicKey::new(verification, key);

    sign.verify_signature(&[], |signature, message| key.verify(message, signature))
        .map_err(|_| Error::new(ErrorKind::Crypto, "to verify cose signature"))
}

/// Parameters of a supported key exchange suite.
pub(crate) struct KexParams {
    pub(crate) agreement: &'static aws_lc_rs::agreement::Algorithm,
    pub(crate) coordinate_len: usize,
    pub(crate) rand_len: usize,
    pub(crate) kdf: aws_lc_rs::hmac::Algorithm,
}

impl KexParams {
    pub(crate) fn for_suite(kex: KexSuiteName) -> Result<Self, Error> {
        match kex {
            KexSuiteName::Ecdh256 => Ok(Self {
                agreement: &aws_lc_rs::agreement::ECDH_P256,
                coordinate_len: 32,
                rand_len: 16,
                kdf: aws_lc_rs::hmac::HMAC_SHA256,
            }),
            KexSuiteName::Ecdh384 => Ok(Self {
                agreement: &aws_lc_rs::agreement::ECDH_P384,
                coordinate_len: 48,
                rand_len: 48,
                kdf: aws_lc_rs::hmac::HMAC_SHA384,
            }),
            KexSuiteName::DhKexId14
            | KexSuiteName::DhKexId15
            | KexSuiteName::AsymKex2048
            | KexSuiteName::AsymKex3072 => {
                error!(%kex, "unsupported key exchange suite");

                Err(Error::new(ErrorKind::Unsupported, "key exchange suite"))
            }
        }
    }
}

/// Encryption of the messages after the key exchange.
pub struct Session {
    cipher: CipherSuite,
    key: Zeroizing<Vec<u8>>,
}

impl Session {
    /// Derives the session key from the shared secret of the key exchange.
    pub(crate) fn derive(
        kex: KexSuiteName,
        cipher: CipherSuite,
        shared_secret: &[u8],
    ) -> Result<Self, Error> {
        let params = KexParams::for_suite(kex)?;
        let (aead, _) = Self::algorithm(cipher)?;

        let mut key = Zeroizing::new(vec![0; aead.key_len()]);

        kdf::kdf(
            params.kdf,
            shared_secret,
            kdf::LABEL,
            kdf::CONTEXT,
            key.as_mut_slice(),
        )?;

        Ok(Self { cipher, key })
    }

    fn algorithm(
        cipher: CipherSuite,
    ) -> Result<(&'static aws_lc_rs::aead::Algorithm, CoseAlgorithm), Error> {
        match cipher {
            CipherSuite::A128Gcm => Ok((&aws_lc_rs::aead::AES_128_GCM, CoseAlgorithm::A128GCM)),
            CipherSuite::A192Gcm => Ok((&aws_lc_rs::aead::AES_192_GCM, CoseAlgorithm::A192GCM)),
            CipherSuite::A256Gcm => Ok((&aws_lc_rs::aead::AES_256_GCM, CoseAlgorithm::A256GCM)),
            CipherSuite::AesCcm64_128_128
            | CipherSuite::AesCcm64_128_256
            | CipherSuite::CoseAes128Cbc
            | CipherSuite::CoseAes128Ctr
            | CipherSuite::CoseAes256Cbc
            | CipherSuite::CoseAes256Ctr => {
                error!(%cipher, "unsupported cipher suite");

                Err(Error::new(ErrorKind::Unsupported, "cipher suite"))
            }
        }
    }

    fn key(&self) -> Result<(aws_lc_rs::aead::RandomizedNonceKey, CoseAlgorithm), Error> {
        let (aead, cose) = Self::algorithm(self.cipher)?;

        let key = aws_lc_rs::aead::RandomizedNonceKey::new(aead, &self.key)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to create randomized nonce key"))?;

        Ok((key, cose))
    }

    /// Encrypts a payload into a COSE Encrypt0 object.
    pub fn encrypt(&self, payload: &[u8]) -> Result<CoseEncrypt0, Error> {
        let (key, alg) = self.key()?;

        let protected = HeaderBuilder::new().algorithm(alg).build();

        let mut nonce = None;

        let builder = coset::CoseEncrypt0Builder::new()
            .protected(protected)
            .try_create_ciphertext(payload, &[], |plain, aad| {
                let mut in_out = Vec::from(plain);

                let gen_nonce = key
                    .seal_in_place_append_tag(aws_lc_rs::aead::Aad::from(aad), &mut in_out)
                    .map_err(|_| Error::new(ErrorKind::Crypto, "to encrypt message"))?;

                nonce = Some(gen_nonce);

                Ok(in_out)
            })?;

        let nonce = nonce.ok_or(Error::new(ErrorKind::Invalid, "nonce not created"))?;

        let unprotected = HeaderBuilder::new().iv(nonce.as_ref().to_vec()).build();

        Ok(builder.unprotected(unprotected).build())
    }

    /// Decrypts a COSE Encrypt0 object.
    pub fn decrypt(&self, enc: &CoseEncrypt0) -> Result<Vec<u8>, Error> {
        let (key, alg) = self.key()?;

        let enc_alg = enc.protected.header.alg.as_ref().ok_or(Error::new(
            ErrorKind::Invalid,
            "missing alg header in cose object",
        ))?;

        if *enc_alg != coset::RegisteredLabelWithPrivate::Assigned(alg) {
            error!(?enc_alg, expected = ?alg, "mismatched encryption algorithm");

            return Err(Error::new(ErrorKind::Invalid, "cose encryption algorithm"));
        }

        let nonce = aws_lc_rs::aead::Nonce::try_assume_unique_for_key(&enc.unprotected.iv)
            .map_err(|_| Error::new(ErrorKind::Invalid, "iv for nonce"))?;

        enc.decrypt_ciphertext(
            &[],
            || Error::new(ErrorKind::Invalid, "missing ciphertext"),
            |ciphertext, aad| {
                let mut in_out = Vec::from(ciphertext);

                let len = key
                    .open_in_place(nonce, aws_lc_rs::aead::Aad::from(aad), &mut in_out)
                    .map_err(|_| Error::new(ErrorKind::Crypto, "to decrypt message"))?
                    .len();

                in_out.truncate(len);

                Ok(in_out)
            },
        )
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use aws_lc_rs::rand::SystemRandom;
    use aws_lc_rs::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair};
    use coset::CoseSign1Builder;
    use pretty_assertions::assert_eq;

    use super::*;

    /// Signs with an ES256 key, as done by the owner.
    pub(crate) fn sign_es256(
        key: &EcdsaKeyPair,
        unprotected: HeaderBuilder,
        payload: Vec<u8>,
    ) -> CoseSign1 {
        let rng = SystemRandom::new();

        CoseSign1Builder::new()
            .protected(HeaderBuilder::new().algorithm(CoseAlgorithm::ES256).build())
            .unprotected(unprotected.build())
            .payload(payload)
            .create_signature(&[], |data| key.sign(&rng, data).unwrap().as_ref().to_vec())
            .build()
    }

    pub(crate) fn p256_key() -> EcdsaKeyPair {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();

        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref()).unwrap()
    }

    pub(crate) fn public_key(key: &EcdsaKeyPair) -> PublicKey {
        PublicKey::with_crypto(PkType::Secp256R1, key.public_key().as_ref().to_vec())
    }

    #[test]
    fn verify_es256_signature() {
        let key = p256_key();
        let sign = sign_es256(&key, HeaderBuilder::new(), b"payload".to_vec());

        verify_cose_signature(&sign, &public_key(&key)).unwrap();

        let other = p256_key();
        let err = verify_cose_signature(&sign, &public_key(&other)).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Crypto);
    }

    #[test]
    fn mismatched_key_type() {
        let key = p256_key();
        let sign = sign_es256(&key, HeaderBuilder::new(), b"payload".to_vec());

        let pub_key = PublicKey::with_crypto(PkType::Secp384R1, key.public_key().as_ref().to_vec());

        let err = verify_cose_signature(&sign, &pub_key).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn hmac_and_hash() {
        let secret = [7u8; 32];

        let tag = hmac(&secret, Hashtype::HmacSha256, b"header").unwrap();
        verify_hmac(&secret, &tag, b"header").unwrap();
        verify_hmac(&[8u8; 32], &tag, b"header").unwrap_err();

        let digest = hash(Hashtype::Sha384, b"data").unwrap();
        verify_hash(&digest, b"data").unwrap();
        verify_hash(&digest, b"other").unwrap_err();
    }

    #[test]
    fn session_encrypt_decrypt() {
        for cipher in [CipherSuite::A128Gcm, CipherSuite::A192Gcm, CipherSuite::A256Gcm] {
            let session = Session::derive(KexSuiteName::Ecdh256, cipher, &[3u8; 64]).unwrap();
            let same = Session::derive(KexSuiteName::Ecdh256, cipher, &[3u8; 64]).unwrap();

            let enc = session.encrypt(b"service info").unwrap();
            assert_eq!(same.decrypt(&enc).unwrap(), b"service info");

            let other = Session::derive(KexSuiteName::Ecdh256, cipher, &[4u8; 64]).unwrap();
            other.decrypt(&enc).unwrap_err();
        }
    }

    #[test]
    fn unsupported_cipher() {
        let err = Session::derive(KexSuiteName::Ecdh256, CipherSuite::CoseAes128Cbc, &[0; 32])
            .unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Unsupported);
    }
}
