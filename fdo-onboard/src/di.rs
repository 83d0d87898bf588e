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

//! Device Initialize Protocol (DI).
//!
//! The device sends its manufacturing info to the manufacturer, which answers with the header of
//! the new Ownership Voucher. The device binds the header to its HMAC secret and builds the
//! credential used by the following onboarding.

use fdo_protocol::error::ErrorKind;
use fdo_protocol::utils::CborBstr;
use fdo_protocol::v101::PROTOCOL_VERSION_MAJOR;
use fdo_protocol::v101::device_credentials::{DeviceCredential, DeviceState};
use fdo_protocol::v101::di::app_start::AppStart;
use fdo_protocol::v101::di::mfg_info::MfgInfo;
use fdo_protocol::v101::di::set_credentials::SetCredentials;
use fdo_protocol::v101::di::set_hmac::SetHmac;
use fdo_protocol::v101::error::{ErrorCode, ErrorMessage};
use fdo_protocol::v101::ownership_voucher::OvHeader;
use fdo_protocol::v101::public_key::{PkEnc, PkType};
use fdo_protocol::v101::Message;
use serde_bytes::ByteBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use url::Url;

use crate::Error;
use crate::client::{Client, Transport};
use crate::crypto::{Crypto, DeviceSecrets, hash, hash_type_for, hmac_type_for};

/// Identity of the device given to the manufacturer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manufacturing {
    /// Serial number of the device.
    pub serial_no: String,
    /// Device info, also the common name of the certificate request.
    pub device_info: String,
}

/// Runs the DI against the manufacturer, returning the new credential.
///
/// The secrets must be the ones of the key used by the crypto, they are stored in the credential
/// as they are.
#[instrument(skip_all, fields(%url, serial_no = %mfg.serial_no))]
pub async fn device_initialize<C, T>(
    crypto: &C,
    secrets: DeviceSecrets,
    transport: &mut T,
    url: &Url,
    mfg: &Manufacturing,
    cancel: &CancellationToken,
) -> Result<DeviceCredential, Error>
where
    C: Crypto,
    T: Transport,
{
    let client = Client::new(transport, url, cancel);

    let credentials = Di::new(client).run(crypto, mfg).await?;
    let ov_header = credentials.run(crypto).await?;

    let header = ov_header.into_inner();

    let manufacturer_key = to_cbor(&header.ov_pub_key)?;
    let dc_pub_key_hash = hash(hash_type_for(header.ov_pub_key.pk_type()), &manufacturer_key)?;

    info!(guid = %header.ov_guid, "DI done");

    Ok(DeviceCredential {
        dc_prot_ver: header.ovh_prot_ver,
        dc_guid: header.ov_guid,
        dc_rv_info: header.ov_rv_info,
        dc_device_info: header.ov_device_info,
        dc_pub_key_hash,
        dc_state: DeviceState::PreTo1,
        dc_private_key: secrets.private_key,
        dc_hmac_secret: secrets.hmac_secret,
        dc_hmac_secret_384: secrets.hmac_secret_384,
    })
}

fn to_cbor(key: &impl serde::Serialize) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    ciborium::into_writer(key, &mut buf).map_err(|err| {
        error!(error = %err, "couldn't encode manufacturer key");

        fdo_protocol::Error::new(ErrorKind::Encode, "manufacturer public key")
    })?;

    Ok(buf)
}

struct Di<'c, T, S> {
    client: Client<'c, T>,
    state: S,
}

struct Start {}

impl<'c, T> Di<'c, T, Start>
where
    T: Transport,
{
    fn new(client: Client<'c, T>) -> Self {
        Self {
            client,
            state: Start {},
        }
    }

    async fn run<C>(
        mut self,
        crypto: &C,
        mfg: &Manufacturing,
    ) -> Result<Di<'c, T, Credentials>, Error>
    where
        C: Crypto,
    {
        let pk_type = crypto.public_key().pk_type();
        let csr = crypto.csr(&mfg.device_info).await?;

        let app_start = AppStart::new(MfgInfo {
            pk_type,
            pk_enc: PkEnc::X509,
            serial_no: mfg.serial_no.clone(),
            model_no: mfg.device_info.clone(),
            cert_info: ByteBuf::from(csr),
        });

        let set_credentials = self.client.send(&app_start).await?;

        info!("DI.SetCredentials received");

        Ok(Di {
            client: self.client,
            state: Credentials {
                pk_type,
                ov_header: set_credentials.ov_header,
            },
        })
    }
}

struct Credentials {
    pk_type: PkType,
    ov_header: CborBstr<OvHeader>,
}

impl<T> Di<'_, T, Credentials>
where
    T: Transport,
{
    async fn run<C>(mut self, crypto: &C) -> Result<CborBstr<OvHeader>, Error>
    where
        C: Crypto,
    {
        let prot_ver = self.state.ov_header.ovh_prot_ver;
        if prot_ver / 100 != PROTOCOL_VERSION_MAJOR {
            error!(prot_ver, "unsupported ownership voucher version");

            let msg = ErrorMessage::new(
                ErrorCode::MessageBodyError,
                SetCredentials::MSG_TYPE,
                "unsupported protocol version",
            );
            self.client.notify(&msg).await;

            return Err(
                fdo_protocol::Error::new(ErrorKind::Unsupported, "ownership voucher version").into(),
            );
        }

        let hmac = crypto
            .hmac(
                hmac_type_for(self.state.pk_type),
                self.state.ov_header.bytes()?,
            )
            .await?;

        debug!(hmac_type = ?hmac.hash_type(), "DI.SetHMAC computed");

        self.client.send(&SetHmac { hmac }).await?;

        info!("DI.Done received");

        Ok(self.state.ov_header)
    }
}

#[cfg(test)]
mod tests {
    use fdo_protocol::v101::Msgtype;
    use fdo_protocol::v101::PROTOCOL_VERSION;
    use fdo_protocol::v101::di::done::Done;
    use fdo_protocol::v101::hash_hmac::{HMac, Hashtype};
    use fdo_protocol::v101::rendezvous_info::RvProtocolValue;
    use fdo_protocol::v101::Guid;
    use pretty_assertions::assert_eq;

    use crate::client::responder::{InProcessTransport, Request, Responder, Response};
    use crate::crypto::software::SoftwareCrypto;
    use crate::crypto::tests::public_key;
    use crate::crypto::{hmac, verify_hash};
    use crate::tests::{MANUFACTURER, rv_info};

    use super::*;

    fn cbor<T: serde::Serialize>(value: &T) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf).unwrap();

        buf
    }

    /// Manufacturer creating the voucher header for the device.
    struct Manufacturer {
        guid: Guid,
        prot_ver: u16,
        mfg_info: Option<MfgInfo>,
        header: Option<CborBstr<OvHeader>>,
        hmac: Option<HMac>,
        errors: Vec<ErrorCode>,
    }

    impl Manufacturer {
        fn new() -> Self {
            Self {
                guid: Guid::new(rand::random()),
                prot_ver: PROTOCOL_VERSION,
                mfg_info: None,
                header: None,
                hmac: None,
                errors: Vec::new(),
            }
        }

        fn set_credentials(&mut self, body: &[u8]) -> (Msgtype, Vec<u8>) {
            let app_start = AppStart::decode(body).unwrap();
            let mfg_info = app_start.device_mfg_info.into_inner();

            let header = CborBstr::new(OvHeader {
                ovh_prot_ver: self.prot_ver,
                ov_guid: self.guid,
                ov_rv_info: rv_info("rv.example.com", RvProtocolValue::Http),
                ov_device_info: mfg_info.model_no.clone(),
                ov_pub_key: public_key(&MANUFACTURER),
                ov_dev_cert_chain_hash: None,
            });

            self.mfg_info = Some(mfg_info);
            self.header = Some(header.clone());

            let msg = SetCredentials { ov_header: header };

            (SetCredentials::MSG_TYPE, msg.to_bytes().unwrap())
        }
    }

    impl Responder for Manufacturer {
        fn respond(&mut self, req: Request<'_>) -> Result<Response, Error> {
            let (msg_type, body, token) = match req.msg_type {
                AppStart::MSG_TYPE => {
                    let (msg_type, body) = self.set_credentials(&req.body);

                    (msg_type, body, Some("Bearer di".to_string()))
                }
                SetHmac::MSG_TYPE => {
                    assert_eq!(req.token, Some("Bearer di"));

                    self.hmac = Some(SetHmac::decode(&req.body).unwrap().hmac);

                    (Done::MSG_TYPE, Done.to_bytes().unwrap(), None)
                }
                ErrorMessage::MSG_TYPE => {
                    let msg = ErrorMessage::decode(&req.body).unwrap();
                    self.errors.push(msg.known_code().unwrap());

                    (ErrorMessage::MSG_TYPE, req.body, None)
                }
                msg_type => panic!("unexpected message type {msg_type}"),
            };

            Ok(Response {
                msg_type,
                body,
                token,
            })
        }
    }

    fn mfg() -> Manufacturing {
        Manufacturing {
            serial_no: "1234".to_string(),
            device_info: "fdo-device".to_string(),
        }
    }

    fn url() -> Url {
        Url::parse("http://127.0.0.1:8080").unwrap()
    }

    #[tokio::test]
    async fn initialize_p384_device() {
        let (crypto, secrets) = SoftwareCrypto::generate(PkType::Secp384R1).unwrap();
        let secret_384 = secrets.hmac_secret_384.clone();
        let cancel = CancellationToken::new();
        let mut transport = InProcessTransport::new(Manufacturer::new(), cancel.clone());

        let credential =
            device_initialize(&crypto, secrets, &mut transport, &url(), &mfg(), &cancel)
                .await
                .unwrap();

        let manufacturer = transport.responder();
        let mfg_info = manufacturer.mfg_info.as_ref().unwrap();
        assert_eq!(mfg_info.pk_type, PkType::Secp384R1);
        assert_eq!(mfg_info.pk_enc, PkEnc::X509);
        assert_eq!(mfg_info.serial_no, "1234");
        assert_eq!(mfg_info.model_no, "fdo-device");
        assert_eq!(mfg_info.cert_info.first(), Some(&0x30));

        assert_eq!(credential.dc_state, DeviceState::PreTo1);
        assert_eq!(credential.dc_guid, manufacturer.guid);
        assert_eq!(credential.dc_device_info, "fdo-device");
        assert_eq!(credential.dc_prot_ver, PROTOCOL_VERSION);

        // P-256 manufacturer key
        assert_eq!(credential.dc_pub_key_hash.hash_type(), Hashtype::Sha256);
        verify_hash(
            &credential.dc_pub_key_hash,
            &cbor(&public_key(&MANUFACTURER)),
        )
        .unwrap();

        let header = manufacturer.header.as_ref().unwrap().bytes().unwrap();
        let expected = hmac(&secret_384, Hashtype::HmacSha384, header).unwrap();
        assert_eq!(manufacturer.hmac, Some(expected));

        let restored = SoftwareCrypto::from_credential(&credential).unwrap();
        assert_eq!(restored.public_key(), crypto.public_key());

        let sent: Vec<Msgtype> = transport.sent().iter().map(|(_, ty)| *ty).collect();
        assert_eq!(sent, [AppStart::MSG_TYPE, SetHmac::MSG_TYPE]);
    }

    #[tokio::test]
    async fn p256_device_uses_hmac_sha256() {
        let (crypto, secrets) = SoftwareCrypto::generate(PkType::Secp256R1).unwrap();
        let cancel = CancellationToken::new();
        let mut transport = InProcessTransport::new(Manufacturer::new(), cancel.clone());

        device_initialize(&crypto, secrets, &mut transport, &url(), &mfg(), &cancel)
            .await
            .unwrap();

        let hmac = transport.responder().hmac.clone().unwrap();
        assert_eq!(hmac.hash_type(), Hashtype::HmacSha256);
    }

    #[tokio::test]
    async fn unsupported_header_version() {
        let (crypto, secrets) = SoftwareCrypto::generate(PkType::Secp384R1).unwrap();
        let cancel = CancellationToken::new();
        let mut manufacturer = Manufacturer::new();
        manufacturer.prot_ver = 200;
        let mut transport = InProcessTransport::new(manufacturer, cancel.clone());

        let err = device_initialize(&crypto, secrets, &mut transport, &url(), &mfg(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Protocol(_)), "{err:?}");

        let manufacturer = transport.responder();
        assert_eq!(manufacturer.errors, [ErrorCode::MessageBodyError]);
        assert!(manufacturer.hmac.is_none());
    }

    #[tokio::test]
    async fn canceled() {
        let (crypto, secrets) = SoftwareCrypto::generate(PkType::Secp384R1).unwrap();
        let cancel = CancellationToken::new();
        let mut transport = InProcessTransport::new(Manufacturer::new(), cancel.clone());
        cancel.cancel();

        let err = device_initialize(&crypto, secrets, &mut transport, &url(), &mfg(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Canceled));
        assert!(transport.sent().is_empty());
    }
}
