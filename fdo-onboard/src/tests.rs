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

//! Owner and Rendezvous Server used by the protocol tests.

use std::collections::HashSet;
use std::sync::LazyLock;

use aws_lc_rs::agreement::EphemeralPrivateKey;
use aws_lc_rs::signature::EcdsaKeyPair;
use coset::{CoseSign1, HeaderBuilder, TaggedCborSerializable};
use fdo_protocol::utils::CborBstr;
use fdo_protocol::v101::device_credentials::{DeviceCredential, DeviceState};
use fdo_protocol::v101::eat_signature::{CUPH_NONCE, CUPH_OWNER_PUB_KEY};
use fdo_protocol::v101::error::{ErrorCode, ErrorMessage};
use fdo_protocol::v101::hash_hmac::{HMac, Hashtype};
use fdo_protocol::v101::key_exchange::{CipherSuite, KexSuiteName};
use fdo_protocol::v101::ownership_voucher::{OvEntryPayload, OvHeader};
use fdo_protocol::v101::public_key::PublicKey;
use fdo_protocol::v101::rendezvous_info::{
    RendezvousInfo, RendezvousInstr, RvProtocolValue, RvVariable,
};
use fdo_protocol::v101::rv_to2_addr::{RvTo2AddrEntry, To1dBlobPayload};
use fdo_protocol::v101::service_info::{ServiceInfo, ServiceInfoKv};
use fdo_protocol::v101::sign_info::{DeviceSgType, SigInfo};
use fdo_protocol::v101::to1::hello_rv::HelloRv;
use fdo_protocol::v101::to1::hello_rv_ack::HelloRvAck;
use fdo_protocol::v101::to1::prove_to_rv::ProveToRv;
use fdo_protocol::v101::to1::rv_redirect::RvRedirect;
use fdo_protocol::v101::to2::device_service_info::DeviceServiceInfo;
use fdo_protocol::v101::to2::device_service_info_ready::DeviceServiceInfoReady;
use fdo_protocol::v101::to2::done::Done;
use fdo_protocol::v101::to2::done2::Done2;
use fdo_protocol::v101::to2::get_ov_next_entry::GetOvNextEntry;
use fdo_protocol::v101::to2::hello_device::HelloDevice;
use fdo_protocol::v101::to2::ov_next_entry::OvNextEntry;
use fdo_protocol::v101::to2::owner_service_info::OwnerServiceInfo;
use fdo_protocol::v101::to2::owner_service_info_ready::OwnerServiceInfoReady;
use fdo_protocol::v101::to2::prove_device::ProveDevice;
use fdo_protocol::v101::to2::prove_ov_hdr::{ProveOvHdr, ProveOvHdrPayload};
use fdo_protocol::v101::to2::setup_device::{SetupDevice, SetupDevicePayload};
use fdo_protocol::v101::{Guid, Message, Msgtype, Nonce, PROTOCOL_VERSION, TransportProtocol};
use serde::Serialize;
use tokio::time::Instant;
use url::Url;
use zeroize::Zeroizing;

use crate::Error;
use crate::client::EncMessage;
use crate::client::responder::{Request, Responder, Response};
use crate::crypto::software::SoftwareCrypto;
use crate::crypto::software::tests::{device_pkcs8, owner_exchange, owner_session};
use crate::crypto::tests::{p256_key, public_key, sign_es256};
use crate::crypto::{Crypto, Session, hash, hmac, verify_cose_signature};

/// Key of the manufacturer, first signer of the vouchers.
pub(crate) static MANUFACTURER: LazyLock<EcdsaKeyPair> = LazyLock::new(p256_key);

pub(crate) fn to2_url() -> Url {
    Url::parse("https://owner.example.com:8043").unwrap()
}

fn cbor<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).unwrap();

    buf
}

fn random_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|_| rand::random::<u8>()).collect()
}

fn random_nonce() -> Nonce {
    Nonce::new(rand::random())
}

pub(crate) fn rv_info(dns: &str, protocol: RvProtocolValue) -> RendezvousInfo {
    vec![vec![
        RendezvousInstr::new(RvVariable::Dns, dns).unwrap(),
        RendezvousInstr::new(RvVariable::Protocol, &u8::from(protocol)).unwrap(),
    ]]
}

/// Credential of a device made by the [`MANUFACTURER`].
pub(crate) fn create_credential() -> DeviceCredential {
    let manufacturer = cbor(&public_key(&MANUFACTURER));

    DeviceCredential {
        dc_prot_ver: PROTOCOL_VERSION,
        dc_guid: Guid::new(rand::random()),
        dc_rv_info: rv_info("rv.example.com", RvProtocolValue::Http),
        dc_device_info: "test-device".to_string(),
        dc_pub_key_hash: hash(Hashtype::Sha256, &manufacturer).unwrap(),
        dc_state: DeviceState::PreTo1,
        dc_private_key: device_pkcs8(),
        dc_hmac_secret: Zeroizing::new(random_bytes(32)),
        dc_hmac_secret_384: Zeroizing::new(random_bytes(48)),
    }
}

/// Message the owner tampers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tamper {
    HelloDeviceHash,
    HeaderHmac,
    To1dSignature,
    EntryHash,
    LastEntryKey,
    SetupDeviceNonce,
    Done2Nonce,
}

/// Owner of the device, with a voucher of two entries.
pub(crate) struct Owner {
    pub(crate) credential: DeviceCredential,
    device_key: PublicKey,
    intermediate: EcdsaKeyPair,
    owner: EcdsaKeyPair,
    owner2: EcdsaKeyPair,
    /// Addresses in the to1d.
    pub(crate) rv_addrs: Vec<RvTo2AddrEntry>,
    pub(crate) new_guid: Guid,
    pub(crate) new_rv_info: RendezvousInfo,
    /// Keep the current credential.
    pub(crate) reuse: bool,
    /// Sent in the TO2.OwnerServiceInfo.
    pub(crate) service_info: ServiceInfo,
    /// Sends the service info in the last message, with `is_done`.
    pub(crate) service_info_done: bool,
    pub(crate) max_device_service_info_sz: Option<u16>,
    pub(crate) tamper: Option<Tamper>,
}

impl Owner {
    pub(crate) fn new(credential: &DeviceCredential) -> Self {
        let device_key = SoftwareCrypto::from_credential(credential)
            .unwrap()
            .public_key();

        Self {
            credential: credential.clone(),
            device_key,
            intermediate: p256_key(),
            owner: p256_key(),
            owner2: p256_key(),
            rv_addrs: vec![RvTo2AddrEntry {
                rv_ip: None,
                rv_dns: Some("owner.example.com".to_string()),
                rv_port: 8043,
                rv_protocol: TransportProtocol::Https,
            }],
            new_guid: Guid::new(rand::random()),
            new_rv_info: rv_info("rv2.example.com", RvProtocolValue::Https),
            reuse: false,
            service_info: ServiceInfo::new(),
            service_info_done: false,
            max_device_service_info_sz: None,
            tamper: None,
        }
    }

    fn tampered(&self, tamper: Tamper) -> bool {
        self.tamper == Some(tamper)
    }

    pub(crate) fn owner_key(&self) -> PublicKey {
        public_key(&self.owner)
    }

    pub(crate) fn owner2_key(&self) -> PublicKey {
        public_key(self.owner2_signer())
    }

    fn owner2_signer(&self) -> &EcdsaKeyPair {
        if self.reuse { &self.owner } else { &self.owner2 }
    }

    /// Blob registered with the Rendezvous Server.
    pub(crate) fn to1d(&self) -> CoseSign1 {
        let payload = To1dBlobPayload {
            to1d_rv: self.rv_addrs.clone(),
            to1d_to0d_hash: hash(Hashtype::Sha256, b"to0d").unwrap(),
        };

        let signer = if self.tampered(Tamper::To1dSignature) {
            &self.owner2
        } else {
            &self.owner
        };

        sign_es256(signer, HeaderBuilder::new(), cbor(&payload))
    }

    fn header(&self) -> CborBstr<OvHeader> {
        CborBstr::new(OvHeader {
            ovh_prot_ver: PROTOCOL_VERSION,
            ov_guid: self.credential.dc_guid,
            ov_rv_info: self.credential.dc_rv_info.clone(),
            ov_device_info: self.credential.dc_device_info.clone(),
            ov_pub_key: public_key(&MANUFACTURER),
            ov_dev_cert_chain_hash: None,
        })
    }

    fn header_hmac(&self, header: &[u8]) -> HMac {
        let secret: &[u8] = if self.tampered(Tamper::HeaderHmac) {
            &[0; 32]
        } else {
            &self.credential.dc_hmac_secret
        };

        hmac(secret, Hashtype::HmacSha256, header).unwrap()
    }

    fn entries(&self, header: &[u8], hmac: &HMac) -> Vec<CoseSign1> {
        let mut prev = header.to_vec();
        prev.extend(cbor(hmac));

        let mut hdr_info = self.credential.dc_guid.as_bytes().to_vec();
        hdr_info.extend_from_slice(self.credential.dc_device_info.as_bytes());
        let hdr_hash = hash(Hashtype::Sha256, &hdr_info).unwrap();

        let keys: [&EcdsaKeyPair; 3] = [&*MANUFACTURER, &self.intermediate, &self.owner];

        let mut entries = Vec::new();
        for (idx, pair) in keys.windows(2).enumerate() {
            let last = idx == keys.len() - 2;

            let ove_hash_prev_entry = if last && self.tampered(Tamper::EntryHash) {
                hash(Hashtype::Sha256, b"tampered").unwrap()
            } else {
                hash(Hashtype::Sha256, &prev).unwrap()
            };

            let ove_pub_key = if last && self.tampered(Tamper::LastEntryKey) {
                public_key(&self.owner2)
            } else {
                public_key(pair[1])
            };

            let payload = OvEntryPayload {
                ove_hash_prev_entry,
                ove_hash_hdr_info: hdr_hash.clone(),
                ove_extra: None,
                ove_pub_key,
            };

            let entry = sign_es256(pair[0], HeaderBuilder::new(), cbor(&payload));

            prev = entry.clone().to_tagged_vec().unwrap();
            entries.push(entry);
        }

        entries
    }
}

struct To2Session {
    kex: KexSuiteName,
    cipher: CipherSuite,
    key: Option<EphemeralPrivateKey>,
    rand: Vec<u8>,
    nonce_to2_prove_dv: Nonce,
    nonce_to2_setup_dv: Option<Nonce>,
    entries: Vec<CoseSign1>,
    session: Option<Session>,
}

/// Rendezvous Server and Owner Onboarding Service of the [`Owner`].
pub(crate) struct Server {
    owner: Owner,
    /// Hosts failing with a transport error.
    pub(crate) unreachable: HashSet<String>,
    /// Number of requests failing with a transport error before the server comes up.
    pub(crate) failures: usize,
    requests: Vec<(String, Msgtype, Instant)>,
    tokens: u32,
    nonce_to1_proof: Option<Nonce>,
    to2: Option<To2Session>,
    owner_info_sent: bool,
    device_info: ServiceInfo,
    device_info_sizes: Vec<usize>,
    replacement_hmac: Option<HMac>,
    error_codes: Vec<ErrorCode>,
}

impl Server {
    pub(crate) fn new(owner: Owner) -> Self {
        Self {
            owner,
            unreachable: HashSet::new(),
            failures: 0,
            requests: Vec::new(),
            tokens: 0,
            nonce_to1_proof: None,
            to2: None,
            owner_info_sent: false,
            device_info: ServiceInfo::new(),
            device_info_sizes: Vec::new(),
            replacement_hmac: None,
            error_codes: Vec::new(),
        }
    }

    pub(crate) fn owner(&self) -> &Owner {
        &self.owner
    }

    pub(crate) fn owner_mut(&mut self) -> &mut Owner {
        &mut self.owner
    }

    /// Host, message type and time of every request received.
    pub(crate) fn requests(&self) -> &[(String, Msgtype, Instant)] {
        &self.requests
    }

    /// Service info received from the device.
    pub(crate) fn device_service_info(&self) -> &[ServiceInfoKv] {
        &self.device_info
    }

    /// Encoded size of the service info of each TO2.DeviceServiceInfo.
    pub(crate) fn device_service_info_sizes(&self) -> &[usize] {
        &self.device_info_sizes
    }

    pub(crate) fn replacement_hmac(&self) -> Option<HMac> {
        self.replacement_hmac.clone()
    }

    /// Codes of the error messages sent by the device.
    pub(crate) fn error_codes(&self) -> &[ErrorCode] {
        &self.error_codes
    }

    /// Header the device must have signed for the replacement credential.
    pub(crate) fn replacement_header(&self, credential: &DeviceCredential) -> Option<Vec<u8>> {
        let header = CborBstr::new(OvHeader {
            ovh_prot_ver: PROTOCOL_VERSION,
            ov_guid: credential.dc_guid,
            ov_rv_info: credential.dc_rv_info.clone(),
            ov_device_info: credential.dc_device_info.clone(),
            ov_pub_key: self.owner.owner2_key(),
            ov_dev_cert_chain_hash: None,
        });

        header.bytes().ok().map(<[u8]>::to_vec)
    }

    fn to2(&mut self) -> &mut To2Session {
        self.to2.as_mut().expect("TO2 not started")
    }

    fn open<M: Message>(&mut self, body: &[u8]) -> M {
        let session = self.to2().session.as_ref().expect("session not established");

        EncMessage::<M>::decode(body).unwrap().open(session).unwrap()
    }

    fn seal<M: Message>(&mut self, msg: &M) -> (Msgtype, Vec<u8>) {
        let session = self.to2().session.as_ref().expect("session not established");

        let body = EncMessage::seal(session, msg).unwrap().to_bytes().unwrap();

        (M::MSG_TYPE, body)
    }

    fn hello_rv(&mut self, body: &[u8]) -> (Msgtype, Vec<u8>) {
        let hello = HelloRv::decode(body).unwrap();
        assert_eq!(hello.guid, self.owner.credential.dc_guid);

        let nonce = random_nonce();
        self.nonce_to1_proof = Some(nonce);

        let ack = HelloRvAck {
            nonce_to1_proof: nonce,
            e_b_sig_info: SigInfo::new(DeviceSgType::StSecP256R1),
        };

        (HelloRvAck::MSG_TYPE, ack.to_bytes().unwrap())
    }

    fn prove_to_rv(&mut self, body: &[u8]) -> (Msgtype, Vec<u8>) {
        let prove = ProveToRv::decode(body).unwrap();

        verify_cose_signature(prove.token(), &self.owner.device_key).unwrap();

        let eat = prove.claims().unwrap();
        assert_eq!(Some(eat.nonce), self.nonce_to1_proof);
        assert_eq!(eat.guid, self.owner.credential.dc_guid);

        let redirect = RvRedirect(self.owner.to1d());

        (RvRedirect::MSG_TYPE, redirect.to_bytes().unwrap())
    }

    fn prove_ov_hdr(&mut self, body: &[u8]) -> (Msgtype, Vec<u8>) {
        let hello = HelloDevice::decode(body).unwrap();

        let mut hashed = body.to_vec();
        if self.owner.tampered(Tamper::HelloDeviceHash) {
            hashed.push(0);
        }
        let hello_device_hash = hash(Hashtype::Sha256, &hashed).unwrap();

        let (key, rand, xa_key_exchange) = owner_exchange(hello.kex_suite_name);

        let header = self.owner.header();
        let header_bytes = header.bytes().unwrap().to_vec();
        let hmac = self.owner.header_hmac(&header_bytes);
        let entries = self.owner.entries(&header_bytes, &hmac);

        let nonce_to2_prove_dv = random_nonce();

        let payload = ProveOvHdrPayload {
            ov_header: header,
            num_ov_entries: u8::try_from(entries.len()).unwrap(),
            hmac,
            nonce_to2_prove_ov: hello.nonce_to2_prove_ov,
            e_b_sig_info: SigInfo::new(DeviceSgType::StSecP256R1),
            xa_key_exchange,
            hello_device_hash,
            max_owner_message_size: 0,
        };

        let unprotected = HeaderBuilder::new()
            .value(
                CUPH_NONCE,
                ciborium::Value::Bytes(nonce_to2_prove_dv.as_bytes().to_vec()),
            )
            .value(
                CUPH_OWNER_PUB_KEY,
                ciborium::Value::serialized(&self.owner.owner_key()).unwrap(),
            );

        let sign = sign_es256(&self.owner.owner, unprotected, cbor(&payload));

        self.to2 = Some(To2Session {
            kex: hello.kex_suite_name,
            cipher: hello.cipher_suite_name,
            key: Some(key),
            rand,
            nonce_to2_prove_dv,
            nonce_to2_setup_dv: None,
            entries,
            session: None,
        });
        self.owner_info_sent = false;

        (ProveOvHdr::MSG_TYPE, ProveOvHdr(sign).to_bytes().unwrap())
    }

    fn ov_next_entry(&mut self, body: &[u8]) -> (Msgtype, Vec<u8>) {
        let get = GetOvNextEntry::decode(body).unwrap();

        let entry = OvNextEntry {
            ov_entry_num: get.ov_entry_num,
            ov_entry: self.to2().entries[usize::from(get.ov_entry_num)].clone(),
        };

        (OvNextEntry::MSG_TYPE, entry.to_bytes().unwrap())
    }

    fn setup_device(&mut self, body: &[u8]) -> (Msgtype, Vec<u8>) {
        let prove = ProveDevice::decode(body).unwrap();

        verify_cose_signature(prove.token(), &self.owner.device_key).unwrap();

        let claims = prove.claims().unwrap();
        assert_eq!(claims.nonce, self.to2().nonce_to2_prove_dv);

        let xb = prove.xb_key_exchange().unwrap();
        let nonce_to2_setup_dv = prove.nonce_to2_setup_dv().unwrap();

        let to2 = self.to2();
        let key = to2.key.take().unwrap();
        let session = owner_session(to2.kex, to2.cipher, key, &to2.rand, &xb);
        to2.session = Some(session);
        to2.nonce_to2_setup_dv = Some(nonce_to2_setup_dv);

        let (guid, rendezvous_info) = if self.owner.reuse {
            (
                self.owner.credential.dc_guid,
                self.owner.credential.dc_rv_info.clone(),
            )
        } else {
            (self.owner.new_guid, self.owner.new_rv_info.clone())
        };

        let payload = SetupDevicePayload {
            rendezvous_info,
            guid,
            nonce_to2_setup_dv: if self.owner.tampered(Tamper::SetupDeviceNonce) {
                random_nonce()
            } else {
                nonce_to2_setup_dv
            },
            owner2_key: self.owner.owner2_key(),
        };

        let sign = sign_es256(
            self.owner.owner2_signer(),
            HeaderBuilder::new(),
            cbor(&payload),
        );

        self.seal(&SetupDevice(sign))
    }

    fn owner_service_info_ready(&mut self, body: &[u8]) -> (Msgtype, Vec<u8>) {
        let ready: DeviceServiceInfoReady = self.open(body);

        self.replacement_hmac = ready.replacement_hmac;

        let owner_ready = OwnerServiceInfoReady {
            max_device_service_info_sz: self.owner.max_device_service_info_sz,
        };

        self.seal(&owner_ready)
    }

    fn owner_service_info(&mut self, body: &[u8]) -> (Msgtype, Vec<u8>) {
        let device: DeviceServiceInfo = self.open(body);

        self.device_info_sizes.push(cbor(&device.service_info).len());
        self.device_info.extend(device.service_info);

        let owner = if device.is_more_service_info {
            OwnerServiceInfo {
                is_more_service_info: false,
                is_done: false,
                service_info: ServiceInfo::new(),
            }
        } else if !self.owner_info_sent {
            self.owner_info_sent = true;

            OwnerServiceInfo {
                is_more_service_info: false,
                is_done: self.owner.service_info_done,
                service_info: self.owner.service_info.clone(),
            }
        } else {
            OwnerServiceInfo {
                is_more_service_info: false,
                is_done: true,
                service_info: ServiceInfo::new(),
            }
        };

        self.seal(&owner)
    }

    fn done2(&mut self, body: &[u8]) -> (Msgtype, Vec<u8>) {
        let done: Done = self.open(body);
        assert_eq!(done.nonce_to2_prove_dv, self.to2().nonce_to2_prove_dv);

        let nonce_to2_setup_dv = if self.owner.tampered(Tamper::Done2Nonce) {
            random_nonce()
        } else {
            self.to2().nonce_to2_setup_dv.unwrap()
        };

        self.seal(&Done2 { nonce_to2_setup_dv })
    }

    fn error(&mut self, body: &[u8]) -> (Msgtype, Vec<u8>) {
        let msg = ErrorMessage::decode(body).unwrap();

        self.error_codes.push(msg.known_code().unwrap());

        (ErrorMessage::MSG_TYPE, body.to_vec())
    }
}

impl Responder for Server {
    fn respond(&mut self, req: Request<'_>) -> Result<Response, Error> {
        let host = req.base_url.host_str().unwrap_or_default();

        self.requests
            .push((host.to_string(), req.msg_type, Instant::now()));

        if self.failures > 0 {
            self.failures -= 1;

            return Err(Error::Transport("connect to the server"));
        }

        if self.unreachable.contains(host) {
            return Err(Error::Transport("connect to the server"));
        }

        let initial = matches!(
            req.msg_type,
            HelloRv::MSG_TYPE | HelloDevice::MSG_TYPE | ErrorMessage::MSG_TYPE
        );

        if !initial && req.token.is_none() {
            return Err(Error::Transport("missing authorization"));
        }

        let (msg_type, body) = match req.msg_type {
            HelloRv::MSG_TYPE => self.hello_rv(&req.body),
            ProveToRv::MSG_TYPE => self.prove_to_rv(&req.body),
            HelloDevice::MSG_TYPE => self.prove_ov_hdr(&req.body),
            GetOvNextEntry::MSG_TYPE => self.ov_next_entry(&req.body),
            ProveDevice::MSG_TYPE => self.setup_device(&req.body),
            DeviceServiceInfoReady::MSG_TYPE => self.owner_service_info_ready(&req.body),
            DeviceServiceInfo::MSG_TYPE => self.owner_service_info(&req.body),
            Done::MSG_TYPE => self.done2(&req.body),
            ErrorMessage::MSG_TYPE => self.error(&req.body),
            msg_type => panic!("unexpected message type {msg_type}"),
        };

        let token = matches!(req.msg_type, HelloRv::MSG_TYPE | HelloDevice::MSG_TYPE).then(|| {
            self.tokens += 1;

            format!("Bearer token-{}", self.tokens)
        });

        Ok(Response {
            msg_type,
            body,
            token,
        })
    }
}
