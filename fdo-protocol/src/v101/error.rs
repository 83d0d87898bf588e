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

//! Error returned by the protocol.
//!
//! The error message is a “catch-all” whenever processing cannot continue. This includes protocol
//! errors and any trust or security violations.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::Msgtype;

/// The error message indicates that the previous protocol message could not be processed.
///
/// ```cddl
/// ErrorMessage = [
///     EMErrorCode: uint16,
///     EMPrevMsgID: uint8,
///     EMErrorStr:  tstr,
///     EMErrorTs:   timestamp,
///     EMErrorCID:  correlationId
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    e_m_error_code: u16,
    e_m_prev_msg_id: u8,
    e_m_error_str: String,
    e_m_error_ts: Option<Timestamp>,
    e_m_error_c_i_d: Option<u64>,
}

impl ErrorMessage {
    /// Creates a new error.
    pub fn new(code: ErrorCode, prev_msg_id: Msgtype, error_str: impl Into<String>) -> Self {
        Self {
            e_m_error_code: code.into(),
            e_m_prev_msg_id: u8::try_from(prev_msg_id).unwrap_or(u8::MAX),
            e_m_error_str: error_str.into(),
            e_m_error_ts: None,
            e_m_error_c_i_d: None,
        }
    }

    /// Returns the error code as a number.
    pub fn error_code(&self) -> u16 {
        self.e_m_error_code
    }

    /// Message type the error refers to.
    pub fn prev_msg_id(&self) -> u8 {
        self.e_m_prev_msg_id
    }

    /// Human readable description sent by the peer.
    pub fn error_str(&self) -> &str {
        &self.e_m_error_str
    }

    /// Returns the code if it's a known error code.
    pub fn known_code(&self) -> Option<ErrorCode> {
        ErrorCode::try_from(self.e_m_error_code).ok()
    }
}

impl Display for ErrorMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.known_code() {
            Some(code) => write!(f, "{code}")?,
            None => write!(f, "error code {}", self.e_m_error_code)?,
        }

        write!(
            f,
            " for message {}: {}",
            self.e_m_prev_msg_id, self.e_m_error_str
        )?;

        if let Some(cid) = self.e_m_error_c_i_d {
            write!(f, " (correlation id {cid})")?;
        }

        Ok(())
    }
}

impl Serialize for ErrorMessage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            e_m_error_code,
            e_m_prev_msg_id,
            e_m_error_str,
            e_m_error_ts,
            e_m_error_c_i_d,
        } = self;

        let e_m_error_ts = e_m_error_ts.as_ref().map(ciborium::tag::Required::<_, 1>);

        (
            e_m_error_code,
            e_m_prev_msg_id,
            e_m_error_str,
            e_m_error_ts,
            e_m_error_c_i_d,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ErrorMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (e_m_error_code, e_m_prev_msg_id, e_m_error_str, e_m_error_ts, e_m_error_c_i_d): (
            _,
            _,
            _,
            Option<ciborium::tag::Accepted<Timestamp, 1>>,
            _,
        ) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            e_m_error_code,
            e_m_prev_msg_id,
            e_m_error_str,
            e_m_error_ts: e_m_error_ts.map(|t| t.0),
            e_m_error_c_i_d,
        })
    }
}

super::cbor_message!(ErrorMessage, 255, "the ErrorMessage");

/// The “EMErrorCode” in the ErrorMessage is an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum ErrorCode {
    /// The token is missing, expired or invalid.
    InvalidJwtToken = 1,
    /// One of Ownership Voucher verification checks has failed.
    InvalidOwnershipVoucher = 2,
    /// Verification of signature of owner message failed.
    InvalidOwnerSignBody = 3,
    /// Bytes provided do not represent a valid IPv4/IPv6 address.
    InvalidIpAddress = 4,
    /// Bytes provided do not represent a proper GUID.
    InvalidGuid = 5,
    /// The owner connection info for GUID is not found.
    ResourceNotFound = 6,
    /// Message body is structurally unsound.
    MessageBodyError = 100,
    /// Message structurally sound, but failed validation tests.
    ///
    /// The nonce didn’t match, signature didn’t verify, hash, or mac didn’t verify, index out of
    /// bounds, etc...
    InvalidMessageError = 101,
    /// Credential reuse rejected.
    CredReuseError = 102,
    /// Something went wrong which couldn’t be classified otherwise.
    InternalServerError = 500,
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::InvalidJwtToken => write!(f, "INVALID_JWT_TOKEN"),
            ErrorCode::InvalidOwnershipVoucher => write!(f, "INVALID_OWNERSHIP_VOUCHER"),
            ErrorCode::InvalidOwnerSignBody => write!(f, "INVALID_OWNER_SIGN_BODY"),
            ErrorCode::InvalidIpAddress => write!(f, "INVALID_IP_ADDRESS"),
            ErrorCode::InvalidGuid => write!(f, "INVALID_GUID"),
            ErrorCode::ResourceNotFound => write!(f, "RESOURCE_NOT_FOUND"),
            ErrorCode::MessageBodyError => write!(f, "MESSAGE_BODY_ERROR"),
            ErrorCode::InvalidMessageError => write!(f, "INVALID_MESSAGE_ERROR"),
            ErrorCode::CredReuseError => write!(f, "CRED_REUSE_ERROR"),
            ErrorCode::InternalServerError => write!(f, "INTERNAL_SERVER_ERROR"),
        }
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let code = match value {
            1 => ErrorCode::InvalidJwtToken,
            2 => ErrorCode::InvalidOwnershipVoucher,
            3 => ErrorCode::InvalidOwnerSignBody,
            4 => ErrorCode::InvalidIpAddress,
            5 => ErrorCode::InvalidGuid,
            6 => ErrorCode::ResourceNotFound,
            100 => ErrorCode::MessageBodyError,
            101 => ErrorCode::InvalidMessageError,
            102 => ErrorCode::CredReuseError,
            500 => ErrorCode::InternalServerError,
            _ => return Err(value),
        };

        Ok(code)
    }
}

impl From<ErrorCode> for u16 {
    fn from(value: ErrorCode) -> Self {
        value as u16
    }
}

/// Timestamp of an [`ErrorMessage`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Seconds from 1970-01-01T00:00:00Z.
    Seconds(u64),
    /// Date time string.
    Text(String),
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::v101::Message;

    use super::*;

    #[test]
    fn error_message_roundtrip() {
        let error_msg = ErrorMessage::new(ErrorCode::InternalServerError, 60, "some error");

        let buf = error_msg.to_bytes().unwrap();

        let res = ErrorMessage::decode(&buf).unwrap();

        assert_eq!(res, error_msg);
    }

    #[test]
    fn decode_with_timestamp() {
        let value = ciborium::Value::Array(vec![
            ciborium::Value::from(6u16),
            ciborium::Value::from(30u8),
            ciborium::Value::Text("not found".to_string()),
            ciborium::Value::Tag(1, Box::new(ciborium::Value::from(1_700_000_000u64))),
            ciborium::Value::from(42u64),
        ]);

        let buf = crate::utils::to_cbor(&value, "test").unwrap();

        let res = ErrorMessage::decode(&buf).unwrap();

        assert_eq!(res.known_code(), Some(ErrorCode::ResourceNotFound));
        assert_eq!(res.prev_msg_id(), 30);
        assert_eq!(res.e_m_error_ts, Some(Timestamp::Seconds(1_700_000_000)));

        insta::assert_snapshot!(res, @"RESOURCE_NOT_FOUND for message 30: not found (correlation id 42)");
    }

    #[test]
    fn error_message_display() {
        let error_msg = ErrorMessage::new(ErrorCode::CredReuseError, 65, "reuse");

        insta::assert_snapshot!(error_msg, @"CRED_REUSE_ERROR for message 65: reuse");

        let error_msg = ErrorMessage {
            e_m_error_code: 9000,
            e_m_prev_msg_id: 60,
            e_m_error_str: "some error".into(),
            e_m_error_ts: None,
            e_m_error_c_i_d: None,
        };

        insta::assert_snapshot!(error_msg, @"error code 9000 for message 60: some error");
    }

    #[test]
    fn error_message_known_code_roundtrip() {
        let error_codes = [
            ErrorCode::InvalidJwtToken,
            ErrorCode::InvalidOwnershipVoucher,
            ErrorCode::InvalidOwnerSignBody,
            ErrorCode::InvalidIpAddress,
            ErrorCode::InvalidGuid,
            ErrorCode::ResourceNotFound,
            ErrorCode::MessageBodyError,
            ErrorCode::InvalidMessageError,
            ErrorCode::CredReuseError,
            ErrorCode::InternalServerError,
        ];

        for code in error_codes {
            let error_msg = ErrorMessage::new(code, 60, "some error");

            assert_eq!(error_msg.known_code(), Some(code));
            assert_eq!(u16::from(code), error_msg.error_code());
        }
    }
}
