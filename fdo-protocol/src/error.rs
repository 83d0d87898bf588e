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

//! Error returned while encoding, decoding or validating protocol records.

use std::fmt::Display;

/// Error for the protocol.
///
/// The context is a static string naming the record or the value that failed, the details are
/// logged where the error is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    ctx: &'static str,
}

impl Error {
    /// Create a new error with the given context.
    pub const fn new(kind: ErrorKind, ctx: &'static str) -> Self {
        Self { kind, ctx }
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the context of the error.
    pub fn context(&self) -> &'static str {
        self.ctx
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.ctx)
    }
}

impl std::error::Error for Error {}

/// Operation for which the [`Error`] was generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Couldn't encode data.
    Encode,
    /// Couldn't decode data.
    Decode,
    /// A value is out of range.
    OutOfRange,
    /// A value is invalid.
    Invalid,
    /// The value is valid but not supported by this implementation.
    Unsupported,
    /// Couldn't write data.
    Write,
    /// Couldn't complete crypto operation.
    Crypto,
    /// Couldn't complete io operation
    Io,
    /// The peer answered with an error message.
    Message,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Encode => write!(f, "couldn't encode"),
            ErrorKind::Decode => write!(f, "couldn't decode"),
            ErrorKind::OutOfRange => write!(f, "value out of range"),
            ErrorKind::Invalid => write!(f, "invalid value"),
            ErrorKind::Unsupported => write!(f, "unsupported value"),
            ErrorKind::Write => write!(f, "couldn't write"),
            ErrorKind::Crypto => write!(f, "couldn't complete crypto operation"),
            ErrorKind::Io => write!(f, "couldn't complete io operation"),
            ErrorKind::Message => write!(f, "received error message"),
        }
    }
}
