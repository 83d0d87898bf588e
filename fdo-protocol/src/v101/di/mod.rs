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

//! Device Initialization Protocol (DI).
//!
//! Run once at the manufacturer: the Device sends its manufacturing info, receives the Ownership
//! Voucher header and answers with the HMAC of the header, computed with its new secret.
//!
//! The protocol is not normative, the messages follow the other client implementations.

pub mod app_start;
pub mod done;
pub mod mfg_info;
pub mod set_credentials;
pub mod set_hmac;
